//! Ring setup, memory mapping and the `io_uring_enter` system call.

use std::io;
use std::os::fd::{AsFd, AsRawFd, BorrowedFd, FromRawFd, OwnedFd, RawFd};
use std::ptr;

use tracing::{debug, trace};

use crate::abi::{
    Params, IORING_ENTER_GETEVENTS, IORING_FEAT_SINGLE_MMAP, IORING_OFF_CQ_RING,
    IORING_OFF_SQES, IORING_OFF_SQ_RING, IORING_SETUP_CLAMP, IORING_SETUP_CQSIZE,
};
use crate::config::RingConfig;
use crate::error::{ReactorError, Result};

use super::{CompletionQueue, Drain, Mmap, SlotHandle, SubmissionQueue};

/// `io_uring_setup(2)`.
pub fn io_uring_setup(entries: u32, params: &mut Params) -> io::Result<OwnedFd> {
    // SAFETY: params is a valid, writable io_uring_params block.
    let ret = unsafe {
        libc::syscall(
            libc::SYS_io_uring_setup,
            entries as libc::c_long,
            params as *mut Params,
        )
    };
    if ret < 0 {
        return Err(io::Error::last_os_error());
    }
    // SAFETY: on success the kernel returns a new descriptor we now own.
    Ok(unsafe { OwnedFd::from_raw_fd(ret as RawFd) })
}

/// `io_uring_enter(2)` without a signal mask.
pub fn io_uring_enter(fd: RawFd, to_submit: u32, min_complete: u32, flags: u32) -> io::Result<u32> {
    // SAFETY: no pointer arguments besides the null sigset.
    let ret = unsafe {
        libc::syscall(
            libc::SYS_io_uring_enter,
            fd as libc::c_long,
            to_submit as libc::c_long,
            min_complete as libc::c_long,
            flags as libc::c_long,
            ptr::null::<libc::sigset_t>(),
            0 as libc::c_long,
        )
    };
    if ret < 0 {
        return Err(io::Error::last_os_error());
    }
    Ok(ret as u32)
}

/// Submission and completion rings mapped from one io_uring instance.
///
/// This is the self-contained transport used when the native helper library
/// is not bound. It is not internally synchronized: all mutation goes through
/// `&mut self`, which gives the single-producer/single-consumer discipline
/// the rings require.
#[derive(Debug)]
pub struct RingTransport {
    sq: SubmissionQueue,
    cq: CompletionQueue,
    params: Params,
    // Mappings are released before the descriptor is closed.
    _sqes: Mmap,
    _cq_ring: Option<Mmap>,
    _sq_ring: Mmap,
    fd: OwnedFd,
}

// SAFETY: the raw pointers in the queues refer to mappings owned by this
// value. Moving it to another thread moves the exclusive access with it; the
// kernel side is synchronized through the atomic indices.
unsafe impl Send for RingTransport {}

impl RingTransport {
    /// Create a ring with at least `entries` submission slots and map it.
    ///
    /// The kernel rounds `entries` up to a power of two; the allocated sizes
    /// are read back and available from [`sq_entries`](Self::sq_entries) and
    /// [`cq_entries`](Self::cq_entries). `config` supplies the completion ring
    /// size and the clamp flag.
    ///
    /// # Errors
    ///
    /// [`ReactorError::Setup`] when the kernel refuses the ring (old kernel,
    /// seccomp, resource limits) and [`ReactorError::Mmap`] when a region
    /// cannot be mapped.
    pub fn map(entries: u32, config: &RingConfig) -> Result<Self> {
        let mut params = Params::default();
        if config.cq_entries != 0 {
            params.flags |= IORING_SETUP_CQSIZE;
            params.cq_entries = config.cq_entries;
        }
        if config.clamp {
            params.flags |= IORING_SETUP_CLAMP;
        }

        let fd = io_uring_setup(entries, &mut params).map_err(ReactorError::Setup)?;

        let single_mmap = params.has_feature(IORING_FEAT_SINGLE_MMAP);
        let mut sq_len = params.sq_ring_len();
        let cq_len = params.cq_ring_len();
        if single_mmap {
            sq_len = sq_len.max(cq_len);
        }

        let sq_ring = Mmap::new(fd.as_fd(), IORING_OFF_SQ_RING, sq_len).map_err(ReactorError::Mmap)?;
        let cq_ring = if single_mmap {
            None
        } else {
            Some(Mmap::new(fd.as_fd(), IORING_OFF_CQ_RING, cq_len).map_err(ReactorError::Mmap)?)
        };
        let sqes =
            Mmap::new(fd.as_fd(), IORING_OFF_SQES, params.sqes_len()).map_err(ReactorError::Mmap)?;

        // SAFETY: the mappings were created from this ring's offsets and are
        // stored alongside the queues, so they outlive them.
        let (sq, cq) = unsafe {
            let sq = SubmissionQueue::new(&sq_ring, &sqes, &params);
            let cq = CompletionQueue::new(cq_ring.as_ref().unwrap_or(&sq_ring), &params);
            (sq, cq)
        };

        debug!(
            fd = fd.as_raw_fd(),
            sq_entries = params.sq_entries,
            cq_entries = params.cq_entries,
            features = params.features,
            single_mmap,
            "mapped io_uring"
        );

        Ok(Self {
            sq,
            cq,
            params,
            _sqes: sqes,
            _cq_ring: cq_ring,
            _sq_ring: sq_ring,
            fd,
        })
    }

    /// Take the next free submission slot.
    ///
    /// # Errors
    ///
    /// [`ReactorError::Full`] when every slot is acquired or awaiting the
    /// kernel. Nothing is modified in that case.
    #[inline]
    pub fn acquire_slot(&mut self) -> Result<SlotHandle> {
        self.sq.acquire().ok_or(ReactorError::Full)
    }

    /// Publish every acquired slot and enter the kernel.
    ///
    /// With `wait_nr > 0` the call blocks until at least that many completions
    /// are available. Returns the number of entries the kernel consumed.
    /// The enter system call is skipped when there is nothing to submit,
    /// nothing to wait for and no overflowed completion to flush.
    pub fn publish(&mut self, wait_nr: u32) -> io::Result<u32> {
        let to_submit = self.sq.publish();
        if to_submit == 0 && wait_nr == 0 {
            self.flush_overflow()?;
            return Ok(0);
        }
        if self.sq.cq_overflow_pending() {
            return io_uring_enter(self.fd.as_raw_fd(), to_submit, wait_nr, IORING_ENTER_GETEVENTS);
        }
        let flags = if wait_nr > 0 { IORING_ENTER_GETEVENTS } else { 0 };
        io_uring_enter(self.fd.as_raw_fd(), to_submit, wait_nr, flags)
    }

    /// Move overflowed completions into the completion ring, if the kernel
    /// reports any.
    pub fn flush_overflow(&mut self) -> io::Result<()> {
        if !self.sq.cq_overflow_pending() {
            return Ok(());
        }
        trace!(fd = self.fd.as_raw_fd(), "flushing CQ overflow");
        io_uring_enter(self.fd.as_raw_fd(), 0, 0, IORING_ENTER_GETEVENTS).map(|_| ())
    }

    /// Whether completions are waiting in the kernel's overflow list.
    #[inline]
    pub fn cq_overflow_pending(&self) -> bool {
        self.sq.cq_overflow_pending()
    }

    /// Consume up to `max` completions.
    #[inline]
    pub fn drain(&mut self, max: usize) -> Drain<'_> {
        self.cq.drain(max)
    }

    /// Completions ready to drain.
    #[inline]
    pub fn ready(&self) -> u32 {
        self.cq.ready()
    }

    /// Allocated submission ring size.
    #[inline]
    pub fn sq_entries(&self) -> u32 {
        self.sq.entries()
    }

    /// Allocated completion ring size.
    #[inline]
    pub fn cq_entries(&self) -> u32 {
        self.cq.entries()
    }

    /// Free submission slots.
    #[inline]
    pub fn space_left(&self) -> u32 {
        self.sq.space_left()
    }

    /// Slots acquired since the last publish.
    #[inline]
    pub fn unpublished(&self) -> u32 {
        self.sq.unpublished()
    }

    /// Completions lost to overflow (always 0 with `IORING_FEAT_NODROP`).
    pub fn cq_overflow(&self) -> u32 {
        self.cq.overflow()
    }

    /// Submission entries the kernel rejected as malformed.
    pub fn sq_dropped(&self) -> u32 {
        self.sq.dropped()
    }

    /// Setup parameters as returned by the kernel.
    pub fn params(&self) -> &Params {
        &self.params
    }
}

impl AsFd for RingTransport {
    fn as_fd(&self) -> BorrowedFd<'_> {
        self.fd.as_fd()
    }
}
