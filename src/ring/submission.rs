//! Submission ring: user space produces, the kernel consumes.

use std::ptr::NonNull;
use std::sync::atomic::{AtomicU32, Ordering};

use crate::abi::{Params, Sqe, IORING_SQ_CQ_OVERFLOW};

use super::Mmap;

/// A writable submission slot.
///
/// Obtained from the ring's slot acquisition and filled by the operation
/// builder. The slot becomes visible to the kernel at the next publish; the
/// handle must not be used after that.
#[derive(Debug)]
pub struct SlotHandle {
    sqe: NonNull<Sqe>,
}

impl SlotHandle {
    /// Wrap a slot pointer handed out by a ring.
    ///
    /// # Safety
    ///
    /// `sqe` must point at an unpublished submission entry owned by a live
    /// ring.
    #[inline]
    pub unsafe fn from_raw(sqe: NonNull<Sqe>) -> Self {
        Self { sqe }
    }

    /// Raw pointer to the slot.
    #[inline]
    pub fn as_ptr(&self) -> *mut Sqe {
        self.sqe.as_ptr()
    }

    /// Mutable view of the slot.
    ///
    /// # Safety
    ///
    /// The ring that produced the handle must still be alive and the slot must
    /// not have been published yet.
    #[inline]
    pub unsafe fn sqe_mut(&mut self) -> &mut Sqe {
        // SAFETY: upheld by the caller.
        unsafe { self.sqe.as_mut() }
    }
}

/// User-side view of the submission ring.
///
/// `sqe_tail` counts slots handed out, `sqe_head` counts slots already
/// published through the shared tail. The shared tail is written with
/// `Release` so the kernel, which reads it with acquire semantics, observes
/// fully written entries. The shared head is written by the kernel with
/// release semantics and read here with `Acquire`.
#[derive(Debug)]
pub struct SubmissionQueue {
    khead: NonNull<AtomicU32>,
    ktail: NonNull<AtomicU32>,
    kdropped: NonNull<AtomicU32>,
    kflags: NonNull<AtomicU32>,
    ring_mask: u32,
    ring_entries: u32,
    sqes: NonNull<Sqe>,
    sqe_head: u32,
    sqe_tail: u32,
}

impl SubmissionQueue {
    /// Build the view and fill the index array with the identity mapping,
    /// so ring position `i` always refers to SQE `i`.
    ///
    /// # Safety
    ///
    /// `ring` and `sqes` must be the SQ ring and SQE mappings of the ring
    /// described by `params`.
    pub(crate) unsafe fn new(ring: &Mmap, sqes: &Mmap, params: &Params) -> Self {
        let off = &params.sq_off;
        // SAFETY: offsets come from the kernel's table for this mapping.
        unsafe {
            Self::from_raw_parts(
                ring.offset(off.head),
                ring.offset(off.tail),
                ring.offset(off.dropped),
                ring.offset(off.flags),
                *ring.offset::<u32>(off.ring_mask),
                *ring.offset::<u32>(off.ring_entries),
                ring.offset(off.array),
                sqes.as_ptr().cast(),
            )
        }
    }

    /// Build the view from individual pointers.
    ///
    /// # Safety
    ///
    /// Every pointer must be non-null, aligned, and stay valid for the life of
    /// the queue; `array` and `sqes` must hold `ring_entries` elements and
    /// `ring_entries` must be a power of two with `ring_mask = ring_entries - 1`.
    pub(crate) unsafe fn from_raw_parts(
        khead: *mut AtomicU32,
        ktail: *mut AtomicU32,
        kdropped: *mut AtomicU32,
        kflags: *mut AtomicU32,
        ring_mask: u32,
        ring_entries: u32,
        array: *mut u32,
        sqes: *mut Sqe,
    ) -> Self {
        // SAFETY: upheld by the caller.
        unsafe {
            for index in 0..ring_entries {
                *array.add(index as usize) = index;
            }

            // Both local indices start wherever the kernel left the shared tail.
            let tail = (*ktail).load(Ordering::Acquire);

            Self {
                khead: NonNull::new_unchecked(khead),
                ktail: NonNull::new_unchecked(ktail),
                kdropped: NonNull::new_unchecked(kdropped),
                kflags: NonNull::new_unchecked(kflags),
                ring_mask,
                ring_entries,
                sqes: NonNull::new_unchecked(sqes),
                sqe_head: tail,
                sqe_tail: tail,
            }
        }
    }

    #[inline]
    fn head(&self) -> u32 {
        // SAFETY: points into the live SQ mapping. Kernel-written index.
        unsafe { self.khead.as_ref() }.load(Ordering::Acquire)
    }

    /// Number of slots in the ring.
    #[inline]
    pub fn entries(&self) -> u32 {
        self.ring_entries
    }

    /// Slots acquired or published but not yet consumed by the kernel.
    #[inline]
    pub fn in_use(&self) -> u32 {
        self.sqe_tail.wrapping_sub(self.head())
    }

    /// Free slots.
    #[inline]
    pub fn space_left(&self) -> u32 {
        self.ring_entries - self.in_use()
    }

    /// Slots acquired but not yet published.
    #[inline]
    pub fn unpublished(&self) -> u32 {
        self.sqe_tail.wrapping_sub(self.sqe_head)
    }

    /// Entries the kernel dropped as invalid.
    pub fn dropped(&self) -> u32 {
        // SAFETY: points into the live SQ mapping.
        unsafe { self.kdropped.as_ref() }.load(Ordering::Relaxed)
    }

    /// Whether the kernel holds overflowed completions that only an enter
    /// with `GETEVENTS` moves into the completion ring.
    pub fn cq_overflow_pending(&self) -> bool {
        // SAFETY: points into the live SQ mapping. Kernel-written flags.
        let flags = unsafe { self.kflags.as_ref() }.load(Ordering::Acquire);
        flags & IORING_SQ_CQ_OVERFLOW != 0
    }

    /// Hand out the slot at the local tail, or `None` when
    /// `tail - head == entries`. The slot is zeroed.
    pub fn acquire(&mut self) -> Option<SlotHandle> {
        let head = self.head();
        if self.sqe_tail.wrapping_sub(head) >= self.ring_entries {
            return None;
        }

        let index = (self.sqe_tail & self.ring_mask) as usize;
        // SAFETY: index is masked into the SQE array, and the slot lies
        // outside [head, tail) so the kernel is not reading it.
        let slot = unsafe {
            let sqe = self.sqes.as_ptr().add(index);
            (*sqe).clear();
            SlotHandle::from_raw(NonNull::new_unchecked(sqe))
        };
        self.sqe_tail = self.sqe_tail.wrapping_add(1);
        Some(slot)
    }

    /// Expose every acquired slot to the kernel by storing the local tail into
    /// the shared tail. Returns the number of entries waiting for the kernel.
    pub fn publish(&mut self) -> u32 {
        if self.sqe_head != self.sqe_tail {
            // SAFETY: points into the live SQ mapping. Release pairs with the
            // kernel's acquire load of the tail.
            unsafe { self.ktail.as_ref() }.store(self.sqe_tail, Ordering::Release);
            self.sqe_head = self.sqe_tail;
        }
        self.sqe_head.wrapping_sub(self.head())
    }
}
