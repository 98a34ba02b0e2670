//! Completion ring: the kernel produces, user space consumes.

use std::ptr::NonNull;
use std::sync::atomic::{AtomicU32, Ordering};

use crate::abi::{Cqe, Params};

use super::Mmap;

/// User-side view of the completion ring.
///
/// The kernel publishes entries by storing the shared tail with release
/// semantics; it is loaded here with `Acquire` before any entry is read. The
/// shared head is stored with `Release` only after the entries it covers have
/// been copied out, so the kernel never overwrites an entry still being read.
#[derive(Debug)]
pub struct CompletionQueue {
    khead: NonNull<AtomicU32>,
    ktail: NonNull<AtomicU32>,
    koverflow: NonNull<AtomicU32>,
    ring_mask: u32,
    ring_entries: u32,
    cqes: NonNull<Cqe>,
}

impl CompletionQueue {
    /// # Safety
    ///
    /// `ring` must be the CQ ring mapping (or the shared single mapping) of
    /// the ring described by `params`.
    pub(crate) unsafe fn new(ring: &Mmap, params: &Params) -> Self {
        let off = &params.cq_off;
        // SAFETY: offsets come from the kernel's table for this mapping.
        unsafe {
            Self::from_raw_parts(
                ring.offset(off.head),
                ring.offset(off.tail),
                ring.offset(off.overflow),
                *ring.offset::<u32>(off.ring_mask),
                *ring.offset::<u32>(off.ring_entries),
                ring.offset(off.cqes),
            )
        }
    }

    /// # Safety
    ///
    /// Every pointer must be non-null, aligned and valid for the life of the
    /// queue; `cqes` must hold `ring_entries` elements, a power of two.
    pub(crate) unsafe fn from_raw_parts(
        khead: *mut AtomicU32,
        ktail: *mut AtomicU32,
        koverflow: *mut AtomicU32,
        ring_mask: u32,
        ring_entries: u32,
        cqes: *mut Cqe,
    ) -> Self {
        // SAFETY: upheld by the caller.
        unsafe {
            Self {
                khead: NonNull::new_unchecked(khead),
                ktail: NonNull::new_unchecked(ktail),
                koverflow: NonNull::new_unchecked(koverflow),
                ring_mask,
                ring_entries,
                cqes: NonNull::new_unchecked(cqes),
            }
        }
    }

    /// Number of slots in the ring.
    #[inline]
    pub fn entries(&self) -> u32 {
        self.ring_entries
    }

    #[inline]
    fn head(&self) -> u32 {
        // SAFETY: points into the live CQ mapping. Only this side writes it.
        unsafe { self.khead.as_ref() }.load(Ordering::Relaxed)
    }

    #[inline]
    fn tail(&self) -> u32 {
        // SAFETY: points into the live CQ mapping. Pairs with the kernel's
        // release store of the tail.
        unsafe { self.ktail.as_ref() }.load(Ordering::Acquire)
    }

    /// Completions published by the kernel and not yet consumed.
    #[inline]
    pub fn ready(&self) -> u32 {
        self.tail().wrapping_sub(self.head())
    }

    /// Completions the kernel could not post because the ring was full.
    pub fn overflow(&self) -> u32 {
        // SAFETY: points into the live CQ mapping.
        unsafe { self.koverflow.as_ref() }.load(Ordering::Relaxed)
    }

    /// Consume up to `max` completions, oldest first.
    ///
    /// The returned iterator copies entries out lazily and advances the shared
    /// head when dropped, by the number of entries actually yielded. Entries
    /// left unread stay in the ring for the next call.
    pub fn drain(&mut self, max: usize) -> Drain<'_> {
        let head = self.head();
        let available = self.tail().wrapping_sub(head) as usize;
        let count = available.min(max);
        Drain {
            end: head.wrapping_add(count as u32),
            head,
            queue: self,
        }
    }
}

/// Lazy iterator over completions, returned by [`CompletionQueue::drain`].
#[derive(Debug)]
pub struct Drain<'a> {
    queue: &'a mut CompletionQueue,
    head: u32,
    end: u32,
}

impl Iterator for Drain<'_> {
    type Item = Cqe;

    fn next(&mut self) -> Option<Cqe> {
        if self.head == self.end {
            return None;
        }
        let index = (self.head & self.queue.ring_mask) as usize;
        // SAFETY: index is masked into the CQE array, and [head, end) was
        // published by the kernel before the acquire load of the tail.
        let cqe = unsafe { self.queue.cqes.as_ptr().add(index).read() };
        self.head = self.head.wrapping_add(1);
        Some(cqe)
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        let remaining = self.end.wrapping_sub(self.head) as usize;
        (remaining, Some(remaining))
    }
}

impl ExactSizeIterator for Drain<'_> {}

impl Drop for Drain<'_> {
    fn drop(&mut self) {
        // SAFETY: points into the live CQ mapping. Release orders the copies
        // above before the kernel may reuse the slots.
        unsafe { self.queue.khead.as_ref() }.store(self.head, Ordering::Release);
    }
}
