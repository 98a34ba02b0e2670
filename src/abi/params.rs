//! `io_uring_setup` parameters and ring offset tables.

use std::mem::{offset_of, size_of};

use static_assertions::const_assert_eq;

/// Offsets of the submission ring fields inside the SQ mapping
/// (`struct io_sqring_offsets`).
#[repr(C)]
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SqRingOffsets {
    /// Consumer index, advanced by the kernel.
    pub head: u32,
    /// Producer index, advanced by user space.
    pub tail: u32,
    /// `entries - 1`.
    pub ring_mask: u32,
    /// Number of entries.
    pub ring_entries: u32,
    /// `IORING_SQ_*` runtime flags.
    pub flags: u32,
    /// Count of invalid entries the kernel skipped.
    pub dropped: u32,
    /// Index array mapping ring positions to SQE slots.
    pub array: u32,
    /// Reserved.
    pub resv1: u32,
    /// `user_addr` when `IORING_SETUP_NO_MMAP` is used; unused here.
    pub user_addr: u64,
}

/// Offsets of the completion ring fields inside the CQ mapping
/// (`struct io_cqring_offsets`).
#[repr(C)]
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CqRingOffsets {
    /// Consumer index, advanced by user space.
    pub head: u32,
    /// Producer index, advanced by the kernel.
    pub tail: u32,
    /// `entries - 1`.
    pub ring_mask: u32,
    /// Number of entries.
    pub ring_entries: u32,
    /// Count of completions lost to overflow.
    pub overflow: u32,
    /// Start of the CQE array.
    pub cqes: u32,
    /// `IORING_CQ_*` flags.
    pub flags: u32,
    /// Reserved.
    pub resv1: u32,
    /// `user_addr` when `IORING_SETUP_NO_MMAP` is used; unused here.
    pub user_addr: u64,
}

/// Argument and result block of `io_uring_setup` (`struct io_uring_params`).
///
/// The kernel rounds the requested entry counts up to powers of two and
/// writes the values it actually allocated back into `sq_entries` and
/// `cq_entries`.
#[repr(C)]
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Params {
    /// Submission ring size (in: requested, out: allocated).
    pub sq_entries: u32,
    /// Completion ring size (in: with `IORING_SETUP_CQSIZE`, out: allocated).
    pub cq_entries: u32,
    /// `IORING_SETUP_*` flags.
    pub flags: u32,
    /// CPU for the SQ polling thread.
    pub sq_thread_cpu: u32,
    /// Idle time for the SQ polling thread, in milliseconds.
    pub sq_thread_idle: u32,
    /// `IORING_FEAT_*` bits reported by the kernel.
    pub features: u32,
    /// Ring to share the async backend with.
    pub wq_fd: u32,
    /// Reserved.
    pub resv: [u32; 3],
    /// Submission ring offsets.
    pub sq_off: SqRingOffsets,
    /// Completion ring offsets.
    pub cq_off: CqRingOffsets,
}

const_assert_eq!(size_of::<SqRingOffsets>(), 40);
const_assert_eq!(size_of::<CqRingOffsets>(), 40);
const_assert_eq!(size_of::<Params>(), 120);
const_assert_eq!(offset_of!(Params, sq_off), 40);
const_assert_eq!(offset_of!(Params, cq_off), 80);

impl Params {
    /// Whether the kernel reported a feature bit.
    #[inline]
    pub fn has_feature(&self, feature: u32) -> bool {
        self.features & feature != 0
    }

    /// Byte length of the SQ ring mapping (header plus index array).
    pub fn sq_ring_len(&self) -> usize {
        self.sq_off.array as usize + self.sq_entries as usize * size_of::<u32>()
    }

    /// Byte length of the CQ ring mapping (header plus CQE array).
    pub fn cq_ring_len(&self) -> usize {
        self.cq_off.cqes as usize + self.cq_entries as usize * size_of::<super::Cqe>()
    }

    /// Byte length of the SQE array mapping.
    pub fn sqes_len(&self) -> usize {
        self.sq_entries as usize * size_of::<super::Sqe>()
    }
}
