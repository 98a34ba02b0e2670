//! Binary-compatible io_uring kernel structures.
//!
//! Everything in this module mirrors `include/uapi/linux/io_uring.h` byte for
//! byte. The layouts are pinned with compile-time assertions in [`entry`] and
//! [`params`]; a mismatch against the running kernel cannot be detected at
//! runtime, so any change here must be checked against the kernel headers.

mod entry;
mod params;


pub use entry::{Cqe, KernelTimespec, Sqe};
pub use params::{CqRingOffsets, Params, SqRingOffsets};

/// Kernel operation codes (`enum io_uring_op`).
#[allow(missing_docs)]
pub mod opcode {
    pub const NOP: u8 = 0;
    pub const READV: u8 = 1;
    pub const WRITEV: u8 = 2;
    pub const FSYNC: u8 = 3;
    pub const POLL_ADD: u8 = 6;
    pub const POLL_REMOVE: u8 = 7;
    pub const SENDMSG: u8 = 9;
    pub const RECVMSG: u8 = 10;
    pub const TIMEOUT: u8 = 11;
    pub const TIMEOUT_REMOVE: u8 = 12;
    pub const ACCEPT: u8 = 13;
    pub const ASYNC_CANCEL: u8 = 14;
    pub const CONNECT: u8 = 16;
    pub const OPENAT: u8 = 18;
    pub const CLOSE: u8 = 19;
    pub const READ: u8 = 22;
    pub const WRITE: u8 = 23;
    pub const SEND: u8 = 26;
    pub const RECV: u8 = 27;
}

/// `io_uring_setup` flags.
pub const IORING_SETUP_CQSIZE: u32 = 1 << 3;
/// Clamp oversized entry counts instead of failing with `EINVAL`.
pub const IORING_SETUP_CLAMP: u32 = 1 << 4;

/// `io_uring_enter` flag: wait for `min_complete` completions.
pub const IORING_ENTER_GETEVENTS: u32 = 1 << 0;

/// SQ ring flag: completions are waiting in the kernel's overflow list and
/// are moved into the CQ by the next `io_uring_enter` with
/// [`IORING_ENTER_GETEVENTS`].
pub const IORING_SQ_CQ_OVERFLOW: u32 = 1 << 1;

/// SQ and CQ rings share a single mapping.
pub const IORING_FEAT_SINGLE_MMAP: u32 = 1 << 0;
/// The kernel never drops completions on CQ overflow.
pub const IORING_FEAT_NODROP: u32 = 1 << 1;

/// `mmap` offset of the submission ring header and index array.
pub const IORING_OFF_SQ_RING: libc::off_t = 0;
/// `mmap` offset of the completion ring (unless `IORING_FEAT_SINGLE_MMAP`).
pub const IORING_OFF_CQ_RING: libc::off_t = 0x0800_0000;
/// `mmap` offset of the submission entry array.
pub const IORING_OFF_SQES: libc::off_t = 0x1000_0000;

/// Timeout flag: the timespec is an absolute time.
pub const IORING_TIMEOUT_ABS: u32 = 1 << 0;
/// Timeout flag: update an existing timeout instead of removing it.
pub const IORING_TIMEOUT_UPDATE: u32 = 1 << 1;

/// Cancel flag: cancel every request matching the key, not just the first.
pub const IORING_ASYNC_CANCEL_ALL: u32 = 1 << 0;

/// Largest iovec count accepted by vectored operations (`UIO_MAXIOV`).
pub const MAX_IOVECS: u32 = 1024;

/// Encode a poll mask the way the kernel reads `poll32_events`.
///
/// The kernel stores the mask as two little-endian 16-bit halves, so on
/// big-endian targets the halves must be swapped (`__swahw32`).
#[inline]
pub const fn poll_mask_to_wire(mask: u32) -> u32 {
    if cfg!(target_endian = "big") {
        swap_halfwords(mask)
    } else {
        mask
    }
}

/// Swap the upper and lower 16-bit halves of a word.
#[inline]
pub const fn swap_halfwords(value: u32) -> u32 {
    value.rotate_left(16)
}
