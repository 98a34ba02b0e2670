//! Submission and completion queue entries.

use std::mem::{align_of, offset_of, size_of};
use std::time::Duration;

use static_assertions::const_assert_eq;

/// Submission queue entry (`struct io_uring_sqe`, 64 bytes).
///
/// The kernel overlays several unions on this record. They are flattened here
/// into the first member of each union; the accessors below name the
/// per-operation views (`msg_flags`, `accept_flags`, `poll32_events`, ...),
/// all of which alias the same 32-bit `op_flags` word.
#[repr(C)]
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Sqe {
    opcode: u8,
    flags: u8,
    ioprio: u16,
    fd: i32,
    /// `off` / `addr2`
    off: u64,
    /// `addr` / `splice_off_in`
    addr: u64,
    len: u32,
    /// `rw_flags` / `msg_flags` / `poll32_events` / `timeout_flags` /
    /// `accept_flags` / `cancel_flags` / `open_flags` / ...
    op_flags: u32,
    user_data: u64,
    /// `buf_index` / `buf_group`
    buf_index: u16,
    personality: u16,
    /// `splice_fd_in` / `file_index`
    splice_fd_in: i32,
    addr3: u64,
    pad2: [u64; 1],
}

const_assert_eq!(size_of::<Sqe>(), 64);
const_assert_eq!(align_of::<Sqe>(), 8);
const_assert_eq!(offset_of!(Sqe, fd), 4);
const_assert_eq!(offset_of!(Sqe, off), 8);
const_assert_eq!(offset_of!(Sqe, addr), 16);
const_assert_eq!(offset_of!(Sqe, len), 24);
const_assert_eq!(offset_of!(Sqe, op_flags), 28);
const_assert_eq!(offset_of!(Sqe, user_data), 32);
const_assert_eq!(offset_of!(Sqe, buf_index), 40);
const_assert_eq!(offset_of!(Sqe, splice_fd_in), 44);
const_assert_eq!(offset_of!(Sqe, addr3), 48);

#[allow(clippy::len_without_is_empty)]
impl Sqe {
    /// Reset every field to zero.
    #[inline]
    pub fn clear(&mut self) {
        *self = Self::default();
    }

    /// Operation code.
    #[inline]
    pub fn opcode(&self) -> u8 {
        self.opcode
    }

    /// Set the operation code.
    #[inline]
    pub fn set_opcode(&mut self, opcode: u8) {
        self.opcode = opcode;
    }

    /// Per-entry `IOSQE_*` flags.
    #[inline]
    pub fn flags(&self) -> u8 {
        self.flags
    }

    /// Target file descriptor.
    #[inline]
    pub fn fd(&self) -> i32 {
        self.fd
    }

    /// Set the target file descriptor.
    #[inline]
    pub fn set_fd(&mut self, fd: i32) {
        self.fd = fd;
    }

    /// File offset, or the operation-specific `addr2` value.
    #[inline]
    pub fn off(&self) -> u64 {
        self.off
    }

    /// Set the offset field.
    #[inline]
    pub fn set_off(&mut self, off: u64) {
        self.off = off;
    }

    /// Buffer address, or the operation-specific `addr` value.
    #[inline]
    pub fn addr(&self) -> u64 {
        self.addr
    }

    /// Set the address field.
    #[inline]
    pub fn set_addr(&mut self, addr: u64) {
        self.addr = addr;
    }

    /// Length or count field.
    #[inline]
    pub fn len(&self) -> u32 {
        self.len
    }

    /// Set the length field.
    #[inline]
    pub fn set_len(&mut self, len: u32) {
        self.len = len;
    }

    /// Correlation value echoed back in the completion.
    #[inline]
    pub fn user_data(&self) -> u64 {
        self.user_data
    }

    /// Stamp the correlation value.
    #[inline]
    pub fn set_user_data(&mut self, user_data: u64) {
        self.user_data = user_data;
    }

    /// Raw view of the flags union.
    #[inline]
    pub fn op_flags(&self) -> u32 {
        self.op_flags
    }

    /// Read/write flags (`RWF_*`).
    #[inline]
    pub fn rw_flags(&self) -> u32 {
        self.op_flags
    }

    /// Message flags for send/recv/sendmsg/recvmsg.
    #[inline]
    pub fn msg_flags(&self) -> u32 {
        self.op_flags
    }

    /// Set message flags.
    #[inline]
    pub fn set_msg_flags(&mut self, flags: u32) {
        self.op_flags = flags;
    }

    /// Accept flags (`SOCK_CLOEXEC`, `SOCK_NONBLOCK`).
    #[inline]
    pub fn accept_flags(&self) -> u32 {
        self.op_flags
    }

    /// Set accept flags.
    #[inline]
    pub fn set_accept_flags(&mut self, flags: u32) {
        self.op_flags = flags;
    }

    /// Poll mask in kernel wire order.
    #[inline]
    pub fn poll32_events(&self) -> u32 {
        self.op_flags
    }

    /// Set the poll mask; the caller passes an already wire-encoded mask.
    #[inline]
    pub fn set_poll32_events(&mut self, events: u32) {
        self.op_flags = events;
    }

    /// Cancel flags.
    #[inline]
    pub fn cancel_flags(&self) -> u32 {
        self.op_flags
    }

    /// Set cancel flags.
    #[inline]
    pub fn set_cancel_flags(&mut self, flags: u32) {
        self.op_flags = flags;
    }

    /// Open flags (`O_*`).
    #[inline]
    pub fn open_flags(&self) -> u32 {
        self.op_flags
    }

    /// Set open flags.
    #[inline]
    pub fn set_open_flags(&mut self, flags: u32) {
        self.op_flags = flags;
    }

    /// Timeout flags.
    #[inline]
    pub fn timeout_flags(&self) -> u32 {
        self.op_flags
    }

    /// Set timeout flags.
    #[inline]
    pub fn set_timeout_flags(&mut self, flags: u32) {
        self.op_flags = flags;
    }

    /// Registered buffer index or buffer group.
    #[inline]
    pub fn buf_index(&self) -> u16 {
        self.buf_index
    }

    /// Credentials personality id.
    #[inline]
    pub fn personality(&self) -> u16 {
        self.personality
    }
}

/// Completion queue entry (`struct io_uring_cqe`, 16 bytes).
#[repr(C)]
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Cqe {
    user_data: u64,
    res: i32,
    flags: u32,
}

const_assert_eq!(size_of::<Cqe>(), 16);
const_assert_eq!(offset_of!(Cqe, res), 8);
const_assert_eq!(offset_of!(Cqe, flags), 12);

impl Cqe {
    /// Build an entry by value; used by tests and synthetic completions.
    #[inline]
    pub const fn new(user_data: u64, res: i32, flags: u32) -> Self {
        Self {
            user_data,
            res,
            flags,
        }
    }

    /// Correlation value copied from the originating submission.
    #[inline]
    pub fn user_data(&self) -> u64 {
        self.user_data
    }

    /// Signed result: negative values are `-errno`.
    #[inline]
    pub fn res(&self) -> i32 {
        self.res
    }

    /// `IORING_CQE_F_*` flags.
    #[inline]
    pub fn flags(&self) -> u32 {
        self.flags
    }
}

/// `struct __kernel_timespec`.
#[repr(C)]
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct KernelTimespec {
    /// Seconds.
    pub tv_sec: i64,
    /// Nanoseconds.
    pub tv_nsec: i64,
}

const_assert_eq!(size_of::<KernelTimespec>(), 16);

impl From<Duration> for KernelTimespec {
    fn from(duration: Duration) -> Self {
        Self {
            tv_sec: i64::try_from(duration.as_secs()).unwrap_or(i64::MAX),
            tv_nsec: i64::from(duration.subsec_nanos()),
        }
    }
}

impl From<KernelTimespec> for Duration {
    fn from(ts: KernelTimespec) -> Self {
        let secs = u64::try_from(ts.tv_sec).unwrap_or(0);
        let nanos = u32::try_from(ts.tv_nsec).unwrap_or(0);
        Duration::new(secs, nanos)
    }
}
