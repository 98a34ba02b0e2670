//! Slot preparation: turning an owned [`Op`] into a filled submission entry.

use std::net::SocketAddr;
use std::ptr;

use crate::abi::{KernelTimespec, Sqe};
use crate::backend::Backend;

use super::addr::{empty_storage, from_storage, to_storage, STORAGE_LEN};
use super::{Op, OperationKind};

/// Kernel-visible side structures an entry may point at.
struct Scratch {
    iovecs: Vec<libc::iovec>,
    msg: libc::msghdr,
    addr: libc::sockaddr_storage,
    addr_len: libc::socklen_t,
    ts: KernelTimespec,
}

impl Scratch {
    fn new() -> Self {
        Self {
            iovecs: Vec::new(),
            // SAFETY: msghdr is plain old data; all-zero is an empty header.
            msg: unsafe { std::mem::zeroed() },
            addr: empty_storage(),
            addr_len: 0,
            ts: KernelTimespec::default(),
        }
    }
}

/// A request owned by the pending table while the kernel may touch it.
///
/// Always boxed: submission entries hold raw pointers into the scratch
/// fields, so the value must not move between [`prepare`](Self::prepare)
/// and the completion.
pub(crate) struct InFlight {
    op: Op,
    scratch: Scratch,
}

// SAFETY: the raw pointers inside `scratch` point into `op` or `scratch`
// itself, both owned by this value.
unsafe impl Send for InFlight {}

impl std::fmt::Debug for InFlight {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("InFlight").field("op", &self.op).finish()
    }
}

impl InFlight {
    pub(crate) fn new(op: Op) -> Box<Self> {
        Box::new(Self {
            op,
            scratch: Scratch::new(),
        })
    }

    pub(crate) fn kind(&self) -> OperationKind {
        self.op.kind()
    }

    pub(crate) fn into_op(self: Box<Self>) -> Op {
        self.op
    }

    /// Fill `sqe` for this request through `backend`.
    ///
    /// The entry's user data is left for the caller to stamp. Vectored
    /// requests must have been validated against the backend's limit.
    pub(crate) fn prepare(&mut self, backend: &dyn Backend, sqe: &mut Sqe) {
        let InFlight { op, scratch } = self;
        match op {
            Op::Nop => backend.prep_nop(sqe),
            Op::Accept { fd, flags } => {
                scratch.addr_len = STORAGE_LEN;
                backend.prep_accept(
                    sqe,
                    *fd,
                    (&mut scratch.addr as *mut libc::sockaddr_storage).cast(),
                    &mut scratch.addr_len,
                    *flags,
                );
            }
            Op::Connect { fd, addr } => {
                let (storage, len) = to_storage(addr);
                scratch.addr = storage;
                scratch.addr_len = len;
                backend.prep_connect(
                    sqe,
                    *fd,
                    (&scratch.addr as *const libc::sockaddr_storage).cast(),
                    len,
                );
            }
            Op::Send { fd, buf, flags } => backend.prep_send(sqe, *fd, buf.as_ptr(), buf.len(), *flags),
            Op::Recv { fd, buf, flags } => backend.prep_recv(sqe, *fd, buf.as_mut_ptr(), buf.len(), *flags),
            Op::SendMsg { fd, addr, bufs, flags } => {
                scratch.iovecs = bufs.iter().map(|b| iovec(b.as_ptr(), b.len())).collect();
                if let Some(addr) = addr {
                    let (storage, len) = to_storage(addr);
                    scratch.addr = storage;
                    scratch.addr_len = len;
                    scratch.msg.msg_name = (&mut scratch.addr as *mut libc::sockaddr_storage).cast();
                    scratch.msg.msg_namelen = len;
                } else {
                    scratch.msg.msg_name = ptr::null_mut();
                    scratch.msg.msg_namelen = 0;
                }
                scratch.msg.msg_iov = scratch.iovecs.as_mut_ptr();
                scratch.msg.msg_iovlen = scratch.iovecs.len() as _;
                backend.prep_sendmsg(sqe, *fd, &scratch.msg, *flags);
            }
            Op::RecvMsg { fd, buf, flags } => {
                scratch.iovecs = vec![iovec(buf.as_mut_ptr(), buf.len())];
                scratch.msg.msg_name = (&mut scratch.addr as *mut libc::sockaddr_storage).cast();
                scratch.msg.msg_namelen = STORAGE_LEN;
                scratch.msg.msg_iov = scratch.iovecs.as_mut_ptr();
                scratch.msg.msg_iovlen = 1;
                backend.prep_recvmsg(sqe, *fd, &mut scratch.msg, *flags);
            }
            Op::Close { fd } => backend.prep_close(sqe, *fd),
            Op::Read { fd, buf, offset } => {
                backend.prep_read(sqe, *fd, buf.as_mut_ptr(), buf.len() as u32, encode_offset(*offset))
            }
            Op::Write { fd, buf, offset } => {
                backend.prep_write(sqe, *fd, buf.as_ptr(), buf.len() as u32, encode_offset(*offset))
            }
            Op::Writev { fd, bufs, offset } => {
                scratch.iovecs = bufs.iter().map(|b| iovec(b.as_ptr(), b.len())).collect();
                backend.prep_writev(
                    sqe,
                    *fd,
                    scratch.iovecs.as_ptr(),
                    scratch.iovecs.len() as u32,
                    encode_offset(*offset),
                );
            }
            Op::PollAdd { fd, mask } => backend.prep_poll_add(sqe, *fd, *mask),
            Op::PollRemove { target } => backend.prep_poll_remove(sqe, target.to_user_data()),
            Op::Cancel { target, flags } => backend.prep_cancel(sqe, target.to_user_data(), *flags as i32),
            Op::Timeout { duration, count, flags } => {
                scratch.ts = KernelTimespec::from(*duration);
                backend.prep_timeout(sqe, &scratch.ts, *count, *flags);
            }
            Op::TimeoutRemove { target, flags } => {
                backend.prep_timeout_remove(sqe, target.to_user_data(), *flags)
            }
            Op::TimeoutUpdate { target, duration, flags } => {
                scratch.ts = KernelTimespec::from(*duration);
                backend.prep_timeout_update(sqe, &scratch.ts, target.to_user_data(), *flags);
            }
            Op::OpenAt { dir, path, flags, mode } => {
                backend.prep_openat(sqe, *dir, path.as_ptr(), *flags, *mode)
            }
        }
    }

    /// Address the kernel wrote back for accept and recvmsg requests.
    ///
    /// Only meaningful after a successful completion.
    pub(crate) fn peer_addr(&self) -> Option<SocketAddr> {
        match self.op {
            Op::Accept { .. } => from_storage(&self.scratch.addr, self.scratch.addr_len),
            Op::RecvMsg { .. } => from_storage(&self.scratch.addr, self.scratch.msg.msg_namelen),
            _ => None,
        }
    }
}

/// `None` means "current file position", which the kernel spells `-1`.
#[inline]
fn encode_offset(offset: Option<u64>) -> u64 {
    offset.unwrap_or(u64::MAX)
}

#[inline]
fn iovec(base: *const u8, len: usize) -> libc::iovec {
    libc::iovec {
        iov_base: base as *mut libc::c_void,
        iov_len: len,
    }
}
