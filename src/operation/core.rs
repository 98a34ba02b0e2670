//! The `Op` request type and its constructors.

use std::ffi::CString;
use std::net::SocketAddr;
use std::os::unix::ffi::OsStrExt;
use std::os::unix::io::RawFd;
use std::path::Path;
use std::time::Duration;

use crate::error::{ReactorError, Result};
use crate::operation::OperationKind;
use crate::reactor::Token;

/// A logical I/O request.
///
/// Each variant owns every piece of memory the kernel will read or write
/// while the request is in flight. The reactor keeps the `Op` in its pending
/// table until the completion arrives and then hands it back through
/// [`Completion::into_op`](crate::Completion::into_op), so buffers are
/// recovered with their contents.
///
/// Read-like variants use the buffer's current length as the transfer size;
/// pass e.g. `vec![0; 4096]` to read up to 4096 bytes.
#[derive(Debug)]
pub enum Op {
    /// Does nothing; completes with 0.
    Nop,
    /// Accept a connection. The peer address is captured.
    Accept {
        /// Listening socket
        fd: RawFd,
        /// `SOCK_CLOEXEC` / `SOCK_NONBLOCK`
        flags: i32,
    },
    /// Connect a socket.
    Connect {
        /// Socket
        fd: RawFd,
        /// Destination
        addr: SocketAddr,
    },
    /// Send a buffer on a connected socket.
    Send {
        /// Socket
        fd: RawFd,
        /// Data to send
        buf: Vec<u8>,
        /// `MSG_*` flags
        flags: i32,
    },
    /// Receive into a buffer.
    Recv {
        /// Socket
        fd: RawFd,
        /// Destination buffer
        buf: Vec<u8>,
        /// `MSG_*` flags
        flags: i32,
    },
    /// `sendmsg` with an optional destination address and gathered buffers.
    SendMsg {
        /// Socket
        fd: RawFd,
        /// Destination for unconnected sockets
        addr: Option<SocketAddr>,
        /// Buffers sent in order
        bufs: Vec<Vec<u8>>,
        /// `MSG_*` flags
        flags: u32,
    },
    /// `recvmsg` into one buffer, capturing the source address.
    RecvMsg {
        /// Socket
        fd: RawFd,
        /// Destination buffer
        buf: Vec<u8>,
        /// `MSG_*` flags
        flags: u32,
    },
    /// Close a descriptor.
    Close {
        /// Descriptor to close
        fd: RawFd,
    },
    /// Read from a descriptor.
    Read {
        /// Source descriptor
        fd: RawFd,
        /// Destination buffer
        buf: Vec<u8>,
        /// File offset, `None` for the current position
        offset: Option<u64>,
    },
    /// Write to a descriptor.
    Write {
        /// Destination descriptor
        fd: RawFd,
        /// Data to write
        buf: Vec<u8>,
        /// File offset, `None` for the current position
        offset: Option<u64>,
    },
    /// Gathered write.
    Writev {
        /// Destination descriptor
        fd: RawFd,
        /// Buffers written in order
        bufs: Vec<Vec<u8>>,
        /// File offset, `None` for the current position
        offset: Option<u64>,
    },
    /// One-shot readiness wait.
    PollAdd {
        /// Descriptor to watch
        fd: RawFd,
        /// `POLL*` interest mask
        mask: u32,
    },
    /// Remove a pending [`Op::PollAdd`].
    PollRemove {
        /// Token of the poll request
        target: Token,
    },
    /// Cancel a pending request.
    Cancel {
        /// Token of the request to cancel
        target: Token,
        /// `IORING_ASYNC_CANCEL_*` flags
        flags: u32,
    },
    /// Timer that fires after `duration` or once `count` other completions
    /// have been posted, whichever comes first (`count == 0` means time only).
    Timeout {
        /// Relative expiry
        duration: Duration,
        /// Completion count
        count: u32,
        /// `IORING_TIMEOUT_*` flags
        flags: u32,
    },
    /// Remove a pending [`Op::Timeout`].
    TimeoutRemove {
        /// Token of the timer
        target: Token,
        /// `IORING_TIMEOUT_*` flags
        flags: u32,
    },
    /// Re-arm a pending [`Op::Timeout`] with a new expiry.
    TimeoutUpdate {
        /// Token of the timer
        target: Token,
        /// New relative expiry
        duration: Duration,
        /// `IORING_TIMEOUT_*` flags
        flags: u32,
    },
    /// `openat(2)`.
    OpenAt {
        /// Directory descriptor, or `libc::AT_FDCWD`
        dir: RawFd,
        /// Path
        path: CString,
        /// `O_*` flags
        flags: i32,
        /// Creation mode
        mode: u32,
    },
}

impl Op {
    /// No-op request.
    pub fn nop() -> Self {
        Op::Nop
    }

    /// Accept on `fd` with `SOCK_CLOEXEC`.
    pub fn accept(fd: RawFd) -> Self {
        Op::accept_with_flags(fd, libc::SOCK_CLOEXEC)
    }

    /// Accept on `fd` with explicit accept flags.
    pub fn accept_with_flags(fd: RawFd, flags: i32) -> Self {
        Op::Accept { fd, flags }
    }

    /// Connect `fd` to `addr`.
    pub fn connect(fd: RawFd, addr: SocketAddr) -> Self {
        Op::Connect { fd, addr }
    }

    /// Send `buf` on `fd`.
    pub fn send(fd: RawFd, buf: impl Into<Vec<u8>>, flags: i32) -> Self {
        Op::Send {
            fd,
            buf: buf.into(),
            flags,
        }
    }

    /// Receive up to `buf.len()` bytes from `fd`.
    pub fn recv(fd: RawFd, buf: Vec<u8>, flags: i32) -> Self {
        Op::Recv { fd, buf, flags }
    }

    /// `sendmsg` of `bufs` to `addr` (or the connected peer when `None`).
    pub fn send_to(fd: RawFd, addr: Option<SocketAddr>, bufs: Vec<Vec<u8>>, flags: u32) -> Self {
        Op::SendMsg {
            fd,
            addr,
            bufs,
            flags,
        }
    }

    /// `recvmsg` into `buf`, reporting the sender.
    pub fn recv_from(fd: RawFd, buf: Vec<u8>, flags: u32) -> Self {
        Op::RecvMsg { fd, buf, flags }
    }

    /// Close `fd`.
    pub fn close(fd: RawFd) -> Self {
        Op::Close { fd }
    }

    /// Read up to `buf.len()` bytes.
    pub fn read(fd: RawFd, buf: Vec<u8>, offset: Option<u64>) -> Self {
        Op::Read { fd, buf, offset }
    }

    /// Write `buf`.
    pub fn write(fd: RawFd, buf: impl Into<Vec<u8>>, offset: Option<u64>) -> Self {
        Op::Write {
            fd,
            buf: buf.into(),
            offset,
        }
    }

    /// Write `bufs` in order with one request.
    pub fn writev(fd: RawFd, bufs: Vec<Vec<u8>>, offset: Option<u64>) -> Self {
        Op::Writev { fd, bufs, offset }
    }

    /// Wait until `fd` reports any event in `mask`.
    pub fn poll_add(fd: RawFd, mask: u32) -> Self {
        Op::PollAdd { fd, mask }
    }

    /// Stop a pending poll.
    pub fn poll_remove(target: Token) -> Self {
        Op::PollRemove { target }
    }

    /// Cancel a pending request.
    pub fn cancel(target: Token, flags: u32) -> Self {
        Op::Cancel { target, flags }
    }

    /// Relative timer.
    pub fn timeout(duration: Duration, count: u32, flags: u32) -> Self {
        Op::Timeout {
            duration,
            count,
            flags,
        }
    }

    /// Remove a pending timer.
    pub fn timeout_remove(target: Token, flags: u32) -> Self {
        Op::TimeoutRemove { target, flags }
    }

    /// Re-arm a pending timer.
    pub fn timeout_update(target: Token, duration: Duration, flags: u32) -> Self {
        Op::TimeoutUpdate {
            target,
            duration,
            flags,
        }
    }

    /// Open `path` relative to `dir`.
    ///
    /// # Errors
    ///
    /// [`ReactorError::InvalidOperation`] if `path` contains a NUL byte.
    pub fn openat(dir: RawFd, path: impl AsRef<Path>, flags: i32, mode: u32) -> Result<Self> {
        let path = CString::new(path.as_ref().as_os_str().as_bytes())
            .map_err(|_| ReactorError::InvalidOperation("path contains a NUL byte".into()))?;
        Ok(Op::OpenAt {
            dir,
            path,
            flags,
            mode,
        })
    }

    /// Kind of this request.
    pub fn kind(&self) -> OperationKind {
        match self {
            Op::Nop => OperationKind::Nop,
            Op::Accept { .. } => OperationKind::Accept,
            Op::Connect { .. } => OperationKind::Connect,
            Op::Send { .. } => OperationKind::Send,
            Op::Recv { .. } => OperationKind::Recv,
            Op::SendMsg { .. } => OperationKind::SendMsg,
            Op::RecvMsg { .. } => OperationKind::RecvMsg,
            Op::Close { .. } => OperationKind::Close,
            Op::Read { .. } => OperationKind::Read,
            Op::Write { .. } => OperationKind::Write,
            Op::Writev { .. } => OperationKind::Writev,
            Op::PollAdd { .. } => OperationKind::PollAdd,
            Op::PollRemove { .. } => OperationKind::PollRemove,
            Op::Cancel { .. } => OperationKind::Cancel,
            Op::Timeout { .. } => OperationKind::Timeout,
            Op::TimeoutRemove { .. } => OperationKind::TimeoutRemove,
            Op::TimeoutUpdate { .. } => OperationKind::TimeoutUpdate,
            Op::OpenAt { .. } => OperationKind::OpenAt,
        }
    }

    /// Target descriptor, for kinds that act on one.
    pub fn fd(&self) -> Option<RawFd> {
        match self {
            Op::Accept { fd, .. }
            | Op::Connect { fd, .. }
            | Op::Send { fd, .. }
            | Op::Recv { fd, .. }
            | Op::SendMsg { fd, .. }
            | Op::RecvMsg { fd, .. }
            | Op::Close { fd }
            | Op::Read { fd, .. }
            | Op::Write { fd, .. }
            | Op::Writev { fd, .. }
            | Op::PollAdd { fd, .. } => Some(*fd),
            Op::OpenAt { dir, .. } => Some(*dir),
            _ => None,
        }
    }

    /// Pending request this one acts on, for cancel/remove/update kinds.
    pub fn target(&self) -> Option<Token> {
        match self {
            Op::PollRemove { target }
            | Op::Cancel { target, .. }
            | Op::TimeoutRemove { target, .. }
            | Op::TimeoutUpdate { target, .. } => Some(*target),
            _ => None,
        }
    }

    /// Reject parameters that cannot be encoded.
    ///
    /// `max_iovecs` is the backend's vector limit.
    ///
    /// # Errors
    ///
    /// [`ReactorError::TooManyBuffers`] for vectored requests over the limit
    /// and [`ReactorError::InvalidOperation`] for buffers longer than the
    /// 32-bit length field.
    pub fn validate(&self, max_iovecs: usize) -> Result<()> {
        match self {
            Op::Writev { bufs, .. } | Op::SendMsg { bufs, .. } => {
                if bufs.len() > max_iovecs {
                    return Err(ReactorError::TooManyBuffers {
                        count: bufs.len(),
                        max: max_iovecs,
                    });
                }
                Ok(())
            }
            Op::Read { buf, .. }
            | Op::Write { buf, .. }
            | Op::Send { buf, .. }
            | Op::Recv { buf, .. }
                if buf.len() > u32::MAX as usize =>
            {
                Err(ReactorError::InvalidOperation(format!(
                    "buffer of {} bytes exceeds u32",
                    buf.len()
                )))
            }
            _ => Ok(()),
        }
    }

    /// The single data buffer, if this kind carries one.
    pub fn into_buffer(self) -> Option<Vec<u8>> {
        match self {
            Op::Send { buf, .. }
            | Op::Recv { buf, .. }
            | Op::RecvMsg { buf, .. }
            | Op::Read { buf, .. }
            | Op::Write { buf, .. } => Some(buf),
            _ => None,
        }
    }

    /// The buffer list of a vectored request.
    pub fn into_buffers(self) -> Option<Vec<Vec<u8>>> {
        match self {
            Op::Writev { bufs, .. } | Op::SendMsg { bufs, .. } => Some(bufs),
            _ => None,
        }
    }
}
