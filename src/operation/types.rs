//! Operation kind identifiers.

use crate::abi::opcode;

/// Kind of operation carried by an [`Op`](super::Op).
///
/// One variant per logical request; `SendMsg`/`RecvMsg` are the message-header
/// forms produced by [`Op::send_to`](super::Op::send_to) and
/// [`Op::recv_from`](super::Op::recv_from).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[repr(u8)]
pub enum OperationKind {
    /// No operation
    Nop = 0,
    /// Accept a connection on a listening socket
    Accept = 1,
    /// Connect a socket
    Connect = 2,
    /// Send data on a socket
    Send = 3,
    /// Receive data from a socket
    Recv = 4,
    /// Send with a message header (`sendmsg`)
    SendMsg = 5,
    /// Receive with a message header (`recvmsg`)
    RecvMsg = 6,
    /// Close a descriptor
    Close = 7,
    /// Read from a file descriptor
    Read = 8,
    /// Write to a file descriptor
    Write = 9,
    /// Vectored write
    Writev = 10,
    /// Wait for readiness
    PollAdd = 11,
    /// Remove a pending readiness wait
    PollRemove = 12,
    /// Cancel a pending operation
    Cancel = 13,
    /// Timer
    Timeout = 14,
    /// Remove a pending timer
    TimeoutRemove = 15,
    /// Re-arm a pending timer
    TimeoutUpdate = 16,
    /// Open a file relative to a directory descriptor
    OpenAt = 17,
}

impl OperationKind {
    /// Every kind, in declaration order.
    pub const ALL: [OperationKind; 18] = [
        Self::Nop,
        Self::Accept,
        Self::Connect,
        Self::Send,
        Self::Recv,
        Self::SendMsg,
        Self::RecvMsg,
        Self::Close,
        Self::Read,
        Self::Write,
        Self::Writev,
        Self::PollAdd,
        Self::PollRemove,
        Self::Cancel,
        Self::Timeout,
        Self::TimeoutRemove,
        Self::TimeoutUpdate,
        Self::OpenAt,
    ];

    /// Kernel opcode written into the submission entry.
    ///
    /// Timeout removal and update share `IORING_OP_TIMEOUT_REMOVE`; the update
    /// is distinguished by a flag.
    #[inline]
    pub const fn opcode(self) -> u8 {
        match self {
            Self::Nop => opcode::NOP,
            Self::Accept => opcode::ACCEPT,
            Self::Connect => opcode::CONNECT,
            Self::Send => opcode::SEND,
            Self::Recv => opcode::RECV,
            Self::SendMsg => opcode::SENDMSG,
            Self::RecvMsg => opcode::RECVMSG,
            Self::Close => opcode::CLOSE,
            Self::Read => opcode::READ,
            Self::Write => opcode::WRITE,
            Self::Writev => opcode::WRITEV,
            Self::PollAdd => opcode::POLL_ADD,
            Self::PollRemove => opcode::POLL_REMOVE,
            Self::Cancel => opcode::ASYNC_CANCEL,
            Self::Timeout => opcode::TIMEOUT,
            Self::TimeoutRemove | Self::TimeoutUpdate => opcode::TIMEOUT_REMOVE,
            Self::OpenAt => opcode::OPENAT,
        }
    }

    /// Short lowercase name used in logs and metrics.
    pub const fn name(self) -> &'static str {
        match self {
            Self::Nop => "nop",
            Self::Accept => "accept",
            Self::Connect => "connect",
            Self::Send => "send",
            Self::Recv => "recv",
            Self::SendMsg => "sendmsg",
            Self::RecvMsg => "recvmsg",
            Self::Close => "close",
            Self::Read => "read",
            Self::Write => "write",
            Self::Writev => "writev",
            Self::PollAdd => "poll_add",
            Self::PollRemove => "poll_remove",
            Self::Cancel => "cancel",
            Self::Timeout => "timeout",
            Self::TimeoutRemove => "timeout_remove",
            Self::TimeoutUpdate => "timeout_update",
            Self::OpenAt => "openat",
        }
    }

    /// Returns true if this kind fills a caller buffer with data.
    #[inline]
    pub const fn is_read_like(self) -> bool {
        matches!(self, Self::Read | Self::Recv | Self::RecvMsg)
    }

    /// Returns true if this kind transmits data from caller buffers.
    #[inline]
    pub const fn is_write_like(self) -> bool {
        matches!(
            self,
            Self::Write | Self::Send | Self::SendMsg | Self::Writev
        )
    }

    /// Returns true if this kind acts on another pending operation rather
    /// than on a descriptor.
    #[inline]
    pub const fn targets_operation(self) -> bool {
        matches!(
            self,
            Self::PollRemove | Self::Cancel | Self::TimeoutRemove | Self::TimeoutUpdate
        )
    }

    /// Returns true if a successful completion carries a new descriptor.
    #[inline]
    pub const fn yields_fd(self) -> bool {
        matches!(self, Self::Accept | Self::OpenAt)
    }
}

impl std::fmt::Display for OperationKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.name())
    }
}
