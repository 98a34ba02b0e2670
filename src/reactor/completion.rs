//! Completed requests and the dispatch channel back to application code.

use std::io;
use std::net::SocketAddr;
use std::os::fd::{FromRawFd, OwnedFd};
use std::sync::{Arc, Mutex, PoisonError};

use crate::operation::{Op, OperationKind};

use super::Token;

/// A finished request, handed to the [`Dispatcher`].
///
/// Carries the kernel's raw signed result and the original [`Op`] with all
/// of its buffers, so a read's data is recovered from the same `Vec` that was
/// submitted.
#[derive(Debug)]
pub struct Completion {
    pub(crate) token: Token,
    pub(crate) tag: u64,
    pub(crate) result: i32,
    pub(crate) flags: u32,
    pub(crate) op: Op,
    pub(crate) peer: Option<SocketAddr>,
    pub(crate) fd_taken: bool,
}

impl Completion {
    /// Token returned by [`Reactor::submit`](super::Reactor::submit).
    pub fn token(&self) -> Token {
        self.token
    }

    /// Caller-chosen tag passed at submission.
    pub fn tag(&self) -> u64 {
        self.tag
    }

    /// Kind of the finished request.
    pub fn kind(&self) -> OperationKind {
        self.op.kind()
    }

    /// Raw result: negative errno on failure.
    pub fn raw_result(&self) -> i32 {
        self.result
    }

    /// Completion flags reported by the kernel.
    pub fn flags(&self) -> u32 {
        self.flags
    }

    /// Result as an `io::Result`.
    pub fn result(&self) -> io::Result<u32> {
        if self.result < 0 {
            Err(io::Error::from_raw_os_error(-self.result))
        } else {
            Ok(self.result as u32)
        }
    }

    /// True when the request failed with `ECANCELED`.
    pub fn is_cancelled(&self) -> bool {
        self.result == -libc::ECANCELED
    }

    /// Bytes transferred by a data request.
    pub fn bytes(&self) -> Option<usize> {
        let kind = self.kind();
        if self.result >= 0 && (kind.is_read_like() || kind.is_write_like()) {
            Some(self.result as usize)
        } else {
            None
        }
    }

    /// A read-like request that succeeded with zero bytes.
    pub fn is_eof(&self) -> bool {
        self.result == 0 && self.kind().is_read_like()
    }

    /// The received bytes of a successful read-like request.
    pub fn data(&self) -> Option<&[u8]> {
        let len = self.bytes()?;
        match &self.op {
            Op::Read { buf, .. } | Op::Recv { buf, .. } | Op::RecvMsg { buf, .. } => buf.get(..len),
            _ => None,
        }
    }

    /// Take ownership of the connection descriptor of a successful accept.
    ///
    /// Returns `Some` at most once.
    pub fn accepted_fd(&mut self) -> Option<OwnedFd> {
        self.take_fd(OperationKind::Accept)
    }

    /// Take ownership of the descriptor of a successful openat.
    ///
    /// Returns `Some` at most once.
    pub fn opened_fd(&mut self) -> Option<OwnedFd> {
        self.take_fd(OperationKind::OpenAt)
    }

    fn take_fd(&mut self, kind: OperationKind) -> Option<OwnedFd> {
        if self.fd_taken || self.result < 0 || self.kind() != kind {
            return None;
        }
        self.fd_taken = true;
        // SAFETY: the kernel returned a fresh descriptor for this request and
        // ownership is handed out only once.
        Some(unsafe { OwnedFd::from_raw_fd(self.result) })
    }

    /// Peer of a successful accept or source of a successful recvmsg.
    pub fn peer_addr(&self) -> Option<SocketAddr> {
        if self.result < 0 {
            return None;
        }
        self.peer
    }

    /// The request, as submitted.
    pub fn op(&self) -> &Op {
        &self.op
    }

    /// Recover the request and its buffers.
    pub fn into_op(self) -> Op {
        self.op
    }
}

/// Receiver of completed requests.
///
/// Called from inside [`Reactor::poll`](super::Reactor::poll) on the polling
/// thread, once per user request, in ring order.
pub trait Dispatcher {
    /// Handle one completion.
    fn dispatch(&mut self, completion: Completion);
}

impl<F> Dispatcher for F
where
    F: FnMut(Completion),
{
    fn dispatch(&mut self, completion: Completion) {
        self(completion)
    }
}

/// Dispatcher that buffers completions for later inspection.
///
/// Clones share the same buffer, so one clone can be given to the reactor
/// and another kept by the caller.
#[derive(Debug, Clone, Default)]
pub struct Collector {
    inner: Arc<Mutex<Vec<Completion>>>,
}

impl Collector {
    /// Empty collector.
    pub fn new() -> Self {
        Self::default()
    }

    /// Remove and return everything collected so far.
    pub fn take(&self) -> Vec<Completion> {
        std::mem::take(&mut *self.inner.lock().unwrap_or_else(PoisonError::into_inner))
    }

    /// Number of completions waiting to be taken.
    pub fn len(&self) -> usize {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner).len()
    }

    /// True when nothing is waiting.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl Dispatcher for Collector {
    fn dispatch(&mut self, completion: Completion) {
        self.inner
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(completion);
    }
}
