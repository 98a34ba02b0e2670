//! Cross-thread wake-up through an eventfd.

use std::io;
use std::os::fd::{AsRawFd, FromRawFd, OwnedFd, RawFd};
use std::sync::Arc;

/// Wakes a reactor blocked in [`poll`](super::Reactor::poll) from any thread.
///
/// The reactor keeps a one-shot readiness poll armed on the eventfd; writing
/// to it completes that poll, which ends the wait early.
#[derive(Debug, Clone)]
pub struct WakeHandle {
    fd: Arc<OwnedFd>,
}

impl WakeHandle {
    /// Interrupt the reactor's current or next blocking wait.
    ///
    /// Wakes coalesce: several calls before the reactor runs count once.
    pub fn wake(&self) -> io::Result<()> {
        let one: u64 = 1;
        // SAFETY: writes 8 bytes from a live u64 to an eventfd we own.
        let ret = unsafe {
            libc::write(
                self.fd.as_raw_fd(),
                (&one as *const u64).cast(),
                std::mem::size_of::<u64>(),
            )
        };
        if ret < 0 {
            let err = io::Error::last_os_error();
            // Counter saturated: a wake is already pending.
            if err.kind() == io::ErrorKind::WouldBlock {
                return Ok(());
            }
            return Err(err);
        }
        Ok(())
    }
}

/// Reactor-side state of the wake-up channel.
#[derive(Debug)]
pub(crate) struct WakeChannel {
    fd: Arc<OwnedFd>,
}

impl WakeChannel {
    pub(crate) fn new() -> io::Result<Self> {
        // SAFETY: plain system call; the result is checked below.
        let fd = unsafe { libc::eventfd(0, libc::EFD_NONBLOCK | libc::EFD_CLOEXEC) };
        if fd < 0 {
            return Err(io::Error::last_os_error());
        }
        // SAFETY: eventfd returned a new descriptor we now own.
        let fd = unsafe { OwnedFd::from_raw_fd(fd) };
        Ok(Self { fd: Arc::new(fd) })
    }

    pub(crate) fn raw_fd(&self) -> RawFd {
        self.fd.as_raw_fd()
    }

    pub(crate) fn handle(&self) -> WakeHandle {
        WakeHandle {
            fd: Arc::clone(&self.fd),
        }
    }

    /// Reset the counter so the next poll waits for a new wake.
    pub(crate) fn reset(&self) {
        let mut value: u64 = 0;
        // SAFETY: reads at most 8 bytes into a live u64. EAGAIN just means the
        // counter was already zero.
        unsafe {
            libc::read(
                self.fd.as_raw_fd(),
                (&mut value as *mut u64).cast(),
                std::mem::size_of::<u64>(),
            );
        }
    }
}
