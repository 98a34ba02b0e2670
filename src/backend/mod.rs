//! Backend resolution: native liburing binding or self-contained fallback.
//!
//! A [`Backend`] owns one io_uring instance and knows how to fill submission
//! entries for every operation kind. Two implementations exist:
//!
//! - [`NativeBackend`] binds the system's liburing at runtime through
//!   `libloading`. Ring control always goes through the library; preparation
//!   routines do too when the library exports them (the `liburing-ffi` build),
//!   otherwise the built-in routines are used.
//! - [`FallbackBackend`] needs no library at all. It maps the rings itself
//!   ([`RingTransport`](crate::ring::RingTransport)) and prepares entries with
//!   the built-in routines.
//!
//! [`resolve`] picks one at reactor construction. The choice is never
//! revisited; callers only see `Box<dyn Backend>`.

use std::io;

use tracing::debug;

use crate::abi::{Cqe, KernelTimespec, Sqe, MAX_IOVECS};
use crate::config::{BackendConfig, BackendPreference, RingConfig};
use crate::error::{ReactorError, Result};

pub(crate) mod builtin;
mod fallback;
mod native;

#[cfg(test)]
mod tests;

pub use crate::ring::SlotHandle;
pub use fallback::FallbackBackend;
pub use native::{NativeBackend, NativeLibrary};

/// Which implementation a backend is.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum BackendKind {
    /// Dynamically bound liburing
    Native,
    /// Built-in ring transport
    Fallback,
}

impl std::fmt::Display for BackendKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(match self {
            BackendKind::Native => "native",
            BackendKind::Fallback => "fallback",
        })
    }
}

/// Ring control plus one preparation routine per operation kind.
///
/// Ring control methods follow the single-producer discipline: they take
/// `&mut self`. Preparation methods only write the given entry and take
/// `&self`, so a slot can be acquired first and filled afterwards.
///
/// Pointer arguments to the `prep_*` methods are stored in the entry, not
/// dereferenced. They must stay valid until the matching completion has
/// been drained; the reactor guarantees this by owning the memory in its
/// pending table.
pub trait Backend: Send {
    /// Short name for logs (`"liburing"`, `"builtin"`).
    fn name(&self) -> &'static str;

    /// Which implementation this is.
    fn kind(&self) -> BackendKind;

    /// Largest iovec count accepted by vectored operations.
    fn max_iovecs(&self) -> usize {
        MAX_IOVECS as usize
    }

    /// Allocated submission ring size.
    fn sq_entries(&self) -> u32;

    /// Allocated completion ring size.
    fn cq_entries(&self) -> u32;

    /// Free submission slots.
    fn space_left(&self) -> u32;

    /// Take the next free submission slot, zeroed.
    ///
    /// # Errors
    ///
    /// [`ReactorError::Full`](crate::ReactorError::Full) when no slot is free.
    fn acquire_slot(&mut self) -> Result<SlotHandle>;

    /// Publish acquired slots and enter the kernel, waiting for `wait_nr`
    /// completions. Returns the number of entries submitted.
    fn submit(&mut self, wait_nr: u32) -> io::Result<u32>;

    /// Completions ready to drain.
    fn ready(&self) -> u32;

    /// Move up to `max` completions into `out`, oldest first, and release
    /// their ring slots. Returns how many were moved.
    fn drain(&mut self, max: usize, out: &mut Vec<Cqe>) -> usize;

    /// Prepare a no-op.
    fn prep_nop(&self, sqe: &mut Sqe) {
        builtin::prep_nop(sqe);
    }

    /// Prepare an accept; the kernel writes the peer into `addr`/`addrlen`.
    fn prep_accept(
        &self,
        sqe: &mut Sqe,
        fd: i32,
        addr: *mut libc::sockaddr,
        addrlen: *mut libc::socklen_t,
        flags: i32,
    ) {
        builtin::prep_accept(sqe, fd, addr, addrlen, flags);
    }

    /// Prepare a connect.
    fn prep_connect(&self, sqe: &mut Sqe, fd: i32, addr: *const libc::sockaddr, addrlen: libc::socklen_t) {
        builtin::prep_connect(sqe, fd, addr, addrlen);
    }

    /// Prepare a send.
    fn prep_send(&self, sqe: &mut Sqe, fd: i32, buf: *const u8, len: usize, flags: i32) {
        builtin::prep_send(sqe, fd, buf, len, flags);
    }

    /// Prepare a recv.
    fn prep_recv(&self, sqe: &mut Sqe, fd: i32, buf: *mut u8, len: usize, flags: i32) {
        builtin::prep_recv(sqe, fd, buf, len, flags);
    }

    /// Prepare a sendmsg.
    fn prep_sendmsg(&self, sqe: &mut Sqe, fd: i32, msg: *const libc::msghdr, flags: u32) {
        builtin::prep_sendmsg(sqe, fd, msg, flags);
    }

    /// Prepare a recvmsg.
    fn prep_recvmsg(&self, sqe: &mut Sqe, fd: i32, msg: *mut libc::msghdr, flags: u32) {
        builtin::prep_recvmsg(sqe, fd, msg, flags);
    }

    /// Prepare a close.
    fn prep_close(&self, sqe: &mut Sqe, fd: i32) {
        builtin::prep_close(sqe, fd);
    }

    /// Prepare a read. `offset == u64::MAX` means the current position.
    fn prep_read(&self, sqe: &mut Sqe, fd: i32, buf: *mut u8, nbytes: u32, offset: u64) {
        builtin::prep_read(sqe, fd, buf, nbytes, offset);
    }

    /// Prepare a write. `offset == u64::MAX` means the current position.
    fn prep_write(&self, sqe: &mut Sqe, fd: i32, buf: *const u8, nbytes: u32, offset: u64) {
        builtin::prep_write(sqe, fd, buf, nbytes, offset);
    }

    /// Prepare a gathered write.
    fn prep_writev(&self, sqe: &mut Sqe, fd: i32, iovecs: *const libc::iovec, nr_vecs: u32, offset: u64) {
        builtin::prep_writev(sqe, fd, iovecs, nr_vecs, offset);
    }

    /// Prepare a one-shot poll; `mask` is in host order.
    fn prep_poll_add(&self, sqe: &mut Sqe, fd: i32, mask: u32) {
        builtin::prep_poll_add(sqe, fd, mask);
    }

    /// Prepare removal of the poll identified by `user_data`.
    fn prep_poll_remove(&self, sqe: &mut Sqe, user_data: u64) {
        builtin::prep_poll_remove(sqe, user_data);
    }

    /// Prepare cancellation of the request identified by `user_data`.
    fn prep_cancel(&self, sqe: &mut Sqe, user_data: u64, flags: i32) {
        builtin::prep_cancel(sqe, user_data, flags);
    }

    /// Prepare a timer.
    fn prep_timeout(&self, sqe: &mut Sqe, ts: *const KernelTimespec, count: u32, flags: u32) {
        builtin::prep_timeout(sqe, ts, count, flags);
    }

    /// Prepare removal of the timer identified by `user_data`.
    fn prep_timeout_remove(&self, sqe: &mut Sqe, user_data: u64, flags: u32) {
        builtin::prep_timeout_remove(sqe, user_data, flags);
    }

    /// Prepare an update of the timer identified by `user_data`.
    fn prep_timeout_update(&self, sqe: &mut Sqe, ts: *const KernelTimespec, user_data: u64, flags: u32) {
        builtin::prep_timeout_update(sqe, ts, user_data, flags);
    }

    /// Prepare an openat.
    fn prep_openat(&self, sqe: &mut Sqe, dfd: i32, path: *const libc::c_char, flags: i32, mode: u32) {
        builtin::prep_openat(sqe, dfd, path, flags, mode);
    }
}

/// Bind a backend according to `config` and create its ring.
///
/// - `Fallback` always uses the built-in transport.
/// - `Native` requires the helper library; load failures are errors.
/// - `Auto` tries the library names in order and silently switches to the
///   built-in transport when none can be loaded. A library that loads but
///   lacks a ring-control symbol is still an error.
///
/// # Errors
///
/// Ring setup and mapping failures, a missing required symbol in a library
/// that did load, and, for `Native`, a library that cannot be loaded.
pub fn resolve(config: &BackendConfig, ring: &RingConfig) -> Result<Box<dyn Backend>> {
    match config.preference {
        BackendPreference::Fallback => Ok(Box::new(FallbackBackend::new(ring)?)),
        BackendPreference::Native => {
            let library = NativeLibrary::open(&config.library_names)?;
            Ok(Box::new(NativeBackend::new(library, ring)?))
        }
        BackendPreference::Auto => match NativeLibrary::open(&config.library_names) {
            Ok(library) => Ok(Box::new(NativeBackend::new(library, ring)?)),
            Err(error @ ReactorError::Unsupported(_)) => {
                debug!(%error, "native helper unavailable, using built-in ring transport");
                Ok(Box::new(FallbackBackend::new(ring)?))
            }
            Err(error) => Err(error),
        },
    }
}
