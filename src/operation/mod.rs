//! Operation builder.
//!
//! An [`Op`] is a logical request that owns all of its memory. Submitting it
//! moves it into the reactor, which boxes it together with the side
//! structures the kernel needs (iovec arrays, `msghdr`, socket address
//! storage, timespec) and fills a submission slot through the active
//! backend:
//!
//! - every slot is zeroed before it is filled
//! - the correlation token is stamped after preparation, before publish
//! - vectored requests over the backend limit are rejected, never truncated
//!
//! # Example
//!
//! ```rust,no_run
//! # use uring_reactor::Op;
//! let read = Op::read(0, vec![0u8; 4096], None);
//! let write = Op::writev(1, vec![b"hello ".to_vec(), b"world\n".to_vec()], None);
//! assert_eq!(read.kind().name(), "read");
//! assert!(write.validate(1024).is_ok());
//! ```

pub(crate) mod addr;
mod core;
mod prepare;
pub mod types;

#[cfg(test)]
mod tests;

pub use self::core::Op;
pub(crate) use self::prepare::InFlight;
pub use self::types::OperationKind;
