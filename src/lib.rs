//! # uring-reactor: a single-threaded io_uring reactor
//!
//! A completion-based I/O event loop on Linux io_uring with no required
//! native dependencies. When the system's liburing can be loaded at runtime
//! it is used for ring control; otherwise the crate maps the rings itself
//! and talks to the kernel with raw system calls.
//!
//! ## Layers
//!
//! - [`abi`]: byte-exact kernel structures (`io_uring_sqe`, `io_uring_cqe`,
//!   `io_uring_params`) and constants
//! - [`ring`]: memory-mapped submission/completion queues with the
//!   acquire/release index protocol
//! - [`backend`]: runtime choice between the liburing binding and the
//!   built-in transport, behind one [`Backend`](backend::Backend) trait
//! - [`operation`]: owned [`Op`] requests and their slot preparation
//! - [`reactor`]: the [`Reactor`] loop with its token-keyed pending table
//!
//! ## Ownership
//!
//! Every buffer, iovec array, `msghdr`, socket address and timespec that a
//! submission entry points at is owned by the reactor from
//! [`submit`](Reactor::submit) until the completion is dispatched, and then
//! returned inside the [`Completion`]. There is no way to free memory the
//! kernel may still write to.
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use std::os::fd::AsRawFd;
//! use uring_reactor::{Collector, Op, Reactor, ReactorConfig};
//!
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let file = std::fs::File::open("/etc/hostname")?;
//! let collector = Collector::new();
//! let mut reactor = Reactor::new(ReactorConfig::default(), collector.clone())?;
//!
//! reactor.submit(Op::read(file.as_raw_fd(), vec![0; 256], Some(0)), 7)?;
//! reactor.poll(1, None)?;
//!
//! let completion = collector.take().pop().expect("one completion");
//! println!("read {:?}", completion.data().map(String::from_utf8_lossy));
//! reactor.shutdown()?;
//! # Ok(())
//! # }
//! ```
//!
//! ## Backend Selection
//!
//! [`ReactorConfig::default`] probes for liburing and silently falls back to
//! the built-in transport. [`ReactorConfig::fallback`] forces the built-in
//! transport, and the `URING_REACTOR_BACKEND` environment variable
//! (`auto`, `native`, `fallback`) overrides the choice through
//! [`ReactorConfig::from_env`].

#![deny(unsafe_op_in_unsafe_fn)]
#![warn(missing_docs, rust_2018_idioms)]
#![cfg_attr(docsrs, feature(doc_cfg))]

#[cfg(not(target_os = "linux"))]
compile_error!("uring-reactor requires Linux io_uring");

pub mod abi;
pub mod backend;
pub mod config;
pub mod error;
pub mod logging;
pub mod operation;
pub mod reactor;
pub mod ring;

#[cfg(test)]
mod test_utils;

pub use backend::{Backend, BackendKind};
pub use config::{
    BackendConfig, BackendPreference, ConfigBuilder, LoggingConfig, ReactorConfig, RingConfig,
};
pub use error::{ReactorError, Result};
pub use logging::{LogLevel, OperationMetrics, ReactorStats};
pub use operation::{Op, OperationKind};
pub use reactor::{Collector, Completion, Dispatcher, Reactor, ReactorState, Token, WakeHandle};
