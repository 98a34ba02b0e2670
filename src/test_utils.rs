//! Shared helpers for unit tests.

use std::io;
use std::sync::Once;

use crate::abi::Cqe;
use crate::backend::{Backend, BackendKind, SlotHandle};
use crate::error::{ReactorError, Result};

static INIT_LOGGING: Once = Once::new();

/// Initialize trace-level test logging once per process.
pub(crate) fn init_test_logging() {
    INIT_LOGGING.call_once(|| {
        let _ = tracing_subscriber::fmt()
            .with_max_level(tracing::Level::TRACE)
            .with_test_writer()
            .with_target(true)
            .with_ansi(false)
            .try_init();
    });
}

/// True when the kernel refused to give us a ring at all (seccomp-filtered
/// containers, kernels without io_uring, exhausted memlock limits). Tests
/// that need a live ring return early in that case.
pub(crate) fn ring_unavailable(error: &ReactorError) -> bool {
    match error {
        ReactorError::Setup(e) | ReactorError::Mmap(e) => {
            let skip = matches!(
                e.raw_os_error(),
                Some(libc::ENOSYS | libc::EPERM | libc::EACCES | libc::ENOMEM | libc::EINVAL)
            );
            if skip {
                eprintln!("skipping: io_uring unavailable ({e})");
            }
            skip
        }
        _ => false,
    }
}

/// Backend with no ring, carrying only the built-in preparation routines.
pub(crate) struct PrepOnly;

impl Backend for PrepOnly {
    fn name(&self) -> &'static str {
        "prep-only"
    }
    fn kind(&self) -> BackendKind {
        BackendKind::Fallback
    }
    fn sq_entries(&self) -> u32 {
        0
    }
    fn cq_entries(&self) -> u32 {
        0
    }
    fn space_left(&self) -> u32 {
        0
    }
    fn acquire_slot(&mut self) -> Result<SlotHandle> {
        Err(ReactorError::Full)
    }
    fn submit(&mut self, _wait_nr: u32) -> io::Result<u32> {
        Ok(0)
    }
    fn ready(&self) -> u32 {
        0
    }
    fn drain(&mut self, _max: usize, _out: &mut Vec<Cqe>) -> usize {
        0
    }
}
