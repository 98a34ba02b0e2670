//! Shared helpers for the integration tests.
#![allow(dead_code)]

use std::sync::Once;

use uring_reactor::{Collector, Dispatcher, Reactor, ReactorConfig, ReactorError};

static INIT_LOGGING: Once = Once::new();

/// Install a trace-level subscriber that writes through the test harness.
pub fn init_test_logging() {
    INIT_LOGGING.call_once(|| {
        let _ = tracing_subscriber::fmt()
            .with_max_level(tracing::Level::TRACE)
            .with_test_writer()
            .with_ansi(false)
            .try_init();
    });
}

/// True when the kernel refused to hand out a ring (no io_uring support,
/// seccomp filter, memlock limit). Tests skip in that case.
pub fn ring_unavailable(error: &ReactorError) -> bool {
    let skip = matches!(
        error,
        ReactorError::Setup(_) | ReactorError::Mmap(_)
    ) && matches!(
        error.raw_os_error(),
        Some(libc::ENOSYS | libc::EPERM | libc::EACCES | libc::ENOMEM | libc::EINVAL)
    );
    if skip {
        eprintln!("skipping: io_uring unavailable ({error})");
    }
    skip
}

/// Build a reactor, or `None` when the environment cannot provide a ring.
pub fn try_reactor<D: Dispatcher>(config: ReactorConfig, dispatcher: D) -> Option<Reactor<D>> {
    init_test_logging();
    match Reactor::new(config, dispatcher) {
        Ok(reactor) => Some(reactor),
        Err(e) if ring_unavailable(&e) => None,
        Err(e) => panic!("reactor setup failed: {e}"),
    }
}

/// Fallback-backed reactor with a shared collector.
pub fn fallback_reactor() -> Option<(Reactor<Collector>, Collector)> {
    let collector = Collector::new();
    try_reactor(ReactorConfig::fallback(), collector.clone()).map(|r| (r, collector))
}
