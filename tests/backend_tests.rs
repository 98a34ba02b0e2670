//! Backend selection tests through the public API.
//!
//! These tests check that backend preferences resolve the way the
//! configuration says and that the built-in transport carries a request
//! from submission to completion on its own.

mod common;

use common::{fallback_reactor, init_test_logging, ring_unavailable, try_reactor};
use uring_reactor::backend::{self, Backend, NativeLibrary};
use std::os::fd::AsRawFd;
use std::os::unix::net::UnixStream;
use std::time::Duration;

use uring_reactor::{
    BackendConfig, BackendKind, BackendPreference, Collector, Completion, ConfigBuilder, Op,
    ReactorConfig, ReactorError,
};

/// The fallback preference always uses the built-in transport.
#[test]
fn test_fallback_preference() {
    let Some((reactor, _collector)) = fallback_reactor() else { return };
    assert_eq!(reactor.backend_kind(), BackendKind::Fallback);
    assert_eq!(reactor.backend_name(), "builtin");
}

/// Auto selection yields whichever backend the system supports.
#[test]
fn test_auto_selection_picks_a_backend() {
    let Some(reactor) = try_reactor(ReactorConfig::default(), Collector::new()) else { return };
    let name = reactor.backend_name();
    assert!(
        name == "liburing" || name == "builtin",
        "Backend should be liburing or builtin, got: {}",
        name
    );
}

/// A library that cannot be loaded is not an error under auto selection.
#[test]
fn test_auto_with_missing_library_falls_back() -> Result<(), ReactorError> {
    let config = ConfigBuilder::new()
        .backend(BackendPreference::Auto)
        .library_names(["liburing-does-not-exist.so.0"])
        .build()?;
    let Some(reactor) = try_reactor(config, Collector::new()) else { return Ok(()) };
    assert_eq!(reactor.backend_kind(), BackendKind::Fallback);
    Ok(())
}

/// Requiring the native backend with no loadable library is reported.
#[test]
fn test_native_with_missing_library_is_unsupported() -> Result<(), ReactorError> {
    init_test_logging();
    let config = ConfigBuilder::new()
        .backend(BackendPreference::Native)
        .library_names(["liburing-does-not-exist.so.0"])
        .build()?;
    match uring_reactor::Reactor::new(config, Collector::new()) {
        Err(ReactorError::Unsupported(_)) => Ok(()),
        Err(e) => panic!("expected Unsupported, got {e}"),
        Ok(_) => panic!("native backend should not load"),
    }
}

/// A library without the ring entry points is rejected by name.
#[test]
fn test_library_without_ring_symbols_is_rejected() {
    init_test_logging();
    match NativeLibrary::open(&["libc.so.6"]) {
        Err(ReactorError::MissingSymbol { symbol, .. }) => {
            assert_eq!(symbol, "io_uring_queue_init_params")
        }
        Err(e) => panic!("expected MissingSymbol, got {e}"),
        Ok(_) => panic!("libc does not export liburing"),
    }
}

/// The built-in transport completes a request with no native help.
#[test]
fn test_fallback_round_trip() -> Result<(), ReactorError> {
    let Some((mut reactor, collector)) = fallback_reactor() else { return Ok(()) };
    let token = reactor.submit(Op::nop(), 0xfeed)?;
    assert_eq!(reactor.poll(1, None)?, 1);

    let done = collector.take();
    assert_eq!(done.len(), 1);
    assert_eq!(done[0].token(), token);
    assert_eq!(done[0].tag(), 0xfeed);
    assert_eq!(done[0].raw_result(), 0);
    Ok(())
}

/// Resolving directly returns a backend with the configured ring sizes.
#[test]
fn test_resolve_respects_ring_size() -> Result<(), ReactorError> {
    init_test_logging();
    let config = ConfigBuilder::new()
        .backend(BackendPreference::Fallback)
        .entries(16)
        .cq_entries(64)
        .build()?;
    let backend = match backend::resolve(&config.backend, &config.ring) {
        Ok(backend) => backend,
        Err(e) if ring_unavailable(&e) => return Ok(()),
        Err(e) => return Err(e),
    };
    assert_eq!(backend.sq_entries(), 16);
    assert_eq!(backend.cq_entries(), 64);
    assert_eq!(backend.space_left(), 16);
    Ok(())
}

/// Requests submitted through a loaded liburing complete like on the
/// built-in transport. Skipped on hosts without liburing.
#[test]
fn test_native_backend_round_trip() -> Result<(), Box<dyn std::error::Error>> {
    init_test_logging();
    let names = BackendConfig::default().library_names;
    if let Err(e) = NativeLibrary::open(names.as_slice()) {
        eprintln!("skipping: liburing not available ({e})");
        return Ok(());
    }

    let config = ConfigBuilder::new()
        .backend(BackendPreference::Native)
        .entries(8)
        .build()?;
    let collector = Collector::new();
    let Some(mut reactor) = try_reactor(config, collector.clone()) else { return Ok(()) };
    assert_eq!(reactor.backend_kind(), BackendKind::Native);
    assert_eq!(reactor.backend_name(), "liburing");

    reactor.submit(Op::nop(), 1)?;
    reactor.poll(1, Some(Duration::from_secs(5)))?;
    assert_eq!(collector.take()[0].raw_result(), 0);

    let file = tempfile::tempfile()?;
    reactor.submit(Op::write(file.as_raw_fd(), b"native path".to_vec(), Some(0)), 2)?;
    reactor.poll(1, Some(Duration::from_secs(5)))?;
    assert_eq!(collector.take()[0].bytes(), Some(11));

    reactor.submit(Op::read(file.as_raw_fd(), vec![0; 32], Some(7)), 3)?;
    reactor.poll(1, Some(Duration::from_secs(5)))?;
    assert_eq!(collector.take()[0].data(), Some(&b"path"[..]));

    let (_a, b) = UnixStream::pair()?;
    let recv = reactor.submit(Op::recv(b.as_raw_fd(), vec![0; 8], 0), 4)?;
    reactor.flush()?;
    reactor.submit(Op::cancel(recv, 0), 5)?;
    reactor.poll(2, Some(Duration::from_secs(5)))?;
    let mut done = collector.take();
    done.sort_by_key(Completion::tag);
    assert_eq!(done.len(), 2);
    assert!(done[0].is_cancelled());
    assert_eq!(done[1].result()?, 0);

    // More completions than one CQ pass holds go through the batch drain.
    for tag in 0..32 {
        reactor.submit(Op::nop(), tag)?;
        if tag % 8 == 7 {
            reactor.flush()?;
        }
    }
    let mut dispatched = 0;
    while dispatched < 32 {
        dispatched += reactor.poll(32 - dispatched, Some(Duration::from_secs(5)))?;
    }
    assert_eq!(collector.take().len(), 32);

    reactor.shutdown()?;
    assert_eq!(reactor.pending(), 0);
    Ok(())
}
