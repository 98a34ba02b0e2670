//! Logging setup and operation metrics.
//!
//! The reactor emits structured `tracing` events (fields `token`, `op`, `fd`,
//! `res`) at the following levels:
//!
//! - `trace`: every submission and completion
//! - `debug`: flushes, backend selection, ring geometry
//! - `warn`: stale completions and backpressure
//! - `error`: shutdown with operations still owned by the kernel
//!
//! [`init`] installs a formatting subscriber for applications that have none.
//! [`OperationMetrics`] records submission-to-completion latency per
//! operation kind when [`LoggingConfig::metrics`] is enabled.

use std::collections::HashMap;
use std::fmt::Write as _;
use std::time::{Duration, Instant};

use tracing_subscriber::EnvFilter;

use crate::config::LoggingConfig;
use crate::operation::OperationKind;

/// Log level for reactor diagnostics.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum LogLevel {
    /// Trace-level logging (every submission and completion)
    Trace = 0,
    /// Debug-level logging
    Debug = 1,
    /// Info-level logging
    Info = 2,
    /// Warning-level logging
    Warn = 3,
    /// Error-level logging
    Error = 4,
}

impl LogLevel {
    /// Directive string understood by [`EnvFilter`].
    pub const fn as_directive(self) -> &'static str {
        match self {
            LogLevel::Trace => "trace",
            LogLevel::Debug => "debug",
            LogLevel::Info => "info",
            LogLevel::Warn => "warn",
            LogLevel::Error => "error",
        }
    }
}

impl From<LogLevel> for tracing::Level {
    fn from(level: LogLevel) -> Self {
        match level {
            LogLevel::Trace => tracing::Level::TRACE,
            LogLevel::Debug => tracing::Level::DEBUG,
            LogLevel::Info => tracing::Level::INFO,
            LogLevel::Warn => tracing::Level::WARN,
            LogLevel::Error => tracing::Level::ERROR,
        }
    }
}

impl std::fmt::Display for LogLevel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(match self {
            LogLevel::Trace => "TRACE",
            LogLevel::Debug => "DEBUG",
            LogLevel::Info => "INFO",
            LogLevel::Warn => "WARN",
            LogLevel::Error => "ERROR",
        })
    }
}

/// Install a global `tracing` subscriber according to `config`.
///
/// `RUST_LOG` takes precedence over `config.level`. Returns `true` if this
/// call installed the subscriber and `false` if logging is disabled or a
/// global subscriber was already set, so calling it repeatedly is harmless.
pub fn init(config: &LoggingConfig) -> bool {
    if !config.enabled {
        return false;
    }

    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(config.level.as_directive()));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(true)
        .compact()
        .try_init()
        .is_ok()
}

/// Latency summary for one operation kind.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct KindMetrics {
    /// Completed operations
    pub count: u64,
    /// Sum of submission-to-completion latencies
    pub total: Duration,
    /// Fastest completion
    pub min: Duration,
    /// Slowest completion
    pub max: Duration,
}

impl KindMetrics {
    fn first(latency: Duration) -> Self {
        Self {
            count: 1,
            total: latency,
            min: latency,
            max: latency,
        }
    }

    /// Mean latency.
    pub fn average(&self) -> Duration {
        match u32::try_from(self.count) {
            Ok(0) => Duration::ZERO,
            Ok(count) => self.total / count,
            Err(_) => Duration::from_secs_f64(self.total.as_secs_f64() / self.count as f64),
        }
    }
}

/// Per-kind latency metrics collected by the reactor.
#[derive(Debug, Clone)]
pub struct OperationMetrics {
    kinds: HashMap<OperationKind, KindMetrics>,
    start_time: Instant,
}

impl OperationMetrics {
    /// Create an empty collector.
    pub fn new() -> Self {
        Self {
            kinds: HashMap::new(),
            start_time: Instant::now(),
        }
    }

    /// Record one completed operation.
    pub fn record(&mut self, kind: OperationKind, latency: Duration) {
        self.kinds
            .entry(kind)
            .and_modify(|m| {
                m.count += 1;
                m.total += latency;
                m.min = m.min.min(latency);
                m.max = m.max.max(latency);
            })
            .or_insert_with(|| KindMetrics::first(latency));
    }

    /// Summary for one kind, if any operation of that kind completed.
    pub fn get(&self, kind: OperationKind) -> Option<&KindMetrics> {
        self.kinds.get(&kind)
    }

    /// Completed operations of one kind.
    pub fn count(&self, kind: OperationKind) -> u64 {
        self.kinds.get(&kind).map_or(0, |m| m.count)
    }

    /// Completed operations across all kinds.
    pub fn total(&self) -> u64 {
        self.kinds.values().map(|m| m.count).sum()
    }

    /// Time since the collector was created or last reset.
    pub fn elapsed(&self) -> Duration {
        self.start_time.elapsed()
    }

    /// Forget everything recorded so far.
    pub fn reset(&mut self) {
        self.kinds.clear();
        self.start_time = Instant::now();
    }

    /// Render a plain-text summary, one block per kind in a stable order.
    pub fn report(&self) -> String {
        let mut report = String::new();
        let _ = writeln!(report, "=== Reactor Operation Metrics ===");
        let _ = writeln!(report, "Collection Duration: {:?}", self.elapsed());
        let _ = writeln!(report, "Total Operations: {}", self.total());

        let mut kinds: Vec<_> = self.kinds.iter().collect();
        kinds.sort_by_key(|(kind, _)| kind.name());

        for (kind, m) in kinds {
            let _ = writeln!(report);
            let _ = writeln!(report, "Operation: {kind}");
            let _ = writeln!(report, "  Count: {}", m.count);
            let _ = writeln!(report, "  Average: {:?}", m.average());
            let _ = writeln!(report, "  Min: {:?}", m.min);
            let _ = writeln!(report, "  Max: {:?}", m.max);
        }
        report
    }
}

impl Default for OperationMetrics {
    fn default() -> Self {
        Self::new()
    }
}

/// Counter snapshot returned by `Reactor::stats()`.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ReactorStats {
    /// Entries written into submission slots (user and internal)
    pub submitted: u64,
    /// Entries the kernel accepted through `io_uring_enter`
    pub flushed: u64,
    /// Completion entries drained from the ring
    pub completed: u64,
    /// Completions delivered to the dispatcher
    pub dispatched: u64,
    /// Completions whose token no longer matched a pending operation
    pub stale: u64,
    /// Times a submission was refused with `Full`
    pub backpressure: u64,
    /// Cancel requests issued by `cancel_all`
    pub cancels: u64,
    /// Wake-ups received through a `WakeHandle`
    pub wakeups: u64,
}
