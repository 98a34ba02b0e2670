//! Reactor configuration.
//!
//! There is no configuration file. A [`ReactorConfig`] is built in code,
//! either from one of the presets or through [`ConfigBuilder`], and the
//! backend choice can be overridden from the environment with
//! [`ReactorConfig::from_env`].

use crate::error::{ReactorError, Result};
use crate::logging::LogLevel;

/// Environment variable read by [`ReactorConfig::from_env`].
pub const BACKEND_ENV: &str = "URING_REACTOR_BACKEND";

/// Largest submission ring the kernel accepts (`IORING_MAX_ENTRIES`).
pub const MAX_RING_ENTRIES: u32 = 32768;

/// Complete reactor configuration.
#[derive(Debug, Clone, Default)]
pub struct ReactorConfig {
    /// Ring geometry
    pub ring: RingConfig,
    /// Backend selection
    pub backend: BackendConfig,
    /// Logging and metrics
    pub logging: LoggingConfig,
}

/// Ring geometry and drain batching.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RingConfig {
    /// Requested submission entries; the kernel rounds up to a power of two.
    pub entries: u32,
    /// Requested completion entries (0 = kernel default of `2 * entries`).
    pub cq_entries: u32,
    /// Let the kernel clamp oversized requests instead of failing.
    pub clamp: bool,
    /// Maximum completions drained per kernel synchronization.
    pub completion_batch: usize,
}

/// Which backend implementation to bind.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum BackendPreference {
    /// Native helper library if it loads, otherwise the built-in fallback.
    #[default]
    Auto,
    /// Native helper library or fail.
    Native,
    /// Built-in fallback only; never touches the native library.
    Fallback,
}

impl std::str::FromStr for BackendPreference {
    type Err = ReactorError;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "auto" | "" => Ok(BackendPreference::Auto),
            "native" | "liburing" => Ok(BackendPreference::Native),
            "fallback" | "builtin" => Ok(BackendPreference::Fallback),
            other => Err(ReactorError::Config(format!(
                "unknown backend preference `{other}`"
            ))),
        }
    }
}

/// Backend resolution settings.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BackendConfig {
    /// Backend preference
    pub preference: BackendPreference,
    /// Library names tried in order when loading the native helper
    pub library_names: Vec<String>,
}

/// Logging and metrics settings.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LoggingConfig {
    /// Install a subscriber when the reactor is created
    pub enabled: bool,
    /// Default level when `RUST_LOG` is unset
    pub level: LogLevel,
    /// Record per-operation latency metrics
    pub metrics: bool,
}

impl Default for RingConfig {
    fn default() -> Self {
        Self {
            entries: 64,
            cq_entries: 0,
            clamp: false,
            completion_batch: 256,
        }
    }
}

impl Default for BackendConfig {
    fn default() -> Self {
        Self {
            preference: BackendPreference::Auto,
            library_names: vec![
                "liburing-ffi.so.2".to_string(),
                "liburing.so.2".to_string(),
                "liburing.so".to_string(),
            ],
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            level: LogLevel::Info,
            metrics: false,
        }
    }
}

impl ReactorConfig {
    /// Configuration that never loads the native helper library.
    pub fn fallback() -> Self {
        Self {
            backend: BackendConfig {
                preference: BackendPreference::Fallback,
                ..Default::default()
            },
            ..Default::default()
        }
    }

    /// Large rings and completion batches for many concurrent operations.
    pub fn high_throughput() -> Self {
        Self {
            ring: RingConfig {
                entries: 1024,
                cq_entries: 4096,
                clamp: true,
                completion_batch: 1024,
            },
            ..Default::default()
        }
    }

    /// Default configuration with the backend preference taken from
    /// `URING_REACTOR_BACKEND`, if set.
    pub fn from_env() -> Result<Self> {
        let mut config = Self::default();
        config.apply_env()?;
        Ok(config)
    }

    /// Apply `URING_REACTOR_BACKEND` to an existing configuration.
    pub fn apply_env(&mut self) -> Result<()> {
        if let Ok(value) = std::env::var(BACKEND_ENV) {
            self.backend.preference = value.parse()?;
        }
        Ok(())
    }

    /// Check the configuration for values the kernel or resolver would reject.
    pub fn validate(&self) -> Result<()> {
        if self.ring.entries == 0 {
            return Err(ReactorError::Config(
                "ring entries must be greater than 0".into(),
            ));
        }

        if self.ring.entries > MAX_RING_ENTRIES {
            return Err(ReactorError::Config(format!(
                "ring entries must not exceed {MAX_RING_ENTRIES}"
            )));
        }

        if self.ring.cq_entries != 0 && self.ring.cq_entries < self.ring.entries {
            return Err(ReactorError::Config(
                "completion entries must be at least the submission entries".into(),
            ));
        }

        if self.ring.completion_batch == 0 {
            return Err(ReactorError::Config(
                "completion batch must be greater than 0".into(),
            ));
        }

        if self.backend.preference == BackendPreference::Native
            && self.backend.library_names.is_empty()
        {
            return Err(ReactorError::Config(
                "native backend requested without any library name".into(),
            ));
        }

        Ok(())
    }
}

/// Fluent builder for [`ReactorConfig`].
#[derive(Debug, Default)]
pub struct ConfigBuilder {
    config: ReactorConfig,
}

impl ConfigBuilder {
    /// Start from the default configuration.
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the requested submission ring size.
    pub fn entries(mut self, entries: u32) -> Self {
        self.config.ring.entries = entries;
        self
    }

    /// Set the requested completion ring size.
    pub fn cq_entries(mut self, cq_entries: u32) -> Self {
        self.config.ring.cq_entries = cq_entries;
        self
    }

    /// Replace the ring configuration.
    pub fn ring(mut self, ring: RingConfig) -> Self {
        self.config.ring = ring;
        self
    }

    /// Set the backend preference.
    pub fn backend(mut self, preference: BackendPreference) -> Self {
        self.config.backend.preference = preference;
        self
    }

    /// Replace the native library search list.
    pub fn library_names<I, S>(mut self, names: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.config.backend.library_names = names.into_iter().map(Into::into).collect();
        self
    }

    /// Replace the logging configuration.
    pub fn logging(mut self, logging: LoggingConfig) -> Self {
        self.config.logging = logging;
        self
    }

    /// Enable latency metrics.
    pub fn metrics(mut self, enabled: bool) -> Self {
        self.config.logging.metrics = enabled;
        self
    }

    /// Validate and return the configuration.
    pub fn build(self) -> Result<ReactorConfig> {
        self.config.validate()?;
        Ok(self.config)
    }
}
