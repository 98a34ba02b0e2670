//! Error types for reactor construction and operation submission.
//!
//! Failures of individual kernel operations are not reactor errors: they are
//! delivered untouched in the [`Completion`](crate::Completion) of the
//! operation that caused them. `ReactorError` covers everything else, from
//! ring setup to backpressure and misuse detected before a slot is consumed.

use std::io;

use thiserror::Error;

use crate::reactor::Token;

/// Result type alias for reactor operations.
pub type Result<T> = std::result::Result<T, ReactorError>;

/// Error type for reactor operations.
///
/// Variants fall into four groups:
///
/// - initialization: [`Setup`](Self::Setup), [`Mmap`](Self::Mmap),
///   [`MissingSymbol`](Self::MissingSymbol), [`Unsupported`](Self::Unsupported)
///   and [`Config`](Self::Config). The reactor does not start.
/// - backpressure: [`Full`](Self::Full). Flush or poll, then retry.
/// - misuse rejected before any ring state changes:
///   [`TooManyBuffers`](Self::TooManyBuffers),
///   [`InvalidOperation`](Self::InvalidOperation),
///   [`StaleToken`](Self::StaleToken) and [`ShutDown`](Self::ShutDown).
/// - per-call system call failures: [`Submit`](Self::Submit) and
///   [`Io`](Self::Io).
#[derive(Debug, Error)]
pub enum ReactorError {
    /// No free submission slot.
    ///
    /// The submission ring holds `entries` unpublished or unconsumed
    /// entries. Call `flush()` (and possibly `poll()`) before retrying.
    #[error("Submission ring is full")]
    Full,

    /// A vectored operation carries more buffers than the backend accepts.
    #[error("Too many buffers: {count} exceeds the limit of {max}")]
    TooManyBuffers {
        /// Number of buffers supplied
        count: usize,
        /// Backend limit
        max: usize,
    },

    /// Operation parameters that can never be valid.
    #[error("Invalid operation: {0}")]
    InvalidOperation(String),

    /// A cancel/remove/update request names a token that is no longer pending.
    #[error("Token {0} is not pending")]
    StaleToken(Token),

    /// A required symbol is missing from the native helper library and no
    /// built-in replacement exists for it.
    #[error("Symbol `{symbol}` missing from {library}")]
    MissingSymbol {
        /// Symbol name
        symbol: String,
        /// Library the lookup was made against
        library: String,
    },

    /// `io_uring_setup` (or the native queue initializer) failed.
    #[error("Ring setup failed: {0}")]
    Setup(#[source] io::Error),

    /// Mapping the shared ring memory failed.
    #[error("Ring memory mapping failed: {0}")]
    Mmap(#[source] io::Error),

    /// The kernel or the loaded library lacks a capability the reactor needs.
    #[error("Unsupported: {0}")]
    Unsupported(String),

    /// `io_uring_enter` failed while publishing submissions.
    #[error("Submission failed: {0}")]
    Submit(#[source] io::Error),

    /// The reactor was shut down.
    #[error("Reactor is shut down")]
    ShutDown,

    /// Configuration rejected by validation.
    #[error("Invalid configuration: {0}")]
    Config(String),

    /// Standard I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),
}

impl ReactorError {
    /// Whether the error is the recoverable backpressure signal.
    pub fn is_backpressure(&self) -> bool {
        matches!(self, ReactorError::Full)
    }

    /// The OS error number carried by the error, if any.
    pub fn raw_os_error(&self) -> Option<i32> {
        match self {
            ReactorError::Setup(e)
            | ReactorError::Mmap(e)
            | ReactorError::Submit(e)
            | ReactorError::Io(e) => e.raw_os_error(),
            _ => None,
        }
    }
}

static_assertions::assert_impl_all!(ReactorError: Send, Sync);

#[cfg(test)]
mod tests {
    use super::*;
    use std::error::Error;
    use std::io::{Error as IoError, ErrorKind};

    mod error_messages {
        use super::*;

        #[test]
        fn full() {
            assert_eq!(ReactorError::Full.to_string(), "Submission ring is full");
        }

        #[test]
        fn too_many_buffers() {
            let error = ReactorError::TooManyBuffers {
                count: 2048,
                max: 1024,
            };
            assert_eq!(
                error.to_string(),
                "Too many buffers: 2048 exceeds the limit of 1024"
            );
        }

        #[test]
        fn missing_symbol() {
            let error = ReactorError::MissingSymbol {
                symbol: "io_uring_submit".into(),
                library: "liburing.so.2".into(),
            };
            assert_eq!(
                error.to_string(),
                "Symbol `io_uring_submit` missing from liburing.so.2"
            );
        }

        #[test]
        fn stale_token() {
            let error = ReactorError::StaleToken(Token::new(3, 7));
            assert!(error.to_string().contains("is not pending"));
        }
    }

    mod error_conversion {
        use super::*;

        #[test]
        fn io_error_conversion() {
            let error = ReactorError::from(IoError::new(ErrorKind::PermissionDenied, "denied"));
            let ReactorError::Io(ref inner) = error else {
                panic!("Expected Io error variant");
            };
            assert_eq!(inner.kind(), ErrorKind::PermissionDenied);
            assert!(error.to_string().starts_with("I/O error"));
        }

        #[test]
        fn raw_os_error_is_preserved() {
            let error = ReactorError::Setup(IoError::from_raw_os_error(libc::ENOSYS));
            assert_eq!(error.raw_os_error(), Some(libc::ENOSYS));
            assert!(error.source().is_some());

            assert_eq!(ReactorError::Full.raw_os_error(), None);
        }

        #[test]
        fn backpressure_classification() {
            assert!(ReactorError::Full.is_backpressure());
            assert!(!ReactorError::ShutDown.is_backpressure());
        }
    }
}
