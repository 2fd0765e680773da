//! Error types for the store crate

// Rust 1.92 compiler bug: false positives for thiserror/miette derive macro fields
// https://github.com/rust-lang/rust/issues/147648
#![allow(unused_assignments)]

use miette::Diagnostic;
use std::path::Path;
use thiserror::Error;

/// Error type for storage engine operations.
///
/// Corrupted cache files never surface here: the recovery loader resolves them
/// internally. What remains are failures the caller can act on.
#[derive(Error, Debug, Diagnostic)]
pub enum Error {
    /// I/O error while reading or persisting the cache file triplet
    #[error("I/O {operation} failed{}", path.as_ref().map_or(String::new(), |p| format!(": {}", p.display())))]
    #[diagnostic(
        code(cachet::store::io),
        help("Check file permissions, free disk space, and that the cache directory is writable")
    )]
    Io {
        /// The underlying I/O error
        #[source]
        source: std::io::Error,
        /// Path that caused the error, if available
        path: Option<Box<Path>>,
        /// Operation that failed (e.g., "read", "write", "rename")
        operation: String,
    },

    /// The in-memory document could not be encoded
    #[error("Serialization error: {message}")]
    #[diagnostic(code(cachet::store::serialization))]
    Serialization {
        /// Error message describing the serialization issue
        message: String,
    },

    /// Invalid store configuration
    #[error("Store configuration error: {message}")]
    #[diagnostic(code(cachet::store::config))]
    Configuration {
        /// Error message describing the configuration issue
        message: String,
    },
}

impl Error {
    /// Create a configuration error
    #[must_use]
    pub fn configuration(msg: impl Into<String>) -> Self {
        Self::Configuration {
            message: msg.into(),
        }
    }

    /// Create an I/O error with path context
    #[must_use]
    pub fn io(
        source: std::io::Error,
        path: impl AsRef<Path>,
        operation: impl Into<String>,
    ) -> Self {
        Self::Io {
            source,
            path: Some(path.as_ref().into()),
            operation: operation.into(),
        }
    }

    /// Create a serialization error
    #[must_use]
    pub fn serialization(msg: impl Into<String>) -> Self {
        Self::Serialization {
            message: msg.into(),
        }
    }

    /// Kind of the underlying I/O error, if this is an I/O failure
    #[must_use]
    pub fn io_kind(&self) -> Option<std::io::ErrorKind> {
        match self {
            Self::Io { source, .. } => Some(source.kind()),
            _ => None,
        }
    }
}

/// Result type for store operations
pub type Result<T> = std::result::Result<T, Error>;
