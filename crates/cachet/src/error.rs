//! Error types for the cachet crate

// Rust 1.92 compiler bug: false positives for thiserror/miette derive macro fields
// https://github.com/rust-lang/rust/issues/147648
#![allow(unused_assignments)]

use miette::Diagnostic;
use thiserror::Error;

/// Error type for cache operations
#[derive(Error, Debug, Diagnostic)]
pub enum Error {
    /// The storage engine failed
    #[error(transparent)]
    #[diagnostic(transparent)]
    Store(#[from] cachet_store::Error),

    /// A stored entry was written by a different codec
    #[error("Type mismatch for `{key}`: expected {expected}, found {found}")]
    #[diagnostic(
        code(cachet::type_mismatch),
        help("The entry was written by another codec or an older payload version")
    )]
    TypeMismatch {
        /// Key of the offending entry
        key: String,
        /// Type id of the reading codec
        expected: String,
        /// Type id stored with the entry
        found: String,
    },

    /// A stored payload could not be decoded
    #[error("Failed to decode `{key}`: {message}")]
    #[diagnostic(code(cachet::decode))]
    Decode {
        /// Key of the offending entry
        key: String,
        /// Decoder error message
        message: String,
    },

    /// A value could not be encoded
    #[error("Failed to encode `{key}`: {message}")]
    #[diagnostic(code(cachet::encode))]
    Encode {
        /// Key being written
        key: String,
        /// Encoder error message
        message: String,
    },

    /// Invalid cache configuration
    #[error("Cache configuration error: {message}")]
    #[diagnostic(code(cachet::config))]
    Configuration {
        /// Error message describing the configuration issue
        message: String,
    },

    /// A refresh callback failed
    #[error("Fetching a fresh value failed: {message}")]
    #[diagnostic(code(cachet::fetch))]
    Fetch {
        /// Error message from the fetcher
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

    /// Create a fetch error, for use inside refresh callbacks
    #[must_use]
    pub fn fetch(msg: impl Into<String>) -> Self {
        Self::Fetch {
            message: msg.into(),
        }
    }
}

/// Result type for cache operations
pub type Result<T> = std::result::Result<T, Error>;
