//! Centralized error types for mboxfilter.

use std::path::PathBuf;
use thiserror::Error;

/// All errors produced by the mboxfilter library.
#[derive(Error, Debug)]
pub enum FilterError {
    /// I/O error with the associated file path.
    #[error("I/O error on '{path}': {source}")]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },

    /// A requested header is absent from the message.
    #[error("header not found: {header}")]
    HeaderMissing { header: String },

    /// No parseable address token in an address-bearing header value.
    #[error("no address found in '{0}'")]
    AddressNotFound(String),

    /// A filter pattern did not compile. Fatal at startup: it cannot
    /// succeed for any message.
    #[error("invalid filter pattern '{pattern}': {source}")]
    Pattern {
        pattern: String,
        source: regex::Error,
    },

    /// A selector produced an empty formatted key part for this message.
    #[error("empty key part for header '{header}'")]
    EmptyKeyPart { header: String },

    /// The message fingerprint is already present in the dedup index.
    #[error("duplicate message, fingerprint {fingerprint} already indexed")]
    DuplicateKey { fingerprint: String },

    /// The configured output directory does not exist.
    #[error("output directory not found: {0}")]
    DirectoryMissing(PathBuf),

    /// The index file is corrupt or was written with an incompatible version.
    #[error("corrupt or incompatible index '{path}': {reason}")]
    InvalidIndex { path: PathBuf, reason: String },

    /// A `--filter` or `--sort` rule value did not parse.
    #[error("invalid rule '{0}', expected HEADER,VALUE")]
    InvalidRule(String),
}

/// Convenience alias for `Result<T, FilterError>`.
pub type Result<T> = std::result::Result<T, FilterError>;

impl FilterError {
    /// Create an `Io` variant from a path and an `io::Error`.
    pub fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::Io {
            path: path.into(),
            source,
        }
    }
}

/// Allow `?` on `std::io::Error` inside functions returning `FilterError`
/// when no path context is available (rare — prefer `FilterError::io`).
impl From<std::io::Error> for FilterError {
    fn from(source: std::io::Error) -> Self {
        Self::Io {
            path: PathBuf::from("<unknown>"),
            source,
        }
    }
}
