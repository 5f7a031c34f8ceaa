//! Error types for storage and extraction operations

use thiserror::Error;

/// Result type for storage operations
pub type Result<T> = std::result::Result<T, Error>;

#[derive(Error, Debug)]
pub enum Error {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("TOC error: {0}")]
    Toc(#[from] toc_parser::Error),

    #[error("chunk codec error: {0}")]
    Chunks(#[from] caszip::Error),

    /// The referenced package or CAS file is not physically present.
    /// Non-fatal: the caller logs and skips the part.
    #[error("bundle unavailable: {0}")]
    BundleUnavailable(String),

    /// The layout violates an assumption the identifier scheme relies on.
    #[error("format mismatch: {0}")]
    FormatMismatch(String),
}

impl Error {
    /// Whether this error marks content that is merely absent rather than
    /// malformed.
    pub fn is_unavailable(&self) -> bool {
        matches!(self, Error::BundleUnavailable(_))
    }
}
