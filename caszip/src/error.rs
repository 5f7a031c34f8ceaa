//! Error types for chunk parsing and decompression

use thiserror::Error;

/// Result type for caszip operations
pub type Result<T> = std::result::Result<T, Error>;

#[derive(Error, Debug)]
pub enum Error {
    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Unknown compression code in a chunk header
    #[error("unknown compression code: {0:#06x}")]
    UnknownCompression(u16),

    /// Unexpected end of the chunk stream
    #[error("truncated chunk stream: {0}")]
    Truncated(String),

    /// Declared sizes and decoded bytes disagree
    #[error("chunk stream mismatch: {0}")]
    FormatMismatch(String),

    /// The vendor library failed or returned the wrong length
    #[error("decompressor error: {0}")]
    Decompressor(String),
}
