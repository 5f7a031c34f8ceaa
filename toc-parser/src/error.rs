use thiserror::Error;

/// Result type for TOC parsing operations
pub type Result<T> = std::result::Result<T, Error>;

#[derive(Error, Debug)]
pub enum Error {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Unexpected end of stream
    #[error("truncated stream: {0}")]
    Truncated(String),

    /// Magic, container boundary, or section offset violation
    #[error("format mismatch: {0}")]
    FormatMismatch(String),

    /// Unrecognized tag stream type code
    #[error("unknown type code: {0:#04x}")]
    UnknownTypeCode(u8),
}
