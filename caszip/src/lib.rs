//! Chunked compression codec for CAS payload ranges.
//!
//! A compressed byte range inside a CAS archive (or embedded in an SB file)
//! is a sequence of chunks, each led by an 8-byte header. Stored chunks carry
//! their payload verbatim; compressed chunks go through the vendor library
//! behind the [`Decompressor`] trait. The [`decompress_range`] pipeline walks
//! the chunks under an explicit byte budget and fails on any deviation from
//! the declared sizes.

pub mod decompress;
pub mod error;
pub mod header;

pub use decompress::{decompress_range, Decompressor, RangeSpec, SerializedDecompressor};
pub use error::{Error, Result};
pub use header::ChunkHeader;

/// Uncompressed payload size of every non-final chunk.
pub const CHUNK_SIZE: usize = 0x10000;

/// Chunk payload compressed with the vendor library.
pub const CODE_COMPRESSED: u16 = 0x1170;

/// Chunk payload stored verbatim.
pub const CODE_STORED: u16 = 0x0070;

/// Chunk payload stored verbatim. How this differs from [`CODE_STORED`] is
/// unresolved; both paths copy the payload through unchanged.
pub const CODE_STORED_ALT: u16 = 0x0071;

/// Whether `code` is one of the chunk compression codes this title uses.
pub fn is_known_code(code: u16) -> bool {
    matches!(code, CODE_COMPRESSED | CODE_STORED | CODE_STORED_ALT)
}
