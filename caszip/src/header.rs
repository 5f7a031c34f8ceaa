//! Chunk header parsing.

use byteorder::{BigEndian, LittleEndian, ReadBytesExt};
use std::io::Read;

use crate::{Result, CHUNK_SIZE};

/// Size of the on-disk chunk header in bytes.
pub const HEADER_SIZE: usize = 8;

/// The 8-byte header leading every chunk payload.
///
/// Wire layout: big-endian u16 uncompressed size, little-endian u16
/// compression code, big-endian u32 compressed payload size. A raw
/// uncompressed size of zero encodes the full `0x10000` chunk, which does
/// not fit in the field; every non-final chunk of a stream is that size.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ChunkHeader {
    /// Uncompressed payload size with the zero encoding already resolved.
    pub uncompressed_size: u32,
    /// Compression code, see the `CODE_*` constants.
    pub code: u16,
    /// Compressed payload size following the header.
    pub compressed_size: u32,
}

impl ChunkHeader {
    /// Parse a chunk header at the reader's current position.
    pub fn parse<R: Read>(r: &mut R) -> Result<Self> {
        let raw_size = r.read_u16::<BigEndian>()?;
        let code = r.read_u16::<LittleEndian>()?;
        let compressed_size = r.read_u32::<BigEndian>()?;

        let uncompressed_size = if raw_size == 0 {
            CHUNK_SIZE as u32
        } else {
            u32::from(raw_size)
        };

        Ok(Self {
            uncompressed_size,
            code,
            compressed_size,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{CODE_COMPRESSED, CODE_STORED};
    use std::io::Cursor;

    #[test]
    fn parse_stored_header() {
        let data = [
            0x00, 0x05, // uncompressed = 5, big-endian
            0x70, 0x00, // code = 0x0070, little-endian
            0x00, 0x00, 0x00, 0x05, // compressed = 5, big-endian
        ];

        let header = ChunkHeader::parse(&mut Cursor::new(&data)).unwrap();
        assert_eq!(header.uncompressed_size, 5);
        assert_eq!(header.code, CODE_STORED);
        assert_eq!(header.compressed_size, 5);
    }

    #[test]
    fn zero_size_encodes_full_chunk() {
        let data = [
            0x00, 0x00, // raw uncompressed = 0 -> 0x10000
            0x70, 0x11, // code = 0x1170, little-endian
            0x00, 0x00, 0x12, 0x34,
        ];

        let header = ChunkHeader::parse(&mut Cursor::new(&data)).unwrap();
        assert_eq!(header.uncompressed_size, CHUNK_SIZE as u32);
        assert_eq!(header.code, CODE_COMPRESSED);
        assert_eq!(header.compressed_size, 0x1234);
    }

    #[test]
    fn truncated_header_is_io_error() {
        let data = [0x00, 0x05, 0x70];
        let err = ChunkHeader::parse(&mut Cursor::new(&data)).unwrap_err();
        assert!(matches!(err, crate::Error::Io(_)), "actual error: {err:?}");
    }
}
