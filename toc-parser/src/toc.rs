//! TOC file header handling.
//!
//! Every `.toc` file starts with a big-endian magic and a fixed-size header
//! region; the interesting bytes begin at [`TOC_BODY_OFFSET`]. The layout
//! descriptor body is a bare tag stream, while superbundle bodies carry one
//! extra indexed container (see [`crate::index`]).

use std::path::Path;

use tracing::debug;

use crate::{Error, Result};

/// Leading magic of every TOC file, compared big-endian.
pub const TOC_MAGIC: u32 = 0x00D1_CE01;

/// Offset where the TOC body begins; the header bytes in between are not
/// modeled beyond the magic.
pub const TOC_BODY_OFFSET: usize = 0x22C;

/// Magic of the indexed container wrapping a superbundle TOC body.
pub const INDEX_MAGIC: u32 = 0x0000_0030;

/// Magic of a bundle container inside an SB file.
pub const SB_MAGIC: u32 = 0x0000_0020;

/// A TOC file: magic-checked header plus the raw body bytes.
#[derive(Debug, Clone)]
pub struct TocFile {
    body: Vec<u8>,
}

impl TocFile {
    /// Open and validate a TOC file on disk.
    pub fn open(path: &Path) -> Result<Self> {
        debug!("reading TOC {}", path.display());
        Self::parse(std::fs::read(path)?)
    }

    /// Validate raw TOC bytes.
    pub fn parse(data: Vec<u8>) -> Result<Self> {
        if data.len() < TOC_BODY_OFFSET {
            return Err(Error::Truncated(format!(
                "TOC file is {} bytes, header region requires {TOC_BODY_OFFSET:#x}",
                data.len()
            )));
        }
        let magic = u32::from_be_bytes([data[0], data[1], data[2], data[3]]);
        if magic != TOC_MAGIC {
            return Err(Error::FormatMismatch(format!(
                "expected TOC magic {TOC_MAGIC:#010x}, got {magic:#010x}"
            )));
        }
        Ok(Self {
            body: data[TOC_BODY_OFFSET..].to_vec(),
        })
    }

    /// The body bytes starting at [`TOC_BODY_OFFSET`].
    pub fn body(&self) -> &[u8] {
        &self.body
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn toc_bytes(body: &[u8]) -> Vec<u8> {
        let mut out = TOC_MAGIC.to_be_bytes().to_vec();
        out.resize(TOC_BODY_OFFSET, 0);
        out.extend_from_slice(body);
        out
    }

    #[test]
    fn body_starts_at_fixed_offset() {
        let toc = TocFile::parse(toc_bytes(b"payload")).unwrap();
        assert_eq!(toc.body(), b"payload");
    }

    #[test]
    fn wrong_magic_is_mismatch() {
        let mut data = toc_bytes(b"");
        data[0] = 0xff;
        let err = TocFile::parse(data).unwrap_err();
        assert!(matches!(err, Error::FormatMismatch(_)), "actual error: {err:?}");
    }

    #[test]
    fn short_file_is_truncated() {
        let err = TocFile::parse(TOC_MAGIC.to_be_bytes().to_vec()).unwrap_err();
        assert!(matches!(err, Error::Truncated(_)), "actual error: {err:?}");
    }
}
