//! CAS archive and chunk frame builders.

use std::io::Write;
use std::path::Path;

use caszip::{CHUNK_SIZE, CODE_COMPRESSED, CODE_STORED};
use flate2::write::ZlibEncoder;
use flate2::Compression;

fn frame_header(uncompressed: usize, code: u16, compressed: usize) -> [u8; 8] {
    // A full chunk's uncompressed size is written as zero.
    let raw_size = if uncompressed == CHUNK_SIZE {
        0u16
    } else {
        uncompressed as u16
    };
    let mut out = [0u8; 8];
    out[0..2].copy_from_slice(&raw_size.to_be_bytes());
    out[2..4].copy_from_slice(&code.to_le_bytes());
    out[4..8].copy_from_slice(&(compressed as u32).to_be_bytes());
    out
}

/// Encode one stored chunk frame.
pub fn stored_frame(code: u16, payload: &[u8]) -> Vec<u8> {
    assert!(payload.len() <= CHUNK_SIZE, "stored frame exceeds one chunk");
    let mut out = frame_header(payload.len(), code, payload.len()).to_vec();
    out.extend_from_slice(payload);
    out
}

/// Encode `payload` as a sequence of zlib-compressed chunk frames.
pub fn zlib_frames(payload: &[u8]) -> Vec<u8> {
    let mut out = Vec::new();
    for chunk in payload.chunks(CHUNK_SIZE) {
        let mut encoder = ZlibEncoder::new(Vec::new(), Compression::default());
        encoder.write_all(chunk).expect("zlib encode");
        let compressed = encoder.finish().expect("zlib finish");
        out.extend_from_slice(&frame_header(chunk.len(), CODE_COMPRESSED, compressed.len()));
        out.extend_from_slice(&compressed);
    }
    out
}

/// Accumulates chunk ranges into one CAS archive image.
#[derive(Debug, Default)]
pub struct CasBuilder {
    data: Vec<u8>,
}

impl CasBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a pre-encoded range; returns its `(offset, compressed size)`
    /// locator pair.
    pub fn append(&mut self, range: &[u8]) -> (u64, u64) {
        let offset = self.data.len() as u64;
        self.data.extend_from_slice(range);
        (offset, range.len() as u64)
    }

    /// Append `payload` as a single stored frame.
    pub fn stored(&mut self, payload: &[u8]) -> (u64, u64) {
        let frame = stored_frame(CODE_STORED, payload);
        self.append(&frame)
    }

    /// Append `payload` as zlib-compressed frames.
    pub fn zlib(&mut self, payload: &[u8]) -> (u64, u64) {
        let frames = zlib_frames(payload);
        self.append(&frames)
    }

    pub fn bytes(&self) -> &[u8] {
        &self.data
    }

    pub fn write_to(&self, path: &Path) -> std::io::Result<()> {
        std::fs::write(path, &self.data)
    }
}
