//! Fixture builders for synthetic game trees.
//!
//! Integration tests assemble miniature but wire-accurate installations:
//! layout descriptors, superbundle TOCs, SB bundle bodies and CAS archives,
//! written to a temporary directory via [`GameFixture`].

pub mod bundle;
pub mod cas;
pub mod tag;
pub mod toc;

use std::io::Read;
use std::path::Path;

pub use bundle::{BundleBodyBuilder, ChunkSpec, EbxSpec, ResSpec};
pub use cas::{stored_frame, zlib_frames, CasBuilder};
pub use toc::{layout_toc, toc_file, InstallChunkSpec, SuperbundleTocBuilder};

/// Zlib stand-in for the vendor decompression library.
pub struct ZlibDecompressor;

impl caszip::Decompressor for ZlibDecompressor {
    fn decompress(&self, src: &[u8], dst_size: u64) -> caszip::Result<Vec<u8>> {
        let mut out = Vec::with_capacity(dst_size as usize);
        flate2::read::ZlibDecoder::new(src)
            .read_to_end(&mut out)
            .map_err(|e| caszip::Error::Decompressor(format!("zlib: {e}")))?;
        Ok(out)
    }
}

/// A synthetic game tree rooted in a temporary directory.
pub struct GameFixture {
    dir: tempfile::TempDir,
}

impl GameFixture {
    pub fn new() -> Self {
        Self {
            dir: tempfile::tempdir().expect("create fixture directory"),
        }
    }

    /// Game root to hand to the storage configuration.
    pub fn root(&self) -> &Path {
        self.dir.path()
    }

    /// Write a file below the game root, creating parent directories.
    pub fn write(&self, relative: &str, bytes: &[u8]) {
        let path = self.dir.path().join(relative);
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).expect("create fixture directories");
        }
        std::fs::write(&path, bytes).expect("write fixture file");
    }

    /// Create an empty directory below the game root.
    pub fn mkdir(&self, relative: &str) {
        std::fs::create_dir_all(self.dir.path().join(relative))
            .expect("create fixture directories");
    }

    /// Remove a file below the game root.
    pub fn remove(&self, relative: &str) {
        std::fs::remove_file(self.dir.path().join(relative)).expect("remove fixture file");
    }
}

impl Default for GameFixture {
    fn default() -> Self {
        Self::new()
    }
}
