//! CAS archive reading through the chunk pipeline.
//!
//! CAS files have no magic; they are concatenations of chunk-compressed
//! streams addressed by absolute offset. The reader keeps a small LRU of
//! open handles so parallel extraction does not thrash file descriptors.

use std::collections::VecDeque;
use std::fs::File;
use std::io::{Read, Seek, SeekFrom};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use caszip::{decompress_range, Decompressor, RangeSpec};
use parking_lot::Mutex;
use toc_parser::bundle::CasProbe;
use tracing::trace;

use crate::error::{Error, Result};
use crate::resolver::CasResolver;
use crate::types::CasId;

/// Reader over the CAS substrate of a game tree.
pub struct CasReader {
    resolver: Arc<CasResolver>,
    handles: Mutex<HandleCache>,
    decompressor: Arc<dyn Decompressor>,
}

impl CasReader {
    pub fn new(
        resolver: Arc<CasResolver>,
        decompressor: Arc<dyn Decompressor>,
        handle_cache_size: usize,
    ) -> Self {
        Self {
            resolver,
            handles: Mutex::new(HandleCache::new(handle_cache_size.max(1))),
            decompressor,
        }
    }

    pub fn resolver(&self) -> &CasResolver {
        &self.resolver
    }

    /// Read and decompress one part's byte range.
    ///
    /// `uncompressed_size` is passed when the part declares it (EBX and RES
    /// parts); chunk parts and TOC resources terminate on the compressed
    /// budget alone.
    pub fn read(
        &self,
        id: CasId,
        offset: u64,
        compressed_size: u64,
        uncompressed_size: Option<u64>,
    ) -> Result<Vec<u8>> {
        let path = self.resolver.resolve(id)?;
        trace!(
            "reading {compressed_size:#x} bytes at {offset:#x} from {}",
            path.display()
        );
        let handle = self.handle_for(path)?;

        let mut data = vec![0u8; compressed_size as usize];
        {
            let mut file = handle.lock();
            file.seek(SeekFrom::Start(offset))?;
            file.read_exact(&mut data)?;
        }

        let spec = RangeSpec {
            compressed_size,
            uncompressed_size,
        };
        Ok(decompress_range(&data, spec, self.decompressor.as_ref())?)
    }

    /// Sniff the compression code of a would-be chunk frame at `offset`.
    fn frame_code_at(&self, id: CasId, offset: u64) -> Result<u16> {
        let path = self.resolver.resolve(id)?;
        let handle = self.handle_for(path)?;

        let mut file = handle.lock();
        // The code sits at bytes 2..4 of the frame header, little-endian.
        file.seek(SeekFrom::Start(offset + 2))?;
        let mut code = [0u8; 2];
        file.read_exact(&mut code)?;
        Ok(u16::from_le_bytes(code))
    }

    fn handle_for(&self, path: &Path) -> Result<Arc<Mutex<File>>> {
        self.handles.lock().get(path)
    }
}

impl CasProbe for CasReader {
    fn is_valid_id(&self, id: u32) -> bool {
        self.resolver.is_known(CasId::new(id))
    }

    fn has_frame_at(&self, id: u32, offset: u64) -> bool {
        match self.frame_code_at(CasId::new(id), offset) {
            Ok(code) => caszip::is_known_code(code),
            Err(_) => false,
        }
    }
}

/// Bounded cache of open CAS handles, least recently used first out.
struct HandleCache {
    capacity: usize,
    /// Most recently used at the back.
    entries: VecDeque<(PathBuf, Arc<Mutex<File>>)>,
}

impl HandleCache {
    fn new(capacity: usize) -> Self {
        Self {
            capacity,
            entries: VecDeque::with_capacity(capacity),
        }
    }

    fn get(&mut self, path: &Path) -> Result<Arc<Mutex<File>>> {
        if let Some(index) = self.entries.iter().position(|(p, _)| p == path) {
            if let Some(entry) = self.entries.remove(index) {
                let handle = entry.1.clone();
                self.entries.push_back(entry);
                return Ok(handle);
            }
        }

        let file = File::open(path).map_err(|e| match e.kind() {
            std::io::ErrorKind::NotFound => {
                Error::BundleUnavailable(format!("CAS file vanished: {}", path.display()))
            }
            _ => Error::Io(e),
        })?;
        let handle = Arc::new(Mutex::new(file));

        if self.entries.len() >= self.capacity {
            self.entries.pop_front();
        }
        self.entries.push_back((path.to_path_buf(), handle.clone()));
        Ok(handle)
    }
}
