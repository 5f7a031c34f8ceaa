//! Chunked range decompression.
//!
//! The pipeline walks chunk headers under an explicit byte budget. Both
//! termination conditions are explicit: a known uncompressed size stops the
//! walk once exactly that many bytes have been emitted, and the compressed
//! budget must then be fully consumed; an unknown uncompressed size stops
//! the walk once the compressed budget is fully consumed. Any other state is
//! an error.

use parking_lot::Mutex;
use std::io::Cursor;
use tracing::{debug, trace};

use crate::header::{ChunkHeader, HEADER_SIZE};
use crate::{Error, Result, CODE_COMPRESSED, CODE_STORED, CODE_STORED_ALT};

/// The vendor decompression primitive.
///
/// `decompress` inflates `src` into exactly `dst_size` bytes or fails.
/// Implementations bind a concrete library and must document the platform
/// constraint that library imposes. The pipeline assumes implementations are
/// reentrant; wrap a non-reentrant one in [`SerializedDecompressor`].
pub trait Decompressor: Send + Sync {
    fn decompress(&self, src: &[u8], dst_size: u64) -> Result<Vec<u8>>;
}

/// Serializes calls into a non-reentrant [`Decompressor`] behind a mutex.
pub struct SerializedDecompressor<D>(Mutex<D>);

impl<D: Decompressor> SerializedDecompressor<D> {
    pub fn new(inner: D) -> Self {
        Self(Mutex::new(inner))
    }
}

impl<D: Decompressor> Decompressor for SerializedDecompressor<D> {
    fn decompress(&self, src: &[u8], dst_size: u64) -> Result<Vec<u8>> {
        self.0.lock().decompress(src, dst_size)
    }
}

/// Byte budget for one compressed range.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RangeSpec {
    /// Total compressed bytes the range occupies, chunk headers included.
    pub compressed_size: u64,
    /// Total uncompressed bytes the range decodes to, when known up front.
    pub uncompressed_size: Option<u64>,
}

/// Decompress one chunked range out of `src`.
///
/// `src` must hold at least `spec.compressed_size` bytes starting at the
/// range; trailing bytes beyond the budget are ignored.
pub fn decompress_range(
    src: &[u8],
    spec: RangeSpec,
    decompressor: &dyn Decompressor,
) -> Result<Vec<u8>> {
    if (src.len() as u64) < spec.compressed_size {
        return Err(Error::Truncated(format!(
            "range holds {} bytes but the budget requires {}",
            src.len(),
            spec.compressed_size
        )));
    }

    let mut cursor = Cursor::new(src);
    let mut out = Vec::with_capacity(spec.uncompressed_size.unwrap_or(0) as usize);
    let mut consumed: u64 = 0;

    loop {
        let done = match spec.uncompressed_size {
            Some(total) => out.len() as u64 >= total,
            None => consumed >= spec.compressed_size,
        };
        if done {
            break;
        }

        if consumed + HEADER_SIZE as u64 > spec.compressed_size {
            return Err(Error::Truncated(format!(
                "compressed budget of {:#x} exhausted after {consumed:#x} bytes \
                 with {} of {:?} uncompressed bytes emitted",
                spec.compressed_size,
                out.len(),
                spec.uncompressed_size
            )));
        }
        let header = ChunkHeader::parse(&mut cursor)?;
        consumed += HEADER_SIZE as u64;

        if consumed + u64::from(header.compressed_size) > spec.compressed_size {
            return Err(Error::Truncated(format!(
                "chunk payload of {:#x} bytes at consumed offset {consumed:#x} \
                 overruns the compressed budget of {:#x}",
                header.compressed_size, spec.compressed_size
            )));
        }
        let start = cursor.position() as usize;
        let payload = &src[start..start + header.compressed_size as usize];
        cursor.set_position((start + header.compressed_size as usize) as u64);
        consumed += u64::from(header.compressed_size);

        trace!(
            "decoding chunk: code {:#06x}, compressed {}, uncompressed {}",
            header.code, header.compressed_size, header.uncompressed_size
        );

        let chunk = match header.code {
            CODE_COMPRESSED => {
                let data = decompressor.decompress(payload, u64::from(header.uncompressed_size))?;
                if data.len() as u64 != u64::from(header.uncompressed_size) {
                    return Err(Error::Decompressor(format!(
                        "vendor library returned {} bytes, header declared {}",
                        data.len(),
                        header.uncompressed_size
                    )));
                }
                data
            }
            CODE_STORED | CODE_STORED_ALT => {
                if header.compressed_size != header.uncompressed_size {
                    return Err(Error::FormatMismatch(format!(
                        "stored chunk sizes disagree: compressed {:#x}, uncompressed {:#x}",
                        header.compressed_size, header.uncompressed_size
                    )));
                }
                payload.to_vec()
            }
            code => return Err(Error::UnknownCompression(code)),
        };

        if let Some(total) = spec.uncompressed_size {
            if out.len() as u64 + chunk.len() as u64 > total {
                return Err(Error::FormatMismatch(format!(
                    "chunk overruns the declared uncompressed size: \
                     {} emitted + {} decoded > {total}",
                    out.len(),
                    chunk.len()
                )));
            }
        }
        out.extend_from_slice(&chunk);
    }

    if consumed != spec.compressed_size {
        return Err(Error::FormatMismatch(format!(
            "range consumed {consumed:#x} compressed bytes, budget declared {:#x}",
            spec.compressed_size
        )));
    }
    if let Some(total) = spec.uncompressed_size {
        if out.len() as u64 != total {
            return Err(Error::FormatMismatch(format!(
                "range emitted {} uncompressed bytes, caller declared {total}",
                out.len()
            )));
        }
    }

    debug!(
        compressed = spec.compressed_size,
        uncompressed = out.len(),
        "range decoded"
    );
    Ok(out)
}
