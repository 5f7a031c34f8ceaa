//! Deterministic extraction driver.
//!
//! The driver walks the graph in a fixed order (packages topologically,
//! Patch layer first; bundles in declared order; parts in EBX, RES, CHUNKS
//! order; TOC resources last per superbundle) and feeds a worker pool. Per
//! part, the CAS reader decompresses the byte range and the result goes to
//! the output sink. Output ordering across parts is not guaranteed.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;

use dashmap::DashMap;
use rayon::prelude::*;
use toc_parser::{Guid, Sha1};
use tracing::{debug, error, info, warn};

use crate::error::{Error, Result};
use crate::graph::{GameStorage, Part, PartKind};

/// Stable identity a part is delivered under.
#[derive(Debug, Clone, Copy)]
pub enum PartIdentity<'a> {
    /// Logical slash-separated path of an EBX or RES part.
    Path(&'a str),
    /// Chunk identifier of a CHUNK part.
    Uid(&'a Guid),
    /// Content digest of a TOC resource.
    Sha1(&'a Sha1),
}

/// Receives extracted parts. Implementations decide the on-disk layout; the
/// driver mandates none.
pub trait OutputSink: Send + Sync {
    fn deliver(
        &self,
        kind: PartKind,
        identity: PartIdentity<'_>,
        part: &Part,
        data: &[u8],
    ) -> std::io::Result<()>;
}

/// Extraction tuning knobs.
#[derive(Debug, Clone, Default)]
pub struct ExtractOptions {
    /// Worker threads; zero selects the hardware thread count.
    pub workers: usize,
    /// Deliver only the first part for each SHA1.
    pub dedup: bool,
    /// Polled between parts; in-flight parts complete before the run returns.
    pub cancel: Option<Arc<AtomicBool>>,
}

/// Outcome counters of one extraction run.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ExtractionSummary {
    pub extracted: u64,
    pub deduplicated: u64,
    pub skipped_unavailable: u64,
    pub failed: u64,
}

enum Outcome {
    Extracted,
    Deduplicated,
}

impl GameStorage {
    /// Extract every part in the graph into `sink`.
    ///
    /// Per-part failures are counted and logged, never propagated: an
    /// unavailable CAS skips the part, anything else marks it failed.
    pub fn extract(&self, sink: &dyn OutputSink, options: &ExtractOptions) -> Result<ExtractionSummary> {
        let work: Vec<&Part> = self.parts().collect();
        info!("extracting {} parts", work.len());

        let pool = rayon::ThreadPoolBuilder::new()
            .num_threads(options.workers)
            .build()
            .map_err(|e| Error::Io(std::io::Error::other(e)))?;

        let seen: Option<DashMap<Sha1, ()>> = options.dedup.then(DashMap::new);
        let extracted = AtomicU64::new(0);
        let deduplicated = AtomicU64::new(0);
        let skipped = AtomicU64::new(0);
        let failed = AtomicU64::new(0);

        pool.install(|| {
            work.into_par_iter().for_each(|part| {
                if let Some(cancel) = &options.cancel {
                    if cancel.load(Ordering::Relaxed) {
                        return;
                    }
                }

                match self.extract_part(part, sink, seen.as_ref()) {
                    Ok(Outcome::Extracted) => {
                        extracted.fetch_add(1, Ordering::Relaxed);
                    }
                    Ok(Outcome::Deduplicated) => {
                        deduplicated.fetch_add(1, Ordering::Relaxed);
                    }
                    Err(e) if e.is_unavailable() => {
                        warn!("skipping part {}: {e}", part.sha1);
                        skipped.fetch_add(1, Ordering::Relaxed);
                    }
                    Err(e) => {
                        error!("part {} failed: {e}", part.sha1);
                        failed.fetch_add(1, Ordering::Relaxed);
                    }
                }
            });
        });

        let summary = ExtractionSummary {
            extracted: extracted.into_inner(),
            deduplicated: deduplicated.into_inner(),
            skipped_unavailable: skipped.into_inner(),
            failed: failed.into_inner(),
        };
        info!(
            "extraction done: {} extracted, {} deduplicated, {} skipped, {} failed",
            summary.extracted, summary.deduplicated, summary.skipped_unavailable, summary.failed
        );
        Ok(summary)
    }

    fn extract_part(
        &self,
        part: &Part,
        sink: &dyn OutputSink,
        seen: Option<&DashMap<Sha1, ()>>,
    ) -> Result<Outcome> {
        if let Some(seen) = seen {
            if seen.contains_key(&part.sha1) {
                debug!("part {} already delivered, deduplicated", part.sha1);
                return Ok(Outcome::Deduplicated);
            }
        }

        let data = self.reader().read(
            part.cas_id,
            part.offset,
            part.compressed_size,
            part.uncompressed_size(),
        )?;

        let identity = match (part.kind, part.name(), part.uid()) {
            (PartKind::Ebx | PartKind::Res, Some(name), _) => PartIdentity::Path(name),
            (PartKind::Chunk, _, Some(uid)) => PartIdentity::Uid(uid),
            _ => PartIdentity::Sha1(&part.sha1),
        };
        sink.deliver(part.kind, identity, part, &data)?;

        // A digest is marked seen only once delivery succeeds; a failed
        // first occurrence must not mask later parts carrying the same SHA1.
        if let Some(seen) = seen {
            seen.insert(part.sha1, ());
        }
        Ok(Outcome::Extracted)
    }
}
