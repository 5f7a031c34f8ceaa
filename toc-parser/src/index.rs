//! Superbundle TOC index sections.
//!
//! A superbundle TOC body is one indexed container: a section header with
//! absolute offsets into the body, the per-bundle slots pointing into the
//! companion SB file, and the free-standing TOC resources declared outside
//! any bundle. All integers here are big-endian, and every section boundary
//! is checked exactly.

use tracing::debug;

use crate::reader::SliceReader;
use crate::toc::INDEX_MAGIC;
use crate::types::Sha1;
use crate::{Error, Result};

/// TOC-side slot of one bundle: where its body lives inside the SB.
#[derive(Debug, Clone)]
pub struct BundleSlot {
    pub name: String,
    /// Opaque per-bundle flags word.
    pub flags: u32,
    /// Byte offset of the bundle container inside the SB file.
    pub offset: u64,
    /// Byte size of the bundle container.
    pub size: u64,
}

/// A part declared at TOC level, outside any bundle.
#[derive(Debug, Clone)]
pub struct TocResourceEntry {
    pub flags: u32,
    pub sha1: Sha1,
    pub cas_id: u32,
    pub offset: u64,
    pub size: u64,
}

/// Decoded superbundle TOC body.
#[derive(Debug, Clone, Default)]
pub struct SuperbundleIndex {
    pub bundles: Vec<BundleSlot>,
    pub resources: Vec<TocResourceEntry>,
}

impl SuperbundleIndex {
    /// Parse the indexed container at the head of a superbundle TOC body.
    pub fn parse(body: &[u8]) -> Result<Self> {
        let mut r = SliceReader::new(body);

        let magic = r.read_u32_be()?;
        if magic != INDEX_MAGIC {
            return Err(Error::FormatMismatch(format!(
                "expected superbundle index magic {INDEX_MAGIC:#010x}, got {magic:#010x}"
            )));
        }

        let _total_len = r.read_u32_be()?;
        let bundle_count = r.read_u32_be()?;
        let flags_offset = r.read_u32_be()? as usize;
        let sha1_offset = r.read_u32_be()? as usize;
        let resource_count = r.read_u32_be()?;
        let gap_offset = r.read_u32_be()? as usize;
        let locator_offset = r.read_u32_be()? as usize;
        let strings_offset = r.read_u32_be()? as usize;
        let _trailer_offset = r.read_u32_be()?;
        let _trailer_size = r.read_u32_be()?;

        if bundle_count == 0 {
            debug!("superbundle index declares no bundles");
            return Ok(Self::default());
        }
        debug!("superbundle index declares {bundle_count} bundles, {resource_count} resources");

        let refs: Vec<u32> = (0..bundle_count)
            .map(|_| r.read_u32_be())
            .collect::<Result<_>>()?;
        r.skip(4)?;
        r.align(8)?;

        let mut bundles = Vec::with_capacity(bundle_count as usize);
        for flags in refs {
            let name_offset = r.read_u32_be()? as usize;
            let size = r.read_u32_be()?;
            let _ = r.read_u32_be()?;
            let offset = r.read_u32_be()?;
            let name = r.cstring_at(strings_offset + name_offset)?.to_string();
            bundles.push(BundleSlot {
                name,
                flags,
                offset: u64::from(offset),
                size: u64::from(size),
            });
        }

        // TOC resource sections: flag words, digests, then locator triples,
        // each starting exactly where the header said it would.
        r.seek(flags_offset)?;
        let flag_words: Vec<u32> = (0..resource_count)
            .map(|_| r.read_u32_be())
            .collect::<Result<_>>()?;

        expect_offset(&r, sha1_offset, "resource digest section")?;
        let sha1s: Vec<Sha1> = (0..resource_count)
            .map(|_| Ok(Sha1::new(r.read_array()?)))
            .collect::<Result<_>>()?;

        expect_offset(&r, gap_offset, "resource gap section")?;
        if gap_offset != locator_offset {
            return Err(Error::FormatMismatch(format!(
                "unexpected {} bytes between resource digests and locators",
                locator_offset.saturating_sub(gap_offset)
            )));
        }

        let mut resources = Vec::with_capacity(resource_count as usize);
        for (flags, sha1) in flag_words.into_iter().zip(sha1s) {
            let cas_id = r.read_u32_be()?;
            let offset = r.read_u32_be()?;
            let size = r.read_u32_be()?;
            resources.push(TocResourceEntry {
                flags,
                sha1,
                cas_id,
                offset: u64::from(offset),
                size: u64::from(size),
            });
        }
        expect_offset(&r, strings_offset, "string section")?;

        Ok(Self { bundles, resources })
    }
}

fn expect_offset(r: &SliceReader<'_>, expected: usize, what: &str) -> Result<()> {
    if r.position() != expected {
        return Err(Error::FormatMismatch(format!(
            "{what} expected at offset {expected:#x}, cursor at {:#x}",
            r.position()
        )));
    }
    Ok(())
}
