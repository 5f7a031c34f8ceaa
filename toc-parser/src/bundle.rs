//! SB bundle bodies.
//!
//! A bundle container inside an SB file carries the metadata for its EBX,
//! RES and CHUNK entries followed by a locator payload that assigns each
//! entry its CAS identifier, offset and compressed size. Locator entries
//! only sometimes open with a fresh CAS identifier; the ambiguity against
//! plain offsets is resolved by probing the current CAS for a chunk frame
//! header at the candidate offset.

use tracing::{debug, warn};

use crate::dbobject::{self, Value};
use crate::reader::SliceReader;
use crate::toc::SB_MAGIC;
use crate::types::{Guid, Sha1};
use crate::{Error, Result};

/// Magic of the bundle metadata block.
pub const BUNDLE_META_MAGIC: u32 = 0x9D79_8ED6;

/// Probe into the CAS substrate used while decoding locator entries.
pub trait CasProbe {
    /// Whether `id` decodes to a CAS file known to the layout.
    fn is_valid_id(&self, id: u32) -> bool;

    /// Whether a chunk frame header starts at `offset` inside the CAS file
    /// behind `id`. Errors count as "no frame".
    fn has_frame_at(&self, id: u32, offset: u64) -> bool;
}

/// Where a part's compressed bytes live.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Locator {
    pub cas_id: u32,
    pub offset: u64,
    pub size: u64,
}

#[derive(Debug, Clone)]
pub struct EbxEntry {
    pub sha1: Sha1,
    pub name: String,
    pub uncompressed_size: u32,
    pub locator: Locator,
}

#[derive(Debug, Clone)]
pub struct ResEntry {
    pub sha1: Sha1,
    pub name: String,
    pub uncompressed_size: u32,
    pub content_type: u32,
    /// Opaque metadata blob, carried verbatim.
    pub meta: [u8; 16],
    pub rid: u64,
    pub locator: Locator,
}

#[derive(Debug, Clone)]
pub struct ChunkEntry {
    pub sha1: Sha1,
    pub uid: Guid,
    pub range_start: u16,
    pub logical_size: u16,
    pub logical_offset: u32,
    /// From the bundle's chunkMeta record, when present.
    pub h32: Option<u32>,
    pub first_mip: Option<u32>,
    pub locator: Locator,
}

/// Decoded bundle body: three ordered entry lists.
#[derive(Debug, Clone, Default)]
pub struct BundleContent {
    pub ebx: Vec<EbxEntry>,
    pub res: Vec<ResEntry>,
    pub chunks: Vec<ChunkEntry>,
}

impl BundleContent {
    pub fn part_count(&self) -> usize {
        self.ebx.len() + self.res.len() + self.chunks.len()
    }
}

struct NamedHead {
    name: String,
    uncompressed_size: u32,
}

/// Parse the bundle container at `offset` inside the SB bytes.
pub fn parse_bundle(sb: &[u8], offset: u64, probe: &dyn CasProbe) -> Result<BundleContent> {
    let mut r = SliceReader::new(sb);
    r.seek(offset as usize)?;
    let start = r.position();
    debug!("reading bundle container at offset {start:#x}");

    let magic = r.read_u32_be()?;
    if magic != SB_MAGIC {
        return Err(Error::FormatMismatch(format!(
            "expected bundle container magic {SB_MAGIC:#010x} at offset {start:#x}, \
             got {magic:#010x}"
        )));
    }
    let _ = r.read_u32_be()?;
    let bundle_len = r.read_u32_be()? as usize;
    // Entry count, three section offsets, padding.
    r.skip(4 * 5)?;

    let meta_size = r.read_u32_be()? as usize;
    let meta_offset = r.position();
    let meta_magic = r.read_u32_be()?;
    if meta_magic != BUNDLE_META_MAGIC {
        return Err(Error::FormatMismatch(format!(
            "expected bundle meta magic {BUNDLE_META_MAGIC:#010x}, got {meta_magic:#010x}"
        )));
    }
    let total = r.read_u32_be()? as usize;
    let ebx_count = r.read_u32_be()? as usize;
    let res_count = r.read_u32_be()? as usize;
    let chunk_count = r.read_u32_be()? as usize;
    let strings_offset = meta_offset + r.read_u32_be()? as usize;
    let _chunk_meta_offset = r.read_u32_be()?;
    let _chunk_meta_size = r.read_u32_be()?;

    if total != ebx_count + res_count + chunk_count {
        return Err(Error::FormatMismatch(format!(
            "bundle entry counts disagree: {total} total vs \
             {ebx_count} ebx + {res_count} res + {chunk_count} chunks"
        )));
    }

    let sha1s: Vec<Sha1> = (0..total)
        .map(|_| Ok(Sha1::new(r.read_array()?)))
        .collect::<Result<_>>()?;

    let ebx_heads = read_named_heads(&mut r, ebx_count, strings_offset)?;
    let res_heads = read_named_heads(&mut r, res_count, strings_offset)?;

    let content_types: Vec<u32> = (0..res_count)
        .map(|_| r.read_u32_be())
        .collect::<Result<_>>()?;
    let metas: Vec<[u8; 16]> = (0..res_count)
        .map(|_| r.read_array())
        .collect::<Result<_>>()?;
    let rids: Vec<u64> = (0..res_count)
        .map(|_| r.read_u64_be())
        .collect::<Result<_>>()?;

    struct ChunkHead {
        uid: Guid,
        range_start: u16,
        logical_size: u16,
        logical_offset: u32,
    }
    let mut chunk_heads = Vec::with_capacity(chunk_count);
    for _ in 0..chunk_count {
        chunk_heads.push(ChunkHead {
            uid: Guid::new(r.read_array()?),
            range_start: r.read_u16_be()?,
            logical_size: r.read_u16_be()?,
            logical_offset: r.read_u32_be()?,
        });
    }

    let chunk_meta = if chunk_count > 0 {
        read_chunk_meta(&mut r, sb)?
    } else {
        Vec::new()
    };

    if total == 0 {
        return Ok(BundleContent::default());
    }

    // Locator payload: one entry per part in EBX, RES, CHUNKS order. The
    // stream opens with an explicit CAS identifier; later entries may switch
    // to another one.
    r.seek(meta_offset + meta_size)?;
    let mut cas_id = r.read_u32_be()?;
    let mut locators = Vec::with_capacity(total);
    for _ in 0..total {
        let (next_cas_id, offset) = read_locator_entry(&mut r, cas_id, probe)?;
        cas_id = next_cas_id;
        let size = r.read_u32_be()?;
        locators.push(Locator {
            cas_id,
            offset: u64::from(offset),
            size: u64::from(size),
        });
    }

    if r.position() - start != bundle_len {
        return Err(Error::FormatMismatch(format!(
            "bundle payload ends at {:#x}, container declared {:#x}",
            r.position() - start,
            bundle_len
        )));
    }

    let mut locators = locators.into_iter();
    let mut sha1s = sha1s.into_iter();

    let mut content = BundleContent::default();
    for head in ebx_heads {
        content.ebx.push(EbxEntry {
            sha1: next_linked(&mut sha1s)?,
            name: head.name,
            uncompressed_size: head.uncompressed_size,
            locator: next_linked(&mut locators)?,
        });
    }
    for (head, ((content_type, meta), rid)) in res_heads
        .into_iter()
        .zip(content_types.into_iter().zip(metas).zip(rids))
    {
        content.res.push(ResEntry {
            sha1: next_linked(&mut sha1s)?,
            name: head.name,
            uncompressed_size: head.uncompressed_size,
            content_type,
            meta,
            rid,
            locator: next_linked(&mut locators)?,
        });
    }
    for (i, head) in chunk_heads.into_iter().enumerate() {
        let meta = chunk_meta.get(i);
        content.chunks.push(ChunkEntry {
            sha1: next_linked(&mut sha1s)?,
            uid: head.uid,
            range_start: head.range_start,
            logical_size: head.logical_size,
            logical_offset: head.logical_offset,
            h32: meta.and_then(|m| m.h32),
            first_mip: meta.and_then(|m| m.first_mip),
            locator: next_linked(&mut locators)?,
        });
    }

    debug!(
        "bundle holds {} ebx, {} res, {} chunk entries",
        content.ebx.len(),
        content.res.len(),
        content.chunks.len()
    );
    Ok(content)
}

fn next_linked<T>(iter: &mut impl Iterator<Item = T>) -> Result<T> {
    iter.next().ok_or_else(|| {
        Error::FormatMismatch("bundle entry tables are shorter than the entry count".into())
    })
}

fn read_named_heads(
    r: &mut SliceReader<'_>,
    count: usize,
    strings_offset: usize,
) -> Result<Vec<NamedHead>> {
    let mut out = Vec::with_capacity(count);
    for _ in 0..count {
        let name_offset = r.read_u32_be()? as usize;
        let uncompressed_size = r.read_u32_be()?;
        let name = r.cstring_at(strings_offset + name_offset)?.to_string();
        out.push(NamedHead {
            name,
            uncompressed_size,
        });
    }
    Ok(out)
}

struct ChunkMeta {
    h32: Option<u32>,
    first_mip: Option<u32>,
}

/// Decode the bundle's `chunkMeta` tag record: a list with one object per
/// chunk entry.
fn read_chunk_meta(r: &mut SliceReader<'_>, sb: &[u8]) -> Result<Vec<ChunkMeta>> {
    let (name, value, used) = dbobject::parse_one(&sb[r.position()..])?;
    r.skip(used)?;
    if name.as_deref() != Some("chunkMeta") {
        warn!("bundle chunk metadata record is named {name:?}, expected \"chunkMeta\"");
    }

    let items = value.as_list().ok_or_else(|| {
        Error::FormatMismatch("bundle chunkMeta record is not a list".into())
    })?;

    let mut out = Vec::with_capacity(items.len());
    for item in items {
        let record = item.as_object().ok_or_else(|| {
            Error::FormatMismatch("bundle chunkMeta element is not an object".into())
        })?;
        record.log_unknown_fields("chunkMeta", &["h32", "meta"]);
        let h32 = record.get("h32").and_then(Value::as_u32);
        let first_mip = record
            .get("meta")
            .and_then(Value::as_object)
            .and_then(|meta| meta.get("firstMip"))
            .and_then(Value::as_u32);
        out.push(ChunkMeta { h32, first_mip });
    }
    Ok(out)
}

/// A locator entry is an offset, optionally preceded by a fresh CAS
/// identifier. Offsets can collide with the identifier range, so a candidate
/// identifier only wins when the current CAS has no chunk frame at that
/// offset.
fn read_locator_entry(
    r: &mut SliceReader<'_>,
    current: u32,
    probe: &dyn CasProbe,
) -> Result<(u32, u32)> {
    let word = r.read_u32_be()?;
    if probe.is_valid_id(word)
        && probe.is_valid_id(current)
        && !probe.has_frame_at(current, u64::from(word))
    {
        let offset = r.read_u32_be()?;
        return Ok((word, offset));
    }
    Ok((current, word))
}

#[cfg(test)]
mod tests {
    use super::*;
    use test_utils::{BundleBodyBuilder, ChunkSpec, EbxSpec, ResSpec};

    /// Probe accepting a fixed identifier set, with no frames anywhere.
    struct FixedProbe(Vec<u32>);

    impl CasProbe for FixedProbe {
        fn is_valid_id(&self, id: u32) -> bool {
            self.0.contains(&id)
        }

        fn has_frame_at(&self, _id: u32, _offset: u64) -> bool {
            false
        }
    }

    #[test]
    fn empty_bundle() {
        let body = BundleBodyBuilder::new(0x0001_0101).build();
        let content = parse_bundle(&body, 0, &FixedProbe(vec![0x0001_0101])).unwrap();
        assert_eq!(content.part_count(), 0);
    }

    #[test]
    fn entries_and_locators() {
        let body = BundleBodyBuilder::new(0x0001_0101)
            .ebx(EbxSpec {
                sha1: [0x01; 20],
                name: "levels/main/terrain".into(),
                uncompressed_size: 0x40,
                cas_id: None,
                offset: 0x100,
                size: 0x30,
            })
            .res(ResSpec {
                sha1: [0x02; 20],
                name: "textures/rock".into(),
                uncompressed_size: 0x80,
                content_type: 0x5c13_01ea,
                meta: [0x0f; 16],
                rid: 0xdead_beef_0000_0001,
                cas_id: None,
                offset: 0x200,
                size: 0x44,
            })
            .chunk(ChunkSpec {
                sha1: [0x03; 20],
                uid: [0x04; 16],
                range_start: 0,
                logical_size: 0x20,
                logical_offset: 0,
                h32: Some(0x1234),
                first_mip: Some(1),
                cas_id: Some(0x0001_0102),
                offset: 0x10,
                size: 0x28,
            })
            .build();

        let probe = FixedProbe(vec![0x0001_0101, 0x0001_0102]);
        let content = parse_bundle(&body, 0, &probe).unwrap();

        assert_eq!(content.ebx.len(), 1);
        let ebx = &content.ebx[0];
        assert_eq!(ebx.name, "levels/main/terrain");
        assert_eq!(ebx.sha1, Sha1::new([0x01; 20]));
        assert_eq!(ebx.uncompressed_size, 0x40);
        assert_eq!(
            ebx.locator,
            Locator {
                cas_id: 0x0001_0101,
                offset: 0x100,
                size: 0x30
            }
        );

        assert_eq!(content.res.len(), 1);
        let res = &content.res[0];
        assert_eq!(res.name, "textures/rock");
        assert_eq!(res.content_type, 0x5c13_01ea);
        assert_eq!(res.meta, [0x0f; 16]);
        assert_eq!(res.rid, 0xdead_beef_0000_0001);
        assert_eq!(res.locator.cas_id, 0x0001_0101);

        assert_eq!(content.chunks.len(), 1);
        let chunk = &content.chunks[0];
        assert_eq!(chunk.uid, Guid::new([0x04; 16]));
        assert_eq!(chunk.h32, Some(0x1234));
        assert_eq!(chunk.first_mip, Some(1));
        assert_eq!(
            chunk.locator,
            Locator {
                cas_id: 0x0001_0102,
                offset: 0x10,
                size: 0x28
            }
        );
    }

    #[test]
    fn offset_colliding_with_identifier_stays_an_offset() {
        // The entry's offset word happens to decode as a known CAS id, but
        // the current CAS has a frame there, so it must stay an offset.
        struct FrameProbe;
        impl CasProbe for FrameProbe {
            fn is_valid_id(&self, id: u32) -> bool {
                id == 0x0001_0101 || id == 0x0001_0102
            }
            fn has_frame_at(&self, _id: u32, offset: u64) -> bool {
                offset == 0x0001_0102
            }
        }

        let body = BundleBodyBuilder::new(0x0001_0101)
            .ebx(EbxSpec {
                sha1: [0x01; 20],
                name: "fx/glow".into(),
                uncompressed_size: 0x10,
                cas_id: None,
                offset: 0x0001_0102,
                size: 0x18,
            })
            .build();

        let content = parse_bundle(&body, 0, &FrameProbe).unwrap();
        let locator = content.ebx[0].locator;
        assert_eq!(locator.cas_id, 0x0001_0101);
        assert_eq!(locator.offset, 0x0001_0102);
    }

    #[test]
    fn wrong_container_magic_is_mismatch() {
        let mut body = BundleBodyBuilder::new(0x0001_0101).build();
        body[3] = 0x21;
        let err = parse_bundle(&body, 0, &FixedProbe(vec![0x0001_0101])).unwrap_err();
        assert!(matches!(err, Error::FormatMismatch(_)), "actual error: {err:?}");
    }

    #[test]
    fn length_drift_is_mismatch() {
        let mut body = BundleBodyBuilder::new(0x0001_0101)
            .ebx(EbxSpec {
                sha1: [0x01; 20],
                name: "fx/glow".into(),
                uncompressed_size: 0x10,
                cas_id: None,
                offset: 0x100,
                size: 0x18,
            })
            .build();
        // Grow the declared container length (header word 3).
        let declared = u32::from_be_bytes([body[8], body[9], body[10], body[11]]);
        body[8..12].copy_from_slice(&(declared + 4).to_be_bytes());
        body.extend_from_slice(&[0; 4]);

        let err = parse_bundle(&body, 0, &FixedProbe(vec![0x0001_0101])).unwrap_err();
        assert!(matches!(err, Error::FormatMismatch(_)), "actual error: {err:?}");
    }
}
