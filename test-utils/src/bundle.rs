//! SB bundle body builder.

use crate::tag;

const SB_MAGIC: u32 = 0x0000_0020;
const BUNDLE_META_MAGIC: u32 = 0x9D79_8ED6;

#[derive(Debug, Clone, Default)]
pub struct EbxSpec {
    pub sha1: [u8; 20],
    pub name: String,
    pub uncompressed_size: u32,
    /// `Some` switches the locator stream to a new CAS before this entry.
    pub cas_id: Option<u32>,
    pub offset: u32,
    pub size: u32,
}

#[derive(Debug, Clone, Default)]
pub struct ResSpec {
    pub sha1: [u8; 20],
    pub name: String,
    pub uncompressed_size: u32,
    pub content_type: u32,
    pub meta: [u8; 16],
    pub rid: u64,
    pub cas_id: Option<u32>,
    pub offset: u32,
    pub size: u32,
}

#[derive(Debug, Clone, Default)]
pub struct ChunkSpec {
    pub sha1: [u8; 20],
    pub uid: [u8; 16],
    pub range_start: u16,
    pub logical_size: u16,
    pub logical_offset: u32,
    pub h32: Option<u32>,
    pub first_mip: Option<u32>,
    pub cas_id: Option<u32>,
    pub offset: u32,
    pub size: u32,
}

/// Builds one bundle container as it appears inside an SB file.
#[derive(Debug, Clone)]
pub struct BundleBodyBuilder {
    first_cas_id: u32,
    ebx: Vec<EbxSpec>,
    res: Vec<ResSpec>,
    chunks: Vec<ChunkSpec>,
}

impl BundleBodyBuilder {
    /// `first_cas_id` opens the locator payload stream.
    pub fn new(first_cas_id: u32) -> Self {
        Self {
            first_cas_id,
            ebx: Vec::new(),
            res: Vec::new(),
            chunks: Vec::new(),
        }
    }

    pub fn ebx(mut self, spec: EbxSpec) -> Self {
        self.ebx.push(spec);
        self
    }

    pub fn res(mut self, spec: ResSpec) -> Self {
        self.res.push(spec);
        self
    }

    pub fn chunk(mut self, spec: ChunkSpec) -> Self {
        self.chunks.push(spec);
        self
    }

    pub fn build(&self) -> Vec<u8> {
        let total = self.ebx.len() + self.res.len() + self.chunks.len();

        // String section, offsets relative to its start.
        let mut strings = Vec::new();
        let name_offset = |strings: &mut Vec<u8>, name: &str| {
            let offset = strings.len() as u32;
            strings.extend_from_slice(name.as_bytes());
            strings.push(0);
            offset
        };
        let ebx_names: Vec<u32> = self
            .ebx
            .iter()
            .map(|e| name_offset(&mut strings, &e.name))
            .collect();
        let res_names: Vec<u32> = self
            .res
            .iter()
            .map(|r| name_offset(&mut strings, &r.name))
            .collect();

        let chunk_meta = if self.chunks.is_empty() {
            Vec::new()
        } else {
            let items: Vec<Vec<u8>> = self
                .chunks
                .iter()
                .map(|chunk| {
                    let mut fields = Vec::new();
                    if let Some(h32) = chunk.h32 {
                        fields.push(tag::u32(Some("h32"), h32));
                    }
                    let mut meta_fields = Vec::new();
                    if let Some(first_mip) = chunk.first_mip {
                        meta_fields.push(tag::u32(Some("firstMip"), first_mip));
                    }
                    fields.push(tag::object(Some("meta"), &meta_fields));
                    tag::object(None, &fields)
                })
                .collect();
            tag::list(Some("chunkMeta"), &items)
        };

        // Meta block layout, offsets relative to its start.
        let fixed_size = 32
            + 20 * total
            + 8 * (self.ebx.len() + self.res.len())
            + (4 + 16 + 8) * self.res.len()
            + 24 * self.chunks.len();
        let chunk_meta_rel = fixed_size as u32;
        let strings_rel = fixed_size + chunk_meta.len();

        let mut meta = Vec::with_capacity(strings_rel + strings.len());
        meta.extend_from_slice(&BUNDLE_META_MAGIC.to_be_bytes());
        meta.extend_from_slice(&(total as u32).to_be_bytes());
        meta.extend_from_slice(&(self.ebx.len() as u32).to_be_bytes());
        meta.extend_from_slice(&(self.res.len() as u32).to_be_bytes());
        meta.extend_from_slice(&(self.chunks.len() as u32).to_be_bytes());
        meta.extend_from_slice(&(strings_rel as u32).to_be_bytes());
        meta.extend_from_slice(&chunk_meta_rel.to_be_bytes());
        meta.extend_from_slice(&(chunk_meta.len() as u32).to_be_bytes());

        for sha1 in self
            .ebx
            .iter()
            .map(|e| &e.sha1)
            .chain(self.res.iter().map(|r| &r.sha1))
            .chain(self.chunks.iter().map(|c| &c.sha1))
        {
            meta.extend_from_slice(sha1);
        }

        for (spec, name) in self.ebx.iter().zip(&ebx_names) {
            meta.extend_from_slice(&name.to_be_bytes());
            meta.extend_from_slice(&spec.uncompressed_size.to_be_bytes());
        }
        for (spec, name) in self.res.iter().zip(&res_names) {
            meta.extend_from_slice(&name.to_be_bytes());
            meta.extend_from_slice(&spec.uncompressed_size.to_be_bytes());
        }
        for spec in &self.res {
            meta.extend_from_slice(&spec.content_type.to_be_bytes());
        }
        for spec in &self.res {
            meta.extend_from_slice(&spec.meta);
        }
        for spec in &self.res {
            meta.extend_from_slice(&spec.rid.to_be_bytes());
        }
        for spec in &self.chunks {
            meta.extend_from_slice(&spec.uid);
            meta.extend_from_slice(&spec.range_start.to_be_bytes());
            meta.extend_from_slice(&spec.logical_size.to_be_bytes());
            meta.extend_from_slice(&spec.logical_offset.to_be_bytes());
        }
        meta.extend_from_slice(&chunk_meta);
        meta.extend_from_slice(&strings);

        // Locator payload.
        let mut payload = self.first_cas_id.to_be_bytes().to_vec();
        let locators = self
            .ebx
            .iter()
            .map(|e| (e.cas_id, e.offset, e.size))
            .chain(self.res.iter().map(|r| (r.cas_id, r.offset, r.size)))
            .chain(self.chunks.iter().map(|c| (c.cas_id, c.offset, c.size)));
        for (cas_id, offset, size) in locators {
            if let Some(cas_id) = cas_id {
                payload.extend_from_slice(&cas_id.to_be_bytes());
            }
            payload.extend_from_slice(&offset.to_be_bytes());
            payload.extend_from_slice(&size.to_be_bytes());
        }

        // Container: 8 header words, the meta size word, meta block, payload.
        let bundle_len = 32 + 4 + meta.len() + payload.len();
        let mut out = Vec::with_capacity(bundle_len);
        out.extend_from_slice(&SB_MAGIC.to_be_bytes());
        out.extend_from_slice(&0u32.to_be_bytes());
        out.extend_from_slice(&(bundle_len as u32).to_be_bytes());
        out.extend_from_slice(&(total as u32).to_be_bytes());
        out.extend_from_slice(&[0; 16]);
        out.extend_from_slice(&(meta.len() as u32).to_be_bytes());
        out.extend_from_slice(&meta);
        out.extend_from_slice(&payload);
        out
    }
}
