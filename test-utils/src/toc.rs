//! TOC file and superbundle index builders.

use crate::tag;

const TOC_MAGIC: u32 = 0x00D1_CE01;
const TOC_BODY_OFFSET: usize = 0x22C;
const INDEX_MAGIC: u32 = 0x0000_0030;

/// Wrap a body into a complete TOC file: magic, zeroed header region, body.
pub fn toc_file(body: &[u8]) -> Vec<u8> {
    let mut out = TOC_MAGIC.to_be_bytes().to_vec();
    out.resize(TOC_BODY_OFFSET, 0);
    out.extend_from_slice(body);
    out
}

/// One install chunk of a layout descriptor.
#[derive(Debug, Clone, Default)]
pub struct InstallChunkSpec {
    pub id: [u8; 16],
    pub name: String,
    /// Package directory relative to the layer root.
    pub dir: String,
    /// Shared superbundle references, relative to the layer root.
    pub superbundles: Vec<String>,
    /// Split superbundle references, carrying the platform prefix.
    pub split_superbundles: Vec<String>,
    /// GUIDs of packages this one depends on.
    pub required: Vec<[u8; 16]>,
}

/// Build a complete `layout.toc` for the given install chunks.
pub fn layout_toc(chunks: &[InstallChunkSpec]) -> Vec<u8> {
    let chunk_records: Vec<Vec<u8>> = chunks
        .iter()
        .map(|chunk| {
            let mut fields = vec![
                tag::guid(Some("id"), chunk.id),
                tag::string(Some("name"), &chunk.name),
                tag::string(Some("installBundle"), &chunk.dir),
            ];
            if !chunk.superbundles.is_empty() {
                let items: Vec<Vec<u8>> = chunk
                    .superbundles
                    .iter()
                    .map(|name| tag::string(None, name))
                    .collect();
                fields.push(tag::list(Some("superbundles"), &items));
            }
            if !chunk.split_superbundles.is_empty() {
                let items: Vec<Vec<u8>> = chunk
                    .split_superbundles
                    .iter()
                    .map(|name| tag::object(None, &[tag::string(Some("superbundle"), name)]))
                    .collect();
                fields.push(tag::list(Some("splitSuperbundles"), &items));
            }
            if !chunk.required.is_empty() {
                let items: Vec<Vec<u8>> = chunk
                    .required
                    .iter()
                    .map(|&id| tag::guid(None, id))
                    .collect();
                fields.push(tag::list(Some("requiredChunks"), &items));
            }
            tag::object(None, &fields)
        })
        .collect();

    let body = tag::object(
        None,
        &[tag::object(
            Some("installManifest"),
            &[tag::list(Some("installChunks"), &chunk_records)],
        )],
    );
    toc_file(&body)
}

/// Builder for a superbundle TOC body: bundle slots plus TOC resources.
#[derive(Debug, Clone, Default)]
pub struct SuperbundleTocBuilder {
    bundles: Vec<(String, u32, u32, u32)>,
    resources: Vec<(u32, [u8; 20], u32, u32, u32)>,
}

impl SuperbundleTocBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a bundle slot pointing at `offset..offset+size` of the SB file.
    pub fn bundle(mut self, name: &str, flags: u32, offset: u32, size: u32) -> Self {
        self.bundles.push((name.to_string(), flags, offset, size));
        self
    }

    /// Add a free-standing TOC resource.
    pub fn resource(
        mut self,
        flags: u32,
        sha1: [u8; 20],
        cas_id: u32,
        offset: u32,
        size: u32,
    ) -> Self {
        self.resources.push((flags, sha1, cas_id, offset, size));
        self
    }

    /// Encode the indexed container.
    pub fn build_body(&self) -> Vec<u8> {
        let bundle_count = self.bundles.len();
        let resource_count = self.resources.len();

        // String section: bundle names, offsets relative to the section.
        let mut strings = Vec::new();
        let mut name_offsets = Vec::with_capacity(bundle_count);
        for (name, _, _, _) in &self.bundles {
            name_offsets.push(strings.len() as u32);
            strings.extend_from_slice(name.as_bytes());
            strings.push(0);
        }

        const HEADER_SIZE: usize = 44;
        let refs_end = HEADER_SIZE + 4 * bundle_count + 4;
        let records_start = refs_end.next_multiple_of(8);
        let flags_offset = records_start + 16 * bundle_count;
        let sha1_offset = flags_offset + 4 * resource_count;
        let gap_offset = sha1_offset + 20 * resource_count;
        let locator_offset = gap_offset;
        let strings_offset = locator_offset + 12 * resource_count;
        let total_len = strings_offset + strings.len();

        let mut out = Vec::with_capacity(total_len);
        out.extend_from_slice(&INDEX_MAGIC.to_be_bytes());
        out.extend_from_slice(&(total_len as u32).to_be_bytes());
        out.extend_from_slice(&(bundle_count as u32).to_be_bytes());
        out.extend_from_slice(&(flags_offset as u32).to_be_bytes());
        out.extend_from_slice(&(sha1_offset as u32).to_be_bytes());
        out.extend_from_slice(&(resource_count as u32).to_be_bytes());
        out.extend_from_slice(&(gap_offset as u32).to_be_bytes());
        out.extend_from_slice(&(locator_offset as u32).to_be_bytes());
        out.extend_from_slice(&(strings_offset as u32).to_be_bytes());
        out.extend_from_slice(&0u32.to_be_bytes());
        out.extend_from_slice(&0u32.to_be_bytes());

        for (_, flags, _, _) in &self.bundles {
            out.extend_from_slice(&flags.to_be_bytes());
        }
        out.resize(records_start, 0);

        for ((_, _, offset, size), name_offset) in self.bundles.iter().zip(&name_offsets) {
            out.extend_from_slice(&name_offset.to_be_bytes());
            out.extend_from_slice(&size.to_be_bytes());
            out.extend_from_slice(&0u32.to_be_bytes());
            out.extend_from_slice(&offset.to_be_bytes());
        }

        for (flags, _, _, _, _) in &self.resources {
            out.extend_from_slice(&flags.to_be_bytes());
        }
        for (_, sha1, _, _, _) in &self.resources {
            out.extend_from_slice(sha1);
        }
        for (_, _, cas_id, offset, size) in &self.resources {
            out.extend_from_slice(&cas_id.to_be_bytes());
            out.extend_from_slice(&offset.to_be_bytes());
            out.extend_from_slice(&size.to_be_bytes());
        }
        out.extend_from_slice(&strings);

        debug_assert_eq!(out.len(), total_len);
        out
    }

    /// Encode the full `.toc` file.
    pub fn build_toc(&self) -> Vec<u8> {
        toc_file(&self.build_body())
    }
}
