//! The in-memory game graph.
//!
//! Built once from the layout descriptors, the referenced TOCs and their SB
//! companions; immutable afterwards. Construction runs in four phases with a
//! barrier between each: layouts, TOCs, SB bodies, cross-linking. Errors in
//! the first two phases abort; an SB that fails to parse only demotes its
//! superbundle to unavailable.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use caszip::Decompressor;
use toc_parser::bundle::{self, BundleContent, Locator};
use toc_parser::index::SuperbundleIndex;
use toc_parser::toc::TocFile;
use toc_parser::{Guid, Sha1};
use tracing::{debug, info, warn};

use crate::cas::CasReader;
use crate::config::StorageConfig;
use crate::error::{Error, Result};
use crate::layout::{LayerLayout, Package};
use crate::resolver::CasResolver;
use crate::types::{CasId, Layer};

/// Category of an extractable part.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PartKind {
    Ebx,
    Res,
    Chunk,
    TocResource,
}

/// Kind-specific part metadata.
#[derive(Debug, Clone)]
pub enum PartDetail {
    Ebx {
        name: String,
        uncompressed_size: u64,
    },
    Res {
        name: String,
        uncompressed_size: u64,
        content_type: u32,
        /// Opaque blob, carried verbatim.
        meta: [u8; 16],
        rid: u64,
    },
    Chunk {
        uid: Guid,
        range_start: u16,
        logical_size: u16,
        logical_offset: u32,
        h32: Option<u32>,
        first_mip: Option<u32>,
    },
    TocResource,
}

/// One addressable asset fragment.
#[derive(Debug, Clone)]
pub struct Part {
    pub kind: PartKind,
    pub sha1: Sha1,
    pub cas_id: CasId,
    pub offset: u64,
    pub compressed_size: u64,
    /// Opaque flags word; populated for TOC resources.
    pub flags: u32,
    pub detail: PartDetail,
}

impl Part {
    /// Declared uncompressed size, when the format records one up front.
    pub fn uncompressed_size(&self) -> Option<u64> {
        match &self.detail {
            PartDetail::Ebx {
                uncompressed_size, ..
            }
            | PartDetail::Res {
                uncompressed_size, ..
            } => Some(*uncompressed_size),
            PartDetail::Chunk { .. } | PartDetail::TocResource => None,
        }
    }

    /// Logical slash-separated name, for EBX and RES parts.
    pub fn name(&self) -> Option<&str> {
        match &self.detail {
            PartDetail::Ebx { name, .. } | PartDetail::Res { name, .. } => Some(name),
            _ => None,
        }
    }

    /// Chunk identifier, for CHUNK parts.
    pub fn uid(&self) -> Option<&Guid> {
        match &self.detail {
            PartDetail::Chunk { uid, .. } => Some(uid),
            _ => None,
        }
    }
}

/// A named grouping of parts inside a superbundle.
#[derive(Debug)]
pub struct Bundle {
    pub name: String,
    /// Opaque TOC-side flags word.
    pub flags: u32,
    /// False when the recorded SB range lies outside the physical file,
    /// which is how absent language bundles present.
    pub available: bool,
    parts: Vec<Part>,
    ebx_count: usize,
    res_count: usize,
}

impl Bundle {
    /// All parts in EBX, RES, CHUNKS order.
    pub fn parts(&self) -> &[Part] {
        &self.parts
    }

    pub fn ebx(&self) -> &[Part] {
        &self.parts[..self.ebx_count]
    }

    pub fn res(&self) -> &[Part] {
        &self.parts[self.ebx_count..self.ebx_count + self.res_count]
    }

    pub fn chunks(&self) -> &[Part] {
        &self.parts[self.ebx_count + self.res_count..]
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SuperbundleKind {
    /// Tied to one package, stored inside its directory.
    Split,
    /// Stored at the layer root.
    Shared,
}

/// A named collection of bundles backed by a TOC and an optional SB file.
#[derive(Debug)]
pub struct Superbundle {
    pub name: String,
    pub layer: Layer,
    pub package_id: u32,
    pub kind: SuperbundleKind,
    /// False when the TOC is missing or the SB companion failed to parse.
    pub available: bool,
    pub bundles: Vec<Bundle>,
    /// Free-standing parts declared at TOC level.
    pub resources: Vec<Part>,
}

/// Position of a part inside the graph arena.
#[derive(Debug, Clone, Copy)]
pub struct PartRef {
    pub superbundle: usize,
    /// `None` for TOC resources.
    pub bundle: Option<usize>,
    pub part: usize,
}

/// The resolved game tree: layouts, superbundles, bundles and parts.
pub struct GameStorage {
    config: StorageConfig,
    data: LayerLayout,
    patch: Option<LayerLayout>,
    resolver: Arc<CasResolver>,
    reader: CasReader,
    superbundles: Vec<Superbundle>,
    by_sha1: HashMap<Sha1, PartRef>,
    /// Package traversal order: dependency-topological, Patch layer first.
    package_order: Vec<(Layer, u32)>,
}

impl GameStorage {
    /// Build the graph for the tree at `config.root`.
    ///
    /// The decompressor is acquired by the host for the lifetime of the
    /// storage and the extraction runs driven over it.
    pub fn open(config: StorageConfig, decompressor: Arc<dyn Decompressor>) -> Result<Self> {
        // Phase 1: layouts.
        let data = LayerLayout::load(&config.root, Layer::Data)?.ok_or_else(|| {
            Error::FormatMismatch(format!(
                "no Data layer under {}",
                config.root.display()
            ))
        })?;
        let patch = LayerLayout::load(&config.root, Layer::Patch)?;
        let resolver = Arc::new(CasResolver::build(&data, patch.as_ref())?);
        let reader = CasReader::new(
            resolver.clone(),
            decompressor,
            config.handle_cache_size,
        );

        let package_order = traversal_order(&data, patch.as_ref());

        // Phase 2: parse every referenced TOC.
        let mut pending = Vec::new();
        let mut seen_shared: HashMap<(Layer, String), ()> = HashMap::new();
        for &(layer, package_id) in &package_order {
            let layout = match layer {
                Layer::Data => &data,
                Layer::Patch => match &patch {
                    Some(patch) => patch,
                    None => continue,
                },
            };
            let package = &layout.packages[package_id as usize];
            for name in &package.split_superbundles {
                let toc_path = package.dir(&layout.root).join(format!("{name}.toc"));
                pending.push(load_superbundle(
                    layer,
                    package_id,
                    SuperbundleKind::Split,
                    name,
                    &toc_path,
                )?);
            }
            for name in &package.superbundles {
                if seen_shared
                    .insert((layer, name.clone()), ())
                    .is_some()
                {
                    debug!("shared superbundle {name} already loaded for layer {layer}");
                    continue;
                }
                let toc_path = layout.root.join(format!("{name}.toc"));
                pending.push(load_superbundle(
                    layer,
                    package_id,
                    SuperbundleKind::Shared,
                    name,
                    &toc_path,
                )?);
            }
        }

        // Phase 3: parse SB companions.
        let superbundles: Vec<Superbundle> = pending
            .into_iter()
            .map(|loaded| link_superbundle(loaded, &reader))
            .collect();

        // Phase 4: cross-link.
        let mut by_sha1: HashMap<Sha1, PartRef> = HashMap::new();
        for (sb_index, superbundle) in superbundles.iter().enumerate() {
            for (bundle_index, bundle) in superbundle.bundles.iter().enumerate() {
                for (part_index, part) in bundle.parts.iter().enumerate() {
                    by_sha1.entry(part.sha1).or_insert(PartRef {
                        superbundle: sb_index,
                        bundle: Some(bundle_index),
                        part: part_index,
                    });
                }
            }
            for (part_index, part) in superbundle.resources.iter().enumerate() {
                by_sha1.entry(part.sha1).or_insert(PartRef {
                    superbundle: sb_index,
                    bundle: None,
                    part: part_index,
                });
            }
        }

        let storage = Self {
            config,
            data,
            patch,
            resolver,
            reader,
            superbundles,
            by_sha1,
            package_order,
        };
        info!(
            "game graph ready: {} superbundles, {} bundles, {} parts",
            storage.superbundles.len(),
            storage.bundles().count(),
            storage.by_sha1.len()
        );
        Ok(storage)
    }

    pub fn config(&self) -> &StorageConfig {
        &self.config
    }

    pub fn reader(&self) -> &CasReader {
        &self.reader
    }

    /// Packages in traversal order: dependency-topological, Patch first.
    pub fn packages(&self) -> impl Iterator<Item = (Layer, &Package)> {
        self.package_order.iter().filter_map(move |&(layer, id)| {
            let layout = match layer {
                Layer::Data => Some(&self.data),
                Layer::Patch => self.patch.as_ref(),
            };
            layout.map(|layout| (layer, &layout.packages[id as usize]))
        })
    }

    pub fn superbundles(&self) -> &[Superbundle] {
        &self.superbundles
    }

    /// Superbundles referenced by one package.
    pub fn superbundles_for_package(
        &self,
        layer: Layer,
        package_id: u32,
    ) -> impl Iterator<Item = &Superbundle> {
        self.superbundles
            .iter()
            .filter(move |sb| sb.layer == layer && sb.package_id == package_id)
    }

    /// All bundles across all superbundles.
    pub fn bundles(&self) -> impl Iterator<Item = (&Superbundle, &Bundle)> {
        self.superbundles
            .iter()
            .flat_map(|sb| sb.bundles.iter().map(move |bundle| (sb, bundle)))
    }

    /// All parts, bundle parts first, then TOC resources, in traversal order.
    pub fn parts(&self) -> impl Iterator<Item = &Part> {
        self.superbundles.iter().flat_map(|sb| {
            sb.bundles
                .iter()
                .flat_map(|bundle| bundle.parts.iter())
                .chain(sb.resources.iter())
        })
    }

    /// Look up a part by its content digest.
    pub fn part_by_sha1(&self, sha1: &Sha1) -> Option<&Part> {
        let part_ref = self.by_sha1.get(sha1)?;
        self.part(*part_ref)
    }

    /// Resolve an arena reference.
    pub fn part(&self, part_ref: PartRef) -> Option<&Part> {
        let superbundle = self.superbundles.get(part_ref.superbundle)?;
        match part_ref.bundle {
            Some(bundle) => superbundle.bundles.get(bundle)?.parts.get(part_ref.part),
            None => superbundle.resources.get(part_ref.part),
        }
    }

    /// Look up a bundle by superbundle and bundle name.
    pub fn bundle(&self, superbundle: &str, name: &str) -> Option<&Bundle> {
        self.superbundles
            .iter()
            .filter(|sb| sb.name == superbundle)
            .flat_map(|sb| sb.bundles.iter())
            .find(|bundle| bundle.name == name)
    }

    /// Resolve a CAS identifier to the physical archive path.
    pub fn resolve_cas(&self, id: CasId) -> Result<&Path> {
        self.resolver.resolve(id)
    }
}

/// Superbundle with its parsed TOC, waiting for its SB companion.
struct LoadedSuperbundle {
    layer: Layer,
    package_id: u32,
    kind: SuperbundleKind,
    name: String,
    toc_path: PathBuf,
    /// `None` when the TOC file is absent on disk.
    index: Option<SuperbundleIndex>,
}

/// Phase 2: parse one superbundle TOC. Parse errors abort initialization; a
/// missing file only makes the superbundle unavailable.
fn load_superbundle(
    layer: Layer,
    package_id: u32,
    kind: SuperbundleKind,
    name: &str,
    toc_path: &Path,
) -> Result<LoadedSuperbundle> {
    let index = if toc_path.is_file() {
        let toc = TocFile::open(toc_path)?;
        Some(SuperbundleIndex::parse(toc.body())?)
    } else {
        warn!("superbundle {name} unavailable: no {}", toc_path.display());
        None
    };

    Ok(LoadedSuperbundle {
        layer,
        package_id,
        kind,
        name: name.to_string(),
        toc_path: toc_path.to_path_buf(),
        index,
    })
}

/// Phase 3: attach SB bundle bodies. Failures demote the superbundle.
fn link_superbundle(loaded: LoadedSuperbundle, reader: &CasReader) -> Superbundle {
    let mut superbundle = Superbundle {
        name: loaded.name,
        layer: loaded.layer,
        package_id: loaded.package_id,
        kind: loaded.kind,
        available: loaded.index.is_some(),
        bundles: Vec::new(),
        resources: Vec::new(),
    };
    let Some(index) = loaded.index else {
        return superbundle;
    };

    superbundle.resources = index
        .resources
        .iter()
        .map(|entry| Part {
            kind: PartKind::TocResource,
            sha1: entry.sha1,
            cas_id: CasId::new(entry.cas_id),
            offset: entry.offset,
            compressed_size: entry.size,
            flags: entry.flags,
            detail: PartDetail::TocResource,
        })
        .collect();

    if index.bundles.is_empty() {
        return superbundle;
    }

    let sb_path = loaded.toc_path.with_extension("sb");
    let sb = match std::fs::read(&sb_path) {
        Ok(sb) => sb,
        Err(e) => {
            warn!(
                "superbundle {} demoted: cannot read {}: {e}",
                superbundle.name,
                sb_path.display()
            );
            superbundle.available = false;
            return superbundle;
        }
    };

    for slot in &index.bundles {
        if slot.offset + slot.size > sb.len() as u64 {
            debug!(
                "bundle {} lies outside {} ({:#x}+{:#x} > {:#x})",
                slot.name,
                sb_path.display(),
                slot.offset,
                slot.size,
                sb.len()
            );
            superbundle.bundles.push(Bundle {
                name: slot.name.clone(),
                flags: slot.flags,
                available: false,
                parts: Vec::new(),
                ebx_count: 0,
                res_count: 0,
            });
            continue;
        }

        match bundle::parse_bundle(&sb, slot.offset, reader) {
            Ok(content) => superbundle.bundles.push(into_bundle(slot.name.clone(), slot.flags, content)),
            Err(e) => {
                warn!(
                    "superbundle {} demoted: bundle {} failed to parse: {e}",
                    superbundle.name, slot.name
                );
                superbundle.available = false;
                superbundle.bundles.clear();
                return superbundle;
            }
        }
    }
    superbundle
}

fn into_bundle(name: String, flags: u32, content: BundleContent) -> Bundle {
    let ebx_count = content.ebx.len();
    let res_count = content.res.len();
    let mut parts = Vec::with_capacity(content.part_count());

    let common = |locator: Locator| (CasId::new(locator.cas_id), locator.offset, locator.size);

    for entry in content.ebx {
        let (cas_id, offset, compressed_size) = common(entry.locator);
        parts.push(Part {
            kind: PartKind::Ebx,
            sha1: entry.sha1,
            cas_id,
            offset,
            compressed_size,
            flags: 0,
            detail: PartDetail::Ebx {
                name: entry.name,
                uncompressed_size: u64::from(entry.uncompressed_size),
            },
        });
    }
    for entry in content.res {
        let (cas_id, offset, compressed_size) = common(entry.locator);
        parts.push(Part {
            kind: PartKind::Res,
            sha1: entry.sha1,
            cas_id,
            offset,
            compressed_size,
            flags: 0,
            detail: PartDetail::Res {
                name: entry.name,
                uncompressed_size: u64::from(entry.uncompressed_size),
                content_type: entry.content_type,
                meta: entry.meta,
                rid: entry.rid,
            },
        });
    }
    for entry in content.chunks {
        let (cas_id, offset, compressed_size) = common(entry.locator);
        parts.push(Part {
            kind: PartKind::Chunk,
            sha1: entry.sha1,
            cas_id,
            offset,
            compressed_size,
            flags: 0,
            detail: PartDetail::Chunk {
                uid: entry.uid,
                range_start: entry.range_start,
                logical_size: entry.logical_size,
                logical_offset: entry.logical_offset,
                h32: entry.h32,
                first_mip: entry.first_mip,
            },
        });
    }

    Bundle {
        name,
        flags,
        available: true,
        parts,
        ebx_count,
        res_count,
    }
}

/// Dependency-topological package order, Patch layer first; stable by
/// package index, dependencies ahead of dependents.
fn traversal_order(data: &LayerLayout, patch: Option<&LayerLayout>) -> Vec<(Layer, u32)> {
    let mut order = Vec::new();
    if let Some(patch) = patch {
        append_layer_order(&mut order, patch);
    }
    append_layer_order(&mut order, data);
    order
}

fn append_layer_order(order: &mut Vec<(Layer, u32)>, layout: &LayerLayout) {
    let count = layout.packages.len();
    let mut emitted = vec![false; count];
    let mut remaining = count;

    while remaining > 0 {
        let mut progressed = false;
        for package in &layout.packages {
            let index = package.index as usize;
            if emitted[index] {
                continue;
            }
            let ready = package
                .dependencies
                .iter()
                .all(|&dep| emitted.get(dep as usize).copied().unwrap_or(true));
            if ready {
                emitted[index] = true;
                remaining -= 1;
                progressed = true;
                order.push((layout.layer, package.index));
            }
        }
        if !progressed {
            warn!(
                "dependency cycle among packages in layer {}, falling back to declaration order",
                layout.layer
            );
            for package in &layout.packages {
                if !emitted[package.index as usize] {
                    order.push((layout.layer, package.index));
                }
            }
            return;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::layout::Package;
    use std::collections::BTreeMap;

    fn package(index: u32, deps: &[u32]) -> Package {
        Package {
            index,
            id: Guid::new([index as u8; 16]),
            name: format!("pkg{index}"),
            path: format!("pkg{index}"),
            superbundles: Vec::new(),
            split_superbundles: Vec::new(),
            dependencies: deps.to_vec(),
            available: true,
            cas_files: BTreeMap::new(),
        }
    }

    fn layer(layer: Layer, packages: Vec<Package>) -> LayerLayout {
        LayerLayout {
            layer,
            root: PathBuf::from(layer.dir_name()),
            packages,
        }
    }

    #[test]
    fn dependencies_come_first() {
        let data = layer(
            Layer::Data,
            vec![package(0, &[2]), package(1, &[0]), package(2, &[])],
        );
        let order = traversal_order(&data, None);
        assert_eq!(
            order,
            vec![(Layer::Data, 2), (Layer::Data, 0), (Layer::Data, 1)]
        );
    }

    #[test]
    fn patch_layer_comes_first() {
        let data = layer(Layer::Data, vec![package(0, &[])]);
        let patch = layer(Layer::Patch, vec![package(0, &[])]);
        let order = traversal_order(&data, Some(&patch));
        assert_eq!(order, vec![(Layer::Patch, 0), (Layer::Data, 0)]);
    }

    #[test]
    fn cycle_falls_back_to_declaration_order() {
        let data = layer(Layer::Data, vec![package(0, &[1]), package(1, &[0])]);
        let order = traversal_order(&data, None);
        assert_eq!(order, vec![(Layer::Data, 0), (Layer::Data, 1)]);
    }
}
