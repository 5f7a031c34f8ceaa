//! Layout descriptor parsing: the installation packages of one layer.
//!
//! `layout.toc` at a layer root is a bare tag stream whose install manifest
//! lists the installation chunks. Chunk order defines the package id used
//! inside CAS identifiers.

use std::collections::{BTreeMap, HashMap};
use std::path::{Path, PathBuf};

use toc_parser::dbobject::{self, Record, Value};
use toc_parser::toc::TocFile;
use toc_parser::Guid;
use tracing::{debug, warn};

use crate::error::{Error, Result};
use crate::types::Layer;

/// One installation package, identified by its index in the layer's list.
#[derive(Debug, Clone)]
pub struct Package {
    pub index: u32,
    pub id: Guid,
    pub name: String,
    /// Package directory relative to the layer root.
    pub path: String,
    /// Shared superbundles, paths relative to the layer root.
    pub superbundles: Vec<String>,
    /// Split superbundles, paths relative to the package directory once the
    /// platform prefix is stripped.
    pub split_superbundles: Vec<String>,
    /// Package ids this package depends on, same layer, declaration order.
    pub dependencies: Vec<u32>,
    /// Whether the package directory exists on disk.
    pub available: bool,
    /// Discovered `cas_NN.cas` files keyed by their 1-based index.
    pub cas_files: BTreeMap<u32, PathBuf>,
}

impl Package {
    /// Absolute directory of this package below `layer_root`.
    pub fn dir(&self, layer_root: &Path) -> PathBuf {
        layer_root.join(&self.path)
    }
}

/// All packages of one layer.
#[derive(Debug, Clone)]
pub struct LayerLayout {
    pub layer: Layer,
    /// Absolute layer root, `<game>/Data` or `<game>/Patch`.
    pub root: PathBuf,
    pub packages: Vec<Package>,
}

impl LayerLayout {
    /// Load the layer's layout descriptor; `None` when the layer is not part
    /// of the installation.
    pub fn load(game_root: &Path, layer: Layer) -> Result<Option<Self>> {
        let root = game_root.join(layer.dir_name());
        let layout_path = root.join("layout.toc");
        if !layout_path.is_file() {
            return Ok(None);
        }

        debug!("reading layout {}", layout_path.display());
        let toc = TocFile::open(&layout_path)?;
        let packages = parse_packages(&root, toc.body())?;
        debug!("layer {layer} declares {} packages", packages.len());

        Ok(Some(Self {
            layer,
            root,
            packages,
        }))
    }

    pub fn package_by_name(&self, name: &str) -> Option<&Package> {
        self.packages.iter().find(|p| p.name == name)
    }
}

fn parse_packages(layer_root: &Path, body: &[u8]) -> Result<Vec<Package>> {
    let root = dbobject::parse_root(body)?;
    let root = root
        .as_object()
        .ok_or_else(|| Error::FormatMismatch("layout root is not an object".into()))?;

    let manifest = require_object(root, "installManifest", "layout")?;
    manifest.log_unknown_fields("installManifest", &["installChunks"]);
    let chunks = manifest
        .get("installChunks")
        .and_then(Value::as_list)
        .ok_or_else(|| {
            Error::FormatMismatch("install manifest carries no installChunks list".into())
        })?;

    let mut packages = Vec::with_capacity(chunks.len());
    for (index, chunk) in chunks.iter().enumerate() {
        let record = chunk.as_object().ok_or_else(|| {
            Error::FormatMismatch(format!("install chunk {index} is not an object"))
        })?;
        record.log_unknown_fields(
            "installChunk",
            &[
                "id",
                "name",
                "installBundle",
                "superbundles",
                "splitSuperbundles",
                "requiredChunks",
            ],
        );
        packages.push(parse_package(layer_root, index as u32, record)?);
    }

    // Package names key the cross-layer shadowing relationship, so within a
    // layer they must be unique.
    {
        let mut seen: HashMap<&str, u32> = HashMap::new();
        for package in &packages {
            if let Some(previous) = seen.insert(package.name.as_str(), package.index) {
                return Err(Error::FormatMismatch(format!(
                    "package name {:?} declared by both package {previous} and {}",
                    package.name, package.index
                )));
            }
        }
    }

    resolve_dependencies(&mut packages, chunks)?;
    Ok(packages)
}

fn parse_package(layer_root: &Path, index: u32, record: &Record) -> Result<Package> {
    let id = *record
        .get("id")
        .and_then(Value::as_guid)
        .ok_or_else(|| Error::FormatMismatch(format!("install chunk {index} has no id")))?;
    let name = record
        .get("name")
        .and_then(Value::as_str)
        .ok_or_else(|| Error::FormatMismatch(format!("install chunk {index} has no name")))?
        .to_string();
    let path = record
        .get("installBundle")
        .and_then(Value::as_str)
        .ok_or_else(|| {
            Error::FormatMismatch(format!("install chunk {index} has no installBundle"))
        })?
        .to_string();

    let superbundles = match record.get("superbundles").and_then(Value::as_list) {
        Some(entries) => entries
            .iter()
            .map(|entry| {
                entry.as_str().map(str::to_string).ok_or_else(|| {
                    Error::FormatMismatch(format!(
                        "install chunk {index} superbundle entry is not a string"
                    ))
                })
            })
            .collect::<Result<_>>()?,
        None => Vec::new(),
    };

    let split_superbundles = match record.get("splitSuperbundles").and_then(Value::as_list) {
        Some(entries) => entries
            .iter()
            .map(|entry| {
                entry
                    .as_object()
                    .and_then(|obj| obj.get("superbundle"))
                    .and_then(Value::as_str)
                    .map(strip_platform_prefix)
                    .ok_or_else(|| {
                        Error::FormatMismatch(format!(
                            "install chunk {index} split superbundle entry has no name"
                        ))
                    })
            })
            .collect::<Result<_>>()?,
        None => Vec::new(),
    };

    let package_dir = layer_root.join(&path);
    let available = package_dir.is_dir();
    let cas_files = if available {
        discover_cas_files(&package_dir)?
    } else {
        warn!("package {} unavailable at {}", name, package_dir.display());
        BTreeMap::new()
    };

    debug!(
        "package {index} {name:?}: {} CAS files, {} superbundles, {} split",
        cas_files.len(),
        superbundles.len(),
        split_superbundles.len()
    );

    Ok(Package {
        index,
        id,
        name,
        path,
        superbundles,
        split_superbundles,
        dependencies: Vec::new(),
        available,
        cas_files,
    })
}

/// Map `requiredChunks` GUID references back to package ids within the layer.
fn resolve_dependencies(packages: &mut [Package], chunks: &[Value]) -> Result<()> {
    let by_guid: HashMap<Guid, u32> = packages
        .iter()
        .map(|package| (package.id, package.index))
        .collect();

    for (package, chunk) in packages.iter_mut().zip(chunks) {
        let Some(required) = chunk
            .as_object()
            .and_then(|record| record.get("requiredChunks"))
            .and_then(Value::as_list)
        else {
            continue;
        };

        for entry in required {
            let guid = entry.as_guid().ok_or_else(|| {
                Error::FormatMismatch(format!(
                    "package {} requiredChunks entry is not an id",
                    package.index
                ))
            })?;
            match by_guid.get(guid) {
                Some(&dep) if dep != package.index => package.dependencies.push(dep),
                Some(_) => {}
                None => warn!(
                    "package {} requires unknown chunk {guid}, edge dropped",
                    package.name
                ),
            }
        }
    }
    Ok(())
}

/// Split superbundle paths carry a platform directory the package layout
/// does not.
fn strip_platform_prefix(name: &str) -> String {
    match name.split_once('/') {
        Some((_, rest)) => rest.to_string(),
        None => name.to_string(),
    }
}

/// Discover `cas_NN.cas` files in a package directory.
fn discover_cas_files(dir: &Path) -> Result<BTreeMap<u32, PathBuf>> {
    let mut out = BTreeMap::new();
    for entry in std::fs::read_dir(dir)? {
        let entry = entry?;
        let path = entry.path();
        if !path.is_file() {
            continue;
        }
        let Some(name) = path.file_name().and_then(|n| n.to_str()) else {
            continue;
        };
        let Some(index) = name
            .strip_prefix("cas_")
            .and_then(|rest| rest.strip_suffix(".cas"))
            .and_then(|digits| digits.parse::<u32>().ok())
        else {
            continue;
        };
        if index == 0 {
            warn!("ignoring CAS file with index zero: {}", path.display());
            continue;
        }
        out.insert(index, path);
    }
    Ok(out)
}

fn require_object<'r>(record: &'r Record, name: &str, context: &str) -> Result<&'r Record> {
    record
        .get(name)
        .and_then(Value::as_object)
        .ok_or_else(|| Error::FormatMismatch(format!("{context} carries no {name} object")))
}
