//! CAS identifier resolution across layers.

use std::collections::HashMap;
use std::path::{Path, PathBuf};

use tracing::debug;

use crate::error::{Error, Result};
use crate::layout::LayerLayout;
use crate::types::{CasId, Layer, MAX_CAS_INDEX, MAX_PACKAGE_ID};

/// Maps decoded CAS identifiers to physical archive paths.
///
/// Built once from the layer layouts. Patch shadows Data: when both layers
/// carry a CAS file for the same `(package, file index)` tuple, the Patch
/// path wins.
#[derive(Debug, Default)]
pub struct CasResolver {
    data: HashMap<(u32, u32), PathBuf>,
    patch: HashMap<(u32, u32), PathBuf>,
    data_packages: HashMap<String, u32>,
    patch_packages: HashMap<String, u32>,
}

impl CasResolver {
    pub fn build(data: &LayerLayout, patch: Option<&LayerLayout>) -> Result<Self> {
        let mut resolver = Self::default();
        resolver.add_layer(data)?;
        if let Some(patch) = patch {
            resolver.add_layer(patch)?;
        }
        debug!(
            "resolver holds {} Data and {} Patch CAS files",
            resolver.data.len(),
            resolver.patch.len()
        );
        Ok(resolver)
    }

    /// Register one layer, asserting that every observed value fits the
    /// identifier bit widths.
    fn add_layer(&mut self, layout: &LayerLayout) -> Result<()> {
        if layout.packages.len() as u64 > u64::from(MAX_PACKAGE_ID) + 1 {
            return Err(Error::FormatMismatch(format!(
                "layer {} declares {} packages, identifier field carries at most {}",
                layout.layer,
                layout.packages.len(),
                MAX_PACKAGE_ID + 1
            )));
        }

        let (files, names) = match layout.layer {
            Layer::Data => (&mut self.data, &mut self.data_packages),
            Layer::Patch => (&mut self.patch, &mut self.patch_packages),
        };

        for package in &layout.packages {
            names.insert(package.name.clone(), package.index);
            for (&index, path) in &package.cas_files {
                if index > MAX_CAS_INDEX {
                    return Err(Error::FormatMismatch(format!(
                        "package {} holds {}, identifier field carries at most index {}",
                        package.name,
                        path.display(),
                        MAX_CAS_INDEX
                    )));
                }
                files.insert((package.index, index), path.clone());
            }
        }
        Ok(())
    }

    /// Package id for a name within one layer.
    pub fn package_id(&self, layer: Layer, name: &str) -> Option<u32> {
        match layer {
            Layer::Data => self.data_packages.get(name).copied(),
            Layer::Patch => self.patch_packages.get(name).copied(),
        }
    }

    /// Whether `id` decodes to a CAS file present in either layer.
    pub fn is_known(&self, id: CasId) -> bool {
        if !id.is_plausible() {
            return false;
        }
        let key = (id.package_id(), id.file_index());
        self.patch.contains_key(&key) || self.data.contains_key(&key)
    }

    /// Resolve an identifier to a physical path, Patch layer first.
    pub fn resolve(&self, id: CasId) -> Result<&Path> {
        if !id.is_plausible() {
            return Err(Error::FormatMismatch(format!(
                "CAS identifier {id} does not decompose"
            )));
        }
        let key = (id.package_id(), id.file_index());
        if let Some(path) = self.patch.get(&key) {
            return Ok(path);
        }
        if let Some(path) = self.data.get(&key) {
            return Ok(path);
        }
        Err(Error::BundleUnavailable(format!(
            "no CAS file on disk for {id}"
        )))
    }
}
