//! Common types used throughout the storage layer

use std::fmt;

/// Bits of the CAS identifier carrying the 1-based file index.
pub const CAS_INDEX_BITS: u32 = 8;

/// Bits carrying the package id.
pub const PACKAGE_BITS: u32 = 8;

/// Shift of the layer id field.
pub const LAYER_SHIFT: u32 = CAS_INDEX_BITS + PACKAGE_BITS;

/// Largest package id the identifier scheme can carry.
pub const MAX_PACKAGE_ID: u32 = (1 << PACKAGE_BITS) - 1;

/// Largest CAS file index the identifier scheme can carry.
pub const MAX_CAS_INDEX: u32 = (1 << CAS_INDEX_BITS) - 1;

/// Layer of the installation tree. Patch shadows Data.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Layer {
    Data = 0,
    Patch = 1,
}

impl Layer {
    pub fn from_id(id: u32) -> Option<Self> {
        match id {
            0 => Some(Layer::Data),
            1 => Some(Layer::Patch),
            _ => None,
        }
    }

    pub fn id(self) -> u32 {
        self as u32
    }

    /// Directory below the game root holding this layer.
    pub fn dir_name(self) -> &'static str {
        match self {
            Layer::Data => "Data",
            Layer::Patch => "Patch",
        }
    }
}

impl fmt::Display for Layer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.dir_name())
    }
}

/// 32-bit locator of a physical CAS file: layer id, package id, file index.
///
/// The field widths are fixed for this title; initialization asserts that
/// every observed value fits them.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct CasId(u32);

impl CasId {
    pub fn new(raw: u32) -> Self {
        Self(raw)
    }

    pub fn from_parts(layer: Layer, package_id: u32, file_index: u32) -> Self {
        debug_assert!(package_id <= MAX_PACKAGE_ID);
        debug_assert!(file_index >= 1 && file_index <= MAX_CAS_INDEX);
        Self((layer.id() << LAYER_SHIFT) | (package_id << CAS_INDEX_BITS) | file_index)
    }

    pub fn raw(self) -> u32 {
        self.0
    }

    pub fn layer_id(self) -> u32 {
        self.0 >> LAYER_SHIFT
    }

    pub fn package_id(self) -> u32 {
        (self.0 >> CAS_INDEX_BITS) & MAX_PACKAGE_ID
    }

    /// 1-based CAS file index; zero is not a valid file.
    pub fn file_index(self) -> u32 {
        self.0 & MAX_CAS_INDEX
    }

    /// Whether the decomposition is structurally sound: a known layer id and
    /// a non-zero file index.
    pub fn is_plausible(self) -> bool {
        self.file_index() >= 1 && Layer::from_id(self.layer_id()).is_some()
    }

    /// On-disk name of the CAS file this identifier points at.
    pub fn file_name(self) -> String {
        format!("cas_{:02}.cas", self.file_index())
    }
}

impl fmt::Display for CasId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{:#010x} (layer {}, package {}, file {})",
            self.0,
            self.layer_id(),
            self.package_id(),
            self.file_index()
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn decomposition_round_trip() {
        for (layer, package, index) in [
            (Layer::Data, 0, 1),
            (Layer::Data, 3, 12),
            (Layer::Patch, 0, 1),
            (Layer::Patch, 255, 255),
        ] {
            let id = CasId::from_parts(layer, package, index);
            assert_eq!(id.layer_id(), layer.id());
            assert_eq!(id.package_id(), package);
            assert_eq!(id.file_index(), index);
            assert_eq!(CasId::new(id.raw()), id);
        }
    }

    #[test]
    fn plausibility() {
        assert!(CasId::from_parts(Layer::Data, 1, 1).is_plausible());
        // Zero file index.
        assert!(!CasId::new(0x0000_0100).is_plausible());
        // Layer id 2.
        assert!(!CasId::new(0x0002_0101).is_plausible());
    }

    #[test]
    fn file_name_is_zero_padded() {
        assert_eq!(CasId::from_parts(Layer::Data, 0, 1).file_name(), "cas_01.cas");
        assert_eq!(CasId::from_parts(Layer::Data, 0, 117).file_name(), "cas_117.cas");
    }
}
