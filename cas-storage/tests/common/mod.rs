//! Shared helpers for the integration tests.
#![allow(dead_code)]

use std::sync::Arc;

use cas_storage::{GameStorage, OutputSink, PartIdentity, PartKind, StorageConfig};
use parking_lot::Mutex;
use test_utils::{GameFixture, InstallChunkSpec, SuperbundleTocBuilder, ZlibDecompressor};

/// Raw CAS identifier for a Data-layer file.
pub fn data_cas_id(package: u32, index: u32) -> u32 {
    (package << 8) | index
}

/// Write `layout.toc` for one layer.
pub fn write_layout(fx: &GameFixture, layer: &str, chunks: &[InstallChunkSpec]) {
    fx.write(
        &format!("{layer}/layout.toc"),
        &test_utils::layout_toc(chunks),
    );
}

/// Write a shared superbundle holding one bundle that spans the whole SB.
pub fn write_single_bundle_sb(
    fx: &GameFixture,
    layer: &str,
    sb_name: &str,
    bundle_name: &str,
    body: &[u8],
) {
    fx.write(&format!("{layer}/{sb_name}.sb"), body);
    fx.write(
        &format!("{layer}/{sb_name}.toc"),
        &SuperbundleTocBuilder::new()
            .bundle(bundle_name, 0, 0, body.len() as u32)
            .build_toc(),
    );
}

pub fn open_storage(fx: &GameFixture) -> cas_storage::Result<GameStorage> {
    GameStorage::open(StorageConfig::new(fx.root()), Arc::new(ZlibDecompressor))
}

/// Sink collecting everything delivered to it.
#[derive(Default)]
pub struct MemorySink {
    items: Mutex<Vec<(PartKind, String, Vec<u8>)>>,
}

impl MemorySink {
    pub fn new() -> Self {
        Self::default()
    }

    /// Delivered items as `(kind, identity, bytes)` sorted by identity.
    pub fn into_items(self) -> Vec<(PartKind, String, Vec<u8>)> {
        let mut items = self.items.into_inner();
        items.sort_by(|a, b| a.1.cmp(&b.1));
        items
    }

    pub fn bytes_for(&self, identity: &str) -> Option<Vec<u8>> {
        self.items
            .lock()
            .iter()
            .find(|(_, id, _)| id == identity)
            .map(|(_, _, data)| data.clone())
    }

    pub fn len(&self) -> usize {
        self.items.lock().len()
    }
}

impl OutputSink for MemorySink {
    fn deliver(
        &self,
        kind: PartKind,
        identity: PartIdentity<'_>,
        _part: &cas_storage::Part,
        data: &[u8],
    ) -> std::io::Result<()> {
        let identity = match identity {
            PartIdentity::Path(path) => path.to_string(),
            PartIdentity::Uid(uid) => uid.to_string(),
            PartIdentity::Sha1(sha1) => sha1.to_string(),
        };
        self.items.lock().push((kind, identity, data.to_vec()));
        Ok(())
    }
}
