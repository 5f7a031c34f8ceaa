//! Layout resolution, CAS reading and asset extraction for Frostbite game
//! trees.
//!
//! A game tree holds two layered layouts, `Data` and `Patch`, each made of
//! installation packages that reference superbundles; superbundles group
//! bundles, and bundles list the EBX, RES and CHUNK parts whose compressed
//! bytes live inside `cas_NN.cas` archives. [`GameStorage::open`] resolves
//! the whole graph up front; [`GameStorage::extract`] then streams every
//! part through the chunk pipeline into an [`OutputSink`].
//!
//! ```no_run
//! use std::sync::Arc;
//! use cas_storage::{ExtractOptions, GameStorage, StorageConfig};
//!
//! # struct Vendor;
//! # impl caszip::Decompressor for Vendor {
//! #     fn decompress(&self, _: &[u8], _: u64) -> caszip::Result<Vec<u8>> { unimplemented!() }
//! # }
//! # struct Sink;
//! # impl cas_storage::OutputSink for Sink {
//! #     fn deliver(
//! #         &self,
//! #         _: cas_storage::PartKind,
//! #         _: cas_storage::PartIdentity<'_>,
//! #         _: &cas_storage::Part,
//! #         _: &[u8],
//! #     ) -> std::io::Result<()> { Ok(()) }
//! # }
//! # fn main() -> cas_storage::Result<()> {
//! let storage = GameStorage::open(StorageConfig::new("/games/anthem"), Arc::new(Vendor))?;
//! let summary = storage.extract(&Sink, &ExtractOptions::default())?;
//! println!("{} parts extracted", summary.extracted);
//! # Ok(())
//! # }
//! ```

pub mod cas;
pub mod config;
pub mod error;
pub mod extract;
pub mod graph;
pub mod layout;
pub mod resolver;
pub mod types;

pub use cas::CasReader;
pub use config::StorageConfig;
pub use error::{Error, Result};
pub use extract::{ExtractOptions, ExtractionSummary, OutputSink, PartIdentity};
pub use graph::{
    Bundle, GameStorage, Part, PartDetail, PartKind, PartRef, Superbundle, SuperbundleKind,
};
pub use layout::{LayerLayout, Package};
pub use resolver::CasResolver;
pub use toc_parser::{Guid, Sha1};
pub use types::{CasId, Layer};
