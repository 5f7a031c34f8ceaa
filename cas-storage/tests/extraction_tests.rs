//! End-to-end extraction scenarios over synthetic game trees.

mod common;

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use cas_storage::{ExtractOptions, PartKind};
use caszip::{CODE_STORED_ALT, CHUNK_SIZE};
use common::{data_cas_id, open_storage, write_layout, write_single_bundle_sb, MemorySink};
use test_utils::{
    stored_frame, zlib_frames, BundleBodyBuilder, CasBuilder, ChunkSpec, EbxSpec, GameFixture,
    InstallChunkSpec, SuperbundleTocBuilder,
};

fn base_chunk(superbundles: Vec<String>) -> InstallChunkSpec {
    InstallChunkSpec {
        id: [0x10; 16],
        name: "base".into(),
        dir: "base".into(),
        superbundles,
        ..Default::default()
    }
}

fn ebx(sha1: u8, name: &str, uncompressed: u32, offset: u64, size: u64) -> EbxSpec {
    EbxSpec {
        sha1: [sha1; 20],
        name: name.into(),
        uncompressed_size: uncompressed,
        cas_id: None,
        offset: offset as u32,
        size: size as u32,
    }
}

#[test]
fn stored_part_extracts_verbatim() {
    let fx = GameFixture::new();
    let mut cas = CasBuilder::new();
    let (offset, size) = cas.stored(b"HELLO");
    fx.write("Data/base/cas_01.cas", cas.bytes());

    let body = BundleBodyBuilder::new(data_cas_id(0, 1))
        .ebx(ebx(0x01, "fx/hello", 5, offset, size))
        .build();
    write_single_bundle_sb(&fx, "Data", "sb/main", "main", &body);
    write_layout(&fx, "Data", &[base_chunk(vec!["sb/main".into()])]);

    let storage = open_storage(&fx).unwrap();
    let sink = MemorySink::new();
    let summary = storage.extract(&sink, &ExtractOptions::default()).unwrap();

    assert_eq!(summary.extracted, 1);
    assert_eq!(summary.skipped_unavailable, 0);
    assert_eq!(summary.failed, 0);
    assert_eq!(sink.bytes_for("fx/hello").unwrap(), b"HELLO");
}

#[test]
fn mixed_compression_chunk_part() {
    let big: Vec<u8> = (0..CHUNK_SIZE).map(|i| (i % 251) as u8).collect();

    let fx = GameFixture::new();
    let mut cas = CasBuilder::new();
    let mut range = zlib_frames(&big);
    range.extend_from_slice(&stored_frame(CODE_STORED_ALT, b"WORLD"));
    let (offset, size) = cas.append(&range);
    fx.write("Data/base/cas_01.cas", cas.bytes());

    let body = BundleBodyBuilder::new(data_cas_id(0, 1))
        .chunk(ChunkSpec {
            sha1: [0x03; 20],
            uid: [0x04; 16],
            range_start: 0,
            logical_size: 5,
            logical_offset: CHUNK_SIZE as u32,
            h32: Some(0x77),
            first_mip: None,
            cas_id: None,
            offset: offset as u32,
            size: size as u32,
        })
        .build();
    write_single_bundle_sb(&fx, "Data", "sb/main", "main", &body);
    write_layout(&fx, "Data", &[base_chunk(vec!["sb/main".into()])]);

    let storage = open_storage(&fx).unwrap();
    let sink = MemorySink::new();
    let summary = storage.extract(&sink, &ExtractOptions::default()).unwrap();

    assert_eq!(summary.extracted, 1);
    assert_eq!(summary.failed, 0);

    let uid = "04".repeat(16);
    let data = sink.bytes_for(&uid).unwrap();
    assert_eq!(data.len(), CHUNK_SIZE + 5);
    assert_eq!(&data[..CHUNK_SIZE], &big[..]);
    assert_eq!(&data[CHUNK_SIZE..], b"WORLD");
}

#[test]
fn unknown_compression_fails_only_that_part() {
    let fx = GameFixture::new();
    let mut cas = CasBuilder::new();
    let (good_offset, good_size) = cas.stored(b"HELLO");

    let mut bad = Vec::new();
    bad.extend_from_slice(&5u16.to_be_bytes());
    bad.extend_from_slice(&0x1234u16.to_le_bytes());
    bad.extend_from_slice(&5u32.to_be_bytes());
    bad.extend_from_slice(b"XXXXX");
    let (bad_offset, bad_size) = cas.append(&bad);
    fx.write("Data/base/cas_01.cas", cas.bytes());

    let body = BundleBodyBuilder::new(data_cas_id(0, 1))
        .ebx(ebx(0x01, "fx/good", 5, good_offset, good_size))
        .ebx(ebx(0x02, "fx/bad", 5, bad_offset, bad_size))
        .build();
    write_single_bundle_sb(&fx, "Data", "sb/main", "main", &body);
    write_layout(&fx, "Data", &[base_chunk(vec!["sb/main".into()])]);

    let storage = open_storage(&fx).unwrap();
    let sink = MemorySink::new();
    let summary = storage.extract(&sink, &ExtractOptions::default()).unwrap();

    assert_eq!(summary.extracted, 1);
    assert_eq!(summary.failed, 1);
    assert_eq!(summary.skipped_unavailable, 0);
    assert_eq!(sink.bytes_for("fx/good").unwrap(), b"HELLO");
    assert!(sink.bytes_for("fx/bad").is_none());
}

#[test]
fn missing_cas_file_skips_the_part() {
    let fx = GameFixture::new();
    let mut cas = CasBuilder::new();
    let (offset, size) = cas.stored(b"HELLO");
    fx.write("Data/base/cas_01.cas", cas.bytes());

    let body = BundleBodyBuilder::new(data_cas_id(0, 1))
        .ebx(ebx(0x01, "fx/hello", 5, offset, size))
        .build();
    fx.write("Data/sb/main.sb", &body);
    fx.write(
        "Data/sb/main.toc",
        &SuperbundleTocBuilder::new()
            .bundle("main", 0, 0, body.len() as u32)
            // TOC resource pointing into cas_05.cas, which is absent.
            .resource(0, [0x0a; 20], data_cas_id(0, 5), 0, 0x10)
            .build_toc(),
    );
    write_layout(&fx, "Data", &[base_chunk(vec!["sb/main".into()])]);

    let storage = open_storage(&fx).unwrap();
    let sink = MemorySink::new();
    let summary = storage.extract(&sink, &ExtractOptions::default()).unwrap();

    assert_eq!(summary.extracted, 1);
    assert_eq!(summary.skipped_unavailable, 1);
    assert_eq!(summary.failed, 0);
}

#[test]
fn patch_layer_shadows_data_layer() {
    let fx = GameFixture::new();

    let mut data_cas = CasBuilder::new();
    let (offset, size) = data_cas.stored(b"DATA!");
    fx.write("Data/base/cas_01.cas", data_cas.bytes());

    let mut patch_cas = CasBuilder::new();
    patch_cas.stored(b"PATCH");
    fx.write("Patch/base/cas_01.cas", patch_cas.bytes());

    let body = BundleBodyBuilder::new(data_cas_id(0, 1))
        .ebx(ebx(0x01, "fx/marker", 5, offset, size))
        .build();
    write_single_bundle_sb(&fx, "Data", "sb/main", "main", &body);
    write_layout(&fx, "Data", &[base_chunk(vec!["sb/main".into()])]);
    write_layout(&fx, "Patch", &[base_chunk(vec![])]);

    let storage = open_storage(&fx).unwrap();
    let sink = MemorySink::new();
    let summary = storage.extract(&sink, &ExtractOptions::default()).unwrap();

    assert_eq!(summary.extracted, 1);
    assert_eq!(sink.bytes_for("fx/marker").unwrap(), b"PATCH");
}

#[test]
fn parallel_extraction_matches_sequential() {
    let fx = GameFixture::new();
    let mut cas = CasBuilder::new();
    let mut body = BundleBodyBuilder::new(data_cas_id(0, 1));
    for i in 0..6u8 {
        let payload: Vec<u8> = (0..1000).map(|j| (j as u8).wrapping_add(i)).collect();
        let (offset, size) = cas.zlib(&payload);
        body = body.ebx(ebx(i + 1, &format!("parts/part{i}"), 1000, offset, size));
    }
    fx.write("Data/base/cas_01.cas", cas.bytes());
    write_single_bundle_sb(&fx, "Data", "sb/main", "main", &body.build());
    write_layout(&fx, "Data", &[base_chunk(vec!["sb/main".into()])]);

    let storage = open_storage(&fx).unwrap();

    let sequential = MemorySink::new();
    let summary = storage
        .extract(
            &sequential,
            &ExtractOptions {
                workers: 1,
                ..Default::default()
            },
        )
        .unwrap();
    assert_eq!(summary.extracted, 6);

    let parallel = MemorySink::new();
    let summary = storage
        .extract(
            &parallel,
            &ExtractOptions {
                workers: 4,
                ..Default::default()
            },
        )
        .unwrap();
    assert_eq!(summary.extracted, 6);

    assert_eq!(sequential.into_items(), parallel.into_items());
}

#[test]
fn dedup_delivers_one_copy_per_sha1() {
    let fx = GameFixture::new();
    let mut cas = CasBuilder::new();
    let (offset, size) = cas.stored(b"HELLO");
    fx.write("Data/base/cas_01.cas", cas.bytes());

    let body = BundleBodyBuilder::new(data_cas_id(0, 1))
        .ebx(ebx(0x01, "fx/first", 5, offset, size))
        .ebx(ebx(0x01, "fx/second", 5, offset, size))
        .build();
    write_single_bundle_sb(&fx, "Data", "sb/main", "main", &body);
    write_layout(&fx, "Data", &[base_chunk(vec!["sb/main".into()])]);

    let storage = open_storage(&fx).unwrap();
    let sink = MemorySink::new();
    let summary = storage
        .extract(
            &sink,
            &ExtractOptions {
                dedup: true,
                ..Default::default()
            },
        )
        .unwrap();

    assert_eq!(summary.extracted, 1);
    assert_eq!(summary.deduplicated, 1);
    assert_eq!(sink.len(), 1);
}

#[test]
fn failed_part_does_not_mask_its_duplicate() {
    let fx = GameFixture::new();
    let mut cas = CasBuilder::new();

    let mut bad = Vec::new();
    bad.extend_from_slice(&5u16.to_be_bytes());
    bad.extend_from_slice(&0x1234u16.to_le_bytes());
    bad.extend_from_slice(&5u32.to_be_bytes());
    bad.extend_from_slice(b"XXXXX");
    let (bad_offset, bad_size) = cas.append(&bad);
    let (good_offset, good_size) = cas.stored(b"HELLO");
    fx.write("Data/base/cas_01.cas", cas.bytes());

    // Two parts share one SHA1; the first fails to decode. The digest must
    // not be considered delivered, so the duplicate still gets attempted.
    let body = BundleBodyBuilder::new(data_cas_id(0, 1))
        .ebx(ebx(0x01, "fx/bad", 5, bad_offset, bad_size))
        .ebx(ebx(0x01, "fx/good", 5, good_offset, good_size))
        .build();
    write_single_bundle_sb(&fx, "Data", "sb/main", "main", &body);
    write_layout(&fx, "Data", &[base_chunk(vec!["sb/main".into()])]);

    let storage = open_storage(&fx).unwrap();
    let sink = MemorySink::new();
    let summary = storage
        .extract(
            &sink,
            &ExtractOptions {
                workers: 1,
                dedup: true,
                ..Default::default()
            },
        )
        .unwrap();

    assert_eq!(summary.failed, 1);
    assert_eq!(summary.extracted, 1);
    assert_eq!(summary.deduplicated, 0);
    assert_eq!(sink.bytes_for("fx/good").unwrap(), b"HELLO");
}

#[test]
fn cancellation_returns_without_failing() {
    let fx = GameFixture::new();
    let mut cas = CasBuilder::new();
    let (offset, size) = cas.stored(b"HELLO");
    fx.write("Data/base/cas_01.cas", cas.bytes());

    let body = BundleBodyBuilder::new(data_cas_id(0, 1))
        .ebx(ebx(0x01, "fx/hello", 5, offset, size))
        .build();
    write_single_bundle_sb(&fx, "Data", "sb/main", "main", &body);
    write_layout(&fx, "Data", &[base_chunk(vec!["sb/main".into()])]);

    let storage = open_storage(&fx).unwrap();
    let cancel = Arc::new(AtomicBool::new(true));
    cancel.store(true, Ordering::Relaxed);

    let sink = MemorySink::new();
    let summary = storage
        .extract(
            &sink,
            &ExtractOptions {
                cancel: Some(cancel),
                ..Default::default()
            },
        )
        .unwrap();

    assert_eq!(summary.extracted, 0);
    assert_eq!(summary.failed, 0);
    assert_eq!(sink.len(), 0);
}

#[test]
fn toc_resource_is_delivered_under_its_digest() {
    let fx = GameFixture::new();
    let mut cas = CasBuilder::new();
    let (bundle_offset, bundle_size) = cas.stored(b"HELLO");
    let (res_offset, res_size) = cas.stored(b"RAW RESOURCE");
    fx.write("Data/base/cas_01.cas", cas.bytes());

    let body = BundleBodyBuilder::new(data_cas_id(0, 1))
        .ebx(ebx(0x01, "fx/hello", 5, bundle_offset, bundle_size))
        .build();
    fx.write("Data/sb/main.sb", &body);
    fx.write(
        "Data/sb/main.toc",
        &SuperbundleTocBuilder::new()
            .bundle("main", 0, 0, body.len() as u32)
            .resource(
                3,
                [0x0b; 20],
                data_cas_id(0, 1),
                res_offset as u32,
                res_size as u32,
            )
            .build_toc(),
    );
    write_layout(&fx, "Data", &[base_chunk(vec!["sb/main".into()])]);

    let storage = open_storage(&fx).unwrap();
    let sink = MemorySink::new();
    let summary = storage.extract(&sink, &ExtractOptions::default()).unwrap();

    assert_eq!(summary.extracted, 2);
    let digest = "0b".repeat(20);
    assert_eq!(sink.bytes_for(&digest).unwrap(), b"RAW RESOURCE");
    let items = sink.into_items();
    assert!(items
        .iter()
        .any(|(kind, id, _)| *kind == PartKind::TocResource && *id == digest));
}
