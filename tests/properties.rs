//! Checksums against a reference implementation, and a round-trip property.

mod common;

use proptest::prelude::*;
use stowzip::crc32::crc32;
use stowzip::{Archive, GenerateOptions};

#[test]
fn crc32_matches_reference() {
    assert_eq!(crc32(0, &[]), 0);
    assert_eq!(crc32(0, &[]), crc32fast::hash(&[]));
    assert_eq!(crc32(0, &[0x61]), crc32fast::hash(&[0x61]));

    let large: Vec<u8> = (0..200_000u32).map(|i| (i * 31 % 256) as u8).collect();
    assert_eq!(crc32(0, &large), crc32fast::hash(&large));
}

#[test]
fn crc32_is_incremental() {
    let data: Vec<u8> = (0..70_000u32).map(|i| (i % 253) as u8).collect();
    let running = data.chunks(16 * 1024).fold(0, |crc, block| crc32(crc, block));
    assert_eq!(running, crc32fast::hash(&data));
}

#[tokio::test]
async fn chunked_entries_carry_reference_crc() {
    let large: Vec<u8> = (0..(64 * 1024 + 123) as u32).map(|i| (i % 241) as u8).collect();
    let mut archive = Archive::new();
    archive
        .file_with_options("empty", Vec::<u8>::new(), common::fixed())
        .unwrap()
        .file_with_options("one", vec![0x42u8], common::fixed())
        .unwrap()
        .file_with_options("large", large.clone(), common::fixed())
        .unwrap();
    let bytes = common::generate(&mut archive, GenerateOptions::new()).await;

    let records = common::central_directory(&bytes, 0);
    assert_eq!(records[0].crc32, 0);
    assert_eq!(records[1].crc32, crc32fast::hash(&[0x42]));
    assert_eq!(records[2].crc32, crc32fast::hash(&large));
    assert_eq!(records[2].uncompressed_size as usize, large.len());
    assert_eq!(archive.get("large").unwrap().crc32(), crc32fast::hash(&large));
}

fn entries_strategy() -> impl Strategy<Value = Vec<(String, String)>> {
    proptest::collection::btree_map("[a-z][a-z0-9_]{0,11}\\.txt", "\\PC{0,300}", 1..8)
        .prop_map(|map| map.into_iter().collect())
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(32))]

    /// Any set of text files reads back with identical names and content.
    #[test]
    fn text_entries_round_trip(entries in entries_strategy()) {
        let runtime = tokio::runtime::Runtime::new().unwrap();
        let bytes = runtime.block_on(async {
            let mut archive = Archive::new();
            for (name, content) in &entries {
                archive.file_with_options(name, content.as_str(), common::fixed()).unwrap();
            }
            common::generate(&mut archive, GenerateOptions::new()).await
        });

        let read = common::read_back(&bytes);
        prop_assert_eq!(read.len(), entries.len());
        for ((name, content), (read_name, read_content)) in entries.iter().zip(read) {
            prop_assert_eq!(name, &read_name);
            prop_assert_eq!(content.as_bytes(), read_content.as_slice());
        }
    }
}
