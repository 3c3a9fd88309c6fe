//! Helpers shared by the integration tests.

#![allow(dead_code)]

use std::io::{Cursor, Read};

use chrono::{TimeZone, Utc};
use stowzip::{Archive, FileOptions, GenerateOptions};

/// Options with a frozen modification date.
pub fn fixed() -> FileOptions {
    FileOptions::new().date(Utc.with_ymd_and_hms(2023, 4, 5, 6, 7, 8).unwrap())
}

pub async fn generate(archive: &mut Archive, options: GenerateOptions) -> Vec<u8> {
    archive
        .generate(options)
        .await
        .expect("generation failed")
        .as_bytes()
        .expect("bytes output")
        .to_vec()
}

/// Name and content of every entry, as seen by the `zip` crate.
pub fn read_back(bytes: &[u8]) -> Vec<(String, Vec<u8>)> {
    let mut zip = zip::ZipArchive::new(Cursor::new(bytes)).expect("readable archive");
    (0..zip.len())
        .map(|i| {
            let mut file = zip.by_index(i).expect("entry");
            let mut content = Vec::new();
            file.read_to_end(&mut content).expect("entry content");
            (file.name().to_string(), content)
        })
        .collect()
}

/// Raw fields of one central directory record.
#[derive(Debug)]
pub struct CentralRecord {
    pub version_made_by: u16,
    pub flags: u16,
    pub crc32: u32,
    pub compressed_size: u32,
    pub uncompressed_size: u32,
    pub external_attributes: u32,
    pub local_header_offset: u32,
    pub name: Vec<u8>,
    pub extra: Vec<u8>,
    pub comment: Vec<u8>,
}

fn u16_at(bytes: &[u8], at: usize) -> u16 {
    u16::from_le_bytes([bytes[at], bytes[at + 1]])
}

fn u32_at(bytes: &[u8], at: usize) -> u32 {
    u32::from_le_bytes([bytes[at], bytes[at + 1], bytes[at + 2], bytes[at + 3]])
}

/// Locates the EOCD (no archive comment expected beyond `comment_len`)
/// and decodes every central directory record.
pub fn central_directory(bytes: &[u8], comment_len: usize) -> Vec<CentralRecord> {
    let eocd = bytes.len() - 22 - comment_len;
    assert_eq!(&bytes[eocd..eocd + 4], b"PK\x05\x06");
    let count = u16_at(bytes, eocd + 10) as usize;
    let mut at = u32_at(bytes, eocd + 16) as usize;

    let mut records = Vec::with_capacity(count);
    for _ in 0..count {
        assert_eq!(&bytes[at..at + 4], b"PK\x01\x02");
        let name_len = u16_at(bytes, at + 28) as usize;
        let extra_len = u16_at(bytes, at + 30) as usize;
        let comment_len = u16_at(bytes, at + 32) as usize;
        let name_at = at + 46;
        records.push(CentralRecord {
            version_made_by: u16_at(bytes, at + 4),
            flags: u16_at(bytes, at + 8),
            crc32: u32_at(bytes, at + 16),
            compressed_size: u32_at(bytes, at + 20),
            uncompressed_size: u32_at(bytes, at + 24),
            external_attributes: u32_at(bytes, at + 38),
            local_header_offset: u32_at(bytes, at + 42),
            name: bytes[name_at..name_at + name_len].to_vec(),
            extra: bytes[name_at + name_len..name_at + name_len + extra_len].to_vec(),
            comment: bytes[name_at + name_len + extra_len..name_at + name_len + extra_len + comment_len]
                .to_vec(),
        });
        at = name_at + name_len + extra_len + comment_len;
    }
    records
}
