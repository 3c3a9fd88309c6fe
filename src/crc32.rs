//! Table-driven CRC-32 (IEEE 802.3, reflected polynomial `0xEDB88320`).
//!
//! The lookup table is evaluated at compile time. All functions take the
//! running CRC of the data seen so far, so a checksum can be built up one
//! chunk at a time: `crc32(crc32(0, a), b) == crc32(0, a ++ b)`.

use crate::utils::ChunkData;

const POLYNOMIAL: u32 = 0xEDB8_8320;

static TABLE: [u32; 256] = make_table();

const fn make_table() -> [u32; 256] {
    let mut table = [0u32; 256];
    let mut n = 0;
    while n < 256 {
        let mut c = n as u32;
        let mut k = 0;
        while k < 8 {
            c = if c & 1 != 0 { POLYNOMIAL ^ (c >> 1) } else { c >> 1 };
            k += 1;
        }
        table[n] = c;
        n += 1;
    }
    table
}

#[inline]
fn update(crc: u32, byte: u8) -> u32 {
    (crc >> 8) ^ TABLE[((crc ^ u32::from(byte)) & 0xFF) as usize]
}

/// Continues `crc` over `data`.
pub fn crc32(crc: u32, data: &[u8]) -> u32 {
    let mut c = !crc;
    for &byte in data {
        c = update(c, byte);
    }
    !c
}

/// Continues `crc` over a binary string (the low byte of every char).
pub fn crc32_binary_str(crc: u32, data: &str) -> u32 {
    let mut c = !crc;
    for ch in data.chars() {
        c = update(c, (u32::from(ch) & 0xFF) as u8);
    }
    !c
}

/// Continues `crc` over any chunk payload.
///
/// Binary strings are checksummed byte per char, everything else over its
/// byte representation. An empty payload leaves `crc` unchanged.
pub fn checksum(crc: u32, data: &ChunkData) -> u32 {
    match data {
        _ if data.is_empty() => crc,
        ChunkData::Bytes(bytes) => crc32(crc, bytes),
        ChunkData::Text(text) => crc32(crc, text.as_bytes()),
        ChunkData::Binary(text) => crc32_binary_str(crc, text),
        ChunkData::Utf16(units) => crc32(crc, &crate::utils::utf16_to_utf8(units)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn known_values() {
        assert_eq!(crc32(0, b""), 0);
        assert_eq!(crc32(0, b"a"), 0xE8B7_BE43);
        assert_eq!(crc32(0, b"123456789"), 0xCBF4_3926);
        assert_eq!(crc32(0, b"The quick brown fox jumps over the lazy dog"), 0x414F_A339);
    }

    #[test]
    fn incremental_matches_one_shot() {
        let full = crc32(0, b"hello world");
        let incremental = crc32(crc32(0, b"hello"), b" world");
        assert_eq!(full, incremental);
    }

    #[test]
    fn binary_string_matches_bytes() {
        let bytes: Vec<u8> = (0..=255u8).collect();
        let packed = crate::utils::bytes_to_binary_string(&bytes);
        assert_eq!(crc32_binary_str(0, &packed), crc32(0, &bytes));
    }

    #[test]
    fn empty_chunk_keeps_running_crc() {
        let crc = crc32(0, b"abc");
        assert_eq!(checksum(crc, &ChunkData::Bytes(Vec::new())), crc);
        assert_eq!(checksum(0, &ChunkData::Text(String::new())), 0);
    }
}
