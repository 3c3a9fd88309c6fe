//! Payload types and conversions shared by every pipeline stage.
//!
//! A chunk payload is one of four representations. Text comes from callers
//! that hand over Rust strings, UTF-16 from spreadsheet exporters that work
//! in code units, binary strings carry one byte per `char`, and bytes are
//! what finally ends up in the archive.

use crate::error::{Error, Result};

/// Representation of a chunk payload.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DataType {
    /// Unicode text.
    Text,
    /// UTF-16 code units, possibly with a surrogate pair split across chunks.
    Utf16,
    /// Binary string: every `char` is in `0..=255` and stands for one byte.
    Binary,
    /// Raw bytes.
    Bytes,
}

/// A chunk payload.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ChunkData {
    Text(String),
    Utf16(Vec<u16>),
    Binary(String),
    Bytes(Vec<u8>),
}

impl ChunkData {
    /// Returns the representation of this payload.
    pub fn data_type(&self) -> DataType {
        match self {
            ChunkData::Text(_) => DataType::Text,
            ChunkData::Utf16(_) => DataType::Utf16,
            ChunkData::Binary(_) => DataType::Binary,
            ChunkData::Bytes(_) => DataType::Bytes,
        }
    }

    /// Length in the payload's own unit.
    ///
    /// Bytes for `Text` and `Bytes`, code units for `Utf16`, and characters
    /// (one per byte) for `Binary`.
    pub fn len(&self) -> usize {
        match self {
            ChunkData::Text(s) => s.len(),
            ChunkData::Utf16(units) => units.len(),
            ChunkData::Binary(s) => s.chars().count(),
            ChunkData::Bytes(bytes) => bytes.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        match self {
            ChunkData::Text(s) | ChunkData::Binary(s) => s.is_empty(),
            ChunkData::Utf16(units) => units.is_empty(),
            ChunkData::Bytes(bytes) => bytes.is_empty(),
        }
    }

    /// Converts the payload to raw bytes.
    pub fn into_bytes(self) -> Vec<u8> {
        match self {
            ChunkData::Text(s) => s.into_bytes(),
            ChunkData::Utf16(units) => utf16_to_utf8(&units),
            ChunkData::Binary(s) => binary_string_to_bytes(&s),
            ChunkData::Bytes(bytes) => bytes,
        }
    }
}

impl From<Vec<u8>> for ChunkData {
    fn from(bytes: Vec<u8>) -> Self {
        ChunkData::Bytes(bytes)
    }
}

impl From<&[u8]> for ChunkData {
    fn from(bytes: &[u8]) -> Self {
        ChunkData::Bytes(bytes.to_vec())
    }
}

impl From<String> for ChunkData {
    fn from(text: String) -> Self {
        ChunkData::Text(text)
    }
}

impl From<&str> for ChunkData {
    fn from(text: &str) -> Self {
        ChunkData::Text(text.to_owned())
    }
}

const REPLACEMENT: [u8; 3] = [0xEF, 0xBF, 0xBD];

/// Encodes UTF-16 code units as UTF-8.
///
/// Surrogate pairs become 4-byte sequences; lone surrogates are encoded as
/// U+FFFD.
pub fn utf16_to_utf8(units: &[u16]) -> Vec<u8> {
    encode_utf16(units, None)
}

/// Streaming variant of [`utf16_to_utf8`].
///
/// A high surrogate ending `units` is parked in `carry` instead of being
/// encoded, and a surrogate parked by the previous call is joined with the
/// first unit of this one.
pub fn utf16_to_utf8_streaming(units: &[u16], carry: &mut Option<u16>) -> Vec<u8> {
    encode_utf16(units, Some(carry))
}

fn encode_utf16(units: &[u16], mut carry: Option<&mut Option<u16>>) -> Vec<u8> {
    let mut out = Vec::with_capacity(units.len() + units.len() / 2);
    let mut pending = carry.as_deref_mut().and_then(Option::take);
    let mut iter = units.iter().copied().peekable();

    loop {
        let unit = match pending.take().or_else(|| iter.next()) {
            Some(unit) => unit,
            None => break,
        };

        let code_point = match unit {
            0xD800..=0xDBFF => match iter.peek().copied() {
                Some(low @ 0xDC00..=0xDFFF) => {
                    iter.next();
                    0x10000 + ((u32::from(unit) - 0xD800) << 10) + (u32::from(low) - 0xDC00)
                }
                None if carry.is_some() => {
                    if let Some(slot) = carry.as_deref_mut() {
                        *slot = Some(unit);
                    }
                    break;
                }
                _ => {
                    out.extend_from_slice(&REPLACEMENT);
                    continue;
                }
            },
            0xDC00..=0xDFFF => {
                out.extend_from_slice(&REPLACEMENT);
                continue;
            }
            other => u32::from(other),
        };

        push_code_point(&mut out, code_point);
    }

    out
}

fn push_code_point(out: &mut Vec<u8>, cp: u32) {
    if cp < 0x80 {
        out.push(cp as u8);
    } else if cp < 0x800 {
        out.push(0xC0 | (cp >> 6) as u8);
        out.push(0x80 | (cp & 0x3F) as u8);
    } else if cp < 0x10000 {
        out.push(0xE0 | (cp >> 12) as u8);
        out.push(0x80 | ((cp >> 6) & 0x3F) as u8);
        out.push(0x80 | (cp & 0x3F) as u8);
    } else {
        out.push(0xF0 | (cp >> 18) as u8);
        out.push(0x80 | ((cp >> 12) & 0x3F) as u8);
        out.push(0x80 | ((cp >> 6) & 0x3F) as u8);
        out.push(0x80 | (cp & 0x3F) as u8);
    }
}

/// Packs a binary string into bytes, keeping the low 8 bits of every char.
pub fn binary_string_to_bytes(s: &str) -> Vec<u8> {
    s.chars().map(|c| (u32::from(c) & 0xFF) as u8).collect()
}

/// Unpacks bytes into a binary string, one char per byte.
pub fn bytes_to_binary_string(bytes: &[u8]) -> String {
    bytes.iter().map(|&b| char::from(b)).collect()
}

/// Largest char boundary of `s` that is `<= index`.
pub fn floor_char_boundary(s: &str, index: usize) -> usize {
    if index >= s.len() {
        return s.len();
    }
    let mut index = index;
    while !s.is_char_boundary(index) {
        index -= 1;
    }
    index
}

/// Converts `data` to the `dest` representation.
///
/// Text is encoded as UTF-8 whenever bytes are needed; bytes become text
/// only if they are valid UTF-8.
pub fn transform_to(dest: DataType, data: ChunkData) -> Result<ChunkData> {
    if data.data_type() == dest {
        return Ok(data);
    }

    Ok(match dest {
        DataType::Bytes => ChunkData::Bytes(data.into_bytes()),
        DataType::Binary => ChunkData::Binary(bytes_to_binary_string(&data.into_bytes())),
        DataType::Text => ChunkData::Text(into_text(data)?),
        DataType::Utf16 => ChunkData::Utf16(into_text(data)?.encode_utf16().collect()),
    })
}

fn into_text(data: ChunkData) -> Result<String> {
    match data {
        ChunkData::Text(text) => Ok(text),
        ChunkData::Utf16(units) => Ok(String::from_utf16_lossy(&units)),
        other => String::from_utf8(other.into_bytes())
            .map_err(|e| Error::Source(format!("payload is not valid UTF-8: {e}"))),
    }
}

/// Concatenates payloads into one value of the `dest` representation.
pub fn concat(dest: DataType, parts: Vec<ChunkData>) -> Result<ChunkData> {
    match dest {
        DataType::Bytes => {
            let total = parts.iter().map(ChunkData::len).sum();
            let mut out = Vec::with_capacity(total);
            for part in parts {
                out.extend_from_slice(&part.into_bytes());
            }
            Ok(ChunkData::Bytes(out))
        }
        DataType::Binary => {
            let mut out = String::new();
            for part in parts {
                out.push_str(&bytes_to_binary_string(&part.into_bytes()));
            }
            Ok(ChunkData::Binary(out))
        }
        DataType::Text | DataType::Utf16 => {
            let mut out = String::new();
            for part in parts {
                out.push_str(&into_text(part)?);
            }
            transform_to(dest, ChunkData::Text(out))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn utf16_surrogate_pairs_encode_to_four_bytes() {
        let units: Vec<u16> = "a\u{e9}\u{20ac}\u{1F600}".encode_utf16().collect();
        assert_eq!(utf16_to_utf8(&units), "a\u{e9}\u{20ac}\u{1F600}".as_bytes());
    }

    #[test]
    fn utf16_split_pair_is_carried() {
        let units: Vec<u16> = "x\u{1F600}y".encode_utf16().collect();
        let (head, tail) = units.split_at(2);
        let mut carry = None;
        let mut out = utf16_to_utf8_streaming(head, &mut carry);
        assert_eq!(carry, Some(units[1]));
        out.extend(utf16_to_utf8_streaming(tail, &mut carry));
        assert_eq!(carry, None);
        assert_eq!(out, "x\u{1F600}y".as_bytes());
    }

    #[test]
    fn lone_surrogates_are_replaced() {
        assert_eq!(utf16_to_utf8(&[0xD800]), "\u{FFFD}".as_bytes());
        assert_eq!(utf16_to_utf8(&[0xDC00, 0x41]), "\u{FFFD}A".as_bytes());
    }

    #[test]
    fn binary_strings_pack_one_byte_per_char() {
        let bytes = vec![0u8, 0x7F, 0x80, 0xFF];
        let packed = bytes_to_binary_string(&bytes);
        assert_eq!(packed.chars().count(), 4);
        assert_eq!(binary_string_to_bytes(&packed), bytes);
    }

    #[test]
    fn floor_boundary_never_splits_chars() {
        let s = "a\u{20ac}b";
        assert_eq!(floor_char_boundary(s, 2), 1);
        assert_eq!(floor_char_boundary(s, 4), 4);
        assert_eq!(floor_char_boundary(s, 99), s.len());
    }

    #[test]
    fn transform_rejects_invalid_utf8_text() {
        let err = transform_to(DataType::Text, ChunkData::Bytes(vec![0xFF])).unwrap_err();
        assert!(matches!(err, Error::Source(_)));
    }

    #[test]
    fn concat_mixed_payloads_to_bytes() {
        let parts = vec![
            ChunkData::Text("h\u{e9}".into()),
            ChunkData::Binary(bytes_to_binary_string(&[0xFF])),
            ChunkData::Bytes(vec![1, 2]),
        ];
        let joined = concat(DataType::Bytes, parts).unwrap();
        assert_eq!(joined, ChunkData::Bytes(vec![b'h', 0xC3, 0xA9, 0xFF, 1, 2]));
    }
}
