//! Single-purpose pipeline stages.

use super::worker::{Outbox, Transform};
use super::{Chunk, LengthField, StreamInfo, StreamInfoUpdate};
use crate::crc32;
use crate::error::Result;
use crate::utils::{self, ChunkData, DataType};

/// Forwards chunks unchanged.
///
/// Used as the STORE "compression" stage.
pub struct Passthrough {
    name: String,
}

impl Passthrough {
    pub fn new(name: impl Into<String>) -> Self {
        Self { name: name.into() }
    }
}

impl Transform for Passthrough {
    fn name(&self) -> String {
        self.name.clone()
    }
}

/// Maintains the running CRC-32 of everything that passes through.
///
/// Must sit after any encoding stage so the checksum covers the bytes that
/// end up in the archive.
#[derive(Debug, Default)]
pub struct Crc32Probe;

impl Crc32Probe {
    pub fn new() -> Self {
        Self
    }
}

impl Transform for Crc32Probe {
    fn name(&self) -> String {
        "Crc32Probe".to_owned()
    }

    fn stream_info_defaults(&self) -> Vec<StreamInfoUpdate> {
        vec![StreamInfoUpdate::Crc32(0)]
    }

    fn process_chunk(&mut self, chunk: Chunk, info: &mut StreamInfo, out: &mut Outbox<'_>) -> Result<()> {
        let crc = crc32::checksum(info.crc32(), &chunk.data);
        info.set_crc32(crc);
        out.push(chunk);
        Ok(())
    }
}

/// Adds the length of every chunk to one of the size counters.
#[derive(Debug)]
pub struct DataLengthProbe {
    field: LengthField,
}

impl DataLengthProbe {
    pub fn new(field: LengthField) -> Self {
        Self { field }
    }
}

impl Transform for DataLengthProbe {
    fn name(&self) -> String {
        format!("DataLengthProbe for {}", self.field.as_str())
    }

    fn stream_info_defaults(&self) -> Vec<StreamInfoUpdate> {
        vec![StreamInfoUpdate::Length(self.field, 0)]
    }

    fn process_chunk(&mut self, chunk: Chunk, info: &mut StreamInfo, out: &mut Outbox<'_>) -> Result<()> {
        info.add_length(self.field, chunk.data.len() as u64);
        out.push(chunk);
        Ok(())
    }
}

/// Encodes textual chunks as UTF-8 bytes.
///
/// A surrogate pair split between two UTF-16 chunks is joined before it is
/// encoded. Binary strings are unpacked one byte per char, and byte chunks
/// pass through untouched.
#[derive(Debug, Default)]
pub struct Utf8EncodeWorker {
    carry: Option<u16>,
}

impl Utf8EncodeWorker {
    pub fn new() -> Self {
        Self::default()
    }
}

impl Transform for Utf8EncodeWorker {
    fn name(&self) -> String {
        "utf-8 encode".to_owned()
    }

    fn process_chunk(&mut self, chunk: Chunk, _info: &mut StreamInfo, out: &mut Outbox<'_>) -> Result<()> {
        let data = match chunk.data {
            ChunkData::Text(text) => text.into_bytes(),
            ChunkData::Binary(text) => utils::binary_string_to_bytes(&text),
            ChunkData::Utf16(units) => utils::utf16_to_utf8_streaming(&units, &mut self.carry),
            ChunkData::Bytes(bytes) => bytes,
        };
        if !data.is_empty() {
            out.push(Chunk {
                data: ChunkData::Bytes(data),
                meta: chunk.meta,
            });
        }
        Ok(())
    }

    fn flush(&mut self, _info: &mut StreamInfo, out: &mut Outbox<'_>) -> Result<()> {
        // A high surrogate with nothing after it.
        if let Some(unit) = self.carry.take() {
            out.push(Chunk::new(utils::utf16_to_utf8(&[unit]), 100.0));
        }
        Ok(())
    }

    fn clean_up(&mut self) {
        self.carry = None;
    }
}

/// Converts every chunk to one payload representation.
#[derive(Debug)]
pub struct ConvertWorker {
    dest: DataType,
}

impl ConvertWorker {
    pub fn new(dest: DataType) -> Self {
        Self { dest }
    }
}

impl Transform for ConvertWorker {
    fn name(&self) -> String {
        format!("ConvertWorker to {:?}", self.dest)
    }

    fn process_chunk(&mut self, chunk: Chunk, _info: &mut StreamInfo, out: &mut Outbox<'_>) -> Result<()> {
        out.push(Chunk {
            data: utils::transform_to(self.dest, chunk.data)?,
            meta: chunk.meta,
        });
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::*;
    use crate::stream::{ContentSource, DataWorker, Event, GenericWorker, Worker};

    async fn run(mut tail: GenericWorker) -> (Vec<ChunkData>, StreamInfo) {
        tail.resume();
        let mut chunks = Vec::new();
        loop {
            match tail.next_event().await {
                Some(Event::Data(chunk)) => chunks.push(chunk.data),
                Some(Event::End) => break,
                other => panic!("unexpected event: {other:?}"),
            }
        }
        let info = tail.stream_info().cloned().unwrap_or_default();
        (chunks, info)
    }

    fn source(data: ChunkData, block_size: usize) -> DataWorker {
        DataWorker::new(ContentSource::Ready(Arc::new(data))).with_block_size(block_size)
    }

    #[tokio::test]
    async fn probes_measure_the_stream() {
        let payload: Vec<u8> = (0..100_000u32).map(|i| (i % 251) as u8).collect();
        let tail = source(ChunkData::Bytes(payload.clone()), 4096)
            .pipe(GenericWorker::new(Crc32Probe::new()))
            .and_then(|w| w.pipe(GenericWorker::new(DataLengthProbe::new(LengthField::Uncompressed))))
            .and_then(|w| w.pipe(GenericWorker::passthrough("STORE compression")))
            .and_then(|w| w.pipe(GenericWorker::new(DataLengthProbe::new(LengthField::Compressed))))
            .unwrap();

        let (chunks, info) = run(tail).await;
        assert_eq!(chunks.len(), 25);
        assert_eq!(info.crc32(), crc32::crc32(0, &payload));
        assert_eq!(info.uncompressed_size(), payload.len() as u64);
        assert_eq!(info.compressed_size(), info.uncompressed_size());
    }

    #[tokio::test]
    async fn utf8_encoding_joins_split_surrogates() {
        let text = "\u{1F600}".repeat(3);
        let units: Vec<u16> = text.encode_utf16().collect();
        // Three-unit blocks split every other pair.
        let tail = source(ChunkData::Utf16(units), 3)
            .pipe(GenericWorker::new(Utf8EncodeWorker::new()))
            .unwrap();
        let (chunks, _) = run(tail).await;
        let bytes: Vec<u8> = chunks.into_iter().flat_map(ChunkData::into_bytes).collect();
        assert_eq!(bytes, text.as_bytes());
    }

    #[tokio::test]
    async fn trailing_high_surrogate_is_flushed_as_replacement() {
        let tail = source(ChunkData::Utf16(vec![0x41, 0xD83D]), 16)
            .pipe(GenericWorker::new(Utf8EncodeWorker::new()))
            .unwrap();
        let (chunks, _) = run(tail).await;
        let bytes: Vec<u8> = chunks.into_iter().flat_map(ChunkData::into_bytes).collect();
        assert_eq!(bytes, "A\u{FFFD}".as_bytes());
    }

    #[tokio::test]
    async fn utf8_encoding_unpacks_binary_strings() {
        let tail = source(ChunkData::Binary("\u{ff}\u{fe}A".into()), 2)
            .pipe(GenericWorker::new(Utf8EncodeWorker::new()))
            .unwrap();
        let (chunks, _) = run(tail).await;
        let bytes: Vec<u8> = chunks.into_iter().flat_map(ChunkData::into_bytes).collect();
        assert_eq!(bytes, [0xFF, 0xFE, 0x41]);
    }

    #[tokio::test]
    async fn convert_worker_normalises_payloads() {
        let tail = source(ChunkData::Text("h\u{e9}".into()), 16)
            .pipe(GenericWorker::new(ConvertWorker::new(DataType::Binary)))
            .unwrap();
        let (chunks, _) = run(tail).await;
        assert_eq!(chunks, vec![ChunkData::Binary("h\u{c3}\u{a9}".into())]);
    }

    #[tokio::test]
    async fn convert_failure_errors_the_chain() {
        let tail = source(ChunkData::Bytes(vec![0xFF, 0xFE]), 16)
            .pipe(GenericWorker::new(ConvertWorker::new(DataType::Text)));
        let mut tail = tail.unwrap();
        tail.resume();
        assert!(matches!(tail.next_event().await, Some(Event::Error(_))));
        assert!(tail.next_event().await.is_none());
    }
}
