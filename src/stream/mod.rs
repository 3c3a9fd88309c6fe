//! Chunked, back-pressured processing pipeline.
//!
//! Entry content flows through a chain of [`Worker`]s. Each stage pulls
//! [`Event`]s out of the stage before it, may transform the chunk payloads,
//! and queues events for the stage after it:
//!
//! ```text
//! DataWorker -> [Utf8EncodeWorker] -> Crc32Probe -> DataLengthProbe(uncompressed)
//!            -> STORE compression -> DataLengthProbe(compressed) -> ArchiveFileWriter
//! ```
//!
//! Every chain shares one [`StreamInfo`]. It moves to the tail of the chain
//! whenever a stage is piped on and is lent back up the chain while
//! pulling, so exactly one stage can touch it at a time. Fields are
//! written only by the stage that owns them:
//!
//! | field               | writer                                  |
//! |---------------------|-----------------------------------------|
//! | `file`              | entry chain builder (`with_stream_info`) |
//! | `compression`       | entry chain builder (`with_stream_info`) |
//! | `crc32`             | [`Crc32Probe`]                          |
//! | `uncompressed_size` | [`DataLengthProbe`] (uncompressed)      |
//! | `compressed_size`   | [`DataLengthProbe`] (compressed)        |

mod data_worker;
mod helper;
mod transform;
pub(crate) mod worker;

use chrono::{DateTime, Utc};

use crate::error::Error;
use crate::utils::ChunkData;
use crate::zip::CompressionMethod;

pub use data_worker::{ContentSource, DEFAULT_BLOCK_SIZE, DataWorker};
pub use helper::{Blob, GeneratedArchive, OutputType, StreamHelper};
pub use transform::{ConvertWorker, Crc32Probe, DataLengthProbe, Passthrough, Utf8EncodeWorker};
pub use worker::{GenericWorker, Outbox, Transform, Worker, WorkerCore, WorkerState};

/// Progress information attached to a chunk.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ChunkMeta {
    /// Progress in `0.0..=100.0`.
    pub percent: f64,
    /// Entry being written, set by the archive writer.
    pub current_file: Option<String>,
}

/// A unit of data flowing from one stage to the next.
#[derive(Debug, Clone, PartialEq)]
pub struct Chunk {
    pub data: ChunkData,
    pub meta: ChunkMeta,
}

impl Chunk {
    pub fn new(data: impl Into<ChunkData>, percent: f64) -> Self {
        Self {
            data: data.into(),
            meta: ChunkMeta {
                percent,
                current_file: None,
            },
        }
    }
}

/// What a stage hands to the next one.
#[derive(Debug, Clone)]
pub enum Event {
    Data(Chunk),
    /// The stage finished; emitted at most once and never after `Error`.
    End,
    /// The stage failed; emitted at most once and never after `End`.
    Error(Error),
}

/// Metadata of the archive entry a chain produces.
#[derive(Debug, Clone, PartialEq)]
pub struct FileInfo {
    /// Path inside the archive, relative to the generated root.
    pub name: String,
    pub dir: bool,
    pub date: DateTime<Utc>,
    pub comment: String,
    pub unix_permissions: Option<u32>,
    pub dos_permissions: Option<u8>,
}

/// Which size counter a [`DataLengthProbe`] maintains.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LengthField {
    Uncompressed,
    Compressed,
}

impl LengthField {
    pub fn as_str(self) -> &'static str {
        match self {
            LengthField::Uncompressed => "uncompressedSize",
            LengthField::Compressed => "compressedSize",
        }
    }
}

/// A typed contribution of one stage to the chain's [`StreamInfo`].
#[derive(Debug, Clone, PartialEq)]
pub enum StreamInfoUpdate {
    File(FileInfo),
    Compression(CompressionMethod),
    Crc32(u32),
    Length(LengthField, u64),
}

/// Metadata shared by every stage of one chain.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct StreamInfo {
    file: Option<FileInfo>,
    compression: Option<CompressionMethod>,
    crc32: u32,
    uncompressed_size: u64,
    compressed_size: u64,
}

impl StreamInfo {
    pub fn file(&self) -> Option<&FileInfo> {
        self.file.as_ref()
    }

    pub fn compression(&self) -> Option<CompressionMethod> {
        self.compression
    }

    pub fn crc32(&self) -> u32 {
        self.crc32
    }

    pub fn uncompressed_size(&self) -> u64 {
        self.uncompressed_size
    }

    pub fn compressed_size(&self) -> u64 {
        self.compressed_size
    }

    pub fn length(&self, field: LengthField) -> u64 {
        match field {
            LengthField::Uncompressed => self.uncompressed_size,
            LengthField::Compressed => self.compressed_size,
        }
    }

    /// Applies one stage's contribution.
    pub fn merge(&mut self, update: &StreamInfoUpdate) {
        match update {
            StreamInfoUpdate::File(file) => self.file = Some(file.clone()),
            StreamInfoUpdate::Compression(method) => self.compression = Some(*method),
            StreamInfoUpdate::Crc32(crc) => self.crc32 = *crc,
            StreamInfoUpdate::Length(LengthField::Uncompressed, n) => self.uncompressed_size = *n,
            StreamInfoUpdate::Length(LengthField::Compressed, n) => self.compressed_size = *n,
        }
    }

    pub(crate) fn set_crc32(&mut self, crc: u32) {
        self.crc32 = crc;
    }

    pub(crate) fn add_length(&mut self, field: LengthField, n: u64) {
        match field {
            LengthField::Uncompressed => self.uncompressed_size += n,
            LengthField::Compressed => self.compressed_size += n,
        }
    }
}
