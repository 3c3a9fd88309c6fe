//! ZIP archive assembly.
//!
//! ## Architecture
//!
//! The module is organized into four components:
//!
//! - [`structures`]: byte layout of the ZIP records (local file header,
//!   central directory header, EOCD) and the DOS timestamp packing
//! - [`entry`]: one registered file or directory and the processing chain
//!   that produces its stored bytes
//! - [`writer`]: the sink stage that turns entry chains into records
//! - [`archive`]: the user-facing façade
//!
//! ## ZIP Format Overview
//!
//! A ZIP file consists of:
//! 1. Local file headers and stored data for each file
//! 2. Central Directory with metadata for all files
//! 3. End of Central Directory (EOCD) record at the end
//!
//! Sizes and checksums are only known once an entry has been read
//! completely, so every entry is buffered before its local header is
//! written.
//!
//! ## Limitations
//!
//! - STORE is the only compression method
//! - No ZIP64: more than 65535 entries or offsets past 4 GiB are rejected
//! - No data descriptors (`stream_files`)

mod archive;
mod entry;
mod structures;
mod writer;

pub use archive::{Archive, DEFAULT_MIME_TYPE, FileOptions, Folder, GenerateOptions};
pub use entry::ArchiveEntry;
pub use structures::*;
pub use writer::{ArchiveFileWriter, EntrySummary, NameEncoder, WriterOptions};
