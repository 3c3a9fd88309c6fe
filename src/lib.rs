//! # stowzip
//!
//! An in-memory ZIP archive builder with a chunked, back-pressured
//! processing pipeline.
//!
//! Entries are registered on an [`Archive`] as `name -> data` pairs.
//! Generating the archive builds one chain of pipeline stages per entry
//! (slicing, UTF-8 encoding, CRC-32 and size accounting, STORE) and feeds
//! all chains, one after another, into an [`ArchiveFileWriter`] that emits
//! the local headers, the central directory and the end of central
//! directory record.
//!
//! ## Features
//!
//! - Byte-exact ZIP output readable by standard tools (STORE method)
//! - Automatic creation of parent folders, folder views
//! - UNIX and DOS attributes, Info-ZIP Unicode path and comment fields
//! - Progress reporting and chunk-by-chunk streaming of the output
//! - Content loaded lazily from the local filesystem or HTTP URLs
//!
//! ## Example
//!
//! ```no_run
//! use stowzip::{Archive, GenerateOptions};
//!
//! #[tokio::main]
//! async fn main() -> stowzip::Result<()> {
//!     let mut archive = Archive::new();
//!     archive.file("hello.txt", "Hello World\n")?;
//!     archive.folder("images")?.file("smile.gif", vec![0x47u8, 0x49, 0x46])?;
//!
//!     let zip = archive.generate(GenerateOptions::new()).await?;
//!     if let Some(bytes) = zip.as_bytes() {
//!         println!("{} bytes", bytes.len());
//!     }
//!     Ok(())
//! }
//! ```

pub mod cli;
pub mod crc32;
pub mod error;
pub mod io;
pub mod stream;
pub mod utils;
pub mod zip;

pub use cli::Cli;
pub use error::{Error, Result};
pub use io::{ContentLoader, HttpLoader, LocalFileLoader};
pub use stream::{Blob, Chunk, ChunkMeta, GeneratedArchive, OutputType, StreamHelper};
pub use utils::{ChunkData, DataType};
pub use zip::{
    Archive, ArchiveEntry, ArchiveFileWriter, CompressionMethod, FileOptions, Folder,
    GenerateOptions, Platform,
};
