//! The archive sink stage.

use std::collections::VecDeque;
use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;
use log::{debug, warn};
use tokio::sync::mpsc::UnboundedSender;

use super::structures::{
    self, CentralDirectoryHeader, DosDateTime, EndOfCentralDirectory, EntryHeader, FLAG_UTF8,
    LocalFileHeader, Platform, UNICODE_COMMENT_EXTRA_ID, UNICODE_PATH_EXTRA_ID,
};
use crate::error::{Error, Result};
use crate::stream::worker::{Raised, Resumed};
use crate::stream::{Chunk, ChunkMeta, Event, StreamInfo, Worker, WorkerCore};
use crate::utils::ChunkData;

/// Custom encoder for entry names and comments.
pub type NameEncoder = Arc<dyn Fn(&str) -> Vec<u8> + Send + Sync>;

/// Archive-level settings of an [`ArchiveFileWriter`].
#[derive(Clone, Default)]
pub struct WriterOptions {
    pub comment: String,
    pub platform: Platform,
    /// When set, names and comments are stored as returned by the encoder
    /// and the UTF-8 flag is never raised.
    pub encode_file_name: Option<NameEncoder>,
}

impl fmt::Debug for WriterOptions {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("WriterOptions")
            .field("comment", &self.comment)
            .field("platform", &self.platform)
            .field("encode_file_name", &self.encode_file_name.is_some())
            .finish()
    }
}

impl WriterOptions {
    fn encode(&self, value: &str) -> Vec<u8> {
        match &self.encode_file_name {
            Some(encoder) => encoder(value),
            None => value.as_bytes().to_vec(),
        }
    }
}

/// Final measurements of one written entry.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EntrySummary {
    /// Name as written, relative to the generated root.
    pub name: String,
    pub crc32: u32,
    pub compressed_size: u64,
    pub uncompressed_size: u64,
}

/// Header and central directory record of one entry.
struct ZipParts {
    file_record: Vec<u8>,
    dir_record: Vec<u8>,
}

fn generate_zip_parts(info: &StreamInfo, offset: u64, options: &WriterOptions) -> Result<ZipParts> {
    let file = info
        .file()
        .ok_or_else(|| Error::Source("entry chain carries no file information".into()))?;
    let compression = info.compression().unwrap_or_default();

    let name = options.encode(&file.name);
    let comment = options.encode(&file.comment);
    let custom_encoding = options.encode_file_name.is_some();
    let name_needs_utf8 = !custom_encoding && !file.name.is_ascii();
    let comment_needs_utf8 = !custom_encoding && !file.comment.is_ascii();

    let mut flags = 0;
    if name_needs_utf8 || comment_needs_utf8 {
        flags |= FLAG_UTF8;
    }

    let mut extra_field = Vec::new();
    if name_needs_utf8 {
        extra_field.extend(structures::unicode_extra_field(
            UNICODE_PATH_EXTRA_ID,
            &name,
            file.name.as_bytes(),
        )?);
    }
    if comment_needs_utf8 {
        extra_field.extend(structures::unicode_extra_field(
            UNICODE_COMMENT_EXTRA_ID,
            &comment,
            file.comment.as_bytes(),
        )?);
    }

    let header = EntryHeader {
        flags,
        compression,
        modified: DosDateTime::from_datetime(&file.date),
        crc32: info.crc32(),
        compressed_size: structures::offset_u32(info.compressed_size(), "compressed size")?,
        uncompressed_size: structures::offset_u32(info.uncompressed_size(), "uncompressed size")?,
        file_name: name,
        extra_field,
    };
    let file_record = LocalFileHeader { header: &header }.to_bytes()?;
    let dir_record = CentralDirectoryHeader {
        header: &header,
        version_made_by: options.platform.version_made_by(),
        comment,
        external_attributes: options.platform.external_attributes(
            file.dir,
            file.unix_permissions,
            file.dos_permissions,
        ),
        local_header_offset: structures::offset_u32(offset, "local header offset")?,
    }
    .to_bytes()?;

    Ok(ZipParts {
        file_record,
        dir_record,
    })
}

/// Sink stage turning entry chains into ZIP bytes.
///
/// Sources are consumed strictly one after another, in the order they
/// were piped in. The content of the open entry is buffered until its
/// chain ends, then the local header is emitted followed by the content.
/// Once every source has closed, the central directory and the end of
/// central directory record are emitted and the writer ends.
pub struct ArchiveFileWriter {
    core: WorkerCore,
    options: WriterOptions,
    entries_count: usize,
    bytes_written: u64,
    current_source_offset: u64,
    current_file: Option<String>,
    content_buffer: Vec<Chunk>,
    dir_records: Vec<Vec<u8>>,
    sources: VecDeque<Box<dyn Worker>>,
    current: Option<Box<dyn Worker>>,
    summaries: Option<UnboundedSender<EntrySummary>>,
}

impl ArchiveFileWriter {
    pub fn new(options: WriterOptions) -> Self {
        Self {
            core: WorkerCore::new("ZipFileWorker"),
            options,
            entries_count: 0,
            bytes_written: 0,
            current_source_offset: 0,
            current_file: None,
            content_buffer: Vec::new(),
            dir_records: Vec::new(),
            sources: VecDeque::new(),
            current: None,
            summaries: None,
        }
    }

    /// Sends the measurements of every closed entry to `tx`.
    pub fn with_summaries(mut self, tx: UnboundedSender<EntrySummary>) -> Self {
        self.summaries = Some(tx);
        self
    }

    pub fn entries_count(&self) -> usize {
        self.entries_count
    }

    pub fn bytes_written(&self) -> u64 {
        self.bytes_written
    }

    /// Queues output, stamping overall progress and the current entry.
    fn emit(&mut self, data: Vec<u8>, file_percent: f64) {
        let percent = if self.entries_count > 0 {
            let done = self.entries_count - self.sources.len() - 1;
            (file_percent + 100.0 * done as f64) / self.entries_count as f64
        } else {
            100.0
        };
        self.bytes_written += data.len() as u64;
        self.core.push(Chunk {
            data: ChunkData::Bytes(data),
            meta: ChunkMeta {
                percent,
                current_file: self.current_file.clone(),
            },
        });
    }

    fn prepare_next_source(&mut self) {
        let Some(mut source) = self.sources.pop_front() else {
            return;
        };
        self.opened_source(source.stream_info());
        if self.core.is_paused() {
            source.pause();
        } else {
            source.resume();
        }
        self.current = Some(source);
    }

    fn opened_source(&mut self, info: Option<&StreamInfo>) {
        self.current_source_offset = self.bytes_written;
        self.current_file = info.and_then(StreamInfo::file).map(|file| file.name.clone());
        debug!(
            "opened entry {:?} at offset {}",
            self.current_file.as_deref().unwrap_or_default(),
            self.current_source_offset
        );
    }

    fn closed_source(&mut self, info: &StreamInfo) -> Result<()> {
        let parts = generate_zip_parts(info, self.current_source_offset, &self.options)?;
        self.dir_records.push(parts.dir_record);

        self.emit(parts.file_record, 0.0);
        for chunk in std::mem::take(&mut self.content_buffer) {
            self.emit(chunk.data.into_bytes(), chunk.meta.percent);
        }

        debug!(
            "closed entry {:?}: crc32 {:08x}, {} bytes",
            self.current_file.as_deref().unwrap_or_default(),
            info.crc32(),
            info.compressed_size()
        );
        if let (Some(tx), Some(file)) = (&self.summaries, info.file()) {
            // The receiver may be gone if nobody waits for the summaries.
            let _ = tx.send(EntrySummary {
                name: file.name.clone(),
                crc32: info.crc32(),
                compressed_size: info.compressed_size(),
                uncompressed_size: info.uncompressed_size(),
            });
        }
        self.current_file = None;
        Ok(())
    }

    fn flush(&mut self) -> Result<()> {
        let local_dir_length = self.bytes_written;
        for record in std::mem::take(&mut self.dir_records) {
            self.emit(record, 100.0);
        }
        let central_dir_length = self.bytes_written - local_dir_length;

        let eocd = EndOfCentralDirectory::new(
            self.entries_count,
            central_dir_length,
            local_dir_length,
            self.options.encode(&self.options.comment),
        )?;
        self.emit(eocd.to_bytes()?, 100.0);
        debug!(
            "wrote central directory: {} entries, {} bytes at offset {}",
            self.entries_count, central_dir_length, local_dir_length
        );
        Ok(())
    }

    fn end(&mut self) -> bool {
        if self.core.is_finished() {
            return false;
        }
        if let Err(err) = self.flush() {
            return self.error(err);
        }
        self.core.finish();
        self.clean_up();
        true
    }

    fn clean_up(&mut self) {
        self.current = None;
        self.sources.clear();
        self.content_buffer.clear();
        self.summaries = None;
    }
}

#[async_trait]
impl Worker for ArchiveFileWriter {
    fn core(&self) -> &WorkerCore {
        &self.core
    }

    fn core_mut(&mut self) -> &mut WorkerCore {
        &mut self.core
    }

    async fn pull(&mut self, _info: &mut StreamInfo) -> Option<Event> {
        loop {
            if let Some(event) = self.core.pop() {
                return Some(event);
            }
            if !self.core.is_running() {
                return None;
            }
            if self.current.is_none() {
                if self.sources.is_empty() {
                    self.end();
                } else {
                    self.prepare_next_source();
                }
                continue;
            }

            let current = self.current.as_mut()?;
            match current.next_event().await? {
                Event::Data(chunk) => self.content_buffer.push(chunk),
                Event::End => {
                    let info = current.stream_info().cloned().unwrap_or_default();
                    self.current = None;
                    if let Err(err) = self.closed_source(&info) {
                        self.error(err);
                    }
                }
                Event::Error(err) => {
                    self.error(err);
                }
            }
        }
    }

    fn pause(&mut self) -> bool {
        if !self.core.pause() {
            return false;
        }
        if let Some(current) = self.current.as_mut() {
            current.pause();
        }
        true
    }

    fn resume(&mut self) -> bool {
        match self.core.resume() {
            Resumed::NoOp => false,
            Resumed::Replay(err) => {
                self.error(err);
                false
            }
            Resumed::Running => {
                if let Some(current) = self.current.as_mut() {
                    current.resume();
                }
                true
            }
        }
    }

    fn error(&mut self, err: Error) -> bool {
        match self.core.raise(err) {
            Raised::Ignored => false,
            Raised::Stored => true,
            Raised::Raised(err) => {
                if !self.sources.is_empty() {
                    warn!(
                        "aborting {} queued entries: {err}",
                        self.sources.len()
                    );
                }
                if let Some(current) = self.current.as_mut() {
                    current.error(err.clone());
                }
                for source in self.sources.iter_mut() {
                    source.error(err.clone());
                }
                self.clean_up();
                true
            }
        }
    }

    fn lock(&mut self) -> Result<()> {
        let label = self.to_string();
        self.core.lock(&label)?;
        if let Some(current) = self.current.as_mut() {
            current.lock()?;
        }
        for source in self.sources.iter_mut() {
            source.lock()?;
        }
        Ok(())
    }

    fn register_previous(&mut self, previous: Box<dyn Worker>) -> Result<()> {
        if self.core.is_locked() {
            return Err(Error::Structural(self.to_string()));
        }
        self.sources.push_back(previous);
        self.entries_count += 1;
        Ok(())
    }
}

impl fmt::Display for ArchiveFileWriter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Worker {}", self.core.name())
    }
}

#[cfg(test)]
mod tests {
    use chrono::{TimeZone, Utc};

    use super::*;
    use crate::stream::{ContentSource, DataWorker, FileInfo, GenericWorker, StreamInfoUpdate};

    fn entry(name: &str, content: &str) -> GenericWorker {
        let file = FileInfo {
            name: name.to_owned(),
            dir: false,
            date: Utc.with_ymd_and_hms(2020, 1, 1, 0, 0, 0).unwrap(),
            comment: String::new(),
            unix_permissions: None,
            dos_permissions: None,
        };
        DataWorker::new(ContentSource::Ready(Arc::new(ChunkData::Text(content.into()))))
            .pipe(GenericWorker::new(crate::stream::Crc32Probe::new()))
            .and_then(|w| {
                w.pipe(GenericWorker::new(crate::stream::DataLengthProbe::new(
                    crate::stream::LengthField::Uncompressed,
                )))
            })
            .and_then(|w| {
                w.pipe(GenericWorker::new(crate::stream::DataLengthProbe::new(
                    crate::stream::LengthField::Compressed,
                )))
            })
            .unwrap()
            .with_stream_info(StreamInfoUpdate::File(file))
    }

    async fn run(mut writer: ArchiveFileWriter) -> (Vec<u8>, Vec<ChunkMeta>, Option<Event>) {
        writer.resume();
        let mut bytes = Vec::new();
        let mut metas = Vec::new();
        loop {
            match writer.next_event().await {
                Some(Event::Data(chunk)) => {
                    metas.push(chunk.meta.clone());
                    bytes.extend(chunk.data.into_bytes());
                }
                other => return (bytes, metas, other),
            }
        }
    }

    #[tokio::test]
    async fn empty_archive_is_a_bare_eocd() {
        let (bytes, metas, last) = run(ArchiveFileWriter::new(WriterOptions::default())).await;
        assert!(matches!(last, Some(Event::End)));
        assert_eq!(bytes.len(), EndOfCentralDirectory::SIZE);
        assert_eq!(&bytes[..4], EndOfCentralDirectory::SIGNATURE);
        assert_eq!(metas[0].percent, 100.0);
    }

    #[tokio::test]
    async fn entries_are_written_in_order() {
        let writer = entry("one.txt", "first")
            .pipe(ArchiveFileWriter::new(WriterOptions::default()))
            .and_then(|w| entry("two.txt", "second").pipe(w))
            .unwrap();
        assert_eq!(writer.entries_count(), 2);

        let (bytes, metas, last) = run(writer).await;
        assert!(matches!(last, Some(Event::End)));

        let first = LocalFileHeader::SIZE + "one.txt".len();
        assert_eq!(&bytes[..4], LocalFileHeader::SIGNATURE);
        assert_eq!(&bytes[first..first + 5], b"first");
        let second = first + 5;
        assert_eq!(&bytes[second..second + 4], LocalFileHeader::SIGNATURE);

        assert_eq!(metas[0].current_file.as_deref(), Some("one.txt"));
        assert_eq!(metas[0].percent, 0.0);
        assert_eq!(metas[1].percent, 50.0);
        assert_eq!(metas[2].current_file.as_deref(), Some("two.txt"));
        assert_eq!(metas[2].percent, 50.0);
        assert_eq!(metas.last().map(|m| m.percent), Some(100.0));
    }

    #[tokio::test]
    async fn summaries_report_measurements() {
        let (tx, mut rx) = tokio::sync::mpsc::unbounded_channel();
        let writer = entry("a.txt", "hello")
            .pipe(ArchiveFileWriter::new(WriterOptions::default()).with_summaries(tx))
            .unwrap();
        let _ = run(writer).await;
        let summary = rx.recv().await.unwrap();
        assert_eq!(summary.name, "a.txt");
        assert_eq!(summary.crc32, crate::crc32::crc32(0, b"hello"));
        assert_eq!(summary.uncompressed_size, 5);
        assert_eq!(summary.compressed_size, 5);
    }

    #[tokio::test]
    async fn writer_error_emits_no_eocd() {
        let mut writer = entry("a.txt", "hello")
            .pipe(ArchiveFileWriter::new(WriterOptions::default()))
            .and_then(|w| entry("b.txt", "world").pipe(w))
            .unwrap();
        writer.resume();
        assert!(matches!(writer.next_event().await, Some(Event::Data(_))));
        writer.error(Error::Source("boom".into()));
        let mut saw_error = false;
        while let Some(event) = writer.next_event().await {
            match event {
                Event::Data(chunk) => {
                    assert_ne!(&chunk.data.into_bytes()[..4], EndOfCentralDirectory::SIGNATURE)
                }
                Event::Error(_) => saw_error = true,
                Event::End => panic!("writer ended after an error"),
            }
        }
        assert!(saw_error);
    }

    #[test]
    fn locked_writer_rejects_sources() {
        let mut writer = ArchiveFileWriter::new(WriterOptions::default());
        writer.lock().unwrap();
        assert!(matches!(entry("a", "b").pipe(writer), Err(Error::Structural(_))));
    }
}
