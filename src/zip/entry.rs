use std::sync::Arc;

use chrono::{DateTime, Utc};

use super::structures::CompressionMethod;
use super::writer::EntrySummary;
use crate::error::{Error, Result};
use crate::stream::{
    ContentSource, Crc32Probe, DataLengthProbe, DataWorker, FileInfo, GenericWorker, LengthField,
    StreamInfoUpdate, Utf8EncodeWorker, Worker,
};
use crate::utils::ChunkData;

/// UNIX directory bit of a file mode.
const S_IFDIR: u32 = 0o040000;
/// MS-DOS directory attribute.
const DOS_DIRECTORY: u8 = 0x10;

/// One file or directory registered in an [`Archive`](super::Archive).
#[derive(Debug, Clone)]
pub struct ArchiveEntry {
    name: String,
    content: Option<ContentSource>,
    dir: bool,
    date: DateTime<Utc>,
    comment: String,
    unix_permissions: Option<u32>,
    dos_permissions: Option<u8>,
    compression: CompressionMethod,
    crc32: u32,
    compressed_size: u64,
    uncompressed_size: u64,
}

impl ArchiveEntry {
    /// A file entry. Permissions carrying a directory bit make it a
    /// directory, and so does a trailing `/`.
    pub(crate) fn file(
        name: String,
        content: ContentSource,
        date: DateTime<Utc>,
        comment: String,
        unix_permissions: Option<u32>,
        dos_permissions: Option<u8>,
    ) -> Self {
        let dir = name.ends_with('/')
            || unix_permissions.is_some_and(|mode| mode & S_IFDIR != 0)
            || dos_permissions.is_some_and(|attrs| attrs & DOS_DIRECTORY != 0);
        let mut entry = Self {
            name,
            content: Some(content),
            dir: false,
            date,
            comment,
            unix_permissions,
            dos_permissions,
            compression: CompressionMethod::Store,
            crc32: 0,
            compressed_size: 0,
            uncompressed_size: 0,
        };
        if dir {
            entry.make_dir();
        }
        entry
    }

    pub(crate) fn directory(name: String, date: DateTime<Utc>) -> Self {
        let mut entry = Self::file(name, empty_content(), date, String::new(), None, None);
        entry.make_dir();
        entry
    }

    fn make_dir(&mut self) {
        self.dir = true;
        self.content = None;
        if !self.name.ends_with('/') {
            self.name.push('/');
        }
    }

    /// Full path inside the archive. Directory names end with `/`.
    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn is_dir(&self) -> bool {
        self.dir
    }

    pub fn date(&self) -> DateTime<Utc> {
        self.date
    }

    pub fn comment(&self) -> &str {
        &self.comment
    }

    pub fn unix_permissions(&self) -> Option<u32> {
        self.unix_permissions
    }

    pub fn dos_permissions(&self) -> Option<u8> {
        self.dos_permissions
    }

    pub fn compression(&self) -> CompressionMethod {
        self.compression
    }

    /// CRC-32 recorded by the last successful generation.
    pub fn crc32(&self) -> u32 {
        self.crc32
    }

    pub fn compressed_size(&self) -> u64 {
        self.compressed_size
    }

    pub fn uncompressed_size(&self) -> u64 {
        self.uncompressed_size
    }

    /// Content exactly as it will be stored.
    ///
    /// Text is UTF-8 encoded; deferred content is loaded.
    pub async fn read(&self) -> Result<Vec<u8>> {
        match &self.content {
            None => Ok(Vec::new()),
            Some(ContentSource::Ready(data)) => Ok(data.as_ref().clone().into_bytes()),
            Some(ContentSource::Deferred(loader)) => Ok(loader.load().await?.into_bytes()),
        }
    }

    /// Builds the chain producing this entry's stored bytes, stored under
    /// `name` in the archive:
    ///
    /// DataWorker -> [utf-8 encode] -> Crc32Probe -> DataLengthProbe
    /// -> compression -> DataLengthProbe
    pub(crate) fn internal_stream(&self, name: &str) -> Result<GenericWorker> {
        let source = DataWorker::new(self.content.clone().unwrap_or_else(empty_content));

        let checksummed = if self.needs_utf8_encoding() {
            source
                .pipe(GenericWorker::new(Utf8EncodeWorker::new()))?
                .pipe(GenericWorker::new(Crc32Probe::new()))?
        } else {
            source.pipe(GenericWorker::new(Crc32Probe::new()))?
        };

        let chain = checksummed
            .pipe(GenericWorker::new(DataLengthProbe::new(LengthField::Uncompressed)))?
            .pipe(self.compression.compress_worker())?
            .pipe(GenericWorker::new(DataLengthProbe::new(LengthField::Compressed)))?
            .with_stream_info(StreamInfoUpdate::Compression(self.compression))
            .with_stream_info(StreamInfoUpdate::File(FileInfo {
                name: name.to_owned(),
                dir: self.dir,
                date: self.date,
                comment: self.comment.clone(),
                unix_permissions: self.unix_permissions,
                dos_permissions: self.dos_permissions,
            }));
        Ok(chain)
    }

    fn needs_utf8_encoding(&self) -> bool {
        match &self.content {
            Some(ContentSource::Ready(data)) => {
                matches!(data.as_ref(), ChunkData::Text(_) | ChunkData::Utf16(_))
            }
            Some(ContentSource::Deferred(_)) => true,
            None => false,
        }
    }

    pub(crate) fn apply_summary(&mut self, summary: &EntrySummary) {
        self.crc32 = summary.crc32;
        self.compressed_size = summary.compressed_size;
        self.uncompressed_size = summary.uncompressed_size;
    }
}

fn empty_content() -> ContentSource {
    ContentSource::Ready(Arc::new(ChunkData::Bytes(Vec::new())))
}

/// Checks a name handed to the archive façade.
pub(crate) fn validate_name(name: &str) -> Result<()> {
    if name.is_empty() || name == "/" {
        return Err(Error::InvalidName(name.to_owned()));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use chrono::TimeZone;

    use super::*;
    use crate::stream::Event;

    fn date() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2021, 6, 1, 12, 0, 0).unwrap()
    }

    fn text(name: &str, content: &str) -> ArchiveEntry {
        ArchiveEntry::file(
            name.to_owned(),
            ContentSource::Ready(Arc::new(ChunkData::Text(content.into()))),
            date(),
            String::new(),
            None,
            None,
        )
    }

    #[test]
    fn directory_bits_make_directories() {
        let by_mode = ArchiveEntry::file("d".into(), empty_content(), date(), String::new(), Some(0o40755), None);
        assert!(by_mode.is_dir());
        assert_eq!(by_mode.name(), "d/");

        let by_attr = ArchiveEntry::file("e".into(), empty_content(), date(), String::new(), None, Some(0x10));
        assert!(by_attr.is_dir());

        assert!(ArchiveEntry::directory("f".into(), date()).name().ends_with('/'));
        assert!(!text("g", "x").is_dir());
    }

    #[tokio::test]
    async fn read_returns_stored_bytes() {
        assert_eq!(text("a", "h\u{e9}").read().await.unwrap(), "h\u{e9}".as_bytes());
        assert!(ArchiveEntry::directory("d".into(), date()).read().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn internal_stream_measures_encoded_content() {
        let entry = text("a.txt", "h\u{e9}llo");
        let mut chain = entry.internal_stream("a.txt").unwrap();
        assert_eq!(
            chain.to_string(),
            "Worker DataWorker -> Worker utf-8 encode -> Worker Crc32Probe \
             -> Worker DataLengthProbe for uncompressedSize -> Worker STORE compression \
             -> Worker DataLengthProbe for compressedSize"
        );

        chain.resume();
        let mut bytes = Vec::new();
        while let Some(event) = chain.next_event().await {
            match event {
                Event::Data(chunk) => bytes.extend(chunk.data.into_bytes()),
                Event::End => break,
                Event::Error(err) => panic!("unexpected error: {err}"),
            }
        }
        let info = chain.stream_info().unwrap();
        assert_eq!(bytes, "h\u{e9}llo".as_bytes());
        assert_eq!(info.uncompressed_size(), 6);
        assert_eq!(info.compressed_size(), 6);
        assert_eq!(info.crc32(), crate::crc32::crc32(0, "h\u{e9}llo".as_bytes()));
        assert_eq!(info.file().map(|f| f.name.as_str()), Some("a.txt"));
        assert_eq!(info.compression(), Some(CompressionMethod::Store));
    }

    #[test]
    fn empty_names_are_rejected() {
        assert!(matches!(validate_name(""), Err(Error::InvalidName(_))));
        assert!(validate_name("a/b.txt").is_ok());
    }
}
