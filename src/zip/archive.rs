//! The archive façade.
//!
//! An [`Archive`] maps paths to [`ArchiveEntry`]s in registration order,
//! which is also the order of the entries in the generated file.
//! [`Folder`] views register and generate relative to a sub-directory.

use std::fmt;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use log::debug;
use tokio::sync::mpsc;

use super::entry::{self, ArchiveEntry};
use super::structures::Platform;
use super::writer::{ArchiveFileWriter, EntrySummary, NameEncoder, WriterOptions};
use crate::error::{Error, Result};
use crate::io::ContentLoader;
use crate::stream::{ChunkMeta, ContentSource, GeneratedArchive, OutputType, StreamHelper, Worker};
use crate::utils::ChunkData;

/// MIME type of [`OutputType::Blob`] results unless overridden.
pub const DEFAULT_MIME_TYPE: &str = "application/zip";

/// Settings of one generation.
#[derive(Clone)]
pub struct GenerateOptions {
    pub output_type: OutputType,
    pub mime_type: String,
    /// Archive comment; falls back to [`Archive::set_comment`].
    pub comment: Option<String>,
    /// Streaming entries with data descriptors is not supported and must
    /// stay `false`.
    pub stream_files: bool,
    pub platform: Platform,
    pub encode_file_name: Option<NameEncoder>,
}

impl Default for GenerateOptions {
    fn default() -> Self {
        Self {
            output_type: OutputType::Bytes,
            mime_type: DEFAULT_MIME_TYPE.to_owned(),
            comment: None,
            stream_files: false,
            platform: Platform::Unix,
            encode_file_name: None,
        }
    }
}

impl fmt::Debug for GenerateOptions {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("GenerateOptions")
            .field("output_type", &self.output_type)
            .field("mime_type", &self.mime_type)
            .field("comment", &self.comment)
            .field("stream_files", &self.stream_files)
            .field("platform", &self.platform)
            .field("encode_file_name", &self.encode_file_name.is_some())
            .finish()
    }
}

impl GenerateOptions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn output_type(mut self, output_type: OutputType) -> Self {
        self.output_type = output_type;
        self
    }

    pub fn mime_type(mut self, mime_type: impl Into<String>) -> Self {
        self.mime_type = mime_type.into();
        self
    }

    pub fn comment(mut self, comment: impl Into<String>) -> Self {
        self.comment = Some(comment.into());
        self
    }

    pub fn stream_files(mut self, stream_files: bool) -> Self {
        self.stream_files = stream_files;
        self
    }

    pub fn platform(mut self, platform: Platform) -> Self {
        self.platform = platform;
        self
    }

    pub fn encode_file_name<F>(mut self, encoder: F) -> Self
    where
        F: Fn(&str) -> Vec<u8> + Send + Sync + 'static,
    {
        self.encode_file_name = Some(Arc::new(encoder));
        self
    }
}

/// Metadata of one registered file.
#[derive(Debug, Clone)]
pub struct FileOptions {
    /// Defaults to the time of registration.
    pub date: Option<DateTime<Utc>>,
    pub comment: String,
    pub unix_permissions: Option<u32>,
    pub dos_permissions: Option<u8>,
    /// Register missing parent folders too.
    pub create_folders: bool,
}

impl Default for FileOptions {
    fn default() -> Self {
        Self {
            date: None,
            comment: String::new(),
            unix_permissions: None,
            dos_permissions: None,
            create_folders: true,
        }
    }
}

impl FileOptions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn date(mut self, date: DateTime<Utc>) -> Self {
        self.date = Some(date);
        self
    }

    pub fn comment(mut self, comment: impl Into<String>) -> Self {
        self.comment = comment.into();
        self
    }

    pub fn unix_permissions(mut self, mode: u32) -> Self {
        self.unix_permissions = Some(mode);
        self
    }

    pub fn dos_permissions(mut self, attrs: u8) -> Self {
        self.dos_permissions = Some(attrs);
        self
    }

    pub fn create_folders(mut self, create_folders: bool) -> Self {
        self.create_folders = create_folders;
        self
    }
}

/// An in-memory ZIP archive under construction.
#[derive(Debug, Clone, Default)]
pub struct Archive {
    files: Vec<ArchiveEntry>,
    comment: String,
}

impl Archive {
    pub fn new() -> Self {
        Self::default()
    }

    /// Default archive comment for [`Archive::generate`].
    pub fn set_comment(&mut self, comment: impl Into<String>) {
        self.comment = comment.into();
    }

    pub fn comment(&self) -> &str {
        &self.comment
    }

    pub fn len(&self) -> usize {
        self.files.len()
    }

    pub fn is_empty(&self) -> bool {
        self.files.is_empty()
    }

    /// Registers a file, creating missing parent folders.
    pub fn file(&mut self, name: &str, data: impl Into<ChunkData>) -> Result<&mut Self> {
        self.add_file(name, ContentSource::Ready(Arc::new(data.into())), FileOptions::default())?;
        Ok(self)
    }

    pub fn file_with_options(
        &mut self,
        name: &str,
        data: impl Into<ChunkData>,
        options: FileOptions,
    ) -> Result<&mut Self> {
        self.add_file(name, ContentSource::Ready(Arc::new(data.into())), options)?;
        Ok(self)
    }

    /// Registers a file whose content is loaded when the archive is
    /// generated.
    pub fn file_with_loader(
        &mut self,
        name: &str,
        loader: Arc<dyn ContentLoader>,
        options: FileOptions,
    ) -> Result<&mut Self> {
        self.add_file(name, ContentSource::Deferred(loader), options)?;
        Ok(self)
    }

    /// Registers a directory and returns a view rooted in it.
    pub fn folder(&mut self, name: &str) -> Result<Folder<'_>> {
        self.folder_with_options(name, FileOptions::default())
    }

    /// Like [`Archive::folder`]; missing folders take `options.date`, or the
    /// current time when it is unset.
    pub fn folder_with_options(&mut self, name: &str, options: FileOptions) -> Result<Folder<'_>> {
        let root = self.add_folder(name, options.date.unwrap_or_else(Utc::now))?;
        Ok(Folder {
            archive: self,
            root,
        })
    }

    /// Looks up an entry by its full path.
    pub fn get(&self, name: &str) -> Option<&ArchiveEntry> {
        self.files.iter().find(|entry| entry.name() == name)
    }

    /// Every entry in registration order.
    pub fn entries(&self) -> impl Iterator<Item = (&str, &ArchiveEntry)> {
        entries_in(&self.files, "")
    }

    pub fn filter<F>(&self, predicate: F) -> Vec<&ArchiveEntry>
    where
        F: FnMut(&str, &ArchiveEntry) -> bool,
    {
        filter_in(&self.files, "", predicate)
    }

    /// Removes a file, or a folder with everything below it. Returns the
    /// number of entries removed.
    pub fn remove(&mut self, name: &str) -> usize {
        self.remove_path(name.to_owned())
    }

    pub async fn generate(&mut self, options: GenerateOptions) -> Result<GeneratedArchive> {
        self.generate_in(String::new(), options, |_| {}).await
    }

    /// Like [`Archive::generate`], reporting the metadata of every output
    /// chunk to `on_update`.
    pub async fn generate_with_progress<F>(
        &mut self,
        options: GenerateOptions,
        on_update: F,
    ) -> Result<GeneratedArchive>
    where
        F: FnMut(&ChunkMeta),
    {
        self.generate_in(String::new(), options, on_update).await
    }

    /// Builds the pipeline without running it.
    pub fn generate_stream(&self, options: GenerateOptions) -> Result<StreamHelper> {
        self.build_stream("", &options, None)
    }

    fn add_file(&mut self, name: &str, content: ContentSource, options: FileOptions) -> Result<()> {
        entry::validate_name(name)?;
        let date = options.date.unwrap_or_else(Utc::now);
        if options.create_folders
            && let Some(parent) = parent_folder(name)
        {
            self.add_folder(parent, date)?;
        }
        let entry = ArchiveEntry::file(
            name.to_owned(),
            content,
            date,
            options.comment,
            options.unix_permissions,
            options.dos_permissions,
        );
        self.insert(entry);
        Ok(())
    }

    /// Registers `name` and its parents as directories unless they exist.
    /// Returns the directory name with its trailing `/`.
    fn add_folder(&mut self, name: &str, date: DateTime<Utc>) -> Result<String> {
        entry::validate_name(name)?;
        let mut name = name.to_owned();
        if !name.ends_with('/') {
            name.push('/');
        }
        if self.get(&name).is_none() {
            if let Some(parent) = parent_folder(&name) {
                self.add_folder(parent, date)?;
            }
            self.insert(ArchiveEntry::directory(name.clone(), date));
        }
        Ok(name)
    }

    /// Replaces an entry of the same name in place, or appends.
    fn insert(&mut self, entry: ArchiveEntry) {
        match self.files.iter_mut().find(|e| e.name() == entry.name()) {
            Some(existing) => *existing = entry,
            None => self.files.push(entry),
        }
    }

    fn remove_path(&mut self, mut name: String) -> usize {
        let before = self.files.len();
        if let Some(index) = self.files.iter().position(|e| e.name() == name && !e.is_dir()) {
            self.files.remove(index);
        } else {
            if !name.ends_with('/') {
                name.push('/');
            }
            self.files.retain(|e| !e.name().starts_with(&name));
        }
        before - self.files.len()
    }

    fn build_stream(
        &self,
        root: &str,
        options: &GenerateOptions,
        summaries: Option<mpsc::UnboundedSender<EntrySummary>>,
    ) -> Result<StreamHelper> {
        if options.stream_files {
            return Err(Error::Unsupported(
                "streaming entries with data descriptors".into(),
            ));
        }

        let mut writer = ArchiveFileWriter::new(WriterOptions {
            comment: options.comment.clone().unwrap_or_else(|| self.comment.clone()),
            platform: options.platform,
            encode_file_name: options.encode_file_name.clone(),
        });
        if let Some(tx) = summaries {
            writer = writer.with_summaries(tx);
        }
        for (relative, entry) in entries_in(&self.files, root) {
            writer = entry.internal_stream(relative)?.pipe(writer)?;
        }
        debug!(
            "generating {} entries under {:?}",
            writer.entries_count(),
            root
        );

        StreamHelper::new(writer, options.output_type, options.mime_type.clone())
    }

    async fn generate_in<F>(
        &mut self,
        root: String,
        options: GenerateOptions,
        on_update: F,
    ) -> Result<GeneratedArchive>
    where
        F: FnMut(&ChunkMeta),
    {
        let (tx, mut rx) = mpsc::unbounded_channel();
        let helper = self.build_stream(&root, &options, Some(tx))?;
        let archive = helper.accumulate(on_update).await?;

        while let Ok(summary) = rx.try_recv() {
            let full_name = format!("{root}{}", summary.name);
            if let Some(entry) = self.files.iter_mut().find(|e| e.name() == full_name) {
                entry.apply_summary(&summary);
            }
        }
        Ok(archive)
    }
}

/// A view of an [`Archive`] rooted in one of its folders.
///
/// Names passed to a folder are relative to it, and generating a folder
/// produces an archive of its content only.
pub struct Folder<'a> {
    archive: &'a mut Archive,
    root: String,
}

impl Folder<'_> {
    /// Path of this folder, ending with `/`.
    pub fn root(&self) -> &str {
        &self.root
    }

    pub fn file(&mut self, name: &str, data: impl Into<ChunkData>) -> Result<&mut Self> {
        self.file_with_options(name, data, FileOptions::default())
    }

    pub fn file_with_options(
        &mut self,
        name: &str,
        data: impl Into<ChunkData>,
        options: FileOptions,
    ) -> Result<&mut Self> {
        entry::validate_name(name)?;
        let path = self.path(name);
        self.archive.file_with_options(&path, data, options)?;
        Ok(self)
    }

    pub fn file_with_loader(
        &mut self,
        name: &str,
        loader: Arc<dyn ContentLoader>,
        options: FileOptions,
    ) -> Result<&mut Self> {
        entry::validate_name(name)?;
        let path = self.path(name);
        self.archive.file_with_loader(&path, loader, options)?;
        Ok(self)
    }

    pub fn folder(&mut self, name: &str) -> Result<Folder<'_>> {
        self.folder_with_options(name, FileOptions::default())
    }

    pub fn folder_with_options(&mut self, name: &str, options: FileOptions) -> Result<Folder<'_>> {
        entry::validate_name(name)?;
        let path = self.path(name);
        self.archive.folder_with_options(&path, options)
    }

    /// Looks up an entry by its path relative to this folder.
    pub fn get(&self, name: &str) -> Option<&ArchiveEntry> {
        self.archive.get(&self.path(name))
    }

    /// Entries below this folder with their relative paths.
    pub fn entries(&self) -> impl Iterator<Item = (&str, &ArchiveEntry)> {
        entries_in(&self.archive.files, &self.root)
    }

    pub fn filter<F>(&self, predicate: F) -> Vec<&ArchiveEntry>
    where
        F: FnMut(&str, &ArchiveEntry) -> bool,
    {
        filter_in(&self.archive.files, &self.root, predicate)
    }

    pub fn remove(&mut self, name: &str) -> usize {
        let path = self.path(name);
        self.archive.remove_path(path)
    }

    pub async fn generate(&mut self, options: GenerateOptions) -> Result<GeneratedArchive> {
        self.archive.generate_in(self.root.clone(), options, |_| {}).await
    }

    pub async fn generate_with_progress<F>(
        &mut self,
        options: GenerateOptions,
        on_update: F,
    ) -> Result<GeneratedArchive>
    where
        F: FnMut(&ChunkMeta),
    {
        self.archive.generate_in(self.root.clone(), options, on_update).await
    }

    pub fn generate_stream(&self, options: GenerateOptions) -> Result<StreamHelper> {
        self.archive.build_stream(&self.root, &options, None)
    }

    fn path(&self, name: &str) -> String {
        format!("{}{name}", self.root)
    }
}

/// Entries strictly below `root`, paired with their path relative to it.
fn entries_in<'a>(
    files: &'a [ArchiveEntry],
    root: &'a str,
) -> impl Iterator<Item = (&'a str, &'a ArchiveEntry)> {
    files.iter().filter_map(move |entry| {
        let relative = entry.name().strip_prefix(root)?;
        (!relative.is_empty()).then_some((relative, entry))
    })
}

fn filter_in<'a, F>(files: &'a [ArchiveEntry], root: &'a str, mut predicate: F) -> Vec<&'a ArchiveEntry>
where
    F: FnMut(&str, &ArchiveEntry) -> bool,
{
    entries_in(files, root)
        .filter(|(relative, entry)| predicate(relative, entry))
        .map(|(_, entry)| entry)
        .collect()
}

/// `a/b/c.txt` -> `a/b/`, `a/b/` -> `a/`, `a` -> none.
fn parent_folder(path: &str) -> Option<&str> {
    let path = path.strip_suffix('/').unwrap_or(path);
    match path.rfind('/') {
        Some(index) if index > 0 => Some(&path[..=index]),
        _ => None,
    }
}
