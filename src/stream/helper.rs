use base64::Engine as _;
use base64::engine::general_purpose::STANDARD as BASE64_STANDARD;

use super::{Chunk, ChunkMeta, ConvertWorker, Event, GenericWorker, Worker};
use crate::error::{Error, Result};
use crate::utils::{self, ChunkData, DataType};

/// Shape of a generated archive.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum OutputType {
    #[default]
    Bytes,
    /// Bytes tagged with a MIME type.
    Blob,
    /// One char per byte.
    BinaryString,
    Base64,
}

impl OutputType {
    fn internal_type(self) -> DataType {
        match self {
            OutputType::Bytes | OutputType::Blob => DataType::Bytes,
            OutputType::BinaryString | OutputType::Base64 => DataType::Binary,
        }
    }
}

/// Bytes plus the MIME type they should be served with.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Blob {
    pub data: Vec<u8>,
    pub mime_type: String,
}

/// A complete archive in the requested [`OutputType`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum GeneratedArchive {
    Bytes(Vec<u8>),
    Blob(Blob),
    /// Binary string or base64 text.
    Text(String),
}

impl GeneratedArchive {
    pub fn as_bytes(&self) -> Option<&[u8]> {
        match self {
            GeneratedArchive::Bytes(bytes) => Some(bytes),
            GeneratedArchive::Blob(blob) => Some(&blob.data),
            GeneratedArchive::Text(_) => None,
        }
    }

    pub fn as_text(&self) -> Option<&str> {
        match self {
            GeneratedArchive::Text(text) => Some(text),
            _ => None,
        }
    }
}

/// Drives a locked pipeline and hands out what it produces.
///
/// The final stage is piped into a [`ConvertWorker`] producing the internal
/// representation of the requested output type, and the resulting chain is
/// locked.
pub struct StreamHelper {
    worker: GenericWorker,
    output_type: OutputType,
    mime_type: String,
    ended: bool,
}

impl StreamHelper {
    pub fn new(
        worker: impl Worker + 'static,
        output_type: OutputType,
        mime_type: impl Into<String>,
    ) -> Result<Self> {
        let internal = output_type.internal_type();
        let mut worker = worker.pipe(GenericWorker::new(ConvertWorker::new(internal)))?;
        worker.lock()?;
        Ok(Self {
            worker,
            output_type,
            mime_type: mime_type.into(),
            ended: false,
        })
    }

    pub fn output_type(&self) -> OutputType {
        self.output_type
    }

    pub fn pause(&mut self) -> bool {
        self.worker.pause()
    }

    pub fn resume(&mut self) -> bool {
        self.worker.resume()
    }

    pub fn is_finished(&self) -> bool {
        self.worker.is_finished()
    }

    /// Fails the generation with `err`, unwinding every open source.
    ///
    /// The error is returned by a following [`StreamHelper::next_chunk`].
    /// Returns `false` if the pipeline had already finished.
    pub fn abort(&mut self, err: Error) -> bool {
        self.worker.error(err)
    }

    /// Returns the next output chunk.
    ///
    /// `Ok(None)` means the archive is complete, or that the stream is
    /// paused. A failure anywhere in the pipeline is returned once as
    /// [`Error::Generation`].
    pub async fn next_chunk(&mut self) -> Result<Option<Chunk>> {
        if self.ended {
            return Ok(None);
        }
        match self.worker.next_event().await {
            Some(Event::Data(chunk)) => Ok(Some(chunk)),
            Some(Event::End) => {
                self.ended = true;
                Ok(None)
            }
            Some(Event::Error(err)) => {
                self.ended = true;
                Err(err.into_generation())
            }
            None => Ok(None),
        }
    }

    /// Runs the pipeline to the end and joins every chunk into one archive.
    ///
    /// `on_update` sees the metadata of every chunk. On error nothing
    /// produced so far is returned.
    pub async fn accumulate<F>(mut self, mut on_update: F) -> Result<GeneratedArchive>
    where
        F: FnMut(&ChunkMeta),
    {
        self.resume();
        let mut parts = Vec::new();
        loop {
            match self.worker.next_event().await {
                Some(Event::Data(chunk)) => {
                    on_update(&chunk.meta);
                    parts.push(chunk.data);
                }
                Some(Event::End) => break,
                Some(Event::Error(err)) => return Err(err.into_generation()),
                None => {
                    return Err(Error::Generation(Box::new(Error::Source(
                        "the stream stopped before the archive was complete".into(),
                    ))));
                }
            }
        }
        let data = utils::concat(self.output_type.internal_type(), parts)?;
        Ok(self.transform_output(data))
    }

    fn transform_output(self, data: ChunkData) -> GeneratedArchive {
        match self.output_type {
            OutputType::Bytes => GeneratedArchive::Bytes(data.into_bytes()),
            OutputType::Blob => GeneratedArchive::Blob(Blob {
                data: data.into_bytes(),
                mime_type: self.mime_type,
            }),
            OutputType::Base64 => GeneratedArchive::Text(BASE64_STANDARD.encode(data.into_bytes())),
            OutputType::BinaryString => match data {
                ChunkData::Binary(text) => GeneratedArchive::Text(text),
                other => GeneratedArchive::Text(utils::bytes_to_binary_string(&other.into_bytes())),
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::*;
    use crate::stream::{ContentSource, DataWorker};

    fn source(bytes: &[u8]) -> DataWorker {
        DataWorker::new(ContentSource::Ready(Arc::new(ChunkData::Bytes(bytes.to_vec())))).with_block_size(2)
    }

    #[tokio::test]
    async fn accumulates_bytes_with_progress() {
        let helper = StreamHelper::new(source(b"abcde"), OutputType::Bytes, "application/zip").unwrap();
        let mut percents = Vec::new();
        let out = helper.accumulate(|meta| percents.push(meta.percent)).await.unwrap();
        assert_eq!(out, GeneratedArchive::Bytes(b"abcde".to_vec()));
        assert_eq!(percents.len(), 3);
        assert_eq!(percents.last(), Some(&100.0));
    }

    #[tokio::test]
    async fn outputs_base64_and_binary_strings() {
        let base64 = StreamHelper::new(source(&[0xFF, 0x00, 0x41]), OutputType::Base64, "")
            .unwrap()
            .accumulate(|_| {})
            .await
            .unwrap();
        assert_eq!(base64.as_text(), Some("/wBB"));

        let binary = StreamHelper::new(source(&[0xFF, 0x41]), OutputType::BinaryString, "")
            .unwrap()
            .accumulate(|_| {})
            .await
            .unwrap();
        assert_eq!(binary.as_text(), Some("\u{ff}A"));
    }

    #[tokio::test]
    async fn blob_keeps_mime_type() {
        let out = StreamHelper::new(source(b"zip"), OutputType::Blob, "application/x-zip")
            .unwrap()
            .accumulate(|_| {})
            .await
            .unwrap();
        match out {
            GeneratedArchive::Blob(blob) => {
                assert_eq!(blob.data, b"zip");
                assert_eq!(blob.mime_type, "application/x-zip");
            }
            other => panic!("unexpected output: {other:?}"),
        }
    }

    #[tokio::test]
    async fn next_chunk_streams_until_the_end() {
        let mut helper = StreamHelper::new(source(b"abc"), OutputType::Bytes, "").unwrap();
        assert!(helper.next_chunk().await.unwrap().is_none());
        assert!(!helper.is_finished());

        helper.resume();
        let mut bytes = Vec::new();
        while let Some(chunk) = helper.next_chunk().await.unwrap() {
            bytes.extend(chunk.data.into_bytes());
        }
        assert_eq!(bytes, b"abc");
        assert!(helper.is_finished());
        assert!(helper.next_chunk().await.unwrap().is_none());
    }

    #[tokio::test]
    async fn errors_surface_as_generation_failures() {
        let mut worker = source(b"abc");
        worker.error(Error::Source("bad input".into()));
        let err = StreamHelper::new(worker, OutputType::Bytes, "")
            .unwrap()
            .accumulate(|_| {})
            .await
            .unwrap_err();
        assert!(matches!(err, Error::Generation(_)));
        assert!(matches!(err.root_cause(), Error::Source(msg) if msg == "bad input"));
    }

    #[test]
    fn the_helper_chain_is_locked() {
        let mut worker = source(b"abc");
        worker.lock().unwrap();
        assert!(matches!(
            StreamHelper::new(worker, OutputType::Bytes, ""),
            Err(Error::Structural(_))
        ));
    }
}
