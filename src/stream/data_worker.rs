use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;
use log::trace;

use super::worker::{Raised, Resumed, Worker, WorkerCore};
use super::{Chunk, Event, StreamInfo};
use crate::error::{Error, Result};
use crate::io::ContentLoader;
use crate::utils::{self, ChunkData};

/// Size of the slices a [`DataWorker`] emits per tick.
pub const DEFAULT_BLOCK_SIZE: usize = 16 * 1024;

/// Where a [`DataWorker`] gets its payload from.
#[derive(Clone)]
pub enum ContentSource {
    /// Payload already in memory.
    Ready(Arc<ChunkData>),
    /// Payload produced on the first tick.
    Deferred(Arc<dyn ContentLoader>),
}

impl fmt::Debug for ContentSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ContentSource::Ready(data) => f
                .debug_struct("Ready")
                .field("type", &data.data_type())
                .field("len", &data.len())
                .finish(),
            ContentSource::Deferred(_) => f.write_str("Deferred"),
        }
    }
}

/// Source stage slicing one in-memory payload into chunks.
///
/// Every tick first yields to the scheduler, then emits at most one block.
/// Chunks come out in payload order; the stage ends on the first tick that
/// finds the payload exhausted, so an empty payload ends without emitting
/// anything.
pub struct DataWorker {
    core: WorkerCore,
    loader: Option<Arc<dyn ContentLoader>>,
    data: Option<Arc<ChunkData>>,
    index: usize,
    max: usize,
    block_size: usize,
}

impl DataWorker {
    pub fn new(source: ContentSource) -> Self {
        let mut worker = Self {
            core: WorkerCore::new("DataWorker"),
            loader: None,
            data: None,
            index: 0,
            max: 0,
            block_size: DEFAULT_BLOCK_SIZE,
        };
        match source {
            ContentSource::Ready(data) => worker.set_data(data),
            ContentSource::Deferred(loader) => worker.loader = Some(loader),
        }
        worker
    }

    pub fn with_block_size(mut self, block_size: usize) -> Self {
        self.block_size = block_size.max(1);
        self
    }

    fn set_data(&mut self, data: Arc<ChunkData>) {
        self.max = match &*data {
            ChunkData::Text(s) | ChunkData::Binary(s) => s.len(),
            ChunkData::Utf16(units) => units.len(),
            ChunkData::Bytes(bytes) => bytes.len(),
        };
        self.data = Some(data);
    }

    async fn tick(&mut self) {
        tokio::task::yield_now().await;
        if !self.core.is_running() {
            return;
        }

        if self.data.is_none() {
            let Some(loader) = self.loader.take() else {
                self.error(Error::Source("content is no longer available".into()));
                return;
            };
            match loader.load().await {
                Ok(data) => self.set_data(Arc::new(data)),
                Err(err) => {
                    let err = match err {
                        Error::Source(_) => err,
                        other => Error::Source(other.to_string()),
                    };
                    self.error(err);
                    return;
                }
            }
        }

        if self.index >= self.max {
            self.end();
            return;
        }

        let Some(data) = self.data.as_deref() else {
            return;
        };
        let (chunk, next) = slice(data, self.index, self.block_size);
        self.index = next;
        let percent = self.index as f64 * 100.0 / self.max as f64;
        trace!("DataWorker tick: {}/{} ({percent:.1}%)", self.index, self.max);
        self.core.push(Chunk::new(chunk, percent));
    }

    fn end(&mut self) -> bool {
        if self.core.is_finished() {
            return false;
        }
        self.core.finish();
        self.clean_up();
        true
    }

    fn clean_up(&mut self) {
        self.data = None;
        self.loader = None;
    }
}

/// Cuts `[index, index + block)` out of `data`, never splitting a char.
fn slice(data: &ChunkData, index: usize, block: usize) -> (ChunkData, usize) {
    let end = index.saturating_add(block);
    match data {
        ChunkData::Text(s) | ChunkData::Binary(s) => {
            let mut next = utils::floor_char_boundary(s, end);
            if next <= index {
                next = index + s[index..].chars().next().map_or(1, char::len_utf8);
            }
            let part = s[index..next].to_owned();
            let chunk = if matches!(data, ChunkData::Text(_)) {
                ChunkData::Text(part)
            } else {
                ChunkData::Binary(part)
            };
            (chunk, next)
        }
        ChunkData::Utf16(units) => {
            let next = end.min(units.len());
            (ChunkData::Utf16(units[index..next].to_vec()), next)
        }
        ChunkData::Bytes(bytes) => {
            let next = end.min(bytes.len());
            (ChunkData::Bytes(bytes[index..next].to_vec()), next)
        }
    }
}

#[async_trait]
impl Worker for DataWorker {
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
            self.tick().await;
        }
    }

    fn pause(&mut self) -> bool {
        self.core.pause()
    }

    fn resume(&mut self) -> bool {
        match self.core.resume() {
            Resumed::NoOp => false,
            Resumed::Replay(err) => {
                self.error(err);
                false
            }
            Resumed::Running => true,
        }
    }

    fn error(&mut self, err: Error) -> bool {
        match self.core.raise(err) {
            Raised::Ignored => false,
            Raised::Stored => true,
            Raised::Raised(_) => {
                self.clean_up();
                true
            }
        }
    }

    fn lock(&mut self) -> Result<()> {
        let label = self.to_string();
        self.core.lock(&label)
    }
}

impl fmt::Display for DataWorker {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Worker {}", self.core.name())
    }
}
