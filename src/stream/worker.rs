//! The pipeline stage primitive.
//!
//! A [`Worker`] is one node of a chain. Chains are singly linked backwards:
//! every stage owns the stage before it, and events are pulled from the
//! head of the chain down to the tail. A stage starts paused, runs after
//! [`Worker::resume`], and ends up either finished or errored:
//!
//! ```text
//! Paused <-> Running -> Finished
//!                    -> Errored
//! ```
//!
//! Pausing and resuming propagate up the chain. An error raised while a
//! stage is paused is stored and replayed by the next `resume`. Once a
//! chain is locked its structure is frozen and any further `pipe` fails
//! with [`Error::Structural`].

use std::collections::VecDeque;
use std::fmt;

use async_trait::async_trait;

use super::{Chunk, Event, StreamInfo, StreamInfoUpdate};
use crate::error::{Error, Result};

/// Lifecycle state of a stage.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WorkerState {
    Paused,
    Running,
    Finished,
    Errored,
}

/// Outcome of a resume transition.
#[derive(Debug)]
pub(crate) enum Resumed {
    /// Already running or done.
    NoOp,
    Running,
    /// An error was stored while paused and must be raised now.
    Replay(Error),
}

/// Outcome of an error transition.
#[derive(Debug)]
pub(crate) enum Raised {
    /// Already finished.
    Ignored,
    /// Paused: kept for the next resume.
    Stored,
    /// Queued downstream; the caller propagates it upstream and cleans up.
    Raised(Error),
}

/// State shared by every kind of stage.
#[derive(Debug)]
pub struct WorkerCore {
    name: String,
    state: WorkerState,
    locked: bool,
    generated_error: Option<Error>,
    stream_info: Option<StreamInfo>,
    extra_stream_info: Vec<StreamInfoUpdate>,
    queue: VecDeque<Event>,
}

impl WorkerCore {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            state: WorkerState::Paused,
            locked: false,
            generated_error: None,
            stream_info: Some(StreamInfo::default()),
            extra_stream_info: Vec::new(),
            queue: VecDeque::new(),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn state(&self) -> WorkerState {
        self.state
    }

    pub fn is_running(&self) -> bool {
        self.state == WorkerState::Running
    }

    pub fn is_paused(&self) -> bool {
        self.state == WorkerState::Paused
    }

    pub fn is_finished(&self) -> bool {
        matches!(self.state, WorkerState::Finished | WorkerState::Errored)
    }

    pub fn is_locked(&self) -> bool {
        self.locked
    }

    pub fn stream_info(&self) -> Option<&StreamInfo> {
        self.stream_info.as_ref()
    }

    /// Queues a chunk for the next stage.
    pub fn push(&mut self, chunk: Chunk) {
        self.queue.push_back(Event::Data(chunk));
    }

    pub fn outbox(&mut self) -> Outbox<'_> {
        Outbox {
            queue: &mut self.queue,
        }
    }

    pub(crate) fn pop(&mut self) -> Option<Event> {
        self.queue.pop_front()
    }

    /// Records an extra stream info value and applies it right away.
    pub fn with_stream_info(&mut self, update: StreamInfoUpdate) {
        if let Some(info) = self.stream_info.as_mut() {
            info.merge(&update);
        }
        self.extra_stream_info.push(update);
    }

    pub(crate) fn take_stream_info(&mut self) -> StreamInfo {
        self.stream_info.take().unwrap_or_default()
    }

    pub(crate) fn restore_stream_info(&mut self, info: StreamInfo) {
        self.stream_info = Some(info);
    }

    /// Takes over the stream info of the previous stage and merges this
    /// stage's own contributions into it.
    pub(crate) fn adopt_stream_info(&mut self, mut info: StreamInfo) {
        for update in &self.extra_stream_info {
            info.merge(update);
        }
        self.stream_info = Some(info);
    }

    pub(crate) fn pause(&mut self) -> bool {
        if self.state != WorkerState::Paused && !self.is_finished() {
            self.state = WorkerState::Paused;
            true
        } else {
            false
        }
    }

    pub(crate) fn resume(&mut self) -> Resumed {
        if self.state != WorkerState::Paused {
            return Resumed::NoOp;
        }
        self.state = WorkerState::Running;
        match self.generated_error.take() {
            Some(err) => Resumed::Replay(err),
            None => Resumed::Running,
        }
    }

    pub(crate) fn raise(&mut self, err: Error) -> Raised {
        if self.is_finished() {
            return Raised::Ignored;
        }
        if self.is_paused() {
            self.generated_error = Some(err);
            return Raised::Stored;
        }
        self.state = WorkerState::Errored;
        self.queue.push_back(Event::Error(err.clone()));
        Raised::Raised(err)
    }

    /// Queues the end event and marks the stage finished.
    pub(crate) fn finish(&mut self) {
        self.queue.push_back(Event::End);
        self.state = WorkerState::Finished;
    }

    pub(crate) fn lock(&mut self, label: &str) -> Result<()> {
        if self.locked {
            return Err(Error::Structural(label.to_owned()));
        }
        self.locked = true;
        Ok(())
    }
}

/// Write handle to a stage's output queue.
pub struct Outbox<'a> {
    queue: &'a mut VecDeque<Event>,
}

impl Outbox<'_> {
    pub fn push(&mut self, chunk: Chunk) {
        self.queue.push_back(Event::Data(chunk));
    }
}

/// A node of the processing pipeline.
#[async_trait]
pub trait Worker: Send + fmt::Display {
    fn core(&self) -> &WorkerCore;

    fn core_mut(&mut self) -> &mut WorkerCore;

    /// Pulls the next event out of this stage.
    ///
    /// `info` is the chain's shared stream info, lent by the tail. Returns
    /// `None` when nothing can be produced right now: the stage is paused,
    /// or it has finished and its queue is drained.
    async fn pull(&mut self, info: &mut StreamInfo) -> Option<Event>;

    /// Pauses this stage and everything upstream. Returns `false` if it was
    /// already paused or finished.
    fn pause(&mut self) -> bool;

    /// Resumes this stage and everything upstream. Returns `false` if it
    /// was not paused, or if a stored error was raised instead.
    fn resume(&mut self) -> bool;

    /// Fails this stage and everything upstream. Returns `false` if the
    /// stage had already finished.
    fn error(&mut self, err: Error) -> bool;

    /// Freezes the structure of this stage and everything upstream.
    fn lock(&mut self) -> Result<()>;

    /// Attaches `previous` as the input of this stage.
    fn register_previous(&mut self, previous: Box<dyn Worker>) -> Result<()> {
        drop(previous);
        Err(Error::Unsupported(format!(
            "worker '{}' produces data and takes no input",
            self.name()
        )))
    }

    fn name(&self) -> &str {
        self.core().name()
    }

    fn is_locked(&self) -> bool {
        self.core().is_locked()
    }

    fn is_paused(&self) -> bool {
        self.core().is_paused()
    }

    fn is_finished(&self) -> bool {
        self.core().is_finished()
    }

    /// Stream info of the chain ending at this stage.
    fn stream_info(&self) -> Option<&StreamInfo> {
        self.core().stream_info()
    }

    fn take_stream_info(&mut self) -> StreamInfo {
        self.core_mut().take_stream_info()
    }

    /// Pulls the next event, with this stage acting as the tail of its
    /// chain.
    async fn next_event(&mut self) -> Option<Event> {
        let mut info = self.core_mut().take_stream_info();
        let event = self.pull(&mut info).await;
        self.core_mut().restore_stream_info(info);
        event
    }

    /// Pipes this stage into `next` and returns `next`.
    fn pipe<N: Worker>(self, mut next: N) -> Result<N>
    where
        Self: Sized + 'static,
    {
        if self.is_locked() {
            return Err(Error::Structural(self.to_string()));
        }
        next.register_previous(Box::new(self))?;
        Ok(next)
    }

    /// Adds a stream info value contributed by this stage.
    fn with_stream_info(mut self, update: StreamInfoUpdate) -> Self
    where
        Self: Sized,
    {
        self.core_mut().with_stream_info(update);
        self
    }
}

/// Behaviour of a [`GenericWorker`].
pub trait Transform: Send {
    fn name(&self) -> String;

    /// Stream info values this stage owns, merged when it is attached.
    fn stream_info_defaults(&self) -> Vec<StreamInfoUpdate> {
        Vec::new()
    }

    /// Handles one chunk. The default forwards it unchanged.
    fn process_chunk(
        &mut self,
        chunk: Chunk,
        info: &mut StreamInfo,
        out: &mut Outbox<'_>,
    ) -> Result<()> {
        let _ = info;
        out.push(chunk);
        Ok(())
    }

    /// Called once the previous stage ended, before this one ends.
    fn flush(&mut self, info: &mut StreamInfo, out: &mut Outbox<'_>) -> Result<()> {
        let _ = (info, out);
        Ok(())
    }

    fn clean_up(&mut self) {}
}

/// A stage that feeds every chunk of its input through a [`Transform`].
pub struct GenericWorker {
    core: WorkerCore,
    transform: Box<dyn Transform>,
    previous: Option<Box<dyn Worker>>,
}

impl GenericWorker {
    pub fn new(transform: impl Transform + 'static) -> Self {
        let mut core = WorkerCore::new(transform.name());
        for update in transform.stream_info_defaults() {
            core.with_stream_info(update);
        }
        Self {
            core,
            transform: Box::new(transform),
            previous: None,
        }
    }

    /// A stage that forwards chunks unchanged.
    pub fn passthrough(name: impl Into<String>) -> Self {
        Self::new(super::Passthrough::new(name))
    }

    fn end(&mut self, info: &mut StreamInfo) -> bool {
        if self.core.is_finished() {
            return false;
        }
        if let Err(err) = self.transform.flush(info, &mut self.core.outbox()) {
            return self.error(err);
        }
        self.core.finish();
        self.clean_up();
        true
    }

    fn clean_up(&mut self) {
        self.transform.clean_up();
        self.previous = None;
    }
}

#[async_trait]
impl Worker for GenericWorker {
    fn core(&self) -> &WorkerCore {
        &self.core
    }

    fn core_mut(&mut self) -> &mut WorkerCore {
        &mut self.core
    }

    async fn pull(&mut self, info: &mut StreamInfo) -> Option<Event> {
        loop {
            if let Some(event) = self.core.pop() {
                return Some(event);
            }
            if !self.core.is_running() {
                return None;
            }
            let previous = self.previous.as_mut()?;
            match previous.pull(info).await? {
                Event::Data(chunk) => {
                    let result = self
                        .transform
                        .process_chunk(chunk, info, &mut self.core.outbox());
                    if let Err(err) = result {
                        self.error(err);
                    }
                }
                Event::End => {
                    self.end(info);
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
        if let Some(previous) = self.previous.as_mut() {
            previous.pause();
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
                if let Some(previous) = self.previous.as_mut() {
                    previous.resume();
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
                if let Some(previous) = self.previous.as_mut() {
                    previous.error(err);
                }
                self.clean_up();
                true
            }
        }
    }

    fn lock(&mut self) -> Result<()> {
        let label = self.to_string();
        self.core.lock(&label)?;
        match self.previous.as_mut() {
            Some(previous) => previous.lock(),
            None => Ok(()),
        }
    }

    fn register_previous(&mut self, mut previous: Box<dyn Worker>) -> Result<()> {
        if self.core.is_locked() {
            return Err(Error::Structural(self.to_string()));
        }
        let info = previous.take_stream_info();
        self.core.adopt_stream_info(info);
        self.previous = Some(previous);
        Ok(())
    }
}

impl fmt::Debug for GenericWorker {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("GenericWorker")
            .field("chain", &self.to_string())
            .field("state", &self.core.state())
            .finish()
    }
}

impl fmt::Display for GenericWorker {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.previous {
            Some(previous) => write!(f, "{previous} -> Worker {}", self.core.name()),
            None => write!(f, "Worker {}", self.core.name()),
        }
    }
}
