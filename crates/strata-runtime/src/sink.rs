//! Terminal processors delivering query output

use crate::chunk::EventChunk;
use crate::error::{EngineError, EngineResult};
use crate::event::{ComplexEvent, EventKind};
use crate::processor::{Processor, ProcessorRef};
use parking_lot::Mutex;
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::info;

/// Receives the output of a query, split by kind
pub trait QueryCallback: Send + Sync {
    /// `current` holds arrivals, `expired` holds evictions. Reset and timer
    /// records are not delivered.
    fn receive(&self, timestamp: i64, current: &[ComplexEvent], expired: &[ComplexEvent]) -> EngineResult<()>;
}

/// Adapts a [`QueryCallback`] to the end of a processor chain
pub struct CallbackProcessor {
    callback: Arc<dyn QueryCallback>,
}

impl CallbackProcessor {
    pub fn new(callback: Arc<dyn QueryCallback>) -> Self {
        Self { callback }
    }
}

impl Processor for CallbackProcessor {
    fn name(&self) -> &'static str {
        "callback"
    }

    fn process(&self, chunk: EventChunk) -> EngineResult<()> {
        let Some(timestamp) = chunk.first().map(ComplexEvent::timestamp) else {
            return Ok(());
        };
        let (current, expired): (Vec<_>, Vec<_>) = chunk
            .into_iter()
            .filter(|e| matches!(e.kind(), EventKind::Current | EventKind::Expired))
            .partition(|e| e.kind() == EventKind::Current);
        if current.is_empty() && expired.is_empty() {
            return Ok(());
        }
        self.callback.receive(timestamp, &current, &expired)
    }

    fn next_processor(&self) -> Option<ProcessorRef> {
        None
    }

    fn set_next_processor(&self, next: Option<ProcessorRef>) {
        if next.is_some() {
            tracing::warn!("callback processor is terminal; successor ignored");
        }
    }

    fn clone_processor(&self, _key: &str) -> EngineResult<ProcessorRef> {
        Ok(Arc::new(CallbackProcessor::new(self.callback.clone())))
    }
}

/// Collects every record it receives, for tests and embedding
#[derive(Default)]
pub struct CollectingSink {
    events: Mutex<Vec<ComplexEvent>>,
    chunks: Mutex<Vec<(usize, bool)>>,
}

impl CollectingSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn events(&self) -> Vec<ComplexEvent> {
        self.events.lock().clone()
    }

    /// Records of the given kind, in arrival order.
    pub fn events_of(&self, kind: EventKind) -> Vec<ComplexEvent> {
        self.events
            .lock()
            .iter()
            .filter(|e| e.kind() == kind)
            .cloned()
            .collect()
    }

    /// `(len, is_batch)` of every chunk received.
    pub fn chunks(&self) -> Vec<(usize, bool)> {
        self.chunks.lock().clone()
    }

    pub fn len(&self) -> usize {
        self.events.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.events.lock().is_empty()
    }

    pub fn clear(&self) {
        self.events.lock().clear();
        self.chunks.lock().clear();
    }
}

impl Processor for CollectingSink {
    fn name(&self) -> &'static str {
        "collecting sink"
    }

    fn process(&self, chunk: EventChunk) -> EngineResult<()> {
        self.chunks.lock().push((chunk.len(), chunk.is_batch));
        self.events.lock().extend(chunk);
        Ok(())
    }

    fn next_processor(&self) -> Option<ProcessorRef> {
        None
    }

    fn set_next_processor(&self, _next: Option<ProcessorRef>) {}

    fn clone_processor(&self, _key: &str) -> EngineResult<ProcessorRef> {
        Ok(Arc::new(CollectingSink::new()))
    }
}

/// Forwards chunks to an async consumer over a tokio channel
pub struct ChannelSink {
    tx: mpsc::UnboundedSender<EventChunk>,
}

impl ChannelSink {
    pub fn new() -> (Self, mpsc::UnboundedReceiver<EventChunk>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self { tx }, rx)
    }
}

impl Processor for ChannelSink {
    fn name(&self) -> &'static str {
        "channel sink"
    }

    fn process(&self, chunk: EventChunk) -> EngineResult<()> {
        self.tx
            .send(chunk)
            .map_err(|_| EngineError::illegal_state("output channel closed"))
    }

    fn next_processor(&self) -> Option<ProcessorRef> {
        None
    }

    fn set_next_processor(&self, _next: Option<ProcessorRef>) {}

    /// Partition clones feed the same channel.
    fn clone_processor(&self, _key: &str) -> EngineResult<ProcessorRef> {
        Ok(Arc::new(ChannelSink {
            tx: self.tx.clone(),
        }))
    }
}

/// Logs each output record at info level
pub struct LoggingSink {
    query: String,
}

impl LoggingSink {
    pub fn new(query: impl Into<String>) -> Self {
        Self { query: query.into() }
    }
}

impl Processor for LoggingSink {
    fn name(&self) -> &'static str {
        "logging sink"
    }

    fn process(&self, chunk: EventChunk) -> EngineResult<()> {
        for event in &chunk {
            info!(
                query = %self.query,
                kind = ?event.kind(),
                timestamp = event.timestamp(),
                "{:?}",
                event.output_data()
            );
        }
        Ok(())
    }

    fn next_processor(&self) -> Option<ProcessorRef> {
        None
    }

    fn set_next_processor(&self, _next: Option<ProcessorRef>) {}

    fn clone_processor(&self, _key: &str) -> EngineResult<ProcessorRef> {
        Ok(Arc::new(LoggingSink::new(self.query.clone())))
    }
}
