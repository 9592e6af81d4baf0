//! Stream entry points
//!
//! An [`InputHandler`] converts raw `(timestamp, values)` tuples into pooled
//! stream events and hands them to a [`StreamJunction`], which fans each
//! chunk out to every query subscribed to the stream. A query that fails
//! is logged and does not keep the chunk from the others.

use crate::chunk::EventChunk;
use crate::error::{EngineError, EngineResult};
use crate::pool::{Attribute, MetaStreamEvent, StreamEventConverter, StreamEventPool};
use crate::processor::ProcessorRef;
use parking_lot::RwLock;
use std::sync::Arc;
use strata_core::Value;
use tracing::{error, trace};

struct Subscription {
    query: String,
    processor: ProcessorRef,
}

/// Fan-out point of one stream
pub struct StreamJunction {
    stream_id: String,
    meta: MetaStreamEvent,
    pool: Arc<StreamEventPool>,
    subscribers: RwLock<Vec<Subscription>>,
}

impl StreamJunction {
    pub fn new(stream_id: impl Into<String>, meta: MetaStreamEvent, pool_capacity: usize) -> Self {
        let pool = Arc::new(StreamEventPool::new(&meta, pool_capacity));
        Self {
            stream_id: stream_id.into(),
            meta,
            pool,
            subscribers: RwLock::new(Vec::new()),
        }
    }

    pub fn stream_id(&self) -> &str {
        &self.stream_id
    }

    pub fn meta(&self) -> &MetaStreamEvent {
        &self.meta
    }

    pub fn pool(&self) -> &Arc<StreamEventPool> {
        &self.pool
    }

    pub fn subscribe(&self, query: impl Into<String>, processor: ProcessorRef) {
        self.subscribers.write().push(Subscription {
            query: query.into(),
            processor,
        });
    }

    /// Detach every processor of `query`; returns how many were removed.
    pub fn unsubscribe(&self, query: &str) -> usize {
        let mut subscribers = self.subscribers.write();
        let before = subscribers.len();
        subscribers.retain(|s| s.query != query);
        before - subscribers.len()
    }

    pub fn subscriber_count(&self) -> usize {
        self.subscribers.read().len()
    }

    /// Deliver `chunk` to every subscriber, each receiving its own copy.
    /// Returns the first failure after all subscribers ran.
    pub fn send(&self, chunk: EventChunk) -> EngineResult<()> {
        if chunk.is_empty() {
            return Ok(());
        }
        let subscribers: Vec<(String, ProcessorRef)> = self
            .subscribers
            .read()
            .iter()
            .map(|s| (s.query.clone(), s.processor.clone()))
            .collect();
        trace!("{} delivering {} events to {} queries", self.stream_id, chunk.len(), subscribers.len());

        let mut first_failure = None;
        let mut remaining = subscribers.len();
        let mut chunk = Some(chunk);
        for (query, processor) in subscribers {
            remaining -= 1;
            let delivery = if remaining == 0 {
                chunk.take()
            } else {
                chunk.clone()
            };
            let Some(delivery) = delivery else {
                break;
            };
            if let Err(e) = processor.process(delivery) {
                error!("Query {} failed on stream {}: {}", query, self.stream_id, e);
                first_failure.get_or_insert(e);
            }
        }
        match first_failure {
            Some(e) => Err(e),
            None => Ok(()),
        }
    }
}

/// Typed producer for one stream
pub struct InputHandler {
    junction: Arc<StreamJunction>,
    converter: StreamEventConverter,
}

impl InputHandler {
    /// Input attributes are matched to the stream layout by name.
    pub fn new(junction: Arc<StreamJunction>, input: &[Attribute]) -> EngineResult<Self> {
        let converter = StreamEventConverter::for_layout(junction.pool().clone(), input, junction.meta())?;
        Ok(Self { junction, converter })
    }

    /// Input in the layout's own attribute order.
    pub fn for_junction(junction: Arc<StreamJunction>) -> EngineResult<Self> {
        let meta = junction.meta();
        let input: Vec<Attribute> = meta
            .before_window
            .iter()
            .chain(&meta.on_after_window)
            .chain(&meta.output)
            .cloned()
            .collect();
        if input.is_empty() {
            return Err(EngineError::validation(
                "input handler",
                format!("stream '{}' defines no attributes", junction.stream_id()),
            ));
        }
        Self::new(junction, &input)
    }

    pub fn stream_id(&self) -> &str {
        self.junction.stream_id()
    }

    pub fn send(&self, timestamp: i64, data: &[Value]) -> EngineResult<()> {
        let event = self.converter.convert(timestamp, data)?;
        self.junction.send(EventChunk::single(event))
    }

    /// Send several tuples as one chunk.
    pub fn send_all<'a>(&self, rows: impl IntoIterator<Item = (i64, &'a [Value])>) -> EngineResult<()> {
        let mut chunk = EventChunk::new();
        for (timestamp, data) in rows {
            chunk.push(self.converter.convert(timestamp, data)?);
        }
        self.junction.send(chunk)
    }
}
