use super::pre_state::StreamPreStateProcessor;
use crate::chunk::EventChunk;
use crate::error::{EngineError, EngineResult};
use crate::event::{ComplexEvent, StateEvent};
use crate::processor::{Processor, ProcessorRef};
use parking_lot::{Mutex, RwLock};
use std::sync::{Arc, Weak};

#[derive(Debug, Clone, Default)]
pub(crate) struct PostLinks {
    pub this_pre: Weak<StreamPreStateProcessor>,
    pub next_state: Option<Weak<StreamPreStateProcessor>>,
    /// Start of an `every` scope closed by this state
    pub next_every: Option<Weak<StreamPreStateProcessor>>,
    /// Records reaching this state complete the machine
    pub is_last: bool,
}

/// Exit side of one pattern state: receives records whose condition held
pub struct StreamPostStateProcessor {
    state_id: usize,
    links: RwLock<PostLinks>,
    returned: Mutex<Option<StateEvent>>,
}

impl StreamPostStateProcessor {
    pub fn new(state_id: usize) -> Arc<Self> {
        Arc::new(Self {
            state_id,
            links: RwLock::new(PostLinks::default()),
            returned: Mutex::new(None),
        })
    }

    pub(crate) fn link(&self, links: PostLinks) {
        *self.links.write() = links;
    }

    pub fn state_id(&self) -> usize {
        self.state_id
    }

    /// Completed record left by the last pass, if any.
    pub fn take_returned(&self) -> Option<StateEvent> {
        self.returned.lock().take()
    }

    fn advance(&self, mut record: StateEvent, links: &PostLinks) {
        if let Some(pre) = links.this_pre.upgrade() {
            pre.state_changed();
        }
        if let Some(ts) = record.stream_event(self.state_id).map(|e| e.timestamp) {
            record.timestamp = ts;
        }
        if let Some(every) = links.next_every.as_ref().and_then(Weak::upgrade) {
            every.add_every_state(&record);
        }
        if links.is_last {
            *self.returned.lock() = Some(record);
        } else if let Some(next) = links.next_state.as_ref().and_then(Weak::upgrade) {
            next.add_state(record);
        }
    }
}

impl Processor for StreamPostStateProcessor {
    fn name(&self) -> &'static str {
        "post state"
    }

    fn process(&self, chunk: EventChunk) -> EngineResult<()> {
        let links = self.links.read().clone();
        for event in chunk {
            match event {
                ComplexEvent::State(record) => self.advance(record, &links),
                ComplexEvent::Stream(_) => {
                    return Err(EngineError::illegal_state(
                        "post state processor expects correlation records",
                    ))
                }
            }
        }
        Ok(())
    }

    fn next_processor(&self) -> Option<ProcessorRef> {
        None
    }

    fn set_next_processor(&self, next: Option<ProcessorRef>) {
        if next.is_some() {
            tracing::warn!("post state processor is terminal; successor ignored");
        }
    }

    fn clone_processor(&self, _key: &str) -> EngineResult<ProcessorRef> {
        Ok(StreamPostStateProcessor::new(self.state_id))
    }
}
