use super::post_state::StreamPostStateProcessor;
use super::{StatePools, StateType};
use crate::chunk::EventChunk;
use crate::context::QueryContext;
use crate::error::{EngineError, EngineResult};
use crate::event::{ComplexEvent, EventKind, StateEvent, StreamEvent};
use crate::processor::{NextProcessor, Processor, ProcessorRef};
use crate::snapshot::{Snapshot, Snapshotable};
use parking_lot::{ReentrantMutex, RwLock};
use std::cell::RefCell;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};
use tracing::trace;

/// Static description of one state position
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PreStateConfig {
    pub state_id: usize,
    pub is_start: bool,
    pub state_type: StateType,
    /// Maximum distance in ms between the start state's event and an
    /// arrival for a pending record to stay alive
    pub within: Option<i64>,
    /// Slots whose timestamps anchor the `within` bound
    pub start_state_ids: Vec<usize>,
}

/// Neighbours in the state graph, wired after all pairs exist.
#[derive(Debug, Clone, Default)]
pub(crate) struct PreLinks {
    /// Post processor of the final state; holds completed records
    pub last_post: Weak<StreamPostStateProcessor>,
    /// Pre processor of the following state
    pub next_state: Option<Weak<StreamPreStateProcessor>>,
    /// Start of the enclosing `every` scope, receives records that expire
    pub within_every: Option<Weak<StreamPreStateProcessor>>,
    /// Start state told to re-seed when a sequence attempt fails here
    pub callback: Option<Weak<StreamPreStateProcessor>>,
    /// This state's own post processor restarts it after a match
    pub restarts_every: bool,
}

#[derive(Debug, Default)]
struct PendingLists {
    /// Records waiting for this state's condition
    pending: Vec<StateEvent>,
    /// Records admitted during the current pass, promoted by `update_state`
    staged: Vec<StateEvent>,
    initialized: bool,
}

/// Entry side of one pattern state.
///
/// Only [`process_and_return`](Processor::process_and_return) is supported:
/// the runtime collects completed matches from the return value. All list
/// mutation happens under one re-entrant lock because the condition chain
/// can call back into this instance (`every` restarts) on the same thread.
pub struct StreamPreStateProcessor {
    element_id: String,
    config: PreStateConfig,
    pools: StatePools,
    ctx: QueryContext,
    links: RwLock<PreLinks>,
    lists: ReentrantMutex<RefCell<PendingLists>>,
    changed: AtomicBool,
    start_state_reset: AtomicBool,
    next: NextProcessor,
}

impl StreamPreStateProcessor {
    pub fn new(config: PreStateConfig, pools: StatePools, ctx: &QueryContext) -> Arc<Self> {
        let element_id = ctx.next_element_id("StreamPreStateProcessor");
        Self::build(element_id, config, pools, ctx)
    }

    fn build(element_id: String, config: PreStateConfig, pools: StatePools, ctx: &QueryContext) -> Arc<Self> {
        Arc::new_cyclic(|this: &Weak<StreamPreStateProcessor>| {
            let snapshotable: Weak<dyn Snapshotable> = this.clone();
            ctx.register_snapshotable(&element_id, snapshotable);
            StreamPreStateProcessor {
                element_id,
                config,
                pools,
                ctx: ctx.clone(),
                links: RwLock::new(PreLinks::default()),
                lists: ReentrantMutex::new(RefCell::new(PendingLists::default())),
                changed: AtomicBool::new(false),
                start_state_reset: AtomicBool::new(false),
                next: NextProcessor::new(),
            }
        })
    }

    /// Unlinked copy with empty lists, for a partition.
    pub fn clone_for(&self, key: &str) -> Arc<Self> {
        Self::build(
            format!("{}-{}", self.element_id, key),
            self.config.clone(),
            self.pools.clone(),
            &self.ctx,
        )
    }

    pub(crate) fn link(&self, links: PreLinks) {
        *self.links.write() = links;
    }

    pub fn element_id(&self) -> &str {
        &self.element_id
    }

    pub fn state_id(&self) -> usize {
        self.config.state_id
    }

    pub fn is_start_state(&self) -> bool {
        self.config.is_start
    }

    pub fn pending_len(&self) -> usize {
        let guard = self.lists.lock();
        let n = guard.borrow().pending.len();
        n
    }

    pub fn staged_len(&self) -> usize {
        let guard = self.lists.lock();
        let n = guard.borrow().staged.len();
        n
    }

    /// Called by this state's post processor when the condition held.
    pub fn state_changed(&self) {
        self.changed.store(true, Ordering::Release);
    }

    /// Ask a start state to seed a fresh attempt at the next reset.
    pub fn start_state_reset(&self) {
        self.start_state_reset.store(true, Ordering::Release);
    }

    /// Stage a forked or advanced record. A sequence admits one staged
    /// attempt at a time.
    pub fn add_state(&self, record: StateEvent) {
        let guard = self.lists.lock();
        let mut lists = guard.borrow_mut();
        if self.config.state_type == StateType::Sequence && !lists.staged.is_empty() {
            self.pools.state_pool.release(record);
            return;
        }
        lists.staged.push(record);
    }

    /// Stage an independent copy of `record` to restart this state. Slots
    /// from this state onward are cleared on the copy.
    pub fn add_every_state(&self, record: &StateEvent) {
        let mut copy = self.pools.state_cloner.copy_state_event(record);
        for id in self.config.state_id..copy.slot_count() {
            copy.set_stream_event(id, None);
        }
        let guard = self.lists.lock();
        guard.borrow_mut().staged.push(copy);
    }

    /// Promote staged records to pending.
    pub fn update_state(&self) {
        let guard = self.lists.lock();
        let mut lists = guard.borrow_mut();
        let staged = std::mem::take(&mut lists.staged);
        lists.pending.extend(staged);
    }

    /// Drop every pending record and re-seed the start state if the machine
    /// has no attempt in flight.
    pub fn reset_state(&self) {
        let guard = self.lists.lock();
        {
            let mut lists = guard.borrow_mut();
            let pool = &self.pools.state_pool;
            lists.pending.drain(..).for_each(|r| pool.release(r));
            if !self.config.is_start || !lists.staged.is_empty() {
                return;
            }
        }
        let links = self.links.read().clone();
        if self.config.state_type == StateType::Sequence && !links.restarts_every {
            let next_busy = links
                .next_state
                .and_then(|w| w.upgrade())
                .is_some_and(|next| next.pending_len() > 0);
            if next_busy {
                return;
            }
        }
        self.init_locked(&mut guard.borrow_mut(), links.restarts_every);
    }

    /// Seed the start state with an empty record.
    pub fn init(&self) {
        let restarts_every = self.links.read().restarts_every;
        let guard = self.lists.lock();
        self.init_locked(&mut guard.borrow_mut(), restarts_every);
    }

    fn init_locked(&self, lists: &mut PendingLists, restarts_every: bool) {
        if !self.config.is_start {
            return;
        }
        let reset_requested = self.start_state_reset.swap(false, Ordering::AcqRel);
        if !lists.initialized || restarts_every || reset_requested {
            lists.staged.push(self.pools.state_pool.borrow_event());
            lists.initialized = true;
        }
    }

    /// Remove pending records that fell outside `within` at `now`.
    /// Returns how many expired.
    pub fn expire_pending(&self, now: i64) -> usize {
        if self.config.within.is_none() || self.config.is_start {
            return 0;
        }
        let guard = self.lists.lock();
        let pending = std::mem::take(&mut guard.borrow_mut().pending);
        let (expired, kept): (Vec<_>, Vec<_>) = pending.into_iter().partition(|r| self.is_expired(r, now));
        let count = expired.len();
        for record in expired {
            self.forward_expired(record);
        }
        Self::restore_pending(&mut guard.borrow_mut(), kept);
        count
    }

    /// Earliest time at which a waiting record falls outside `within`.
    pub fn next_expiry(&self) -> Option<i64> {
        let within = self.config.within.filter(|_| !self.config.is_start)?;
        let guard = self.lists.lock();
        let lists = guard.borrow();
        let oldest = lists
            .pending
            .iter()
            .chain(lists.staged.iter())
            .flat_map(|record| {
                self.config
                    .start_state_ids
                    .iter()
                    .filter_map(move |id| record.stream_event(*id).map(|start| start.timestamp))
            })
            .min();
        oldest.map(|start| start.saturating_add(within).saturating_add(1))
    }

    fn is_expired(&self, record: &StateEvent, now: i64) -> bool {
        let Some(within) = self.config.within else {
            return false;
        };
        !self.config.is_start
            && self.config.start_state_ids.iter().any(|id| {
                record
                    .stream_event(*id)
                    .is_some_and(|start| start.timestamp.abs_diff(now) > within.unsigned_abs())
            })
    }

    /// Hand an expired record to the enclosing `every` scope, if any, so a
    /// restart pattern does not lose its attempt.
    fn forward_expired(&self, record: StateEvent) {
        trace!("{} expired a pending record", self.element_id);
        let within_every = self.links.read().within_every.clone();
        match within_every.and_then(|w| w.upgrade()) {
            Some(every) => {
                every.add_every_state(&record);
                every.update_state();
                self.pools.state_pool.release(record);
            }
            None => self.pools.state_pool.release(record),
        }
    }

    /// Put surviving records back ahead of anything promoted meanwhile.
    fn restore_pending(lists: &mut PendingLists, kept: Vec<StateEvent>) {
        let promoted = std::mem::replace(&mut lists.pending, kept);
        lists.pending.extend(promoted);
    }

    /// Run one pending record with `event` attached through the condition
    /// chain. Returns whether the condition held.
    fn attempt(&self, record: &StateEvent, event: &StreamEvent, out: &mut EventChunk) -> EngineResult<bool> {
        let mut candidate = self.pools.state_cloner.copy_state_event(record);
        candidate.set_stream_event(
            self.config.state_id,
            Some(self.pools.stream_cloner.copy_stream_event(event)),
        );
        self.changed.store(false, Ordering::Release);
        self.next.forward(EventChunk::single(candidate))?;

        let last_post = self.links.read().last_post.clone();
        if let Some(completed) = last_post.upgrade().and_then(|post| post.take_returned()) {
            out.push(completed);
        }
        Ok(self.changed.load(Ordering::Acquire))
    }

    fn on_unchanged(&self, record: StateEvent, kept: &mut Vec<StateEvent>) {
        match self.config.state_type {
            StateType::Pattern => kept.push(record),
            StateType::Sequence => {
                self.pools.state_pool.release(record);
                let callback = self.links.read().callback.clone();
                if let Some(start) = callback.and_then(|w| w.upgrade()) {
                    start.start_state_reset();
                }
            }
        }
    }
}

impl Processor for StreamPreStateProcessor {
    fn name(&self) -> &'static str {
        "pre state"
    }

    fn process(&self, _chunk: EventChunk) -> EngineResult<()> {
        Err(EngineError::illegal_state(
            "process of a pre state processor must not be called; use process_and_return",
        ))
    }

    /// Only the first `Current` stream event of the chunk is considered.
    fn process_and_return(&self, chunk: EventChunk) -> EngineResult<EventChunk> {
        let event = chunk.into_iter().find_map(|e| match e {
            ComplexEvent::Stream(s) if s.kind == EventKind::Current => Some(s),
            _ => None,
        });
        let Some(event) = event else {
            return Ok(EventChunk::new());
        };

        let guard = self.lists.lock();
        let pending = std::mem::take(&mut guard.borrow_mut().pending);
        let mut kept = Vec::with_capacity(pending.len());
        let mut out = EventChunk::new();
        let mut failure = None;

        let mut records = pending.into_iter();
        while let Some(record) = records.next() {
            if self.is_expired(&record, event.timestamp) {
                self.forward_expired(record);
                continue;
            }
            match self.attempt(&record, &event, &mut out) {
                Ok(true) => self.pools.state_pool.release(record),
                Ok(false) => self.on_unchanged(record, &mut kept),
                Err(e) => {
                    kept.push(record);
                    failure = Some(e);
                    break;
                }
            }
        }
        kept.extend(records);
        Self::restore_pending(&mut guard.borrow_mut(), kept);

        match failure {
            Some(e) => Err(e),
            None => Ok(out),
        }
    }

    fn next_processor(&self) -> Option<ProcessorRef> {
        self.next.get()
    }

    fn set_next_processor(&self, next: Option<ProcessorRef>) {
        self.next.set(next);
    }

    fn clone_processor(&self, key: &str) -> EngineResult<ProcessorRef> {
        Ok(self.clone_for(key))
    }
}

impl Snapshotable for StreamPreStateProcessor {
    fn element_id(&self) -> &str {
        &self.element_id
    }

    fn current_state(&self) -> EngineResult<Snapshot> {
        let guard = self.lists.lock();
        let lists = guard.borrow();
        Snapshot::new(&self.element_id)
            .with("pending", &lists.pending)?
            .with("staged", &lists.staged)?
            .with("initialized", &lists.initialized)?
            .with("start_state_reset", &self.start_state_reset.load(Ordering::Acquire))
    }

    fn restore_state(&self, snapshot: &Snapshot) -> EngineResult<()> {
        let restored = PendingLists {
            pending: snapshot.get("pending")?,
            staged: snapshot.get("staged")?,
            initialized: snapshot.get("initialized")?,
        };
        let reset: bool = snapshot.get("start_state_reset")?;
        let guard = self.lists.lock();
        *guard.borrow_mut() = restored;
        self.start_state_reset.store(reset, Ordering::Release);
        Ok(())
    }
}
