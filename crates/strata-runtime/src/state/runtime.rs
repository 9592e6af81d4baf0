use super::post_state::{PostLinks, StreamPostStateProcessor};
use super::pre_state::{PreLinks, PreStateConfig, StreamPreStateProcessor};
use super::{StatePools, StateType};
use crate::chunk::EventChunk;
use crate::context::QueryContext;
use crate::error::{EngineError, EngineResult};
use crate::event::{ComplexEvent, EventKind, StreamEvent};
use crate::processor::{Condition, FilterProcessor, NextProcessor, Processor, ProcessorRef};
use crate::snapshot::{Snapshot, Snapshotable};
use indexmap::IndexMap;
use parking_lot::{Mutex, ReentrantMutex};
use std::sync::{Arc, Weak};
use tracing::debug;

/// One position of a pattern: the stream it listens to and its condition
#[derive(Clone)]
pub struct StateSpec {
    pub stream_id: String,
    pub condition: Option<Condition>,
}

/// Declarative description of a pattern or sequence, compiled by
/// [`StatePlan::build`]
#[derive(Clone)]
pub struct StatePlan {
    state_type: StateType,
    states: Vec<StateSpec>,
    every: Option<(usize, usize)>,
    within: Option<i64>,
}

impl StatePlan {
    /// `A -> B -> ...`
    pub fn pattern() -> Self {
        Self::new(StateType::Pattern)
    }

    /// `A, B, ...`
    pub fn sequence() -> Self {
        Self::new(StateType::Sequence)
    }

    fn new(state_type: StateType) -> Self {
        Self {
            state_type,
            states: Vec::new(),
            every: None,
            within: None,
        }
    }

    /// Append a state matching any event of `stream_id`.
    pub fn then(mut self, stream_id: impl Into<String>) -> Self {
        self.states.push(StateSpec {
            stream_id: stream_id.into(),
            condition: None,
        });
        self
    }

    /// Append a state whose condition sees the correlation record with the
    /// arriving event already in this state's slot.
    pub fn then_where(
        mut self,
        stream_id: impl Into<String>,
        condition: impl Fn(&ComplexEvent) -> bool + Send + Sync + 'static,
    ) -> Self {
        self.states.push(StateSpec {
            stream_id: stream_id.into(),
            condition: Some(Arc::new(condition)),
        });
        self
    }

    /// Wrap states `first..=last` in an `every` scope.
    pub fn every(mut self, first: usize, last: usize) -> Self {
        self.every = Some((first, last));
        self
    }

    /// Bound the whole match to `ms` milliseconds after the start state.
    pub fn within(mut self, ms: i64) -> Self {
        self.within = Some(ms);
        self
    }

    fn validate(&self, pools: &StatePools) -> EngineResult<()> {
        if self.states.is_empty() {
            return Err(EngineError::validation("state plan", "at least one state is required"));
        }
        if pools.state_pool.slots() != self.states.len() {
            return Err(EngineError::validation(
                "state plan",
                format!(
                    "state pool has {} slots for {} states",
                    pools.state_pool.slots(),
                    self.states.len()
                ),
            ));
        }
        if let Some((first, last)) = self.every {
            if first > last || last >= self.states.len() {
                return Err(EngineError::validation(
                    "state plan",
                    format!("every scope {first}..={last} outside {} states", self.states.len()),
                ));
            }
        }
        if let Some(within) = self.within {
            if within <= 0 {
                return Err(EngineError::validation(
                    "state plan",
                    format!("within must be positive, found {within}"),
                ));
            }
        }
        Ok(())
    }

    pub fn build(self, pools: StatePools, ctx: &QueryContext) -> EngineResult<Arc<StateStreamRuntime>> {
        self.validate(&pools)?;
        let pres = self
            .states
            .iter()
            .enumerate()
            .map(|(state_id, _)| {
                StreamPreStateProcessor::new(
                    PreStateConfig {
                        state_id,
                        is_start: state_id == 0,
                        state_type: self.state_type,
                        within: self.within,
                        start_state_ids: vec![0],
                    },
                    pools.clone(),
                    ctx,
                )
            })
            .collect();
        let element_id = ctx.next_element_id("StateStreamRuntime");
        Ok(StateStreamRuntime::assemble(element_id, self, pres, pools, ctx))
    }
}

struct StateNode {
    stream_id: String,
    pre: Arc<StreamPreStateProcessor>,
    post: Arc<StreamPostStateProcessor>,
}

/// A compiled pattern or sequence.
///
/// Events enter through per-stream [`StateStreamReceiver`]s. Completed
/// matches leave as correlation records through the runtime's successor.
/// One re-entrant lock serializes receivers and timer purges so states only
/// ever lock each other from a single thread.
pub struct StateStreamRuntime {
    element_id: String,
    plan: StatePlan,
    nodes: Vec<StateNode>,
    /// Stream id to the states it feeds, in visiting order
    receivers: IndexMap<String, Vec<usize>>,
    pools: StatePools,
    ctx: QueryContext,
    lock: ReentrantMutex<()>,
    /// Deadline of the purge timer currently registered, if any
    armed: Mutex<Option<i64>>,
    next: NextProcessor,
    this: Weak<StateStreamRuntime>,
}

impl StateStreamRuntime {
    fn assemble(
        element_id: String,
        plan: StatePlan,
        pres: Vec<Arc<StreamPreStateProcessor>>,
        pools: StatePools,
        ctx: &QueryContext,
    ) -> Arc<Self> {
        let nodes: Vec<StateNode> = plan
            .states
            .iter()
            .zip(pres)
            .enumerate()
            .map(|(state_id, (spec, pre))| {
                let post = StreamPostStateProcessor::new(state_id);
                let post_ref: ProcessorRef = post.clone();
                match &spec.condition {
                    Some(condition) => {
                        let filter = Arc::new(FilterProcessor::new(condition.clone()));
                        filter.set_next_processor(Some(post_ref));
                        pre.set_next_processor(Some(filter));
                    }
                    None => pre.set_next_processor(Some(post_ref)),
                }
                StateNode {
                    stream_id: spec.stream_id.clone(),
                    pre,
                    post,
                }
            })
            .collect();
        Self::wire(&nodes, &plan);

        let mut receivers: IndexMap<String, Vec<usize>> = IndexMap::new();
        for (state_id, node) in nodes.iter().enumerate() {
            receivers.entry(node.stream_id.clone()).or_default().push(state_id);
        }
        if plan.state_type == StateType::Sequence {
            receivers.values_mut().for_each(|order| order.reverse());
        }

        let runtime = Arc::new_cyclic(|this: &Weak<StateStreamRuntime>| {
            let snapshotable: Weak<dyn Snapshotable> = this.clone();
            ctx.register_snapshotable(&element_id, snapshotable);
            StateStreamRuntime {
                element_id,
                plan,
                nodes,
                receivers,
                pools,
                ctx: ctx.clone(),
                lock: ReentrantMutex::new(()),
                armed: Mutex::new(None),
                next: NextProcessor::new(),
                this: this.clone(),
            }
        });
        runtime.init();
        debug!(
            "Created {} ({:?}, {} states, within {:?})",
            runtime.element_id,
            runtime.plan.state_type,
            runtime.nodes.len(),
            runtime.plan.within
        );
        runtime
    }

    fn wire(nodes: &[StateNode], plan: &StatePlan) {
        let Some(last) = nodes.last() else {
            return;
        };
        let last_index = nodes.len() - 1;
        let every_start = |(first, _): (usize, usize)| Arc::downgrade(&nodes[first].pre);

        for (i, node) in nodes.iter().enumerate() {
            let next_state = nodes.get(i + 1).map(|n| Arc::downgrade(&n.pre));
            let closes_every = plan.every.filter(|(_, end)| *end == i);
            let inside_every = plan
                .every
                .filter(|(first, end)| i > *first && i <= *end)
                .filter(|_| plan.within.is_some());

            node.pre.link(PreLinks {
                last_post: Arc::downgrade(&last.post),
                next_state: next_state.clone(),
                within_every: inside_every.map(every_start),
                callback: (plan.state_type == StateType::Sequence).then(|| Arc::downgrade(&nodes[0].pre)),
                restarts_every: closes_every.is_some(),
            });
            node.post.link(PostLinks {
                this_pre: Arc::downgrade(&node.pre),
                next_state,
                next_every: closes_every.map(every_start),
                is_last: i == last_index,
            });
        }
    }

    fn init(&self) {
        let _guard = self.lock.lock();
        for node in self.nodes.iter().filter(|n| n.pre.is_start_state()) {
            node.pre.init();
        }
        self.update_all();
    }

    pub fn element_id(&self) -> &str {
        &self.element_id
    }

    pub fn state_type(&self) -> StateType {
        self.plan.state_type
    }

    pub fn stream_ids(&self) -> impl Iterator<Item = &str> {
        self.receivers.keys().map(String::as_str)
    }

    /// Pre processor of `state_id`, for inspection.
    pub fn pre_state(&self, state_id: usize) -> Option<&Arc<StreamPreStateProcessor>> {
        self.nodes.get(state_id).map(|n| &n.pre)
    }

    /// Records waiting in non-start states.
    pub fn in_flight(&self) -> usize {
        self.nodes
            .iter()
            .filter(|n| !n.pre.is_start_state())
            .map(|n| n.pre.pending_len())
            .sum()
    }

    /// Entry point for events of `stream_id`.
    pub fn receiver(self: &Arc<Self>, stream_id: &str) -> EngineResult<ProcessorRef> {
        if !self.receivers.contains_key(stream_id) {
            return Err(EngineError::validation(
                "state runtime",
                format!("no state listens to stream '{stream_id}'"),
            ));
        }
        Ok(Arc::new(StateStreamReceiver {
            runtime: Arc::clone(self),
            stream_id: stream_id.to_string(),
        }))
    }

    /// Feed a chunk of `stream_id` events through every state listening to
    /// it, one event at a time, and forward completed matches.
    pub fn receive(&self, stream_id: &str, chunk: EventChunk) -> EngineResult<()> {
        let order = self.receivers.get(stream_id).ok_or_else(|| {
            EngineError::illegal_state(format!("{} has no receiver for '{stream_id}'", self.element_id))
        })?;
        let _guard = self.lock.lock();
        let mut out = EventChunk::new();
        for event in chunk {
            let event = match event {
                ComplexEvent::Stream(e) if e.kind == EventKind::Current => e,
                ComplexEvent::Stream(e) if e.kind == EventKind::Timer => {
                    self.expire(e.timestamp);
                    continue;
                }
                _ => continue,
            };
            let result = self.dispatch(order, &event, &mut out);
            self.stabilize();
            result?;
            self.schedule_expiry();
        }
        self.next.forward(out)
    }

    fn dispatch(&self, order: &[usize], event: &StreamEvent, out: &mut EventChunk) -> EngineResult<()> {
        for &state_id in order {
            let returned = self.nodes[state_id]
                .pre
                .process_and_return(EventChunk::single(event.clone()))?;
            out.extend(returned);
        }
        Ok(())
    }

    /// Commit the pass. Sequences first drop every record that did not
    /// advance on this event.
    fn stabilize(&self) {
        if self.plan.state_type == StateType::Sequence {
            self.nodes.iter().for_each(|n| n.pre.reset_state());
        }
        self.update_all();
    }

    fn update_all(&self) {
        self.nodes.iter().for_each(|n| n.pre.update_state());
    }

    /// Purge records that fell outside `within` at `now`.
    pub fn expire(&self, now: i64) -> usize {
        let _guard = self.lock.lock();
        {
            let mut armed = self.armed.lock();
            if armed.is_some_and(|at| at <= now) {
                *armed = None;
            }
        }
        let expired: usize = self.nodes.iter().map(|n| n.pre.expire_pending(now)).sum();
        if expired > 0 {
            debug!("{} expired {} pending records at {}", self.element_id, expired, now);
        }
        self.update_all();
        self.schedule_expiry();
        expired
    }

    /// Register one purge timer at the earliest `within` deadline of the
    /// waiting records, unless one at or before it is already registered.
    fn schedule_expiry(&self) {
        if self.plan.within.is_none() {
            return;
        }
        let Some(deadline) = self.nodes.iter().filter_map(|n| n.pre.next_expiry()).min() else {
            return;
        };
        let mut armed = self.armed.lock();
        if armed.is_some_and(|at| at <= deadline) {
            return;
        }
        let target: Weak<dyn Processor> = self.this.clone();
        self.ctx.scheduler().notify_at(deadline, target);
        *armed = Some(deadline);
    }

    /// Deadline of the registered purge timer.
    pub fn armed_expiry(&self) -> Option<i64> {
        *self.armed.lock()
    }

    /// Independent runtime with the same plan, for a partition.
    pub fn clone_runtime(&self, key: &str) -> Arc<Self> {
        let pres = self.nodes.iter().map(|n| n.pre.clone_for(key)).collect();
        Self::assemble(
            format!("{}-{}", self.element_id, key),
            self.plan.clone(),
            pres,
            self.pools.clone(),
            &self.ctx,
        )
    }
}

impl Processor for StateStreamRuntime {
    fn name(&self) -> &'static str {
        "state stream runtime"
    }

    /// Scheduler entry: timer records purge expired attempts. Events must
    /// arrive through a receiver.
    fn process(&self, chunk: EventChunk) -> EngineResult<()> {
        for event in &chunk {
            match event.kind() {
                EventKind::Timer => {
                    self.expire(event.timestamp());
                }
                _ => {
                    return Err(EngineError::illegal_state(
                        "state runtime receives events through its stream receivers",
                    ))
                }
            }
        }
        Ok(())
    }

    fn next_processor(&self) -> Option<ProcessorRef> {
        self.next.get()
    }

    fn set_next_processor(&self, next: Option<ProcessorRef>) {
        self.next.set(next);
    }

    fn clone_processor(&self, key: &str) -> EngineResult<ProcessorRef> {
        Ok(self.clone_runtime(key))
    }
}

/// Pending records live in the state processors, which restore before the
/// runtime. Restoring the runtime re-registers their purge timer.
impl Snapshotable for StateStreamRuntime {
    fn element_id(&self) -> &str {
        &self.element_id
    }

    fn current_state(&self) -> EngineResult<Snapshot> {
        Ok(Snapshot::new(&self.element_id))
    }

    fn restore_state(&self, _snapshot: &Snapshot) -> EngineResult<()> {
        let _guard = self.lock.lock();
        *self.armed.lock() = None;
        self.schedule_expiry();
        debug!(
            "{} restored with {} records in flight, purge at {:?}",
            self.element_id,
            self.in_flight(),
            self.armed_expiry()
        );
        Ok(())
    }
}

/// Feeds one stream into a [`StateStreamRuntime`]
pub struct StateStreamReceiver {
    runtime: Arc<StateStreamRuntime>,
    stream_id: String,
}

impl StateStreamReceiver {
    pub fn stream_id(&self) -> &str {
        &self.stream_id
    }
}

impl Processor for StateStreamReceiver {
    fn name(&self) -> &'static str {
        "state stream receiver"
    }

    fn process(&self, chunk: EventChunk) -> EngineResult<()> {
        self.runtime.receive(&self.stream_id, chunk)
    }

    fn next_processor(&self) -> Option<ProcessorRef> {
        self.runtime.next_processor()
    }

    fn set_next_processor(&self, next: Option<ProcessorRef>) {
        self.runtime.set_next_processor(next);
    }

    fn clone_processor(&self, _key: &str) -> EngineResult<ProcessorRef> {
        Err(EngineError::illegal_state(
            "clone the state runtime and take receivers from the clone",
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::context::AppContext;
    use crate::pool::{StateEventPool, StreamEventCloner, StreamEventPool};

    fn pools(slots: usize) -> StatePools {
        StatePools::new(
            Arc::new(StateEventPool::new(slots, 0, 16)),
            StreamEventCloner::new(Arc::new(StreamEventPool::with_sizes(0, 1, 0, 16))),
        )
    }

    #[test]
    fn test_plan_validation() {
        let app = AppContext::with_system_clock("test");
        let ctx = app.query("q");
        assert!(StatePlan::pattern().build(pools(0), &ctx).is_err());
        assert!(StatePlan::pattern().then("A").build(pools(2), &ctx).is_err());
        assert!(StatePlan::pattern()
            .then("A")
            .then("B")
            .every(1, 2)
            .build(pools(2), &ctx)
            .is_err());
        assert!(StatePlan::pattern()
            .then("A")
            .then("B")
            .within(0)
            .build(pools(2), &ctx)
            .is_err());
    }

    #[test]
    fn test_sequence_receivers_visit_states_in_reverse() {
        let app = AppContext::with_system_clock("test");
        let rt = StatePlan::sequence()
            .then("A")
            .then("A")
            .build(pools(2), &app.query("q"))
            .unwrap();
        assert_eq!(rt.receivers["A"], vec![1, 0]);

        let rt = StatePlan::pattern()
            .then("A")
            .then("A")
            .build(pools(2), &app.query("q"))
            .unwrap();
        assert_eq!(rt.receivers["A"], vec![0, 1]);
    }

    #[test]
    fn test_unknown_stream_is_rejected() {
        let app = AppContext::with_system_clock("test");
        let rt = StatePlan::pattern()
            .then("A")
            .build(pools(1), &app.query("q"))
            .unwrap();
        assert!(rt.receiver("B").is_err());
        assert_eq!(rt.stream_ids().collect::<Vec<_>>(), vec!["A"]);
    }

    #[test]
    fn test_runtime_rejects_direct_events() {
        let app = AppContext::with_system_clock("test");
        let rt = StatePlan::pattern()
            .then("A")
            .build(pools(1), &app.query("q"))
            .unwrap();
        assert!(rt.process(EventChunk::single(StreamEvent::new(0, 1, 0))).is_err());
        assert!(rt.process(EventChunk::single(StreamEvent::timer(5))).is_ok());
    }
}
