//! Two-sided join correlation
//!
//! Each streamed side of a join gets a [`PreJoinProcessor`] spliced in
//! front of its findable processor (the window or table retaining that
//! side's events) and a [`PostJoinProcessor`] at the tail of its chain. An
//! arrival passes the pre-join, is retained by its own window, and then
//! probes the other side's findable from the post-join. Both sides share
//! one re-entrant lock so a probe never observes the other window halfway
//! through an update.
//!
//! Output records have two slots: slot 0 for the left event, slot 1 for
//! the right one. Their kind follows the triggering event.

use crate::chunk::EventChunk;
use crate::context::QueryContext;
use crate::error::{EngineError, EngineResult};
use crate::event::{ComplexEvent, EventKind, StateEvent, StreamEvent};
use crate::findable::{CompiledCondition, FindableProcessor, MatchExpression, MatchingMeta};
use crate::pool::{StateEventPool, StreamEventCloner};
use crate::processor::{NextProcessor, Processor, ProcessorRef};
use crate::window::LengthWindow;
use parking_lot::ReentrantMutex;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{debug, trace};

/// Which unmatched arrivals still produce output
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum JoinType {
    Inner,
    LeftOuter,
    RightOuter,
    FullOuter,
}

impl JoinType {
    fn is_outer_for(self, side: JoinSide) -> bool {
        matches!(
            (self, side),
            (JoinType::FullOuter, _)
                | (JoinType::LeftOuter, JoinSide::Left)
                | (JoinType::RightOuter, JoinSide::Right)
        )
    }
}

/// Sides whose arrivals trigger lookups (`unidirectional` joins)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum JoinTrigger {
    #[default]
    All,
    Left,
    Right,
}

impl JoinTrigger {
    fn allows(self, side: JoinSide) -> bool {
        matches!(
            (self, side),
            (JoinTrigger::All, _) | (JoinTrigger::Left, JoinSide::Left) | (JoinTrigger::Right, JoinSide::Right)
        )
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum JoinSide {
    Left,
    Right,
}

impl JoinSide {
    pub fn slot(self) -> usize {
        match self {
            JoinSide::Left => 0,
            JoinSide::Right => 1,
        }
    }

    pub fn other(self) -> JoinSide {
        match self {
            JoinSide::Left => JoinSide::Right,
            JoinSide::Right => JoinSide::Left,
        }
    }
}

/// Join predicate over a left and a right event
pub type JoinCondition = Arc<dyn Fn(&StreamEvent, &StreamEvent) -> bool + Send + Sync>;

/// Takes the join lock for the duration of its side's window update and
/// probe
pub struct PreJoinProcessor {
    lock: Arc<ReentrantMutex<()>>,
    next: NextProcessor,
}

impl Processor for PreJoinProcessor {
    fn name(&self) -> &'static str {
        "pre join"
    }

    fn process(&self, chunk: EventChunk) -> EngineResult<()> {
        let _guard = self.lock.lock();
        self.next.forward(chunk)
    }

    fn next_processor(&self) -> Option<ProcessorRef> {
        self.next.get()
    }

    fn set_next_processor(&self, next: Option<ProcessorRef>) {
        self.next.set(next);
    }

    fn clone_processor(&self, _key: &str) -> EngineResult<ProcessorRef> {
        Ok(Arc::new(PreJoinProcessor {
            lock: Arc::new(ReentrantMutex::new(())),
            next: NextProcessor::new(),
        }))
    }
}

/// Probes the other side for every arrival of its own side
pub struct PostJoinProcessor {
    side: JoinSide,
    emits_unmatched: bool,
    other: Arc<dyn FindableProcessor>,
    condition: CompiledCondition,
    lock: Arc<ReentrantMutex<()>>,
    state_pool: Arc<StateEventPool>,
    next: NextProcessor,
}

impl PostJoinProcessor {
    pub fn side(&self) -> JoinSide {
        self.side
    }

    fn correlate(&self, event: StreamEvent, out: &mut EventChunk) -> EngineResult<()> {
        let timestamp = event.timestamp;
        let kind = event.kind;
        let mut probe = self.state_pool.borrow_event();
        probe.timestamp = timestamp;
        probe.kind = kind;
        probe.set_stream_event(self.side.slot(), Some(event));

        let matches = self.other.find(&probe, &self.condition)?;
        trace!("{:?} join arrival at {} matched {}", self.side, timestamp, matches.len());
        if matches.is_empty() {
            if self.emits_unmatched {
                out.push(probe);
            } else {
                self.state_pool.release(probe);
            }
            return Ok(());
        }
        let other_slot = self.side.other().slot();
        for found in matches {
            let mut record = probe.clone();
            record.set_stream_event(other_slot, Some(found));
            out.push(record);
        }
        self.state_pool.release(probe);
        Ok(())
    }
}

impl Processor for PostJoinProcessor {
    fn name(&self) -> &'static str {
        "post join"
    }

    fn process(&self, chunk: EventChunk) -> EngineResult<()> {
        let _guard = self.lock.lock();
        let mut out = if chunk.is_batch {
            EventChunk::batch()
        } else {
            EventChunk::new()
        };
        for event in chunk {
            let ComplexEvent::Stream(event) = event else {
                continue;
            };
            match event.kind {
                EventKind::Timer => continue,
                EventKind::Reset => {
                    let mut reset = self.state_pool.borrow_event();
                    reset.timestamp = event.timestamp;
                    reset.kind = EventKind::Reset;
                    out.push(reset);
                }
                EventKind::Current | EventKind::Expired => self.correlate(event, &mut out)?,
            }
        }
        self.next.forward(out)
    }

    fn next_processor(&self) -> Option<ProcessorRef> {
        self.next.get()
    }

    fn set_next_processor(&self, next: Option<ProcessorRef>) {
        self.next.set(next);
    }

    /// Joins are partitioned by rebuilding them over cloned inputs; a lone
    /// post-join has no other side to bind to.
    fn clone_processor(&self, _key: &str) -> EngineResult<ProcessorRef> {
        Err(EngineError::illegal_state(
            "post join processors are cloned by rebuilding the join",
        ))
    }
}

/// One side of a join: the head of its processor chain
#[derive(Clone)]
pub struct JoinInput {
    pub head: ProcessorRef,
    /// Used for the zero-length window added when the chain retains nothing
    pub cloner: StreamEventCloner,
}

impl JoinInput {
    pub fn new(head: ProcessorRef, cloner: StreamEventCloner) -> Self {
        Self { head, cloner }
    }
}

struct LocatedSide {
    head: ProcessorRef,
    predecessor: Option<ProcessorRef>,
    findable_ref: ProcessorRef,
    findable: Arc<dyn FindableProcessor>,
}

impl LocatedSide {
    /// Find the last findable processor of the chain, appending a
    /// zero-length window when there is none.
    fn locate(input: JoinInput, ctx: &QueryContext) -> Self {
        let mut found: Option<(Option<ProcessorRef>, ProcessorRef, Arc<dyn FindableProcessor>)> = None;
        let mut previous: Option<ProcessorRef> = None;
        let mut cursor = Some(input.head.clone());
        while let Some(processor) = cursor {
            if let Some(findable) = processor.clone().as_findable() {
                found = Some((previous.clone(), processor.clone(), findable));
            }
            cursor = processor.next_processor();
            previous = Some(processor);
        }

        match found {
            Some((predecessor, findable_ref, findable)) => LocatedSide {
                head: input.head,
                predecessor,
                findable_ref,
                findable,
            },
            None => {
                let window = LengthWindow::new(0, input.cloner, ctx);
                input.head.set_to_last(window.clone());
                LocatedSide {
                    head: input.head,
                    predecessor: previous,
                    findable_ref: window.clone(),
                    findable: window,
                }
            }
        }
    }

    /// Put `pre` directly in front of the findable processor. Returns the
    /// new chain head.
    fn splice_pre(&self, pre: Arc<PreJoinProcessor>) -> ProcessorRef {
        pre.set_next_processor(Some(self.findable_ref.clone()));
        match &self.predecessor {
            Some(predecessor) => {
                predecessor.set_next_processor(Some(pre));
                self.head.clone()
            }
            None => pre,
        }
    }
}

/// Builds a [`JoinRuntime`] from two input chains
pub struct JoinBuilder {
    join_type: JoinType,
    trigger: JoinTrigger,
    condition: JoinCondition,
    state_pool: Arc<StateEventPool>,
}

impl JoinBuilder {
    pub fn new(join_type: JoinType, condition: JoinCondition) -> Self {
        Self {
            join_type,
            trigger: JoinTrigger::All,
            condition,
            state_pool: Arc::new(StateEventPool::new(2, 0, crate::pool::DEFAULT_POOL_CAPACITY)),
        }
    }

    /// Join on an arbitrary predicate.
    pub fn on(
        join_type: JoinType,
        condition: impl Fn(&StreamEvent, &StreamEvent) -> bool + Send + Sync + 'static,
    ) -> Self {
        Self::new(join_type, Arc::new(condition))
    }

    pub fn trigger(mut self, trigger: JoinTrigger) -> Self {
        self.trigger = trigger;
        self
    }

    pub fn state_pool(mut self, pool: Arc<StateEventPool>) -> Self {
        self.state_pool = pool;
        self
    }

    fn match_expression(&self, probing: JoinSide) -> MatchExpression {
        let condition = self.condition.clone();
        let slot = probing.slot();
        match probing {
            JoinSide::Left => Arc::new(move |matching: &StateEvent, candidate: &StreamEvent| {
                matching.stream_event(slot).is_some_and(|left| condition(left, candidate))
            }),
            JoinSide::Right => Arc::new(move |matching: &StateEvent, candidate: &StreamEvent| {
                matching.stream_event(slot).is_some_and(|right| condition(candidate, right))
            }),
        }
    }

    pub fn build(self, left: JoinInput, right: JoinInput, ctx: &QueryContext) -> EngineResult<JoinRuntime> {
        if self.state_pool.slots() != 2 {
            return Err(EngineError::validation(
                "join",
                format!("join records need 2 slots, pool has {}", self.state_pool.slots()),
            ));
        }
        let left = LocatedSide::locate(left, ctx);
        let right = LocatedSide::locate(right, ctx);

        let left_static = left.findable.is_static();
        let right_static = right.findable.is_static();
        if left_static && right_static {
            return Err(EngineError::validation("join", "both sides of a join are static sources"));
        }
        let triggers = |side: JoinSide, is_static: bool| self.trigger.allows(side) && !is_static;
        let left_triggers = triggers(JoinSide::Left, left_static);
        let right_triggers = triggers(JoinSide::Right, right_static);
        if !left_triggers && !right_triggers {
            return Err(EngineError::illegal_state(format!(
                "join with trigger {:?} has no side able to trigger",
                self.trigger
            )));
        }

        let lock = Arc::new(ReentrantMutex::new(()));
        let mut posts = Vec::with_capacity(2);
        let mut heads = Vec::with_capacity(2);
        for (side, this, other, is_static, does_trigger) in [
            (JoinSide::Left, &left, &right, left_static, left_triggers),
            (JoinSide::Right, &right, &left, right_static, right_triggers),
        ] {
            if is_static {
                heads.push(this.head.clone());
                continue;
            }
            let pre = Arc::new(PreJoinProcessor {
                lock: lock.clone(),
                next: NextProcessor::new(),
            });
            heads.push(this.splice_pre(pre));
            if does_trigger {
                let condition = other.findable.compile_condition(
                    self.match_expression(side),
                    MatchingMeta {
                        candidate_state_id: side.other().slot(),
                        slot_count: 2,
                    },
                )?;
                let post = Arc::new(PostJoinProcessor {
                    side,
                    emits_unmatched: self.join_type.is_outer_for(side),
                    other: other.findable.clone(),
                    condition,
                    lock: lock.clone(),
                    state_pool: self.state_pool.clone(),
                    next: NextProcessor::new(),
                });
                this.head.set_to_last(post.clone());
                posts.push(post);
            }
        }
        debug!(
            "Built {:?} join (trigger {:?}, left triggers {}, right triggers {})",
            self.join_type, self.trigger, left_triggers, right_triggers
        );

        let right_head = heads.pop();
        let left_head = heads.pop();
        match (left_head, right_head) {
            (Some(left_head), Some(right_head)) => Ok(JoinRuntime {
                join_type: self.join_type,
                left_head,
                right_head,
                posts,
            }),
            _ => Err(EngineError::illegal_state("join sides were not assembled")),
        }
    }
}

/// An assembled join: feed each side through its input, read joined
/// records from the shared output
pub struct JoinRuntime {
    join_type: JoinType,
    left_head: ProcessorRef,
    right_head: ProcessorRef,
    posts: Vec<Arc<PostJoinProcessor>>,
}

impl JoinRuntime {
    pub fn join_type(&self) -> JoinType {
        self.join_type
    }

    pub fn left_input(&self) -> &ProcessorRef {
        &self.left_head
    }

    pub fn right_input(&self) -> &ProcessorRef {
        &self.right_head
    }

    pub fn input(&self, side: JoinSide) -> &ProcessorRef {
        match side {
            JoinSide::Left => &self.left_head,
            JoinSide::Right => &self.right_head,
        }
    }

    /// Sides that trigger lookups.
    pub fn triggering_sides(&self) -> Vec<JoinSide> {
        self.posts.iter().map(|p| p.side()).collect()
    }

    /// Route joined records from every triggering side to `next`.
    pub fn set_output(&self, next: ProcessorRef) {
        for post in &self.posts {
            post.set_next_processor(Some(next.clone()));
        }
    }
}
