//! In-memory table
//!
//! A static source: rows are inserted by queries writing into the table and
//! probed by joins, but a table never triggers a join itself.

use crate::chunk::EventChunk;
use crate::context::QueryContext;
use crate::error::EngineResult;
use crate::event::{ComplexEvent, EventKind, StateEvent, StreamEvent};
use crate::findable::{self, CompiledCondition, FindableProcessor, MatchExpression, MatchingMeta};
use crate::pool::StreamEventCloner;
use crate::processor::{Processor, ProcessorRef};
use crate::snapshot::{Snapshot, Snapshotable};
use parking_lot::RwLock;
use std::sync::{Arc, Weak};
use tracing::debug;

pub struct InMemoryTable {
    element_id: String,
    cloner: StreamEventCloner,
    ctx: QueryContext,
    rows: RwLock<Vec<StreamEvent>>,
}

impl InMemoryTable {
    pub fn new(name: &str, cloner: StreamEventCloner, ctx: &QueryContext) -> Arc<Self> {
        let element_id = ctx.next_element_id(&format!("Table-{name}"));
        Self::build(element_id, cloner, ctx)
    }

    fn build(element_id: String, cloner: StreamEventCloner, ctx: &QueryContext) -> Arc<Self> {
        Arc::new_cyclic(|this: &Weak<InMemoryTable>| {
            let snapshotable: Weak<dyn Snapshotable> = this.clone();
            ctx.register_snapshotable(&element_id, snapshotable);
            InMemoryTable {
                element_id,
                cloner,
                ctx: ctx.clone(),
                rows: RwLock::new(Vec::new()),
            }
        })
    }

    /// Insert copies of `rows`.
    pub fn insert<'a>(&self, rows: impl IntoIterator<Item = &'a StreamEvent>) {
        let copies: Vec<_> = rows
            .into_iter()
            .map(|r| self.cloner.copy_stream_event(r))
            .collect();
        debug!("{} inserting {} rows", self.element_id, copies.len());
        self.rows.write().extend(copies);
    }

    /// Delete rows for which `predicate` holds; returns how many were removed.
    pub fn delete_where(&self, predicate: impl Fn(&StreamEvent) -> bool) -> usize {
        let mut rows = self.rows.write();
        let before = rows.len();
        rows.retain(|r| !predicate(r));
        before - rows.len()
    }

    pub fn len(&self) -> usize {
        self.rows.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.read().is_empty()
    }
}

impl Processor for InMemoryTable {
    fn name(&self) -> &'static str {
        "table"
    }

    /// Insert every current stream event of the chunk.
    fn process(&self, chunk: EventChunk) -> EngineResult<()> {
        let rows: Vec<StreamEvent> = chunk
            .into_iter()
            .filter(|e| e.kind() == EventKind::Current)
            .filter_map(ComplexEvent::into_stream)
            .collect();
        self.rows.write().extend(rows);
        Ok(())
    }

    fn next_processor(&self) -> Option<ProcessorRef> {
        None
    }

    fn set_next_processor(&self, _next: Option<ProcessorRef>) {}

    /// Partition clones start from a copy of the current rows.
    fn clone_processor(&self, key: &str) -> EngineResult<ProcessorRef> {
        let table = Self::build(format!("{}-{}", self.element_id, key), self.cloner.clone(), &self.ctx);
        table.insert(self.rows.read().iter());
        Ok(table)
    }

    fn as_findable(self: Arc<Self>) -> Option<Arc<dyn FindableProcessor>> {
        Some(self)
    }
}

impl FindableProcessor for InMemoryTable {
    fn find(&self, matching: &StateEvent, condition: &CompiledCondition) -> EngineResult<Vec<StreamEvent>> {
        let rows = self.rows.read();
        Ok(findable::find_matches(rows.iter(), matching, condition, &self.cloner))
    }

    fn compile_condition(&self, expression: MatchExpression, meta: MatchingMeta) -> EngineResult<CompiledCondition> {
        findable::compile(expression, meta)
    }

    fn is_static(&self) -> bool {
        true
    }
}

impl Snapshotable for InMemoryTable {
    fn element_id(&self) -> &str {
        &self.element_id
    }

    fn current_state(&self) -> EngineResult<Snapshot> {
        Snapshot::new(&self.element_id).with("rows", &*self.rows.read())
    }

    fn restore_state(&self, snapshot: &Snapshot) -> EngineResult<()> {
        *self.rows.write() = snapshot.get("rows")?;
        Ok(())
    }
}
