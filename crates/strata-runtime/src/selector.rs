//! Grouped aggregation over a processor chain's output
//!
//! [`AggregationProcessor`] keeps one set of incremental aggregators per
//! group-by key. `Current` records add, `Expired` records remove and
//! `Reset` markers clear every group; groups whose aggregators are all back
//! to their identity state are dropped. For batch chunks only the last row
//! per group and kind is emitted.

use crate::aggregator::{AggregatorSettings, AttributeAggregatorExecutor};
use crate::chunk::EventChunk;
use crate::context::QueryContext;
use crate::error::EngineResult;
use crate::event::{ComplexEvent, EventKind, StreamEvent};
use crate::executor::ExpressionExecutor;
use crate::processor::{NextProcessor, Processor, ProcessorRef};
use crate::snapshot::{Snapshot, Snapshotable};
use indexmap::IndexMap;
use parking_lot::Mutex;
use std::sync::{Arc, Weak};
use strata_core::{AttributeType, Value};
use tracing::trace;

type GroupKey = Vec<Value>;

/// One output column
#[derive(Clone)]
pub enum Projection {
    /// Copied from the triggering record
    Attribute(ExpressionExecutor),
    /// Running aggregate `name(args...)`
    Aggregate { name: String, args: Vec<ExpressionExecutor> },
}

impl Projection {
    pub fn attribute(executor: ExpressionExecutor) -> Self {
        Projection::Attribute(executor)
    }

    pub fn aggregate(name: impl Into<String>, args: Vec<ExpressionExecutor>) -> Self {
        Projection::Aggregate {
            name: name.into(),
            args,
        }
    }
}

#[derive(Clone)]
enum Column {
    Attribute(ExpressionExecutor),
    Aggregate(usize),
}

struct Groups {
    template: Vec<AttributeAggregatorExecutor>,
    groups: IndexMap<GroupKey, Vec<AttributeAggregatorExecutor>>,
}

impl Groups {
    fn fresh(&self) -> Vec<AttributeAggregatorExecutor> {
        self.template.iter().map(AttributeAggregatorExecutor::clone_empty).collect()
    }

    fn empty_like(&self) -> Groups {
        Groups {
            template: self.fresh(),
            groups: IndexMap::new(),
        }
    }
}

pub struct AggregationProcessor {
    element_id: String,
    columns: Vec<Column>,
    group_by: Vec<ExpressionExecutor>,
    ctx: QueryContext,
    state: Mutex<Groups>,
    next: NextProcessor,
}

impl AggregationProcessor {
    /// Aggregator names and argument types are validated here, so a bad
    /// projection fails query construction.
    pub fn new(
        projections: Vec<Projection>,
        group_by: Vec<ExpressionExecutor>,
        settings: AggregatorSettings,
        ctx: &QueryContext,
    ) -> EngineResult<Arc<Self>> {
        let mut template = Vec::new();
        let mut columns = Vec::with_capacity(projections.len());
        for projection in projections {
            match projection {
                Projection::Attribute(executor) => columns.push(Column::Attribute(executor)),
                Projection::Aggregate { name, args } => {
                    template.push(AttributeAggregatorExecutor::new(&name, args, settings)?);
                    columns.push(Column::Aggregate(template.len() - 1));
                }
            }
        }
        let element_id = ctx.next_element_id("AggregationProcessor");
        let groups = Groups {
            template,
            groups: IndexMap::new(),
        };
        Ok(Self::build(element_id, columns, group_by, groups, ctx))
    }

    fn build(
        element_id: String,
        columns: Vec<Column>,
        group_by: Vec<ExpressionExecutor>,
        groups: Groups,
        ctx: &QueryContext,
    ) -> Arc<Self> {
        Arc::new_cyclic(|this: &Weak<AggregationProcessor>| {
            let snapshotable: Weak<dyn Snapshotable> = this.clone();
            ctx.register_snapshotable(&element_id, snapshotable);
            AggregationProcessor {
                element_id,
                columns,
                group_by,
                ctx: ctx.clone(),
                state: Mutex::new(groups),
                next: NextProcessor::new(),
            }
        })
    }

    /// Output column types, in projection order.
    pub fn output_types(&self) -> Vec<AttributeType> {
        let state = self.state.lock();
        self.columns
            .iter()
            .map(|c| match c {
                Column::Attribute(executor) => executor.return_type(),
                Column::Aggregate(i) => state.template[*i].return_type(),
            })
            .collect()
    }

    /// Number of live groups.
    pub fn group_count(&self) -> usize {
        self.state.lock().groups.len()
    }

    fn aggregate(&self, state: &mut Groups, event: &ComplexEvent) -> EngineResult<(GroupKey, StreamEvent)> {
        let key: GroupKey = self.group_by.iter().map(|g| g.execute(event)).collect();
        // A rejected removal must leave every executor of the group untouched
        state
            .groups
            .get(&key)
            .unwrap_or(&state.template)
            .iter()
            .try_for_each(|executor| executor.check(event))?;
        if !state.groups.contains_key(&key) {
            let fresh = state.fresh();
            state.groups.insert(key.clone(), fresh);
        }

        let mut values = Vec::new();
        let mut destroyable = false;
        if let Some(executors) = state.groups.get_mut(&key) {
            values = executors
                .iter_mut()
                .map(|executor| executor.execute(event))
                .collect::<EngineResult<Vec<_>>>()?;
            destroyable = event.kind() == EventKind::Expired && executors.iter().all(|e| e.can_destroy());
        }
        if destroyable {
            trace!("{} dropping emptied group {:?}", self.element_id, key);
            state.groups.shift_remove(&key);
        }

        let mut row = StreamEvent::new(0, 0, 0)
            .with_timestamp(event.timestamp())
            .with_kind(event.kind());
        row.output_data = self
            .columns
            .iter()
            .map(|column| match column {
                Column::Attribute(executor) => executor.execute(event),
                Column::Aggregate(i) => values.get(*i).cloned().unwrap_or_default(),
            })
            .collect();
        Ok((key, row))
    }

    fn reset(&self, state: &mut Groups, event: &ComplexEvent) -> EngineResult<()> {
        for executors in state.groups.values_mut() {
            for executor in executors.iter_mut() {
                executor.execute(event)?;
            }
        }
        state.groups.retain(|_, executors| !executors.iter().all(|e| e.can_destroy()));
        Ok(())
    }
}

impl Processor for AggregationProcessor {
    fn name(&self) -> &'static str {
        "aggregation"
    }

    fn process(&self, chunk: EventChunk) -> EngineResult<()> {
        let is_batch = chunk.is_batch;
        let mut rows: Vec<(EventKind, GroupKey, StreamEvent)> = Vec::new();
        {
            let mut state = self.state.lock();
            for event in &chunk {
                match event.kind() {
                    EventKind::Timer => {}
                    EventKind::Reset => self.reset(&mut state, event)?,
                    kind @ (EventKind::Current | EventKind::Expired) => {
                        let (key, row) = self.aggregate(&mut state, event)?;
                        rows.push((kind, key, row));
                    }
                }
            }
        }

        let out = if is_batch {
            let mut last: IndexMap<(EventKind, GroupKey), StreamEvent> = IndexMap::new();
            for (kind, key, row) in rows {
                last.insert((kind, key), row);
            }
            let mut out = EventChunk::batch();
            out.extend(last.into_values());
            out
        } else {
            rows.into_iter().map(|(_, _, row)| ComplexEvent::from(row)).collect()
        };
        self.next.forward(out)
    }

    fn next_processor(&self) -> Option<ProcessorRef> {
        self.next.get()
    }

    fn set_next_processor(&self, next: Option<ProcessorRef>) {
        self.next.set(next);
    }

    fn clone_processor(&self, key: &str) -> EngineResult<ProcessorRef> {
        let groups = self.state.lock().empty_like();
        Ok(Self::build(
            format!("{}-{}", self.element_id, key),
            self.columns.clone(),
            self.group_by.clone(),
            groups,
            &self.ctx,
        ))
    }
}

impl Snapshotable for AggregationProcessor {
    fn element_id(&self) -> &str {
        &self.element_id
    }

    fn current_state(&self) -> EngineResult<Snapshot> {
        let state = self.state.lock();
        let groups = state
            .groups
            .iter()
            .map(|(key, executors)| {
                let states = executors
                    .iter()
                    .map(AttributeAggregatorExecutor::current_state)
                    .collect::<EngineResult<Vec<_>>>()?;
                Ok((key.clone(), states))
            })
            .collect::<EngineResult<Vec<(GroupKey, Vec<serde_json::Value>)>>>()?;
        Snapshot::new(&self.element_id).with("groups", &groups)
    }

    fn restore_state(&self, snapshot: &Snapshot) -> EngineResult<()> {
        let saved: Vec<(GroupKey, Vec<serde_json::Value>)> = snapshot.get("groups")?;
        let mut state = self.state.lock();
        let mut groups = IndexMap::with_capacity(saved.len());
        for (key, states) in saved {
            let mut executors = state.fresh();
            for (executor, saved_state) in executors.iter_mut().zip(&states) {
                executor.restore_state(saved_state)?;
            }
            groups.insert(key, executors);
        }
        state.groups = groups;
        Ok(())
    }
}
