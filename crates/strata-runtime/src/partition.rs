//! Keyed partitioning of a query
//!
//! A [`PartitionRuntime`] evaluates key expressions on every arriving record
//! and routes it to a private instance of the query built for that key.
//! Instances are created lazily on the first record of a key, either by
//! cloning a template chain with [`clone_chain`] or from a caller-supplied
//! factory (pattern runtimes are cloned as a unit). Every instance feeds
//! the same shared output.

use crate::chunk::EventChunk;
use crate::context::QueryContext;
use crate::error::{EngineError, EngineResult};
use crate::event::{ComplexEvent, EventKind};
use crate::executor::ExpressionExecutor;
use crate::processor::{clone_chain, Processor, ProcessorRef};
use crate::snapshot::{AppSnapshot, Snapshot, Snapshotable};
use indexmap::IndexMap;
use parking_lot::RwLock;
use smallvec::SmallVec;
use std::sync::{Arc, Weak};
use strata_core::Value;
use tracing::{debug, warn};

/// Key values of one record, one per key expression
pub type PartitionKey = SmallVec<[Value; 2]>;

/// Builds the instance for a partition key
pub type InstanceFactory = Arc<dyn Fn(&str) -> EngineResult<ProcessorRef> + Send + Sync>;

pub struct PartitionRuntime {
    element_id: String,
    keys: Vec<ExpressionExecutor>,
    factory: InstanceFactory,
    output: ProcessorRef,
    ctx: QueryContext,
    instances: RwLock<IndexMap<String, ProcessorRef>>,
}

impl PartitionRuntime {
    /// Partition by cloning `template` per key. The template itself never
    /// receives records.
    pub fn over_chain(
        keys: Vec<ExpressionExecutor>,
        template: ProcessorRef,
        output: ProcessorRef,
        ctx: &QueryContext,
    ) -> EngineResult<Arc<Self>> {
        let factory: InstanceFactory = Arc::new(move |key| clone_chain(&template, key));
        Self::with_factory(keys, factory, output, ctx)
    }

    /// Partition with instances produced by `factory`, whose result is
    /// linked to `output` at its tail.
    pub fn with_factory(
        keys: Vec<ExpressionExecutor>,
        factory: InstanceFactory,
        output: ProcessorRef,
        ctx: &QueryContext,
    ) -> EngineResult<Arc<Self>> {
        if keys.is_empty() {
            return Err(EngineError::validation("partition", "at least one key expression is required"));
        }
        let element_id = ctx.next_element_id("Partition");
        Ok(Arc::new_cyclic(|this: &Weak<PartitionRuntime>| {
            let snapshotable: Weak<dyn Snapshotable> = this.clone();
            ctx.register_snapshotable(&element_id, snapshotable);
            PartitionRuntime {
                element_id,
                keys,
                factory,
                output,
                ctx: ctx.clone(),
                instances: RwLock::new(IndexMap::new()),
            }
        }))
    }

    pub fn element_id(&self) -> &str {
        &self.element_id
    }

    pub fn partition_count(&self) -> usize {
        self.instances.read().len()
    }

    pub fn partition_keys(&self) -> Vec<String> {
        self.instances.read().keys().cloned().collect()
    }

    pub fn key_of(&self, event: &ComplexEvent) -> PartitionKey {
        self.keys.iter().map(|k| k.execute(event)).collect()
    }

    fn key_string(key: &PartitionKey) -> String {
        key.iter()
            .map(|v| v.as_str().map_or_else(|| v.to_string(), str::to_string))
            .collect::<Vec<_>>()
            .join(":")
    }

    fn instance(&self, key: &str) -> EngineResult<ProcessorRef> {
        if let Some(existing) = self.instances.read().get(key) {
            return Ok(existing.clone());
        }
        let mut instances = self.instances.write();
        if let Some(existing) = instances.get(key) {
            return Ok(existing.clone());
        }
        let instance = (self.factory)(key)?;
        instance.set_to_last(self.output.clone());
        debug!("{} created partition '{}' for query {}", self.element_id, key, self.ctx.query_name());
        instances.insert(key.to_string(), instance.clone());
        Ok(instance)
    }

    /// Instantiate the partitions recorded in `snapshot` so their
    /// processors are registered before the snapshot is pushed back.
    pub fn prepare_restore(&self, snapshot: &AppSnapshot) -> EngineResult<usize> {
        let Some(state) = snapshot.element(self.ctx.query_name(), &self.element_id) else {
            return Ok(0);
        };
        let keys: Vec<String> = state.get("keys")?;
        for key in &keys {
            self.instance(key)?;
        }
        Ok(keys.len())
    }

    fn broadcast(&self, chunk: EventChunk) -> EngineResult<()> {
        let instances: Vec<ProcessorRef> = self.instances.read().values().cloned().collect();
        for instance in instances {
            instance.process(chunk.clone())?;
        }
        Ok(())
    }
}

impl Processor for PartitionRuntime {
    fn name(&self) -> &'static str {
        "partition"
    }

    /// Batch chunks are regrouped per key and delivered whole. Other chunks
    /// are split into runs of consecutive records sharing a key, so arrival
    /// order is kept.
    fn process(&self, chunk: EventChunk) -> EngineResult<()> {
        let is_batch = chunk.is_batch;
        let mut routed: Vec<(String, EventChunk)> = Vec::new();
        let mut resets = EventChunk::new();
        for event in chunk {
            match event.kind() {
                // instances schedule their own timers
                EventKind::Timer => continue,
                EventKind::Reset => {
                    resets.push(event);
                    continue;
                }
                EventKind::Current | EventKind::Expired => {}
            }
            let key = Self::key_string(&self.key_of(&event));
            let slot = if is_batch {
                routed.iter().position(|(k, _)| *k == key)
            } else {
                routed.last().filter(|(k, _)| *k == key).map(|_| routed.len() - 1)
            };
            match slot {
                Some(i) => routed[i].1.push(event),
                None => {
                    let mut part = if is_batch { EventChunk::batch() } else { EventChunk::new() };
                    part.push(event);
                    routed.push((key, part));
                }
            }
        }
        if !resets.is_empty() {
            self.broadcast(resets)?;
        }
        for (key, part) in routed {
            self.instance(&key)?.process(part)?;
        }
        Ok(())
    }

    fn next_processor(&self) -> Option<ProcessorRef> {
        Some(self.output.clone())
    }

    fn set_next_processor(&self, _next: Option<ProcessorRef>) {
        warn!("{}: partition output is fixed at construction", self.element_id);
    }

    fn set_to_last(&self, processor: ProcessorRef) {
        self.output.set_to_last(processor);
    }

    fn clone_processor(&self, _key: &str) -> EngineResult<ProcessorRef> {
        Err(EngineError::illegal_state("partitions cannot be nested"))
    }
}

impl Snapshotable for PartitionRuntime {
    fn element_id(&self) -> &str {
        &self.element_id
    }

    fn current_state(&self) -> EngineResult<Snapshot> {
        Snapshot::new(&self.element_id).with("keys", &self.partition_keys())
    }

    fn restore_state(&self, snapshot: &Snapshot) -> EngineResult<()> {
        let keys: Vec<String> = snapshot.get("keys")?;
        let instances = self.instances.read();
        for key in keys.iter().filter(|k| !instances.contains_key(*k)) {
            warn!("{}: partition '{}' was not prepared before restore", self.element_id, key);
        }
        Ok(())
    }
}
