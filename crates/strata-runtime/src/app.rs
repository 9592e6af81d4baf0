//! App runtime
//!
//! Owns the services of one app (clock, scheduler, snapshot registry), the
//! stream junctions and the persistence manager. Queries are assembled by
//! the caller from the processor types of this crate using
//! [`AppRuntime::query`] contexts and attached with
//! [`AppRuntime::subscribe`].

use crate::config::EngineConfig;
use crate::context::{AppContext, QueryContext};
use crate::error::{EngineError, EngineResult};
use crate::partition::PartitionRuntime;
use crate::persistence::{FileStore, MemoryStore, PersistenceManager, PersistenceStore};
use crate::pool::MetaStreamEvent;
use crate::processor::ProcessorRef;
use crate::receiver::{InputHandler, StreamJunction};
use crate::scheduler::{SystemClock, TimestampGenerator};
use indexmap::IndexMap;
use parking_lot::{Mutex, RwLock};
use std::sync::Arc;
use tokio::task::JoinHandle;
use tracing::{debug, info};

pub struct AppRuntime {
    context: Arc<AppContext>,
    junctions: RwLock<IndexMap<String, Arc<StreamJunction>>>,
    partitions: RwLock<Vec<Arc<PartitionRuntime>>>,
    persistence: PersistenceManager,
    driver: Mutex<Option<JoinHandle<()>>>,
}

impl AppRuntime {
    /// App on the wall clock. Snapshots go to `config.snapshot.directory`
    /// when set and are kept in memory otherwise.
    pub fn new(name: impl Into<String>, config: EngineConfig) -> EngineResult<Self> {
        Self::with_clock(name, Arc::new(SystemClock), config)
    }

    pub fn with_clock(
        name: impl Into<String>,
        clock: Arc<dyn TimestampGenerator>,
        config: EngineConfig,
    ) -> EngineResult<Self> {
        let store: Arc<dyn PersistenceStore> = match &config.snapshot.directory {
            Some(dir) => Arc::new(FileStore::open(dir)?),
            None => Arc::new(MemoryStore::new()),
        };
        Self::with_store(name, clock, config, store)
    }

    pub fn with_store(
        name: impl Into<String>,
        clock: Arc<dyn TimestampGenerator>,
        config: EngineConfig,
        store: Arc<dyn PersistenceStore>,
    ) -> EngineResult<Self> {
        let max_revisions = config.snapshot.max_revisions;
        let context = AppContext::new(name, clock, config);
        let persistence = PersistenceManager::new(store, context.name(), max_revisions);
        info!("Created app {}", context.name());
        Ok(Self {
            context,
            junctions: RwLock::new(IndexMap::new()),
            partitions: RwLock::new(Vec::new()),
            persistence,
            driver: Mutex::new(None),
        })
    }

    pub fn name(&self) -> &str {
        self.context.name()
    }

    pub fn context(&self) -> &Arc<AppContext> {
        &self.context
    }

    pub fn persistence(&self) -> &PersistenceManager {
        &self.persistence
    }

    pub fn query(&self, name: impl Into<String>) -> QueryContext {
        self.context.query(name)
    }

    pub fn define_stream(&self, stream_id: &str, meta: MetaStreamEvent) -> EngineResult<Arc<StreamJunction>> {
        let mut junctions = self.junctions.write();
        if junctions.contains_key(stream_id) {
            return Err(EngineError::validation(
                "app",
                format!("stream '{stream_id}' is already defined"),
            ));
        }
        let capacity = self.context.config().pool.stream_capacity;
        let junction = Arc::new(StreamJunction::new(stream_id, meta, capacity));
        junctions.insert(stream_id.to_string(), junction.clone());
        debug!("Defined stream {} in app {}", stream_id, self.name());
        Ok(junction)
    }

    pub fn junction(&self, stream_id: &str) -> EngineResult<Arc<StreamJunction>> {
        self.junctions
            .read()
            .get(stream_id)
            .cloned()
            .ok_or_else(|| EngineError::validation("app", format!("stream '{stream_id}' is not defined")))
    }

    pub fn stream_ids(&self) -> Vec<String> {
        self.junctions.read().keys().cloned().collect()
    }

    pub fn input_handler(&self, stream_id: &str) -> EngineResult<InputHandler> {
        InputHandler::for_junction(self.junction(stream_id)?)
    }

    /// Feed `stream_id` into `processor` on behalf of `query`.
    pub fn subscribe(&self, stream_id: &str, query: &str, processor: ProcessorRef) -> EngineResult<()> {
        self.junction(stream_id)?.subscribe(query, processor);
        Ok(())
    }

    /// Track a partition so restores recreate its instances first.
    pub fn add_partition(&self, partition: Arc<PartitionRuntime>) {
        self.partitions.write().push(partition);
    }

    /// Detach a query from every stream and drop its snapshot registrations.
    pub fn remove_query(&self, query: &str) -> usize {
        let detached: usize = self
            .junctions
            .read()
            .values()
            .map(|j| j.unsubscribe(query))
            .sum();
        self.context.snapshot_service().remove_query(query);
        info!("Removed query {} ({} subscriptions)", query, detached);
        detached
    }

    /// Start the scheduler driver. Must run inside a tokio runtime.
    pub fn start(&self) {
        let mut driver = self.driver.lock();
        if driver.is_some() {
            return;
        }
        let tick = self.context.config().scheduler.tick();
        *driver = Some(self.context.scheduler().spawn(tick));
        info!("Started app {}", self.name());
    }

    pub fn is_running(&self) -> bool {
        self.driver.lock().is_some()
    }

    /// Stop timers and the driver. In-flight chunks run to completion.
    pub fn shutdown(&self) {
        self.context.scheduler().shutdown();
        if let Some(handle) = self.driver.lock().take() {
            handle.abort();
        }
        info!("Shut down app {}", self.name());
    }

    /// Store the state of every query as a new revision.
    pub fn persist(&self) -> EngineResult<u64> {
        let now = self.context.clock().current_time();
        self.persistence.persist(self.context.snapshot_service(), now)
    }

    /// Restore the newest stored revision, if any.
    pub fn restore_last_revision(&self) -> EngineResult<Option<u64>> {
        let Some(revision) = self.persistence.last_revision()? else {
            info!("No stored revision for {}", self.name());
            return Ok(None);
        };
        self.restore_revision(revision)?;
        Ok(Some(revision))
    }

    pub fn restore_revision(&self, revision: u64) -> EngineResult<()> {
        let snapshot = self.persistence.load_revision(revision)?;
        let partitions: Vec<Arc<PartitionRuntime>> = self.partitions.read().clone();
        for partition in partitions {
            partition.prepare_restore(&snapshot)?;
        }
        self.context.snapshot_service().restore(&snapshot)?;
        info!("Restored revision {} of {}", revision, self.name());
        Ok(())
    }
}

impl Drop for AppRuntime {
    fn drop(&mut self) {
        if let Some(handle) = self.driver.get_mut().take() {
            handle.abort();
        }
    }
}
