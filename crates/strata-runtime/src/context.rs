//! Collaborators injected into stateful processors
//!
//! An [`AppContext`] owns the services shared by every query of one app: the
//! clock, the timer scheduler, the snapshot registry and the element id
//! generator. Processors receive a [`QueryContext`] at construction and
//! never reach for global state.

use crate::config::EngineConfig;
use crate::scheduler::{Scheduler, SystemClock, TimestampGenerator};
use crate::snapshot::{SnapshotService, Snapshotable};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};

/// Hands out app-unique element ids
#[derive(Debug, Default)]
pub struct ElementIdGenerator(AtomicU64);

impl ElementIdGenerator {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn create_new_id(&self, prefix: &str) -> String {
        let id = self.0.fetch_add(1, Ordering::Relaxed);
        format!("{prefix}-{id}")
    }
}

/// Services shared by all queries of one app
pub struct AppContext {
    name: String,
    clock: Arc<dyn TimestampGenerator>,
    scheduler: Arc<Scheduler>,
    snapshot_service: Arc<SnapshotService>,
    ids: ElementIdGenerator,
    config: EngineConfig,
}

impl AppContext {
    pub fn new(name: impl Into<String>, clock: Arc<dyn TimestampGenerator>, config: EngineConfig) -> Arc<Self> {
        Arc::new(Self {
            name: name.into(),
            scheduler: Arc::new(Scheduler::new(clock.clone())),
            clock,
            snapshot_service: Arc::new(SnapshotService::new()),
            ids: ElementIdGenerator::new(),
            config,
        })
    }

    /// App driven by the wall clock with default configuration.
    pub fn with_system_clock(name: impl Into<String>) -> Arc<Self> {
        Self::new(name, Arc::new(SystemClock), EngineConfig::default())
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn clock(&self) -> &Arc<dyn TimestampGenerator> {
        &self.clock
    }

    pub fn scheduler(&self) -> &Arc<Scheduler> {
        &self.scheduler
    }

    pub fn snapshot_service(&self) -> &Arc<SnapshotService> {
        &self.snapshot_service
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn query(self: &Arc<Self>, query_name: impl Into<String>) -> QueryContext {
        QueryContext {
            app: Arc::clone(self),
            query_name: query_name.into(),
        }
    }
}

/// Per-query view of the app services
#[derive(Clone)]
pub struct QueryContext {
    app: Arc<AppContext>,
    query_name: String,
}

impl QueryContext {
    pub fn app(&self) -> &Arc<AppContext> {
        &self.app
    }

    pub fn query_name(&self) -> &str {
        &self.query_name
    }

    pub fn current_time(&self) -> i64 {
        self.app.clock.current_time()
    }

    pub fn scheduler(&self) -> &Arc<Scheduler> {
        &self.app.scheduler
    }

    pub fn config(&self) -> &EngineConfig {
        &self.app.config
    }

    pub fn next_element_id(&self, prefix: &str) -> String {
        self.app.ids.create_new_id(prefix)
    }

    pub fn register_snapshotable(&self, element_id: &str, item: Weak<dyn Snapshotable>) {
        self.app
            .snapshot_service
            .add_snapshotable(&self.query_name, element_id, item);
    }

    pub fn unregister_snapshotable(&self, element_id: &str) {
        self.app
            .snapshot_service
            .remove_snapshotable(&self.query_name, element_id);
    }
}

impl std::fmt::Debug for QueryContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("QueryContext")
            .field("app", &self.app.name)
            .field("query", &self.query_name)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::scheduler::ManualClock;

    #[test]
    fn test_element_ids_are_unique() {
        let ids = ElementIdGenerator::new();
        assert_eq!(ids.create_new_id("Window"), "Window-0");
        assert_eq!(ids.create_new_id("Window"), "Window-1");
    }

    #[test]
    fn test_query_context_shares_app_services() {
        let app = AppContext::new("app", Arc::new(ManualClock::new(42)), EngineConfig::default());
        let q1 = app.query("q1");
        let q2 = app.query("q2");
        assert_eq!(q1.current_time(), 42);
        assert!(Arc::ptr_eq(q1.scheduler(), q2.scheduler()));
        assert_ne!(q1.next_element_id("x"), q2.next_element_id("x"));
    }
}
