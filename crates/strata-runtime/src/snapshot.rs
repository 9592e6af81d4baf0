//! Snapshot contract and registry
//!
//! Every stateful processor implements [`Snapshotable`] and registers itself
//! with the app's [`SnapshotService`] at construction, keyed by query name
//! and a processor-unique element id. A full snapshot pulls each live
//! element's state; restore pushes states back by element id.
//!
//! # Example
//! ```ignore
//! let snapshot = app.snapshot_service().full_snapshot()?;
//! let bytes = snapshot.to_bytes()?;
//! // ... after restart, with the same queries rebuilt:
//! app.snapshot_service().restore(&AppSnapshot::from_bytes(&bytes)?)?;
//! ```

use crate::error::{EngineError, EngineResult};
use indexmap::IndexMap;
use parking_lot::RwLock;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::sync::Weak;
use tracing::{debug, info, warn};

/// Current snapshot format version
pub const SNAPSHOT_VERSION: u32 = 1;

/// Named, versioned bag of serialized state for one element
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Snapshot {
    pub element_id: String,
    pub version: u32,
    entries: IndexMap<String, serde_json::Value>,
}

impl Snapshot {
    pub fn new(element_id: impl Into<String>) -> Self {
        Self {
            element_id: element_id.into(),
            version: SNAPSHOT_VERSION,
            entries: IndexMap::new(),
        }
    }

    pub fn put<T: Serialize + ?Sized>(&mut self, key: &str, value: &T) -> EngineResult<()> {
        let json = serde_json::to_value(value)
            .map_err(|e| EngineError::snapshot(&self.element_id, format!("{key}: {e}")))?;
        self.entries.insert(key.to_string(), json);
        Ok(())
    }

    /// Builder form of [`put`](Self::put).
    pub fn with<T: Serialize + ?Sized>(mut self, key: &str, value: &T) -> EngineResult<Self> {
        self.put(key, value)?;
        Ok(self)
    }

    pub fn get<T: DeserializeOwned>(&self, key: &str) -> EngineResult<T> {
        self.get_opt(key)?
            .ok_or_else(|| EngineError::snapshot(&self.element_id, format!("missing entry '{key}'")))
    }

    pub fn get_opt<T: DeserializeOwned>(&self, key: &str) -> EngineResult<Option<T>> {
        self.entries
            .get(key)
            .map(|json| {
                T::deserialize(json)
                    .map_err(|e| EngineError::snapshot(&self.element_id, format!("{key}: {e}")))
            })
            .transpose()
    }

    pub fn keys(&self) -> impl Iterator<Item = &str> {
        self.entries.keys().map(String::as_str)
    }

    /// Reject snapshots from a newer format.
    pub fn check_version(&self) -> EngineResult<()> {
        if self.version > SNAPSHOT_VERSION {
            return Err(EngineError::snapshot(
                &self.element_id,
                format!("version {} is newer than supported {}", self.version, SNAPSHOT_VERSION),
            ));
        }
        Ok(())
    }
}

/// A component whose state can be captured and restored
pub trait Snapshotable: Send + Sync {
    fn element_id(&self) -> &str;

    /// State sufficient to reproduce this element's future behavior.
    fn current_state(&self) -> EngineResult<Snapshot>;

    fn restore_state(&self, snapshot: &Snapshot) -> EngineResult<()>;
}

/// Snapshot of every registered element of an app, grouped by query
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct AppSnapshot {
    pub version: u32,
    /// Epoch milliseconds at capture time
    pub taken_at: i64,
    pub queries: IndexMap<String, IndexMap<String, Snapshot>>,
}

impl AppSnapshot {
    pub fn to_bytes(&self) -> EngineResult<Vec<u8>> {
        Ok(serde_json::to_vec(self)?)
    }

    pub fn from_bytes(bytes: &[u8]) -> EngineResult<Self> {
        Ok(serde_json::from_slice(bytes)?)
    }

    pub fn element(&self, query: &str, element_id: &str) -> Option<&Snapshot> {
        self.queries.get(query).and_then(|q| q.get(element_id))
    }

    pub fn element_count(&self) -> usize {
        self.queries.values().map(IndexMap::len).sum()
    }
}

struct Registration {
    element_id: String,
    item: Weak<dyn Snapshotable>,
}

/// Registry of snapshotable elements for one app
#[derive(Default)]
pub struct SnapshotService {
    registry: RwLock<IndexMap<String, Vec<Registration>>>,
}

impl SnapshotService {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_snapshotable(&self, query: &str, element_id: &str, item: Weak<dyn Snapshotable>) {
        debug!("Registering snapshotable {} under query {}", element_id, query);
        self.registry
            .write()
            .entry(query.to_string())
            .or_default()
            .push(Registration {
                element_id: element_id.to_string(),
                item,
            });
    }

    pub fn remove_snapshotable(&self, query: &str, element_id: &str) {
        if let Some(list) = self.registry.write().get_mut(query) {
            list.retain(|r| r.element_id != element_id);
        }
    }

    /// Forget every element of a query.
    pub fn remove_query(&self, query: &str) {
        self.registry.write().shift_remove(query);
    }

    /// Number of live registered elements.
    pub fn registered(&self) -> usize {
        self.registry
            .read()
            .values()
            .flatten()
            .filter(|r| r.item.strong_count() > 0)
            .count()
    }

    pub fn full_snapshot(&self, taken_at: i64) -> EngineResult<AppSnapshot> {
        let mut snapshot = AppSnapshot {
            version: SNAPSHOT_VERSION,
            taken_at,
            queries: IndexMap::new(),
        };
        let registry = self.registry.read();
        for (query, registrations) in registry.iter() {
            let mut elements = IndexMap::new();
            for item in registrations.iter().filter_map(|r| r.item.upgrade()) {
                elements.insert(item.element_id().to_string(), item.current_state()?);
            }
            snapshot.queries.insert(query.clone(), elements);
        }
        info!(
            "Captured snapshot of {} elements across {} queries",
            snapshot.element_count(),
            snapshot.queries.len()
        );
        Ok(snapshot)
    }

    /// Push states back into registered elements. Elements without a state in
    /// `snapshot` keep their current state.
    pub fn restore(&self, snapshot: &AppSnapshot) -> EngineResult<()> {
        if snapshot.version > SNAPSHOT_VERSION {
            return Err(EngineError::snapshot(
                "app",
                format!("version {} is newer than supported {}", snapshot.version, SNAPSHOT_VERSION),
            ));
        }
        let registry = self.registry.read();
        let mut restored = 0usize;
        for (query, registrations) in registry.iter() {
            for registration in registrations {
                let Some(item) = registration.item.upgrade() else {
                    continue;
                };
                match snapshot.element(query, &registration.element_id) {
                    Some(state) => {
                        state.check_version()?;
                        item.restore_state(state)?;
                        restored += 1;
                    }
                    None => warn!(
                        "No snapshot for element {} of query {}",
                        registration.element_id, query
                    ),
                }
            }
        }
        info!("Restored {} elements from snapshot", restored);
        Ok(())
    }
}
