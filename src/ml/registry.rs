//! Registry of trained demand models.
//!
//! Models are owned here as `Arc` snapshots keyed by (warehouse_id, sku_id).
//! Publishing a retrained model is a whole-value swap: concurrent readers
//! hold either the old snapshot or the new one, never a partially written
//! model. A per-key async mutex serializes retrains for the same key while
//! retrains for different keys proceed independently.

use std::fmt;
use std::sync::Arc;

use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use tokio::sync::Mutex;

use crate::ml::forecasting::DemandModel;

/// Identifies one (warehouse, SKU) series.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ModelKey {
    pub warehouse_id: String,
    pub sku_id: String,
}

impl ModelKey {
    pub fn new(warehouse_id: impl Into<String>, sku_id: impl Into<String>) -> Self {
        Self {
            warehouse_id: warehouse_id.into(),
            sku_id: sku_id.into(),
        }
    }
}

impl fmt::Display for ModelKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}_{}", self.warehouse_id, self.sku_id)
    }
}

/// Concurrent model store with read-copy-update replacement.
#[derive(Default)]
pub struct ModelRegistry {
    models: DashMap<ModelKey, Arc<DemandModel>>,
    training_locks: DashMap<ModelKey, Arc<Mutex<()>>>,
}

impl ModelRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the current snapshot for a key, if any.
    pub fn get(&self, key: &ModelKey) -> Option<Arc<DemandModel>> {
        self.models.get(key).map(|entry| Arc::clone(entry.value()))
    }

    /// Atomically replaces the snapshot for a key.
    pub fn publish(&self, key: ModelKey, model: DemandModel) -> Arc<DemandModel> {
        let model = Arc::new(model);
        self.models.insert(key, Arc::clone(&model));
        model
    }

    /// The per-key lock a trainer must hold while fitting and publishing.
    /// Locks for different keys are independent.
    pub fn training_lock(&self, key: &ModelKey) -> Arc<Mutex<()>> {
        self.training_locks
            .entry(key.clone())
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone()
    }

    pub fn remove(&self, key: &ModelKey) -> Option<Arc<DemandModel>> {
        self.models.remove(key).map(|(_, model)| model)
    }

    pub fn len(&self) -> usize {
        self.models.len()
    }

    pub fn is_empty(&self) -> bool {
        self.models.is_empty()
    }

    /// Snapshot of all keys and models, for status reporting.
    pub fn snapshot(&self) -> Vec<(ModelKey, Arc<DemandModel>)> {
        self.models
            .iter()
            .map(|entry| (entry.key().clone(), Arc::clone(entry.value())))
            .collect()
    }
}
