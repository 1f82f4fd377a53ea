use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::Utc;
use tokio::sync::RwLock;

use crate::{CorrelationId, Result, StoreError, StoredInstance, Version, store::SagaStore};

/// In-memory saga store.
///
/// Provides the same interface and conflict semantics as the PostgreSQL
/// implementation. Clones share the same underlying map.
#[derive(Clone, Default)]
pub struct InMemorySagaStore {
    instances: Arc<RwLock<HashMap<CorrelationId, StoredInstance>>>,
}

impl InMemorySagaStore {
    /// Creates a new empty in-memory store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the number of stored instances.
    pub async fn instance_count(&self) -> usize {
        self.instances.read().await.len()
    }

    /// Removes all instances.
    pub async fn clear(&self) {
        self.instances.write().await.clear();
    }
}

#[async_trait]
impl SagaStore for InMemorySagaStore {
    async fn load(&self, correlation_id: CorrelationId) -> Result<Option<StoredInstance>> {
        let instances = self.instances.read().await;
        Ok(instances.get(&correlation_id).cloned())
    }

    async fn insert_new(&self, mut instance: StoredInstance) -> Result<Version> {
        let mut instances = self.instances.write().await;

        if let Some(existing) = instances.get(&instance.correlation_id) {
            return Err(StoreError::ConcurrencyConflict {
                correlation_id: instance.correlation_id,
                expected: Version::initial(),
                actual: existing.version,
            });
        }

        let now = Utc::now();
        instance.version = Version::first();
        instance.created_at = now;
        instance.updated_at = now;
        instances.insert(instance.correlation_id, instance);

        Ok(Version::first())
    }

    async fn update_with_version(
        &self,
        mut instance: StoredInstance,
        expected: Version,
    ) -> Result<Version> {
        let mut instances = self.instances.write().await;
        let correlation_id = instance.correlation_id;

        let Some(existing) = instances.get_mut(&correlation_id) else {
            return Err(StoreError::ConcurrencyConflict {
                correlation_id,
                expected,
                actual: Version::initial(),
            });
        };

        if existing.version != expected {
            return Err(StoreError::ConcurrencyConflict {
                correlation_id,
                expected,
                actual: existing.version,
            });
        }

        let new_version = expected.next();
        instance.version = new_version;
        instance.created_at = existing.created_at;
        instance.updated_at = Utc::now();
        *existing = instance;

        Ok(new_version)
    }

    async fn delete(&self, correlation_id: CorrelationId, expected: Version) -> Result<()> {
        let mut instances = self.instances.write().await;

        let actual = instances
            .get(&correlation_id)
            .map(|existing| existing.version)
            .unwrap_or(Version::initial());

        if actual != expected || actual == Version::initial() {
            return Err(StoreError::ConcurrencyConflict {
                correlation_id,
                expected,
                actual,
            });
        }

        instances.remove(&correlation_id);
        Ok(())
    }
}
