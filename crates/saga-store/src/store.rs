use async_trait::async_trait;

use crate::{CorrelationId, Result, StoredInstance, Version};

/// Core trait for saga instance storage.
///
/// Implementations keep at most one record per correlation ID and enforce the
/// version check on every write. All implementations must be thread-safe
/// (Send + Sync).
#[async_trait]
pub trait SagaStore: Send + Sync {
    /// Loads the record for a correlation ID.
    ///
    /// Returns None if no instance exists.
    async fn load(&self, correlation_id: CorrelationId) -> Result<Option<StoredInstance>>;

    /// Inserts a record that must not exist yet.
    ///
    /// Fails with `ConcurrencyConflict` if a record with the same correlation
    /// ID is already present. Returns the stored version ([`Version::first`]).
    async fn insert_new(&self, instance: StoredInstance) -> Result<Version>;

    /// Replaces a record, provided it is still at `expected`.
    ///
    /// Fails with `ConcurrencyConflict` if the stored version differs or the
    /// record is gone. Returns the new version.
    async fn update_with_version(
        &self,
        instance: StoredInstance,
        expected: Version,
    ) -> Result<Version>;

    /// Deletes a record, provided it is still at `expected`.
    async fn delete(&self, correlation_id: CorrelationId, expected: Version) -> Result<()>;
}

/// Extension trait providing convenience methods for saga stores.
#[async_trait]
pub trait SagaStoreExt: SagaStore {
    /// Checks if an instance exists.
    async fn exists(&self, correlation_id: CorrelationId) -> Result<bool> {
        Ok(self.load(correlation_id).await?.is_some())
    }

    /// Returns the stored version, or None if the instance doesn't exist.
    async fn version_of(&self, correlation_id: CorrelationId) -> Result<Option<Version>> {
        Ok(self.load(correlation_id).await?.map(|record| record.version))
    }
}

// Blanket implementation for all SagaStore implementations
impl<T: SagaStore + ?Sized> SagaStoreExt for T {}
