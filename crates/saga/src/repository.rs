//! Saga repository: load, lock, and commit instances around a transition.

use std::future::Future;
use std::marker::PhantomData;

use common::CorrelationId;
use saga_store::{SagaStore, StoredInstance};
use state_machine::{Correlation, SagaStateMachineInstance};

use crate::error::{Result, SagaError};
use crate::locks::KeyedLocks;

/// What to do with the instance once the unit of work succeeds.
#[derive(Debug, Clone, PartialEq)]
pub enum InstanceAction<I> {
    /// Insert or update the instance.
    Persist(I),
    /// Delete the instance.
    Remove,
}

/// Wraps a [`SagaStore`] with per-key locking and optimistic commits.
///
/// Within one repository, units of work on the same correlation ID run one at
/// a time. Repositories sharing a store only through the database (separate
/// processes) are kept consistent by the version check on commit.
pub struct SagaRepository<S, I> {
    store: S,
    locks: KeyedLocks,
    _instance: PhantomData<fn() -> I>,
}

impl<S, I> SagaRepository<S, I>
where
    S: SagaStore,
    I: SagaStateMachineInstance,
{
    /// Creates a repository over `store`.
    pub fn new(store: S) -> Self {
        Self::with_locks(store, KeyedLocks::new())
    }

    /// Creates a repository that shares `locks` with other repositories.
    pub fn with_locks(store: S, locks: KeyedLocks) -> Self {
        Self {
            store,
            locks,
            _instance: PhantomData,
        }
    }

    /// Returns the underlying store.
    pub fn store(&self) -> &S {
        &self.store
    }

    /// Returns the lock set.
    pub fn locks(&self) -> &KeyedLocks {
        &self.locks
    }

    /// Runs `f` against the instance for `correlation` and commits its result.
    ///
    /// The key stays locked from load to commit. A missing instance is created
    /// for initiating events and reported as [`SagaError::NotFound`] otherwise.
    /// If `f` fails, nothing is written.
    #[tracing::instrument(
        skip(self, f),
        fields(
            correlation_id = %correlation.correlation_id,
            event_type = correlation.event_type,
        )
    )]
    pub async fn with_instance<F, Fut, T>(&self, correlation: &Correlation, f: F) -> Result<T>
    where
        F: FnOnce(I) -> Fut + Send,
        Fut: Future<Output = Result<(InstanceAction<I>, T)>> + Send,
        T: Send,
    {
        let correlation_id = correlation.correlation_id;
        let _guard = self.locks.acquire(correlation_id).await;

        let (instance, version) = match self.store.load(correlation_id).await? {
            Some(record) => (record.decode::<I>()?, Some(record.version)),
            None if correlation.is_initiating() => (I::create(correlation_id), None),
            None => return Err(SagaError::NotFound(correlation_id)),
        };

        let (action, value) = f(instance).await?;

        match (action, version) {
            (InstanceAction::Persist(instance), None) => {
                let record =
                    StoredInstance::from_instance(correlation_id, instance.current_state(), &instance)?;
                let version = self.store.insert_new(record).await?;
                tracing::debug!(%version, "saga instance inserted");
            }
            (InstanceAction::Persist(instance), Some(expected)) => {
                let record =
                    StoredInstance::from_instance(correlation_id, instance.current_state(), &instance)?;
                let version = self.store.update_with_version(record, expected).await?;
                tracing::debug!(%version, "saga instance updated");
            }
            (InstanceAction::Remove, Some(expected)) => {
                self.store.delete(correlation_id, expected).await?;
                tracing::debug!("saga instance removed");
            }
            (InstanceAction::Remove, None) => {
                tracing::debug!("saga instance completed without being stored");
            }
        }

        Ok(value)
    }

    /// Loads an instance without locking it.
    pub async fn load(&self, correlation_id: CorrelationId) -> Result<Option<I>> {
        match self.store.load(correlation_id).await? {
            Some(record) => Ok(Some(record.decode()?)),
            None => Ok(None),
        }
    }
}

impl<S: Clone, I> Clone for SagaRepository<S, I> {
    fn clone(&self) -> Self {
        Self {
            store: self.store.clone(),
            locks: self.locks.clone(),
            _instance: PhantomData,
        }
    }
}
