//! Generic CRUD over one entity collection.

use std::marker::PhantomData;

use chrono::Utc;
use occtrack_core::error::CoreError;
use occtrack_core::types::Timestamp;

use crate::error::{DbError, DbResult};
use crate::models::record::{Entity, RecordMeta, RecordStub, Reference};
use crate::store::{CollectionGuard, Mutation, RecordStore};

/// Provides CRUD operations for the entity `T`.
///
/// Every write holds the collection lock across its load and replace.
/// Creating a record with [`Entity::references`] additionally holds the lock
/// of each referenced collection while the reference is checked and the new
/// record is written, acquired after the entity's own lock. No write path
/// acquires locks in the opposite order.
pub struct Repository<T> {
    store: RecordStore,
    _entity: PhantomData<fn() -> T>,
}

impl<T> Clone for Repository<T> {
    fn clone(&self) -> Self {
        Self {
            store: self.store.clone(),
            _entity: PhantomData,
        }
    }
}

impl<T: Entity> Repository<T> {
    pub fn new(store: RecordStore) -> Self {
        Self {
            store,
            _entity: PhantomData,
        }
    }

    pub fn store(&self) -> &RecordStore {
        &self.store
    }

    /// Create the backing collection if it does not exist.
    pub async fn ensure_initialized(&self) -> DbResult<()> {
        self.store.ensure_initialized(T::COLLECTION).await?;
        Ok(())
    }

    /// Validate, persist and return a new record.
    pub async fn create(&self, input: T::Create) -> DbResult<T> {
        // Id and createdAt are stamped under the lock: insertion order matches id order.
        let guard = self.store.lock(T::COLLECTION).await;
        let mut record = T::build(RecordMeta::new(Utc::now()), input)?;
        record.recompute();

        let references = record.references();
        let mut held: Vec<CollectionGuard<'_>> = Vec::new();
        for reference in &references {
            if reference.collection != T::COLLECTION
                && !held.iter().any(|g| g.collection() == reference.collection)
            {
                held.push(self.store.lock(reference.collection).await);
            }
        }
        for reference in &references {
            self.check_reference(reference).await?;
        }

        let mut records: Vec<T> = guard.load().await?;
        check_unique(&records, &record)?;
        records.push(record.clone());
        guard.replace(&records).await?;
        drop(held);

        tracing::debug!(
            collection = T::COLLECTION,
            id = %record.id(),
            "Record created"
        );
        Ok(record)
    }

    /// Fetch a record by id, failing with `NotFound` when absent.
    pub async fn get(&self, id: &str) -> DbResult<T> {
        self.find(id)
            .await?
            .ok_or_else(|| CoreError::not_found(T::ENTITY, id).into())
    }

    pub async fn find(&self, id: &str) -> DbResult<Option<T>> {
        let records: Vec<T> = self.store.load_all(T::COLLECTION).await?;
        Ok(records.into_iter().find(|r| r.id() == id))
    }

    /// All records matching `predicate`, in insertion order.
    pub async fn list<P>(&self, predicate: P) -> DbResult<Vec<T>>
    where
        P: Fn(&T) -> bool,
    {
        let records: Vec<T> = self.store.load_all(T::COLLECTION).await?;
        Ok(records.into_iter().filter(|r| predicate(r)).collect())
    }

    pub async fn list_all(&self) -> DbResult<Vec<T>> {
        self.list(|_| true).await
    }

    pub async fn count(&self) -> DbResult<usize> {
        let records: Vec<T> = self.store.load_all(T::COLLECTION).await?;
        Ok(records.len())
    }

    /// Apply `patch` through [`Entity::patched`] and persist the result.
    pub async fn update(&self, id: &str, patch: T::Patch) -> DbResult<T> {
        let (record, ()) = self
            .modify(id, |current, now| Ok((current.patched(patch, now)?, ())))
            .await?;
        Ok(record)
    }

    /// Remove a record. Returns `false` when no record had that id.
    pub async fn delete(&self, id: &str) -> DbResult<bool> {
        let removed = self
            .store
            .mutate(T::COLLECTION, |records: &mut Vec<T>| {
                let before = records.len();
                records.retain(|r| r.id() != id);
                Ok::<_, DbError>(if records.len() < before {
                    Mutation::Commit(true)
                } else {
                    Mutation::Unchanged(false)
                })
            })
            .await?;
        if removed {
            tracing::debug!(collection = T::COLLECTION, id, "Record deleted");
        }
        Ok(removed)
    }

    /// Locked replace of one record by a value derived from it.
    ///
    /// `f` receives the stored record and must return its successor without
    /// mutating the original. Derived fields are recomputed, `updatedAt` is
    /// bumped and unique keys are re-checked before the write.
    pub(crate) async fn modify<R, F>(&self, id: &str, f: F) -> DbResult<(T, R)>
    where
        F: FnOnce(&T, Timestamp) -> Result<(T, R), CoreError>,
    {
        let guard = self.store.lock(T::COLLECTION).await;
        self.modify_locked(&guard, id, f).await
    }

    /// [`modify`](Self::modify) for a caller already holding the lock.
    pub(crate) async fn modify_locked<R, F>(
        &self,
        guard: &CollectionGuard<'_>,
        id: &str,
        f: F,
    ) -> DbResult<(T, R)>
    where
        F: FnOnce(&T, Timestamp) -> Result<(T, R), CoreError>,
    {
        let mut records: Vec<T> = guard.load().await?;
        let index = records
            .iter()
            .position(|r| r.id() == id)
            .ok_or_else(|| CoreError::not_found(T::ENTITY, id))?;

        let now = Utc::now();
        let (mut next, out) = f(&records[index], now)?;
        next.recompute();
        let mut meta = records[index].meta().clone();
        meta.touch(now);
        *next.meta_mut() = meta;
        check_unique(&records, &next)?;

        records[index] = next.clone();
        guard.replace(&records).await?;
        Ok((next, out))
    }

    async fn check_reference(&self, reference: &Reference) -> DbResult<()> {
        let targets: Vec<RecordStub> = self.store.load_all(reference.collection).await?;
        if targets.iter().any(|t| t.id == reference.id) {
            Ok(())
        } else {
            Err(CoreError::ConstraintViolation(format!(
                "{} references missing {} {}",
                T::ENTITY,
                reference.entity,
                reference.id
            ))
            .into())
        }
    }
}

/// Reject `candidate` if another record already holds one of its unique keys.
fn check_unique<T: Entity>(records: &[T], candidate: &T) -> Result<(), CoreError> {
    let keys = candidate.unique_keys();
    if keys.is_empty() {
        return Ok(());
    }
    for existing in records.iter().filter(|r| r.id() != candidate.id()) {
        let taken = existing.unique_keys();
        if let Some(key) = keys.iter().find(|k| taken.contains(k)) {
            return Err(CoreError::ConstraintViolation(format!(
                "{} with {} '{}' already exists",
                T::ENTITY,
                key.field,
                key.value
            )));
        }
    }
    Ok(())
}
