//! Typed entity table
//!
//! Membership is guarded by one map-level lock; each entity carries its own
//! lock so that mutating one entity never waits on another.

use std::collections::HashMap;
use std::sync::Arc;

use tokio::sync::{OwnedRwLockWriteGuard, RwLock};

use crate::{Error, Result};

/// Anything that can live in the instance store
pub trait Entity: Clone + Send + Sync + 'static {
    /// Human readable kind used in error messages ("thread", "run", ...)
    const KIND: &'static str;

    fn id(&self) -> &str;
}

/// Exclusive access to one entity, held across multi-step critical sections
pub type EntityGuard<T> = OwnedRwLockWriteGuard<T>;

pub struct Table<T: Entity> {
    rows: RwLock<HashMap<String, Arc<RwLock<T>>>>,
}

impl<T: Entity> Table<T> {
    pub fn new() -> Self {
        Self {
            rows: RwLock::new(HashMap::new()),
        }
    }

    async fn slot(&self, id: &str) -> Result<Arc<RwLock<T>>> {
        self.rows
            .read()
            .await
            .get(id)
            .cloned()
            .ok_or_else(|| Error::not_found(T::KIND, id))
    }

    /// Insert a new entity, failing with `Conflict` if the id is taken
    pub async fn create(&self, entity: T) -> Result<T> {
        let mut rows = self.rows.write().await;
        if rows.contains_key(entity.id()) {
            return Err(Error::Conflict(format!(
                "{} {} already exists",
                T::KIND,
                entity.id()
            )));
        }
        rows.insert(
            entity.id().to_string(),
            Arc::new(RwLock::new(entity.clone())),
        );
        Ok(entity)
    }

    /// Snapshot of an entity
    pub async fn get(&self, id: &str) -> Result<T> {
        let slot = self.slot(id).await?;
        let entity = slot.read().await.clone();
        Ok(entity)
    }

    pub async fn find(&self, id: &str) -> Option<T> {
        self.get(id).await.ok()
    }

    pub async fn contains(&self, id: &str) -> bool {
        self.rows.read().await.contains_key(id)
    }

    /// Apply `f` atomically.
    ///
    /// `f` works on a draft copy; the draft replaces the stored entity only
    /// when `f` returns `Ok`, so a rejected update leaves no trace.
    pub async fn update<R, F>(&self, id: &str, f: F) -> Result<R>
    where
        F: FnOnce(&mut T) -> Result<R>,
    {
        let slot = self.slot(id).await?;
        let mut guard = slot.write().await;
        let mut draft = guard.clone();
        let out = f(&mut draft)?;
        *guard = draft;
        Ok(out)
    }

    /// Take the entity's write lock for a critical section spanning several
    /// tables. Lock order across tables is thread, then run, then step or
    /// tool call.
    pub async fn lock(&self, id: &str) -> Result<EntityGuard<T>> {
        let slot = self.slot(id).await?;
        Ok(slot.write_owned().await)
    }

    /// Snapshots of every entity, in no particular order
    pub async fn list(&self) -> Vec<T> {
        let slots: Vec<Arc<RwLock<T>>> = self.rows.read().await.values().cloned().collect();
        let mut entities = Vec::with_capacity(slots.len());
        for slot in slots {
            entities.push(slot.read().await.clone());
        }
        entities
    }

    /// Drop an entity from the table. Holders of an outstanding guard keep
    /// their (now detached) copy.
    pub async fn remove(&self, id: &str) -> Result<()> {
        self.rows
            .write()
            .await
            .remove(id)
            .map(|_| ())
            .ok_or_else(|| Error::not_found(T::KIND, id))
    }

    pub async fn len(&self) -> usize {
        self.rows.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }
}

impl<T: Entity> Default for Table<T> {
    fn default() -> Self {
        Self::new()
    }
}
