//! One resource kind's cached entities.
//!
//! Entities are handed out as [`EntityRef`] handles that stay valid (and keep
//! observing updates) for as long as the entity is cached. Every mutation
//! edits the existing collection and the existing entity in place.

use std::collections::HashMap;
use std::fmt;
use std::sync::{Arc, PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};

use hangar_types::{Entity, EntityId, Scope};
use tokio::sync::watch;

/// Shared handle to one cached entity.
///
/// Cloning the handle does not clone the entity: two handles are the same
/// entity iff [`EntityRef::ptr_eq`] holds.
pub struct EntityRef<E>(Arc<RwLock<E>>);

impl<E> Clone for EntityRef<E> {
    fn clone(&self) -> Self {
        Self(Arc::clone(&self.0))
    }
}

impl<E: fmt::Debug> fmt::Debug for EntityRef<E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("EntityRef").field(&*self.read()).finish()
    }
}

impl<E> EntityRef<E> {
    fn new(entity: E) -> Self {
        Self(Arc::new(RwLock::new(entity)))
    }

    /// Borrow the current state. Do not hold the guard across an `.await`.
    pub fn read(&self) -> RwLockReadGuard<'_, E> {
        self.0.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn write(&self) -> RwLockWriteGuard<'_, E> {
        self.0.write().unwrap_or_else(PoisonError::into_inner)
    }

    #[must_use]
    pub fn ptr_eq(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.0, &other.0)
    }
}

impl<E: Clone> EntityRef<E> {
    /// Owned copy of the current state.
    #[must_use]
    pub fn snapshot(&self) -> E {
        self.read().clone()
    }
}

impl<E: Entity> EntityRef<E> {
    #[must_use]
    pub fn id(&self) -> EntityId {
        self.read().id().clone()
    }

    #[must_use]
    pub fn status(&self) -> Option<E::Status> {
        self.read().status().cloned()
    }
}

/// Ordered collection of one kind's entities, newest first.
///
/// No two cached entities share an identifier.
pub struct CollectionCache<E> {
    entries: RwLock<Vec<EntityRef<E>>>,
    revision: watch::Sender<u64>,
}

impl<E: Entity> Default for CollectionCache<E> {
    fn default() -> Self {
        Self::new()
    }
}

impl<E: Entity> fmt::Debug for CollectionCache<E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CollectionCache")
            .field("len", &self.len())
            .field("revision", &self.revision())
            .finish()
    }
}

impl<E: Entity> CollectionCache<E> {
    #[must_use]
    pub fn new() -> Self {
        let (revision, _) = watch::channel(0);
        Self {
            entries: RwLock::new(Vec::new()),
            revision,
        }
    }

    fn entries(&self) -> RwLockReadGuard<'_, Vec<EntityRef<E>>> {
        self.entries.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn entries_mut(&self) -> RwLockWriteGuard<'_, Vec<EntityRef<E>>> {
        self.entries.write().unwrap_or_else(PoisonError::into_inner)
    }

    fn bump(&self) {
        self.revision.send_modify(|revision| *revision += 1);
    }

    /// Replace every cached entity that `scope` covers with `entities`.
    ///
    /// Entities of other scopes keep their place. Incoming entities are
    /// appended in batch order; an id repeated in the batch keeps its first
    /// position and its last value. A cached entity whose id reappears in the
    /// batch keeps its handle and takes the new contents.
    pub fn replace_scope(&self, entities: impl IntoIterator<Item = E>, scope: Scope) {
        let mut batch: Vec<E> = Vec::new();
        let mut positions: HashMap<EntityId, usize> = HashMap::new();
        for entity in entities {
            if let Some(&slot) = positions.get(entity.id()) {
                batch[slot] = entity;
            } else {
                positions.insert(entity.id().clone(), batch.len());
                batch.push(entity);
            }
        }

        let mut entries = self.entries_mut();
        let mut reused: HashMap<EntityId, EntityRef<E>> = HashMap::new();
        entries.retain(|handle| {
            let entity = handle.read();
            if positions.contains_key(entity.id()) {
                reused.insert(entity.id().clone(), handle.clone());
                return false;
            }
            !scope.contains(&*entity)
        });

        for entity in batch {
            let handle = match reused.remove(entity.id()) {
                Some(handle) => {
                    *handle.write() = entity;
                    handle
                }
                None => EntityRef::new(entity),
            };
            entries.push(handle);
        }
        drop(entries);

        tracing::trace!(?scope, "Replaced cached scope");
        self.bump();
    }

    /// Overwrite the cached entity with the same id, keeping its handle.
    ///
    /// Returns `None` (and changes nothing) when the id is not cached.
    pub fn upsert_in_place(&self, entity: E) -> Option<EntityRef<E>> {
        let handle = self.find_by_id(entity.id())?;
        *handle.write() = entity;
        self.bump();
        Some(handle)
    }

    /// Prepend a new entity. An id that is already cached is updated in
    /// place instead of duplicated.
    pub fn insert(&self, entity: E) -> EntityRef<E> {
        let mut entries = self.entries_mut();
        let existing = entries
            .iter()
            .find(|handle| handle.read().id() == entity.id())
            .cloned();
        let handle = match existing {
            Some(handle) => {
                *handle.write() = entity;
                handle
            }
            None => {
                let handle = EntityRef::new(entity);
                entries.insert(0, handle.clone());
                handle
            }
        };
        drop(entries);
        self.bump();
        handle
    }

    pub fn remove_by_id(&self, id: &EntityId) -> Option<EntityRef<E>> {
        let mut entries = self.entries_mut();
        let index = entries.iter().position(|handle| handle.read().id() == id)?;
        let removed = entries.remove(index);
        drop(entries);
        self.bump();
        Some(removed)
    }

    /// Apply a partial update to the cached entity in place.
    pub fn modify<R>(&self, id: &EntityId, update: impl FnOnce(&mut E) -> R) -> Option<R> {
        let handle = self.find_by_id(id)?;
        let result = {
            let mut entity = handle.write();
            let result = update(&mut entity);
            debug_assert_eq!(entity.id(), id, "partial update changed the entity id");
            result
        };
        self.bump();
        Some(result)
    }

    #[must_use]
    pub fn find_by_id(&self, id: &EntityId) -> Option<EntityRef<E>> {
        self.entries()
            .iter()
            .find(|handle| handle.read().id() == id)
            .cloned()
    }

    #[must_use]
    pub fn filter_by_scope(&self, scope: Scope) -> Vec<EntityRef<E>> {
        self.filter(|entity| scope.contains(entity))
    }

    #[must_use]
    pub fn filter(&self, predicate: impl Fn(&E) -> bool) -> Vec<EntityRef<E>> {
        self.entries()
            .iter()
            .filter(|handle| predicate(&handle.read()))
            .cloned()
            .collect()
    }

    #[must_use]
    pub fn all(&self) -> Vec<EntityRef<E>> {
        self.entries().clone()
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.entries().len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries().is_empty()
    }

    pub fn clear(&self) {
        self.entries_mut().clear();
        self.bump();
    }

    /// Incremented on every mutation.
    #[must_use]
    pub fn revision(&self) -> u64 {
        *self.revision.borrow()
    }

    #[must_use]
    pub fn subscribe(&self) -> watch::Receiver<u64> {
        self.revision.subscribe()
    }
}
