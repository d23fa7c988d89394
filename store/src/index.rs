//! Read-only views over a [`CollectionCache`].
//!
//! Views are recomputed from the cache on every call; they hand out the same
//! [`EntityRef`] handles the cache holds rather than copies.

use std::sync::Arc;

use hangar_types::{Entity, EntityId, Scope, Selection, TeamId, TenantId};

use crate::cache::{CollectionCache, EntityRef};

pub struct ScopeIndex<E> {
    cache: Arc<CollectionCache<E>>,
}

impl<E> Clone for ScopeIndex<E> {
    fn clone(&self) -> Self {
        Self {
            cache: Arc::clone(&self.cache),
        }
    }
}

impl<E: Entity> ScopeIndex<E> {
    #[must_use]
    pub fn new(cache: Arc<CollectionCache<E>>) -> Self {
        Self { cache }
    }

    #[must_use]
    pub fn by_id(&self, id: &EntityId) -> Option<EntityRef<E>> {
        self.cache.find_by_id(id)
    }

    #[must_use]
    pub fn for_scope(&self, scope: Scope) -> Vec<EntityRef<E>> {
        self.cache.filter_by_scope(scope)
    }

    #[must_use]
    pub fn for_team(&self, team: TeamId) -> Vec<EntityRef<E>> {
        self.cache.filter(|entity| entity.team() == team)
    }

    #[must_use]
    pub fn for_tenant(&self, tenant: TenantId) -> Vec<EntityRef<E>> {
        self.cache.filter(|entity| entity.tenant() == Some(tenant))
    }

    /// Everything visible under `selection`: the filter tenant's entities
    /// when a filter is set, otherwise the whole active team. Empty when no
    /// team is active.
    #[must_use]
    pub fn active_view(&self, selection: &Selection) -> Vec<EntityRef<E>> {
        self.active_view_where(selection, |_| true)
    }

    #[must_use]
    pub fn active_view_where(
        &self,
        selection: &Selection,
        predicate: impl Fn(&E) -> bool,
    ) -> Vec<EntityRef<E>> {
        let Some(scope) = selection.visible_scope() else {
            return Vec::new();
        };
        self.cache
            .filter(|entity| scope.contains(entity) && predicate(entity))
    }
}
