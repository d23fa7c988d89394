//! The per-kind facade UI code talks to.

use std::marker::PhantomData;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use hangar_transport::{Locator, Transport, TransportError};
use hangar_types::{
    Entity, EntityId, Instance, LeaseRenewal, Scope, Selection, TerminalStatuses,
};
use serde::Serialize;
use serde::de::DeserializeOwned;
use serde_json::{Value, json};
use thiserror::Error;

use crate::cache::{CollectionCache, EntityRef};
use crate::index::ScopeIndex;
use crate::kind::{DeletePolicy, Instances, MutableKind, ResourceKind, Volumes, scope_of};
use crate::poll::{FetchFut, PollReconciler, Refetch};
use crate::timer::Timer;

type Status<K> = <<K as ResourceKind>::Entity as Entity>::Status;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("{kind}: {source}")]
    Transport {
        kind: &'static str,
        #[source]
        source: TransportError,
    },

    #[error("{kind}: unexpected response payload: {source}")]
    Decode {
        kind: &'static str,
        #[source]
        source: serde_json::Error,
    },

    #[error("{kind}: could not encode request: {source}")]
    Encode {
        kind: &'static str,
        #[source]
        source: serde_json::Error,
    },

    #[error("{kind} {entity} has no {link}")]
    MissingLink {
        kind: &'static str,
        entity: EntityId,
        link: &'static str,
    },
}

impl StoreError {
    fn transport<K: ResourceKind>(source: TransportError) -> Self {
        Self::Transport {
            kind: K::NAME,
            source,
        }
    }

    /// Message suitable for showing to a user.
    #[must_use]
    pub fn detail(&self) -> String {
        match self {
            Self::Transport { source, .. } => source.detail(),
            other => other.to_string(),
        }
    }

    #[must_use]
    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::Transport { source, .. } if source.is_not_found())
    }
}

fn decode<K: ResourceKind, T: DeserializeOwned>(value: Value) -> Result<T, StoreError> {
    serde_json::from_value(value).map_err(|source| StoreError::Decode {
        kind: K::NAME,
        source,
    })
}

fn encode<K: ResourceKind, T: Serialize + ?Sized>(body: &T) -> Result<Value, StoreError> {
    serde_json::to_value(body).map_err(|source| StoreError::Encode {
        kind: K::NAME,
        source,
    })
}

/// Re-reads single entities of kind `K` for the poll loop.
pub struct ResourceClient<K> {
    transport: Arc<dyn Transport>,
    _kind: PhantomData<fn() -> K>,
}

impl<K: ResourceKind> ResourceClient<K> {
    #[must_use]
    pub fn new(transport: Arc<dyn Transport>) -> Self {
        Self {
            transport,
            _kind: PhantomData,
        }
    }
}

impl<K: ResourceKind> Refetch<K::Entity> for ResourceClient<K> {
    fn refetch<'a>(&'a self, entity: &'a K::Entity) -> FetchFut<'a, K::Entity> {
        let locator = K::member_locator(entity);
        let scope = scope_of(entity);
        Box::pin(async move {
            let value = self.transport.get(&locator).await?;
            let mut fresh: K::Entity =
                serde_json::from_value(value).map_err(|source| TransportError::Decode {
                    locator: locator.to_string(),
                    source,
                })?;
            K::adopt(&mut fresh, scope);
            Ok(fresh)
        })
    }
}

struct Loading<'a>(&'a AtomicUsize);

impl<'a> Loading<'a> {
    fn start(counter: &'a AtomicUsize) -> Self {
        counter.fetch_add(1, Ordering::SeqCst);
        Self(counter)
    }
}

impl Drop for Loading<'_> {
    fn drop(&mut self) {
        self.0.fetch_sub(1, Ordering::SeqCst);
    }
}

/// Cache, views and poll loop for one resource kind, plus the backend
/// operations that feed them.
///
/// Direct operations surface transport failures to the caller and never
/// retry. Failures of background re-fetches stay inside the poll loop.
pub struct ResourceStore<K: ResourceKind> {
    transport: Arc<dyn Transport>,
    cache: Arc<CollectionCache<K::Entity>>,
    index: ScopeIndex<K::Entity>,
    poller: Arc<PollReconciler<K::Entity>>,
    loading: AtomicUsize,
}

impl<K: ResourceKind> ResourceStore<K> {
    pub fn new(transport: Arc<dyn Transport>, timer: Arc<dyn Timer>, interval: Duration) -> Self {
        let cache = Arc::new(CollectionCache::new());
        let fetcher: Arc<dyn Refetch<K::Entity>> =
            Arc::new(ResourceClient::<K>::new(Arc::clone(&transport)));
        let poller = PollReconciler::new(K::NAME, Arc::clone(&cache), fetcher, timer, interval);
        Self {
            transport,
            index: ScopeIndex::new(Arc::clone(&cache)),
            cache,
            poller,
            loading: AtomicUsize::new(0),
        }
    }

    /// GET the scope's collection and merge it into the cache.
    pub async fn fetch_scope(&self, scope: Scope) -> Result<Vec<EntityRef<K::Entity>>, StoreError> {
        let _loading = Loading::start(&self.loading);
        let locator = K::collection_locator(scope);
        let value = self
            .transport
            .get(&locator)
            .await
            .map_err(StoreError::transport::<K>)?;
        let mut entities: Vec<K::Entity> = decode::<K, _>(value)?;
        for entity in &mut entities {
            K::adopt(entity, scope);
        }
        tracing::debug!(kind = K::NAME, ?scope, count = entities.len(), "Fetched scope");
        self.cache.replace_scope(entities, scope);
        Ok(self.cache.filter_by_scope(scope))
    }

    /// Refresh one cached entity. `Ok(None)` means the backend no longer has
    /// it and it was dropped from the cache.
    pub async fn fetch_one(
        &self,
        entity: &EntityRef<K::Entity>,
    ) -> Result<Option<EntityRef<K::Entity>>, StoreError> {
        let (id, locator) = self.target_of(entity);
        let scope = scope_of(&*entity.read());
        match self.transport.get(&locator).await {
            Ok(value) => {
                let mut fresh: K::Entity = decode::<K, _>(value)?;
                K::adopt(&mut fresh, scope);
                Ok(self.cache.upsert_in_place(fresh))
            }
            Err(err) if err.is_not_found() => {
                self.cache.remove_by_id(&id);
                Ok(None)
            }
            Err(err) => Err(StoreError::transport::<K>(err)),
        }
    }

    fn target_of(&self, entity: &EntityRef<K::Entity>) -> (EntityId, Locator) {
        let entity = entity.read();
        (entity.id().clone(), K::member_locator(&entity))
    }

    /// True while at least one `fetch_scope` is in flight.
    #[must_use]
    pub fn is_loading(&self) -> bool {
        self.loading.load(Ordering::SeqCst) > 0
    }

    /// Forget everything: empty the cache and stop polling.
    pub fn reset(&self) {
        self.poller.shutdown();
        self.cache.clear();
    }

    #[must_use]
    pub fn by_id(&self, id: &EntityId) -> Option<EntityRef<K::Entity>> {
        self.index.by_id(id)
    }

    #[must_use]
    pub fn for_scope(&self, scope: Scope) -> Vec<EntityRef<K::Entity>> {
        self.index.for_scope(scope)
    }

    #[must_use]
    pub fn active_view(&self, selection: &Selection) -> Vec<EntityRef<K::Entity>> {
        self.index.active_view(selection)
    }

    #[must_use]
    pub fn is_polling(&self, id: &EntityId) -> bool {
        self.poller.is_polling(id)
    }

    #[must_use]
    pub fn index(&self) -> &ScopeIndex<K::Entity> {
        &self.index
    }

    #[must_use]
    pub fn cache(&self) -> &Arc<CollectionCache<K::Entity>> {
        &self.cache
    }

    #[must_use]
    pub fn poller(&self) -> &Arc<PollReconciler<K::Entity>> {
        &self.poller
    }
}

impl<K: MutableKind> ResourceStore<K> {
    /// POST a new entity, cache it and poll it if its kind settles
    /// asynchronously.
    pub async fn create(
        &self,
        scope: Scope,
        payload: &K::Create,
    ) -> Result<EntityRef<K::Entity>, StoreError> {
        let body = encode::<K, _>(payload)?;
        let value = self
            .transport
            .post(&K::collection_locator(scope), body)
            .await
            .map_err(StoreError::transport::<K>)?;
        let mut entity: K::Entity = decode::<K, _>(value)?;
        K::adopt(&mut entity, scope);
        let id = entity.id().clone();
        let handle = self.cache.insert(entity);
        tracing::info!(kind = K::NAME, entity = %id, "Created");

        if let Some(terminal) = K::post_create_terminal() {
            self.poller.register_target(id, terminal);
        }
        Ok(handle)
    }

    /// Request a status change and poll until it (or a known alternative)
    /// is observed.
    pub async fn transition(
        &self,
        entity: &EntityRef<K::Entity>,
        desired: Status<K>,
    ) -> Result<(), StoreError>
    where
        Status<K>: Serialize,
    {
        let (id, locator) = self.target_of(entity);
        let status = encode::<K, _>(&desired)?;
        let body = json!({ "status": status });
        self.transport
            .patch(&locator, body)
            .await
            .map_err(StoreError::transport::<K>)?;
        tracing::info!(kind = K::NAME, entity = %id, ?desired, "Transition requested");
        self.poller.register_target(id, K::transition_terminal(desired));
        Ok(())
    }

    pub async fn delete(&self, entity: &EntityRef<K::Entity>) -> Result<(), StoreError> {
        let (id, locator) = self.target_of(entity);
        self.transport
            .delete(&locator)
            .await
            .map_err(StoreError::transport::<K>)?;
        tracing::info!(kind = K::NAME, entity = %id, "Delete requested");

        match K::DELETE_POLICY {
            DeletePolicy::AwaitDisappearance => {
                self.poller.register_target(id, TerminalStatuses::gone());
            }
            DeletePolicy::RemoveImmediately => {
                self.cache.remove_by_id(&id);
            }
        }
        Ok(())
    }

    /// PATCH arbitrary fields. When `terminal` is given the entity is polled
    /// until one of those statuses is observed.
    pub async fn patch(
        &self,
        entity: &EntityRef<K::Entity>,
        body: Value,
        terminal: Option<TerminalStatuses<Status<K>>>,
    ) -> Result<Value, StoreError> {
        let (id, locator) = self.target_of(entity);
        let response = self
            .transport
            .patch(&locator, body)
            .await
            .map_err(StoreError::transport::<K>)?;
        if let Some(terminal) = terminal {
            self.poller.register_target(id, terminal);
        }
        Ok(response)
    }
}

impl ResourceStore<Volumes> {
    /// Attach to a server and poll until the volume is in use.
    pub async fn attach(
        &self,
        volume: &EntityRef<hangar_types::Volume>,
        server: &EntityId,
    ) -> Result<(), StoreError> {
        let body = json!({ "attachments": [{ "serverId": server }] });
        let terminal = TerminalStatuses::any_of([hangar_types::VolumeStatus::InUse]);
        self.patch(volume, body, Some(terminal)).await?;
        Ok(())
    }

    /// Detach from every server and poll until the volume is available.
    pub async fn detach(&self, volume: &EntityRef<hangar_types::Volume>) -> Result<(), StoreError> {
        let body = json!({ "attachments": [] });
        let terminal = TerminalStatuses::any_of([hangar_types::VolumeStatus::Available]);
        self.patch(volume, body, Some(terminal)).await?;
        Ok(())
    }
}

impl ResourceStore<Instances> {
    /// Extend the instance lease via the renewal link the backend provided.
    pub async fn renew_lease(&self, instance: &EntityRef<Instance>) -> Result<LeaseRenewal, StoreError> {
        let (id, link) = {
            let instance = instance.read();
            (instance.id.clone(), instance.lease_renewal_url.clone())
        };
        let Some(link) = link else {
            return Err(StoreError::MissingLink {
                kind: Instances::NAME,
                entity: id,
                link: "lease renewal URL",
            });
        };
        let locator = Locator::parse(&link).map_err(StoreError::transport::<Instances>)?;

        let value = self
            .transport
            .post(&locator, Value::Null)
            .await
            .map_err(StoreError::transport::<Instances>)?;
        let renewal: LeaseRenewal = decode::<Instances, _>(value)?;

        self.cache.modify(&id, |instance| {
            instance.lease_expiry = Some(renewal.expiry.clone());
            instance.lease_renewal_url = renewal.renewal_url.clone();
        });
        tracing::info!(kind = Instances::NAME, entity = %id, expiry = %renewal.expiry, "Lease renewed");
        Ok(renewal)
    }

    /// Make a team member responsible for the instance lease.
    pub async fn assign_team_member(
        &self,
        instance: &EntityRef<Instance>,
        member: u64,
    ) -> Result<(), StoreError> {
        let id = instance.id();
        self.patch(instance, json!({ "leaseAssignedTeammember": member }), None)
            .await?;
        self.cache.modify(&id, |instance| {
            instance.lease_assigned_teammember = Some(member);
        });
        Ok(())
    }

    /// The active view without shelved instances.
    #[must_use]
    pub fn live_view(&self, selection: &Selection) -> Vec<EntityRef<Instance>> {
        self.index
            .active_view_where(selection, |instance| !instance.is_shelved())
    }
}
