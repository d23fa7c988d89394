//! Composition root: one store per resource kind plus the team selection
//! that drives the views.

use std::collections::HashSet;
use std::sync::{Arc, PoisonError, RwLock};
use std::time::Duration;

use futures_util::future::{join, join3, join_all};
use hangar_transport::{ApiRoute, Transport};
use hangar_types::{EntityId, Scope, Selection, Team, TeamId, Tenant, TenantId, catalog_key};
use thiserror::Error;

use crate::kind::{
    Flavors, Images, Instances, KeyPairs, ResourceKind, VolumeTypes, Volumes, scope_of,
};
use crate::resource::{ResourceStore, StoreError};
use crate::timer::Timer;

const TEAMS: &str = "teams";

/// A tenant-wide refresh failed. The message names the tenant's region so
/// it can be shown as is.
#[derive(Debug, Error)]
#[error("Error fetching data from {region} tenant: {detail}")]
pub struct TenantFetchError {
    pub tenant: TenantId,
    pub region: String,
    pub detail: String,
    #[source]
    pub source: StoreError,
}

/// Resources held by the active team's live (non-shelved) instances.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct TeamTotals {
    pub instances: usize,
    pub vcpus: u64,
    pub ram_gb: f64,
}

pub struct Dashboard {
    transport: Arc<dyn Transport>,
    teams: RwLock<Vec<Team>>,
    selection: RwLock<Selection>,
    /// Teams whose tenant catalogs are loaded.
    initialized: RwLock<HashSet<TeamId>>,
    instances: ResourceStore<Instances>,
    volumes: ResourceStore<Volumes>,
    key_pairs: ResourceStore<KeyPairs>,
    flavors: ResourceStore<Flavors>,
    images: ResourceStore<Images>,
    volume_types: ResourceStore<VolumeTypes>,
}

impl Dashboard {
    pub fn new(transport: Arc<dyn Transport>, timer: Arc<dyn Timer>, interval: Duration) -> Self {
        Self {
            instances: ResourceStore::new(Arc::clone(&transport), Arc::clone(&timer), interval),
            volumes: ResourceStore::new(Arc::clone(&transport), Arc::clone(&timer), interval),
            key_pairs: ResourceStore::new(Arc::clone(&transport), Arc::clone(&timer), interval),
            flavors: ResourceStore::new(Arc::clone(&transport), Arc::clone(&timer), interval),
            images: ResourceStore::new(Arc::clone(&transport), Arc::clone(&timer), interval),
            volume_types: ResourceStore::new(Arc::clone(&transport), timer, interval),
            transport,
            teams: RwLock::new(Vec::new()),
            selection: RwLock::new(Selection::default()),
            initialized: RwLock::new(HashSet::new()),
        }
    }

    #[must_use]
    pub fn instances(&self) -> &ResourceStore<Instances> {
        &self.instances
    }

    #[must_use]
    pub fn volumes(&self) -> &ResourceStore<Volumes> {
        &self.volumes
    }

    #[must_use]
    pub fn key_pairs(&self) -> &ResourceStore<KeyPairs> {
        &self.key_pairs
    }

    #[must_use]
    pub fn flavors(&self) -> &ResourceStore<Flavors> {
        &self.flavors
    }

    #[must_use]
    pub fn images(&self) -> &ResourceStore<Images> {
        &self.images
    }

    #[must_use]
    pub fn volume_types(&self) -> &ResourceStore<VolumeTypes> {
        &self.volume_types
    }

    /// Replaces the team list. Every team starts uninitialized again.
    pub async fn fetch_teams(&self) -> Result<Vec<Team>, StoreError> {
        let value = self
            .transport
            .get(&ApiRoute::teams())
            .await
            .map_err(|source| StoreError::Transport { kind: TEAMS, source })?;
        let teams: Vec<Team> = serde_json::from_value(value)
            .map_err(|source| StoreError::Decode { kind: TEAMS, source })?;
        tracing::debug!(count = teams.len(), "Fetched teams");
        *self.teams.write().unwrap_or_else(PoisonError::into_inner) = teams.clone();
        self.initialized
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .clear();
        Ok(teams)
    }

    #[must_use]
    pub fn teams(&self) -> Vec<Team> {
        self.teams
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    #[must_use]
    pub fn team(&self, id: TeamId) -> Option<Team> {
        self.teams
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .iter()
            .find(|team| team.id == id)
            .cloned()
    }

    #[must_use]
    pub fn selection(&self) -> Selection {
        *self.selection.read().unwrap_or_else(PoisonError::into_inner)
    }

    /// Switching team always drops the tenant filter.
    pub fn set_active_team(&self, team: TeamId) {
        *self.selection.write().unwrap_or_else(PoisonError::into_inner) = Selection::for_team(team);
    }

    pub fn set_filter_tenant(&self, tenant: Option<TenantId>) {
        let mut selection = self.selection.write().unwrap_or_else(PoisonError::into_inner);
        *selection = selection.with_filter_tenant(tenant);
    }

    #[must_use]
    pub fn active_team(&self) -> Option<Team> {
        self.team(self.selection().active_team?)
    }

    /// Whether a full refresh of `team` has succeeded since the team list
    /// was last fetched. Until then tenant catalogs are fetched with every
    /// tenant refresh.
    #[must_use]
    pub fn is_initialized(&self, team: TeamId) -> bool {
        self.initialized
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .contains(&team)
    }

    /// Refresh every resource kind of one tenant concurrently.
    ///
    /// All kinds are applied even when one of them fails; the first failure
    /// is reported.
    pub async fn fetch_tenant(&self, tenant: &Tenant) -> Result<(), TenantFetchError> {
        let scope = Scope::tenant(tenant.team, tenant.id);
        let catalogs = !self.is_initialized(tenant.team);

        let ((instances, volumes, key_pairs), (flavors, images, volume_types)) = join(
            join3(
                refresh(&self.instances, scope, true),
                refresh(&self.volumes, scope, true),
                refresh(&self.key_pairs, scope, true),
            ),
            join3(
                refresh(&self.flavors, scope, catalogs),
                refresh(&self.images, scope, catalogs),
                refresh(&self.volume_types, scope, catalogs),
            ),
        )
        .await;

        let failure = [instances, volumes, key_pairs, flavors, images, volume_types]
            .into_iter()
            .find_map(Result::err);
        match failure {
            None => Ok(()),
            Some(source) => {
                let err = TenantFetchError {
                    tenant: tenant.id,
                    region: tenant.region.short_name().to_string(),
                    detail: source.detail(),
                    source,
                };
                tracing::warn!(tenant = %tenant.id, error = %err, "Tenant fetch failed");
                Err(err)
            }
        }
    }

    /// Refresh every enabled tenant of the active team. All tenants are
    /// attempted; one outcome is returned per tenant. The team counts as
    /// initialized once every tenant succeeded.
    pub async fn fetch_all(&self) -> Vec<(TenantId, Result<(), TenantFetchError>)> {
        let Some(team) = self.active_team() else {
            return Vec::new();
        };
        let tenants: Vec<&Tenant> = team.enabled_tenants().collect();
        if tenants.is_empty() {
            tracing::debug!(team = %team.id, "No enabled tenants to fetch");
            return Vec::new();
        }

        let outcomes = join_all(tenants.into_iter().map(|tenant| async move {
            (tenant.id, self.fetch_tenant(tenant).await)
        }))
        .await;

        if outcomes.iter().all(|(_, outcome)| outcome.is_ok()) {
            self.initialized
                .write()
                .unwrap_or_else(PoisonError::into_inner)
                .insert(team.id);
        }
        outcomes
    }

    /// Count the active team's live instances and add up their flavors.
    /// Instances whose flavor is not in the catalog are counted but add no
    /// resources.
    #[must_use]
    pub fn team_totals(&self) -> TeamTotals {
        let Some(team) = self.selection().active_team else {
            return TeamTotals::default();
        };
        let live = self.instances.live_view(&Selection::for_team(team));

        let mut totals = TeamTotals {
            instances: live.len(),
            ..TeamTotals::default()
        };
        for instance in &live {
            let key = {
                let instance = instance.read();
                instance
                    .flavor
                    .as_deref()
                    .map(|flavor| catalog_key(scope_of(&*instance), &EntityId::new(flavor)))
            };
            if let Some(flavor) = key.and_then(|key| self.flavors.by_id(&key)) {
                let flavor = flavor.read();
                totals.vcpus += u64::from(flavor.vcpus);
                totals.ram_gb += flavor.ram_gb();
            }
        }
        totals
    }

    pub fn reset(&self) {
        self.instances.reset();
        self.volumes.reset();
        self.key_pairs.reset();
        self.flavors.reset();
        self.images.reset();
        self.volume_types.reset();
        self.initialized
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .clear();
    }
}

async fn refresh<K: ResourceKind>(
    store: &ResourceStore<K>,
    scope: Scope,
    enabled: bool,
) -> Result<(), StoreError> {
    if enabled {
        store.fetch_scope(scope).await?;
    }
    Ok(())
}
