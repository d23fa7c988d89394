//! Tenant catalogs: the flavors, images and volume types a tenant offers.
//!
//! The backend lists catalog entries per tenant without saying which tenant
//! they belong to, and the same backend id can appear in several regions.
//! Each entry is therefore placed into its listing scope after decoding
//! ([`Flavor::assign`] and friends) and cached under a scope-qualified key.

use std::convert::Infallible;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::{Entity, EntityId, Scope, TeamId, TenantId};

/// Cache key of a catalog entry listed under `scope`.
#[must_use]
pub fn catalog_key(scope: Scope, id: &EntityId) -> EntityId {
    match scope.tenant_id() {
        Some(tenant) => EntityId::new(format!("{tenant}/{id}")),
        None => EntityId::new(format!("team-{}/{id}", scope.team_id())),
    }
}

/// A compute size.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Flavor {
    #[serde(skip)]
    key: EntityId,
    pub id: EntityId,
    #[serde(default)]
    pub team: TeamId,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tenant: Option<TenantId>,
    pub name: String,
    #[serde(default)]
    pub vcpus: u32,
    /// MiB.
    #[serde(default)]
    pub ram: u64,
    /// GiB.
    #[serde(default)]
    pub disk: u64,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl Flavor {
    #[must_use]
    pub fn new(id: EntityId, name: impl Into<String>, vcpus: u32, ram: u64) -> Self {
        Self {
            key: id.clone(),
            id,
            team: TeamId::default(),
            tenant: None,
            name: name.into(),
            vcpus,
            ram,
            disk: 0,
            extra: Map::new(),
        }
    }

    /// RAM in GiB.
    #[must_use]
    pub fn ram_gb(&self) -> f64 {
        self.ram as f64 / 1024.0
    }
}

/// A bootable image.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Image {
    #[serde(skip)]
    key: EntityId,
    pub id: EntityId,
    #[serde(default)]
    pub team: TeamId,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tenant: Option<TenantId>,
    pub name: String,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl Image {
    #[must_use]
    pub fn new(id: EntityId, name: impl Into<String>) -> Self {
        Self {
            key: id.clone(),
            id,
            team: TeamId::default(),
            tenant: None,
            name: name.into(),
            extra: Map::new(),
        }
    }
}

/// A block storage backend volumes can be created on.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VolumeType {
    #[serde(skip)]
    key: EntityId,
    pub id: EntityId,
    #[serde(default)]
    pub team: TeamId,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tenant: Option<TenantId>,
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl VolumeType {
    #[must_use]
    pub fn new(id: EntityId, name: impl Into<String>) -> Self {
        Self {
            key: id.clone(),
            id,
            team: TeamId::default(),
            tenant: None,
            name: name.into(),
            description: None,
            extra: Map::new(),
        }
    }
}

macro_rules! catalog_entity {
    ($($ty:ident),+) => {$(
        impl $ty {
            /// Place the entry into the scope it was listed under.
            pub fn assign(&mut self, scope: Scope) {
                self.team = scope.team_id();
                self.tenant = scope.tenant_id();
                self.key = catalog_key(scope, &self.id);
            }
        }

        impl Entity for $ty {
            type Status = Infallible;

            fn id(&self) -> &EntityId {
                &self.key
            }

            fn team(&self) -> TeamId {
                self.team
            }

            fn tenant(&self) -> Option<TenantId> {
                self.tenant
            }

            fn status(&self) -> Option<&Infallible> {
                None
            }
        }
    )+};
}

catalog_entity!(Flavor, Image, VolumeType);
