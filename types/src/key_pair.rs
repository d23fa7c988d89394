use std::convert::Infallible;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::{Entity, EntityId, TeamId, TenantId};

/// An SSH key pair registered with a tenant. Key pairs have no lifecycle
/// status, so they are never polled.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct KeyPair {
    pub id: EntityId,
    pub team: TeamId,
    pub tenant: TenantId,
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub fingerprint: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub public_key: Option<String>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl KeyPair {
    #[must_use]
    pub fn new(id: EntityId, team: TeamId, tenant: TenantId, name: impl Into<String>) -> Self {
        Self {
            id,
            team,
            tenant,
            name: name.into(),
            fingerprint: None,
            public_key: None,
            extra: Map::new(),
        }
    }
}

impl Entity for KeyPair {
    type Status = Infallible;

    fn id(&self) -> &EntityId {
        &self.id
    }

    fn team(&self) -> TeamId {
        self.team
    }

    fn tenant(&self) -> Option<TenantId> {
        Some(self.tenant)
    }

    fn status(&self) -> Option<&Infallible> {
        None
    }
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct NewKeyPair {
    pub tenant: TenantId,
    pub name: String,
    pub public_key: String,
}
