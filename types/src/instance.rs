use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::{Entity, EntityId, TeamId, TenantId};

/// Nova server status as reported by the backend.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum InstanceStatus {
    Active,
    Build,
    Rebuild,
    Reboot,
    HardReboot,
    Shutoff,
    Suspended,
    Paused,
    Rescue,
    Resize,
    VerifyResize,
    Migrating,
    Shelved,
    ShelvedOffloaded,
    Deleted,
    Error,
    #[serde(other)]
    Unknown,
}

impl InstanceStatus {
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Active => "ACTIVE",
            Self::Build => "BUILD",
            Self::Rebuild => "REBUILD",
            Self::Reboot => "REBOOT",
            Self::HardReboot => "HARD_REBOOT",
            Self::Shutoff => "SHUTOFF",
            Self::Suspended => "SUSPENDED",
            Self::Paused => "PAUSED",
            Self::Rescue => "RESCUE",
            Self::Resize => "RESIZE",
            Self::VerifyResize => "VERIFY_RESIZE",
            Self::Migrating => "MIGRATING",
            Self::Shelved => "SHELVED",
            Self::ShelvedOffloaded => "SHELVED_OFFLOADED",
            Self::Deleted => "DELETED",
            Self::Error => "ERROR",
            Self::Unknown => "UNKNOWN",
        }
    }

    /// Parse a status name (case-insensitive). Unrecognised names map to `Unknown`.
    #[must_use]
    pub fn parse(raw: &str) -> Self {
        serde_json::from_value(Value::String(raw.trim().to_ascii_uppercase()))
            .unwrap_or(Self::Unknown)
    }

    /// Shelved instances hold no compute resources and are excluded from
    /// "live" views and team totals.
    #[must_use]
    pub const fn is_shelved(self) -> bool {
        matches!(self, Self::Shelved | Self::ShelvedOffloaded)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Instance {
    pub id: EntityId,
    pub team: TeamId,
    pub tenant: TenantId,
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub flavor: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub image: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub keypair: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub status: Option<InstanceStatus>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ip: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub created: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub lease_expiry: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub lease_renewal_url: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub lease_assigned_teammember: Option<u64>,
    /// Backend fields the store does not interpret.
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl Instance {
    #[must_use]
    pub fn new(
        id: EntityId,
        team: TeamId,
        tenant: TenantId,
        name: impl Into<String>,
        status: InstanceStatus,
    ) -> Self {
        Self {
            id,
            team,
            tenant,
            name: name.into(),
            flavor: None,
            image: None,
            keypair: None,
            status: Some(status),
            ip: None,
            created: None,
            lease_expiry: None,
            lease_renewal_url: None,
            lease_assigned_teammember: None,
            extra: Map::new(),
        }
    }

    #[must_use]
    pub fn is_shelved(&self) -> bool {
        self.status.is_some_and(InstanceStatus::is_shelved)
    }
}

impl Entity for Instance {
    type Status = InstanceStatus;

    fn id(&self) -> &EntityId {
        &self.id
    }

    fn team(&self) -> TeamId {
        self.team
    }

    fn tenant(&self) -> Option<TenantId> {
        Some(self.tenant)
    }

    fn status(&self) -> Option<&InstanceStatus> {
        self.status.as_ref()
    }
}

/// Body of a `POST` creating an instance.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct NewInstance {
    pub tenant: TenantId,
    pub name: String,
    pub flavor: String,
    pub image: String,
    pub keypair: String,
}

/// Response of a lease renewal request.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LeaseRenewal {
    pub expiry: String,
    #[serde(default)]
    pub renewal_url: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn decodes_backend_payload_and_keeps_unknown_fields() {
        let payload = json!({
            "id": "0b7c6d3e-1111-2222-3333-444455556666",
            "team": 3,
            "tenant": 12,
            "name": "worker-1",
            "flavor": "f1",
            "status": "SHELVED_OFFLOADED",
            "ip": null,
            "leaseExpiry": "2026-11-01T00:00:00Z",
            "securityGroups": ["default"]
        });

        let instance: Instance = serde_json::from_value(payload).unwrap();
        assert_eq!(instance.status, Some(InstanceStatus::ShelvedOffloaded));
        assert!(instance.is_shelved());
        assert_eq!(instance.lease_expiry.as_deref(), Some("2026-11-01T00:00:00Z"));
        assert_eq!(instance.extra["securityGroups"], json!(["default"]));

        let round = serde_json::to_value(&instance).unwrap();
        assert_eq!(round["securityGroups"], json!(["default"]));
        assert_eq!(round["leaseExpiry"], json!("2026-11-01T00:00:00Z"));
    }

    #[test]
    fn unrecognised_status_is_unknown() {
        let instance: Instance = serde_json::from_value(json!({
            "id": "a", "team": 1, "tenant": 2, "name": "n", "status": "SOFT_DELETED"
        }))
        .unwrap();
        assert_eq!(instance.status, Some(InstanceStatus::Unknown));
    }

    #[test]
    fn parse_is_case_insensitive() {
        assert_eq!(InstanceStatus::parse("shelved"), InstanceStatus::Shelved);
        assert_eq!(InstanceStatus::parse(" ACTIVE "), InstanceStatus::Active);
        assert_eq!(InstanceStatus::parse("bogus"), InstanceStatus::Unknown);
        assert_eq!(InstanceStatus::HardReboot.as_str(), "HARD_REBOOT");
    }
}
