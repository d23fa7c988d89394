use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::{Entity, EntityId, TeamId, TenantId};

/// Cinder volume status as reported by the backend.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum VolumeStatus {
    Creating,
    Available,
    Reserved,
    Attaching,
    Detaching,
    InUse,
    Maintenance,
    Deleting,
    AwaitingTransfer,
    Error,
    #[serde(rename = "error_deleting")]
    ErrorDeleting,
    #[serde(rename = "backing-up")]
    BackingUp,
    #[serde(rename = "restoring-backup")]
    RestoringBackup,
    #[serde(rename = "error_backing-up")]
    ErrorBackingUp,
    #[serde(rename = "error_restoring")]
    ErrorRestoring,
    #[serde(rename = "error_extending")]
    ErrorExtending,
    Downloading,
    Uploading,
    Retyping,
    Extending,
    #[serde(other)]
    Unknown,
}

impl VolumeStatus {
    #[must_use]
    pub fn parse(raw: &str) -> Self {
        serde_json::from_value(Value::String(raw.trim().to_ascii_lowercase()))
            .unwrap_or(Self::Unknown)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VolumeAttachment {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub attachment_id: Option<String>,
    pub server_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub device: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub attached_at: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Volume {
    pub id: EntityId,
    pub team: TeamId,
    pub tenant: TenantId,
    #[serde(default)]
    pub name: Option<String>,
    pub size: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub status: Option<VolumeStatus>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub volume_type: Option<String>,
    #[serde(default)]
    pub bootable: bool,
    #[serde(default)]
    pub attachments: Vec<VolumeAttachment>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub created_at: Option<String>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl Volume {
    #[must_use]
    pub fn new(id: EntityId, team: TeamId, tenant: TenantId, size: u64, status: VolumeStatus) -> Self {
        Self {
            id,
            team,
            tenant,
            name: None,
            size,
            status: Some(status),
            volume_type: None,
            bootable: false,
            attachments: Vec::new(),
            created_at: None,
            extra: Map::new(),
        }
    }
}

impl Entity for Volume {
    type Status = VolumeStatus;

    fn id(&self) -> &EntityId {
        &self.id
    }

    fn team(&self) -> TeamId {
        self.team
    }

    fn tenant(&self) -> Option<TenantId> {
        Some(self.tenant)
    }

    fn status(&self) -> Option<&VolumeStatus> {
        self.status.as_ref()
    }
}

/// Body of a `POST` creating a volume.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct NewVolume {
    pub tenant: TenantId,
    pub volume_type: String,
    pub size: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
}
