use serde::{Deserialize, Serialize};

use crate::{RegionId, TeamId, TenantId};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Region {
    pub id: RegionId,
    pub name: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub disabled: bool,
}

impl Region {
    /// Short label used in user-facing messages ("University of X" -> "X").
    #[must_use]
    pub fn short_name(&self) -> &str {
        let label = if self.description.is_empty() {
            &self.name
        } else {
            &self.description
        };
        label.strip_prefix("University of ").unwrap_or(label)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Tenant {
    pub id: TenantId,
    pub team: TeamId,
    pub region: Region,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Team {
    pub id: TeamId,
    pub name: String,
    #[serde(default)]
    pub tenants: Vec<Tenant>,
    #[serde(default)]
    pub default_region: Option<RegionId>,
}

impl Team {
    #[must_use]
    pub fn tenant(&self, id: TenantId) -> Option<&Tenant> {
        self.tenants.iter().find(|tenant| tenant.id == id)
    }

    /// Tenants whose region is not disabled; only these are ever fetched.
    pub fn enabled_tenants(&self) -> impl Iterator<Item = &Tenant> {
        self.tenants.iter().filter(|tenant| !tenant.region.disabled)
    }

    #[must_use]
    pub fn default_tenant(&self) -> Option<&Tenant> {
        let region = self.default_region?;
        self.tenants.iter().find(|tenant| tenant.region.id == region)
    }
}
