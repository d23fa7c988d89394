//! Team / tenant partitioning of cached collections.

use crate::{Entity, TeamId, TenantId};

/// A `(team, tenant?)` filter used to partition fetches and merges.
///
/// Without a tenant the scope covers every entity of the team. With a tenant
/// it covers exactly the entities of that tenant.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Scope {
    team: TeamId,
    tenant: Option<TenantId>,
}

impl Scope {
    #[must_use]
    pub const fn team(team: TeamId) -> Self {
        Self { team, tenant: None }
    }

    #[must_use]
    pub const fn tenant(team: TeamId, tenant: TenantId) -> Self {
        Self {
            team,
            tenant: Some(tenant),
        }
    }

    #[must_use]
    pub const fn team_id(&self) -> TeamId {
        self.team
    }

    #[must_use]
    pub const fn tenant_id(&self) -> Option<TenantId> {
        self.tenant
    }

    /// Whether `entity` belongs to this scope.
    #[must_use]
    pub fn contains<E: Entity + ?Sized>(&self, entity: &E) -> bool {
        match self.tenant {
            Some(tenant) => entity.tenant() == Some(tenant),
            None => entity.team() == self.team,
        }
    }
}

/// The two ambient selectors that drive the dashboard views.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Selection {
    pub active_team: Option<TeamId>,
    pub filter_tenant: Option<TenantId>,
}

impl Selection {
    #[must_use]
    pub const fn for_team(team: TeamId) -> Self {
        Self {
            active_team: Some(team),
            filter_tenant: None,
        }
    }

    #[must_use]
    pub const fn with_filter_tenant(mut self, tenant: Option<TenantId>) -> Self {
        self.filter_tenant = tenant;
        self
    }

    /// The scope of "all visible" entities: the filter tenant when set,
    /// otherwise the whole active team.
    #[must_use]
    pub fn visible_scope(&self) -> Option<Scope> {
        let team = self.active_team?;
        Some(match self.filter_tenant {
            Some(tenant) => Scope::tenant(team, tenant),
            None => Scope::team(team),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{EntityId, KeyPair};

    fn key_pair(id: u64, team: u64, tenant: u64) -> KeyPair {
        KeyPair::new(
            EntityId::from(id),
            TeamId::new(team),
            TenantId::new(tenant),
            "deploy",
        )
    }

    #[test]
    fn team_scope_matches_on_team() {
        let scope = Scope::team(TeamId::new(10));
        assert!(scope.contains(&key_pair(1, 10, 100)));
        assert!(!scope.contains(&key_pair(2, 20, 100)));
    }

    #[test]
    fn tenant_scope_matches_on_tenant_only() {
        let scope = Scope::tenant(TeamId::new(10), TenantId::new(100));
        assert!(scope.contains(&key_pair(1, 10, 100)));
        assert!(!scope.contains(&key_pair(2, 10, 101)));
    }

    #[test]
    fn visible_scope_prefers_filter_tenant() {
        assert_eq!(Selection::default().visible_scope(), None);

        let selection = Selection::for_team(TeamId::new(1));
        assert_eq!(selection.visible_scope(), Some(Scope::team(TeamId::new(1))));

        let filtered = selection.with_filter_tenant(Some(TenantId::new(4)));
        assert_eq!(
            filtered.visible_scope(),
            Some(Scope::tenant(TeamId::new(1), TenantId::new(4)))
        );
    }
}
