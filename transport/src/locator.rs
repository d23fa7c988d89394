use std::fmt;

use hangar_types::{EntityId, Scope};
use url::Url;

use crate::TransportError;

/// Where a resource lives on the backend.
///
/// Most locators are paths relative to the API base URL. The backend also
/// hands out absolute links (lease renewal URLs), which are kept verbatim.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Locator {
    Relative(String),
    Absolute(Url),
}

impl Locator {
    #[must_use]
    pub fn relative(path: impl Into<String>) -> Self {
        let path = path.into();
        match path.strip_prefix('/') {
            Some(stripped) => Self::Relative(stripped.to_string()),
            None => Self::Relative(path),
        }
    }

    pub fn absolute(url: &str) -> Result<Self, TransportError> {
        Url::parse(url)
            .map(Self::Absolute)
            .map_err(|source| TransportError::InvalidLocator {
                locator: url.to_string(),
                reason: source.to_string(),
            })
    }

    /// Accepts either form, as found in backend payloads.
    pub fn parse(raw: &str) -> Result<Self, TransportError> {
        if raw.starts_with("http://") || raw.starts_with("https://") {
            Self::absolute(raw)
        } else {
            Ok(Self::relative(raw))
        }
    }

    /// Append one path segment, keeping the backend's trailing-slash style.
    #[must_use]
    pub fn join(&self, segment: &str) -> Self {
        let segment = segment.trim_matches('/');
        match self {
            Self::Relative(path) => {
                let mut joined = path.clone();
                if !joined.is_empty() && !joined.ends_with('/') {
                    joined.push('/');
                }
                joined.push_str(segment);
                joined.push('/');
                Self::Relative(joined)
            }
            Self::Absolute(url) => {
                let mut joined = url.clone();
                let mut path = joined.path().to_string();
                if !path.ends_with('/') {
                    path.push('/');
                }
                path.push_str(segment);
                path.push('/');
                joined.set_path(&path);
                Self::Absolute(joined)
            }
        }
    }

    pub fn resolve(&self, base: &Url) -> Result<Url, TransportError> {
        match self {
            Self::Absolute(url) => Ok(url.clone()),
            Self::Relative(path) => base
                .join(path)
                .map_err(|source| TransportError::InvalidLocator {
                    locator: path.clone(),
                    reason: source.to_string(),
                }),
        }
    }
}

impl fmt::Display for Locator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Relative(path) => f.write_str(path),
            Self::Absolute(url) => write!(f, "{url}"),
        }
    }
}

/// Backend route layout.
///
/// Tenant-scoped resources live under
/// `api/teams/{team}/tenants/{tenant}/{resource}/`. Without a tenant the
/// team-level route `api/teams/{team}/{resource}/` is used.
#[derive(Debug, Clone, Copy)]
pub struct ApiRoute;

impl ApiRoute {
    const API_BASE: &'static str = "api/";

    #[must_use]
    pub fn teams() -> Locator {
        Locator::relative(format!("{}teams/", Self::API_BASE))
    }

    #[must_use]
    pub fn team(scope: Scope) -> Locator {
        Self::teams().join(&scope.team_id().to_string())
    }

    #[must_use]
    pub fn collection(scope: Scope, resource: &str) -> Locator {
        let team = Self::team(scope);
        match scope.tenant_id() {
            Some(tenant) => team
                .join("tenants")
                .join(&tenant.to_string())
                .join(resource),
            None => team.join(resource),
        }
    }

    #[must_use]
    pub fn member(scope: Scope, resource: &str, id: &EntityId) -> Locator {
        Self::collection(scope, resource).join(id.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use hangar_types::{TeamId, TenantId};

    #[test]
    fn tenant_routes() {
        let scope = Scope::tenant(TeamId::new(3), TenantId::new(7));
        assert_eq!(
            ApiRoute::collection(scope, "volumes").to_string(),
            "api/teams/3/tenants/7/volumes/"
        );
        assert_eq!(
            ApiRoute::member(scope, "instances", &EntityId::new("ab-12")).to_string(),
            "api/teams/3/tenants/7/instances/ab-12/"
        );
    }

    #[test]
    fn team_level_route_without_tenant() {
        let scope = Scope::team(TeamId::new(3));
        assert_eq!(
            ApiRoute::collection(scope, "instances").to_string(),
            "api/teams/3/instances/"
        );
        assert_eq!(ApiRoute::teams().to_string(), "api/teams/");
    }

    #[test]
    fn relative_resolves_below_base() {
        let base = Url::parse("https://dash.example.org/bryn/").unwrap();
        let url = Locator::relative("/api/teams/").resolve(&base).unwrap();
        assert_eq!(url.as_str(), "https://dash.example.org/bryn/api/teams/");
    }

    #[test]
    fn parse_keeps_absolute_links() {
        let locator = Locator::parse("https://lease.example.org/renew/9").unwrap();
        let base = Url::parse("https://dash.example.org/").unwrap();
        assert_eq!(
            locator.resolve(&base).unwrap().as_str(),
            "https://lease.example.org/renew/9"
        );
        assert!(matches!(
            Locator::parse("https://"),
            Err(TransportError::InvalidLocator { .. })
        ));
    }

    #[test]
    fn join_on_absolute_appends_segment() {
        let locator = Locator::absolute("https://x.example.org/api").unwrap();
        assert_eq!(
            locator.join("teams").to_string(),
            "https://x.example.org/api/teams/"
        );
    }
}
