use std::fmt::Debug;

use crate::{EntityId, TeamId, TenantId};

/// A cached representation of one remote cloud resource.
///
/// The store only inspects the identifier, the owning team and tenant, and the
/// status. Everything else is passed through opaquely.
pub trait Entity: Clone + Debug + Send + Sync + 'static {
    /// Kind-specific status domain.
    type Status: Clone + Debug + PartialEq + Send + Sync + 'static;

    fn id(&self) -> &EntityId;
    fn team(&self) -> TeamId;
    fn tenant(&self) -> Option<TenantId>;
    /// `None` for kinds without a lifecycle status.
    fn status(&self) -> Option<&Self::Status>;
}

/// The statuses that end polling for a target.
///
/// An empty set means the entity is expected to disappear (e.g. after a
/// delete); only a not-found response retires such a target.
#[derive(Debug, Clone, PartialEq)]
pub struct TerminalStatuses<S>(Vec<S>);

impl<S: PartialEq> TerminalStatuses<S> {
    /// Await disappearance.
    #[must_use]
    pub const fn gone() -> Self {
        Self(Vec::new())
    }

    #[must_use]
    pub fn any_of(statuses: impl IntoIterator<Item = S>) -> Self {
        let mut set = Vec::new();
        for status in statuses {
            if !set.contains(&status) {
                set.push(status);
            }
        }
        Self(set)
    }

    #[must_use]
    pub fn with(mut self, status: S) -> Self {
        if !self.0.contains(&status) {
            self.0.push(status);
        }
        self
    }

    #[must_use]
    pub fn expects_disappearance(&self) -> bool {
        self.0.is_empty()
    }

    #[must_use]
    pub fn contains(&self, status: &S) -> bool {
        self.0.contains(status)
    }

    /// Whether an observed (optional) status satisfies this set.
    #[must_use]
    pub fn is_satisfied_by(&self, status: Option<&S>) -> bool {
        status.is_some_and(|status| self.contains(status))
    }

    #[must_use]
    pub fn as_slice(&self) -> &[S] {
        &self.0
    }
}

impl<S: PartialEq> FromIterator<S> for TerminalStatuses<S> {
    fn from_iter<I: IntoIterator<Item = S>>(iter: I) -> Self {
        Self::any_of(iter)
    }
}
