//! Per-kind knowledge: routes, payloads and which statuses end polling.

use hangar_transport::{ApiRoute, Locator};
use hangar_types::{
    Entity, Flavor, Image, Instance, InstanceStatus, KeyPair, NewInstance, NewKeyPair, NewVolume,
    Scope, TerminalStatuses, Volume, VolumeStatus, VolumeType,
};
use serde::Serialize;
use serde::de::DeserializeOwned;

/// What happens to the cache after a successful `DELETE`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeletePolicy {
    /// Keep the entity and poll until the backend reports it gone.
    AwaitDisappearance,
    /// Drop it from the cache straight away; nothing to poll.
    RemoveImmediately,
}

/// Routes and decoding shared by every cached kind.
pub trait ResourceKind: Send + Sync + 'static {
    type Entity: Entity + Serialize + DeserializeOwned;

    /// Route segment and log label.
    const NAME: &'static str;

    fn collection_locator(scope: Scope) -> Locator {
        ApiRoute::collection(scope, Self::NAME)
    }

    fn member_locator(entity: &Self::Entity) -> Locator {
        ApiRoute::member(scope_of(entity), Self::NAME, entity.id())
    }

    /// Applied to every decoded entity before it reaches the cache, with the
    /// scope it was requested under.
    fn adopt(_entity: &mut Self::Entity, _scope: Scope) {}
}

/// Kinds the dashboard creates, transitions and deletes.
pub trait MutableKind: ResourceKind {
    /// Body of the create request.
    type Create: Serialize + Send + Sync;

    const DELETE_POLICY: DeletePolicy;

    /// Statuses that end polling after a create; `None` means the created
    /// entity is final as returned.
    fn post_create_terminal() -> Option<TerminalStatuses<<Self::Entity as Entity>::Status>>;

    /// Statuses that end polling after requesting `desired`.
    fn transition_terminal(
        desired: <Self::Entity as Entity>::Status,
    ) -> TerminalStatuses<<Self::Entity as Entity>::Status> {
        TerminalStatuses::any_of([desired])
    }
}

/// The narrowest scope an entity belongs to.
#[must_use]
pub fn scope_of<E: Entity + ?Sized>(entity: &E) -> Scope {
    match entity.tenant() {
        Some(tenant) => Scope::tenant(entity.team(), tenant),
        None => Scope::team(entity.team()),
    }
}

#[derive(Debug, Clone, Copy)]
pub struct Instances;

impl ResourceKind for Instances {
    type Entity = Instance;

    const NAME: &'static str = "instances";
}

impl MutableKind for Instances {
    type Create = NewInstance;

    const DELETE_POLICY: DeletePolicy = DeletePolicy::AwaitDisappearance;

    fn post_create_terminal() -> Option<TerminalStatuses<InstanceStatus>> {
        Some(TerminalStatuses::any_of([
            InstanceStatus::Active,
            InstanceStatus::Error,
        ]))
    }

    fn transition_terminal(desired: InstanceStatus) -> TerminalStatuses<InstanceStatus> {
        let terminal = TerminalStatuses::any_of([desired]);
        // Shelving can offload straight away.
        if desired == InstanceStatus::Shelved {
            terminal.with(InstanceStatus::ShelvedOffloaded)
        } else {
            terminal
        }
    }
}

#[derive(Debug, Clone, Copy)]
pub struct Volumes;

impl ResourceKind for Volumes {
    type Entity = Volume;

    const NAME: &'static str = "volumes";
}

impl MutableKind for Volumes {
    type Create = NewVolume;

    const DELETE_POLICY: DeletePolicy = DeletePolicy::AwaitDisappearance;

    fn post_create_terminal() -> Option<TerminalStatuses<VolumeStatus>> {
        Some(TerminalStatuses::any_of([
            VolumeStatus::Available,
            VolumeStatus::InUse,
            VolumeStatus::Error,
        ]))
    }
}

#[derive(Debug, Clone, Copy)]
pub struct KeyPairs;

impl ResourceKind for KeyPairs {
    type Entity = KeyPair;

    const NAME: &'static str = "keypairs";
}

impl MutableKind for KeyPairs {
    type Create = NewKeyPair;

    const DELETE_POLICY: DeletePolicy = DeletePolicy::RemoveImmediately;

    fn post_create_terminal() -> Option<TerminalStatuses<std::convert::Infallible>> {
        None
    }
}

macro_rules! catalog_kind {
    ($(#[$meta:meta])* $kind:ident, $entity:ty, $name:literal) => {
        $(#[$meta])*
        #[derive(Debug, Clone, Copy)]
        pub struct $kind;

        impl ResourceKind for $kind {
            type Entity = $entity;

            const NAME: &'static str = $name;

            // The cache key is scope-qualified; the backend wants its own id.
            fn member_locator(entity: &$entity) -> Locator {
                ApiRoute::member(scope_of(entity), Self::NAME, &entity.id)
            }

            fn adopt(entity: &mut $entity, scope: Scope) {
                entity.assign(scope);
            }
        }
    };
}

catalog_kind!(
    /// Compute sizes offered by a tenant. Read-only.
    Flavors,
    Flavor,
    "flavors"
);
catalog_kind!(
    /// Images offered by a tenant. Read-only.
    Images,
    Image,
    "images"
);
catalog_kind!(
    /// Volume types offered by a tenant. Read-only.
    VolumeTypes,
    VolumeType,
    "volumetypes"
);

#[cfg(test)]
mod tests {
    use super::*;
    use hangar_types::{EntityId, TeamId, TenantId};

    #[test]
    fn shelving_also_accepts_offloaded() {
        let terminal = Instances::transition_terminal(InstanceStatus::Shelved);
        assert!(terminal.contains(&InstanceStatus::ShelvedOffloaded));
        assert!(terminal.contains(&InstanceStatus::Shelved));

        let terminal = Instances::transition_terminal(InstanceStatus::Shutoff);
        assert_eq!(terminal.as_slice(), [InstanceStatus::Shutoff]);
    }

    #[test]
    fn member_locator_uses_entity_scope() {
        let volume = Volume::new(
            EntityId::new("vol-1"),
            TeamId::new(4),
            TenantId::new(8),
            1,
            VolumeStatus::Available,
        );
        assert_eq!(
            Volumes::member_locator(&volume).to_string(),
            "api/teams/4/tenants/8/volumes/vol-1/"
        );
    }

    #[test]
    fn catalog_entries_are_adopted_into_their_tenant() {
        let scope = Scope::tenant(TeamId::new(4), TenantId::new(8));
        let mut flavor = Flavor::new(EntityId::new("m1.large"), "large", 8, 16384);
        Flavors::adopt(&mut flavor, scope);

        assert!(scope.contains(&flavor));
        assert_eq!(flavor.id().as_str(), "8/m1.large");
        assert_eq!(
            Flavors::member_locator(&flavor).to_string(),
            "api/teams/4/tenants/8/flavors/m1.large/"
        );
        assert_eq!(
            VolumeTypes::collection_locator(scope).to_string(),
            "api/teams/4/tenants/8/volumetypes/"
        );
    }

    #[test]
    fn key_pairs_are_not_polled() {
        assert!(KeyPairs::post_create_terminal().is_none());
        assert_eq!(KeyPairs::DELETE_POLICY, DeletePolicy::RemoveImmediately);
        assert_eq!(Volumes::DELETE_POLICY, DeletePolicy::AwaitDisappearance);
    }
}
