//! Core domain types for Hangar.
//!
//! This crate contains pure domain types with no IO, no async, and minimal dependencies:
//! identifiers, team/tenant scoping, the [`Entity`] abstraction the store is generic
//! over, and the concrete backend records (instances, volumes, key pairs and the
//! per-tenant catalogs).

// Pedantic lint configuration - these are intentional design choices
#![allow(clippy::missing_errors_doc)] // Result-returning functions are self-explanatory

mod catalog;
mod entity;
mod ids;
mod instance;
mod key_pair;
mod scope;
mod team;
mod volume;

pub use catalog::{Flavor, Image, VolumeType, catalog_key};
pub use entity::{Entity, TerminalStatuses};
pub use ids::{EntityId, RegionId, TeamId, TenantId};
pub use instance::{Instance, InstanceStatus, LeaseRenewal, NewInstance};
pub use key_pair::{KeyPair, NewKeyPair};
pub use scope::{Scope, Selection};
pub use team::{Region, Team, Tenant};
pub use volume::{NewVolume, Volume, VolumeAttachment, VolumeStatus};
