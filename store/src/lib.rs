//! Client-side cache of dashboard resources kept in sync with the backend.
//!
//! # Architecture
//!
//! - [`CollectionCache`] - one kind's entities, mutated in place so held
//!   [`EntityRef`] handles stay live
//! - [`ScopeIndex`] - team / tenant views recomputed from the cache on demand
//! - [`PollReconciler`] - re-fetches entities mid-transition on a single
//!   self-rescheduling timer until each reaches a terminal status or is gone
//! - [`ResourceStore`] - the per-kind facade: fetch, create, transition, delete
//! - [`Dashboard`] - stores for every kind plus the active team selection
//!
//! Resource kinds differ only in their [`ResourceKind`] impl (plus
//! [`MutableKind`] for kinds that can be created and deleted); the cache and
//! the poll loop are shared generic code.

mod cache;
mod dashboard;
mod index;
mod kind;
mod poll;
mod resource;
mod timer;

pub use cache::{CollectionCache, EntityRef};
pub use dashboard::{Dashboard, TeamTotals, TenantFetchError};
pub use index::ScopeIndex;
pub use kind::{
    DeletePolicy, Flavors, Images, Instances, KeyPairs, MutableKind, ResourceKind, VolumeTypes,
    Volumes, scope_of,
};
pub use poll::{FetchFut, PollReconciler, Refetch, TickReport};
pub use resource::{ResourceClient, ResourceStore, StoreError};
pub use timer::{ManualTimer, Timer, TimerHandle, TimerTask, TokioTimer};

pub use hangar_transport;
pub use hangar_types;
