//! # Resource Container
//!
//! The per-transaction working set: a type-partitioned identity map of live
//! aggregates, plus the snapshots used to work out what changed.
//!
//! Nothing in here talks to storage. The manager fills the container from
//! repositories and hands its [`ResourceChanges`] back to them on save.

mod resource_container;
pub mod snapshot;

pub use resource_container::ResourceContainer;
pub use snapshot::{ChangeKind, Difference, ResourceChanges, Snapshot, SnapshotEntry, UpdatedEntry};
