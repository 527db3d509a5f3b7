// src/lib.rs

//! UpdTrack - fleet package inventory tracking
//!
//! Maintains a historical, queryable record of package presence across a
//! fleet of hosts. Each host periodically reports its installed package
//! set; the reconciliation engine diffs that snapshot against the
//! central store and applies the minimal set of mutations, never losing
//! history.
//!
//! # Architecture
//!
//! - Snapshot: a host's inventory as observed at one instant
//! - Store: abstract contract for prior state and persistence (SQLite
//!   implementation bundled)
//! - Reconciler: set reconciliation with soft-state marking; idempotent,
//!   at-least-once safe, atomic per host
//! - Collector: dpkg enumeration for the reporting side
//!
//! Removal is recorded as `state = absent` rather than deletion, so the
//! store answers "when did this package disappear" long after the fact.

pub mod collector;
pub mod config;
mod error;
pub mod reconcile;
pub mod snapshot;
pub mod store;

pub use collector::CollectError;
pub use config::{AbsencePolicy, IdentityMode, ReconcilerConfig};
pub use error::{Error, Result, StoreError};
pub use reconcile::{plan_mutations, ReconcilePlan, ReconcileSummary, Reconciler};
pub use snapshot::{PackageEntry, Snapshot};
pub use store::{
    HostRecord, InventoryStore, Mutation, ObservationKey, PackageObservation, PackageState,
    SqliteStore,
};
