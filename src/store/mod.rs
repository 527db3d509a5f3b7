// src/store/mod.rs

//! Inventory store interface and data models
//!
//! The reconciliation algorithm is decoupled from any specific storage
//! engine through the `InventoryStore` trait. The bundled implementation
//! is SQLite-backed (`SqliteStore`); the trait boundary keeps the engine
//! storage-agnostic.

pub mod schema;
pub mod sqlite;

pub use sqlite::SqliteStore;

use crate::config::IdentityMode;
use crate::error::StoreError;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Last known presence of a package on a host
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PackageState {
    Present,
    Absent,
}

impl PackageState {
    pub fn as_str(&self) -> &str {
        match self {
            PackageState::Present => "present",
            PackageState::Absent => "absent",
        }
    }
}

impl FromStr for PackageState {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s {
            "present" => Ok(PackageState::Present),
            "absent" => Ok(PackageState::Absent),
            _ => Err(format!("Invalid package state: {s}")),
        }
    }
}

/// The per-host part of an observation's identity key
///
/// `version` is `Some` under version-aware identity and `None` under
/// version-agnostic identity; the hostname component is carried
/// separately by the store calls.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct ObservationKey {
    pub name: String,
    pub version: Option<String>,
}

impl ObservationKey {
    pub fn new(name: impl Into<String>, version: Option<String>) -> Self {
        Self {
            name: name.into(),
            version,
        }
    }
}

impl fmt::Display for ObservationKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.version {
            Some(v) => write!(f, "{} {}", self.name, v),
            None => write!(f, "{}", self.name),
        }
    }
}

/// One row of the package-observations relation
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PackageObservation {
    pub key: ObservationKey,
    pub state: PackageState,
    pub last_observed_at: DateTime<Utc>,
}

/// A host row: identity plus the last reported OS release
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HostRecord {
    pub hostname: String,
    pub os_release: String,
}

/// A single change the reconciler wants applied to the store
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Mutation {
    /// First observation of this identity key; row is created Present
    Insert {
        key: ObservationKey,
        observed_at: DateTime<Utc>,
    },
    /// Package is present in the snapshot; sets Present and refreshes the
    /// timestamp whether or not the row was previously absent
    MarkPresent {
        key: ObservationKey,
        observed_at: DateTime<Utc>,
    },
    /// Package disappeared from the snapshot; no-op if the row is already
    /// absent (the timestamp of an absent row is never bumped again)
    MarkAbsent {
        key: ObservationKey,
        observed_at: DateTime<Utc>,
    },
    /// Physically delete the row; emitted only under `AbsencePolicy::Purge`
    Purge { key: ObservationKey },
}

impl Mutation {
    /// The identity key this mutation affects
    pub fn key(&self) -> &ObservationKey {
        match self {
            Mutation::Insert { key, .. } => key,
            Mutation::MarkPresent { key, .. } => key,
            Mutation::MarkAbsent { key, .. } => key,
            Mutation::Purge { key } => key,
        }
    }
}

/// Abstract contract between the reconciler and the persistent store
///
/// Implementations must make `apply_mutations` atomic with respect to a
/// single host: either the whole batch commits or none of it does.
pub trait InventoryStore {
    /// The identity mode this store was created with.
    ///
    /// The reconciler checks it against its own configuration before any
    /// write: a version-agnostic run against a version-aware store would
    /// otherwise insert NULL-version rows past the unique identity index
    /// (NULLs compare distinct), breaking the one-row-per-key invariant.
    fn identity_mode(&self) -> IdentityMode;

    /// Create the hosts and package-observations relations if absent.
    /// Idempotent and race-tolerant; safe to call from concurrent runs.
    fn ensure_schema(&mut self) -> Result<(), StoreError>;

    /// Insert the host row if missing; otherwise update `os_release` only
    /// when it differs from the stored value.
    fn upsert_host(&mut self, hostname: &str, os_release: &str) -> Result<(), StoreError>;

    /// All observations on record for the host, including absent ones.
    fn fetch_observations(
        &mut self,
        hostname: &str,
    ) -> Result<Vec<PackageObservation>, StoreError>;

    /// Apply a batch of mutations for one host, all-or-nothing.
    fn apply_mutations(
        &mut self,
        hostname: &str,
        mutations: &[Mutation],
    ) -> Result<(), StoreError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_package_state_round_trip() {
        for state in [PackageState::Present, PackageState::Absent] {
            assert_eq!(state.as_str().parse::<PackageState>(), Ok(state));
        }
        assert!("installed".parse::<PackageState>().is_err());
    }

    #[test]
    fn test_observation_key_display() {
        let versioned = ObservationKey::new("nginx", Some("1.24.0-2".to_string()));
        assert_eq!(versioned.to_string(), "nginx 1.24.0-2");

        let bare = ObservationKey::new("nginx", None);
        assert_eq!(bare.to_string(), "nginx");
    }
}
