// src/snapshot.rs

//! Snapshot model - a host's package inventory at one point in time
//!
//! A snapshot is the input to reconciliation: host identity, OS release,
//! and the set of packages observed on the host. Package order is
//! irrelevant and duplicates collapse. An empty package set is valid (a
//! host can genuinely have zero packages); the collector is responsible
//! for never handing over a spuriously empty set on enumeration failure.

use crate::error::{Error, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;

/// A single (name, version) pair as reported by the host
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct PackageEntry {
    pub name: String,
    pub version: String,
}

impl PackageEntry {
    pub fn new(name: impl Into<String>, version: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            version: version.into(),
        }
    }
}

/// What a host has installed right now, as observed at one instant
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Snapshot {
    hostname: String,
    os_release: String,
    packages: BTreeSet<PackageEntry>,
    observed_at: DateTime<Utc>,
}

impl Snapshot {
    /// Build a validated snapshot
    ///
    /// Fails with `Error::Validation` if `hostname` or `os_release` is
    /// empty (after trimming). An empty package collection is accepted.
    pub fn new(
        hostname: impl Into<String>,
        os_release: impl Into<String>,
        packages: impl IntoIterator<Item = PackageEntry>,
        observed_at: DateTime<Utc>,
    ) -> Result<Self> {
        let hostname = hostname.into();
        let os_release = os_release.into();

        if hostname.trim().is_empty() {
            return Err(Error::Validation("hostname must not be empty".to_string()));
        }
        if os_release.trim().is_empty() {
            return Err(Error::Validation(format!(
                "os_release must not be empty for host '{hostname}'"
            )));
        }

        Ok(Self {
            hostname,
            os_release,
            packages: packages.into_iter().collect(),
            observed_at,
        })
    }

    pub fn hostname(&self) -> &str {
        &self.hostname
    }

    pub fn os_release(&self) -> &str {
        &self.os_release
    }

    /// Packages in name order; duplicates already collapsed
    pub fn packages(&self) -> impl Iterator<Item = &PackageEntry> {
        self.packages.iter()
    }

    pub fn package_count(&self) -> usize {
        self.packages.len()
    }

    pub fn observed_at(&self) -> DateTime<Utc> {
        self.observed_at
    }
}
