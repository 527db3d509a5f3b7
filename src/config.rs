// src/config.rs

//! Deployment-level configuration for the reconciliation engine
//!
//! Identity mode and absence policy are fixed per deployment, not per call.
//! The store records the identity mode it was created with and refuses to
//! operate under a different one (see `store::schema`).

use serde::{Deserialize, Serialize};
use std::str::FromStr;

/// How two observations are decided to be "the same package" across runs
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum IdentityMode {
    /// Identity key is (hostname, package, version); a version change is
    /// recorded as the old row going absent and a new row appearing
    #[default]
    VersionAware,
    /// Identity key is (hostname, package); versions are not recorded
    VersionAgnostic,
}

impl IdentityMode {
    pub fn as_str(&self) -> &str {
        match self {
            IdentityMode::VersionAware => "version-aware",
            IdentityMode::VersionAgnostic => "version-agnostic",
        }
    }
}

impl FromStr for IdentityMode {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s {
            "version-aware" => Ok(IdentityMode::VersionAware),
            "version-agnostic" => Ok(IdentityMode::VersionAgnostic),
            _ => Err(format!("Invalid identity mode: {s}")),
        }
    }
}

/// What happens to a package row once the package disappears from a host
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum AbsencePolicy {
    /// Mark the row absent and keep it forever (full history)
    #[default]
    Retain,
    /// Physically delete the row
    Purge,
}

/// Engine configuration, fixed per deployment
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct ReconcilerConfig {
    pub identity: IdentityMode,
    pub absence: AbsencePolicy,
}
