// src/collector.rs

//! Local package enumeration for dpkg-based hosts
//!
//! The collector side of the system: turn the local dpkg database into a
//! `Snapshot` the reconciler can consume. Enumeration reads
//! `/var/lib/dpkg/status` directly and falls back to the `dpkg-query`
//! command-line tool when the status file is unavailable.
//!
//! The contract with the engine is that enumeration failure is loud: a
//! readable source that yields zero packages is an error, never a
//! silently empty snapshot (an empty snapshot would mark the host's
//! entire inventory absent).

use crate::snapshot::{PackageEntry, Snapshot};
use chrono::{DateTime, Utc};
use std::path::Path;
use std::process::Command;
use thiserror::Error;
use tracing::{debug, warn};

/// Default location of the dpkg status database
pub const DPKG_STATUS_PATH: &str = "/var/lib/dpkg/status";

/// Default location of the OS release metadata
pub const OS_RELEASE_PATH: &str = "/etc/os-release";

/// Errors raised while collecting a host snapshot
#[derive(Error, Debug)]
pub enum CollectError {
    /// I/O error reading a local source
    #[error("I/O error reading {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },

    /// dpkg-query could not be run or exited nonzero
    #[error("dpkg-query failed: {0}")]
    Command(String),

    /// A source was readable but yielded no packages
    #[error("package enumeration from {0} returned no packages")]
    EmptyEnumeration(String),

    /// A required field could not be found in a metadata file
    #[error("could not parse {field} from {path}")]
    Parse { field: String, path: String },

    /// The assembled snapshot failed validation
    #[error(transparent)]
    Snapshot(#[from] crate::error::Error),
}

/// Parse dpkg status file content into (name, version) pairs
///
/// Stanzas are separated by blank lines; only packages whose Status line
/// says "installed" are kept (removed-but-configured packages still have
/// stanzas in the file).
pub fn parse_status_file(content: &str) -> Vec<PackageEntry> {
    let mut packages = Vec::new();
    let mut name: Option<&str> = None;
    let mut version: Option<&str> = None;
    let mut installed = false;

    for line in content.lines().chain(std::iter::once("")) {
        if line.is_empty() {
            if installed
                && let (Some(n), Some(v)) = (name, version)
            {
                packages.push(PackageEntry::new(n, v));
            }
            name = None;
            version = None;
            installed = false;
        } else if let Some(rest) = line.strip_prefix("Package: ") {
            name = Some(rest.trim());
        } else if let Some(rest) = line.strip_prefix("Version: ") {
            version = Some(rest.trim());
        } else if let Some(rest) = line.strip_prefix("Status: ") {
            installed = rest.trim().ends_with(" installed");
        }
    }

    packages
}

/// Enumerate installed packages from a dpkg status file
pub fn read_status_packages(path: impl AsRef<Path>) -> Result<Vec<PackageEntry>, CollectError> {
    let path = path.as_ref();
    debug!("Reading dpkg status file {}", path.display());

    let content = std::fs::read_to_string(path).map_err(|e| CollectError::Io {
        path: path.display().to_string(),
        source: e,
    })?;

    let packages = parse_status_file(&content);
    if packages.is_empty() {
        return Err(CollectError::EmptyEnumeration(path.display().to_string()));
    }

    debug!("Found {} installed packages", packages.len());
    Ok(packages)
}

/// Enumerate installed packages via the dpkg-query command
pub fn query_dpkg_packages() -> Result<Vec<PackageEntry>, CollectError> {
    debug!("Querying installed packages via dpkg-query");

    let output = Command::new("dpkg-query")
        .args(["-W", "-f", "${Package}\\t${Version}\\n"])
        .output()
        .map_err(|e| {
            CollectError::Command(format!("failed to run dpkg-query: {e}. Is dpkg installed?"))
        })?;

    if !output.status.success() {
        return Err(CollectError::Command(
            String::from_utf8_lossy(&output.stderr).trim().to_string(),
        ));
    }

    let packages: Vec<PackageEntry> = String::from_utf8_lossy(&output.stdout)
        .lines()
        .filter_map(|line| {
            let (name, version) = line.split_once('\t')?;
            if name.is_empty() || version.is_empty() {
                return None;
            }
            Some(PackageEntry::new(name, version))
        })
        .collect();

    if packages.is_empty() {
        return Err(CollectError::EmptyEnumeration("dpkg-query".to_string()));
    }

    debug!("Found {} installed packages", packages.len());
    Ok(packages)
}

/// Read the OS release description (PRETTY_NAME) from an os-release file
pub fn read_os_release(path: impl AsRef<Path>) -> Result<String, CollectError> {
    let path = path.as_ref();
    let content = std::fs::read_to_string(path).map_err(|e| CollectError::Io {
        path: path.display().to_string(),
        source: e,
    })?;

    content
        .lines()
        .find_map(|line| line.strip_prefix("PRETTY_NAME="))
        .map(|value| value.trim().trim_matches('"').to_string())
        .filter(|value| !value.is_empty())
        .ok_or_else(|| CollectError::Parse {
            field: "PRETTY_NAME".to_string(),
            path: path.display().to_string(),
        })
}

/// The local machine's hostname
pub fn local_hostname() -> Result<String, CollectError> {
    let path = "/proc/sys/kernel/hostname";
    let hostname = std::fs::read_to_string(path).map_err(|e| CollectError::Io {
        path: path.to_string(),
        source: e,
    })?;
    Ok(hostname.trim().to_string())
}

/// Assemble a full snapshot of the local host
///
/// Prefers the dpkg status file; falls back to dpkg-query if the file is
/// missing or unreadable.
pub fn collect_snapshot(observed_at: DateTime<Utc>) -> Result<Snapshot, CollectError> {
    let hostname = local_hostname()?;
    let os_release = read_os_release(OS_RELEASE_PATH)?;

    let packages = match read_status_packages(DPKG_STATUS_PATH) {
        Ok(packages) => packages,
        Err(CollectError::Io { path, source }) => {
            warn!(
                "Could not read {} ({}), falling back to dpkg-query",
                path, source
            );
            query_dpkg_packages()?
        }
        Err(e) => return Err(e),
    };

    Ok(Snapshot::new(hostname, os_release, packages, observed_at)?)
}
