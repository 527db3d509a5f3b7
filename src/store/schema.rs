// src/store/schema.rs

//! Schema definitions and migrations for the inventory store
//!
//! Defines the SQLite schema for the two persistent relations (hosts and
//! package observations) and a small migration system to evolve it. All
//! DDL uses IF NOT EXISTS semantics so concurrent reconciliation runs can
//! race through `migrate` safely.
//!
//! The unique identity index depends on the deployment's identity mode,
//! so the mode is recorded in a metadata table on first creation and
//! every later caller is checked against it: opening a version-agnostic
//! store in version-aware mode (or vice versa) is a schema error, not a
//! silent behavior change.

use crate::config::IdentityMode;
use crate::error::StoreError;
use rusqlite::Connection;
use tracing::{debug, info};

/// Current schema version
pub const SCHEMA_VERSION: i32 = 1;

/// Initialize the schema version tracking table
fn init_schema_version(conn: &Connection) -> Result<(), StoreError> {
    conn.execute(
        "CREATE TABLE IF NOT EXISTS schema_version (
            version INTEGER PRIMARY KEY,
            applied_at TEXT NOT NULL DEFAULT CURRENT_TIMESTAMP
        )",
        [],
    )
    .map_err(StoreError::from_sqlite)?;
    Ok(())
}

/// Get the current schema version from the database
pub fn get_schema_version(conn: &Connection) -> Result<i32, StoreError> {
    init_schema_version(conn)?;

    let version = conn
        .query_row(
            "SELECT version FROM schema_version ORDER BY version DESC LIMIT 1",
            [],
            |row| row.get(0),
        )
        .unwrap_or(0);

    Ok(version)
}

/// Record a schema version; INSERT OR IGNORE so a racing run that already
/// recorded the same version is not an error
fn set_schema_version(conn: &Connection, version: i32) -> Result<(), StoreError> {
    conn.execute(
        "INSERT OR IGNORE INTO schema_version (version) VALUES (?1)",
        [version],
    )
    .map_err(StoreError::from_sqlite)?;
    Ok(())
}

/// Apply all pending migrations and verify the identity mode
pub fn migrate(conn: &Connection, identity: IdentityMode) -> Result<(), StoreError> {
    let current_version = get_schema_version(conn)?;
    debug!("Current schema version: {}", current_version);

    if current_version < SCHEMA_VERSION {
        for version in (current_version + 1)..=SCHEMA_VERSION {
            info!("Applying migration to version {}", version);
            apply_migration(conn, version, identity)?;
            set_schema_version(conn, version)?;
        }
        info!("Schema migration complete. Now at version {}", SCHEMA_VERSION);
    }

    check_identity_mode(conn, identity)
}

/// Apply a specific migration version
fn apply_migration(
    conn: &Connection,
    version: i32,
    identity: IdentityMode,
) -> Result<(), StoreError> {
    match version {
        1 => migrate_v1(conn, identity),
        _ => Err(StoreError::Schema(format!(
            "Unknown migration version: {version}"
        ))),
    }
}

/// Initial schema - Version 1
///
/// Creates the core tables:
/// - hosts: one row per hostname, carrying the last reported OS release
/// - package_observations: one row per identity key, soft-state marked
/// - store_meta: deployment settings (identity mode)
fn migrate_v1(conn: &Connection, identity: IdentityMode) -> Result<(), StoreError> {
    debug!("Creating schema version 1");

    conn.execute_batch(
        "
        -- Hosts: created on first snapshot, os_release tracks the latest report
        CREATE TABLE IF NOT EXISTS hosts (
            hostname TEXT NOT NULL,
            os_release TEXT NOT NULL,
            PRIMARY KEY (hostname)
        );

        -- Package observations: soft-state presence history per host.
        -- package_version is NULL under version-agnostic identity.
        CREATE TABLE IF NOT EXISTS package_observations (
            hostname TEXT NOT NULL,
            package_name TEXT NOT NULL,
            package_version TEXT,
            state TEXT NOT NULL CHECK(state IN ('present', 'absent')),
            last_observed_at TEXT NOT NULL,
            FOREIGN KEY (hostname) REFERENCES hosts(hostname)
        );

        CREATE INDEX IF NOT EXISTS idx_observations_hostname
            ON package_observations(hostname);
        CREATE INDEX IF NOT EXISTS idx_observations_state
            ON package_observations(hostname, state);

        -- Store metadata: deployment-level settings fixed at creation
        CREATE TABLE IF NOT EXISTS store_meta (
            key TEXT NOT NULL,
            value TEXT NOT NULL,
            PRIMARY KEY (key)
        );
        ",
    )
    .map_err(StoreError::from_sqlite)?;

    // The identity index is mode-dependent and enforces "at most one
    // observation per identity key".
    let index_sql = match identity {
        IdentityMode::VersionAware => {
            "CREATE UNIQUE INDEX IF NOT EXISTS idx_observations_identity
             ON package_observations(hostname, package_name, package_version)"
        }
        IdentityMode::VersionAgnostic => {
            "CREATE UNIQUE INDEX IF NOT EXISTS idx_observations_identity
             ON package_observations(hostname, package_name)"
        }
    };
    conn.execute(index_sql, []).map_err(StoreError::from_sqlite)?;

    conn.execute(
        "INSERT OR IGNORE INTO store_meta (key, value) VALUES ('identity_mode', ?1)",
        [identity.as_str()],
    )
    .map_err(StoreError::from_sqlite)?;

    info!("Schema version 1 created");
    Ok(())
}

/// Verify the store was created under the identity mode we are using
fn check_identity_mode(conn: &Connection, identity: IdentityMode) -> Result<(), StoreError> {
    let recorded: String = conn
        .query_row(
            "SELECT value FROM store_meta WHERE key = 'identity_mode'",
            [],
            |row| row.get(0),
        )
        .map_err(StoreError::from_sqlite)?;

    if recorded != identity.as_str() {
        return Err(StoreError::Schema(format!(
            "store was created with identity mode '{recorded}' but opened with '{}'",
            identity.as_str()
        )));
    }
    Ok(())
}
