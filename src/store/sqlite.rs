// src/store/sqlite.rs

//! SQLite-backed inventory store
//!
//! Implements `InventoryStore` over rusqlite. All statements are
//! parameterized; package names and versions come from arbitrary
//! installed software and are never interpolated into SQL text.
//!
//! `apply_mutations` runs the whole batch in one transaction per host.
//! Inserts use ON CONFLICT DO UPDATE, so a concurrent writer that raced
//! the same identity key resolves to an update instead of a constraint
//! failure, and the overall run stays safe to retry from the top.

use crate::config::IdentityMode;
use crate::error::StoreError;
use crate::store::{
    schema, HostRecord, InventoryStore, Mutation, ObservationKey, PackageObservation,
    PackageState,
};
use chrono::{DateTime, Utc};
use rusqlite::{params, Connection, OptionalExtension, Row};
use std::path::Path;
use std::time::Duration;
use tracing::debug;

/// Inventory store over a SQLite database
pub struct SqliteStore {
    conn: Connection,
    identity: IdentityMode,
}

impl SqliteStore {
    /// Open (or create) a store at the given path
    pub fn open(path: impl AsRef<Path>, identity: IdentityMode) -> Result<Self, StoreError> {
        let conn = Connection::open(path.as_ref())
            .map_err(|e| StoreError::Connection(format!("failed to open database: {e}")))?;
        Self::with_connection(conn, identity)
    }

    /// Open an in-memory store; useful for tests and dry runs
    pub fn open_in_memory(identity: IdentityMode) -> Result<Self, StoreError> {
        let conn = Connection::open_in_memory()
            .map_err(|e| StoreError::Connection(format!("failed to open database: {e}")))?;
        Self::with_connection(conn, identity)
    }

    fn with_connection(conn: Connection, identity: IdentityMode) -> Result<Self, StoreError> {
        conn.busy_timeout(Duration::from_secs(5))
            .map_err(StoreError::from_sqlite)?;
        conn.pragma_update(None, "foreign_keys", "ON")
            .map_err(StoreError::from_sqlite)?;
        Ok(Self { conn, identity })
    }

    /// List all host rows, ordered by hostname
    ///
    /// Read path for presentation layers; not part of the reconciliation
    /// contract.
    pub fn hosts(&self) -> Result<Vec<HostRecord>, StoreError> {
        let mut stmt = self
            .conn
            .prepare("SELECT hostname, os_release FROM hosts ORDER BY hostname")
            .map_err(StoreError::from_sqlite)?;

        let hosts = stmt
            .query_map([], |row| {
                Ok(HostRecord {
                    hostname: row.get(0)?,
                    os_release: row.get(1)?,
                })
            })
            .map_err(StoreError::from_sqlite)?
            .collect::<std::result::Result<Vec<_>, _>>()
            .map_err(StoreError::from_sqlite)?;

        Ok(hosts)
    }

    /// Upsert SQL for Insert and MarkPresent mutations
    ///
    /// The conflict target must match the unique identity index, which is
    /// mode-dependent.
    fn upsert_observation_sql(&self) -> &'static str {
        match self.identity {
            IdentityMode::VersionAware => {
                "INSERT INTO package_observations
                   (hostname, package_name, package_version, state, last_observed_at)
                 VALUES (?1, ?2, ?3, 'present', ?4)
                 ON CONFLICT(hostname, package_name, package_version)
                 DO UPDATE SET state = 'present', last_observed_at = excluded.last_observed_at"
            }
            IdentityMode::VersionAgnostic => {
                "INSERT INTO package_observations
                   (hostname, package_name, package_version, state, last_observed_at)
                 VALUES (?1, ?2, ?3, 'present', ?4)
                 ON CONFLICT(hostname, package_name)
                 DO UPDATE SET state = 'present', last_observed_at = excluded.last_observed_at"
            }
        }
    }

    /// Convert a database row to a PackageObservation
    fn observation_from_row(row: &Row) -> rusqlite::Result<PackageObservation> {
        let state_str: String = row.get(2)?;
        let state = state_str.parse::<PackageState>().map_err(|e| {
            rusqlite::Error::FromSqlConversionFailure(
                2,
                rusqlite::types::Type::Text,
                Box::new(std::io::Error::new(std::io::ErrorKind::InvalidData, e)),
            )
        })?;

        let ts: String = row.get(3)?;
        let last_observed_at = DateTime::parse_from_rfc3339(&ts)
            .map_err(|e| {
                rusqlite::Error::FromSqlConversionFailure(
                    3,
                    rusqlite::types::Type::Text,
                    Box::new(e),
                )
            })?
            .with_timezone(&Utc);

        Ok(PackageObservation {
            key: ObservationKey {
                name: row.get(0)?,
                version: row.get(1)?,
            },
            state,
            last_observed_at,
        })
    }
}

/// Classify a failed commit
///
/// Busy/locked/raced-writer failures roll back cleanly on drop and keep
/// their retryable classification; anything else is reported as an
/// indeterminate partial apply for this host.
fn classify_commit_error(hostname: &str, err: rusqlite::Error) -> StoreError {
    match StoreError::from_sqlite(err) {
        transient @ (StoreError::Connection(_) | StoreError::Constraint(_)) => transient,
        other => StoreError::PartialApply {
            hostname: hostname.to_string(),
            reason: other.to_string(),
        },
    }
}

impl InventoryStore for SqliteStore {
    fn identity_mode(&self) -> IdentityMode {
        self.identity
    }

    fn ensure_schema(&mut self) -> Result<(), StoreError> {
        schema::migrate(&self.conn, self.identity)
    }

    fn upsert_host(&mut self, hostname: &str, os_release: &str) -> Result<(), StoreError> {
        let stored: Option<String> = self
            .conn
            .query_row(
                "SELECT os_release FROM hosts WHERE hostname = ?1",
                [hostname],
                |row| row.get(0),
            )
            .optional()
            .map_err(StoreError::from_sqlite)?;

        match stored {
            None => {
                // OR IGNORE: a racing run may have inserted the row between
                // the read and this write
                self.conn
                    .execute(
                        "INSERT OR IGNORE INTO hosts (hostname, os_release) VALUES (?1, ?2)",
                        params![hostname, os_release],
                    )
                    .map_err(StoreError::from_sqlite)?;
                debug!("Registered new host {}", hostname);
            }
            Some(existing) if existing != os_release => {
                self.conn
                    .execute(
                        "UPDATE hosts SET os_release = ?1 WHERE hostname = ?2",
                        params![os_release, hostname],
                    )
                    .map_err(StoreError::from_sqlite)?;
                debug!(
                    "Updated os_release for host {} ({} -> {})",
                    hostname, existing, os_release
                );
            }
            Some(_) => {}
        }
        Ok(())
    }

    fn fetch_observations(
        &mut self,
        hostname: &str,
    ) -> Result<Vec<PackageObservation>, StoreError> {
        let mut stmt = self
            .conn
            .prepare_cached(
                "SELECT package_name, package_version, state, last_observed_at
                 FROM package_observations
                 WHERE hostname = ?1
                 ORDER BY package_name, package_version",
            )
            .map_err(StoreError::from_sqlite)?;

        let observations = stmt
            .query_map([hostname], Self::observation_from_row)
            .map_err(StoreError::from_sqlite)?
            .collect::<std::result::Result<Vec<_>, _>>()
            .map_err(StoreError::from_sqlite)?;

        Ok(observations)
    }

    fn apply_mutations(
        &mut self,
        hostname: &str,
        mutations: &[Mutation],
    ) -> Result<(), StoreError> {
        if mutations.is_empty() {
            return Ok(());
        }

        debug!(
            "Applying {} mutations for host {}",
            mutations.len(),
            hostname
        );

        let upsert_sql = self.upsert_observation_sql();
        let tx = self
            .conn
            .transaction()
            .map_err(StoreError::from_sqlite)?;

        {
            let mut upsert = tx.prepare_cached(upsert_sql).map_err(StoreError::from_sqlite)?;
            // The absent timestamp is frozen once set: the state predicate
            // keeps a second run from re-dating an already-absent row.
            let mut mark_absent = tx
                .prepare_cached(
                    "UPDATE package_observations
                     SET state = 'absent', last_observed_at = ?4
                     WHERE hostname = ?1 AND package_name = ?2
                       AND (?3 IS NULL OR package_version = ?3)
                       AND state = 'present'",
                )
                .map_err(StoreError::from_sqlite)?;
            let mut purge = tx
                .prepare_cached(
                    "DELETE FROM package_observations
                     WHERE hostname = ?1 AND package_name = ?2
                       AND (?3 IS NULL OR package_version = ?3)",
                )
                .map_err(StoreError::from_sqlite)?;

            for mutation in mutations {
                match mutation {
                    Mutation::Insert { key, observed_at }
                    | Mutation::MarkPresent { key, observed_at } => {
                        upsert
                            .execute(params![
                                hostname,
                                key.name,
                                key.version,
                                observed_at.to_rfc3339(),
                            ])
                            .map_err(StoreError::from_sqlite)?;
                    }
                    Mutation::MarkAbsent { key, observed_at } => {
                        mark_absent
                            .execute(params![
                                hostname,
                                key.name,
                                key.version,
                                observed_at.to_rfc3339(),
                            ])
                            .map_err(StoreError::from_sqlite)?;
                    }
                    Mutation::Purge { key } => {
                        purge
                            .execute(params![hostname, key.name, key.version])
                            .map_err(StoreError::from_sqlite)?;
                    }
                }
            }
        }

        tx.commit().map_err(|e| classify_commit_error(hostname, e))
    }
}
