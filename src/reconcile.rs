// src/reconcile.rs

//! Reconciliation between a host snapshot and the stored inventory
//!
//! The planner is pure: given the snapshot's present key set and the
//! observations on record, it computes the mutation batch that brings the
//! store up to date. The `Reconciler` wraps it with the run protocol:
//! ensure schema once, upsert the host, fetch, plan, apply atomically.
//!
//! Defining properties: running the same snapshot twice is a no-op except
//! for the timestamp refresh on present rows, and an absent row's
//! timestamp never moves again.

use crate::config::{AbsencePolicy, IdentityMode, ReconcilerConfig};
use crate::error::{Error, Result, StoreError};
use crate::snapshot::{PackageEntry, Snapshot};
use crate::store::{InventoryStore, Mutation, ObservationKey, PackageObservation, PackageState};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeSet, HashMap};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use tracing::{debug, info};

/// Outcome of one reconciliation run, for the caller's observability
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReconcileSummary {
    pub hostname: String,
    /// The os_release value now on record for the host
    pub os_release: String,
    pub observed_at: DateTime<Utc>,
    /// Packages seen for the first time
    pub inserted: usize,
    /// Packages that returned after having been removed
    pub reinstalled: usize,
    /// Packages still present; only their last-seen time moved
    pub refreshed: usize,
    /// Packages newly marked absent
    pub newly_absent: usize,
    /// Rows physically deleted (hard-delete policy only)
    pub purged: usize,
}

impl ReconcileSummary {
    /// Whether the run changed any state beyond timestamp refreshes
    pub fn is_state_change(&self) -> bool {
        self.inserted + self.reinstalled + self.newly_absent + self.purged > 0
    }
}

/// A planned mutation batch plus the per-category counts
#[derive(Debug, Clone, Default)]
pub struct ReconcilePlan {
    pub mutations: Vec<Mutation>,
    pub inserted: usize,
    pub reinstalled: usize,
    pub refreshed: usize,
    pub newly_absent: usize,
    pub purged: usize,
}

/// Derive an observation identity key from a snapshot entry
fn identity_key(entry: &PackageEntry, identity: IdentityMode) -> ObservationKey {
    match identity {
        IdentityMode::VersionAware => {
            ObservationKey::new(entry.name.clone(), Some(entry.version.clone()))
        }
        IdentityMode::VersionAgnostic => ObservationKey::new(entry.name.clone(), None),
    }
}

/// Compute the mutation batch for one host
///
/// Set reconciliation with a temporal dimension:
/// - keys only in the snapshot are inserted;
/// - keys in both are marked present with the new timestamp (this covers
///   both "reinstalled" and "still present, refresh last-seen");
/// - present keys only on record are marked absent (or purged);
/// - already-absent keys stay untouched so their removal date is frozen.
///
/// A version change under version-aware identity yields the old key's
/// absence and the new key's insert in the same batch.
pub fn plan_mutations(
    snapshot: &Snapshot,
    observed: &[PackageObservation],
    config: &ReconcilerConfig,
) -> ReconcilePlan {
    let observed_at = snapshot.observed_at();

    let present: BTreeSet<ObservationKey> = snapshot
        .packages()
        .map(|entry| identity_key(entry, config.identity))
        .collect();

    let on_record: HashMap<&ObservationKey, PackageState> =
        observed.iter().map(|o| (&o.key, o.state)).collect();

    let mut plan = ReconcilePlan::default();

    for key in &present {
        match on_record.get(key) {
            None => {
                plan.inserted += 1;
                plan.mutations.push(Mutation::Insert {
                    key: key.clone(),
                    observed_at,
                });
            }
            Some(PackageState::Absent) => {
                plan.reinstalled += 1;
                plan.mutations.push(Mutation::MarkPresent {
                    key: key.clone(),
                    observed_at,
                });
            }
            Some(PackageState::Present) => {
                // State-wise a no-op, but the last-seen time must move so
                // "still present" stays distinguishable from "stale"
                plan.refreshed += 1;
                plan.mutations.push(Mutation::MarkPresent {
                    key: key.clone(),
                    observed_at,
                });
            }
        }
    }

    for observation in observed {
        if present.contains(&observation.key) {
            continue;
        }
        match (observation.state, config.absence) {
            (PackageState::Present, AbsencePolicy::Retain) => {
                plan.newly_absent += 1;
                plan.mutations.push(Mutation::MarkAbsent {
                    key: observation.key.clone(),
                    observed_at,
                });
            }
            (PackageState::Present, AbsencePolicy::Purge)
            | (PackageState::Absent, AbsencePolicy::Purge) => {
                plan.purged += 1;
                plan.mutations.push(Mutation::Purge {
                    key: observation.key.clone(),
                });
            }
            // Already absent under the retain policy: timestamp frozen
            (PackageState::Absent, AbsencePolicy::Retain) => {}
        }
    }

    plan
}

/// The reconciliation engine
///
/// One instance serves many hosts and many runs. Schema creation is
/// delegated to the store once per reconciler lifetime; runs for the same
/// hostname are serialized through a per-host lock, while distinct hosts
/// never contend.
pub struct Reconciler {
    config: ReconcilerConfig,
    schema_ready: AtomicBool,
    host_locks: Mutex<HashMap<String, Arc<Mutex<()>>>>,
}

impl Reconciler {
    pub fn new(config: ReconcilerConfig) -> Self {
        Self {
            config,
            schema_ready: AtomicBool::new(false),
            host_locks: Mutex::new(HashMap::new()),
        }
    }

    pub fn config(&self) -> &ReconcilerConfig {
        &self.config
    }

    /// The single public entry point: build a snapshot from raw parts and
    /// reconcile it
    pub fn reconcile<S: InventoryStore>(
        &self,
        store: &mut S,
        hostname: &str,
        os_release: &str,
        packages: impl IntoIterator<Item = PackageEntry>,
        observed_at: DateTime<Utc>,
    ) -> Result<ReconcileSummary> {
        let snapshot = Snapshot::new(hostname, os_release, packages, observed_at)?;
        self.apply(store, &snapshot)
    }

    /// Reconcile an already-validated snapshot against the store
    pub fn apply<S: InventoryStore>(
        &self,
        store: &mut S,
        snapshot: &Snapshot,
    ) -> Result<ReconcileSummary> {
        // A version-agnostic run against a version-aware store would slip
        // NULL-version rows past the unique identity index, so a mode
        // disagreement is refused before any write
        let store_mode = store.identity_mode();
        if store_mode != self.config.identity {
            return Err(Error::Store(StoreError::Schema(format!(
                "store uses identity mode '{}' but the reconciler is configured with '{}'",
                store_mode.as_str(),
                self.config.identity.as_str()
            ))));
        }

        // Once per reconciler lifetime; a racing second call is harmless
        // because ensure_schema is itself idempotent
        if !self.schema_ready.load(Ordering::Acquire) {
            store.ensure_schema().map_err(Error::Store)?;
            self.schema_ready.store(true, Ordering::Release);
        }

        let hostname = snapshot.hostname();
        store
            .upsert_host(hostname, snapshot.os_release())
            .map_err(Error::Store)?;

        // Reading the observation set and applying the diff against a
        // concurrently-mutated set is unsafe, so fetch-plan-apply runs
        // under a host-scoped critical section
        let lock = self.host_lock(hostname);
        let _guard = lock.lock().unwrap_or_else(PoisonError::into_inner);

        let observed = store.fetch_observations(hostname).map_err(Error::Store)?;
        let plan = plan_mutations(snapshot, &observed, &self.config);

        debug!(
            "Host {}: {} mutations planned ({} on record, {} in snapshot)",
            hostname,
            plan.mutations.len(),
            observed.len(),
            snapshot.package_count(),
        );

        store
            .apply_mutations(hostname, &plan.mutations)
            .map_err(Error::Store)?;

        let summary = ReconcileSummary {
            hostname: hostname.to_string(),
            os_release: snapshot.os_release().to_string(),
            observed_at: snapshot.observed_at(),
            inserted: plan.inserted,
            reinstalled: plan.reinstalled,
            refreshed: plan.refreshed,
            newly_absent: plan.newly_absent,
            purged: plan.purged,
        };

        info!(
            "Reconciled host {}: {} inserted, {} reinstalled, {} refreshed, {} newly absent, {} purged",
            summary.hostname,
            summary.inserted,
            summary.reinstalled,
            summary.refreshed,
            summary.newly_absent,
            summary.purged,
        );

        Ok(summary)
    }

    fn host_lock(&self, hostname: &str) -> Arc<Mutex<()>> {
        let mut locks = self
            .host_locks
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        locks
            .entry(hostname.to_string())
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone()
    }
}
