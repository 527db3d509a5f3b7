// tests/reconcile.rs

//! End-to-end reconciliation tests over the SQLite store: idempotence,
//! timestamp monotonicity, state round trips, and multi-host isolation.

mod common;

use common::{packages, setup_store, ts};
use updtrack::{
    AbsencePolicy, Error, IdentityMode, InventoryStore, ObservationKey, PackageState,
    Reconciler, ReconcilerConfig, Snapshot, SqliteStore, StoreError,
};

fn default_reconciler() -> Reconciler {
    Reconciler::new(ReconcilerConfig::default())
}

fn find<'a>(
    observations: &'a [updtrack::PackageObservation],
    name: &str,
    version: &str,
) -> &'a updtrack::PackageObservation {
    observations
        .iter()
        .find(|o| o.key == ObservationKey::new(name, Some(version.to_string())))
        .unwrap()
}

#[test]
fn test_new_host_bootstrap() {
    let (_tmp, _path, mut store) = setup_store(IdentityMode::VersionAware);
    let reconciler = default_reconciler();

    let summary = reconciler
        .reconcile(
            &mut store,
            "web01",
            "Ubuntu 22.04",
            packages(&[("nginx", "1.24.0"), ("redis", "6.2.0")]),
            ts(1),
        )
        .unwrap();

    assert_eq!(summary.inserted, 2);
    assert_eq!(summary.reinstalled + summary.refreshed + summary.newly_absent, 0);

    let hosts = store.hosts().unwrap();
    assert_eq!(hosts.len(), 1);
    assert_eq!(hosts[0].hostname, "web01");

    let observations = store.fetch_observations("web01").unwrap();
    assert_eq!(observations.len(), 2);
    assert!(observations
        .iter()
        .all(|o| o.state == PackageState::Present && o.last_observed_at == ts(1)));
}

#[test]
fn test_idempotence() {
    let (_tmp, _path, mut store) = setup_store(IdentityMode::VersionAware);
    let reconciler = default_reconciler();
    let pkgs = packages(&[("nginx", "1.24.0"), ("redis", "6.2.0")]);

    let first = reconciler
        .reconcile(&mut store, "web01", "Ubuntu 22.04", pkgs.clone(), ts(1))
        .unwrap();
    assert_eq!(first.inserted, 2);

    // Identical snapshot again: pure no-op except the last-seen refresh
    let second = reconciler
        .reconcile(&mut store, "web01", "Ubuntu 22.04", pkgs, ts(1))
        .unwrap();
    assert_eq!(second.inserted, 0);
    assert_eq!(second.newly_absent, 0);
    assert_eq!(second.refreshed, 2);
    assert!(!second.is_state_change());

    let observations = store.fetch_observations("web01").unwrap();
    assert_eq!(observations.len(), 2);
    assert!(observations.iter().all(|o| o.state == PackageState::Present));
}

#[test]
fn test_monotonic_absence_timestamp() {
    let (_tmp, _path, mut store) = setup_store(IdentityMode::VersionAware);
    let reconciler = default_reconciler();

    reconciler
        .reconcile(
            &mut store,
            "web01",
            "Ubuntu 22.04",
            packages(&[("nginx", "1.24.0")]),
            ts(1),
        )
        .unwrap();

    // Package disappears at day 2
    reconciler
        .reconcile(&mut store, "web01", "Ubuntu 22.04", vec![], ts(2))
        .unwrap();

    // Still missing on days 3 and 4: the removal date must not drift
    for day in [3, 4] {
        let summary = reconciler
            .reconcile(&mut store, "web01", "Ubuntu 22.04", vec![], ts(day))
            .unwrap();
        assert_eq!(summary.newly_absent, 0);
    }

    let observations = store.fetch_observations("web01").unwrap();
    let obs = find(&observations, "nginx", "1.24.0");
    assert_eq!(obs.state, PackageState::Absent);
    assert_eq!(obs.last_observed_at, ts(2));
}

#[test]
fn test_install_uninstall_reinstall_round_trip() {
    let (_tmp, _path, mut store) = setup_store(IdentityMode::VersionAware);
    let reconciler = default_reconciler();
    let pkg = packages(&[("nginx", "1.24.0")]);

    let s1 = reconciler
        .reconcile(&mut store, "web01", "Ubuntu 22.04", pkg.clone(), ts(1))
        .unwrap();
    assert_eq!((s1.inserted, s1.newly_absent, s1.reinstalled), (1, 0, 0));

    let s2 = reconciler
        .reconcile(&mut store, "web01", "Ubuntu 22.04", vec![], ts(2))
        .unwrap();
    assert_eq!((s2.inserted, s2.newly_absent, s2.reinstalled), (0, 1, 0));

    let s3 = reconciler
        .reconcile(&mut store, "web01", "Ubuntu 22.04", pkg, ts(3))
        .unwrap();
    assert_eq!((s3.inserted, s3.newly_absent, s3.reinstalled), (0, 0, 1));

    let observations = store.fetch_observations("web01").unwrap();
    let obs = find(&observations, "nginx", "1.24.0");
    assert_eq!(obs.state, PackageState::Present);
    assert_eq!(obs.last_observed_at, ts(3));
}

#[test]
fn test_os_release_update_keeps_single_host_row() {
    let (_tmp, _path, mut store) = setup_store(IdentityMode::VersionAware);
    let reconciler = default_reconciler();

    reconciler
        .reconcile(&mut store, "web01", "Ubuntu 22.04", vec![], ts(1))
        .unwrap();
    reconciler
        .reconcile(&mut store, "web01", "Ubuntu 24.04", vec![], ts(2))
        .unwrap();

    let hosts = store.hosts().unwrap();
    assert_eq!(hosts.len(), 1);
    assert_eq!(hosts[0].os_release, "Ubuntu 24.04");
}

#[test]
fn test_empty_snapshot_marks_everything_absent() {
    let (_tmp, _path, mut store) = setup_store(IdentityMode::VersionAware);
    let reconciler = default_reconciler();

    reconciler
        .reconcile(
            &mut store,
            "web01",
            "Ubuntu 22.04",
            packages(&[("nginx", "1.24.0"), ("redis", "6.2.0")]),
            ts(1),
        )
        .unwrap();

    // Genuinely zero packages: valid, and everything goes absent
    let summary = reconciler
        .reconcile(&mut store, "web01", "Ubuntu 22.04", vec![], ts(2))
        .unwrap();
    assert_eq!(summary.inserted, 0);
    assert_eq!(summary.newly_absent, 2);

    let observations = store.fetch_observations("web01").unwrap();
    assert_eq!(observations.len(), 2);
    assert!(observations.iter().all(|o| o.state == PackageState::Absent));
}

#[test]
fn test_malformed_snapshot_is_rejected_before_store_calls() {
    let err = Snapshot::new("", "Ubuntu 22.04", vec![], ts(1)).unwrap_err();
    assert!(matches!(err, Error::Validation(_)));

    let (_tmp, _path, mut store) = setup_store(IdentityMode::VersionAware);
    let reconciler = default_reconciler();
    let err = reconciler
        .reconcile(&mut store, "web01", "", vec![], ts(1))
        .unwrap_err();
    assert!(matches!(err, Error::Validation(_)));

    // Nothing was written
    assert!(store.hosts().unwrap().is_empty());
}

#[test]
fn test_version_bump_is_atomic_absent_plus_insert() {
    let (_tmp, _path, mut store) = setup_store(IdentityMode::VersionAware);
    let reconciler = default_reconciler();

    reconciler
        .reconcile(
            &mut store,
            "web01",
            "Ubuntu 22.04",
            packages(&[("nginx", "1.24.0")]),
            ts(1),
        )
        .unwrap();

    let summary = reconciler
        .reconcile(
            &mut store,
            "web01",
            "Ubuntu 22.04",
            packages(&[("nginx", "1.25.0")]),
            ts(2),
        )
        .unwrap();
    assert_eq!(summary.inserted, 1);
    assert_eq!(summary.newly_absent, 1);

    let observations = store.fetch_observations("web01").unwrap();
    assert_eq!(observations.len(), 2);
    assert_eq!(find(&observations, "nginx", "1.24.0").state, PackageState::Absent);
    assert_eq!(find(&observations, "nginx", "1.25.0").state, PackageState::Present);
}

#[test]
fn test_purge_policy_deletes_rows() {
    let (_tmp, _path, mut store) = setup_store(IdentityMode::VersionAware);
    let reconciler = Reconciler::new(ReconcilerConfig {
        absence: AbsencePolicy::Purge,
        ..Default::default()
    });

    reconciler
        .reconcile(
            &mut store,
            "web01",
            "Ubuntu 22.04",
            packages(&[("nginx", "1.24.0")]),
            ts(1),
        )
        .unwrap();

    let summary = reconciler
        .reconcile(&mut store, "web01", "Ubuntu 22.04", vec![], ts(2))
        .unwrap();
    assert_eq!(summary.purged, 1);

    let observations = store.fetch_observations("web01").unwrap();
    assert!(observations.is_empty());
}

#[test]
fn test_version_agnostic_mode_tracks_names_only() {
    let (_tmp, _path, mut store) = setup_store(IdentityMode::VersionAgnostic);
    let reconciler = Reconciler::new(ReconcilerConfig {
        identity: IdentityMode::VersionAgnostic,
        ..Default::default()
    });

    reconciler
        .reconcile(
            &mut store,
            "web01",
            "Ubuntu 22.04",
            packages(&[("nginx", "1.24.0")]),
            ts(1),
        )
        .unwrap();

    // A version bump is just a refresh of the same row
    let summary = reconciler
        .reconcile(
            &mut store,
            "web01",
            "Ubuntu 22.04",
            packages(&[("nginx", "1.25.0")]),
            ts(2),
        )
        .unwrap();
    assert_eq!(summary.refreshed, 1);
    assert_eq!(summary.inserted, 0);

    let observations = store.fetch_observations("web01").unwrap();
    assert_eq!(observations.len(), 1);
    assert_eq!(observations[0].key, ObservationKey::new("nginx", None));
    assert_eq!(observations[0].last_observed_at, ts(2));
}

#[test]
fn test_reconciler_store_mode_disagreement_is_rejected() {
    let (_tmp, _path, mut store) = setup_store(IdentityMode::VersionAware);
    store.ensure_schema().unwrap();

    let reconciler = Reconciler::new(ReconcilerConfig {
        identity: IdentityMode::VersionAgnostic,
        ..Default::default()
    });

    // Without the up-front check, every run would insert a fresh
    // NULL-version row for the same package (NULLs compare distinct in
    // the unique index), multiplying rows for one identity key
    for day in 1..=3 {
        let err = reconciler
            .reconcile(
                &mut store,
                "web01",
                "Ubuntu 22.04",
                packages(&[("nginx", "1.24.0")]),
                ts(day),
            )
            .unwrap_err();
        assert!(matches!(err, Error::Store(StoreError::Schema(_))));
    }

    // Nothing was written
    assert!(store.hosts().unwrap().is_empty());
    assert!(store.fetch_observations("web01").unwrap().is_empty());
}

#[test]
fn test_identity_mode_mismatch_is_a_schema_error() {
    let (_tmp, path, mut store) = setup_store(IdentityMode::VersionAware);
    let reconciler = default_reconciler();
    reconciler
        .reconcile(&mut store, "web01", "Ubuntu 22.04", vec![], ts(1))
        .unwrap();

    let mut wrong_mode = SqliteStore::open(&path, IdentityMode::VersionAgnostic).unwrap();
    let err = wrong_mode.ensure_schema().unwrap_err();
    assert!(matches!(err, StoreError::Schema(_)));
}

#[test]
fn test_concurrent_distinct_hosts_stay_isolated() {
    let (_tmp, path, mut store) = setup_store(IdentityMode::VersionAware);
    let reconciler = default_reconciler();

    // Create the schema before the threads race on a shared file
    reconciler
        .reconcile(&mut store, "seed", "Ubuntu 22.04", vec![], ts(1))
        .unwrap();

    std::thread::scope(|scope| {
        for (host, pkg) in [("web01", "nginx"), ("db01", "postgres")] {
            let reconciler = &reconciler;
            let path = &path;
            scope.spawn(move || {
                let mut store = SqliteStore::open(path, IdentityMode::VersionAware).unwrap();
                for day in 1..=5 {
                    reconciler
                        .reconcile(
                            &mut store,
                            host,
                            "Ubuntu 22.04",
                            packages(&[(pkg, "1.0.0")]),
                            ts(day),
                        )
                        .unwrap();
                }
            });
        }
    });

    for (host, pkg) in [("web01", "nginx"), ("db01", "postgres")] {
        let observations = store.fetch_observations(host).unwrap();
        assert_eq!(observations.len(), 1, "host {host} must only see its own rows");
        assert_eq!(observations[0].key.name, pkg);
        assert_eq!(observations[0].state, PackageState::Present);
        assert_eq!(observations[0].last_observed_at, ts(5));
    }
}

#[test]
fn test_summary_serializes_for_callers() {
    let (_tmp, _path, mut store) = setup_store(IdentityMode::VersionAware);
    let reconciler = default_reconciler();

    let summary = reconciler
        .reconcile(
            &mut store,
            "web01",
            "Ubuntu 22.04",
            packages(&[("nginx", "1.24.0")]),
            ts(1),
        )
        .unwrap();

    let json = serde_json::to_value(&summary).unwrap();
    assert_eq!(json["hostname"], "web01");
    assert_eq!(json["inserted"], 1);
}
