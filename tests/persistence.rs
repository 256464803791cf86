mod common;

use std::sync::Arc;

use approx::assert_abs_diff_eq;
use parking_lot::Mutex;
use common::{FlakyRepository, date, facility, volume};
use water_balance::provider::Repository;
use water_balance::sample::{self, SAMPLE_CSV};
use water_balance::{
    BalanceError, BalanceOrchestrator, EngineOptions, MonthlySeries, PersistenceCoordinator, SaveOutcome,
    SqliteRepository,
};

fn flaky_site() -> (Arc<SqliteRepository>, Arc<FlakyRepository>, BalanceOrchestrator) {
    let inner = Arc::new(SqliteRepository::in_memory().unwrap());
    let flaky = Arc::new(FlakyRepository::new(inner.clone()));
    let engine =
        BalanceOrchestrator::new(flaky.clone(), Arc::new(MonthlySeries::new()), EngineOptions::default()).unwrap();
    (inner, flaky, engine)
}

#[test]
fn saving_twice_leaves_volumes_unchanged() {
    let repo = Arc::new(SqliteRepository::in_memory().unwrap());
    sample::load_sample_site(&repo).unwrap();
    let dir = tempfile::tempdir().unwrap();
    std::fs::write(dir.path().join("site.csv"), SAMPLE_CSV).unwrap();
    let (series, _) = MonthlySeries::load_dir(dir.path()).unwrap();
    let engine = BalanceOrchestrator::new(repo.clone(), Arc::new(series), EngineOptions::default()).unwrap();
    let coordinator = PersistenceCoordinator::new(&engine);
    let d = date(2025, 1, 31);

    let first = coordinator.save_detailed(d, None, Some("month end")).unwrap();
    assert!(matches!(first, SaveOutcome::Saved(_)));
    let after_first: Vec<f64> = ["PWD", "RWD", "SWD"].iter().map(|c| volume(&repo, c)).collect();

    let second = coordinator.save_detailed(d, None, None).unwrap();
    assert_eq!(second, SaveOutcome::Duplicate(first.calc_id()));
    let after_second: Vec<f64> = ["PWD", "RWD", "SWD"].iter().map(|c| volume(&repo, c)).collect();
    for (a, b) in after_first.iter().zip(&after_second) {
        assert_abs_diff_eq!(*a, *b, epsilon = 1e-9);
    }

    let saved = repo.load_calculation(first.calc_id()).unwrap().unwrap();
    for f in &saved.storage_change.facilities {
        assert_abs_diff_eq!(f.closing_volume, volume(&repo, &f.code), epsilon = 1e-9);
    }
    assert_eq!(
        repo.list_transfer_events(d).unwrap().len(),
        saved.applied_transfers.len()
    );
}

#[test]
fn failed_replacement_restores_captured_volumes() {
    let (inner, flaky, engine) = flaky_site();
    let mut pond = facility("A", 100_000.0, 40_000.0, None);
    pond.is_lined = false;
    inner.upsert_storage_facility(&pond).unwrap();
    let coordinator = PersistenceCoordinator::new(&engine);
    let d = date(2025, 1, 31);

    let first = coordinator.save(d, None, None).unwrap();
    let saved_volume = volume(&inner, "A");

    pond.is_lined = true;
    pond.current_volume = saved_volume;
    inner.upsert_storage_facility(&pond).unwrap();

    // Commit 1 restores the opening volumes, commit 2 persists new closings
    flaky.fail_commit_in(2);
    let err = coordinator.save(d, None, None).unwrap_err();
    assert!(matches!(
        err,
        BalanceError::Transaction {
            operation: "persist closing volumes",
            ..
        }
    ));

    assert_eq!(volume(&inner, "A"), saved_volume);
    assert_eq!(inner.find_calculation(d, None).unwrap(), Some(first));
    assert!(inner.load_calculation(first).unwrap().is_some());
}

#[test]
fn failed_transfer_commit_changes_nothing() {
    let (inner, flaky, engine) = flaky_site();
    inner
        .upsert_storage_facility(&facility("A", 100_000.0, 80_000.0, Some("B")))
        .unwrap();
    inner
        .upsert_storage_facility(&facility("B", 100_000.0, 60_000.0, None))
        .unwrap();
    let d = date(2025, 1, 31);

    flaky.fail_commit_in(1);
    let err = engine.calculate(d, None).unwrap_err();
    assert!(matches!(
        err,
        BalanceError::Transaction {
            operation: "pump transfer",
            ..
        }
    ));
    assert_eq!(volume(&inner, "A"), 80_000.0);
    assert_eq!(volume(&inner, "B"), 60_000.0);
    assert!(inner.list_transfer_events(d).unwrap().is_empty());

    // Errors are not cached; the retry applies the transfer exactly once
    let result = engine.calculate(d, None).unwrap();
    assert_eq!(result.applied_transfers.len(), 1);
    assert_eq!(volume(&inner, "A"), 75_000.0);
    assert_eq!(volume(&inner, "B"), 65_000.0);
}

#[test]
fn saving_notifies_cache_listeners() {
    let (inner, _, engine) = flaky_site();
    inner
        .upsert_storage_facility(&facility("A", 100_000.0, 10_000.0, None))
        .unwrap();
    let seen = Arc::new(Mutex::new(Vec::new()));
    let sink = Arc::clone(&seen);
    engine.register_cache_listener(Box::new(move |d| sink.lock().push(d)));

    let d = date(2025, 3, 31);
    engine.calculate(d, None).unwrap();
    PersistenceCoordinator::new(&engine).save(d, None, None).unwrap();

    assert!(seen.lock().contains(&Some(d)));
    assert!(engine.cache().is_empty());
}
