//! Saving calculation results and the facility closing volumes they imply.
//!
//! Saving the same (date, ore tonnes) twice must not move any volume twice.
//! Before recomputing a date that was already saved, facility volumes are put
//! back to the opening snapshot; if the new result matches the saved one the
//! closings captured before the call are restored and nothing else changes.

use std::collections::BTreeMap;

use chrono::NaiveDate;
use tracing::{error, info};

use crate::balance::BalanceResult;
use crate::error::{BalanceError, Result};
use crate::models::{CalcId, VolumeBatch};
use crate::orchestrator::BalanceOrchestrator;
use crate::provider::Repository;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SaveOutcome {
    Saved(CalcId),
    /// The new result matched the saved one within tolerance.
    Duplicate(CalcId),
    Replaced { old: CalcId, new: CalcId },
}

impl SaveOutcome {
    pub fn calc_id(self) -> CalcId {
        match self {
            SaveOutcome::Saved(id) | SaveOutcome::Duplicate(id) => id,
            SaveOutcome::Replaced { new, .. } => new,
        }
    }
}

/// Whether two results describe the same storage movement.
pub fn same_storage(a: &BalanceResult, b: &BalanceResult, tolerance: f64) -> bool {
    let close = |x: f64, y: f64| (x - y).abs() <= tolerance;
    if !close(a.storage_change.net_change, b.storage_change.net_change)
        || a.storage_change.facilities.len() != b.storage_change.facilities.len()
    {
        return false;
    }
    a.storage_change.facilities.iter().all(|fa| {
        b.storage_change
            .facility(&fa.code)
            .is_some_and(|fb| close(fa.closing_volume, fb.closing_volume))
    })
}

pub struct PersistenceCoordinator<'a> {
    orchestrator: &'a BalanceOrchestrator,
}

impl<'a> PersistenceCoordinator<'a> {
    pub fn new(orchestrator: &'a BalanceOrchestrator) -> Self {
        Self { orchestrator }
    }

    fn repo(&self) -> &'a dyn Repository {
        self.orchestrator.repository()
    }

    pub fn save(&self, date: NaiveDate, ore_tonnes: Option<f64>, notes: Option<&str>) -> Result<CalcId> {
        Ok(self.save_detailed(date, ore_tonnes, notes)?.calc_id())
    }

    pub fn save_detailed(
        &self,
        date: NaiveDate,
        ore_tonnes: Option<f64>,
        notes: Option<&str>,
    ) -> Result<SaveOutcome> {
        if let Some(tonnes) = ore_tonnes {
            if !tonnes.is_finite() || tonnes < 0.0 {
                return Err(BalanceError::InvalidInput(format!(
                    "ore tonnes must be a non-negative number, got {tonnes}"
                )));
            }
        }

        let outcome = match self.repo().find_calculation(date, ore_tonnes)? {
            None => self.save_new(date, ore_tonnes, notes)?,
            Some(existing) => {
                let captured = self.current_volumes()?;
                self.with_rollback(&captured, || {
                    self.resave(date, ore_tonnes, notes, existing, &captured)
                })?
            }
        };
        self.orchestrator.invalidate_cache(Some(date));
        info!(%date, ?outcome, "calculation saved");
        Ok(outcome)
    }

    fn save_new(&self, date: NaiveDate, ore_tonnes: Option<f64>, notes: Option<&str>) -> Result<SaveOutcome> {
        self.orchestrator.opening_volumes(date)?;
        let result = self.orchestrator.recalculate(date, ore_tonnes)?;
        let id = self
            .repo()
            .save_calculation(&result, ore_tonnes, notes)
            .map_err(|source| BalanceError::Transaction {
                operation: "save calculation",
                source,
            })?;
        if let Err(e) = self.persist_closings(&result) {
            self.discard(id);
            return Err(e);
        }
        Ok(SaveOutcome::Saved(id))
    }

    fn resave(
        &self,
        date: NaiveDate,
        ore_tonnes: Option<f64>,
        notes: Option<&str>,
        existing: CalcId,
        captured: &BTreeMap<String, f64>,
    ) -> Result<SaveOutcome> {
        if let Some(snapshot) = self.repo().get_opening_snapshot(date)? {
            self.commit_volumes(
                snapshot
                    .into_iter()
                    .filter(|(code, _)| captured.contains_key(code))
                    .collect(),
                "restore opening volumes",
            )?;
        }

        let result = self.orchestrator.recalculate(date, ore_tonnes)?;
        let tolerance = self.orchestrator.options().duplicate_tolerance_m3;
        if let Some(previous) = self.repo().load_calculation(existing)? {
            if same_storage(&previous, &result, tolerance) {
                self.commit_volumes(captured.clone(), "restore closing volumes")?;
                return Ok(SaveOutcome::Duplicate(existing));
            }
        }

        let new = self
            .repo()
            .save_calculation(&result, ore_tonnes, notes)
            .map_err(|source| BalanceError::Transaction {
                operation: "save calculation",
                source,
            })?;
        let replaced = self.persist_closings(&result).and_then(|()| {
            self.repo()
                .delete_calculation(existing)
                .map_err(|source| BalanceError::Transaction {
                    operation: "replace calculation",
                    source,
                })
        });
        if let Err(e) = replaced {
            self.discard(new);
            return Err(e);
        }
        Ok(SaveOutcome::Replaced { old: existing, new })
    }

    /// Run `op`; on failure put every captured volume back before returning
    /// the error.
    fn with_rollback<T>(&self, captured: &BTreeMap<String, f64>, op: impl FnOnce() -> Result<T>) -> Result<T> {
        op().inspect_err(|e| {
            error!(error = %e, "save failed, restoring facility volumes");
            if let Err(restore) = self.commit_volumes(captured.clone(), "restore closing volumes") {
                error!(error = %restore, "could not restore facility volumes");
            }
        })
    }

    fn current_volumes(&self) -> Result<BTreeMap<String, f64>> {
        Ok(self
            .repo()
            .list_storage_facilities()?
            .into_iter()
            .map(|f| (f.code, f.current_volume))
            .collect())
    }

    fn persist_closings(&self, result: &BalanceResult) -> Result<()> {
        let volumes = result
            .storage_change
            .facilities
            .iter()
            .map(|f| (f.code.clone(), f.closing_volume))
            .collect();
        self.commit_volumes(volumes, "persist closing volumes")
    }

    fn commit_volumes(&self, volumes: BTreeMap<String, f64>, operation: &'static str) -> Result<()> {
        let batch = VolumeBatch {
            volumes,
            events: Vec::new(),
        };
        if batch.is_empty() {
            return Ok(());
        }
        self.repo()
            .commit_volume_batch(&batch)
            .map_err(|source| BalanceError::Transaction { operation, source })
    }

    fn discard(&self, id: CalcId) {
        if let Err(e) = self.repo().delete_calculation(id) {
            error!(calc_id = %id, error = %e, "could not remove partially saved calculation");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    use approx::assert_abs_diff_eq;

    use crate::db::SqliteRepository;
    use crate::models::StorageFacility;
    use crate::orchestrator::EngineOptions;
    use crate::timeseries::MonthlySeries;

    fn date() -> NaiveDate {
        NaiveDate::from_ymd_opt(2025, 1, 31).unwrap()
    }

    fn unlined(code: &str, volume: f64) -> StorageFacility {
        StorageFacility {
            id: 0,
            code: code.to_string(),
            name: code.to_string(),
            total_capacity: 100_000.0,
            surface_area: 0.0,
            current_volume: volume,
            pump_start_level: 70.0,
            pump_stop_level: 30.0,
            high_level_alarm: 90.0,
            feeds_to: None,
            group_key: None,
            evaporation_active: false,
            is_lined: false,
            aquifer_gain_rate_pct: 0.0,
        }
    }

    fn setup() -> (Arc<SqliteRepository>, BalanceOrchestrator) {
        let repo = Arc::new(SqliteRepository::in_memory().unwrap());
        repo.upsert_storage_facility(&unlined("A", 40_000.0)).unwrap();
        let engine =
            BalanceOrchestrator::new(repo.clone(), Arc::new(MonthlySeries::new()), EngineOptions::default())
                .unwrap();
        (repo, engine)
    }

    #[test]
    fn first_save_persists_closings() {
        let (repo, engine) = setup();
        let outcome = PersistenceCoordinator::new(&engine).save_detailed(date(), None, None).unwrap();
        assert!(matches!(outcome, SaveOutcome::Saved(_)));
        // 0.5% unlined seepage
        assert_abs_diff_eq!(
            repo.facility("A").unwrap().unwrap().current_volume,
            39_800.0,
            epsilon = 1e-6
        );
    }

    #[test]
    fn second_save_is_duplicate_and_keeps_volumes() {
        let (repo, engine) = setup();
        let coordinator = PersistenceCoordinator::new(&engine);
        let first = coordinator.save_detailed(date(), None, Some("first")).unwrap();
        let second = coordinator.save_detailed(date(), None, None).unwrap();
        assert_eq!(second, SaveOutcome::Duplicate(first.calc_id()));
        assert_abs_diff_eq!(
            repo.facility("A").unwrap().unwrap().current_volume,
            39_800.0,
            epsilon = 1e-6
        );
    }

    #[test]
    fn changed_inputs_replace_saved_result() {
        let (repo, engine) = setup();
        let coordinator = PersistenceCoordinator::new(&engine);
        let first = coordinator.save(date(), None, None).unwrap();

        let mut changed = unlined("A", 39_800.0);
        changed.is_lined = true;
        repo.upsert_storage_facility(&changed).unwrap();
        let outcome = coordinator.save_detailed(date(), None, None).unwrap();

        let SaveOutcome::Replaced { old, new } = outcome else {
            panic!("expected replacement, got {outcome:?}");
        };
        assert_eq!(old, first);
        assert!(repo.load_calculation(old).unwrap().is_none());
        assert!(repo.load_calculation(new).unwrap().is_some());
        // 0.1% lined seepage from the 40 000 m³ opening
        assert_abs_diff_eq!(
            repo.facility("A").unwrap().unwrap().current_volume,
            39_960.0,
            epsilon = 1e-6
        );
    }

    #[test]
    fn negative_ore_is_rejected() {
        let (_, engine) = setup();
        let err = PersistenceCoordinator::new(&engine).save(date(), Some(-1.0), None).unwrap_err();
        assert!(matches!(err, BalanceError::InvalidInput(_)));
    }
}
