#![allow(dead_code)]

use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

use chrono::NaiveDate;
use water_balance::balance::BalanceResult;
use water_balance::models::{
    CalcId, FacilityMetric, ManualMonthlyInputs, Month, OpeningSnapshot, StorageFacility,
    TransferEvent, VolumeBatch, WaterSource,
};
use water_balance::provider::ProviderResult;
use water_balance::{ProviderError, Repository, SqliteRepository};

pub fn date(y: i32, m: u32, d: u32) -> NaiveDate {
    NaiveDate::from_ymd_opt(y, m, d).unwrap()
}

pub fn facility(code: &str, capacity: f64, volume: f64, feeds_to: Option<&str>) -> StorageFacility {
    StorageFacility {
        id: 0,
        code: code.to_string(),
        name: code.to_string(),
        total_capacity: capacity,
        surface_area: 0.0,
        current_volume: volume,
        pump_start_level: 70.0,
        pump_stop_level: 30.0,
        high_level_alarm: 90.0,
        feeds_to: feeds_to.map(str::to_string),
        group_key: None,
        evaporation_active: false,
        is_lined: true,
        aquifer_gain_rate_pct: 0.0,
    }
}

pub fn volume(repo: &SqliteRepository, code: &str) -> f64 {
    repo.facility(code).unwrap().unwrap().current_volume
}

/// Repository that delegates to SQLite but fails one chosen
/// `commit_volume_batch` call.
pub struct FlakyRepository {
    pub inner: Arc<SqliteRepository>,
    commits: AtomicUsize,
    fail_on: AtomicUsize,
}

impl FlakyRepository {
    pub fn new(inner: Arc<SqliteRepository>) -> Self {
        Self {
            inner,
            commits: AtomicUsize::new(0),
            fail_on: AtomicUsize::new(0),
        }
    }

    /// Fail the `n`th batch commit from now (1-based).
    pub fn fail_commit_in(&self, n: usize) {
        self.fail_on
            .store(self.commits.load(Ordering::SeqCst) + n, Ordering::SeqCst);
    }
}

impl Repository for FlakyRepository {
    fn list_active_water_sources(&self) -> ProviderResult<Vec<WaterSource>> {
        self.inner.list_active_water_sources()
    }

    fn list_storage_facilities(&self) -> ProviderResult<Vec<StorageFacility>> {
        self.inner.list_storage_facilities()
    }

    fn get_manual_monthly_inputs(&self, month: Month) -> ProviderResult<ManualMonthlyInputs> {
        self.inner.get_manual_monthly_inputs(month)
    }

    fn get_regional_rainfall_mm(&self, month: Month) -> ProviderResult<Option<f64>> {
        self.inner.get_regional_rainfall_mm(month)
    }

    fn get_regional_evaporation_mm(&self, month: Month) -> ProviderResult<Option<f64>> {
        self.inner.get_regional_evaporation_mm(month)
    }

    fn get_facility_metric_monthly(
        &self,
        facility_id: i64,
        metric: FacilityMetric,
        month: Month,
    ) -> ProviderResult<Option<f64>> {
        self.inner.get_facility_metric_monthly(facility_id, metric, month)
    }

    fn get_opening_snapshot(&self, date: NaiveDate) -> ProviderResult<Option<OpeningSnapshot>> {
        self.inner.get_opening_snapshot(date)
    }

    fn save_opening_snapshot(&self, date: NaiveDate, snapshot: &OpeningSnapshot) -> ProviderResult<()> {
        self.inner.save_opening_snapshot(date, snapshot)
    }

    fn has_transfer_event(&self, date: NaiveDate, source_code: &str, dest_code: &str) -> ProviderResult<bool> {
        self.inner.has_transfer_event(date, source_code, dest_code)
    }

    fn record_transfer_event(&self, event: &TransferEvent) -> ProviderResult<()> {
        self.inner.record_transfer_event(event)
    }

    fn list_transfer_events(&self, date: NaiveDate) -> ProviderResult<Vec<TransferEvent>> {
        self.inner.list_transfer_events(date)
    }

    fn update_facility_volume(&self, code: &str, volume: f64) -> ProviderResult<()> {
        self.inner.update_facility_volume(code, volume)
    }

    fn commit_volume_batch(&self, batch: &VolumeBatch) -> ProviderResult<()> {
        let n = self.commits.fetch_add(1, Ordering::SeqCst) + 1;
        if n == self.fail_on.load(Ordering::SeqCst) {
            return Err(ProviderError::Malformed {
                what: "volume batch".to_string(),
                detail: "injected failure".to_string(),
            });
        }
        self.inner.commit_volume_batch(batch)
    }

    fn get_constant(&self, name: &str) -> ProviderResult<Option<f64>> {
        self.inner.get_constant(name)
    }

    fn find_calculation(&self, date: NaiveDate, ore_tonnes: Option<f64>) -> ProviderResult<Option<CalcId>> {
        self.inner.find_calculation(date, ore_tonnes)
    }

    fn load_calculation(&self, id: CalcId) -> ProviderResult<Option<BalanceResult>> {
        self.inner.load_calculation(id)
    }

    fn save_calculation(
        &self,
        result: &BalanceResult,
        ore_tonnes: Option<f64>,
        notes: Option<&str>,
    ) -> ProviderResult<CalcId> {
        self.inner.save_calculation(result, ore_tonnes, notes)
    }

    fn delete_calculation(&self, id: CalcId) -> ProviderResult<()> {
        self.inner.delete_calculation(id)
    }
}
