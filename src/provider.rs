//! Interfaces the engine consumes from its data collaborators.
//!
//! Both traits are object safe and `Send + Sync` so one repository and one
//! time-series provider can back every calculation in the process.

use chrono::NaiveDate;

use crate::balance::BalanceResult;
use crate::error::ProviderError;
use crate::models::{
    CalcId, FacilityMetric, ManualMonthlyInputs, Month, OpeningSnapshot, StorageFacility,
    TransferEvent, VolumeBatch, WaterSource,
};

pub type ProviderResult<T> = Result<T, ProviderError>;

/// Typed access to the site's stored water data.
pub trait Repository: Send + Sync {
    fn list_active_water_sources(&self) -> ProviderResult<Vec<WaterSource>>;

    /// All storage facilities, ordered by code.
    fn list_storage_facilities(&self) -> ProviderResult<Vec<StorageFacility>>;

    fn get_manual_monthly_inputs(&self, month: Month) -> ProviderResult<ManualMonthlyInputs>;

    fn get_regional_rainfall_mm(&self, month: Month) -> ProviderResult<Option<f64>>;

    fn get_regional_evaporation_mm(&self, month: Month) -> ProviderResult<Option<f64>>;

    fn get_facility_metric_monthly(
        &self,
        facility_id: i64,
        metric: FacilityMetric,
        month: Month,
    ) -> ProviderResult<Option<f64>>;

    fn get_opening_snapshot(&self, date: NaiveDate) -> ProviderResult<Option<OpeningSnapshot>>;

    fn save_opening_snapshot(&self, date: NaiveDate, snapshot: &OpeningSnapshot)
    -> ProviderResult<()>;

    fn has_transfer_event(
        &self,
        date: NaiveDate,
        source_code: &str,
        dest_code: &str,
    ) -> ProviderResult<bool>;

    fn record_transfer_event(&self, event: &TransferEvent) -> ProviderResult<()>;

    /// Transfer events recorded for a date, in insertion order.
    fn list_transfer_events(&self, date: NaiveDate) -> ProviderResult<Vec<TransferEvent>>;

    fn update_facility_volume(&self, code: &str, volume: f64) -> ProviderResult<()>;

    /// Apply every volume update and insert every transfer event of the batch
    /// in one transaction. Either all of it is committed or none of it is.
    fn commit_volume_batch(&self, batch: &VolumeBatch) -> ProviderResult<()>;

    fn get_constant(&self, name: &str) -> ProviderResult<Option<f64>>;

    fn find_calculation(
        &self,
        date: NaiveDate,
        ore_tonnes: Option<f64>,
    ) -> ProviderResult<Option<CalcId>>;

    fn load_calculation(&self, id: CalcId) -> ProviderResult<Option<BalanceResult>>;

    /// Store a result under the (date, ore tonnes) key the caller asked for.
    fn save_calculation(
        &self,
        result: &BalanceResult,
        ore_tonnes: Option<f64>,
        notes: Option<&str>,
    ) -> ProviderResult<CalcId>;

    fn delete_calculation(&self, id: CalcId) -> ProviderResult<()>;
}

/// Monthly metric lookups keyed by label.
///
/// `Ok(None)` means the value is truly absent; an explicit zero is returned as
/// `Ok(Some(0.0))`.
pub trait TimeSeriesProvider: Send + Sync {
    fn get_monthly_value(&self, date: NaiveDate, metric_label: &str)
    -> ProviderResult<Option<f64>>;
}
