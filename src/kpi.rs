//! Headline indicators derived from one balance result.

use chrono::NaiveDate;
use serde::Serialize;

use crate::balance::{BalanceResult, BalanceStatus};

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct KpiReport {
    pub date: NaiveDate,
    pub ore_tonnes: f64,
    /// Fresh water per tonne milled, m³/t. `None` when nothing was milled.
    pub fresh_water_intensity: Option<f64>,
    /// Share of gross plant water supplied by TSF return, %.
    pub recycling_ratio_pct: Option<f64>,
    pub total_storage_m3: f64,
    pub storage_utilisation_pct: f64,
    pub closure_error_m3: f64,
    pub closure_error_pct: f64,
    pub status: BalanceStatus,
    pub low_fresh_inflow: bool,
    pub facilities_above_alarm: Vec<String>,
    pub overflow_m3: f64,
}

impl KpiReport {
    pub fn from_result(result: &BalanceResult) -> Self {
        let ore_tonnes = result.ore_processed.value();
        let gross = result.outflows.plant_consumption_gross.value();
        let storage = &result.storage_change;
        let capacity: f64 = storage.facilities.iter().map(|f| f.capacity).sum();

        Self {
            date: result.calculation_date,
            ore_tonnes,
            fresh_water_intensity: (ore_tonnes > 0.0).then(|| result.fresh_inflows / ore_tonnes),
            recycling_ratio_pct: (gross > 0.0).then(|| result.inflows.tsf_return / gross * 100.0),
            total_storage_m3: storage.closing_total,
            storage_utilisation_pct: if capacity > 0.0 {
                storage.closing_total / capacity * 100.0
            } else {
                0.0
            },
            closure_error_m3: result.closure_error_m3,
            closure_error_pct: result.closure_error_percent,
            status: result.status,
            low_fresh_inflow: result.low_fresh_inflow_flag,
            facilities_above_alarm: storage
                .facilities
                .iter()
                .filter(|f| f.above_alarm)
                .map(|f| f.code.clone())
                .collect(),
            overflow_m3: storage.facilities.iter().map(|f| f.overflow).sum(),
        }
    }
}

impl std::fmt::Display for KpiReport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        writeln!(f, "=== Water KPIs {} ===", self.date)?;
        writeln!(f, "Ore milled:          {:.0} t", self.ore_tonnes)?;
        match self.fresh_water_intensity {
            Some(v) => writeln!(f, "Fresh water intensity: {v:.3} m³/t")?,
            None => writeln!(f, "Fresh water intensity: n/a")?,
        }
        match self.recycling_ratio_pct {
            Some(v) => writeln!(f, "Recycling ratio:     {v:.1}%")?,
            None => writeln!(f, "Recycling ratio:     n/a")?,
        }
        writeln!(
            f,
            "Storage:             {:.0} m³ ({:.1}% of capacity)",
            self.total_storage_m3, self.storage_utilisation_pct
        )?;
        writeln!(
            f,
            "Closure:             {:.1} m³ ({:.2}%) {}",
            self.closure_error_m3, self.closure_error_pct, self.status
        )?;
        if self.low_fresh_inflow {
            writeln!(f, "  fresh inflows too small for a reliable closure %")?;
        }
        if !self.facilities_above_alarm.is_empty() {
            writeln!(f, "Above alarm:         {}", self.facilities_above_alarm.join(", "))?;
        }
        if self.overflow_m3 > 0.0 {
            writeln!(f, "Overflow:            {:.0} m³", self.overflow_m3)?;
        }
        Ok(())
    }
}
