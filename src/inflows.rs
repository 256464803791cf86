//! Inflow totals per category for one calculation date.

use chrono::NaiveDate;
use tracing::debug;

use crate::balance::{InflowCategory, InflowMap, SourceContribution};
use crate::constants::{self, Constants};
use crate::error::{BalanceError, Result};
use crate::facility;
use crate::models::{Month, WaterSource};
use crate::provider::{Repository, TimeSeriesProvider};
use crate::resolve::Resolved;
use crate::timeseries::labels;

/// Resolve tonnes milled: an explicit figure wins, then the time series,
/// otherwise zero.
pub fn resolve_ore_tonnes(
    series: &dyn TimeSeriesProvider,
    date: NaiveDate,
    explicit: Option<f64>,
) -> Result<Resolved<f64>> {
    if let Some(tonnes) = explicit {
        if !tonnes.is_finite() || tonnes < 0.0 {
            return Err(BalanceError::InvalidInput(format!(
                "ore tonnes must be a non-negative number, got {tonnes}"
            )));
        }
        return Ok(Resolved::Measured(tonnes));
    }
    Ok(series
        .get_monthly_value(date, labels::ORE_TONNES_MILLED)?
        .map(|t| Resolved::Measured(t.max(0.0)))
        .unwrap_or_else(Resolved::zero))
}

/// Resolve one source's monthly volume.
///
/// A time-series reading always wins, including an explicit zero. Metered
/// sources without a reading contribute zero; only unmetered sources fall back
/// to `average_flow_rate × reliability_factor`.
pub fn resolve_source(
    series: &dyn TimeSeriesProvider,
    date: NaiveDate,
    source: &WaterSource,
) -> Result<Resolved<f64>> {
    if let Some(v) = series.get_monthly_value(date, source.label())? {
        return Ok(Resolved::Measured(v.max(0.0)));
    }
    if source.source_type.zero_when_unmeasured() {
        return Ok(Resolved::zero());
    }
    let reliability = source.reliability_factor.clamp(0.0, 1.0);
    Ok(Resolved::Estimated((source.average_flow_rate * reliability).max(0.0)))
}

/// Water carried in with the ore, m³.
pub fn ore_moisture_volume(ore_tonnes: Resolved<f64>, constants: &Constants) -> f64 {
    if ore_tonnes.is_default() {
        return 0.0;
    }
    let density = constants.value(constants::ORE_DENSITY);
    if density <= 0.0 {
        return 0.0;
    }
    ore_tonnes.value() * constants.value(constants::ORE_MOISTURE_PCT) / 100.0 / density
}

/// Record a recycled-water figure computed by the outflow pass when no manual
/// override was entered.
pub fn backfill_tsf_return(mut inflows: InflowMap, tsf_return: f64) -> InflowMap {
    if !inflows.tsf_return_manual {
        inflows.tsf_return = tsf_return.max(0.0);
    }
    inflows
}

pub struct InflowAggregator<'a> {
    repo: &'a dyn Repository,
    series: &'a dyn TimeSeriesProvider,
    constants: &'a Constants,
}

impl<'a> InflowAggregator<'a> {
    pub fn new(
        repo: &'a dyn Repository,
        series: &'a dyn TimeSeriesProvider,
        constants: &'a Constants,
    ) -> Self {
        Self {
            repo,
            series,
            constants,
        }
    }

    pub fn aggregate(&self, date: NaiveDate, ore_tonnes: Option<f64>) -> Result<InflowMap> {
        let month = Month::of(date);
        let mut inflows = InflowMap::default();

        let mut sources = self.repo.list_active_water_sources()?;
        sources.sort_by(|a, b| a.code.cmp(&b.code));
        for source in sources.iter().filter(|s| s.active) {
            let volume = resolve_source(self.series, date, source)?;
            debug!(
                source = %source.code,
                volume = volume.value(),
                provenance = volume.provenance(),
                "resolved source inflow"
            );
            inflows.add(source.category().into(), volume.value());
            inflows.sources.push(SourceContribution {
                code: source.code.clone(),
                category: source.category(),
                volume,
            });
        }

        let rainfall_mm = self.repo.get_regional_rainfall_mm(month)?.unwrap_or(0.0);
        let rainfall: f64 = self
            .repo
            .list_storage_facilities()?
            .iter()
            .map(|f| facility::rainfall_volume(f, rainfall_mm))
            .sum();
        inflows.add(InflowCategory::Rainfall, rainfall);

        let ore = resolve_ore_tonnes(self.series, date, ore_tonnes)?;
        inflows.add(
            InflowCategory::OreMoisture,
            ore_moisture_volume(ore, self.constants),
        );

        let manual = self.repo.get_manual_monthly_inputs(month)?;
        if let Some(tsf) = manual.tsf_return_m3 {
            inflows.add(InflowCategory::TsfReturn, tsf);
            inflows.tsf_return_manual = true;
        }

        Ok(inflows)
    }
}
