//! Outflow totals per category for one calculation date.
//!
//! Plant consumption is computed in one of two modes. Mass-balance mode is
//! used whenever the fresh water delivered to the plant is known and takes
//! that figure as net consumption. Estimate mode derives consumption from
//! tonnes milled and is used for projections and the preliminary pass.

use chrono::NaiveDate;
use tracing::debug;

use crate::balance::{OutflowMap, PlantMode};
use crate::constants::{self, Constants};
use crate::error::Result;
use crate::facility;
use crate::inflows::resolve_ore_tonnes;
use crate::models::{ManualMonthlyInputs, Month, StorageFacility};
use crate::provider::{Repository, TimeSeriesProvider};
use crate::resolve::Resolved;
use crate::timeseries::labels;

pub struct OutflowAggregator<'a> {
    repo: &'a dyn Repository,
    series: &'a dyn TimeSeriesProvider,
    constants: &'a Constants,
}

impl<'a> OutflowAggregator<'a> {
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

    /// Aggregate against the facility volumes currently stored.
    pub fn aggregate(
        &self,
        date: NaiveDate,
        ore_tonnes: Option<f64>,
        fresh_water_to_plant: Option<f64>,
    ) -> Result<OutflowMap> {
        let facilities = self.repo.list_storage_facilities()?;
        self.aggregate_with_facilities(date, ore_tonnes, fresh_water_to_plant, &facilities)
    }

    /// Aggregate against caller-supplied facility volumes, e.g. the effective
    /// openings after pump transfers.
    pub fn aggregate_with_facilities(
        &self,
        date: NaiveDate,
        ore_tonnes: Option<f64>,
        fresh_water_to_plant: Option<f64>,
        facilities: &[StorageFacility],
    ) -> Result<OutflowMap> {
        let month = Month::of(date);
        let manual = self.repo.get_manual_monthly_inputs(month)?;
        let ore = resolve_ore_tonnes(self.series, date, ore_tonnes)?;
        let measured = |label: &str| self.series.get_monthly_value(date, label);

        let plant_gross_estimate = ore.map(|t| t * self.plant_water_per_tonne());
        let tsf_return = self.tsf_return(&manual, plant_gross_estimate);

        let (mode, plant_net, plant_gross) = match fresh_water_to_plant {
            Some(fresh) => {
                let fresh = fresh.max(0.0);
                (
                    PlantMode::MassBalance,
                    Resolved::Estimated(fresh),
                    Resolved::Estimated(fresh + tsf_return.value()),
                )
            }
            None => (
                PlantMode::Estimate,
                plant_gross_estimate,
                plant_gross_estimate.map(|v| v + tsf_return.value()),
            ),
        };

        let evaporation_mm = self.repo.get_regional_evaporation_mm(month)?;
        let evaporation = match evaporation_mm {
            Some(mm) => Resolved::Measured(
                facilities
                    .iter()
                    .map(|f| facility::evaporation_volume(f, mm, f.current_volume))
                    .sum(),
            ),
            None => Resolved::zero(),
        };
        let seepage_loss = Resolved::Estimated(
            facilities
                .iter()
                .map(|f| facility::seepage_loss(f, f.current_volume, self.constants))
                .sum(),
        );

        let discharge =
            Resolved::measured_or(&[manual.discharge_m3, measured(labels::DISCHARGE)?], Resolved::zero());
        let dust_suppression = Resolved::measured_or(
            &[measured(labels::DUST_SUPPRESSION)?],
            ore.map(|t| t * self.constants.value(constants::DUST_SUPPRESSION_RATE)),
        );
        let mining_consumption = Resolved::measured_or(
            &[manual.mining_consumption_m3, measured(labels::MINING_CONSUMPTION)?],
            Resolved::zero(),
        );
        let domestic_consumption = Resolved::measured_or(
            &[manual.domestic_consumption_m3, measured(labels::DOMESTIC_CONSUMPTION)?],
            Resolved::zero(),
        );

        let concentrate = measured(labels::CONCENTRATE_PRODUCED)?;
        let product_moisture = match (concentrate, measured(labels::CONCENTRATE_MOISTURE)?) {
            (Some(tonnes), Some(pct)) => Resolved::Measured((tonnes * pct / 100.0).max(0.0)),
            _ => Resolved::zero(),
        };

        let tailings_tonnes = (ore.value() - concentrate.unwrap_or(0.0)).max(0.0);
        let tailings_retention = self
            .tailings_moisture_pct(&manual)
            .map(|pct| tailings_tonnes * pct / 100.0);

        let outflows = OutflowMap {
            mode,
            plant_consumption_net: non_negative(plant_net),
            plant_consumption_gross: non_negative(plant_gross),
            tsf_return,
            evaporation,
            seepage_loss,
            discharge: non_negative(discharge),
            dust_suppression: non_negative(dust_suppression),
            mining_consumption: non_negative(mining_consumption),
            domestic_consumption: non_negative(domestic_consumption),
            product_moisture,
            tailings_retention: non_negative(tailings_retention),
        };
        debug!(
            %date,
            mode = ?outflows.mode,
            total = outflows.total(),
            "aggregated outflows"
        );
        Ok(outflows)
    }

    fn plant_water_per_tonne(&self) -> f64 {
        self.constants.value(constants::PLANT_WATER_PER_TONNE)
    }

    /// Manual override, otherwise a share of the estimated gross plant draw.
    fn tsf_return(&self, manual: &ManualMonthlyInputs, plant_gross_estimate: Resolved<f64>) -> Resolved<f64> {
        if let Some(v) = manual.tsf_return_m3 {
            return Resolved::Measured(v.max(0.0));
        }
        let pct = self.constants.value(constants::TSF_RETURN_PCT);
        non_negative(plant_gross_estimate.map(|gross| gross * pct / 100.0))
    }

    /// Monthly database value, then the configured constant, then zero.
    fn tailings_moisture_pct(&self, manual: &ManualMonthlyInputs) -> Resolved<f64> {
        match (manual.tailings_moisture_pct, self.constants.get(constants::TAILINGS_MOISTURE_PCT)) {
            (Some(pct), _) => Resolved::Measured(pct),
            (None, Some(pct)) => Resolved::Estimated(pct),
            (None, None) => Resolved::zero(),
        }
    }
}

fn non_negative(r: Resolved<f64>) -> Resolved<f64> {
    r.map(|v| v.max(0.0))
}
