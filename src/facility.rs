//! Per-facility opening to closing volume transition.
//!
//! The facility's `current_volume` is taken as the opening volume for the
//! period; callers pass facilities whose volumes already reflect any pump
//! transfers applied for the date.

use chrono::NaiveDate;
use tracing::{debug, warn};

use crate::balance::FacilityResult;
use crate::constants::{self, Constants};
use crate::error::Result;
use crate::models::{FacilityMetric, Month, StorageFacility, level_pct};
use crate::provider::Repository;

/// Rainfall landing on the facility's water surface, m³.
pub fn rainfall_volume(facility: &StorageFacility, rainfall_mm: f64) -> f64 {
    if !facility.evaporation_active {
        return 0.0;
    }
    (rainfall_mm.max(0.0) / 1000.0) * facility.surface_area
}

/// Evaporation from the facility's water surface, capped at `available` so a
/// facility never loses more than it holds.
pub fn evaporation_volume(facility: &StorageFacility, evaporation_mm: f64, available: f64) -> f64 {
    if !facility.evaporation_active {
        return 0.0;
    }
    let potential = (evaporation_mm.max(0.0) / 1000.0) * facility.surface_area;
    potential.min(available.max(0.0))
}

/// Seepage through the facility floor; lined facilities use the lower rate.
pub fn seepage_loss(facility: &StorageFacility, volume: f64, constants: &Constants) -> f64 {
    let rate = if facility.is_lined {
        constants.value(constants::SEEPAGE_RATE_LINED_PCT)
    } else {
        constants.value(constants::SEEPAGE_RATE_UNLINED_PCT)
    };
    volume.max(0.0) * rate / 100.0
}

/// Aquifer inflow into an unsealed facility.
pub fn seepage_gain(facility: &StorageFacility, volume: f64) -> f64 {
    if !facility.evaporation_active {
        return 0.0;
    }
    volume.max(0.0) * facility.aquifer_gain_rate_pct.max(0.0) / 100.0
}

/// Closing volume constrained to the physical bounds of a facility
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Clamped {
    pub pre_clamp: f64,
    pub closing: f64,
    pub overflow: f64,
    pub deficit: f64,
}

pub fn clamp_closing(opening: f64, inflow: f64, outflow: f64, capacity: f64) -> Clamped {
    let pre_clamp = opening + inflow - outflow;
    let closing = pre_clamp.clamp(0.0, capacity.max(0.0));
    Clamped {
        pre_clamp,
        closing,
        overflow: (pre_clamp - capacity).max(0.0),
        deficit: (-pre_clamp).max(0.0),
    }
}

pub struct FacilityBalanceEngine<'a> {
    repo: &'a dyn Repository,
    constants: &'a Constants,
}

impl<'a> FacilityBalanceEngine<'a> {
    pub fn new(repo: &'a dyn Repository, constants: &'a Constants) -> Self {
        Self { repo, constants }
    }

    pub fn balance(
        &self,
        facility: &StorageFacility,
        date: NaiveDate,
        rainfall_mm: f64,
        evaporation_mm: f64,
    ) -> Result<FacilityResult> {
        let month = Month::of(date);
        let metric = |m: FacilityMetric| -> Result<f64> {
            Ok(self
                .repo
                .get_facility_metric_monthly(facility.id, m, month)?
                .unwrap_or(0.0)
                .max(0.0))
        };
        let manual_inflow = metric(FacilityMetric::Inflow)?;
        let manual_outflow = metric(FacilityMetric::Outflow)?;
        let abstraction = metric(FacilityMetric::Abstraction)?;

        let opening = facility.current_volume;
        let rainfall = rainfall_volume(facility, rainfall_mm);
        let gain = seepage_gain(facility, opening);
        let evaporation = evaporation_volume(facility, evaporation_mm, opening);
        let loss = seepage_loss(facility, opening, self.constants);

        let inflow = manual_inflow + gain + rainfall;
        let outflow = manual_outflow + abstraction + evaporation + loss;
        let clamped = clamp_closing(opening, inflow, outflow, facility.total_capacity);

        if clamped.overflow > 0.0 || clamped.deficit > 0.0 {
            warn!(
                facility = %facility.code,
                overflow = clamped.overflow,
                deficit = clamped.deficit,
                "closing volume clamped to capacity bounds"
            );
        }
        debug!(
            facility = %facility.code,
            opening,
            inflow,
            outflow,
            closing = clamped.closing,
            "facility balanced"
        );

        Ok(FacilityResult {
            code: facility.code.clone(),
            capacity: facility.total_capacity,
            opening_volume: opening,
            transfers_in: 0.0,
            transfers_out: 0.0,
            manual_inflow,
            rainfall,
            seepage_gain: gain,
            manual_outflow,
            abstraction,
            evaporation,
            seepage_loss: loss,
            inflow,
            outflow,
            pre_clamp_closing: clamped.pre_clamp,
            closing_volume: clamped.closing,
            overflow: clamped.overflow,
            deficit: clamped.deficit,
            net_balance: clamped.closing - opening,
            level_pct: level_pct(clamped.closing, facility.total_capacity),
            above_alarm: facility.above_alarm(clamped.closing),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_abs_diff_eq;

    fn facility(capacity: f64, volume: f64) -> StorageFacility {
        StorageFacility {
            id: 1,
            code: "RWD".to_string(),
            name: "Return water dam".to_string(),
            total_capacity: capacity,
            surface_area: 10_000.0,
            current_volume: volume,
            pump_start_level: 70.0,
            pump_stop_level: 30.0,
            high_level_alarm: 90.0,
            feeds_to: None,
            group_key: None,
            evaporation_active: true,
            is_lined: false,
            aquifer_gain_rate_pct: 0.0,
        }
    }

    #[test]
    fn overflow_is_clamped_and_recorded() {
        let c = clamp_closing(95_000.0, 10_000.0, 0.0, 100_000.0);
        assert_eq!(c.closing, 100_000.0);
        assert_eq!(c.overflow, 5_000.0);
        assert_eq!(c.deficit, 0.0);
        assert_eq!(c.pre_clamp, 105_000.0);
    }

    #[test]
    fn deficit_is_clamped_at_empty() {
        let c = clamp_closing(1_000.0, 0.0, 3_000.0, 100_000.0);
        assert_eq!(c.closing, 0.0);
        assert_eq!(c.deficit, 2_000.0);
        assert_eq!(c.overflow, 0.0);
    }

    #[test]
    fn evaporation_is_capped_at_volume() {
        let f = facility(100_000.0, 500.0);
        // 200 mm over 10 000 m² would be 2 000 m³
        assert_eq!(evaporation_volume(&f, 200.0, f.current_volume), 500.0);
        assert_eq!(evaporation_volume(&f, 20.0, f.current_volume), 200.0);
    }

    #[test]
    fn disabled_evaporation_skips_surface_effects() {
        let mut f = facility(100_000.0, 50_000.0);
        f.evaporation_active = false;
        f.aquifer_gain_rate_pct = 1.0;
        assert_eq!(rainfall_volume(&f, 80.0), 0.0);
        assert_eq!(evaporation_volume(&f, 80.0, 50_000.0), 0.0);
        assert_eq!(seepage_gain(&f, 50_000.0), 0.0);
    }

    #[test]
    fn lined_facilities_seep_less() {
        let constants = Constants::default();
        let mut f = facility(100_000.0, 50_000.0);
        let unlined = seepage_loss(&f, 50_000.0, &constants);
        f.is_lined = true;
        let lined = seepage_loss(&f, 50_000.0, &constants);
        assert_abs_diff_eq!(unlined, 250.0, epsilon = 1e-9);
        assert_abs_diff_eq!(lined, 50.0, epsilon = 1e-9);
    }
}
