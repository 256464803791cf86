//! Named engine constants with defaults, repository values and overrides.

use std::collections::BTreeMap;

use tracing::debug;

use crate::provider::{ProviderResult, Repository};

pub const PLANT_WATER_PER_TONNE: &str = "plant_water_per_tonne_m3";
pub const TSF_RETURN_PCT: &str = "tsf_return_pct";
pub const DUST_SUPPRESSION_RATE: &str = "dust_suppression_rate_m3_per_t";
pub const ORE_MOISTURE_PCT: &str = "ore_moisture_pct";
pub const ORE_DENSITY: &str = "ore_density_t_m3";
pub const TAILINGS_MOISTURE_PCT: &str = "tailings_moisture_pct";
pub const SEEPAGE_RATE_LINED_PCT: &str = "seepage_rate_lined_pct";
pub const SEEPAGE_RATE_UNLINED_PCT: &str = "seepage_rate_unlined_pct";
pub const PUMP_INCREMENT_PCT: &str = "pump_increment_pct";
pub const PUMP_DEST_FILL_LIMIT_PCT: &str = "pump_dest_fill_limit_pct";
pub const CLOSURE_THRESHOLD_PCT: &str = "closure_threshold_pct";
pub const LOW_INFLOW_THRESHOLD_M3: &str = "low_inflow_threshold_m3";

/// Known constants and their defaults. `None` means the constant has no
/// default and resolves to absent unless stored or overridden.
const KNOWN: &[(&str, Option<f64>)] = &[
    (PLANT_WATER_PER_TONNE, Some(0.18)),
    (TSF_RETURN_PCT, Some(56.0)),
    (DUST_SUPPRESSION_RATE, Some(0.02)),
    (ORE_MOISTURE_PCT, Some(3.4)),
    (ORE_DENSITY, Some(2.7)),
    (TAILINGS_MOISTURE_PCT, None),
    (SEEPAGE_RATE_LINED_PCT, Some(0.1)),
    (SEEPAGE_RATE_UNLINED_PCT, Some(0.5)),
    (PUMP_INCREMENT_PCT, Some(5.0)),
    (PUMP_DEST_FILL_LIMIT_PCT, Some(95.0)),
    (CLOSURE_THRESHOLD_PCT, Some(5.0)),
    (LOW_INFLOW_THRESHOLD_M3, Some(100.0)),
];

/// Versioned set of resolved constant values.
///
/// Resolution order per name: configured override, repository value, default.
#[derive(Debug, Clone, PartialEq)]
pub struct Constants {
    values: BTreeMap<String, f64>,
    overrides: BTreeMap<String, f64>,
    version: u64,
}

impl Default for Constants {
    fn default() -> Self {
        let values = KNOWN
            .iter()
            .filter_map(|(name, default)| default.map(|v| (name.to_string(), v)))
            .collect();
        Self {
            values,
            overrides: BTreeMap::new(),
            version: 0,
        }
    }
}

impl Constants {
    pub fn with_overrides(overrides: BTreeMap<String, f64>) -> Self {
        let mut constants = Self::default();
        constants.overrides = overrides;
        constants.apply_overrides();
        constants
    }

    pub fn load(repo: &dyn Repository, overrides: BTreeMap<String, f64>) -> ProviderResult<Self> {
        let mut constants = Self::with_overrides(overrides);
        constants.reload(repo)?;
        constants.version = 0;
        Ok(constants)
    }

    /// Re-read every known constant from the repository and bump the version.
    pub fn reload(&mut self, repo: &dyn Repository) -> ProviderResult<()> {
        let mut values = BTreeMap::new();
        for (name, default) in KNOWN {
            match repo.get_constant(name)?.or(*default) {
                Some(v) => {
                    values.insert(name.to_string(), v);
                }
                None => debug!(constant = name, "constant has no value"),
            }
        }
        self.values = values;
        self.apply_overrides();
        self.version += 1;
        Ok(())
    }

    fn apply_overrides(&mut self) {
        for (name, value) in &self.overrides {
            self.values.insert(name.clone(), *value);
        }
    }

    pub fn version(&self) -> u64 {
        self.version
    }

    pub fn get(&self, name: &str) -> Option<f64> {
        self.values.get(name).copied()
    }

    /// Value of a constant that always has a default.
    pub fn value(&self, name: &str) -> f64 {
        self.get(name).unwrap_or(0.0)
    }

    pub fn set(&mut self, name: &str, value: f64) {
        self.values.insert(name.to_string(), value);
    }

    pub fn is_known(name: &str) -> bool {
        KNOWN.iter().any(|(known, _)| *known == name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_cover_rate_constants() {
        let c = Constants::default();
        assert_eq!(c.get(PUMP_INCREMENT_PCT), Some(5.0));
        assert_eq!(c.get(CLOSURE_THRESHOLD_PCT), Some(5.0));
        assert_eq!(c.get(TAILINGS_MOISTURE_PCT), None);
    }

    #[test]
    fn overrides_win_over_defaults() {
        let mut overrides = BTreeMap::new();
        overrides.insert(TSF_RETURN_PCT.to_string(), 40.0);
        let c = Constants::with_overrides(overrides);
        assert_eq!(c.value(TSF_RETURN_PCT), 40.0);
    }

    #[test]
    fn unknown_names_are_rejected() {
        assert!(Constants::is_known(ORE_DENSITY));
        assert!(!Constants::is_known("ore_densty"));
    }
}
