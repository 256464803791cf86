//! Result types produced by a balance calculation.

use std::fmt;

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

use crate::models::SourceCategory;
use crate::resolve::Resolved;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum InflowCategory {
    SurfaceWater,
    Groundwater,
    Underground,
    Rainfall,
    OreMoisture,
    TsfReturn,
}

impl InflowCategory {
    pub const ALL: [InflowCategory; 6] = [
        InflowCategory::SurfaceWater,
        InflowCategory::Groundwater,
        InflowCategory::Underground,
        InflowCategory::Rainfall,
        InflowCategory::OreMoisture,
        InflowCategory::TsfReturn,
    ];

    pub fn label(self) -> &'static str {
        match self {
            InflowCategory::SurfaceWater => "Surface water",
            InflowCategory::Groundwater => "Groundwater",
            InflowCategory::Underground => "Underground dewatering",
            InflowCategory::Rainfall => "Rainfall",
            InflowCategory::OreMoisture => "Ore moisture",
            InflowCategory::TsfReturn => "TSF return",
        }
    }
}

impl From<SourceCategory> for InflowCategory {
    fn from(category: SourceCategory) -> Self {
        match category {
            SourceCategory::Surface => InflowCategory::SurfaceWater,
            SourceCategory::Groundwater => InflowCategory::Groundwater,
            SourceCategory::Underground => InflowCategory::Underground,
        }
    }
}

/// Contribution of one water source after priority resolution
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SourceContribution {
    pub code: String,
    pub category: SourceCategory,
    pub volume: Resolved<f64>,
}

/// Inflow totals per category, all non-negative
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct InflowMap {
    pub surface_water: f64,
    pub groundwater: f64,
    pub underground: f64,
    pub rainfall: f64,
    pub ore_moisture: f64,
    pub tsf_return: f64,
    pub tsf_return_manual: bool,
    pub sources: Vec<SourceContribution>,
}

impl InflowMap {
    pub fn get(&self, category: InflowCategory) -> f64 {
        match category {
            InflowCategory::SurfaceWater => self.surface_water,
            InflowCategory::Groundwater => self.groundwater,
            InflowCategory::Underground => self.underground,
            InflowCategory::Rainfall => self.rainfall,
            InflowCategory::OreMoisture => self.ore_moisture,
            InflowCategory::TsfReturn => self.tsf_return,
        }
    }

    pub fn add(&mut self, category: InflowCategory, volume: f64) {
        let slot = match category {
            InflowCategory::SurfaceWater => &mut self.surface_water,
            InflowCategory::Groundwater => &mut self.groundwater,
            InflowCategory::Underground => &mut self.underground,
            InflowCategory::Rainfall => &mut self.rainfall,
            InflowCategory::OreMoisture => &mut self.ore_moisture,
            InflowCategory::TsfReturn => &mut self.tsf_return,
        };
        *slot += volume.max(0.0);
    }

    pub fn iter(&self) -> impl Iterator<Item = (InflowCategory, f64)> + '_ {
        InflowCategory::ALL.into_iter().map(|c| (c, self.get(c)))
    }

    pub fn total(&self) -> f64 {
        self.iter().map(|(_, v)| v).sum()
    }

    /// Total excluding recycled TSF return water.
    pub fn fresh_total(&self) -> f64 {
        self.total() - self.tsf_return
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OutflowCategory {
    PlantConsumptionNet,
    PlantConsumptionGross,
    Evaporation,
    SeepageLoss,
    Discharge,
    DustSuppression,
    MiningConsumption,
    DomesticConsumption,
    ProductMoisture,
    TailingsRetention,
}

impl OutflowCategory {
    pub const ALL: [OutflowCategory; 10] = [
        OutflowCategory::PlantConsumptionNet,
        OutflowCategory::PlantConsumptionGross,
        OutflowCategory::Evaporation,
        OutflowCategory::SeepageLoss,
        OutflowCategory::Discharge,
        OutflowCategory::DustSuppression,
        OutflowCategory::MiningConsumption,
        OutflowCategory::DomesticConsumption,
        OutflowCategory::ProductMoisture,
        OutflowCategory::TailingsRetention,
    ];

    /// Whether the category counts towards `total_outflows`. Evaporation and
    /// seepage already show up as storage decreases; gross plant consumption
    /// includes recycled water.
    pub fn in_total(self) -> bool {
        !matches!(
            self,
            OutflowCategory::PlantConsumptionGross
                | OutflowCategory::Evaporation
                | OutflowCategory::SeepageLoss
        )
    }

    pub fn label(self) -> &'static str {
        match self {
            OutflowCategory::PlantConsumptionNet => "Plant consumption (net)",
            OutflowCategory::PlantConsumptionGross => "Plant consumption (gross)",
            OutflowCategory::Evaporation => "Evaporation",
            OutflowCategory::SeepageLoss => "Seepage loss",
            OutflowCategory::Discharge => "Discharge",
            OutflowCategory::DustSuppression => "Dust suppression",
            OutflowCategory::MiningConsumption => "Mining consumption",
            OutflowCategory::DomesticConsumption => "Domestic consumption",
            OutflowCategory::ProductMoisture => "Product moisture",
            OutflowCategory::TailingsRetention => "Tailings retention",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PlantMode {
    MassBalance,
    Estimate,
}

/// Outflow totals per category, each with its provenance
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OutflowMap {
    pub mode: PlantMode,
    pub plant_consumption_net: Resolved<f64>,
    pub plant_consumption_gross: Resolved<f64>,
    pub tsf_return: Resolved<f64>,
    pub evaporation: Resolved<f64>,
    pub seepage_loss: Resolved<f64>,
    pub discharge: Resolved<f64>,
    pub dust_suppression: Resolved<f64>,
    pub mining_consumption: Resolved<f64>,
    pub domestic_consumption: Resolved<f64>,
    pub product_moisture: Resolved<f64>,
    pub tailings_retention: Resolved<f64>,
}

impl OutflowMap {
    pub fn get(&self, category: OutflowCategory) -> f64 {
        let resolved = match category {
            OutflowCategory::PlantConsumptionNet => &self.plant_consumption_net,
            OutflowCategory::PlantConsumptionGross => &self.plant_consumption_gross,
            OutflowCategory::Evaporation => &self.evaporation,
            OutflowCategory::SeepageLoss => &self.seepage_loss,
            OutflowCategory::Discharge => &self.discharge,
            OutflowCategory::DustSuppression => &self.dust_suppression,
            OutflowCategory::MiningConsumption => &self.mining_consumption,
            OutflowCategory::DomesticConsumption => &self.domestic_consumption,
            OutflowCategory::ProductMoisture => &self.product_moisture,
            OutflowCategory::TailingsRetention => &self.tailings_retention,
        };
        resolved.value()
    }

    pub fn iter(&self) -> impl Iterator<Item = (OutflowCategory, f64)> + '_ {
        OutflowCategory::ALL.into_iter().map(|c| (c, self.get(c)))
    }

    pub fn total(&self) -> f64 {
        self.iter()
            .filter(|(c, _)| c.in_total())
            .map(|(_, v)| v)
            .sum()
    }

    /// Water drawn for uses other than the processing plant.
    pub fn auxiliary_uses(&self) -> f64 {
        self.dust_suppression.value()
            + self.mining_consumption.value()
            + self.domestic_consumption.value()
    }
}

/// Volume transition of one facility over the period
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FacilityResult {
    pub code: String,
    pub capacity: f64,
    pub opening_volume: f64,
    pub transfers_in: f64,
    pub transfers_out: f64,
    pub manual_inflow: f64,
    pub rainfall: f64,
    pub seepage_gain: f64,
    pub manual_outflow: f64,
    pub abstraction: f64,
    pub evaporation: f64,
    pub seepage_loss: f64,
    pub inflow: f64,
    pub outflow: f64,
    pub pre_clamp_closing: f64,
    pub closing_volume: f64,
    pub overflow: f64,
    pub deficit: f64,
    pub net_balance: f64,
    pub level_pct: f64,
    pub above_alarm: bool,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct StorageChange {
    pub opening_total: f64,
    pub closing_total: f64,
    pub net_change: f64,
    pub facilities: Vec<FacilityResult>,
}

impl StorageChange {
    pub fn from_facilities(facilities: Vec<FacilityResult>) -> Self {
        let opening_total = facilities.iter().map(|f| f.opening_volume).sum();
        let closing_total = facilities.iter().map(|f| f.closing_volume).sum();
        let net_change = facilities.iter().map(|f| f.net_balance).sum();
        Self {
            opening_total,
            closing_total,
            net_change,
            facilities,
        }
    }

    pub fn facility(&self, code: &str) -> Option<&FacilityResult> {
        self.facilities.iter().find(|f| f.code == code)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum BalanceStatus {
    Closed,
    Open,
}

impl fmt::Display for BalanceStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            BalanceStatus::Closed => f.write_str("CLOSED"),
            BalanceStatus::Open => f.write_str("OPEN"),
        }
    }
}

/// A pump transfer counted in this period's balance
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AppliedTransfer {
    pub source_code: String,
    pub dest_code: String,
    pub volume: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum BalanceWarning {
    CapacityViolation {
        facility: String,
        overflow: f64,
        deficit: f64,
    },
    LowFreshInflow {
        fresh_inflows: f64,
    },
}

impl fmt::Display for BalanceWarning {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            BalanceWarning::CapacityViolation {
                facility,
                overflow,
                deficit,
            } => {
                if *overflow > 0.0 {
                    write!(f, "{facility}: overflow of {overflow:.1} m³ clamped at capacity")
                } else {
                    write!(f, "{facility}: deficit of {deficit:.1} m³ clamped at empty")
                }
            }
            BalanceWarning::LowFreshInflow { fresh_inflows } => write!(
                f,
                "fresh inflows of {fresh_inflows:.1} m³ are too small for a reliable closure %"
            ),
        }
    }
}

/// Outcome of one balance calculation. Never mutated after construction.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BalanceResult {
    pub calculation_date: NaiveDate,
    pub inflows: InflowMap,
    pub outflows: OutflowMap,
    pub total_inflows: f64,
    pub fresh_inflows: f64,
    pub total_outflows: f64,
    pub net_balance: f64,
    pub storage_change: StorageChange,
    pub closure_error_m3: f64,
    pub closure_error_percent: f64,
    pub low_fresh_inflow_flag: bool,
    pub ore_processed: Resolved<f64>,
    pub status: BalanceStatus,
    pub applied_transfers: Vec<AppliedTransfer>,
    pub warnings: Vec<BalanceWarning>,
}
