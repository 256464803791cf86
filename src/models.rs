//! Data models for water sources, storage facilities and monthly inputs

use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Datelike, NaiveDate, Utc};
use serde::{Deserialize, Serialize};

/// Broad accounting category a water source reports under
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SourceCategory {
    Surface,
    Groundwater,
    Underground,
}

/// Physical kind of a water source.
///
/// The kind decides the category and whether a missing monthly reading falls
/// back to the long-term average or to zero.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SourceType {
    River,
    Transfer,
    Catchment,
    Borehole,
    Wellfield,
    Dewatering,
    Underground,
}

impl SourceType {
    pub fn category(self) -> SourceCategory {
        match self {
            SourceType::River | SourceType::Transfer | SourceType::Catchment => {
                SourceCategory::Surface
            }
            SourceType::Borehole | SourceType::Wellfield => SourceCategory::Groundwater,
            SourceType::Dewatering | SourceType::Underground => SourceCategory::Underground,
        }
    }

    /// Metered sources report zero when no reading exists for the month;
    /// only unmetered catchment runoff is estimated from its average.
    pub fn zero_when_unmeasured(self) -> bool {
        !matches!(self, SourceType::Catchment)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            SourceType::River => "river",
            SourceType::Transfer => "transfer",
            SourceType::Catchment => "catchment",
            SourceType::Borehole => "borehole",
            SourceType::Wellfield => "wellfield",
            SourceType::Dewatering => "dewatering",
            SourceType::Underground => "underground",
        }
    }
}

impl FromStr for SourceType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "river" => Ok(SourceType::River),
            "transfer" => Ok(SourceType::Transfer),
            "catchment" | "surface" => Ok(SourceType::Catchment),
            "borehole" | "groundwater" => Ok(SourceType::Borehole),
            "wellfield" => Ok(SourceType::Wellfield),
            "dewatering" => Ok(SourceType::Dewatering),
            "underground" => Ok(SourceType::Underground),
            other => Err(format!("unknown source type '{other}'")),
        }
    }
}

impl fmt::Display for SourceType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct WaterSource {
    pub id: i64,
    pub code: String,
    pub name: String,
    pub source_type: SourceType,
    pub average_flow_rate: f64,  // m³ per month
    pub reliability_factor: f64, // 0..=1
    pub authorized_volume: Option<f64>,
    pub metric_label: Option<String>, // time-series column, defaults to the code
    pub active: bool,
}

impl WaterSource {
    pub fn category(&self) -> SourceCategory {
        self.source_type.category()
    }

    pub fn label(&self) -> &str {
        self.metric_label.as_deref().unwrap_or(&self.code)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct StorageFacility {
    pub id: i64,
    pub code: String,
    pub name: String,
    pub total_capacity: f64, // m³
    pub surface_area: f64,   // m²
    pub current_volume: f64, // m³
    pub pump_start_level: f64, // % of capacity
    pub pump_stop_level: f64,  // % of capacity
    pub high_level_alarm: f64, // % of capacity
    pub feeds_to: Option<String>,
    pub group_key: Option<String>,
    pub evaporation_active: bool,
    pub is_lined: bool,
    pub aquifer_gain_rate_pct: f64,
}

impl StorageFacility {
    pub fn level_pct(&self) -> f64 {
        level_pct(self.current_volume, self.total_capacity)
    }

    pub fn stop_volume(&self) -> f64 {
        self.total_capacity * self.pump_stop_level / 100.0
    }

    pub fn above_alarm(&self, volume: f64) -> bool {
        level_pct(volume, self.total_capacity) >= self.high_level_alarm
    }
}

pub fn level_pct(volume: f64, capacity: f64) -> f64 {
    if capacity > 0.0 {
        volume / capacity * 100.0
    } else {
        0.0
    }
}

/// Site-level manual entries for one month. Present values override the
/// computed defaults.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ManualMonthlyInputs {
    pub discharge_m3: Option<f64>,
    pub mining_consumption_m3: Option<f64>,
    pub domestic_consumption_m3: Option<f64>,
    pub tailings_moisture_pct: Option<f64>,
    pub tsf_return_m3: Option<f64>,
}

/// Per-facility monthly figures entered against a facility
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FacilityMetric {
    Inflow,
    Outflow,
    Abstraction,
}

impl FacilityMetric {
    pub fn as_str(self) -> &'static str {
        match self {
            FacilityMetric::Inflow => "inflow_m3",
            FacilityMetric::Outflow => "outflow_m3",
            FacilityMetric::Abstraction => "abstraction_m3",
        }
    }
}

/// Calendar month a calculation date falls in
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Month {
    pub year: i32,
    pub month: u32,
}

impl Month {
    pub fn of(date: NaiveDate) -> Self {
        Self {
            year: date.year(),
            month: date.month(),
        }
    }
}

impl fmt::Display for Month {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:04}-{:02}", self.year, self.month)
    }
}

/// Facility code → opening volume captured on the first calculation of a date
pub type OpeningSnapshot = BTreeMap<String, f64>;

/// Audit record of an applied pump transfer
#[derive(Debug, Clone, PartialEq)]
pub struct TransferEvent {
    pub calc_date: NaiveDate,
    pub source_code: String,
    pub dest_code: String,
    pub volume: f64,
    pub recorded_at: DateTime<Utc>,
}

/// Stage of volume mutations committed as one unit
#[derive(Debug, Clone, Default, PartialEq)]
pub struct VolumeBatch {
    pub volumes: BTreeMap<String, f64>,
    pub events: Vec<TransferEvent>,
}

impl VolumeBatch {
    pub fn is_empty(&self) -> bool {
        self.volumes.is_empty() && self.events.is_empty()
    }
}

/// A previously saved calculation, located by (date, ore tonnes)
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CalcId(pub i64);

impl fmt::Display for CalcId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}
