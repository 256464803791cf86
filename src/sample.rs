//! A small sample site for trying the tool without site data.

use std::fs;
use std::path::{Path, PathBuf};

use crate::constants;
use crate::db::SqliteRepository;
use crate::models::{ManualMonthlyInputs, Month, SourceType, StorageFacility, WaterSource};
use crate::provider::ProviderResult;

/// Monthly readings matching the sample sources, first quarter of 2025.
pub const SAMPLE_CSV: &str = "\
month,river abstraction,borehole 1,underground dewatering,tonnes milled,concentrate produced,concentrate moisture
2025-01,14500,3800,6200,120000,3600,8.5
2025-02,13200,3650,6400,112000,3350,8.5
2025-03,15100,3900,6100,125500,3800,8.2
";

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SampleStats {
    pub sources: usize,
    pub facilities: usize,
    pub months: usize,
    pub constants: usize,
}

impl std::fmt::Display for SampleStats {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "Loaded {} water sources, {} storage facilities, {} months of climate data, {} constants",
            self.sources, self.facilities, self.months, self.constants
        )
    }
}

fn source(code: &str, name: &str, source_type: SourceType, average: f64, label: Option<&str>) -> WaterSource {
    WaterSource {
        id: 0,
        code: code.to_string(),
        name: name.to_string(),
        source_type,
        average_flow_rate: average,
        reliability_factor: 1.0,
        authorized_volume: None,
        metric_label: label.map(str::to_string),
        active: true,
    }
}

fn facility(code: &str, name: &str, capacity: f64, area: f64, volume: f64) -> StorageFacility {
    StorageFacility {
        id: 0,
        code: code.to_string(),
        name: name.to_string(),
        total_capacity: capacity,
        surface_area: area,
        current_volume: volume,
        pump_start_level: 70.0,
        pump_stop_level: 30.0,
        high_level_alarm: 90.0,
        feeds_to: None,
        group_key: Some("plant".to_string()),
        evaporation_active: true,
        is_lined: true,
        aquifer_gain_rate_pct: 0.0,
    }
}

/// Replace all site data with the sample site.
pub fn load_sample_site(repo: &SqliteRepository) -> ProviderResult<SampleStats> {
    repo.clear_site_data()?;

    let sources = [
        source("RIV1", "River abstraction", SourceType::River, 12_000.0, Some("river abstraction")),
        source("BH1", "Borehole 1", SourceType::Borehole, 4_000.0, Some("borehole 1")),
        source(
            "UG1",
            "Underground dewatering",
            SourceType::Dewatering,
            6_000.0,
            Some("underground dewatering"),
        ),
        // Unmetered; falls back to its long-term average
        WaterSource {
            reliability_factor: 0.6,
            ..source("CAT1", "Plant catchment runoff", SourceType::Catchment, 1_500.0, None)
        },
    ];
    for s in &sources {
        repo.upsert_water_source(s)?;
    }

    let facilities = [
        facility("PWD", "Process water dam", 80_000.0, 12_000.0, 40_000.0),
        StorageFacility {
            feeds_to: Some("PWD".to_string()),
            ..facility("RWD", "Return water dam", 150_000.0, 30_000.0, 112_000.0)
        },
        StorageFacility {
            feeds_to: Some("RWD".to_string()),
            group_key: Some("north".to_string()),
            is_lined: false,
            ..facility("SWD", "Storm water dam", 50_000.0, 15_000.0, 38_000.0)
        },
    ];
    for f in &facilities {
        repo.upsert_storage_facility(f)?;
    }

    let climate = [(1, 85.0, 160.0), (2, 70.0, 140.0), (3, 55.0, 130.0)];
    for (month, rain, evap) in climate {
        repo.set_regional_climate(Month { year: 2025, month }, Some(rain), Some(evap))?;
        repo.set_manual_monthly_inputs(
            Month { year: 2025, month },
            &ManualMonthlyInputs {
                discharge_m3: Some(1_500.0),
                domestic_consumption_m3: Some(900.0),
                tailings_moisture_pct: Some(18.0),
                ..ManualMonthlyInputs::default()
            },
        )?;
    }

    let site_constants = [
        (constants::PLANT_WATER_PER_TONNE, 0.2),
        (constants::TSF_RETURN_PCT, 55.0),
        (constants::ORE_MOISTURE_PCT, 3.0),
    ];
    for (name, value) in site_constants {
        repo.set_constant(name, value)?;
    }

    Ok(SampleStats {
        sources: sources.len(),
        facilities: facilities.len(),
        months: climate.len(),
        constants: site_constants.len(),
    })
}

/// Write the sample readings into `dir` and return the file path.
pub fn write_sample_series(dir: &Path) -> ProviderResult<PathBuf> {
    fs::create_dir_all(dir)?;
    let path = dir.join("sample_site.csv");
    fs::write(&path, SAMPLE_CSV)?;
    Ok(path)
}
