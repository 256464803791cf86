//! Monthly time-series lookups.
//!
//! `MonthlySeries` holds one value per (month, metric label). It can be filled
//! programmatically or loaded from a directory of CSV exports where the first
//! column is a date and every other header names a metric.

use std::collections::BTreeMap;
use std::fs;
use std::path::Path;
use std::sync::LazyLock;

use chrono::NaiveDate;
use regex::Regex;
use tracing::{debug, warn};
use walkdir::WalkDir;

use crate::error::ProviderError;
use crate::models::Month;
use crate::provider::{ProviderResult, TimeSeriesProvider};

/// Well-known metric labels
pub mod labels {
    pub const ORE_TONNES_MILLED: &str = "tonnes milled";
    pub const CONCENTRATE_PRODUCED: &str = "concentrate produced";
    pub const CONCENTRATE_MOISTURE: &str = "concentrate moisture";
    pub const DISCHARGE: &str = "discharge";
    pub const DUST_SUPPRESSION: &str = "dust suppression";
    pub const MINING_CONSUMPTION: &str = "mining consumption";
    pub const DOMESTIC_CONSUMPTION: &str = "domestic consumption";
}

static NON_ALNUM: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"[^a-z0-9]+").expect("static regex"));
static ISO_DATE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^(\d{4})-(\d{1,2})(?:-(\d{1,2}))?$").expect("static regex"));
static MONTH_NAME: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^([A-Za-z]{3,9})[\s\-/]+(\d{2}|\d{4})$").expect("static regex"));

/// Lowercase a label and collapse punctuation, so "Tonnes_Milled" and
/// "tonnes milled" address the same metric.
pub fn normalize_label(label: &str) -> String {
    NON_ALNUM
        .replace_all(&label.to_ascii_lowercase(), " ")
        .trim()
        .to_string()
}

/// Parse the month out of a date cell.
///
/// Accepts `2025-01-31`, `2025-01`, `Jan-25`, `January 2025`.
pub fn parse_month_cell(cell: &str) -> Option<Month> {
    let cell = cell.trim();
    if let Some(cap) = ISO_DATE.captures(cell) {
        let year: i32 = cap[1].parse().ok()?;
        let month: u32 = cap[2].parse().ok()?;
        return (1..=12).contains(&month).then_some(Month { year, month });
    }
    if let Some(cap) = MONTH_NAME.captures(cell) {
        let month = month_from_name(&cap[1])?;
        let year: i32 = cap[2].parse().ok()?;
        let year = if cap[2].len() == 2 { 2000 + year } else { year };
        return Some(Month { year, month });
    }
    None
}

fn month_from_name(name: &str) -> Option<u32> {
    const NAMES: [&str; 12] = [
        "jan", "feb", "mar", "apr", "may", "jun", "jul", "aug", "sep", "oct", "nov", "dec",
    ];
    let lower = name.to_ascii_lowercase();
    let prefix = lower.get(..3)?;
    NAMES.iter().position(|n| *n == prefix).map(|i| i as u32 + 1)
}

#[derive(Debug, Clone, Default)]
pub struct MonthlySeries {
    values: BTreeMap<Month, BTreeMap<String, f64>>,
}

/// Summary of a directory load
#[derive(Debug, Default)]
pub struct LoadStats {
    pub files: usize,
    pub values: usize,
    pub skipped_rows: usize,
}

impl std::fmt::Display for LoadStats {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "{} file(s), {} value(s), {} row(s) skipped",
            self.files, self.values, self.skipped_rows
        )
    }
}

impl MonthlySeries {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, month: Month, label: &str, value: f64) {
        self.values
            .entry(month)
            .or_default()
            .insert(normalize_label(label), value);
    }

    pub fn with(mut self, date: NaiveDate, label: &str, value: f64) -> Self {
        self.insert(Month::of(date), label, value);
        self
    }

    pub fn get(&self, month: Month, label: &str) -> Option<f64> {
        self.values.get(&month)?.get(&normalize_label(label)).copied()
    }

    pub fn len(&self) -> usize {
        self.values.values().map(BTreeMap::len).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Load every `*.csv` file under `dir`. Later files overwrite earlier ones
    /// for the same (month, label).
    pub fn load_dir(dir: &Path) -> ProviderResult<(Self, LoadStats)> {
        let mut series = Self::new();
        let mut stats = LoadStats::default();

        let mut paths: Vec<_> = WalkDir::new(dir)
            .follow_links(true)
            .into_iter()
            .filter_map(|e| e.ok())
            .map(|e| e.into_path())
            .filter(|p| p.extension().is_some_and(|ext| ext.eq_ignore_ascii_case("csv")))
            .collect();
        paths.sort();

        for path in paths {
            let content = fs::read_to_string(&path)?;
            series.load_csv_str(&content, &mut stats).map_err(|detail| {
                ProviderError::Malformed {
                    what: path.display().to_string(),
                    detail,
                }
            })?;
            stats.files += 1;
            debug!(path = %path.display(), "loaded time series file");
        }
        Ok((series, stats))
    }

    fn load_csv_str(&mut self, content: &str, stats: &mut LoadStats) -> Result<(), String> {
        let mut lines = content
            .lines()
            .filter(|l| !l.trim().is_empty() && !l.trim_start().starts_with('#'));
        let Some(header) = lines.next() else {
            return Ok(());
        };
        let columns: Vec<&str> = header.split(',').map(str::trim).collect();
        if columns.len() < 2 {
            return Err("header needs a date column and at least one metric".to_string());
        }

        for line in lines {
            let cells: Vec<&str> = line.split(',').map(str::trim).collect();
            let Some(month) = cells.first().and_then(|c| parse_month_cell(c)) else {
                warn!(row = line, "skipping row without a recognisable date");
                stats.skipped_rows += 1;
                continue;
            };
            for (label, cell) in columns.iter().zip(cells.iter()).skip(1) {
                if cell.is_empty() {
                    continue;
                }
                match cell.replace(' ', "").parse::<f64>() {
                    Ok(v) if v.is_finite() => {
                        self.insert(month, label, v);
                        stats.values += 1;
                    }
                    _ => return Err(format!("non-numeric value '{cell}' for '{label}' in {month}")),
                }
            }
        }
        Ok(())
    }
}

impl TimeSeriesProvider for MonthlySeries {
    fn get_monthly_value(&self, date: NaiveDate, metric_label: &str) -> ProviderResult<Option<f64>> {
        Ok(self.get(Month::of(date), metric_label))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn date(y: i32, m: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, 28).unwrap()
    }

    #[test]
    fn labels_normalise_punctuation_and_case() {
        assert_eq!(normalize_label("Tonnes_Milled"), "tonnes milled");
        assert_eq!(normalize_label("  Dust-Suppression (m3) "), "dust suppression m3");
    }

    #[test]
    fn month_cells_in_common_formats() {
        let jan = Some(Month { year: 2025, month: 1 });
        assert_eq!(parse_month_cell("2025-01-31"), jan);
        assert_eq!(parse_month_cell("2025-01"), jan);
        assert_eq!(parse_month_cell("Jan-25"), jan);
        assert_eq!(parse_month_cell("January 2025"), jan);
        assert_eq!(parse_month_cell("2025-13"), None);
        assert_eq!(parse_month_cell("total"), None);
    }

    #[test]
    fn explicit_zero_differs_from_absence() {
        let series = MonthlySeries::new().with(date(2025, 1), "BH1", 0.0);
        assert_eq!(series.get_monthly_value(date(2025, 1), "bh1").unwrap(), Some(0.0));
        assert_eq!(series.get_monthly_value(date(2025, 2), "bh1").unwrap(), None);
    }

    #[test]
    fn csv_blank_cells_are_absent() {
        let mut series = MonthlySeries::new();
        let mut stats = LoadStats::default();
        let csv = "Date,Tonnes Milled,Discharge\n2025-01,350000,\nnot a date,1,2\nFeb-25,0,120\n";
        series.load_csv_str(csv, &mut stats).unwrap();
        assert_eq!(stats.values, 3);
        assert_eq!(stats.skipped_rows, 1);
        assert_eq!(series.get(Month { year: 2025, month: 1 }, labels::DISCHARGE), None);
        assert_eq!(series.get(Month { year: 2025, month: 2 }, labels::ORE_TONNES_MILLED), Some(0.0));
    }

    #[test]
    fn csv_rejects_non_numeric_cells() {
        let mut series = MonthlySeries::new();
        let mut stats = LoadStats::default();
        let err = series
            .load_csv_str("Date,Discharge\n2025-01,lots\n", &mut stats)
            .unwrap_err();
        assert!(err.contains("lots"));
    }

    #[test]
    fn load_dir_reads_nested_csv_files() {
        let dir = tempfile::tempdir().expect("create temp dir");
        let nested = dir.path().join("plant");
        fs::create_dir_all(&nested).unwrap();
        fs::write(dir.path().join("flows.csv"), "Month,BH1\n2025-03,1200\n").unwrap();
        fs::write(nested.join("plant.CSV"), "Month,Tonnes Milled\nMar-25,410000\n").unwrap();
        fs::write(dir.path().join("notes.txt"), "ignored").unwrap();

        let (series, stats) = MonthlySeries::load_dir(dir.path()).unwrap();
        assert_eq!(stats.files, 2);
        assert_eq!(series.get(Month { year: 2025, month: 3 }, "bh1"), Some(1200.0));
        assert_eq!(
            series.get(Month { year: 2025, month: 3 }, labels::ORE_TONNES_MILLED),
            Some(410_000.0)
        );
    }
}
