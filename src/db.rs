//! Database schema and operations

use std::path::Path;

use chrono::{NaiveDate, Utc};
use parking_lot::Mutex;
use rusqlite::types::Type;
use rusqlite::{Connection, OptionalExtension, Row, params};

use crate::balance::BalanceResult;
use crate::error::ProviderError;
use crate::models::{
    CalcId, FacilityMetric, ManualMonthlyInputs, Month, OpeningSnapshot, SourceType,
    StorageFacility, TransferEvent, VolumeBatch, WaterSource,
};
use crate::provider::{ProviderResult, Repository};

/// Initialize the database schema
pub fn init_schema(conn: &Connection) -> rusqlite::Result<()> {
    conn.execute_batch(
        r#"
        CREATE TABLE IF NOT EXISTS water_sources (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            code TEXT NOT NULL UNIQUE,
            name TEXT NOT NULL,
            source_type TEXT NOT NULL,
            average_flow_rate REAL NOT NULL DEFAULT 0,
            reliability_factor REAL NOT NULL DEFAULT 1,
            authorized_volume REAL,
            metric_label TEXT,
            active INTEGER NOT NULL DEFAULT 1
        );

        CREATE TABLE IF NOT EXISTS storage_facilities (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            code TEXT NOT NULL UNIQUE,
            name TEXT NOT NULL,
            total_capacity REAL NOT NULL,
            surface_area REAL NOT NULL DEFAULT 0,
            current_volume REAL NOT NULL DEFAULT 0,
            pump_start_level REAL NOT NULL DEFAULT 70,
            pump_stop_level REAL NOT NULL DEFAULT 30,
            high_level_alarm REAL NOT NULL DEFAULT 90,
            feeds_to TEXT,
            group_key TEXT,
            evaporation_active INTEGER NOT NULL DEFAULT 1,
            is_lined INTEGER NOT NULL DEFAULT 0,
            aquifer_gain_rate_pct REAL NOT NULL DEFAULT 0
        );

        -- Site-level manual entries, one row per month
        CREATE TABLE IF NOT EXISTS manual_monthly_inputs (
            year INTEGER NOT NULL,
            month INTEGER NOT NULL,
            discharge_m3 REAL,
            mining_consumption_m3 REAL,
            domestic_consumption_m3 REAL,
            tailings_moisture_pct REAL,
            tsf_return_m3 REAL,
            PRIMARY KEY (year, month)
        );

        CREATE TABLE IF NOT EXISTS regional_climate (
            year INTEGER NOT NULL,
            month INTEGER NOT NULL,
            rainfall_mm REAL,
            evaporation_mm REAL,
            PRIMARY KEY (year, month)
        );

        CREATE TABLE IF NOT EXISTS facility_monthly_metrics (
            facility_id INTEGER NOT NULL,
            metric TEXT NOT NULL,
            year INTEGER NOT NULL,
            month INTEGER NOT NULL,
            value REAL NOT NULL,
            PRIMARY KEY (facility_id, metric, year, month)
        );

        CREATE TABLE IF NOT EXISTS opening_snapshots (
            calc_date TEXT NOT NULL,
            facility_code TEXT NOT NULL,
            opening_volume REAL NOT NULL,
            PRIMARY KEY (calc_date, facility_code)
        );

        -- Audit log; one row per (date, source, dest) at most
        CREATE TABLE IF NOT EXISTS transfer_events (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            calc_date TEXT NOT NULL,
            source_code TEXT NOT NULL,
            dest_code TEXT NOT NULL,
            volume REAL NOT NULL,
            recorded_at TEXT NOT NULL,
            UNIQUE (calc_date, source_code, dest_code)
        );

        CREATE TABLE IF NOT EXISTS constants (
            name TEXT PRIMARY KEY,
            value REAL NOT NULL
        );

        CREATE TABLE IF NOT EXISTS calculations (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            calc_date TEXT NOT NULL,
            ore_tonnes REAL,
            notes TEXT,
            result_json TEXT NOT NULL,
            created_at TEXT NOT NULL
        );

        CREATE INDEX IF NOT EXISTS idx_calculations_date ON calculations(calc_date);
        CREATE INDEX IF NOT EXISTS idx_transfer_events_date ON transfer_events(calc_date);
        "#,
    )
}

/// SQLite-backed repository.
///
/// The connection sits behind a mutex so the repository can be shared across
/// threads; every multi-row mutation runs inside one SQLite transaction.
pub struct SqliteRepository {
    conn: Mutex<Connection>,
}

impl SqliteRepository {
    pub fn open(path: &Path) -> ProviderResult<Self> {
        let conn = Connection::open(path)?;
        Self::from_connection(conn)
    }

    /// Open an in-memory database (used in tests).
    pub fn in_memory() -> ProviderResult<Self> {
        Self::from_connection(Connection::open_in_memory()?)
    }

    fn from_connection(conn: Connection) -> ProviderResult<Self> {
        conn.execute_batch("PRAGMA foreign_keys=ON;")?;
        init_schema(&conn)?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    /// Insert or replace a water source by code
    pub fn upsert_water_source(&self, source: &WaterSource) -> ProviderResult<()> {
        self.conn.lock().execute(
            "INSERT INTO water_sources (code, name, source_type, average_flow_rate, reliability_factor,
                                        authorized_volume, metric_label, active)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)
             ON CONFLICT(code) DO UPDATE SET
                name = excluded.name, source_type = excluded.source_type,
                average_flow_rate = excluded.average_flow_rate,
                reliability_factor = excluded.reliability_factor,
                authorized_volume = excluded.authorized_volume,
                metric_label = excluded.metric_label, active = excluded.active",
            params![
                source.code,
                source.name,
                source.source_type.as_str(),
                source.average_flow_rate,
                source.reliability_factor,
                source.authorized_volume,
                source.metric_label,
                source.active,
            ],
        )?;
        Ok(())
    }

    /// Insert or replace a storage facility by code
    pub fn upsert_storage_facility(&self, facility: &StorageFacility) -> ProviderResult<()> {
        self.conn.lock().execute(
            "INSERT INTO storage_facilities (code, name, total_capacity, surface_area, current_volume,
                                             pump_start_level, pump_stop_level, high_level_alarm,
                                             feeds_to, group_key, evaporation_active, is_lined,
                                             aquifer_gain_rate_pct)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13)
             ON CONFLICT(code) DO UPDATE SET
                name = excluded.name, total_capacity = excluded.total_capacity,
                surface_area = excluded.surface_area, current_volume = excluded.current_volume,
                pump_start_level = excluded.pump_start_level,
                pump_stop_level = excluded.pump_stop_level,
                high_level_alarm = excluded.high_level_alarm, feeds_to = excluded.feeds_to,
                group_key = excluded.group_key, evaporation_active = excluded.evaporation_active,
                is_lined = excluded.is_lined, aquifer_gain_rate_pct = excluded.aquifer_gain_rate_pct",
            params![
                facility.code,
                facility.name,
                facility.total_capacity,
                facility.surface_area,
                facility.current_volume,
                facility.pump_start_level,
                facility.pump_stop_level,
                facility.high_level_alarm,
                facility.feeds_to,
                facility.group_key,
                facility.evaporation_active,
                facility.is_lined,
                facility.aquifer_gain_rate_pct,
            ],
        )?;
        Ok(())
    }

    pub fn set_manual_monthly_inputs(
        &self,
        month: Month,
        inputs: &ManualMonthlyInputs,
    ) -> ProviderResult<()> {
        self.conn.lock().execute(
            "INSERT OR REPLACE INTO manual_monthly_inputs
                (year, month, discharge_m3, mining_consumption_m3, domestic_consumption_m3,
                 tailings_moisture_pct, tsf_return_m3)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
            params![
                month.year,
                month.month,
                inputs.discharge_m3,
                inputs.mining_consumption_m3,
                inputs.domestic_consumption_m3,
                inputs.tailings_moisture_pct,
                inputs.tsf_return_m3,
            ],
        )?;
        Ok(())
    }

    pub fn set_regional_climate(
        &self,
        month: Month,
        rainfall_mm: Option<f64>,
        evaporation_mm: Option<f64>,
    ) -> ProviderResult<()> {
        self.conn.lock().execute(
            "INSERT OR REPLACE INTO regional_climate (year, month, rainfall_mm, evaporation_mm)
             VALUES (?1, ?2, ?3, ?4)",
            params![month.year, month.month, rainfall_mm, evaporation_mm],
        )?;
        Ok(())
    }

    pub fn set_facility_metric(
        &self,
        facility_id: i64,
        metric: FacilityMetric,
        month: Month,
        value: f64,
    ) -> ProviderResult<()> {
        self.conn.lock().execute(
            "INSERT OR REPLACE INTO facility_monthly_metrics (facility_id, metric, year, month, value)
             VALUES (?1, ?2, ?3, ?4, ?5)",
            params![facility_id, metric.as_str(), month.year, month.month, value],
        )?;
        Ok(())
    }

    pub fn set_constant(&self, name: &str, value: f64) -> ProviderResult<()> {
        self.conn.lock().execute(
            "INSERT OR REPLACE INTO constants (name, value) VALUES (?1, ?2)",
            params![name, value],
        )?;
        Ok(())
    }

    /// Remove all site data, keeping saved calculations.
    pub fn clear_site_data(&self) -> ProviderResult<()> {
        self.conn.lock().execute_batch(
            r#"
            DELETE FROM transfer_events;
            DELETE FROM opening_snapshots;
            DELETE FROM facility_monthly_metrics;
            DELETE FROM storage_facilities;
            DELETE FROM water_sources;
            DELETE FROM manual_monthly_inputs;
            DELETE FROM regional_climate;
            DELETE FROM constants;
            "#,
        )?;
        Ok(())
    }

    pub fn facility(&self, code: &str) -> ProviderResult<Option<StorageFacility>> {
        Ok(self
            .list_storage_facilities()?
            .into_iter()
            .find(|f| f.code == code))
    }

    fn optional_f64(&self, sql: &str, month: Month) -> ProviderResult<Option<f64>> {
        let value = self
            .conn
            .lock()
            .query_row(sql, params![month.year, month.month], |row| {
                row.get::<_, Option<f64>>(0)
            })
            .optional()?;
        Ok(value.flatten())
    }
}

fn facility_from_row(row: &Row<'_>) -> rusqlite::Result<StorageFacility> {
    Ok(StorageFacility {
        id: row.get(0)?,
        code: row.get(1)?,
        name: row.get(2)?,
        total_capacity: row.get(3)?,
        surface_area: row.get(4)?,
        current_volume: row.get(5)?,
        pump_start_level: row.get(6)?,
        pump_stop_level: row.get(7)?,
        high_level_alarm: row.get(8)?,
        feeds_to: row.get(9)?,
        group_key: row.get(10)?,
        evaporation_active: row.get(11)?,
        is_lined: row.get(12)?,
        aquifer_gain_rate_pct: row.get(13)?,
    })
}

fn source_from_row(row: &Row<'_>) -> rusqlite::Result<WaterSource> {
    let source_type: String = row.get(3)?;
    let source_type = source_type
        .parse::<SourceType>()
        .map_err(|e| rusqlite::Error::FromSqlConversionFailure(3, Type::Text, e.into()))?;
    Ok(WaterSource {
        id: row.get(0)?,
        code: row.get(1)?,
        name: row.get(2)?,
        source_type,
        average_flow_rate: row.get(4)?,
        reliability_factor: row.get(5)?,
        authorized_volume: row.get(6)?,
        metric_label: row.get(7)?,
        active: row.get(8)?,
    })
}

fn event_from_row(row: &Row<'_>) -> rusqlite::Result<TransferEvent> {
    Ok(TransferEvent {
        calc_date: row.get(0)?,
        source_code: row.get(1)?,
        dest_code: row.get(2)?,
        volume: row.get(3)?,
        recorded_at: row.get(4)?,
    })
}

impl Repository for SqliteRepository {
    fn list_active_water_sources(&self) -> ProviderResult<Vec<WaterSource>> {
        let conn = self.conn.lock();
        let mut stmt = conn.prepare(
            "SELECT id, code, name, source_type, average_flow_rate, reliability_factor,
                    authorized_volume, metric_label, active
             FROM water_sources WHERE active = 1 ORDER BY code",
        )?;
        let rows = stmt.query_map([], source_from_row)?;
        Ok(rows.collect::<Result<Vec<_>, _>>()?)
    }

    fn list_storage_facilities(&self) -> ProviderResult<Vec<StorageFacility>> {
        let conn = self.conn.lock();
        let mut stmt = conn.prepare(
            "SELECT id, code, name, total_capacity, surface_area, current_volume,
                    pump_start_level, pump_stop_level, high_level_alarm, feeds_to, group_key,
                    evaporation_active, is_lined, aquifer_gain_rate_pct
             FROM storage_facilities ORDER BY code",
        )?;
        let rows = stmt.query_map([], facility_from_row)?;
        Ok(rows.collect::<Result<Vec<_>, _>>()?)
    }

    fn get_manual_monthly_inputs(&self, month: Month) -> ProviderResult<ManualMonthlyInputs> {
        let inputs = self
            .conn
            .lock()
            .query_row(
                "SELECT discharge_m3, mining_consumption_m3, domestic_consumption_m3,
                        tailings_moisture_pct, tsf_return_m3
                 FROM manual_monthly_inputs WHERE year = ?1 AND month = ?2",
                params![month.year, month.month],
                |row| {
                    Ok(ManualMonthlyInputs {
                        discharge_m3: row.get(0)?,
                        mining_consumption_m3: row.get(1)?,
                        domestic_consumption_m3: row.get(2)?,
                        tailings_moisture_pct: row.get(3)?,
                        tsf_return_m3: row.get(4)?,
                    })
                },
            )
            .optional()?;
        Ok(inputs.unwrap_or_default())
    }

    fn get_regional_rainfall_mm(&self, month: Month) -> ProviderResult<Option<f64>> {
        self.optional_f64(
            "SELECT rainfall_mm FROM regional_climate WHERE year = ?1 AND month = ?2",
            month,
        )
    }

    fn get_regional_evaporation_mm(&self, month: Month) -> ProviderResult<Option<f64>> {
        self.optional_f64(
            "SELECT evaporation_mm FROM regional_climate WHERE year = ?1 AND month = ?2",
            month,
        )
    }

    fn get_facility_metric_monthly(
        &self,
        facility_id: i64,
        metric: FacilityMetric,
        month: Month,
    ) -> ProviderResult<Option<f64>> {
        let value = self
            .conn
            .lock()
            .query_row(
                "SELECT value FROM facility_monthly_metrics
                 WHERE facility_id = ?1 AND metric = ?2 AND year = ?3 AND month = ?4",
                params![facility_id, metric.as_str(), month.year, month.month],
                |row| row.get(0),
            )
            .optional()?;
        Ok(value)
    }

    fn get_opening_snapshot(&self, date: NaiveDate) -> ProviderResult<Option<OpeningSnapshot>> {
        let conn = self.conn.lock();
        let mut stmt = conn.prepare(
            "SELECT facility_code, opening_volume FROM opening_snapshots WHERE calc_date = ?1",
        )?;
        let rows = stmt.query_map(params![date], |row| {
            Ok((row.get::<_, String>(0)?, row.get::<_, f64>(1)?))
        })?;
        let snapshot = rows.collect::<Result<OpeningSnapshot, _>>()?;
        Ok((!snapshot.is_empty()).then_some(snapshot))
    }

    fn save_opening_snapshot(
        &self,
        date: NaiveDate,
        snapshot: &OpeningSnapshot,
    ) -> ProviderResult<()> {
        let mut conn = self.conn.lock();
        let tx = conn.transaction()?;
        for (code, volume) in snapshot {
            tx.execute(
                "INSERT OR IGNORE INTO opening_snapshots (calc_date, facility_code, opening_volume)
                 VALUES (?1, ?2, ?3)",
                params![date, code, volume],
            )?;
        }
        tx.commit()?;
        Ok(())
    }

    fn has_transfer_event(
        &self,
        date: NaiveDate,
        source_code: &str,
        dest_code: &str,
    ) -> ProviderResult<bool> {
        let found: Option<i64> = self
            .conn
            .lock()
            .query_row(
                "SELECT id FROM transfer_events
                 WHERE calc_date = ?1 AND source_code = ?2 AND dest_code = ?3",
                params![date, source_code, dest_code],
                |row| row.get(0),
            )
            .optional()?;
        Ok(found.is_some())
    }

    fn record_transfer_event(&self, event: &TransferEvent) -> ProviderResult<()> {
        self.commit_volume_batch(&VolumeBatch {
            volumes: Default::default(),
            events: vec![event.clone()],
        })
    }

    fn list_transfer_events(&self, date: NaiveDate) -> ProviderResult<Vec<TransferEvent>> {
        let conn = self.conn.lock();
        let mut stmt = conn.prepare(
            "SELECT calc_date, source_code, dest_code, volume, recorded_at
             FROM transfer_events WHERE calc_date = ?1 ORDER BY id",
        )?;
        let rows = stmt.query_map(params![date], event_from_row)?;
        Ok(rows.collect::<Result<Vec<_>, _>>()?)
    }

    fn update_facility_volume(&self, code: &str, volume: f64) -> ProviderResult<()> {
        self.commit_volume_batch(&VolumeBatch {
            volumes: [(code.to_string(), volume)].into_iter().collect(),
            events: Vec::new(),
        })
    }

    fn commit_volume_batch(&self, batch: &VolumeBatch) -> ProviderResult<()> {
        let mut conn = self.conn.lock();
        // Dropping the transaction without commit rolls everything back
        let tx = conn.transaction()?;
        for (code, volume) in &batch.volumes {
            let changed = tx.execute(
                "UPDATE storage_facilities SET current_volume = ?1 WHERE code = ?2",
                params![volume, code],
            )?;
            if changed == 0 {
                return Err(ProviderError::UnknownFacility(code.clone()));
            }
        }
        for event in &batch.events {
            let exists: Option<i64> = tx
                .query_row(
                    "SELECT id FROM transfer_events
                     WHERE calc_date = ?1 AND source_code = ?2 AND dest_code = ?3",
                    params![event.calc_date, event.source_code, event.dest_code],
                    |row| row.get(0),
                )
                .optional()?;
            if exists.is_some() {
                return Err(ProviderError::DuplicateTransfer {
                    date: event.calc_date,
                    source_code: event.source_code.clone(),
                    dest_code: event.dest_code.clone(),
                });
            }
            tx.execute(
                "INSERT INTO transfer_events (calc_date, source_code, dest_code, volume, recorded_at)
                 VALUES (?1, ?2, ?3, ?4, ?5)",
                params![
                    event.calc_date,
                    event.source_code,
                    event.dest_code,
                    event.volume,
                    event.recorded_at,
                ],
            )?;
        }
        tx.commit()?;
        Ok(())
    }

    fn get_constant(&self, name: &str) -> ProviderResult<Option<f64>> {
        let value = self
            .conn
            .lock()
            .query_row(
                "SELECT value FROM constants WHERE name = ?1",
                params![name],
                |row| row.get(0),
            )
            .optional()?;
        Ok(value)
    }

    fn find_calculation(
        &self,
        date: NaiveDate,
        ore_tonnes: Option<f64>,
    ) -> ProviderResult<Option<CalcId>> {
        let id: Option<i64> = self
            .conn
            .lock()
            .query_row(
                "SELECT id FROM calculations WHERE calc_date = ?1 AND ore_tonnes IS ?2
                 ORDER BY id DESC LIMIT 1",
                params![date, ore_tonnes],
                |row| row.get(0),
            )
            .optional()?;
        Ok(id.map(CalcId))
    }

    fn load_calculation(&self, id: CalcId) -> ProviderResult<Option<BalanceResult>> {
        let json: Option<String> = self
            .conn
            .lock()
            .query_row(
                "SELECT result_json FROM calculations WHERE id = ?1",
                params![id.0],
                |row| row.get(0),
            )
            .optional()?;
        match json {
            Some(json) => Ok(Some(serde_json::from_str(&json)?)),
            None => Ok(None),
        }
    }

    fn save_calculation(
        &self,
        result: &BalanceResult,
        ore_tonnes: Option<f64>,
        notes: Option<&str>,
    ) -> ProviderResult<CalcId> {
        let json = serde_json::to_string(result)?;
        let conn = self.conn.lock();
        conn.execute(
            "INSERT INTO calculations (calc_date, ore_tonnes, notes, result_json, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5)",
            params![result.calculation_date, ore_tonnes, notes, json, Utc::now()],
        )?;
        Ok(CalcId(conn.last_insert_rowid()))
    }

    fn delete_calculation(&self, id: CalcId) -> ProviderResult<()> {
        self.conn
            .lock()
            .execute("DELETE FROM calculations WHERE id = ?1", params![id.0])?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn facility(code: &str, volume: f64) -> StorageFacility {
        StorageFacility {
            id: 0,
            code: code.to_string(),
            name: format!("{code} dam"),
            total_capacity: 100_000.0,
            surface_area: 20_000.0,
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

    fn date() -> NaiveDate {
        NaiveDate::from_ymd_opt(2025, 1, 31).unwrap()
    }

    fn event(source: &str, dest: &str) -> TransferEvent {
        TransferEvent {
            calc_date: date(),
            source_code: source.to_string(),
            dest_code: dest.to_string(),
            volume: 100.0,
            recorded_at: Utc::now(),
        }
    }

    #[test]
    fn facilities_round_trip_in_code_order() {
        let repo = SqliteRepository::in_memory().unwrap();
        repo.upsert_storage_facility(&facility("TSF", 10.0)).unwrap();
        repo.upsert_storage_facility(&facility("PCD", 20.0)).unwrap();
        let facilities = repo.list_storage_facilities().unwrap();
        let codes: Vec<_> = facilities.iter().map(|f| f.code.as_str()).collect();
        assert_eq!(codes, ["PCD", "TSF"]);
        assert_eq!(facilities[1].current_volume, 10.0);
    }

    #[test]
    fn failed_batch_rolls_back_every_update() {
        let repo = SqliteRepository::in_memory().unwrap();
        repo.upsert_storage_facility(&facility("A", 1_000.0)).unwrap();
        repo.upsert_storage_facility(&facility("B", 2_000.0)).unwrap();
        repo.record_transfer_event(&event("A", "B")).unwrap();

        let mut batch = VolumeBatch::default();
        batch.volumes.insert("A".to_string(), 900.0);
        batch.volumes.insert("B".to_string(), 2_100.0);
        batch.events.push(event("A", "B"));
        let err = repo.commit_volume_batch(&batch).unwrap_err();
        assert!(matches!(err, ProviderError::DuplicateTransfer { .. }));

        assert_eq!(repo.facility("A").unwrap().unwrap().current_volume, 1_000.0);
        assert_eq!(repo.facility("B").unwrap().unwrap().current_volume, 2_000.0);
        assert_eq!(repo.list_transfer_events(date()).unwrap().len(), 1);
    }

    #[test]
    fn unknown_facility_aborts_batch() {
        let repo = SqliteRepository::in_memory().unwrap();
        repo.upsert_storage_facility(&facility("A", 1_000.0)).unwrap();
        let mut batch = VolumeBatch::default();
        batch.volumes.insert("A".to_string(), 0.0);
        batch.volumes.insert("ZZ".to_string(), 5.0);
        assert!(matches!(
            repo.commit_volume_batch(&batch),
            Err(ProviderError::UnknownFacility(code)) if code == "ZZ"
        ));
        assert_eq!(repo.facility("A").unwrap().unwrap().current_volume, 1_000.0);
    }

    #[test]
    fn snapshot_is_written_once() {
        let repo = SqliteRepository::in_memory().unwrap();
        assert!(repo.get_opening_snapshot(date()).unwrap().is_none());
        let first: OpeningSnapshot = [("A".to_string(), 10.0)].into_iter().collect();
        let second: OpeningSnapshot = [("A".to_string(), 99.0)].into_iter().collect();
        repo.save_opening_snapshot(date(), &first).unwrap();
        repo.save_opening_snapshot(date(), &second).unwrap();
        assert_eq!(repo.get_opening_snapshot(date()).unwrap(), Some(first));
    }

    #[test]
    fn manual_inputs_default_when_missing() {
        let repo = SqliteRepository::in_memory().unwrap();
        let month = Month::of(date());
        assert_eq!(repo.get_manual_monthly_inputs(month).unwrap(), ManualMonthlyInputs::default());
        let inputs = ManualMonthlyInputs {
            discharge_m3: Some(0.0),
            ..Default::default()
        };
        repo.set_manual_monthly_inputs(month, &inputs).unwrap();
        assert_eq!(repo.get_manual_monthly_inputs(month).unwrap().discharge_m3, Some(0.0));
    }

    #[test]
    fn unknown_source_type_is_a_conversion_error() {
        let repo = SqliteRepository::in_memory().unwrap();
        repo.conn
            .lock()
            .execute(
                "INSERT INTO water_sources (code, name, source_type) VALUES ('X', 'X', 'lake')",
                [],
            )
            .unwrap();
        assert!(matches!(
            repo.list_active_water_sources(),
            Err(ProviderError::Sqlite(rusqlite::Error::FromSqlConversionFailure(..)))
        ));
    }
}
