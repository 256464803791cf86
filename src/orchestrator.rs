//! Sequences one balance calculation and memoizes its result.
//!
//! Plant consumption and the fresh water available to the plant depend on
//! each other. The cycle is broken with two outflow passes: a preliminary
//! estimate-mode pass yields the auxiliary uses, fresh water to the plant is
//! what remains of the fresh inflows, and the final pass runs in mass-balance
//! mode on that figure.
//!
//! Facility volumes are always computed from the opening snapshot of the
//! date plus the transfers recorded for it, never from the stored current
//! volume, so recomputing a date yields the same result however often the
//! volumes were touched since.
//!
//! Snapshot capture and transfer application are date-scoped writes shared
//! by every ore-tonnes variant of a date; they run under a per-date lock.

use std::collections::BTreeMap;
use std::sync::Arc;

use chrono::NaiveDate;
use parking_lot::RwLock;
use tracing::{debug, info, warn};

use crate::balance::{AppliedTransfer, BalanceResult, BalanceWarning, FacilityResult, StorageChange};
use crate::cache::{BalanceCache, CacheKey, CacheListener, KeyedLocks};
use crate::closure::ClosureEvaluator;
use crate::constants::Constants;
use crate::error::Result;
use crate::facility::FacilityBalanceEngine;
use crate::inflows::{InflowAggregator, backfill_tsf_return, resolve_ore_tonnes};
use crate::kpi::KpiReport;
use crate::models::{Month, OpeningSnapshot, StorageFacility, TransferEvent};
use crate::outflows::OutflowAggregator;
use crate::provider::{Repository, TimeSeriesProvider};
use crate::transfers::{NetTransfer, PumpTransferEngine, TransferScope, net_transfers};

/// Behaviour switches for the orchestrator.
#[derive(Debug, Clone, PartialEq)]
pub struct EngineOptions {
    pub auto_apply_transfers: bool,
    pub transfer_scope: TransferScope,
    /// Two saved results closer than this (m³) are the same calculation.
    pub duplicate_tolerance_m3: f64,
    pub constant_overrides: BTreeMap<String, f64>,
}

impl Default for EngineOptions {
    fn default() -> Self {
        Self {
            auto_apply_transfers: true,
            transfer_scope: TransferScope::Global,
            duplicate_tolerance_m3: 0.01,
            constant_overrides: BTreeMap::new(),
        }
    }
}

pub struct BalanceOrchestrator {
    repo: Arc<dyn Repository>,
    series: Arc<dyn TimeSeriesProvider>,
    constants: RwLock<Constants>,
    options: EngineOptions,
    cache: BalanceCache,
    date_locks: KeyedLocks<NaiveDate>,
}

impl BalanceOrchestrator {
    pub fn new(
        repo: Arc<dyn Repository>,
        series: Arc<dyn TimeSeriesProvider>,
        options: EngineOptions,
    ) -> Result<Self> {
        Self::with_cache(repo, series, options, BalanceCache::new())
    }

    pub fn with_cache(
        repo: Arc<dyn Repository>,
        series: Arc<dyn TimeSeriesProvider>,
        options: EngineOptions,
        cache: BalanceCache,
    ) -> Result<Self> {
        let constants = Constants::load(repo.as_ref(), options.constant_overrides.clone())?;
        Ok(Self {
            repo,
            series,
            constants: RwLock::new(constants),
            options,
            cache,
            date_locks: KeyedLocks::default(),
        })
    }

    pub fn repository(&self) -> &dyn Repository {
        self.repo.as_ref()
    }

    pub fn options(&self) -> &EngineOptions {
        &self.options
    }

    pub fn constants(&self) -> Constants {
        self.constants.read().clone()
    }

    pub fn cache(&self) -> &BalanceCache {
        &self.cache
    }

    /// Balance for `date`, computed at most once per (date, ore tonnes) until
    /// the date is invalidated.
    pub fn calculate(&self, date: NaiveDate, ore_tonnes: Option<f64>) -> Result<Arc<BalanceResult>> {
        self.cache
            .get_or_compute(CacheKey::new(date, ore_tonnes), || self.compute(date, ore_tonnes))
    }

    /// Drop any cached result for `date` and calculate again.
    pub fn recalculate(&self, date: NaiveDate, ore_tonnes: Option<f64>) -> Result<Arc<BalanceResult>> {
        self.cache.invalidate(Some(date));
        self.calculate(date, ore_tonnes)
    }

    pub fn calculate_kpis(&self, date: NaiveDate, ore_tonnes: Option<f64>) -> Result<KpiReport> {
        let result = self.calculate(date, ore_tonnes)?;
        Ok(KpiReport::from_result(&result))
    }

    pub fn invalidate_cache(&self, date: Option<NaiveDate>) {
        self.cache.invalidate(date);
    }

    pub fn register_cache_listener(&self, listener: CacheListener) {
        self.cache.register_listener(listener);
    }

    /// Re-read constants from the repository. Every cached result is dropped
    /// since any of them may depend on a changed value.
    pub fn reload_constants(&self) -> Result<()> {
        let version = {
            let mut constants = self.constants.write();
            constants.reload(self.repo.as_ref())?;
            constants.version()
        };
        info!(version, "constants reloaded");
        self.cache.invalidate(None);
        Ok(())
    }

    /// Opening volumes for `date`, captured from the stored volumes on the
    /// first call for that date.
    pub fn opening_volumes(&self, date: NaiveDate) -> Result<OpeningSnapshot> {
        self.date_locks.with(date, || self.capture_opening(date))
    }

    /// Caller holds the date lock.
    fn capture_opening(&self, date: NaiveDate) -> Result<OpeningSnapshot> {
        if let Some(snapshot) = self.repo.get_opening_snapshot(date)? {
            return Ok(snapshot);
        }
        let captured: OpeningSnapshot = self
            .repo
            .list_storage_facilities()?
            .into_iter()
            .map(|f| (f.code, f.current_volume))
            .collect();
        self.repo.save_opening_snapshot(date, &captured)?;
        // Another writer of the same store may have won the insert
        let snapshot = self.repo.get_opening_snapshot(date)?.unwrap_or(captured);
        debug!(%date, facilities = snapshot.len(), "captured opening snapshot");
        Ok(snapshot)
    }

    /// Opening snapshot and the transfer events of `date`, applying any
    /// transfers due first.
    fn settle_transfers(
        &self,
        date: NaiveDate,
        constants: &Constants,
        preliminary_opening: impl FnOnce(&[StorageFacility]) -> Result<()>,
    ) -> Result<(OpeningSnapshot, Vec<StorageFacility>, Vec<TransferEvent>)> {
        self.date_locks.with(date, || {
            let repo = self.repo.as_ref();
            let snapshot = self.capture_opening(date)?;
            let facilities = repo.list_storage_facilities()?;
            let recorded = net_transfers(&repo.list_transfer_events(date)?);
            let opening = effective_volumes(&facilities, &snapshot, &recorded);
            preliminary_opening(&opening)?;

            if self.options.auto_apply_transfers && !self.options.transfer_scope.is_disabled() {
                let engine = PumpTransferEngine::new(repo, constants);
                let plan = engine.plan(date, &opening, &self.options.transfer_scope)?;
                for (source, dest) in &plan.already_applied {
                    debug!(%source, %dest, %date, "skipped transfer already in the audit log");
                }
                engine.apply(date, &plan.transfers)?;
            }

            let events = repo.list_transfer_events(date)?;
            Ok((snapshot, facilities, events))
        })
    }

    fn compute(&self, date: NaiveDate, ore_tonnes: Option<f64>) -> Result<BalanceResult> {
        let constants = self.constants.read().clone();
        let repo = self.repo.as_ref();
        let series = self.series.as_ref();
        let month = Month::of(date);

        let ore = resolve_ore_tonnes(series, date, ore_tonnes)?;
        let inflows = InflowAggregator::new(repo, series, &constants).aggregate(date, ore_tonnes)?;
        let fresh_inflows = inflows.fresh_total();

        let outflow_aggregator = OutflowAggregator::new(repo, series, &constants);
        let mut fresh_water_to_plant = 0.0;
        let (snapshot, facilities, events) = self.settle_transfers(date, &constants, |opening| {
            let preliminary = outflow_aggregator.aggregate_with_facilities(date, ore_tonnes, None, opening)?;
            fresh_water_to_plant = (fresh_inflows - preliminary.auxiliary_uses()).max(0.0);
            Ok(())
        })?;
        let net = net_transfers(&events);
        let balanced = effective_volumes(&facilities, &snapshot, &net);

        let outflows =
            outflow_aggregator.aggregate_with_facilities(date, ore_tonnes, Some(fresh_water_to_plant), &balanced)?;
        let inflows = backfill_tsf_return(inflows, outflows.tsf_return.value());

        let rainfall_mm = repo.get_regional_rainfall_mm(month)?.unwrap_or(0.0);
        let evaporation_mm = repo.get_regional_evaporation_mm(month)?.unwrap_or(0.0);
        let engine = FacilityBalanceEngine::new(repo, &constants);
        let mut warnings = Vec::new();
        let mut results = Vec::with_capacity(balanced.len());
        for facility in &balanced {
            let transfer = net.get(&facility.code).copied().unwrap_or_default();
            let result = engine.balance(facility, date, rainfall_mm, evaporation_mm)?;
            if result.overflow > 0.0 || result.deficit > 0.0 {
                warnings.push(BalanceWarning::CapacityViolation {
                    facility: result.code.clone(),
                    overflow: result.overflow,
                    deficit: result.deficit,
                });
            }
            results.push(FacilityResult {
                transfers_in: transfer.transfers_in,
                transfers_out: transfer.transfers_out,
                ..result
            });
        }
        let storage_change = StorageChange::from_facilities(results);

        let total_inflows = inflows.total();
        let total_outflows = outflows.total();
        let closure = ClosureEvaluator::from_constants(&constants).evaluate(
            fresh_inflows,
            total_outflows,
            storage_change.net_change,
        );
        if closure.low_inflow {
            warnings.push(BalanceWarning::LowFreshInflow { fresh_inflows });
        }

        let applied_transfers = events
            .iter()
            .map(|e| AppliedTransfer {
                source_code: e.source_code.clone(),
                dest_code: e.dest_code.clone(),
                volume: e.volume,
            })
            .collect();

        info!(
            %date,
            fresh_inflows,
            total_outflows,
            storage_change = storage_change.net_change,
            closure_error_m3 = closure.error_m3,
            status = %closure.status,
            "balance calculated"
        );
        if closure.low_inflow {
            warn!(%date, fresh_inflows, "fresh inflows below the reliable closure threshold");
        }

        Ok(BalanceResult {
            calculation_date: date,
            inflows,
            outflows,
            total_inflows,
            fresh_inflows,
            total_outflows,
            net_balance: fresh_inflows - total_outflows,
            storage_change,
            closure_error_m3: closure.error_m3,
            closure_error_percent: closure.error_pct,
            low_fresh_inflow_flag: closure.low_inflow,
            ore_processed: ore,
            status: closure.status,
            applied_transfers,
            warnings,
        })
    }
}

/// Facilities with their volume set to the snapshot opening plus recorded
/// transfers. Facilities missing from the snapshot keep their stored volume.
fn effective_volumes(
    facilities: &[StorageFacility],
    snapshot: &OpeningSnapshot,
    net: &BTreeMap<String, NetTransfer>,
) -> Vec<StorageFacility> {
    facilities
        .iter()
        .map(|f| {
            let opening = snapshot.get(&f.code).copied().unwrap_or(f.current_volume);
            let transfer = net.get(&f.code).copied().unwrap_or_default();
            StorageFacility {
                current_volume: opening + transfer.transfers_in - transfer.transfers_out,
                ..f.clone()
            }
        })
        .collect()
}
