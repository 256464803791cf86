//! Automatic pump transfers between linked storage facilities.
//!
//! Each facility may feed at most one downstream facility through its
//! `feeds_to` code. When a source sits at or above its pump start level, a
//! transfer is planned that never drains the source below its stop level and
//! never fills the destination beyond the fill limit. Applied transfers are
//! recorded in the audit log; an existing record for the (date, source, dest)
//! triple blocks re-application.

use std::collections::{BTreeMap, BTreeSet};

use chrono::{NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::balance::AppliedTransfer;
use crate::constants::{self, Constants};
use crate::error::{BalanceError, ProviderError, Result};
use crate::models::{StorageFacility, TransferEvent, VolumeBatch};
use crate::provider::Repository;

/// Which facilities take part in automatic transfers
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "scope", content = "groups", rename_all = "snake_case")]
pub enum TransferScope {
    Disabled,
    #[default]
    Global,
    /// Only sources whose group key is in the set. Group keys are opaque.
    Groups(BTreeSet<String>),
}

impl TransferScope {
    pub fn includes(&self, facility: &StorageFacility) -> bool {
        match self {
            TransferScope::Disabled => false,
            TransferScope::Global => true,
            TransferScope::Groups(groups) => facility
                .group_key
                .as_ref()
                .is_some_and(|g| groups.contains(g)),
        }
    }

    pub fn is_disabled(&self) -> bool {
        matches!(self, TransferScope::Disabled)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct TransferPlan {
    pub transfers: Vec<AppliedTransfer>,
    /// Triples already recorded for the date.
    pub already_applied: Vec<(String, String)>,
}

/// Transfers in and out of each facility for one date
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct NetTransfer {
    pub transfers_in: f64,
    pub transfers_out: f64,
}

pub fn net_transfers(events: &[TransferEvent]) -> BTreeMap<String, NetTransfer> {
    let mut net: BTreeMap<String, NetTransfer> = BTreeMap::new();
    for event in events {
        net.entry(event.source_code.clone()).or_default().transfers_out += event.volume;
        net.entry(event.dest_code.clone()).or_default().transfers_in += event.volume;
    }
    net
}

pub struct PumpTransferEngine<'a> {
    repo: &'a dyn Repository,
    constants: &'a Constants,
}

impl<'a> PumpTransferEngine<'a> {
    pub fn new(repo: &'a dyn Repository, constants: &'a Constants) -> Self {
        Self { repo, constants }
    }

    /// Largest volume that may move from `source` to `dest`.
    pub fn candidate_volume(&self, source: &StorageFacility, dest: &StorageFacility) -> f64 {
        let increment = self.constants.value(constants::PUMP_INCREMENT_PCT) / 100.0;
        let fill_limit = self.constants.value(constants::PUMP_DEST_FILL_LIMIT_PCT) / 100.0;
        let by_increment = increment * source.total_capacity;
        let above_stop = source.current_volume - source.stop_volume();
        let dest_room = fill_limit * dest.total_capacity - dest.current_volume;
        by_increment.min(above_stop).min(dest_room)
    }

    /// Plan transfers for `facilities` (volumes as of the period opening).
    ///
    /// Sources are visited in code order and planned volumes are carried
    /// forward, so a chain A→B→C sees B after it received from A.
    pub fn plan(
        &self,
        date: NaiveDate,
        facilities: &[StorageFacility],
        scope: &TransferScope,
    ) -> Result<TransferPlan> {
        let mut plan = TransferPlan {
            transfers: Vec::new(),
            already_applied: Vec::new(),
        };
        if scope.is_disabled() {
            return Ok(plan);
        }

        let mut state: BTreeMap<String, StorageFacility> = facilities
            .iter()
            .map(|f| (f.code.clone(), f.clone()))
            .collect();
        let codes: Vec<String> = state.keys().cloned().collect();

        for code in codes {
            let Some(source) = state.get(&code).cloned() else {
                continue;
            };
            let Some(dest_code) = source.feeds_to.clone() else {
                continue;
            };
            if !scope.includes(&source) || dest_code == source.code {
                continue;
            }
            let Some(dest) = state.get(&dest_code).cloned() else {
                warn!(source = %source.code, dest = %dest_code, "feeds_to names an unknown facility");
                continue;
            };
            if source.level_pct() < source.pump_start_level {
                continue;
            }
            if self.repo.has_transfer_event(date, &source.code, &dest.code)? {
                debug!(source = %source.code, dest = %dest.code, %date, "transfer already recorded");
                plan.already_applied.push((source.code.clone(), dest.code.clone()));
                continue;
            }

            let volume = self.candidate_volume(&source, &dest);
            if volume <= 0.0 {
                continue;
            }
            if let Some(s) = state.get_mut(&source.code) {
                s.current_volume -= volume;
            }
            if let Some(d) = state.get_mut(&dest.code) {
                d.current_volume += volume;
            }
            plan.transfers.push(AppliedTransfer {
                source_code: source.code,
                dest_code: dest.code,
                volume,
            });
        }
        Ok(plan)
    }

    /// Apply planned transfers atomically against the stored volumes.
    ///
    /// Source and destination volumes for every transfer and every audit
    /// record are committed in one transaction; on failure nothing changes.
    /// A transfer whose triple another writer recorded first is already done:
    /// it is dropped and the rest are committed.
    pub fn apply(&self, date: NaiveDate, transfers: &[AppliedTransfer]) -> Result<()> {
        let mut pending = transfers.to_vec();
        while !pending.is_empty() {
            match self.repo.commit_volume_batch(&self.batch(date, &pending)?) {
                Ok(()) => break,
                Err(ProviderError::DuplicateTransfer {
                    source_code, dest_code, ..
                }) => {
                    debug!(source = %source_code, dest = %dest_code, %date, "transfer recorded concurrently");
                    pending.retain(|t| t.source_code != source_code || t.dest_code != dest_code);
                }
                Err(source) => {
                    return Err(BalanceError::Transaction {
                        operation: "pump transfer",
                        source,
                    });
                }
            }
        }
        for t in &pending {
            info!(
                source = %t.source_code,
                dest = %t.dest_code,
                volume = t.volume,
                %date,
                "applied pump transfer"
            );
        }
        Ok(())
    }

    fn batch(&self, date: NaiveDate, transfers: &[AppliedTransfer]) -> Result<VolumeBatch> {
        let stored: BTreeMap<String, f64> = self
            .repo
            .list_storage_facilities()?
            .into_iter()
            .map(|f| (f.code, f.current_volume))
            .collect();

        let mut batch = VolumeBatch::default();
        let recorded_at = Utc::now();
        for t in transfers {
            for (code, delta) in [(&t.source_code, -t.volume), (&t.dest_code, t.volume)] {
                let base = match batch.volumes.get(code) {
                    Some(v) => *v,
                    None => *stored.get(code).ok_or_else(|| BalanceError::Transaction {
                        operation: "pump transfer",
                        source: ProviderError::UnknownFacility(code.clone()),
                    })?,
                };
                batch.volumes.insert(code.clone(), base + delta);
            }
            batch.events.push(TransferEvent {
                calc_date: date,
                source_code: t.source_code.clone(),
                dest_code: t.dest_code.clone(),
                volume: t.volume,
                recorded_at,
            });
        }
        Ok(batch)
    }
}
