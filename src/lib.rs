//! Monthly water mass balance for a mine site.
//!
//! Inflows and outflows are aggregated per category, storage facilities are
//! balanced from their opening volumes, water is pumped between linked
//! facilities and the closure error checks conservation of mass. Results are
//! cached per (date, ore tonnes) and can be saved idempotently.

pub mod balance;
pub mod cache;
pub mod closure;
pub mod config;
pub mod constants;
pub mod db;
pub mod error;
pub mod facility;
pub mod inflows;
pub mod kpi;
pub mod models;
pub mod orchestrator;
pub mod outflows;
pub mod persistence;
pub mod provider;
pub mod report;
pub mod resolve;
pub mod sample;
pub mod timeseries;
pub mod transfers;

pub use balance::{BalanceResult, BalanceStatus, BalanceWarning, FacilityResult, InflowMap, OutflowMap};
pub use cache::BalanceCache;
pub use config::BalanceConfig;
pub use db::SqliteRepository;
pub use error::{BalanceError, ProviderError, Result};
pub use orchestrator::{BalanceOrchestrator, EngineOptions};
pub use persistence::{PersistenceCoordinator, SaveOutcome};
pub use provider::{Repository, TimeSeriesProvider};
pub use resolve::Resolved;
pub use timeseries::MonthlySeries;
pub use transfers::TransferScope;
