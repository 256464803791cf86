//! TOML configuration for the command-line tool.

use std::collections::{BTreeMap, BTreeSet};
use std::path::{Path, PathBuf};

use serde::Deserialize;

use crate::constants::Constants;
use crate::error::{BalanceError, Result};
use crate::orchestrator::EngineOptions;
use crate::transfers::TransferScope;

/// Top-level configuration. Every section is optional.
#[derive(Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct BalanceConfig {
    #[serde(default)]
    pub database: DatabaseToml,

    #[serde(default)]
    pub timeseries: TimeSeriesToml,

    #[serde(default)]
    pub transfers: TransfersToml,

    #[serde(default)]
    pub closure: ClosureToml,

    /// Constant overrides layered above the repository values.
    #[serde(default)]
    pub constants: BTreeMap<String, f64>,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct DatabaseToml {
    #[serde(default = "default_database_path")]
    pub path: PathBuf,
}

impl Default for DatabaseToml {
    fn default() -> Self {
        Self {
            path: default_database_path(),
        }
    }
}

fn default_database_path() -> PathBuf {
    PathBuf::from("water_balance.db")
}

#[derive(Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct TimeSeriesToml {
    /// Directory of monthly CSV exports.
    pub dir: Option<PathBuf>,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ScopeToml {
    Disabled,
    #[default]
    Global,
    Groups,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct TransfersToml {
    #[serde(default = "default_true")]
    pub auto_apply: bool,
    #[serde(default)]
    pub scope: ScopeToml,
    #[serde(default)]
    pub groups: Vec<String>,
}

impl Default for TransfersToml {
    fn default() -> Self {
        Self {
            auto_apply: true,
            scope: ScopeToml::default(),
            groups: Vec::new(),
        }
    }
}

fn default_true() -> bool {
    true
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ClosureToml {
    #[serde(default = "default_tolerance_m3")]
    pub tolerance_m3: f64,
}

impl Default for ClosureToml {
    fn default() -> Self {
        Self {
            tolerance_m3: default_tolerance_m3(),
        }
    }
}

fn default_tolerance_m3() -> f64 {
    0.01
}

impl BalanceConfig {
    pub fn from_toml_str(s: &str) -> Result<Self> {
        toml::from_str(s).map_err(|e| BalanceError::Config(e.to_string()))
    }

    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .map_err(|e| BalanceError::Config(format!("cannot read {}: {e}", path.display())))?;
        Self::from_toml_str(&content)
    }

    /// Engine options this configuration describes.
    pub fn engine_options(&self) -> Result<EngineOptions> {
        if let Some(name) = self.constants.keys().find(|n| !Constants::is_known(n)) {
            return Err(BalanceError::Config(format!("unknown constant '{name}'")));
        }
        let tolerance = self.closure.tolerance_m3;
        if tolerance.is_nan() || tolerance < 0.0 {
            return Err(BalanceError::Config(format!(
                "closure.tolerance_m3 must be non-negative, got {tolerance}"
            )));
        }

        let transfer_scope = match self.transfers.scope {
            ScopeToml::Disabled => TransferScope::Disabled,
            ScopeToml::Global => TransferScope::Global,
            ScopeToml::Groups => {
                if self.transfers.groups.is_empty() {
                    return Err(BalanceError::Config(
                        "transfers.scope = \"groups\" needs at least one entry in transfers.groups"
                            .to_string(),
                    ));
                }
                TransferScope::Groups(self.transfers.groups.iter().cloned().collect::<BTreeSet<_>>())
            }
        };

        Ok(EngineOptions {
            auto_apply_transfers: self.transfers.auto_apply,
            transfer_scope,
            duplicate_tolerance_m3: self.closure.tolerance_m3,
            constant_overrides: self.constants.clone(),
        })
    }
}
