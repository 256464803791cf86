//! Conservation-of-mass check over fresh inflows, outflows and storage change.

use serde::{Deserialize, Serialize};

use crate::balance::BalanceStatus;
use crate::constants::{self, Constants};

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Closure {
    pub error_m3: f64,
    pub error_pct: f64,
    /// Fresh inflows are too small for the percentage to be meaningful;
    /// weigh the absolute error instead.
    pub low_inflow: bool,
    pub status: BalanceStatus,
}

#[derive(Debug, Clone, Copy)]
pub struct ClosureEvaluator {
    threshold_pct: f64,
    low_inflow_m3: f64,
}

impl Default for ClosureEvaluator {
    fn default() -> Self {
        Self {
            threshold_pct: 5.0,
            low_inflow_m3: 100.0,
        }
    }
}

impl ClosureEvaluator {
    pub fn from_constants(constants: &Constants) -> Self {
        Self {
            threshold_pct: constants.value(constants::CLOSURE_THRESHOLD_PCT),
            low_inflow_m3: constants.value(constants::LOW_INFLOW_THRESHOLD_M3),
        }
    }

    pub fn evaluate(&self, fresh_inflows: f64, total_outflows: f64, net_storage_change: f64) -> Closure {
        let error_m3 = fresh_inflows - total_outflows - net_storage_change;
        let error_pct = if fresh_inflows == 0.0 {
            0.0
        } else {
            error_m3.abs() / fresh_inflows * 100.0
        };
        let status = if error_pct < self.threshold_pct {
            BalanceStatus::Closed
        } else {
            BalanceStatus::Open
        };
        Closure {
            error_m3,
            error_pct,
            low_inflow: fresh_inflows < self.low_inflow_m3,
            status,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_abs_diff_eq;

    #[test]
    fn closes_within_five_percent() {
        let c = ClosureEvaluator::default().evaluate(50_000.0, 45_000.0, 4_000.0);
        assert_eq!(c.error_m3, 1_000.0);
        assert_abs_diff_eq!(c.error_pct, 2.0, epsilon = 1e-12);
        assert_eq!(c.status, BalanceStatus::Closed);
        assert!(!c.low_inflow);
    }

    #[test]
    fn opens_at_threshold() {
        let c = ClosureEvaluator::default().evaluate(10_000.0, 9_000.0, 500.0);
        assert_abs_diff_eq!(c.error_pct, 5.0, epsilon = 1e-12);
        assert_eq!(c.status, BalanceStatus::Open);
    }

    #[test]
    fn negative_error_uses_absolute_percent() {
        let c = ClosureEvaluator::default().evaluate(10_000.0, 11_000.0, 0.0);
        assert_eq!(c.error_m3, -1_000.0);
        assert_abs_diff_eq!(c.error_pct, 10.0, epsilon = 1e-12);
    }

    #[test]
    fn zero_inflow_reports_zero_percent_and_flags_low_inflow() {
        let c = ClosureEvaluator::default().evaluate(0.0, 300.0, -50.0);
        assert_eq!(c.error_pct, 0.0);
        assert_eq!(c.error_m3, -250.0);
        assert!(c.low_inflow);
        assert_eq!(c.status, BalanceStatus::Closed);
    }

    #[test]
    fn thresholds_follow_constants() {
        let mut constants = Constants::default();
        constants.set(constants::CLOSURE_THRESHOLD_PCT, 1.0);
        let c = ClosureEvaluator::from_constants(&constants).evaluate(50_000.0, 45_000.0, 4_000.0);
        assert_eq!(c.status, BalanceStatus::Open);
    }
}
