//! Plain-text rendering of a balance result.

use std::fmt;

use crate::balance::BalanceResult;

/// Text report of one result; `verbose` adds per-source and per-facility
/// detail.
pub struct BalanceReport<'a> {
    result: &'a BalanceResult,
    verbose: bool,
}

impl<'a> BalanceReport<'a> {
    pub fn new(result: &'a BalanceResult) -> Self {
        Self {
            result,
            verbose: false,
        }
    }

    pub fn verbose(mut self, verbose: bool) -> Self {
        self.verbose = verbose;
        self
    }
}

impl fmt::Display for BalanceReport<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let r = self.result;
        writeln!(f, "=== Water Balance {} ===", r.calculation_date)?;
        writeln!(
            f,
            "Ore processed: {:.0} t ({})",
            r.ore_processed.value(),
            r.ore_processed.provenance()
        )?;
        writeln!(f)?;

        writeln!(f, "Inflows:")?;
        for (category, volume) in r.inflows.iter() {
            writeln!(f, "  {:<26} {:>14.1} m³", category.label(), volume)?;
        }
        if self.verbose {
            for source in &r.inflows.sources {
                writeln!(
                    f,
                    "    {:<24} {:>14.1} m³ ({})",
                    source.code,
                    source.volume.value(),
                    source.volume.provenance()
                )?;
            }
        }
        writeln!(f, "  {:<26} {:>14.1} m³", "Total", r.total_inflows)?;
        writeln!(f, "  {:<26} {:>14.1} m³", "Fresh", r.fresh_inflows)?;
        writeln!(f)?;

        writeln!(f, "Outflows ({:?} mode):", r.outflows.mode)?;
        for (category, volume) in r.outflows.iter() {
            let marker = if category.in_total() { "" } else { " *" };
            writeln!(f, "  {:<26} {:>14.1} m³{}", category.label(), volume, marker)?;
        }
        writeln!(f, "  {:<26} {:>14.1} m³", "Total", r.total_outflows)?;
        writeln!(f, "  * not counted in the total")?;
        writeln!(f)?;

        let storage = &r.storage_change;
        writeln!(f, "Storage:")?;
        writeln!(f, "  Opening: {:>14.1} m³", storage.opening_total)?;
        writeln!(f, "  Closing: {:>14.1} m³", storage.closing_total)?;
        writeln!(f, "  Change:  {:>14.1} m³", storage.net_change)?;
        if self.verbose {
            for fac in &storage.facilities {
                writeln!(
                    f,
                    "  {:<10} {:>12.1} -> {:>12.1} m³ ({:.1}%){}",
                    fac.code,
                    fac.opening_volume,
                    fac.closing_volume,
                    fac.level_pct,
                    if fac.above_alarm { " ALARM" } else { "" }
                )?;
            }
        }
        writeln!(f)?;

        if !r.applied_transfers.is_empty() {
            writeln!(f, "Transfers:")?;
            for t in &r.applied_transfers {
                writeln!(f, "  {} -> {} {:.1} m³", t.source_code, t.dest_code, t.volume)?;
            }
            writeln!(f)?;
        }

        writeln!(
            f,
            "Closure: {:.1} m³ ({:.2}%) {}",
            r.closure_error_m3, r.closure_error_percent, r.status
        )?;
        for warning in &r.warnings {
            writeln!(f, "  warning: {warning}")?;
        }
        Ok(())
    }
}
