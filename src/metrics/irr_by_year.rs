//! Cumulative IRR at each year end

use serde::{Deserialize, Serialize};

use super::irr::{irr_from_flows, irr_vector, paid_in_through, IrrResult};
use crate::cashflows::{CashFlowLedger, FlowKey};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct YearlyIrr {
    pub year: u32,
    /// Last period included in the window
    pub period: u32,
    pub fund_irr: IrrResult,
    pub lp_irr: IrrResult,
    pub gp_irr: IrrResult,
    pub gross_irr: IrrResult,
}

/// IRR over the growing window of periods `1..=t` for a series
pub fn irr_through(ledger: &CashFlowLedger, key: FlowKey, through: u32) -> IrrResult {
    let series: Vec<(u32, f64)> = ledger.series(key).into_iter().filter(|(p, _)| *p <= through).collect();
    irr_from_flows(&irr_vector(&series, paid_in_through(ledger, key, through)), ledger.periods_per_year)
}

/// One entry per year end up to the last ledger period
pub fn calculate_irr_by_year(ledger: &CashFlowLedger) -> Vec<YearlyIrr> {
    let ppy = ledger.periods_per_year.max(1);
    let last = ledger.last_period();
    let years = last.div_ceil(ppy);

    (1..=years)
        .map(|year| {
            let period = (year * ppy).min(last);
            YearlyIrr {
                year,
                period,
                fund_irr: irr_through(ledger, FlowKey::Net, period),
                lp_irr: irr_through(ledger, FlowKey::Lp, period),
                gp_irr: irr_through(ledger, FlowKey::Gp, period),
                gross_irr: irr_through(ledger, FlowKey::Gross, period),
            }
        })
        .collect()
}
