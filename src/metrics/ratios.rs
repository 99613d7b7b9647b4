//! DPI / RVPI / TVPI, terminal and per period

use serde::{Deserialize, Serialize};

use crate::cashflows::CashFlowLedger;

#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct RatioPoint {
    pub period: u32,
    pub paid_in: f64,
    pub distributions: f64,
    pub residual_value: f64,
    pub dpi: f64,
    pub rvpi: f64,
    pub tvpi: f64,
}

impl RatioPoint {
    fn new(period: u32, paid_in: f64, distributions: f64, residual_value: f64) -> Self {
        let (dpi, rvpi) = if paid_in > 0.0 {
            (distributions / paid_in, residual_value / paid_in)
        } else {
            (0.0, 0.0)
        };
        Self {
            period,
            paid_in,
            distributions,
            residual_value,
            dpi,
            rvpi,
            tvpi: dpi + rvpi,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct FundRatios {
    pub dpi: f64,
    pub rvpi: f64,
    pub tvpi: f64,
    pub series: Vec<RatioPoint>,
}

/// Ratios on the net series; residual value is each period's `portfolio_value`
///
/// Terminal ratios use total paid-in capital. TVPI is always DPI + RVPI.
pub fn calculate_ratios(ledger: &CashFlowLedger) -> FundRatios {
    let mut paid_in = 0.0;
    let mut distributions = 0.0;
    let mut series = Vec::with_capacity(ledger.rows.len());

    for (&period, row) in &ledger.rows {
        if row.net_cash_flow < 0.0 {
            paid_in += -row.net_cash_flow;
        } else {
            distributions += row.net_cash_flow;
        }
        series.push(RatioPoint::new(period, paid_in, distributions, row.portfolio_value));
    }

    let total_paid_in = ledger.contributions.total_contribution.max(paid_in);
    let residual = ledger.rows.values().next_back().map(|r| r.portfolio_value).unwrap_or(0.0);
    let terminal = RatioPoint::new(ledger.last_period(), total_paid_in, distributions, residual);

    FundRatios {
        dpi: terminal.dpi,
        rvpi: terminal.rvpi,
        tvpi: terminal.tvpi,
        series,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cashflows::CapitalContributions;
    use approx::assert_relative_eq;

    #[test]
    fn test_ratio_series() {
        let mut ledger = CashFlowLedger::from_net_flows(
            &[-100.0, 30.0, 90.0],
            1,
            CapitalContributions::split(100.0, 0.0),
        );
        ledger.rows.get_mut(&0).unwrap().portfolio_value = 100.0;
        ledger.rows.get_mut(&1).unwrap().portfolio_value = 80.0;

        let ratios = calculate_ratios(&ledger);
        let mid = ratios.series[1];
        assert_relative_eq!(mid.dpi, 0.3);
        assert_relative_eq!(mid.rvpi, 0.8);
        assert_relative_eq!(mid.tvpi, 1.1);

        assert_relative_eq!(ratios.dpi, 1.2);
        assert_eq!(ratios.rvpi, 0.0);
        assert_relative_eq!(ratios.tvpi, ratios.dpi + ratios.rvpi);
    }

    #[test]
    fn test_no_paid_in() {
        let ledger = CashFlowLedger::from_net_flows(&[0.0, 0.0], 1, CapitalContributions::default());
        let ratios = calculate_ratios(&ledger);
        assert_eq!(ratios.tvpi, 0.0);
    }
}
