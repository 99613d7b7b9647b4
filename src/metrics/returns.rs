//! Equity multiples and ROI

use serde::{Deserialize, Serialize};

use crate::cashflows::{CashFlowLedger, FlowKey};

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ReturnMetrics {
    pub total_contribution: f64,
    pub total_distributions: f64,
    pub equity_multiple: f64,
    /// Only reported once a waterfall has split the cash flows
    pub lp_multiple: Option<f64>,
    /// Infinite when the GP contributed nothing but received carry
    pub gp_multiple: Option<f64>,
    pub roi: f64,
    pub annualized_roi: f64,
    pub years: f64,
}

/// Sum of positive flows
pub fn total_distributions(flows: &[f64]) -> f64 {
    flows.iter().filter(|&&f| f > 0.0).sum()
}

/// Distributions over contributions; 0.0 when nothing was paid in
pub fn equity_multiple(flows: &[f64], contribution: f64) -> f64 {
    if contribution > 0.0 {
        total_distributions(flows) / contribution
    } else {
        0.0
    }
}

fn split_multiple(flows: &[f64], contribution: f64) -> f64 {
    let distributions = total_distributions(flows);
    if contribution > 0.0 {
        distributions / contribution
    } else if distributions > 0.0 {
        f64::INFINITY
    } else {
        0.0
    }
}

pub fn roi(distributions: f64, contribution: f64) -> f64 {
    if contribution > 0.0 {
        (distributions - contribution) / contribution
    } else {
        0.0
    }
}

/// `(1 + roi)^(1 / years) - 1` for positive ROI held more than a year, else ROI itself
pub fn annualized_roi(roi: f64, years: f64) -> f64 {
    if roi > 0.0 && years > 1.0 {
        (1.0 + roi).powf(1.0 / years) - 1.0
    } else {
        roi
    }
}

pub fn calculate_returns(ledger: &CashFlowLedger) -> ReturnMetrics {
    let contribution = ledger.contributions.total_contribution;
    let net = ledger.flows(FlowKey::Net);
    let distributions = total_distributions(&net);
    let years = ledger.last_period() as f64 / ledger.periods_per_year.max(1) as f64;
    let roi = roi(distributions, contribution);

    let (lp_multiple, gp_multiple) = if ledger.has_waterfall {
        (
            Some(split_multiple(&ledger.flows(FlowKey::Lp), ledger.contributions.lp_contribution)),
            Some(split_multiple(&ledger.flows(FlowKey::Gp), ledger.contributions.gp_contribution)),
        )
    } else {
        (None, None)
    };

    ReturnMetrics {
        total_contribution: contribution,
        total_distributions: distributions,
        equity_multiple: equity_multiple(&net, contribution),
        lp_multiple,
        gp_multiple,
        roi,
        annualized_roi: annualized_roi(roi, years),
        years,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cashflows::CapitalContributions;
    use approx::assert_relative_eq;

    #[test]
    fn test_equity_multiple() {
        let flows = [-100.0, 50.0, 0.0, 200.0];
        assert_eq!(equity_multiple(&flows, 100.0), 2.5);
        assert_eq!(equity_multiple(&flows, 0.0), 0.0);
    }

    #[test]
    fn test_annualized_roi() {
        assert_relative_eq!(annualized_roi(0.21, 2.0), 0.1, epsilon = 1e-12);
        // Short horizons and losses are not annualised
        assert_eq!(annualized_roi(0.21, 1.0), 0.21);
        assert_eq!(annualized_roi(-0.2, 5.0), -0.2);
    }

    #[test]
    fn test_split_multiples_need_waterfall() {
        let mut ledger = CashFlowLedger::from_net_flows(
            &[-100.0, 0.0, 0.0, 0.0, 0.0, 250.0],
            1,
            CapitalContributions::split(100.0, 0.0),
        );
        let returns = calculate_returns(&ledger);
        assert_eq!(returns.equity_multiple, 2.5);
        assert_relative_eq!(returns.roi, 1.5);
        assert_relative_eq!(returns.annualized_roi, 2.5f64.powf(0.2) - 1.0, epsilon = 1e-12);
        assert!(returns.lp_multiple.is_none());

        ledger.rows.get_mut(&5).unwrap().gp_net_cash_flow = 10.0;
        ledger.has_waterfall = true;
        let returns = calculate_returns(&ledger);
        assert_eq!(returns.lp_multiple, Some(2.5));
        assert_eq!(returns.gp_multiple, Some(f64::INFINITY));
    }
}
