//! Nominal and discounted payback periods

use serde::{Deserialize, Serialize};

use crate::cashflows::{CashFlowLedger, FlowKey};

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PaybackMetrics {
    /// Years until cumulative net cash flow turns non-negative
    pub payback_years: Option<f64>,
    pub discounted_payback_years: Option<f64>,
}

/// Fractional period at which the cumulative flow first crosses from negative to non-negative
///
/// Interpolates linearly inside the crossing period. `None` if the cumulative
/// flow never goes negative or never recovers.
pub fn payback_period(flows: &[(u32, f64)]) -> Option<f64> {
    let mut cumulative = 0.0;
    let mut previous_period = None;
    let mut been_negative = false;

    for &(period, flow) in flows {
        let before = cumulative;
        cumulative += flow;
        if been_negative && before < 0.0 && cumulative >= 0.0 {
            let start = previous_period.unwrap_or(period) as f64;
            let fraction = if flow > 0.0 { -before / flow } else { 1.0 };
            return Some(start + fraction * (period as f64 - start));
        }
        been_negative |= cumulative < 0.0;
        previous_period = Some(period);
    }
    None
}

/// Flows discounted at an annual rate
pub fn discount_flows(flows: &[(u32, f64)], annual_rate: f64, periods_per_year: u32) -> Vec<(u32, f64)> {
    let ppy = periods_per_year.max(1) as f64;
    flows
        .iter()
        .map(|&(period, flow)| (period, flow / (1.0 + annual_rate).powf(period as f64 / ppy)))
        .collect()
}

pub fn calculate_payback(ledger: &CashFlowLedger, discount_rate: f64) -> PaybackMetrics {
    let ppy = ledger.periods_per_year.max(1) as f64;
    let series = ledger.series(FlowKey::Net);
    let discounted = discount_flows(&series, discount_rate, ledger.periods_per_year);

    PaybackMetrics {
        payback_years: payback_period(&series).map(|p| p / ppy),
        discounted_payback_years: payback_period(&discounted).map(|p| p / ppy),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cashflows::CapitalContributions;
    use approx::assert_relative_eq;

    #[test]
    fn test_interpolated_payback() {
        let flows = [(0, -100.0), (1, 40.0), (2, 40.0), (3, 40.0)];
        // 20 of the 40 received in period 3 completes payback
        assert_relative_eq!(payback_period(&flows).unwrap(), 2.5);
    }

    #[test]
    fn test_never_recovered() {
        assert!(payback_period(&[(0, -100.0), (1, 40.0)]).is_none());
        assert!(payback_period(&[(0, 10.0), (1, 40.0)]).is_none());
    }

    #[test]
    fn test_discounted_payback_is_later() {
        let ledger = CashFlowLedger::from_net_flows(
            &[-100.0, 40.0, 40.0, 40.0, 40.0],
            1,
            CapitalContributions::split(100.0, 0.0),
        );
        let payback = calculate_payback(&ledger, 0.1);
        assert_relative_eq!(payback.payback_years.unwrap(), 2.5);
        assert!(payback.discounted_payback_years.unwrap() > 2.5);
    }

    #[test]
    fn test_monthly_payback_in_years() {
        let mut flows = vec![-120.0];
        flows.extend(vec![10.0; 24]);
        let ledger = CashFlowLedger::from_net_flows(&flows, 12, CapitalContributions::split(120.0, 0.0));
        assert_relative_eq!(calculate_payback(&ledger, 0.0).payback_years.unwrap(), 1.0);
    }
}
