//! Volatility, Sharpe/Sortino and drawdown over the fund's value series

use serde::{Deserialize, Serialize};
use statrs::statistics::Statistics;

use crate::cashflows::CashFlowLedger;

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RiskMetrics {
    pub mean_return: f64,
    pub volatility: f64,
    pub downside_deviation: f64,
    pub sharpe_ratio: f64,
    pub sortino_ratio: f64,
    pub max_drawdown: f64,
    /// Periods bounding the largest drawdown (peak, trough)
    pub drawdown_start: Option<u32>,
    pub drawdown_end: Option<u32>,
}

/// Investor value at the end of each period
///
/// Paid-in capital plus cumulative net cash flow (undeployed cash and
/// distributions) plus the fair value of loans still held.
pub fn value_series(ledger: &CashFlowLedger) -> Vec<(u32, f64)> {
    let mut cumulative = ledger.contributions.total_contribution;
    ledger
        .rows
        .iter()
        .map(|(&period, row)| {
            cumulative += row.net_cash_flow;
            (period, cumulative + row.portfolio_value)
        })
        .collect()
}

/// Period-over-period returns; periods starting from a non-positive value are skipped
pub fn period_returns(values: &[f64]) -> Vec<f64> {
    values
        .windows(2)
        .filter(|w| w[0] > 0.0)
        .map(|w| (w[1] - w[0]) / w[0])
        .collect()
}

/// Sample standard deviation; 0.0 below two observations
pub fn sample_std_dev(values: &[f64]) -> f64 {
    if values.len() < 2 {
        return 0.0;
    }
    values.std_dev()
}

/// Excess return per unit of deviation
///
/// Empty input gives 0.0; zero deviation gives +inf for a non-negative
/// excess return and -inf otherwise.
fn ratio(excess: f64, deviation: f64, empty: bool) -> f64 {
    if empty {
        0.0
    } else if deviation > 0.0 {
        excess / deviation
    } else if excess >= 0.0 {
        f64::INFINITY
    } else {
        f64::NEG_INFINITY
    }
}

/// Largest peak-to-trough fractional decline with its (peak, trough) indices
pub fn max_drawdown(values: &[f64]) -> (f64, Option<(usize, usize)>) {
    let mut peak_index = 0;
    let mut worst = 0.0;
    let mut span = None;

    for (i, &value) in values.iter().enumerate() {
        if value > values[peak_index] {
            peak_index = i;
        }
        let peak = values[peak_index];
        if peak > 0.0 {
            let drawdown = (peak - value) / peak;
            if drawdown > worst {
                worst = drawdown;
                span = Some((peak_index, i));
            }
        }
    }
    (worst, span)
}

/// Risk metrics with `risk_free_rate` given annually
pub fn calculate_risk_metrics(ledger: &CashFlowLedger, risk_free_rate: f64) -> RiskMetrics {
    let series = value_series(ledger);
    let values: Vec<f64> = series.iter().map(|(_, v)| *v).collect();
    let returns = period_returns(&values);
    let period_risk_free = risk_free_rate / ledger.periods_per_year.max(1) as f64;

    let mean_return = if returns.is_empty() { 0.0 } else { returns.iter().mean() };
    let volatility = sample_std_dev(&returns);
    let downside: Vec<f64> = returns.iter().copied().filter(|r| *r < 0.0).collect();
    let downside_deviation = sample_std_dev(&downside);
    let excess = mean_return - period_risk_free;

    let (max_drawdown, span) = max_drawdown(&values);
    RiskMetrics {
        mean_return,
        volatility,
        downside_deviation,
        sharpe_ratio: ratio(excess, volatility, returns.is_empty()),
        sortino_ratio: ratio(excess, downside_deviation, returns.is_empty()),
        max_drawdown,
        drawdown_start: span.map(|(start, _)| series[start].0),
        drawdown_end: span.map(|(_, end)| series[end].0),
    }
}
