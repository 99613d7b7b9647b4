//! Performance metrics over a cash-flow ledger
//!
//! The engine only reads the ledger and its capital contributions, so it works
//! the same for projected simulations and hand-built cash-flow series.

pub mod fee_drag;
pub mod irr;
pub mod irr_by_year;
pub mod payback;
pub mod ratios;
pub mod returns;
pub mod risk;

pub use fee_drag::{calculate_fee_drag, FeeDrag};
pub use irr::{calculate_irr, irr_from_flows, IrrMethod, IrrResult, IrrSolver};
pub use irr_by_year::{calculate_irr_by_year, YearlyIrr};
pub use payback::{calculate_payback, PaybackMetrics};
pub use ratios::{calculate_ratios, FundRatios, RatioPoint};
pub use returns::{calculate_returns, ReturnMetrics};
pub use risk::{calculate_risk_metrics, RiskMetrics};

use log::debug;
use serde::{Deserialize, Serialize};

use crate::cashflows::{CashFlowLedger, FlowKey};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PerformanceMetrics {
    pub fund_irr: IrrResult,
    pub lp_irr: IrrResult,
    pub gp_irr: IrrResult,
    pub returns: ReturnMetrics,
    pub risk: RiskMetrics,
    pub payback: PaybackMetrics,
    pub ratios: FundRatios,
    pub fee_drag: FeeDrag,
    pub irr_by_year: Vec<YearlyIrr>,
}

impl PerformanceMetrics {
    pub fn gross_irr(&self) -> f64 {
        self.fee_drag.gross_irr.value
    }
}

/// Compute every metric; `risk_free_rate` and `discount_rate` are annual
pub fn compute_metrics(ledger: &CashFlowLedger, risk_free_rate: f64, discount_rate: f64) -> PerformanceMetrics {
    let fund_irr = calculate_irr(ledger, FlowKey::Net);
    let lp_irr = calculate_irr(ledger, FlowKey::Lp);
    let gp_irr = calculate_irr(ledger, FlowKey::Gp);
    let returns = calculate_returns(ledger);
    let fee_drag = calculate_fee_drag(ledger, fund_irr.value, returns.equity_multiple, returns.roi);

    debug!(
        "Fund IRR {:.4} ({}), gross {:.4}, multiple {:.3}",
        fund_irr.value,
        fund_irr.method.as_str(),
        fee_drag.gross_irr.value,
        returns.equity_multiple
    );

    PerformanceMetrics {
        risk: calculate_risk_metrics(ledger, risk_free_rate),
        payback: calculate_payback(ledger, discount_rate),
        ratios: calculate_ratios(ledger),
        irr_by_year: calculate_irr_by_year(ledger),
        fund_irr,
        lp_irr,
        gp_irr,
        returns,
        fee_drag,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cashflows::CapitalContributions;
    use approx::assert_abs_diff_eq;

    #[test]
    fn test_compute_metrics_on_plain_series() {
        let ledger = CashFlowLedger::from_net_flows(
            &[-100.0, 0.0, 0.0, 0.0, 0.0, 250.0],
            1,
            CapitalContributions::split(100.0, 0.0),
        );
        let metrics = compute_metrics(&ledger, 0.02, 0.08);

        assert_eq!(metrics.returns.equity_multiple, 2.5);
        assert_abs_diff_eq!(metrics.fund_irr.value, 2.5f64.powf(0.2) - 1.0, epsilon = 1e-6);
        // Gross equals net when there are no fees
        assert_abs_diff_eq!(metrics.gross_irr(), metrics.fund_irr.value, epsilon = 1e-9);
        assert_abs_diff_eq!(metrics.fee_drag.irr_drag, 0.0, epsilon = 1e-9);
        assert_eq!(metrics.irr_by_year.len(), 5);
        assert_abs_diff_eq!(metrics.ratios.dpi, 2.5);
        assert_abs_diff_eq!(metrics.payback.payback_years.unwrap(), 4.4, epsilon = 1e-12);
    }

    #[test]
    fn test_degenerate_ledger_never_fails() {
        let ledger = CashFlowLedger::from_net_flows(&[-100.0, 0.0, 0.0], 1, CapitalContributions::split(100.0, 0.0));
        let metrics = compute_metrics(&ledger, 0.02, 0.08);
        assert_eq!(metrics.fund_irr.value, 0.0);
        assert_eq!(metrics.fund_irr.method, IrrMethod::InsufficientData);
        assert!(!metrics.fund_irr.diagnostic.is_empty());
        assert!(metrics.payback.payback_years.is_none());
    }
}
