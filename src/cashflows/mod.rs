//! Fund cash-flow ledger built from lifecycle snapshots

mod projector;
mod waterfall;

pub use projector::project_cash_flows;
pub use waterfall::{apply_waterfall, WaterfallPeriod, WaterfallResult};

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

/// Which cash-flow series to read from the ledger
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FlowKey {
    /// After fees, leverage costs and carried interest
    Net,
    Lp,
    Gp,
    /// Net with management fees and carried interest added back
    Gross,
}

impl FlowKey {
    pub fn as_str(&self) -> &'static str {
        match self {
            FlowKey::Net => "net_cash_flow",
            FlowKey::Lp => "lp_net_cash_flow",
            FlowKey::Gp => "gp_net_cash_flow",
            FlowKey::Gross => "gross_net_cash_flow",
        }
    }
}

/// Cash-flow components for one period
///
/// Inflows to the fund are positive; outflows (capital deployed, fees,
/// carried interest) are negative.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CashFlowRow {
    pub period: u32,
    /// Period expressed in years
    pub year: f64,

    // Investment flows
    pub capital_calls: f64,
    /// Exit proceeds retained for new loans
    pub reinvestments: f64,
    /// Principal repaid, or recovery on defaulted loans
    pub exit_proceeds: f64,
    pub interest_income: f64,
    pub appreciation_income: f64,
    pub origination_fees: f64,

    // Costs
    pub management_fees: f64,
    pub leverage_costs: f64,
    pub carried_interest: f64,

    // Realisations, used by deal-by-deal waterfalls
    pub realized_cost: f64,
    /// Amount-weighted holding period of loans realised this period, in years
    pub realized_holding_years: f64,

    /// Fair value of loans still held at period end
    pub portfolio_value: f64,

    pub gross_net_cash_flow: f64,
    pub net_cash_flow: f64,
    pub lp_net_cash_flow: f64,
    pub gp_net_cash_flow: f64,
}

impl CashFlowRow {
    pub fn new(period: u32, periods_per_year: u32) -> Self {
        Self {
            period,
            year: period as f64 / periods_per_year.max(1) as f64,
            ..Default::default()
        }
    }

    pub fn flow(&self, key: FlowKey) -> f64 {
        match key {
            FlowKey::Net => self.net_cash_flow,
            FlowKey::Lp => self.lp_net_cash_flow,
            FlowKey::Gp => self.gp_net_cash_flow,
            FlowKey::Gross => self.gross_net_cash_flow,
        }
    }

    /// Investment flows before any fund-level cost
    pub fn investment_flow(&self) -> f64 {
        self.capital_calls
            + self.reinvestments
            + self.exit_proceeds
            + self.interest_income
            + self.appreciation_income
            + self.origination_fees
    }

    /// Gross series: investment flows less leverage costs, before management fees and carry
    pub fn gross_flow(&self) -> f64 {
        self.investment_flow() + self.leverage_costs
    }

    /// Cash available to the waterfall: investment flows less fees and leverage costs
    pub fn distributable(&self) -> f64 {
        self.gross_flow() + self.management_fees
    }
}

/// Capital paid in by investors
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct CapitalContributions {
    pub gp_contribution: f64,
    pub lp_contribution: f64,
    pub total_contribution: f64,
}

impl CapitalContributions {
    pub fn split(total: f64, gp_share: f64) -> Self {
        let gp = total * gp_share;
        Self {
            gp_contribution: gp,
            lp_contribution: total - gp,
            total_contribution: total,
        }
    }

    pub fn for_key(&self, key: FlowKey) -> f64 {
        match key {
            FlowKey::Lp => self.lp_contribution,
            FlowKey::Gp => self.gp_contribution,
            FlowKey::Net | FlowKey::Gross => self.total_contribution,
        }
    }
}

/// Period-indexed cash flows plus paid-in capital
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CashFlowLedger {
    pub periods_per_year: u32,
    pub rows: BTreeMap<u32, CashFlowRow>,
    pub contributions: CapitalContributions,
    /// Set once a waterfall has split the distributable cash
    pub has_waterfall: bool,
}

impl CashFlowLedger {
    pub fn new(periods_per_year: u32) -> Self {
        Self {
            periods_per_year: periods_per_year.max(1),
            ..Default::default()
        }
    }

    /// Ledger from a plain net series, one entry per period starting at 0
    ///
    /// Gross, LP and GP series are set equal to the net series.
    pub fn from_net_flows(flows: &[f64], periods_per_year: u32, contributions: CapitalContributions) -> Self {
        let mut ledger = Self::new(periods_per_year);
        for (period, &flow) in flows.iter().enumerate() {
            let mut row = CashFlowRow::new(period as u32, ledger.periods_per_year);
            row.net_cash_flow = flow;
            row.gross_net_cash_flow = flow;
            row.lp_net_cash_flow = flow;
            ledger.rows.insert(period as u32, row);
        }
        ledger.contributions = contributions;
        ledger
    }

    pub fn row(&self, period: u32) -> Option<&CashFlowRow> {
        self.rows.get(&period)
    }

    pub fn last_period(&self) -> u32 {
        self.rows.keys().next_back().copied().unwrap_or(0)
    }

    /// Ordered `(period, flow)` pairs for a series
    pub fn series(&self, key: FlowKey) -> Vec<(u32, f64)> {
        self.rows.iter().map(|(p, row)| (*p, row.flow(key))).collect()
    }

    pub fn flows(&self, key: FlowKey) -> Vec<f64> {
        self.rows.values().map(|row| row.flow(key)).collect()
    }

    pub fn total(&self, component: impl Fn(&CashFlowRow) -> f64) -> f64 {
        self.rows.values().map(component).sum()
    }

    /// Overlay a waterfall split onto the LP, GP, carry and net series
    pub fn apply_waterfall_result(&mut self, waterfall: &WaterfallResult) {
        for (period, row) in self.rows.iter_mut() {
            if let Some(split) = waterfall.periods.get(period) {
                row.carried_interest = -split.carried_interest;
                row.lp_net_cash_flow = split.lp_net_cash_flow;
                row.gp_net_cash_flow = split.gp_net_cash_flow;
                row.net_cash_flow = row.distributable() + row.carried_interest;
            }
        }
        self.has_waterfall = true;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    #[test]
    fn test_row_aggregates() {
        let row = CashFlowRow {
            capital_calls: -100.0,
            exit_proceeds: 80.0,
            interest_income: 10.0,
            appreciation_income: 5.0,
            origination_fees: 3.0,
            management_fees: -2.0,
            leverage_costs: -1.0,
            ..CashFlowRow::new(3, 12)
        };
        assert_relative_eq!(row.year, 0.25);
        assert_relative_eq!(row.investment_flow(), -2.0);
        assert_relative_eq!(row.gross_flow(), -3.0);
        assert_relative_eq!(row.distributable(), -5.0);
    }

    #[test]
    fn test_from_net_flows() {
        let ledger = CashFlowLedger::from_net_flows(
            &[-100.0, 10.0, 120.0],
            1,
            CapitalContributions::split(100.0, 0.0),
        );
        assert_eq!(ledger.last_period(), 2);
        assert_eq!(ledger.flows(FlowKey::Lp), vec![-100.0, 10.0, 120.0]);
        assert_eq!(ledger.series(FlowKey::Gross)[1], (1, 10.0));
        assert_eq!(ledger.contributions.for_key(FlowKey::Gp), 0.0);
    }
}
