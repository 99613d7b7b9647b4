//! Turns lifecycle snapshots into a period-indexed cash-flow ledger

use log::debug;

use super::{CapitalContributions, CashFlowLedger, CashFlowRow};
use crate::fund::{Fund, ManagementFeeBasis};
use crate::leverage::LeverageResult;
use crate::lifecycle::LifecycleResult;
use crate::portfolio::Portfolio;

/// Build the ledger for a simulated portfolio
///
/// Loans are bullet loans: interest and the fund's share of appreciation are
/// received at exit together with principal; a defaulted loan returns only
/// its recovery. Capital for reinvestment is retained from the exit period's
/// proceeds. LP and GP series are split pro rata to the GP commitment until a
/// waterfall is applied.
pub fn project_cash_flows(
    fund: &Fund,
    portfolio: &Portfolio,
    lifecycle: &LifecycleResult,
    leverage: &LeverageResult,
) -> CashFlowLedger {
    let config = fund.config();
    let ppy = lifecycle.periods_per_year.max(1);
    let term = lifecycle.term_periods;
    let mut ledger = CashFlowLedger::new(ppy);

    for period in 0..=term {
        ledger.rows.insert(period, CashFlowRow::new(period, ppy));
    }

    let mut held_years: Vec<f64> = vec![0.0; term as usize + 1];
    for loan in portfolio.iter() {
        if let Some(row) = ledger.rows.get_mut(&loan.origination_period) {
            if !loan.reinvested {
                row.capital_calls -= loan.loan_amount;
            }
            row.origination_fees += loan.origination_fee();
        }

        let Some(exit) = loan.actual_exit_period else {
            continue;
        };
        let Some(row) = ledger.rows.get_mut(&exit) else {
            continue;
        };
        if loan.is_default {
            row.exit_proceeds += loan.exit_value(exit, config.recovery_rate);
        } else {
            row.exit_proceeds += loan.loan_amount;
            row.interest_income += loan.accrued_interest(exit);
            row.appreciation_income += loan.appreciation_share();
        }
        row.realized_cost += loan.loan_amount;
        held_years[exit as usize] += loan.loan_amount * loan.years_held(exit);
    }

    for (&period, row) in ledger.rows.iter_mut() {
        if row.realized_cost > 0.0 {
            row.realized_holding_years = held_years[period as usize] / row.realized_cost;
        }

        if let Some(snapshot) = lifecycle.snapshot(period) {
            row.reinvestments = -snapshot.metrics.reinvestment_capital;
            row.portfolio_value = snapshot.metrics.portfolio_value;
        }

        if period > 0 {
            let basis = match config.management_fee_basis {
                ManagementFeeBasis::CommittedCapital => fund.size(),
                ManagementFeeBasis::InvestedCapital => lifecycle
                    .snapshot(period - 1)
                    .map(|s| s.metrics.active_amount)
                    .unwrap_or(0.0),
            };
            row.management_fees = -basis * config.management_fee_rate / ppy as f64;
        }
        row.leverage_costs = -leverage.cost_at(period);

        row.gross_net_cash_flow = row.gross_flow();
        row.net_cash_flow = row.distributable();
        let gp_share = config.gp_commitment_percentage;
        row.lp_net_cash_flow = row.net_cash_flow * (1.0 - gp_share);
        row.gp_net_cash_flow = row.net_cash_flow * gp_share;
    }

    let paid_in: f64 = ledger.rows.values().map(|r| (-r.distributable()).max(0.0)).sum();
    ledger.contributions = CapitalContributions::split(paid_in, config.gp_commitment_percentage);

    debug!(
        "Ledger: {} periods, paid-in {:.0}, distributions {:.0}",
        ledger.rows.len(),
        paid_in,
        ledger.total(|r| r.net_cash_flow.max(0.0))
    );
    ledger
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fund::{FundConfig, Zone};
    use crate::lifecycle::LifecycleEngine;
    use crate::portfolio::LoanTerms;
    use approx::assert_relative_eq;
    use rand::rngs::StdRng;
    use rand::SeedableRng;

    fn one_loan_fund(basis: ManagementFeeBasis, default_rate: f64) -> (Fund, Portfolio, LifecycleResult) {
        let fund = Fund::new(FundConfig {
            size: 1_000_000.0,
            term: 3,
            avg_loan_size: 100_000.0,
            reinvestment_period: 0.0,
            early_exit_probability: 0.0,
            management_fee_rate: 0.02,
            management_fee_basis: basis,
            recovery_rate: 0.5,
            ..Default::default()
        })
        .unwrap();
        let mut portfolio = Portfolio::new();
        portfolio
            .add_loan(LoanTerms {
                loan_amount: Some(100_000.0),
                ltv: Some(0.5),
                zone: Some(Zone::Green),
                interest_rate: 0.1,
                origination_fee_rate: 0.01,
                appreciation_rate: 0.0,
                appreciation_share_rate: 0.5,
                default_rate,
                origination_period: 0,
                expected_exit_period: 2,
                periods_per_year: 1,
                ..Default::default()
            })
            .unwrap();
        let lifecycle = LifecycleEngine::new(&fund, None)
            .run(&mut StdRng::seed_from_u64(0), &mut portfolio)
            .unwrap();
        (fund, portfolio, lifecycle)
    }

    #[test]
    fn test_bullet_loan_flows() {
        let (fund, portfolio, lifecycle) = one_loan_fund(ManagementFeeBasis::InvestedCapital, 0.0);
        let ledger = project_cash_flows(&fund, &portfolio, &lifecycle, &LeverageResult::default());

        let p0 = ledger.row(0).unwrap();
        assert_relative_eq!(p0.capital_calls, -100_000.0);
        assert_relative_eq!(p0.origination_fees, 1_000.0);
        assert_eq!(p0.management_fees, 0.0);

        let p1 = ledger.row(1).unwrap();
        assert_relative_eq!(p1.management_fees, -2_000.0);
        assert_relative_eq!(p1.portfolio_value, 110_000.0);

        let p2 = ledger.row(2).unwrap();
        assert_relative_eq!(p2.exit_proceeds, 100_000.0);
        assert_relative_eq!(p2.interest_income, 20_000.0);
        assert_relative_eq!(p2.realized_holding_years, 2.0);
        assert_relative_eq!(p2.gross_net_cash_flow, 120_000.0);
        assert_relative_eq!(p2.net_cash_flow, 118_000.0);

        // Nothing invested during period 2, so no fee in period 3
        assert_eq!(ledger.row(3).unwrap().management_fees, 0.0);
        assert_relative_eq!(ledger.contributions.total_contribution, 99_000.0 + 2_000.0);
    }

    #[test]
    fn test_committed_basis_and_default_recovery() {
        let (fund, portfolio, lifecycle) = one_loan_fund(ManagementFeeBasis::CommittedCapital, 1.0);
        let ledger = project_cash_flows(&fund, &portfolio, &lifecycle, &LeverageResult::default());

        assert_relative_eq!(ledger.row(1).unwrap().management_fees, -20_000.0);
        let p2 = ledger.row(2).unwrap();
        assert_relative_eq!(p2.exit_proceeds, 50_000.0);
        assert_eq!(p2.interest_income, 0.0);
        assert_eq!(p2.appreciation_income, 0.0);
    }

    #[test]
    fn test_leverage_costs_reduce_net() {
        let (fund, portfolio, lifecycle) = one_loan_fund(ManagementFeeBasis::CommittedCapital, 0.0);
        let mut leverage = LeverageResult::default();
        leverage.cash_flows.insert(
            1,
            crate::leverage::LeveragePeriod {
                period: 1,
                interest: 500.0,
                commitment_fee: 100.0,
                ..Default::default()
            },
        );
        let ledger = project_cash_flows(&fund, &portfolio, &lifecycle, &leverage);
        let p1 = ledger.row(1).unwrap();
        assert_relative_eq!(p1.leverage_costs, -600.0);
        assert_relative_eq!(p1.net_cash_flow, -20_600.0);
        assert_relative_eq!(p1.gross_net_cash_flow, -600.0);
        assert_relative_eq!(p1.gross_net_cash_flow - p1.net_cash_flow, -p1.management_fees);
    }
}
