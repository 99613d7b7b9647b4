//! LP/GP distribution waterfall
//!
//! Tiers: return of capital, preferred return, GP catch-up, then the carried
//! interest split. Investor shares are divided between LP and GP pro rata to
//! the GP commitment.

use std::collections::BTreeMap;

use log::debug;
use serde::{Deserialize, Serialize};

use super::CashFlowLedger;
use crate::fund::{FundConfig, WaterfallStructure};

/// Waterfall split for one period
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct WaterfallPeriod {
    pub period: u32,
    /// Cash entering the waterfall (negative = contribution)
    pub distributable: f64,
    pub lp_distribution: f64,
    /// GP share as a co-investor, excluding carry
    pub gp_distribution: f64,
    /// Carried interest paid to the GP (positive amount)
    pub carried_interest: f64,
    pub lp_net_cash_flow: f64,
    pub gp_net_cash_flow: f64,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct WaterfallResult {
    pub structure: WaterfallStructure,
    pub periods: BTreeMap<u32, WaterfallPeriod>,
    pub lp_contributions: f64,
    pub gp_contributions: f64,
    pub total_lp_distributions: f64,
    pub total_gp_distributions: f64,
    pub total_carried_interest: f64,
}

/// Running tier balances for one waterfall (the whole fund, or one deal)
#[derive(Debug, Clone, Default)]
struct Tiers {
    unreturned_capital: f64,
    preferred_owed: f64,
    /// Profit paid to investors so far
    investor_profit: f64,
    carry_paid: f64,
}

impl Tiers {
    /// Split `amount` into (investors, carry)
    fn distribute(&mut self, amount: f64, carry_rate: f64, catch_up_rate: f64) -> (f64, f64) {
        let mut remaining = amount;
        let mut investors = 0.0;
        let mut carry = 0.0;

        let capital = remaining.min(self.unreturned_capital);
        self.unreturned_capital -= capital;
        investors += capital;
        remaining -= capital;

        let preferred = remaining.min(self.preferred_owed);
        self.preferred_owed -= preferred;
        self.investor_profit += preferred;
        investors += preferred;
        remaining -= preferred;

        // Catch-up until carry equals carry_rate of total profit
        if remaining > 0.0 && carry_rate > 0.0 && carry_rate < 1.0 && catch_up_rate > 0.0 {
            let k = carry_rate / (1.0 - carry_rate);
            let shortfall = k * self.investor_profit - self.carry_paid;
            let denominator = catch_up_rate - k * (1.0 - catch_up_rate);
            if shortfall > 0.0 && denominator > 0.0 {
                let tier = (shortfall / denominator).min(remaining);
                let to_gp = tier * catch_up_rate;
                carry += to_gp;
                self.carry_paid += to_gp;
                investors += tier - to_gp;
                self.investor_profit += tier - to_gp;
                remaining -= tier;
            }
        }

        if remaining > 0.0 {
            let to_gp = remaining * carry_rate;
            carry += to_gp;
            self.carry_paid += to_gp;
            investors += remaining - to_gp;
            self.investor_profit += remaining - to_gp;
        }

        (investors, carry)
    }
}

/// Split each period's distributable cash between LP and GP
///
/// European: one fund-wide waterfall; the preferred return compounds on
/// unreturned capital every period and all contributed capital is returned
/// before any carry. American: each period's realisations form a deal whose
/// cost basis and preferred return (over the realised loans' holding period)
/// are returned before carry on that deal alone.
pub fn apply_waterfall(ledger: &CashFlowLedger, config: &FundConfig) -> WaterfallResult {
    let gp_share = config.gp_commitment_percentage;
    let carry_rate = config.carried_interest_rate;
    let catch_up = config.catch_up_rate;
    let period_hurdle = (1.0 + config.hurdle_rate).powf(1.0 / ledger.periods_per_year.max(1) as f64) - 1.0;

    let mut result = WaterfallResult {
        structure: config.waterfall_structure,
        ..Default::default()
    };
    let mut fund_tiers = Tiers::default();

    for (&period, row) in &ledger.rows {
        let distributable = row.distributable();
        let mut split = WaterfallPeriod {
            period,
            distributable,
            ..Default::default()
        };

        if period > 0 {
            fund_tiers.preferred_owed +=
                (fund_tiers.unreturned_capital + fund_tiers.preferred_owed) * period_hurdle;
        }

        if distributable < 0.0 {
            let contribution = -distributable;
            fund_tiers.unreturned_capital += contribution;
            split.lp_net_cash_flow = -contribution * (1.0 - gp_share);
            split.gp_net_cash_flow = -contribution * gp_share;
            result.lp_contributions += contribution * (1.0 - gp_share);
            result.gp_contributions += contribution * gp_share;
        } else if distributable > 0.0 {
            let (investors, carry) = match config.waterfall_structure {
                WaterfallStructure::European => fund_tiers.distribute(distributable, carry_rate, catch_up),
                WaterfallStructure::American => {
                    let basis = row.realized_cost.min(distributable);
                    let mut deal = Tiers {
                        unreturned_capital: basis,
                        preferred_owed: basis
                            * ((1.0 + config.hurdle_rate).powf(row.realized_holding_years) - 1.0),
                        ..Default::default()
                    };
                    deal.distribute(distributable, carry_rate, catch_up)
                }
            };
            split.lp_distribution = investors * (1.0 - gp_share);
            split.gp_distribution = investors * gp_share;
            split.carried_interest = carry;
            split.lp_net_cash_flow = split.lp_distribution;
            split.gp_net_cash_flow = split.gp_distribution + carry;

            result.total_lp_distributions += split.lp_distribution;
            result.total_gp_distributions += split.gp_distribution + carry;
            result.total_carried_interest += carry;
        }

        result.periods.insert(period, split);
    }

    debug!(
        "{:?} waterfall: LP in {:.0} out {:.0}, carry {:.0}",
        result.structure, result.lp_contributions, result.total_lp_distributions, result.total_carried_interest
    );
    result
}
