//! Per-period facility draws and costs

use std::collections::BTreeMap;

use log::debug;
use serde::{Deserialize, Serialize};

use super::LeverageConfig;
use crate::error::Result;

const BPS: f64 = 10_000.0;

/// Draws and costs for one period
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct LeveragePeriod {
    pub period: u32,
    pub nav: f64,
    pub nav_facility_drawn: f64,
    pub over_advance_drawn: f64,
    pub ramp_drawn: f64,
    pub deal_note_principal: f64,
    pub total_drawn: f64,
    /// Interest for the period (positive amount, a cost to the fund)
    pub interest: f64,
    pub commitment_fee: f64,
    pub leverage_ratio: f64,
}

impl LeveragePeriod {
    pub fn total_cost(&self) -> f64 {
        self.interest + self.commitment_fee
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct LeverageMetrics {
    /// Mean of drawn / NAV over periods with positive NAV
    pub average_leverage_ratio: f64,
    pub max_drawn: f64,
    pub total_interest: f64,
    pub total_commitment_fees: f64,
    pub total_cost: f64,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct LeverageResult {
    pub cash_flows: BTreeMap<u32, LeveragePeriod>,
    pub metrics: LeverageMetrics,
}

impl LeverageResult {
    pub fn is_empty(&self) -> bool {
        self.cash_flows.is_empty()
    }

    /// Interest plus fees for a period; zero when nothing was drawn
    pub fn cost_at(&self, period: u32) -> f64 {
        self.cash_flows.get(&period).map(LeveragePeriod::total_cost).unwrap_or(0.0)
    }
}

/// Compute facility draws, interest and fees from a NAV series
///
/// Rates in the configuration are annual and are divided by
/// `periods_per_year`. Dynamic rules are applied before each period's draws.
pub fn process_leverage(
    nav_by_period: &BTreeMap<u32, f64>,
    config: &LeverageConfig,
    committed_capital: f64,
    periods_per_year: u32,
) -> Result<LeverageResult> {
    if config.is_inactive() {
        return Ok(LeverageResult::default());
    }
    let ppy = periods_per_year.max(1) as f64;

    let mut result = LeverageResult::default();
    let mut ratio_sum = 0.0;
    let mut ratio_count = 0usize;

    for (&period, &nav) in nav_by_period {
        let effective = config.effective_for(period)?;
        let nav = nav.max(0.0);
        let mut row = LeveragePeriod {
            period,
            nav,
            ..Default::default()
        };

        let nav_cfg = &effective.nav_facility;
        if nav_cfg.enabled {
            let mut limit = nav * nav_cfg.nav_multiplier;
            let mut over_advance_limit = 0.0;
            if effective.over_advance.enabled {
                let oa = &effective.over_advance;
                over_advance_limit = nav * oa.eligible_nav_share * oa.advance_rate;
                limit += over_advance_limit;
            }
            let drawn = limit * nav_cfg.utilization;
            row.over_advance_drawn = over_advance_limit * nav_cfg.utilization;
            row.nav_facility_drawn = drawn - row.over_advance_drawn;

            row.interest += row.nav_facility_drawn * nav_cfg.spread_bps / BPS / ppy;
            row.interest +=
                row.over_advance_drawn * (nav_cfg.spread_bps + effective.over_advance.premium_bps) / BPS / ppy;
            row.commitment_fee += (limit - drawn) * nav_cfg.commitment_fee_bps / BPS / ppy;
        }

        let ramp = &effective.ramp_facility;
        if ramp.enabled && ramp.draw_start_period <= period && period < ramp.draw_end_period {
            row.ramp_drawn = committed_capital * ramp.limit_pct_commitment;
            row.interest += row.ramp_drawn * ramp.spread_bps / BPS / ppy;
        }

        if effective.deal_note.enabled {
            row.deal_note_principal = nav * effective.deal_note.note_pct_nav;
            row.interest += row.deal_note_principal * effective.deal_note.note_rate / ppy;
        }

        row.total_drawn = row.nav_facility_drawn + row.over_advance_drawn + row.ramp_drawn + row.deal_note_principal;
        if nav > 0.0 {
            row.leverage_ratio = row.total_drawn / nav;
            ratio_sum += row.leverage_ratio;
            ratio_count += 1;
        }

        result.metrics.max_drawn = result.metrics.max_drawn.max(row.total_drawn);
        result.metrics.total_interest += row.interest;
        result.metrics.total_commitment_fees += row.commitment_fee;
        result.cash_flows.insert(period, row);
    }

    if ratio_count > 0 {
        result.metrics.average_leverage_ratio = ratio_sum / ratio_count as f64;
    }
    result.metrics.total_cost = result.metrics.total_interest + result.metrics.total_commitment_fees;
    debug!(
        "Leverage: {} periods, max drawn {:.0}, total cost {:.0}",
        result.cash_flows.len(),
        result.metrics.max_drawn,
        result.metrics.total_cost
    );

    Ok(result)
}
