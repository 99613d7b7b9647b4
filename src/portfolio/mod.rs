//! Loan arena and aggregate portfolio metrics

mod loan;

pub use loan::{Loan, LoanId, LoanState, LoanTerms};

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::error::Result;
use crate::fund::{Zone, ZoneWeights};

/// Aggregate view over a set of loans
///
/// Always computed from the loans themselves; never stored independently.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PortfolioMetrics {
    pub loan_count: usize,
    pub total_loan_amount: f64,
    pub total_property_value: f64,
    /// Amount-weighted LTV
    pub weighted_average_ltv: f64,
    pub weighted_average_interest_rate: f64,
    pub zone_counts: BTreeMap<Zone, usize>,
    pub zone_amounts: BTreeMap<Zone, f64>,
    /// Share of total loan amount per zone (decimal)
    pub zone_percentages: BTreeMap<Zone, f64>,
    /// Amount-weighted annual default probability
    pub expected_default_rate: f64,
    /// Amount-weighted expected annual return: interest plus the fund's share of
    /// appreciation on the (levered) collateral value
    pub expected_return: f64,
}

impl PortfolioMetrics {
    pub fn from_loans<'a, I>(loans: I) -> Self
    where
        I: IntoIterator<Item = &'a Loan>,
    {
        let mut metrics = Self::default();
        let mut ltv_sum = 0.0;
        let mut rate_sum = 0.0;
        let mut default_sum = 0.0;
        let mut return_sum = 0.0;

        for loan in loans {
            metrics.loan_count += 1;
            metrics.total_loan_amount += loan.loan_amount;
            metrics.total_property_value += loan.property_value;
            *metrics.zone_counts.entry(loan.zone).or_insert(0) += 1;
            *metrics.zone_amounts.entry(loan.zone).or_insert(0.0) += loan.loan_amount;

            ltv_sum += loan.ltv * loan.loan_amount;
            rate_sum += loan.interest_rate * loan.loan_amount;
            default_sum += loan.default_rate * loan.loan_amount;
            let appreciation_yield =
                loan.appreciation_share_rate * loan.appreciation_rate * loan.property_value / loan.loan_amount;
            return_sum += (loan.interest_rate + appreciation_yield) * loan.loan_amount;
        }

        if metrics.total_loan_amount > 0.0 {
            let total = metrics.total_loan_amount;
            metrics.weighted_average_ltv = ltv_sum / total;
            metrics.weighted_average_interest_rate = rate_sum / total;
            metrics.expected_default_rate = default_sum / total;
            metrics.expected_return = return_sum / total;
            metrics.zone_percentages = metrics
                .zone_amounts
                .iter()
                .map(|(zone, amount)| (*zone, amount / total))
                .collect();
        }

        metrics
    }

    /// Current share minus target share per zone; zones in either map are reported
    pub fn zone_drift(&self, targets: &ZoneWeights) -> BTreeMap<Zone, f64> {
        let mut drift = BTreeMap::new();
        for zone in Zone::ALL {
            let current = self.zone_percentages.get(&zone).copied().unwrap_or(0.0);
            let target = targets.get(&zone).copied().unwrap_or(0.0);
            if self.zone_percentages.contains_key(&zone) || targets.contains_key(&zone) {
                drift.insert(zone, current - target);
            }
        }
        drift
    }
}

/// Owns every loan created during a simulation
///
/// Loans are never removed: exits only flag state, and ids index the arena.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Portfolio {
    loans: Vec<Loan>,
}

impl Portfolio {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            loans: Vec::with_capacity(capacity),
        }
    }

    /// Validate the terms and append the loan, returning its id
    pub fn add_loan(&mut self, terms: LoanTerms) -> Result<LoanId> {
        let id = LoanId(self.loans.len());
        self.loans.push(Loan::from_terms(id, terms)?);
        Ok(id)
    }

    pub fn get(&self, id: LoanId) -> Option<&Loan> {
        self.loans.get(id.0)
    }

    pub fn get_mut(&mut self, id: LoanId) -> Option<&mut Loan> {
        self.loans.get_mut(id.0)
    }

    pub fn loans(&self) -> &[Loan] {
        &self.loans
    }

    pub fn iter(&self) -> impl Iterator<Item = &Loan> {
        self.loans.iter()
    }

    pub fn len(&self) -> usize {
        self.loans.len()
    }

    pub fn is_empty(&self) -> bool {
        self.loans.is_empty()
    }

    pub fn ids(&self) -> impl Iterator<Item = LoanId> + '_ {
        self.loans.iter().map(|loan| loan.id)
    }

    /// Loans resolved from a set of ids; unknown ids are skipped
    pub fn select<'a>(&'a self, ids: &'a [LoanId]) -> impl Iterator<Item = &'a Loan> + 'a {
        ids.iter().filter_map(move |id| self.get(*id))
    }

    /// Metrics over every loan ever originated
    pub fn metrics(&self) -> PortfolioMetrics {
        PortfolioMetrics::from_loans(&self.loans)
    }

    pub fn metrics_for(&self, ids: &[LoanId]) -> PortfolioMetrics {
        PortfolioMetrics::from_loans(self.select(ids))
    }

    /// Loans active at `period`
    pub fn active_at(&self, period: u32) -> Vec<LoanId> {
        self.loans
            .iter()
            .filter(|loan| loan.is_active_at(period))
            .map(|loan| loan.id)
            .collect()
    }

    /// Sum of loan fair values at `period`
    pub fn fair_value(&self, period: u32) -> f64 {
        self.loans.iter().map(|loan| loan.fair_value(period)).sum()
    }
}
