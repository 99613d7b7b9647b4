//! Per-period portfolio snapshots emitted by the lifecycle engine

use std::collections::{BTreeMap, BTreeSet};

use serde::{Deserialize, Serialize};

use crate::fund::{Granularity, Zone};
use crate::portfolio::LoanId;

/// Count, amount and share of one zone within the active set
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ZoneShare {
    pub count: usize,
    pub amount: f64,
    pub percentage: f64,
}

/// Metrics for one period
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PeriodMetrics {
    pub active_count: usize,
    pub active_amount: f64,
    pub exited_count: usize,
    pub exited_amount: f64,
    pub new_deployment_count: usize,
    pub new_deployment_amount: f64,
    pub new_reinvestment_count: usize,
    pub new_reinvestment_amount: f64,
    pub default_count: usize,
    /// Defaults / exits this period
    pub default_rate: f64,
    /// Accrued interest on the active set for the period
    pub interest_income: f64,
    /// Fund share of property value change on loans held during the period
    pub appreciation_income: f64,
    /// Cash returned by loans exiting this period
    pub exit_value: f64,
    /// Part of `exit_value` from defaulted loans
    pub recovery_value: f64,
    /// Capital earmarked for reinvestment this period
    pub reinvestment_capital: f64,
    /// Fair value of the active set at period end
    pub portfolio_value: f64,
    pub zone_distribution: BTreeMap<Zone, ZoneShare>,
    /// Current share minus target share per zone
    pub zone_drift: BTreeMap<Zone, f64>,
}

impl PeriodMetrics {
    /// Sum of absolute zone drift
    pub fn total_drift(&self) -> f64 {
        self.zone_drift.values().map(|d| d.abs()).sum()
    }
}

/// State of the portfolio at the end of one period
///
/// Loan lists are index sets into the portfolio arena.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PeriodSnapshot {
    pub period: u32,
    pub active_loans: Vec<LoanId>,
    pub exited_loans: Vec<LoanId>,
    pub new_reinvestments: Vec<LoanId>,
    /// Initial-deployment loans activated this period
    pub new_deployments: Vec<LoanId>,
    pub metrics: PeriodMetrics,
}

impl PeriodSnapshot {
    pub fn empty(period: u32) -> Self {
        Self {
            period,
            ..Default::default()
        }
    }
}

/// Period-indexed snapshots covering 0..=term with no gaps
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LifecycleResult {
    pub granularity: Granularity,
    pub periods_per_year: u32,
    pub term_periods: u32,
    pub snapshots: BTreeMap<u32, PeriodSnapshot>,
}

impl LifecycleResult {
    pub fn snapshot(&self, period: u32) -> Option<&PeriodSnapshot> {
        self.snapshots.get(&period)
    }

    pub fn periods(&self) -> impl Iterator<Item = u32> + '_ {
        self.snapshots.keys().copied()
    }

    pub fn total_defaults(&self) -> usize {
        self.snapshots.values().map(|s| s.metrics.default_count).sum()
    }

    pub fn total_exits(&self) -> usize {
        self.snapshots.values().map(|s| s.metrics.exited_count).sum()
    }

    pub fn total_reinvested(&self) -> f64 {
        self.snapshots.values().map(|s| s.metrics.new_reinvestment_amount).sum()
    }

    /// NAV (fair value of active loans) by period
    pub fn nav_by_period(&self) -> BTreeMap<u32, f64> {
        self.snapshots
            .iter()
            .map(|(p, s)| (*p, s.metrics.portfolio_value))
            .collect()
    }

    /// First period at which
    /// `active(p) != active(p-1) - exited(p) + new_reinvestments(p) + new_deployments(p)`
    pub fn continuity_violation(&self) -> Option<u32> {
        let mut previous: BTreeSet<LoanId> = BTreeSet::new();
        for period in 0..=self.term_periods {
            let Some(snapshot) = self.snapshots.get(&period) else {
                return Some(period);
            };
            let mut expected = previous.clone();
            for id in &snapshot.exited_loans {
                expected.remove(id);
            }
            expected.extend(snapshot.new_reinvestments.iter().copied());
            expected.extend(snapshot.new_deployments.iter().copied());

            let actual: BTreeSet<LoanId> = snapshot.active_loans.iter().copied().collect();
            if actual != expected {
                return Some(period);
            }
            previous = actual;
        }
        None
    }
}
