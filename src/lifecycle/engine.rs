//! Period-by-period loan lifecycle

use std::collections::{BTreeMap, BTreeSet};

use log::{debug, info};
use rand::Rng;

use super::defaults::{correlated_defaults, independent_defaults};
use super::rebalancing::rebalanced_weights;
use super::snapshot::{LifecycleResult, PeriodMetrics, PeriodSnapshot, ZoneShare};
use crate::dataset::ZoneDataSource;
use crate::error::{Result, SimulationError};
use crate::fund::{normalize_weights, Capabilities, Fund, MarketPeriod, Zone, ZoneWeights};
use crate::generator::PortfolioGenerator;
use crate::portfolio::{Loan, LoanId, Portfolio};

/// Minimum periods left in the term for new reinvestment loans
const MIN_REINVESTMENT_RUNWAY: u32 = 2;

fn loan_mut(portfolio: &mut Portfolio, id: LoanId) -> Result<&mut Loan> {
    portfolio
        .get_mut(id)
        .ok_or_else(|| SimulationError::InvalidLoan(format!("unknown loan id {}", id.0)))
}

fn loan_ref(portfolio: &Portfolio, id: LoanId) -> Result<&Loan> {
    portfolio
        .get(id)
        .ok_or_else(|| SimulationError::InvalidLoan(format!("unknown loan id {}", id.0)))
}

/// Cash produced by the loans exiting in one period
#[derive(Debug, Default)]
struct ExitSummary {
    exited: Vec<LoanId>,
    exited_amount: f64,
    exit_value: f64,
    recovery_value: f64,
    default_count: usize,
}

/// Advances a portfolio through every period of the fund term
///
/// One engine covers yearly and monthly granularity; optional behaviours are
/// selected by a capability set instead of separate code paths.
pub struct LifecycleEngine<'a> {
    fund: &'a Fund,
    generator: PortfolioGenerator<'a>,
    capabilities: Capabilities,
    targets: ZoneWeights,
}

impl<'a> LifecycleEngine<'a> {
    pub fn new(fund: &'a Fund, dataset: Option<&'a dyn ZoneDataSource>) -> Self {
        let config = fund.config();
        Self {
            fund,
            generator: PortfolioGenerator::new(fund, dataset),
            capabilities: fund.capabilities(),
            targets: normalize_weights(&config.zone_allocations).unwrap_or_else(|| config.zone_allocations.clone()),
        }
    }

    /// Override the capabilities derived from the fund configuration
    pub fn with_capabilities(mut self, capabilities: Capabilities) -> Self {
        self.capabilities = capabilities;
        self
    }

    pub fn capabilities(&self) -> Capabilities {
        self.capabilities
    }

    /// Run periods 0..=term, mutating loans in place
    pub fn run<R: Rng>(&self, rng: &mut R, portfolio: &mut Portfolio) -> Result<LifecycleResult> {
        let term = self.fund.term_periods();
        let clock = self.fund.clock();
        let mut active: BTreeSet<LoanId> = BTreeSet::new();
        let mut snapshots = BTreeMap::new();

        for period in 0..=term {
            let snapshot = self.process_period(rng, portfolio, &mut active, period)?;
            snapshots.insert(period, snapshot);
        }

        let result = LifecycleResult {
            granularity: clock.granularity,
            periods_per_year: clock.periods_per_year,
            term_periods: term,
            snapshots,
        };
        info!(
            "Lifecycle complete: {} periods, {} loans, {} exits, {} defaults, {:.0} reinvested",
            term + 1,
            portfolio.len(),
            result.total_exits(),
            result.total_defaults(),
            result.total_reinvested()
        );
        Ok(result)
    }

    fn market_for(&self, period: u32) -> MarketPeriod {
        if self.capabilities.market_conditions {
            self.fund.market_period(period)
        } else {
            MarketPeriod::default()
        }
    }

    fn process_period<R: Rng>(
        &self,
        rng: &mut R,
        portfolio: &mut Portfolio,
        active: &mut BTreeSet<LoanId>,
        period: u32,
    ) -> Result<PeriodSnapshot> {
        let market = self.market_for(period);
        let held: Vec<LoanId> = active.iter().copied().collect();

        let appreciation_income = self.appreciate(portfolio, &held, &market)?;
        let exiting = self.select_exits(rng, portfolio, &held, period, &market)?;
        let exits = self.resolve_exits(rng, portfolio, &exiting, period, &market)?;
        for id in &exits.exited {
            active.remove(id);
        }

        let reinvestment_capital = self.reinvest(rng, portfolio, active, period, exits.exit_value)?;

        // Activate everything originating now: initial tranches and reinvestments
        let mut new_deployments = Vec::new();
        let mut new_reinvestments = Vec::new();
        for loan in portfolio.iter().filter(|l| l.origination_period == period && !l.is_exited) {
            active.insert(loan.id);
            if loan.reinvested {
                new_reinvestments.push(loan.id);
            } else {
                new_deployments.push(loan.id);
            }
        }

        let active_loans: Vec<LoanId> = active.iter().copied().collect();
        let metrics = self.period_metrics(
            portfolio,
            period,
            &active_loans,
            &new_deployments,
            &new_reinvestments,
            &exits,
            appreciation_income,
            reinvestment_capital,
        );
        debug!(
            "Period {}: {} active, {} exited ({} defaults), {} reinvested, NAV {:.0}",
            period,
            metrics.active_count,
            metrics.exited_count,
            metrics.default_count,
            metrics.new_reinvestment_count,
            metrics.portfolio_value
        );

        Ok(PeriodSnapshot {
            period,
            active_loans,
            exited_loans: exits.exited,
            new_reinvestments,
            new_deployments,
            metrics,
        })
    }

    /// Grow collateral values of held loans by one period; returns the fund's
    /// share of the value change
    fn appreciate(&self, portfolio: &mut Portfolio, held: &[LoanId], market: &MarketPeriod) -> Result<f64> {
        let ppy = self.fund.clock().periods_per_year as f64;
        let mut income = 0.0;
        for &id in held {
            let loan = loan_mut(portfolio, id)?;
            let before = loan.current_property_value;
            let growth = loan.appreciation_rate * market.appreciation_multiplier / ppy;
            loan.current_property_value = before * (1.0 + growth);
            income += loan.appreciation_share_rate * (loan.current_property_value - before);
        }
        Ok(income)
    }

    /// Loans leaving the active set this period: scheduled exits plus early repayments
    fn select_exits<R: Rng>(
        &self,
        rng: &mut R,
        portfolio: &Portfolio,
        held: &[LoanId],
        period: u32,
        market: &MarketPeriod,
    ) -> Result<Vec<LoanId>> {
        let config = self.fund.config();
        let ppy = self.fund.clock().periods_per_year as f64;
        let early_probability =
            (config.early_exit_probability * market.early_exit_multiplier / ppy).clamp(0.0, 1.0);
        let min_holding = self.fund.min_holding_periods();

        let mut exiting = Vec::new();
        for &id in held {
            let loan = loan_ref(portfolio, id)?;
            if loan.origination_period >= period {
                continue;
            }
            let scheduled = period >= loan.expected_exit_period;
            let early = !scheduled
                && period - loan.origination_period >= min_holding
                && rng.gen::<f64>() < early_probability;
            if scheduled || early {
                exiting.push(id);
            }
        }
        Ok(exiting)
    }

    /// Draw defaults for the exiting cohort, flag loans and value the exits
    fn resolve_exits<R: Rng>(
        &self,
        rng: &mut R,
        portfolio: &mut Portfolio,
        exiting: &[LoanId],
        period: u32,
        market: &MarketPeriod,
    ) -> Result<ExitSummary> {
        let config = self.fund.config();
        let ppy = self.fund.clock().periods_per_year as f64;

        let mut zones = Vec::with_capacity(exiting.len());
        let mut probabilities = Vec::with_capacity(exiting.len());
        for &id in exiting {
            let loan = loan_ref(portfolio, id)?;
            zones.push(loan.zone);
            // Annual rate converted by simple division in the monthly case
            probabilities.push(loan.default_rate * market.default_multiplier_for(loan.zone) / ppy);
        }

        let defaults = match (self.capabilities.correlated_defaults, config.default_correlation) {
            (true, Some(correlation)) => correlated_defaults(rng, &zones, &probabilities, &correlation)?,
            _ => independent_defaults(rng, &probabilities),
        };

        let mut summary = ExitSummary::default();
        for (&id, is_default) in exiting.iter().zip(defaults) {
            let loan = loan_mut(portfolio, id)?;
            loan.mark_exited(period, is_default)?;
            let value = loan.exit_value(period, config.recovery_rate);

            summary.exited_amount += loan.loan_amount;
            summary.exit_value += value;
            if is_default {
                summary.default_count += 1;
                summary.recovery_value += value;
            }
            summary.exited.push(id);
        }
        Ok(summary)
    }

    /// Origination periods available to capital recycled in `period`
    fn reinvestment_schedule(&self, period: u32) -> Vec<u32> {
        let config = self.fund.config();
        let term = self.fund.term_periods();
        let last = self.fund.reinvestment_periods();
        let has_runway = |p: u32| p <= last && term.saturating_sub(p) >= MIN_REINVESTMENT_RUNWAY;

        if !has_runway(period) {
            return Vec::new();
        }
        if config.spread_reinvestment {
            let window = self.fund.deployment_periods().max(1);
            (period + 1..=period + window).filter(|&p| has_runway(p)).collect()
        } else {
            vec![period]
        }
    }

    /// Recycle exit proceeds into new loans; returns the capital earmarked
    fn reinvest<R: Rng>(
        &self,
        rng: &mut R,
        portfolio: &mut Portfolio,
        active: &BTreeSet<LoanId>,
        period: u32,
        exit_value: f64,
    ) -> Result<f64> {
        let config = self.fund.config();
        if exit_value <= 0.0 || config.reinvestment_rate <= 0.0 {
            return Ok(0.0);
        }
        let schedule = self.reinvestment_schedule(period);
        if schedule.is_empty() {
            return Ok(0.0);
        }

        let capital = exit_value * config.reinvestment_rate;
        let weights = if self.capabilities.zone_rebalancing {
            let current = portfolio.metrics_for(&active.iter().copied().collect::<Vec<_>>()).zone_amounts;
            rebalanced_weights(&self.targets, &current, capital, config.rebalancing_strength)
        } else {
            self.targets.clone()
        };

        let ids = self.generator.reinvest(rng, portfolio, capital, &weights, &schedule)?;
        if ids.is_empty() {
            return Ok(0.0);
        }
        debug!("Period {}: reinvesting {:.0} into {} loans", period, capital, ids.len());
        Ok(capital)
    }

    #[allow(clippy::too_many_arguments)]
    fn period_metrics(
        &self,
        portfolio: &Portfolio,
        period: u32,
        active_loans: &[LoanId],
        new_deployments: &[LoanId],
        new_reinvestments: &[LoanId],
        exits: &ExitSummary,
        appreciation_income: f64,
        reinvestment_capital: f64,
    ) -> PeriodMetrics {
        let active = portfolio.metrics_for(active_loans);
        let amount = |ids: &[LoanId]| portfolio.select(ids).map(|l| l.loan_amount).sum::<f64>();

        let zone_distribution: BTreeMap<Zone, ZoneShare> = active
            .zone_counts
            .iter()
            .map(|(zone, count)| {
                (
                    *zone,
                    ZoneShare {
                        count: *count,
                        amount: active.zone_amounts.get(zone).copied().unwrap_or(0.0),
                        percentage: active.zone_percentages.get(zone).copied().unwrap_or(0.0),
                    },
                )
            })
            .collect();
        let zone_drift = if active.loan_count > 0 {
            active.zone_drift(&self.targets)
        } else {
            BTreeMap::new()
        };

        PeriodMetrics {
            active_count: active.loan_count,
            active_amount: active.total_loan_amount,
            exited_count: exits.exited.len(),
            exited_amount: exits.exited_amount,
            new_deployment_count: new_deployments.len(),
            new_deployment_amount: amount(new_deployments),
            new_reinvestment_count: new_reinvestments.len(),
            new_reinvestment_amount: amount(new_reinvestments),
            default_count: exits.default_count,
            default_rate: if exits.exited.is_empty() {
                0.0
            } else {
                exits.default_count as f64 / exits.exited.len() as f64
            },
            interest_income: portfolio.select(active_loans).map(Loan::period_interest).sum(),
            appreciation_income,
            exit_value: exits.exit_value,
            recovery_value: exits.recovery_value,
            reinvestment_capital,
            portfolio_value: portfolio.select(active_loans).map(|l| l.fair_value(period)).sum(),
            zone_distribution,
            zone_drift,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fund::{DefaultCorrelation, FundConfig, Granularity, MarketConditions};
    use crate::portfolio::{LoanState, LoanTerms};
    use approx::assert_relative_eq;
    use rand::rngs::StdRng;
    use rand::SeedableRng;

    fn small_config() -> FundConfig {
        FundConfig {
            size: 10_000_000.0,
            term: 5,
            reinvestment_period: 3.0,
            ..Default::default()
        }
    }

    fn run(config: FundConfig, seed: u64) -> (Fund, Portfolio, LifecycleResult) {
        let fund = Fund::new(config).unwrap();
        let mut rng = StdRng::seed_from_u64(seed);
        let mut portfolio = PortfolioGenerator::new(&fund, None).generate(&mut rng).unwrap();
        let result = LifecycleEngine::new(&fund, None).run(&mut rng, &mut portfolio).unwrap();
        (fund, portfolio, result)
    }

    fn manual_loan(origination: u32, exit: u32) -> LoanTerms {
        LoanTerms {
            loan_amount: Some(100_000.0),
            ltv: Some(0.5),
            zone: Some(Zone::Green),
            interest_rate: 0.06,
            appreciation_rate: 0.05,
            appreciation_share_rate: 0.5,
            default_rate: 0.0,
            origination_period: origination,
            expected_exit_period: exit,
            periods_per_year: 1,
            ..Default::default()
        }
    }

    #[test]
    fn test_every_period_present_and_continuous() {
        for granularity in [Granularity::Yearly, Granularity::Monthly] {
            let (fund, _, result) = run(
                FundConfig {
                    granularity,
                    ..small_config()
                },
                42,
            );
            let term = fund.term_periods();
            assert_eq!(result.snapshots.len() as u32, term + 1);
            assert!((0..=term).all(|p| result.snapshot(p).is_some()));
            assert_eq!(result.continuity_violation(), None);
        }
    }

    #[test]
    fn test_exits_follow_origination() {
        let (_, portfolio, _) = run(
            FundConfig {
                early_exit_probability: 0.5,
                spread_reinvestment: true,
                ..small_config()
            },
            7,
        );
        for loan in portfolio.iter() {
            if let Some(exit) = loan.actual_exit_period {
                assert!(exit >= loan.origination_period + 1);
                assert!(loan.is_exited);
            }
        }
    }

    #[test]
    fn test_reinvestment_window_and_runway() {
        let (fund, portfolio, result) = run(small_config(), 3);
        let last = fund.reinvestment_periods();
        let term = fund.term_periods();

        assert!(portfolio.iter().any(|l| l.reinvested));
        for loan in portfolio.iter().filter(|l| l.reinvested) {
            assert!(loan.origination_period <= last);
            assert!(term - loan.origination_period >= MIN_REINVESTMENT_RUNWAY);
        }
        for period in last + 1..=term {
            assert!(result.snapshot(period).unwrap().new_reinvestments.is_empty());
        }
    }

    #[test]
    fn test_deterministic_exit_value_and_interest() {
        let fund = Fund::new(FundConfig {
            reinvestment_period: 0.0,
            early_exit_probability: 0.0,
            ..small_config()
        })
        .unwrap();
        let mut portfolio = Portfolio::new();
        let id = portfolio.add_loan(manual_loan(0, 3)).unwrap();

        let mut rng = StdRng::seed_from_u64(0);
        let result = LifecycleEngine::new(&fund, None).run(&mut rng, &mut portfolio).unwrap();
        let loan = portfolio.get(id).unwrap();

        assert_eq!(loan.actual_exit_period, Some(3));
        assert_eq!(loan.state_at(3), LoanState::Exited);
        let gain = 200_000.0 * (1.05f64.powi(3) - 1.0);
        let expected = 100_000.0 + 100_000.0 * 0.06 * 3.0 + 0.5 * gain;
        assert_relative_eq!(result.snapshot(3).unwrap().metrics.exit_value, expected, max_relative = 1e-12);
        assert_relative_eq!(result.snapshot(1).unwrap().metrics.interest_income, 6_000.0);
        assert_eq!(result.snapshot(0).unwrap().new_deployments, vec![id]);
        assert!(result.snapshot(4).unwrap().active_loans.is_empty());
    }

    #[test]
    fn test_certain_default_recovers_fraction() {
        let fund = Fund::new(FundConfig {
            reinvestment_period: 0.0,
            early_exit_probability: 0.0,
            recovery_rate: 0.6,
            ..small_config()
        })
        .unwrap();
        let mut portfolio = Portfolio::new();
        portfolio
            .add_loan(LoanTerms {
                default_rate: 1.0,
                ..manual_loan(1, 2)
            })
            .unwrap();

        let result = LifecycleEngine::new(&fund, None)
            .run(&mut StdRng::seed_from_u64(0), &mut portfolio)
            .unwrap();
        let metrics = &result.snapshot(2).unwrap().metrics;
        assert_eq!(metrics.default_count, 1);
        assert_eq!(metrics.default_rate, 1.0);
        assert_relative_eq!(metrics.recovery_value, 60_000.0);
        assert_eq!(result.total_defaults(), 1);
    }

    #[test]
    fn test_market_downturn_suppresses_appreciation() {
        let fund = Fund::new(FundConfig {
            reinvestment_period: 0.0,
            early_exit_probability: 0.0,
            market_conditions: Some(MarketConditions::downturn(0, 10, 1.0)),
            ..small_config()
        })
        .unwrap();
        let mut with_market = Portfolio::new();
        with_market.add_loan(manual_loan(0, 4)).unwrap();
        let mut without_market = with_market.clone();

        let engine = LifecycleEngine::new(&fund, None);
        assert!(engine.capabilities().market_conditions);
        let stressed = engine.run(&mut StdRng::seed_from_u64(1), &mut with_market).unwrap();
        let neutral = LifecycleEngine::new(&fund, None)
            .with_capabilities(Capabilities::default())
            .run(&mut StdRng::seed_from_u64(1), &mut without_market)
            .unwrap();

        let income = |r: &LifecycleResult| r.snapshots.values().map(|s| s.metrics.appreciation_income).sum::<f64>();
        assert!(income(&stressed) < income(&neutral));
    }

    #[test]
    fn test_rebalancing_reduces_drift() {
        let config = FundConfig {
            zone_allocations: BTreeMap::from([(Zone::Green, 0.6), (Zone::Orange, 0.3), (Zone::Red, 0.1)]),
            zone_allocation_precision: 1.0,
            default_rates: BTreeMap::from([(Zone::Green, 0.0), (Zone::Orange, 0.0), (Zone::Red, 0.0)]),
            zone_rebalancing_enabled: true,
            rebalancing_strength: 1.0,
            reinvestment_period: 5.0,
            term: 8,
            avg_loan_exit_year: 1.0,
            exit_year_std_dev: 0.0,
            early_exit_probability: 0.0,
            ..small_config()
        };
        let fund = Fund::new(config).unwrap();
        let mut portfolio = Portfolio::new();
        // Everything starts in red
        for _ in 0..20 {
            portfolio
                .add_loan(LoanTerms {
                    zone: Some(Zone::Red),
                    loan_amount: Some(250_000.0),
                    ..manual_loan(0, 10)
                })
                .unwrap();
        }
        for _ in 0..4 {
            portfolio.add_loan(manual_loan(0, 1)).unwrap();
        }

        let result = LifecycleEngine::new(&fund, None)
            .run(&mut StdRng::seed_from_u64(2), &mut portfolio)
            .unwrap();
        let drifts: Vec<f64> = (0..=fund.reinvestment_periods())
            .map(|p| result.snapshot(p).unwrap().metrics.total_drift())
            .collect();
        for pair in drifts.windows(2) {
            assert!(pair[1] <= pair[0] + 1e-12, "drift rose from {} to {}", pair[0], pair[1]);
        }
        assert!(drifts[drifts.len() - 1] < drifts[0], "drifts {:?}", drifts);
    }

    #[test]
    fn test_correlated_defaults_capability() {
        let config = FundConfig {
            default_correlation: Some(DefaultCorrelation {
                same_zone: 0.5,
                cross_zone: 0.2,
            }),
            ..small_config()
        };
        let (fund, _, result) = run(config, 5);
        assert!(fund.capabilities().correlated_defaults);
        assert_eq!(result.continuity_violation(), None);
    }

    #[test]
    fn test_monthly_correlated_defaults_are_deannualised_and_cluster_by_zone() {
        let fund = Fund::new(FundConfig {
            granularity: Granularity::Monthly,
            reinvestment_period: 0.0,
            early_exit_probability: 0.0,
            default_correlation: Some(DefaultCorrelation {
                same_zone: 0.95,
                cross_zone: 0.0,
            }),
            ..small_config()
        })
        .unwrap();
        let engine = LifecycleEngine::new(&fund, None);
        assert!(engine.capabilities().correlated_defaults);

        let runs = 500;
        let mut total_defaults = 0usize;
        let mut green_defaults = Vec::with_capacity(runs);
        for seed in 0..runs as u64 {
            let mut portfolio = Portfolio::new();
            for i in 0..20 {
                portfolio
                    .add_loan(LoanTerms {
                        zone: Some(if i % 2 == 0 { Zone::Green } else { Zone::Red }),
                        default_rate: 1.0,
                        periods_per_year: 12,
                        ..manual_loan(0, 12)
                    })
                    .unwrap();
            }
            let result = engine.run(&mut StdRng::seed_from_u64(seed), &mut portfolio).unwrap();
            total_defaults += result.snapshot(12).unwrap().metrics.default_count;
            green_defaults.push(portfolio.iter().filter(|l| l.zone == Zone::Green && l.is_default).count());
        }

        // Annual rate 1.0 is drawn as 1/12 in a monthly period
        let mean = total_defaults as f64 / runs as f64;
        assert!((mean - 20.0 / 12.0).abs() < 0.6, "mean defaults {}", mean);

        let n = runs as f64;
        let green_mean = green_defaults.iter().sum::<usize>() as f64 / n;
        let variance = green_defaults
            .iter()
            .map(|&c| (c as f64 - green_mean).powi(2))
            .sum::<f64>()
            / (n - 1.0);
        // Binomial(10, 1/12) variance is about 0.76
        assert!(variance > 1.5, "green default variance {}", variance);
    }

    #[test]
    fn test_monthly_interest_is_per_month() {
        let fund = Fund::new(FundConfig {
            granularity: Granularity::Monthly,
            reinvestment_period: 0.0,
            early_exit_probability: 0.0,
            ..small_config()
        })
        .unwrap();
        let mut portfolio = Portfolio::new();
        portfolio
            .add_loan(LoanTerms {
                periods_per_year: 12,
                ..manual_loan(0, 24)
            })
            .unwrap();
        let result = LifecycleEngine::new(&fund, None)
            .run(&mut StdRng::seed_from_u64(0), &mut portfolio)
            .unwrap();

        assert_relative_eq!(result.snapshot(1).unwrap().metrics.interest_income, 500.0);
        assert_eq!(result.snapshot(24).unwrap().exited_loans.len(), 1);
    }
}
