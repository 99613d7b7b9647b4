//! Synthetic loan generation for initial deployment and reinvestment

use log::{debug, info};
use rand::Rng;

use crate::dataset::ZoneDataSource;
use crate::distributions::{generate_zone_allocation, skew_normal, truncated_normal};
use crate::error::Result;
use crate::fund::{DeploymentPace, Fund, Zone, ZoneWeights};
use crate::portfolio::{LoanId, LoanTerms, Portfolio};

/// Position in [0, 1) of the `index`-th of `count` loans under a pacing curve
///
/// Each pace is the inverse of a cumulative deployment curve evaluated at the
/// loan's midpoint quantile.
pub fn deployment_fraction(pace: DeploymentPace, index: usize, count: usize) -> f64 {
    if count == 0 {
        return 0.0;
    }
    let t = (index as f64 + 0.5) / count as f64;
    match pace {
        DeploymentPace::Even => t,
        // CDF 1 - (1 - s)^2
        DeploymentPace::FrontLoaded => 1.0 - (1.0 - t).sqrt(),
        // CDF s^2
        DeploymentPace::BackLoaded => t.sqrt(),
        // Triangular CDF peaking mid-window
        DeploymentPace::BellCurve => {
            if t < 0.5 {
                (t / 2.0).sqrt()
            } else {
                1.0 - ((1.0 - t) / 2.0).sqrt()
            }
        }
    }
}

/// Builds loans from fund parameters, optionally enriched by a suburb dataset
pub struct PortfolioGenerator<'a> {
    fund: &'a Fund,
    dataset: Option<&'a dyn ZoneDataSource>,
}

impl<'a> PortfolioGenerator<'a> {
    pub fn new(fund: &'a Fund, dataset: Option<&'a dyn ZoneDataSource>) -> Self {
        Self { fund, dataset }
    }

    pub fn fund(&self) -> &Fund {
        self.fund
    }

    /// Generate the initial deployment
    pub fn generate<R: Rng>(&self, rng: &mut R) -> Result<Portfolio> {
        let config = self.fund.config();
        let count = self.fund.loan_count()?;

        let sizes = self.draw_loan_sizes(rng, count)?;
        let zones = generate_zone_allocation(rng, &config.zone_allocations, count, config.zone_allocation_precision)?;
        let schedule = self.deployment_schedule(count);

        let mut portfolio = Portfolio::with_capacity(count);
        self.add_loans(rng, &mut portfolio, &sizes, &zones, &schedule, false)?;

        info!(
            "Generated {} loans totalling {:.0} over {} deployment periods",
            portfolio.len(),
            portfolio.metrics().total_loan_amount,
            self.fund.deployment_periods()
        );
        Ok(portfolio)
    }

    /// Origination period per loan index, clamped to the latest allowed origination
    pub fn deployment_schedule(&self, count: usize) -> Vec<u32> {
        let window = self.fund.deployment_periods();
        let latest = self.fund.max_origination_period();
        let pace = self.fund.config().deployment_pace;

        (0..count)
            .map(|i| {
                let offset = (deployment_fraction(pace, i, count) * window as f64).floor() as u32;
                offset.min(window.saturating_sub(1)).min(latest)
            })
            .collect()
    }

    pub fn draw_loan_sizes<R: Rng>(&self, rng: &mut R, count: usize) -> Result<Vec<f64>> {
        let config = self.fund.config();
        let (lower, upper) = config.loan_size_bounds();
        truncated_normal(rng, config.avg_loan_size, config.loan_size_std_dev, lower, upper, count)
    }

    pub fn draw_ltvs<R: Rng>(&self, rng: &mut R, count: usize) -> Result<Vec<f64>> {
        let config = self.fund.config();
        truncated_normal(rng, config.avg_loan_ltv, config.ltv_std_dev, config.min_ltv, config.max_ltv, count)
    }

    /// Draw an exit period for a loan originating at `origination`
    ///
    /// Holding periods follow a skew-normal in periods (yearly parameters scaled
    /// by periods per year), clamped to [min holding, remaining term].
    pub fn draw_exit_period<R: Rng>(&self, rng: &mut R, origination: u32) -> u32 {
        let config = self.fund.config();
        let ppy = self.fund.clock().periods_per_year as f64;
        let term = self.fund.term_periods();

        let mean = config.avg_loan_exit_year * ppy;
        let std_dev = config.exit_year_std_dev * ppy;
        let draw = skew_normal(rng, mean, std_dev, config.exit_year_skew);

        let remaining = term.saturating_sub(origination).max(1);
        let min_holding = self.fund.min_holding_periods().min(remaining);
        let holding = (draw.round().max(0.0) as u32).clamp(min_holding, remaining);

        let mut exit = origination + holding.max(1);
        if config.force_exit_within_term {
            exit = exit.min(term);
        }
        exit.max(origination + 1)
    }

    /// Terms for one loan with zone- or suburb-level rates filled in
    pub fn loan_terms<R: Rng>(
        &self,
        rng: &mut R,
        amount: f64,
        ltv: f64,
        zone: Zone,
        origination: u32,
        reinvested: bool,
    ) -> LoanTerms {
        let config = self.fund.config();
        let mut appreciation_rate = config.appreciation_rate(zone);
        let mut default_rate = config.default_rate(zone);
        let mut suburb_id = None;

        if let Some(dataset) = self.dataset {
            if let Some(suburb) = dataset.random_suburb(zone, rng) {
                appreciation_rate = suburb.growth_mu;
                default_rate = (default_rate * suburb.risk_weight).clamp(0.0, 1.0);
                suburb_id = Some(suburb.id.clone());
            }
        }

        LoanTerms {
            loan_amount: Some(amount),
            property_value: None,
            ltv: Some(ltv),
            zone: Some(zone),
            interest_rate: config.interest_rate,
            origination_fee_rate: config.origination_fee_rate,
            appreciation_rate,
            appreciation_share_rate: config.appreciation_share_rate,
            default_rate,
            property_discount_rate: config.property_discount_rate,
            origination_period: origination,
            expected_exit_period: self.draw_exit_period(rng, origination),
            reinvested,
            suburb_id,
            periods_per_year: self.fund.clock().periods_per_year,
        }
    }

    fn add_loans<R: Rng>(
        &self,
        rng: &mut R,
        portfolio: &mut Portfolio,
        sizes: &[f64],
        zones: &[Zone],
        originations: &[u32],
        reinvested: bool,
    ) -> Result<Vec<LoanId>> {
        let ltvs = self.draw_ltvs(rng, sizes.len())?;
        let mut ids = Vec::with_capacity(sizes.len());
        for (((&amount, &ltv), &zone), &origination) in sizes.iter().zip(&ltvs).zip(zones).zip(originations) {
            let terms = self.loan_terms(rng, amount, ltv, zone, origination, reinvested);
            ids.push(portfolio.add_loan(terms)?);
        }
        Ok(ids)
    }

    /// Deploy `capital` into new reinvestment loans
    ///
    /// Loan sizes are sampled as for the initial deployment and rescaled so they
    /// sum to `capital`; loans are spread evenly over the origination periods in
    /// `schedule`. Returns no loans when the capital is below the minimum loan
    /// size or the schedule is empty; that cash stays with the fund for
    /// distribution.
    pub fn reinvest<R: Rng>(
        &self,
        rng: &mut R,
        portfolio: &mut Portfolio,
        capital: f64,
        zone_weights: &ZoneWeights,
        schedule: &[u32],
    ) -> Result<Vec<LoanId>> {
        let config = self.fund.config();
        let (min_size, _) = config.loan_size_bounds();
        if schedule.is_empty() || !(capital.is_finite() && capital >= min_size) {
            debug!("{:.0} not reinvested over {} periods", capital, schedule.len());
            return Ok(Vec::new());
        }

        let count = ((capital / config.avg_loan_size).floor() as usize).max(1);
        let mut sizes = self.draw_loan_sizes(rng, count)?;
        let drawn: f64 = sizes.iter().sum();
        if drawn > 0.0 {
            let scale = capital / drawn;
            sizes.iter_mut().for_each(|s| *s *= scale);
        } else {
            sizes = vec![capital / count as f64; count];
        }

        let zones = generate_zone_allocation(rng, zone_weights, count, config.zone_allocation_precision)?;
        let originations: Vec<u32> = (0..count).map(|k| schedule[k * schedule.len() / count]).collect();
        self.add_loans(rng, portfolio, &sizes, &zones, &originations, true)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dataset::{Suburb, SuburbDataset};
    use crate::fund::{FundConfig, Granularity};
    use approx::assert_relative_eq;
    use rand::rngs::StdRng;
    use rand::SeedableRng;
    use std::collections::BTreeMap;

    fn scenario_fund() -> Fund {
        Fund::new(FundConfig {
            size: 10_000_000.0,
            term: 5,
            avg_loan_size: 250_000.0,
            avg_loan_ltv: 0.65,
            zone_allocations: BTreeMap::from([(Zone::Green, 0.6), (Zone::Orange, 0.3), (Zone::Red, 0.1)]),
            seed: Some(42),
            ..Default::default()
        })
        .unwrap()
    }

    #[test]
    fn test_generates_expected_portfolio() {
        let fund = scenario_fund();
        let mut rng = StdRng::seed_from_u64(42);
        let portfolio = PortfolioGenerator::new(&fund, None).generate(&mut rng).unwrap();

        assert_eq!(portfolio.len(), 40);
        let total = portfolio.metrics().total_loan_amount;
        assert!(total >= 40.0 * 125_000.0 && total <= 40.0 * 500_000.0);
        for loan in portfolio.iter() {
            assert!(loan.expected_exit_period <= 5);
            assert!(loan.expected_exit_period > loan.origination_period);
            assert!(loan.ltv >= 0.5 && loan.ltv <= 0.8);
            assert!(!loan.reinvested);
        }
    }

    #[test]
    fn test_same_seed_same_portfolio() {
        let fund = scenario_fund();
        let a = PortfolioGenerator::new(&fund, None)
            .generate(&mut StdRng::seed_from_u64(9))
            .unwrap();
        let b = PortfolioGenerator::new(&fund, None)
            .generate(&mut StdRng::seed_from_u64(9))
            .unwrap();
        let amounts = |p: &Portfolio| p.iter().map(|l| l.loan_amount).collect::<Vec<_>>();
        assert_eq!(amounts(&a), amounts(&b));
    }

    #[test]
    fn test_deployment_paces() {
        let n = 1000;
        let mean = |pace| (0..n).map(|i| deployment_fraction(pace, i, n)).sum::<f64>() / n as f64;

        assert_relative_eq!(mean(DeploymentPace::Even), 0.5, epsilon = 1e-9);
        assert_relative_eq!(mean(DeploymentPace::BellCurve), 0.5, epsilon = 1e-3);
        assert!(mean(DeploymentPace::FrontLoaded) < 0.4);
        assert!(mean(DeploymentPace::BackLoaded) > 0.6);
        for pace in [DeploymentPace::FrontLoaded, DeploymentPace::BackLoaded, DeploymentPace::BellCurve] {
            assert!((0..n).all(|i| (0.0..1.0).contains(&deployment_fraction(pace, i, n))));
        }
    }

    #[test]
    fn test_monthly_schedule_spreads_over_window() {
        let fund = Fund::new(FundConfig {
            size: 10_000_000.0,
            term: 5,
            granularity: Granularity::Monthly,
            deployment_period: 1.0,
            ..Default::default()
        })
        .unwrap();
        let schedule = PortfolioGenerator::new(&fund, None).deployment_schedule(40);

        assert_eq!(schedule[0], 0);
        assert_eq!(*schedule.iter().max().unwrap(), 11);
        assert!(schedule.windows(2).all(|w| w[0] <= w[1]));
    }

    #[test]
    fn test_schedule_clamped_to_latest_origination() {
        let fund = Fund::new(FundConfig {
            term: 3,
            deployment_period: 3.0,
            reinvestment_period: 1.0,
            ..Default::default()
        })
        .unwrap();
        let schedule = PortfolioGenerator::new(&fund, None).deployment_schedule(30);
        assert!(schedule.iter().all(|&p| p <= fund.max_origination_period()));
    }

    #[test]
    fn test_exit_periods_respect_bounds() {
        let fund = Fund::new(FundConfig {
            term: 6,
            avg_loan_exit_year: 3.0,
            exit_year_std_dev: 4.0,
            exit_year_skew: 3.0,
            min_holding_period: 2.0,
            ..Default::default()
        })
        .unwrap();
        let generator = PortfolioGenerator::new(&fund, None);
        let mut rng = StdRng::seed_from_u64(3);

        for origination in 0..6 {
            for _ in 0..200 {
                let exit = generator.draw_exit_period(&mut rng, origination);
                assert!(exit > origination);
                assert!(exit <= 6);
                if origination <= 4 {
                    assert!(exit >= origination + 2);
                }
            }
        }
    }

    #[test]
    fn test_reinvest_scales_to_capital() {
        let fund = scenario_fund();
        let generator = PortfolioGenerator::new(&fund, None);
        let mut rng = StdRng::seed_from_u64(5);
        let mut portfolio = Portfolio::new();

        let ids = generator
            .reinvest(&mut rng, &mut portfolio, 1_000_000.0, &fund.config().zone_allocations, &[2])
            .unwrap();
        assert_eq!(ids.len(), 4);
        let total: f64 = portfolio.select(&ids).map(|l| l.loan_amount).sum();
        assert_relative_eq!(total, 1_000_000.0, max_relative = 1e-12);
        assert!(portfolio.iter().all(|l| l.reinvested && l.origination_period == 2));

        let none = generator
            .reinvest(&mut rng, &mut portfolio, 50_000.0, &fund.config().zone_allocations, &[2])
            .unwrap();
        assert!(none.is_empty());
    }

    #[test]
    fn test_reinvest_spreads_over_schedule() {
        let fund = scenario_fund();
        let generator = PortfolioGenerator::new(&fund, None);
        let mut rng = StdRng::seed_from_u64(8);
        let mut portfolio = Portfolio::new();

        let ids = generator
            .reinvest(&mut rng, &mut portfolio, 1_000_000.0, &fund.config().zone_allocations, &[2, 3])
            .unwrap();
        let originations: Vec<u32> = portfolio.select(&ids).map(|l| l.origination_period).collect();
        assert_eq!(originations, vec![2, 2, 3, 3]);
        assert!(portfolio.iter().all(|l| l.expected_exit_period > l.origination_period));
    }

    #[test]
    fn test_dataset_overrides_rates() {
        let fund = scenario_fund();
        let dataset = SuburbDataset::from_records(
            Zone::ALL
                .iter()
                .map(|&zone| Suburb {
                    id: format!("{}-1", zone),
                    zone,
                    risk_weight: 2.0,
                    growth_mu: 0.07,
                    growth_sigma: 0.1,
                })
                .collect(),
        )
        .unwrap();
        let generator = PortfolioGenerator::new(&fund, Some(&dataset as &dyn ZoneDataSource));
        let portfolio = generator.generate(&mut StdRng::seed_from_u64(1)).unwrap();

        for loan in portfolio.iter() {
            assert_eq!(loan.appreciation_rate, 0.07);
            assert_relative_eq!(loan.default_rate, fund.config().default_rate(loan.zone) * 2.0);
            assert_eq!(loan.suburb_id.as_deref(), Some(format!("{}-1", loan.zone).as_str()));
        }
    }
}
