//! Monte Carlo driver over the full simulation pipeline
//!
//! Samples run in parallel on the rayon pool. Sample `i` is seeded
//! `base_seed + i`, so a batch is reproducible regardless of thread count.

use log::{info, warn};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use rand_distr::StandardNormal;
use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use statrs::statistics::{Data, OrderStatistics, Statistics};

use crate::dataset::ZoneDataSource;
use crate::error::{Result, SimulationError};
use crate::fund::{FundConfig, ParameterVariation};
use crate::metrics::IrrMethod;
use crate::pipeline;

/// Mixed into the sample seed so variation draws do not replay the simulation stream
const VARIATION_STREAM: u64 = 0x5851_F42D_4C95_7F2D;

/// Which parameters are perturbed per sample
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct VariedParameters {
    pub appreciation: bool,
    pub default: bool,
    pub exit_timing: bool,
    pub ltv: bool,
    pub interest: bool,
}

impl Default for VariedParameters {
    fn default() -> Self {
        Self {
            appreciation: true,
            default: true,
            exit_timing: true,
            ltv: false,
            interest: false,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct MonteCarloConfig {
    pub num_simulations: usize,
    pub base_seed: u64,
    pub parameters: VariedParameters,
    /// Std-dev of the appreciation-rate multiplier around 1.0
    pub appreciation_std_dev: f64,
    /// Std-dev of the default-rate multiplier around 1.0
    pub default_std_dev: f64,
    /// Std-dev of the exit-year shift, in years
    pub exit_timing_std_dev: f64,
    pub ltv_std_dev: f64,
    pub interest_std_dev: f64,
    /// Keep per-sample outcomes in the result
    pub keep_samples: bool,
}

impl Default for MonteCarloConfig {
    fn default() -> Self {
        Self {
            num_simulations: 1000,
            base_seed: 42,
            parameters: VariedParameters::default(),
            appreciation_std_dev: 0.25,
            default_std_dev: 0.5,
            exit_timing_std_dev: 0.5,
            ltv_std_dev: 0.02,
            interest_std_dev: 0.005,
            keep_samples: true,
        }
    }
}

impl MonteCarloConfig {
    pub fn validate(&self) -> Result<()> {
        if self.num_simulations == 0 {
            return Err(SimulationError::config("num_simulations", "must be at least 1"));
        }
        let deviations = [
            ("appreciation_std_dev", self.appreciation_std_dev),
            ("default_std_dev", self.default_std_dev),
            ("exit_timing_std_dev", self.exit_timing_std_dev),
            ("ltv_std_dev", self.ltv_std_dev),
            ("interest_std_dev", self.interest_std_dev),
        ];
        for (field, value) in deviations {
            if !value.is_finite() || value < 0.0 {
                return Err(SimulationError::config(field, format!("must be non-negative, got {}", value)));
            }
        }
        Ok(())
    }

    /// Draw the variation for one sample
    pub fn sample_variation<R: Rng>(&self, rng: &mut R) -> ParameterVariation {
        let mut normal = |std_dev: f64| std_dev * rng.sample::<f64, _>(StandardNormal);
        let p = self.parameters;
        ParameterVariation {
            appreciation_multiplier: if p.appreciation { (1.0 + normal(self.appreciation_std_dev)).max(0.0) } else { 1.0 },
            default_multiplier: if p.default { (1.0 + normal(self.default_std_dev)).max(0.0) } else { 1.0 },
            early_exit_multiplier: 1.0,
            exit_timing_shift: if p.exit_timing { normal(self.exit_timing_std_dev) } else { 0.0 },
            ltv_shift: if p.ltv { normal(self.ltv_std_dev) } else { 0.0 },
            interest_rate_shift: if p.interest { normal(self.interest_std_dev) } else { 0.0 },
        }
    }
}

/// Headline figures from one sample
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SampleOutcome {
    pub index: usize,
    pub seed: u64,
    pub variation: ParameterVariation,
    pub fund_irr: f64,
    pub lp_irr: f64,
    pub gross_irr: f64,
    pub irr_method: IrrMethod,
    pub equity_multiple: f64,
    pub tvpi: f64,
    pub max_drawdown: f64,
    pub default_count: usize,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct DistributionSummary {
    pub count: usize,
    pub mean: f64,
    pub std_dev: f64,
    pub min: f64,
    pub max: f64,
    pub p5: f64,
    pub p10: f64,
    pub p25: f64,
    pub p50: f64,
    pub p75: f64,
    pub p90: f64,
    pub p95: f64,
}

impl DistributionSummary {
    /// Summary over the finite values; all zeros when there are none
    pub fn from_values(values: impl IntoIterator<Item = f64>) -> Self {
        let finite: Vec<f64> = values.into_iter().filter(|v| v.is_finite()).collect();
        if finite.is_empty() {
            return Self::default();
        }
        let count = finite.len();
        let mean = finite.iter().mean();
        let std_dev = if count > 1 { finite.iter().std_dev() } else { 0.0 };
        let min = Statistics::min(finite.iter());
        let max = Statistics::max(finite.iter());

        let mut data = Data::new(finite);
        Self {
            count,
            mean,
            std_dev,
            min,
            max,
            p5: data.percentile(5),
            p10: data.percentile(10),
            p25: data.percentile(25),
            p50: data.percentile(50),
            p75: data.percentile(75),
            p90: data.percentile(90),
            p95: data.percentile(95),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct MonteCarloResult {
    pub num_simulations: usize,
    pub successful: usize,
    pub failed: usize,
    pub fund_irr: DistributionSummary,
    pub lp_irr: DistributionSummary,
    pub gross_irr: DistributionSummary,
    pub equity_multiple: DistributionSummary,
    pub tvpi: DistributionSummary,
    pub max_drawdown: DistributionSummary,
    pub probability_negative_irr: f64,
    /// Share of samples whose fund IRR came from a CAGR or insufficient-data fallback
    pub fallback_irr_share: f64,
    pub samples: Vec<SampleOutcome>,
}

impl MonteCarloResult {
    fn from_samples(num_simulations: usize, samples: Vec<SampleOutcome>, keep_samples: bool) -> Self {
        let successful = samples.len();
        let share = |predicate: &dyn Fn(&SampleOutcome) -> bool| {
            if successful == 0 {
                0.0
            } else {
                samples.iter().filter(|s| predicate(s)).count() as f64 / successful as f64
            }
        };

        Self {
            num_simulations,
            successful,
            failed: num_simulations - successful,
            fund_irr: DistributionSummary::from_values(samples.iter().map(|s| s.fund_irr)),
            lp_irr: DistributionSummary::from_values(samples.iter().map(|s| s.lp_irr)),
            gross_irr: DistributionSummary::from_values(samples.iter().map(|s| s.gross_irr)),
            equity_multiple: DistributionSummary::from_values(samples.iter().map(|s| s.equity_multiple)),
            tvpi: DistributionSummary::from_values(samples.iter().map(|s| s.tvpi)),
            max_drawdown: DistributionSummary::from_values(samples.iter().map(|s| s.max_drawdown)),
            probability_negative_irr: share(&|s| s.fund_irr < 0.0),
            fallback_irr_share: share(&|s| !s.irr_method.is_exact()),
            samples: if keep_samples { samples } else { Vec::new() },
        }
    }
}

/// Runs many independent pipeline invocations of one base configuration
pub struct MonteCarloRunner<'a> {
    base_config: FundConfig,
    settings: MonteCarloConfig,
    dataset: Option<&'a dyn ZoneDataSource>,
}

impl<'a> MonteCarloRunner<'a> {
    pub fn new(base_config: FundConfig, settings: MonteCarloConfig) -> Result<Self> {
        base_config.validate()?;
        settings.validate()?;
        Ok(Self {
            base_config,
            settings,
            dataset: None,
        })
    }

    pub fn with_dataset(mut self, dataset: &'a dyn ZoneDataSource) -> Self {
        self.dataset = Some(dataset);
        self
    }

    pub fn settings(&self) -> &MonteCarloConfig {
        &self.settings
    }

    /// Run one sample
    pub fn run_sample(&self, index: usize) -> Result<SampleOutcome> {
        let seed = self.settings.base_seed.wrapping_add(index as u64);
        let mut variation_rng = StdRng::seed_from_u64(seed ^ VARIATION_STREAM);
        let variation = self.settings.sample_variation(&mut variation_rng);

        let result = pipeline::run(&self.base_config, seed, &variation, self.dataset)?;
        let metrics = &result.metrics;
        Ok(SampleOutcome {
            index,
            seed,
            variation,
            fund_irr: metrics.fund_irr.value,
            lp_irr: metrics.lp_irr.value,
            gross_irr: metrics.gross_irr(),
            irr_method: metrics.fund_irr.method,
            equity_multiple: metrics.returns.equity_multiple,
            tvpi: metrics.ratios.tvpi,
            max_drawdown: metrics.risk.max_drawdown,
            default_count: result.lifecycle.total_defaults(),
        })
    }

    /// Run every sample in parallel; failing samples are logged and skipped
    pub fn run(&self) -> MonteCarloResult {
        let n = self.settings.num_simulations;
        info!("Running {} Monte Carlo samples from seed {}", n, self.settings.base_seed);

        let samples: Vec<SampleOutcome> = (0..n)
            .into_par_iter()
            .filter_map(|index| match self.run_sample(index) {
                Ok(outcome) => Some(outcome),
                Err(err) => {
                    warn!("Sample {} failed: {}", index, err);
                    None
                }
            })
            .collect();

        let result = MonteCarloResult::from_samples(n, samples, self.settings.keep_samples);
        if result.failed > 0 {
            warn!("{} of {} samples failed", result.failed, n);
        }
        info!(
            "Monte Carlo complete: median fund IRR {:.2}%, P(IRR < 0) {:.1}%",
            result.fund_irr.p50 * 100.0,
            result.probability_negative_irr * 100.0
        );
        result
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    fn small_fund() -> FundConfig {
        FundConfig {
            size: 5_000_000.0,
            term: 5,
            avg_loan_size: 250_000.0,
            ..Default::default()
        }
    }

    fn settings(n: usize) -> MonteCarloConfig {
        MonteCarloConfig {
            num_simulations: n,
            base_seed: 100,
            ..Default::default()
        }
    }

    #[test]
    fn test_summary_percentiles() {
        let summary = DistributionSummary::from_values((1..=101).map(|v| v as f64).chain([f64::NAN]));
        assert_eq!(summary.count, 101);
        assert_relative_eq!(summary.mean, 51.0);
        assert_eq!(summary.min, 1.0);
        assert_eq!(summary.max, 101.0);
        assert_relative_eq!(summary.p50, 51.0);
        assert!(summary.p5 < summary.p25 && summary.p75 < summary.p95);
    }

    #[test]
    fn test_empty_summary() {
        assert_eq!(DistributionSummary::from_values(Vec::new()), DistributionSummary::default());
    }

    #[test]
    fn test_batch_is_reproducible_and_ordered() {
        let runner = MonteCarloRunner::new(small_fund(), settings(8)).unwrap();
        let first = runner.run();
        let second = runner.run();

        assert_eq!(first.successful, 8);
        assert_eq!(first.failed, 0);
        assert_eq!(first.samples, second.samples);
        let seeds: Vec<u64> = first.samples.iter().map(|s| s.seed).collect();
        assert_eq!(seeds, (100..108).collect::<Vec<u64>>());
        assert!((0.0..=1.0).contains(&first.probability_negative_irr));
    }

    #[test]
    fn test_sample_matches_direct_run() {
        let runner = MonteCarloRunner::new(small_fund(), settings(3)).unwrap();
        let sample = runner.run_sample(2).unwrap();
        let direct = pipeline::run(&small_fund(), 102, &sample.variation, None).unwrap();
        assert_eq!(sample.fund_irr, direct.metrics.fund_irr.value);
    }

    #[test]
    fn test_disabled_parameters_are_neutral() {
        let config = MonteCarloConfig {
            parameters: VariedParameters {
                appreciation: false,
                default: false,
                exit_timing: false,
                ltv: false,
                interest: false,
            },
            ..Default::default()
        };
        let variation = config.sample_variation(&mut StdRng::seed_from_u64(1));
        assert!(variation.is_neutral());
    }

    #[test]
    fn test_rejects_empty_batch() {
        assert!(MonteCarloRunner::new(small_fund(), settings(0)).is_err());
    }
}
