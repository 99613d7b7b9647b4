//! One complete simulation: fund to performance metrics

use log::info;
use rand::rngs::StdRng;
use rand::SeedableRng;
use serde::{Deserialize, Serialize};

use crate::cashflows::{apply_waterfall, project_cash_flows, CashFlowLedger, WaterfallResult};
use crate::dataset::ZoneDataSource;
use crate::error::Result;
use crate::fund::{Fund, FundConfig, ParameterVariation};
use crate::generator::PortfolioGenerator;
use crate::leverage::{process_leverage, LeverageResult};
use crate::lifecycle::{LifecycleEngine, LifecycleResult};
use crate::metrics::{compute_metrics, PerformanceMetrics};
use crate::portfolio::{Portfolio, PortfolioMetrics};

/// Everything produced by one run
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SimulationResult {
    pub seed: u64,
    /// Configuration after the parameter variation was applied
    pub config: FundConfig,
    /// Composition of the initial deployment
    pub initial_portfolio: PortfolioMetrics,
    pub portfolio: Portfolio,
    pub lifecycle: LifecycleResult,
    pub leverage: LeverageResult,
    pub ledger: CashFlowLedger,
    pub waterfall: WaterfallResult,
    pub metrics: PerformanceMetrics,
}

/// Run Fund → Generator → Lifecycle → Leverage → Projector → Waterfall → Metrics
///
/// The run owns its random stream, seeded from `seed`, so results are
/// reproducible and independent of any other run.
pub fn run(
    config: &FundConfig,
    seed: u64,
    variation: &ParameterVariation,
    dataset: Option<&dyn ZoneDataSource>,
) -> Result<SimulationResult> {
    let fund = Fund::with_variation(config, variation)?;
    let mut rng = StdRng::seed_from_u64(seed);

    let mut portfolio = PortfolioGenerator::new(&fund, dataset).generate(&mut rng)?;
    let initial_portfolio = portfolio.metrics();

    let lifecycle = LifecycleEngine::new(&fund, dataset).run(&mut rng, &mut portfolio)?;
    let leverage = process_leverage(
        &lifecycle.nav_by_period(),
        &fund.config().leverage,
        fund.size(),
        lifecycle.periods_per_year,
    )?;

    let mut ledger = project_cash_flows(&fund, &portfolio, &lifecycle, &leverage);
    let waterfall = apply_waterfall(&ledger, fund.config());
    ledger.apply_waterfall_result(&waterfall);

    let metrics = compute_metrics(&ledger, fund.config().risk_free_rate, fund.config().discount_rate);
    info!(
        "Run seed {}: {} loans, {} exits ({} defaults), fund IRR {:.2}%, multiple {:.2}x",
        seed,
        portfolio.len(),
        lifecycle.total_exits(),
        lifecycle.total_defaults(),
        metrics.fund_irr.value * 100.0,
        metrics.returns.equity_multiple
    );

    Ok(SimulationResult {
        seed,
        config: fund.config().clone(),
        initial_portfolio,
        portfolio,
        lifecycle,
        leverage,
        ledger,
        waterfall,
        metrics,
    })
}

/// Run with the configuration's own seed (0 if unset) and no variation
pub fn run_config(config: &FundConfig, dataset: Option<&dyn ZoneDataSource>) -> Result<SimulationResult> {
    run(config, config.seed.unwrap_or(0), &ParameterVariation::default(), dataset)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::SimulationError;
    use crate::leverage::LeverageConfig;
    use approx::assert_relative_eq;

    fn scenario() -> FundConfig {
        FundConfig {
            size: 10_000_000.0,
            term: 5,
            avg_loan_size: 250_000.0,
            avg_loan_ltv: 0.65,
            ..Default::default()
        }
    }

    #[test]
    fn test_end_to_end_scenario() {
        let result = run(&scenario(), 42, &ParameterVariation::default(), None).unwrap();

        assert_eq!(result.initial_portfolio.loan_count, 40);
        assert_eq!(result.initial_portfolio.zone_counts.values().sum::<usize>(), 40);
        let bound = (result.config.loan_size_bounds().1) * 40.0;
        assert!(result.initial_portfolio.total_loan_amount <= bound);
        assert!(result.initial_portfolio.total_loan_amount > 0.0);

        for loan in result.portfolio.iter() {
            if let Some(exit) = loan.actual_exit_period {
                assert!(exit <= 5);
                assert!(exit > loan.origination_period);
            }
        }
        assert!(result.lifecycle.continuity_violation().is_none());
        assert!(result.ledger.has_waterfall);
        assert!(result.metrics.fund_irr.value.is_finite());
    }

    #[test]
    fn test_seed_reproducibility() {
        let a = run(&scenario(), 7, &ParameterVariation::default(), None).unwrap();
        let b = run(&scenario(), 7, &ParameterVariation::default(), None).unwrap();
        assert_eq!(a.metrics.fund_irr.value, b.metrics.fund_irr.value);
        assert_eq!(a.ledger, b.ledger);
    }

    #[test]
    fn test_leverage_costs_flow_into_ledger() {
        let mut config = scenario();
        config.leverage = LeverageConfig {
            nav_facility: crate::leverage::NavFacility {
                enabled: true,
                ..Default::default()
            },
            ..Default::default()
        };
        let result = run(&config, 42, &ParameterVariation::default(), None).unwrap();
        assert!(!result.leverage.is_empty());
        assert!(result.ledger.total(|r| r.leverage_costs) < 0.0);
    }

    #[test]
    fn test_gross_adds_back_only_fees_and_carry_on_levered_run() {
        let mut config = scenario();
        config.leverage.nav_facility.enabled = true;
        let result = run(&config, 42, &ParameterVariation::default(), None).unwrap();

        for row in result.ledger.rows.values() {
            let added_back = -(row.management_fees + row.carried_interest);
            assert_relative_eq!(
                row.gross_net_cash_flow - row.net_cash_flow,
                added_back,
                epsilon = 1e-6,
                max_relative = 1e-9
            );
        }
    }

    #[test]
    fn test_invalid_config_is_reported() {
        let mut config = scenario();
        config.size = -1.0;
        let err = run(&config, 1, &ParameterVariation::default(), None).unwrap_err();
        assert!(matches!(err, SimulationError::InvalidConfig { .. }));
    }

    #[test]
    fn test_inverted_ltv_bounds_are_reported() {
        let mut config = scenario();
        config.min_ltv = 0.8;
        config.max_ltv = 0.5;
        let shifted = ParameterVariation {
            ltv_shift: 0.01,
            ..Default::default()
        };
        for variation in [ParameterVariation::default(), shifted] {
            let err = run(&config, 1, &variation, None).unwrap_err();
            assert!(matches!(err, SimulationError::InvalidConfig { .. }));
        }
    }
}
