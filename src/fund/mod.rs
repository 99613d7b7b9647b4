//! Fund configuration, zones and market assumptions

mod config;
mod market;
mod variation;
mod zone;

pub use config::{
    Capabilities, DefaultCorrelation, DeploymentPace, FundConfig, Granularity,
    ManagementFeeBasis, WaterfallStructure, ZONE_ALLOCATION_TOLERANCE,
};
pub use market::{MarketConditions, MarketPeriod};
pub use variation::ParameterVariation;
pub use zone::{
    default_zone_allocations, default_zone_appreciation_rates, default_zone_default_rates,
    normalize_weights, Zone, ZoneWeights,
};

use crate::error::{Result, SimulationError};

/// Converts between years and simulation periods
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PeriodClock {
    pub granularity: Granularity,
    pub periods_per_year: u32,
}

impl PeriodClock {
    pub fn new(granularity: Granularity) -> Self {
        Self {
            granularity,
            periods_per_year: granularity.periods_per_year(),
        }
    }

    /// Nearest whole number of periods for a duration in years
    pub fn periods(&self, years: f64) -> u32 {
        (years * self.periods_per_year as f64).round().max(0.0) as u32
    }

    /// Smallest whole number of periods covering a duration in years
    pub fn periods_ceil(&self, years: f64) -> u32 {
        (years * self.periods_per_year as f64 - 1e-9).ceil().max(0.0) as u32
    }

    pub fn years(&self, periods: f64) -> f64 {
        periods / self.periods_per_year as f64
    }

    /// Fund year (0-based) containing a period
    pub fn year_of(&self, period: u32) -> u32 {
        period / self.periods_per_year
    }

    /// Simple (non-compounded) conversion of an annual rate to a per-period rate
    pub fn per_period_rate(&self, annual_rate: f64) -> f64 {
        annual_rate / self.periods_per_year as f64
    }
}

/// A validated, immutable fund
#[derive(Debug, Clone)]
pub struct Fund {
    config: FundConfig,
    clock: PeriodClock,
}

impl Fund {
    /// Validate the configuration and build the fund
    pub fn new(config: FundConfig) -> Result<Self> {
        config.validate()?;
        let clock = PeriodClock::new(config.granularity);
        Ok(Self { config, clock })
    }

    /// Build a fund from a configuration with a parameter variation applied
    ///
    /// The base configuration is validated first, then the varied copy.
    pub fn with_variation(config: &FundConfig, variation: &ParameterVariation) -> Result<Self> {
        config.validate()?;
        Self::new(variation.apply(config))
    }

    pub fn config(&self) -> &FundConfig {
        &self.config
    }

    pub fn clock(&self) -> PeriodClock {
        self.clock
    }

    pub fn size(&self) -> f64 {
        self.config.size
    }

    /// Total number of periods in the fund term
    pub fn term_periods(&self) -> u32 {
        self.clock.periods(self.config.term as f64)
    }

    pub fn deployment_periods(&self) -> u32 {
        self.clock.periods_ceil(self.config.deployment_period)
    }

    pub fn reinvestment_periods(&self) -> u32 {
        self.clock.periods(self.config.reinvestment_period)
    }

    pub fn min_holding_periods(&self) -> u32 {
        self.clock.periods_ceil(self.config.min_holding_period).max(1)
    }

    /// Latest period a loan may originate in
    pub fn max_origination_period(&self) -> u32 {
        let by_holding = self.term_periods().saturating_sub(self.min_holding_periods());
        self.reinvestment_periods().min(by_holding)
    }

    /// Number of loans in the initial deployment
    pub fn loan_count(&self) -> Result<usize> {
        let count = (self.config.size / self.config.avg_loan_size).floor() as usize;
        if count == 0 {
            return Err(SimulationError::Generation(format!(
                "fund size {} supports no loans of average size {}",
                self.config.size, self.config.avg_loan_size
            )));
        }
        Ok(count)
    }

    pub fn capabilities(&self) -> Capabilities {
        self.config.capabilities()
    }

    pub fn market_period(&self, period: u32) -> MarketPeriod {
        match &self.config.market_conditions {
            Some(market) => market.for_year(self.clock.year_of(period)),
            None => MarketPeriod::default(),
        }
    }

    pub fn gp_commitment(&self) -> f64 {
        self.config.size * self.config.gp_commitment_percentage
    }

    pub fn lp_commitment(&self) -> f64 {
        self.config.size - self.gp_commitment()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_period_clock_monthly() {
        let clock = PeriodClock::new(Granularity::Monthly);
        assert_eq!(clock.periods(5.0), 60);
        assert_eq!(clock.periods_ceil(0.51), 7);
        assert_eq!(clock.periods_ceil(1.0), 12);
        assert_eq!(clock.year_of(23), 1);
        assert_eq!(clock.per_period_rate(0.12), 0.01);
    }

    #[test]
    fn test_fund_derived_periods() {
        let fund = Fund::new(FundConfig {
            term: 5,
            reinvestment_period: 3.0,
            deployment_period: 1.0,
            min_holding_period: 1.0,
            granularity: Granularity::Monthly,
            ..Default::default()
        })
        .unwrap();

        assert_eq!(fund.term_periods(), 60);
        assert_eq!(fund.deployment_periods(), 12);
        assert_eq!(fund.reinvestment_periods(), 36);
        assert_eq!(fund.max_origination_period(), 36);
    }

    #[test]
    fn test_loan_count() {
        let fund = Fund::new(FundConfig {
            size: 10_000_000.0,
            avg_loan_size: 250_000.0,
            ..Default::default()
        })
        .unwrap();
        assert_eq!(fund.loan_count().unwrap(), 40);
    }

    #[test]
    fn test_invalid_fund_rejected_at_construction() {
        let result = Fund::new(FundConfig {
            size: -1.0,
            ..Default::default()
        });
        assert!(matches!(result, Err(SimulationError::InvalidConfig { .. })));
    }
}
