//! Fund configuration with validated defaults

use std::path::Path;

use serde::{Deserialize, Serialize};

use super::market::MarketConditions;
use super::zone::{
    default_zone_allocations, default_zone_appreciation_rates, default_zone_default_rates, Zone,
    ZoneWeights,
};
use crate::error::{Result, SimulationError};
use crate::leverage::LeverageConfig;

/// Tolerance for zone allocations summing to one
pub const ZONE_ALLOCATION_TOLERANCE: f64 = 0.0001;

/// Time step of the lifecycle simulation
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Granularity {
    #[default]
    Yearly,
    Monthly,
}

impl Granularity {
    pub fn periods_per_year(&self) -> u32 {
        match self {
            Granularity::Yearly => 1,
            Granularity::Monthly => 12,
        }
    }
}

/// Shape of the initial deployment schedule
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DeploymentPace {
    #[default]
    Even,
    FrontLoaded,
    BackLoaded,
    BellCurve,
}

/// Carried interest calculation basis
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum WaterfallStructure {
    /// Whole-fund waterfall
    #[default]
    European,
    /// Deal-by-deal waterfall
    American,
}

/// Basis on which management fees are charged
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ManagementFeeBasis {
    #[default]
    CommittedCapital,
    InvestedCapital,
}

/// Latent-variable correlation between co-exiting loans' default draws
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DefaultCorrelation {
    pub same_zone: f64,
    pub cross_zone: f64,
}

impl Default for DefaultCorrelation {
    fn default() -> Self {
        Self {
            same_zone: 0.3,
            cross_zone: 0.1,
        }
    }
}

/// Optional engine behaviours switched on by configuration
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct Capabilities {
    pub market_conditions: bool,
    pub zone_rebalancing: bool,
    pub correlated_defaults: bool,
}

/// Raw fund configuration
///
/// Durations (`term`, `deployment_period`, `reinvestment_period`, exit timing)
/// are expressed in years regardless of granularity; rates are annual decimals.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct FundConfig {
    pub name: String,
    pub size: f64,
    pub term: u32,
    pub granularity: Granularity,
    pub seed: Option<u64>,

    // Zones
    pub zone_allocations: ZoneWeights,
    /// 1.0 = exact proportional zone counts, 0.0 = independent weighted draws
    pub zone_allocation_precision: f64,
    pub appreciation_rates: ZoneWeights,
    pub default_rates: ZoneWeights,

    // Loan economics
    pub interest_rate: f64,
    pub origination_fee_rate: f64,
    /// Fund's share of property appreciation at exit
    pub appreciation_share_rate: f64,
    /// Fraction of principal recovered on default
    pub recovery_rate: f64,
    /// Haircut applied to appraised property values for fair value
    pub property_discount_rate: f64,

    // Loan size and LTV
    pub avg_loan_size: f64,
    pub loan_size_std_dev: f64,
    pub min_loan_size: Option<f64>,
    pub max_loan_size: Option<f64>,
    pub avg_loan_ltv: f64,
    pub ltv_std_dev: f64,
    pub min_ltv: f64,
    pub max_ltv: f64,

    // Exit timing
    pub avg_loan_exit_year: f64,
    pub exit_year_std_dev: f64,
    /// Skew-normal shape parameter for holding periods (0 = symmetric)
    pub exit_year_skew: f64,
    /// Annual probability that an active loan repays early
    pub early_exit_probability: f64,
    pub min_holding_period: f64,
    pub force_exit_within_term: bool,

    // Deployment and reinvestment
    pub deployment_period: f64,
    pub deployment_pace: DeploymentPace,
    pub reinvestment_period: f64,
    pub reinvestment_rate: f64,
    /// Spread each period's reinvestment capital over a deployment-length window
    pub spread_reinvestment: bool,

    // Zone rebalancing
    pub zone_rebalancing_enabled: bool,
    pub rebalancing_strength: f64,

    // Fees and waterfall
    pub management_fee_rate: f64,
    pub management_fee_basis: ManagementFeeBasis,
    pub gp_commitment_percentage: f64,
    pub hurdle_rate: f64,
    pub carried_interest_rate: f64,
    pub catch_up_rate: f64,
    pub waterfall_structure: WaterfallStructure,

    // Analytics
    pub risk_free_rate: f64,
    pub discount_rate: f64,

    // Optional overlays
    pub market_conditions: Option<MarketConditions>,
    pub default_correlation: Option<DefaultCorrelation>,
    pub leverage: LeverageConfig,
}

impl Default for FundConfig {
    fn default() -> Self {
        Self {
            name: "Fund".to_string(),
            size: 100_000_000.0,
            term: 10,
            granularity: Granularity::Yearly,
            seed: None,
            zone_allocations: default_zone_allocations(),
            zone_allocation_precision: 0.8,
            appreciation_rates: default_zone_appreciation_rates(),
            default_rates: default_zone_default_rates(),
            interest_rate: 0.05,
            origination_fee_rate: 0.03,
            appreciation_share_rate: 0.5,
            recovery_rate: 0.7,
            property_discount_rate: 0.0,
            avg_loan_size: 250_000.0,
            loan_size_std_dev: 50_000.0,
            min_loan_size: None,
            max_loan_size: None,
            avg_loan_ltv: 0.65,
            ltv_std_dev: 0.05,
            min_ltv: 0.5,
            max_ltv: 0.8,
            avg_loan_exit_year: 4.0,
            exit_year_std_dev: 1.5,
            exit_year_skew: 0.0,
            early_exit_probability: 0.1,
            min_holding_period: 1.0,
            force_exit_within_term: true,
            deployment_period: 1.0,
            deployment_pace: DeploymentPace::Even,
            reinvestment_period: 5.0,
            reinvestment_rate: 1.0,
            spread_reinvestment: false,
            zone_rebalancing_enabled: false,
            rebalancing_strength: 0.5,
            management_fee_rate: 0.02,
            management_fee_basis: ManagementFeeBasis::CommittedCapital,
            gp_commitment_percentage: 0.0,
            hurdle_rate: 0.08,
            carried_interest_rate: 0.20,
            catch_up_rate: 1.0,
            waterfall_structure: WaterfallStructure::European,
            risk_free_rate: 0.03,
            discount_rate: 0.08,
            market_conditions: None,
            default_correlation: None,
            leverage: LeverageConfig::default(),
        }
    }
}

fn check_rate(field: &str, value: f64) -> Result<()> {
    if !value.is_finite() || !(0.0..=1.0).contains(&value) {
        return Err(SimulationError::config(field, format!("{} must be in [0, 1]", value)));
    }
    Ok(())
}

fn check_positive(field: &str, value: f64) -> Result<()> {
    if !value.is_finite() || value <= 0.0 {
        return Err(SimulationError::config(field, format!("{} must be positive", value)));
    }
    Ok(())
}

fn check_non_negative(field: &str, value: f64) -> Result<()> {
    if !value.is_finite() || value < 0.0 {
        return Err(SimulationError::config(field, format!("{} must be non-negative", value)));
    }
    Ok(())
}

impl FundConfig {
    pub fn from_json_str(json: &str) -> Result<Self> {
        Ok(serde_json::from_str(json)?)
    }

    pub fn from_json_file(path: &Path) -> Result<Self> {
        let contents = std::fs::read_to_string(path)?;
        Self::from_json_str(&contents)
    }

    /// Validate every parameter; configuration is never silently coerced
    pub fn validate(&self) -> Result<()> {
        check_positive("size", self.size)?;
        if self.term == 0 {
            return Err(SimulationError::config("term", "term must be at least one year"));
        }
        let term = self.term as f64;

        // Zones
        let allocation_total: f64 = self.zone_allocations.values().sum();
        if (allocation_total - 1.0).abs() > ZONE_ALLOCATION_TOLERANCE {
            return Err(SimulationError::config(
                "zone_allocations",
                format!("allocations sum to {:.6}, expected 1.0", allocation_total),
            ));
        }
        for (zone, weight) in &self.zone_allocations {
            check_rate(&format!("zone_allocations.{}", zone), *weight)?;
        }
        for (zone, rate) in &self.default_rates {
            check_rate(&format!("default_rates.{}", zone), *rate)?;
        }
        for (zone, rate) in &self.appreciation_rates {
            check_rate(&format!("appreciation_rates.{}", zone), *rate)?;
        }
        check_rate("zone_allocation_precision", self.zone_allocation_precision)?;

        // Loan economics
        check_rate("interest_rate", self.interest_rate)?;
        check_rate("origination_fee_rate", self.origination_fee_rate)?;
        check_rate("appreciation_share_rate", self.appreciation_share_rate)?;
        check_rate("recovery_rate", self.recovery_rate)?;
        check_rate("property_discount_rate", self.property_discount_rate)?;
        if self.property_discount_rate >= 1.0 {
            return Err(SimulationError::config(
                "property_discount_rate",
                "discount must be below 1.0",
            ));
        }

        // Loan size
        check_positive("avg_loan_size", self.avg_loan_size)?;
        check_non_negative("loan_size_std_dev", self.loan_size_std_dev)?;
        if self.avg_loan_size > self.size {
            return Err(SimulationError::config(
                "avg_loan_size",
                "average loan size exceeds fund size",
            ));
        }
        let (min_size, max_size) = self.loan_size_bounds();
        check_positive("min_loan_size", min_size)?;
        if min_size > max_size {
            return Err(SimulationError::config(
                "min_loan_size",
                format!("min {} exceeds max {}", min_size, max_size),
            ));
        }

        // LTV
        if !(self.min_ltv > 0.0 && self.min_ltv < self.max_ltv && self.max_ltv < 1.0) {
            return Err(SimulationError::config(
                "min_ltv/max_ltv",
                format!("require 0 < min_ltv < max_ltv < 1, got [{}, {}]", self.min_ltv, self.max_ltv),
            ));
        }
        if !(self.avg_loan_ltv > 0.0 && self.avg_loan_ltv < 1.0) {
            return Err(SimulationError::config("avg_loan_ltv", "must be in (0, 1)"));
        }
        check_non_negative("ltv_std_dev", self.ltv_std_dev)?;

        // Exit timing
        check_positive("avg_loan_exit_year", self.avg_loan_exit_year)?;
        check_non_negative("exit_year_std_dev", self.exit_year_std_dev)?;
        if !self.exit_year_skew.is_finite() {
            return Err(SimulationError::config("exit_year_skew", "must be finite"));
        }
        check_rate("early_exit_probability", self.early_exit_probability)?;
        check_positive("min_holding_period", self.min_holding_period)?;
        if self.min_holding_period > term {
            return Err(SimulationError::config(
                "min_holding_period",
                "minimum holding period exceeds fund term",
            ));
        }

        // Deployment and reinvestment
        check_non_negative("deployment_period", self.deployment_period)?;
        if self.deployment_period > term {
            return Err(SimulationError::config("deployment_period", "must not exceed term"));
        }
        check_non_negative("reinvestment_period", self.reinvestment_period)?;
        if self.reinvestment_period > term {
            return Err(SimulationError::config("reinvestment_period", "must not exceed term"));
        }
        check_rate("reinvestment_rate", self.reinvestment_rate)?;
        check_rate("rebalancing_strength", self.rebalancing_strength)?;

        // Fees and waterfall
        check_rate("management_fee_rate", self.management_fee_rate)?;
        check_rate("gp_commitment_percentage", self.gp_commitment_percentage)?;
        check_rate("hurdle_rate", self.hurdle_rate)?;
        check_rate("carried_interest_rate", self.carried_interest_rate)?;
        check_rate("catch_up_rate", self.catch_up_rate)?;
        check_rate("risk_free_rate", self.risk_free_rate)?;
        check_rate("discount_rate", self.discount_rate)?;

        if let Some(market) = &self.market_conditions {
            market.validate()?;
        }
        if let Some(correlation) = &self.default_correlation {
            for (field, value) in [
                ("default_correlation.same_zone", correlation.same_zone),
                ("default_correlation.cross_zone", correlation.cross_zone),
            ] {
                if !value.is_finite() || value <= -1.0 || value >= 1.0 {
                    return Err(SimulationError::config(field, "correlation must be in (-1, 1)"));
                }
            }
            if correlation.same_zone < correlation.cross_zone {
                return Err(SimulationError::config(
                    "default_correlation",
                    "same-zone correlation must be at least the cross-zone correlation",
                ));
            }
        }
        self.leverage.validate()?;

        Ok(())
    }

    /// Loan size truncation bounds, defaulting to [avg / 2, avg * 2]
    pub fn loan_size_bounds(&self) -> (f64, f64) {
        (
            self.min_loan_size.unwrap_or(self.avg_loan_size / 2.0),
            self.max_loan_size.unwrap_or(self.avg_loan_size * 2.0),
        )
    }

    pub fn capabilities(&self) -> Capabilities {
        Capabilities {
            market_conditions: self.market_conditions.is_some(),
            zone_rebalancing: self.zone_rebalancing_enabled && self.rebalancing_strength > 0.0,
            correlated_defaults: self.default_correlation.is_some(),
        }
    }

    pub fn appreciation_rate(&self, zone: Zone) -> f64 {
        self.appreciation_rates
            .get(&zone)
            .copied()
            .unwrap_or_else(|| zone.fallback_appreciation_rate())
    }

    pub fn default_rate(&self, zone: Zone) -> f64 {
        self.default_rates
            .get(&zone)
            .copied()
            .unwrap_or_else(|| zone.fallback_default_rate())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::BTreeMap;

    #[test]
    fn test_default_config_is_valid() {
        assert!(FundConfig::default().validate().is_ok());
    }

    #[test]
    fn test_partial_json_uses_defaults() {
        let config = FundConfig::from_json_str(
            r#"{"size": 10000000, "term": 5, "granularity": "monthly",
                "zone_allocations": {"green": 0.5, "orange": 0.5}}"#,
        )
        .unwrap();
        assert_eq!(config.term, 5);
        assert_eq!(config.granularity, Granularity::Monthly);
        assert_eq!(config.avg_loan_size, 250_000.0);
        assert!(config.zone_allocations.get(&Zone::Red).is_none());
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_unknown_waterfall_structure_rejected() {
        let result = FundConfig::from_json_str(r#"{"waterfall_structure": "asian"}"#);
        assert!(result.is_err());
    }

    #[test]
    fn test_zone_allocations_must_sum_to_one() {
        let config = FundConfig {
            zone_allocations: BTreeMap::from([(Zone::Green, 0.6), (Zone::Orange, 0.3)]),
            ..Default::default()
        };
        let err = config.validate().unwrap_err();
        assert!(err.to_string().contains("zone_allocations"));

        let within_tolerance = FundConfig {
            zone_allocations: BTreeMap::from([
                (Zone::Green, 0.60005),
                (Zone::Orange, 0.3),
                (Zone::Red, 0.1),
            ]),
            ..Default::default()
        };
        assert!(within_tolerance.validate().is_ok());
    }

    #[test]
    fn test_invalid_values_rejected() {
        let cases: Vec<FundConfig> = vec![
            FundConfig { size: 0.0, ..Default::default() },
            FundConfig { term: 0, ..Default::default() },
            FundConfig { interest_rate: 1.5, ..Default::default() },
            FundConfig { deployment_period: 11.0, ..Default::default() },
            FundConfig { reinvestment_period: 12.0, ..Default::default() },
            FundConfig { min_ltv: 0.8, max_ltv: 0.5, ..Default::default() },
            FundConfig { rebalancing_strength: -0.1, ..Default::default() },
            FundConfig {
                default_correlation: Some(DefaultCorrelation { same_zone: 0.1, cross_zone: 0.4 }),
                ..Default::default()
            },
        ];
        for config in cases {
            assert!(config.validate().is_err(), "expected rejection: {:?}", config.name);
        }
    }

    #[test]
    fn test_capabilities() {
        let config = FundConfig {
            zone_rebalancing_enabled: true,
            default_correlation: Some(DefaultCorrelation::default()),
            ..Default::default()
        };
        let caps = config.capabilities();
        assert!(caps.zone_rebalancing);
        assert!(caps.correlated_defaults);
        assert!(!caps.market_conditions);
    }

    #[test]
    fn test_rate_lookup_falls_back() {
        let config = FundConfig {
            default_rates: BTreeMap::new(),
            ..Default::default()
        };
        assert_eq!(config.default_rate(Zone::Red), 0.08);
        assert_eq!(config.appreciation_rate(Zone::Green), 0.03);
    }
}
