//! Per-sample parameter overrides supplied by the Monte Carlo driver

use serde::{Deserialize, Serialize};

use super::config::FundConfig;

/// Perturbation applied on top of a fund configuration
///
/// Multipliers scale rates, shifts are additive. The neutral variation
/// (`ParameterVariation::default()`) leaves the configuration unchanged.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ParameterVariation {
    pub appreciation_multiplier: f64,
    pub default_multiplier: f64,
    pub early_exit_multiplier: f64,
    /// Years added to the mean exit year
    pub exit_timing_shift: f64,
    pub ltv_shift: f64,
    pub interest_rate_shift: f64,
}

impl Default for ParameterVariation {
    fn default() -> Self {
        Self {
            appreciation_multiplier: 1.0,
            default_multiplier: 1.0,
            early_exit_multiplier: 1.0,
            exit_timing_shift: 0.0,
            ltv_shift: 0.0,
            interest_rate_shift: 0.0,
        }
    }
}

impl ParameterVariation {
    pub fn is_neutral(&self) -> bool {
        *self == Self::default()
    }

    /// Produce a varied copy of `config`; rates are clamped back into range
    pub fn apply(&self, config: &FundConfig) -> FundConfig {
        let mut varied = config.clone();

        for rate in varied.appreciation_rates.values_mut() {
            *rate = (*rate * self.appreciation_multiplier).clamp(0.0, 1.0);
        }
        for rate in varied.default_rates.values_mut() {
            *rate = (*rate * self.default_multiplier).clamp(0.0, 1.0);
        }
        varied.early_exit_probability =
            (config.early_exit_probability * self.early_exit_multiplier).clamp(0.0, 1.0);
        if self.exit_timing_shift != 0.0 {
            varied.avg_loan_exit_year =
                (config.avg_loan_exit_year + self.exit_timing_shift).max(config.min_holding_period);
        }

        // Only shifted values are pulled back inside their bounds
        if self.ltv_shift != 0.0 {
            let ltv_floor = config.min_ltv + 1e-6;
            let ltv_cap = config.max_ltv - 1e-6;
            let shifted = config.avg_loan_ltv + self.ltv_shift;
            // Inverted bounds are left for validate to reject
            varied.avg_loan_ltv = if ltv_floor <= ltv_cap {
                shifted.clamp(ltv_floor, ltv_cap)
            } else {
                shifted
            };
        }
        varied.interest_rate = (config.interest_rate + self.interest_rate_shift).clamp(0.0, 1.0);

        varied
    }
}
