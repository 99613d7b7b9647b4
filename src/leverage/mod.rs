//! Fund-level leverage facilities layered on top of portfolio NAV

mod engine;

pub use engine::{process_leverage, LeverageMetrics, LeveragePeriod, LeverageResult};

use serde::{Deserialize, Serialize};

use crate::error::{Result, SimulationError};

/// Revolving facility sized as a multiple of NAV
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct NavFacility {
    pub enabled: bool,
    /// Facility limit as a multiple of NAV
    pub nav_multiplier: f64,
    /// Annual interest spread on drawn balance, basis points
    pub spread_bps: f64,
    /// Annual fee on the undrawn limit, basis points
    pub commitment_fee_bps: f64,
    /// Drawn share of the limit
    pub utilization: f64,
}

impl Default for NavFacility {
    fn default() -> Self {
        Self {
            enabled: false,
            nav_multiplier: 0.3,
            spread_bps: 300.0,
            commitment_fee_bps: 50.0,
            utilization: 1.0,
        }
    }
}

/// Warehouse line sized off committed capital, open only during a draw window
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RampFacility {
    pub enabled: bool,
    /// Limit as a fraction of committed capital
    pub limit_pct_commitment: f64,
    pub spread_bps: f64,
    pub commitment_fee_bps: f64,
    /// First period the line is drawn (inclusive)
    pub draw_start_period: u32,
    /// Period the line is repaid (exclusive)
    pub draw_end_period: u32,
}

impl Default for RampFacility {
    fn default() -> Self {
        Self {
            enabled: false,
            limit_pct_commitment: 0.15,
            spread_bps: 250.0,
            commitment_fee_bps: 25.0,
            draw_start_period: 0,
            draw_end_period: 2,
        }
    }
}

/// Flat-rate deal-level note
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DealNote {
    pub enabled: bool,
    /// Principal as a fraction of NAV
    pub note_pct_nav: f64,
    /// Annual flat rate
    pub note_rate: f64,
}

impl Default for DealNote {
    fn default() -> Self {
        Self {
            enabled: false,
            note_pct_nav: 0.1,
            note_rate: 0.07,
        }
    }
}

/// Extra NAV facility capacity against a share of eligible NAV
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct OverAdvance {
    pub enabled: bool,
    pub eligible_nav_share: f64,
    /// Advance rate on eligible NAV
    pub advance_rate: f64,
    /// Premium over the NAV facility spread, basis points
    pub premium_bps: f64,
}

impl Default for OverAdvance {
    fn default() -> Self {
        Self {
            enabled: false,
            eligible_nav_share: 0.2,
            advance_rate: 0.5,
            premium_bps: 150.0,
        }
    }
}

/// Override of one configuration key for a window of periods
///
/// `path` is a dotted key into the leverage configuration, e.g.
/// `nav_facility.spread_bps`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DynamicRule {
    pub start_period: u32,
    /// Exclusive
    pub end_period: u32,
    pub path: String,
    pub value: serde_json::Value,
}

impl DynamicRule {
    pub fn is_active(&self, period: u32) -> bool {
        self.start_period <= period && period < self.end_period
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LeverageConfig {
    pub nav_facility: NavFacility,
    pub ramp_facility: RampFacility,
    pub deal_note: DealNote,
    pub over_advance: OverAdvance,
    pub dynamic_rules: Vec<DynamicRule>,
}

fn check_non_negative(field: &str, value: f64) -> Result<()> {
    if !value.is_finite() || value < 0.0 {
        return Err(SimulationError::config(
            format!("leverage.{}", field),
            format!("{} must be non-negative", value),
        ));
    }
    Ok(())
}

fn check_fraction(field: &str, value: f64) -> Result<()> {
    if !value.is_finite() || !(0.0..=1.0).contains(&value) {
        return Err(SimulationError::config(
            format!("leverage.{}", field),
            format!("{} must be in [0, 1]", value),
        ));
    }
    Ok(())
}

impl LeverageConfig {
    /// Whether any facility is switched on before dynamic rules are applied
    pub fn any_enabled(&self) -> bool {
        self.nav_facility.enabled || self.ramp_facility.enabled || self.deal_note.enabled || self.over_advance.enabled
    }

    /// Nothing to compute: no facility and no rule that could enable one
    pub fn is_inactive(&self) -> bool {
        !self.any_enabled() && self.dynamic_rules.is_empty()
    }

    pub fn validate(&self) -> Result<()> {
        self.validate_terms()?;
        for rule in &self.dynamic_rules {
            if rule.start_period >= rule.end_period {
                return Err(SimulationError::LeverageRule(format!(
                    "rule for '{}' has empty window [{}, {})",
                    rule.path, rule.start_period, rule.end_period
                )));
            }
            // Rejects unknown paths and values of the wrong shape
            self.with_rule(rule)?.validate_terms()?;
        }
        Ok(())
    }

    fn validate_terms(&self) -> Result<()> {
        check_non_negative("nav_facility.nav_multiplier", self.nav_facility.nav_multiplier)?;
        check_non_negative("nav_facility.spread_bps", self.nav_facility.spread_bps)?;
        check_non_negative("nav_facility.commitment_fee_bps", self.nav_facility.commitment_fee_bps)?;
        check_fraction("nav_facility.utilization", self.nav_facility.utilization)?;
        check_fraction("ramp_facility.limit_pct_commitment", self.ramp_facility.limit_pct_commitment)?;
        check_non_negative("ramp_facility.spread_bps", self.ramp_facility.spread_bps)?;
        check_non_negative("ramp_facility.commitment_fee_bps", self.ramp_facility.commitment_fee_bps)?;
        if self.ramp_facility.draw_start_period > self.ramp_facility.draw_end_period {
            return Err(SimulationError::config(
                "leverage.ramp_facility.draw_start_period",
                "draw window starts after it ends",
            ));
        }
        check_fraction("deal_note.note_pct_nav", self.deal_note.note_pct_nav)?;
        check_fraction("deal_note.note_rate", self.deal_note.note_rate)?;
        check_fraction("over_advance.eligible_nav_share", self.over_advance.eligible_nav_share)?;
        check_fraction("over_advance.advance_rate", self.over_advance.advance_rate)?;
        check_non_negative("over_advance.premium_bps", self.over_advance.premium_bps)?;
        Ok(())
    }

    /// Copy of this configuration with one rule's override applied
    pub fn with_rule(&self, rule: &DynamicRule) -> Result<LeverageConfig> {
        let mut tree = serde_json::to_value(self)?;
        let segments: Vec<&str> = rule.path.split('.').collect();
        if segments.first() == Some(&"dynamic_rules") || segments.iter().any(|s| s.is_empty()) {
            return Err(SimulationError::LeverageRule(format!("invalid rule path '{}'", rule.path)));
        }

        let mut cursor = &mut tree;
        for segment in &segments {
            cursor = cursor
                .get_mut(*segment)
                .ok_or_else(|| SimulationError::LeverageRule(format!("unknown rule path '{}'", rule.path)))?;
        }
        *cursor = rule.value.clone();

        serde_json::from_value(tree).map_err(|e| {
            SimulationError::LeverageRule(format!("rule '{}' value {} rejected: {}", rule.path, rule.value, e))
        })
    }

    /// Effective configuration for a period with every active rule applied in order
    pub fn effective_for(&self, period: u32) -> Result<LeverageConfig> {
        let mut effective = self.clone();
        for rule in self.dynamic_rules.iter().filter(|r| r.is_active(period)) {
            effective = effective.with_rule(rule)?;
        }
        Ok(effective)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_default_is_inactive_and_valid() {
        let config = LeverageConfig::default();
        assert!(config.is_inactive());
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_rule_patches_nested_key() {
        let config = LeverageConfig {
            dynamic_rules: vec![DynamicRule {
                start_period: 2,
                end_period: 4,
                path: "nav_facility.spread_bps".to_string(),
                value: json!(500.0),
            }],
            ..Default::default()
        };
        assert!(config.validate().is_ok());
        assert_eq!(config.effective_for(1).unwrap().nav_facility.spread_bps, 300.0);
        assert_eq!(config.effective_for(3).unwrap().nav_facility.spread_bps, 500.0);
        assert_eq!(config.effective_for(4).unwrap().nav_facility.spread_bps, 300.0);
    }

    #[test]
    fn test_invalid_rules_rejected() {
        let rule = |path: &str, value: serde_json::Value, start, end| LeverageConfig {
            dynamic_rules: vec![DynamicRule {
                start_period: start,
                end_period: end,
                path: path.to_string(),
                value,
            }],
            ..Default::default()
        };

        assert!(rule("nav_facility.no_such_key", json!(1.0), 0, 1).validate().is_err());
        assert!(rule("nav_facility.enabled", json!("yes"), 0, 1).validate().is_err());
        assert!(rule("nav_facility.utilization", json!(1.5), 0, 1).validate().is_err());
        assert!(rule("nav_facility.spread_bps", json!(1.0), 3, 3).validate().is_err());
        assert!(rule("dynamic_rules", json!([]), 0, 1).validate().is_err());
    }

    #[test]
    fn test_out_of_range_terms_rejected() {
        let config = LeverageConfig {
            deal_note: DealNote {
                enabled: true,
                note_pct_nav: 2.0,
                ..Default::default()
            },
            ..Default::default()
        };
        assert!(config.validate().is_err());
    }
}
