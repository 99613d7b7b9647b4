//! Year-indexed market condition multipliers

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use super::zone::Zone;
use crate::error::{Result, SimulationError};

/// Multipliers applied to the fund's base assumptions for one year
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct MarketPeriod {
    pub appreciation_multiplier: f64,
    pub default_multiplier: f64,
    pub early_exit_multiplier: f64,
    /// Extra default multiplier per zone, applied on top of `default_multiplier`
    pub zone_default_multipliers: BTreeMap<Zone, f64>,
}

impl Default for MarketPeriod {
    fn default() -> Self {
        Self {
            appreciation_multiplier: 1.0,
            default_multiplier: 1.0,
            early_exit_multiplier: 1.0,
            zone_default_multipliers: BTreeMap::new(),
        }
    }
}

impl MarketPeriod {
    pub fn default_multiplier_for(&self, zone: Zone) -> f64 {
        self.default_multiplier * self.zone_default_multipliers.get(&zone).copied().unwrap_or(1.0)
    }
}

/// Market conditions keyed by fund year (0-based)
///
/// Years without an entry are neutral (all multipliers 1.0).
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct MarketConditions {
    pub years: BTreeMap<u32, MarketPeriod>,
}

impl MarketConditions {
    /// Conditions for a given fund year, falling back to neutral
    pub fn for_year(&self, year: u32) -> MarketPeriod {
        self.years.get(&year).cloned().unwrap_or_default()
    }

    /// A downturn of `severity` (e.g. 0.5 = 50% stress) lasting `duration` years from `start_year`
    pub fn downturn(start_year: u32, duration: u32, severity: f64) -> Self {
        let years = (start_year..start_year + duration)
            .map(|year| {
                (
                    year,
                    MarketPeriod {
                        appreciation_multiplier: (1.0 - severity).max(0.0),
                        default_multiplier: 1.0 + severity * 2.0,
                        early_exit_multiplier: (1.0 - severity).max(0.0),
                        zone_default_multipliers: BTreeMap::new(),
                    },
                )
            })
            .collect();
        Self { years }
    }

    pub fn validate(&self) -> Result<()> {
        for (year, period) in &self.years {
            let multipliers = [
                ("appreciation_multiplier", period.appreciation_multiplier),
                ("default_multiplier", period.default_multiplier),
                ("early_exit_multiplier", period.early_exit_multiplier),
            ];
            for (name, value) in multipliers {
                if !value.is_finite() || value < 0.0 {
                    return Err(SimulationError::config(
                        format!("market_conditions.years.{}.{}", year, name),
                        "multiplier must be a non-negative number",
                    ));
                }
            }
            if period.zone_default_multipliers.values().any(|m| !m.is_finite() || *m < 0.0) {
                return Err(SimulationError::config(
                    format!("market_conditions.years.{}.zone_default_multipliers", year),
                    "multiplier must be a non-negative number",
                ));
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_missing_year_is_neutral() {
        let conditions = MarketConditions::downturn(2, 2, 0.5);
        let neutral = conditions.for_year(0);
        assert_eq!(neutral, MarketPeriod::default());

        let stressed = conditions.for_year(3);
        assert_eq!(stressed.appreciation_multiplier, 0.5);
        assert_eq!(stressed.default_multiplier, 2.0);
        assert!(conditions.years.get(&4).is_none());
    }

    #[test]
    fn test_zone_default_multiplier() {
        let mut period = MarketPeriod::default();
        period.default_multiplier = 1.5;
        period.zone_default_multipliers.insert(Zone::Red, 2.0);
        assert_eq!(period.default_multiplier_for(Zone::Red), 3.0);
        assert_eq!(period.default_multiplier_for(Zone::Green), 1.5);
    }

    #[test]
    fn test_negative_multiplier_rejected() {
        let mut conditions = MarketConditions::default();
        conditions.years.insert(
            1,
            MarketPeriod {
                default_multiplier: -1.0,
                ..Default::default()
            },
        );
        assert!(conditions.validate().is_err());
    }
}
