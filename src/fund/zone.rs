//! Risk zones used to bucket loans

use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

/// Zone-keyed weights or rates (ordered, so iteration is deterministic)
pub type ZoneWeights = BTreeMap<Zone, f64>;

/// Risk/return tier of a loan's collateral location
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Zone {
    Green,
    Orange,
    Red,
}

impl Zone {
    pub const ALL: [Zone; 3] = [Zone::Green, Zone::Orange, Zone::Red];

    pub fn as_str(&self) -> &'static str {
        match self {
            Zone::Green => "green",
            Zone::Orange => "orange",
            Zone::Red => "red",
        }
    }

    /// Annual default rate used when the fund does not configure one
    pub fn fallback_default_rate(&self) -> f64 {
        match self {
            Zone::Green => 0.01,
            Zone::Orange => 0.03,
            Zone::Red => 0.08,
        }
    }

    /// Annual property appreciation used when the fund does not configure one
    pub fn fallback_appreciation_rate(&self) -> f64 {
        match self {
            Zone::Green => 0.03,
            Zone::Orange => 0.04,
            Zone::Red => 0.05,
        }
    }
}

impl fmt::Display for Zone {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Zone {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "green" => Ok(Zone::Green),
            "orange" => Ok(Zone::Orange),
            "red" => Ok(Zone::Red),
            other => Err(format!("Unknown zone: {}", other)),
        }
    }
}

/// Default target allocation (60/30/10)
pub fn default_zone_allocations() -> ZoneWeights {
    BTreeMap::from([(Zone::Green, 0.6), (Zone::Orange, 0.3), (Zone::Red, 0.1)])
}

pub fn default_zone_default_rates() -> ZoneWeights {
    Zone::ALL.iter().map(|z| (*z, z.fallback_default_rate())).collect()
}

pub fn default_zone_appreciation_rates() -> ZoneWeights {
    Zone::ALL.iter().map(|z| (*z, z.fallback_appreciation_rate())).collect()
}

/// Normalize weights to sum to one. Returns None if they sum to zero or any is negative.
pub fn normalize_weights(weights: &ZoneWeights) -> Option<ZoneWeights> {
    if weights.values().any(|w| *w < 0.0 || !w.is_finite()) {
        return None;
    }
    let total: f64 = weights.values().sum();
    if total <= 0.0 {
        return None;
    }
    Some(weights.iter().map(|(z, w)| (*z, w / total)).collect())
}
