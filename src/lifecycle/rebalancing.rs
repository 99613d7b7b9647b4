//! Zone weights for reinvestment capital

use std::collections::BTreeMap;

use crate::fund::{normalize_weights, Zone, ZoneWeights};

/// Blend static zone targets with a gap-closing allocation
///
/// The gap-closing weights send new capital to zones in proportion to how far
/// each sits below its target once `new_capital` is added. `strength` 0 keeps
/// the static targets; 1 uses the gap-closing weights outright.
pub fn rebalanced_weights(
    targets: &ZoneWeights,
    current_amounts: &BTreeMap<Zone, f64>,
    new_capital: f64,
    strength: f64,
) -> ZoneWeights {
    let Some(targets) = normalize_weights(targets) else {
        return targets.clone();
    };
    let strength = strength.clamp(0.0, 1.0);
    if strength == 0.0 || new_capital <= 0.0 {
        return targets;
    }

    let total_after: f64 = current_amounts.values().sum::<f64>() + new_capital;
    let gaps: ZoneWeights = targets
        .iter()
        .map(|(zone, weight)| {
            let held = current_amounts.get(zone).copied().unwrap_or(0.0);
            (*zone, (weight * total_after - held).max(0.0))
        })
        .collect();
    let gap_total: f64 = gaps.values().sum();
    if gap_total <= 0.0 {
        return targets;
    }

    targets
        .iter()
        .map(|(zone, weight)| {
            let close_gap = gaps[zone] / gap_total;
            (*zone, (1.0 - strength) * weight + strength * close_gap)
        })
        .collect()
}
