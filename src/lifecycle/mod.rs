//! Portfolio lifecycle simulation

mod defaults;
mod engine;
mod rebalancing;
mod snapshot;

pub use defaults::{cohort_correlation, correlated_defaults, independent_defaults};
pub use engine::LifecycleEngine;
pub use rebalancing::rebalanced_weights;
pub use snapshot::{LifecycleResult, PeriodMetrics, PeriodSnapshot, ZoneShare};

use rand::Rng;

use crate::dataset::ZoneDataSource;
use crate::error::Result;
use crate::fund::Fund;
use crate::portfolio::Portfolio;

/// Run the lifecycle at the fund's configured granularity
///
/// Snapshots are period-indexed either way; `LifecycleResult::periods_per_year`
/// tells consumers how to read them.
pub fn simulate_lifecycle<R: Rng>(
    fund: &Fund,
    portfolio: &mut Portfolio,
    rng: &mut R,
    dataset: Option<&dyn ZoneDataSource>,
) -> Result<LifecycleResult> {
    LifecycleEngine::new(fund, dataset).run(rng, portfolio)
}
