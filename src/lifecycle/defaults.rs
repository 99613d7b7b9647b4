//! Default draws for loans exiting in a period

use nalgebra::DMatrix;
use rand::Rng;

use crate::distributions::CorrelatedNormalSampler;
use crate::error::Result;
use crate::fund::{DefaultCorrelation, Zone};

/// Independent Bernoulli draw per loan
pub fn independent_defaults<R: Rng>(rng: &mut R, probabilities: &[f64]) -> Vec<bool> {
    probabilities
        .iter()
        .map(|p| rng.gen::<f64>() < p.clamp(0.0, 1.0))
        .collect()
}

/// Latent-factor correlation matrix for a cohort: `same_zone` between loans in
/// the same zone, `cross_zone` otherwise
pub fn cohort_correlation(zones: &[Zone], correlation: &DefaultCorrelation) -> DMatrix<f64> {
    let n = zones.len();
    DMatrix::from_fn(n, n, |i, j| {
        if i == j {
            1.0
        } else if zones[i] == zones[j] {
            correlation.same_zone
        } else {
            correlation.cross_zone
        }
    })
}

/// Correlated Bernoulli draws through a Gaussian copula
///
/// Loan `i` defaults when its correlated uniform falls below its probability,
/// so marginal default rates match the independent case while defaults cluster.
pub fn correlated_defaults<R: Rng>(
    rng: &mut R,
    zones: &[Zone],
    probabilities: &[f64],
    correlation: &DefaultCorrelation,
) -> Result<Vec<bool>> {
    if zones.len() < 2 {
        return Ok(independent_defaults(rng, probabilities));
    }
    let sampler = CorrelatedNormalSampler::new(
        cohort_correlation(zones, correlation),
        vec![0.0; zones.len()],
        vec![1.0; zones.len()],
    )?;
    let uniforms = sampler.sample_uniforms(rng);
    Ok(uniforms
        .iter()
        .zip(probabilities)
        .map(|(u, p)| *u < p.clamp(0.0, 1.0))
        .collect())
}
