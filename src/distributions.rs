//! Sampling primitives: truncated and skewed normals, zone allocation,
//! correlated multivariate normals

use std::collections::BTreeMap;
use std::f64::consts::{FRAC_2_PI, SQRT_2};

use log::warn;
use nalgebra::{Cholesky, DMatrix, DVector, SymmetricEigen};
use rand::distributions::{Distribution, WeightedIndex};
use rand::seq::SliceRandom;
use rand::Rng;
use rand_distr::StandardNormal;
use statrs::function::erf::{erfc, erfc_inv};

use crate::error::{Result, SimulationError};
use crate::fund::{normalize_weights, Zone, ZoneWeights};

/// Smallest eigenvalue kept when repairing a correlation matrix
const PSD_EIGEN_FLOOR: f64 = 1e-8;

/// Standard normal CDF
pub fn normal_cdf(x: f64) -> f64 {
    0.5 * erfc(-x / SQRT_2)
}

/// Standard normal quantile
pub fn normal_quantile(p: f64) -> f64 {
    -SQRT_2 * erfc_inv(2.0 * p)
}

/// Draw `count` samples from N(mean, std_dev²) conditioned on [lower, upper]
///
/// Uses inverse-CDF sampling of the truncated distribution, so tails are not
/// distorted the way clip-after-draw would distort them. Bounds lying wholly in
/// the upper tail are sampled through the mirrored lower tail to keep CDF
/// precision.
pub fn truncated_normal<R: Rng + ?Sized>(
    rng: &mut R,
    mean: f64,
    std_dev: f64,
    lower: f64,
    upper: f64,
    count: usize,
) -> Result<Vec<f64>> {
    if !(mean.is_finite() && std_dev.is_finite() && lower.is_finite() && upper.is_finite()) {
        return Err(SimulationError::InvalidDistribution(
            "truncated normal parameters must be finite".to_string(),
        ));
    }
    if lower > upper {
        return Err(SimulationError::InvalidDistribution(format!(
            "lower bound {} exceeds upper bound {}",
            lower, upper
        )));
    }
    if std_dev < 0.0 {
        return Err(SimulationError::InvalidDistribution(format!(
            "negative standard deviation {}",
            std_dev
        )));
    }

    // Degenerate distribution collapses onto the clamped mean
    if std_dev == 0.0 || lower == upper {
        return Ok(vec![mean.clamp(lower, upper); count]);
    }

    let alpha = (lower - mean) / std_dev;
    let beta = (upper - mean) / std_dev;
    let mirrored = alpha > 0.0;
    let (lo, hi) = if mirrored { (-beta, -alpha) } else { (alpha, beta) };
    let cdf_lo = normal_cdf(lo);
    let cdf_hi = normal_cdf(hi);

    let samples = (0..count)
        .map(|_| {
            let z = if cdf_hi - cdf_lo <= f64::MIN_POSITIVE {
                // Interval too far in the tail to invert; density is ~flat there
                rng.gen_range(lo..=hi)
            } else {
                let u: f64 = rng.gen_range(cdf_lo..cdf_hi);
                normal_quantile(u).clamp(lo, hi)
            };
            let z = if mirrored { -z } else { z };
            (mean + std_dev * z).clamp(lower, upper)
        })
        .collect();

    Ok(samples)
}

/// Draw one value from a skew-normal distribution with the given mean and standard deviation
///
/// `shape` = 0 reduces to a plain normal; positive values skew right.
pub fn skew_normal<R: Rng + ?Sized>(rng: &mut R, mean: f64, std_dev: f64, shape: f64) -> f64 {
    let delta = shape / (1.0 + shape * shape).sqrt();
    let scale = std_dev / (1.0 - FRAC_2_PI * delta * delta).sqrt();
    let location = mean - scale * delta * FRAC_2_PI.sqrt();

    let u0: f64 = StandardNormal.sample(rng);
    let v: f64 = StandardNormal.sample(rng);
    let z = delta * u0.abs() + (1.0 - delta * delta).sqrt() * v;

    location + scale * z
}

/// Proportional zone counts rounded to integers and adjusted to sum exactly to `count`
pub fn exact_zone_counts(weights: &ZoneWeights, count: usize) -> Result<BTreeMap<Zone, usize>> {
    let normalized = normalize_weights(weights).ok_or_else(|| {
        SimulationError::InvalidDistribution("zone weights must be non-negative with a positive sum".to_string())
    })?;

    let targets: BTreeMap<Zone, f64> = normalized
        .iter()
        .map(|(zone, w)| (*zone, w * count as f64))
        .collect();
    let mut counts: BTreeMap<Zone, usize> = targets
        .iter()
        .map(|(zone, target)| (*zone, target.round() as usize))
        .collect();

    let mut total: usize = counts.values().sum();
    while total < count {
        // Give the unit to the zone furthest below its exact target
        let zone = targets
            .iter()
            .max_by(|a, b| {
                let gap_a = a.1 - counts[a.0] as f64;
                let gap_b = b.1 - counts[b.0] as f64;
                gap_a.total_cmp(&gap_b)
            })
            .map(|(zone, _)| *zone);
        match zone {
            Some(zone) => *counts.entry(zone).or_default() += 1,
            None => break,
        }
        total += 1;
    }
    while total > count {
        // Take the unit from the zone furthest above its exact target
        let zone = targets
            .iter()
            .filter(|(zone, _)| counts[*zone] > 0)
            .max_by(|a, b| {
                let excess_a = counts[a.0] as f64 - a.1;
                let excess_b = counts[b.0] as f64 - b.1;
                excess_a.total_cmp(&excess_b)
            })
            .map(|(zone, _)| *zone);
        match zone {
            Some(zone) => *counts.entry(zone).or_default() -= 1,
            None => break,
        }
        total -= 1;
    }

    Ok(counts)
}

/// Produce `count` zone labels approximating `weights`
///
/// `precision` interpolates between independent weighted draws (0.0) and exact
/// proportional counts (1.0): `round(precision * count)` labels are allocated
/// exactly, the remainder are drawn at random, and the result is shuffled.
pub fn generate_zone_allocation<R: Rng + ?Sized>(
    rng: &mut R,
    weights: &ZoneWeights,
    count: usize,
    precision: f64,
) -> Result<Vec<Zone>> {
    if !(0.0..=1.0).contains(&precision) {
        return Err(SimulationError::InvalidDistribution(format!(
            "zone allocation precision {} outside [0, 1]",
            precision
        )));
    }
    let normalized = normalize_weights(weights).ok_or_else(|| {
        SimulationError::InvalidDistribution("zone weights must be non-negative with a positive sum".to_string())
    })?;

    let exact_count = ((precision * count as f64).round() as usize).min(count);
    let mut zones = Vec::with_capacity(count);
    for (zone, n) in exact_zone_counts(&normalized, exact_count)? {
        zones.extend(std::iter::repeat(zone).take(n));
    }

    let random_count = count - exact_count;
    if random_count > 0 {
        let labels: Vec<Zone> = normalized.keys().copied().collect();
        let sampler = WeightedIndex::new(normalized.values().copied())
            .map_err(|e| SimulationError::InvalidDistribution(format!("zone weights: {}", e)))?;
        zones.extend((0..random_count).map(|_| labels[sampler.sample(rng)]));
    }

    zones.shuffle(rng);
    Ok(zones)
}

/// Repair a symmetric matrix into the nearest positive semi-definite correlation matrix
///
/// Clips negative eigenvalues and rescales back to a unit diagonal.
pub fn nearest_psd_correlation(matrix: &DMatrix<f64>) -> DMatrix<f64> {
    let symmetric = (matrix + matrix.transpose()) * 0.5;
    let mut eigen = SymmetricEigen::new(symmetric);
    eigen.eigenvalues.iter_mut().for_each(|l| *l = l.max(PSD_EIGEN_FLOOR));
    let repaired = eigen.recompose();

    let n = repaired.nrows();
    DMatrix::from_fn(n, n, |i, j| {
        let scale = (repaired[(i, i)] * repaired[(j, j)]).sqrt();
        if scale > 0.0 {
            repaired[(i, j)] / scale
        } else if i == j {
            1.0
        } else {
            0.0
        }
    })
}

/// Draws correlated normal vectors via the Cholesky factor of a correlation matrix
#[derive(Debug, Clone)]
pub struct CorrelatedNormalSampler {
    means: DVector<f64>,
    std_devs: DVector<f64>,
    factor: DMatrix<f64>,
    repaired: bool,
}

impl CorrelatedNormalSampler {
    /// Build a sampler; a correlation matrix that is not positive definite is
    /// replaced by its nearest PSD approximation instead of failing
    pub fn new(correlation: DMatrix<f64>, means: Vec<f64>, std_devs: Vec<f64>) -> Result<Self> {
        let n = correlation.nrows();
        if correlation.ncols() != n || means.len() != n || std_devs.len() != n {
            return Err(SimulationError::InvalidDistribution(format!(
                "dimension mismatch: correlation {}x{}, {} means, {} std devs",
                n,
                correlation.ncols(),
                means.len(),
                std_devs.len()
            )));
        }
        if correlation.iter().any(|c| !c.is_finite()) {
            return Err(SimulationError::InvalidDistribution(
                "correlation matrix contains non-finite entries".to_string(),
            ));
        }
        if std_devs.iter().any(|s| !s.is_finite() || *s < 0.0) {
            return Err(SimulationError::InvalidDistribution(
                "standard deviations must be finite and non-negative".to_string(),
            ));
        }

        let (factor, repaired) = match Cholesky::new(correlation.clone()) {
            Some(cholesky) => (cholesky.l(), false),
            None => {
                warn!("Correlation matrix ({}x{}) not positive definite; using nearest PSD approximation", n, n);
                (Self::repaired_factor(&correlation), true)
            }
        };

        Ok(Self {
            means: DVector::from_vec(means),
            std_devs: DVector::from_vec(std_devs),
            factor,
            repaired,
        })
    }

    /// Equicorrelated sampler of standard normals
    pub fn equicorrelated(dimension: usize, rho: f64) -> Result<Self> {
        let correlation = DMatrix::from_fn(dimension, dimension, |i, j| if i == j { 1.0 } else { rho });
        Self::new(correlation, vec![0.0; dimension], vec![1.0; dimension])
    }

    fn repaired_factor(correlation: &DMatrix<f64>) -> DMatrix<f64> {
        let mut psd = nearest_psd_correlation(correlation);
        for _ in 0..8 {
            if let Some(cholesky) = Cholesky::new(psd.clone()) {
                return cholesky.l();
            }
            // Eigenvalue floor lost to rounding; nudge the diagonal and renormalize
            psd = nearest_psd_correlation(&(psd + DMatrix::identity(correlation.nrows(), correlation.nrows()) * 1e-6));
        }
        warn!("Correlation repair failed; falling back to independent draws");
        DMatrix::identity(correlation.nrows(), correlation.nrows())
    }

    pub fn dimension(&self) -> usize {
        self.means.len()
    }

    /// Whether the input matrix had to be repaired
    pub fn was_repaired(&self) -> bool {
        self.repaired
    }

    pub fn sample<R: Rng + ?Sized>(&self, rng: &mut R) -> Vec<f64> {
        let n = self.dimension();
        let independent: DVector<f64> = DVector::from_fn(n, |_, _| StandardNormal.sample(rng));
        let correlated = &self.factor * independent;
        (0..n)
            .map(|i| self.means[i] + self.std_devs[i] * correlated[i])
            .collect()
    }

    /// Uniform marginals of a standard-normal draw (Gaussian copula)
    pub fn sample_uniforms<R: Rng + ?Sized>(&self, rng: &mut R) -> Vec<f64> {
        let n = self.dimension();
        let independent: DVector<f64> = DVector::from_fn(n, |_, _| StandardNormal.sample(rng));
        let correlated = &self.factor * independent;
        correlated.iter().map(|z| normal_cdf(*z)).collect()
    }
}
