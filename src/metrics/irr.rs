//! Internal Rate of Return with an ordered solver fallback chain
//!
//! Every call returns a number. The result records which stage produced it
//! and a diagnostic describing the shape of the cash flows, so callers can tell
//! a polynomial-root IRR from a CAGR approximation.

use log::warn;
use nalgebra::{DMatrix, Schur};
use serde::{Deserialize, Serialize};

use crate::cashflows::{CashFlowLedger, FlowKey};

const ZERO_FLOW: f64 = 1e-10;
const NPV_TOLERANCE: f64 = 1e-7;
const MIN_RATE: f64 = -0.99;
const MAX_RATE: f64 = 2.0;
const GRID_STEP: f64 = 0.01;
const BISECTION_ITERATIONS: usize = 50;
const BISECTION_PRECISION: f64 = 1e-10;

/// Stage of the fallback chain that produced an IRR
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum IrrMethod {
    PolynomialRoots,
    PolynomialRootsReseeded,
    BisectionGrid,
    CagrFallback,
    InsufficientData,
}

impl IrrMethod {
    pub fn as_str(&self) -> &'static str {
        match self {
            IrrMethod::PolynomialRoots => "polynomial_roots",
            IrrMethod::PolynomialRootsReseeded => "polynomial_roots_reseeded",
            IrrMethod::BisectionGrid => "bisection_grid",
            IrrMethod::CagrFallback => "cagr_fallback",
            IrrMethod::InsufficientData => "insufficient_data",
        }
    }

    /// Whether the value is a true root of the NPV equation
    pub fn is_exact(&self) -> bool {
        matches!(
            self,
            IrrMethod::PolynomialRoots | IrrMethod::PolynomialRootsReseeded | IrrMethod::BisectionGrid
        )
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IrrResult {
    /// Annualised rate (decimal)
    pub value: f64,
    /// Rate per ledger period
    pub periodic_rate: f64,
    pub method: IrrMethod,
    pub diagnostic: String,
    pub converged: bool,
}

impl IrrResult {
    fn insufficient(diagnostic: String) -> Self {
        Self {
            value: 0.0,
            periodic_rate: 0.0,
            method: IrrMethod::InsufficientData,
            diagnostic,
            converged: false,
        }
    }
}

/// Outcome of one solver stage
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SolverOutcome {
    pub rate: f64,
    pub converged: bool,
}

/// One strategy in the fallback chain; rates are per period
pub trait IrrSolver {
    fn method(&self) -> IrrMethod;
    fn solve(&self, cashflows: &[f64]) -> SolverOutcome;
}

/// Calculate NPV and its derivative with respect to rate
fn npv_and_derivative(cashflows: &[f64], rate: f64) -> (f64, f64) {
    let mut npv = 0.0;
    let mut dnpv = 0.0;

    for (t, &cf) in cashflows.iter().enumerate() {
        let discount = (1.0 + rate).powi(t as i32);
        npv += cf / discount;
        if t > 0 {
            dnpv -= (t as f64) * cf / (discount * (1.0 + rate));
        }
    }

    (npv, dnpv)
}

/// NPV at a periodic rate
pub fn npv_at_rate(cashflows: &[f64], rate: f64) -> f64 {
    cashflows
        .iter()
        .enumerate()
        .map(|(t, &cf)| cf / (1.0 + rate).powi(t as i32))
        .sum()
}

fn npv_converged(cashflows: &[f64], rate: f64) -> bool {
    let scale: f64 = cashflows.iter().map(|c| c.abs()).sum::<f64>().max(1.0);
    rate.is_finite() && rate > MIN_RATE - 1e-9 && (npv_at_rate(cashflows, rate) / scale).abs() < NPV_TOLERANCE
}

/// Newton-Raphson from `seed`, bounded to the solver's rate range
fn newton(cashflows: &[f64], seed: f64) -> SolverOutcome {
    let mut rate = seed;
    for _ in 0..100 {
        let (npv, dnpv) = npv_and_derivative(cashflows, rate);
        if dnpv.abs() < 1e-20 || !npv.is_finite() {
            break;
        }
        let next = (rate - npv / dnpv).clamp(MIN_RATE, 10.0);
        if (next - rate).abs() < BISECTION_PRECISION {
            rate = next;
            break;
        }
        rate = next;
    }
    SolverOutcome {
        rate,
        converged: npv_converged(cashflows, rate),
    }
}

/// Roots of NPV as a polynomial in x = 1 / (1 + r), via companion-matrix eigenvalues
///
/// Among real positive roots the rate nearest the seed is polished with Newton
/// steps; with no usable root, Newton runs from the seed directly.
pub struct PolynomialRootSolver {
    pub seed: f64,
    pub method: IrrMethod,
}

impl PolynomialRootSolver {
    fn candidate_rates(cashflows: &[f64]) -> Vec<f64> {
        // Coefficients c_t of x^t; drop zero high-order terms and factor out x^k
        let Some(last) = cashflows.iter().rposition(|c| c.abs() > ZERO_FLOW) else {
            return Vec::new();
        };
        let Some(first) = cashflows.iter().position(|c| c.abs() > ZERO_FLOW) else {
            return Vec::new();
        };
        let coefficients = &cashflows[first..=last];
        let degree = coefficients.len() - 1;
        if degree == 0 {
            return Vec::new();
        }

        let leading = coefficients[degree];
        let companion = DMatrix::from_fn(degree, degree, |i, j| {
            if j == degree - 1 {
                -coefficients[i] / leading
            } else if i == j + 1 {
                1.0
            } else {
                0.0
            }
        });
        let Some(schur) = Schur::try_new(companion, 1e-12, 10_000) else {
            return Vec::new();
        };

        schur
            .complex_eigenvalues()
            .iter()
            .filter(|z| z.im.abs() <= 1e-9 * z.re.abs().max(1.0) && z.re > 0.0)
            .map(|z| 1.0 / z.re - 1.0)
            .filter(|r| r.is_finite() && *r > MIN_RATE)
            .collect()
    }
}

impl IrrSolver for PolynomialRootSolver {
    fn method(&self) -> IrrMethod {
        self.method
    }

    fn solve(&self, cashflows: &[f64]) -> SolverOutcome {
        let mut candidates = Self::candidate_rates(cashflows);
        candidates.sort_by(|a, b| (a - self.seed).abs().total_cmp(&(b - self.seed).abs()));

        for rate in candidates {
            let polished = newton(cashflows, rate);
            if polished.converged {
                return polished;
            }
        }
        newton(cashflows, self.seed)
    }
}

/// Direct bisection over the full rate range, then a grid search for sign
/// changes refined by bisection
pub struct BisectionGridSolver;

impl BisectionGridSolver {
    fn bisect(cashflows: &[f64], mut low: f64, mut high: f64) -> f64 {
        let mut npv_low = npv_at_rate(cashflows, low);
        for _ in 0..BISECTION_ITERATIONS {
            let mid = (low + high) / 2.0;
            let npv_mid = npv_at_rate(cashflows, mid);
            if npv_mid.abs() < BISECTION_PRECISION || (high - low) / 2.0 < BISECTION_PRECISION {
                return mid;
            }
            if npv_mid * npv_low < 0.0 {
                high = mid;
            } else {
                low = mid;
                npv_low = npv_mid;
            }
        }
        (low + high) / 2.0
    }
}

impl IrrSolver for BisectionGridSolver {
    fn method(&self) -> IrrMethod {
        IrrMethod::BisectionGrid
    }

    fn solve(&self, cashflows: &[f64]) -> SolverOutcome {
        let npv_low = npv_at_rate(cashflows, MIN_RATE);
        let npv_high = npv_at_rate(cashflows, MAX_RATE);
        if npv_low.is_finite() && npv_high.is_finite() && npv_low * npv_high < 0.0 {
            let rate = Self::bisect(cashflows, MIN_RATE, MAX_RATE);
            if npv_converged(cashflows, rate) {
                return SolverOutcome { rate, converged: true };
            }
        }

        let steps = ((MAX_RATE - MIN_RATE) / GRID_STEP).round() as usize;
        let mut previous = (MIN_RATE, npv_low);
        for i in 1..=steps {
            let rate = MIN_RATE + i as f64 * GRID_STEP;
            let npv = npv_at_rate(cashflows, rate);
            if npv.abs() < BISECTION_PRECISION {
                return SolverOutcome { rate, converged: true };
            }
            if previous.1.is_finite() && npv.is_finite() && previous.1 * npv < 0.0 {
                let root = Self::bisect(cashflows, previous.0, rate);
                return SolverOutcome {
                    rate: root,
                    converged: npv_converged(cashflows, root),
                };
            }
            previous = (rate, npv);
        }

        SolverOutcome {
            rate: f64::NAN,
            converged: false,
        }
    }
}

/// The default solver chain: polynomial roots at 10%, reseeded at 20%, then bisection/grid
pub fn default_solvers() -> Vec<Box<dyn IrrSolver>> {
    vec![
        Box::new(PolynomialRootSolver {
            seed: 0.10,
            method: IrrMethod::PolynomialRoots,
        }),
        Box::new(PolynomialRootSolver {
            seed: 0.20,
            method: IrrMethod::PolynomialRootsReseeded,
        }),
        Box::new(BisectionGridSolver),
    ]
}

/// Human-readable classification of a cash-flow pattern
pub fn diagnose(cashflows: &[f64]) -> String {
    if cashflows.is_empty() {
        return "empty cash-flow series".to_string();
    }
    let nonzero: Vec<(usize, f64)> = cashflows
        .iter()
        .copied()
        .enumerate()
        .filter(|(_, c)| c.abs() > ZERO_FLOW)
        .collect();
    if nonzero.is_empty() {
        return "all cash flows zero".to_string();
    }
    let negatives = nonzero.iter().filter(|(_, c)| *c < 0.0).count();
    let positives = nonzero.len() - negatives;
    if positives == 0 && negatives == 1 {
        return "only initial investment".to_string();
    }
    if negatives == 0 {
        return "no negative flows".to_string();
    }
    if positives == 0 {
        return "no positive flows".to_string();
    }
    let sign_changes = nonzero.windows(2).filter(|w| (w[0].1 < 0.0) != (w[1].1 < 0.0)).count();
    if sign_changes == 1 {
        format!("conventional: {} outflows then {} inflows", negatives, positives)
    } else {
        format!("non-conventional: {} sign changes, multiple roots possible", sign_changes)
    }
}

/// CAGR between the first and last nonzero flows
fn cagr_fallback(cashflows: &[f64], periods_per_year: u32, diagnostic: String) -> IrrResult {
    let first = cashflows.iter().position(|c| c.abs() > ZERO_FLOW);
    let last = cashflows.iter().rposition(|c| c.abs() > ZERO_FLOW);
    let (Some(first), Some(last)) = (first, last) else {
        return IrrResult::insufficient(diagnostic);
    };
    if last <= first {
        return IrrResult::insufficient(diagnostic);
    }

    let initial = cashflows[first].abs();
    let terminal = cashflows[last].abs();
    let years = (last - first) as f64 / periods_per_year.max(1) as f64;
    let value = (terminal / initial).powf(1.0 / years) - 1.0;
    if !value.is_finite() {
        return IrrResult::insufficient(diagnostic);
    }
    IrrResult {
        value,
        periodic_rate: (1.0 + value).powf(1.0 / periods_per_year.max(1) as f64) - 1.0,
        method: IrrMethod::CagrFallback,
        diagnostic,
        converged: false,
    }
}

/// IRR of a raw per-period cash-flow vector (index 0 = period 0)
pub fn irr_from_flows(cashflows: &[f64], periods_per_year: u32) -> IrrResult {
    irr_with_solvers(cashflows, periods_per_year, &default_solvers())
}

/// IRR using an explicit solver chain
pub fn irr_with_solvers(cashflows: &[f64], periods_per_year: u32, solvers: &[Box<dyn IrrSolver>]) -> IrrResult {
    let diagnostic = diagnose(cashflows);
    let nonzero = cashflows.iter().filter(|c| c.abs() > ZERO_FLOW).count();
    if nonzero < 2 {
        return IrrResult::insufficient(diagnostic);
    }
    let has_negative = cashflows.iter().any(|&c| c < -ZERO_FLOW);
    let has_positive = cashflows.iter().any(|&c| c > ZERO_FLOW);
    if !has_negative || !has_positive {
        return cagr_fallback(cashflows, periods_per_year, diagnostic);
    }

    for solver in solvers {
        let outcome = solver.solve(cashflows);
        if outcome.converged && outcome.rate.is_finite() {
            let annual = (1.0 + outcome.rate).powi(periods_per_year.max(1) as i32) - 1.0;
            return IrrResult {
                value: annual,
                periodic_rate: outcome.rate,
                method: solver.method(),
                diagnostic,
                converged: true,
            };
        }
    }

    warn!("IRR solvers failed ({}); using CAGR fallback", diagnostic);
    cagr_fallback(cashflows, periods_per_year, diagnostic)
}

/// Cash-flow vector for IRR from a ledger series
///
/// Periods after 0 are taken from the series. Period 0 is the ledger's own
/// period-0 flow when later periods already contain outflows; otherwise it is
/// `-contribution`, so the initial investment is never counted twice.
pub fn irr_vector(series: &[(u32, f64)], contribution: f64) -> Vec<f64> {
    let tail: Vec<f64> = series.iter().filter(|(p, _)| *p > 0).map(|(_, f)| *f).collect();
    let period_zero = series.iter().find(|(p, _)| *p == 0).map(|(_, f)| *f);

    let head = if tail.iter().any(|&f| f < -ZERO_FLOW) {
        period_zero.unwrap_or(-contribution)
    } else {
        -contribution
    };

    let mut flows = Vec::with_capacity(tail.len() + 1);
    flows.push(head);
    flows.extend(tail);
    flows
}

/// Paid-in capital for a series; gross flows carry no fees so use their own outflows
pub fn paid_in(ledger: &CashFlowLedger, key: FlowKey) -> f64 {
    paid_in_through(ledger, key, ledger.last_period())
}

/// Paid-in capital counting gross outflows only up to `through`
pub fn paid_in_through(ledger: &CashFlowLedger, key: FlowKey, through: u32) -> f64 {
    match key {
        FlowKey::Gross => ledger
            .rows
            .range(..=through)
            .map(|(_, row)| (-row.gross_net_cash_flow).max(0.0))
            .sum(),
        _ => ledger.contributions.for_key(key),
    }
}

/// IRR of one ledger series
pub fn calculate_irr(ledger: &CashFlowLedger, key: FlowKey) -> IrrResult {
    let flows = irr_vector(&ledger.series(key), paid_in(ledger, key));
    irr_from_flows(&flows, ledger.periods_per_year)
}
