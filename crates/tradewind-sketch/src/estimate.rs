//! Cardinality estimation and capacity tiers.
//!
//! A sketch's size is fixed once its parameters are chosen, so before
//! building one for real the set's cardinality is estimated from an
//! unfiltered probe sketch: the empty-cell and readable-cell counts of
//! table 0 pin down the cell occupancy density, and a maximum-likelihood
//! fit recovers the underlying key count.

use crate::delta::KeySetDelta;
use crate::error::{Result, SketchError};

/// A named sketch sizing: a table-size exponent profile (summing to 64)
/// and the largest set the profile reliably decodes without range
/// filtering.
#[derive(Debug, Clone, Copy)]
pub struct CapacityTier {
    /// Tier name, for logs.
    pub name: &'static str,
    /// Table-size exponents, lowest resolution first.
    pub exponents: &'static [u8],
    /// Maximum unfiltered capacity in keys.
    pub max_unfiltered: u64,
}

/// The five capacity tiers, ascending byte budgets.
///
/// Cell counts run from ~1.1k to ~15k cells (16 bytes per cell on the
/// wire); capacities are sized at roughly a third of the cell count so
/// peeling converges with margin.
pub const CAPACITY_TIERS: [CapacityTier; 5] = [
    CapacityTier {
        name: "s",
        exponents: &[9, 8, 7, 6, 5, 5, 4, 4, 4, 4, 4, 4],
        max_unfiltered: 400,
    },
    CapacityTier {
        name: "m",
        exponents: &[10, 9, 8, 7, 6, 5, 5, 4, 4, 3, 3],
        max_unfiltered: 800,
    },
    CapacityTier {
        name: "l",
        exponents: &[11, 10, 9, 8, 7, 5, 4, 4, 3, 3],
        max_unfiltered: 1600,
    },
    CapacityTier {
        name: "xl",
        exponents: &[12, 11, 10, 9, 7, 5, 4, 3, 3],
        max_unfiltered: 3200,
    },
    CapacityTier {
        name: "xxl",
        exponents: &[13, 12, 11, 9, 7, 5, 4, 3],
        max_unfiltered: 6400,
    },
];

/// Newton step size for the numeric derivative.
const DERIVATIVE_STEP: f64 = 1.0 / 4_294_967_296.0; // 2^-32
/// Convergence threshold on successive log-density iterates.
const CONVERGENCE: f64 = 1.0 / 1_099_511_627_776.0 / 1024.0; // 2^-40
/// Iteration cap; the fit falls back if it is ever reached.
const MAX_ITERATIONS: usize = 200;
/// Density assumed when the observation is degenerate (a deeply saturated
/// probe): deliberately high so tier selection over-provisions.
const CONSERVATIVE_DENSITY: f64 = 8.0;

/// Maximum-likelihood estimate of the mean keys-per-cell density from
/// table-0 observations of an unfiltered sketch.
///
/// `num_cells` is the table size, `num_empty` the cells with no surviving
/// key, `num_readable` the cells passing the pure test. Models cell
/// occupancy as Poisson: P(empty) = e^-d, P(pure) = d·e^-d. Returns 0 for
/// an entirely empty table and a conservative default when the data is
/// degenerate or the fit diverges.
pub fn maximum_likelihood_density_estimate(
    num_cells: usize,
    num_empty: usize,
    num_readable: usize,
) -> f64 {
    if num_cells == 0 || num_empty >= num_cells {
        return 0.0;
    }
    if num_empty == 0 || num_readable == 0 {
        return CONSERVATIVE_DENSITY;
    }

    let n = num_empty as f64;
    let m = num_readable as f64;
    let rest = (num_cells - num_empty - num_readable) as f64;

    // With no multi-key cells the score has a closed-form root.
    if rest <= 0.0 {
        return m / (n + m);
    }

    // Newton root search over log-density x, numeric derivative with a
    // fixed step; converges when successive iterates agree within 2^-40.
    let initial = (num_cells as f64 / n).ln().max(1e-9);
    let mut x = initial.ln();
    for _ in 0..MAX_ITERATIONS {
        let h0 = score(n, m, rest, x.exp());
        let h1 = score(n, m, rest, (x + DERIVATIVE_STEP).exp());
        let slope = (h1 - h0) / DERIVATIVE_STEP;
        if !slope.is_finite() || slope == 0.0 {
            return CONSERVATIVE_DENSITY;
        }
        let next = (x - h0 / slope).clamp(-60.0, 6.0);
        if !next.is_finite() {
            return CONSERVATIVE_DENSITY;
        }
        if (next - x).abs() < CONVERGENCE {
            return next.exp();
        }
        x = next;
    }
    CONSERVATIVE_DENSITY
}

/// Derivative of the log-likelihood with respect to density `d`.
fn score(n: f64, m: f64, rest: f64, d: f64) -> f64 {
    let d = d.max(1e-12);
    let e = (-d).exp();
    let p_other = (1.0 - e - d * e).max(f64::MIN_POSITIVE);
    -n + m * (1.0 / d - 1.0) + rest * (d * e) / p_other
}

/// Estimate the cardinality of the key set behind an *unfiltered* probe
/// sketch from its table-0 occupancy.
///
/// Used to decide whether default parameters will work or how much range
/// filtering [`KeySetDelta::for_capacity`] must apply.
pub fn estimate_unfiltered_delta_size(sketch: &KeySetDelta) -> Result<u64> {
    if !sketch.is_unfiltered() {
        return Err(SketchError::ParameterMismatch(
            "cardinality estimation needs an unfiltered sketch",
        ));
    }
    let table = &sketch.tables()[0];
    let num_cells = table.len();
    let num_empty = table.iter().filter(|c| c.is_empty()).count();
    let num_readable = table
        .iter()
        .enumerate()
        .filter(|(idx, cell)| sketch.pure_key(0, *idx, cell).is_some())
        .count();

    let density = maximum_likelihood_density_estimate(num_cells, num_empty, num_readable);
    Ok((density * num_cells as f64).ceil() as u64)
}
