//! Nelder-Mead simplex minimizer
//!
//! Both fitters minimize a smooth penalized negative log-likelihood over
//! log-parameters, which needs no gradients.

use crate::error::{ClvError, Result};
use tracing::{debug, warn};

/// Standard reflection, expansion, contraction and shrink coefficients
const RHO: f64 = 1.0;
const CHI: f64 = 2.0;
const PSI: f64 = 0.5;
const SIGMA: f64 = 0.5;

/// Relative step for non-zero starting coordinates
const NONZERO_DELTA: f64 = 0.05;
/// Absolute step for zero starting coordinates
const ZERO_DELTA: f64 = 0.000_25;

/// ln(1e4): log-parameters of the count and spend models stay in
/// [-LOG_PARAM_BOUND, LOG_PARAM_BOUND]
pub const LOG_PARAM_BOUND: f64 = 9.210_340_371_976_184;

/// Minimizer settings
#[derive(Debug, Clone, Copy)]
pub struct NelderMead {
    pub max_iterations: usize,
    /// Largest coordinate spread of the simplex at convergence
    pub xatol: f64,
    /// Largest objective spread of the simplex at convergence
    pub fatol: f64,
    /// Stop once the best value has not improved by more than
    /// `fatol * (1 + |best|)` for this many iterations
    pub stall_iterations: usize,
    /// Coordinates outside `[-bound, bound]` evaluate to +inf
    pub bound: Option<f64>,
}

impl Default for NelderMead {
    fn default() -> Self {
        Self {
            max_iterations: 20_000,
            xatol: 1e-6,
            fatol: 1e-9,
            stall_iterations: 2_000,
            bound: None,
        }
    }
}

/// Result of a successful minimization
#[derive(Debug, Clone)]
pub struct Minimum {
    pub x: Vec<f64>,
    pub value: f64,
    pub iterations: usize,
}

impl NelderMead {
    /// Default settings restricted to the box `[-bound, bound]` in every
    /// coordinate
    pub fn bounded(bound: f64) -> Self {
        Self {
            bound: Some(bound),
            ..Self::default()
        }
    }

    /// Minimize `objective` starting from `x0`
    ///
    /// NaN objective values are treated as +inf so the simplex walks away
    /// from them, and so are points outside `bound`. A run whose best value
    /// stops improving for `stall_iterations` iterations ends early with
    /// that value. Fails with `ClvError::Convergence` when the iteration
    /// budget runs out before the objective settles or the best value found
    /// is not finite.
    pub fn minimize<F>(&self, objective: F, x0: &[f64]) -> Result<Minimum>
    where
        F: Fn(&[f64]) -> f64,
    {
        let n = x0.len();
        if n == 0 {
            return Err(ClvError::Convergence(
                "cannot minimize over zero parameters".to_string(),
            ));
        }

        let bound = self.bound.unwrap_or(f64::INFINITY);
        let f = |x: &[f64]| {
            if x.iter().any(|xi| xi.abs() > bound) {
                return f64::INFINITY;
            }
            let v = objective(x);
            if v.is_nan() {
                f64::INFINITY
            } else {
                v
            }
        };

        let mut simplex: Vec<Vec<f64>> = Vec::with_capacity(n + 1);
        simplex.push(x0.to_vec());
        for k in 0..n {
            let mut vertex = x0.to_vec();
            vertex[k] = if vertex[k] != 0.0 {
                (1.0 + NONZERO_DELTA) * vertex[k]
            } else {
                ZERO_DELTA
            };
            simplex.push(vertex);
        }
        let mut values: Vec<f64> = simplex.iter().map(|v| f(v)).collect();
        sort_simplex(&mut simplex, &mut values);

        let mut iterations = 0;
        let mut reference = values[0];
        let mut last_progress = 0;
        loop {
            let (x_spread, f_spread) = spreads(&simplex, &values);
            if x_spread <= self.xatol && f_spread <= self.fatol {
                break;
            }

            if improved(values[0], reference, self.fatol) {
                reference = values[0];
                last_progress = iterations;
            } else if iterations - last_progress >= self.stall_iterations && values[0].is_finite() {
                debug!(x_spread, f_spread, iterations, "Nelder-Mead objective stalled");
                break;
            }

            if iterations >= self.max_iterations {
                // A simplex stretched along a flat valley has settled on a value
                // even though its vertices are still far apart
                if f_spread <= self.fatol && values[0].is_finite() {
                    warn!(x_spread, iterations, "accepting Nelder-Mead result on a flat objective");
                    break;
                }
                return Err(ClvError::Convergence(format!(
                    "Nelder-Mead did not converge within {} iterations (best objective {:.6})",
                    self.max_iterations, values[0]
                )));
            }
            iterations += 1;

            let centroid = centroid(&simplex[..n]);
            let worst = simplex[n].clone();

            let reflected = affine(&centroid, &worst, 1.0 + RHO, -RHO);
            let f_reflected = f(&reflected);

            if f_reflected < values[0] {
                let expanded = affine(&centroid, &worst, 1.0 + RHO * CHI, -RHO * CHI);
                let f_expanded = f(&expanded);
                if f_expanded < f_reflected {
                    simplex[n] = expanded;
                    values[n] = f_expanded;
                } else {
                    simplex[n] = reflected;
                    values[n] = f_reflected;
                }
            } else if f_reflected < values[n - 1] {
                simplex[n] = reflected;
                values[n] = f_reflected;
            } else {
                let contracted = if f_reflected < values[n] {
                    let outside = affine(&centroid, &worst, 1.0 + PSI * RHO, -PSI * RHO);
                    let f_outside = f(&outside);
                    (f_outside <= f_reflected).then_some((outside, f_outside))
                } else {
                    let inside = affine(&centroid, &worst, 1.0 - PSI, PSI);
                    let f_inside = f(&inside);
                    (f_inside < values[n]).then_some((inside, f_inside))
                };

                match contracted {
                    Some((point, value)) => {
                        simplex[n] = point;
                        values[n] = value;
                    }
                    None => {
                        let best = simplex[0].clone();
                        for j in 1..=n {
                            simplex[j] = affine(&best, &simplex[j], 1.0 - SIGMA, SIGMA);
                            values[j] = f(&simplex[j]);
                        }
                    }
                }
            }

            sort_simplex(&mut simplex, &mut values);
        }

        if !values[0].is_finite() {
            return Err(ClvError::Convergence(
                "objective is not finite at the optimum".to_string(),
            ));
        }

        Ok(Minimum {
            x: simplex.swap_remove(0),
            value: values[0],
            iterations,
        })
    }
}

/// Whether `value` beats `reference` by more than a relative tolerance
fn improved(value: f64, reference: f64, fatol: f64) -> bool {
    if !reference.is_finite() {
        return value.is_finite();
    }
    value < reference - fatol * (1.0 + reference.abs())
}

/// Largest coordinate and objective distance from the best vertex
fn spreads(simplex: &[Vec<f64>], values: &[f64]) -> (f64, f64) {
    let best = &simplex[0];
    let x_spread = simplex[1..]
        .iter()
        .flat_map(|v| v.iter().zip(best).map(|(a, b)| (a - b).abs()))
        .fold(0.0, f64::max);
    let f_spread = values[1..]
        .iter()
        .map(|v| (v - values[0]).abs())
        .fold(0.0, f64::max);
    (x_spread, f_spread)
}

/// `wa * a + wb * b`, elementwise
fn affine(a: &[f64], b: &[f64], wa: f64, wb: f64) -> Vec<f64> {
    a.iter().zip(b).map(|(x, y)| wa * x + wb * y).collect()
}

fn centroid(points: &[Vec<f64>]) -> Vec<f64> {
    let n = points.len() as f64;
    let mut c = vec![0.0; points[0].len()];
    for p in points {
        for (ci, pi) in c.iter_mut().zip(p) {
            *ci += pi / n;
        }
    }
    c
}

fn sort_simplex(simplex: &mut Vec<Vec<f64>>, values: &mut Vec<f64>) {
    let mut order: Vec<usize> = (0..values.len()).collect();
    order.sort_by(|&i, &j| values[i].total_cmp(&values[j]));
    *simplex = order.iter().map(|&i| simplex[i].clone()).collect();
    *values = order.iter().map(|&i| values[i]).collect();
}
