//! Special functions used by the probabilistic models

pub use statrs::function::gamma::ln_gamma;

const HYP2F1_MAX_TERMS: usize = 100_000;
const HYP2F1_REL_TOL: f64 = 1e-15;

/// Gauss hypergeometric function 2F1(a, b; c; z) for 0 <= z < 1
///
/// Sums the power series directly. Returns NaN when the series does not
/// settle within the term budget or `c` is a non-positive integer, and
/// infinity when the partial sums overflow.
pub fn hyp2f1(a: f64, b: f64, c: f64, z: f64) -> f64 {
    if !(0.0..1.0).contains(&z) || !a.is_finite() || !b.is_finite() || !c.is_finite() {
        return f64::NAN;
    }
    if c <= 0.0 && c.fract() == 0.0 {
        return f64::NAN;
    }
    if z == 0.0 {
        return 1.0;
    }

    let mut term = 1.0_f64;
    let mut sum = 1.0_f64;
    for k in 0..HYP2F1_MAX_TERMS {
        let k = k as f64;
        term *= (a + k) * (b + k) / ((c + k) * (k + 1.0)) * z;
        sum += term;

        if !sum.is_finite() {
            return sum;
        }
        // Terms shrink geometrically once k exceeds |a|, |b| and |c|
        if term.abs() <= HYP2F1_REL_TOL * sum.abs() && k > a.abs().max(b.abs()) {
            return sum;
        }
    }
    f64::NAN
}

/// Natural log of 2F1(a, b; c; z)
///
/// Falls back to Euler's transformation
/// 2F1(a, b; c; z) = (1 - z)^(c - a - b) 2F1(c - a, c - b; c; z)
/// when the direct series overflows.
pub fn ln_hyp2f1(a: f64, b: f64, c: f64, z: f64) -> f64 {
    let direct = hyp2f1(a, b, c, z).ln();
    if direct.is_finite() {
        return direct;
    }
    hyp2f1(c - a, c - b, c, z).ln() + (c - a - b) * (1.0 - z).ln()
}
