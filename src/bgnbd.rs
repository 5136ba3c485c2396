//! BG/NBD purchase-frequency model
//!
//! Customers buy at Poisson rate lambda ~ Gamma(r, alpha) while alive and
//! drop out after any purchase with probability p ~ Beta(a, b). Fitting
//! minimizes the mean negative log-likelihood plus an L2 penalty on the
//! parameters, optimizing over log-parameters so they stay positive.

use crate::error::{ClvError, Result};
use crate::optimize::{NelderMead, LOG_PARAM_BOUND};
use crate::special::{ln_gamma, ln_hyp2f1};
use std::collections::HashMap;
use tracing::debug;

/// Recency and T are rescaled so the oldest customer has T = 10 during fitting
const TIME_SCALE_TARGET: f64 = 10.0;

/// Anything that predicts a customer's future purchase count
pub trait PurchasePredictor {
    /// Expected number of purchases in the next `t` days for a customer with
    /// the given history
    fn expected_purchases(&self, t: f64, frequency: u32, recency: f64, age: f64) -> f64;
}

/// Fitted BG/NBD parameters, with alpha in days
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct BetaGeoParams {
    pub r: f64,
    pub alpha: f64,
    pub a: f64,
    pub b: f64,
}

/// BG/NBD fitter configured with an L2 penalizer
#[derive(Debug, Clone, Copy)]
pub struct BetaGeoFitter {
    pub penalizer_coef: f64,
    pub optimizer: NelderMead,
}

/// A fitted BG/NBD model
#[derive(Debug, Clone)]
pub struct BetaGeoModel {
    pub params: BetaGeoParams,
    pub penalizer_coef: f64,
    /// Penalized mean negative log-likelihood at the optimum
    pub objective: f64,
    pub iterations: usize,
}

/// Identical (frequency, recency, T) rows collapsed into one weighted row
#[derive(Debug, Clone, Copy)]
struct Observation {
    frequency: f64,
    recency: f64,
    t: f64,
    weight: f64,
}

impl BetaGeoFitter {
    pub fn new(penalizer_coef: f64) -> Self {
        Self {
            penalizer_coef,
            optimizer: NelderMead::bounded(LOG_PARAM_BOUND),
        }
    }

    /// Fit on per-customer frequency, recency and age (T), all in days
    pub fn fit(&self, frequency: &[u32], recency: &[f64], t: &[f64]) -> Result<BetaGeoModel> {
        check_inputs(frequency, recency, t)?;

        let max_t = t.iter().copied().fold(0.0, f64::max);
        if max_t <= 0.0 {
            return Err(ClvError::Convergence(
                "every customer has age 0; nothing to fit".to_string(),
            ));
        }
        let scale = TIME_SCALE_TARGET / max_t;
        let observations = compress(frequency, recency, t, scale);
        let penalizer = self.penalizer_coef;

        let minimum = self
            .optimizer
            .minimize(
                |log_params| negative_log_likelihood(log_params, &observations, penalizer),
                &[0.0; 4],
            )
            .map_err(|e| {
                ClvError::Convergence(format!("BG/NBD fit with penalizer {penalizer}: {e}"))
            })?;

        let p: Vec<f64> = minimum.x.iter().map(|v| v.exp()).collect();
        let params = BetaGeoParams {
            r: p[0],
            alpha: p[1] / scale,
            a: p[2],
            b: p[3],
        };
        if ![params.r, params.alpha, params.a, params.b]
            .iter()
            .all(|v| v.is_finite() && *v > 0.0)
        {
            return Err(ClvError::Convergence(format!(
                "BG/NBD fit with penalizer {penalizer} produced invalid parameters {params:?}"
            )));
        }

        debug!(
            penalizer,
            r = params.r,
            alpha = params.alpha,
            a = params.a,
            b = params.b,
            iterations = minimum.iterations,
            "fitted BG/NBD model"
        );

        Ok(BetaGeoModel {
            params,
            penalizer_coef: penalizer,
            objective: minimum.value,
            iterations: minimum.iterations,
        })
    }
}

impl BetaGeoModel {
    /// Expected purchases in (T, T + t] given the customer's history
    pub fn conditional_expected_number_of_purchases_up_to_time(
        &self,
        t: f64,
        frequency: u32,
        recency: f64,
        age: f64,
    ) -> f64 {
        let BetaGeoParams { r, alpha, a, b } = self.params;
        let x = frequency as f64;

        let hyp_a = r + x;
        let hyp_b = b + x;
        let hyp_c = a + b + x - 1.0;
        let z = t / (alpha + age + t);
        let ln_hyp = ln_hyp2f1(hyp_a, hyp_b, hyp_c, z);

        let first_term = (a + b + x - 1.0) / (a - 1.0);
        let second_term = 1.0 - (ln_hyp + (r + x) * ((alpha + age) / (alpha + t + age)).ln()).exp();
        let numerator = first_term * second_term;

        let denominator = if frequency > 0 {
            1.0 + (a / (b + x - 1.0)) * ((alpha + age) / (alpha + recency)).powf(r + x)
        } else {
            1.0
        };

        let value = numerator / denominator;
        if value.is_finite() {
            value
        } else {
            f64::NAN
        }
    }

    /// Shorthand for the conditional expected purchase count
    pub fn predict(&self, t: f64, frequency: u32, recency: f64, age: f64) -> f64 {
        self.conditional_expected_number_of_purchases_up_to_time(t, frequency, recency, age)
    }

    /// Probability that the customer has not yet dropped out
    pub fn conditional_probability_alive(&self, frequency: u32, recency: f64, age: f64) -> f64 {
        if frequency == 0 {
            return 1.0;
        }
        let BetaGeoParams { r, alpha, a, b } = self.params;
        let x = frequency as f64;
        let odds = (a / (b + x - 1.0)) * ((alpha + age) / (alpha + recency)).powf(r + x);
        1.0 / (1.0 + odds)
    }
}

impl PurchasePredictor for BetaGeoModel {
    fn expected_purchases(&self, t: f64, frequency: u32, recency: f64, age: f64) -> f64 {
        self.predict(t, frequency, recency, age)
    }
}

fn check_inputs(frequency: &[u32], recency: &[f64], t: &[f64]) -> Result<()> {
    if frequency.len() != recency.len() || frequency.len() != t.len() {
        return Err(ClvError::Validation(
            "frequency, recency and T must have the same length".to_string(),
        ));
    }
    if frequency.is_empty() {
        return Err(ClvError::InsufficientData(
            "no customers to fit the frequency model on".to_string(),
        ));
    }
    for ((&f, &rec), &age) in frequency.iter().zip(recency).zip(t) {
        if !(rec.is_finite() && age.is_finite()) || rec < 0.0 || rec > age {
            return Err(ClvError::Validation(format!(
                "recency {rec} must lie within [0, T = {age}]"
            )));
        }
        if f == 0 && rec != 0.0 {
            return Err(ClvError::Validation(format!(
                "customer with no repeat purchases has non-zero recency {rec}"
            )));
        }
    }
    Ok(())
}

fn compress(frequency: &[u32], recency: &[f64], t: &[f64], scale: f64) -> Vec<Observation> {
    let mut counts: HashMap<(u32, u64, u64), f64> = HashMap::new();
    for ((&f, &rec), &age) in frequency.iter().zip(recency).zip(t) {
        *counts.entry((f, rec.to_bits(), age.to_bits())).or_insert(0.0) += 1.0;
    }

    let mut observations: Vec<Observation> = counts
        .into_iter()
        .map(|((f, rec, age), weight)| Observation {
            frequency: f as f64,
            recency: f64::from_bits(rec) * scale,
            t: f64::from_bits(age) * scale,
            weight,
        })
        .collect();
    // Summation order must not depend on hash iteration order
    observations.sort_by(|l, r| {
        l.frequency
            .total_cmp(&r.frequency)
            .then(l.recency.total_cmp(&r.recency))
            .then(l.t.total_cmp(&r.t))
    });
    observations
}

fn negative_log_likelihood(log_params: &[f64], observations: &[Observation], penalizer: f64) -> f64 {
    let r = log_params[0].exp();
    let alpha = log_params[1].exp();
    let a = log_params[2].exp();
    let b = log_params[3].exp();
    if ![r, alpha, a, b].iter().all(|v| v.is_finite() && *v > 0.0) {
        return f64::INFINITY;
    }

    let ln_gamma_r = ln_gamma(r);
    let ln_gamma_ab = ln_gamma(a + b);
    let ln_gamma_b = ln_gamma(b);
    let ln_alpha = alpha.ln();
    let ln_a = a.ln();

    let mut total = 0.0;
    let mut total_weight = 0.0;
    for obs in observations {
        let x = obs.frequency;
        let a1 = ln_gamma(r + x) - ln_gamma_r + r * ln_alpha;
        let a2 = ln_gamma_ab + ln_gamma(b + x) - ln_gamma_b - ln_gamma(a + b + x);
        let a3 = -(r + x) * (alpha + obs.t).ln();
        let a4 = ln_a - (b + x.max(1.0) - 1.0).ln() - (r + x) * (obs.recency + alpha).ln();

        let m = a3.max(a4);
        let repeat = if x > 0.0 { 1.0 } else { 0.0 };
        let ll = a1 + a2 + ((a3 - m).exp() + repeat * (a4 - m).exp()).ln() + m;

        total += obs.weight * ll;
        total_weight += obs.weight;
    }

    let penalty = penalizer * (r * r + alpha * alpha + a * a + b * b);
    -total / total_weight + penalty
}
