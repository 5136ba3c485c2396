//! Gamma-Gamma model of average transaction value
//!
//! Spend per transaction is Gamma(p, nu) with nu ~ Gamma(q, v) across
//! customers, independent of purchase frequency.

use crate::bgnbd::PurchasePredictor;
use crate::error::{ClvError, Result};
use crate::optimize::{NelderMead, LOG_PARAM_BOUND};
use crate::special::ln_gamma;
use tracing::debug;

/// Days in one CLV step; the horizon is counted in months
pub const DAYS_PER_MONTH: f64 = 30.0;

/// Fitted Gamma-Gamma parameters
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct GammaGammaParams {
    pub p: f64,
    pub q: f64,
    pub v: f64,
}

/// Gamma-Gamma fitter configured with an L2 penalizer
#[derive(Debug, Clone, Copy)]
pub struct GammaGammaFitter {
    pub penalizer_coef: f64,
    pub optimizer: NelderMead,
}

/// A fitted Gamma-Gamma model
#[derive(Debug, Clone)]
pub struct GammaGammaModel {
    pub params: GammaGammaParams,
    pub objective: f64,
    pub iterations: usize,
}

impl Default for GammaGammaFitter {
    fn default() -> Self {
        Self::new(0.0)
    }
}

impl GammaGammaFitter {
    pub fn new(penalizer_coef: f64) -> Self {
        Self {
            penalizer_coef,
            optimizer: NelderMead::bounded(LOG_PARAM_BOUND),
        }
    }

    /// Fit on repeat-purchase counts and mean repeat-purchase values
    ///
    /// Every customer must have `frequency > 0` and `monetary_value > 0`.
    ///
    /// Values are divided by their mean while fitting, so the bounded
    /// search covers the same region whatever the currency. Data without
    /// spread inside customers pushes `p` toward infinity; the search then
    /// ends on the bound, where each customer's own average gets nearly all
    /// the weight.
    pub fn fit(&self, frequency: &[u32], monetary_value: &[f64]) -> Result<GammaGammaModel> {
        if frequency.len() != monetary_value.len() {
            return Err(ClvError::Validation(
                "frequency and monetary value must have the same length".to_string(),
            ));
        }
        if frequency.len() < 2 {
            return Err(ClvError::InsufficientData(format!(
                "{} customers qualify for the monetary model, at least 2 are required",
                frequency.len()
            )));
        }
        if let Some((f, m)) = frequency
            .iter()
            .zip(monetary_value)
            .find(|(f, m)| **f == 0 || !(m.is_finite() && **m > 0.0))
        {
            return Err(ClvError::Validation(format!(
                "monetary model needs frequency > 0 and value > 0, got ({f}, {m})"
            )));
        }

        let x: Vec<f64> = frequency.iter().map(|&f| f as f64).collect();
        let scale = monetary_value.iter().sum::<f64>() / monetary_value.len() as f64;
        let m: Vec<f64> = monetary_value.iter().map(|v| v / scale).collect();
        let penalizer = self.penalizer_coef;
        let minimum = self
            .optimizer
            .minimize(
                |log_params| negative_log_likelihood(log_params, &x, &m, penalizer),
                &[0.0; 3],
            )
            .map_err(|e| ClvError::Convergence(format!("Gamma-Gamma fit: {e}")))?;

        // v carries the unit of the values
        let params = GammaGammaParams {
            p: minimum.x[0].exp(),
            q: minimum.x[1].exp(),
            v: minimum.x[2].exp() * scale,
        };
        if params.q <= 1.0 || !params.p.is_finite() || !params.v.is_finite() {
            return Err(ClvError::Convergence(format!(
                "Gamma-Gamma fit produced parameters without a finite population mean: {params:?}"
            )));
        }

        debug!(
            p = params.p,
            q = params.q,
            v = params.v,
            iterations = minimum.iterations,
            "fitted Gamma-Gamma model"
        );

        Ok(GammaGammaModel {
            params,
            objective: minimum.value,
            iterations: minimum.iterations,
        })
    }
}

impl GammaGammaModel {
    /// Expected mean transaction value of a customer, shrunk toward the
    /// population mean by how little history the customer has
    pub fn conditional_expected_average_profit(&self, frequency: u32, monetary_value: f64) -> f64 {
        let GammaGammaParams { p, q, v } = self.params;
        let x = frequency as f64;
        let individual_weight = p * x / (p * x + q - 1.0);
        let population_mean = v * p / (q - 1.0);
        (1.0 - individual_weight) * population_mean + individual_weight * monetary_value
    }

    /// Population mean transaction value
    pub fn population_mean(&self) -> f64 {
        let GammaGammaParams { p, q, v } = self.params;
        v * p / (q - 1.0)
    }

    /// Discounted value of the customer's purchases over `months` months
    ///
    /// Each month contributes the expected purchases in that month times the
    /// expected transaction value, discounted at `discount_rate` per month.
    #[allow(clippy::too_many_arguments)]
    pub fn customer_lifetime_value<P: PurchasePredictor>(
        &self,
        frequency_model: &P,
        frequency: u32,
        recency: f64,
        age: f64,
        monetary_value: f64,
        months: u32,
        discount_rate: f64,
    ) -> f64 {
        let adjusted_value = self.conditional_expected_average_profit(frequency, monetary_value);

        let mut previous = 0.0;
        let mut clv = 0.0;
        for month in 1..=months {
            let t = month as f64 * DAYS_PER_MONTH;
            let cumulative = frequency_model.expected_purchases(t, frequency, recency, age);
            clv += adjusted_value * (cumulative - previous) / (1.0 + discount_rate).powi(month as i32);
            previous = cumulative;
        }
        clv
    }
}

fn negative_log_likelihood(log_params: &[f64], x: &[f64], m: &[f64], penalizer: f64) -> f64 {
    let p = log_params[0].exp();
    let q = log_params[1].exp();
    let v = log_params[2].exp();
    if ![p, q, v].iter().all(|val| val.is_finite() && *val > 0.0) {
        return f64::INFINITY;
    }

    let ln_gamma_q = ln_gamma(q);
    let ln_v = v.ln();

    let total: f64 = x
        .iter()
        .zip(m)
        .map(|(&x, &m)| {
            let px = p * x;
            ln_gamma(px + q) - ln_gamma(px) - ln_gamma_q + q * ln_v + (px - 1.0) * m.ln()
                + px * x.ln()
                - (px + q) * (x * m + v).ln()
        })
        .sum();

    let penalty = penalizer * (p * p + q * q + v * v);
    -total / x.len() as f64 + penalty
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::rngs::StdRng;
    use rand::SeedableRng;
    use rand_distr::{Distribution, Gamma};

    /// Predicts a fixed purchase rate per day regardless of history
    struct ConstantRate(f64);

    impl PurchasePredictor for ConstantRate {
        fn expected_purchases(&self, t: f64, _frequency: u32, _recency: f64, _age: f64) -> f64 {
            self.0 * t
        }
    }

    /// Draws customers from a Gamma-Gamma population with p = 6, q = 4,
    /// v = 15, whose mean transaction value is 30
    fn sample() -> (Vec<u32>, Vec<f64>) {
        let mut rng = StdRng::seed_from_u64(7);
        let heterogeneity = Gamma::new(4.0, 1.0 / 15.0).unwrap();

        let mut frequency = Vec::new();
        let mut monetary = Vec::new();
        for i in 0..400u32 {
            let x = 1 + i % 8;
            let nu: f64 = heterogeneity.sample(&mut rng);
            let spend = Gamma::new(6.0, 1.0 / nu).unwrap();
            let total: f64 = (0..x).map(|_| spend.sample(&mut rng)).sum();
            frequency.push(x);
            monetary.push(total / x as f64);
        }
        (frequency, monetary)
    }

    fn model(p: f64, q: f64, v: f64) -> GammaGammaModel {
        GammaGammaModel {
            params: GammaGammaParams { p, q, v },
            objective: 0.0,
            iterations: 0,
        }
    }

    #[test]
    fn test_fit() {
        let (f, m) = sample();
        let fitted = GammaGammaFitter::default().fit(&f, &m).unwrap();
        assert!(fitted.params.q > 1.0);

        // The population mean should sit in the range of observed values
        let mean = fitted.population_mean();
        assert!(mean > 20.0 && mean < 45.0, "population mean {mean}");
    }

    #[test]
    fn test_fit_without_spread_inside_customers() {
        // Every purchase of a customer has the same value, so all variation
        // is between customers and the likelihood keeps rising with p
        let mut rng = StdRng::seed_from_u64(11);
        let heterogeneity = Gamma::new(4.0, 1.0 / 60.0).unwrap();
        let frequency: Vec<u32> = (0..200u32).map(|i| 1 + i % 9).collect();
        let monetary: Vec<f64> = frequency
            .iter()
            .map(|_| 1.0 / heterogeneity.sample(&mut rng))
            .collect();

        let fitted = GammaGammaFitter::default().fit(&frequency, &monetary).unwrap();
        let GammaGammaParams { p, q, v } = fitted.params;
        assert!(p.is_finite() && q > 1.0 && v.is_finite());

        let sample_mean = monetary.iter().sum::<f64>() / monetary.len() as f64;
        let mean = fitted.population_mean();
        assert!((mean - sample_mean).abs() < 0.3 * sample_mean, "population mean {mean}");
    }

    #[test]
    fn test_fit_is_unit_free() {
        let (f, m) = sample();
        let cents: Vec<f64> = m.iter().map(|v| v * 100.0).collect();

        let dollars = GammaGammaFitter::default().fit(&f, &m).unwrap();
        let scaled = GammaGammaFitter::default().fit(&f, &cents).unwrap();
        assert!((scaled.population_mean() / dollars.population_mean() - 100.0).abs() < 0.5);
    }

    #[test]
    fn test_expected_average_profit_shrinkage() {
        let gg = model(6.0, 4.0, 15.0);
        let population = gg.population_mean();
        assert!((population - 30.0).abs() < 1e-12);

        // More history pulls the estimate toward the customer's own average
        let light = gg.conditional_expected_average_profit(1, 100.0);
        let heavy = gg.conditional_expected_average_profit(20, 100.0);
        assert!(light > population && light < 100.0);
        assert!(heavy > light && heavy < 100.0);
    }

    #[test]
    fn test_customer_lifetime_value_discounting() {
        let gg = model(6.0, 4.0, 15.0);
        let rate = ConstantRate(1.0 / 30.0); // one purchase per month
        let value = gg.conditional_expected_average_profit(2, 30.0);

        let clv = gg.customer_lifetime_value(&rate, 2, 50.0, 100.0, 30.0, 3, 0.01);
        let expected: f64 = (1..=3).map(|i| value / 1.01_f64.powi(i)).sum();
        assert!((clv - expected).abs() < 1e-9);

        assert_eq!(gg.customer_lifetime_value(&rate, 2, 50.0, 100.0, 30.0, 0, 0.01), 0.0);
    }

    #[test]
    fn test_insufficient_customers() {
        let result = GammaGammaFitter::default().fit(&[3], &[20.0]);
        assert!(matches!(result, Err(ClvError::InsufficientData(_))));
    }

    #[test]
    fn test_rejects_non_positive_values() {
        let result = GammaGammaFitter::default().fit(&[3, 2], &[20.0, -1.0]);
        assert!(matches!(result, Err(ClvError::Validation(_))));
    }
}
