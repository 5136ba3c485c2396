//! Customer scoring: predicted purchases, expected spend and CLV

use crate::bgnbd::BetaGeoModel;
use crate::error::Result;
use crate::gamma_gamma::{GammaGammaFitter, GammaGammaModel};
use crate::rfm::CustomerSummary;
use tracing::{info, warn};

/// Lookahead, in days, for the predicted purchase count of each customer
pub const PREDICTION_LOOKAHEAD_DAYS: f64 = 180.0;

/// A customer with every model output attached
#[derive(Debug, Clone, PartialEq)]
pub struct ScoredCustomer {
    pub customer_id: String,
    pub frequency: u32,
    pub recency: f64,
    pub t: f64,
    pub monetary_value: f64,
    /// Expected purchases over the lookahead window
    pub predicted_purchases: f64,
    pub probability_alive: f64,
    /// Expected mean transaction value
    pub predicted_monetary: f64,
    pub clv: f64,
}

impl ScoredCustomer {
    /// Feature vector used for segmentation
    pub fn segment_features(&self) -> [f64; 5] {
        [
            self.frequency as f64,
            self.recency,
            self.t,
            self.monetary_value,
            self.predicted_purchases,
        ]
    }
}

/// Whether a customer has the repeat history the monetary model needs
pub fn qualifies_for_monetary_model(summary: &CustomerSummary) -> bool {
    summary.frequency > 0 && summary.monetary_value.is_finite() && summary.monetary_value > 0.0
}

/// Fit the Gamma-Gamma model on every qualifying customer
///
/// Fails with `ClvError::InsufficientData` when fewer than two qualify.
pub fn fit_monetary_model<'a, I>(summaries: I, penalizer_coef: f64) -> Result<GammaGammaModel>
where
    I: IntoIterator<Item = &'a CustomerSummary>,
{
    let (frequency, monetary): (Vec<u32>, Vec<f64>) = summaries
        .into_iter()
        .filter(|s| qualifies_for_monetary_model(s))
        .map(|s| (s.frequency, s.monetary_value))
        .unzip();

    info!(customers = frequency.len(), "fitting monetary model");
    GammaGammaFitter::new(penalizer_coef).fit(&frequency, &monetary)
}

/// Customers whose purchase prediction over the lookahead is defined
pub fn with_predicted_purchases<'a, I>(
    summaries: I,
    frequency_model: &BetaGeoModel,
) -> Vec<(&'a CustomerSummary, f64)>
where
    I: IntoIterator<Item = &'a CustomerSummary>,
{
    let mut dropped = 0usize;
    let predicted: Vec<(&CustomerSummary, f64)> = summaries
        .into_iter()
        .filter_map(|s| {
            let purchases = frequency_model.predict(PREDICTION_LOOKAHEAD_DAYS, s.frequency, s.recency, s.t);
            if purchases.is_finite() {
                Some((s, purchases))
            } else {
                dropped += 1;
                None
            }
        })
        .collect();

    if dropped > 0 {
        warn!(dropped, "customers without a defined purchase prediction");
    }
    predicted
}

/// Score customers over a horizon of `horizon_months`
///
/// Customers without a finite prediction, without repeat purchases or
/// with a non-positive average value are left out.
pub fn score(
    customers: &[CustomerSummary],
    frequency_model: &BetaGeoModel,
    monetary_model: &GammaGammaModel,
    horizon_months: u32,
    discount_rate: f64,
) -> Vec<ScoredCustomer> {
    let scored: Vec<ScoredCustomer> = with_predicted_purchases(customers, frequency_model)
        .into_iter()
        .filter(|(s, _)| qualifies_for_monetary_model(s))
        .filter_map(|(s, predicted_purchases)| {
            let clv = monetary_model.customer_lifetime_value(
                frequency_model,
                s.frequency,
                s.recency,
                s.t,
                s.monetary_value,
                horizon_months,
                discount_rate,
            );
            if !clv.is_finite() {
                warn!(customer = %s.customer_id, "dropping customer with undefined CLV");
                return None;
            }

            Some(ScoredCustomer {
                customer_id: s.customer_id.clone(),
                frequency: s.frequency,
                recency: s.recency,
                t: s.t,
                monetary_value: s.monetary_value,
                predicted_purchases,
                probability_alive: frequency_model.conditional_probability_alive(s.frequency, s.recency, s.t),
                predicted_monetary: monetary_model
                    .conditional_expected_average_profit(s.frequency, s.monetary_value),
                clv,
            })
        })
        .collect();

    info!(customers = scored.len(), horizon_months, "scored customers");
    scored
}
