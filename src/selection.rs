//! Penalizer selection for the frequency model by holdout RMSE

use crate::bgnbd::{BetaGeoFitter, BetaGeoModel};
use crate::error::{ClvError, Result};
use crate::rfm::CalibrationHoldoutSummary;
use rayon::prelude::*;
use tracing::{debug, info, warn};

/// L2 penalizer candidates, evaluated in this order
pub const DEFAULT_PENALIZER_COEFS: [f64; 12] =
    [0.3, 0.4, 0.5, 0.6, 0.7, 0.8, 0.9, 1.0, 1.1, 1.2, 1.4, 1.6];

/// Outcome of evaluating one penalizer on the holdout window
#[derive(Debug, Clone)]
pub struct CandidateScore {
    pub penalizer_coef: f64,
    /// Holdout RMSE, or the reason the candidate was skipped
    pub rmse: std::result::Result<f64, String>,
}

/// The chosen frequency model and the trace that led to it
#[derive(Debug, Clone)]
pub struct SelectedModel {
    /// Refit on the calibration window with the winning penalizer
    pub model: BetaGeoModel,
    pub penalizer_coef: f64,
    pub rmse: f64,
    /// Every candidate in evaluation order
    pub candidates: Vec<CandidateScore>,
}

/// Fit one model per penalizer on the calibration window, score each on the
/// holdout window and refit the best
///
/// Candidates that fail to fit are skipped. Ties go to the earliest
/// candidate in `candidates`.
pub fn select_and_fit_frequency_model(
    calibration: &[CalibrationHoldoutSummary],
    candidates: &[f64],
    parallel: bool,
) -> Result<SelectedModel> {
    if candidates.is_empty() {
        return Err(ClvError::Configuration(
            "no penalizer candidates given".to_string(),
        ));
    }

    let frequency: Vec<u32> = calibration.iter().map(|c| c.frequency_cal).collect();
    let recency: Vec<f64> = calibration.iter().map(|c| c.recency_cal).collect();
    let t: Vec<f64> = calibration.iter().map(|c| c.t_cal).collect();

    let evaluate = |&coef: &f64| CandidateScore {
        penalizer_coef: coef,
        rmse: BetaGeoFitter::new(coef)
            .fit(&frequency, &recency, &t)
            .and_then(|model| holdout_rmse(&model, calibration))
            .map_err(|e| e.to_string()),
    };

    // Both branches keep candidate order, so selection does not depend on it
    let scores: Vec<CandidateScore> = if parallel {
        candidates.par_iter().map(evaluate).collect()
    } else {
        candidates.iter().map(evaluate).collect()
    };

    for score in &scores {
        match &score.rmse {
            Ok(rmse) => debug!(penalizer = score.penalizer_coef, rmse, "scored penalizer"),
            Err(reason) => warn!(penalizer = score.penalizer_coef, %reason, "skipping penalizer"),
        }
    }

    let (penalizer_coef, rmse) = best_candidate(&scores).ok_or_else(|| {
        ClvError::Convergence(format!(
            "the frequency model failed to fit for all {} penalizer candidates",
            scores.len()
        ))
    })?;

    let model = BetaGeoFitter::new(penalizer_coef).fit(&frequency, &recency, &t)?;
    info!(penalizer = penalizer_coef, rmse, "selected frequency model");

    Ok(SelectedModel {
        model,
        penalizer_coef,
        rmse,
        candidates: scores,
    })
}

/// First candidate with the lowest finite RMSE
pub fn best_candidate(scores: &[CandidateScore]) -> Option<(f64, f64)> {
    scores
        .iter()
        .filter_map(|s| match s.rmse {
            Ok(rmse) if rmse.is_finite() => Some((s.penalizer_coef, rmse)),
            _ => None,
        })
        .fold(None, |best, (coef, rmse)| match best {
            Some((_, best_rmse)) if best_rmse <= rmse => best,
            _ => Some((coef, rmse)),
        })
}

/// RMSE between predicted and actual holdout purchases, over customers
/// whose prediction is defined
pub fn holdout_rmse(model: &BetaGeoModel, calibration: &[CalibrationHoldoutSummary]) -> Result<f64> {
    let squared_errors: Vec<f64> = calibration
        .iter()
        .filter_map(|c| {
            let predicted = model.predict(c.duration_holdout, c.frequency_cal, c.recency_cal, c.t_cal);
            predicted
                .is_finite()
                .then(|| (c.frequency_holdout as f64 - predicted).powi(2))
        })
        .collect();

    if squared_errors.is_empty() {
        return Err(ClvError::Convergence(format!(
            "penalizer {} predicts no finite holdout purchases",
            model.penalizer_coef
        )));
    }
    Ok((squared_errors.iter().sum::<f64>() / squared_errors.len() as f64).sqrt())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn score(coef: f64, rmse: std::result::Result<f64, &str>) -> CandidateScore {
        CandidateScore {
            penalizer_coef: coef,
            rmse: rmse.map_err(str::to_string),
        }
    }

    fn calibration() -> Vec<CalibrationHoldoutSummary> {
        (0..80u32)
            .map(|i| {
                let t_cal = 60.0 + (i * 13 % 140) as f64;
                let frequency_cal = i % 5;
                let recency_cal = if frequency_cal == 0 {
                    0.0
                } else {
                    t_cal * (0.25 + 0.15 * (i % 4) as f64)
                };
                CalibrationHoldoutSummary {
                    customer_id: format!("C{i}"),
                    frequency_cal,
                    recency_cal,
                    t_cal,
                    frequency_holdout: (frequency_cal + i % 3) / 2,
                    duration_holdout: 150.0,
                }
            })
            .collect()
    }

    #[test]
    fn test_best_candidate_takes_first_minimum() {
        let scores = vec![
            score(0.3, Ok(1.5)),
            score(0.4, Ok(1.2)),
            score(0.5, Ok(1.2)),
            score(0.6, Ok(1.9)),
        ];
        assert_eq!(best_candidate(&scores), Some((0.4, 1.2)));
    }

    #[test]
    fn test_best_candidate_skips_failures() {
        let scores = vec![
            score(0.3, Err("did not converge")),
            score(0.4, Ok(f64::NAN)),
            score(0.5, Ok(2.0)),
        ];
        assert_eq!(best_candidate(&scores), Some((0.5, 2.0)));

        let all_failed = vec![score(0.3, Err("x")), score(0.4, Err("y"))];
        assert_eq!(best_candidate(&all_failed), None);
    }

    #[test]
    fn test_selection_is_deterministic() {
        let data = calibration();
        let first = select_and_fit_frequency_model(&data, &DEFAULT_PENALIZER_COEFS, true).unwrap();
        let second = select_and_fit_frequency_model(&data, &DEFAULT_PENALIZER_COEFS, false).unwrap();

        assert_eq!(first.penalizer_coef, second.penalizer_coef);
        assert!((first.rmse - second.rmse).abs() < 1e-12);
        assert_eq!(first.candidates.len(), DEFAULT_PENALIZER_COEFS.len());
        assert!(DEFAULT_PENALIZER_COEFS.contains(&first.penalizer_coef));
    }

    #[test]
    fn test_selected_rmse_is_minimal() {
        let selected =
            select_and_fit_frequency_model(&calibration(), &DEFAULT_PENALIZER_COEFS, false).unwrap();
        for candidate in &selected.candidates {
            if let Ok(rmse) = candidate.rmse {
                assert!(selected.rmse <= rmse);
            }
        }
    }

    #[test]
    fn test_no_candidates() {
        let result = select_and_fit_frequency_model(&calibration(), &[], false);
        assert!(matches!(result, Err(ClvError::Configuration(_))));
    }
}
