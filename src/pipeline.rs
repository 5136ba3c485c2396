//! End-to-end CLV estimation: clean, summarize, fit, score, segment, write

use crate::cluster::{fit_kmeans, KMeansSettings, SegmentFeatures};
use crate::data;
use crate::error::{ClvError, Result};
use crate::gamma_gamma::GammaGammaModel;
use crate::output;
use crate::rfm::{self, CustomerSummary, SplitWindow};
use crate::score::{self, ScoredCustomer};
use crate::segment::{self, ClusterAssignment, TierSummary};
use crate::selection::{self, CandidateScore, SelectedModel, DEFAULT_PENALIZER_COEFS};
use crate::viz;
use chrono::{Local, NaiveDateTime};
use polars::prelude::DataFrame;
use std::path::{Path, PathBuf};
use tracing::{debug, info};

pub const DEFAULT_CHART_NAME: &str = "clv_tiers.svg";

/// Rows used for the sampled silhouette diagnostic
const SILHOUETTE_SAMPLE: usize = 100;

/// Settings for one pipeline run
#[derive(Debug, Clone)]
pub struct PipelineConfig {
    /// Directory receiving the CLV file
    pub output_dir: PathBuf,
    /// Chart location; `output_dir/clv_tiers.svg` when unset
    pub chart_path: Option<PathBuf>,
    /// Monthly discount rate applied to future cash flows
    pub discount_rate: f64,
    pub monetary_penalizer: f64,
    pub penalizer_candidates: Vec<f64>,
    pub kmeans: KMeansSettings,
    /// Evaluate penalizer candidates on the rayon pool
    pub parallel_selection: bool,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            output_dir: PathBuf::from("output"),
            chart_path: None,
            discount_rate: 0.01,
            monetary_penalizer: 0.0,
            penalizer_candidates: DEFAULT_PENALIZER_COEFS.to_vec(),
            kmeans: KMeansSettings::default(),
            parallel_selection: true,
        }
    }
}

impl PipelineConfig {
    pub fn chart_path(&self) -> PathBuf {
        self.chart_path
            .clone()
            .unwrap_or_else(|| self.output_dir.join(DEFAULT_CHART_NAME))
    }

    fn validate(&self) -> Result<()> {
        if !self.discount_rate.is_finite() || self.discount_rate <= -1.0 {
            return Err(ClvError::Configuration(format!(
                "discount rate must be finite and above -1, got {}",
                self.discount_rate
            )));
        }
        if !self.monetary_penalizer.is_finite() || self.monetary_penalizer < 0.0 {
            return Err(ClvError::Configuration(format!(
                "monetary penalizer must be finite and non-negative, got {}",
                self.monetary_penalizer
            )));
        }
        if let Some(bad) = self
            .penalizer_candidates
            .iter()
            .find(|c| !c.is_finite() || **c < 0.0)
        {
            return Err(ClvError::Configuration(format!("invalid penalizer candidate {bad}")));
        }
        Ok(())
    }
}

/// Everything computed for one run, before any file is written
#[derive(Debug, Clone)]
pub struct Estimate {
    pub horizon_months: u32,
    pub window: SplitWindow,
    pub summaries: Vec<CustomerSummary>,
    pub frequency_model: SelectedModel,
    pub monetary_model: GammaGammaModel,
    pub customers: Vec<ScoredCustomer>,
    pub tiers: Vec<TierSummary>,
    pub assignments: Vec<ClusterAssignment>,
}

impl Estimate {
    /// (penalizer, holdout RMSE) for every candidate that fitted, in candidate order
    pub fn selection_trace(&self) -> Vec<(f64, f64)> {
        self.frequency_model
            .candidates
            .iter()
            .filter_map(|c| c.rmse.as_ref().ok().map(|rmse| (c.penalizer_coef, *rmse)))
            .collect()
    }
}

/// What a completed run produced
#[derive(Debug, Clone)]
pub struct PipelineReport {
    pub output_file_name: String,
    pub output_path: PathBuf,
    pub chart_path: PathBuf,
    pub customers: Vec<ScoredCustomer>,
    pub tiers: Vec<TierSummary>,
    pub assignments: Vec<ClusterAssignment>,
    pub penalizer_coef: f64,
    pub rmse: f64,
    pub candidates: Vec<CandidateScore>,
}

/// Check a requested horizon and narrow it to whole months
pub fn validate_horizon(horizon_months: i64) -> Result<u32> {
    u32::try_from(horizon_months)
        .ok()
        .filter(|h| *h > 0)
        .ok_or_else(|| {
            ClvError::Configuration(format!(
                "horizon must be a positive number of months, got {horizon_months}"
            ))
        })
}

/// Run every computation stage on a raw transaction frame without touching
/// the filesystem
pub fn estimate(
    transactions: &DataFrame,
    horizon_months: i64,
    config: &PipelineConfig,
) -> Result<Estimate> {
    let horizon_months = validate_horizon(horizon_months)?;
    config.validate()?;

    let rows = data::clean(transactions)?;
    if rows.height() == 0 {
        return Err(ClvError::Validation(
            "no transactions left after cleaning".to_string(),
        ));
    }

    let window = SplitWindow::from_transactions(&rows)?;
    debug!(
        calibration_end = %window.calibration_end,
        holdout_end = %window.holdout_end,
        "split transactions"
    );

    let summaries: Vec<CustomerSummary> = rfm::summarize(&rows)?.into_values().collect();
    let calibration = rfm::calibration_and_holdout(&rows, &window)?;

    let frequency_model = selection::select_and_fit_frequency_model(
        &calibration,
        &config.penalizer_candidates,
        config.parallel_selection,
    )?;
    let monetary_model = score::fit_monetary_model(&summaries, config.monetary_penalizer)?;

    let customers = score::score(
        &summaries,
        &frequency_model.model,
        &monetary_model,
        horizon_months,
        config.discount_rate,
    );

    let features = SegmentFeatures::from_scored(&customers)?;
    let clusters = fit_kmeans(&features, &config.kmeans)?;
    info!(
        inertia = clusters.inertia,
        sizes = ?clusters.cluster_sizes(),
        silhouette = clusters.compute_silhouette_sample(&features.features, SILHOUETTE_SAMPLE),
        "segmented customers"
    );

    let (tiers, assignments) = segment::segment(&customers, &clusters);
    for tier in &tiers {
        debug!(
            tier = %tier.tier,
            cluster = tier.cluster_id,
            mean_clv = tier.mean_clv,
            count = tier.count,
            "tier"
        );
    }

    Ok(Estimate {
        horizon_months,
        window,
        summaries,
        frequency_model,
        monetary_model,
        customers,
        tiers,
        assignments,
    })
}

/// Write the CLV file and then the chart for a finished estimate
pub fn write_artifacts(
    estimate: Estimate,
    config: &PipelineConfig,
    generated_at: NaiveDateTime,
) -> Result<PipelineReport> {
    let output_file_name = output::output_file_name(estimate.horizon_months, generated_at);
    let output_path =
        output::write_clv_csv(&config.output_dir, &output_file_name, &estimate.customers)?;

    let chart_path = config.chart_path();
    viz::render_tier_chart(&chart_path, &estimate.tiers)?;

    Ok(PipelineReport {
        output_file_name,
        output_path,
        chart_path,
        penalizer_coef: estimate.frequency_model.penalizer_coef,
        rmse: estimate.frequency_model.rmse,
        candidates: estimate.frequency_model.candidates,
        customers: estimate.customers,
        tiers: estimate.tiers,
        assignments: estimate.assignments,
    })
}

/// Load a transaction file, estimate CLV over `horizon_months` and write
/// the results
pub fn run_pipeline(
    input_path: &Path,
    horizon_months: i64,
    config: &PipelineConfig,
) -> Result<PipelineReport> {
    let transactions = data::load_transactions(input_path)?;
    let estimate = estimate(&transactions, horizon_months, config)?;
    write_artifacts(estimate, config, Local::now().naive_local())
}
