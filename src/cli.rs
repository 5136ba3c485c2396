//! Command-line interface definitions and argument parsing

use crate::cluster::KMeansSettings;
use crate::pipeline::PipelineConfig;
use crate::selection::DEFAULT_PENALIZER_COEFS;
use clap::Parser;
use std::path::PathBuf;

/// Customer lifetime value estimation from a retail transaction log
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
pub struct Args {
    /// Path to the transaction CSV file
    #[arg(short, long, env = "CLVFORGE_INPUT")]
    pub input: PathBuf,

    /// Forecast horizon in months
    #[arg(short, long, default_value = "12", allow_negative_numbers = true)]
    pub months: i64,

    /// Directory for the CLV result file
    #[arg(short, long, env = "CLVFORGE_OUTPUT_DIR", default_value = "output")]
    pub output_dir: PathBuf,

    /// Path for the tier chart (SVG); defaults to <output-dir>/clv_tiers.svg
    #[arg(short, long)]
    pub chart: Option<PathBuf>,

    /// Monthly discount rate for future purchases
    #[arg(long, default_value = "0.01")]
    pub discount_rate: f64,

    /// Seed for K-Means initialization
    #[arg(long, default_value = "42")]
    pub seed: u64,

    /// Maximum iterations for K-Means algorithm
    #[arg(long, default_value = "300")]
    pub max_iters: u64,

    /// Tolerance for K-Means convergence
    #[arg(long, default_value = "1e-4")]
    pub tolerance: f64,

    /// Comma-separated L2 penalizers to try for the frequency model
    #[arg(long, value_delimiter = ',')]
    pub penalizers: Option<Vec<f64>>,

    /// Evaluate penalizers one after another instead of in parallel
    #[arg(long)]
    pub sequential: bool,

    /// Log filter, e.g. "info" or "clvforge=debug"
    #[arg(long, env = "CLVFORGE_LOG", default_value = "info")]
    pub log_level: String,

    /// Enable verbose output
    #[arg(short, long)]
    pub verbose: bool,
}

impl Args {
    /// Log filter after applying `--verbose`
    pub fn log_filter(&self) -> &str {
        if self.verbose {
            "debug"
        } else {
            &self.log_level
        }
    }

    pub fn to_config(&self) -> PipelineConfig {
        PipelineConfig {
            output_dir: self.output_dir.clone(),
            chart_path: self.chart.clone(),
            discount_rate: self.discount_rate,
            penalizer_candidates: self
                .penalizers
                .clone()
                .unwrap_or_else(|| DEFAULT_PENALIZER_COEFS.to_vec()),
            kmeans: KMeansSettings {
                max_iters: self.max_iters,
                tolerance: self.tolerance,
                seed: self.seed,
            },
            parallel_selection: !self.sequential,
            ..PipelineConfig::default()
        }
    }
}
