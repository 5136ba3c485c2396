//! clvforge: customer lifetime value estimation from retail transaction logs
//!
//! Transactions are cleaned and summarized per customer (recency, frequency,
//! monetary value, tenure). A BG/NBD purchase model is selected by holdout
//! error over a set of L2 penalizers, a Gamma-Gamma model predicts spend,
//! and the resulting CLV is segmented into four tiers with K-Means.

pub mod bgnbd;
pub mod cli;
pub mod cluster;
pub mod data;
pub mod error;
pub mod gamma_gamma;
pub mod optimize;
pub mod output;
pub mod pipeline;
pub mod rfm;
pub mod score;
pub mod segment;
pub mod selection;
pub mod special;
pub mod viz;

// Re-export public items for easier access
pub use cli::Args;
pub use data::{clean, load_transactions};
pub use error::{ClvError, Result};
pub use pipeline::{estimate, run_pipeline, Estimate, PipelineConfig, PipelineReport};
pub use rfm::{summarize, CalibrationHoldoutSummary, CustomerSummary};
pub use score::ScoredCustomer;
pub use segment::{ClusterAssignment, Tier, TierSummary};
pub use selection::select_and_fit_frequency_model;
