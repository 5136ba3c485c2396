//! clvforge: customer lifetime value estimation CLI
//!
//! Loads a transaction log, estimates CLV over the requested horizon,
//! writes the result file and the tier chart.

use anyhow::{Context, Result};
use clap::Parser;
use clvforge::{run_pipeline, Args};
use std::time::Instant;
use tracing_subscriber::EnvFilter;

fn main() -> Result<()> {
    let args = Args::parse();

    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_new(args.log_filter()).unwrap_or_else(|_| EnvFilter::new("info")))
        .with_target(false)
        .init();

    println!("=== CLV Pipeline ===\n");
    let start_time = Instant::now();

    let config = args.to_config();
    let report = run_pipeline(&args.input, args.months, &config)
        .with_context(|| format!("CLV estimation failed for {}", args.input.display()))?;

    println!("✓ Scored {} customers", report.customers.len());
    println!(
        "  Frequency model penalizer: {} (holdout RMSE {:.4})",
        report.penalizer_coef, report.rmse
    );

    println!("\n=== Customer Tiers ===");
    for tier in &report.tiers {
        println!(
            "{:8} cluster {}: {} customers, mean CLV {:.2}",
            tier.tier.label(),
            tier.cluster_id,
            tier.count,
            tier.mean_clv
        );
    }

    println!("\n=== Pipeline Complete ===");
    println!("Total processing time: {:.2}s", start_time.elapsed().as_secs_f64());
    println!("CLV file saved to: {}", report.output_path.display());
    println!("Tier chart saved to: {}", report.chart_path.display());

    Ok(())
}
