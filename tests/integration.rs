//! Integration tests for clvforge

use chrono::{Duration, NaiveDate, NaiveDateTime};
use clvforge::output::read_clv_csv;
use clvforge::{estimate, load_transactions, run_pipeline, ClvError, PipelineConfig, Tier};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use rand_distr::{Distribution, Gamma};
use std::collections::BTreeSet;
use std::fs::{self, File};
use std::io::Write;
use std::path::{Path, PathBuf};
use tempfile::tempdir;

const HEADER: &str = "InvoiceNo,StockCode,Description,Quantity,InvoiceDate,UnitPrice,CustomerID,Country";

fn start() -> NaiveDateTime {
    NaiveDate::from_ymd_opt(2010, 12, 1)
        .unwrap()
        .and_hms_opt(9, 0, 0)
        .unwrap()
}

fn write_line(file: &mut File, invoice: &str, quantity: i64, day: i64, price: f64, customer: u32) {
    let at = start() + Duration::days(day);
    writeln!(
        file,
        "{invoice},85123A,WHITE HANGING HEART T-LIGHT HOLDER,{quantity},{},{price:.2},{customer},United Kingdom",
        at.format("%Y-%m-%d %H:%M:%S")
    )
    .unwrap();
}

/// 50 customers with 3 to 10 purchase days each over a 400-day span.
/// Spend follows a gamma-gamma process: every customer draws a spend
/// rate, every purchase draws its value around it.
fn create_synthetic_csv(dir: &Path) -> PathBuf {
    write_synthetic_csv(dir, true)
}

fn write_synthetic_csv(dir: &Path, with_cancellations: bool) -> PathBuf {
    let path = dir.join(if with_cancellations { "transactions.csv" } else { "clean.csv" });
    let mut file = File::create(&path).unwrap();
    writeln!(file, "{HEADER}").unwrap();

    let mut rng = StdRng::seed_from_u64(2011);
    let spend_rate = Gamma::new(4.0, 1.0 / 15.0).unwrap();

    for c in 0..50u32 {
        let customer = 12000 + c;
        let n_days = rng.gen_range(3..=10usize);
        let first = if c == 0 { 0 } else { rng.gen_range(0..=150i64) };

        let mut days = BTreeSet::from([first]);
        if c == 1 {
            days.insert(400);
        }
        while days.len() < n_days {
            days.insert(rng.gen_range(first..=400));
        }

        let nu: f64 = spend_rate.sample(&mut rng);
        let value = Gamma::new(6.0, 1.0 / nu).unwrap();
        for (i, day) in days.iter().enumerate() {
            let price = value.sample(&mut rng).max(0.01);
            write_line(&mut file, &format!("5{c:03}{i:02}"), 1, *day, price, customer);
        }
    }

    if with_cancellations {
        write_line(&mut file, "C599001", -1, 120, 4.95, 12002);
        write_line(&mut file, "c599002", 2, 121, 4.95, 12003);
        write_line(&mut file, "C599003", 1, 122, 4.95, 12004);
    }

    path
}

fn test_config(dir: &Path) -> PipelineConfig {
    PipelineConfig {
        output_dir: dir.join("out"),
        ..PipelineConfig::default()
    }
}

#[test]
fn test_end_to_end_pipeline() {
    let dir = tempdir().unwrap();
    let input = create_synthetic_csv(dir.path());
    let config = test_config(dir.path());

    let report = run_pipeline(&input, 12, &config).unwrap();

    // Every synthetic customer repeats with positive spend, so all 50 are scored
    assert_eq!(report.customers.len(), 50);
    assert!(report.customers.iter().all(|c| c.clv.is_finite() && c.clv >= 0.0));

    assert!(report.output_file_name.starts_with("12_months_CLV_predicted_"));
    assert!(report.output_file_name.ends_with(".csv"));
    assert_eq!(report.output_path, config.output_dir.join(&report.output_file_name));

    let rows = read_clv_csv(&report.output_path).unwrap();
    assert_eq!(rows.len(), 50);
    for ((id, clv), customer) in rows.iter().zip(&report.customers) {
        assert_eq!(id, &customer.customer_id);
        assert!((clv - customer.clv).abs() <= 1e-6 * customer.clv.abs().max(1.0));
    }

    assert!(report.chart_path.exists());
    assert_eq!(report.chart_path, config.output_dir.join("clv_tiers.svg"));

    // Tiers are ordered by rank and the best tier holds the highest mean
    assert!(!report.tiers.is_empty() && report.tiers.len() <= 4);
    assert_eq!(report.tiers[0].tier, Tier::Diamond);
    for pair in report.tiers.windows(2) {
        assert!(pair[0].rank <= pair[1].rank);
        assert!(pair[0].mean_clv >= pair[1].mean_clv);
    }
    assert_eq!(report.assignments.len(), report.customers.len());
    assert_eq!(
        report.tiers.iter().map(|t| t.count).sum::<usize>(),
        report.customers.len()
    );

    assert!(report.candidates.len() == 12);
    assert!(report.rmse.is_finite());
}

#[test]
fn test_cancellations_are_not_purchases() {
    let dir = tempdir().unwrap();
    let with = load_transactions(write_synthetic_csv(dir.path(), true)).unwrap();
    let without = load_transactions(write_synthetic_csv(dir.path(), false)).unwrap();

    let config = PipelineConfig::default();
    let noisy = estimate(&with, 12, &config).unwrap();
    let clean = estimate(&without, 12, &config).unwrap();

    assert_eq!(noisy.summaries.len(), 50);
    assert_eq!(noisy.summaries, clean.summaries);
}

#[test]
fn test_selection_is_deterministic() {
    let dir = tempdir().unwrap();
    let raw = load_transactions(create_synthetic_csv(dir.path())).unwrap();

    let parallel = estimate(&raw, 12, &PipelineConfig::default()).unwrap();
    let sequential = estimate(
        &raw,
        12,
        &PipelineConfig {
            parallel_selection: false,
            ..PipelineConfig::default()
        },
    )
    .unwrap();

    assert_eq!(
        parallel.frequency_model.penalizer_coef,
        sequential.frequency_model.penalizer_coef
    );
    assert!((parallel.frequency_model.rmse - sequential.frequency_model.rmse).abs() < 1e-9);
    assert_eq!(parallel.selection_trace().len(), sequential.selection_trace().len());
    assert_eq!(parallel.tiers, sequential.tiers);
}

#[test]
fn test_longer_horizon_is_worth_more() {
    let dir = tempdir().unwrap();
    let raw = load_transactions(create_synthetic_csv(dir.path())).unwrap();
    let config = PipelineConfig::default();

    let short = estimate(&raw, 3, &config).unwrap();
    let long = estimate(&raw, 12, &config).unwrap();

    assert_eq!(short.customers.len(), long.customers.len());
    for (s, l) in short.customers.iter().zip(&long.customers) {
        assert_eq!(s.customer_id, l.customer_id);
        assert!(l.clv >= s.clv);
    }
}

#[test]
fn test_span_of_exactly_200_days() {
    let dir = tempdir().unwrap();
    let input = dir.path().join("short.csv");
    let mut file = File::create(&input).unwrap();
    writeln!(file, "{HEADER}").unwrap();
    for c in 0..10u32 {
        for (i, day) in [0, 50 + c as i64, 200].iter().enumerate() {
            write_line(&mut file, &format!("6{c:03}{i:02}"), 2, *day, 3.5, 13000 + c);
        }
    }
    drop(file);

    let config = test_config(dir.path());
    let result = run_pipeline(&input, 12, &config);
    assert!(matches!(result, Err(ClvError::Configuration(_))));
    // Nothing is written for a failed run
    assert!(!config.output_dir.exists());
}

#[test]
fn test_missing_columns() {
    let dir = tempdir().unwrap();
    let input = dir.path().join("bad.csv");
    fs::write(
        &input,
        "InvoiceNo,StockCode,Quantity,InvoiceDate,UnitPrice,CustomerID\n536365,85123A,6,2010-12-01 08:26:00,2.55,17850\n",
    )
    .unwrap();

    let result = run_pipeline(&input, 12, &test_config(dir.path()));
    assert!(matches!(result, Err(ClvError::Validation(_))));
}

#[test]
fn test_non_positive_horizon() {
    let dir = tempdir().unwrap();
    let input = create_synthetic_csv(dir.path());

    for months in [0, -6] {
        let result = run_pipeline(&input, months, &test_config(dir.path()));
        assert!(matches!(result, Err(ClvError::Configuration(_))));
    }
}

#[test]
fn test_monetary_model_fits_synthetic_population() {
    let dir = tempdir().unwrap();
    let raw = load_transactions(create_synthetic_csv(dir.path())).unwrap();
    let fitted = estimate(&raw, 12, &PipelineConfig::default()).unwrap();

    let params = fitted.monetary_model.params;
    assert!(params.p.is_finite() && params.q > 1.0 && params.v.is_finite());
    assert!(fitted.monetary_model.population_mean().is_finite());
}

#[test]
fn test_directory_as_input() {
    let dir = tempdir().unwrap();
    let result = run_pipeline(dir.path(), 12, &test_config(dir.path()));
    assert!(matches!(result, Err(ClvError::Validation(_))));
}

#[test]
fn test_missing_input_file() {
    let dir = tempdir().unwrap();
    let result = run_pipeline(&dir.path().join("nope.csv"), 12, &test_config(dir.path()));
    assert!(matches!(result, Err(ClvError::Io(_))));
}
