//! CLV result file

use crate::error::{ClvError, Result};
use crate::score::ScoredCustomer;
use chrono::NaiveDateTime;
use polars::prelude::*;
use std::fs::{self, File};
use std::path::{Path, PathBuf};
use tracing::info;

pub const CUSTOMER_ID_HEADER: &str = "CustomerID";
pub const CLV_HEADER: &str = "CLV";

/// `{months}_months_CLV_predicted_{YYYY-MM-DD}_{HH}_{MM}.csv`
pub fn output_file_name(horizon_months: u32, generated_at: NaiveDateTime) -> String {
    format!(
        "{}_months_CLV_predicted_{}.csv",
        horizon_months,
        generated_at.format("%Y-%m-%d_%H_%M")
    )
}

/// Write one `CustomerID,CLV` row per scored customer into `dir/file_name`
///
/// Rows go to a temporary file next to the target, which is renamed into
/// place once complete, so a failed write never leaves a partial file.
pub fn write_clv_csv(dir: &Path, file_name: &str, customers: &[ScoredCustomer]) -> Result<PathBuf> {
    fs::create_dir_all(dir)?;
    let path = dir.join(file_name);
    let staging = dir.join(format!(".{file_name}.partial"));

    let ids: Vec<&str> = customers.iter().map(|c| c.customer_id.as_str()).collect();
    let clv: Vec<f64> = customers.iter().map(|c| c.clv).collect();
    let mut df = df!(
        CUSTOMER_ID_HEADER => ids,
        CLV_HEADER => clv,
    )?;

    let written = File::create(&staging)
        .map_err(ClvError::from)
        .and_then(|mut file| {
            CsvWriter::new(&mut file)
                .include_header(true)
                .finish(&mut df)
                .map_err(ClvError::from)
        })
        .and_then(|_| fs::rename(&staging, &path).map_err(ClvError::from));

    if let Err(e) = written {
        let _ = fs::remove_file(&staging);
        return Err(e);
    }

    info!(rows = customers.len(), path = %path.display(), "wrote CLV file");
    Ok(path)
}

/// Read a CLV file back as `(customer_id, clv)` pairs in file order
pub fn read_clv_csv(path: &Path) -> Result<Vec<(String, f64)>> {
    let df = CsvReadOptions::default()
        .with_has_header(true)
        .with_infer_schema_length(Some(0))
        .try_into_reader_with_file_path(Some(path.to_path_buf()))?
        .finish()?;

    let ids = df.column(CUSTOMER_ID_HEADER)?.str()?;
    let values = df.column(CLV_HEADER)?.str()?;

    ids.into_iter()
        .zip(values.into_iter())
        .map(|(id, value)| -> Result<(String, f64)> {
            let id = id.ok_or_else(|| ClvError::Validation("empty customer id".to_string()))?;
            let clv = value
                .and_then(|v| v.parse::<f64>().ok())
                .ok_or_else(|| ClvError::Validation(format!("unreadable CLV for customer {id}")))?;
            Ok((id.to_string(), clv))
        })
        .collect()
}
