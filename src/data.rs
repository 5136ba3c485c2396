//! Transaction loading and cleaning using Polars

use crate::error::{ClvError, Result};
use polars::prelude::*;
use std::path::Path;
use tracing::{debug, info};

pub const INVOICE_NO: &str = "InvoiceNo";
pub const STOCK_CODE: &str = "StockCode";
pub const DESCRIPTION: &str = "Description";
pub const QUANTITY: &str = "Quantity";
pub const INVOICE_DATE: &str = "InvoiceDate";
pub const UNIT_PRICE: &str = "UnitPrice";
pub const CUSTOMER_ID: &str = "CustomerID";
pub const COUNTRY: &str = "Country";
/// Quantity * UnitPrice, added by `clean`
pub const MONETARY: &str = "Monetary";

/// Columns every input file must carry, in any order
pub const REQUIRED_COLUMNS: [&str; 8] = [
    INVOICE_NO,
    STOCK_CODE,
    DESCRIPTION,
    QUANTITY,
    INVOICE_DATE,
    UNIT_PRICE,
    CUSTOMER_ID,
    COUNTRY,
];

/// Identifier and label columns, always compared as trimmed text
const TEXT_COLUMNS: [&str; 5] = [INVOICE_NO, STOCK_CODE, DESCRIPTION, CUSTOMER_ID, COUNTRY];

/// Timestamp layouts seen in retail exports, tried in order
const TIMESTAMP_FORMATS: [&str; 9] = [
    "%Y-%m-%dT%H:%M:%S%.f",
    "%Y-%m-%dT%H:%M:%S%.fZ",
    "%Y-%m-%d %H:%M:%S%.f",
    "%Y-%m-%dT%H:%M",
    "%Y-%m-%d %H:%M",
    "%m/%d/%Y %H:%M:%S",
    "%m/%d/%Y %H:%M",
    "%d.%m.%Y %H:%M:%S",
    "%d.%m.%Y %H:%M",
];

const DATE_FORMATS: [&str; 2] = ["%Y-%m-%d", "%m/%d/%Y"];

/// Read a transaction CSV with every column as text
///
/// # Arguments
/// * `file_path` - Path to the CSV file
///
/// # Returns
/// * The raw frame, or `ClvError::Validation` when the path is not a
///   readable CSV carrying the required columns
pub fn load_transactions<P: AsRef<Path>>(file_path: P) -> Result<DataFrame> {
    let path = file_path.as_ref();
    if !path.exists() {
        return Err(ClvError::Io(std::io::Error::new(
            std::io::ErrorKind::NotFound,
            format!("input file not found: {}", path.display()),
        )));
    }
    if !path.is_file() {
        return Err(ClvError::Validation(format!(
            "input is not a file: {}",
            path.display()
        )));
    }

    // Schema inference is disabled so every column arrives as text and
    // identifiers such as "17850" or "536365" keep their exact spelling.
    let mut df = CsvReadOptions::default()
        .with_has_header(true)
        .with_infer_schema_length(Some(0))
        .try_into_reader_with_file_path(Some(path.to_path_buf()))
        .and_then(|reader| reader.finish())
        .map_err(|e| ClvError::Validation(format!("not a readable CSV file: {e}")))?;

    let trimmed: Vec<String> = df
        .get_column_names()
        .iter()
        .map(|name| name.trim().to_string())
        .collect();
    df.set_column_names(&trimmed)?;

    validate_columns(&df)?;
    info!(rows = df.height(), path = %path.display(), "loaded transaction file");
    Ok(df)
}

fn validate_columns(df: &DataFrame) -> Result<()> {
    let present = df.get_column_names();
    let missing: Vec<&str> = REQUIRED_COLUMNS
        .iter()
        .copied()
        .filter(|name| !present.iter().any(|p| *p == *name))
        .collect();

    if !missing.is_empty() {
        return Err(ClvError::Validation(format!(
            "missing required columns: {}",
            missing.join(", ")
        )));
    }
    Ok(())
}

/// Clean a transaction frame
///
/// Rows with a missing or blank field, a negative quantity or a
/// cancellation invoice number are dropped. Values that are present but
/// cannot be parsed abort the run with `ClvError::Validation`.
///
/// The result holds the eight required columns with `Quantity` as Int64,
/// `UnitPrice` as Float64 and `InvoiceDate` as a microsecond Datetime,
/// followed by `Monetary`. Cleaning an already cleaned frame returns it
/// unchanged.
pub fn clean(transactions: &DataFrame) -> Result<DataFrame> {
    validate_columns(transactions)?;
    let total = transactions.height();

    let mut normalize = Vec::with_capacity(REQUIRED_COLUMNS.len());
    for name in REQUIRED_COLUMNS {
        let is_text = transactions.column(name)?.dtype() == &DataType::String;
        if is_text || TEXT_COLUMNS.contains(&name) {
            normalize.push(blank_as_null(name));
        }
    }

    let complete = transactions
        .clone()
        .lazy()
        .with_columns(normalize)
        .filter(all_present())
        .collect()?;

    let invoice_date = parse_invoice_date(complete.column(INVOICE_DATE)?.dtype())?;
    let typed = complete
        .clone()
        .lazy()
        .with_columns([
            col(QUANTITY).cast(DataType::Float64),
            col(UNIT_PRICE).cast(DataType::Float64),
            invoice_date.alias(INVOICE_DATE),
        ])
        .collect()?;
    check_parsed(&complete, &typed)?;

    let cleaned = typed
        .clone()
        .lazy()
        .filter(col(QUANTITY).gt_eq(lit(0.0)).and(is_cancellation().not()))
        .with_columns([
            col(QUANTITY).cast(DataType::Int64),
            (col(QUANTITY) * col(UNIT_PRICE)).alias(MONETARY),
        ])
        .select(
            REQUIRED_COLUMNS
                .iter()
                .chain([MONETARY].iter())
                .map(|name| col(name))
                .collect::<Vec<_>>(),
        )
        .collect()?;

    debug!(
        dropped_missing = total - complete.height(),
        dropped_returns_and_cancellations = typed.height() - cleaned.height(),
        "cleaning filters applied"
    );
    info!(kept = cleaned.height(), total, "cleaned transactions");
    Ok(cleaned)
}

/// Trimmed text with empty strings turned into nulls
fn blank_as_null(name: &str) -> Expr {
    let text = col(name)
        .cast(DataType::String)
        .str()
        .strip_chars(lit(Null {}));
    when(text.clone().eq(lit("")))
        .then(lit(Null {}))
        .otherwise(text)
        .alias(name)
}

fn all_present() -> Expr {
    REQUIRED_COLUMNS
        .iter()
        .map(|name| col(name).is_not_null())
        .reduce(|all, present| all.and(present))
        .unwrap_or_else(|| lit(true))
}

/// Invoice numbers starting with "c" or "C" mark cancelled or returned
/// orders. Both cases count: "C536379" and "c536379" are dropped, any other
/// prefix is kept.
fn is_cancellation() -> Expr {
    col(INVOICE_NO)
        .str()
        .starts_with(lit("c"))
        .or(col(INVOICE_NO).str().starts_with(lit("C")))
}

/// InvoiceDate as a microsecond Datetime
///
/// Text is tried against every supported layout and the first layout that
/// matches the whole value wins. Date-only values land on midnight.
fn parse_invoice_date(dtype: &DataType) -> Result<Expr> {
    let target = DataType::Datetime(TimeUnit::Microseconds, None);
    match dtype {
        DataType::String => {
            let mut layouts: Vec<Expr> = TIMESTAMP_FORMATS
                .iter()
                .map(|format| {
                    col(INVOICE_DATE).str().to_datetime(
                        Some(TimeUnit::Microseconds),
                        None,
                        exact_layout(format),
                        lit("raise"),
                    )
                })
                .collect();
            layouts.extend(DATE_FORMATS.iter().map(|format| {
                col(INVOICE_DATE)
                    .str()
                    .to_date(exact_layout(format))
                    .cast(target.clone())
            }));
            Ok(coalesce(&layouts))
        }
        DataType::Datetime(_, _) | DataType::Date => Ok(col(INVOICE_DATE).cast(target)),
        other => Err(ClvError::Validation(format!(
            "{INVOICE_DATE} has unsupported type {other}"
        ))),
    }
}

fn exact_layout(format: &str) -> StrptimeOptions {
    StrptimeOptions {
        format: Some(format.into()),
        strict: false,
        exact: true,
        ..Default::default()
    }
}

/// Fail on values that were present but did not convert
fn check_parsed(raw: &DataFrame, typed: &DataFrame) -> Result<()> {
    for name in [QUANTITY, UNIT_PRICE, INVOICE_DATE] {
        let parsed = typed.column(name)?;
        if parsed.null_count() == 0 {
            continue;
        }
        let missing = parsed.is_null();
        let row = missing
            .into_iter()
            .position(|is_null| is_null == Some(true))
            .unwrap_or(0);
        let value = raw.column(name)?.get(row)?;
        return Err(ClvError::Validation(format!(
            "row {row}: invalid {name} {value}"
        )));
    }

    // Exports that passed through a float column write "6.0", which is fine
    let fractional = typed
        .column(QUANTITY)?
        .f64()?
        .into_iter()
        .flatten()
        .find(|q| q.fract() != 0.0 || !q.is_finite());
    if let Some(q) = fractional {
        return Err(ClvError::Validation(format!(
            "invalid {QUANTITY} {q}: not a whole number"
        )));
    }
    Ok(())
}
