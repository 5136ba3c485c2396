//! RFM(T) summaries and the calibration/holdout split
//!
//! Time is measured in whole days. Every transaction is floored to its
//! calendar day and a customer buying several times on one day has made a
//! single purchase whose value is the sum of that day's lines.

use crate::data::{CUSTOMER_ID, INVOICE_DATE, MONETARY};
use crate::error::{ClvError, Result};
use chrono::{DateTime, Duration, NaiveDate, NaiveDateTime};
use polars::prelude::*;
use std::collections::BTreeMap;
use tracing::info;

/// Length of the calibration window, counted from the first transaction
pub const CALIBRATION_PERIOD_DAYS: i64 = 200;

// Intermediate column names
const DAY: &str = "Day";
const FIRST_DAY: &str = "FirstDay";
const LAST_DAY: &str = "LastDay";
const PURCHASE_DAYS: &str = "PurchaseDays";
const FIRST_VALUE: &str = "FirstValue";
const TOTAL_VALUE: &str = "TotalValue";
const FREQUENCY: &str = "Frequency";
const RECENCY: &str = "Recency";
const TENURE: &str = "T";
const MONETARY_VALUE: &str = "MonetaryValue";
const FREQUENCY_HOLDOUT: &str = "FrequencyHoldout";

/// Per-customer aggregate over the whole observation period
#[derive(Debug, Clone, PartialEq)]
pub struct CustomerSummary {
    pub customer_id: String,
    /// Repeat purchase days (first purchase excluded)
    pub frequency: u32,
    /// Days between first and last purchase
    pub recency: f64,
    /// Days between first purchase and the end of observation
    pub t: f64,
    /// Mean value of repeat purchases, 0 when there are none
    pub monetary_value: f64,
}

/// Per-customer features for fitting on the calibration window and
/// validating on the holdout window
#[derive(Debug, Clone, PartialEq)]
pub struct CalibrationHoldoutSummary {
    pub customer_id: String,
    pub frequency_cal: u32,
    pub recency_cal: f64,
    pub t_cal: f64,
    pub frequency_holdout: u32,
    pub duration_holdout: f64,
}

/// Boundaries of the calibration/holdout split
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SplitWindow {
    /// Earliest transaction timestamp in the data
    pub first_transaction: NaiveDateTime,
    /// First transaction plus the calibration period
    pub calibration_end: NaiveDateTime,
    /// Latest transaction timestamp in the data
    pub holdout_end: NaiveDateTime,
}

impl SplitWindow {
    /// Derive the split from the observed transaction span of a cleaned frame
    pub fn from_transactions(transactions: &DataFrame) -> Result<Self> {
        let (first, last) = observed_span(transactions)?;
        let calibration = Duration::days(CALIBRATION_PERIOD_DAYS);
        let span = last - first;

        if span <= calibration {
            return Err(ClvError::Configuration(format!(
                "observed span of {} days is too short for a {}-day calibration window",
                span.num_days(),
                CALIBRATION_PERIOD_DAYS
            )));
        }

        let calibration_end = first + calibration;
        let holdout_end = calibration_end + (span - calibration);

        let window = SplitWindow {
            first_transaction: first,
            calibration_end,
            holdout_end,
        };
        if window.duration_holdout() <= 0.0 {
            return Err(ClvError::Configuration(
                "holdout window contains no full day after the calibration end".to_string(),
            ));
        }
        Ok(window)
    }

    pub fn calibration_end_day(&self) -> NaiveDate {
        self.calibration_end.date()
    }

    pub fn holdout_end_day(&self) -> NaiveDate {
        self.holdout_end.date()
    }

    /// Days between the calibration end and the holdout end
    pub fn duration_holdout(&self) -> f64 {
        (self.holdout_end_day() - self.calibration_end_day()).num_days() as f64
    }
}

/// Summarize a cleaned frame into one `CustomerSummary` per customer
///
/// The observation period ends on the day of the latest transaction.
pub fn summarize(transactions: &DataFrame) -> Result<BTreeMap<String, CustomerSummary>> {
    let (_, last) = observed_span(transactions)?;

    let frame = customer_aggregates(purchase_days(transactions), day_number(last.date()))
        .collect()?;
    let summaries: BTreeMap<String, CustomerSummary> = summaries_from_frame(&frame)?
        .into_iter()
        .map(|summary| (summary.customer_id.clone(), summary))
        .collect();

    info!(customers = summaries.len(), "built RFM(T) summaries");
    Ok(summaries)
}

/// Split a cleaned frame at the calibration end and summarize both windows
///
/// Only customers with at least one purchase inside the calibration window
/// appear in the result, ordered by customer id.
pub fn calibration_and_holdout(
    transactions: &DataFrame,
    window: &SplitWindow,
) -> Result<Vec<CalibrationHoldoutSummary>> {
    let calibration_end = day_number(window.calibration_end_day());
    let holdout_end = day_number(window.holdout_end_day());
    let duration_holdout = window.duration_holdout();

    let days = purchase_days(transactions);
    let calibration = customer_aggregates(
        days.clone().filter(col(DAY).lt_eq(lit(calibration_end))),
        calibration_end,
    );
    let holdout = days
        .filter(
            col(DAY)
                .gt(lit(calibration_end))
                .and(col(DAY).lt_eq(lit(holdout_end))),
        )
        .group_by([col(CUSTOMER_ID)])
        .agg([col(DAY).count().cast(DataType::Int64).alias(FREQUENCY_HOLDOUT)]);

    let frame = calibration
        .left_join(holdout, col(CUSTOMER_ID), col(CUSTOMER_ID))
        .with_column(col(FREQUENCY_HOLDOUT).fill_null(lit(0i64)))
        .collect()?;

    let frequency_holdout: Vec<i64> = frame
        .column(FREQUENCY_HOLDOUT)?
        .i64()?
        .into_no_null_iter()
        .collect();
    let mut summaries: Vec<CalibrationHoldoutSummary> = summaries_from_frame(&frame)?
        .into_iter()
        .zip(frequency_holdout)
        .map(|(cal, holdout)| CalibrationHoldoutSummary {
            customer_id: cal.customer_id,
            frequency_cal: cal.frequency,
            recency_cal: cal.recency,
            t_cal: cal.t,
            frequency_holdout: holdout as u32,
            duration_holdout,
        })
        .collect();
    summaries.sort_by(|a, b| a.customer_id.cmp(&b.customer_id));

    if summaries.is_empty() {
        return Err(ClvError::InsufficientData(
            "no customer purchased inside the calibration window".to_string(),
        ));
    }

    info!(
        customers = summaries.len(),
        calibration_end = %window.calibration_end_day(),
        holdout_end = %window.holdout_end_day(),
        duration_holdout,
        "built calibration/holdout summaries"
    );
    Ok(summaries)
}

/// Earliest and latest transaction timestamps
fn observed_span(transactions: &DataFrame) -> Result<(NaiveDateTime, NaiveDateTime)> {
    let bounds = transactions
        .clone()
        .lazy()
        .select([
            col(INVOICE_DATE)
                .min()
                .dt()
                .timestamp(TimeUnit::Microseconds)
                .alias("First"),
            col(INVOICE_DATE)
                .max()
                .dt()
                .timestamp(TimeUnit::Microseconds)
                .alias("Last"),
        ])
        .collect()?;

    let first = bounds.column("First")?.i64()?.get(0).and_then(from_micros);
    let last = bounds.column("Last")?.i64()?.get(0).and_then(from_micros);
    match (first, last) {
        (Some(first), Some(last)) => Ok((first, last)),
        _ => Err(ClvError::Validation(
            "no transactions left after cleaning".to_string(),
        )),
    }
}

fn from_micros(micros: i64) -> Option<NaiveDateTime> {
    DateTime::from_timestamp_micros(micros).map(|at| at.naive_utc())
}

/// Days since 1970-01-01, matching a Polars Date cast to Int32
fn day_number(date: NaiveDate) -> i32 {
    (date - NaiveDate::default()).num_days() as i32
}

/// One row per customer and purchase day with that day's total value
fn purchase_days(transactions: &DataFrame) -> LazyFrame {
    transactions
        .clone()
        .lazy()
        .group_by([
            col(CUSTOMER_ID),
            col(INVOICE_DATE).dt().date().cast(DataType::Int32).alias(DAY),
        ])
        .agg([col(MONETARY).sum()])
}

/// Frequency, recency, T and repeat-purchase value per customer
///
/// The first purchase day is the acquisition and does not count toward
/// frequency or monetary value.
fn customer_aggregates(days: LazyFrame, observation_end: i32) -> LazyFrame {
    days.group_by([col(CUSTOMER_ID)])
        .agg([
            col(DAY).min().alias(FIRST_DAY),
            col(DAY).max().alias(LAST_DAY),
            col(DAY).count().cast(DataType::Int64).alias(PURCHASE_DAYS),
            col(MONETARY).sum().alias(TOTAL_VALUE),
            col(MONETARY)
                .filter(col(DAY).eq(col(DAY).min()))
                .sum()
                .alias(FIRST_VALUE),
        ])
        .with_columns([
            (col(PURCHASE_DAYS) - lit(1i64)).alias(FREQUENCY),
            (col(LAST_DAY) - col(FIRST_DAY))
                .cast(DataType::Float64)
                .alias(RECENCY),
            (lit(observation_end) - col(FIRST_DAY))
                .cast(DataType::Float64)
                .alias(TENURE),
            when(col(PURCHASE_DAYS).gt(lit(1i64)))
                .then(
                    (col(TOTAL_VALUE) - col(FIRST_VALUE))
                        / (col(PURCHASE_DAYS) - lit(1i64)).cast(DataType::Float64),
                )
                .otherwise(lit(0.0))
                .alias(MONETARY_VALUE),
        ])
}

/// Typed summaries from an aggregated frame, in frame order
fn summaries_from_frame(frame: &DataFrame) -> Result<Vec<CustomerSummary>> {
    let ids = frame.column(CUSTOMER_ID)?.str()?;
    let frequency = frame.column(FREQUENCY)?.i64()?;
    let recency = frame.column(RECENCY)?.f64()?;
    let t = frame.column(TENURE)?.f64()?;
    let monetary_value = frame.column(MONETARY_VALUE)?.f64()?;

    let summaries = ids
        .into_no_null_iter()
        .zip(frequency.into_no_null_iter())
        .zip(recency.into_no_null_iter())
        .zip(t.into_no_null_iter())
        .zip(monetary_value.into_no_null_iter())
        .map(|((((customer_id, frequency), recency), t), monetary_value)| CustomerSummary {
            customer_id: customer_id.to_string(),
            frequency: frequency as u32,
            recency,
            t,
            monetary_value,
        })
        .collect();
    Ok(summaries)
}
