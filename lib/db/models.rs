use chrono::NaiveDate;
use diesel::prelude::*;
use serde::Serialize;

use super::schema::{activity_intervals, activity_summary, calories, fit_users, heartrate, steps};

/// Daily step total for one user. Dedup key: `(username, local_date)`.
#[derive(Debug, Clone, PartialEq, Serialize, Insertable, Queryable)]
#[diesel(table_name = steps)]
pub struct StepRow {
    pub username: String,
    pub local_date: NaiveDate,
    pub step_count: i64,
    pub origin_source_id: String,
}

/// Per-day activity rollup keyed by `(username, local_date)` for dedup;
/// multiple activity types per day produce multiple rows in one batch.
#[derive(Debug, Clone, PartialEq, Serialize, Insertable, Queryable)]
#[diesel(table_name = activity_summary)]
pub struct ActivitySummaryRow {
    pub username: String,
    pub local_date: NaiveDate,
    pub activity_type: i32,
    pub duration_seconds: i64,
    pub segment_count: i32,
}

/// Fine-grained activity interval resolved from a day's dataset.
#[derive(Debug, Clone, PartialEq, Serialize, Insertable, Queryable)]
#[diesel(table_name = activity_intervals)]
pub struct ActivityIntervalRow {
    pub username: String,
    pub local_date: NaiveDate,
    pub activity_type: i32,
    pub start_nanos: i64,
    pub end_nanos: i64,
    pub origin_source_id: String,
}

/// One heart-rate sample. Dedup key: `(username, recorded_time_nanos)`.
#[derive(Debug, Clone, PartialEq, Serialize, Insertable, Queryable)]
#[diesel(table_name = heartrate)]
pub struct HeartRateRow {
    pub username: String,
    pub recorded_time_nanos: i64,
    pub local_date: NaiveDate,
    pub bpm: i32,
}

/// Daily expended-calories total. Dedup key: `(username, local_date)`.
#[derive(Debug, Clone, PartialEq, Serialize, Insertable, Queryable)]
#[diesel(table_name = calories)]
pub struct CalorieRow {
    pub username: String,
    pub local_date: NaiveDate,
    #[diesel(column_name = calorie_count)]
    pub calories: f64,
    pub origin_source_id: String,
}

/// Registered user with stored credentials and home timezone.
#[derive(Debug, Clone, PartialEq, Queryable)]
#[diesel(table_name = fit_users)]
pub struct FitUser {
    pub username: String,
    pub refresh_token: String,
    pub timezone: String,
}

/// Union of category-specific rows flowing through reconcile and write.
///
/// A single batch mixes variants (activity summaries plus their fine-grained
/// intervals travel together); the sink writer fans them back out per table.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub enum MetricRecord {
    Step(StepRow),
    ActivitySummary(ActivitySummaryRow),
    ActivityInterval(ActivityIntervalRow),
    HeartRate(HeartRateRow),
    Calorie(CalorieRow),
}

impl MetricRecord {
    pub fn local_date(&self) -> NaiveDate {
        match self {
            MetricRecord::Step(row) => row.local_date,
            MetricRecord::ActivitySummary(row) => row.local_date,
            MetricRecord::ActivityInterval(row) => row.local_date,
            MetricRecord::HeartRate(row) => row.local_date,
            MetricRecord::Calorie(row) => row.local_date,
        }
    }

    /// Sample-level dedup key; present only for heart-rate records.
    pub fn sample_nanos(&self) -> Option<i64> {
        match self {
            MetricRecord::HeartRate(row) => Some(row.recorded_time_nanos),
            _ => None,
        }
    }
}
