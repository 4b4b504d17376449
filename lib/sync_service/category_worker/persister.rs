use std::collections::HashSet;
use std::sync::Arc;

use chrono::NaiveDate;
use diesel::insert_into;
use diesel::prelude::*;
use diesel_async::pooled_connection::deadpool::Pool;
use diesel_async::RunQueryDsl;
use futures::future::BoxFuture;

use crate::db::models::{
    ActivityIntervalRow, ActivitySummaryRow, CalorieRow, HeartRateRow, MetricRecord, StepRow,
};
use crate::db::schema::{activity_intervals, activity_summary, calories, heartrate, steps};

use super::super::types::{Category, SyncError};
use super::error_mapping::{map_diesel_error, map_pool_error};
use super::reconciler::ExistingKeys;

/// Reads dedup keys and writes reconciled batches for one warehouse.
///
/// Abstracted so transient/fatal write behavior is testable without a
/// Postgres instance.
pub trait SinkWriter: Send + Sync {
    /// Loads the dedup keys already present for `(username, category)`,
    /// restricted to local dates at or after `since`.
    fn load_existing_keys<'a>(
        &'a self,
        username: &'a str,
        category: Category,
        since: NaiveDate,
    ) -> BoxFuture<'a, Result<ExistingKeys, SyncError>>;

    /// Inserts a reconciled batch, returning the number of rows written.
    fn write_batch<'a>(
        &'a self,
        records: &'a [MetricRecord],
    ) -> BoxFuture<'a, Result<usize, SyncError>>;
}

impl<T> SinkWriter for Arc<T>
where
    T: SinkWriter + ?Sized,
{
    fn load_existing_keys<'a>(
        &'a self,
        username: &'a str,
        category: Category,
        since: NaiveDate,
    ) -> BoxFuture<'a, Result<ExistingKeys, SyncError>> {
        (**self).load_existing_keys(username, category, since)
    }

    fn write_batch<'a>(
        &'a self,
        records: &'a [MetricRecord],
    ) -> BoxFuture<'a, Result<usize, SyncError>> {
        (**self).write_batch(records)
    }
}

/// Postgres-backed sink used by the production runtime.
pub struct PgSinkWriter {
    pool: Pool<diesel_async::AsyncPgConnection>,
}

impl PgSinkWriter {
    pub fn new(pool: Pool<diesel_async::AsyncPgConnection>) -> Self {
        Self { pool }
    }
}

/// One write batch split back out by destination table.
#[derive(Default)]
struct PartitionedBatch {
    steps: Vec<StepRow>,
    summaries: Vec<ActivitySummaryRow>,
    intervals: Vec<ActivityIntervalRow>,
    heart_rates: Vec<HeartRateRow>,
    calories: Vec<CalorieRow>,
}

fn partition(records: &[MetricRecord]) -> PartitionedBatch {
    let mut batch = PartitionedBatch::default();
    for record in records {
        match record {
            MetricRecord::Step(row) => batch.steps.push(row.clone()),
            MetricRecord::ActivitySummary(row) => batch.summaries.push(row.clone()),
            MetricRecord::ActivityInterval(row) => batch.intervals.push(row.clone()),
            MetricRecord::HeartRate(row) => batch.heart_rates.push(row.clone()),
            MetricRecord::Calorie(row) => batch.calories.push(row.clone()),
        }
    }
    batch
}

impl SinkWriter for PgSinkWriter {
    fn load_existing_keys<'a>(
        &'a self,
        username: &'a str,
        category: Category,
        since: NaiveDate,
    ) -> BoxFuture<'a, Result<ExistingKeys, SyncError>> {
        Box::pin(async move {
            let mut conn = self
                .pool
                .get()
                .await
                .map_err(|err| map_pool_error(err, "load existing keys"))?;

            match category {
                Category::Steps => {
                    let dates: Vec<NaiveDate> = steps::dsl::steps
                        .select(steps::local_date)
                        .filter(steps::username.eq(username))
                        .filter(steps::local_date.ge(since))
                        .distinct()
                        .load(&mut conn)
                        .await
                        .map_err(|err| map_diesel_error(err, "select existing step dates"))?;
                    Ok(ExistingKeys::Dates(dates.into_iter().collect()))
                }
                // Summaries gate the whole day; intervals travel with them.
                Category::Activities => {
                    let dates: Vec<NaiveDate> = activity_summary::dsl::activity_summary
                        .select(activity_summary::local_date)
                        .filter(activity_summary::username.eq(username))
                        .filter(activity_summary::local_date.ge(since))
                        .distinct()
                        .load(&mut conn)
                        .await
                        .map_err(|err| map_diesel_error(err, "select existing activity dates"))?;
                    Ok(ExistingKeys::Dates(dates.into_iter().collect()))
                }
                Category::Calories => {
                    let dates: Vec<NaiveDate> = calories::dsl::calories
                        .select(calories::local_date)
                        .filter(calories::username.eq(username))
                        .filter(calories::local_date.ge(since))
                        .distinct()
                        .load(&mut conn)
                        .await
                        .map_err(|err| map_diesel_error(err, "select existing calorie dates"))?;
                    Ok(ExistingKeys::Dates(dates.into_iter().collect()))
                }
                Category::HeartRate => {
                    let nanos: Vec<i64> = heartrate::dsl::heartrate
                        .select(heartrate::recorded_time_nanos)
                        .filter(heartrate::username.eq(username))
                        .filter(heartrate::local_date.ge(since))
                        .load(&mut conn)
                        .await
                        .map_err(|err| map_diesel_error(err, "select existing sample nanos"))?;
                    Ok(ExistingKeys::SampleNanos(
                        nanos.into_iter().collect::<HashSet<i64>>(),
                    ))
                }
            }
        })
    }

    fn write_batch<'a>(
        &'a self,
        records: &'a [MetricRecord],
    ) -> BoxFuture<'a, Result<usize, SyncError>> {
        Box::pin(async move {
            if records.is_empty() {
                return Ok(0);
            }

            let mut conn = self
                .pool
                .get()
                .await
                .map_err(|err| map_pool_error(err, "write batch"))?;

            let batch = partition(records);
            let mut written = 0usize;

            if !batch.steps.is_empty() {
                written += insert_into(steps::dsl::steps)
                    .values(&batch.steps)
                    .execute(&mut conn)
                    .await
                    .map_err(|err| map_diesel_error(err, "insert steps"))?;
            }
            if !batch.summaries.is_empty() {
                written += insert_into(activity_summary::dsl::activity_summary)
                    .values(&batch.summaries)
                    .execute(&mut conn)
                    .await
                    .map_err(|err| map_diesel_error(err, "insert activity summaries"))?;
            }
            if !batch.intervals.is_empty() {
                written += insert_into(activity_intervals::dsl::activity_intervals)
                    .values(&batch.intervals)
                    .execute(&mut conn)
                    .await
                    .map_err(|err| map_diesel_error(err, "insert activity intervals"))?;
            }
            if !batch.heart_rates.is_empty() {
                written += insert_into(heartrate::dsl::heartrate)
                    .values(&batch.heart_rates)
                    .execute(&mut conn)
                    .await
                    .map_err(|err| map_diesel_error(err, "insert heart-rate samples"))?;
            }
            if !batch.calories.is_empty() {
                written += insert_into(calories::dsl::calories)
                    .values(&batch.calories)
                    .execute(&mut conn)
                    .await
                    .map_err(|err| map_diesel_error(err, "insert calories"))?;
            }

            Ok(written)
        })
    }
}
