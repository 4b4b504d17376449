use chrono::{DateTime, Utc};
use serde_json::json;
use tracing::{debug, info, warn};

use crate::archive::ArchiveStore;
use crate::config::DataSourceIds;
use crate::credentials::AuthenticatedSession;
use crate::db::models::MetricRecord;

use super::super::types::{
    AttemptStatus, Category, FetchWindow, SyncAttemptResult, SyncError, SyncErrorKind,
    WorkerConfig, ONE_DAY_NANOS,
};
use super::super::window::compute_window;
use super::fetcher::AggregateFetcher;
use super::persister::SinkWriter;
use super::reconciler::reconcile;
use super::records::{
    activity_interval_records, activity_summary_records, calorie_record, daily_buckets,
    heart_rate_records, step_record,
};
use super::retry::{jitter_seed_for, run_with_retry};

/// Output of one successful category attempt, carried to archiving.
struct AttemptOutput {
    raw_payload: serde_json::Value,
    inserted_count: usize,
}

/// Runs the fetch/reconcile/write pipeline for one (user, category) pair.
///
/// The executor owns retry and attempt-timeout policy; the fan-out
/// coordinator above it owns per-user scheduling and report assembly.
pub struct CategorySyncExecutor<F, W, A>
where
    F: AggregateFetcher,
    W: SinkWriter,
    A: ArchiveStore,
{
    fetcher: F,
    sink: W,
    archive: A,
    config: WorkerConfig,
    data_sources: DataSourceIds,
}

impl<F, W, A> CategorySyncExecutor<F, W, A>
where
    F: AggregateFetcher,
    W: SinkWriter,
    A: ArchiveStore,
{
    pub fn new(
        fetcher: F,
        sink: W,
        archive: A,
        config: WorkerConfig,
        data_sources: DataSourceIds,
    ) -> Self {
        Self {
            fetcher,
            sink,
            archive,
            config,
            data_sources,
        }
    }

    fn data_source_for(&self, category: Category) -> &str {
        match category {
            Category::Steps => &self.data_sources.steps,
            Category::Activities => &self.data_sources.activities,
            Category::HeartRate => &self.data_sources.heart_rate,
            Category::Calories => &self.data_sources.calories,
        }
    }

    /// Syncs one category for one user, retrying recoverable failures under
    /// the bounded budget. Archives raw payloads only after a successful
    /// warehouse write; archive failures degrade to a warning.
    pub async fn sync_category(
        &self,
        session: &AuthenticatedSession,
        category: Category,
        now_utc: DateTime<Utc>,
    ) -> SyncAttemptResult {
        let username = session.username.as_str();
        let window = compute_window(now_utc, self.config.days_back, session.timezone);
        let seed = jitter_seed_for(username, category.as_str());

        let outcome = run_with_retry(&self.config.retry_policy, seed, |attempt| {
            let window = window.clone();
            async move {
                debug!(
                    event = "category_attempt_started",
                    username,
                    category = %category,
                    attempt,
                    "starting category sync attempt"
                );
                match tokio::time::timeout(
                    self.config.attempt_timeout,
                    self.run_attempt(session, category, &window, now_utc),
                )
                .await
                {
                    Ok(result) => result,
                    Err(_) => Err(SyncError::new(
                        SyncErrorKind::UpstreamUnavailable,
                        format!(
                            "attempt exceeded {}s wall-time limit",
                            self.config.attempt_timeout.as_secs()
                        ),
                    )),
                }
            }
        })
        .await;

        let total_attempts = self.config.retry_policy.total_attempts();
        match outcome {
            Ok((output, attempts)) => {
                let archive_paths = self
                    .archive_success(username, category, &window, &output)
                    .await;
                info!(
                    event = "category_sync_succeeded",
                    username,
                    category = %category,
                    attempts,
                    inserted_count = output.inserted_count,
                    "category sync complete"
                );
                SyncAttemptResult {
                    status: AttemptStatus::Succeeded,
                    attempts_remaining: total_attempts.saturating_sub(attempts),
                    error: None,
                    archive_paths,
                    inserted_count: output.inserted_count,
                }
            }
            Err(terminal) => {
                let status = if terminal.exhausted {
                    AttemptStatus::FailedRecoverable
                } else {
                    AttemptStatus::FailedFatal
                };
                warn!(
                    event = "category_sync_failed",
                    username,
                    category = %category,
                    attempts = terminal.attempts,
                    recoverable = terminal.exhausted,
                    error = %terminal.error,
                    "category sync failed"
                );
                SyncAttemptResult {
                    status,
                    attempts_remaining: total_attempts.saturating_sub(terminal.attempts),
                    error: Some(terminal.error.to_string()),
                    archive_paths: Vec::new(),
                    inserted_count: 0,
                }
            }
        }
    }

    /// One full pipeline pass: fetch, normalize, reconcile, write.
    async fn run_attempt(
        &self,
        session: &AuthenticatedSession,
        category: Category,
        window: &FetchWindow,
        now_utc: DateTime<Utc>,
    ) -> Result<AttemptOutput, SyncError> {
        let data_source_id = self.data_source_for(category);
        let response = self
            .fetcher
            .fetch_aggregate(session, window, data_source_id)
            .await?;

        let username = session.username.as_str();
        let buckets = daily_buckets(&response);
        let mut records: Vec<MetricRecord> = Vec::new();

        match category {
            Category::Steps => {
                for bucket in &buckets {
                    records.push(step_record(username, window, bucket));
                }
            }
            Category::Calories => {
                for bucket in &buckets {
                    records.push(calorie_record(username, window, bucket));
                }
            }
            Category::Activities => {
                for bucket in &buckets {
                    records.extend(activity_summary_records(username, window, bucket));
                    if bucket.points.is_empty() {
                        continue;
                    }
                    let start_nanos = bucket.start_millis * 1_000_000;
                    let dataset = self
                        .fetcher
                        .resolve_dataset(
                            session,
                            data_source_id,
                            start_nanos,
                            start_nanos + ONE_DAY_NANOS,
                        )
                        .await?;
                    records.extend(activity_interval_records(
                        username,
                        window,
                        bucket.start_millis,
                        &dataset.point,
                    ));
                }
            }
            Category::HeartRate => {
                for bucket in &buckets {
                    // The aggregate point's interval names the dataset
                    // holding that day's raw samples.
                    let Some(point) = bucket.points.first() else {
                        debug!(
                            event = "heartrate_day_empty",
                            username,
                            bucket_start_millis = bucket.start_millis,
                            "no heart-rate data recorded for day"
                        );
                        continue;
                    };
                    let dataset = self
                        .fetcher
                        .resolve_dataset(
                            session,
                            data_source_id,
                            point.start_time_nanos,
                            point.end_time_nanos,
                        )
                        .await?;
                    records.extend(heart_rate_records(username, window, &dataset.point));
                }
            }
        }

        let existing = self
            .sink
            .load_existing_keys(username, category, window.start_local_date())
            .await?;
        let today_local = now_utc.with_timezone(&session.timezone).date_naive();
        let to_insert = reconcile(records, &existing, today_local);
        let inserted_count = self.sink.write_batch(&to_insert).await?;

        let raw_payload = serde_json::to_value(&response).map_err(|err| {
            SyncError::new(
                SyncErrorKind::Internal,
                format!("aggregate payload re-encode failed: {err}"),
            )
        })?;

        Ok(AttemptOutput {
            raw_payload,
            inserted_count,
        })
    }

    /// Archives the raw fetch payload and the insert count marker.
    ///
    /// Returns the paths actually written. A blob failure never demotes a
    /// completed sync; the warehouse write is the source of truth.
    async fn archive_success(
        &self,
        username: &str,
        category: Category,
        window: &FetchWindow,
        output: &AttemptOutput,
    ) -> Vec<String> {
        let date = window.start_local_date();
        let blobs = [
            (
                format!("{username}/{date}/{category}.json"),
                output.raw_payload.clone(),
            ),
            (
                format!("{username}/{date}/{category}_inserted_count.json"),
                json!({ "inserted_count": output.inserted_count }),
            ),
        ];

        let mut written = Vec::new();
        for (path, payload) in &blobs {
            match self.archive.put(path, payload).await {
                Ok(()) => written.push(path.clone()),
                Err(err) => warn!(
                    event = "archive_write_failed",
                    username,
                    category = %category,
                    blob = path.as_str(),
                    error = %err,
                    "raw payload archive failed; sync result unaffected"
                ),
            }
        }
        written
    }
}
