use std::collections::VecDeque;
use std::sync::Mutex;
use std::time::Duration;

use chrono::{DateTime, Utc};
use futures::future::BoxFuture;

use crate::archive::{ArchiveError, ArchiveStore};
use crate::credentials::AuthenticatedSession;
use crate::db::models::MetricRecord;
use crate::fit_client::{
    AggregateBucket, AggregateResponse, BucketDataset, DataPoint, DataValue, Dataset,
};

use super::super::types::{Category, FetchWindow, RetryPolicy, SyncError, WorkerConfig};
use super::fetcher::AggregateFetcher;
use super::persister::SinkWriter;
use super::reconciler::ExistingKeys;

pub(crate) fn test_session(username: &str) -> AuthenticatedSession {
    AuthenticatedSession {
        username: username.to_string(),
        access_token: "test-token".to_string(),
        timezone: chrono_tz::Tz::UTC,
    }
}

pub(crate) fn test_worker_config(retry_budget: u32) -> WorkerConfig {
    WorkerConfig {
        retry_policy: RetryPolicy {
            retry_budget,
            initial_backoff: Duration::ZERO,
            max_backoff: Duration::ZERO,
            jitter: Duration::ZERO,
        },
        attempt_timeout: Duration::from_secs(5),
        days_back: 1,
    }
}

/// 2024-03-03T12:00:00Z; with `days_back = 1` and a UTC user the window
/// covers 2024-03-02 (complete) and 2024-03-03 (in progress).
pub(crate) fn fixed_now() -> DateTime<Utc> {
    DateTime::from_timestamp_millis(1_709_467_200_000).expect("valid instant")
}

pub(crate) const DAY_2024_03_02_MILLIS: i64 = 1_709_337_600_000;
pub(crate) const DAY_2024_03_03_MILLIS: i64 = 1_709_424_000_000;

pub(crate) fn int_point(start_nanos: i64, end_nanos: i64, int_vals: &[i64]) -> DataPoint {
    DataPoint {
        start_time_nanos: start_nanos,
        end_time_nanos: end_nanos,
        origin_data_source_id: Some("src1".to_string()),
        value: int_vals
            .iter()
            .map(|v| DataValue {
                int_val: Some(*v),
                fp_val: None,
            })
            .collect(),
    }
}

pub(crate) fn fp_point(start_nanos: i64, end_nanos: i64, fp_val: f64) -> DataPoint {
    DataPoint {
        start_time_nanos: start_nanos,
        end_time_nanos: end_nanos,
        origin_data_source_id: Some("src1".to_string()),
        value: vec![DataValue {
            int_val: None,
            fp_val: Some(fp_val),
        }],
    }
}

pub(crate) fn day_bucket(start_millis: i64, points: Vec<DataPoint>) -> AggregateBucket {
    AggregateBucket {
        start_time_millis: start_millis,
        end_time_millis: start_millis + 86_400_000,
        dataset: vec![BucketDataset { point: points }],
    }
}

pub(crate) fn aggregate_of(buckets: Vec<AggregateBucket>) -> AggregateResponse {
    AggregateResponse { bucket: buckets }
}

#[derive(Default)]
pub(crate) struct MockFetcher {
    aggregate_plan: Mutex<VecDeque<Result<AggregateResponse, SyncError>>>,
    dataset_plan: Mutex<VecDeque<Result<Dataset, SyncError>>>,
    aggregate_delays: Mutex<VecDeque<Duration>>,
    aggregate_calls: Mutex<u32>,
    dataset_calls: Mutex<u32>,
    dataset_requests: Mutex<Vec<(i64, i64)>>,
}

impl MockFetcher {
    pub(crate) fn with_aggregates(plan: Vec<Result<AggregateResponse, SyncError>>) -> Self {
        Self {
            aggregate_plan: Mutex::new(plan.into_iter().collect()),
            ..Self::default()
        }
    }

    pub(crate) fn with_datasets(self, plan: Vec<Result<Dataset, SyncError>>) -> Self {
        *self.dataset_plan.lock().expect("dataset plan poisoned") = plan.into_iter().collect();
        self
    }

    /// Per-call stalls applied before each aggregate response; once the
    /// queue runs dry, calls respond immediately.
    pub(crate) fn with_aggregate_delays(self, delays: Vec<Duration>) -> Self {
        *self.aggregate_delays.lock().expect("delay plan poisoned") =
            delays.into_iter().collect();
        self
    }

    pub(crate) fn aggregate_calls(&self) -> u32 {
        *self.aggregate_calls.lock().expect("counter poisoned")
    }

    pub(crate) fn dataset_calls(&self) -> u32 {
        *self.dataset_calls.lock().expect("counter poisoned")
    }

    /// The `(start_nanos, end_nanos)` interval of every dataset resolution.
    pub(crate) fn dataset_requests(&self) -> Vec<(i64, i64)> {
        self.dataset_requests.lock().expect("requests poisoned").clone()
    }
}

impl AggregateFetcher for MockFetcher {
    fn fetch_aggregate<'a>(
        &'a self,
        _session: &'a AuthenticatedSession,
        _window: &'a FetchWindow,
        _data_source_id: &'a str,
    ) -> BoxFuture<'a, Result<AggregateResponse, SyncError>> {
        Box::pin(async move {
            *self.aggregate_calls.lock().expect("counter poisoned") += 1;
            let delay = self
                .aggregate_delays
                .lock()
                .expect("delay plan poisoned")
                .pop_front();
            if let Some(delay) = delay {
                tokio::time::sleep(delay).await;
            }
            self.aggregate_plan
                .lock()
                .expect("aggregate plan poisoned")
                .pop_front()
                .unwrap_or_else(|| {
                    panic!("scripted aggregate responses exhausted")
                })
        })
    }

    fn resolve_dataset<'a>(
        &'a self,
        _session: &'a AuthenticatedSession,
        _data_source_id: &'a str,
        start_nanos: i64,
        end_nanos: i64,
    ) -> BoxFuture<'a, Result<Dataset, SyncError>> {
        Box::pin(async move {
            *self.dataset_calls.lock().expect("counter poisoned") += 1;
            self.dataset_requests
                .lock()
                .expect("requests poisoned")
                .push((start_nanos, end_nanos));
            self.dataset_plan
                .lock()
                .expect("dataset plan poisoned")
                .pop_front()
                .unwrap_or_else(|| panic!("scripted dataset responses exhausted"))
        })
    }
}

pub(crate) struct MockSink {
    existing: ExistingKeys,
    write_outcomes: Mutex<VecDeque<Result<usize, SyncError>>>,
    written_batches: Mutex<Vec<Vec<MetricRecord>>>,
    key_loads: Mutex<u32>,
}

impl MockSink {
    pub(crate) fn with_existing(existing: ExistingKeys) -> Self {
        Self {
            existing,
            write_outcomes: Mutex::new(VecDeque::new()),
            written_batches: Mutex::new(Vec::new()),
            key_loads: Mutex::new(0),
        }
    }

    pub(crate) fn with_write_outcomes(self, outcomes: Vec<Result<usize, SyncError>>) -> Self {
        *self.write_outcomes.lock().expect("outcomes poisoned") = outcomes.into_iter().collect();
        self
    }

    pub(crate) fn written_batches(&self) -> Vec<Vec<MetricRecord>> {
        self.written_batches.lock().expect("batches poisoned").clone()
    }

    pub(crate) fn key_loads(&self) -> u32 {
        *self.key_loads.lock().expect("counter poisoned")
    }
}

impl SinkWriter for MockSink {
    fn load_existing_keys<'a>(
        &'a self,
        _username: &'a str,
        _category: Category,
        _since: chrono::NaiveDate,
    ) -> BoxFuture<'a, Result<ExistingKeys, SyncError>> {
        Box::pin(async move {
            *self.key_loads.lock().expect("counter poisoned") += 1;
            Ok(self.existing.clone())
        })
    }

    fn write_batch<'a>(
        &'a self,
        records: &'a [MetricRecord],
    ) -> BoxFuture<'a, Result<usize, SyncError>> {
        Box::pin(async move {
            let outcome = self
                .write_outcomes
                .lock()
                .expect("outcomes poisoned")
                .pop_front()
                .unwrap_or(Ok(records.len()));

            if outcome.is_ok() {
                self.written_batches
                    .lock()
                    .expect("batches poisoned")
                    .push(records.to_vec());
            }
            outcome
        })
    }
}

#[derive(Default)]
pub(crate) struct MockArchive {
    fail_all: bool,
    puts: Mutex<Vec<(String, serde_json::Value)>>,
}

impl MockArchive {
    pub(crate) fn failing() -> Self {
        Self {
            fail_all: true,
            puts: Mutex::new(Vec::new()),
        }
    }

    pub(crate) fn puts(&self) -> Vec<(String, serde_json::Value)> {
        self.puts.lock().expect("puts poisoned").clone()
    }
}

impl ArchiveStore for MockArchive {
    fn put<'a>(
        &'a self,
        path: &'a str,
        payload: &'a serde_json::Value,
    ) -> BoxFuture<'a, Result<(), ArchiveError>> {
        Box::pin(async move {
            if self.fail_all {
                return Err(ArchiveError::Io {
                    path: path.to_string(),
                    source: std::io::Error::new(std::io::ErrorKind::Other, "scripted failure"),
                });
            }
            self.puts
                .lock()
                .expect("puts poisoned")
                .push((path.to_string(), payload.clone()));
            Ok(())
        })
    }
}
