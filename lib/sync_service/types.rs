use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, NaiveDate, Utc};
use chrono_tz::Tz;
use governor::clock::DefaultClock;
use governor::state::{InMemoryState, NotKeyed};
use governor::RateLimiter;
use serde::Serialize;

use crate::fit_client::DataPoint;

pub const ONE_DAY_NANOS: i64 = 86_400_000_000_000;

/// Sentinel activity type written for days with no recorded activity
/// ("unknown" in the upstream taxonomy). Keeps empty days present-with-zero
/// instead of omitted.
pub const NO_ACTIVITY_SENTINEL_TYPE: i32 = 4;

/// Shared process-local limiter enforcing one global request budget across
/// all user workers, so retries are also constrained by the same RPS budget.
pub type GlobalRateLimiter = Arc<RateLimiter<NotKeyed, InMemoryState, DefaultClock>>;

/// Metric categories synced per user.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Category {
    Steps,
    Activities,
    HeartRate,
    Calories,
}

impl Category {
    /// Default cron categories; calories are opt-in.
    pub const DEFAULT: [Category; 3] = [Category::Steps, Category::Activities, Category::HeartRate];
    pub const ALL: [Category; 4] = [
        Category::Steps,
        Category::Activities,
        Category::HeartRate,
        Category::Calories,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            Category::Steps => "steps",
            Category::Activities => "activities",
            Category::HeartRate => "heartrate",
            Category::Calories => "calories",
        }
    }

    /// Date-keyed categories dedup whole days and never write today;
    /// heart rate dedups per sample and may write today.
    pub fn is_date_keyed(self) -> bool {
        !matches!(self, Category::HeartRate)
    }
}

impl fmt::Display for Category {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Category {
    type Err = String;

    fn from_str(raw: &str) -> Result<Self, Self::Err> {
        match raw.trim().to_ascii_lowercase().as_str() {
            "steps" => Ok(Category::Steps),
            "activities" => Ok(Category::Activities),
            "heartrate" | "heart_rate" => Ok(Category::HeartRate),
            "calories" => Ok(Category::Calories),
            other => Err(format!("unknown category: {other}")),
        }
    }
}

/// Attempt-scoped fetch window.
///
/// `start_millis` is always local midnight of the window's first day,
/// converted to UTC-epoch milliseconds. Never persisted.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FetchWindow {
    pub start_millis: i64,
    pub end_millis: i64,
    pub timezone: Tz,
}

impl FetchWindow {
    /// Local calendar date for a UTC-epoch-millis instant.
    ///
    /// Always converts through the window's timezone; the UTC date is never
    /// assumed to equal the local date across a day boundary.
    pub fn local_date_for(&self, millis: i64) -> NaiveDate {
        let utc = DateTime::<Utc>::from_timestamp_millis(millis)
            .unwrap_or(DateTime::<Utc>::UNIX_EPOCH);
        utc.with_timezone(&self.timezone).date_naive()
    }

    pub fn start_local_date(&self) -> NaiveDate {
        self.local_date_for(self.start_millis)
    }
}

/// One calendar day of aggregated upstream data.
///
/// Zero points is valid ("no data that day"), not an error.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct DailyBucket {
    pub start_millis: i64,
    pub end_millis: i64,
    pub points: Vec<DataPoint>,
}

/// Normalized sync failure classes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SyncErrorKind {
    /// Credential rejection; fatal, refresh must happen out-of-band.
    AuthExpired,
    /// Request shape will not change within the attempt window; fatal.
    BadRequest,
    NotFound,
    Forbidden,
    /// Transient upstream/network failure; recoverable.
    UpstreamUnavailable,
    /// Warehouse rejected the batch; assumed transient contention.
    WriteRejected,
    /// Broken invariant inside the pipeline; fatal.
    Internal,
}

/// Typed sync failure with human-readable details.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SyncError {
    pub kind: SyncErrorKind,
    pub message: String,
}

impl SyncError {
    pub fn new(kind: SyncErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
        }
    }

    pub fn is_recoverable(&self) -> bool {
        matches!(
            self.kind,
            SyncErrorKind::UpstreamUnavailable | SyncErrorKind::WriteRejected
        )
    }
}

impl fmt::Display for SyncError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:?}: {}", self.kind, self.message)
    }
}

/// Configures per-category bounded retry behavior.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Extra attempts after the first one.
    pub retry_budget: u32,
    pub initial_backoff: Duration,
    pub max_backoff: Duration,
    pub jitter: Duration,
}

impl RetryPolicy {
    /// Total attempts including the first one.
    pub fn total_attempts(&self) -> u32 {
        self.retry_budget.saturating_add(1)
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            retry_budget: 1,
            initial_backoff: Duration::from_millis(500),
            max_backoff: Duration::from_secs(5),
            jitter: Duration::from_millis(100),
        }
    }
}

/// Worker settings for one (user, category) sync attempt pipeline.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WorkerConfig {
    pub retry_policy: RetryPolicy,
    /// Bounds a single attempt's wall time; the retry budget only bounds the
    /// attempt count.
    pub attempt_timeout: Duration,
    /// Window start offset: sync from local midnight N days ago until now.
    pub days_back: i64,
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            retry_policy: RetryPolicy::default(),
            attempt_timeout: Duration::from_secs(120),
            days_back: 1,
        }
    }
}

/// Terminal state of one (user, category) sync.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum AttemptStatus {
    Pending,
    Succeeded,
    FailedRecoverable,
    FailedFatal,
}

/// Result of one (user, category) sync, reported to the caller.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SyncAttemptResult {
    pub status: AttemptStatus,
    pub attempts_remaining: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    pub archive_paths: Vec<String>,
    pub inserted_count: usize,
}

impl SyncAttemptResult {
    pub fn pending(policy: &RetryPolicy) -> Self {
        Self {
            status: AttemptStatus::Pending,
            attempts_remaining: policy.total_attempts(),
            error: None,
            archive_paths: Vec::new(),
            inserted_count: 0,
        }
    }

    pub fn is_failure(&self) -> bool {
        matches!(
            self.status,
            AttemptStatus::FailedRecoverable | AttemptStatus::FailedFatal
        )
    }
}

/// Per-user, per-category report assembled by the fan-out coordinator.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[serde(transparent)]
pub struct SyncReport(pub BTreeMap<String, BTreeMap<String, SyncAttemptResult>>);

impl SyncReport {
    pub fn insert_user(&mut self, username: String, results: BTreeMap<String, SyncAttemptResult>) {
        self.0.insert(username, results);
    }

    pub fn has_failures(&self) -> bool {
        self.0
            .values()
            .flat_map(|categories| categories.values())
            .any(SyncAttemptResult::is_failure)
    }
}
