pub mod category_worker;
mod error;
pub mod types;
pub mod window;

use std::collections::BTreeMap;
use std::num::NonZeroU32;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use diesel_async::pooled_connection::deadpool::Pool;
use governor::{Quota, RateLimiter};
use nonzero_ext::nonzero;
use tokio::task::JoinSet;
use tracing::{info, warn};

use crate::archive::ArchiveStore;
use crate::config::DataSourceIds;
use crate::credentials::SessionProvider;

use category_worker::{
    map_credential_error, CategorySyncExecutor, HttpAggregateFetcher, PgSinkWriter,
};
pub use error::Error;
use types::{
    AttemptStatus, Category, GlobalRateLimiter, SyncAttemptResult, SyncReport, WorkerConfig,
};

/// Fan-out coordinator: one concurrent task per user, categories sequential
/// within a user so one stale token does not burn parallel request budget.
#[derive(Clone)]
pub struct SyncService {
    db_pool: Pool<diesel_async::AsyncPgConnection>,
    fit_api_url: String,
    session_provider: Arc<dyn SessionProvider>,
    archive: Arc<dyn ArchiveStore>,
    worker_config: WorkerConfig,
    data_sources: DataSourceIds,
    rate_limiter: GlobalRateLimiter,
}

impl SyncService {
    pub fn new(
        fit_api_url: String,
        db_pool: Pool<diesel_async::AsyncPgConnection>,
        session_provider: Arc<dyn SessionProvider>,
        archive: Arc<dyn ArchiveStore>,
        worker_config: WorkerConfig,
        data_sources: DataSourceIds,
        global_rps: u32,
    ) -> Self {
        let quota = Quota::per_second(NonZeroU32::new(global_rps).unwrap_or(nonzero!(10u32)));
        Self {
            db_pool,
            fit_api_url,
            session_provider,
            archive,
            worker_config,
            data_sources,
            rate_limiter: Arc::new(RateLimiter::direct(quota)),
        }
    }

    /// Syncs the given categories for every registered user.
    pub async fn run_sync_all_users(&self, categories: Vec<Category>) -> Result<SyncReport, Error> {
        let usernames = self.session_provider.list_usernames().await?;
        self.run_sync(usernames, categories).await
    }

    /// Syncs the given categories for the given users and returns the full
    /// per-user, per-category report. Individual failures are recorded in
    /// the report; only coordinator-level faults surface as `Err`.
    pub async fn run_sync(
        &self,
        usernames: Vec<String>,
        categories: Vec<Category>,
    ) -> Result<SyncReport, Error> {
        if usernames.is_empty() {
            return Err(Error::Orchestration(
                "sync requested with no usernames".to_string(),
            ));
        }
        let categories = if categories.is_empty() {
            Category::DEFAULT.to_vec()
        } else {
            categories
        };

        let fetcher = Arc::new(HttpAggregateFetcher::new(
            self.fit_api_url.clone(),
            self.rate_limiter.clone(),
        )?);
        let executor = Arc::new(CategorySyncExecutor::new(
            fetcher,
            Arc::new(PgSinkWriter::new(self.db_pool.clone())),
            self.archive.clone(),
            self.worker_config,
            self.data_sources.clone(),
        ));

        let now_utc = Utc::now();
        let user_count = usernames.len();
        info!(
            event = "sync_run_started",
            user_count,
            categories = %categories
                .iter()
                .map(|category| category.as_str())
                .collect::<Vec<_>>()
                .join(","),
            "starting sync fan-out"
        );

        let mut join_set = JoinSet::new();
        for username in usernames {
            let executor = executor.clone();
            let provider = self.session_provider.clone();
            let categories = categories.clone();
            let worker_config = self.worker_config;
            join_set.spawn(async move {
                let results =
                    sync_user(&*executor, &provider, &username, &categories, now_utc, &worker_config)
                        .await;
                (username, results)
            });
        }

        let mut report = SyncReport::default();
        while let Some(joined) = join_set.join_next().await {
            let (username, results) = joined?;
            report.insert_user(username, results);
        }

        if report.has_failures() {
            warn!(
                event = "sync_run_completed_with_failures",
                user_count,
                "sync fan-out finished; report contains failed categories"
            );
        } else {
            info!(
                event = "sync_run_completed",
                user_count,
                "sync fan-out finished cleanly"
            );
        }
        Ok(report)
    }
}

/// Per-user unit of the fan-out: resolve one session, then run each category
/// sequentially against it.
///
/// A session failure fails every requested category up front; no upstream
/// fetch is attempted without valid credentials.
async fn sync_user<F, W, A, P>(
    executor: &CategorySyncExecutor<F, W, A>,
    provider: &P,
    username: &str,
    categories: &[Category],
    now_utc: DateTime<Utc>,
    worker_config: &WorkerConfig,
) -> BTreeMap<String, SyncAttemptResult>
where
    F: category_worker::AggregateFetcher,
    W: category_worker::SinkWriter,
    A: ArchiveStore,
    P: SessionProvider,
{
    let mut results = BTreeMap::new();

    let session = match provider.session_for(username).await {
        Ok(session) => session,
        Err(err) => {
            let mapped = map_credential_error(err);
            warn!(
                event = "user_session_failed",
                username,
                error = %mapped,
                "could not establish an authenticated session"
            );
            for category in categories {
                results.insert(
                    category.to_string(),
                    SyncAttemptResult {
                        status: AttemptStatus::FailedFatal,
                        attempts_remaining: worker_config.retry_policy.total_attempts(),
                        error: Some(mapped.to_string()),
                        archive_paths: Vec::new(),
                        inserted_count: 0,
                    },
                );
            }
            return results;
        }
    };

    for category in categories {
        let result = executor.sync_category(&session, *category, now_utc).await;
        results.insert(category.to_string(), result);
    }
    results
}

#[cfg(test)]
mod tests {
    use std::collections::HashSet;

    use futures::future::BoxFuture;

    use crate::credentials::{AuthenticatedSession, CredentialError};

    use super::category_worker::test_support::{
        aggregate_of, day_bucket, fixed_now, int_point, test_worker_config, MockArchive,
        MockFetcher, MockSink, DAY_2024_03_02_MILLIS,
    };
    use super::category_worker::ExistingKeys;
    use super::*;

    struct MockProvider {
        known: HashSet<String>,
    }

    impl MockProvider {
        fn with_users(users: &[&str]) -> Self {
            Self {
                known: users.iter().map(|u| u.to_string()).collect(),
            }
        }
    }

    impl SessionProvider for MockProvider {
        fn session_for<'a>(
            &'a self,
            username: &'a str,
        ) -> BoxFuture<'a, Result<AuthenticatedSession, CredentialError>> {
            Box::pin(async move {
                if self.known.contains(username) {
                    Ok(AuthenticatedSession {
                        username: username.to_string(),
                        access_token: "test-token".to_string(),
                        timezone: chrono_tz::Tz::UTC,
                    })
                } else {
                    Err(CredentialError::UnknownUser(username.to_string()))
                }
            })
        }

        fn list_usernames<'a>(&'a self) -> BoxFuture<'a, Result<Vec<String>, CredentialError>> {
            Box::pin(async move {
                let mut users: Vec<String> = self.known.iter().cloned().collect();
                users.sort();
                Ok(users)
            })
        }
    }

    fn mock_executor(
        aggregates: Vec<Result<crate::fit_client::AggregateResponse, types::SyncError>>,
    ) -> CategorySyncExecutor<MockFetcher, MockSink, MockArchive> {
        CategorySyncExecutor::new(
            MockFetcher::with_aggregates(aggregates),
            MockSink::with_existing(ExistingKeys::empty_dates()),
            MockArchive::default(),
            test_worker_config(0),
            crate::config::DataSourceIds::default(),
        )
    }

    #[tokio::test]
    async fn session_failure_fails_every_requested_category() {
        let executor = mock_executor(Vec::new());
        let provider = MockProvider::with_users(&[]);
        let config = test_worker_config(1);

        let results = sync_user(
            &executor,
            &provider,
            "ghost",
            &[Category::Steps, Category::HeartRate],
            fixed_now(),
            &config,
        )
        .await;

        assert_eq!(results.len(), 2);
        for result in results.values() {
            assert_eq!(result.status, AttemptStatus::FailedFatal);
            assert_eq!(result.attempts_remaining, 2);
            assert!(result
                .error
                .as_deref()
                .is_some_and(|msg| msg.contains("ghost")));
        }
    }

    #[tokio::test]
    async fn categories_run_sequentially_and_report_per_category() {
        let steps = aggregate_of(vec![day_bucket(
            DAY_2024_03_02_MILLIS,
            vec![int_point(0, 0, &[5000])],
        )]);
        let calories = aggregate_of(vec![day_bucket(DAY_2024_03_02_MILLIS, Vec::new())]);
        let executor = mock_executor(vec![Ok(steps), Ok(calories)]);
        let provider = MockProvider::with_users(&["casey"]);
        let config = test_worker_config(0);

        let results = sync_user(
            &executor,
            &provider,
            "casey",
            &[Category::Steps, Category::Calories],
            fixed_now(),
            &config,
        )
        .await;

        assert_eq!(results.len(), 2);
        assert_eq!(results["steps"].status, AttemptStatus::Succeeded);
        assert_eq!(results["steps"].inserted_count, 1);
        assert_eq!(results["calories"].status, AttemptStatus::Succeeded);
        assert_eq!(results["calories"].inserted_count, 1);
    }

    #[tokio::test]
    async fn report_failure_flag_tracks_category_outcomes() {
        let mut report = SyncReport::default();
        let mut results = BTreeMap::new();
        results.insert(
            "steps".to_string(),
            SyncAttemptResult {
                status: AttemptStatus::Succeeded,
                attempts_remaining: 1,
                error: None,
                archive_paths: Vec::new(),
                inserted_count: 3,
            },
        );
        report.insert_user("casey".to_string(), results);
        assert!(!report.has_failures());

        let mut failing = BTreeMap::new();
        failing.insert(
            "heartrate".to_string(),
            SyncAttemptResult {
                status: AttemptStatus::FailedRecoverable,
                attempts_remaining: 0,
                error: Some("upstream 503".to_string()),
                archive_paths: Vec::new(),
                inserted_count: 0,
            },
        );
        report.insert_user("jordan".to_string(), failing);
        assert!(report.has_failures());
    }
}
