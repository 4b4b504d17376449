use std::sync::Arc;

use futures::future::BoxFuture;

use crate::credentials::AuthenticatedSession;
use crate::fit_client::{AggregateResponse, Dataset, FitClient};

use super::super::types::{FetchWindow, GlobalRateLimiter, SyncError};
use super::error_mapping::map_fit_error;

/// Fetches day-bucketed aggregates and resolves fine-grained datasets for
/// one data source.
///
/// This trait exists so worker logic can be unit-tested against deterministic
/// scripted failures without requiring live network access.
pub trait AggregateFetcher: Send + Sync {
    fn fetch_aggregate<'a>(
        &'a self,
        session: &'a AuthenticatedSession,
        window: &'a FetchWindow,
        data_source_id: &'a str,
    ) -> BoxFuture<'a, Result<AggregateResponse, SyncError>>;

    /// Resolves the `"{start_nanos}-{end_nanos}"` dataset for one interval.
    ///
    /// Callers only invoke this for buckets holding at least one point; an
    /// empty bucket is the "no data that day" case and is handled upstream.
    fn resolve_dataset<'a>(
        &'a self,
        session: &'a AuthenticatedSession,
        data_source_id: &'a str,
        start_nanos: i64,
        end_nanos: i64,
    ) -> BoxFuture<'a, Result<Dataset, SyncError>>;
}

impl<T> AggregateFetcher for Arc<T>
where
    T: AggregateFetcher + ?Sized,
{
    fn fetch_aggregate<'a>(
        &'a self,
        session: &'a AuthenticatedSession,
        window: &'a FetchWindow,
        data_source_id: &'a str,
    ) -> BoxFuture<'a, Result<AggregateResponse, SyncError>> {
        (**self).fetch_aggregate(session, window, data_source_id)
    }

    fn resolve_dataset<'a>(
        &'a self,
        session: &'a AuthenticatedSession,
        data_source_id: &'a str,
        start_nanos: i64,
        end_nanos: i64,
    ) -> BoxFuture<'a, Result<Dataset, SyncError>> {
        (**self).resolve_dataset(session, data_source_id, start_nanos, end_nanos)
    }
}

/// HTTP-backed fetcher used by the production runtime.
pub struct HttpAggregateFetcher {
    client: FitClient,
    global_rate_limiter: GlobalRateLimiter,
}

impl HttpAggregateFetcher {
    /// Builds a fetcher sharing a single global request budget with all user
    /// workers.
    ///
    /// The limiter is injected here (rather than around worker loops) so
    /// retries are also constrained by the same RPS budget.
    pub fn new(
        base_url: String,
        global_rate_limiter: GlobalRateLimiter,
    ) -> Result<Self, crate::fit_client::FitClientErr> {
        let client = FitClient::new(base_url)?;
        Ok(Self {
            client,
            global_rate_limiter,
        })
    }
}

impl AggregateFetcher for HttpAggregateFetcher {
    fn fetch_aggregate<'a>(
        &'a self,
        session: &'a AuthenticatedSession,
        window: &'a FetchWindow,
        data_source_id: &'a str,
    ) -> BoxFuture<'a, Result<AggregateResponse, SyncError>> {
        Box::pin(async move {
            self.global_rate_limiter.until_ready().await;
            self.client
                .aggregate(
                    &session.access_token,
                    data_source_id,
                    window.start_millis,
                    window.end_millis,
                )
                .await
                .map_err(|err| map_fit_error(err, "aggregate"))
        })
    }

    fn resolve_dataset<'a>(
        &'a self,
        session: &'a AuthenticatedSession,
        data_source_id: &'a str,
        start_nanos: i64,
        end_nanos: i64,
    ) -> BoxFuture<'a, Result<Dataset, SyncError>> {
        Box::pin(async move {
            self.global_rate_limiter.until_ready().await;
            let dataset_id = format!("{start_nanos}-{end_nanos}");
            self.client
                .get_dataset(&session.access_token, data_source_id, &dataset_id)
                .await
                .map_err(|err| map_fit_error(err, "dataset"))
        })
    }
}
