mod error_mapping;
mod executor;
mod fetcher;
mod persister;
mod reconciler;
mod records;
mod retry;

pub use error_mapping::map_credential_error;
pub use executor::CategorySyncExecutor;
pub use fetcher::{AggregateFetcher, HttpAggregateFetcher};
pub use persister::{PgSinkWriter, SinkWriter};
pub use reconciler::{reconcile, ExistingKeys};

#[cfg(test)]
pub(crate) mod test_support;
