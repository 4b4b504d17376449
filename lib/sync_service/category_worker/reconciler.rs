//! Decides which freshly fetched records actually get inserted.
//!
//! The reconciler is pure: it compares an incoming batch against the keys
//! already present in the warehouse plus the user's current local date, and
//! emits the insert set. Running it twice over the same upstream data is a
//! no-op the second time.

use std::collections::HashSet;

use chrono::NaiveDate;

use crate::db::models::MetricRecord;

/// Dedup keys already present in the warehouse for one (user, category).
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ExistingKeys {
    /// Date-keyed categories: a present date means that whole day is done.
    Dates(HashSet<NaiveDate>),
    /// Sample-keyed categories: individual sample timestamps.
    SampleNanos(HashSet<i64>),
}

impl ExistingKeys {
    pub fn empty_dates() -> Self {
        ExistingKeys::Dates(HashSet::new())
    }

    pub fn empty_samples() -> Self {
        ExistingKeys::SampleNanos(HashSet::new())
    }
}

/// Filters an incoming batch down to the records that should be inserted.
///
/// Date-keyed records are dropped when their local date is already present
/// or is the user's current local date; today's data is still accumulating
/// and a partial day must never be frozen into the warehouse. All records
/// for a day share that fate, so a day is written whole or not at all.
///
/// Sample-keyed records are compared individually, today included; a
/// finished sample is final the moment it is recorded.
pub fn reconcile(
    incoming: Vec<MetricRecord>,
    existing: &ExistingKeys,
    today_local: NaiveDate,
) -> Vec<MetricRecord> {
    match existing {
        ExistingKeys::Dates(dates) => incoming
            .into_iter()
            .filter(|record| {
                let date = record.local_date();
                date != today_local && !dates.contains(&date)
            })
            .collect(),
        ExistingKeys::SampleNanos(nanos) => incoming
            .into_iter()
            .filter(|record| match record.sample_nanos() {
                Some(key) => !nanos.contains(&key),
                // A sample-keyed batch should only hold sample records;
                // anything else is dropped rather than double-inserted.
                None => false,
            })
            .collect(),
    }
}
