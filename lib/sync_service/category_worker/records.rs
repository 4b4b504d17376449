//! Converts upstream aggregate payloads into warehouse rows.
//!
//! Every converter is pure over `(username, window, payload)` so the
//! extraction rules below are testable without network or database
//! fixtures.

use crate::db::models::{
    ActivityIntervalRow, ActivitySummaryRow, CalorieRow, HeartRateRow, MetricRecord, StepRow,
};
use crate::fit_client::{AggregateResponse, DataPoint};

use super::super::types::{DailyBucket, FetchWindow, NO_ACTIVITY_SENTINEL_TYPE};

/// Flattens an aggregate response into one bucket per calendar day.
///
/// The upstream response nests points under a per-bucket dataset list; with
/// day bucketing that list holds exactly one dataset, so any trailing ones
/// are ignored.
pub fn daily_buckets(response: &AggregateResponse) -> Vec<DailyBucket> {
    response
        .bucket
        .iter()
        .map(|bucket| DailyBucket {
            start_millis: bucket.start_time_millis,
            end_millis: bucket.end_time_millis,
            points: bucket
                .dataset
                .first()
                .map(|dataset| dataset.point.clone())
                .unwrap_or_default(),
        })
        .collect()
}

fn origin_of(point: &DataPoint) -> String {
    point.origin_data_source_id.clone().unwrap_or_default()
}

/// Daily step total. A day with no points still yields a zero-count row so
/// the warehouse distinguishes "no steps" from "never synced".
pub fn step_record(username: &str, window: &FetchWindow, bucket: &DailyBucket) -> MetricRecord {
    let local_date = window.local_date_for(bucket.start_millis);
    let step_count: i64 = bucket
        .points
        .iter()
        .flat_map(|point| point.value.iter())
        .filter_map(|value| value.int_val)
        .sum();
    let origin_source_id = bucket.points.first().map(origin_of).unwrap_or_default();

    MetricRecord::Step(StepRow {
        username: username.to_string(),
        local_date,
        step_count,
        origin_source_id,
    })
}

/// Daily expended-calories total, zero row for empty days.
pub fn calorie_record(username: &str, window: &FetchWindow, bucket: &DailyBucket) -> MetricRecord {
    let local_date = window.local_date_for(bucket.start_millis);
    let calories: f64 = bucket
        .points
        .iter()
        .flat_map(|point| point.value.iter())
        .filter_map(|value| value.fp_val)
        .sum();
    let origin_source_id = bucket.points.first().map(origin_of).unwrap_or_default();

    MetricRecord::Calorie(CalorieRow {
        username: username.to_string(),
        local_date,
        calories,
        origin_source_id,
    })
}

/// Per-day activity rollups, one row per activity type.
///
/// Aggregated activity points carry `[activity_type, duration_millis,
/// segment_count]`. A day with no points yields a single sentinel row so
/// empty days stay present-with-zero.
pub fn activity_summary_records(
    username: &str,
    window: &FetchWindow,
    bucket: &DailyBucket,
) -> Vec<MetricRecord> {
    let local_date = window.local_date_for(bucket.start_millis);

    if bucket.points.is_empty() {
        return vec![MetricRecord::ActivitySummary(ActivitySummaryRow {
            username: username.to_string(),
            local_date,
            activity_type: NO_ACTIVITY_SENTINEL_TYPE,
            duration_seconds: 0,
            segment_count: 0,
        })];
    }

    bucket
        .points
        .iter()
        .map(|point| {
            let activity_type = point
                .value
                .first()
                .and_then(|value| value.int_val)
                .unwrap_or(i64::from(NO_ACTIVITY_SENTINEL_TYPE)) as i32;
            let duration_millis = point
                .value
                .get(1)
                .and_then(|value| value.int_val)
                .unwrap_or(0);
            let segment_count = point
                .value
                .get(2)
                .and_then(|value| value.int_val)
                .unwrap_or(0) as i32;

            MetricRecord::ActivitySummary(ActivitySummaryRow {
                username: username.to_string(),
                local_date,
                activity_type,
                duration_seconds: duration_millis / 1000,
                segment_count,
            })
        })
        .collect()
}

/// Fine-grained activity intervals resolved for one day.
pub fn activity_interval_records(
    username: &str,
    window: &FetchWindow,
    bucket_start_millis: i64,
    points: &[DataPoint],
) -> Vec<MetricRecord> {
    let local_date = window.local_date_for(bucket_start_millis);

    points
        .iter()
        .map(|point| {
            let activity_type = point
                .value
                .first()
                .and_then(|value| value.int_val)
                .unwrap_or(i64::from(NO_ACTIVITY_SENTINEL_TYPE)) as i32;

            MetricRecord::ActivityInterval(ActivityIntervalRow {
                username: username.to_string(),
                local_date,
                activity_type,
                start_nanos: point.start_time_nanos,
                end_nanos: point.end_time_nanos,
                origin_source_id: origin_of(point),
            })
        })
        .collect()
}

/// Heart-rate samples for one day's resolved dataset.
///
/// The sample key is the point's end time; a sample "happened" when the
/// measurement finished. Dates are derived per sample rather than per
/// bucket so late-evening samples land on the right side of a DST shift.
pub fn heart_rate_records(
    username: &str,
    window: &FetchWindow,
    points: &[DataPoint],
) -> Vec<MetricRecord> {
    points
        .iter()
        .filter_map(|point| {
            let bpm = point.value.first().and_then(|value| value.fp_val)?;
            Some(MetricRecord::HeartRate(HeartRateRow {
                username: username.to_string(),
                recorded_time_nanos: point.end_time_nanos,
                local_date: window.local_date_for(point.end_time_nanos / 1_000_000),
                bpm: bpm.round() as i32,
            }))
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use chrono::NaiveDate;
    use chrono_tz::Tz;

    use crate::fit_client::{AggregateBucket, BucketDataset, DataValue};

    use super::*;

    fn utc_window(start_millis: i64, end_millis: i64) -> FetchWindow {
        FetchWindow {
            start_millis,
            end_millis,
            timezone: Tz::UTC,
        }
    }

    fn point(int_vals: &[i64], origin: &str) -> DataPoint {
        DataPoint {
            start_time_nanos: 0,
            end_time_nanos: 0,
            origin_data_source_id: Some(origin.to_string()),
            value: int_vals
                .iter()
                .map(|v| DataValue {
                    int_val: Some(*v),
                    fp_val: None,
                })
                .collect(),
        }
    }

    #[test]
    fn step_bucket_sums_counts_and_keeps_origin() {
        // 2024-03-01T00:00:00Z
        let start = 1_709_251_200_000;
        let window = utc_window(start, start + 86_400_000);
        let bucket = DailyBucket {
            start_millis: start,
            end_millis: start + 86_400_000,
            points: vec![point(&[5000], "src1")],
        };

        let record = step_record("casey", &window, &bucket);
        match record {
            MetricRecord::Step(row) => {
                assert_eq!(row.username, "casey");
                assert_eq!(row.local_date, NaiveDate::from_ymd_opt(2024, 3, 1).unwrap());
                assert_eq!(row.step_count, 5000);
                assert_eq!(row.origin_source_id, "src1");
            }
            other => panic!("expected step row, got {other:?}"),
        }
    }

    #[test]
    fn empty_step_bucket_yields_zero_row() {
        let start = 1_709_251_200_000;
        let window = utc_window(start, start + 86_400_000);
        let bucket = DailyBucket {
            start_millis: start,
            end_millis: start + 86_400_000,
            points: Vec::new(),
        };

        match step_record("casey", &window, &bucket) {
            MetricRecord::Step(row) => {
                assert_eq!(row.step_count, 0);
                assert_eq!(row.origin_source_id, "");
            }
            other => panic!("expected step row, got {other:?}"),
        }
    }

    #[test]
    fn empty_activity_bucket_yields_sentinel_row() {
        let start = 1_709_251_200_000;
        let window = utc_window(start, start + 86_400_000);
        let bucket = DailyBucket {
            start_millis: start,
            end_millis: start + 86_400_000,
            points: Vec::new(),
        };

        let records = activity_summary_records("casey", &window, &bucket);
        assert_eq!(records.len(), 1);
        match &records[0] {
            MetricRecord::ActivitySummary(row) => {
                assert_eq!(row.activity_type, NO_ACTIVITY_SENTINEL_TYPE);
                assert_eq!(row.duration_seconds, 0);
                assert_eq!(row.segment_count, 0);
            }
            other => panic!("expected summary row, got {other:?}"),
        }
    }

    #[test]
    fn activity_summary_decodes_type_duration_segments() {
        let start = 1_709_251_200_000;
        let window = utc_window(start, start + 86_400_000);
        let bucket = DailyBucket {
            start_millis: start,
            end_millis: start + 86_400_000,
            // walking (7), 30 minutes, 2 segments
            points: vec![point(&[7, 1_800_000, 2], "src1")],
        };

        let records = activity_summary_records("casey", &window, &bucket);
        match &records[0] {
            MetricRecord::ActivitySummary(row) => {
                assert_eq!(row.activity_type, 7);
                assert_eq!(row.duration_seconds, 1800);
                assert_eq!(row.segment_count, 2);
            }
            other => panic!("expected summary row, got {other:?}"),
        }
    }

    #[test]
    fn heart_rate_dates_follow_each_sample_not_the_bucket() {
        // Window starts 2024-03-09 in US/Pacific.
        let window = FetchWindow {
            start_millis: 1_709_971_200_000,
            end_millis: 1_710_144_000_000,
            timezone: chrono_tz::US::Pacific,
        };
        // 2024-03-10T07:30:00Z is pre-shift, 23:30 PST on 2024-03-09.
        let sample = DataPoint {
            start_time_nanos: 1_710_055_740_000_000_000,
            end_time_nanos: 1_710_055_800_000_000_000,
            origin_data_source_id: Some("hr1".to_string()),
            value: vec![DataValue {
                int_val: None,
                fp_val: Some(61.4),
            }],
        };

        let records = heart_rate_records("casey", &window, &[sample]);
        assert_eq!(records.len(), 1);
        match &records[0] {
            MetricRecord::HeartRate(row) => {
                assert_eq!(row.bpm, 61);
                assert_eq!(row.recorded_time_nanos, 1_710_055_800_000_000_000);
                assert_eq!(
                    row.local_date,
                    NaiveDate::from_ymd_opt(2024, 3, 9).unwrap()
                );
            }
            other => panic!("expected heart-rate row, got {other:?}"),
        }
    }

    #[test]
    fn daily_buckets_takes_first_dataset_per_bucket() {
        let response = AggregateResponse {
            bucket: vec![AggregateBucket {
                start_time_millis: 100,
                end_time_millis: 200,
                dataset: vec![
                    BucketDataset {
                        point: vec![point(&[1], "a")],
                    },
                    BucketDataset {
                        point: vec![point(&[2], "b")],
                    },
                ],
            }],
        };

        let buckets = daily_buckets(&response);
        assert_eq!(buckets.len(), 1);
        assert_eq!(buckets[0].points.len(), 1);
        assert_eq!(buckets[0].points[0].value[0].int_val, Some(1));
    }
}
