use chrono::offset::LocalResult;
use chrono::{DateTime, Duration, NaiveDate, NaiveTime, TimeZone, Utc};
use chrono_tz::Tz;

use super::types::FetchWindow;

/// Computes the fetch window from local midnight `days_back` days ago until
/// `now_utc`.
///
/// `now_utc` is injected so the calculation stays a pure function of its
/// inputs; callers pass `Utc::now()` in production.
pub fn compute_window(now_utc: DateTime<Utc>, days_back: i64, timezone: Tz) -> FetchWindow {
    let now_local = now_utc.with_timezone(&timezone);
    let target_date = now_local.date_naive() - Duration::days(days_back);
    let start_local = resolve_local_midnight(timezone, target_date);

    FetchWindow {
        start_millis: start_local.timestamp_millis(),
        end_millis: now_utc.timestamp_millis(),
        timezone,
    }
}

/// Resolves a local calendar date to a single unambiguous start-of-day
/// instant.
///
/// DST disambiguation: an ambiguous midnight (fall-back) takes the earlier
/// instant; a nonexistent midnight (spring-forward) shifts forward in
/// 15-minute steps to the first instant that exists on that date.
fn resolve_local_midnight(timezone: Tz, date: NaiveDate) -> DateTime<Tz> {
    let midnight = date.and_time(NaiveTime::MIN);

    match timezone.from_local_datetime(&midnight) {
        LocalResult::Single(instant) => instant,
        LocalResult::Ambiguous(earliest, _) => earliest,
        LocalResult::None => {
            // Probe up to 24h forward; offset transitions are far shorter.
            for quarter_hours in 1..=96 {
                let probe = midnight + Duration::minutes(15 * quarter_hours);
                match timezone.from_local_datetime(&probe) {
                    LocalResult::Single(instant) => return instant,
                    LocalResult::Ambiguous(earliest, _) => return earliest,
                    LocalResult::None => continue,
                }
            }
            timezone.from_utc_datetime(&midnight)
        }
    }
}
