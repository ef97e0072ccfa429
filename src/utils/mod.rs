use chrono::{DateTime, Datelike, Duration, FixedOffset, NaiveDate, NaiveTime, TimeZone, Utc};

use crate::error::{AppError, Result};

/// Parse a `YYYY-MM-DD` query value.
pub fn parse_date(raw: &str) -> Result<NaiveDate> {
    NaiveDate::parse_from_str(raw.trim(), "%Y-%m-%d")
        .map_err(|e| AppError::InvalidInput(format!("bad date {:?}: {}", raw, e)))
}

/// First and last instant (millisecond precision) of a local calendar day.
pub fn local_day_bounds(date: NaiveDate, offset: FixedOffset) -> (DateTime<Utc>, DateTime<Utc>) {
    let start_local = date.and_time(NaiveTime::default());
    // a fixed offset has no gaps or folds, so the mapping is always single
    let start = offset
        .from_local_datetime(&start_local)
        .single()
        .map(|d| d.with_timezone(&Utc))
        .unwrap_or_else(|| Utc.from_utc_datetime(&start_local));
    let end = start + Duration::days(1) - Duration::milliseconds(1);
    (start, end)
}

/// Season label used in prompts: "<year-1>/<year>" for the given instant.
/// Approximate: it ignores the competition's actual season.
pub fn season_label(now: DateTime<Utc>) -> String {
    let year = now.year();
    format!("{}/{}", year - 1, year)
}

/// Provider season parameter for competition syncs: the year the current
/// European season started (July onwards counts as the new season).
pub fn current_season_year(now: DateTime<Utc>) -> i32 {
    if now.month() >= 7 {
        now.year()
    } else {
        now.year() - 1
    }
}
