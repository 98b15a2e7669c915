//! Calendar bucketing utilities. Keys are always derived from the *local*
//! calendar of the datetime they are given; callers convert instants into
//! the zone they aggregate in before asking for a key.

use std::fmt::Display;

use chrono::{DateTime, Datelike, Duration, NaiveDate, TimeZone, Timelike};

/// `YYYY-MM-DD` of the datetime's own calendar day.
pub fn day_key<Tz: TimeZone>(t: &DateTime<Tz>) -> String
where
    Tz::Offset: Display,
{
    t.format("%Y-%m-%d").to_string()
}

/// `"{H}h {D}/{M}"` with no leading zeros, e.g. `"14h 5/3"`. Only used for
/// same-day/near-term bucketing, so month rollover ambiguity is acceptable.
pub fn hour_key<Tz: TimeZone>(t: &DateTime<Tz>) -> String {
    format!("{}h {}/{}", t.hour(), t.day(), t.month())
}

/// `[local midnight, next local midnight)` for the given calendar day.
/// Returns `None` when midnight falls into a DST gap with no resolution.
pub fn day_window<Tz: TimeZone>(tz: &Tz, date: NaiveDate) -> Option<(DateTime<Tz>, DateTime<Tz>)> {
    let start = tz
        .from_local_datetime(&date.and_hms_opt(0, 0, 0)?)
        .earliest()?;
    let end = tz
        .from_local_datetime(&date.succ_opt()?.and_hms_opt(0, 0, 0)?)
        .earliest()?;
    Some((start, end))
}

/// `[start of hour, start + 1h)` for the given local day and hour.
pub fn hour_window<Tz: TimeZone>(
    tz: &Tz,
    date: NaiveDate,
    hour: u32,
) -> Option<(DateTime<Tz>, DateTime<Tz>)> {
    let start = tz
        .from_local_datetime(&date.and_hms_opt(hour, 0, 0)?)
        .earliest()?;
    let end = start.clone() + Duration::hours(1);
    Some((start, end))
}

/// Inclusive sequence of calendar days from `from` to `to`.
pub fn day_sequence(from: NaiveDate, to: NaiveDate) -> Vec<NaiveDate> {
    let mut days = Vec::new();
    let mut day = from;
    while day <= to {
        days.push(day);
        match day.succ_opt() {
            Some(next) => day = next,
            None => break,
        }
    }
    days
}

pub fn days_ago<Tz: TimeZone>(now: &DateTime<Tz>, days: i64) -> DateTime<Tz> {
    now.clone() - Duration::days(days)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{FixedOffset, Utc};

    #[test]
    fn same_local_day_maps_to_same_key() {
        let morning = Utc.with_ymd_and_hms(2024, 1, 15, 0, 0, 1).unwrap();
        let night = Utc.with_ymd_and_hms(2024, 1, 15, 23, 59, 59).unwrap();
        assert_eq!(day_key(&morning), day_key(&night));
        assert_eq!(day_key(&morning), "2024-01-15");

        let next_day = Utc.with_ymd_and_hms(2024, 1, 16, 0, 0, 0).unwrap();
        assert_ne!(day_key(&morning), day_key(&next_day));
    }

    #[test]
    fn day_key_respects_the_given_zone() {
        // 23:30 UTC on the 15th is already the 16th at UTC+2.
        let instant = Utc.with_ymd_and_hms(2024, 1, 15, 23, 30, 0).unwrap();
        let plus_two = FixedOffset::east_opt(2 * 3600).unwrap();
        assert_eq!(day_key(&instant), "2024-01-15");
        assert_eq!(day_key(&instant.with_timezone(&plus_two)), "2024-01-16");
    }

    #[test]
    fn hour_key_has_no_leading_zeros() {
        let t = Utc.with_ymd_and_hms(2024, 3, 5, 9, 15, 30).unwrap();
        assert_eq!(hour_key(&t), "9h 5/3");

        let t = Utc.with_ymd_and_hms(2024, 1, 15, 14, 30, 45).unwrap();
        assert_eq!(hour_key(&t), "14h 15/1");
    }

    #[test]
    fn same_clock_hour_shares_a_key() {
        let a = Utc.with_ymd_and_hms(2024, 1, 15, 14, 0, 0).unwrap();
        let b = Utc.with_ymd_and_hms(2024, 1, 15, 14, 59, 59).unwrap();
        assert_eq!(hour_key(&a), hour_key(&b));
    }

    #[test]
    fn hour_window_is_half_open() {
        let date = NaiveDate::from_ymd_opt(2024, 1, 15).unwrap();
        let (start, end) = hour_window(&Utc, date, 14).unwrap();
        assert_eq!(start, Utc.with_ymd_and_hms(2024, 1, 15, 14, 0, 0).unwrap());
        assert_eq!(end, Utc.with_ymd_and_hms(2024, 1, 15, 15, 0, 0).unwrap());
    }

    #[test]
    fn day_window_spans_one_day() {
        let date = NaiveDate::from_ymd_opt(2024, 1, 15).unwrap();
        let (start, end) = day_window(&Utc, date).unwrap();
        assert_eq!(start, Utc.with_ymd_and_hms(2024, 1, 15, 0, 0, 0).unwrap());
        assert_eq!(end, Utc.with_ymd_and_hms(2024, 1, 16, 0, 0, 0).unwrap());
    }

    #[test]
    fn days_ago_steps_back_whole_days() {
        let now = Utc.with_ymd_and_hms(2024, 1, 15, 12, 30, 0).unwrap();
        assert_eq!(
            days_ago(&now, 7),
            Utc.with_ymd_and_hms(2024, 1, 8, 12, 30, 0).unwrap()
        );
        assert_eq!(days_ago(&now, 0), now);
    }

    #[test]
    fn day_sequence_is_inclusive() {
        let from = NaiveDate::from_ymd_opt(2024, 1, 13).unwrap();
        let to = NaiveDate::from_ymd_opt(2024, 1, 15).unwrap();
        let days = day_sequence(from, to);
        assert_eq!(days.len(), 3);
        assert_eq!(days[0], from);
        assert_eq!(days[2], to);
        assert_eq!(day_sequence(to, from), Vec::<NaiveDate>::new());
    }
}
