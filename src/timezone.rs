//! §4.A Timezone & Time Arithmetic.
//!
//! Pure, allocation-light day-boundary math in a named IANA zone. Called on
//! every admission check, so `dayBounds` avoids anything heavier than a
//! `chrono_tz::Tz` lookup (itself a cheap table index, not a parse).

use chrono::{DateTime, NaiveDate, TimeZone, Utc};
use chrono_tz::Tz;

/// `[utcStart, utcEnd)` for the local calendar date that `instant` falls on
/// in `zone`, plus the local date string (`YYYY-MM-DD`) for audit messages.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DayBounds {
    pub utc_start: DateTime<Utc>,
    pub utc_end: DateTime<Utc>,
    pub local_date: NaiveDate,
}

impl DayBounds {
    pub fn local_date_string(&self) -> String {
        self.local_date.format("%Y-%m-%d").to_string()
    }
}

/// Resolve an IANA zone string, falling back to `UTC` for unknown zones.
///
/// Per §4.A this fallback happens "never at this layer" for the pure
/// [`day_bounds`] function -- callers resolve the zone once (typically from
/// a user record) via [`resolve_zone`] before calling it.
pub fn resolve_zone(zone: &str) -> Tz {
    zone.parse().unwrap_or(Tz::UTC)
}

/// `true` if `zone` parses as a known IANA timezone name.
pub fn is_valid_zone(zone: &str) -> bool {
    zone.parse::<Tz>().is_ok()
}

/// Compute `[startOfDay, endOfDay)` in UTC for the local calendar date that
/// `instant` falls on in `zone`.
///
/// `utc_end` is exclusive. DST transitions can make a local midnight
/// ambiguous (falls twice, e.g. a "fall back") or nonexistent (a "spring
/// forward" skips it); both cases are resolved without panicking:
/// - Ambiguous: the earlier of the two candidate instants is used.
/// - Nonexistent: the first valid instant at or after local midnight is
///   used, found by probing forward in one-minute steps up to two hours
///   (comfortably more than any real UTC-offset DST jump).
pub fn day_bounds(instant: DateTime<Utc>, zone: Tz) -> DayBounds {
    let local_date = instant.with_timezone(&zone).date_naive();
    let utc_start = local_midnight_to_utc(local_date, zone);
    let next_date = local_date.succ_opt().expect("chrono date range far exceeds any real calendar date");
    let utc_end = local_midnight_to_utc(next_date, zone);
    DayBounds { utc_start, utc_end, local_date }
}

/// Convert a local midnight on `date` in `zone` to the corresponding UTC
/// instant, handling DST-ambiguous and DST-skipped midnights.
fn local_midnight_to_utc(date: NaiveDate, zone: Tz) -> DateTime<Utc> {
    let naive_midnight = date.and_hms_opt(0, 0, 0).expect("00:00:00 is always a valid time");
    match zone.from_local_datetime(&naive_midnight) {
        chrono::LocalResult::Single(dt) => dt.with_timezone(&Utc),
        chrono::LocalResult::Ambiguous(earlier, _later) => earlier.with_timezone(&Utc),
        chrono::LocalResult::None => probe_forward_for_valid_instant(naive_midnight, zone),
    }
}

/// Local midnight doesn't exist (a DST "spring forward" skipped it); probe
/// forward in one-minute steps until a valid local instant is found.
fn probe_forward_for_valid_instant(start: chrono::NaiveDateTime, zone: Tz) -> DateTime<Utc> {
    for minutes in 1..=120 {
        let candidate = start + chrono::Duration::minutes(minutes);
        if let chrono::LocalResult::Single(dt) = zone.from_local_datetime(&candidate) {
            return dt.with_timezone(&Utc);
        }
    }
    // Exhausted a generous 2-hour search window; every real-world DST jump
    // is under an hour. Fall back to interpreting the naive time as UTC
    // rather than panicking on admission-critical code.
    Utc.from_utc_datetime(&start)
}

/// Format an instant in `zone` for audit/log messages, e.g. `2025-03-10 14:00 EAT`.
pub fn format_in_zone(instant: DateTime<Utc>, zone: Tz) -> String {
    instant.with_timezone(&zone).format("%Y-%m-%d %H:%M %Z").to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn utc(y: i32, m: u32, d: u32, h: u32, mi: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(y, m, d, h, mi, 0).unwrap()
    }

    #[test]
    fn resolve_zone_falls_back_to_utc() {
        assert_eq!(resolve_zone("Not/AZone"), Tz::UTC);
        assert_eq!(resolve_zone("Africa/Nairobi"), Tz::Africa__Nairobi);
    }

    #[test]
    fn is_valid_zone_checks_parse() {
        assert!(is_valid_zone("Africa/Nairobi"));
        assert!(!is_valid_zone("Moon/Base1"));
    }

    #[test]
    fn day_bounds_utc_is_midnight_to_midnight() {
        let instant = utc(2025, 3, 10, 14, 0);
        let bounds = day_bounds(instant, Tz::UTC);
        assert_eq!(bounds.utc_start, utc(2025, 3, 10, 0, 0));
        assert_eq!(bounds.utc_end, utc(2025, 3, 11, 0, 0));
        assert_eq!(bounds.local_date_string(), "2025-03-10");
    }

    #[test]
    fn day_bounds_nairobi_offset() {
        // Africa/Nairobi is UTC+3 with no DST.
        let instant = utc(2025, 3, 10, 14, 0);
        let bounds = day_bounds(instant, Tz::Africa__Nairobi);
        assert_eq!(bounds.utc_start, utc(2025, 3, 9, 21, 0));
        assert_eq!(bounds.utc_end, utc(2025, 3, 10, 21, 0));
    }

    #[test]
    fn day_bounds_pacific_auckland_crosses_utc_day() {
        // Pacific/Auckland NZDT is UTC+13 in June (southern winter DST).
        // An existing meeting at 2025-06-14T22:00:00Z is local 11:00 on 06-15.
        let existing = utc(2025, 6, 14, 22, 0);
        let bounds = day_bounds(existing, Tz::Pacific__Auckland);
        assert_eq!(bounds.local_date_string(), "2025-06-15");

        // A later instant, 2025-06-15T08:00:00Z, is local 20:00 on the same day.
        let later = utc(2025, 6, 15, 8, 0);
        let later_bounds = day_bounds(later, Tz::Pacific__Auckland);
        assert_eq!(later_bounds.local_date_string(), "2025-06-15");
        assert_eq!(bounds.utc_start, later_bounds.utc_start);
        assert_eq!(bounds.utc_end, later_bounds.utc_end);
    }

    #[test]
    fn day_bounds_handles_spring_forward_without_panicking() {
        // America/Santiago DST transitions; just assert this never panics
        // and produces a monotonically increasing window for a range of days.
        for day in 1..=28u32 {
            let instant = utc(2025, 9, day, 12, 0);
            let bounds = day_bounds(instant, Tz::America__Santiago);
            assert!(bounds.utc_start < bounds.utc_end);
        }
    }

    #[test]
    fn day_bounds_lord_howe_half_hour_dst() {
        // Australia/Lord_Howe uses a 30-minute DST offset, an edge case for
        // naive "add one hour" DST handling.
        for day in 1..=10u32 {
            let instant = utc(2025, 10, day, 12, 0);
            let bounds = day_bounds(instant, Tz::Australia__Lord_Howe);
            assert!(bounds.utc_start < bounds.utc_end);
        }
    }

    #[test]
    fn day_bounds_chatham_45_minute_offset() {
        // Pacific/Chatham is UTC+12:45 / +13:45, an unusual non-hour offset.
        let instant = utc(2025, 4, 5, 10, 0);
        let bounds = day_bounds(instant, Tz::Pacific__Chatham);
        assert!(bounds.utc_start < bounds.utc_end);
        assert_eq!((bounds.utc_end - bounds.utc_start).num_hours(), 24);
    }
}
