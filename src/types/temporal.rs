use chrono::{DateTime, FixedOffset, NaiveDate, NaiveDateTime, NaiveTime, SecondsFormat, Timelike};

const DATE_FORMAT: &str = "%Y-%m-%d";
const TIME_FORMAT: &str = "%H:%M:%S%.f";
const TIMESTAMP_FORMAT: &str = "%Y-%m-%dT%H:%M:%S%.f";
const SPACED_TIMESTAMP_FORMAT: &str = "%Y-%m-%d %H:%M:%S%.f";

pub(crate) fn format_date(date: &NaiveDate) -> String {
    date.format(DATE_FORMAT).to_string()
}

pub(crate) fn format_time(time: &NaiveTime) -> String {
    time.format(TIME_FORMAT).to_string()
}

/// ISO-8601 local date-time, fractional seconds only when non-zero.
pub(crate) fn format_timestamp(ts: &NaiveDateTime) -> String {
    ts.format(TIMESTAMP_FORMAT).to_string()
}

/// RFC 3339 with an explicit numeric offset (never `Z`).
pub(crate) fn format_timestamp_tz(ts: &DateTime<FixedOffset>) -> String {
    ts.to_rfc3339_opts(SecondsFormat::AutoSi, false)
}

pub(crate) fn parse_date(s: &str) -> Option<NaiveDate> {
    let s = s.trim();
    NaiveDate::parse_from_str(s, DATE_FORMAT)
        .ok()
        .or_else(|| parse_timestamp(s).map(|ts| ts.date()))
}

pub(crate) fn parse_time(s: &str) -> Option<NaiveTime> {
    NaiveTime::parse_from_str(s.trim(), TIME_FORMAT).ok()
}

/// Accepts both the `T` and the space separated forms, and bare dates.
pub(crate) fn parse_timestamp(s: &str) -> Option<NaiveDateTime> {
    let s = s.trim();
    NaiveDateTime::parse_from_str(s, TIMESTAMP_FORMAT)
        .or_else(|_| NaiveDateTime::parse_from_str(s, SPACED_TIMESTAMP_FORMAT))
        .ok()
        .or_else(|| {
            NaiveDate::parse_from_str(s, DATE_FORMAT)
                .ok()
                .and_then(|d| d.and_hms_opt(0, 0, 0))
        })
}

/// Offset-carrying timestamps; text without an offset is taken as UTC.
pub(crate) fn parse_timestamp_tz(s: &str) -> Option<DateTime<FixedOffset>> {
    let s = s.trim();
    DateTime::parse_from_rfc3339(s)
        .or_else(|_| DateTime::parse_from_str(s, "%Y-%m-%d %H:%M:%S%.f%:z"))
        .or_else(|_| DateTime::parse_from_str(s, "%Y-%m-%d %H:%M:%S%.f%#z"))
        .ok()
        .or_else(|| parse_timestamp(s).map(|ts| ts.and_utc().fixed_offset()))
}

/// Drop sub-microsecond precision, truncating toward zero.
///
/// A leap second (nanosecond field past 999_999_999) folds into the last
/// microsecond of the second it extends.
pub(crate) fn truncate_to_micros<T: Timelike>(t: T) -> T {
    let nanos = t.nanosecond().min(999_999_999) / 1_000 * 1_000;
    t.with_nanosecond(nanos).unwrap_or(t)
}

/// Parse a column time zone: `UTC`, `Z`, or a `+HH:MM`, `+HHMM` or `+HH`
/// offset.
pub(crate) fn parse_offset(s: &str) -> Option<FixedOffset> {
    let s = s.trim();
    if s.eq_ignore_ascii_case("UTC") || s == "Z" {
        return FixedOffset::east_opt(0);
    }
    let sign = match s.as_bytes().first()? {
        b'+' => 1,
        b'-' => -1,
        _ => return None,
    };
    let rest = &s[1..];
    let (hours, minutes) = match rest.split_once(':') {
        Some(parts) => parts,
        None if rest.len() == 4 => rest.split_at(2),
        None => (rest, "0"),
    };
    let hours: i32 = hours.parse().ok()?;
    let minutes: i32 = minutes.parse().ok()?;
    if !(0..24).contains(&hours) || !(0..60).contains(&minutes) {
        return None;
    }
    FixedOffset::east_opt(sign * (hours * 3600 + minutes * 60))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn timestamp_text_forms() {
        let expected = NaiveDate::from_ymd_opt(2023, 7, 14)
            .unwrap()
            .and_hms_micro_opt(9, 15, 0, 500)
            .unwrap();

        assert_eq!(parse_timestamp("2023-07-14T09:15:00.000500"), Some(expected));
        assert_eq!(parse_timestamp("2023-07-14 09:15:00.0005"), Some(expected));
        assert_eq!(format_timestamp(&expected), "2023-07-14T09:15:00.000500");
    }

    #[test]
    fn offsets_survive_formatting() {
        let ts = parse_timestamp_tz("2023-07-14T09:15:00-05:30").unwrap();
        assert_eq!(ts.offset().local_minus_utc(), -(5 * 3600 + 30 * 60));
        assert_eq!(format_timestamp_tz(&ts), "2023-07-14T09:15:00-05:30");

        let sqlite_style = parse_timestamp_tz("2023-07-14 09:15:00+00").unwrap();
        assert_eq!(sqlite_style.offset().local_minus_utc(), 0);
    }

    #[test]
    fn dates_and_times() {
        assert_eq!(
            parse_date("2020-02-29"),
            NaiveDate::from_ymd_opt(2020, 2, 29)
        );
        assert_eq!(parse_time("23:59:59"), NaiveTime::from_hms_opt(23, 59, 59));
        assert!(parse_time("25:00:00").is_none());
    }

    #[test]
    fn sub_microseconds_are_truncated() {
        let time = NaiveTime::from_hms_nano_opt(10, 0, 0, 123_456_789).unwrap();
        assert_eq!(
            truncate_to_micros(time),
            NaiveTime::from_hms_micro_opt(10, 0, 0, 123_456).unwrap()
        );

        let leap = NaiveTime::from_hms_nano_opt(23, 59, 59, 1_500_000_000).unwrap();
        assert_eq!(
            truncate_to_micros(leap),
            NaiveTime::from_hms_micro_opt(23, 59, 59, 999_999).unwrap()
        );
    }

    #[test]
    fn column_offsets() {
        let east = |secs| FixedOffset::east_opt(secs);
        assert_eq!(parse_offset("UTC"), east(0));
        assert_eq!(parse_offset("Z"), east(0));
        assert_eq!(parse_offset("+05:45"), east(5 * 3600 + 45 * 60));
        assert_eq!(parse_offset("-0700"), east(-7 * 3600));
        assert_eq!(parse_offset("+02"), east(2 * 3600));
        assert_eq!(parse_offset("Europe/Paris"), None);
        assert_eq!(parse_offset("+25:00"), None);
    }
}
