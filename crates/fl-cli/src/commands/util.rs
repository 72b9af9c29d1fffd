//! Shared utilities for CLI commands.

use std::sync::LazyLock;

use anyhow::Context;
use chrono::{DateTime, Duration, FixedOffset, Local, NaiveDate, NaiveTime, Offset, Utc};
use regex::Regex;

/// Pre-compiled regex for relative time parsing.
static RELATIVE_TIME_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^(\d+)\s+(minute|hour|day|week)s?\s+ago$").expect("relative time regex is valid")
});

/// Conservative bounds for relative time parsing (~100 years in minutes).
const MAX_RELATIVE_MINUTES: i64 = 100 * 365 * 24 * 60;

/// Parse a datetime string as `now`, ISO 8601 or relative time.
///
/// Supports:
/// - ISO 8601: "2026-01-15T10:30:00Z"
/// - Relative: "2 hours ago", "30 minutes ago", "1 day ago", "1 week ago"
pub fn parse_datetime(s: &str) -> anyhow::Result<DateTime<Utc>> {
    let s = s.trim();
    if s == "now" {
        return Ok(Utc::now());
    }

    if let Ok(dt) = DateTime::parse_from_rfc3339(s) {
        return Ok(dt.with_timezone(&Utc));
    }

    let Some(caps) = RELATIVE_TIME_RE.captures(s) else {
        anyhow::bail!(
            "Invalid datetime: {s}. Use ISO 8601 (e.g., 2026-01-15T10:30:00Z) or relative (e.g., '2 hours ago')"
        );
    };

    let n: i64 = caps[1]
        .parse()
        .context("failed to parse number in relative time")?;

    let minutes_per_unit = match &caps[2] {
        "minute" => 1,
        "hour" => 60,
        "day" => 60 * 24,
        "week" => 60 * 24 * 7,
        unit => anyhow::bail!("Unknown time unit: {unit}"),
    };

    if n > MAX_RELATIVE_MINUTES / minutes_per_unit {
        anyhow::bail!("Relative time value too large: {n} {}", &caps[2]);
    }

    Ok(Utc::now() - Duration::minutes(n * minutes_per_unit))
}

/// Formats milliseconds as "Xh Ym", or "Xm" under an hour.
/// Negative durations render as "0m".
pub fn format_duration(ms: i64) -> String {
    if ms < 0 {
        return "0m".to_string();
    }
    let total_minutes = ms / 60_000;
    let hours = total_minutes / 60;
    let minutes = total_minutes % 60;

    if hours >= 1 {
        format!("{hours}h {minutes}m")
    } else {
        format!("{minutes}m")
    }
}

/// Formats a signed duration, keeping the sign.
pub fn format_signed_duration(ms: i64) -> String {
    if ms < 0 {
        format!("-{}", format_duration(-ms))
    } else {
        format!("+{}", format_duration(ms))
    }
}

/// Formats an optional value, "-" when absent.
pub fn or_dash<T: ToString>(value: Option<T>) -> String {
    value.map_or_else(|| "-".to_string(), |v| v.to_string())
}

/// The machine's current UTC offset.
pub fn local_offset() -> FixedOffset {
    Local::now().offset().fix()
}

/// The UTC instant at which a local date begins.
pub fn start_of_day(date: NaiveDate, offset: FixedOffset) -> DateTime<Utc> {
    let local = date.and_time(NaiveTime::MIN);
    (local - Duration::seconds(i64::from(offset.local_minus_utc()))).and_utc()
}

/// IANA name of the local timezone, falling back to UTC.
pub fn timezone_name() -> String {
    iana_time_zone::get_timezone().unwrap_or_else(|_| "UTC".to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_iso8601() {
        let dt = parse_datetime("2026-01-15T10:30:00Z").unwrap();
        assert_eq!(dt.to_rfc3339(), "2026-01-15T10:30:00+00:00");
    }

    #[test]
    fn test_parse_iso8601_with_offset() {
        let dt = parse_datetime("2026-01-15T12:30:00+02:00").unwrap();
        assert_eq!(dt.to_rfc3339(), "2026-01-15T10:30:00+00:00");
    }

    #[test]
    fn test_parse_relative_time() {
        let before = Utc::now();
        let dt = parse_datetime("2 hours ago").unwrap();
        let after = Utc::now();
        assert!(dt >= before - Duration::hours(2));
        assert!(dt <= after - Duration::hours(2));
    }

    #[test]
    fn test_parse_rejects_garbage() {
        let err = parse_datetime("yesterday-ish").unwrap_err();
        assert!(err.to_string().contains("Invalid datetime"));
    }

    #[test]
    fn test_parse_rejects_huge_relative_value() {
        assert!(parse_datetime("99999999 weeks ago").is_err());
    }

    #[test]
    fn test_format_duration() {
        assert_eq!(format_duration(0), "0m");
        assert_eq!(format_duration(59_999), "0m");
        assert_eq!(format_duration(45 * 60_000), "45m");
        assert_eq!(format_duration(8 * 3_600_000 + 5 * 60_000), "8h 5m");
        assert_eq!(format_duration(-1), "0m");
    }

    #[test]
    fn test_format_signed_duration() {
        assert_eq!(format_signed_duration(30 * 60_000), "+30m");
        assert_eq!(format_signed_duration(-90 * 60_000), "-1h 30m");
    }

    #[test]
    fn test_or_dash() {
        assert_eq!(or_dash(Some(1200)), "1200");
        assert_eq!(or_dash(None::<i64>), "-");
    }

    #[test]
    fn test_start_of_day_applies_offset() {
        let offset = FixedOffset::east_opt(2 * 3600).unwrap();
        let date = NaiveDate::from_ymd_opt(2025, 1, 15).unwrap();
        assert_eq!(
            start_of_day(date, offset).to_rfc3339(),
            "2025-01-14T22:00:00+00:00"
        );
    }
}
