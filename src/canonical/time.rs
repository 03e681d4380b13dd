//! UTC timestamp canonicalization and hour bucketing.

use chrono::{DateTime, SecondsFormat, Timelike, Utc};

use crate::error::{CoreError, CoreResult};

/// Render a timestamp as RFC-3339 UTC with a trailing `Z` (never
/// `+00:00`). Subseconds are emitted as six digits only when non-zero.
pub fn normalize_timestamp(ts: DateTime<Utc>) -> String {
    if ts.timestamp_subsec_nanos() == 0 {
        ts.format("%Y-%m-%dT%H:%M:%SZ").to_string()
    } else {
        ts.to_rfc3339_opts(SecondsFormat::Micros, true)
    }
}

/// Parse an RFC-3339 timestamp (any offset) and normalize to UTC.
pub fn parse_timestamp(value: &str) -> CoreResult<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(value.trim())
        .map(|ts| ts.with_timezone(&Utc))
        .map_err(|err| CoreError::InvariantViolation(format!("invalid timestamp {value:?}: {err}")))
}

/// Truncate a timestamp to its containing hour.
pub fn hour_floor(ts: DateTime<Utc>) -> DateTime<Utc> {
    ts.with_minute(0)
        .and_then(|t| t.with_second(0))
        .and_then(|t| t.with_nanosecond(0))
        .expect("hour truncation is always representable")
}

/// True when the timestamp is exactly on an hour boundary.
pub fn is_hour_aligned(ts: DateTime<Utc>) -> bool {
    hour_floor(ts) == ts
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn renders_z_suffix_without_subseconds() {
        let ts = Utc.with_ymd_and_hms(2026, 1, 1, 4, 0, 0).unwrap();
        assert_eq!(normalize_timestamp(ts), "2026-01-01T04:00:00Z");
    }

    #[test]
    fn renders_micros_when_present() {
        let ts = Utc
            .with_ymd_and_hms(2026, 1, 1, 4, 0, 0)
            .unwrap()
            .checked_add_signed(chrono::Duration::microseconds(1500))
            .unwrap();
        assert_eq!(normalize_timestamp(ts), "2026-01-01T04:00:00.001500Z");
    }

    #[test]
    fn parse_normalizes_offsets_to_utc() {
        let ts = parse_timestamp("2026-01-01T06:00:00+02:00").unwrap();
        assert_eq!(normalize_timestamp(ts), "2026-01-01T04:00:00Z");
    }

    #[test]
    fn hour_floor_truncates() {
        let ts = Utc.with_ymd_and_hms(2026, 1, 1, 4, 59, 59).unwrap();
        assert_eq!(
            normalize_timestamp(hour_floor(ts)),
            "2026-01-01T04:00:00Z"
        );
        assert!(!is_hour_aligned(ts));
        assert!(is_hour_aligned(hour_floor(ts)));
    }
}
