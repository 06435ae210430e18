use time::OffsetDateTime;
use time::format_description::well_known::Rfc3339;
use time::macros::format_description;

use crate::error::{CoreError, Result};

pub fn now_utc() -> OffsetDateTime {
    OffsetDateTime::now_utc()
}

/// Parse a producer-assigned event timestamp (RFC 3339 / ISO-8601 with
/// offset).
pub fn parse_timestamp(s: &str) -> Result<OffsetDateTime> {
    OffsetDateTime::parse(s, &Rfc3339)
        .map_err(|e| CoreError::invalid_timestamp(format!("failed to parse '{s}': {e}")))
}

/// `YYYY-MM-DD`, used in digest period lines.
pub fn format_date(ts: OffsetDateTime) -> String {
    ts.format(format_description!("[year]-[month]-[day]"))
        .unwrap_or_default()
}

/// `HH:MM`, used in plain digest bullets.
pub fn format_hour_minute(ts: OffsetDateTime) -> String {
    ts.format(format_description!("[hour]:[minute]"))
        .unwrap_or_default()
}

/// `YYYY-MM-DD HH:MM:SS`, used in MIME and HTML digest rows.
pub fn format_full(ts: OffsetDateTime) -> String {
    ts.format(format_description!(
        "[year]-[month]-[day] [hour]:[minute]:[second]"
    ))
    .unwrap_or_default()
}

/// Time source seam so schedulers and processors can be driven by a fake
/// clock in tests.
pub trait Clock: Send + Sync {
    fn now(&self) -> OffsetDateTime;
}

/// Wall-clock implementation used by the running service.
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> OffsetDateTime {
        OffsetDateTime::now_utc()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use time::macros::datetime;

    #[test]
    fn test_parse_timestamp_accepts_zulu_and_offsets() {
        let ts = parse_timestamp("2024-01-01T00:00:00Z").unwrap();
        assert_eq!(ts, datetime!(2024-01-01 00:00:00 UTC));

        let ts = parse_timestamp("2024-01-01T02:00:00+02:00").unwrap();
        assert_eq!(
            ts.to_offset(time::UtcOffset::UTC),
            datetime!(2024-01-01 00:00:00 UTC)
        );
    }

    #[test]
    fn test_parse_timestamp_rejects_garbage() {
        assert!(parse_timestamp("yesterday").is_err());
        assert!(parse_timestamp("2024-01-01").is_err());
        assert!(parse_timestamp("").is_err());
    }

    #[test]
    fn test_formatting_helpers() {
        let ts = datetime!(2024-03-05 07:08:09 UTC);
        assert_eq!(format_date(ts), "2024-03-05");
        assert_eq!(format_hour_minute(ts), "07:08");
        assert_eq!(format_full(ts), "2024-03-05 07:08:09");
    }

    #[test]
    fn test_system_clock_advances() {
        let clock = SystemClock;
        let a = clock.now();
        let b = clock.now();
        assert!(b >= a);
    }
}
