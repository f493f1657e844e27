//! RFC3339-nanosecond timestamp helpers. The signing protocol is anchored to
//! wall-clock time (a documented trade-off); the 5 minute skew window is
//! deliberate and must not be widened silently.

use chrono::{DateTime, SecondsFormat, Utc};

use crate::error::CoreError;

pub const MAX_CLOCK_SKEW_SECS: i64 = 5 * 60;

/// Renders "now" in UTC as RFC3339 with nanosecond precision, matching the
/// Go reference's `time.Now().UTC().Format(time.RFC3339Nano)`.
pub fn now_rfc3339_nano() -> String {
    Utc::now().to_rfc3339_opts(SecondsFormat::Nanos, true)
}

/// Parses an RFC3339 timestamp, accepting both nanosecond and second
/// precision (the Go reference's `signature.go` only ever parsed
/// `time.RFC3339`; the websocket heartbeat path additionally falls back from
/// `RFC3339Nano` to plain `RFC3339`). We accept either on both paths since
/// they are the same grammar with a different number of fractional digits.
pub fn parse_rfc3339(raw: &str) -> Result<DateTime<Utc>, CoreError> {
    DateTime::parse_from_rfc3339(raw)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| CoreError::BadTimestamp(e.to_string()))
}

/// True if `ts` is within `MAX_CLOCK_SKEW_SECS` of now, in either direction.
pub fn within_skew(ts: DateTime<Utc>) -> bool {
    let delta = (Utc::now() - ts).num_seconds().abs();
    delta <= MAX_CLOCK_SKEW_SECS
}

pub fn assert_within_skew(raw_ts: &str) -> Result<DateTime<Utc>, CoreError> {
    let ts = parse_rfc3339(raw_ts)?;
    if !within_skew(ts) {
        return Err(CoreError::ClockSkew);
    }
    Ok(ts)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    #[test]
    fn round_trips_current_time() {
        let s = now_rfc3339_nano();
        let parsed = parse_rfc3339(&s).expect("parses");
        assert!(within_skew(parsed));
    }

    #[test]
    fn rejects_stale_timestamp() {
        let ten_minutes_ago = Utc::now() - Duration::minutes(10);
        let s = ten_minutes_ago.to_rfc3339_opts(SecondsFormat::Nanos, true);
        let err = assert_within_skew(&s).unwrap_err();
        assert!(matches!(err, CoreError::ClockSkew));
    }

    #[test]
    fn rejects_future_timestamp() {
        let ten_minutes_ahead = Utc::now() + Duration::minutes(10);
        let s = ten_minutes_ahead.to_rfc3339_opts(SecondsFormat::Nanos, true);
        let err = assert_within_skew(&s).unwrap_err();
        assert!(matches!(err, CoreError::ClockSkew));
    }

    #[test]
    fn accepts_second_precision() {
        let s = Utc::now().to_rfc3339_opts(SecondsFormat::Secs, true);
        assert!(assert_within_skew(&s).is_ok());
    }
}
