// SPDX-License-Identifier: Apache-2.0 OR MIT
// SPDX-FileCopyrightText: 2025 Russ Fellows <russ.fellows@gmail.com>

//! Core types for query-history replay
//!
//! These types represent the records read from a cluster's query log and the
//! outcome of replaying each of them against a target cluster.

use chrono::{DateTime, NaiveDate, NaiveDateTime, SecondsFormat, TimeZone, Utc};
use std::fmt;

use super::error::ReplayError;

/// One completed top-level query read from `system.query_log`
///
/// Immutable once read. Sequences of these are ordered by `original_start`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HistoricalQuery {
    /// Query kind as logged by the server (e.g. "Select")
    pub kind: String,

    /// Full query text
    pub text: String,

    /// When the query originally started (microsecond precision)
    pub original_start: DateTime<Utc>,

    /// How long the query originally took
    pub original_duration_ms: u64,
}

/// Outcome of replaying one [`HistoricalQuery`] against the target cluster
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReplayResult {
    pub kind: String,
    pub text: String,
    pub original_start: DateTime<Utc>,
    pub original_duration_ms: u64,

    /// Wall-clock time the worker started executing the query
    pub replay_start: DateTime<Utc>,

    /// Measured execution time on the target
    pub replay_duration_ms: u64,

    /// `original_duration_ms - replay_duration_ms`; negative means the replay was slower
    pub delta_ms: i64,

    pub errored: bool,

    /// Empty unless `errored`
    pub error_message: String,
}

impl ReplayResult {
    /// Build a result from the replayed query and its measured execution.
    pub fn new(
        query: HistoricalQuery,
        replay_start: DateTime<Utc>,
        replay_duration_ms: u64,
        error: Option<String>,
    ) -> Self {
        let delta_ms = duration_delta_ms(query.original_duration_ms, replay_duration_ms);
        let (errored, error_message) = match error {
            Some(msg) => (true, msg),
            None => (false, String::new()),
        };
        Self {
            kind: query.kind,
            text: query.text,
            original_start: query.original_start,
            original_duration_ms: query.original_duration_ms,
            replay_start,
            replay_duration_ms,
            delta_ms,
            errored,
            error_message,
        }
    }
}

/// Signed difference between the original and the replayed duration.
pub fn duration_delta_ms(original_ms: u64, replay_ms: u64) -> i64 {
    let original = i64::try_from(original_ms).unwrap_or(i64::MAX);
    let replay = i64::try_from(replay_ms).unwrap_or(i64::MAX);
    original.saturating_sub(replay)
}

/// Format a timestamp the way every file written by the replay does:
/// RFC 3339 with nanoseconds and a `Z` suffix.
pub fn format_timestamp(ts: &DateTime<Utc>) -> String {
    ts.to_rfc3339_opts(SecondsFormat::Nanos, true)
}

/// Parse a timestamp written by [`format_timestamp`] (any RFC 3339 offset is accepted).
pub fn parse_timestamp(s: &str) -> Result<DateTime<Utc>, chrono::ParseError> {
    DateTime::parse_from_rfc3339(s).map(|dt| dt.with_timezone(&Utc))
}

/// Inclusive time window of the query log to replay
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TimeWindow {
    pub start: DateTime<Utc>,
    pub stop: DateTime<Utc>,
}

impl TimeWindow {
    pub fn new(start: DateTime<Utc>, stop: DateTime<Utc>) -> Result<Self, ReplayError> {
        if stop < start {
            return Err(ReplayError::InvalidWindow(format!(
                "stop {} is before start {}",
                stop, start
            )));
        }
        Ok(Self { start, stop })
    }

    /// Parse both bounds from `YYYY-MM-DD` or `YYYY-MM-DD HH:MM:SS` text.
    pub fn parse(start: &str, stop: &str) -> Result<Self, ReplayError> {
        Self::new(parse_window_bound(start)?, parse_window_bound(stop)?)
    }

    /// Start bound as passed to the server's `{start:String}` parameter
    pub fn start_param(&self) -> String {
        self.start.format(WINDOW_PARAM_FORMAT).to_string()
    }

    /// Stop bound as passed to the server's `{stop:String}` parameter
    pub fn stop_param(&self) -> String {
        self.stop.format(WINDOW_PARAM_FORMAT).to_string()
    }
}

impl fmt::Display for TimeWindow {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} .. {}", self.start_param(), self.stop_param())
    }
}

const WINDOW_PARAM_FORMAT: &str = "%Y-%m-%d %H:%M:%S";

/// Parse a single window bound. A bare date means midnight UTC.
pub fn parse_window_bound(s: &str) -> Result<DateTime<Utc>, ReplayError> {
    let s = s.trim();
    for fmt in ["%Y-%m-%d %H:%M:%S", "%Y-%m-%dT%H:%M:%S"] {
        if let Ok(naive) = NaiveDateTime::parse_from_str(s, fmt) {
            return Ok(Utc.from_utc_datetime(&naive));
        }
    }
    NaiveDate::parse_from_str(s, "%Y-%m-%d")
        .ok()
        .and_then(|d| d.and_hms_opt(0, 0, 0))
        .map(|naive| Utc.from_utc_datetime(&naive))
        .ok_or_else(|| {
            ReplayError::InvalidWindow(format!(
                "cannot parse '{}', expected YYYY-MM-DD or YYYY-MM-DD HH:MM:SS",
                s
            ))
        })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn query(duration_ms: u64) -> HistoricalQuery {
        HistoricalQuery {
            kind: "Select".to_string(),
            text: "SELECT 1".to_string(),
            original_start: Utc.with_ymd_and_hms(2024, 1, 15, 10, 30, 0).unwrap(),
            original_duration_ms: duration_ms,
        }
    }

    #[test]
    fn test_delta_is_original_minus_replay() {
        let result = ReplayResult::new(query(500), Utc::now(), 700, None);
        assert_eq!(result.delta_ms, -200);
        assert!(!result.errored);
        assert!(result.error_message.is_empty());

        let faster = ReplayResult::new(query(500), Utc::now(), 120, None);
        assert_eq!(faster.delta_ms, 380);
    }

    #[test]
    fn test_error_is_recorded() {
        let result = ReplayResult::new(query(10), Utc::now(), 3, Some("Code: 60. Table missing".into()));
        assert!(result.errored);
        assert_eq!(result.error_message, "Code: 60. Table missing");
    }

    #[test]
    fn test_delta_saturates() {
        assert_eq!(duration_delta_ms(u64::MAX, 0), i64::MAX);
        assert_eq!(duration_delta_ms(0, u64::MAX), -i64::MAX);
    }

    #[test]
    fn test_window_parsing() {
        let w = TimeWindow::parse("2024-01-15", "2024-01-16 12:30:00").unwrap();
        assert_eq!(w.start_param(), "2024-01-15 00:00:00");
        assert_eq!(w.stop_param(), "2024-01-16 12:30:00");

        let w = TimeWindow::parse("2024-01-15T01:02:03", "2024-01-15T04:05:06").unwrap();
        assert_eq!(w.start_param(), "2024-01-15 01:02:03");

        assert!(TimeWindow::parse("2024-01-16", "2024-01-15").is_err());
        assert!(TimeWindow::parse("15/01/2024", "2024-01-16").is_err());
    }

    #[test]
    fn test_timestamp_format() {
        let ts = Utc.with_ymd_and_hms(2024, 1, 15, 10, 30, 45).unwrap()
            + chrono::Duration::microseconds(123_456);
        let text = format_timestamp(&ts);
        assert_eq!(text, "2024-01-15T10:30:45.123456000Z");
        assert_eq!(parse_timestamp(&text).unwrap(), ts);
    }
}
