//! Failure classification and rolling error log
//!
//! Every failure is classified into the taxonomy in
//! [`ErrorKind`](crate::types::ErrorKind) and recorded in a bounded
//! newest-first ring buffer. The log feeds rate/trend statistics that
//! stay meaningful whether or not the failure was retried.

use chrono::{DateTime, Duration as ChronoDuration, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::collections::VecDeque;
use std::sync::Mutex;
use std::time::Duration;
use tracing::debug;

use crate::types::ErrorKind;

/// Classify a failure message into the taxonomy
///
/// Priority-ordered substring match; the first matching rule wins and
/// anything unmatched is `unknown`. Deadline wording is checked first
/// because timeout messages often also mention the connection.
pub fn classify(message: &str) -> ErrorKind {
    let msg = message.to_ascii_lowercase();

    if ["timeout", "timed out", "deadline"].iter().any(|s| msg.contains(s)) {
        ErrorKind::Timeout
    } else if ["cors", "cross-origin", "access-control-allow"].iter().any(|s| msg.contains(s)) {
        ErrorKind::Cors
    } else if ["403", "forbidden"].iter().any(|s| msg.contains(s)) {
        ErrorKind::Forbidden
    } else if ["404", "not found"].iter().any(|s| msg.contains(s)) {
        ErrorKind::NotFound
    } else if ["500", "502", "503", "504", "internal server", "bad gateway", "service unavailable"]
        .iter()
        .any(|s| msg.contains(s))
    {
        ErrorKind::Server
    } else if ["network", "dns", "connection", "connect", "refused", "reset", "unreachable", "fetch", "broken pipe"]
        .iter()
        .any(|s| msg.contains(s))
    {
        ErrorKind::Network
    } else {
        ErrorKind::Unknown
    }
}

/// Classify an HTTP response status
pub fn classify_status(status: u16) -> ErrorKind {
    match status {
        403 => ErrorKind::Forbidden,
        404 | 410 => ErrorKind::NotFound,
        408 => ErrorKind::Timeout,
        500..=599 => ErrorKind::Server,
        _ => ErrorKind::Unknown,
    }
}

/// One recorded failure
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ErrorLogEntry {
    pub timestamp: DateTime<Utc>,
    pub kind: ErrorKind,
    pub message: String,
    /// Free-form key/value context (url, route, attempt, ...)
    #[serde(default)]
    pub context: serde_json::Value,
}

/// Error-rate direction over the last two hours
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Trend {
    Increasing,
    Decreasing,
    Stable,
}

/// Aggregate view of the log
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct FaultStats {
    /// Entries currently held in the ring buffer
    pub total: usize,
    /// Entries within the requested window
    pub recent: usize,
    pub by_kind: HashMap<String, usize>,
    pub trend: Trend,
}

/// Configuration for the fault log
#[derive(Debug, Clone)]
pub struct FaultLogConfig {
    /// Ring buffer capacity (default: 200)
    pub max_entries: usize,
}

impl Default for FaultLogConfig {
    fn default() -> Self {
        Self { max_entries: 200 }
    }
}

/// Bounded newest-first failure log
pub struct FaultLog {
    entries: Mutex<VecDeque<ErrorLogEntry>>,
    max_entries: usize,
}

impl FaultLog {
    pub fn new(config: FaultLogConfig) -> Self {
        Self {
            entries: Mutex::new(VecDeque::new()),
            max_entries: config.max_entries.max(1),
        }
    }

    pub fn with_defaults() -> Self {
        Self::new(FaultLogConfig::default())
    }

    /// Record a pre-classified failure
    pub fn record(&self, kind: ErrorKind, message: impl Into<String>, context: serde_json::Value) {
        let message = message.into();
        debug!(kind = %kind, message = %message, "Fault recorded");
        self.push(ErrorLogEntry {
            timestamp: Utc::now(),
            kind,
            message,
            context,
        });
    }

    /// Classify and record in one step; returns the classification
    pub fn classify_and_record(
        &self,
        message: impl Into<String>,
        context: serde_json::Value,
    ) -> ErrorKind {
        let message = message.into();
        let kind = classify(&message);
        self.record(kind, message, context);
        kind
    }

    /// Push a complete entry, dropping the oldest on overflow
    pub fn push(&self, entry: ErrorLogEntry) {
        let mut entries = self.entries.lock().unwrap();
        entries.push_front(entry);
        while entries.len() > self.max_entries {
            entries.pop_back();
        }
    }

    /// Replace the log wholesale (restoring a persisted snapshot)
    pub fn restore(&self, snapshot: Vec<ErrorLogEntry>) {
        let mut entries = self.entries.lock().unwrap();
        entries.clear();
        for entry in snapshot.into_iter().take(self.max_entries) {
            entries.push_back(entry);
        }
    }

    /// Snapshot, newest first
    pub fn entries(&self) -> Vec<ErrorLogEntry> {
        self.entries.lock().unwrap().iter().cloned().collect()
    }

    pub fn clear(&self) {
        self.entries.lock().unwrap().clear();
    }

    pub fn len(&self) -> usize {
        self.entries.lock().unwrap().len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.lock().unwrap().is_empty()
    }

    /// Rate/trend statistics over the given recency window
    ///
    /// The trend compares the last hour against the hour before it:
    /// ≥1.5x is increasing, ≤0.5x decreasing, anything else stable.
    pub fn stats(&self, window: Duration) -> FaultStats {
        let now = Utc::now();
        let window = ChronoDuration::from_std(window).unwrap_or_else(|_| ChronoDuration::hours(1));
        let hour = ChronoDuration::hours(1);

        let entries = self.entries.lock().unwrap();
        let mut by_kind: HashMap<String, usize> = HashMap::new();
        let mut recent = 0usize;
        let mut last_hour = 0usize;
        let mut previous_hour = 0usize;

        for entry in entries.iter() {
            *by_kind.entry(entry.kind.as_str().to_string()).or_default() += 1;
            let age = now - entry.timestamp;
            if age <= window {
                recent += 1;
            }
            if age <= hour {
                last_hour += 1;
            } else if age <= hour + hour {
                previous_hour += 1;
            }
        }

        let trend = if previous_hour == 0 {
            if last_hour == 0 {
                Trend::Stable
            } else {
                Trend::Increasing
            }
        } else {
            let ratio = last_hour as f64 / previous_hour as f64;
            if ratio >= 1.5 {
                Trend::Increasing
            } else if ratio <= 0.5 {
                Trend::Decreasing
            } else {
                Trend::Stable
            }
        };

        FaultStats {
            total: entries.len(),
            recent,
            by_kind,
            trend,
        }
    }
}

impl Default for FaultLog {
    fn default() -> Self {
        Self::with_defaults()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn entry_at(minutes_ago: i64, kind: ErrorKind) -> ErrorLogEntry {
        ErrorLogEntry {
            timestamp: Utc::now() - ChronoDuration::minutes(minutes_ago),
            kind,
            message: "test".to_string(),
            context: serde_json::Value::Null,
        }
    }

    #[test]
    fn test_classification_table() {
        assert_eq!(classify("connection refused"), ErrorKind::Network);
        assert_eq!(classify("DNS resolution failed"), ErrorKind::Network);
        assert_eq!(classify("request timed out after 10s"), ErrorKind::Timeout);
        assert_eq!(classify("blocked by CORS policy"), ErrorKind::Cors);
        assert_eq!(classify("HTTP 404 not found"), ErrorKind::NotFound);
        assert_eq!(classify("HTTP 503 service unavailable"), ErrorKind::Server);
        assert_eq!(classify("HTTP 403 Forbidden"), ErrorKind::Forbidden);
        assert_eq!(classify("something exploded"), ErrorKind::Unknown);
    }

    #[test]
    fn test_timeout_wins_over_connection_wording() {
        // "connection timed out" mentions both; deadline classification
        // must win
        assert_eq!(classify("connection timed out"), ErrorKind::Timeout);
    }

    #[test]
    fn test_classify_status() {
        assert_eq!(classify_status(403), ErrorKind::Forbidden);
        assert_eq!(classify_status(404), ErrorKind::NotFound);
        assert_eq!(classify_status(500), ErrorKind::Server);
        assert_eq!(classify_status(502), ErrorKind::Server);
        assert_eq!(classify_status(418), ErrorKind::Unknown);
    }

    #[test]
    fn test_ring_buffer_caps_and_drops_oldest() {
        let log = FaultLog::new(FaultLogConfig { max_entries: 3 });
        for i in 0..5 {
            log.record(ErrorKind::Network, format!("failure {i}"), serde_json::Value::Null);
        }
        let entries = log.entries();
        assert_eq!(entries.len(), 3);
        // Newest first; oldest two dropped silently
        assert_eq!(entries[0].message, "failure 4");
        assert_eq!(entries[2].message, "failure 2");
    }

    #[test]
    fn test_stats_window_and_by_kind() {
        let log = FaultLog::with_defaults();
        log.push(entry_at(1, ErrorKind::Network));
        log.push(entry_at(5, ErrorKind::Network));
        log.push(entry_at(200, ErrorKind::Timeout));

        let stats = log.stats(Duration::from_secs(600));
        assert_eq!(stats.total, 3);
        assert_eq!(stats.recent, 2);
        assert_eq!(stats.by_kind.get("network"), Some(&2));
        assert_eq!(stats.by_kind.get("timeout"), Some(&1));
    }

    #[test]
    fn test_trend_increasing() {
        let log = FaultLog::with_defaults();
        // 3 in the last hour vs 2 the hour before: ratio 1.5
        for minutes in [5, 15, 25] {
            log.push(entry_at(minutes, ErrorKind::Network));
        }
        for minutes in [70, 80] {
            log.push(entry_at(minutes, ErrorKind::Network));
        }
        assert_eq!(log.stats(Duration::from_secs(3600)).trend, Trend::Increasing);
    }

    #[test]
    fn test_trend_decreasing() {
        let log = FaultLog::with_defaults();
        log.push(entry_at(5, ErrorKind::Network));
        for minutes in [65, 75, 85, 95] {
            log.push(entry_at(minutes, ErrorKind::Network));
        }
        assert_eq!(log.stats(Duration::from_secs(3600)).trend, Trend::Decreasing);
    }

    #[test]
    fn test_trend_stable() {
        let log = FaultLog::with_defaults();
        for minutes in [5, 15] {
            log.push(entry_at(minutes, ErrorKind::Network));
        }
        for minutes in [70, 80] {
            log.push(entry_at(minutes, ErrorKind::Network));
        }
        assert_eq!(log.stats(Duration::from_secs(3600)).trend, Trend::Stable);

        let empty = FaultLog::with_defaults();
        assert_eq!(empty.stats(Duration::from_secs(3600)).trend, Trend::Stable);
    }

    #[test]
    fn test_restore_round_trip() {
        let log = FaultLog::with_defaults();
        log.record(ErrorKind::Server, "HTTP 502", json!({"url": "https://x.test/p"}));
        log.record(ErrorKind::Timeout, "deadline", serde_json::Value::Null);

        let snapshot = log.entries();
        let json = serde_json::to_string(&snapshot).unwrap();
        assert!(json.contains(r#""kind":"server""#));

        let restored = FaultLog::with_defaults();
        restored.restore(serde_json::from_str(&json).unwrap());
        let entries = restored.entries();
        assert_eq!(entries.len(), 2);
        assert_eq!(entries[0].kind, ErrorKind::Timeout);
        assert_eq!(entries[1].kind, ErrorKind::Server);
    }
}
