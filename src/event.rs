// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Event data structure.
//!
//! An [`Event`] is the unit of work that flows through the engine: producers
//! create one per execution result, alert or signal, and the orchestrator
//! delivers it to every routed target.
//!
//! # Example
//!
//! ```
//! use event_sync_engine::{Event, EventKind, Severity};
//! use serde_json::json;
//!
//! let event = Event::new(EventKind::Alert, "risk", json!({"message": "drawdown"}))
//!     .with_severity(Severity::Critical)
//!     .with_priority(42);
//!
//! assert_eq!(event.priority, 10); // clamped
//! assert!(event.should_retry());
//! ```

use std::fmt;

use chrono::{DateTime, SecondsFormat, Utc};
use serde::{Deserialize, Deserializer, Serialize};
use serde_json::{json, Map, Value};

/// Highest priority an event may carry.
pub const MAX_PRIORITY: u8 = 10;

/// Kind of event, as carried in the `event_type` wire field.
///
/// Unknown type strings are kept, lowercased, as [`EventKind::Custom`].
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum EventKind {
    /// Trade or command execution result
    Execution,
    /// Trading signal
    Signal,
    /// Operational alert
    Alert,
    /// Error report
    Error,
    /// Status/heartbeat update
    Status,
    /// Numeric metric sample
    Metric,
    /// Generated report
    Report,
    /// Any other producer-defined type
    Custom(String),
}

impl EventKind {
    #[must_use]
    pub fn as_str(&self) -> &str {
        match self {
            Self::Execution => "execution",
            Self::Signal => "signal",
            Self::Alert => "alert",
            Self::Error => "error",
            Self::Status => "status",
            Self::Metric => "metric",
            Self::Report => "report",
            Self::Custom(s) => s,
        }
    }
}

impl From<String> for EventKind {
    fn from(s: String) -> Self {
        let lower = s.to_ascii_lowercase();
        match lower.as_str() {
            "execution" => Self::Execution,
            "signal" => Self::Signal,
            "alert" => Self::Alert,
            "error" => Self::Error,
            "status" => Self::Status,
            "metric" => Self::Metric,
            "report" => Self::Report,
            _ => Self::Custom(lower),
        }
    }
}

impl From<&str> for EventKind {
    fn from(s: &str) -> Self {
        Self::from(s.to_string())
    }
}

impl From<EventKind> for String {
    fn from(kind: EventKind) -> Self {
        kind.as_str().to_string()
    }
}

impl fmt::Display for EventKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Event severity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    Low,
    #[default]
    Medium,
    High,
    Critical,
}

impl fmt::Display for Severity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Low => write!(f, "low"),
            Self::Medium => write!(f, "medium"),
            Self::High => write!(f, "high"),
            Self::Critical => write!(f, "critical"),
        }
    }
}

/// A unit of information submitted for delivery.
///
/// Everything except `retry_count` is fixed once the event is handed to the
/// engine. The JSON field names follow the inbound wire shape.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Event {
    #[serde(rename = "event_type")]
    pub kind: EventKind,
    pub source: String,
    #[serde(rename = "timestamp", default = "Utc::now")]
    pub occurred_at: DateTime<Utc>,
    #[serde(rename = "data", default = "empty_payload")]
    pub payload: Value,
    #[serde(default, deserialize_with = "deserialize_priority")]
    pub priority: u8,
    #[serde(default)]
    pub severity: Severity,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub batch_key: Option<String>,
    /// Delivery retries already performed
    #[serde(skip)]
    pub retry_count: u32,
    /// `None` until the orchestrator applies its configured default
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_retries: Option<u32>,
}

fn empty_payload() -> Value {
    Value::Object(Map::new())
}

fn deserialize_priority<'de, D>(deserializer: D) -> Result<u8, D::Error>
where
    D: Deserializer<'de>,
{
    let raw = i64::deserialize(deserializer)?;
    Ok(raw.clamp(0, MAX_PRIORITY as i64) as u8)
}

impl Event {
    /// Create an event stamped with the current time.
    pub fn new(kind: impl Into<EventKind>, source: impl Into<String>, payload: Value) -> Self {
        Self {
            kind: kind.into(),
            source: source.into(),
            occurred_at: Utc::now(),
            payload,
            priority: 0,
            severity: Severity::default(),
            batch_key: None,
            retry_count: 0,
            max_retries: None,
        }
    }

    /// Parse the inbound JSON shape.
    pub fn from_json(raw: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(raw)
    }

    #[must_use]
    pub fn with_priority(mut self, priority: u8) -> Self {
        self.priority = priority.min(MAX_PRIORITY);
        self
    }

    #[must_use]
    pub fn with_severity(mut self, severity: Severity) -> Self {
        self.severity = severity;
        self
    }

    #[must_use]
    pub fn with_batch_key(mut self, key: impl Into<String>) -> Self {
        self.batch_key = Some(key.into());
        self
    }

    #[must_use]
    pub fn with_max_retries(mut self, max_retries: u32) -> Self {
        self.max_retries = Some(max_retries);
        self
    }

    #[must_use]
    pub fn with_occurred_at(mut self, at: DateTime<Utc>) -> Self {
        self.occurred_at = at;
        self
    }

    /// Retry budget, treating an unset budget as zero.
    #[must_use]
    pub fn retry_budget(&self) -> u32 {
        self.max_retries.unwrap_or(0)
    }

    /// Whether another delivery attempt is allowed.
    #[must_use]
    pub fn should_retry(&self) -> bool {
        self.retry_count < self.retry_budget()
    }

    /// Key used to group this event into a batch.
    #[must_use]
    pub fn grouping_key(&self) -> &str {
        self.batch_key.as_deref().unwrap_or(&self.source)
    }

    /// Outbound JSON body for a single event.
    #[must_use]
    pub fn to_wire(&self) -> Value {
        let mut body = json!({
            "event_type": self.kind.as_str(),
            "source": self.source,
            "timestamp": self.occurred_at.to_rfc3339_opts(SecondsFormat::Millis, true),
            "data": self.payload,
            "priority": self.priority,
            "severity": self.severity.to_string(),
        });
        if let Some(ref key) = self.batch_key {
            body["batch_key"] = Value::String(key.clone());
        }
        body
    }
}

/// Outbound JSON body for a group of events sent in one request.
#[must_use]
pub fn batch_body(events: &[Event]) -> Value {
    json!({
        "batch": events.iter().map(Event::to_wire).collect::<Vec<_>>(),
        "batch_size": events.len(),
        "timestamp": Utc::now().to_rfc3339_opts(SecondsFormat::Millis, true),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_inbound_shape() {
        let raw = r#"{
            "event_type": "signal",
            "source": "trading",
            "timestamp": "2025-03-01T12:00:00Z",
            "data": {"symbol": "BTCUSD", "action": "buy"},
            "priority": 7
        }"#;

        let event = Event::from_json(raw).unwrap();
        assert_eq!(event.kind, EventKind::Signal);
        assert_eq!(event.source, "trading");
        assert_eq!(event.priority, 7);
        assert_eq!(event.severity, Severity::Medium);
        assert_eq!(event.retry_count, 0);
        assert!(event.max_retries.is_none());
        assert_eq!(event.payload["symbol"], "BTCUSD");
    }

    #[test]
    fn test_priority_is_clamped() {
        let high = Event::from_json(r#"{"event_type":"alert","source":"a","priority":99}"#).unwrap();
        assert_eq!(high.priority, 10);

        let negative = Event::from_json(r#"{"event_type":"alert","source":"a","priority":-3}"#).unwrap();
        assert_eq!(negative.priority, 0);
    }

    #[test]
    fn test_unknown_kind_is_preserved() {
        let event = Event::from_json(r#"{"event_type":"backtest_done","source":"lab"}"#).unwrap();
        assert_eq!(event.kind, EventKind::Custom("backtest_done".into()));
        assert_eq!(event.to_wire()["event_type"], "backtest_done");
    }

    #[test]
    fn test_should_retry_respects_budget() {
        let mut event = Event::new(EventKind::Error, "svc", json!({})).with_max_retries(2);
        assert!(event.should_retry());
        event.retry_count = 2;
        assert!(!event.should_retry());

        let unbudgeted = Event::new(EventKind::Error, "svc", json!({}));
        assert!(!unbudgeted.should_retry());
    }

    #[test]
    fn test_grouping_key_falls_back_to_source() {
        let event = Event::new(EventKind::Metric, "feed", json!({}));
        assert_eq!(event.grouping_key(), "feed");

        let keyed = event.with_batch_key("feed-eu");
        assert_eq!(keyed.grouping_key(), "feed-eu");
    }

    #[test]
    fn test_wire_shape() {
        let at = DateTime::parse_from_rfc3339("2025-03-01T12:00:00Z").unwrap().with_timezone(&Utc);
        let event = Event::new(EventKind::Alert, "risk", json!({"message": "x"}))
            .with_severity(Severity::Critical)
            .with_occurred_at(at);

        let wire = event.to_wire();
        assert_eq!(wire["event_type"], "alert");
        assert_eq!(wire["severity"], "critical");
        assert_eq!(wire["timestamp"], "2025-03-01T12:00:00.000Z");
        assert!(wire.get("batch_key").is_none());
    }

    #[test]
    fn test_batch_body_shape() {
        let events = vec![
            Event::new(EventKind::Metric, "feed", json!({"value": 1})),
            Event::new(EventKind::Metric, "feed", json!({"value": 2})),
        ];
        let body = batch_body(&events);
        assert_eq!(body["batch_size"], 2);
        assert_eq!(body["batch"].as_array().unwrap().len(), 2);
        assert_eq!(body["batch"][1]["data"]["value"], 2);
        assert!(body["timestamp"].is_string());
    }
}
