// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Payload minimization before delivery.
//!
//! Targets only need a small, known set of fields, so payloads are reduced to
//! an allow-list and long strings are cut down. The transformation is pure
//! and idempotent.
//!
//! # Example
//!
//! ```
//! use event_sync_engine::optimizer::{PayloadOptimizer, TRUNCATION_MARKER};
//! use serde_json::json;
//!
//! let optimizer = PayloadOptimizer::new(["symbol", "message"], 16);
//! let out = optimizer.minimize(&json!({
//!     "symbol": "BTCUSD",
//!     "message": "a rather long message body",
//!     "internal_trace": [1, 2, 3],
//! }));
//!
//! assert!(out.get("internal_trace").is_none());
//! assert!(out["message"].as_str().unwrap().ends_with(TRUNCATION_MARKER));
//! assert_eq!(optimizer.minimize(&out), out);
//! ```

use std::collections::HashSet;

use serde_json::{Map, Value};

/// Appended to strings that were cut down.
pub const TRUNCATION_MARKER: &str = "...[truncated]";

/// Fields kept when no explicit allow-list is configured.
pub const DEFAULT_ALLOWED_FIELDS: &[&str] = &[
    "id",
    "symbol",
    "action",
    "side",
    "price",
    "quantity",
    "amount",
    "pnl",
    "strategy",
    "status",
    "result",
    "message",
    "error",
    "level",
    "name",
    "value",
    "unit",
    "url",
];

/// Reduces payloads to an allow-listed field set.
#[derive(Debug, Clone)]
pub struct PayloadOptimizer {
    allowed: HashSet<String>,
    max_field_size: usize,
}

impl Default for PayloadOptimizer {
    fn default() -> Self {
        Self::new(DEFAULT_ALLOWED_FIELDS.iter().copied(), 1000)
    }
}

impl PayloadOptimizer {
    pub fn new<I, S>(allowed: I, max_field_size: usize) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            allowed: allowed.into_iter().map(Into::into).collect(),
            max_field_size,
        }
    }

    #[must_use]
    pub fn max_field_size(&self) -> usize {
        self.max_field_size
    }

    #[must_use]
    pub fn is_allowed(&self, field: &str) -> bool {
        self.allowed.contains(field)
    }

    /// Keep allow-listed top-level fields, truncating oversized strings.
    ///
    /// Non-object payloads are returned unchanged.
    #[must_use]
    pub fn minimize(&self, payload: &Value) -> Value {
        let Value::Object(fields) = payload else {
            return payload.clone();
        };

        let kept: Map<String, Value> = fields
            .iter()
            .filter(|(key, _)| self.allowed.contains(key.as_str()))
            .map(|(key, value)| (key.clone(), truncate_value(value, self.max_field_size)))
            .collect();

        Value::Object(kept)
    }
}

/// Convenience wrapper over [`PayloadOptimizer::minimize`] with the default allow-list.
#[must_use]
pub fn minimize(payload: &Value, max_field_size: usize) -> Value {
    PayloadOptimizer::new(DEFAULT_ALLOWED_FIELDS.iter().copied(), max_field_size).minimize(payload)
}

fn truncate_value(value: &Value, max_chars: usize) -> Value {
    match value {
        Value::String(s) => Value::String(truncate_str(s, max_chars)),
        Value::Array(items) => Value::Array(items.iter().map(|v| truncate_value(v, max_chars)).collect()),
        Value::Object(fields) => Value::Object(
            fields
                .iter()
                .map(|(k, v)| (k.clone(), truncate_value(v, max_chars)))
                .collect(),
        ),
        other => other.clone(),
    }
}

/// Output never exceeds `max_chars` chars, so truncating twice is a no-op.
fn truncate_str(s: &str, max_chars: usize) -> String {
    if s.chars().count() <= max_chars {
        return s.to_string();
    }
    let marker_len = TRUNCATION_MARKER.chars().count();
    if max_chars < marker_len {
        return s.chars().take(max_chars).collect();
    }
    let mut out: String = s.chars().take(max_chars - marker_len).collect();
    out.push_str(TRUNCATION_MARKER);
    out
}
