// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Metrics instrumentation for the event sync engine.
//!
//! Uses the `metrics` crate for backend-agnostic metrics collection.
//! The host process is responsible for choosing the exporter (Prometheus, OTEL, etc.)
//!
//! # Metric Naming Convention
//! - `event_sync_` prefix for all metrics
//! - `_total` suffix for counters
//! - `_seconds` suffix for duration histograms
//! - `_bytes` suffix for size histograms
//!
//! # Labels
//! - `target`: configured target name
//! - `mode`: immediate, batch, retry
//! - `status`: success, failure
//! - `outcome`: success, timeout, transport, response, serialization

use metrics::{counter, gauge, histogram};
use std::time::{Duration, Instant};

/// Record an ingested event
pub fn record_event_ingested(kind: &str) {
    counter!("event_sync_events_ingested_total", "kind" => kind.to_string()).increment(1);
}

/// Record events reaching a terminal state
pub fn record_events(target: &str, mode: &str, status: &str, count: usize) {
    counter!(
        "event_sync_events_total",
        "target" => target.to_string(),
        "mode" => mode.to_string(),
        "status" => status.to_string()
    )
    .increment(count as u64);
}

/// Record events rejected before routing (not running, bad JSON)
pub fn record_rejected(reason: &str) {
    counter!("event_sync_events_rejected_total", "reason" => reason.to_string()).increment(1);
}

/// Record how many targets an event was routed to
pub fn record_fanout(targets: usize) {
    histogram!("event_sync_routing_fanout").record(targets as f64);
}

/// Record a single HTTP attempt
pub fn record_request(target: &str, outcome: &str) {
    counter!(
        "event_sync_requests_total",
        "target" => target.to_string(),
        "outcome" => outcome.to_string()
    )
    .increment(1);
}

/// Record request latency
pub fn record_latency(target: &str, duration: Duration) {
    histogram!("event_sync_request_seconds", "target" => target.to_string())
        .record(duration.as_secs_f64());
}

/// Record bytes put on the wire
pub fn record_bytes_sent(target: &str, bytes: usize) {
    histogram!("event_sync_request_bytes", "target" => target.to_string()).record(bytes as f64);
}

/// Record a compression ratio (original / compressed)
pub fn record_compression_ratio(target: &str, ratio: f64) {
    histogram!("event_sync_compression_ratio", "target" => target.to_string()).record(ratio);
}

/// Record a batch flush
pub fn record_batch_flush(reason: &str, size: usize) {
    counter!("event_sync_batches_flushed_total", "reason" => reason.to_string()).increment(1);
    histogram!("event_sync_batch_size").record(size as f64);
}

/// Record a retry being queued
pub fn record_retry_scheduled(target: &str, attempt: u32) {
    counter!("event_sync_retries_scheduled_total", "target" => target.to_string()).increment(1);
    histogram!("event_sync_retry_attempt").record(f64::from(attempt));
}

/// Record a delivery moved to the dead letter queue
pub fn record_dead_letter(target: &str, events: usize) {
    counter!("event_sync_dead_letters_total", "target" => target.to_string()).increment(1);
    counter!("event_sync_dead_letter_events_total", "target" => target.to_string())
        .increment(events as u64);
}

/// Set retry queue depth
pub fn set_retry_queue_depth(depth: usize) {
    gauge!("event_sync_retry_queue_depth").set(depth as f64);
}

/// Set events waiting in open batches
pub fn set_pending_batch_events(count: usize) {
    gauge!("event_sync_pending_batch_events").set(count as f64);
}

/// Set requests currently in flight
pub fn set_in_flight_sends(count: usize) {
    gauge!("event_sync_in_flight_sends").set(count as f64);
}

/// Record orchestrator state transitions
pub fn set_orchestrator_state(state: &str) {
    counter!("event_sync_state_transitions_total", "state" => state.to_string()).increment(1);
}

/// Record shutdown drain time
pub fn record_shutdown_duration(duration: Duration) {
    histogram!("event_sync_shutdown_seconds").record(duration.as_secs_f64());
}

/// A timing guard that records request latency on drop
pub struct LatencyTimer {
    target: String,
    start: Instant,
}

impl LatencyTimer {
    /// Start a new latency timer
    pub fn new(target: &str) -> Self {
        Self {
            target: target.to_string(),
            start: Instant::now(),
        }
    }
}

impl Drop for LatencyTimer {
    fn drop(&mut self) {
        record_latency(&self.target, self.start.elapsed());
    }
}
