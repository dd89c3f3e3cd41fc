//! Public types for the sync orchestrator.

use serde::Serialize;

/// Orchestrator lifecycle state.
///
/// Use [`super::SyncOrchestrator::state()`] to check current state or
/// [`super::SyncOrchestrator::state_receiver()`] to watch for changes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum OrchestratorState {
    /// Just created, not yet started
    Created,
    /// Accepting and delivering events
    Running,
    /// Flushing batches and waiting for in-flight sends
    ShuttingDown,
    /// Terminal, nothing is delivered any more
    Stopped,
}

impl std::fmt::Display for OrchestratorState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Created => write!(f, "Created"),
            Self::Running => write!(f, "Running"),
            Self::ShuttingDown => write!(f, "ShuttingDown"),
            Self::Stopped => write!(f, "Stopped"),
        }
    }
}

/// How a delivery attempt was triggered.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeliveryMode {
    /// First attempt of a non-batchable event
    Immediate,
    /// One request for a flushed group
    Batch,
    /// Redelivery from the retry queue
    Retry,
}

impl DeliveryMode {
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Immediate => "immediate",
            Self::Batch => "batch",
            Self::Retry => "retry",
        }
    }
}

/// Point-in-time delivery counters.
///
/// `events_processed` and `events_failed` count per event per target; a
/// batch contributes all of its events.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct MetricsSnapshot {
    /// Events delivered successfully
    pub events_processed: u64,
    /// Events that reached a permanent failure (or were rejected)
    pub events_failed: u64,
    /// Batch requests that succeeded
    pub batches_sent: u64,
    /// Mean original/compressed ratio over compressed sends, 0 when none
    pub compression_ratio_avg: f64,
    /// Retries ever queued
    pub retries_scheduled: u64,
    /// Retries waiting right now
    pub retry_queue_depth: usize,
    /// Events sitting in open batches
    pub pending_batch_events: usize,
}
