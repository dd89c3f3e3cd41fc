//! # Event Sync Engine
//!
//! Routes application events to external HTTP targets: minimizes payloads,
//! picks targets by rule, batches high-volume event types and retries failed
//! deliveries with exponential backoff.
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │                        Ingest Layer                         │
//! │  • Accepts Events via ingest() / ingest_json()             │
//! │  • Payload minimization (allow-list + truncation)          │
//! └─────────────────────────────────────────────────────────────┘
//!                              │
//!                              ▼
//! ┌─────────────────────────────────────────────────────────────┐
//! │                       Routing Table                         │
//! │  • Source / type / severity rules                          │
//! │  • Union of matches, default target otherwise              │
//! └─────────────────────────────────────────────────────────────┘
//!                 │                              │
//!          (batchable types)              (everything else)
//!                 ▼                              ▼
//! ┌───────────────────────────────┐  ┌──────────────────────────┐
//! │       Batch Accumulator       │  │     Immediate Send       │
//! │  • Keyed groups, size limit  │  │  • One request per event │
//! │  • Idle (debounce) timer     │  │                          │
//! └───────────────────────────────┘  └──────────────────────────┘
//!                 │                              │
//!                 └──────────────┬───────────────┘
//!                                ▼
//! ┌─────────────────────────────────────────────────────────────┐
//! │                  Target Sender (HTTP POST)                  │
//! │  • gzip above a size threshold                             │
//! │  • Failures → Retry Scheduler → Dead Letter Queue          │
//! └─────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use event_sync_engine::{Event, EventKind, Severity, SyncConfig, SyncOrchestrator};
//! use serde_json::json;
//!
//! #[tokio::main]
//! async fn main() {
//!     let config = SyncConfig::from_json_str(r#"{
//!         "targets": [
//!             {"name": "default", "url": "https://hooks.example.com/events"},
//!             {"name": "error_alerts", "url_env": "ERROR_ALERTS_WEBHOOK"}
//!         ],
//!         "routing_rules": [
//!             {"id": "critical", "severity": "critical", "target": "error_alerts"}
//!         ]
//!     }"#).expect("Invalid config");
//!
//!     let orchestrator = SyncOrchestrator::new(config).expect("Failed to build");
//!     orchestrator.start().await;
//!
//!     orchestrator.ingest(
//!         Event::new(EventKind::Signal, "trading", json!({"symbol": "BTC", "side": "buy"}))
//!             .with_severity(Severity::Critical),
//!     );
//!
//!     orchestrator.shutdown().await;
//!     println!("{:?}", orchestrator.metrics());
//! }
//! ```
//!
//! ## Modules
//!
//! - [`coordinator`]: The [`SyncOrchestrator`] wiring all components
//! - [`event`]: The [`Event`] data model and wire format
//! - [`optimizer`]: Payload allow-list and truncation
//! - [`compression`]: gzip helpers
//! - [`routing`]: Rule-based target selection
//! - [`batching`]: Keyed batch accumulator with idle timers
//! - [`resilience`]: Backoff policy, retry queue, dead letters
//! - [`sender`]: The [`TargetSender`] seam and its HTTP implementation
//! - [`config`]: [`SyncConfig`] loading and validation

pub mod batching;
pub mod compression;
pub mod config;
pub mod coordinator;
pub mod event;
pub mod metrics;
pub mod optimizer;
pub mod resilience;
pub mod routing;
pub mod sender;

// Note: We don't expose a `tracing` module to avoid conflict with the tracing crate

pub use batching::accumulator::{BatchAccumulator, BatchConfig, FlushBatch, FlushReason};
pub use compression::{CompressionError, CompressionStats};
pub use config::{ConfigError, RoutingRuleSpec, SyncConfig, TargetConfig, TargetSpec};
pub use coordinator::{DeliveryMode, MetricsSnapshot, OrchestratorState, SyncOrchestrator};
pub use event::{Event, EventKind, Severity};
pub use metrics::LatencyTimer;
pub use optimizer::PayloadOptimizer;
pub use resilience::dead_letter::{DeadLetterEntry, DeadLetterQueue};
pub use resilience::retry::{RetryConfig, MAX_RETRY_DELAY};
pub use resilience::scheduler::{RetryScheduler, RetryTicket};
pub use routing::{RoutingRule, RoutingTable};
pub use sender::{DeliveryError, DeliveryReceipt, HttpSender, TargetSender};
