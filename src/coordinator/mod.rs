// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Sync orchestrator.
//!
//! The [`SyncOrchestrator`] ties the components together:
//! - payload minimization
//! - rule-based routing to one or more targets
//! - keyed batching for high-volume event types
//! - immediate delivery with delayed retries for everything else
//! - a dead letter queue for deliveries that are given up on
//!
//! # Lifecycle
//!
//! ```text
//! Created → Running → ShuttingDown → Stopped
//! ```
//!
//! # Example
//!
//! ```rust,no_run
//! use event_sync_engine::{Event, EventKind, OrchestratorState, SyncConfig, SyncOrchestrator};
//! use serde_json::json;
//!
//! # #[tokio::main]
//! # async fn main() {
//! let config = SyncConfig::from_file("sync.json").expect("config");
//! let orchestrator = SyncOrchestrator::new(config).expect("valid config");
//! orchestrator.start().await;
//! assert_eq!(orchestrator.state(), OrchestratorState::Running);
//!
//! orchestrator.ingest(Event::new(EventKind::Alert, "risk", json!({"message": "limit hit"})));
//!
//! orchestrator.shutdown().await;
//! println!("{:?}", orchestrator.metrics());
//! # }
//! ```

mod delivery;
mod flush;
mod lifecycle;
mod types;

pub use types::{DeliveryMode, MetricsSnapshot, OrchestratorState};

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, OnceLock};

use parking_lot::{Mutex, RwLock};
use tokio::runtime::Handle;
use tokio::sync::{watch, Semaphore};
use tracing::{debug, warn};

use crate::batching::accumulator::{BatchAccumulator, BatchConfig};
use crate::config::{ConfigError, SyncConfig, TargetConfig};
use crate::event::Event;
use crate::optimizer::PayloadOptimizer;
use crate::resilience::dead_letter::{DeadLetterEntry, DeadLetterQueue};
use crate::resilience::retry::RetryConfig;
use crate::resilience::scheduler::RetryScheduler;
use crate::routing::RoutingTable;
use crate::sender::{HttpSender, TargetSender};

/// Identifies one open batch: the target it is bound for and the event
/// grouping key. Kept as separate fields so no two pairs can collide.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub(crate) struct BatchKey {
    pub(crate) target: String,
    pub(crate) group: String,
}

/// Terminal outcome counters.
#[derive(Default)]
pub(super) struct Counters {
    pub(super) processed: AtomicU64,
    pub(super) failed: AtomicU64,
    pub(super) batches_sent: AtomicU64,
    pub(super) retries_scheduled: AtomicU64,
    /// (sum of ratios, compressed sends)
    pub(super) compression: Mutex<(f64, u64)>,
}

/// State shared by ingest, flush handlers, retry handlers and send tasks.
pub(crate) struct Dispatch {
    pub(super) config: SyncConfig,
    pub(super) optimizer: PayloadOptimizer,
    pub(super) routing: RoutingTable,
    pub(super) targets: HashMap<String, TargetConfig>,
    pub(super) sender: Arc<dyn TargetSender>,
    pub(super) scheduler: RetryScheduler<Event>,
    pub(super) dead_letters: DeadLetterQueue,
    /// Bounds concurrent outbound requests
    pub(super) permits: Semaphore,
    /// Spawned send tasks not yet finished
    pub(super) in_flight: watch::Sender<usize>,
    pub(super) state: watch::Sender<OrchestratorState>,
    /// Captured at start so producers outside the runtime can still spawn
    pub(super) runtime: OnceLock<Handle>,
    pub(super) counters: Counters,
}

impl Dispatch {
    pub(super) fn state(&self) -> OrchestratorState {
        *self.state.borrow()
    }
}

/// Event delivery facade.
///
/// `ingest` is synchronous and never blocks on the network: sends run on
/// spawned tasks and their outcomes surface through [`metrics()`](Self::metrics),
/// [`dead_letters()`](Self::dead_letters) and logs.
pub struct SyncOrchestrator {
    pub(super) dispatch: Arc<Dispatch>,
    pub(super) batches: BatchAccumulator<Event, BatchKey>,
    /// Ingest holds it shared; shutdown holds it exclusively while it stops
    /// accepting and flushes, so no append can land after the final flush.
    pub(super) gate: RwLock<()>,
}

impl SyncOrchestrator {
    /// Build from config, resolving target URLs from the environment and
    /// sending over HTTP.
    pub fn new(config: SyncConfig) -> Result<Self, ConfigError> {
        config.validate()?;
        let targets = config.resolve_targets_from_env()?;
        let sender = HttpSender::from_config(&config)?;
        Self::with_sender(config, targets, Arc::new(sender))
    }

    /// Build with already resolved targets and any [`TargetSender`].
    pub fn with_sender(
        config: SyncConfig,
        targets: HashMap<String, TargetConfig>,
        sender: Arc<dyn TargetSender>,
    ) -> Result<Self, ConfigError> {
        config.validate_limits()?;
        config.validate_references(|name| targets.contains_key(name))?;

        let optimizer = PayloadOptimizer::new(config.payload_allowed_fields.iter().cloned(), config.max_field_size);
        let routing = RoutingTable::from_specs(&config.routing_rules, config.default_target.clone());
        let scheduler = RetryScheduler::new(RetryConfig::from_sync_config(&config));
        let (state, _) = watch::channel(OrchestratorState::Created);
        let (in_flight, _) = watch::channel(0usize);
        let batch_config = BatchConfig {
            size_limit: config.batch_size_limit,
            idle_timeout: config.batch_idle_timeout(),
        };

        let dispatch = Arc::new(Dispatch {
            optimizer,
            routing,
            targets,
            sender,
            scheduler,
            dead_letters: DeadLetterQueue::new(config.dead_letter_capacity),
            permits: Semaphore::new(config.max_concurrent_sends),
            in_flight,
            state,
            runtime: OnceLock::new(),
            counters: Counters::default(),
            config,
        });

        let weak = Arc::downgrade(&dispatch);
        let batches: BatchAccumulator<Event, BatchKey> = BatchAccumulator::new(batch_config, move |batch| {
            if let Some(dispatch) = weak.upgrade() {
                dispatch.on_batch_flush(batch);
            }
        });

        Ok(Self {
            dispatch,
            batches,
            gate: RwLock::new(()),
        })
    }

    /// Get current lifecycle state.
    #[must_use]
    pub fn state(&self) -> OrchestratorState {
        self.dispatch.state()
    }

    /// Get a receiver to watch state changes.
    #[must_use]
    pub fn state_receiver(&self) -> watch::Receiver<OrchestratorState> {
        self.dispatch.state.subscribe()
    }

    #[must_use]
    pub fn config(&self) -> &SyncConfig {
        &self.dispatch.config
    }

    /// Submit an event for delivery. Fire-and-forget.
    ///
    /// The payload is minimized, the event routed, and for every target
    /// either appended to a batch or sent right away. Events submitted while
    /// not running are counted as failed.
    pub fn ingest(&self, mut event: Event) {
        let dispatch = &self.dispatch;
        crate::metrics::record_event_ingested(event.kind.as_str());

        let _gate = self.gate.read();
        let state = dispatch.state();
        let runtime = match (state, dispatch.runtime.get()) {
            (OrchestratorState::Running, Some(runtime)) => runtime,
            _ => {
                warn!(%state, source = %event.source, kind = %event.kind, "Event rejected, orchestrator not running");
                dispatch.counters.failed.fetch_add(1, Ordering::Relaxed);
                crate::metrics::record_rejected("not_running");
                return;
            }
        };
        // Idle timers and send tasks need a runtime context
        let _enter = runtime.enter();

        if event.max_retries.is_none() {
            event.max_retries = Some(dispatch.config.max_retries);
        }
        event.payload = dispatch.optimizer.minimize(&event.payload);

        let targets = dispatch.routing.route(&event);
        crate::metrics::record_fanout(targets.len());
        let batchable = dispatch.config.is_batchable(&event.kind);
        debug!(source = %event.source, kind = %event.kind, targets = targets.len(), batchable, "Event routed");

        for target in targets {
            if batchable {
                let key = BatchKey {
                    group: event.grouping_key().to_string(),
                    target,
                };
                self.batches.append(key, event.clone());
            } else {
                dispatch.spawn_delivery(event.clone(), target, DeliveryMode::Immediate);
            }
        }
        crate::metrics::set_pending_batch_events(self.batches.pending_items());
    }

    /// Parse the inbound JSON shape and [`ingest`](Self::ingest) it.
    pub fn ingest_json(&self, raw: &str) -> Result<(), serde_json::Error> {
        match Event::from_json(raw) {
            Ok(event) => {
                self.ingest(event);
                Ok(())
            }
            Err(e) => {
                crate::metrics::record_rejected("parse");
                Err(e)
            }
        }
    }

    /// Snapshot of delivery counters.
    #[must_use]
    pub fn metrics(&self) -> MetricsSnapshot {
        let counters = &self.dispatch.counters;
        let (ratio_sum, compressed) = *counters.compression.lock();
        MetricsSnapshot {
            events_processed: counters.processed.load(Ordering::Relaxed),
            events_failed: counters.failed.load(Ordering::Relaxed),
            batches_sent: counters.batches_sent.load(Ordering::Relaxed),
            compression_ratio_avg: if compressed == 0 { 0.0 } else { ratio_sum / compressed as f64 },
            retries_scheduled: counters.retries_scheduled.load(Ordering::Relaxed),
            retry_queue_depth: self.dispatch.scheduler.len(),
            pending_batch_events: self.batches.pending_items(),
        }
    }

    /// Permanently failed deliveries, oldest first.
    #[must_use]
    pub fn dead_letters(&self) -> Vec<DeadLetterEntry> {
        self.dispatch.dead_letters.entries()
    }

    /// Send tasks currently running or waiting for a permit.
    #[must_use]
    pub fn in_flight(&self) -> usize {
        *self.dispatch.in_flight.borrow()
    }
}
