//! Chaos Testing for the Event Sync Engine
//!
//! This module tests failure scenarios using:
//! 1. **FailingSender wrappers** - precise error injection at specific call counts
//! 2. **Slow targets** - sends that hang until the request budget runs out
//! 3. **Concurrent producers** - many threads ingesting while targets fail
//!
//! Time-dependent tests run on a paused tokio clock, so retry delays are exact.
//!
//! # Running Chaos Tests
//! ```bash
//! cargo test --test chaos -- --nocapture
//! ```

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;
use serde_json::{json, Value};
use tokio::time::Instant;

use event_sync_engine::{
    DeliveryError, DeliveryReceipt, Event, EventKind, OrchestratorState, RoutingRuleSpec, SyncConfig,
    SyncOrchestrator, TargetConfig, TargetSender,
};

// =============================================================================
// Senders - Recording Inner + Failing Wrapper
// =============================================================================

/// Always succeeds, recording when and what it was asked to send.
#[derive(Default)]
pub struct RecordingSender {
    calls: Mutex<Vec<(Instant, String, Value)>>,
}

impl RecordingSender {
    fn calls_to(&self, target: &str) -> Vec<(Instant, Value)> {
        self.calls
            .lock()
            .iter()
            .filter(|(_, t, _)| t == target)
            .map(|(at, _, body)| (*at, body.clone()))
            .collect()
    }
}

#[async_trait]
impl TargetSender for RecordingSender {
    async fn send(&self, target: &TargetConfig, body: &Value) -> Result<DeliveryReceipt, DeliveryError> {
        self.calls.lock().push((Instant::now(), target.name.clone(), body.clone()));
        Ok(DeliveryReceipt::plain(200, body.to_string().len()))
    }
}

/// A wrapper that injects failures at specific call counts.
/// Useful for testing error handling paths with precision.
pub struct FailingSender<S: TargetSender> {
    inner: S,
    call_count: AtomicU64,
    /// Fail on these call numbers (1-indexed)
    fail_on_calls: Vec<u64>,
    /// Only calls to this target are counted and failed
    only_target: Option<String>,
    /// Fail every call while set
    fail_all: AtomicBool,
    attempts: Mutex<Vec<Instant>>,
}

impl<S: TargetSender> FailingSender<S> {
    pub fn new(inner: S, fail_on_calls: Vec<u64>) -> Self {
        Self {
            inner,
            call_count: AtomicU64::new(0),
            fail_on_calls,
            only_target: None,
            fail_all: AtomicBool::new(false),
            attempts: Mutex::new(Vec::new()),
        }
    }

    /// Create a sender that fails every call
    pub fn always(inner: S) -> Self {
        let sender = Self::new(inner, vec![]);
        sender.fail_all.store(true, Ordering::SeqCst);
        sender
    }

    pub fn for_target(mut self, target: &str) -> Self {
        self.only_target = Some(target.to_string());
        self
    }

    pub fn heal(&self) {
        self.fail_all.store(false, Ordering::SeqCst);
    }

    pub fn call_count(&self) -> u64 {
        self.call_count.load(Ordering::SeqCst)
    }

    /// Offsets of every counted attempt from `start`
    pub fn attempt_offsets(&self, start: Instant) -> Vec<Duration> {
        self.attempts.lock().iter().map(|at| *at - start).collect()
    }
}

#[async_trait]
impl<S: TargetSender> TargetSender for FailingSender<S> {
    async fn send(&self, target: &TargetConfig, body: &Value) -> Result<DeliveryReceipt, DeliveryError> {
        let counted = self.only_target.as_deref().map_or(true, |t| t == target.name);
        if counted {
            let n = self.call_count.fetch_add(1, Ordering::SeqCst) + 1;
            self.attempts.lock().push(Instant::now());
            if self.fail_all.load(Ordering::SeqCst) || self.fail_on_calls.contains(&n) {
                return Err(DeliveryError::Response { target: target.name.clone(), status: 502 });
            }
        }
        self.inner.send(target, body).await
    }
}

/// Hangs for `delay` per call and tracks peak concurrency.
pub struct SlowSender {
    delay: Duration,
    active: AtomicUsize,
    peak: AtomicUsize,
    done: AtomicUsize,
}

impl SlowSender {
    fn new(delay: Duration) -> Self {
        Self { delay, active: AtomicUsize::new(0), peak: AtomicUsize::new(0), done: AtomicUsize::new(0) }
    }
}

#[async_trait]
impl TargetSender for SlowSender {
    async fn send(&self, _target: &TargetConfig, _body: &Value) -> Result<DeliveryReceipt, DeliveryError> {
        let now = self.active.fetch_add(1, Ordering::SeqCst) + 1;
        self.peak.fetch_max(now, Ordering::SeqCst);
        tokio::time::sleep(self.delay).await;
        self.active.fetch_sub(1, Ordering::SeqCst);
        self.done.fetch_add(1, Ordering::SeqCst);
        Ok(DeliveryReceipt::plain(200, 1))
    }
}

// =============================================================================
// Helpers
// =============================================================================

fn targets(names: &[&str]) -> HashMap<String, TargetConfig> {
    names
        .iter()
        .map(|n| (n.to_string(), TargetConfig::new(*n, format!("http://127.0.0.1:9/{n}"))))
        .collect()
}

async fn start(config: SyncConfig, names: &[&str], sender: Arc<dyn TargetSender>) -> SyncOrchestrator {
    let orchestrator = SyncOrchestrator::with_sender(config, targets(names), sender).expect("valid config");
    orchestrator.start().await;
    orchestrator
}

fn alert(n: u64) -> Event {
    Event::new(EventKind::Alert, "risk", json!({"value": n}))
}

fn secs(s: f64) -> Duration {
    Duration::from_secs_f64(s)
}

// =============================================================================
// Retry Schedule
// =============================================================================

#[tokio::test(start_paused = true)]
async fn chaos_retry_recovers_after_transient_failures() {
    let sender = Arc::new(FailingSender::new(RecordingSender::default(), vec![1, 2, 3]));
    let orchestrator = start(SyncConfig::default(), &["default"], sender.clone()).await;
    let t0 = Instant::now();

    orchestrator.ingest(alert(1));
    tokio::time::sleep(Duration::from_secs(20)).await;

    assert_eq!(sender.attempt_offsets(t0), vec![secs(0.0), secs(1.0), secs(3.0), secs(7.0)]);
    let metrics = orchestrator.metrics();
    assert_eq!(metrics.retries_scheduled, 3);
    assert_eq!(metrics.events_processed, 1);
    assert_eq!(metrics.events_failed, 0);
    assert!(orchestrator.dead_letters().is_empty());
}

#[tokio::test(start_paused = true)]
async fn chaos_retry_delays_follow_config_and_cap() {
    let config = SyncConfig {
        initial_retry_delay_secs: 0.5,
        retry_backoff_multiplier: 3.0,
        max_retry_delay_secs: 2.0,
        max_retries: 4,
        ..Default::default()
    };
    let sender = Arc::new(FailingSender::always(RecordingSender::default()));
    let orchestrator = start(config, &["default"], sender.clone()).await;
    let t0 = Instant::now();

    orchestrator.ingest(alert(1));
    tokio::time::sleep(Duration::from_secs(30)).await;

    // Delays 0.5, 1.5, 2 (capped), 2 (capped)
    assert_eq!(
        sender.attempt_offsets(t0),
        vec![secs(0.0), secs(0.5), secs(2.0), secs(4.0), secs(6.0)]
    );
    let dead = orchestrator.dead_letters();
    assert_eq!(dead.len(), 1);
    assert_eq!(dead[0].attempts, 5);
    assert!(dead[0].last_error.contains("502"));
}

#[tokio::test(start_paused = true)]
async fn chaos_zero_retry_budget_fails_immediately() {
    let config = SyncConfig { max_retries: 0, ..Default::default() };
    let sender = Arc::new(FailingSender::always(RecordingSender::default()));
    let orchestrator = start(config, &["default"], sender.clone()).await;

    orchestrator.ingest(alert(1));
    tokio::time::sleep(Duration::from_secs(10)).await;

    assert_eq!(sender.call_count(), 1);
    assert_eq!(orchestrator.metrics().retries_scheduled, 0);
    assert_eq!(orchestrator.metrics().events_failed, 1);
}

#[tokio::test(start_paused = true)]
async fn chaos_target_heals_mid_retry() {
    let sender = Arc::new(FailingSender::always(RecordingSender::default()));
    let orchestrator = start(SyncConfig::default(), &["default"], sender.clone()).await;

    orchestrator.ingest(alert(1));
    tokio::time::sleep(Duration::from_millis(1500)).await;
    assert_eq!(sender.call_count(), 2);

    sender.heal();
    tokio::time::sleep(Duration::from_secs(5)).await;

    assert_eq!(sender.call_count(), 3);
    assert_eq!(orchestrator.metrics().events_processed, 1);
    assert_eq!(orchestrator.metrics().retry_queue_depth, 0);
}

// =============================================================================
// Isolation Between Targets
// =============================================================================

#[tokio::test(start_paused = true)]
async fn chaos_failing_target_does_not_affect_others() {
    let config = SyncConfig {
        routing_rules: vec![
            RoutingRuleSpec { id: "a".into(), source: "*".into(), types: vec![], severity: None, target: "healthy".into(), enabled: true },
            RoutingRuleSpec { id: "b".into(), source: "*".into(), types: vec![], severity: None, target: "broken".into(), enabled: true },
        ],
        ..Default::default()
    };
    let sender = Arc::new(FailingSender::always(RecordingSender::default()).for_target("broken"));
    let orchestrator = start(config, &["default", "healthy", "broken"], sender.clone()).await;

    for n in 0..5 {
        orchestrator.ingest(alert(n));
    }
    tokio::time::sleep(Duration::from_secs(30)).await;

    assert_eq!(sender.inner.calls_to("healthy").len(), 5);
    assert!(sender.inner.calls_to("broken").is_empty());
    let metrics = orchestrator.metrics();
    assert_eq!(metrics.events_processed, 5);
    assert_eq!(metrics.events_failed, 5);
    assert!(orchestrator.dead_letters().iter().all(|d| d.target == "broken"));
}

// =============================================================================
// Batch Failures
// =============================================================================

#[tokio::test(start_paused = true)]
async fn chaos_failed_batch_is_not_retried() {
    let config = SyncConfig { batch_size_limit: 3, ..Default::default() };
    let sender = Arc::new(FailingSender::new(RecordingSender::default(), vec![1]));
    let orchestrator = start(config, &["default"], sender.clone()).await;

    for n in 0..6 {
        orchestrator.ingest(Event::new(EventKind::Metric, "gauges", json!({"value": n})));
    }
    tokio::time::sleep(Duration::from_secs(120)).await;

    // First group lost, second delivered
    assert_eq!(sender.call_count(), 2);
    let delivered = sender.inner.calls_to("default");
    assert_eq!(delivered.len(), 1);
    assert_eq!(delivered[0].1["batch"][0]["data"]["value"], 3);

    let metrics = orchestrator.metrics();
    assert_eq!(metrics.events_failed, 3);
    assert_eq!(metrics.events_processed, 3);
    assert_eq!(metrics.batches_sent, 1);
    assert_eq!(metrics.retries_scheduled, 0);

    let dead = orchestrator.dead_letters();
    assert_eq!(dead.len(), 1);
    assert_eq!(dead[0].events.len(), 3);
    assert_eq!(dead[0].attempts, 1);
}

// =============================================================================
// Slow Targets & Backpressure
// =============================================================================

#[tokio::test(start_paused = true)]
async fn chaos_concurrent_sends_are_bounded() {
    let config = SyncConfig { max_concurrent_sends: 2, ..Default::default() };
    let sender = Arc::new(SlowSender::new(Duration::from_secs(1)));
    let orchestrator = start(config, &["default"], sender.clone()).await;

    for n in 0..6 {
        orchestrator.ingest(alert(n));
    }
    tokio::time::sleep(Duration::from_millis(10)).await;
    assert_eq!(orchestrator.in_flight(), 6);

    tokio::time::sleep(Duration::from_secs(5)).await;
    assert_eq!(sender.peak.load(Ordering::SeqCst), 2);
    assert_eq!(sender.done.load(Ordering::SeqCst), 6);
    assert_eq!(orchestrator.in_flight(), 0);
}

#[tokio::test(start_paused = true)]
async fn chaos_shutdown_abandons_pending_retries() {
    let sender = Arc::new(FailingSender::always(RecordingSender::default()));
    let orchestrator = start(SyncConfig::default(), &["default"], sender.clone()).await;

    for n in 0..3 {
        orchestrator.ingest(alert(n));
    }
    tokio::time::sleep(Duration::from_millis(100)).await;
    assert_eq!(orchestrator.metrics().retry_queue_depth, 3);

    orchestrator.shutdown().await;
    tokio::time::sleep(Duration::from_secs(60)).await;

    assert_eq!(sender.call_count(), 3);
    assert_eq!(orchestrator.state(), OrchestratorState::Stopped);
    let metrics = orchestrator.metrics();
    assert_eq!(metrics.events_failed, 3);
    assert_eq!(metrics.retry_queue_depth, 0);
    assert_eq!(orchestrator.dead_letters().len(), 3);
}

// =============================================================================
// Concurrent Producers
// =============================================================================

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn chaos_producers_on_plain_threads() {
    let config = SyncConfig { batch_size_limit: 5, ..Default::default() };
    let sender = Arc::new(RecordingSender::default());
    let orchestrator = Arc::new(start(config, &["default"], sender.clone()).await);

    let producers: Vec<_> = (0..4)
        .map(|p| {
            let orchestrator = Arc::clone(&orchestrator);
            std::thread::spawn(move || {
                for n in 0..25 {
                    orchestrator.ingest(Event::new(EventKind::Metric, format!("producer-{p}"), json!({"value": n})));
                    orchestrator.ingest(alert(n));
                }
            })
        })
        .collect();
    for producer in producers {
        producer.join().expect("producer panicked");
    }

    orchestrator.shutdown().await;

    let metrics = orchestrator.metrics();
    // 100 alerts sent singly, 100 metrics in groups of 5 per producer
    assert_eq!(metrics.events_processed, 200);
    assert_eq!(metrics.batches_sent, 20);
    assert_eq!(metrics.events_failed, 0);

    let calls = sender.calls.lock();
    assert_eq!(calls.len(), 120);
    for (_, _, body) in calls.iter().filter(|(_, _, b)| b.get("batch").is_some()) {
        let values: Vec<_> = body["batch"].as_array().unwrap().iter().map(|e| e["data"]["value"].as_u64().unwrap()).collect();
        let mut sorted = values.clone();
        sorted.sort_unstable();
        assert_eq!(values, sorted, "batch lost append order");
    }
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn chaos_ingest_racing_shutdown_leaves_nothing_pending() {
    let config = SyncConfig { batch_size_limit: 1000, ..Default::default() };
    let sender = Arc::new(RecordingSender::default());
    let orchestrator = Arc::new(start(config, &["default"], sender.clone()).await);
    let ingested = Arc::new(AtomicU64::new(0));
    let stop = Arc::new(AtomicBool::new(false));

    let producers: Vec<_> = (0..3)
        .map(|p| {
            let orchestrator = Arc::clone(&orchestrator);
            let ingested = Arc::clone(&ingested);
            let stop = Arc::clone(&stop);
            std::thread::spawn(move || {
                let mut n = 0u64;
                while !stop.load(Ordering::SeqCst) {
                    orchestrator.ingest(Event::new(EventKind::Metric, format!("producer-{p}"), json!({"value": n})));
                    ingested.fetch_add(1, Ordering::SeqCst);
                    n += 1;
                }
            })
        })
        .collect();

    while ingested.load(Ordering::SeqCst) < 100 {
        tokio::time::sleep(Duration::from_millis(1)).await;
    }
    orchestrator.shutdown().await;
    // Keep producing for a moment against the stopped orchestrator
    tokio::time::sleep(Duration::from_millis(5)).await;
    stop.store(true, Ordering::SeqCst);
    for producer in producers {
        producer.join().expect("producer panicked");
    }

    assert_eq!(orchestrator.state(), OrchestratorState::Stopped);
    let metrics = orchestrator.metrics();
    assert_eq!(metrics.pending_batch_events, 0);
    assert_eq!(orchestrator.in_flight(), 0);
    assert_eq!(metrics.events_processed + metrics.events_failed, ingested.load(Ordering::SeqCst));

    let delivered: usize = sender.calls.lock().iter().map(|(_, _, body)| body["batch"].as_array().map_or(0, Vec::len)).sum();
    assert_eq!(delivered as u64, metrics.events_processed);
}
