//! Single-event delivery, retry decisions and terminal outcome accounting.

use std::sync::atomic::Ordering;
use std::sync::Arc;

use tracing::{debug, error, warn};

use crate::event::Event;
use crate::resilience::scheduler::RetryTicket;
use crate::sender::{DeliveryError, DeliveryReceipt};

use super::{DeliveryMode, Dispatch, OrchestratorState};

/// Counts a spawned send task until it finishes, even if it panics.
pub(super) struct InFlight {
    dispatch: Arc<Dispatch>,
}

impl InFlight {
    pub(super) fn enter(dispatch: &Arc<Dispatch>) -> Self {
        dispatch.in_flight.send_modify(|n| *n += 1);
        crate::metrics::set_in_flight_sends(*dispatch.in_flight.borrow());
        Self { dispatch: Arc::clone(dispatch) }
    }
}

impl Drop for InFlight {
    fn drop(&mut self) {
        self.dispatch.in_flight.send_modify(|n| *n = n.saturating_sub(1));
        crate::metrics::set_in_flight_sends(*self.dispatch.in_flight.borrow());
    }
}

impl Dispatch {
    /// Spawn one delivery attempt of `event` to `target`.
    pub(super) fn spawn_delivery(self: &Arc<Self>, event: Event, target: String, mode: DeliveryMode) {
        let Some(runtime) = self.runtime.get() else {
            self.fail_permanently(vec![event], &target, 0, "orchestrator was never started", mode);
            return;
        };
        let guard = InFlight::enter(self);
        runtime.spawn(async move {
            let dispatch = Arc::clone(&guard.dispatch);
            dispatch.deliver(event, target, mode).await;
            drop(guard);
        });
    }

    /// Retry worker callback.
    pub(super) fn on_retry_due(self: &Arc<Self>, ticket: RetryTicket<Event>) {
        let mut event = ticket.item;
        event.retry_count = ticket.attempt + 1;
        debug!(target = %ticket.target, attempt = event.retry_count, "Retry due");
        self.spawn_delivery(event, ticket.target, DeliveryMode::Retry);
    }

    async fn deliver(&self, event: Event, target_name: String, mode: DeliveryMode) {
        let attempts = event.retry_count + 1;
        let Some(target) = self.targets.get(&target_name) else {
            self.fail_permanently(vec![event], &target_name, attempts, "target is not configured", mode);
            return;
        };
        let Ok(_permit) = self.permits.acquire().await else {
            self.fail_permanently(vec![event], &target_name, attempts, "send permits closed", mode);
            return;
        };

        let body = event.to_wire();
        match self.sender.send(target, &body).await {
            Ok(receipt) => self.record_success(&target_name, mode, 1, &receipt),
            Err(err) => self.handle_failure(event, target_name, mode, &err),
        }
    }

    fn handle_failure(&self, event: Event, target: String, mode: DeliveryMode, err: &DeliveryError) {
        let attempts = event.retry_count + 1;
        let running = self.state() == OrchestratorState::Running;

        if err.is_retryable() && event.should_retry() && running {
            let attempt = event.retry_count;
            let delay = self.scheduler.schedule(event, target.clone(), attempt);
            self.counters.retries_scheduled.fetch_add(1, Ordering::Relaxed);
            crate::metrics::record_retry_scheduled(&target, attempt);
            crate::metrics::set_retry_queue_depth(self.scheduler.len());
            warn!(
                target = %target,
                mode = mode.as_str(),
                attempt,
                delay_ms = delay.as_millis() as u64,
                error = %err,
                "Delivery failed, retry scheduled"
            );
            return;
        }

        let reason = if !running {
            "shutting down"
        } else if !err.is_retryable() {
            "not retryable"
        } else {
            "retries exhausted"
        };
        error!(target = %target, attempts, reason, error = %err, "Delivery failed permanently");
        self.fail_permanently(vec![event], &target, attempts, &err.to_string(), mode);
    }

    pub(super) fn record_success(&self, target: &str, mode: DeliveryMode, events: usize, receipt: &DeliveryReceipt) {
        self.counters.processed.fetch_add(events as u64, Ordering::Relaxed);
        if mode == DeliveryMode::Batch {
            self.counters.batches_sent.fetch_add(1, Ordering::Relaxed);
        }
        if let Some(ratio) = receipt.compression_ratio {
            let mut compression = self.counters.compression.lock();
            compression.0 += ratio;
            compression.1 += 1;
            crate::metrics::record_compression_ratio(target, ratio);
        }
        crate::metrics::record_events(target, mode.as_str(), "success", events);
        debug!(target, mode = mode.as_str(), events, status = receipt.status, "Delivered");
    }

    /// Count `events` as failed and keep them in the dead letter queue.
    pub(super) fn fail_permanently(&self, events: Vec<Event>, target: &str, attempts: u32, last_error: &str, mode: DeliveryMode) {
        let count = events.len();
        self.counters.failed.fetch_add(count as u64, Ordering::Relaxed);
        crate::metrics::record_events(target, mode.as_str(), "failure", count);
        crate::metrics::record_dead_letter(target, count);
        self.dead_letters.add(events, target, attempts, last_error);
    }
}
