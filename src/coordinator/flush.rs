//! Batch flushing.
//!
//! A flushed group becomes one request. If that request fails the whole
//! group is counted as failed and dead-lettered; batches are not retried.

use std::sync::Arc;

use tracing::{error, info};

use crate::batching::accumulator::FlushBatch;
use crate::event::{batch_body, Event};

use super::delivery::InFlight;
use super::{BatchKey, DeliveryMode, Dispatch};

impl Dispatch {
    /// Accumulator callback. Runs on the appending thread or a timer task,
    /// so the send itself is spawned.
    pub(super) fn on_batch_flush(self: &Arc<Self>, batch: FlushBatch<Event, BatchKey>) {
        if batch.is_empty() {
            return;
        }
        let size = batch.len();
        let BatchKey { target, group } = batch.key;
        info!(target = %target, group = %group, size, reason = %batch.reason, "Batch flushed");
        crate::metrics::record_batch_flush(&batch.reason.to_string(), size);

        let events = batch.items;
        let Some(runtime) = self.runtime.get() else {
            self.fail_permanently(events, &target, 0, "orchestrator was never started", DeliveryMode::Batch);
            return;
        };
        let guard = InFlight::enter(self);
        let dispatch = Arc::clone(self);
        runtime.spawn(async move {
            dispatch.deliver_batch(events, target).await;
            drop(guard);
        });
    }

    async fn deliver_batch(&self, events: Vec<Event>, target_name: String) {
        let Some(target) = self.targets.get(&target_name) else {
            self.fail_permanently(events, &target_name, 1, "target is not configured", DeliveryMode::Batch);
            return;
        };
        let Ok(_permit) = self.permits.acquire().await else {
            self.fail_permanently(events, &target_name, 1, "send permits closed", DeliveryMode::Batch);
            return;
        };

        let body = batch_body(&events);
        match self.sender.send(target, &body).await {
            Ok(receipt) => self.record_success(&target_name, DeliveryMode::Batch, events.len(), &receipt),
            Err(err) => {
                error!(target = %target_name, events = events.len(), error = %err, "Batch delivery failed");
                self.fail_permanently(events, &target_name, 1, &err.to_string(), DeliveryMode::Batch);
            }
        }
    }
}
