//! Orchestrator lifecycle: start and graceful shutdown.

use std::sync::Arc;

use tokio::runtime::Handle;
use tracing::{info, warn};

use crate::event::Event;
use crate::resilience::scheduler::RetryTicket;

use super::{DeliveryMode, OrchestratorState, SyncOrchestrator};

impl SyncOrchestrator {
    /// Start accepting events and spawn the retry worker.
    ///
    /// Only the first call on a `Created` orchestrator has any effect.
    #[tracing::instrument(skip(self))]
    pub async fn start(&self) {
        let dispatch = &self.dispatch;
        if dispatch.state() != OrchestratorState::Created {
            warn!(state = %dispatch.state(), "Start ignored");
            return;
        }

        // Ignoring the error: a handle set by an earlier start is just as good
        let _ = dispatch.runtime.set(Handle::current());

        let weak = Arc::downgrade(dispatch);
        dispatch.scheduler.start(move |ticket: RetryTicket<Event>| {
            if let Some(dispatch) = weak.upgrade() {
                dispatch.on_retry_due(ticket);
            }
        });

        dispatch.state.send_replace(OrchestratorState::Running);
        crate::metrics::set_orchestrator_state("Running");
        info!(
            targets = dispatch.targets.len(),
            rules = dispatch.routing.rules().len(),
            default_target = %dispatch.routing.default_target(),
            "Sync orchestrator running"
        );
    }

    /// Graceful shutdown.
    ///
    /// 1. Stop accepting events
    /// 2. Flush every open batch
    /// 3. Stop the retry worker
    /// 4. Wait for in-flight sends to finish
    /// 5. Dead-letter retry tickets that never came due
    #[tracing::instrument(skip(self))]
    pub async fn shutdown(&self) {
        let dispatch = &self.dispatch;
        let shutdown_start = std::time::Instant::now();
        {
            // Waits out ingests already past their state check
            let _gate = self.gate.write();
            match dispatch.state() {
                OrchestratorState::Running => {}
                OrchestratorState::Created => {
                    dispatch.state.send_replace(OrchestratorState::Stopped);
                    crate::metrics::set_orchestrator_state("Stopped");
                    return;
                }
                OrchestratorState::ShuttingDown | OrchestratorState::Stopped => return,
            }

            info!("Initiating sync orchestrator shutdown...");
            dispatch.state.send_replace(OrchestratorState::ShuttingDown);
            crate::metrics::set_orchestrator_state("ShuttingDown");

            let flushed = self.batches.flush_all();
            if flushed > 0 {
                info!(groups = flushed, "Flushed open batches on shutdown");
            }
        }

        let mut abandoned = dispatch.scheduler.shutdown().await;

        let mut in_flight = dispatch.in_flight.subscribe();
        if in_flight.wait_for(|n| *n == 0).await.is_err() {
            warn!("In-flight tracking closed during shutdown");
        }
        // A send that failed just before the state change may have queued one more
        abandoned.extend(dispatch.scheduler.shutdown().await);

        if !abandoned.is_empty() {
            warn!(tickets = abandoned.len(), "Pending retries abandoned on shutdown");
        }
        for ticket in abandoned {
            let attempts = ticket.item.retry_count + 1;
            dispatch.fail_permanently(
                vec![ticket.item],
                &ticket.target,
                attempts,
                "shutdown before retry was due",
                DeliveryMode::Retry,
            );
        }
        crate::metrics::set_retry_queue_depth(0);

        dispatch.state.send_replace(OrchestratorState::Stopped);
        crate::metrics::set_orchestrator_state("Stopped");
        crate::metrics::set_pending_batch_events(0);
        crate::metrics::record_shutdown_duration(shutdown_start.elapsed());
        info!(metrics = ?self.metrics(), "Sync orchestrator stopped");
    }
}
