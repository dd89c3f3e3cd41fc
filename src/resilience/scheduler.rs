// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Delayed redelivery queue.
//!
//! Failed deliveries are parked as [`RetryTicket`]s in a min-heap ordered by
//! due time. One background worker sleeps until the earliest ticket is due,
//! hands it to the delivery handler and goes back to sleep. Scheduling an
//! earlier ticket wakes the worker so it can shorten its sleep.
//!
//! The handler runs on the worker task and must not block: spawn the actual
//! delivery so a slow target can't delay other tickets.

use std::cmp::{Ordering as CmpOrdering, Reverse};
use std::collections::BinaryHeap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use tokio::sync::{watch, Notify};
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tracing::{debug, info, warn};

use super::retry::RetryConfig;

/// A scheduled future delivery attempt.
#[derive(Debug, Clone)]
pub struct RetryTicket<T> {
    pub item: T,
    pub target: String,
    pub not_before: Instant,
    /// Zero-based retry number
    pub attempt: u32,
}

struct Queued<T> {
    ticket: RetryTicket<T>,
    /// Insertion order, keeps equal due times stable
    seq: u64,
}

impl<T> Queued<T> {
    fn order_key(&self) -> (Instant, u64) {
        (self.ticket.not_before, self.seq)
    }
}

impl<T> PartialEq for Queued<T> {
    fn eq(&self, other: &Self) -> bool {
        self.order_key() == other.order_key()
    }
}

impl<T> Eq for Queued<T> {}

impl<T> PartialOrd for Queued<T> {
    fn partial_cmp(&self, other: &Self) -> Option<CmpOrdering> {
        Some(self.cmp(other))
    }
}

impl<T> Ord for Queued<T> {
    fn cmp(&self, other: &Self) -> CmpOrdering {
        self.order_key().cmp(&other.order_key())
    }
}

struct Queue<T> {
    heap: Mutex<BinaryHeap<Reverse<Queued<T>>>>,
    seq: AtomicU64,
    wake: Notify,
}

impl<T> Queue<T> {
    fn push(&self, ticket: RetryTicket<T>) {
        let seq = self.seq.fetch_add(1, Ordering::Relaxed);
        self.heap.lock().push(Reverse(Queued { ticket, seq }));
        self.wake.notify_one();
    }

    fn pop_due(&self, now: Instant) -> Vec<RetryTicket<T>> {
        let mut heap = self.heap.lock();
        let mut due = Vec::new();
        while heap.peek().is_some_and(|Reverse(q)| q.ticket.not_before <= now) {
            if let Some(Reverse(q)) = heap.pop() {
                due.push(q.ticket);
            }
        }
        due
    }

    fn next_due(&self) -> Option<Instant> {
        self.heap.lock().peek().map(|Reverse(q)| q.ticket.not_before)
    }

    fn drain(&self) -> Vec<RetryTicket<T>> {
        let mut heap = self.heap.lock();
        let mut tickets = Vec::with_capacity(heap.len());
        while let Some(Reverse(q)) = heap.pop() {
            tickets.push(q.ticket);
        }
        tickets
    }
}

/// Min-heap retry queue served by a single background worker.
pub struct RetryScheduler<T> {
    config: RetryConfig,
    queue: Arc<Queue<T>>,
    shutdown: watch::Sender<bool>,
    worker: Mutex<Option<JoinHandle<()>>>,
}

impl<T: Send + 'static> RetryScheduler<T> {
    pub fn new(config: RetryConfig) -> Self {
        let (shutdown, _) = watch::channel(false);
        Self {
            config,
            queue: Arc::new(Queue {
                heap: Mutex::new(BinaryHeap::new()),
                seq: AtomicU64::new(0),
                wake: Notify::new(),
            }),
            shutdown,
            worker: Mutex::new(None),
        }
    }

    #[must_use]
    pub fn config(&self) -> &RetryConfig {
        &self.config
    }

    /// Queue `item` for redelivery to `target` after the backoff delay for
    /// `attempt`. Returns the delay used.
    pub fn schedule(&self, item: T, target: impl Into<String>, attempt: u32) -> Duration {
        let delay = self.config.delay_for_attempt(attempt);
        let target = target.into();
        debug!(target = %target, attempt, delay_ms = delay.as_millis() as u64, "Retry scheduled");
        let now = Instant::now();
        // Delays are capped well below the clock's range; due now if not
        let not_before = now.checked_add(delay).unwrap_or(now);
        self.queue.push(RetryTicket {
            item,
            target,
            not_before,
            attempt,
        });
        delay
    }

    /// Spawn the worker. Calling it again while a worker runs is a no-op.
    pub fn start<F>(&self, handler: F)
    where
        F: Fn(RetryTicket<T>) + Send + Sync + 'static,
    {
        let mut worker = self.worker.lock();
        if worker.as_ref().is_some_and(|h| !h.is_finished()) {
            return;
        }
        self.shutdown.send_replace(false);
        let queue = Arc::clone(&self.queue);
        let shutdown = self.shutdown.subscribe();
        *worker = Some(tokio::spawn(run_worker(queue, shutdown, handler)));
        info!("Retry worker started");
    }

    /// Stop the worker and return the tickets that never became due.
    pub async fn shutdown(&self) -> Vec<RetryTicket<T>> {
        self.shutdown.send_replace(true);
        let worker = self.worker.lock().take();
        if let Some(handle) = worker {
            if let Err(e) = handle.await {
                warn!(error = %e, "Retry worker ended abnormally");
            }
        }
        let remaining = self.queue.drain();
        info!(remaining = remaining.len(), "Retry worker stopped");
        remaining
    }

    /// Tickets waiting in the queue.
    #[must_use]
    pub fn len(&self) -> usize {
        self.queue.heap.lock().len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Due time of the earliest ticket.
    #[must_use]
    pub fn next_due(&self) -> Option<Instant> {
        self.queue.next_due()
    }
}

async fn run_worker<T, F>(queue: Arc<Queue<T>>, mut shutdown: watch::Receiver<bool>, handler: F)
where
    F: Fn(RetryTicket<T>),
{
    loop {
        if *shutdown.borrow() {
            break;
        }

        for ticket in queue.pop_due(Instant::now()) {
            handler(ticket);
        }

        // notify_one leaves a permit when nobody waits, so a push between
        // pop_due and here still wakes us
        let woken = match queue.next_due() {
            Some(deadline) => tokio::select! {
                _ = tokio::time::sleep_until(deadline) => true,
                _ = queue.wake.notified() => true,
                changed = shutdown.changed() => changed.is_ok(),
            },
            None => tokio::select! {
                _ = queue.wake.notified() => true,
                changed = shutdown.changed() => changed.is_ok(),
            },
        };
        if !woken {
            // Scheduler dropped without shutdown
            break;
        }
    }
}
