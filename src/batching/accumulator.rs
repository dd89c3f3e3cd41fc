// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Keyed batch accumulation.
//!
//! The [`BatchAccumulator`] groups items by key and hands each group to a
//! flush handler as one unit. A group is flushed when it reaches the size
//! limit, when no new item has been appended for the idle timeout (debounce
//! from the latest append, not from creation), or when forced.
//!
//! Per key the lifecycle is `EMPTY → ACCUMULATING → FLUSHING → EMPTY`:
//! flushing removes the group from the map before the handler runs, so the
//! next append for that key starts a fresh group.
//!
//! Must be used from within a tokio runtime (idle timers are tasks).
//!
//! # Example
//!
//! ```
//! use std::sync::{Arc, Mutex};
//! use std::time::Duration;
//! use event_sync_engine::{BatchAccumulator, BatchConfig, FlushReason};
//!
//! # #[tokio::main(flavor = "current_thread")]
//! # async fn main() {
//! let flushed = Arc::new(Mutex::new(Vec::new()));
//! let sink = flushed.clone();
//! let accumulator: BatchAccumulator<i32> = BatchAccumulator::new(
//!     BatchConfig { size_limit: 2, idle_timeout: Duration::from_secs(60) },
//!     move |batch| sink.lock().unwrap().push(batch.items),
//! );
//!
//! assert_eq!(accumulator.append("feed", 1), None);
//! assert_eq!(accumulator.append("feed", 2), Some(FlushReason::Count));
//! assert_eq!(*flushed.lock().unwrap(), vec![vec![1, 2]]);
//! # }
//! ```

use std::borrow::Borrow;
use std::fmt::Debug;
use std::hash::Hash;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use tokio::task::AbortHandle;
use tokio::time::Instant;
use tracing::debug;

/// Batch flush trigger reason
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FlushReason {
    /// Size limit reached
    Count,
    /// Idle timeout elapsed since the last append
    Idle,
    /// Single key flushed on request
    Manual,
    /// Every key flushed for shutdown
    Shutdown,
}

impl std::fmt::Display for FlushReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Count => write!(f, "count"),
            Self::Idle => write!(f, "idle"),
            Self::Manual => write!(f, "manual"),
            Self::Shutdown => write!(f, "shutdown"),
        }
    }
}

/// Configuration for keyed batching
#[derive(Debug, Clone)]
pub struct BatchConfig {
    /// Flush as soon as a group holds this many items
    pub size_limit: usize,
    /// Flush after this long without an append
    pub idle_timeout: Duration,
}

impl Default for BatchConfig {
    fn default() -> Self {
        Self {
            size_limit: 10,
            idle_timeout: Duration::from_secs(60),
        }
    }
}

/// A group of items handed to the flush handler
#[derive(Debug)]
pub struct FlushBatch<T, K = String> {
    pub key: K,
    /// In append order
    pub items: Vec<T>,
    pub reason: FlushReason,
    pub created_at: Instant,
    pub last_append_at: Instant,
}

impl<T, K> FlushBatch<T, K> {
    #[must_use]
    pub fn len(&self) -> usize {
        self.items.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }
}

/// A group of items pending flush
struct PendingBatch<T> {
    items: Vec<T>,
    created_at: Instant,
    last_append_at: Instant,
    /// Identifies the idle timer allowed to flush this group
    generation: u64,
    timer: Option<AbortHandle>,
}

impl<T> PendingBatch<T> {
    fn new(now: Instant) -> Self {
        Self {
            items: Vec::new(),
            created_at: now,
            last_append_at: now,
            generation: 0,
            timer: None,
        }
    }

    fn cancel_timer(&mut self) {
        if let Some(timer) = self.timer.take() {
            timer.abort();
        }
    }

    fn into_flush<K>(mut self, key: K, reason: FlushReason) -> FlushBatch<T, K> {
        self.cancel_timer();
        FlushBatch {
            key,
            items: self.items,
            reason,
            created_at: self.created_at,
            last_append_at: self.last_append_at,
        }
    }
}

type FlushHandler<T, K> = Arc<dyn Fn(FlushBatch<T, K>) + Send + Sync>;

struct Shared<T, K> {
    config: BatchConfig,
    batches: DashMap<K, PendingBatch<T>>,
    generations: AtomicU64,
    on_flush: FlushHandler<T, K>,
}

impl<T, K> Shared<T, K>
where
    T: Send + Sync + 'static,
    K: Eq + Hash + Clone + Debug + Send + Sync + 'static,
{
    fn arm_timer(self: &Arc<Self>, key: K, batch: &mut PendingBatch<T>) {
        batch.cancel_timer();
        let generation = self.generations.fetch_add(1, Ordering::Relaxed) + 1;
        batch.generation = generation;

        let deadline = batch.last_append_at + self.config.idle_timeout;
        let shared = Arc::clone(self);
        let handle = tokio::spawn(async move {
            tokio::time::sleep_until(deadline).await;
            shared.flush_idle(&key, generation);
        });
        batch.timer = Some(handle.abort_handle());
    }

    fn flush_idle(&self, key: &K, generation: u64) {
        // A newer append re-armed the timer: this one is stale
        let Some((key, mut batch)) = self.batches.remove_if(key, |_, b| b.generation == generation) else {
            return;
        };
        // Our own task is finishing, nothing to abort
        batch.timer = None;
        self.dispatch(batch.into_flush(key, FlushReason::Idle));
    }

    fn dispatch(&self, batch: FlushBatch<T, K>) {
        debug!(key = ?batch.key, count = batch.len(), reason = %batch.reason, "Batch flushed");
        (self.on_flush)(batch);
    }
}

/// Accumulates items per key and flushes each key's group as one unit.
///
/// Keys live in a sharded concurrent map, so appends for unrelated keys
/// don't contend on a common lock while appends for one key are serialized.
/// Any hashable key works; structured keys avoid collisions between parts.
pub struct BatchAccumulator<T, K = String> {
    shared: Arc<Shared<T, K>>,
}

impl<T, K> BatchAccumulator<T, K>
where
    T: Send + Sync + 'static,
    K: Eq + Hash + Clone + Debug + Send + Sync + 'static,
{
    /// Create an accumulator. `on_flush` runs once per flushed group, on the
    /// appending thread for size-triggered and forced flushes and on a timer
    /// task for idle flushes. It is never called while internal locks are held.
    pub fn new<F>(config: BatchConfig, on_flush: F) -> Self
    where
        F: Fn(FlushBatch<T, K>) + Send + Sync + 'static,
    {
        Self {
            shared: Arc::new(Shared {
                config: BatchConfig {
                    size_limit: config.size_limit.max(1),
                    ..config
                },
                batches: DashMap::new(),
                generations: AtomicU64::new(0),
                on_flush: Arc::new(on_flush),
            }),
        }
    }

    #[must_use]
    pub fn config(&self) -> &BatchConfig {
        &self.shared.config
    }

    /// Append an item to its key's group.
    ///
    /// Returns `Some(FlushReason::Count)` when this append filled the group
    /// and the flush handler has already run.
    pub fn append(&self, key: impl Into<K>, item: T) -> Option<FlushReason> {
        let key = key.into();
        let now = Instant::now();
        let limit = self.shared.config.size_limit;

        let full = match self.shared.batches.entry(key.clone()) {
            Entry::Occupied(mut occupied) => {
                let batch = occupied.get_mut();
                batch.items.push(item);
                batch.last_append_at = now;
                if batch.items.len() >= limit {
                    let (key, batch) = occupied.remove_entry();
                    Some(batch.into_flush(key, FlushReason::Count))
                } else {
                    self.shared.arm_timer(key, batch);
                    None
                }
            }
            Entry::Vacant(vacant) => {
                let mut batch = PendingBatch::new(now);
                batch.items.push(item);
                if limit <= 1 {
                    Some(batch.into_flush(key, FlushReason::Count))
                } else {
                    self.shared.arm_timer(key, &mut batch);
                    vacant.insert(batch);
                    None
                }
            }
        };

        full.map(|batch| {
            self.shared.dispatch(batch);
            FlushReason::Count
        })
    }

    /// Flush one key's group now. Returns the number of items flushed.
    pub fn flush_key<Q>(&self, key: &Q) -> usize
    where
        K: Borrow<Q>,
        Q: Hash + Eq + ?Sized,
    {
        match self.shared.batches.remove(key) {
            Some((key, batch)) => {
                let flush = batch.into_flush(key, FlushReason::Manual);
                let count = flush.len();
                self.shared.dispatch(flush);
                count
            }
            None => 0,
        }
    }

    /// Flush every live group and cancel their timers. Returns the number of
    /// groups flushed.
    pub fn flush_all(&self) -> usize {
        let keys: Vec<K> = self.shared.batches.iter().map(|e| e.key().clone()).collect();
        let mut flushed = 0;
        for key in keys {
            if let Some((key, batch)) = self.shared.batches.remove(&key) {
                self.shared.dispatch(batch.into_flush(key, FlushReason::Shutdown));
                flushed += 1;
            }
        }
        flushed
    }

    /// Keys with a group currently accumulating.
    #[must_use]
    pub fn pending_keys(&self) -> Vec<K> {
        self.shared.batches.iter().map(|e| e.key().clone()).collect()
    }

    /// Items across all accumulating groups.
    #[must_use]
    pub fn pending_items(&self) -> usize {
        self.shared.batches.iter().map(|e| e.items.len()).sum()
    }

    /// Items accumulated for one key.
    #[must_use]
    pub fn len_of<Q>(&self, key: &Q) -> usize
    where
        K: Borrow<Q>,
        Q: Hash + Eq + ?Sized,
    {
        self.shared.batches.get(key).map_or(0, |b| b.items.len())
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.shared.batches.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use parking_lot::Mutex;

    type Recorded = Arc<Mutex<Vec<(Instant, FlushBatch<u32>)>>>;

    fn recording(size_limit: usize, idle_secs: u64) -> (BatchAccumulator<u32>, Recorded) {
        let recorded: Recorded = Arc::new(Mutex::new(Vec::new()));
        let sink = recorded.clone();
        let accumulator = BatchAccumulator::new(
            BatchConfig {
                size_limit,
                idle_timeout: Duration::from_secs(idle_secs),
            },
            move |batch| sink.lock().push((Instant::now(), batch)),
        );
        (accumulator, recorded)
    }

    #[tokio::test(start_paused = true)]
    async fn test_idle_flush_after_last_append() {
        let (acc, recorded) = recording(3, 60);
        let start = Instant::now();

        assert_eq!(acc.append("k", 1), None);
        tokio::time::advance(Duration::from_secs(1)).await;
        assert_eq!(acc.append("k", 2), None);

        tokio::time::sleep(Duration::from_secs(100)).await;

        let recorded = recorded.lock();
        assert_eq!(recorded.len(), 1);
        let (at, batch) = &recorded[0];
        assert_eq!(*at - start, Duration::from_secs(61));
        assert_eq!(batch.items, vec![1, 2]);
        assert_eq!(batch.reason, FlushReason::Idle);
        assert!(acc.is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_size_limit_flushes_synchronously() {
        let (acc, recorded) = recording(3, 60);

        assert_eq!(acc.append("k", 1), None);
        assert_eq!(acc.append("k", 2), None);
        assert_eq!(acc.append("k", 3), Some(FlushReason::Count));

        // No await between the append and this check
        {
            let recorded = recorded.lock();
            assert_eq!(recorded.len(), 1);
            assert_eq!(recorded[0].1.items, vec![1, 2, 3]);
            assert_eq!(recorded[0].1.reason, FlushReason::Count);
        }
        assert!(acc.is_empty());

        // The cancelled idle timer must not fire later
        tokio::time::sleep(Duration::from_secs(120)).await;
        assert_eq!(recorded.lock().len(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_debounce_restarts_on_every_append() {
        let (acc, recorded) = recording(100, 10);
        let start = Instant::now();

        for i in 0..5 {
            acc.append("k", i);
            tokio::time::advance(Duration::from_secs(9)).await;
        }
        assert!(recorded.lock().is_empty());

        tokio::time::sleep(Duration::from_secs(30)).await;
        let recorded = recorded.lock();
        assert_eq!(recorded.len(), 1);
        // Last append at t=36, flush at t=46
        assert_eq!(recorded[0].0 - start, Duration::from_secs(46));
        assert_eq!(recorded[0].1.items, vec![0, 1, 2, 3, 4]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_keys_are_independent() {
        let (acc, recorded) = recording(2, 60);

        acc.append("a", 1);
        acc.append("b", 10);
        assert_eq!(acc.append("a", 2), Some(FlushReason::Count));

        assert_eq!(acc.len_of("a"), 0);
        assert_eq!(acc.len_of("b"), 1);
        assert_eq!(acc.pending_keys(), vec!["b".to_string()]);

        let recorded = recorded.lock();
        assert_eq!(recorded.len(), 1);
        assert_eq!(recorded[0].1.key, "a");
    }

    #[tokio::test(start_paused = true)]
    async fn test_flush_all_cancels_timers() {
        let (acc, recorded) = recording(10, 60);

        acc.append("a", 1);
        acc.append("a", 2);
        acc.append("b", 3);
        assert_eq!(acc.pending_items(), 3);

        assert_eq!(acc.flush_all(), 2);
        assert!(acc.is_empty());

        tokio::time::sleep(Duration::from_secs(120)).await;
        let recorded = recorded.lock();
        assert_eq!(recorded.len(), 2);
        assert!(recorded.iter().all(|(_, b)| b.reason == FlushReason::Shutdown));
        let total: usize = recorded.iter().map(|(_, b)| b.len()).sum();
        assert_eq!(total, 3);
    }

    #[tokio::test(start_paused = true)]
    async fn test_flush_key() {
        let (acc, recorded) = recording(10, 60);

        acc.append("a", 1);
        acc.append("b", 2);
        assert_eq!(acc.flush_key("a"), 1);
        assert_eq!(acc.flush_key("missing"), 0);

        assert_eq!(recorded.lock()[0].1.reason, FlushReason::Manual);
        assert_eq!(acc.len_of("b"), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_next_group_after_flush_starts_fresh() {
        let (acc, recorded) = recording(2, 60);

        acc.append("k", 1);
        acc.append("k", 2);
        acc.append("k", 3);

        assert_eq!(acc.len_of("k"), 1);
        tokio::time::sleep(Duration::from_secs(61)).await;

        let recorded = recorded.lock();
        assert_eq!(recorded.len(), 2);
        assert_eq!(recorded[1].1.items, vec![3]);
        assert_eq!(recorded[1].1.reason, FlushReason::Idle);
    }

    #[tokio::test(start_paused = true)]
    async fn test_limit_of_one_flushes_every_append() {
        let (acc, recorded) = recording(1, 60);

        assert_eq!(acc.append("k", 1), Some(FlushReason::Count));
        assert_eq!(acc.append("k", 2), Some(FlushReason::Count));
        assert!(acc.is_empty());
        assert_eq!(recorded.lock().len(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_structured_keys_stay_apart() {
        // Joined as "a/b/c" both keys would collide
        let recorded: Arc<Mutex<Vec<FlushBatch<u32, (String, String)>>>> = Arc::new(Mutex::new(Vec::new()));
        let sink = recorded.clone();
        let acc: BatchAccumulator<u32, (String, String)> = BatchAccumulator::new(
            BatchConfig { size_limit: 2, idle_timeout: Duration::from_secs(60) },
            move |batch| sink.lock().push(batch),
        );

        let first = ("a/b".to_string(), "c".to_string());
        let second = ("a".to_string(), "b/c".to_string());
        assert_eq!(acc.append(first.clone(), 1), None);
        assert_eq!(acc.append(second.clone(), 2), None);
        assert!(recorded.lock().is_empty());
        assert_eq!(acc.len_of(&first), 1);
        assert_eq!(acc.len_of(&second), 1);

        assert_eq!(acc.flush_all(), 2);
        let recorded = recorded.lock();
        let of = |key: &(String, String)| recorded.iter().find(|b| &b.key == key).map(|b| b.items.clone());
        assert_eq!(of(&first), Some(vec![1]));
        assert_eq!(of(&second), Some(vec![2]));
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_appends_never_exceed_limit() {
        let recorded: Arc<Mutex<Vec<Vec<u32>>>> = Arc::new(Mutex::new(Vec::new()));
        let sink = recorded.clone();
        let acc: Arc<BatchAccumulator<u32>> = Arc::new(BatchAccumulator::new(
            BatchConfig { size_limit: 5, idle_timeout: Duration::from_secs(3600) },
            move |batch: FlushBatch<u32>| sink.lock().push(batch.items),
        ));

        let mut handles = Vec::new();
        for t in 0..4u32 {
            let acc = acc.clone();
            handles.push(tokio::spawn(async move {
                for i in 0..25u32 {
                    acc.append("shared", t * 100 + i);
                }
            }));
        }
        for h in handles {
            h.await.unwrap();
        }
        acc.flush_all();

        let recorded = recorded.lock();
        assert!(recorded.iter().all(|b| b.len() <= 5));
        let total: usize = recorded.iter().map(Vec::len).sum();
        assert_eq!(total, 100);
    }
}
