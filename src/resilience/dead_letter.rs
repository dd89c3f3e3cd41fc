// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Bounded record of permanently failed deliveries.
//!
//! Nothing is redelivered from here: entries exist so operators can inspect
//! what was lost. When full, the oldest entry is dropped.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicU64, Ordering};

use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use tracing::warn;

use crate::event::Event;

/// A delivery that will not be attempted again.
#[derive(Debug, Clone)]
pub struct DeadLetterEntry {
    /// Events delivered together (one for immediate sends, the whole group for batches)
    pub events: Vec<Event>,
    pub target: String,
    /// Delivery attempts made, including the first
    pub attempts: u32,
    pub last_error: String,
    pub failed_at: DateTime<Utc>,
}

/// Fixed-capacity FIFO of [`DeadLetterEntry`]s.
pub struct DeadLetterQueue {
    entries: RwLock<VecDeque<DeadLetterEntry>>,
    max_size: usize,
    total: AtomicU64,
}

impl DeadLetterQueue {
    #[must_use]
    pub fn new(max_size: usize) -> Self {
        Self {
            entries: RwLock::new(VecDeque::with_capacity(max_size.min(1024))),
            max_size,
            total: AtomicU64::new(0),
        }
    }

    pub fn add(&self, events: Vec<Event>, target: impl Into<String>, attempts: u32, last_error: impl Into<String>) {
        self.total.fetch_add(1, Ordering::Relaxed);
        if self.max_size == 0 {
            return;
        }
        let entry = DeadLetterEntry {
            events,
            target: target.into(),
            attempts,
            last_error: last_error.into(),
            failed_at: Utc::now(),
        };

        let mut entries = self.entries.write();
        if entries.len() >= self.max_size {
            if let Some(removed) = entries.pop_front() {
                warn!(target = %removed.target, events = removed.events.len(), "Dead letter queue full, dropping oldest entry");
            }
        }
        entries.push_back(entry);
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.read().len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.read().is_empty()
    }

    /// Entries ever added, including ones since dropped.
    #[must_use]
    pub fn total(&self) -> u64 {
        self.total.load(Ordering::Relaxed)
    }

    /// Oldest first.
    #[must_use]
    pub fn entries(&self) -> Vec<DeadLetterEntry> {
        self.entries.read().iter().cloned().collect()
    }

    pub fn clear(&self) {
        self.entries.write().clear();
    }
}

impl Default for DeadLetterQueue {
    fn default() -> Self {
        Self::new(1000)
    }
}
