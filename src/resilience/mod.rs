//! Failure handling: backoff policy, retry queue, dead letters.

pub mod dead_letter;
pub mod retry;
pub mod scheduler;
