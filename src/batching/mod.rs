//! Per-key batching with a debounce flush timer.

pub mod accumulator;
