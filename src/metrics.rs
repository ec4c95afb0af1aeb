use serde::Serialize;
use std::sync::atomic::{AtomicU64, Ordering};

/// Thread-safe counters describing query activity.
#[derive(Debug, Default)]
pub struct QueryMetrics {
    questions_answered: AtomicU64,
    retrievals: AtomicU64,
    generation_failures: AtomicU64,
    reloads: AtomicU64,
}

impl QueryMetrics {
    /// Create an empty metrics accumulator.
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a completed retrieval (with or without generation).
    pub fn record_retrieval(&self) {
        self.retrievals.fetch_add(1, Ordering::Relaxed);
    }

    /// Record an answered question.
    pub fn record_answer(&self) {
        self.questions_answered.fetch_add(1, Ordering::Relaxed);
    }

    /// Record a generation backend failure after successful retrieval.
    pub fn record_generation_failure(&self) {
        self.generation_failures.fetch_add(1, Ordering::Relaxed);
    }

    /// Record a successful index reload.
    pub fn record_reload(&self) {
        self.reloads.fetch_add(1, Ordering::Relaxed);
    }

    /// Return a snapshot of the current counters.
    pub fn snapshot(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            questions_answered: self.questions_answered.load(Ordering::Relaxed),
            retrievals: self.retrievals.load(Ordering::Relaxed),
            generation_failures: self.generation_failures.load(Ordering::Relaxed),
            reloads: self.reloads.load(Ordering::Relaxed),
        }
    }
}

/// Immutable view of query counters used for reporting.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct MetricsSnapshot {
    /// Questions answered by the generation backend since startup.
    pub questions_answered: u64,
    /// Retrievals served, including those behind answered questions.
    pub retrievals: u64,
    /// Generation calls that failed after retrieval succeeded.
    pub generation_failures: u64,
    /// Successful index reloads.
    pub reloads: u64,
}
