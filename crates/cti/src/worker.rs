// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! The worker pool (C3). §9 "Worker pinning vs. goroutines" licenses
//! dropping the explicit event-loop pool when the runtime's tasks are
//! cheap: tokio's tasks are exactly that, so each session gets its own
//! task (spawned by the acceptor) rather than being pumped by a
//! hand-rolled loop, and `tokio::spawn`'s own work-stealing scheduler
//! stands in for the N event loops. [`WorkerPool`] keeps the
//! round-robin *assignment* semantics (§4.4) as a label attached to each
//! session — used for logging/metrics, not for routing I/O, since every
//! session's socket reads/writes/timers already live exclusively inside
//! its own task regardless of which OS thread runs it.

use std::sync::atomic::{AtomicUsize, Ordering};

/// `N = max(1, idealThreadCount - 1)` (§4.3).
pub fn worker_count() -> usize {
    std::thread::available_parallelism().map(|n| n.get()).unwrap_or(1).saturating_sub(1).max(1)
}

/// Round-robin assigner: `(current + 1) mod N` (§4.4).
pub struct WorkerPool {
    count: usize,
    next: AtomicUsize,
}

impl WorkerPool {
    pub fn new(count: usize) -> Self {
        Self { count: count.max(1), next: AtomicUsize::new(0) }
    }

    /// Assign the next worker id in round-robin order: `(current + 1)
    /// mod N`.
    pub fn assign(&self) -> usize {
        let current = self.next.fetch_add(1, Ordering::Relaxed);
        (current + 1) % self.count
    }
}
