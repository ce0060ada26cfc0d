//! Per-queue counters.
//!
//! Written by the queue's own loop, read from anywhere through
//! [`QueueCounters::snapshot`]. All accesses are relaxed; a snapshot is a
//! set of independent counters, not a consistent cut.

use core::sync::atomic::{AtomicU64, Ordering};

#[derive(Debug, Default)]
pub struct QueueCounters {
    produced: AtomicU64,
    completed: AtomicU64,
    queue_depth: AtomicU64,
    bounced: AtomicU64,
    dropped: AtomicU64,
    dma_fallbacks: AtomicU64,
    iterations: AtomicU64,
    suspends: AtomicU64,
}

/// Point-in-time copy of a queue's counters.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct CounterSnapshot {
    /// Packets posted to the ring (Tx) or delivered upstream (Rx).
    pub produced: u64,
    /// Buffer lists handed back through the completion callback.
    pub completed: u64,
    /// Buffer lists accepted but not yet completed.
    pub queue_depth: u64,
    /// Packets copied into bounce buffers.
    pub bounced: u64,
    /// Packets ignored (Tx) or discarded as malformed (Rx).
    pub dropped: u64,
    /// DMA mapping failures that fell back to bounce.
    pub dma_fallbacks: u64,
    /// Loop iterations.
    pub iterations: u64,
    /// Times the loop parked waiting for work.
    pub suspends: u64,
}

impl QueueCounters {
    pub const fn new() -> Self {
        Self {
            produced: AtomicU64::new(0),
            completed: AtomicU64::new(0),
            queue_depth: AtomicU64::new(0),
            bounced: AtomicU64::new(0),
            dropped: AtomicU64::new(0),
            dma_fallbacks: AtomicU64::new(0),
            iterations: AtomicU64::new(0),
            suspends: AtomicU64::new(0),
        }
    }

    pub fn record_produced(&self, count: u64) {
        self.produced.fetch_add(count, Ordering::Relaxed);
    }

    /// Lists entered the queue.
    pub fn record_accepted(&self, count: u64) {
        self.queue_depth.fetch_add(count, Ordering::Relaxed);
    }

    /// Lists left the queue through the completion callback.
    pub fn record_completed(&self, count: u64) {
        self.completed.fetch_add(count, Ordering::Relaxed);
        // Rx lists are never "accepted", so depth only falls for Tx.
        let _ = self
            .queue_depth
            .fetch_update(Ordering::Relaxed, Ordering::Relaxed, |d| Some(d.saturating_sub(count)));
    }

    pub fn record_bounced(&self) {
        self.bounced.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_dropped(&self) {
        self.dropped.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_dma_fallback(&self) {
        self.dma_fallbacks.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_iteration(&self) {
        self.iterations.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_suspend(&self) {
        self.suspends.fetch_add(1, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> CounterSnapshot {
        CounterSnapshot {
            produced: self.produced.load(Ordering::Relaxed),
            completed: self.completed.load(Ordering::Relaxed),
            queue_depth: self.queue_depth.load(Ordering::Relaxed),
            bounced: self.bounced.load(Ordering::Relaxed),
            dropped: self.dropped.load(Ordering::Relaxed),
            dma_fallbacks: self.dma_fallbacks.load(Ordering::Relaxed),
            iterations: self.iterations.load(Ordering::Relaxed),
            suspends: self.suspends.load(Ordering::Relaxed),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_depth_tracks_accept_and_complete() {
        let c = QueueCounters::new();
        c.record_accepted(3);
        c.record_completed(2);
        let s = c.snapshot();
        assert_eq!((s.queue_depth, s.completed), (1, 2));
        c.record_completed(5);
        assert_eq!(c.snapshot().queue_depth, 0);
    }
}
