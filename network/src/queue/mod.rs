//! Queue control plane.
//!
//! - `control`: [`QueueControl`], owner of every queue of one adapter
//! - `tx` / `rx`: the per-direction work a queue's loop drives
//! - `counters`: per-queue statistics

pub mod control;
pub mod counters;
pub mod rx;
pub mod tx;

// Re-exports
pub use control::QueueControl;
pub use counters::{CounterSnapshot, QueueCounters};
pub use tx::TxIngress;

use crate::config::QueueKind;
use crate::types::NblChain;

/// Names one queue of a [`QueueControl`].
///
/// A handle outlives its queue harmlessly: slots are reused with a new
/// generation, so a stale handle is rejected with `InvalidQueue`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct QueueHandle {
    pub(crate) slot: u32,
    pub(crate) generation: u32,
    pub kind: QueueKind,
}

/// Receives buffer lists leaving a queue.
///
/// Tx: every enqueued list, exactly once, with its completion status.
/// Rx: received lists whose buffers are lent from the receive pool.
///
/// Runs on the queue's loop; it should hand the chain off quickly.
pub trait CompletionCallback: Send {
    fn complete(&mut self, chain: NblChain);
}

impl<F> CompletionCallback for F
where
    F: FnMut(NblChain) + Send,
{
    fn complete(&mut self, chain: NblChain) {
        self(chain)
    }
}
