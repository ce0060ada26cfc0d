//! Queue loops.
//!
//! - `notification`: armed wake primitives
//! - `timing`: tick sources for the loop budget
//! - `context`: per-queue execution context and its lifecycle
//! - `worker`: dedicated worker threads (`std` only)

pub mod context;
pub mod notification;
pub mod timing;
#[cfg(feature = "std")]
pub mod worker;

// Re-exports
pub use context::{ContextState, ExecutionContext, QueueSignals, QueueWork, RunOutcome};
pub use notification::{Notification, WakeEvent};
#[cfg(feature = "std")]
pub use timing::{default_clock, MonotonicClock};
pub use timing::{get_tsc, TickSource, TscClock};
#[cfg(feature = "std")]
pub use worker::{DefaultHooks, WorkerHooks, WorkerSettings};
