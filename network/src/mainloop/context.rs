//! Queue execution context.
//!
//! One cooperative loop per queue. The loop owns the queue's translator and
//! adapter queue (through [`QueueWork`]) and is the only writer of the ring
//! `end` / `next` cursors.
//!
//! # Lifecycle
//!
//! ```text
//!   Created ──start──> Started ──stop request──> Stopping ──quiesced──> Stopped
//!                         ^                                                │
//!                         └────────────────────start──────────────────────┘
//! ```
//!
//! # One run
//!
//! ```text
//!   iterate ─progress─> budget left? ──yes──> iterate
//!      │                    └─no──> Yielded
//!      └─idle─> arm · recheck ──work──> disarm, iterate
//!                       └─none──> Suspended (wait on the wake event)
//! ```
//!
//! A run never blocks. The caller waits on [`QueueSignals::wake`] after
//! `Suspended` (worker thread) or simply polls again later.

use alloc::boxed::Box;
use alloc::string::String;
use alloc::sync::Arc;
use core::sync::atomic::{AtomicBool, Ordering};

use super::notification::{Notification, WakeEvent};
use super::timing::TickSource;
use crate::error::{DatapathError, Result};
use crate::queue::counters::QueueCounters;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ContextState {
    Created,
    Started,
    Stopping,
    Stopped,
}

/// Why a run returned.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunOutcome {
    /// Nothing to do; notifications are armed.
    Suspended,
    /// Tick budget used up with work remaining.
    Yielded,
    /// The context is not running (stopped or never started).
    Stopped,
}

/// Signals shared between a loop and everything that can wake it.
#[derive(Debug)]
pub struct QueueSignals {
    pub wake: Arc<WakeEvent>,
    /// Upstream work (Tx enqueue, Rx buffer returned to the pool).
    pub new_work: Arc<Notification>,
    /// Adapter returned slots.
    pub adapter: Arc<Notification>,
    stop_requested: AtomicBool,
}

impl QueueSignals {
    pub fn new() -> Self {
        let wake = Arc::new(WakeEvent::new());
        Self {
            new_work: Arc::new(Notification::new(wake.clone())),
            adapter: Arc::new(Notification::new(wake.clone())),
            wake,
            stop_requested: AtomicBool::new(false),
        }
    }

    /// Ask the loop to stop. Observed on its next iteration.
    pub fn request_stop(&self) {
        self.stop_requested.store(true, Ordering::SeqCst);
        self.wake.set();
    }

    pub fn stop_requested(&self) -> bool {
        self.stop_requested.load(Ordering::SeqCst)
    }

    /// Wake the loop regardless of arming.
    pub fn kick(&self) {
        self.wake.set();
    }

    fn disarm(&self) {
        self.new_work.disarm();
        self.adapter.disarm();
    }
}

impl Default for QueueSignals {
    fn default() -> Self {
        Self::new()
    }
}

/// What a loop drives: one queue's translator plus its adapter queue.
pub trait QueueWork: Send {
    /// Hand the rings to the adapter.
    fn start(&mut self);

    /// One pass. Returns whether anything moved (packets translated,
    /// posted, reclaimed or delivered).
    ///
    /// While `stopping`, new work is refused and only reclamation runs.
    fn iterate(&mut self, stopping: bool) -> bool;

    /// Work that a pass would pick up, checked after arming.
    fn has_new_work(&self) -> bool;

    /// Forward the arming decision to the adapter.
    fn set_armed(&mut self, armed: bool);

    /// Tell the adapter to give everything back.
    fn cancel(&mut self);

    /// Abandon work not yet posted.
    fn abort(&mut self);

    /// Every slot is back and nothing is left to reclaim or deliver.
    fn is_quiesced(&self) -> bool;

    /// Final teardown once quiesced.
    fn stop(&mut self);

    /// Settle anything still held before the queue is dropped.
    fn teardown(&mut self) {}
}

pub struct ExecutionContext {
    name: String,
    work: Box<dyn QueueWork>,
    state: ContextState,
    signals: Arc<QueueSignals>,
    clock: Arc<dyn TickSource>,
    /// 0 = unlimited.
    budget_ticks: u64,
    counters: Arc<QueueCounters>,
}

impl ExecutionContext {
    pub fn new(
        name: String,
        work: Box<dyn QueueWork>,
        signals: Arc<QueueSignals>,
        clock: Arc<dyn TickSource>,
        budget_ticks: u64,
        counters: Arc<QueueCounters>,
    ) -> Self {
        Self {
            name,
            work,
            state: ContextState::Created,
            signals,
            clock,
            budget_ticks,
            counters,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn state(&self) -> ContextState {
        self.state
    }

    pub fn signals(&self) -> &Arc<QueueSignals> {
        &self.signals
    }

    pub fn start(&mut self) -> Result<()> {
        match self.state {
            ContextState::Created | ContextState::Stopped => {
                self.signals.stop_requested.store(false, Ordering::SeqCst);
                self.work.start();
                self.state = ContextState::Started;
                log::info!("{}: started", self.name);
                Ok(())
            }
            _ => Err(DatapathError::InvalidState),
        }
    }

    /// Run until suspended, out of budget, or stopped.
    pub fn run(&mut self) -> RunOutcome {
        if matches!(self.state, ContextState::Created | ContextState::Stopped) {
            return RunOutcome::Stopped;
        }
        self.wake_up();
        let started = self.clock.now();

        loop {
            if self.state == ContextState::Started && self.signals.stop_requested() {
                self.begin_stop();
            }

            self.counters.record_iteration();
            let stopping = self.state == ContextState::Stopping;
            let progressed = self.work.iterate(stopping);

            if stopping && self.work.is_quiesced() {
                self.work.stop();
                self.state = ContextState::Stopped;
                log::info!("{}: stopped", self.name);
                return RunOutcome::Stopped;
            }

            if !progressed && self.try_suspend() {
                return RunOutcome::Suspended;
            }

            if self.budget_ticks != 0 && self.clock.now().wrapping_sub(started) >= self.budget_ticks {
                return RunOutcome::Yielded;
            }
        }
    }

    /// Consume a context that is not running.
    ///
    /// # Panics
    /// Panics if the context is started or stopping.
    pub fn destroy(mut self) {
        assert!(
            matches!(self.state, ContextState::Created | ContextState::Stopped),
            "BUG: destroying running context {} ({:?})",
            self.name,
            self.state
        );
        self.work.teardown();
        log::info!("{}: destroyed", self.name);
    }

    fn begin_stop(&mut self) {
        log::info!("{}: stopping", self.name);
        self.work.cancel();
        self.work.abort();
        self.state = ContextState::Stopping;
    }

    fn wake_up(&mut self) {
        self.signals.wake.take();
        self.signals.disarm();
        self.work.set_armed(false);
    }

    /// Arm, then recheck. Returns `true` if the loop may suspend.
    fn try_suspend(&mut self) -> bool {
        self.signals.new_work.arm();
        self.signals.adapter.arm();
        self.work.set_armed(true);

        let stop_pending = self.state == ContextState::Started && self.signals.stop_requested();
        if stop_pending || self.work.has_new_work() {
            self.signals.disarm();
            self.work.set_armed(false);
            return false;
        }
        self.counters.record_suspend();
        log::trace!("{}: suspended", self.name);
        true
    }
}

impl core::fmt::Debug for ExecutionContext {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("ExecutionContext")
            .field("name", &self.name)
            .field("state", &self.state)
            .field("budget_ticks", &self.budget_ticks)
            .finish()
    }
}
