//! Queue control.
//!
//! [`QueueControl`] owns every queue of one adapter: it resolves queue
//! configs against the adapter's capabilities, builds the rings, translator
//! and adapter queue, and drives the queues' execution contexts through the
//! datapath lifecycle.
//!
//! ```text
//!   create_queue ─┬─> Created ──start()──> Started ──stop()──> Stopped ──destroy_queue
//!                 └─ (controller running: started immediately)
//! ```
//!
//! In polled mode every context stays here and [`QueueControl::poll`] runs
//! them. With dedicated threads a context moves into its worker on start and
//! comes back when the worker is joined on stop.

use alloc::boxed::Box;
use alloc::format;
use alloc::sync::Arc;
use alloc::vec::Vec;

use dma_pool::DmaArena;

use super::counters::{CounterSnapshot, QueueCounters};
use super::rx::RxQueue;
use super::tx::{TxIngress, TxQueue};
use super::{CompletionCallback, QueueHandle};
use crate::config::{DatapathCapabilities, DriverConfig, QueueConfig, QueueKind};
use crate::dma::ReleaseHook;
use crate::driver::{AdapterNotifier, NetAdapter};
use crate::error::{DatapathError, Result};
use crate::mainloop::{ContextState, ExecutionContext, QueueSignals, QueueWork, RunOutcome, TickSource};
use crate::ring::RingSet;
use crate::xlat::{RxTranslator, TxTranslator};

#[cfg(feature = "std")]
use crate::config::ExecutionMode;
#[cfg(feature = "std")]
use crate::error::Resource;
#[cfg(feature = "std")]
use crate::mainloop::worker::{self, DefaultHooks, WorkerHooks, WorkerSettings};
#[cfg(feature = "std")]
use std::thread::JoinHandle;

/// Where a queue's context currently lives.
enum Runner {
    Local(ExecutionContext),
    #[cfg(feature = "std")]
    Worker(JoinHandle<ExecutionContext>),
    /// The worker thread died; the context went with it.
    Lost,
}

struct QueueEntry {
    generation: u32,
    config: QueueConfig,
    signals: Arc<QueueSignals>,
    counters: Arc<QueueCounters>,
    ingress: Option<TxIngress>,
    runner: Runner,
}

/// Starts contexts in the configured execution mode.
struct Launcher {
    config: Arc<DriverConfig>,
    #[cfg(feature = "std")]
    hooks: Arc<dyn WorkerHooks>,
}

impl Launcher {
    fn start(&self, entry: &mut QueueEntry) -> Result<()> {
        let runner = core::mem::replace(&mut entry.runner, Runner::Lost);
        let mut ctx = match runner {
            Runner::Local(ctx) => ctx,
            other => {
                entry.runner = other;
                return Err(DatapathError::InvalidState);
            }
        };
        if let Err(err) = ctx.start() {
            entry.runner = Runner::Local(ctx);
            return Err(err);
        }

        #[cfg(feature = "std")]
        if self.config.execution == ExecutionMode::DedicatedThread {
            let settings = WorkerSettings {
                priority: self.config.thread_priority,
                affinity: self.config.thread_affinity,
            };
            return match worker::spawn(ctx, self.hooks.clone(), settings) {
                Ok(handle) => {
                    entry.runner = Runner::Worker(handle);
                    Ok(())
                }
                Err(err) => {
                    log::error!("queue {}: worker spawn failed: {}", entry.config.id, err);
                    Err(DatapathError::ResourceExhausted(Resource::WorkerThread))
                }
            };
        }

        entry.runner = Runner::Local(ctx);
        Ok(())
    }

    /// Request a stop and wait until the context reaches `Stopped`.
    fn stop(&self, entry: &mut QueueEntry) {
        entry.signals.request_stop();
        let runner = core::mem::replace(&mut entry.runner, Runner::Lost);
        entry.runner = match runner {
            Runner::Local(mut ctx) => {
                if matches!(ctx.state(), ContextState::Started | ContextState::Stopping) {
                    while ctx.run() != RunOutcome::Stopped {
                        core::hint::spin_loop();
                    }
                }
                Runner::Local(ctx)
            }
            #[cfg(feature = "std")]
            Runner::Worker(handle) => match handle.join() {
                Ok(ctx) => Runner::Local(ctx),
                Err(_) => {
                    log::error!("queue {}: worker panicked", entry.config.id);
                    Runner::Lost
                }
            },
            Runner::Lost => Runner::Lost,
        };
    }
}

/// Owner of all queues of one adapter.
pub struct QueueControl<A: NetAdapter> {
    adapter: A,
    caps: DatapathCapabilities,
    config: Arc<DriverConfig>,
    arena: DmaArena,
    clock: Arc<dyn TickSource>,
    launcher: Launcher,
    slots: Vec<Option<QueueEntry>>,
    next_generation: u32,
    running: bool,
}

impl<A: NetAdapter> QueueControl<A> {
    /// # Arguments
    /// - `adapter`: the driver whose queues this controller owns
    /// - `config`: driver knobs, fixed for the controller's lifetime
    /// - `arena`: DMA memory for bounce and receive pools
    pub fn new(adapter: A, config: DriverConfig, arena: DmaArena) -> Result<Self> {
        let caps = adapter.capabilities();
        caps.validate()?;
        let config = Arc::new(config);

        #[cfg(feature = "std")]
        let clock = crate::mainloop::default_clock();
        #[cfg(not(feature = "std"))]
        let clock: Arc<dyn TickSource> = Arc::new(crate::mainloop::TscClock);

        log::info!(
            "queue control: media {:?}, execution {:?}, budget {} us",
            caps.media,
            config.execution,
            config.loop_budget_us
        );
        Ok(Self {
            adapter,
            caps,
            launcher: Launcher {
                config: config.clone(),
                #[cfg(feature = "std")]
                hooks: Arc::new(DefaultHooks),
            },
            config,
            arena,
            clock,
            slots: Vec::new(),
            next_generation: 1,
            running: false,
        })
    }

    /// Replace the loop budget's tick source. Its rate must match
    /// `DriverConfig::tick_frequency`.
    pub fn with_clock(mut self, clock: Arc<dyn TickSource>) -> Self {
        self.clock = clock;
        self
    }

    /// Hooks applying worker priority and affinity.
    #[cfg(feature = "std")]
    pub fn with_worker_hooks(mut self, hooks: Arc<dyn WorkerHooks>) -> Self {
        self.launcher.hooks = hooks;
        self
    }

    pub fn adapter(&self) -> &A {
        &self.adapter
    }

    pub fn adapter_mut(&mut self) -> &mut A {
        &mut self.adapter
    }

    pub fn capabilities(&self) -> &DatapathCapabilities {
        &self.caps
    }

    pub fn config(&self) -> &DriverConfig {
        &self.config
    }

    pub fn is_running(&self) -> bool {
        self.running
    }

    /// Number of live queues.
    pub fn queue_count(&self) -> usize {
        self.slots.iter().flatten().count()
    }

    // ═══════════════════════════════════════════════════════════════════════
    // Queue lifetime
    // ═══════════════════════════════════════════════════════════════════════

    /// Create a queue. Started right away if the controller is running.
    pub fn create_queue<C>(&mut self, config: QueueConfig, callback: C) -> Result<QueueHandle>
    where
        C: CompletionCallback + 'static,
    {
        let resolved = config.resolve(&self.caps)?;
        let in_use = self
            .slots
            .iter()
            .flatten()
            .any(|e| e.config.kind == resolved.kind && e.config.id == resolved.id);
        if in_use {
            return Err(DatapathError::InvalidConfig("queue id already in use"));
        }

        let rings = RingSet::new(&resolved)?;
        let signals = Arc::new(QueueSignals::new());
        let counters = Arc::new(QueueCounters::new());
        let notifier = AdapterNotifier::new(signals.adapter.clone());
        let callback: Box<dyn CompletionCallback> = Box::new(callback);

        let (work, ingress) = match resolved.kind {
            QueueKind::Tx => {
                let platform = self.adapter.dma_adapter();
                let translator =
                    TxTranslator::new(rings, &self.caps, &self.config, platform, &self.arena, counters.clone())?;
                let queue = self.adapter.create_tx_queue(&resolved, notifier)?;
                let ingress = TxIngress::new(signals.new_work.clone(), counters.clone());
                let work: Box<dyn QueueWork> =
                    Box::new(TxQueue::new(translator, queue, ingress.clone(), callback, counters.clone()));
                (work, Some(ingress))
            }
            QueueKind::Rx => {
                let translator = RxTranslator::new(rings, &self.caps, &self.config, &self.arena, counters.clone())?;
                let queue = self.adapter.create_rx_queue(&resolved, notifier)?;
                let hook: Arc<dyn ReleaseHook> = signals.new_work.clone();
                let work: Box<dyn QueueWork> = Box::new(RxQueue::new(translator, queue, callback, counters.clone(), hook));
                (work, None)
            }
        };

        let name = match resolved.kind {
            QueueKind::Tx => format!("tx{}", resolved.id),
            QueueKind::Rx => format!("rx{}", resolved.id),
        };
        let ctx = ExecutionContext::new(
            name,
            work,
            signals.clone(),
            self.clock.clone(),
            self.config.loop_budget_ticks(),
            counters.clone(),
        );

        let generation = self.next_generation;
        self.next_generation = self.next_generation.wrapping_add(1).max(1);
        let mut entry = QueueEntry {
            generation,
            config: resolved,
            signals,
            counters,
            ingress,
            runner: Runner::Local(ctx),
        };
        if self.running {
            self.launcher.start(&mut entry)?;
        }

        let slot = match self.slots.iter().position(Option::is_none) {
            Some(slot) => {
                self.slots[slot] = Some(entry);
                slot
            }
            None => {
                self.slots.push(Some(entry));
                self.slots.len() - 1
            }
        };
        log::info!(
            "queue {:?} {}: created, rings {}/{}, extensions {:?}",
            resolved.kind,
            resolved.id,
            resolved.packet_ring_size,
            resolved.fragment_ring_size,
            resolved.extensions
        );
        Ok(QueueHandle {
            slot: slot as u32,
            generation,
            kind: resolved.kind,
        })
    }

    /// Stop (if running) and drop a queue.
    ///
    /// Tx lists still held by the queue complete with `Paused` before this
    /// returns.
    pub fn destroy_queue(&mut self, handle: QueueHandle) -> Result<()> {
        let slot = self.slot_of(handle)?;
        let Some(mut entry) = self.slots[slot].take() else {
            return Err(DatapathError::InvalidQueue);
        };
        self.launcher.stop(&mut entry);
        if let Runner::Local(ctx) = entry.runner {
            ctx.destroy();
        }
        Ok(())
    }

    // ═══════════════════════════════════════════════════════════════════════
    // Datapath lifecycle
    // ═══════════════════════════════════════════════════════════════════════

    /// Start every queue.
    ///
    /// All or nothing: if one queue fails to start, the queues already
    /// started are stopped again and the controller stays stopped.
    pub fn start(&mut self) -> Result<()> {
        if self.running {
            return Err(DatapathError::InvalidState);
        }
        for index in 0..self.slots.len() {
            let Some(entry) = self.slots[index].as_mut() else {
                continue;
            };
            if let Err(err) = self.launcher.start(entry) {
                log::error!("queue {:?} {}: start failed: {}", entry.config.kind, entry.config.id, err);
                for started in self.slots[..index].iter_mut().flatten() {
                    self.launcher.stop(started);
                }
                return Err(err);
            }
        }
        self.running = true;
        Ok(())
    }

    /// Stop every queue and wait until each has drained.
    ///
    /// Returns once every adapter-owned slot is back and every accepted Tx
    /// list has completed.
    pub fn stop(&mut self) {
        if !self.running {
            return;
        }
        // Signal all first so workers wind down in parallel.
        for entry in self.slots.iter().flatten() {
            entry.signals.request_stop();
        }
        for entry in self.slots.iter_mut().flatten() {
            self.launcher.stop(entry);
        }
        self.running = false;
    }

    /// Run every locally held queue once.
    ///
    /// Returns the number of queues that used up their budget with work
    /// remaining.
    pub fn poll(&mut self) -> usize {
        let mut busy = 0;
        for entry in self.slots.iter_mut().flatten() {
            if let Runner::Local(ctx) = &mut entry.runner {
                if ctx.run() == RunOutcome::Yielded {
                    busy += 1;
                }
            }
        }
        busy
    }

    // ═══════════════════════════════════════════════════════════════════════
    // Per-queue access
    // ═══════════════════════════════════════════════════════════════════════

    /// Hand a chain to a Tx queue.
    pub fn enqueue(&self, handle: QueueHandle, chain: crate::types::NblChain) -> Result<()> {
        self.ingress(handle)?.enqueue(chain);
        Ok(())
    }

    /// Cloneable producer handle of a Tx queue.
    pub fn ingress(&self, handle: QueueHandle) -> Result<TxIngress> {
        self.entry(handle)?.ingress.clone().ok_or(DatapathError::InvalidQueue)
    }

    /// Wake a queue's loop unconditionally.
    pub fn notify(&self, handle: QueueHandle) -> Result<()> {
        self.entry(handle)?.signals.kick();
        Ok(())
    }

    pub fn counters(&self, handle: QueueHandle) -> Result<CounterSnapshot> {
        Ok(self.entry(handle)?.counters.snapshot())
    }

    /// Resolved config of a queue.
    pub fn queue_config(&self, handle: QueueHandle) -> Result<QueueConfig> {
        Ok(self.entry(handle)?.config)
    }

    pub fn queue_state(&self, handle: QueueHandle) -> Result<ContextState> {
        Ok(match &self.entry(handle)?.runner {
            Runner::Local(ctx) => ctx.state(),
            #[cfg(feature = "std")]
            Runner::Worker(_) => ContextState::Started,
            Runner::Lost => ContextState::Stopped,
        })
    }

    fn slot_of(&self, handle: QueueHandle) -> Result<usize> {
        self.entry(handle)?;
        Ok(handle.slot as usize)
    }

    fn entry(&self, handle: QueueHandle) -> Result<&QueueEntry> {
        self.slots
            .get(handle.slot as usize)
            .and_then(Option::as_ref)
            .filter(|e| e.generation == handle.generation && e.config.kind == handle.kind)
            .ok_or(DatapathError::InvalidQueue)
    }
}

impl<A: NetAdapter> Drop for QueueControl<A> {
    fn drop(&mut self) {
        self.stop();
        for entry in self.slots.iter_mut().filter_map(Option::take) {
            if let Runner::Local(ctx) = entry.runner {
                ctx.destroy();
            }
        }
    }
}

impl<A: NetAdapter> core::fmt::Debug for QueueControl<A> {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("QueueControl")
            .field("queues", &self.queue_count())
            .field("running", &self.running)
            .field("execution", &self.config.execution)
            .finish()
    }
}
