//! Dedicated worker threads.
//!
//! A worker owns its [`ExecutionContext`] for as long as the queue runs and
//! hands it back through the join handle once the context has stopped.

use alloc::string::String;
use alloc::sync::Arc;
use std::io;
use std::thread::{self, JoinHandle};

use super::context::{ExecutionContext, RunOutcome};

/// Platform hooks run on the worker thread before its loop starts.
///
/// Priority and affinity are platform specific; the default only logs the
/// requested values.
pub trait WorkerHooks: Send + Sync {
    fn on_worker_start(&self, name: &str, priority: Option<i32>, affinity: Option<u64>) {
        if priority.is_some() || affinity.is_some() {
            log::debug!(
                "{}: priority {:?}, affinity {:?} requested, no hooks installed",
                name,
                priority,
                affinity
            );
        }
    }
}

/// Hooks that only log.
#[derive(Debug, Default, Clone, Copy)]
pub struct DefaultHooks;

impl WorkerHooks for DefaultHooks {}

/// Thread settings taken from `DriverConfig`.
#[derive(Debug, Clone, Copy, Default)]
pub struct WorkerSettings {
    pub priority: Option<i32>,
    pub affinity: Option<u64>,
}

/// Spawn a thread driving the started `ctx` until it stops.
pub fn spawn(
    mut ctx: ExecutionContext,
    hooks: Arc<dyn WorkerHooks>,
    settings: WorkerSettings,
) -> io::Result<JoinHandle<ExecutionContext>> {
    let name = String::from(ctx.name());
    thread::Builder::new().name(alloc::format!("netq-{}", name)).spawn(move || {
        hooks.on_worker_start(&name, settings.priority, settings.affinity);
        let wake = ctx.signals().wake.clone();
        wake.register_current_thread();

        loop {
            match ctx.run() {
                RunOutcome::Suspended => wake.wait(),
                RunOutcome::Yielded => thread::yield_now(),
                RunOutcome::Stopped => break,
            }
        }
        log::debug!("{}: worker exiting", name);
        ctx
    })
}
