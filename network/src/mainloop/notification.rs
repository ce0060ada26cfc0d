//! Wake primitives.
//!
//! A queue loop parks on one [`WakeEvent`]. Anything that may produce work
//! for it (an upstream enqueue, the adapter returning slots, a receive
//! buffer coming back to the pool) holds a [`Notification`] pointing at that
//! event. A notification only fires while armed, and firing disarms it:
//!
//! ```text
//!   loop:  arm() ── recheck work ──┬── work?    disarm(), continue
//!                                  └── none     wait()
//!   producer:  push work ── notify(): armed.swap(false) ? wake.set()
//! ```
//!
//! Arming before the recheck closes the race where work lands between the
//! last check and the wait.

use alloc::sync::Arc;
use core::sync::atomic::{AtomicBool, Ordering};

use crate::dma::ReleaseHook;

/// One-shot wake flag a loop can block on.
#[derive(Debug, Default)]
pub struct WakeEvent {
    signaled: AtomicBool,
    #[cfg(feature = "std")]
    waiter: spin::Mutex<Option<std::thread::Thread>>,
}

impl WakeEvent {
    pub fn new() -> Self {
        Self::default()
    }

    /// Signal the event and unpark the registered waiter.
    pub fn set(&self) {
        self.signaled.store(true, Ordering::Release);
        #[cfg(feature = "std")]
        if let Some(thread) = self.waiter.lock().as_ref() {
            thread.unpark();
        }
    }

    /// Consume a pending signal.
    pub fn take(&self) -> bool {
        self.signaled.swap(false, Ordering::AcqRel)
    }

    pub fn is_set(&self) -> bool {
        self.signaled.load(Ordering::Acquire)
    }

    /// Make the calling thread the one `set` unparks.
    #[cfg(feature = "std")]
    pub fn register_current_thread(&self) {
        *self.waiter.lock() = Some(std::thread::current());
    }

    /// Block until signaled, consuming the signal.
    #[cfg(feature = "std")]
    pub fn wait(&self) {
        while !self.take() {
            std::thread::park();
        }
    }
}

/// Armed-flag gate in front of a [`WakeEvent`].
#[derive(Debug)]
pub struct Notification {
    armed: AtomicBool,
    wake: Arc<WakeEvent>,
}

impl Notification {
    pub fn new(wake: Arc<WakeEvent>) -> Self {
        Self {
            armed: AtomicBool::new(false),
            wake,
        }
    }

    pub fn arm(&self) {
        self.armed.store(true, Ordering::SeqCst);
    }

    /// Returns whether the notification was still armed.
    pub fn disarm(&self) -> bool {
        self.armed.swap(false, Ordering::SeqCst)
    }

    pub fn is_armed(&self) -> bool {
        self.armed.load(Ordering::SeqCst)
    }

    /// Wake the loop if it asked to be woken. At most one wake per arm.
    pub fn notify(&self) {
        if self.armed.swap(false, Ordering::SeqCst) {
            self.wake.set();
        }
    }
}

impl ReleaseHook for Notification {
    fn released(&self) {
        self.notify();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_notify_requires_arm() {
        let wake = Arc::new(WakeEvent::new());
        let n = Notification::new(wake.clone());
        n.notify();
        assert!(!wake.is_set());

        n.arm();
        n.notify();
        assert!(wake.take());
        assert!(!n.is_armed());

        // Disarmed by the first notify.
        n.notify();
        assert!(!wake.is_set());
    }

    #[test]
    fn test_disarm_reports_state() {
        let n = Notification::new(Arc::new(WakeEvent::new()));
        assert!(!n.disarm());
        n.arm();
        assert!(n.disarm());
    }

    #[cfg(feature = "std")]
    #[test]
    fn test_wait_returns_after_set_from_other_thread() {
        let wake = Arc::new(WakeEvent::new());
        wake.register_current_thread();
        let remote = wake.clone();
        let t = std::thread::spawn(move || remote.set());
        wake.wait();
        t.join().unwrap();
        assert!(!wake.is_set());
    }
}
