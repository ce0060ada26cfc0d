//! Adapter-facing trait definitions.
//!
//! An adapter driver implements [`NetAdapter`] once per device and hands out
//! one [`PacketQueue`] per datapath queue. The queue never owns the rings:
//! every call borrows the queue's [`RingSet`] for its duration.

use alloc::boxed::Box;
use alloc::sync::Arc;

use crate::config::{DatapathCapabilities, QueueConfig};
use crate::dma::DmaAdapter;
use crate::error::Result;
use crate::mainloop::Notification;
use crate::ring::RingSet;

/// Adapter-side handle that wakes a queue's loop.
///
/// Only wakes while the loop has armed the adapter notification; calling it
/// at any other time is harmless.
#[derive(Debug, Clone)]
pub struct AdapterNotifier(Arc<Notification>);

impl AdapterNotifier {
    pub fn new(notification: Arc<Notification>) -> Self {
        Self(notification)
    }

    /// Report returned slots (typically from an interrupt or completion path).
    pub fn notify(&self) {
        self.0.notify();
    }
}

/// Per-queue dispatch object supplied by the adapter.
pub trait PacketQueue: Send {
    /// Begin processing the rings.
    fn start(&mut self, rings: &mut RingSet);

    /// Pick up newly posted slots and return finished ones.
    ///
    /// # Contract
    /// - MUST return immediately (no completion wait)
    /// - Only `advance_begin` may move ring cursors
    fn advance(&mut self, rings: &mut RingSet);

    /// Whether to call the notifier when slots are returned.
    fn set_armed(&mut self, armed: bool);

    /// Return every posted slot as soon as possible.
    ///
    /// Tx packets are returned unsent; Rx fragments come back without data.
    fn cancel(&mut self, rings: &mut RingSet);

    /// Called once every slot is back.
    fn stop(&mut self, rings: &mut RingSet);
}

/// Network adapter driver.
pub trait NetAdapter: Send {
    fn capabilities(&self) -> DatapathCapabilities;

    /// Platform DMA service used for Tx mapping, if the adapter has one.
    ///
    /// Called once per Tx queue.
    fn dma_adapter(&mut self) -> Option<Box<dyn DmaAdapter>> {
        None
    }

    /// Create the adapter half of a Tx queue.
    ///
    /// # Arguments
    /// - `config`: resolved queue config (ring sizes and extensions final)
    /// - `notifier`: wakes the queue's loop when slots are returned
    fn create_tx_queue(&mut self, config: &QueueConfig, notifier: AdapterNotifier) -> Result<Box<dyn PacketQueue>>;

    /// Create the adapter half of an Rx queue.
    fn create_rx_queue(&mut self, config: &QueueConfig, notifier: AdapterNotifier) -> Result<Box<dyn PacketQueue>>;
}
