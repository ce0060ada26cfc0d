//! Tx queue work and its ingress handle.

use alloc::boxed::Box;
use alloc::sync::Arc;

use spin::Mutex;

use super::counters::QueueCounters;
use super::CompletionCallback;
use crate::driver::PacketQueue;
use crate::mainloop::{Notification, QueueWork};
use crate::types::NblChain;
use crate::xlat::TxTranslator;

/// Cloneable producer side of a Tx queue.
///
/// Lists enqueued here are picked up by the queue's loop on its next
/// iteration. While the queue is stopped they are held until it starts
/// again (or completed with `Paused` when it is destroyed).
#[derive(Clone)]
pub struct TxIngress {
    inbound: Arc<Mutex<NblChain>>,
    notification: Arc<Notification>,
    counters: Arc<QueueCounters>,
}

impl TxIngress {
    pub(crate) fn new(notification: Arc<Notification>, counters: Arc<QueueCounters>) -> Self {
        Self {
            inbound: Arc::new(Mutex::new(NblChain::new())),
            notification,
            counters,
        }
    }

    /// Hand `chain` to the queue. Ownership comes back through the
    /// queue's completion callback.
    pub fn enqueue(&self, mut chain: NblChain) {
        if chain.is_empty() {
            return;
        }
        self.counters.record_accepted(chain.len() as u64);
        self.inbound.lock().append(&mut chain);
        self.notification.notify();
    }

    /// Lists waiting to be picked up.
    pub fn pending(&self) -> usize {
        self.inbound.lock().len()
    }

    fn take(&self) -> NblChain {
        self.inbound.lock().take()
    }
}

impl core::fmt::Debug for TxIngress {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("TxIngress").field("pending", &self.pending()).finish()
    }
}

pub(crate) struct TxQueue {
    translator: TxTranslator,
    adapter: Box<dyn PacketQueue>,
    ingress: TxIngress,
    callback: Box<dyn CompletionCallback>,
    counters: Arc<QueueCounters>,
}

impl TxQueue {
    pub(crate) fn new(
        translator: TxTranslator,
        adapter: Box<dyn PacketQueue>,
        ingress: TxIngress,
        callback: Box<dyn CompletionCallback>,
        counters: Arc<QueueCounters>,
    ) -> Self {
        Self {
            translator,
            adapter,
            ingress,
            callback,
            counters,
        }
    }

    fn deliver(&mut self, chain: NblChain) -> bool {
        if chain.is_empty() {
            return false;
        }
        self.counters.record_completed(chain.len() as u64);
        self.callback.complete(chain);
        true
    }

    /// Complete every held inbound list with `Paused`.
    fn refuse_inbound(&mut self) {
        let mut refused = NblChain::new();
        for mut list in self.ingress.take() {
            list.pause();
            refused.push_back(list);
        }
        self.deliver(refused);
    }
}

impl QueueWork for TxQueue {
    fn start(&mut self) {
        self.adapter.start(self.translator.rings_mut());
    }

    fn iterate(&mut self, stopping: bool) -> bool {
        let mut moved = false;
        if !stopping {
            let mut inbound = self.ingress.take();
            self.translator.enqueue(&mut inbound);
            let budget = self.translator.rings().packets.capacity();
            moved |= self.translator.translate(budget).made_progress();
        }

        moved |= self.translator.yield_to_adapter() > 0;
        self.adapter.advance(self.translator.rings_mut());
        moved |= self.translator.drain() > 0;

        let completed = self.translator.take_completed();
        moved |= self.deliver(completed);
        moved
    }

    fn has_new_work(&self) -> bool {
        self.ingress.pending() > 0 || !self.translator.rings().packets.returned().is_empty()
    }

    fn set_armed(&mut self, armed: bool) {
        self.adapter.set_armed(armed);
    }

    fn cancel(&mut self) {
        self.adapter.cancel(self.translator.rings_mut());
    }

    fn abort(&mut self) {
        self.refuse_inbound();
        self.translator.abort();
    }

    fn is_quiesced(&self) -> bool {
        let rings = self.translator.rings();
        rings.adapter_owned() == 0
            && rings.packets.returned().is_empty()
            && !self.translator.has_work()
            && self.translator.lists_in_flight() == 0
    }

    fn stop(&mut self) {
        self.adapter.stop(self.translator.rings_mut());
    }

    fn teardown(&mut self) {
        self.refuse_inbound();
    }
}
