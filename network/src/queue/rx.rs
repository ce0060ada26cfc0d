//! Rx queue work.

use alloc::boxed::Box;
use alloc::sync::Arc;

use super::counters::QueueCounters;
use super::CompletionCallback;
use crate::dma::ReleaseHook;
use crate::driver::PacketQueue;
use crate::mainloop::QueueWork;
use crate::types::NblChain;
use crate::xlat::RxTranslator;

pub(crate) struct RxQueue {
    translator: RxTranslator,
    adapter: Box<dyn PacketQueue>,
    callback: Box<dyn CompletionCallback>,
    counters: Arc<QueueCounters>,
    /// Cancelled; no more buffers are posted until the next start.
    stopping: bool,
}

impl RxQueue {
    /// `pool_returned` fires whenever an upstream holder drops a lent buffer.
    pub(crate) fn new(
        translator: RxTranslator,
        adapter: Box<dyn PacketQueue>,
        callback: Box<dyn CompletionCallback>,
        counters: Arc<QueueCounters>,
        pool_returned: Arc<dyn ReleaseHook>,
    ) -> Self {
        translator.pool().set_release_hook(Some(pool_returned));
        Self {
            translator,
            adapter,
            callback,
            counters,
            stopping: false,
        }
    }

    /// Returned slots the next `return_buffers` will reclaim.
    ///
    /// Returned fragments are held back while any packet is still posted,
    /// since a later packet may reference them.
    fn reclaimable(&self) -> bool {
        let rings = self.translator.rings();
        !rings.packets.returned().is_empty()
            || (rings.packets.adapter_owned().is_empty() && !rings.fragments.returned().is_empty())
    }

    fn deliver(&mut self, chain: NblChain) -> bool {
        if chain.is_empty() {
            return false;
        }
        self.counters.record_completed(chain.len() as u64);
        self.callback.complete(chain);
        true
    }
}

impl QueueWork for RxQueue {
    fn start(&mut self) {
        self.stopping = false;
        self.adapter.start(self.translator.rings_mut());
    }

    fn iterate(&mut self, stopping: bool) -> bool {
        let mut moved = false;
        if !stopping {
            moved |= self.translator.prepare_buffers().made_progress();
        }
        self.adapter.advance(self.translator.rings_mut());

        let rings = self.translator.rings();
        let before = (rings.packets.next(), rings.fragments.next());
        let budget = rings.packets.capacity();
        self.translator.return_buffers(budget);
        let rings = self.translator.rings();
        moved |= (rings.packets.next(), rings.fragments.next()) != before;

        let received = self.translator.take_received();
        moved |= self.deliver(received);
        moved
    }

    fn has_new_work(&self) -> bool {
        if self.reclaimable() {
            return true;
        }
        // Free slots only count while buffers are still being posted.
        !self.stopping
            && !self.translator.rings().fragments.available().is_empty()
            && self.translator.pool().available() > 0
    }

    fn set_armed(&mut self, armed: bool) {
        self.adapter.set_armed(armed);
    }

    fn cancel(&mut self) {
        self.stopping = true;
        self.adapter.cancel(self.translator.rings_mut());
    }

    /// Nothing waits upstream of an Rx ring.
    fn abort(&mut self) {}

    fn is_quiesced(&self) -> bool {
        let rings = self.translator.rings();
        rings.adapter_owned() == 0 && rings.packets.returned().is_empty() && rings.fragments.returned().is_empty()
    }

    fn stop(&mut self) {
        self.adapter.stop(self.translator.rings_mut());
        self.translator.release_all();
    }

    fn teardown(&mut self) {
        self.translator.pool().set_release_hook(None);
    }
}
