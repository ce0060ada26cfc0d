//! Packet and fragment rings of one queue.

use super::{Ring, RingRange};
use crate::config::{ExtensionSet, QueueConfig};
use crate::error::Result;
use crate::types::{NetFragment, NetPacket};

/// The rings shared between one queue's translator and its adapter queue.
pub struct RingSet {
    pub packets: Ring<NetPacket>,
    pub fragments: Ring<NetFragment>,
    extensions: ExtensionSet,
}

impl RingSet {
    /// Build rings sized by a resolved queue config.
    pub fn new(config: &QueueConfig) -> Result<Self> {
        Ok(Self {
            packets: Ring::new(config.packet_ring_size)?,
            fragments: Ring::new(config.fragment_ring_size)?,
            extensions: config.extensions,
        })
    }

    /// Extensions enabled on this queue.
    pub fn extensions(&self) -> ExtensionSet {
        self.extensions
    }

    /// Whether `extension` is enabled, for adapters that read or fill it.
    pub fn extension_enabled(&self, extension: ExtensionSet) -> bool {
        self.extensions.contains(extension)
    }

    /// Slots of both rings still held by the adapter.
    pub fn adapter_owned(&self) -> u32 {
        self.packets.adapter_owned().count + self.fragments.adapter_owned().count
    }

    /// Fragment range of a packet record.
    pub fn packet_fragments(&self, packet: &NetPacket) -> RingRange {
        RingRange {
            start: packet.fragment_index & self.fragments.mask(),
            count: packet.fragment_count as u32,
        }
    }

    /// Adapter side: complete every posted packet and fragment.
    pub fn return_all(&self) {
        self.fragments.advance_begin(self.fragments.adapter_owned().count);
        self.packets.advance_begin(self.packets.adapter_owned().count);
    }

    /// Adapter side: complete the oldest `count` posted packets and their fragments.
    pub fn return_packets(&self, count: u32) {
        let owned = self.packets.adapter_owned();
        let count = count.min(owned.count);
        let fragments: u32 = owned
            .indices(self.packets.mask())
            .take(count as usize)
            .map(|i| self.packets.get(i).fragment_count as u32)
            .sum();
        self.fragments.advance_begin(fragments);
        self.packets.advance_begin(count);
    }
}

impl core::fmt::Debug for RingSet {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("RingSet")
            .field("packets", &self.packets)
            .field("fragments", &self.fragments)
            .field("extensions", &self.extensions)
            .finish()
    }
}
