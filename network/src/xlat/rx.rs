//! Rx translation.
//!
//! Every free fragment slot is posted with a receive buffer from the queue's
//! pool. When the adapter returns a packet, the buffers of its fragments are
//! lent upstream inside memory descriptors; they go back to the pool when the
//! last descriptor referencing them is dropped. Fragments the adapter did not
//! use keep their buffer and are posted again.

use alloc::sync::Arc;
use alloc::vec::Vec;

use dma_pool::DmaArena;

use super::{MetadataTranslator, Progress};
use crate::config::{DatapathCapabilities, DriverConfig};
use crate::dma::BufferPool;
use crate::error::{Backpressure, DatapathError, Result};
use crate::parser::{self, HEADER_PREFIX_LEN};
use crate::queue::counters::QueueCounters;
use crate::ring::{RingRange, RingSet};
use crate::types::chain::{MemoryDescriptor, NblChain, NetBuffer, NetBufferList};
use crate::types::{FragmentBuffer, Layer2Type, NetPacket, OutOfBandInfo};

pub struct RxTranslator {
    rings: RingSet,
    layer2: Layer2Type,
    pool: BufferPool,
    backfill: usize,
    /// Post device addresses with each buffer.
    dma: bool,
    metadata: MetadataTranslator,
    received: NblChain,
    counters: Arc<QueueCounters>,
}

impl RxTranslator {
    pub fn new(
        rings: RingSet,
        caps: &DatapathCapabilities,
        config: &DriverConfig,
        arena: &DmaArena,
        counters: Arc<QueueCounters>,
    ) -> Result<Self> {
        if let Some(dma) = caps.rx_dma {
            if arena.bus_limit() > dma.maximum_physical_address {
                return Err(DatapathError::InvalidConfig("DMA arena beyond adapter reach"));
            }
        }
        let count = match config.rx_buffer_count {
            0 => rings.fragments.capacity() as usize,
            n => n as usize,
        };
        let pool = BufferPool::new(arena, caps.rx_buffer_size as usize, count)?;
        let metadata = MetadataTranslator::new(rings.extensions());

        Ok(Self {
            rings,
            layer2: caps.media,
            pool,
            backfill: caps.rx_backfill as usize,
            dma: caps.rx_dma.is_some(),
            metadata,
            received: NblChain::new(),
            counters,
        })
    }

    pub fn rings(&self) -> &RingSet {
        &self.rings
    }

    pub fn rings_mut(&mut self) -> &mut RingSet {
        &mut self.rings
    }

    /// Handle to the receive pool (for occupancy checks).
    pub fn pool(&self) -> &BufferPool {
        &self.pool
    }

    /// Lists ready for upstream delivery.
    pub fn take_received(&mut self) -> NblChain {
        self.received.take()
    }

    // ═══════════════════════════════════════════════════════════════════════
    // Prepare
    // ═══════════════════════════════════════════════════════════════════════

    /// Post free packet slots and fill free fragment slots with buffers.
    ///
    /// Returns the number of fragment slots posted.
    pub fn prepare_buffers(&mut self) -> Progress {
        let packets = self.rings.packets.available();
        for index in packets.indices(self.rings.packets.mask()) {
            self.rings.packets.get_mut(index).reset();
        }
        self.rings.packets.advance_end(packets.count);

        let capacity = (self.pool.buffer_size() - self.backfill) as u32;
        let available = self.rings.fragments.available();
        let mut progress = Progress::default();
        for index in available.indices(self.rings.fragments.mask()) {
            let fragment = self.rings.fragments.get_mut(index);
            if !fragment.is_pooled() {
                let Some(mut buffer) = self.pool.alloc() else {
                    progress.blocked = Some(Backpressure::ReceivePool);
                    break;
                };
                buffer.mark_device_owned();
                fragment.logical_address = self.dma.then(|| buffer.bus_addr() + self.backfill as u64);
                fragment.buffer = FragmentBuffer::Pooled(buffer);
            }
            fragment.offset = self.backfill as u32;
            fragment.capacity = capacity;
            fragment.valid_length = 0;
            progress.packets += 1;
        }
        self.rings.fragments.advance_end(progress.packets);

        if progress.blocked.is_some() {
            log::debug!("rx: receive pool empty, {} slots posted", progress.packets);
        }
        progress
    }

    // ═══════════════════════════════════════════════════════════════════════
    // Return
    // ═══════════════════════════════════════════════════════════════════════

    /// Turn up to `budget` returned packets into buffer lists.
    pub fn return_buffers(&mut self, budget: u32) -> Progress {
        let returned = self.rings.packets.returned();
        let fragments = self.rings.fragments.returned();
        let count = returned.count.min(budget);

        // Fragment slots in [fragments.start, cursor) are reclaimed.
        let mut cursor = 0u32;
        let mut progress = Progress::default();

        for index in returned.indices(self.rings.packets.mask()).take(count as usize) {
            let packet = *self.rings.packets.get(index);
            self.rings.packets.get_mut(index).reset();
            if packet.fragment_count == 0 {
                continue;
            }

            let offset = self.rings.fragments.distance(fragments.start, packet.fragment_index);
            let in_range = offset >= cursor && offset + packet.fragment_count as u32 <= fragments.count;
            if !in_range {
                log::warn!("rx: packet {} fragment range outside returned region", index);
                self.counters.record_dropped();
                continue;
            }
            cursor = offset + packet.fragment_count as u32;

            if packet.ignore {
                self.counters.record_dropped();
                continue;
            }
            let range = self.rings.packet_fragments(&packet);
            match self.indicate(&packet, range) {
                Some(list) => {
                    self.received.push_back(list);
                    self.counters.record_produced(1);
                    progress.packets += 1;
                }
                None => {
                    log::warn!("rx: packet {} has malformed fragments", index);
                    self.counters.record_dropped();
                }
            }
        }
        self.rings.packets.advance_next(count);

        // With nothing posted, no later packet can reference what is left.
        if self.rings.packets.adapter_owned().is_empty() && self.rings.packets.returned().is_empty() {
            cursor = fragments.count;
        }
        self.rings.fragments.advance_next(cursor);
        progress
    }

    /// Lend the buffers of one packet upstream.
    ///
    /// Returns `None`, leaving every buffer in its slot, if a fragment is
    /// empty-handed or overruns its buffer, or the packet carries no bytes.
    fn indicate(&mut self, packet: &NetPacket, range: RingRange) -> Option<NetBufferList> {
        let mut total = 0usize;
        for fragment in self.rings.fragments.iter_range(range) {
            let FragmentBuffer::Pooled(buffer) = &fragment.buffer else {
                return None;
            };
            let end = fragment.offset as usize + fragment.valid_length as usize;
            if end > buffer.capacity() {
                return None;
            }
            total += fragment.valid_length as usize;
        }
        if total == 0 {
            return None;
        }

        let mut mdls = Vec::with_capacity(range.count as usize);
        for index in range.indices(self.rings.fragments.mask()) {
            let fragment = self.rings.fragments.get_mut(index);
            if fragment.valid_length == 0 {
                continue;
            }
            let (offset, length) = (fragment.offset as usize, fragment.valid_length as usize);
            if let FragmentBuffer::Pooled(mut buffer) = fragment.take_buffer() {
                buffer.mark_driver_owned();
                mdls.push(MemoryDescriptor::lend(buffer, offset, length));
            }
        }
        let buffer = NetBuffer::new(mdls);

        let mut prefix = [0u8; HEADER_PREFIX_LEN];
        let n = buffer.copy_prefix(&mut prefix);
        let layout = parser::parse(self.layer2, &prefix[..n], packet.layout.as_ref());

        let mut info = OutOfBandInfo::default();
        self.metadata.to_out_of_band_rx(&packet.extensions, &layout, &mut info);
        log::trace!("rx: {} bytes, {:?}", total, layout);

        let mut list = NetBufferList::single(buffer).with_info(info);
        list.layout = Some(layout);
        list.finish();
        Some(list)
    }

    /// Take back every buffer not held by the adapter.
    ///
    /// Used once the adapter has stopped; the buffers go back to the pool.
    pub fn release_all(&mut self) {
        let returned = self.rings.fragments.returned();
        self.rings.fragments.advance_next(returned.count);

        let owned = self.rings.fragments.adapter_owned();
        for index in 0..self.rings.fragments.capacity() {
            if self.rings.fragments.distance(owned.start, index) < owned.count {
                continue;
            }
            if let FragmentBuffer::Pooled(mut buffer) = self.rings.fragments.get_mut(index).take_buffer() {
                buffer.mark_driver_owned();
            }
        }
    }
}

impl core::fmt::Debug for RxTranslator {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("RxTranslator")
            .field("rings", &self.rings)
            .field("pool", &self.pool)
            .field("backfill", &self.backfill)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{ExtensionSet, QueueConfig};
    use crate::types::ethernet::{ethernet_header, ETH_P_IP};
    use crate::types::{Layer3Type, Layer4Type, RxChecksumEvaluation};

    fn translator(fragments: u32, caps: DatapathCapabilities, config: DriverConfig) -> RxTranslator {
        let queue = QueueConfig::rx(0)
            .with_ring_sizes(8, fragments)
            .with_extensions(ExtensionSet::CHECKSUM)
            .resolve(&caps)
            .unwrap();
        let rings = RingSet::new(&queue).unwrap();
        let arena = DmaArena::new(128 * 1024).unwrap();
        RxTranslator::new(rings, &caps, &config, &arena, Arc::new(QueueCounters::new())).unwrap()
    }

    fn udp_frame(payload: usize) -> Vec<u8> {
        let mut f = ethernet_header([0x02; 6], [0x04; 6], ETH_P_IP).to_vec();
        let mut ip = [0u8; 20];
        ip[0] = 0x45;
        ip[2..4].copy_from_slice(&(28 + payload as u16).to_be_bytes());
        ip[9] = 17;
        f.extend_from_slice(&ip);
        f.extend_from_slice(&[0u8; 8]);
        f.resize(f.len() + payload, 0xC3);
        f
    }

    /// Adapter side: deliver `chunks` as one packet in the oldest posted slots.
    fn deliver(t: &mut RxTranslator, chunks: &[&[u8]]) {
        let rings = t.rings_mut();
        let first = rings.fragments.begin();
        for (i, chunk) in chunks.iter().enumerate() {
            let fragment = rings.fragments.get_mut(first + i as u32);
            fragment.device_space_mut().unwrap()[..chunk.len()].copy_from_slice(chunk);
            fragment.valid_length = chunk.len() as u32;
        }
        let slot = rings.packets.begin();
        let packet = rings.packets.get_mut(slot);
        packet.fragment_index = first;
        packet.fragment_count = chunks.len() as u16;
        packet.extensions.checksum.rx_layer4 = RxChecksumEvaluation::Valid;
        rings.return_packets(1);
    }

    #[test]
    fn test_prepare_posts_every_free_slot() {
        let mut t = translator(8, DatapathCapabilities::default(), DriverConfig::default());
        let progress = t.prepare_buffers();
        assert_eq!(progress.packets, 7);
        assert_eq!(t.rings().fragments.adapter_owned().count, 7);
        assert_eq!(t.rings().packets.adapter_owned().count, 7);
        assert_eq!(t.pool().in_use(), 7);
    }

    #[test]
    fn test_receive_lends_buffers_upstream() {
        let mut t = translator(8, DatapathCapabilities::default(), DriverConfig::default());
        t.prepare_buffers();
        let frame = udp_frame(32);
        deliver(&mut t, &[&frame[..]]);

        let progress = t.return_buffers(16);
        assert_eq!(progress.packets, 1);
        let mut received = t.take_received();
        let list = received.pop_front().unwrap();
        assert_eq!(list.buffers()[0].to_vec(), frame);
        assert!(list.buffers()[0].mdls()[0].is_lent());

        let layout = list.layout.unwrap();
        assert_eq!(layout.layer3_type, Layer3Type::Ipv4NoOptions);
        assert_eq!(layout.layer4_type, Layer4Type::Udp);
        assert!(list.info.rx_checksum.udp_checksum_succeeded);

        // Slot emptied, buffer still lent.
        assert_eq!(t.pool().in_use(), 7);
        t.prepare_buffers();
        assert_eq!(t.pool().in_use(), 8);
        drop(list);
        assert_eq!(t.pool().in_use(), 7);
    }

    #[test]
    fn test_multi_fragment_packet() {
        let caps = DatapathCapabilities {
            rx_buffer_size: 64,
            ..DatapathCapabilities::default()
        };
        let mut t = translator(8, caps, DriverConfig::default());
        t.prepare_buffers();
        let frame = udp_frame(80);
        deliver(&mut t, &[&frame[..64], &frame[64..]]);

        t.return_buffers(16);
        let list = t.take_received().pop_front().unwrap();
        assert_eq!(list.buffers()[0].mdls().len(), 2);
        assert_eq!(list.buffers()[0].to_vec(), frame);
    }

    #[test]
    fn test_backfill_offsets_payload() {
        let caps = DatapathCapabilities {
            rx_backfill: 16,
            ..DatapathCapabilities::default()
        };
        let mut t = translator(8, caps, DriverConfig::default());
        t.prepare_buffers();
        let fragment = t.rings().fragments.get(0);
        assert_eq!((fragment.offset, fragment.capacity), (16, 2048 - 16));

        let frame = udp_frame(4);
        deliver(&mut t, &[&frame[..]]);
        t.return_buffers(16);
        assert_eq!(t.take_received().pop_front().unwrap().buffers()[0].to_vec(), frame);
    }

    #[test]
    fn test_malformed_packets_dropped_and_buffers_kept() {
        let mut t = translator(8, DatapathCapabilities::default(), DriverConfig::default());
        t.prepare_buffers();

        // Zero bytes.
        deliver(&mut t, &[&b""[..]]);
        assert_eq!(t.return_buffers(16).packets, 0);
        assert!(t.take_received().is_empty());

        // Range beyond what was returned.
        let rings = t.rings_mut();
        let slot = rings.packets.begin();
        let packet = rings.packets.get_mut(slot);
        packet.fragment_index = rings.fragments.begin().wrapping_add(3);
        packet.fragment_count = 1;
        rings.packets.advance_begin(1);
        assert_eq!(t.return_buffers(16).packets, 0);

        assert_eq!(t.counters.snapshot().dropped, 2);
        // Nothing lent: every buffer is still in a slot.
        assert_eq!(t.pool().in_use(), 7);
    }

    #[test]
    fn test_pool_exhaustion_blocks_prepare() {
        let config = DriverConfig {
            rx_buffer_count: 3,
            ..DriverConfig::default()
        };
        let mut t = translator(8, DatapathCapabilities::default(), config);
        let progress = t.prepare_buffers();
        assert_eq!(progress.packets, 3);
        assert_eq!(progress.blocked, Some(Backpressure::ReceivePool));
    }

    #[test]
    fn test_release_all_returns_buffers() {
        let mut t = translator(8, DatapathCapabilities::default(), DriverConfig::default());
        t.prepare_buffers();
        t.rings().return_all();
        t.return_buffers(16);
        t.release_all();
        assert!(t.pool().is_full());
    }
}
