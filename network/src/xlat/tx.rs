//! Tx translation.
//!
//! Buffer lists are taken from the inbound chain one [`NetBuffer`] at a time.
//! Each buffer becomes one packet record whose fragments either reference the
//! caller's memory in place or hold a single bounce buffer.
//!
//! Translation is resumable: when the fragment ring fills up in the middle of
//! a buffer the open packet and its span cursor are kept, and the next pass
//! continues from the exact byte where it stopped.
//!
//! ```text
//!   fragment ring:  [begin .. end) posted | staged | open | free .. next-1 |
//!                                         └ closed, not yet yielded
//! ```
//!
//! Buffer lists live in a slot arena while any of their packets is on the
//! ring. The packet context table maps a packet slot to its arena slot; a
//! list completes when its last packet has been drained.

use alloc::boxed::Box;
use alloc::sync::Arc;
use alloc::vec::Vec;

use dma_pool::DmaArena;

use super::{MetadataTranslator, Progress};
use crate::config::{DatapathCapabilities, DriverConfig};
use crate::dma::{BounceBufferPool, BounceError, DmaAdapter, DmaMapper, MappingStrategy};
use crate::error::{Backpressure, PermanentFailure, Result};
use crate::parser::{self, HEADER_PREFIX_LEN};
use crate::queue::counters::QueueCounters;
use crate::ring::RingSet;
use crate::types::chain::{NblChain, NetBufferList, SpanCursor};
use crate::types::{FragmentBuffer, Layer2Type, NetPacket, PacketExtensions};

/// A buffer list whose packets are (partly) on the ring.
struct InFlight {
    list: NetBufferList,
    /// Packets on the ring not yet drained.
    outstanding: u32,
    /// Every buffer has been turned into a packet.
    translated: bool,
}

/// Packet currently being filled.
#[derive(Debug, Clone, Copy)]
struct OpenPacket {
    slot: u32,
    first_fragment: u32,
    fragment_count: u16,
    spans: SpanCursor,
}

/// Resume point of the translation.
#[derive(Debug, Clone, Copy)]
struct TxCursor {
    /// Arena slot of the list being translated.
    list: u32,
    /// Next buffer within the list.
    buffer: usize,
    open: Option<OpenPacket>,
    /// Mapping of the buffer under the cursor already failed; bounce it.
    mapping_failed: bool,
}

pub struct TxTranslator {
    rings: RingSet,
    layer2: Layer2Type,
    max_fragment_size: usize,
    max_fragments_per_packet: usize,
    mapper: DmaMapper,
    bounce: Option<BounceBufferPool>,
    metadata: MetadataTranslator,
    /// Packet slot -> arena slot.
    contexts: Vec<Option<u32>>,
    in_flight: Vec<Option<InFlight>>,
    free_in_flight: Vec<u32>,
    pending: NblChain,
    cursor: Option<TxCursor>,
    staged_packets: u32,
    staged_fragments: u32,
    completed: NblChain,
    counters: Arc<QueueCounters>,
}

impl TxTranslator {
    /// # Arguments
    /// - `rings`: the queue's rings
    /// - `caps`: adapter capabilities (fragment limits, Tx DMA, backfill)
    /// - `config`: driver knobs (bounce policy and pool size)
    /// - `platform`: platform DMA service, if the adapter has one
    /// - `arena`: DMA memory for bounce buffers
    pub fn new(
        rings: RingSet,
        caps: &DatapathCapabilities,
        config: &DriverConfig,
        platform: Option<Box<dyn DmaAdapter>>,
        arena: &DmaArena,
        counters: Arc<QueueCounters>,
    ) -> Result<Self> {
        let packet_slots = rings.packets.capacity();
        let max_fragments_per_packet = caps.max_tx_fragments_per_packet as usize;
        let mapper = DmaMapper::new(config, caps.tx_dma, platform, packet_slots, max_fragments_per_packet);

        let bounce = if config.tx_bounce_buffer_count > 0 {
            Some(BounceBufferPool::new(
                arena,
                config.tx_bounce_buffer_size as usize,
                config.tx_bounce_buffer_count as usize,
                caps.tx_backfill as usize,
            )?)
        } else {
            None
        };

        let metadata = MetadataTranslator::new(rings.extensions());
        let mut contexts = Vec::new();
        contexts.resize(packet_slots as usize, None);

        Ok(Self {
            rings,
            layer2: caps.media,
            max_fragment_size: caps.max_fragment_size as usize,
            max_fragments_per_packet,
            mapper,
            bounce,
            metadata,
            contexts,
            in_flight: Vec::new(),
            free_in_flight: Vec::new(),
            pending: NblChain::new(),
            cursor: None,
            staged_packets: 0,
            staged_fragments: 0,
            completed: NblChain::new(),
            counters,
        })
    }

    pub fn rings(&self) -> &RingSet {
        &self.rings
    }

    pub fn rings_mut(&mut self) -> &mut RingSet {
        &mut self.rings
    }

    pub fn strategy(&self) -> MappingStrategy {
        self.mapper.strategy()
    }

    /// Bounce leases currently attached to fragments.
    pub fn bounce_leased(&self) -> usize {
        self.bounce.as_ref().map_or(0, BounceBufferPool::leased)
    }

    /// Append lists to the inbound chain.
    pub fn enqueue(&mut self, chain: &mut NblChain) {
        self.pending.append(chain);
    }

    /// Untranslated or staged work remains.
    pub fn has_work(&self) -> bool {
        !self.pending.is_empty() || self.cursor.is_some() || self.staged_packets > 0
    }

    /// Buffer lists accepted but not yet completed.
    pub fn lists_in_flight(&self) -> usize {
        self.pending.len() + self.in_flight.iter().filter(|e| e.is_some()).count()
    }

    /// Lists ready to be handed back through the completion callback.
    pub fn take_completed(&mut self) -> NblChain {
        self.completed.take()
    }

    // ═══════════════════════════════════════════════════════════════════════
    // Translate
    // ═══════════════════════════════════════════════════════════════════════

    /// Turn up to `budget` buffers into packet records.
    pub fn translate(&mut self, budget: u32) -> Progress {
        let mut progress = Progress::default();

        while progress.packets < budget {
            let mut cursor = match self.cursor.take() {
                Some(cursor) => cursor,
                None => match self.start_next_list() {
                    Some(cursor) => cursor,
                    None => break,
                },
            };
            let Some(mut entry) = self.in_flight[cursor.list as usize].take() else {
                continue;
            };

            let result = if cursor.open.is_none() && cursor.buffer == entry.list.buffers().len() {
                entry.translated = true;
                Ok(false)
            } else {
                self.translate_buffer(&mut entry, &mut cursor)
            };

            let done = entry.translated && entry.outstanding == 0;
            let translated = entry.translated;
            self.in_flight[cursor.list as usize] = Some(entry);
            if done {
                self.complete(cursor.list);
            }
            if !translated {
                self.cursor = Some(cursor);
            }

            match result {
                Ok(true) => progress.packets += 1,
                Ok(false) => {}
                Err(blocked) => {
                    log::debug!("tx: suspended, {:?}", blocked);
                    progress.blocked = Some(blocked);
                    break;
                }
            }
        }
        progress
    }

    fn start_next_list(&mut self) -> Option<TxCursor> {
        loop {
            let mut list = self.pending.pop_front()?;
            if list.buffers().is_empty() {
                log::warn!("tx: buffer list {:#x} has no buffers", list.cookie);
                list.fail(PermanentFailure::MalformedLength);
                self.counters.record_dropped();
                self.completed.push_back(list);
                continue;
            }

            let entry = InFlight {
                list,
                outstanding: 0,
                translated: false,
            };
            let slot = match self.free_in_flight.pop() {
                Some(slot) => {
                    self.in_flight[slot as usize] = Some(entry);
                    slot
                }
                None => {
                    self.in_flight.push(Some(entry));
                    self.in_flight.len() as u32 - 1
                }
            };
            return Some(TxCursor {
                list: slot,
                buffer: 0,
                open: None,
                mapping_failed: false,
            });
        }
    }

    fn free_packets(&self, open: bool) -> u32 {
        self.rings.packets.available().count - self.staged_packets - open as u32
    }

    fn free_fragments(&self, open_fragments: u16) -> u32 {
        self.rings.fragments.available().count - self.staged_fragments - open_fragments as u32
    }

    /// Translate (or continue translating) the buffer under `cursor`.
    ///
    /// Returns `Ok(true)` when a packet was closed.
    fn translate_buffer(&mut self, entry: &mut InFlight, cursor: &mut TxCursor) -> core::result::Result<bool, Backpressure> {
        let mut open = match cursor.open {
            Some(open) => open,
            None => match self.open_packet(entry, cursor)? {
                Some(open) => open,
                None => return Ok(true),
            },
        };

        let buffer = &entry.list.buffers()[cursor.buffer];
        let needs_address = self.mapper.requires_mapping();
        loop {
            let mut spans = open.spans;
            let Some(span) = buffer.next_span(&mut spans, self.max_fragment_size) else {
                break;
            };
            if self.free_fragments(open.fragment_count) == 0 {
                cursor.open = Some(open);
                return Err(Backpressure::FragmentRing);
            }

            let index = self.rings.fragments.increment(open.first_fragment, open.fragment_count as u32);
            let logical_address = if needs_address {
                self.mapper.logical_address(open.slot, open.fragment_count as usize)
            } else {
                None
            };
            let fragment = self.rings.fragments.get_mut(index);
            fragment.buffer = FragmentBuffer::Region(buffer.mdls()[span.mdl_index].clone());
            fragment.offset = span.offset as u32;
            fragment.valid_length = span.length as u32;
            fragment.capacity = span.length as u32;
            fragment.logical_address = logical_address;
            log::trace!("tx: fragment {} <- {} bytes", index, span.length);

            open.fragment_count += 1;
            open.spans = spans;
        }

        self.close_packet(entry, cursor, open.slot, open.first_fragment, open.fragment_count, false);
        Ok(true)
    }

    /// Plan a fresh buffer.
    ///
    /// Returns the packet to fill in place, or `None` if the packet was
    /// already closed (bounced or ignored).
    fn open_packet(
        &mut self,
        entry: &mut InFlight,
        cursor: &mut TxCursor,
    ) -> core::result::Result<Option<OpenPacket>, Backpressure> {
        if self.free_packets(false) == 0 {
            return Err(Backpressure::PacketRing);
        }
        let slot = self.rings.packets.increment(self.rings.packets.end(), self.staged_packets);
        let first = self.rings.fragments.increment(self.rings.fragments.end(), self.staged_fragments);

        let buffer = &entry.list.buffers()[cursor.buffer];
        if buffer.data_length() == 0 {
            self.ignore_packet(entry, cursor, slot, first, PermanentFailure::MalformedLength);
            return Ok(None);
        }
        let required = buffer.fragment_count(self.max_fragment_size);
        if required > self.rings.fragments.usable() as usize {
            self.ignore_packet(entry, cursor, slot, first, PermanentFailure::TooManyFragments);
            return Ok(None);
        }

        let too_many = required > self.max_fragments_per_packet;
        let mut bounce = self.mapper.always_bounce() || too_many || cursor.mapping_failed;
        if !bounce && self.mapper.requires_mapping() {
            if let Err(err) = self.mapper.map(slot, buffer, self.max_fragment_size) {
                log::debug!("tx: DMA mapping failed ({:?}), bouncing", err);
                self.counters.record_dma_fallback();
                cursor.mapping_failed = true;
                bounce = true;
            }
        }

        if !bounce {
            return Ok(Some(OpenPacket {
                slot,
                first_fragment: first,
                fragment_count: 0,
                spans: buffer.cursor(),
            }));
        }

        if self.free_fragments(0) == 0 {
            return Err(Backpressure::FragmentRing);
        }
        let Some(pool) = self.bounce.as_mut() else {
            let reason = if too_many {
                PermanentFailure::TooManyFragments
            } else {
                PermanentFailure::PayloadTooLarge
            };
            self.ignore_packet(entry, cursor, slot, first, reason);
            return Ok(None);
        };
        match pool.bounce(buffer, self.rings.fragments.get_mut(first)) {
            Ok(()) => {
                self.counters.record_bounced();
                self.close_packet(entry, cursor, slot, first, 1, false);
                Ok(None)
            }
            Err(BounceError::PoolExhausted) => Err(Backpressure::BouncePool),
            Err(BounceError::PayloadTooLarge) => {
                self.ignore_packet(entry, cursor, slot, first, PermanentFailure::PayloadTooLarge);
                Ok(None)
            }
        }
    }

    fn ignore_packet(
        &mut self,
        entry: &mut InFlight,
        cursor: &mut TxCursor,
        slot: u32,
        first: u32,
        reason: PermanentFailure,
    ) {
        log::warn!(
            "tx: ignoring buffer {} of list {:#x}: {:?}",
            cursor.buffer,
            entry.list.cookie,
            reason
        );
        entry.list.fail(reason);
        self.counters.record_dropped();
        self.close_packet(entry, cursor, slot, first, 0, true);
    }

    /// Write the packet record and stage it.
    fn close_packet(
        &mut self,
        entry: &mut InFlight,
        cursor: &mut TxCursor,
        slot: u32,
        first: u32,
        fragment_count: u16,
        ignore: bool,
    ) {
        let mut extensions = PacketExtensions::default();
        let layout = if ignore {
            None
        } else {
            let layout = entry.list.layout.unwrap_or_else(|| {
                let mut prefix = [0u8; HEADER_PREFIX_LEN];
                let n = entry.list.buffers()[cursor.buffer].copy_prefix(&mut prefix);
                parser::parse(self.layer2, &prefix[..n], None)
            });
            self.metadata.to_packet_tx(&entry.list.info, &layout, &mut extensions);
            self.counters.record_produced(1);
            Some(layout)
        };

        *self.rings.packets.get_mut(slot) = NetPacket {
            fragment_index: first,
            fragment_count,
            layout,
            ignore,
            extensions,
        };
        log::trace!("tx: packet {} closed with {} fragments", slot, fragment_count);

        self.contexts[slot as usize] = Some(cursor.list);
        entry.outstanding += 1;
        self.staged_packets += 1;
        self.staged_fragments += fragment_count as u32;
        cursor.buffer += 1;
        cursor.open = None;
        cursor.mapping_failed = false;
    }

    // ═══════════════════════════════════════════════════════════════════════
    // Yield / drain
    // ═══════════════════════════════════════════════════════════════════════

    /// Post staged packets and their fragments. Returns the packets posted.
    pub fn yield_to_adapter(&mut self) -> u32 {
        let packets = self.staged_packets;
        if packets == 0 {
            return 0;
        }
        // Fragments first, so a posted packet never points at unposted slots.
        self.rings.fragments.advance_end(self.staged_fragments);
        self.rings.packets.advance_end(packets);
        self.staged_packets = 0;
        self.staged_fragments = 0;
        packets
    }

    /// Reclaim returned packets. Returns the packets reclaimed.
    pub fn drain(&mut self) -> u32 {
        let returned = self.rings.packets.returned();
        if returned.is_empty() {
            return 0;
        }

        let mut fragments = 0u32;
        for index in returned.indices(self.rings.packets.mask()) {
            let packet = *self.rings.packets.get(index);
            if let Some(pool) = self.bounce.as_mut() {
                pool.release(&packet, &mut self.rings.fragments);
            }
            let range = self.rings.packet_fragments(&packet);
            for i in range.indices(self.rings.fragments.mask()) {
                drop(self.rings.fragments.get_mut(i).take_buffer());
            }
            self.mapper.unmap(index);
            self.rings.packets.get_mut(index).reset();
            fragments += packet.fragment_count as u32;

            if let Some(list) = self.contexts[index as usize].take() {
                self.packet_returned(list);
            }
        }

        self.rings.fragments.advance_next(fragments);
        self.rings.packets.advance_next(returned.count);
        returned.count
    }

    fn packet_returned(&mut self, slot: u32) {
        let Some(entry) = self.in_flight[slot as usize].as_mut() else {
            return;
        };
        entry.outstanding -= 1;
        if entry.outstanding == 0 && entry.translated {
            self.complete(slot);
        }
    }

    fn complete(&mut self, slot: u32) {
        if let Some(mut entry) = self.in_flight[slot as usize].take() {
            entry.list.finish();
            log::trace!("tx: list {:#x} complete, {:?}", entry.list.cookie, entry.list.status());
            self.completed.push_back(entry.list);
            self.free_in_flight.push(slot);
        }
    }

    // ═══════════════════════════════════════════════════════════════════════
    // Abort
    // ═══════════════════════════════════════════════════════════════════════

    /// Abandon everything not yet posted.
    ///
    /// Staged packets and the partially filled packet are marked `ignore`
    /// and still flow through the ring so that their fragments come back
    /// through [`TxTranslator::drain`]. Their lists, and every list not yet
    /// started, complete with `Paused`.
    pub fn abort(&mut self) {
        let end = self.rings.packets.end();
        for k in 0..self.staged_packets {
            let index = self.rings.packets.increment(end, k);
            self.rings.packets.get_mut(index).ignore = true;
            if let Some(slot) = self.contexts[index as usize] {
                if let Some(entry) = self.in_flight[slot as usize].as_mut() {
                    entry.list.pause();
                }
            }
        }

        if let Some(mut cursor) = self.cursor.take() {
            if let Some(mut entry) = self.in_flight[cursor.list as usize].take() {
                if cursor.open.is_some() || cursor.buffer < entry.list.buffers().len() {
                    entry.list.pause();
                }
                if let Some(open) = cursor.open {
                    self.close_packet(&mut entry, &mut cursor, open.slot, open.first_fragment, open.fragment_count, true);
                }
                entry.translated = true;
                let done = entry.outstanding == 0;
                self.in_flight[cursor.list as usize] = Some(entry);
                if done {
                    self.complete(cursor.list);
                }
            }
        }

        let mut aborted = 0;
        for mut list in self.pending.take() {
            list.pause();
            self.completed.push_back(list);
            aborted += 1;
        }
        if aborted > 0 {
            log::debug!("tx: aborted {} pending lists", aborted);
        }
    }
}

impl core::fmt::Debug for TxTranslator {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("TxTranslator")
            .field("rings", &self.rings)
            .field("strategy", &self.mapper.strategy())
            .field("pending", &self.pending.len())
            .field("staged_packets", &self.staged_packets)
            .field("staged_fragments", &self.staged_fragments)
            .finish()
    }
}
