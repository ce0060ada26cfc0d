//! Shared fixtures: a loopback adapter plus chain and frame builders.

#![allow(dead_code)]

use std::collections::VecDeque;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use dma_pool::DmaArena;
use morpheus_netadapter::dma::{DmaAdapter, SoftwareDmaAdapter};
use morpheus_netadapter::types::PacketExtensions;
use morpheus_netadapter::{
    AdapterNotifier, DatapathCapabilities, DriverConfig, MemoryDescriptor, NblChain, NetAdapter,
    NetBuffer, NetBufferList, PacketLayout, PacketQueue, QueueConfig, QueueControl, Result,
    RingSet,
};

// ═══════════════════════════════════════════════════════════════════════════
// Loopback adapter
// ═══════════════════════════════════════════════════════════════════════════

/// One packet as the adapter saw it.
#[derive(Debug, Clone)]
pub struct TxRecord {
    pub frame: Vec<u8>,
    pub fragment_count: u16,
    pub addresses: Vec<Option<u64>>,
    pub layout: Option<PacketLayout>,
    pub extensions: PacketExtensions,
}

/// Shared adapter state, inspected and steered by tests.
#[derive(Debug, Default)]
pub struct Wire {
    pub transmitted: Vec<TxRecord>,
    /// Frames the Rx side will deliver, front first.
    pub inbound: VecDeque<Vec<u8>>,
    /// Tx packets are consumed but not returned while set.
    pub hold_tx: bool,
    /// On cancel the Rx side returns its packet slots at once but its
    /// fragment slots one at a time, every third `advance`.
    pub slow_rx_cancel: bool,
    /// Layout the Rx side pre-fills on every received packet.
    pub rx_layout: Option<PacketLayout>,
    pub starts: usize,
    pub stops: usize,
    pub cancels: usize,
}

pub type SharedWire = Arc<Mutex<Wire>>;

pub struct LoopbackAdapter {
    caps: DatapathCapabilities,
    dma: Option<SoftwareDmaAdapter>,
    wire: SharedWire,
    notifiers: Arc<Mutex<Vec<AdapterNotifier>>>,
}

impl LoopbackAdapter {
    pub fn new(caps: DatapathCapabilities) -> Self {
        Self {
            caps,
            dma: None,
            wire: SharedWire::default(),
            notifiers: Arc::default(),
        }
    }

    pub fn with_dma(mut self, dma: SoftwareDmaAdapter) -> Self {
        self.dma = Some(dma);
        self
    }

    pub fn wire(&self) -> SharedWire {
        self.wire.clone()
    }

    /// Queue frames for reception and poke every queue.
    pub fn inject(&self, frames: impl IntoIterator<Item = Vec<u8>>) {
        self.wire.lock().unwrap().inbound.extend(frames);
        for notifier in self.notifiers.lock().unwrap().iter() {
            notifier.notify();
        }
    }
}

impl NetAdapter for LoopbackAdapter {
    fn capabilities(&self) -> DatapathCapabilities {
        self.caps.clone()
    }

    fn dma_adapter(&mut self) -> Option<Box<dyn DmaAdapter>> {
        self.dma.clone().map(|dma| Box::new(dma) as Box<dyn DmaAdapter>)
    }

    fn create_tx_queue(&mut self, _config: &QueueConfig, notifier: AdapterNotifier) -> Result<Box<dyn PacketQueue>> {
        self.notifiers.lock().unwrap().push(notifier.clone());
        Ok(Box::new(LoopbackTx {
            wire: self.wire.clone(),
            notifier,
            consumed: 0,
            cancelled: false,
        }))
    }

    fn create_rx_queue(&mut self, _config: &QueueConfig, notifier: AdapterNotifier) -> Result<Box<dyn PacketQueue>> {
        self.notifiers.lock().unwrap().push(notifier.clone());
        Ok(Box::new(LoopbackRx {
            wire: self.wire.clone(),
            notifier,
            cancelled: false,
            ticks: 0,
        }))
    }
}

struct LoopbackTx {
    wire: SharedWire,
    notifier: AdapterNotifier,
    /// Adapter-owned packets already put on the wire.
    consumed: u32,
    cancelled: bool,
}

impl PacketQueue for LoopbackTx {
    fn start(&mut self, _rings: &mut RingSet) {
        self.cancelled = false;
        self.consumed = 0;
        self.wire.lock().unwrap().starts += 1;
    }

    fn advance(&mut self, rings: &mut RingSet) {
        let mut wire = self.wire.lock().unwrap();
        let owned = rings.packets.adapter_owned();
        for index in owned.indices(rings.packets.mask()).skip(self.consumed as usize) {
            let packet = rings.packets.get(index);
            if packet.ignore || self.cancelled {
                continue;
            }
            let mut record = TxRecord {
                frame: Vec::new(),
                fragment_count: packet.fragment_count,
                addresses: Vec::new(),
                layout: packet.layout,
                extensions: packet.extensions,
            };
            for fragment in rings.fragments.iter_range(rings.packet_fragments(packet)) {
                record.frame.extend_from_slice(fragment.device_payload());
                record.addresses.push(fragment.logical_address);
            }
            wire.transmitted.push(record);
        }
        self.consumed = owned.count;

        if !owned.is_empty() && (!wire.hold_tx || self.cancelled) {
            rings.return_all();
            self.consumed = 0;
            drop(wire);
            self.notifier.notify();
        }
    }

    fn set_armed(&mut self, _armed: bool) {}

    fn cancel(&mut self, rings: &mut RingSet) {
        self.cancelled = true;
        self.wire.lock().unwrap().cancels += 1;
        rings.return_all();
        self.consumed = 0;
    }

    fn stop(&mut self, _rings: &mut RingSet) {
        self.wire.lock().unwrap().stops += 1;
    }
}

struct LoopbackRx {
    wire: SharedWire,
    notifier: AdapterNotifier,
    cancelled: bool,
    /// Advances since a slow cancel.
    ticks: u32,
}

impl PacketQueue for LoopbackRx {
    fn start(&mut self, _rings: &mut RingSet) {
        self.cancelled = false;
        self.wire.lock().unwrap().starts += 1;
    }

    fn advance(&mut self, rings: &mut RingSet) {
        if self.cancelled {
            if !self.wire.lock().unwrap().slow_rx_cancel {
                rings.return_all();
                return;
            }
            self.ticks += 1;
            if self.ticks % 3 == 0 && !rings.fragments.adapter_owned().is_empty() {
                rings.fragments.advance_begin(1);
                self.notifier.notify();
            }
            return;
        }
        let mut wire = self.wire.lock().unwrap();
        let packets = rings.packets.adapter_owned();
        let fragments = rings.fragments.adapter_owned();
        let (mut used_packets, mut used_fragments) = (0u32, 0u32);

        while used_packets < packets.count && used_fragments < fragments.count {
            let Some(frame) = wire.inbound.front() else {
                break;
            };
            let first = rings.fragments.increment(fragments.start, used_fragments);
            let space = rings.fragments.get(first).capacity.max(1) as usize;
            let needed = frame.len().div_ceil(space).max(1) as u32;
            if used_fragments + needed > fragments.count {
                break;
            }

            let frame = wire.inbound.pop_front().unwrap_or_default();
            let mut copied = 0;
            for k in 0..needed {
                let fragment = rings.fragments.get_mut(rings.fragments.increment(first, k));
                let dest = fragment.device_space_mut().expect("posted receive fragment has a buffer");
                let n = dest.len().min(frame.len() - copied);
                dest[..n].copy_from_slice(&frame[copied..copied + n]);
                fragment.valid_length = n as u32;
                copied += n;
            }

            let slot = rings.packets.increment(packets.start, used_packets);
            let packet = rings.packets.get_mut(slot);
            packet.fragment_index = first;
            packet.fragment_count = needed as u16;
            packet.layout = wire.rx_layout;
            used_packets += 1;
            used_fragments += needed;
        }
        drop(wire);

        if used_packets > 0 {
            rings.fragments.advance_begin(used_fragments);
            rings.packets.advance_begin(used_packets);
            self.notifier.notify();
        }
    }

    fn set_armed(&mut self, _armed: bool) {}

    fn cancel(&mut self, rings: &mut RingSet) {
        self.cancelled = true;
        self.ticks = 0;
        let mut wire = self.wire.lock().unwrap();
        wire.cancels += 1;
        if wire.slow_rx_cancel {
            rings.packets.advance_begin(rings.packets.adapter_owned().count);
        } else {
            rings.return_all();
        }
    }

    fn stop(&mut self, _rings: &mut RingSet) {
        self.wire.lock().unwrap().stops += 1;
    }
}

// ═══════════════════════════════════════════════════════════════════════════
// Controller setup
// ═══════════════════════════════════════════════════════════════════════════

/// Small rings so tests hit wraparound and backpressure quickly.
pub fn small_caps() -> DatapathCapabilities {
    DatapathCapabilities {
        tx_packet_ring_size: 16,
        tx_fragment_ring_size: 32,
        rx_packet_ring_size: 16,
        rx_fragment_ring_size: 16,
        max_tx_fragments_per_packet: 8,
        rx_buffer_size: 2048,
        ..DatapathCapabilities::default()
    }
}

pub fn arena() -> DmaArena {
    DmaArena::new(4 << 20).expect("test arena")
}

pub fn control(adapter: LoopbackAdapter, config: DriverConfig) -> QueueControl<LoopbackAdapter> {
    QueueControl::new(adapter, config, arena()).expect("queue control")
}

/// Completion sink collecting every list handed back.
#[derive(Clone, Default)]
pub struct Collector(pub Arc<Mutex<Vec<NetBufferList>>>);

impl Collector {
    pub fn callback(&self) -> impl FnMut(NblChain) + Send + 'static {
        let lists = self.0.clone();
        move |chain: NblChain| lists.lock().unwrap().extend(chain)
    }

    pub fn len(&self) -> usize {
        self.0.lock().unwrap().len()
    }

    pub fn take(&self) -> Vec<NetBufferList> {
        std::mem::take(&mut *self.0.lock().unwrap())
    }
}

/// Poll until `done` holds, panicking after a generous bound.
pub fn poll_until(control: &mut QueueControl<LoopbackAdapter>, mut done: impl FnMut() -> bool) {
    for _ in 0..10_000 {
        if done() {
            return;
        }
        control.poll();
    }
    panic!("condition not reached while polling");
}

/// Wait (threaded mode) until `done` holds.
pub fn wait_until(mut done: impl FnMut() -> bool) {
    let deadline = Instant::now() + Duration::from_secs(10);
    while !done() {
        assert!(Instant::now() < deadline, "condition not reached in time");
        std::thread::sleep(Duration::from_millis(1));
    }
}

// ═══════════════════════════════════════════════════════════════════════════
// Frame and chain builders
// ═══════════════════════════════════════════════════════════════════════════

const ETH_HEADER: usize = 14;

fn ethernet(ethertype: u16) -> Vec<u8> {
    let mut frame = vec![0x02, 0, 0, 0, 0, 0x02, 0x02, 0, 0, 0, 0, 0x01];
    frame.extend_from_slice(&ethertype.to_be_bytes());
    frame
}

fn ipv4(protocol: u8, payload_len: usize) -> Vec<u8> {
    let total = (20 + payload_len) as u16;
    let mut header = vec![0x45, 0];
    header.extend_from_slice(&total.to_be_bytes());
    header.extend_from_slice(&[0, 1, 0x40, 0, 64, protocol, 0, 0]);
    header.extend_from_slice(&[10, 0, 0, 1, 10, 0, 0, 2]);
    header
}

/// Ethernet + IPv4 + UDP with a patterned payload.
pub fn udp_frame(payload_len: usize) -> Vec<u8> {
    let udp_len = (8 + payload_len) as u16;
    let mut frame = ethernet(0x0800);
    frame.extend(ipv4(17, 8 + payload_len));
    frame.extend_from_slice(&[0x30, 0x39, 0x00, 0x35]);
    frame.extend_from_slice(&udp_len.to_be_bytes());
    frame.extend_from_slice(&[0, 0]);
    frame.extend((0..payload_len).map(|i| (i % 251) as u8));
    frame
}

/// Ethernet + IPv4 + TCP (20-byte header) with a patterned payload.
pub fn tcp_frame(payload_len: usize) -> Vec<u8> {
    let mut frame = ethernet(0x0800);
    frame.extend(ipv4(6, 20 + payload_len));
    let mut tcp = vec![0u8; 20];
    tcp[12] = 5 << 4;
    frame.extend(tcp);
    frame.extend((0..payload_len).map(|i| (i % 241) as u8));
    frame
}

pub const UDP_HEADERS: usize = ETH_HEADER + 20 + 8;

/// Split `frame` into memory descriptors of the given sizes (zero allowed).
///
/// The last region takes whatever the sizes leave over.
pub fn regions(frame: &[u8], sizes: &[usize]) -> NetBuffer {
    let mut mdls = Vec::new();
    let mut at = 0;
    for &size in sizes {
        let end = (at + size).min(frame.len());
        mdls.push(MemoryDescriptor::from_slice(&frame[at..end]));
        at = end;
    }
    if at < frame.len() {
        mdls.push(MemoryDescriptor::from_slice(&frame[at..]));
    }
    NetBuffer::new(mdls)
}

pub fn list(cookie: u64, buffers: Vec<NetBuffer>) -> NetBufferList {
    NetBufferList::new(buffers).with_cookie(cookie)
}

pub fn single(cookie: u64, frame: &[u8]) -> NetBufferList {
    list(cookie, vec![NetBuffer::from_bytes(frame)])
}

pub fn chain(lists: impl IntoIterator<Item = NetBufferList>) -> NblChain {
    lists.into_iter().collect()
}

/// Every byte of a received list.
pub fn list_bytes(list: &NetBufferList) -> Vec<u8> {
    list.buffers().iter().flat_map(|b| b.to_vec()).collect()
}
