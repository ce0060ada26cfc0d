//! Ring records: packets, fragments and per-packet extensions.

use crate::dma::buffer::DmaBuffer;
use crate::types::chain::MemoryDescriptor;
use crate::types::layout::PacketLayout;

// ═══════════════════════════════════════════════════════════════════════════
// Extensions
// ═══════════════════════════════════════════════════════════════════════════

/// Tx checksum action for one layer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum TxChecksumAction {
    #[default]
    Passthrough,
    Required,
}

/// Rx checksum evaluation for one layer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum RxChecksumEvaluation {
    #[default]
    NotChecked,
    Valid,
    Invalid,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct ChecksumExtension {
    pub tx_layer3: TxChecksumAction,
    pub tx_layer4: TxChecksumAction,
    pub rx_layer3: RxChecksumEvaluation,
    pub rx_layer4: RxChecksumEvaluation,
}

/// Segmentation offload. An MSS of 0 means no segmentation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct GsoExtension {
    pub tcp_mss: u32,
    pub udp_mss: u32,
}

/// Receive coalescing counters filled by the adapter.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct RscExtension {
    pub coalesced_segments: u16,
    pub duplicate_acks: u16,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Ieee8021QExtension {
    pub priority: u8,
    pub vlan_id: u16,
}

/// Extension block of a packet record.
///
/// Only the fields of extensions enabled on the queue are meaningful.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct PacketExtensions {
    pub checksum: ChecksumExtension,
    pub gso: GsoExtension,
    pub rsc: RscExtension,
    pub ieee8021q: Option<Ieee8021QExtension>,
}

// ═══════════════════════════════════════════════════════════════════════════
// Packet
// ═══════════════════════════════════════════════════════════════════════════

/// One frame on the packet ring.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct NetPacket {
    /// First fragment slot.
    pub fragment_index: u32,
    /// Number of fragment slots, possibly wrapping.
    pub fragment_count: u16,
    /// Header layout. On Rx an adapter may pre-fill a partial layout.
    pub layout: Option<PacketLayout>,
    /// Adapter must skip this packet (Tx) / software must drop it (Rx).
    pub ignore: bool,
    pub extensions: PacketExtensions,
}

impl NetPacket {
    pub fn reset(&mut self) {
        *self = Self::default();
    }
}

// ═══════════════════════════════════════════════════════════════════════════
// Fragment
// ═══════════════════════════════════════════════════════════════════════════

/// Memory behind a fragment.
#[derive(Debug, Default)]
pub enum FragmentBuffer {
    #[default]
    Empty,
    /// Caller memory used in place.
    Region(MemoryDescriptor),
    /// Pool memory: a bounce buffer (Tx) or receive buffer (Rx).
    Pooled(DmaBuffer),
}

/// One contiguous span on the fragment ring.
#[derive(Debug, Default)]
pub struct NetFragment {
    /// Bytes usable from `offset` (Rx) or the size of the backing span (Tx).
    pub capacity: u32,
    /// Bytes of payload.
    pub valid_length: u32,
    /// Payload start within the backing buffer.
    pub offset: u32,
    /// Device-visible address of the payload, when the adapter needs one.
    pub logical_address: Option<u64>,
    pub buffer: FragmentBuffer,
}

impl NetFragment {
    /// Whether the payload lives in a leased pool buffer.
    pub fn is_pooled(&self) -> bool {
        matches!(self.buffer, FragmentBuffer::Pooled(_))
    }

    pub fn is_empty(&self) -> bool {
        matches!(self.buffer, FragmentBuffer::Empty)
    }

    /// Payload bytes, driver side.
    ///
    /// # Panics
    /// Panics if a pooled buffer is still device-owned.
    pub fn payload(&self) -> &[u8] {
        let range = self.offset as usize..(self.offset + self.valid_length) as usize;
        match &self.buffer {
            FragmentBuffer::Empty => &[],
            FragmentBuffer::Region(mdl) => &mdl.bytes()[range],
            FragmentBuffer::Pooled(buf) => &buf.as_slice()[range],
        }
    }

    /// Payload bytes, adapter side, while the fragment is posted.
    pub fn device_payload(&self) -> &[u8] {
        let range = self.offset as usize..(self.offset + self.valid_length) as usize;
        match &self.buffer {
            FragmentBuffer::Empty => &[],
            FragmentBuffer::Region(mdl) => &mdl.bytes()[range],
            FragmentBuffer::Pooled(buf) => &buf.device_slice()[range],
        }
    }

    /// Writable receive space `[offset, offset + capacity)`, adapter side.
    ///
    /// `None` for fragments that do not own pool memory.
    pub fn device_space_mut(&mut self) -> Option<&mut [u8]> {
        let range = self.offset as usize..(self.offset + self.capacity) as usize;
        match &mut self.buffer {
            FragmentBuffer::Pooled(buf) => Some(&mut buf.device_slice_mut()[range]),
            _ => None,
        }
    }

    /// Detach the backing buffer and reset the record.
    pub fn take_buffer(&mut self) -> FragmentBuffer {
        let buffer = core::mem::take(&mut self.buffer);
        self.capacity = 0;
        self.valid_length = 0;
        self.offset = 0;
        self.logical_address = None;
        buffer
    }
}
