//! Datapath configuration.
//!
//! Three layers, each immutable once a queue exists:
//!
//! - [`DatapathCapabilities`]: what the adapter reports (ring sizes, fragment
//!   limits, DMA constraints, backfill, media type).
//! - [`DriverConfig`]: per-adapter knobs chosen at bring-up (bounce policy,
//!   DMA bypass, worker thread settings, loop budget, pool sizes).
//! - [`QueueConfig`]: what a single queue requests (ring sizes, extensions).
//!
//! The driver config is built once and shared as `Arc<DriverConfig>`.

use bitflags::bitflags;

use crate::error::{DatapathError, Result};
use crate::types::Layer2Type;

/// Largest ring the index protocol supports.
pub const MAX_RING_SIZE: u32 = 1 << 16;

// ═══════════════════════════════════════════════════════════════════════════
// Extensions
// ═══════════════════════════════════════════════════════════════════════════

bitflags! {
    /// Per-packet metadata extensions a queue opts into.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
    pub struct ExtensionSet: u32 {
        /// Checksum offload request (Tx) / evaluation (Rx).
        const CHECKSUM = 1 << 0;
        /// TCP/UDP segmentation offload.
        const GSO = 1 << 1;
        /// Receive segment coalescing.
        const RSC = 1 << 2;
        /// 802.1Q priority and VLAN tag.
        const IEEE8021Q = 1 << 3;
    }
}

// ═══════════════════════════════════════════════════════════════════════════
// Adapter capabilities
// ═══════════════════════════════════════════════════════════════════════════

/// DMA constraints for one direction.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DmaCapabilities {
    /// Required alignment of every fragment's first byte (power of two, 1 = none).
    pub alignment: u32,
    /// Highest bus address the adapter can reach.
    pub maximum_physical_address: u64,
}

impl Default for DmaCapabilities {
    fn default() -> Self {
        Self {
            alignment: 1,
            maximum_physical_address: u64::MAX,
        }
    }
}

impl DmaCapabilities {
    /// Constraints of a 32-bit DMA engine.
    pub fn dma32() -> Self {
        Self {
            alignment: 1,
            maximum_physical_address: u32::MAX as u64,
        }
    }

    /// Whether `[address, address + length)` satisfies these constraints.
    pub fn accepts(&self, address: u64, length: u32) -> bool {
        let aligned = self.alignment <= 1 || address % self.alignment as u64 == 0;
        let last = address.checked_add(length.max(1) as u64 - 1);
        aligned && last.map_or(false, |last| last <= self.maximum_physical_address)
    }
}

/// Datapath capabilities reported by the adapter.
#[derive(Debug, Clone)]
pub struct DatapathCapabilities {
    /// Framing of transmitted and received frames.
    pub media: Layer2Type,
    /// Default packet ring size for Tx queues.
    pub tx_packet_ring_size: u32,
    /// Default fragment ring size for Tx queues.
    pub tx_fragment_ring_size: u32,
    /// Default packet ring size for Rx queues.
    pub rx_packet_ring_size: u32,
    /// Default fragment ring size for Rx queues.
    pub rx_fragment_ring_size: u32,
    /// Most fragments the adapter accepts for one Tx packet.
    pub max_tx_fragments_per_packet: u16,
    /// Largest span a single fragment may describe.
    pub max_fragment_size: u32,
    /// Head-room reserved in front of bounced Tx payloads.
    pub tx_backfill: u16,
    /// Size of each receive buffer.
    pub rx_buffer_size: u32,
    /// Offset at which the adapter writes into receive buffers.
    pub rx_backfill: u16,
    /// Tx DMA constraints; `None` when the adapter reads CPU memory directly.
    pub tx_dma: Option<DmaCapabilities>,
    /// Rx DMA constraints.
    pub rx_dma: Option<DmaCapabilities>,
    /// Extensions the adapter understands.
    pub supported_extensions: ExtensionSet,
}

impl Default for DatapathCapabilities {
    fn default() -> Self {
        Self {
            media: Layer2Type::Ethernet,
            tx_packet_ring_size: 256,
            tx_fragment_ring_size: 512,
            rx_packet_ring_size: 256,
            rx_fragment_ring_size: 256,
            max_tx_fragments_per_packet: 16,
            max_fragment_size: 64 * 1024,
            tx_backfill: 0,
            rx_buffer_size: 2048,
            rx_backfill: 0,
            tx_dma: None,
            rx_dma: None,
            supported_extensions: ExtensionSet::all(),
        }
    }
}

impl DatapathCapabilities {
    /// Capabilities of a DMA-mastering adapter with the given constraints.
    pub fn with_dma(dma: DmaCapabilities) -> Self {
        Self {
            tx_dma: Some(dma),
            rx_dma: Some(dma),
            ..Self::default()
        }
    }

    /// Capabilities of a raw-IP adapter (no layer 2 framing).
    pub fn raw_ip() -> Self {
        Self {
            media: Layer2Type::Null,
            ..Self::default()
        }
    }

    pub fn validate(&self) -> Result<()> {
        if self.max_tx_fragments_per_packet == 0 {
            return Err(DatapathError::InvalidConfig("max_tx_fragments_per_packet is zero"));
        }
        if self.max_fragment_size == 0 {
            return Err(DatapathError::InvalidConfig("max_fragment_size is zero"));
        }
        if self.rx_buffer_size <= self.rx_backfill as u32 {
            return Err(DatapathError::InvalidConfig("rx_backfill leaves no room"));
        }
        for dma in self.tx_dma.iter().chain(self.rx_dma.iter()) {
            if !dma.alignment.is_power_of_two() {
                return Err(DatapathError::InvalidConfig("DMA alignment not a power of two"));
            }
        }
        Ok(())
    }
}

// ═══════════════════════════════════════════════════════════════════════════
// Driver configuration
// ═══════════════════════════════════════════════════════════════════════════

/// When to copy Tx payloads into pool memory.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum BouncePolicy {
    /// Bounce only when a buffer cannot be used in place.
    #[default]
    Auto,
    /// Bounce every packet, never map caller memory.
    Always,
}

/// How queue loops are driven.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ExecutionMode {
    /// Caller drives the loops through `QueueControl::poll`.
    #[default]
    Polled,
    /// One worker thread per queue.
    #[cfg(feature = "std")]
    DedicatedThread,
}

/// Per-adapter driver configuration.
#[derive(Debug, Clone)]
pub struct DriverConfig {
    /// Tx bounce policy.
    pub bounce_policy: BouncePolicy,
    /// Allow physical addresses to be used without a scatter-gather list.
    pub allow_dma_bypass: bool,
    /// How queue loops run.
    pub execution: ExecutionMode,
    /// Worker thread priority hint.
    pub thread_priority: Option<i32>,
    /// Worker thread CPU affinity mask.
    pub thread_affinity: Option<u64>,
    /// Tick source frequency (ticks per second).
    pub tick_frequency: u64,
    /// Time budget of one loop run in microseconds (0 = unlimited).
    pub loop_budget_us: u64,
    /// Bounce buffers per Tx queue.
    pub tx_bounce_buffer_count: u16,
    /// Size of each bounce buffer including backfill.
    pub tx_bounce_buffer_size: u32,
    /// Receive buffers per Rx queue (0 = one per fragment slot).
    pub rx_buffer_count: u16,
}

impl Default for DriverConfig {
    fn default() -> Self {
        Self {
            bounce_policy: BouncePolicy::Auto,
            allow_dma_bypass: true,
            execution: ExecutionMode::Polled,
            thread_priority: None,
            thread_affinity: None,
            tick_frequency: 1_000_000_000,
            loop_budget_us: 2_000,
            tx_bounce_buffer_count: 64,
            tx_bounce_buffer_size: 2048,
            rx_buffer_count: 0,
        }
    }
}

impl DriverConfig {
    /// Polled configuration with the given tick frequency (e.g. calibrated TSC).
    pub fn polled(tick_frequency: u64) -> Self {
        Self {
            tick_frequency,
            ..Self::default()
        }
    }

    /// One worker thread per queue.
    #[cfg(feature = "std")]
    pub fn threaded() -> Self {
        Self {
            execution: ExecutionMode::DedicatedThread,
            ..Self::default()
        }
    }

    pub fn with_bounce_policy(mut self, policy: BouncePolicy) -> Self {
        self.bounce_policy = policy;
        self
    }

    pub fn with_dma_bypass(mut self, allow: bool) -> Self {
        self.allow_dma_bypass = allow;
        self
    }

    pub fn with_loop_budget_us(mut self, budget_us: u64) -> Self {
        self.loop_budget_us = budget_us;
        self
    }

    pub fn with_bounce_buffers(mut self, count: u16, size: u32) -> Self {
        self.tx_bounce_buffer_count = count;
        self.tx_bounce_buffer_size = size;
        self
    }

    /// Loop budget converted to ticks (0 = unlimited).
    pub fn loop_budget_ticks(&self) -> u64 {
        self.tick_frequency.saturating_mul(self.loop_budget_us) / 1_000_000
    }

    /// Convert ticks to microseconds.
    pub fn ticks_to_us(&self, ticks: u64) -> u64 {
        if self.tick_frequency == 0 {
            return 0;
        }
        ticks.saturating_mul(1_000_000) / self.tick_frequency
    }
}

// ═══════════════════════════════════════════════════════════════════════════
// Queue configuration
// ═══════════════════════════════════════════════════════════════════════════

/// Queue direction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum QueueKind {
    Tx,
    Rx,
}

/// What a queue asks for at creation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct QueueConfig {
    pub kind: QueueKind,
    /// Adapter-visible queue id.
    pub id: u16,
    /// Requested packet ring size (0 = adapter default).
    pub packet_ring_size: u32,
    /// Requested fragment ring size (0 = adapter default).
    pub fragment_ring_size: u32,
    /// Requested metadata extensions.
    pub extensions: ExtensionSet,
}

impl QueueConfig {
    pub fn tx(id: u16) -> Self {
        Self {
            kind: QueueKind::Tx,
            id,
            packet_ring_size: 0,
            fragment_ring_size: 0,
            extensions: ExtensionSet::empty(),
        }
    }

    pub fn rx(id: u16) -> Self {
        Self {
            kind: QueueKind::Rx,
            ..Self::tx(id)
        }
    }

    pub fn with_ring_sizes(mut self, packets: u32, fragments: u32) -> Self {
        self.packet_ring_size = packets;
        self.fragment_ring_size = fragments;
        self
    }

    pub fn with_extensions(mut self, extensions: ExtensionSet) -> Self {
        self.extensions = extensions;
        self
    }

    /// Fill defaults from the adapter and validate.
    pub fn resolve(&self, caps: &DatapathCapabilities) -> Result<QueueConfig> {
        let (default_packets, default_fragments) = match self.kind {
            QueueKind::Tx => (caps.tx_packet_ring_size, caps.tx_fragment_ring_size),
            QueueKind::Rx => (caps.rx_packet_ring_size, caps.rx_fragment_ring_size),
        };
        let packets = if self.packet_ring_size == 0 { default_packets } else { self.packet_ring_size };
        let fragments = if self.fragment_ring_size == 0 { default_fragments } else { self.fragment_ring_size };

        for size in [packets, fragments] {
            if size < 2 || size > MAX_RING_SIZE || !size.is_power_of_two() {
                return Err(DatapathError::InvalidConfig("ring size must be a power of two in [2, 65536]"));
            }
        }
        if !caps.supported_extensions.contains(self.extensions) {
            return Err(DatapathError::InvalidConfig("extension not supported by adapter"));
        }

        Ok(QueueConfig {
            packet_ring_size: packets,
            fragment_ring_size: fragments,
            ..*self
        })
    }
}
