//! Out-of-band offload metadata carried on a buffer list.
//!
//! These are the descriptor-chain side of the metadata mapping; the ring
//! side lives in [`crate::types::packet::PacketExtensions`].

/// Tx checksum offload request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct TxChecksumInfo {
    pub is_ipv4: bool,
    pub is_ipv6: bool,
    /// Compute the IPv4 header checksum.
    pub ip_header_checksum: bool,
    pub tcp_checksum: bool,
    pub udp_checksum: bool,
}

impl TxChecksumInfo {
    pub fn is_requested(&self) -> bool {
        self.ip_header_checksum || self.tcp_checksum || self.udp_checksum
    }
}

/// Rx checksum evaluation reported upstream.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct RxChecksumInfo {
    pub ip_checksum_succeeded: bool,
    pub ip_checksum_failed: bool,
    pub tcp_checksum_succeeded: bool,
    pub tcp_checksum_failed: bool,
    pub udp_checksum_succeeded: bool,
    pub udp_checksum_failed: bool,
}

/// TCP large send offload.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LsoInfo {
    /// Maximum segment size.
    pub mss: u32,
    /// Offset of the TCP header from the start of the frame.
    pub tcp_header_offset: u16,
}

/// UDP segmentation offload.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct UsoInfo {
    pub mss: u32,
    pub udp_header_offset: u16,
}

/// Receive segment coalescing result.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RscInfo {
    /// Segments merged into this frame.
    pub coalesced_segments: u16,
    pub duplicate_acks: u16,
}

/// 802.1Q tag information.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Ieee8021QInfo {
    /// User priority (3 bits).
    pub priority: u8,
    /// VLAN id (12 bits).
    pub vlan_id: u16,
}

/// All out-of-band fields of a buffer list.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct OutOfBandInfo {
    pub tx_checksum: TxChecksumInfo,
    pub rx_checksum: RxChecksumInfo,
    pub lso: Option<LsoInfo>,
    pub uso: Option<UsoInfo>,
    pub rsc: Option<RscInfo>,
    pub ieee8021q: Option<Ieee8021QInfo>,
}
