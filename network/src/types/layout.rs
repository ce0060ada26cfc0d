//! Parsed header layout of a packet.

/// Layer 2 framing.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Layer2Type {
    #[default]
    Unspecified,
    /// No layer 2 header (raw IP).
    Null,
    /// Ethernet II or 802.3 with LLC/SNAP, optionally VLAN tagged.
    Ethernet,
    /// 802.11 data frame with LLC/SNAP.
    Ieee80211,
}

/// Layer 3 protocol.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Layer3Type {
    #[default]
    Unspecified,
    Ipv4NoOptions,
    Ipv4WithOptions,
    Ipv6NoExtensions,
    Ipv6WithExtensions,
}

impl Layer3Type {
    pub fn is_ipv4(&self) -> bool {
        matches!(self, Self::Ipv4NoOptions | Self::Ipv4WithOptions)
    }

    pub fn is_ipv6(&self) -> bool {
        matches!(self, Self::Ipv6NoExtensions | Self::Ipv6WithExtensions)
    }
}

/// Layer 4 protocol.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Layer4Type {
    #[default]
    Unspecified,
    Tcp,
    Udp,
    /// A non-first (or more-fragments) IP fragment; no layer 4 header visible.
    IpFragment,
    /// Unfragmented IP carrying something other than TCP/UDP.
    IpNotFragment,
}

/// Header layout. Lengths are in bytes.
///
/// A layer whose type is `Unspecified` has length 0, and every deeper layer
/// is `Unspecified` too.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct PacketLayout {
    pub layer2_type: Layer2Type,
    pub layer2_header_length: u8,
    pub layer3_type: Layer3Type,
    pub layer3_header_length: u16,
    pub layer4_type: Layer4Type,
    pub layer4_header_length: u8,
}

impl PacketLayout {
    /// Largest layer 2 header length the layout can record.
    pub const MAX_LAYER2_HEADER: usize = 127;
    /// Largest layer 3 header length (including IPv6 extensions).
    pub const MAX_LAYER3_HEADER: usize = 511;
    /// Largest layer 4 header length.
    pub const MAX_LAYER4_HEADER: usize = 255;

    /// Total bytes of all recognised headers.
    pub fn header_length(&self) -> usize {
        self.layer2_header_length as usize
            + self.layer3_header_length as usize
            + self.layer4_header_length as usize
    }

    /// Offset of the layer 3 header.
    pub fn layer3_offset(&self) -> usize {
        self.layer2_header_length as usize
    }

    /// Offset of the layer 4 header.
    pub fn layer4_offset(&self) -> usize {
        self.layer2_header_length as usize + self.layer3_header_length as usize
    }

    pub fn is_unspecified(&self) -> bool {
        self.layer2_type == Layer2Type::Unspecified
    }

    /// Clear layer 3 and everything below it.
    pub fn clear_from_layer3(&mut self) {
        self.layer3_type = Layer3Type::Unspecified;
        self.layer3_header_length = 0;
        self.clear_layer4();
    }

    /// Clear layer 4.
    pub fn clear_layer4(&mut self) {
        self.layer4_type = Layer4Type::Unspecified;
        self.layer4_header_length = 0;
    }
}
