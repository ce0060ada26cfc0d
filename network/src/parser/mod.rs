//! Packet header layout parser.
//!
//! Three ordered stages over a (possibly partial) frame:
//!
//! ```text
//!   bytes ──> layer2 ──> layer3 ──> layer4 ──> PacketLayout
//!             Ethernet    IPv4       TCP
//!             802.1Q/ad   IPv6+ext   UDP
//!             LLC/SNAP               IpFragment / IpNotFragment
//!             802.11
//!             Null
//! ```
//!
//! The parser is conservative: a stage that cannot prove its header fits in
//! `bytes` leaves its layer and every deeper layer `Unspecified`. Layers the
//! caller already knows may be passed as a pre-filled layout; they are
//! trusted as a prefix (layer 2, then 3, then 4) when their lengths fit.

mod layer2;
mod layer3;
mod layer4;

use layer2::NextHeader;
use layer3::Layer3Header;

use crate::types::{Layer2Type, Layer3Type, Layer4Type, PacketLayout};

/// Bytes of a frame the Tx path gathers before parsing.
pub const HEADER_PREFIX_LEN: usize = 256;

/// Parse the header layout of `bytes`.
///
/// # Arguments
/// - `layer2_hint`: media type of the queue
/// - `bytes`: leading bytes of the frame (may be truncated)
/// - `prefilled`: layers already determined by the adapter or caller
pub fn parse(layer2_hint: Layer2Type, bytes: &[u8], prefilled: Option<&PacketLayout>) -> PacketLayout {
    let mut layout = PacketLayout::default();
    let trusted = prefilled.map(|p| trusted_prefix(p, bytes.len())).unwrap_or_default();

    // Layer 2
    let next = if trusted.layer2_type != Layer2Type::Unspecified {
        layout.layer2_type = trusted.layer2_type;
        layout.layer2_header_length = trusted.layer2_header_length;
        NextHeader::ByVersion
    } else {
        let Some(l2) = layer2::parse(layer2_hint, bytes) else {
            return layout;
        };
        if l2.length > PacketLayout::MAX_LAYER2_HEADER {
            return layout;
        }
        layout.layer2_type = l2.kind;
        layout.layer2_header_length = l2.length as u8;
        l2.next
    };

    // Layer 3
    let l3_bytes = &bytes[layout.layer3_offset()..];
    let l3 = if trusted.layer3_type != Layer3Type::Unspecified {
        let reparsed = layer3_by_version(NextHeader::ByVersion, l3_bytes)
            .filter(|h| h.kind == trusted.layer3_type && h.length == trusted.layer3_header_length as usize);
        layout.layer3_type = trusted.layer3_type;
        layout.layer3_header_length = trusted.layer3_header_length;
        if trusted.layer4_type != Layer4Type::Unspecified {
            layout.layer4_type = trusted.layer4_type;
            layout.layer4_header_length = trusted.layer4_header_length;
            return layout;
        }
        match reparsed {
            Some(h) => h,
            None => return layout,
        }
    } else {
        let Some(h) = layer3_by_version(next, l3_bytes) else {
            return layout;
        };
        layout.layer3_type = h.kind;
        layout.layer3_header_length = h.length as u16;
        h
    };

    // Layer 4
    let l4_bytes = &bytes[layout.layer4_offset()..];
    if let Some((kind, length)) = layer4::parse(l3.transport, l4_bytes) {
        if length <= PacketLayout::MAX_LAYER4_HEADER {
            layout.layer4_type = kind;
            layout.layer4_header_length = length as u8;
        }
    }
    layout
}

fn layer3_by_version(next: NextHeader, bytes: &[u8]) -> Option<Layer3Header> {
    match next {
        NextHeader::Ipv4 => layer3::ipv4(bytes),
        NextHeader::Ipv6 => layer3::ipv6(bytes),
        NextHeader::ByVersion => match layer3::version(bytes)? {
            4 => layer3::ipv4(bytes),
            6 => layer3::ipv6(bytes),
            _ => None,
        },
        NextHeader::Other => None,
    }
}

/// Longest prefix of `prefilled` whose headers fit in `available` bytes.
fn trusted_prefix(prefilled: &PacketLayout, available: usize) -> PacketLayout {
    let mut trusted = PacketLayout::default();
    if prefilled.layer2_type == Layer2Type::Unspecified
        || prefilled.layer2_header_length as usize > available
    {
        return trusted;
    }
    trusted.layer2_type = prefilled.layer2_type;
    trusted.layer2_header_length = prefilled.layer2_header_length;

    if prefilled.layer3_type == Layer3Type::Unspecified
        || trusted.layer4_offset() + prefilled.layer3_header_length as usize > available
    {
        return trusted;
    }
    trusted.layer3_type = prefilled.layer3_type;
    trusted.layer3_header_length = prefilled.layer3_header_length;

    if prefilled.layer4_type == Layer4Type::Unspecified
        || trusted.layer4_offset() + prefilled.layer4_header_length as usize > available
    {
        return trusted;
    }
    trusted.layer4_type = prefilled.layer4_type;
    trusted.layer4_header_length = prefilled.layer4_header_length;
    trusted
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::ethernet::{ethernet_header, ETH_P_8021Q, ETH_P_ARP, ETH_P_IP, ETH_P_IPV6};
    use proptest::prelude::*;

    fn ipv4_tcp_frame(payload: usize) -> Vec<u8> {
        let mut f = ethernet_header([0xFF; 6], [0x02; 6], ETH_P_IP).to_vec();
        let mut ip = [0u8; 20];
        ip[0] = 0x45;
        ip[2..4].copy_from_slice(&(40 + payload as u16).to_be_bytes());
        ip[9] = 6;
        f.extend_from_slice(&ip);
        let mut tcp = [0u8; 20];
        tcp[12] = 5 << 4;
        f.extend_from_slice(&tcp);
        f.resize(f.len() + payload, 0xAB);
        f
    }

    fn ipv6_udp_frame() -> Vec<u8> {
        let mut f = ethernet_header([0xFF; 6], [0x02; 6], ETH_P_IPV6).to_vec();
        let mut ip = [0u8; 40];
        ip[0] = 0x60;
        ip[6] = 17;
        f.extend_from_slice(&ip);
        f.extend_from_slice(&[0; 8]);
        f
    }

    #[test]
    fn test_ethernet_ipv4_tcp() {
        let layout = parse(Layer2Type::Ethernet, &ipv4_tcp_frame(100), None);
        assert_eq!(layout.layer2_type, Layer2Type::Ethernet);
        assert_eq!(layout.layer3_type, Layer3Type::Ipv4NoOptions);
        assert_eq!(layout.layer4_type, Layer4Type::Tcp);
        assert_eq!(layout.header_length(), 54);
    }

    #[test]
    fn test_ethernet_ipv6_udp() {
        let layout = parse(Layer2Type::Ethernet, &ipv6_udp_frame(), None);
        assert_eq!(layout.layer3_type, Layer3Type::Ipv6NoExtensions);
        assert_eq!((layout.layer4_type, layout.layer4_header_length), (Layer4Type::Udp, 8));
    }

    #[test]
    fn test_vlan_tagged() {
        let mut frame = ethernet_header([0xFF; 6], [0x02; 6], ETH_P_8021Q).to_vec();
        frame.extend_from_slice(&[0x00, 0x07, 0x08, 0x00]);
        frame.extend_from_slice(&ipv4_tcp_frame(0)[14..]);
        let layout = parse(Layer2Type::Ethernet, &frame, None);
        assert_eq!(layout.layer2_header_length, 18);
        assert_eq!(layout.layer4_type, Layer4Type::Tcp);
    }

    #[test]
    fn test_non_ip_stops_after_layer2() {
        let mut frame = ethernet_header([0xFF; 6], [0x02; 6], ETH_P_ARP).to_vec();
        frame.extend_from_slice(&[0; 28]);
        let layout = parse(Layer2Type::Ethernet, &frame, None);
        assert_eq!(layout.layer2_type, Layer2Type::Ethernet);
        assert_eq!(layout.layer3_type, Layer3Type::Unspecified);
    }

    #[test]
    fn test_raw_ip_by_version() {
        let frame = ipv4_tcp_frame(0);
        let layout = parse(Layer2Type::Null, &frame[14..], None);
        assert_eq!(layout.layer2_header_length, 0);
        assert_eq!(layout.layer3_type, Layer3Type::Ipv4NoOptions);
        assert_eq!(layout.layer4_type, Layer4Type::Tcp);
    }

    #[test]
    fn test_truncated_tcp_keeps_layer3() {
        let frame = ipv4_tcp_frame(0);
        let layout = parse(Layer2Type::Ethernet, &frame[..44], None);
        assert_eq!(layout.layer3_type, Layer3Type::Ipv4NoOptions);
        assert_eq!(layout.layer4_type, Layer4Type::Unspecified);
        assert_eq!(layout.layer4_header_length, 0);
    }

    #[test]
    fn test_prefilled_layer2_skips_ethernet_parse() {
        let frame = ipv4_tcp_frame(0);
        let prefilled = PacketLayout {
            layer2_type: Layer2Type::Ethernet,
            layer2_header_length: 14,
            ..PacketLayout::default()
        };
        // Garbage in the layer 2 header is never looked at.
        let mut scrambled = frame.clone();
        scrambled[12] = 0x12;
        let layout = parse(Layer2Type::Ethernet, &scrambled, Some(&prefilled));
        assert_eq!(layout.layer3_type, Layer3Type::Ipv4NoOptions);
        assert_eq!(layout.layer4_type, Layer4Type::Tcp);
    }

    #[test]
    fn test_prefilled_full_layout_is_trusted() {
        let prefilled = PacketLayout {
            layer2_type: Layer2Type::Ethernet,
            layer2_header_length: 14,
            layer3_type: Layer3Type::Ipv4NoOptions,
            layer3_header_length: 20,
            layer4_type: Layer4Type::Udp,
            layer4_header_length: 8,
        };
        let layout = parse(Layer2Type::Ethernet, &[0u8; 42], Some(&prefilled));
        assert_eq!(layout, prefilled);
    }

    #[test]
    fn test_prefilled_larger_than_bytes_is_ignored() {
        let frame = ipv4_tcp_frame(0);
        let prefilled = PacketLayout {
            layer2_type: Layer2Type::Ethernet,
            layer2_header_length: 14,
            layer3_type: Layer3Type::Ipv4WithOptions,
            layer3_header_length: 60,
            ..PacketLayout::default()
        };
        // Only layer 2 fits; layer 3 is parsed from the bytes instead.
        let layout = parse(Layer2Type::Ethernet, &frame[..40], Some(&prefilled));
        assert_eq!(layout.layer2_header_length, 14);
        assert_eq!(layout.layer3_type, Layer3Type::Ipv4NoOptions);
        assert_eq!(layout.layer3_header_length, 20);
        assert_eq!(layout.layer4_type, Layer4Type::Unspecified);
    }

    fn check_conservative(layout: &PacketLayout, len: usize) -> Result<(), TestCaseError> {
        prop_assert!(layout.header_length() <= len);
        if layout.layer2_type == Layer2Type::Unspecified {
            prop_assert_eq!(layout.layer3_type, Layer3Type::Unspecified);
        }
        if layout.layer3_type == Layer3Type::Unspecified {
            prop_assert_eq!(layout.layer4_type, Layer4Type::Unspecified);
            prop_assert_eq!(layout.layer3_header_length, 0);
        }
        if layout.layer4_type == Layer4Type::Unspecified {
            prop_assert_eq!(layout.layer4_header_length, 0);
        }
        Ok(())
    }

    proptest! {
        #[test]
        fn prop_random_bytes_never_overclaim(
            bytes in proptest::collection::vec(any::<u8>(), 0..200),
            hint in prop_oneof![
                Just(Layer2Type::Ethernet),
                Just(Layer2Type::Ieee80211),
                Just(Layer2Type::Null),
            ],
        ) {
            let layout = parse(hint, &bytes, None);
            check_conservative(&layout, bytes.len())?;
        }

        #[test]
        fn prop_truncation_never_overclaims(cut in 0usize..=74) {
            let frame = ipv4_tcp_frame(20);
            let layout = parse(Layer2Type::Ethernet, &frame[..cut], None);
            check_conservative(&layout, cut)?;
            if cut >= 54 {
                prop_assert_eq!(layout.layer4_type, Layer4Type::Tcp);
            }
        }
    }
}
