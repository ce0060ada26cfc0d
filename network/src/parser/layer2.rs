//! Layer 2 stage: Ethernet (with VLAN tags and LLC/SNAP), 802.11, raw IP.

use smoltcp::wire::EthernetFrame;

use crate::types::ethernet::*;
use crate::types::Layer2Type;

/// How the layer 3 header is identified.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(super) enum NextHeader {
    Ipv4,
    Ipv6,
    /// Decide by the IP version nibble.
    ByVersion,
    /// Not IP; stop after layer 2.
    Other,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(super) struct Layer2Header {
    pub kind: Layer2Type,
    pub length: usize,
    pub next: NextHeader,
}

/// Most VLAN tags accepted in front of the EtherType (802.1ad + 802.1Q).
const MAX_VLAN_TAGS: usize = 2;

pub(super) fn parse(hint: Layer2Type, bytes: &[u8]) -> Option<Layer2Header> {
    match hint {
        Layer2Type::Unspecified => None,
        Layer2Type::Null => Some(Layer2Header {
            kind: Layer2Type::Null,
            length: 0,
            next: NextHeader::ByVersion,
        }),
        Layer2Type::Ethernet => ethernet(bytes),
        Layer2Type::Ieee80211 => ieee80211(bytes),
    }
}

fn be16(bytes: &[u8], offset: usize) -> Option<u16> {
    let b = bytes.get(offset..offset + 2)?;
    Some(u16::from_be_bytes([b[0], b[1]]))
}

fn by_ethertype(ethertype: u16) -> NextHeader {
    match ethertype {
        ETH_P_IP => NextHeader::Ipv4,
        ETH_P_IPV6 => NextHeader::Ipv6,
        _ => NextHeader::Other,
    }
}

fn ethernet(bytes: &[u8]) -> Option<Layer2Header> {
    if bytes.len() < ETH_HLEN {
        return None;
    }
    let mut ethertype = u16::from(EthernetFrame::new_unchecked(bytes).ethertype());
    let mut length = ETH_HLEN;

    let mut tags = 0;
    while ethertype == ETH_P_8021Q || ethertype == ETH_P_8021AD {
        if tags == MAX_VLAN_TAGS {
            return None;
        }
        ethertype = be16(bytes, length + 2)?;
        length += VLAN_TAG_LEN;
        tags += 1;
    }

    if ethertype >= ETH_P_802_3_MIN {
        return Some(Layer2Header {
            kind: Layer2Type::Ethernet,
            length,
            next: by_ethertype(ethertype),
        });
    }

    // 802.3 length field: LLC follows.
    let llc = bytes.get(length..length + LLC_LEN)?;
    if llc != [LLC_SAP_SNAP, LLC_SAP_SNAP, LLC_CTRL_UI] {
        return Some(Layer2Header {
            kind: Layer2Type::Ethernet,
            length: length + LLC_LEN,
            next: NextHeader::Other,
        });
    }
    let ethertype = be16(bytes, length + LLC_SNAP_LEN - 2)?;
    Some(Layer2Header {
        kind: Layer2Type::Ethernet,
        length: length + LLC_SNAP_LEN,
        next: by_ethertype(ethertype),
    })
}

fn ieee80211(bytes: &[u8]) -> Option<Layer2Header> {
    if bytes.len() < IEEE80211_HDR_LEN {
        return None;
    }
    let fc0 = bytes[0];
    let fc1 = bytes[1];
    let frame_type = (fc0 >> 2) & 0x3;
    let subtype = fc0 >> 4;
    if frame_type != IEEE80211_FTYPE_DATA {
        return None;
    }

    let mut length = IEEE80211_HDR_LEN;
    if fc1 & IEEE80211_FCTL_TODS != 0 && fc1 & IEEE80211_FCTL_FROMDS != 0 {
        length += IEEE80211_ADDR4_LEN;
    }
    if subtype & IEEE80211_STYPE_QOS != 0 {
        length += IEEE80211_QOS_LEN;
        if fc1 & IEEE80211_FCTL_ORDER != 0 {
            length += IEEE80211_HT_CTRL_LEN;
        }
    }
    if bytes.len() < length {
        return None;
    }

    let header = Layer2Header {
        kind: Layer2Type::Ieee80211,
        length,
        next: NextHeader::Other,
    };
    if subtype & IEEE80211_STYPE_NODATA != 0 {
        return Some(header);
    }
    match bytes.get(length..length + LLC_SNAP_LEN) {
        Some(snap) if snap[..3] == [LLC_SAP_SNAP, LLC_SAP_SNAP, LLC_CTRL_UI] => {
            let ethertype = u16::from_be_bytes([snap[6], snap[7]]);
            Some(Layer2Header {
                length: length + LLC_SNAP_LEN,
                next: by_ethertype(ethertype),
                ..header
            })
        }
        Some(_) => Some(header),
        None => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn eth(ethertype: u16, rest: &[u8]) -> Vec<u8> {
        let mut v = ethernet_header([0xFF; 6], [0x02; 6], ethertype).to_vec();
        v.extend_from_slice(rest);
        v
    }

    #[test]
    fn test_ethernet_ii() {
        let h = ethernet(&eth(ETH_P_IP, &[])).unwrap();
        assert_eq!((h.length, h.next), (14, NextHeader::Ipv4));
        assert!(ethernet(&[0u8; 13]).is_none());
    }

    #[test]
    fn test_vlan_tags() {
        let single = eth(ETH_P_8021Q, &[0x20, 0x05, 0x86, 0xDD]);
        let h = ethernet(&single).unwrap();
        assert_eq!((h.length, h.next), (18, NextHeader::Ipv6));

        let truncated = eth(ETH_P_8021Q, &[0x20, 0x05]);
        assert!(ethernet(&truncated).is_none());

        let qinq = eth(ETH_P_8021AD, &[0, 1, 0x81, 0x00, 0, 2, 0x08, 0x00]);
        assert_eq!(ethernet(&qinq).unwrap().length, 22);

        let triple = eth(ETH_P_8021Q, &[0, 1, 0x81, 0x00, 0, 2, 0x81, 0x00, 0, 3, 0x08, 0x00]);
        assert!(ethernet(&triple).is_none());
    }

    #[test]
    fn test_llc_snap() {
        let frame = eth(100, &[0xAA, 0xAA, 0x03, 0, 0, 0, 0x08, 0x00]);
        let h = ethernet(&frame).unwrap();
        assert_eq!((h.length, h.next), (22, NextHeader::Ipv4));

        let plain_llc = eth(100, &[0x42, 0x42, 0x03]);
        let h = ethernet(&plain_llc).unwrap();
        assert_eq!((h.length, h.next), (17, NextHeader::Other));
    }

    #[test]
    fn test_ieee80211_qos_addr4() {
        let mut frame = vec![0u8; 24 + 6 + 2];
        frame[0] = 0x88; // data, QoS subtype
        frame[1] = IEEE80211_FCTL_TODS | IEEE80211_FCTL_FROMDS;
        frame.extend_from_slice(&[0xAA, 0xAA, 0x03, 0, 0, 0, 0x86, 0xDD]);
        let h = ieee80211(&frame).unwrap();
        assert_eq!((h.length, h.next), (24 + 6 + 2 + 8, NextHeader::Ipv6));
    }

    #[test]
    fn test_ieee80211_rejects_management() {
        let frame = [0u8; 32]; // type 0 = management
        assert!(ieee80211(&frame).is_none());
    }

    #[test]
    fn test_raw_ip() {
        let h = parse(Layer2Type::Null, &[]).unwrap();
        assert_eq!((h.length, h.next), (0, NextHeader::ByVersion));
        assert!(parse(Layer2Type::Unspecified, &[0; 64]).is_none());
    }
}
