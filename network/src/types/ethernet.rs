//! Framing constants.
//!
//! # Reference
//! IEEE 802.3, 802.1Q, 802.2 (LLC/SNAP), 802.11

/// MAC address length.
pub const ETH_ALEN: usize = 6;
/// Ethernet II header length.
pub const ETH_HLEN: usize = 14;
/// Standard MTU.
pub const ETH_MTU: usize = 1500;
/// Largest untagged frame without FCS.
pub const ETH_FRAME_MAX: usize = ETH_HLEN + ETH_MTU;

/// 802.1Q / 802.1ad tag length.
pub const VLAN_TAG_LEN: usize = 4;
/// LLC + SNAP header length.
pub const LLC_SNAP_LEN: usize = 8;
/// Plain LLC header length (DSAP, SSAP, control).
pub const LLC_LEN: usize = 3;

/// EtherType values below this are 802.3 length fields.
pub const ETH_P_802_3_MIN: u16 = 0x0600;
pub const ETH_P_IP: u16 = 0x0800;
pub const ETH_P_ARP: u16 = 0x0806;
pub const ETH_P_8021Q: u16 = 0x8100;
pub const ETH_P_8021AD: u16 = 0x88A8;
pub const ETH_P_IPV6: u16 = 0x86DD;

/// LLC DSAP/SSAP value announcing SNAP.
pub const LLC_SAP_SNAP: u8 = 0xAA;
/// LLC unnumbered-information control byte.
pub const LLC_CTRL_UI: u8 = 0x03;

/// 802.11 base header (frame control through sequence control).
pub const IEEE80211_HDR_LEN: usize = 24;
/// Fourth address present when both ToDS and FromDS are set.
pub const IEEE80211_ADDR4_LEN: usize = 6;
/// QoS control field.
pub const IEEE80211_QOS_LEN: usize = 2;
/// HT control field (QoS data frames with the order bit).
pub const IEEE80211_HT_CTRL_LEN: usize = 4;

/// 802.11 frame type "data".
pub const IEEE80211_FTYPE_DATA: u8 = 0x2;
/// Subtype bit marking QoS data.
pub const IEEE80211_STYPE_QOS: u8 = 0x8;
/// Subtype bit marking "no data" frames (null, CF-ack/poll only).
pub const IEEE80211_STYPE_NODATA: u8 = 0x4;
/// Frame control flags (second byte).
pub const IEEE80211_FCTL_TODS: u8 = 0x01;
pub const IEEE80211_FCTL_FROMDS: u8 = 0x02;
pub const IEEE80211_FCTL_ORDER: u8 = 0x80;

/// Build an untagged Ethernet II header.
pub fn ethernet_header(dst: [u8; ETH_ALEN], src: [u8; ETH_ALEN], ethertype: u16) -> [u8; ETH_HLEN] {
    let mut hdr = [0u8; ETH_HLEN];
    hdr[..6].copy_from_slice(&dst);
    hdr[6..12].copy_from_slice(&src);
    hdr[12..14].copy_from_slice(&ethertype.to_be_bytes());
    hdr
}
