//! Layer 3 stage: IPv4 (with options) and IPv6 (with extension headers).

use smoltcp::wire::{Ipv4Packet, Ipv6Packet};

use crate::types::{Layer3Type, PacketLayout};

/// What follows the layer 3 header.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(super) enum Transport {
    /// First (or only) fragment carrying this IP protocol number.
    Protocol(u8),
    /// Non-initial fragment, or a first fragment with more to come.
    Fragment,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(super) struct Layer3Header {
    pub kind: Layer3Type,
    pub length: usize,
    pub transport: Transport,
}

const IPV4_MIN_HEADER: usize = 20;
const IPV6_HEADER: usize = 40;

/// Extension headers walked before giving up.
const MAX_IPV6_EXTENSIONS: usize = 8;

const IPPROTO_HOPOPTS: u8 = 0;
const IPPROTO_ROUTING: u8 = 43;
const IPPROTO_FRAGMENT: u8 = 44;
const IPPROTO_AH: u8 = 51;
const IPPROTO_DSTOPTS: u8 = 60;

pub(super) fn version(bytes: &[u8]) -> Option<u8> {
    bytes.first().map(|b| b >> 4)
}

pub(super) fn ipv4(bytes: &[u8]) -> Option<Layer3Header> {
    if bytes.len() < IPV4_MIN_HEADER {
        return None;
    }
    let packet = Ipv4Packet::new_unchecked(bytes);
    if packet.version() != 4 {
        return None;
    }
    let length = packet.header_len() as usize;
    if length < IPV4_MIN_HEADER || length > bytes.len() {
        return None;
    }
    if (packet.total_len() as usize) < length {
        return None;
    }

    let transport = if packet.more_frags() || packet.frag_offset() != 0 {
        Transport::Fragment
    } else {
        Transport::Protocol(u8::from(packet.next_header()))
    };
    let kind = if length == IPV4_MIN_HEADER {
        Layer3Type::Ipv4NoOptions
    } else {
        Layer3Type::Ipv4WithOptions
    };
    Some(Layer3Header { kind, length, transport })
}

pub(super) fn ipv6(bytes: &[u8]) -> Option<Layer3Header> {
    if bytes.len() < IPV6_HEADER {
        return None;
    }
    let packet = Ipv6Packet::new_unchecked(bytes);
    if packet.version() != 6 {
        return None;
    }

    let mut next = u8::from(packet.next_header());
    let mut length = IPV6_HEADER;
    let mut fragment = false;
    let mut walked = 0;

    loop {
        let ext_len = match next {
            IPPROTO_HOPOPTS | IPPROTO_ROUTING | IPPROTO_DSTOPTS => {
                (*bytes.get(length + 1)? as usize + 1) * 8
            }
            IPPROTO_FRAGMENT => {
                let field = bytes.get(length + 2..length + 4)?;
                let offset_and_flags = u16::from_be_bytes([field[0], field[1]]);
                // Offset in the top 13 bits, M flag in bit 0.
                if offset_and_flags & 0xFFF9 != 0 {
                    fragment = true;
                }
                8
            }
            IPPROTO_AH => (*bytes.get(length + 1)? as usize + 2) * 4,
            _ => break,
        };
        walked += 1;
        if walked > MAX_IPV6_EXTENSIONS {
            return None;
        }
        next = *bytes.get(length)?;
        length += ext_len;
        if length > bytes.len() || length > PacketLayout::MAX_LAYER3_HEADER {
            return None;
        }
        if fragment {
            break;
        }
    }

    let kind = if walked == 0 {
        Layer3Type::Ipv6NoExtensions
    } else {
        Layer3Type::Ipv6WithExtensions
    };
    let transport = if fragment {
        Transport::Fragment
    } else {
        Transport::Protocol(next)
    };
    Some(Layer3Header { kind, length, transport })
}
