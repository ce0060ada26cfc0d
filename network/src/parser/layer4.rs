//! Layer 4 stage: TCP and UDP.

use smoltcp::wire::TcpPacket;

use super::layer3::Transport;
use crate::types::Layer4Type;

const IPPROTO_TCP: u8 = 6;
const IPPROTO_UDP: u8 = 17;

const TCP_MIN_HEADER: usize = 20;
const UDP_HEADER: usize = 8;

/// Classify the transport header at the start of `bytes`.
///
/// Returns `None` when a TCP or UDP header is truncated or malformed.
pub(super) fn parse(transport: Transport, bytes: &[u8]) -> Option<(Layer4Type, usize)> {
    match transport {
        Transport::Fragment => Some((Layer4Type::IpFragment, 0)),
        Transport::Protocol(IPPROTO_TCP) => {
            if bytes.len() < TCP_MIN_HEADER {
                return None;
            }
            let length = TcpPacket::new_unchecked(bytes).header_len() as usize;
            if length < TCP_MIN_HEADER || length > bytes.len() {
                return None;
            }
            Some((Layer4Type::Tcp, length))
        }
        Transport::Protocol(IPPROTO_UDP) => {
            if bytes.len() < UDP_HEADER {
                return None;
            }
            Some((Layer4Type::Udp, UDP_HEADER))
        }
        Transport::Protocol(_) => Some((Layer4Type::IpNotFragment, 0)),
    }
}
