//! Offload metadata mapping between buffer-list out-of-band info and the
//! packet record extension block.
//!
//! Only extensions enabled on the queue are written or read; everything else
//! stays at its default.

use crate::config::ExtensionSet;
use crate::types::{
    Ieee8021QExtension, Ieee8021QInfo, Layer4Type, OutOfBandInfo, PacketExtensions, PacketLayout,
    RscInfo, RxChecksumEvaluation, TxChecksumAction,
};

#[derive(Debug, Clone, Copy)]
pub struct MetadataTranslator {
    extensions: ExtensionSet,
}

impl MetadataTranslator {
    pub fn new(extensions: ExtensionSet) -> Self {
        Self { extensions }
    }

    pub fn extensions(&self) -> ExtensionSet {
        self.extensions
    }

    /// Tx: out-of-band request -> packet extensions.
    pub fn to_packet_tx(&self, info: &OutOfBandInfo, layout: &PacketLayout, ext: &mut PacketExtensions) {
        if self.extensions.contains(ExtensionSet::CHECKSUM) {
            let csum = &info.tx_checksum;
            let ipv4 = csum.is_ipv4 || layout.layer3_type.is_ipv4();
            ext.checksum.tx_layer3 = if ipv4 && csum.ip_header_checksum {
                TxChecksumAction::Required
            } else {
                TxChecksumAction::Passthrough
            };
            ext.checksum.tx_layer4 = if csum.tcp_checksum || csum.udp_checksum {
                TxChecksumAction::Required
            } else {
                TxChecksumAction::Passthrough
            };
        }

        if self.extensions.contains(ExtensionSet::GSO) {
            ext.gso.tcp_mss = info.lso.map_or(0, |lso| lso.mss);
            ext.gso.udp_mss = info.uso.map_or(0, |uso| uso.mss);
        }

        if self.extensions.contains(ExtensionSet::IEEE8021Q) {
            ext.ieee8021q = info.ieee8021q.map(|tag| Ieee8021QExtension {
                priority: tag.priority,
                vlan_id: tag.vlan_id,
            });
        }
    }

    /// Rx: packet extensions -> out-of-band result.
    pub fn to_out_of_band_rx(&self, ext: &PacketExtensions, layout: &PacketLayout, info: &mut OutOfBandInfo) {
        if self.extensions.contains(ExtensionSet::CHECKSUM) {
            let csum = &mut info.rx_checksum;
            if layout.layer3_type.is_ipv4() {
                report(
                    ext.checksum.rx_layer3,
                    &mut csum.ip_checksum_succeeded,
                    &mut csum.ip_checksum_failed,
                );
            }
            match layout.layer4_type {
                Layer4Type::Tcp => report(
                    ext.checksum.rx_layer4,
                    &mut csum.tcp_checksum_succeeded,
                    &mut csum.tcp_checksum_failed,
                ),
                Layer4Type::Udp => report(
                    ext.checksum.rx_layer4,
                    &mut csum.udp_checksum_succeeded,
                    &mut csum.udp_checksum_failed,
                ),
                _ => {}
            }
        }

        if self.extensions.contains(ExtensionSet::RSC) && ext.rsc.coalesced_segments > 0 {
            info.rsc = Some(RscInfo {
                coalesced_segments: ext.rsc.coalesced_segments,
                duplicate_acks: ext.rsc.duplicate_acks,
            });
        }

        if self.extensions.contains(ExtensionSet::IEEE8021Q) {
            info.ieee8021q = ext.ieee8021q.map(|tag| Ieee8021QInfo {
                priority: tag.priority,
                vlan_id: tag.vlan_id,
            });
        }
    }
}

fn report(evaluation: RxChecksumEvaluation, succeeded: &mut bool, failed: &mut bool) {
    match evaluation {
        RxChecksumEvaluation::Valid => *succeeded = true,
        RxChecksumEvaluation::Invalid => *failed = true,
        RxChecksumEvaluation::NotChecked => {}
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{Layer3Type, LsoInfo, RscExtension, TxChecksumInfo};

    fn tcp4() -> PacketLayout {
        PacketLayout {
            layer3_type: Layer3Type::Ipv4NoOptions,
            layer3_header_length: 20,
            layer4_type: Layer4Type::Tcp,
            layer4_header_length: 20,
            ..PacketLayout::default()
        }
    }

    #[test]
    fn test_tx_checksum_and_lso() {
        let xlat = MetadataTranslator::new(ExtensionSet::CHECKSUM | ExtensionSet::GSO);
        let info = OutOfBandInfo {
            tx_checksum: TxChecksumInfo {
                is_ipv4: true,
                ip_header_checksum: true,
                tcp_checksum: true,
                ..TxChecksumInfo::default()
            },
            lso: Some(LsoInfo { mss: 1448, tcp_header_offset: 34 }),
            ..OutOfBandInfo::default()
        };
        let mut ext = PacketExtensions::default();
        xlat.to_packet_tx(&info, &tcp4(), &mut ext);
        assert_eq!(ext.checksum.tx_layer3, TxChecksumAction::Required);
        assert_eq!(ext.checksum.tx_layer4, TxChecksumAction::Required);
        assert_eq!(ext.gso.tcp_mss, 1448);
        assert_eq!(ext.gso.udp_mss, 0);
    }

    #[test]
    fn test_disabled_extensions_untouched() {
        let xlat = MetadataTranslator::new(ExtensionSet::empty());
        let info = OutOfBandInfo {
            lso: Some(LsoInfo { mss: 1000, tcp_header_offset: 34 }),
            ieee8021q: Some(Ieee8021QInfo { priority: 5, vlan_id: 7 }),
            ..OutOfBandInfo::default()
        };
        let mut ext = PacketExtensions::default();
        xlat.to_packet_tx(&info, &tcp4(), &mut ext);
        assert_eq!(ext, PacketExtensions::default());
    }

    #[test]
    fn test_rx_checksum_by_layout() {
        let xlat = MetadataTranslator::new(ExtensionSet::CHECKSUM);
        let mut ext = PacketExtensions::default();
        ext.checksum.rx_layer3 = RxChecksumEvaluation::Valid;
        ext.checksum.rx_layer4 = RxChecksumEvaluation::Invalid;

        let mut info = OutOfBandInfo::default();
        xlat.to_out_of_band_rx(&ext, &tcp4(), &mut info);
        assert!(info.rx_checksum.ip_checksum_succeeded);
        assert!(info.rx_checksum.tcp_checksum_failed);
        assert!(!info.rx_checksum.udp_checksum_failed);

        // No transport recognised: layer 4 result is not reported.
        let mut info = OutOfBandInfo::default();
        xlat.to_out_of_band_rx(&ext, &PacketLayout::default(), &mut info);
        assert_eq!(info.rx_checksum, Default::default());
    }

    #[test]
    fn test_rx_rsc_and_vlan() {
        let xlat = MetadataTranslator::new(ExtensionSet::RSC | ExtensionSet::IEEE8021Q);
        let ext = PacketExtensions {
            rsc: RscExtension { coalesced_segments: 3, duplicate_acks: 1 },
            ieee8021q: Some(Ieee8021QExtension { priority: 2, vlan_id: 100 }),
            ..PacketExtensions::default()
        };
        let mut info = OutOfBandInfo::default();
        xlat.to_out_of_band_rx(&ext, &tcp4(), &mut info);
        assert_eq!(info.rsc, Some(RscInfo { coalesced_segments: 3, duplicate_acks: 1 }));
        assert_eq!(info.ieee8021q, Some(Ieee8021QInfo { priority: 2, vlan_id: 100 }));
    }
}
