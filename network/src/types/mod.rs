//! Shared datapath types.
//!
//! - `chain`: descriptor chains (buffer lists, buffers, memory descriptors)
//! - `packet`: ring records (packets, fragments, extensions)
//! - `layout`: parsed header layout
//! - `oob`: out-of-band offload metadata carried on buffer lists
//! - `ethernet`: framing constants

pub mod chain;
pub mod ethernet;
pub mod layout;
pub mod oob;
pub mod packet;

// Re-exports
pub use chain::{CompletionStatus, MemoryDescriptor, NblChain, NetBuffer, NetBufferList};
pub use layout::{Layer2Type, Layer3Type, Layer4Type, PacketLayout};
pub use oob::{
    Ieee8021QInfo, LsoInfo, OutOfBandInfo, RscInfo, RxChecksumInfo, TxChecksumInfo, UsoInfo,
};
pub use packet::{
    ChecksumExtension, FragmentBuffer, GsoExtension, Ieee8021QExtension, NetFragment, NetPacket,
    PacketExtensions, RscExtension, RxChecksumEvaluation, TxChecksumAction,
};
