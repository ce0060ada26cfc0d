//! Adapter driver interface.
//!
//! The datapath is driver-agnostic; drivers plug in through the traits here.

pub mod traits;

// Re-exports
pub use traits::{AdapterNotifier, NetAdapter, PacketQueue};
