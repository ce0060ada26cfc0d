//! DMA buffer management module.
//!
//! - `ownership`: driver/device ownership state of a pool buffer
//! - `buffer`: a leased pool buffer ([`DmaBuffer`])
//! - `pool`: fixed-size buffer pools carved from a DMA arena
//! - `bounce`: copying Tx payloads into pool memory
//! - `platform`: the platform DMA mapping service contract
//! - `mapper`: per-queue mapping strategy and per-slot transfers

pub mod bounce;
pub mod buffer;
pub mod mapper;
pub mod ownership;
pub mod platform;
pub mod pool;

// Re-exports
pub use bounce::{BounceBufferPool, BounceError};
pub use buffer::DmaBuffer;
pub use mapper::{DmaMapper, MappingStrategy};
pub use ownership::BufferOwnership;
pub use platform::{DmaAdapter, DmaSpan, MapError, ScatterGatherList, SgElement, SoftwareDmaAdapter};
pub use pool::{BufferPool, ReleaseHook};
