//! Descriptor chain <-> ring translation.
//!
//! ```text
//!   Tx:  NblChain ──translate──> staged ──yield──> [begin, end) ──adapter──> [next, begin) ──drain──> completions
//!   Rx:  pool ──prepare──> [begin, end) ──adapter──> [next, begin) ──return──> NblChain (lent buffers)
//! ```

pub mod metadata;
pub mod rx;
pub mod tx;

pub use metadata::MetadataTranslator;
pub use rx::RxTranslator;
pub use tx::TxTranslator;

use crate::error::Backpressure;

/// Result of one translation pass.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Progress {
    /// Packets closed (Tx) or delivered (Rx) during the pass.
    pub packets: u32,
    /// Set when the pass stopped early for lack of a resource.
    pub blocked: Option<Backpressure>,
}

impl Progress {
    pub fn made_progress(&self) -> bool {
        self.packets > 0
    }
}
