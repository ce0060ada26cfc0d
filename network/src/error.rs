//! Datapath error types.
//!
//! Every fallible datapath operation reports one of four classes so the
//! caller can pick between suspend-and-retry, fail-the-unit and propagate.
//!
//! | Class                | Handling                                      |
//! |----------------------|-----------------------------------------------|
//! | `Backpressure`       | suspend translation, resume on next iteration |
//! | `Permanent`          | ignore the packet, fail its buffer list       |
//! | `ResourceExhausted`  | degrade (bounce) or surface at creation time  |
//! | `Paused`             | shutdown abort, not an error                  |

use core::fmt;

use dma_pool::DmaError;

pub type Result<T> = core::result::Result<T, DatapathError>;

/// Which ring or pool ran dry.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Backpressure {
    /// No free packet slot.
    PacketRing,
    /// No free fragment slot.
    FragmentRing,
    /// Every bounce buffer is leased.
    BouncePool,
    /// Every receive buffer is lent out.
    ReceivePool,
}

/// Reasons a single packet can never be translated.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PermanentFailure {
    /// Payload larger than any bounce buffer.
    PayloadTooLarge,
    /// Needs more fragments than the ring can ever hold.
    TooManyFragments,
    /// Length fields are inconsistent or zero.
    MalformedLength,
}

/// Resources that can be exhausted.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Resource {
    /// DMA arena has no pages left.
    DmaArena,
    /// Buffer pool could not be created.
    BufferPool,
    /// Platform scatter-gather service refused a mapping.
    ScatterGather,
    /// Worker thread could not be spawned.
    WorkerThread,
}

/// Error class, see module docs.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorClass {
    Backpressure,
    Permanent,
    ResourceExhausted,
    Paused,
    /// Control-plane misuse (bad config, unknown queue, wrong state).
    Usage,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DatapathError {
    Backpressure(Backpressure),
    Permanent(PermanentFailure),
    ResourceExhausted(Resource),
    /// Work aborted because the queue is stopping.
    Paused,
    /// Configuration rejected at queue creation.
    InvalidConfig(&'static str),
    /// Handle does not name a live queue.
    InvalidQueue,
    /// Operation not allowed in the current lifecycle state.
    InvalidState,
}

impl DatapathError {
    /// Classify this error.
    pub fn classify(&self) -> ErrorClass {
        match self {
            Self::Backpressure(_) => ErrorClass::Backpressure,
            Self::Permanent(_) => ErrorClass::Permanent,
            Self::ResourceExhausted(_) => ErrorClass::ResourceExhausted,
            Self::Paused => ErrorClass::Paused,
            Self::InvalidConfig(_) | Self::InvalidQueue | Self::InvalidState => ErrorClass::Usage,
        }
    }

    /// Whether retrying the same unit of work later can succeed.
    pub fn is_transient(&self) -> bool {
        matches!(self.classify(), ErrorClass::Backpressure)
    }

    pub fn description(&self) -> &'static str {
        match self {
            Self::Backpressure(Backpressure::PacketRing) => "packet ring full",
            Self::Backpressure(Backpressure::FragmentRing) => "fragment ring full",
            Self::Backpressure(Backpressure::BouncePool) => "bounce pool exhausted",
            Self::Backpressure(Backpressure::ReceivePool) => "receive pool exhausted",
            Self::Permanent(PermanentFailure::PayloadTooLarge) => "payload too large",
            Self::Permanent(PermanentFailure::TooManyFragments) => "too many fragments",
            Self::Permanent(PermanentFailure::MalformedLength) => "malformed length",
            Self::ResourceExhausted(Resource::DmaArena) => "DMA arena exhausted",
            Self::ResourceExhausted(Resource::BufferPool) => "buffer pool unavailable",
            Self::ResourceExhausted(Resource::ScatterGather) => "scatter-gather mapping failed",
            Self::ResourceExhausted(Resource::WorkerThread) => "worker thread spawn failed",
            Self::Paused => "queue paused",
            Self::InvalidConfig(_) => "invalid configuration",
            Self::InvalidQueue => "invalid queue handle",
            Self::InvalidState => "invalid queue state",
        }
    }
}

impl fmt::Display for DatapathError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::InvalidConfig(what) => write!(f, "invalid configuration: {}", what),
            other => f.write_str(other.description()),
        }
    }
}

impl From<DmaError> for DatapathError {
    fn from(err: DmaError) -> Self {
        match err {
            DmaError::OutOfMemory | DmaError::NoMemoryFound => {
                Self::ResourceExhausted(Resource::DmaArena)
            }
            DmaError::ZeroPages | DmaError::InvalidRegion => {
                Self::InvalidConfig("DMA allocation size")
            }
        }
    }
}

impl From<PermanentFailure> for DatapathError {
    fn from(reason: PermanentFailure) -> Self {
        Self::Permanent(reason)
    }
}
