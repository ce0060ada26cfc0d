//! MorpheusX NetAdapter datapath
//!
//! Translates between descriptor chains (buffer lists → buffers → memory
//! descriptors) and the index-addressed packet/fragment rings shared with a
//! network adapter.
//!
//! # Layout
//!
//! ```text
//!   upstream ──enqueue──> QueueControl ──> ExecutionContext (per queue)
//!                                              │
//!                               ┌──────────────┴──────────────┐
//!                          TxTranslator                  RxTranslator
//!                      parser · metadata · DmaMapper · BounceBufferPool
//!                               └──────────> RingSet <────────┘
//!                                               │
//!                                        PacketQueue (adapter)
//! ```

#![cfg_attr(not(any(test, feature = "std")), no_std)]

extern crate alloc;

pub mod config;
pub mod dma;
pub mod driver;
pub mod error;
pub mod mainloop;
pub mod parser;
pub mod queue;
pub mod ring;
pub mod types;
pub mod xlat;

pub use config::{
    BouncePolicy, DatapathCapabilities, DmaCapabilities, DriverConfig, ExecutionMode,
    ExtensionSet, QueueConfig, QueueKind,
};
pub use driver::{AdapterNotifier, NetAdapter, PacketQueue};
pub use error::{DatapathError, ErrorClass, Result};
pub use mainloop::{ContextState, TickSource};
pub use queue::{CompletionCallback, CounterSnapshot, QueueControl, QueueHandle, TxIngress};
pub use ring::{Ring, RingRange, RingSet};
pub use types::{
    CompletionStatus, MemoryDescriptor, NblChain, NetBuffer, NetBufferList, NetFragment,
    NetPacket, PacketLayout,
};
