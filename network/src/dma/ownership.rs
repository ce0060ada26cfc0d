//! Buffer ownership state machine.
//!
//! # State Machine
//! ```text
//!     FREE ──alloc()──> DRIVER_OWNED ──mark_device_owned()──> DEVICE_OWNED
//!       ▲                     │  ▲                                  │
//!       └──────drop()─────────┘  └──────mark_driver_owned()─────────┘
//! ```
//!
//! INVARIANT: the CPU never touches a DEVICE_OWNED buffer through the
//! driver-side accessors; the adapter never uses the device-side ones on a
//! DRIVER_OWNED buffer.

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BufferOwnership {
    /// In the pool free list.
    Free,
    /// Leased, accessible by software.
    DriverOwned,
    /// Posted to the adapter.
    DeviceOwned,
}

impl BufferOwnership {
    pub fn is_driver_owned(&self) -> bool {
        *self == Self::DriverOwned
    }

    pub fn is_device_owned(&self) -> bool {
        *self == Self::DeviceOwned
    }
}
