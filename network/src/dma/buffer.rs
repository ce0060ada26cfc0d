//! DMA buffer with ownership tracking.
//!
//! A `DmaBuffer` is a lease on one chunk of a [`BufferPool`]. It is
//! move-only; dropping it returns the chunk to the pool's free list, so a
//! chunk can never be leased twice or released twice.
//!
//! [`BufferPool`]: super::pool::BufferPool

use alloc::sync::Arc;
use core::fmt;

use super::ownership::BufferOwnership;
use super::pool::PoolShared;

/// A single leased DMA buffer.
pub struct DmaBuffer {
    /// Pool the chunk belongs to.
    shared: Arc<PoolShared>,
    /// Chunk index within the pool.
    index: u16,
    /// Current ownership state.
    ownership: BufferOwnership,
}

impl DmaBuffer {
    pub(super) fn leased(shared: Arc<PoolShared>, index: u16) -> Self {
        Self {
            shared,
            index,
            ownership: BufferOwnership::DriverOwned,
        }
    }

    /// Buffer index within the pool.
    pub fn index(&self) -> u16 {
        self.index
    }

    /// Buffer capacity in bytes.
    pub fn capacity(&self) -> usize {
        self.shared.buffer_size
    }

    /// Device-visible bus address of byte 0.
    pub fn bus_addr(&self) -> u64 {
        self.shared.chunk_bus_addr(self.index)
    }

    pub fn ownership(&self) -> BufferOwnership {
        self.ownership
    }

    /// Hand the buffer to the device.
    pub fn mark_device_owned(&mut self) {
        debug_assert!(self.ownership.is_driver_owned(), "buffer already device-owned");
        self.ownership = BufferOwnership::DeviceOwned;
    }

    /// Take the buffer back from the device.
    pub fn mark_driver_owned(&mut self) {
        self.ownership = BufferOwnership::DriverOwned;
    }

    /// Get buffer data as slice.
    ///
    /// # Panics
    /// Panics if buffer is not DriverOwned.
    pub fn as_slice(&self) -> &[u8] {
        assert!(
            self.ownership.is_driver_owned(),
            "BUG: Cannot access buffer not owned by driver (state: {:?})",
            self.ownership
        );
        // SAFETY: the chunk is exclusively leased to this buffer.
        unsafe { core::slice::from_raw_parts(self.shared.chunk_ptr(self.index), self.capacity()) }
    }

    /// Get buffer data as mutable slice.
    ///
    /// # Panics
    /// Panics if buffer is not DriverOwned.
    pub fn as_mut_slice(&mut self) -> &mut [u8] {
        assert!(
            self.ownership.is_driver_owned(),
            "BUG: Cannot access buffer not owned by driver (state: {:?})",
            self.ownership
        );
        // SAFETY: the chunk is exclusively leased and borrowed mutably.
        unsafe { core::slice::from_raw_parts_mut(self.shared.chunk_ptr(self.index), self.capacity()) }
    }

    /// Device-side view of a posted buffer.
    ///
    /// # Panics
    /// Panics if buffer is not DeviceOwned.
    pub fn device_slice(&self) -> &[u8] {
        assert!(
            self.ownership.is_device_owned(),
            "BUG: Device access to buffer it does not own (state: {:?})",
            self.ownership
        );
        // SAFETY: as above.
        unsafe { core::slice::from_raw_parts(self.shared.chunk_ptr(self.index), self.capacity()) }
    }

    /// Device-side mutable view of a posted buffer.
    ///
    /// # Panics
    /// Panics if buffer is not DeviceOwned.
    pub fn device_slice_mut(&mut self) -> &mut [u8] {
        assert!(
            self.ownership.is_device_owned(),
            "BUG: Device access to buffer it does not own (state: {:?})",
            self.ownership
        );
        // SAFETY: as above.
        unsafe { core::slice::from_raw_parts_mut(self.shared.chunk_ptr(self.index), self.capacity()) }
    }

    /// Whether two leases refer to the same pool.
    pub fn same_pool(&self, other: &DmaBuffer) -> bool {
        Arc::ptr_eq(&self.shared, &other.shared)
    }
}

impl Drop for DmaBuffer {
    fn drop(&mut self) {
        self.ownership = BufferOwnership::Free;
        self.shared.release(self.index);
    }
}

impl fmt::Debug for DmaBuffer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DmaBuffer")
            .field("index", &self.index)
            .field("bus_addr", &format_args!("{:#x}", self.bus_addr()))
            .field("capacity", &self.capacity())
            .field("ownership", &self.ownership)
            .finish()
    }
}
