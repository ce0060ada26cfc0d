//! Buffer pool management.
//!
//! One [`DmaAllocation`] cut into equal chunks. Leases come back through
//! [`DmaBuffer`]'s `Drop`, which may run on any thread (receive buffers lent
//! upstream are dropped by whoever holds them last), so the free list sits
//! behind a spin lock. A [`ReleaseHook`] lets the owning queue's loop hear
//! about returns it did not make itself.

use alloc::sync::Arc;
use alloc::vec::Vec;

use dma_pool::{align_up, DmaAllocation, DmaArena};
use spin::Mutex;

use super::buffer::DmaBuffer;
use crate::error::{DatapathError, Result};

/// Chunk stride alignment (cache line).
pub const BUFFER_ALIGN: usize = 64;

/// Maximum number of buffers per pool.
pub const MAX_POOL_SIZE: usize = u16::MAX as usize;

/// Called after a buffer has gone back to the free list.
pub trait ReleaseHook: Send + Sync {
    fn released(&self);
}

pub(crate) struct PoolShared {
    memory: DmaAllocation,
    pub(crate) buffer_size: usize,
    stride: usize,
    count: u16,
    free_list: Mutex<Vec<u16>>,
    hook: Mutex<Option<Arc<dyn ReleaseHook>>>,
}

impl PoolShared {
    pub(crate) fn chunk_ptr(&self, index: u16) -> *mut u8 {
        // SAFETY: index < count, so the chunk lies inside the allocation.
        unsafe { self.memory.cpu_ptr().as_ptr().add(index as usize * self.stride) }
    }

    pub(crate) fn chunk_bus_addr(&self, index: u16) -> u64 {
        self.memory.bus_addr() + (index as usize * self.stride) as u64
    }

    pub(crate) fn release(&self, index: u16) {
        debug_assert!(index < self.count, "Invalid buffer index");
        self.free_list.lock().push(index);
        let hook = self.hook.lock().clone();
        if let Some(hook) = hook {
            hook.released();
        }
    }
}

/// Pool of equally sized DMA buffers.
///
/// Cloning yields another handle to the same pool.
#[derive(Clone)]
pub struct BufferPool {
    shared: Arc<PoolShared>,
}

impl BufferPool {
    /// Carve `count` buffers of `buffer_size` bytes out of `arena`.
    pub fn new(arena: &DmaArena, buffer_size: usize, count: usize) -> Result<Self> {
        if buffer_size == 0 || count == 0 || count > MAX_POOL_SIZE {
            return Err(DatapathError::InvalidConfig("buffer pool geometry"));
        }
        let stride = align_up(buffer_size, BUFFER_ALIGN);
        let memory = arena.alloc_bytes(stride * count)?;

        // Pop from the back, so lease order is 0, 1, 2, ...
        let free_list = (0..count as u16).rev().collect();
        log::debug!(
            "buffer pool: {} x {} bytes at bus {:#x}",
            count,
            buffer_size,
            memory.bus_addr()
        );

        Ok(Self {
            shared: Arc::new(PoolShared {
                memory,
                buffer_size,
                stride,
                count: count as u16,
                free_list: Mutex::new(free_list),
                hook: Mutex::new(None),
            }),
        })
    }

    /// Allocate a buffer from the pool.
    ///
    /// Returns `None` if pool is exhausted.
    pub fn alloc(&self) -> Option<DmaBuffer> {
        let index = self.shared.free_list.lock().pop()?;
        Some(DmaBuffer::leased(Arc::clone(&self.shared), index))
    }

    /// Install (or clear) the hook run after every return.
    pub fn set_release_hook(&self, hook: Option<Arc<dyn ReleaseHook>>) {
        *self.shared.hook.lock() = hook;
    }

    /// Get number of available (free) buffers.
    pub fn available(&self) -> usize {
        self.shared.free_list.lock().len()
    }

    /// Get total number of buffers in pool.
    pub fn total(&self) -> usize {
        self.shared.count as usize
    }

    /// Get number of buffers currently leased.
    pub fn in_use(&self) -> usize {
        self.total() - self.available()
    }

    /// Check if pool is empty (no free buffers).
    pub fn is_empty(&self) -> bool {
        self.available() == 0
    }

    /// Check if pool is full (all buffers free).
    pub fn is_full(&self) -> bool {
        self.available() == self.total()
    }

    /// Get buffer size.
    pub fn buffer_size(&self) -> usize {
        self.shared.buffer_size
    }
}

impl core::fmt::Debug for BufferPool {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("BufferPool")
            .field("buffer_size", &self.buffer_size())
            .field("total", &self.total())
            .field("available", &self.available())
            .finish()
    }
}
