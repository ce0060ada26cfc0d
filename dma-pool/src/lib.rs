//! Page-granular DMA memory arena.
//!
//! This crate hands out page-aligned, zeroed, DMA-suitable memory to device
//! drivers. An arena owns one contiguous region (either a heap block it
//! allocated itself or an externally supplied region) and carves it into
//! page runs on demand.
//!
//! # Design
//!
//! - **Instance based**: every queue or device can own its own arena
//! - **RAII**: an allocation returns its pages when dropped
//! - **First fit with reuse**: freed runs are split and coalesced
//! - **Thread-safe**: spin-lock protected bookkeeping
//!
//! # Usage
//!
//! ```ignore
//! use dma_pool::DmaArena;
//!
//! let arena = DmaArena::new(256 * 1024)?;
//! let mut block = arena.alloc_pages(4)?;
//! let bus = block.bus_addr();
//! block.as_mut_slice()[0] = 0xAA;
//! ```

#![no_std]

extern crate alloc;

use alloc::alloc::{alloc_zeroed, dealloc, Layout};
use alloc::sync::Arc;
use alloc::vec::Vec;
use core::fmt;
use core::ptr::NonNull;

use spin::Mutex;

/// Page size (4KB).
pub const PAGE_SIZE: usize = 4096;

/// Default arena size (2MB).
pub const DEFAULT_ARENA_SIZE: usize = 2 * 1024 * 1024;

/// Minimum usable external region size (64KB).
pub const MIN_REGION_SIZE: usize = 64 * 1024;

// ============================================================================
// Utility functions
// ============================================================================

/// Align a value up to the given alignment.
#[inline]
pub const fn align_up(val: usize, align: usize) -> usize {
    (val + align - 1) & !(align - 1)
}

/// Align a value down to the given alignment.
#[inline]
pub const fn align_down(val: usize, align: usize) -> usize {
    val & !(align - 1)
}

/// Convert pages to bytes.
#[inline]
pub const fn pages_to_bytes(pages: usize) -> usize {
    pages * PAGE_SIZE
}

/// Convert bytes to pages (rounded up).
#[inline]
pub const fn bytes_to_pages(bytes: usize) -> usize {
    align_up(bytes, PAGE_SIZE) / PAGE_SIZE
}

// ============================================================================
// Errors
// ============================================================================

/// DMA arena errors.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DmaError {
    /// Requested 0 pages.
    ZeroPages,
    /// Not enough contiguous pages left in the arena.
    OutOfMemory,
    /// Backing memory could not be obtained.
    NoMemoryFound,
    /// Invalid memory region.
    InvalidRegion,
}

impl DmaError {
    /// Get a human-readable description.
    pub fn description(&self) -> &'static str {
        match self {
            Self::ZeroPages => "zero-page allocation requested",
            Self::OutOfMemory => "DMA arena exhausted",
            Self::NoMemoryFound => "no backing memory for DMA arena",
            Self::InvalidRegion => "invalid DMA memory region",
        }
    }
}

impl fmt::Display for DmaError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.description())
    }
}

/// Result type for DMA operations.
pub type Result<T> = core::result::Result<T, DmaError>;

// ============================================================================
// Memory region
// ============================================================================

/// A memory region suitable for DMA.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MemoryRegion {
    /// CPU base address.
    pub base: usize,
    /// Size in bytes.
    pub size: usize,
}

impl MemoryRegion {
    /// Create a new memory region.
    pub const fn new(base: usize, size: usize) -> Self {
        Self { base, size }
    }

    /// Check if region is usable for DMA (page-aligned, large enough).
    pub fn is_usable(&self) -> bool {
        self.base % PAGE_SIZE == 0 && self.size >= MIN_REGION_SIZE
    }

    /// Get the page-aligned subregion.
    pub fn aligned(&self) -> Self {
        let aligned_base = align_up(self.base, PAGE_SIZE);
        let adjustment = aligned_base - self.base;
        let aligned_size = align_down(self.size.saturating_sub(adjustment), PAGE_SIZE);
        Self {
            base: aligned_base,
            size: aligned_size,
        }
    }

    /// Check whether `[addr, addr + len)` lies inside the region.
    pub fn contains(&self, addr: usize, len: usize) -> bool {
        addr >= self.base
            && addr
                .checked_add(len)
                .map_or(false, |end| end <= self.base + self.size)
    }
}

// ============================================================================
// Allocation tracking
// ============================================================================

#[derive(Debug, Clone, Copy)]
struct Allocation {
    offset: usize,
    pages: usize,
    in_use: bool,
}

/// Bookkeeping guarded by the arena lock.
///
/// `allocations` is kept sorted by offset and covers `[0, offset)` without
/// gaps; everything above `offset` is untouched.
struct ArenaState {
    offset: usize,
    allocations: Vec<Allocation>,
}

impl ArenaState {
    fn take_free_run(&mut self, pages: usize) -> Option<usize> {
        let pos = self
            .allocations
            .iter()
            .position(|a| !a.in_use && a.pages >= pages)?;
        let run = self.allocations[pos];
        self.allocations[pos] = Allocation {
            offset: run.offset,
            pages,
            in_use: true,
        };
        if run.pages > pages {
            self.allocations.insert(
                pos + 1,
                Allocation {
                    offset: run.offset + pages_to_bytes(pages),
                    pages: run.pages - pages,
                    in_use: false,
                },
            );
        }
        Some(run.offset)
    }

    fn release(&mut self, offset: usize) {
        let Some(pos) = self.allocations.iter().position(|a| a.offset == offset) else {
            return;
        };
        self.allocations[pos].in_use = false;

        // Merge with the following free run, then the preceding one.
        if pos + 1 < self.allocations.len() && !self.allocations[pos + 1].in_use {
            let next = self.allocations.remove(pos + 1);
            self.allocations[pos].pages += next.pages;
        }
        let pos = if pos > 0 && !self.allocations[pos - 1].in_use {
            let cur = self.allocations.remove(pos);
            self.allocations[pos - 1].pages += cur.pages;
            pos - 1
        } else {
            pos
        };

        // A free run at the top goes back to the bump region.
        if pos + 1 == self.allocations.len() {
            let tail = self.allocations[pos];
            self.allocations.pop();
            self.offset = tail.offset;
        }
    }

    fn free_bytes(&self, size: usize) -> usize {
        let reusable: usize = self
            .allocations
            .iter()
            .filter(|a| !a.in_use)
            .map(|a| pages_to_bytes(a.pages))
            .sum();
        size.saturating_sub(self.offset) + reusable
    }
}

enum Backing {
    /// Heap block owned by the arena.
    Heap(Layout),
    /// Caller-provided region, never freed by the arena.
    External,
}

struct ArenaInner {
    region: MemoryRegion,
    bus_base: u64,
    backing: Backing,
    state: Mutex<ArenaState>,
}

impl Drop for ArenaInner {
    fn drop(&mut self) {
        if let Backing::Heap(layout) = self.backing {
            // SAFETY: `region.base` came from `alloc_zeroed(layout)`, and every
            // allocation holds an Arc to us so none can outlive this.
            unsafe { dealloc(self.region.base as *mut u8, layout) };
        }
    }
}

// ============================================================================
// DmaArena - Main API
// ============================================================================

/// A DMA-capable memory arena.
///
/// Cloning yields another handle to the same arena.
#[derive(Clone)]
pub struct DmaArena {
    inner: Arc<ArenaInner>,
}

impl DmaArena {
    /// Create a heap-backed arena whose bus addresses equal CPU addresses.
    pub fn new(size: usize) -> Result<Self> {
        let (region, layout) = Self::heap_region(size)?;
        Ok(Self::from_parts(region, region.base as u64, Backing::Heap(layout)))
    }

    /// Create a heap-backed arena that reports bus addresses starting at `bus_base`.
    ///
    /// Used when the device sees the memory through a translation window.
    pub fn with_bus_base(size: usize, bus_base: u64) -> Result<Self> {
        let (region, layout) = Self::heap_region(size)?;
        Ok(Self::from_parts(region, bus_base, Backing::Heap(layout)))
    }

    fn heap_region(size: usize) -> Result<(MemoryRegion, Layout)> {
        let size = align_up(size, PAGE_SIZE);
        if size == 0 {
            return Err(DmaError::InvalidRegion);
        }
        let layout = Layout::from_size_align(size, PAGE_SIZE).map_err(|_| DmaError::InvalidRegion)?;
        // SAFETY: layout has non-zero size.
        let base = unsafe { alloc_zeroed(layout) };
        if base.is_null() {
            return Err(DmaError::NoMemoryFound);
        }
        log::debug!("dma arena: {} KiB at {:#x}", size / 1024, base as usize);
        Ok((MemoryRegion::new(base as usize, size), layout))
    }

    /// Create an arena over externally provided memory.
    ///
    /// # Safety
    ///
    /// - `region` must be valid, writable memory not used by anything else.
    /// - `bus_base` must be the device-visible address of `region.base`.
    /// - The region must outlive every allocation made from the arena.
    pub unsafe fn from_region(region: MemoryRegion, bus_base: u64) -> Result<Self> {
        if !region.is_usable() {
            return Err(DmaError::InvalidRegion);
        }
        let aligned = region.aligned();
        core::ptr::write_bytes(aligned.base as *mut u8, 0, aligned.size);
        let bus_base = bus_base + (aligned.base - region.base) as u64;
        Ok(Self::from_parts(aligned, bus_base, Backing::External))
    }

    fn from_parts(region: MemoryRegion, bus_base: u64, backing: Backing) -> Self {
        Self {
            inner: Arc::new(ArenaInner {
                region,
                bus_base,
                backing,
                state: Mutex::new(ArenaState {
                    offset: 0,
                    allocations: Vec::new(),
                }),
            }),
        }
    }

    /// Allocate contiguous pages.
    ///
    /// Memory is zeroed before return.
    pub fn alloc_pages(&self, pages: usize) -> Result<DmaAllocation> {
        if pages == 0 {
            return Err(DmaError::ZeroPages);
        }
        let size = pages_to_bytes(pages);

        let offset = {
            let mut state = self.inner.state.lock();
            match state.take_free_run(pages) {
                Some(offset) => offset,
                None => {
                    let offset = state.offset;
                    if offset + size > self.inner.region.size {
                        log::debug!(
                            "dma arena: {} pages requested, {} bytes free",
                            pages,
                            state.free_bytes(self.inner.region.size)
                        );
                        return Err(DmaError::OutOfMemory);
                    }
                    state.offset = offset + size;
                    state.allocations.push(Allocation {
                        offset,
                        pages,
                        in_use: true,
                    });
                    offset
                }
            }
        };

        // SAFETY: the run lies inside the region and is exclusively ours.
        unsafe {
            core::ptr::write_bytes((self.inner.region.base + offset) as *mut u8, 0, size);
        }

        Ok(DmaAllocation {
            arena: Arc::clone(&self.inner),
            offset,
            pages,
        })
    }

    /// Allocate at least `bytes` bytes, rounded up to whole pages.
    pub fn alloc_bytes(&self, bytes: usize) -> Result<DmaAllocation> {
        self.alloc_pages(bytes_to_pages(bytes))
    }

    /// Remaining free space in bytes (not necessarily contiguous).
    pub fn free_space(&self) -> usize {
        self.inner.state.lock().free_bytes(self.inner.region.size)
    }

    /// Total arena size in bytes.
    pub fn total_size(&self) -> usize {
        self.inner.region.size
    }

    /// CPU base address.
    pub fn base_address(&self) -> usize {
        self.inner.region.base
    }

    /// Bus address of the first byte.
    pub fn bus_base(&self) -> u64 {
        self.inner.bus_base
    }

    /// Highest bus address covered by the arena.
    pub fn bus_limit(&self) -> u64 {
        self.inner.bus_base + self.inner.region.size as u64 - 1
    }
}

impl fmt::Debug for DmaArena {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DmaArena")
            .field("base", &format_args!("{:#x}", self.inner.region.base))
            .field("bus_base", &format_args!("{:#x}", self.inner.bus_base))
            .field("size", &self.inner.region.size)
            .finish()
    }
}

// ============================================================================
// DmaAllocation
// ============================================================================

/// A run of pages leased from a [`DmaArena`].
///
/// The pages return to the arena on drop.
pub struct DmaAllocation {
    arena: Arc<ArenaInner>,
    offset: usize,
    pages: usize,
}

impl DmaAllocation {
    /// CPU pointer to the first byte.
    pub fn cpu_ptr(&self) -> NonNull<u8> {
        // SAFETY: region.base is non-null for every constructed arena.
        unsafe { NonNull::new_unchecked((self.arena.region.base + self.offset) as *mut u8) }
    }

    /// Device-visible bus address of the first byte.
    pub fn bus_addr(&self) -> u64 {
        self.arena.bus_base + self.offset as u64
    }

    /// Size in bytes.
    pub fn size(&self) -> usize {
        pages_to_bytes(self.pages)
    }

    /// Size in pages.
    pub fn pages(&self) -> usize {
        self.pages
    }

    /// View the memory.
    pub fn as_slice(&self) -> &[u8] {
        // SAFETY: exclusive run inside the live arena.
        unsafe { core::slice::from_raw_parts(self.cpu_ptr().as_ptr(), self.size()) }
    }

    /// View the memory mutably.
    pub fn as_mut_slice(&mut self) -> &mut [u8] {
        // SAFETY: exclusive run inside the live arena, borrowed mutably.
        unsafe { core::slice::from_raw_parts_mut(self.cpu_ptr().as_ptr(), self.size()) }
    }
}

impl Drop for DmaAllocation {
    fn drop(&mut self) {
        self.arena.state.lock().release(self.offset);
    }
}

impl fmt::Debug for DmaAllocation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DmaAllocation")
            .field("cpu_ptr", &self.cpu_ptr())
            .field("bus_addr", &format_args!("{:#x}", self.bus_addr()))
            .field("pages", &self.pages)
            .finish()
    }
}

// ============================================================================
// Tests
// ============================================================================
