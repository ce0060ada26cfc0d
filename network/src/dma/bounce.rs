//! Bounce buffers.
//!
//! When a Tx buffer cannot be handed to the adapter in place (too many
//! fragments, unmappable memory, or a policy that always copies), its payload
//! is copied into a pool buffer behind a fixed backfill and posted as the
//! packet's single fragment.
//!
//! Leases are [`DmaBuffer`](super::buffer::DmaBuffer) values owned by the fragment record, so a
//! bounced fragment always holds exactly one lease and releasing it moves
//! the lease out; a second release finds nothing.

use dma_pool::DmaArena;

use super::pool::BufferPool;
use crate::error::{Backpressure, DatapathError, PermanentFailure, Result};
use crate::ring::Ring;
use crate::types::chain::NetBuffer;
use crate::types::packet::{FragmentBuffer, NetFragment, NetPacket};

/// Why a bounce did not happen. The fragment is untouched in both cases.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BounceError {
    /// Every buffer is leased; retry after completions.
    PoolExhausted,
    /// Payload does not fit in any buffer.
    PayloadTooLarge,
}

impl From<BounceError> for DatapathError {
    fn from(err: BounceError) -> Self {
        match err {
            BounceError::PoolExhausted => Self::Backpressure(Backpressure::BouncePool),
            BounceError::PayloadTooLarge => Self::Permanent(PermanentFailure::PayloadTooLarge),
        }
    }
}

/// Per-queue pool of bounce buffers. Used only from the owning queue's loop.
pub struct BounceBufferPool {
    pool: BufferPool,
    backfill: usize,
    leased: usize,
}

impl BounceBufferPool {
    /// # Arguments
    /// - `buffer_size`: bytes per buffer, including `backfill`
    /// - `count`: number of buffers
    /// - `backfill`: head-room kept free in front of each payload
    pub fn new(arena: &DmaArena, buffer_size: usize, count: usize, backfill: usize) -> Result<Self> {
        if backfill >= buffer_size {
            return Err(DatapathError::InvalidConfig("bounce backfill exceeds buffer size"));
        }
        Ok(Self {
            pool: BufferPool::new(arena, buffer_size, count)?,
            backfill,
            leased: 0,
        })
    }

    /// Largest payload a single bounce buffer can carry.
    pub fn payload_capacity(&self) -> usize {
        self.pool.buffer_size() - self.backfill
    }

    pub fn backfill(&self) -> usize {
        self.backfill
    }

    /// Leases currently attached to fragments.
    pub fn leased(&self) -> usize {
        self.leased
    }

    pub fn available(&self) -> usize {
        self.pool.available()
    }

    /// Copy `segment`'s payload into a pool buffer and attach it to `fragment`.
    ///
    /// On success the fragment owns the lease, is marked device-owned and
    /// carries the payload's bus address.
    pub fn bounce(&mut self, segment: &NetBuffer, fragment: &mut NetFragment) -> core::result::Result<(), BounceError> {
        let length = segment.data_length();
        if length > self.payload_capacity() {
            return Err(BounceError::PayloadTooLarge);
        }
        let mut buffer = self.pool.alloc().ok_or(BounceError::PoolExhausted)?;

        let copied = segment.copy_prefix(&mut buffer.as_mut_slice()[self.backfill..self.backfill + length]);
        debug_assert_eq!(copied, length);

        let bus = buffer.bus_addr() + self.backfill as u64;
        buffer.mark_device_owned();
        fragment.buffer = FragmentBuffer::Pooled(buffer);
        fragment.offset = self.backfill as u32;
        fragment.valid_length = length as u32;
        fragment.capacity = self.payload_capacity() as u32;
        fragment.logical_address = Some(bus);
        self.leased += 1;
        log::trace!("bounce: {} bytes into buffer at {:#x}", length, bus);
        Ok(())
    }

    /// Return every lease held by `packet`'s fragments. Idempotent.
    ///
    /// Returns the number of leases released.
    pub fn release(&mut self, packet: &NetPacket, fragments: &mut Ring<NetFragment>) -> usize {
        let mut released = 0;
        for i in 0..packet.fragment_count as u32 {
            let fragment = fragments.get_mut(packet.fragment_index.wrapping_add(i));
            if !fragment.is_pooled() {
                continue;
            }
            if let FragmentBuffer::Pooled(mut buffer) = fragment.take_buffer() {
                buffer.mark_driver_owned();
                drop(buffer);
                released += 1;
            }
        }
        self.leased -= released;
        released
    }
}
