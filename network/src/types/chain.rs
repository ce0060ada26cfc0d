//! Descriptor chains.
//!
//! ```text
//!   NblChain ─┬─ NetBufferList ─┬─ NetBuffer ─┬─ MemoryDescriptor
//!             │   (OOB info,    │  (data      ├─ MemoryDescriptor
//!             │    status)      │   window)   └─ ...
//!             │                 └─ NetBuffer ── ...
//!             └─ NetBufferList ── ...
//! ```
//!
//! A `NetBuffer` becomes one ring packet. Its memory descriptors may be
//! shorter than a page, zero-length, or shared with other descriptors.

use alloc::boxed::Box;
use alloc::collections::VecDeque;
use alloc::sync::Arc;
use alloc::vec::Vec;
use core::fmt;

use crate::dma::buffer::DmaBuffer;
use crate::error::{PermanentFailure, Result};
use crate::types::layout::PacketLayout;
use crate::types::oob::OutOfBandInfo;

// ═══════════════════════════════════════════════════════════════════════════
// Memory descriptors
// ═══════════════════════════════════════════════════════════════════════════

/// Physically backed memory shared by one or more descriptors.
enum RegionMemory {
    /// Heap memory; `physical_base` is the address the device sees for byte 0.
    Heap { bytes: Box<[u8]>, physical_base: u64 },
    /// A receive buffer lent upstream; returns to its pool when dropped.
    Lent(DmaBuffer),
}

impl RegionMemory {
    fn bytes(&self) -> &[u8] {
        match self {
            Self::Heap { bytes, .. } => bytes,
            Self::Lent(buf) => buf.as_slice(),
        }
    }

    fn physical_base(&self) -> u64 {
        match self {
            Self::Heap { physical_base, .. } => *physical_base,
            Self::Lent(buf) => buf.bus_addr(),
        }
    }
}

/// A physically contiguous byte range.
#[derive(Clone)]
pub struct MemoryDescriptor {
    memory: Arc<RegionMemory>,
    byte_offset: usize,
    byte_count: usize,
}

impl MemoryDescriptor {
    /// Describe heap bytes; the physical address is the CPU address.
    pub fn from_vec(data: Vec<u8>) -> Self {
        let bytes = data.into_boxed_slice();
        let physical_base = bytes.as_ptr() as u64;
        Self::from_memory(RegionMemory::Heap { bytes, physical_base })
    }

    pub fn from_slice(data: &[u8]) -> Self {
        Self::from_vec(data.to_vec())
    }

    /// Describe heap bytes that the device sees at `physical_base`.
    pub fn with_physical_base(data: Vec<u8>, physical_base: u64) -> Self {
        Self::from_memory(RegionMemory::Heap {
            bytes: data.into_boxed_slice(),
            physical_base,
        })
    }

    /// Lend `count` bytes at `offset` of a driver-owned receive buffer.
    pub fn lend(buffer: DmaBuffer, offset: usize, count: usize) -> Self {
        debug_assert!(offset + count <= buffer.capacity());
        Self {
            memory: Arc::new(RegionMemory::Lent(buffer)),
            byte_offset: offset,
            byte_count: count,
        }
    }

    fn from_memory(memory: RegionMemory) -> Self {
        let byte_count = memory.bytes().len();
        Self {
            memory: Arc::new(memory),
            byte_offset: 0,
            byte_count,
        }
    }

    /// Sub-range sharing the same memory.
    pub fn sub_range(&self, offset: usize, count: usize) -> Option<Self> {
        if offset.checked_add(count)? > self.byte_count {
            return None;
        }
        Some(Self {
            memory: Arc::clone(&self.memory),
            byte_offset: self.byte_offset + offset,
            byte_count: count,
        })
    }

    pub fn len(&self) -> usize {
        self.byte_count
    }

    pub fn is_empty(&self) -> bool {
        self.byte_count == 0
    }

    pub fn bytes(&self) -> &[u8] {
        &self.memory.bytes()[self.byte_offset..self.byte_offset + self.byte_count]
    }

    /// Device-visible address of the first byte.
    pub fn physical_address(&self) -> u64 {
        self.memory.physical_base() + self.byte_offset as u64
    }

    /// Whether this describes a lent receive buffer.
    pub fn is_lent(&self) -> bool {
        matches!(*self.memory, RegionMemory::Lent(_))
    }
}

impl fmt::Debug for MemoryDescriptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MemoryDescriptor")
            .field("physical", &format_args!("{:#x}", self.physical_address()))
            .field("len", &self.byte_count)
            .field("lent", &self.is_lent())
            .finish()
    }
}

// ═══════════════════════════════════════════════════════════════════════════
// NetBuffer
// ═══════════════════════════════════════════════════════════════════════════

/// Position inside a buffer's memory descriptor chain.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SpanCursor {
    pub mdl_index: usize,
    pub mdl_offset: usize,
    /// Data bytes not yet consumed.
    pub remaining: usize,
}

/// A contiguous piece of a buffer's data.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Span {
    pub mdl_index: usize,
    pub offset: usize,
    pub length: usize,
}

/// One frame: a chain of memory descriptors plus a data window.
#[derive(Debug, Clone)]
pub struct NetBuffer {
    mdls: Vec<MemoryDescriptor>,
    data_offset: usize,
    data_length: usize,
}

impl NetBuffer {
    /// Buffer whose data is every byte of `mdls`.
    pub fn new(mdls: Vec<MemoryDescriptor>) -> Self {
        let data_length = mdls.iter().map(MemoryDescriptor::len).sum();
        Self {
            mdls,
            data_offset: 0,
            data_length,
        }
    }

    /// Single-descriptor buffer holding a copy of `data`.
    pub fn from_bytes(data: &[u8]) -> Self {
        Self::new(alloc::vec![MemoryDescriptor::from_slice(data)])
    }

    /// Buffer whose data starts `data_offset` bytes into the chain.
    pub fn with_data_window(
        mdls: Vec<MemoryDescriptor>,
        data_offset: usize,
        data_length: usize,
    ) -> Result<Self> {
        let total: usize = mdls.iter().map(MemoryDescriptor::len).sum();
        match data_offset.checked_add(data_length) {
            Some(end) if end <= total => Ok(Self {
                mdls,
                data_offset,
                data_length,
            }),
            _ => Err(PermanentFailure::MalformedLength.into()),
        }
    }

    pub fn mdls(&self) -> &[MemoryDescriptor] {
        &self.mdls
    }

    pub fn data_offset(&self) -> usize {
        self.data_offset
    }

    pub fn data_length(&self) -> usize {
        self.data_length
    }

    /// Cursor at the first data byte.
    pub fn cursor(&self) -> SpanCursor {
        let mut cursor = SpanCursor {
            mdl_index: 0,
            mdl_offset: self.data_offset,
            remaining: self.data_length,
        };
        self.normalize(&mut cursor);
        cursor
    }

    /// Move past exhausted and zero-length descriptors.
    fn normalize(&self, cursor: &mut SpanCursor) {
        while cursor.remaining > 0 && cursor.mdl_index < self.mdls.len() {
            let len = self.mdls[cursor.mdl_index].len();
            if cursor.mdl_offset < len {
                break;
            }
            cursor.mdl_offset -= len;
            cursor.mdl_index += 1;
        }
    }

    /// Next span of at most `max_span` bytes, advancing `cursor`.
    pub fn next_span(&self, cursor: &mut SpanCursor, max_span: usize) -> Option<Span> {
        self.normalize(cursor);
        if cursor.remaining == 0 || cursor.mdl_index >= self.mdls.len() {
            return None;
        }
        let mdl = &self.mdls[cursor.mdl_index];
        let length = cursor
            .remaining
            .min(mdl.len() - cursor.mdl_offset)
            .min(max_span.max(1));
        let span = Span {
            mdl_index: cursor.mdl_index,
            offset: cursor.mdl_offset,
            length,
        };
        cursor.mdl_offset += length;
        cursor.remaining -= length;
        self.normalize(cursor);
        Some(span)
    }

    /// Iterate all data spans.
    pub fn spans(&self, max_span: usize) -> impl Iterator<Item = Span> + '_ {
        let mut cursor = self.cursor();
        core::iter::from_fn(move || self.next_span(&mut cursor, max_span))
    }

    /// Fragments needed to describe the data in place.
    pub fn fragment_count(&self, max_span: usize) -> usize {
        self.spans(max_span).count()
    }

    /// Bytes of one span.
    pub fn span_bytes(&self, span: &Span) -> &[u8] {
        &self.mdls[span.mdl_index].bytes()[span.offset..span.offset + span.length]
    }

    /// Copy the leading data bytes into `out`, returning how many were copied.
    pub fn copy_prefix(&self, out: &mut [u8]) -> usize {
        let mut copied = 0;
        for span in self.spans(usize::MAX) {
            if copied == out.len() {
                break;
            }
            let bytes = self.span_bytes(&span);
            let n = bytes.len().min(out.len() - copied);
            out[copied..copied + n].copy_from_slice(&bytes[..n]);
            copied += n;
        }
        copied
    }

    /// Gather the data window into one vector.
    pub fn to_vec(&self) -> Vec<u8> {
        let mut out = alloc::vec![0u8; self.data_length];
        let n = self.copy_prefix(&mut out);
        out.truncate(n);
        out
    }
}

// ═══════════════════════════════════════════════════════════════════════════
// NetBufferList
// ═══════════════════════════════════════════════════════════════════════════

/// Outcome reported when a buffer list is handed back.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum CompletionStatus {
    /// Still owned by the datapath.
    #[default]
    Pending,
    Success,
    /// At least one buffer could never be translated.
    Failed(PermanentFailure),
    /// Aborted by queue shutdown.
    Paused,
}

/// A group of buffers sharing out-of-band metadata.
#[derive(Debug, Default)]
pub struct NetBufferList {
    buffers: Vec<NetBuffer>,
    /// Offload metadata.
    pub info: OutOfBandInfo,
    /// Layout already known to the caller; skips parsing on Tx.
    pub layout: Option<PacketLayout>,
    /// Opaque caller value, returned untouched.
    pub cookie: u64,
    status: CompletionStatus,
}

impl NetBufferList {
    pub fn new(buffers: Vec<NetBuffer>) -> Self {
        Self {
            buffers,
            ..Self::default()
        }
    }

    pub fn single(buffer: NetBuffer) -> Self {
        Self::new(alloc::vec![buffer])
    }

    pub fn with_cookie(mut self, cookie: u64) -> Self {
        self.cookie = cookie;
        self
    }

    pub fn with_info(mut self, info: OutOfBandInfo) -> Self {
        self.info = info;
        self
    }

    pub fn buffers(&self) -> &[NetBuffer] {
        &self.buffers
    }

    pub fn push_buffer(&mut self, buffer: NetBuffer) {
        self.buffers.push(buffer);
    }

    pub fn total_length(&self) -> usize {
        self.buffers.iter().map(NetBuffer::data_length).sum()
    }

    pub fn status(&self) -> CompletionStatus {
        self.status
    }

    /// Record a permanent failure; the first one wins.
    pub fn fail(&mut self, reason: PermanentFailure) {
        if !matches!(self.status, CompletionStatus::Failed(_)) {
            self.status = CompletionStatus::Failed(reason);
        }
    }

    /// Mark as aborted unless already failed.
    pub fn pause(&mut self) {
        if !matches!(self.status, CompletionStatus::Failed(_)) {
            self.status = CompletionStatus::Paused;
        }
    }

    /// Finish: pending lists become successful.
    pub fn finish(&mut self) {
        if self.status == CompletionStatus::Pending {
            self.status = CompletionStatus::Success;
        }
    }
}

/// Ordered chain of buffer lists.
#[derive(Debug, Default)]
pub struct NblChain {
    lists: VecDeque<NetBufferList>,
}

impl NblChain {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.lists.len()
    }

    pub fn is_empty(&self) -> bool {
        self.lists.is_empty()
    }

    pub fn push_back(&mut self, list: NetBufferList) {
        self.lists.push_back(list);
    }

    pub fn pop_front(&mut self) -> Option<NetBufferList> {
        self.lists.pop_front()
    }

    pub fn front(&self) -> Option<&NetBufferList> {
        self.lists.front()
    }

    /// Move every list of `other` to the end of this chain.
    pub fn append(&mut self, other: &mut NblChain) {
        self.lists.append(&mut other.lists);
    }

    /// Take the whole chain, leaving this one empty.
    pub fn take(&mut self) -> NblChain {
        core::mem::take(self)
    }

    pub fn iter(&self) -> impl Iterator<Item = &NetBufferList> {
        self.lists.iter()
    }
}

impl FromIterator<NetBufferList> for NblChain {
    fn from_iter<I: IntoIterator<Item = NetBufferList>>(iter: I) -> Self {
        Self {
            lists: iter.into_iter().collect(),
        }
    }
}

impl IntoIterator for NblChain {
    type Item = NetBufferList;
    type IntoIter = alloc::collections::vec_deque::IntoIter<NetBufferList>;

    fn into_iter(self) -> Self::IntoIter {
        self.lists.into_iter()
    }
}

impl Extend<NetBufferList> for NblChain {
    fn extend<I: IntoIterator<Item = NetBufferList>>(&mut self, iter: I) {
        self.lists.extend(iter);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn chain(sizes: &[usize]) -> NetBuffer {
        let mdls = sizes
            .iter()
            .enumerate()
            .map(|(i, &n)| MemoryDescriptor::from_vec(alloc::vec![i as u8; n]))
            .collect();
        NetBuffer::new(mdls)
    }

    #[test]
    fn test_spans_skip_zero_length_regions() {
        let nb = chain(&[100, 0, 1400]);
        let spans: Vec<Span> = nb.spans(usize::MAX).collect();
        assert_eq!(spans.len(), 2);
        assert_eq!(spans[0], Span { mdl_index: 0, offset: 0, length: 100 });
        assert_eq!(spans[1], Span { mdl_index: 2, offset: 0, length: 1400 });
    }

    #[test]
    fn test_cursor_lands_on_next_non_empty_region() {
        let nb = chain(&[100, 0, 1400]);
        let mut cursor = nb.cursor();
        nb.next_span(&mut cursor, usize::MAX).unwrap();
        assert_eq!(cursor.mdl_index, 2);
        assert_eq!(cursor.mdl_offset, 0);
        assert_eq!(cursor.remaining, 1400);
    }

    #[test]
    fn test_max_span_splits_regions() {
        let nb = chain(&[1000]);
        let lens: Vec<usize> = nb.spans(300).map(|s| s.length).collect();
        assert_eq!(lens, vec![300, 300, 300, 100]);
        assert_eq!(nb.fragment_count(300), 4);
    }

    #[test]
    fn test_data_window() {
        let mdls = vec![
            MemoryDescriptor::from_slice(&[1, 2, 3]),
            MemoryDescriptor::from_slice(&[4, 5, 6]),
        ];
        let nb = NetBuffer::with_data_window(mdls.clone(), 2, 3).unwrap();
        assert_eq!(nb.to_vec(), vec![3, 4, 5]);

        let err = NetBuffer::with_data_window(mdls, 4, 3).unwrap_err();
        assert_eq!(err, PermanentFailure::MalformedLength.into());
    }

    #[test]
    fn test_sub_range_shares_memory() {
        let mdl = MemoryDescriptor::from_vec((0u8..32).collect());
        let sub = mdl.sub_range(8, 4).unwrap();
        assert_eq!(sub.bytes(), &[8, 9, 10, 11]);
        assert_eq!(sub.physical_address(), mdl.physical_address() + 8);
        assert!(mdl.sub_range(30, 4).is_none());
    }

    #[test]
    fn test_status_transitions() {
        let mut nbl = NetBufferList::single(NetBuffer::from_bytes(&[0; 4]));
        assert_eq!(nbl.status(), CompletionStatus::Pending);
        nbl.fail(PermanentFailure::PayloadTooLarge);
        nbl.fail(PermanentFailure::MalformedLength);
        nbl.pause();
        nbl.finish();
        assert_eq!(
            nbl.status(),
            CompletionStatus::Failed(PermanentFailure::PayloadTooLarge)
        );
    }
}
