//! Platform DMA mapping service.
//!
//! The datapath never talks to an IOMMU or HAL directly; it goes through a
//! [`DmaAdapter`] supplied by the platform. [`SoftwareDmaAdapter`] is an
//! identity-mapping implementation with configurable limits, used on
//! platforms without address translation and in tests.

use alloc::sync::Arc;
use alloc::vec::Vec;
use core::sync::atomic::{AtomicUsize, Ordering};

/// One physically contiguous span to be mapped.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DmaSpan {
    pub physical_address: u64,
    pub length: u32,
}

/// One mapped element.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SgElement {
    /// Device-visible (logical) address.
    pub address: u64,
    pub length: u32,
}

/// Scatter-gather list buffer, pre-allocated once per packet slot.
#[derive(Debug, Default)]
pub struct ScatterGatherList {
    elements: Vec<SgElement>,
}

impl ScatterGatherList {
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            elements: Vec::with_capacity(capacity),
        }
    }

    pub fn elements(&self) -> &[SgElement] {
        &self.elements
    }

    pub fn push(&mut self, element: SgElement) {
        self.elements.push(element);
    }

    pub fn clear(&mut self) {
        self.elements.clear();
    }

    pub fn len(&self) -> usize {
        self.elements.len()
    }

    pub fn is_empty(&self) -> bool {
        self.elements.is_empty()
    }
}

/// Why a mapping failed. All of these degrade to bounce.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MapError {
    /// Map registers or list entries exhausted.
    InsufficientResources,
    /// More elements than the platform or adapter accepts.
    TooManyElements,
    /// An address lies beyond what the device can reach.
    AddressWidth,
    /// An address violates the adapter's alignment.
    Misaligned,
}

/// Platform DMA mapping service.
pub trait DmaAdapter: Send {
    /// Physical addresses can be used without building a list.
    fn bypass_capable(&self) -> bool;

    /// Longest list `build_scatter_gather` will produce.
    fn max_scatter_gather_elements(&self) -> usize;

    /// Translate a physical address for the bypass path.
    fn physical_to_logical(&self, physical: u64) -> u64;

    /// Map `spans` into `list`, one element per span.
    ///
    /// On error `list` must be left empty and nothing stays mapped.
    fn build_scatter_gather(&mut self, spans: &[DmaSpan], list: &mut ScatterGatherList) -> Result<(), MapError>;

    /// Release a list built by `build_scatter_gather`.
    fn put_scatter_gather(&mut self, list: &mut ScatterGatherList);
}

/// Identity-mapping DMA service with limits.
#[derive(Debug, Clone)]
pub struct SoftwareDmaAdapter {
    bypass: bool,
    max_elements: usize,
    address_limit: u64,
    /// Lists that may be live at once (`None` = unlimited).
    map_budget: Option<usize>,
    outstanding: Arc<AtomicUsize>,
}

impl SoftwareDmaAdapter {
    /// Identity mapping, full address width, no bypass.
    pub fn new() -> Self {
        Self {
            bypass: false,
            max_elements: 64,
            address_limit: u64::MAX,
            map_budget: None,
            outstanding: Arc::new(AtomicUsize::new(0)),
        }
    }

    pub fn with_bypass(mut self, bypass: bool) -> Self {
        self.bypass = bypass;
        self
    }

    pub fn with_max_elements(mut self, max: usize) -> Self {
        self.max_elements = max;
        self
    }

    /// Highest address the mapped device can reach.
    pub fn with_address_limit(mut self, limit: u64) -> Self {
        self.address_limit = limit;
        self
    }

    /// Limit simultaneously live lists.
    pub fn with_map_budget(mut self, budget: usize) -> Self {
        self.map_budget = Some(budget);
        self
    }

    /// Counter of live lists, readable after the adapter is boxed away.
    pub fn outstanding_handle(&self) -> Arc<AtomicUsize> {
        Arc::clone(&self.outstanding)
    }
}

impl Default for SoftwareDmaAdapter {
    fn default() -> Self {
        Self::new()
    }
}

impl DmaAdapter for SoftwareDmaAdapter {
    fn bypass_capable(&self) -> bool {
        self.bypass
    }

    fn max_scatter_gather_elements(&self) -> usize {
        self.max_elements
    }

    fn physical_to_logical(&self, physical: u64) -> u64 {
        physical
    }

    fn build_scatter_gather(&mut self, spans: &[DmaSpan], list: &mut ScatterGatherList) -> Result<(), MapError> {
        list.clear();
        if spans.len() > self.max_elements {
            return Err(MapError::TooManyElements);
        }
        if let Some(budget) = self.map_budget {
            if self.outstanding.load(Ordering::Relaxed) >= budget {
                return Err(MapError::InsufficientResources);
            }
        }
        for span in spans {
            let last = span.physical_address.checked_add(span.length.max(1) as u64 - 1);
            if last.map_or(true, |last| last > self.address_limit) {
                list.clear();
                return Err(MapError::AddressWidth);
            }
            list.push(SgElement {
                address: span.physical_address,
                length: span.length,
            });
        }
        self.outstanding.fetch_add(1, Ordering::Relaxed);
        Ok(())
    }

    fn put_scatter_gather(&mut self, list: &mut ScatterGatherList) {
        list.clear();
        self.outstanding.fetch_sub(1, Ordering::Relaxed);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn span(address: u64, length: u32) -> DmaSpan {
        DmaSpan {
            physical_address: address,
            length,
        }
    }

    #[test]
    fn test_identity_mapping() {
        let mut dma = SoftwareDmaAdapter::new();
        let mut list = ScatterGatherList::with_capacity(4);
        dma.build_scatter_gather(&[span(0x1000, 64), span(0x9000, 128)], &mut list)
            .unwrap();
        assert_eq!(list.elements()[1], SgElement { address: 0x9000, length: 128 });
        assert_eq!(dma.outstanding_handle().load(Ordering::Relaxed), 1);
        dma.put_scatter_gather(&mut list);
        assert!(list.is_empty());
        assert_eq!(dma.outstanding_handle().load(Ordering::Relaxed), 0);
    }

    #[test]
    fn test_limits() {
        let mut dma = SoftwareDmaAdapter::new()
            .with_max_elements(1)
            .with_address_limit(0xFFFF)
            .with_map_budget(1);
        let mut list = ScatterGatherList::default();

        let err = dma.build_scatter_gather(&[span(0, 1), span(2, 1)], &mut list);
        assert_eq!(err, Err(MapError::TooManyElements));
        let err = dma.build_scatter_gather(&[span(0xFFF0, 0x20)], &mut list);
        assert_eq!(err, Err(MapError::AddressWidth));
        assert!(list.is_empty());

        dma.build_scatter_gather(&[span(0x100, 0x20)], &mut list).unwrap();
        let mut second = ScatterGatherList::default();
        let err = dma.build_scatter_gather(&[span(0x200, 0x20)], &mut second);
        assert_eq!(err, Err(MapError::InsufficientResources));
    }
}
