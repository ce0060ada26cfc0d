//! DMA mapping strategy.
//!
//! The strategy is picked once when the queue is created:
//!
//! ```text
//!   adapter needs no DMA addresses ───────────────> Direct
//!   bounce policy Always, or no platform service ─> AlwaysBounce
//!   platform bypass-capable and allowed ──────────> Bypass
//!   otherwise ────────────────────────────────────> ScatterGather
//! ```
//!
//! `Bypass` and `ScatterGather` are re-checked per transfer; any failure is
//! reported as a [`MapError`] and the translator bounces that packet instead.
//!
//! Each packet slot owns one pre-allocated [`ScatterGatherList`]. A slot is
//! mapped at most once until [`DmaMapper::unmap`] runs for it.

use alloc::boxed::Box;
use alloc::vec::Vec;

use super::platform::{DmaAdapter, DmaSpan, MapError, ScatterGatherList, SgElement};
use crate::config::{BouncePolicy, DmaCapabilities, DriverConfig};
use crate::types::chain::NetBuffer;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MappingStrategy {
    /// Adapter reads CPU memory; fragments carry no logical address.
    Direct,
    /// Every packet is copied into pool memory.
    AlwaysBounce,
    /// Physical addresses used as-is, after constraint checks.
    Bypass,
    /// Lists built through the platform service.
    ScatterGather,
}

/// Per-slot transfer context.
#[derive(Debug, Default)]
struct DmaTransfer {
    list: ScatterGatherList,
    mapped: bool,
}

pub struct DmaMapper {
    strategy: MappingStrategy,
    constraints: DmaCapabilities,
    platform: Option<Box<dyn DmaAdapter>>,
    transfers: Vec<DmaTransfer>,
    spans: Vec<DmaSpan>,
    max_elements: usize,
}

impl DmaMapper {
    /// # Arguments
    /// - `config`: driver knobs (bounce policy, bypass permission)
    /// - `dma`: adapter DMA constraints, `None` if the adapter needs no DMA
    /// - `platform`: platform mapping service, if any
    /// - `packet_slots`: packet ring size
    /// - `max_elements`: most spans one packet may map
    pub fn new(
        config: &DriverConfig,
        dma: Option<DmaCapabilities>,
        platform: Option<Box<dyn DmaAdapter>>,
        packet_slots: u32,
        max_elements: usize,
    ) -> Self {
        let strategy = match (&dma, &platform) {
            (None, _) if config.bounce_policy == BouncePolicy::Always => MappingStrategy::AlwaysBounce,
            (None, _) => MappingStrategy::Direct,
            _ if config.bounce_policy == BouncePolicy::Always => MappingStrategy::AlwaysBounce,
            (Some(_), None) => MappingStrategy::AlwaysBounce,
            (Some(_), Some(p)) if p.bypass_capable() && config.allow_dma_bypass => MappingStrategy::Bypass,
            (Some(_), Some(_)) => MappingStrategy::ScatterGather,
        };
        let max_elements = match &platform {
            Some(p) if strategy == MappingStrategy::ScatterGather => {
                max_elements.min(p.max_scatter_gather_elements())
            }
            _ => max_elements,
        };

        let mut transfers = Vec::new();
        if matches!(strategy, MappingStrategy::Bypass | MappingStrategy::ScatterGather) {
            transfers.resize_with(packet_slots as usize, || DmaTransfer {
                list: ScatterGatherList::with_capacity(max_elements),
                mapped: false,
            });
        }
        log::debug!("dma mapper: strategy {:?}, {} elements per packet", strategy, max_elements);

        Self {
            strategy,
            constraints: dma.unwrap_or_default(),
            platform,
            transfers,
            spans: Vec::with_capacity(max_elements),
            max_elements,
        }
    }

    pub fn strategy(&self) -> MappingStrategy {
        self.strategy
    }

    /// Every packet must be bounced.
    pub fn always_bounce(&self) -> bool {
        self.strategy == MappingStrategy::AlwaysBounce
    }

    /// Caller memory must be mapped before it is posted.
    pub fn requires_mapping(&self) -> bool {
        matches!(self.strategy, MappingStrategy::Bypass | MappingStrategy::ScatterGather)
    }

    /// Map the data spans of `buffer` for packet `slot`.
    ///
    /// `max_span` must match the span size the translator fills with, so that
    /// element `i` describes fragment `i`.
    ///
    /// # Panics
    /// Panics if `slot` is still mapped.
    pub fn map(&mut self, slot: u32, buffer: &NetBuffer, max_span: usize) -> Result<(), MapError> {
        let index = slot as usize;
        assert!(
            !self.transfers[index].mapped,
            "BUG: packet slot {} reused before unmap",
            slot
        );

        self.spans.clear();
        for span in buffer.spans(max_span) {
            if self.spans.len() == self.max_elements {
                return Err(MapError::TooManyElements);
            }
            let mdl = &buffer.mdls()[span.mdl_index];
            self.spans.push(DmaSpan {
                physical_address: mdl.physical_address() + span.offset as u64,
                length: span.length as u32,
            });
        }

        let transfer = &mut self.transfers[index];
        transfer.list.clear();
        match self.strategy {
            MappingStrategy::Bypass => {
                let platform = self.platform.as_ref().ok_or(MapError::InsufficientResources)?;
                for span in &self.spans {
                    check_constraints(&self.constraints, span)?;
                    transfer.list.push(SgElement {
                        address: platform.physical_to_logical(span.physical_address),
                        length: span.length,
                    });
                }
            }
            MappingStrategy::ScatterGather => {
                let platform = self.platform.as_mut().ok_or(MapError::InsufficientResources)?;
                platform.build_scatter_gather(&self.spans, &mut transfer.list)?;
                let valid = transfer.list.len() == self.spans.len()
                    && transfer
                        .list
                        .elements()
                        .iter()
                        .all(|e| self.constraints.accepts(e.address, e.length));
                if !valid {
                    platform.put_scatter_gather(&mut transfer.list);
                    return Err(MapError::AddressWidth);
                }
            }
            MappingStrategy::Direct | MappingStrategy::AlwaysBounce => return Ok(()),
        }
        transfer.mapped = true;
        Ok(())
    }

    /// Logical address of element `element` of `slot`'s mapping.
    pub fn logical_address(&self, slot: u32, element: usize) -> Option<u64> {
        let transfer = self.transfers.get(slot as usize)?;
        if !transfer.mapped {
            return None;
        }
        transfer.list.elements().get(element).map(|e| e.address)
    }

    pub fn is_mapped(&self, slot: u32) -> bool {
        self.transfers.get(slot as usize).map_or(false, |t| t.mapped)
    }

    /// Release `slot`'s mapping. No-op if the slot is not mapped.
    pub fn unmap(&mut self, slot: u32) {
        let Some(transfer) = self.transfers.get_mut(slot as usize) else {
            return;
        };
        if !transfer.mapped {
            return;
        }
        if self.strategy == MappingStrategy::ScatterGather {
            if let Some(platform) = self.platform.as_mut() {
                platform.put_scatter_gather(&mut transfer.list);
            }
        }
        transfer.list.clear();
        transfer.mapped = false;
    }

    /// Slots currently mapped.
    pub fn mapped_count(&self) -> usize {
        self.transfers.iter().filter(|t| t.mapped).count()
    }
}

fn check_constraints(constraints: &DmaCapabilities, span: &DmaSpan) -> Result<(), MapError> {
    if constraints.alignment > 1 && span.physical_address % constraints.alignment as u64 != 0 {
        return Err(MapError::Misaligned);
    }
    if !constraints.accepts(span.physical_address, span.length) {
        return Err(MapError::AddressWidth);
    }
    Ok(())
}

impl core::fmt::Debug for DmaMapper {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("DmaMapper")
            .field("strategy", &self.strategy)
            .field("constraints", &self.constraints)
            .field("mapped", &self.mapped_count())
            .finish()
    }
}
