//! Memory-space maps.
//!
//! A [`MemorySpace`] is the static, per-device-model table of memory
//! regions. Regions never overlap, and a lookup returns the unique region
//! that fully contains the queried span.

use crate::memory::AddressRange;
use crate::result::{Error, Result};

// =============================================================================
// Memory Kind
// =============================================================================

/// What backs a region of the device address space.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MemoryKind {
    /// Control/status registers; plain read/write packets
    Register,
    /// SRAM-backed settings and tables; plain read/write packets
    Sram,
    /// Flash; writes must use the burst protocol and respect sectors
    Flash,
}

// =============================================================================
// Memory Descriptor
// =============================================================================

/// One region of the device address space.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MemoryDescriptor {
    /// Addresses covered by the region.
    pub range: AddressRange,
    /// Backing memory type.
    pub kind: MemoryKind,
    /// Access granularity: address and transfer size must be multiples of
    /// this (1, 2 or 4 bytes).
    pub minimum_data_size: u32,
    /// Largest payload the device accepts in one packet for this region.
    pub maximum_data_size: u32,
}

impl MemoryDescriptor {
    /// Region descriptor. Granularity must be 1, 2 or 4 and the packet
    /// ceiling must hold at least one word.
    #[must_use]
    pub fn new(range: AddressRange, kind: MemoryKind, minimum_data_size: u32, maximum_data_size: u32) -> Self {
        debug_assert!(matches!(minimum_data_size, 1 | 2 | 4), "invalid granularity");
        debug_assert!(maximum_data_size >= minimum_data_size, "packet ceiling below one word");
        Self {
            range,
            kind,
            minimum_data_size,
            maximum_data_size,
        }
    }

    /// Whether writes into this region require the flash burst protocol.
    #[must_use]
    pub const fn is_flash(&self) -> bool {
        matches!(self.kind, MemoryKind::Flash)
    }
}

// =============================================================================
// Memory Space
// =============================================================================

/// Ordered, non-overlapping set of region descriptors.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct MemorySpace {
    descriptors: Vec<MemoryDescriptor>,
}

impl MemorySpace {
    /// Build a space from descriptors. The descriptors are sorted by first
    /// address; overlapping regions are rejected in debug builds.
    #[must_use]
    pub fn new(mut descriptors: Vec<MemoryDescriptor>) -> Self {
        descriptors.sort_by_key(|descriptor| descriptor.range.first());
        debug_assert!(
            descriptors
                .windows(2)
                .all(|pair| !pair[0].range.overlaps(&pair[1].range)),
            "overlapping memory regions"
        );
        Self { descriptors }
    }

    /// All regions, ascending by address.
    #[must_use]
    pub fn descriptors(&self) -> &[MemoryDescriptor] {
        &self.descriptors
    }

    /// The unique region fully containing `range`.
    ///
    /// Fails when the span is outside every region or straddles a region
    /// boundary - a single device operation never crosses regions.
    pub fn descriptor_for(&self, range: &AddressRange) -> Result<MemoryDescriptor> {
        let index = self
            .descriptors
            .partition_point(|descriptor| descriptor.range.last() < range.first());

        if let Some(descriptor) = self.descriptors.get(index)
            && descriptor.range.contains(range)
        {
            return Ok(*descriptor);
        }

        Err(Error::with_detail(
            "Unknown memory region!",
            format!("no region fully contains {}", range.to_hex()),
        ))
    }
}
