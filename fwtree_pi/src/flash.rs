//! Intel Flash Descriptor Definitions
//!
//! The flash descriptor sits in the first 4 KiB of the SPI flash part and
//! carries the region table that divides the part into the descriptor, BIOS,
//! ME, GBE, and platform data regions. These structures are Intel layout,
//! not PI specification material.
//!
//! ## License
//!
//! Copyright (C) Microsoft Corporation.
//!
//! SPDX-License-Identifier: Apache-2.0
//!

/// Flash descriptor signature value.
pub const FLASH_SIGNATURE: u32 = 0x0FF0_A55A;

/// Offset of the signature in descriptor-mode images. Images that start
/// directly with the descriptor map carry the signature at offset 0.
pub const SIGNATURE_OFFSET: usize = 0x10;

/// Total length of the descriptor region.
pub const DESCRIPTOR_LENGTH: usize = 0x1000;

/// Size of [`DescriptorMap`].
pub const DESCRIPTOR_MAP_SIZE: usize = 8;

/// Size of [`RegionSection`].
pub const REGION_SECTION_SIZE: usize = 20;

/// A flash region table entry: base and limit in 4 KiB pages.
///
/// The described byte range is `base << 12 ..= ((limit + 1) << 12) - 1`.
/// An entry with `limit == 0` or `limit < base` marks an unused region.
#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FlashRegion {
    pub base: u16,
    pub limit: u16,
}

impl FlashRegion {
    /// Whether the region table entry describes a populated region.
    pub fn valid(&self) -> bool {
        self.limit != 0 && self.limit >= self.base
    }

    /// First byte of the region.
    pub fn base_offset(&self) -> u32 {
        (self.base as u32) << 12
    }

    /// One past the last byte of the region.
    pub fn end_offset(&self) -> u32 {
        ((self.limit as u32) + 1) << 12
    }
}

/// The regions a flash image can carry besides the descriptor itself.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RegionKind {
    Bios,
    Me,
    Gbe,
    Pd,
}

impl RegionKind {
    pub const ALL: [RegionKind; 4] = [RegionKind::Bios, RegionKind::Me, RegionKind::Gbe, RegionKind::Pd];

    pub fn name(&self) -> &'static str {
        match self {
            RegionKind::Bios => "BIOS",
            RegionKind::Me => "ME",
            RegionKind::Gbe => "GBE",
            RegionKind::Pd => "PD",
        }
    }
}

/// Descriptor map (FLMAP0/FLMAP1), byte-wise layout.
#[repr(C)]
#[derive(Debug, Clone, Copy)]
pub struct DescriptorMap {
    pub component_base: u8,
    pub num_flash_chips: u8,
    /// Region table base; the table lives at `region_base * 0x10`.
    pub region_base: u8,
    pub num_regions: u8,
    pub master_base: u8,
    pub num_masters: u8,
    pub pch_straps_base: u8,
    pub num_pch_straps: u8,
}

/// The flash region table (FRBA): the descriptor's own entry followed by
/// the four regions the firmware tree models.
#[repr(C)]
#[derive(Debug, Clone, Copy)]
pub struct RegionSection {
    /// FREG0, the descriptor region itself.
    pub descriptor: FlashRegion,
    pub bios: FlashRegion,
    pub me: FlashRegion,
    pub gbe: FlashRegion,
    pub pd: FlashRegion,
}

impl RegionSection {
    /// The table entry for a region kind.
    pub fn region(&self, kind: RegionKind) -> FlashRegion {
        match kind {
            RegionKind::Bios => self.bios,
            RegionKind::Me => self.me,
            RegionKind::Gbe => self.gbe,
            RegionKind::Pd => self.pd,
        }
    }
}

#[cfg(test)]
mod test {
    use super::*;

    const CASES: [(FlashRegion, bool, u32, u32); 5] = [
        (FlashRegion { base: 0, limit: 0 }, false, 0, 0x1000),
        (FlashRegion { base: 1, limit: 0 }, false, 0x1000, 0x1000),
        (FlashRegion { base: 1, limit: 1 }, true, 0x1000, 0x2000),
        (FlashRegion { base: 100, limit: 200 }, true, 0x64000, 0xC9000),
        (FlashRegion { base: 0x0004, limit: 0xFFFF }, true, 0x0000_4000, 0x1000_0000),
    ];

    #[test]
    fn region_valid() {
        for (region, valid, _, _) in CASES {
            assert_eq!(region.valid(), valid, "{region:?}");
        }
    }

    #[test]
    fn region_base_offset() {
        for (region, _, base, _) in CASES {
            assert_eq!(region.base_offset(), base, "{region:?}");
        }
    }

    #[test]
    fn region_end_offset() {
        for (region, _, _, end) in CASES {
            assert_eq!(region.end_offset(), end, "{region:?}");
        }
    }
}
