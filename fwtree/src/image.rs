//! The flash image root: descriptor, BIOS region, and the opaque regions.
//!
//! Images normally start with an Intel Flash Descriptor whose region table
//! places the BIOS/ME/GBE/PD regions. Bare firmware images without a
//! descriptor are accepted too when a firmware volume can be located; they
//! carry a single BIOS region spanning the whole input.
//!
//! ## License
//!
//! Copyright (C) Microsoft Corporation.
//!
//! SPDX-License-Identifier: Apache-2.0
//!

use core::ptr;

use fwtree_pi::flash::{
    DescriptorMap, FlashRegion, RegionKind, RegionSection, DESCRIPTOR_LENGTH, DESCRIPTOR_MAP_SIZE,
    FLASH_SIGNATURE, REGION_SECTION_SIZE, SIGNATURE_OFFSET,
};

use crate::bios::BiosRegion;
use crate::buffer::Buffer;
use crate::err::FirmwareError;
use crate::section::SectionCodec;
use crate::visitor::{Firmware, Visitor};
use crate::volume::find_firmware_volume;

/// Locate the flash descriptor signature. Returns the offset of the
/// descriptor map following it: the signature sits at offset 0x10 in
/// descriptor-mode images, or at offset 0 when the image begins with the
/// map itself.
pub fn find_flash_signature(data: &[u8]) -> Option<usize> {
    let word = |offset: usize| {
        data.get(offset..offset + 4)
            .map(|bytes| u32::from_le_bytes(bytes.try_into().unwrap()))
    };
    if word(SIGNATURE_OFFSET) == Some(FLASH_SIGNATURE) {
        return Some(SIGNATURE_OFFSET + 4);
    }
    if word(0) == Some(FLASH_SIGNATURE) {
        return Some(4);
    }
    None
}

/// The flash descriptor node: the first 4 KiB of the image, plus the parsed
/// region table.
#[derive(Debug)]
pub struct FlashDescriptor {
    map: DescriptorMap,
    region_section: RegionSection,
    buf: Buffer,
}

impl FlashDescriptor {
    pub fn parse(buf: Buffer) -> Result<Self, FirmwareError> {
        let (map, region_section) = Self::parse_fields(buf.as_slice())?;
        Ok(FlashDescriptor { map, region_section, buf })
    }

    fn parse_fields(data: &[u8]) -> Result<(DescriptorMap, RegionSection), FirmwareError> {
        if data.len() < DESCRIPTOR_LENGTH {
            return Err(FirmwareError::ShortBuffer {
                what: "flash descriptor",
                need: DESCRIPTOR_LENGTH,
                have: data.len(),
            });
        }
        let map_offset = find_flash_signature(data)
            .ok_or(FirmwareError::BadSignature { what: "flash descriptor", offset: SIGNATURE_OFFSET })?;
        if data.len() < map_offset + DESCRIPTOR_MAP_SIZE {
            return Err(FirmwareError::ShortBuffer {
                what: "descriptor map",
                need: map_offset + DESCRIPTOR_MAP_SIZE,
                have: data.len(),
            });
        }
        // Safety: bounds checked above; DescriptorMap is eight u8 fields.
        let map = unsafe { ptr::read_unaligned(data[map_offset..].as_ptr() as *const DescriptorMap) };

        let frba = map.region_base as usize * 0x10;
        if data.len() < frba + REGION_SECTION_SIZE {
            return Err(FirmwareError::ShortBuffer {
                what: "flash region table",
                need: frba + REGION_SECTION_SIZE,
                have: data.len(),
            });
        }
        // Safety: bounds checked above; RegionSection is repr(C) over u16 pairs.
        let region_section = unsafe { ptr::read_unaligned(data[frba..].as_ptr() as *const RegionSection) };
        Ok((map, region_section))
    }

    /// Refresh the parsed tables from the backing buffer, picking up edits
    /// made directly to the descriptor bytes.
    pub fn reparse(&mut self) -> Result<(), FirmwareError> {
        let (map, region_section) = Self::parse_fields(self.buf.as_slice())?;
        self.map = map;
        self.region_section = region_section;
        Ok(())
    }

    pub fn descriptor_map(&self) -> &DescriptorMap {
        &self.map
    }

    /// The region table entry for a region kind.
    pub fn region(&self, kind: RegionKind) -> FlashRegion {
        self.region_section.region(kind)
    }
}

impl Firmware for FlashDescriptor {
    fn buf(&self) -> &[u8] {
        self.buf.as_slice()
    }

    fn set_buf(&mut self, buf: Buffer) {
        self.buf = buf;
    }

    fn apply<V: Visitor + ?Sized>(&mut self, v: &mut V) -> Result<(), FirmwareError> {
        v.visit_descriptor(self)
    }

    fn apply_children<V: Visitor + ?Sized>(&mut self, _v: &mut V) -> Result<(), FirmwareError> {
        Ok(())
    }
}

/// An opaque region (ME, GBE, PD) carried through verbatim.
#[derive(Debug)]
pub struct RawRegion {
    kind: RegionKind,
    buf: Buffer,
}

impl RawRegion {
    pub fn kind(&self) -> RegionKind {
        self.kind
    }
}

impl Firmware for RawRegion {
    fn buf(&self) -> &[u8] {
        self.buf.as_slice()
    }

    fn set_buf(&mut self, buf: Buffer) {
        self.buf = buf;
    }

    fn apply<V: Visitor + ?Sized>(&mut self, v: &mut V) -> Result<(), FirmwareError> {
        v.visit_raw_region(self)
    }

    fn apply_children<V: Visitor + ?Sized>(&mut self, _v: &mut V) -> Result<(), FirmwareError> {
        Ok(())
    }
}

/// The root node of a parsed flash image.
#[derive(Debug)]
pub struct FlashImage {
    descriptor: Option<FlashDescriptor>,
    bios: Option<BiosRegion>,
    me: Option<RawRegion>,
    gbe: Option<RawRegion>,
    pd: Option<RawRegion>,
    buf: Buffer,
}

impl FlashImage {
    /// Parse a full flash image (or a bare BIOS image without a descriptor).
    pub fn parse(data: Vec<u8>, codec: &dyn SectionCodec) -> Result<Self, FirmwareError> {
        let buf = Buffer::root(data);

        if find_flash_signature(buf.as_slice()).is_none() {
            // No descriptor; accept the input as one big BIOS region if it
            // contains a firmware volume at all.
            if find_firmware_volume(buf.as_slice()).is_none() {
                return Err(FirmwareError::BadSignature {
                    what: "flash descriptor or firmware volume",
                    offset: 0,
                });
            }
            let bios = BiosRegion::parse(buf.view(0, buf.len())?, codec)?;
            return Ok(FlashImage { descriptor: None, bios: Some(bios), me: None, gbe: None, pd: None, buf });
        }

        let descriptor = FlashDescriptor::parse(buf.view(0, DESCRIPTOR_LENGTH)?)?;

        let slice_region = |kind: RegionKind| -> Result<Option<Buffer>, FirmwareError> {
            let region = descriptor.region(kind);
            if !region.valid() {
                return Ok(None);
            }
            let (start, end) = (region.base_offset() as usize, region.end_offset() as usize);
            if end > buf.len() {
                return Err(FirmwareError::ShortBuffer { what: kind.name(), need: end, have: buf.len() });
            }
            Ok(Some(buf.view(start, end)?))
        };

        let bios_buf = slice_region(RegionKind::Bios)?.ok_or_else(|| {
            FirmwareError::invariant(
                "flash image",
                format!("no BIOS region: invalid region parameters {:?}", descriptor.region(RegionKind::Bios)),
            )
        })?;
        let bios = BiosRegion::parse(bios_buf, codec)?;

        let me = slice_region(RegionKind::Me)?.map(|buf| RawRegion { kind: RegionKind::Me, buf });
        let gbe = slice_region(RegionKind::Gbe)?.map(|buf| RawRegion { kind: RegionKind::Gbe, buf });
        let pd = slice_region(RegionKind::Pd)?.map(|buf| RawRegion { kind: RegionKind::Pd, buf });

        Ok(FlashImage { descriptor: Some(descriptor), bios: Some(bios), me, gbe, pd, buf })
    }

    pub fn descriptor(&self) -> Option<&FlashDescriptor> {
        self.descriptor.as_ref()
    }

    pub fn bios(&self) -> Option<&BiosRegion> {
        self.bios.as_ref()
    }

    pub fn bios_mut(&mut self) -> Option<&mut BiosRegion> {
        self.bios.as_mut()
    }

    /// The opaque region node of the given kind, if present in the tree.
    pub fn raw_region(&self, kind: RegionKind) -> Option<&RawRegion> {
        match kind {
            RegionKind::Bios => None,
            RegionKind::Me => self.me.as_ref(),
            RegionKind::Gbe => self.gbe.as_ref(),
            RegionKind::Pd => self.pd.as_ref(),
        }
    }
}

impl Firmware for FlashImage {
    fn buf(&self) -> &[u8] {
        self.buf.as_slice()
    }

    fn set_buf(&mut self, buf: Buffer) {
        self.buf = buf;
    }

    fn apply<V: Visitor + ?Sized>(&mut self, v: &mut V) -> Result<(), FirmwareError> {
        v.visit_image(self)
    }

    fn apply_children<V: Visitor + ?Sized>(&mut self, v: &mut V) -> Result<(), FirmwareError> {
        if let Some(descriptor) = self.descriptor.as_mut() {
            descriptor.apply(v)?;
        }
        if let Some(bios) = self.bios.as_mut() {
            bios.apply(v)?;
        }
        if let Some(me) = self.me.as_mut() {
            me.apply(v)?;
        }
        if let Some(gbe) = self.gbe.as_mut() {
            gbe.apply(v)?;
        }
        if let Some(pd) = self.pd.as_mut() {
            pd.apply(v)?;
        }
        Ok(())
    }
}


#[cfg(test)]
mod test {
    use super::testutil::build_descriptor;
    use super::*;
    use crate::section::NullCodec;
    use crate::volume::testutil::build_fv;

    #[test]
    fn descriptor_parses_region_table() {
        let data = build_descriptor(
            FlashRegion { base: 1, limit: 2 },
            Some(FlashRegion { base: 3, limit: 3 }),
        );
        let descriptor = FlashDescriptor::parse(Buffer::root(data)).unwrap();
        assert_eq!(descriptor.region(RegionKind::Bios), FlashRegion { base: 1, limit: 2 });
        assert!(descriptor.region(RegionKind::Bios).valid());
        assert_eq!(descriptor.region(RegionKind::Me), FlashRegion { base: 3, limit: 3 });
        assert!(!descriptor.region(RegionKind::Gbe).valid());
    }

    #[test]
    fn missing_descriptor_signature_is_fatal() {
        assert!(matches!(
            FlashDescriptor::parse(Buffer::root(vec![0u8; DESCRIPTOR_LENGTH])),
            Err(FirmwareError::BadSignature { .. })
        ));
    }

    #[test]
    fn image_with_descriptor_slices_regions() {
        // pages: 0 descriptor, 1-2 BIOS, 3 ME
        let mut data = build_descriptor(
            FlashRegion { base: 1, limit: 2 },
            Some(FlashRegion { base: 3, limit: 3 }),
        );
        data.extend_from_slice(&build_fv(0x2000, 0x1000, &[]));
        data.extend_from_slice(&[0xA5u8; 0x1000]); // ME contents
        let image = FlashImage::parse(data, &NullCodec).unwrap();
        assert!(image.descriptor().is_some());
        let bios = image.bios().unwrap();
        assert_eq!(bios.length(), 0x2000);
        assert_eq!(bios.volumes().count(), 1);
        let me = image.raw_region(RegionKind::Me).unwrap();
        assert_eq!(me.buf().len(), 0x1000);
        assert!(me.buf().iter().all(|&b| b == 0xA5));
        assert!(image.raw_region(RegionKind::Gbe).is_none());
    }

    #[test]
    fn bare_volume_image_parses_without_descriptor() {
        let image = FlashImage::parse(build_fv(0x1000, 0x1000, &[]), &NullCodec).unwrap();
        assert!(image.descriptor().is_none());
        assert_eq!(image.bios().unwrap().volumes().count(), 1);
    }

    #[test]
    fn garbage_input_is_rejected() {
        assert!(matches!(
            FlashImage::parse(vec![0x5Au8; 0x2000], &NullCodec),
            Err(FirmwareError::BadSignature { .. })
        ));
    }

    #[test]
    fn image_too_small_for_declared_region_is_fatal() {
        // BIOS region claims pages 1..=4 but the image ends after page 1
        let mut data = build_descriptor(FlashRegion { base: 1, limit: 4 }, None);
        data.extend_from_slice(&build_fv(0x1000, 0x1000, &[]));
        assert!(matches!(
            FlashImage::parse(data, &NullCodec),
            Err(FirmwareError::ShortBuffer { .. })
        ));
    }
}
