//! The BIOS region: an ordered run of firmware volumes with padding between
//! and after them.
//!
//! ## License
//!
//! Copyright (C) Microsoft Corporation.
//!
//! SPDX-License-Identifier: Apache-2.0
//!

use crate::buffer::Buffer;
use crate::err::FirmwareError;
use crate::section::SectionCodec;
use crate::visitor::{Firmware, Visitor};
use crate::volume::{find_firmware_volume, FirmwareVolume};

/// Bytes between or after volumes inside the BIOS region, kept verbatim.
#[derive(Debug)]
pub struct BiosPadding {
    offset: u64,
    buf: Buffer,
}

impl BiosPadding {
    /// Offset of the padding within the BIOS region.
    pub fn offset(&self) -> u64 {
        self.offset
    }
}

impl Firmware for BiosPadding {
    fn buf(&self) -> &[u8] {
        self.buf.as_slice()
    }

    fn set_buf(&mut self, buf: Buffer) {
        self.buf = buf;
    }

    fn apply<V: Visitor + ?Sized>(&mut self, v: &mut V) -> Result<(), FirmwareError> {
        v.visit_padding(self)
    }

    fn apply_children<V: Visitor + ?Sized>(&mut self, _v: &mut V) -> Result<(), FirmwareError> {
        Ok(())
    }
}

/// One element of the BIOS region.
#[derive(Debug)]
pub enum BiosElement {
    Volume(FirmwareVolume),
    Padding(BiosPadding),
}

impl BiosElement {
    /// The element's backing bytes.
    pub fn bytes(&self) -> &[u8] {
        match self {
            BiosElement::Volume(volume) => volume.buf(),
            BiosElement::Padding(padding) => padding.buf(),
        }
    }
}

/// The BIOS region node.
#[derive(Debug)]
pub struct BiosRegion {
    length: u64,
    elements: Vec<BiosElement>,
    buf: Buffer,
}

impl BiosRegion {
    /// Parse the region as a run of firmware volumes, recording any bytes
    /// the volume scan skips as padding elements.
    pub fn parse(buf: Buffer, codec: &dyn SectionCodec) -> Result<Self, FirmwareError> {
        let length = buf.len() as u64;
        let len = buf.len();
        let mut elements = Vec::new();
        let mut offset = 0usize;
        while offset < len {
            let rel = find_firmware_volume(&buf.as_slice()[offset..]);
            match rel {
                None => {
                    // trailing bytes with no further volume
                    elements.push(BiosElement::Padding(BiosPadding {
                        offset: offset as u64,
                        buf: buf.view(offset, len)?,
                    }));
                    break;
                }
                Some(rel) => {
                    if rel > 0 {
                        elements.push(BiosElement::Padding(BiosPadding {
                            offset: offset as u64,
                            buf: buf.view(offset, offset + rel)?,
                        }));
                    }
                    let volume = FirmwareVolume::parse(buf.view(offset + rel, len)?, codec)?;
                    let advance = volume.length() as usize;
                    elements.push(BiosElement::Volume(volume));
                    offset += rel + advance;
                }
            }
        }
        Ok(BiosRegion { length, elements, buf })
    }

    /// Declared region length.
    pub fn length(&self) -> u64 {
        self.length
    }

    pub fn elements(&self) -> &[BiosElement] {
        &self.elements
    }

    pub fn elements_mut(&mut self) -> &mut Vec<BiosElement> {
        &mut self.elements
    }

    /// The first firmware volume in the region, which donates the erase
    /// polarity for region-level holes.
    pub fn first_volume(&self) -> Option<&FirmwareVolume> {
        self.elements.iter().find_map(|element| match element {
            BiosElement::Volume(volume) => Some(volume),
            BiosElement::Padding(_) => None,
        })
    }

    /// Iterate the contained volumes in order.
    pub fn volumes(&self) -> impl Iterator<Item = &FirmwareVolume> {
        self.elements.iter().filter_map(|element| match element {
            BiosElement::Volume(volume) => Some(volume),
            BiosElement::Padding(_) => None,
        })
    }
}

impl Firmware for BiosRegion {
    fn buf(&self) -> &[u8] {
        self.buf.as_slice()
    }

    fn set_buf(&mut self, buf: Buffer) {
        self.buf = buf;
    }

    fn apply<V: Visitor + ?Sized>(&mut self, v: &mut V) -> Result<(), FirmwareError> {
        v.visit_bios(self)
    }

    fn apply_children<V: Visitor + ?Sized>(&mut self, v: &mut V) -> Result<(), FirmwareError> {
        for element in self.elements.iter_mut() {
            match element {
                BiosElement::Volume(volume) => volume.apply(v)?,
                BiosElement::Padding(padding) => padding.apply(v)?,
            }
        }
        Ok(())
    }
}
