//! The traversal contract shared by every tree node.
//!
//! Nodes expose `apply` (dispatch the visitor on this node) and
//! `apply_children` (dispatch on each direct child in definition order). A
//! post-order pass, like the assembler, calls `apply_children` first from
//! inside its visit method and then operates on the node; pre-order passes
//! do the reverse. Visitor methods default to descending, so a visitor
//! implements only the node kinds it cares about.
//!
//! ## License
//!
//! Copyright (C) Microsoft Corporation.
//!
//! SPDX-License-Identifier: Apache-2.0
//!

use crate::bios::{BiosPadding, BiosRegion};
use crate::buffer::Buffer;
use crate::err::FirmwareError;
use crate::file::File;
use crate::image::{FlashDescriptor, FlashImage, RawRegion};
use crate::section::Section;
use crate::volume::FirmwareVolume;

/// A node in the firmware tree.
pub trait Firmware {
    /// The node's backing bytes: its on-flash image.
    fn buf(&self) -> &[u8];

    /// Replace the node's backing bytes.
    fn set_buf(&mut self, buf: Buffer);

    /// Invoke the visitor on this node.
    fn apply<V: Visitor + ?Sized>(&mut self, v: &mut V) -> Result<(), FirmwareError>;

    /// Invoke the visitor on each direct child in definition order.
    fn apply_children<V: Visitor + ?Sized>(&mut self, v: &mut V) -> Result<(), FirmwareError>;
}

/// A traversal over the firmware tree. Returning an error short-circuits
/// the walk.
pub trait Visitor {
    fn visit_image(&mut self, image: &mut FlashImage) -> Result<(), FirmwareError> {
        image.apply_children(self)
    }

    fn visit_descriptor(&mut self, descriptor: &mut FlashDescriptor) -> Result<(), FirmwareError> {
        descriptor.apply_children(self)
    }

    fn visit_bios(&mut self, bios: &mut BiosRegion) -> Result<(), FirmwareError> {
        bios.apply_children(self)
    }

    fn visit_raw_region(&mut self, region: &mut RawRegion) -> Result<(), FirmwareError> {
        region.apply_children(self)
    }

    fn visit_padding(&mut self, padding: &mut BiosPadding) -> Result<(), FirmwareError> {
        padding.apply_children(self)
    }

    fn visit_volume(&mut self, volume: &mut FirmwareVolume) -> Result<(), FirmwareError> {
        volume.apply_children(self)
    }

    fn visit_file(&mut self, file: &mut File) -> Result<(), FirmwareError> {
        file.apply_children(self)
    }

    fn visit_section(&mut self, section: &mut Section) -> Result<(), FirmwareError> {
        section.apply_children(self)
    }
}
