//! Render the firmware tree as a JSON manifest.
//!
//! The manifest echoes the parsed header fields of every node: kinds,
//! GUIDs, sizes, types, labels. It is the input to external tree
//! serialisers; payload bytes themselves stay out of it.
//!
//! ## License
//!
//! Copyright (C) Microsoft Corporation.
//!
//! SPDX-License-Identifier: Apache-2.0
//!

use serde_json::{json, Value};

use fwtree_pi::flash::RegionKind;

use crate::base::guid_string;
use crate::bios::{BiosPadding, BiosRegion};
use crate::err::FirmwareError;
use crate::file::File;
use crate::image::{FlashDescriptor, FlashImage, RawRegion};
use crate::section::Section;
use crate::visitor::{Firmware, Visitor};
use crate::volume::FirmwareVolume;

/// Read-only walk producing a `serde_json::Value` per node, children
/// nested under `"children"`.
pub struct Manifest {
    stack: Vec<Vec<Value>>,
}

impl Manifest {
    /// Render a subtree rooted at `node`.
    pub fn render<F: Firmware>(node: &mut F) -> Result<Value, FirmwareError> {
        let mut manifest = Manifest { stack: vec![Vec::new()] };
        node.apply(&mut manifest)?;
        let mut top = manifest.stack.pop().expect("manifest stack underflow");
        Ok(top.pop().unwrap_or(Value::Null))
    }

    fn children<F: Firmware>(&mut self, node: &mut F) -> Result<Vec<Value>, FirmwareError> {
        self.stack.push(Vec::new());
        node.apply_children(self)?;
        Ok(self.stack.pop().expect("manifest stack underflow"))
    }

    fn emit(&mut self, value: Value) {
        self.stack.last_mut().expect("manifest stack underflow").push(value);
    }
}

impl Visitor for Manifest {
    fn visit_image(&mut self, image: &mut FlashImage) -> Result<(), FirmwareError> {
        let children = self.children(image)?;
        self.emit(json!({
            "kind": "FlashImage",
            "size": image.buf().len(),
            "children": children,
        }));
        Ok(())
    }

    fn visit_descriptor(&mut self, descriptor: &mut FlashDescriptor) -> Result<(), FirmwareError> {
        let mut regions = serde_json::Map::new();
        for kind in RegionKind::ALL {
            let region = descriptor.region(kind);
            regions.insert(
                kind.name().to_string(),
                json!({
                    "base": region.base,
                    "limit": region.limit,
                    "valid": region.valid(),
                }),
            );
        }
        self.emit(json!({
            "kind": "FlashDescriptor",
            "regions": regions,
        }));
        Ok(())
    }

    fn visit_bios(&mut self, bios: &mut BiosRegion) -> Result<(), FirmwareError> {
        let children = self.children(bios)?;
        self.emit(json!({
            "kind": "BIOSRegion",
            "length": bios.length(),
            "children": children,
        }));
        Ok(())
    }

    fn visit_raw_region(&mut self, region: &mut RawRegion) -> Result<(), FirmwareError> {
        self.emit(json!({
            "kind": format!("{}Region", region.kind().name()),
            "length": region.buf().len(),
        }));
        Ok(())
    }

    fn visit_padding(&mut self, padding: &mut BiosPadding) -> Result<(), FirmwareError> {
        self.emit(json!({
            "kind": "BIOSPadding",
            "offset": padding.offset(),
            "length": padding.buf().len(),
        }));
        Ok(())
    }

    fn visit_volume(&mut self, volume: &mut FirmwareVolume) -> Result<(), FirmwareError> {
        let children = self.children(volume)?;
        self.emit(json!({
            "kind": "FirmwareVolume",
            "fileSystemGuid": guid_string(&volume.file_system_guid()),
            "fileSystem": volume.fs_label(),
            "fvName": volume.fv_name().map(|guid| guid_string(&guid)),
            "length": volume.length(),
            "attributes": volume.attributes(),
            "erasePolarity": volume.erase_byte(),
            "children": children,
        }));
        Ok(())
    }

    fn visit_file(&mut self, file: &mut File) -> Result<(), FirmwareError> {
        let children = self.children(file)?;
        self.emit(json!({
            "kind": "File",
            "guid": guid_string(&file.name()),
            "type": file.file_type(),
            "attributes": file.attributes(),
            "size": file.size(),
            "children": children,
        }));
        Ok(())
    }

    fn visit_section(&mut self, section: &mut Section) -> Result<(), FirmwareError> {
        let children = self.children(section)?;
        self.emit(json!({
            "kind": "Section",
            "type": section.section_type(),
            "size": section.size(),
            "guid": section.guid_defined().map(|gd| guid_string(&gd.guid)),
            "children": children,
        }));
        Ok(())
    }
}
