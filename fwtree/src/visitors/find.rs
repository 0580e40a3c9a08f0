//! Locate firmware files by name GUID.
//!
//! ## License
//!
//! Copyright (C) Microsoft Corporation.
//!
//! SPDX-License-Identifier: Apache-2.0
//!

use r_efi::efi;

use crate::err::FirmwareError;
use crate::file::File;
use crate::visitor::{Firmware, Visitor};

/// A match produced by [`Find`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileMatch {
    pub guid: efi::Guid,
    pub file_type: u8,
    pub size: usize,
}

/// Collects every file whose name GUID equals the target, across all
/// volumes of the tree.
pub struct Find {
    target: efi::Guid,
    matches: Vec<FileMatch>,
}

impl Find {
    pub fn new(target: efi::Guid) -> Self {
        Find { target, matches: Vec::new() }
    }

    pub fn run<F: Firmware>(&mut self, node: &mut F) -> Result<(), FirmwareError> {
        node.apply(self)
    }

    pub fn matches(&self) -> &[FileMatch] {
        &self.matches
    }
}

impl Visitor for Find {
    fn visit_file(&mut self, file: &mut File) -> Result<(), FirmwareError> {
        if file.name() == self.target {
            self.matches.push(FileMatch { guid: file.name(), file_type: file.file_type(), size: file.size() });
        }
        file.apply_children(self)
    }
}
