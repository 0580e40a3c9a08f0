//! Error types for flash image parsing and assembly.
//!
//! ## License
//!
//! Copyright (C) Microsoft Corporation.
//!
//! SPDX-License-Identifier: Apache-2.0
//!

use core::fmt;

/// Error definitions for the firmware tree.
///
/// Variants carry enough context (structure name, offsets, GUID) to locate
/// the fault without a debugger. During parsing, checksum mismatches are
/// reported as warnings rather than through this type; during assembly every
/// error is fatal to the in-flight pass.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FirmwareError {
    /// A structural read ran past the end of the buffer.
    ShortBuffer { what: &'static str, need: usize, have: usize },
    /// An expected signature was not found.
    BadSignature { what: &'static str, offset: usize },
    /// A stored checksum does not match the computed one.
    BadChecksum { what: &'static str, sum: u16 },
    /// A GUID-defined section requires processing but no codec claims its
    /// GUID.
    UnknownRequiredCodec { guid: String },
    /// A structural invariant does not hold.
    Invariant { what: &'static str, detail: String },
    /// A compression codec rejected its input.
    Codec { what: &'static str, detail: String },
    /// A computed size does not fit its on-flash field.
    Oversize { what: &'static str, size: usize, max: usize },
}

impl FirmwareError {
    /// Shorthand for [`FirmwareError::Invariant`].
    pub fn invariant(what: &'static str, detail: impl Into<String>) -> Self {
        FirmwareError::Invariant { what, detail: detail.into() }
    }
}

impl fmt::Display for FirmwareError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FirmwareError::ShortBuffer { what, need, have } => {
                write!(f, "short buffer reading {what}: need {need} bytes, have {have}")
            }
            FirmwareError::BadSignature { what, offset } => {
                write!(f, "{what} signature not found at offset {offset:#x}")
            }
            FirmwareError::BadChecksum { what, sum } => {
                write!(f, "{what} checksum mismatch, residual sum {sum:#06x}")
            }
            FirmwareError::UnknownRequiredCodec { guid } => {
                write!(f, "guid-defined section {guid} requires processing by an unknown codec")
            }
            FirmwareError::Invariant { what, detail } => write!(f, "{what}: {detail}"),
            FirmwareError::Codec { what, detail } => write!(f, "{what} codec failure: {detail}"),
            FirmwareError::Oversize { what, size, max } => {
                write!(f, "{what} of {size:#x} bytes exceeds the field maximum {max:#x}")
            }
        }
    }
}

impl std::error::Error for FirmwareError {}
