//! Raw on-flash structure definitions for UEFI platform firmware images.
//!
//! This crate holds the `repr(C)` header structures and constant tables that
//! describe how firmware is laid out on an SPI flash part: the firmware
//! storage structures from the UEFI Platform Initialization (PI)
//! Specification (firmware volumes, firmware files, sections) and the Intel
//! Flash Descriptor region table found at the start of the flash part.
//!
//! No parsing or serialization logic lives here; see the `fwtree` crate for
//! that. The split keeps the definitions usable from firmware-side code.
//!
//! ## License
//!
//! Copyright (C) Microsoft Corporation.
//!
//! SPDX-License-Identifier: Apache-2.0
//!
#![cfg_attr(not(test), no_std)]

pub mod flash;
pub mod fw_fs;
