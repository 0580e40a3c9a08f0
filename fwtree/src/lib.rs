//! Parsing, editing, and reassembly of UEFI flash images as a typed tree.
//!
//! A flash image decomposes into labelled regions per the Intel Flash
//! Descriptor; the BIOS region contains firmware volumes; volumes contain
//! firmware files; files contain sections, which may encapsulate further
//! sections behind GUID-selected compression. This crate parses that layout
//! into a tree of typed nodes, lets callers mutate the tree, and reassembles
//! a bootable bit-image: volume lengths re-aligned to block boundaries, pad
//! files inserted to satisfy file data alignment, checksums recomputed, holes
//! refilled with the volume erase polarity, and compressed payloads
//! re-encoded through pluggable [`section::SectionCodec`]s.
//!
//! Parsing is zero-copy where possible: node buffers are views into the
//! input arena until the assembler replaces them with freshly built bytes.
//!
//! ## License
//!
//! Copyright (C) Microsoft Corporation.
//!
//! SPDX-License-Identifier: Apache-2.0
//!

pub mod base;
pub mod bios;
pub mod buffer;
pub mod err;
pub mod file;
pub mod image;
pub mod section;
pub mod visitor;
pub mod visitors;
pub mod volume;

pub use buffer::Buffer;
pub use err::FirmwareError;
pub use visitor::{Firmware, Visitor};
