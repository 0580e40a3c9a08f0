//! Section codec implementations.
//!
//! Each codec claims the GUID(s) it understands and reports
//! `UnknownRequiredCodec` for everything else, so codecs chain cleanly
//! through [`CompositeCodec`]. Parsing and assembly of firmware images go
//! through these for every GUID-defined section marked
//! `PROCESSING_REQUIRED`.
//!
//! ## License
//!
//! Copyright (C) Microsoft Corporation.
//!
//! SPDX-License-Identifier: Apache-2.0
//!

mod composite;
mod lzma;
mod lzma_f86;

pub use composite::CompositeCodec;
pub use lzma::LzmaCodec;
pub use lzma_f86::{x86_convert, LzmaF86Codec};
