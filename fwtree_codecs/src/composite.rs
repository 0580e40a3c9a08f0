//! A codec chain covering every supported GUID.
//!
//! ## License
//!
//! Copyright (C) Microsoft Corporation.
//!
//! SPDX-License-Identifier: Apache-2.0
//!

use fwtree::section::SectionCodec;
use fwtree::FirmwareError;
use r_efi::efi;

use crate::{LzmaCodec, LzmaF86Codec};

/// Dispatches to the first codec that claims the GUID; unclaimed GUIDs
/// surface as `UnknownRequiredCodec`.
#[derive(Default, Clone, Copy)]
pub struct CompositeCodec {
    lzma: LzmaCodec,
    lzma_f86: LzmaF86Codec,
}

impl CompositeCodec {
    fn chain<T>(
        &self,
        mut op: impl FnMut(&dyn SectionCodec) -> Result<T, FirmwareError>,
    ) -> Result<T, FirmwareError> {
        match op(&self.lzma) {
            Err(FirmwareError::UnknownRequiredCodec { .. }) => op(&self.lzma_f86),
            result => result,
        }
    }
}

impl SectionCodec for CompositeCodec {
    fn decode(&self, guid: &efi::Guid, data: &[u8]) -> Result<Vec<u8>, FirmwareError> {
        self.chain(|codec| codec.decode(guid, data))
    }

    fn encode(&self, guid: &efi::Guid, data: &[u8]) -> Result<Vec<u8>, FirmwareError> {
        self.chain(|codec| codec.encode(guid, data))
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use fwtree_pi::fw_fs::guid::{LZMA_F86_SECTION_GUID, LZMA_SECTION_GUID, NVRAM_NVAR_GUID};

    #[test]
    fn dispatches_by_guid() {
        let codec = CompositeCodec::default();
        let data = b"some section content here".repeat(8);

        let plain = codec.encode(&LZMA_SECTION_GUID, &data).unwrap();
        assert_eq!(codec.decode(&LZMA_SECTION_GUID, &plain).unwrap(), data);

        let filtered = codec.encode(&LZMA_F86_SECTION_GUID, &data).unwrap();
        assert_eq!(codec.decode(&LZMA_F86_SECTION_GUID, &filtered).unwrap(), data);

        assert!(matches!(
            codec.decode(&NVRAM_NVAR_GUID, &data),
            Err(FirmwareError::UnknownRequiredCodec { .. })
        ));
    }
}
