//! LZMA codec for GUID-defined sections.
//!
//! ## License
//!
//! Copyright (C) Microsoft Corporation.
//!
//! SPDX-License-Identifier: Apache-2.0
//!

use std::io::Cursor;

use fwtree::base::guid_string;
use fwtree::section::SectionCodec;
use fwtree::FirmwareError;
use fwtree_pi::fw_fs::guid::LZMA_SECTION_GUID;
use r_efi::efi;

/// Magic value in the LZMA stream header for "unpacked size unknown".
const LZMA_UNKNOWN_UNPACKED_SIZE: u64 = u64::MAX;

/// Size of the LZMA stream header: properties byte, dictionary size,
/// unpacked size.
const LZMA_HEADER_SIZE: usize = 13;

pub(crate) fn lzma_decode(data: &[u8]) -> Result<Vec<u8>, FirmwareError> {
    if data.len() < LZMA_HEADER_SIZE {
        return Err(FirmwareError::ShortBuffer { what: "lzma header", need: LZMA_HEADER_SIZE, have: data.len() });
    }
    // Pre-size the output from the unpacked size in the header, when known.
    let unpacked_size = u64::from_le_bytes(data[5..13].try_into().unwrap());
    let mut decompressed = if unpacked_size == LZMA_UNKNOWN_UNPACKED_SIZE {
        Vec::new()
    } else {
        Vec::with_capacity(unpacked_size as usize)
    };
    lzma_rs::lzma_decompress(&mut Cursor::new(data), &mut decompressed)
        .map_err(|err| FirmwareError::Codec { what: "lzma", detail: format!("{err:?}") })?;
    Ok(decompressed)
}

pub(crate) fn lzma_encode(data: &[u8]) -> Result<Vec<u8>, FirmwareError> {
    let options = lzma_rs::compress::Options {
        unpacked_size: lzma_rs::compress::UnpackedSize::WriteToHeader(Some(data.len() as u64)),
    };
    let mut compressed = Vec::new();
    lzma_rs::lzma_compress_with_options(&mut Cursor::new(data), &mut compressed, &options)
        .map_err(|err| FirmwareError::Codec { what: "lzma", detail: format!("{err}") })?;
    Ok(compressed)
}

/// Codec for plain LZMA GUID-defined sections.
#[derive(Default, Clone, Copy)]
pub struct LzmaCodec;

impl SectionCodec for LzmaCodec {
    fn decode(&self, guid: &efi::Guid, data: &[u8]) -> Result<Vec<u8>, FirmwareError> {
        if *guid != LZMA_SECTION_GUID {
            return Err(FirmwareError::UnknownRequiredCodec { guid: guid_string(guid) });
        }
        lzma_decode(data)
    }

    fn encode(&self, guid: &efi::Guid, data: &[u8]) -> Result<Vec<u8>, FirmwareError> {
        if *guid != LZMA_SECTION_GUID {
            return Err(FirmwareError::UnknownRequiredCodec { guid: guid_string(guid) });
        }
        lzma_encode(data)
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use fwtree_pi::fw_fs::guid::LZMA_F86_SECTION_GUID;

    #[test]
    fn round_trip() {
        let codec = LzmaCodec;
        let data = b"firmware volumes all the way down".repeat(64);
        let packed = codec.encode(&LZMA_SECTION_GUID, &data).unwrap();
        assert_ne!(packed, data);
        let unpacked = codec.decode(&LZMA_SECTION_GUID, &packed).unwrap();
        assert_eq!(unpacked, data);
    }

    #[test]
    fn foreign_guid_is_declined() {
        let codec = LzmaCodec;
        assert!(matches!(
            codec.decode(&LZMA_F86_SECTION_GUID, &[0u8; 16]),
            Err(FirmwareError::UnknownRequiredCodec { .. })
        ));
    }

    #[test]
    fn truncated_stream_is_a_codec_failure() {
        let codec = LzmaCodec;
        assert!(matches!(
            codec.decode(&LZMA_SECTION_GUID, &[0u8; 8]),
            Err(FirmwareError::ShortBuffer { .. })
        ));
    }
}
