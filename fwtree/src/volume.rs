//! Firmware Volume (FV) parsing.
//!
//! A volume is self-describing: a 56-byte fixed header, a block map
//! terminated by a zero entry, an optional extended header, and a packed
//! run of firmware files starting at the 8-byte-aligned end of the block
//! map. The volume's attributes carry the erase polarity that governs every
//! hole and state byte beneath it.
//!
//! ## License
//!
//! Copyright (C) Microsoft Corporation.
//!
//! SPDX-License-Identifier: Apache-2.0
//!

use core::ptr;

use fwtree_pi::fw_fs::{fv, fvb, guid};
use r_efi::efi;

use crate::base::{align8, checksum16, guid_string};
use crate::buffer::Buffer;
use crate::err::FirmwareError;
use crate::file::File;
use crate::section::SectionCodec;
use crate::visitor::{Firmware, Visitor};

/// Scan for the `_FVH` signature at 8-byte strides starting from offset 32.
///
/// The volume header starts 40 bytes before the signature; returns the
/// header offset of the first volume found.
pub fn find_firmware_volume(data: &[u8]) -> Option<usize> {
    if data.len() < 32 {
        return None;
    }
    let mut offset = 32;
    while offset + 4 <= data.len() {
        if &data[offset..offset + 4] == b"_FVH" && offset >= fv::offset::SIGNATURE {
            return Some(offset - fv::offset::SIGNATURE);
        }
        offset += 8;
    }
    None
}

/// A firmware volume node.
#[derive(Debug)]
pub struct FirmwareVolume {
    header: fv::Header,
    blocks: Vec<fv::BlockMapEntry>,
    ext_header: Option<fv::ExtHeader>,
    fs_label: &'static str,
    data_offset: u64,
    checksum_ok: bool,
    files: Vec<File>,
    buf: Buffer,
}

impl FirmwareVolume {
    /// Parse a volume from the start of `buf`, which may extend past the
    /// volume; the volume limits itself to its declared length.
    pub fn parse(buf: Buffer, codec: &dyn SectionCodec) -> Result<Self, FirmwareError> {
        let data = buf.as_slice();
        if data.len() < fv::MIN_SIZE {
            return Err(FirmwareError::ShortBuffer {
                what: "firmware volume header",
                need: fv::MIN_SIZE,
                have: data.len(),
            });
        }
        // Safety: bounds checked above; Header is repr(C) matching the on-flash layout.
        let header = unsafe { ptr::read_unaligned(data.as_ptr() as *const fv::Header) };

        if header.signature != fv::SIGNATURE {
            return Err(FirmwareError::BadSignature { what: "_FVH", offset: fv::offset::SIGNATURE });
        }
        if header.fv_length < fv::MIN_SIZE as u64 {
            return Err(FirmwareError::invariant(
                "firmware volume",
                format!("declared length {:#x} smaller than the minimum header", header.fv_length),
            ));
        }
        if header.fv_length > data.len() as u64 {
            return Err(FirmwareError::ShortBuffer {
                what: "firmware volume",
                need: header.fv_length as usize,
                have: data.len(),
            });
        }
        let length = header.fv_length as usize;

        // block map, terminated by a (0, 0) entry
        let mut blocks = Vec::new();
        let mut offset = fv::FIXED_HEADER_SIZE;
        loop {
            if offset + 8 > length {
                return Err(FirmwareError::ShortBuffer { what: "block map", need: offset + 8, have: length });
            }
            let num_blocks = u32::from_le_bytes(data[offset..offset + 4].try_into().unwrap());
            let block_length = u32::from_le_bytes(data[offset + 4..offset + 8].try_into().unwrap());
            offset += 8;
            if num_blocks == 0 && block_length == 0 {
                break;
            }
            blocks.push(fv::BlockMapEntry { num_blocks, length: block_length });
        }
        let header_end = offset as u64;

        // Stored checksum is advisory at parse time; the assembler always
        // recomputes it.
        let header_len = header.header_length as usize;
        let checksum_ok = if header_len >= fv::FIXED_HEADER_SIZE && header_len <= length && header_len % 2 == 0 {
            match checksum16(&data[..header_len])? {
                0 => true,
                sum => {
                    log::warn!(
                        "firmware volume {}: {}",
                        guid_string(&header.file_system_guid),
                        FirmwareError::BadChecksum { what: "volume header", sum }
                    );
                    false
                }
            }
        } else {
            log::warn!("firmware volume header length {header_len:#x} is implausible");
            false
        };

        let ext_header = if header.ext_header_offset != 0
            && (header.ext_header_offset as u64) < header.fv_length.saturating_sub(fv::EXT_HEADER_SIZE as u64)
        {
            let ext_offset = header.ext_header_offset as usize;
            // Safety: offset + EXT_HEADER_SIZE is inside the buffer per the check above.
            Some(unsafe { ptr::read_unaligned(data[ext_offset..].as_ptr() as *const fv::ExtHeader) })
        } else {
            None
        };

        let fs_label = match guid::filesystem_label(&header.file_system_guid) {
            Some(label) => label,
            None => {
                log::debug!("unknown filesystem guid {}", guid_string(&header.file_system_guid));
                "Unknown"
            }
        };

        let data_offset = align8(header_end);
        let erase_byte = if header.attributes & fvb::raw::fvb2::ERASE_POLARITY != 0 { 0xFF } else { 0x00 };

        let limited = buf.view(0, length)?;
        let mut files = Vec::new();
        {
            let bytes = limited.as_slice();
            let mut offset = data_offset as usize;
            loop {
                if offset + fwtree_pi::fw_fs::ffs::file::HEADER_SIZE > length {
                    break;
                }
                // the walk ends at the first fully erased header slot
                if bytes[offset..offset + fwtree_pi::fw_fs::ffs::file::HEADER_SIZE]
                    .iter()
                    .all(|&b| b == erase_byte)
                {
                    break;
                }
                let file = File::parse(limited.view(offset, length)?, erase_byte, codec)?;
                if !file.state_valid() {
                    log::warn!(
                        "file {} at {offset:#x} is not in a valid state, stopping the file walk",
                        guid_string(&file.name())
                    );
                    break;
                }
                let size = file.size();
                files.push(file);
                offset = align8((offset + size) as u64) as usize;
            }
        }

        Ok(FirmwareVolume {
            header,
            blocks,
            ext_header,
            fs_label,
            data_offset,
            checksum_ok,
            files,
            buf: limited,
        })
    }

    /// Declared total length of the volume.
    pub fn length(&self) -> u64 {
        self.header.fv_length
    }

    /// The FVB2 attributes field.
    pub fn attributes(&self) -> fvb::EfiFvbAttributes2 {
        self.header.attributes
    }

    /// Header length, block map included.
    pub fn header_len(&self) -> usize {
        self.header.header_length as usize
    }

    /// Offset where the packed file run begins.
    pub fn data_offset(&self) -> u64 {
        self.data_offset
    }

    /// The erased-cell value for this volume: 0xFF when the erase polarity
    /// attribute is set, 0x00 otherwise.
    pub fn erase_byte(&self) -> u8 {
        if self.header.attributes & fvb::raw::fvb2::ERASE_POLARITY != 0 {
            0xFF
        } else {
            0x00
        }
    }

    /// The filesystem GUID from the header.
    pub fn file_system_guid(&self) -> efi::Guid {
        self.header.file_system_guid
    }

    /// Human label for the filesystem GUID; "Unknown" for unrecognized ones.
    pub fn fs_label(&self) -> &'static str {
        self.fs_label
    }

    /// The volume name GUID from the extended header, if present.
    pub fn fv_name(&self) -> Option<efi::Guid> {
        self.ext_header.map(|ext| ext.fv_name)
    }

    /// Whether the stored header checksum matched at parse time.
    pub fn checksum_ok(&self) -> bool {
        self.checksum_ok
    }

    pub fn blocks(&self) -> &[fv::BlockMapEntry] {
        &self.blocks
    }

    pub fn files(&self) -> &[File] {
        &self.files
    }

    pub fn files_mut(&mut self) -> &mut Vec<File> {
        &mut self.files
    }

    /// Update the declared length and first-block count after a resize.
    pub(crate) fn set_geometry(&mut self, length: u64, first_block_count: u32) {
        self.header.fv_length = length;
        if let Some(first) = self.blocks.first_mut() {
            first.num_blocks = first_block_count;
        }
    }

    pub(crate) fn set_checksum(&mut self, checksum: u16) {
        self.header.checksum = checksum;
        self.checksum_ok = true;
    }
}

impl Firmware for FirmwareVolume {
    fn buf(&self) -> &[u8] {
        self.buf.as_slice()
    }

    fn set_buf(&mut self, buf: Buffer) {
        self.buf = buf;
    }

    fn apply<V: Visitor + ?Sized>(&mut self, v: &mut V) -> Result<(), FirmwareError> {
        v.visit_volume(self)
    }

    fn apply_children<V: Visitor + ?Sized>(&mut self, v: &mut V) -> Result<(), FirmwareError> {
        for file in self.files.iter_mut() {
            file.apply(v)?;
        }
        Ok(())
    }
}


#[cfg(test)]
mod test {
    use super::testutil::build_fv;
    use super::*;
    use crate::section::NullCodec;
    use fwtree_pi::fw_fs::ffs::file;

    #[test]
    fn find_signature_locates_the_header() {
        let image = build_fv(0x1000, 0x1000, &[]);
        assert_eq!(find_firmware_volume(&image), Some(0));

        let mut shifted = vec![0u8; 0x200];
        shifted.extend_from_slice(&image);
        assert_eq!(find_firmware_volume(&shifted), Some(0x200));

        assert_eq!(find_firmware_volume(&[0u8; 0x100]), None);
        assert_eq!(find_firmware_volume(&[0u8; 8]), None);
    }

    #[test]
    fn minimal_volume_parses() {
        let image = build_fv(0x1000, 0x1000, &[]);
        let volume = FirmwareVolume::parse(Buffer::root(image), &NullCodec).unwrap();
        assert_eq!(volume.length(), 0x1000);
        assert_eq!(volume.fs_label(), "FFS2");
        assert_eq!(volume.erase_byte(), 0xFF);
        assert!(volume.checksum_ok());
        assert_eq!(volume.blocks(), &[fv::BlockMapEntry { num_blocks: 1, length: 0x1000 }]);
        assert_eq!(volume.data_offset(), 72);
        assert!(volume.files().is_empty());
    }

    #[test]
    fn volume_with_files_walks_them() {
        let pad = File::new_pad(0x28, 0xFF).unwrap();
        let pad2 = File::new_pad(0x30, 0xFF).unwrap();
        let image = build_fv(0x1000, 0x1000, &[pad.buf(), pad2.buf()]);
        let volume = FirmwareVolume::parse(Buffer::root(image), &NullCodec).unwrap();
        assert_eq!(volume.files().len(), 2);
        assert_eq!(volume.files()[0].size(), 0x28);
        assert_eq!(volume.files()[1].file_type(), file::raw::r#type::FFS_PAD);
    }

    #[test]
    fn bad_signature_is_fatal() {
        let mut image = build_fv(0x1000, 0x1000, &[]);
        image[fv::offset::SIGNATURE] ^= 0xFF;
        assert!(matches!(
            FirmwareVolume::parse(Buffer::root(image), &NullCodec),
            Err(FirmwareError::BadSignature { .. })
        ));
    }

    #[test]
    fn truncated_volume_is_fatal() {
        let image = build_fv(0x1000, 0x1000, &[]);
        assert!(matches!(
            FirmwareVolume::parse(Buffer::root(image[..0x800].to_vec()), &NullCodec),
            Err(FirmwareError::ShortBuffer { .. })
        ));
    }

    #[test]
    fn checksum_mismatch_is_a_recorded_warning() {
        let mut image = build_fv(0x1000, 0x1000, &[]);
        image[fv::offset::CHECKSUM] ^= 0x5A;
        let volume = FirmwareVolume::parse(Buffer::root(image), &NullCodec).unwrap();
        assert!(!volume.checksum_ok());
    }
}
