//! Firmware File System (FFS) file parsing and reconstruction.
//!
//! The file state byte is stored XORed with the enclosing volume's erase
//! polarity, so a file cannot be interpreted without knowing which volume it
//! came from; the polarity is threaded in by the caller. Pad files (type
//! 0xF0) and raw files keep an opaque payload, every other type holds a
//! section list.
//!
//! ## License
//!
//! Copyright (C) Microsoft Corporation.
//!
//! SPDX-License-Identifier: Apache-2.0
//!

use core::{mem, ptr, slice};

use fwtree_pi::fw_fs::ffs::{attributes, file};
use r_efi::efi;

use crate::base::{align4, checksum8, guid_string};
use crate::buffer::Buffer;
use crate::err::FirmwareError;
use crate::section::{Section, SectionCodec};
use crate::visitor::{Firmware, Visitor};

/// A firmware file.
#[derive(Debug)]
pub struct File {
    header: file::Header,
    extended_size: Option<u64>,
    erase_polarity: u8,
    state_valid: bool,
    sections: Vec<Section>,
    buf: Buffer,
}

impl File {
    /// Parse a file from the start of `buf`, which may extend past the file;
    /// the file limits itself to its declared size. `erase_byte` is the
    /// enclosing volume's erased-cell value, needed to undo the state XOR.
    pub fn parse(buf: Buffer, erase_byte: u8, codec: &dyn SectionCodec) -> Result<Self, FirmwareError> {
        let data = buf.as_slice();
        if data.len() < file::HEADER_SIZE {
            return Err(FirmwareError::ShortBuffer { what: "file header", need: file::HEADER_SIZE, have: data.len() });
        }
        // Safety: bounds checked above; Header is repr(C) over a byte-array GUID and u8 fields.
        let header = unsafe { ptr::read_unaligned(data.as_ptr() as *const file::Header) };

        let (size, header_len, extended_size) = if header.attributes & attributes::raw::LARGE_FILE != 0 {
            if data.len() < file::HEADER2_SIZE {
                return Err(FirmwareError::ShortBuffer {
                    what: "large file header",
                    need: file::HEADER2_SIZE,
                    have: data.len(),
                });
            }
            // Safety: bounds checked above.
            let header2 = unsafe { ptr::read_unaligned(data.as_ptr() as *const file::Header2) };
            let size = usize::try_from(header2.extended_size).map_err(|_| {
                FirmwareError::invariant(
                    "file",
                    format!("file size {:#x} exceeds the address space", header2.extended_size),
                )
            })?;
            (size, file::HEADER2_SIZE, Some(header2.extended_size))
        } else {
            let size = u32::from_le_bytes([header.size[0], header.size[1], header.size[2], 0]) as usize;
            (size, file::HEADER_SIZE, None)
        };

        if size < header_len {
            return Err(FirmwareError::invariant(
                "file",
                format!("file {} declares size {size:#x}, smaller than its header", guid_string(&header.name)),
            ));
        }
        if size > data.len() {
            return Err(FirmwareError::ShortBuffer { what: "file contents", need: size, have: data.len() });
        }
        let limited = buf.view(0, size)?;
        let bytes = limited.as_slice();

        let logical_state = header.state ^ erase_byte;
        let state_valid = logical_state & file::raw::state::VALID == file::raw::state::VALID;

        // Header checksum covers the header with state and the file checksum
        // treated as zero; mismatches are recorded, not fatal (the assembler
        // recomputes them anyway).
        let sum = checksum8(&bytes[..header_len])
            .wrapping_sub(header.state)
            .wrapping_sub(header.integrity_check_file);
        if sum != 0 {
            log::warn!(
                "file {}: {}",
                guid_string(&header.name),
                FirmwareError::BadChecksum { what: "file header", sum: sum as u16 }
            );
        }
        if header.attributes & attributes::raw::CHECKSUM != 0 {
            let data_sum = checksum8(&bytes[header_len..]).wrapping_add(header.integrity_check_file);
            if data_sum != 0 {
                log::warn!(
                    "file {}: {}",
                    guid_string(&header.name),
                    FirmwareError::BadChecksum { what: "file data", sum: data_sum as u16 }
                );
            }
        } else if header.integrity_check_file != file::EMPTY_BODY_CHECKSUM {
            log::warn!(
                "file {} carries {:#04x} instead of the empty-body checksum",
                guid_string(&header.name),
                header.integrity_check_file
            );
        }

        let sections = match header.file_type {
            file::raw::r#type::FFS_PAD | file::raw::r#type::RAW => Vec::new(),
            _ if state_valid => Section::parse_list(&limited.view(header_len, size)?, codec)?,
            _ => Vec::new(),
        };

        Ok(File { header, extended_size, erase_polarity: erase_byte, state_valid, sections, buf: limited })
    }

    /// Create an empty file builder. Push sections into
    /// [`File::sections_mut`] and call [`File::rebuild`] (or run the
    /// assembler) to produce the backing bytes.
    pub fn new(name: efi::Guid, file_type: u8) -> Self {
        File {
            header: file::Header {
                name,
                integrity_check_header: 0,
                integrity_check_file: 0,
                file_type,
                attributes: 0,
                size: [0u8; 3],
                state: 0,
            },
            extended_size: None,
            erase_polarity: 0xFF,
            state_valid: true,
            sections: Vec::new(),
            buf: Buffer::default(),
        }
    }

    /// Set the raw attributes byte (alignment, checksum, large-file bits).
    pub fn set_attributes(&mut self, attributes: u8) {
        self.header.attributes = attributes;
    }

    /// Synthesize a pad file of exactly `size` bytes: type 0xF0, valid
    /// state, body filled with the erased-cell value.
    pub fn new_pad(size: u64, polarity: u8) -> Result<Self, FirmwareError> {
        if size < file::HEADER_SIZE as u64 {
            return Err(FirmwareError::invariant(
                "pad file",
                format!("{size:#x} bytes cannot hold a file header"),
            ));
        }
        if size >= 0x100_0000 {
            return Err(FirmwareError::Oversize { what: "pad file size", size: size as usize, max: 0xFF_FFFF });
        }
        let mut header = file::Header {
            name: efi::Guid::from_bytes(&[polarity; 16]),
            integrity_check_header: 0,
            integrity_check_file: 0,
            file_type: file::raw::r#type::FFS_PAD,
            attributes: 0,
            size: [0u8; 3],
            state: 0,
        };
        header.size.copy_from_slice(&(size as u32).to_le_bytes()[..3]);
        header.integrity_check_header = 0u8.wrapping_sub(checksum8(header_bytes(&header)));
        header.integrity_check_file = file::EMPTY_BODY_CHECKSUM;
        header.state = file::raw::state::VALID ^ polarity;

        let mut buf = header_bytes(&header).to_vec();
        buf.resize(size as usize, polarity);
        Ok(File {
            header,
            extended_size: None,
            erase_polarity: polarity,
            state_valid: true,
            sections: Vec::new(),
            buf: Buffer::owned(buf),
        })
    }

    /// Rebuild the backing buffer from the section list, recomputing size,
    /// state, and both integrity checksums. Files without sections only
    /// refresh their state byte; their payload is authoritative as-is.
    pub fn rebuild(&mut self, polarity: u8) -> Result<(), FirmwareError> {
        self.erase_polarity = polarity;
        if self.sections.is_empty() {
            let mut bytes = self.buf.to_vec();
            if bytes.len() < file::HEADER_SIZE {
                return Err(FirmwareError::ShortBuffer {
                    what: "file header",
                    need: file::HEADER_SIZE,
                    have: bytes.len(),
                });
            }
            self.header.state = file::raw::state::VALID ^ polarity;
            self.state_valid = true;
            bytes[file::STATE_OFFSET] = self.header.state;
            self.buf = Buffer::owned(bytes);
            return Ok(());
        }

        // Concatenate sections, 4-byte aligned. Inter-section padding is
        // always zero, unlike every other hole in the image.
        let mut content: Vec<u8> = Vec::new();
        for section in &self.sections {
            let aligned = align4(content.len() as u64) as usize;
            content.resize(aligned, 0x00);
            content.extend_from_slice(section.buf());
        }

        let large = self.header.attributes & attributes::raw::LARGE_FILE != 0
            || file::HEADER_SIZE + content.len() >= 0x100_0000;

        self.header.integrity_check_header = 0;
        self.header.integrity_check_file = 0;
        self.header.state = 0;
        let header_sum = if large {
            self.header.attributes |= attributes::raw::LARGE_FILE;
            self.header.size = [0u8; 3];
            let extended_size = (file::HEADER2_SIZE + content.len()) as u64;
            self.extended_size = Some(extended_size);
            let header2 = file::Header2 { header: self.header, extended_size };
            checksum8(header2_bytes(&header2))
        } else {
            let size = (file::HEADER_SIZE + content.len()) as u32;
            self.header.size.copy_from_slice(&size.to_le_bytes()[..3]);
            self.extended_size = None;
            checksum8(header_bytes(&self.header))
        };
        self.header.integrity_check_header = 0u8.wrapping_sub(header_sum);
        self.header.integrity_check_file = if self.header.attributes & attributes::raw::CHECKSUM != 0 {
            0u8.wrapping_sub(checksum8(&content))
        } else {
            file::EMPTY_BODY_CHECKSUM
        };
        self.header.state = file::raw::state::VALID ^ polarity;
        self.state_valid = true;

        let mut bytes = if large {
            header2_bytes(&file::Header2 { header: self.header, extended_size: self.extended_size.unwrap() })
                .to_vec()
        } else {
            header_bytes(&self.header).to_vec()
        };
        bytes.extend_from_slice(&content);
        self.buf = Buffer::owned(bytes);
        Ok(())
    }

    /// Total file size, header included.
    pub fn size(&self) -> usize {
        self.buf.len()
    }

    /// Header length: 24 bytes, or 32 for large files.
    pub fn header_len(&self) -> usize {
        if self.extended_size.is_some() {
            file::HEADER2_SIZE
        } else {
            file::HEADER_SIZE
        }
    }

    /// The file name GUID.
    pub fn name(&self) -> efi::Guid {
        self.header.name
    }

    pub fn file_type(&self) -> u8 {
        self.header.file_type
    }

    pub fn attributes(&self) -> u8 {
        self.header.attributes
    }

    /// Required placement alignment of the file data, decoded from the
    /// attributes field.
    pub fn data_alignment(&self) -> u64 {
        attributes::data_alignment(self.header.attributes)
    }

    /// Whether the file's logical state was valid at parse time.
    pub fn state_valid(&self) -> bool {
        self.state_valid
    }

    /// The erased-cell value this file was parsed or rebuilt under.
    pub fn erase_polarity(&self) -> u8 {
        self.erase_polarity
    }

    /// The payload bytes after the header.
    pub fn content(&self) -> &[u8] {
        &self.buf.as_slice()[self.header_len()..]
    }

    pub fn sections(&self) -> &[Section] {
        &self.sections
    }

    pub fn sections_mut(&mut self) -> &mut Vec<Section> {
        &mut self.sections
    }
}

fn header_bytes(header: &file::Header) -> &[u8] {
    // Safety: Header is repr(C) with no padding (byte-array GUID + u8 fields).
    unsafe { slice::from_raw_parts(header as *const file::Header as *const u8, mem::size_of::<file::Header>()) }
}

fn header2_bytes(header: &file::Header2) -> &[u8] {
    // Safety: Header2 is repr(C); Header is 24 bytes so extended_size is not padded.
    unsafe { slice::from_raw_parts(header as *const file::Header2 as *const u8, mem::size_of::<file::Header2>()) }
}

impl Firmware for File {
    fn buf(&self) -> &[u8] {
        self.buf.as_slice()
    }

    fn set_buf(&mut self, buf: Buffer) {
        self.buf = buf;
    }

    fn apply<V: Visitor + ?Sized>(&mut self, v: &mut V) -> Result<(), FirmwareError> {
        v.visit_file(self)
    }

    fn apply_children<V: Visitor + ?Sized>(&mut self, v: &mut V) -> Result<(), FirmwareError> {
        for section in self.sections.iter_mut() {
            section.apply(v)?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::section::NullCodec;
    use fwtree_pi::fw_fs::ffs::section;

    #[test]
    fn pad_file_parses_back_as_valid() {
        let pad = File::new_pad(0x40, 0xFF).unwrap();
        assert_eq!(pad.size(), 0x40);
        let parsed = File::parse(Buffer::owned(pad.buf().to_vec()), 0xFF, &NullCodec).unwrap();
        assert_eq!(parsed.file_type(), file::raw::r#type::FFS_PAD);
        assert!(parsed.state_valid());
        assert_eq!(parsed.size(), 0x40);
        assert!(parsed.content().iter().all(|&b| b == 0xFF));
    }

    #[test]
    fn pad_file_too_small_is_rejected() {
        assert!(File::new_pad(8, 0xFF).is_err());
    }

    #[test]
    fn rebuilt_file_checksums_verify() {
        let mut f = File::new_pad(0x30, 0xFF).unwrap();
        f.header.file_type = file::raw::r#type::DRIVER;
        f.sections_mut().push(Section::leaf(section::raw_type::RAW, vec![1, 2, 3, 4, 5]).unwrap());
        f.sections_mut().push(Section::leaf(section::raw_type::USER_INTERFACE, vec![0x41, 0x00]).unwrap());
        f.rebuild(0xFF).unwrap();

        // 9-byte first section padded to 12, then 6 more bytes
        assert_eq!(f.size(), file::HEADER_SIZE + 12 + 6);

        let parsed = File::parse(Buffer::owned(f.buf().to_vec()), 0xFF, &NullCodec).unwrap();
        assert!(parsed.state_valid());
        assert_eq!(parsed.sections().len(), 2);
        assert_eq!(parsed.sections()[0].payload(), &[1, 2, 3, 4, 5]);
        assert_eq!(parsed.sections()[1].section_type(), section::raw_type::USER_INTERFACE);

        // header sums to zero once state and the data checksum are backed out
        let sum = checksum8(&f.buf()[..file::HEADER_SIZE])
            .wrapping_sub(f.header.state)
            .wrapping_sub(f.header.integrity_check_file);
        assert_eq!(sum, 0);
    }

    #[test]
    fn inter_section_padding_is_zero() {
        let mut f = File::new_pad(0x30, 0xFF).unwrap();
        f.header.file_type = file::raw::r#type::FREEFORM;
        f.sections_mut().push(Section::leaf(section::raw_type::RAW, vec![0xEE; 1]).unwrap());
        f.sections_mut().push(Section::leaf(section::raw_type::RAW, vec![0xDD; 2]).unwrap());
        f.rebuild(0xFF).unwrap();
        // first section is 5 bytes, so bytes 5..8 of the content are the pad
        assert_eq!(&f.content()[5..8], &[0x00, 0x00, 0x00]);
    }

    #[test]
    fn state_is_stored_inverted_by_polarity() {
        let pad = File::new_pad(0x20, 0xFF).unwrap();
        assert_eq!(pad.buf()[file::STATE_OFFSET], file::raw::state::VALID ^ 0xFF);
        let pad0 = File::new_pad(0x20, 0x00).unwrap();
        assert_eq!(pad0.buf()[file::STATE_OFFSET], file::raw::state::VALID);
    }
}
