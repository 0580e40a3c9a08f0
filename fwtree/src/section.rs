//! Firmware file section parsing and the compression codec seam.
//!
//! A section is a leaf (PE32, RAW, user interface, ...) or an encapsulation
//! of further sections. GUID-defined encapsulations whose
//! `PROCESSING_REQUIRED` attribute is set hold a compressed payload; the
//! codec selected by the GUID is injected through [`SectionCodec`] so the
//! tree logic stays independent of the compression libraries.
//!
//! ## License
//!
//! Copyright (C) Microsoft Corporation.
//!
//! SPDX-License-Identifier: Apache-2.0
//!

use core::{mem, ptr};

use fwtree_pi::fw_fs::ffs::section::{self, header};
use r_efi::efi;

use crate::base::{align4, guid_string};
use crate::buffer::Buffer;
use crate::err::FirmwareError;
use crate::visitor::{Firmware, Visitor};

/// Symmetric encode/decode collaborator for GUID-defined sections.
///
/// Implementations claim GUIDs: a call with a GUID the codec does not
/// handle returns [`FirmwareError::UnknownRequiredCodec`], which lets
/// chained codecs fall through to the next one. Hard failures on claimed
/// GUIDs are [`FirmwareError::Codec`].
pub trait SectionCodec {
    /// Decompress the payload of a GUID-defined section.
    fn decode(&self, guid: &efi::Guid, data: &[u8]) -> Result<Vec<u8>, FirmwareError>;

    /// Compress raw section contents for a GUID-defined section.
    fn encode(&self, guid: &efi::Guid, data: &[u8]) -> Result<Vec<u8>, FirmwareError>;
}

/// A codec that claims no GUIDs. Parsing an image through this codec fails
/// on any section that requires processing, which is the right default for
/// tooling that must not silently mangle compressed content.
#[derive(Default, Clone, Copy)]
pub struct NullCodec;

impl SectionCodec for NullCodec {
    fn decode(&self, guid: &efi::Guid, _data: &[u8]) -> Result<Vec<u8>, FirmwareError> {
        Err(FirmwareError::UnknownRequiredCodec { guid: guid_string(guid) })
    }

    fn encode(&self, guid: &efi::Guid, _data: &[u8]) -> Result<Vec<u8>, FirmwareError> {
        Err(FirmwareError::UnknownRequiredCodec { guid: guid_string(guid) })
    }
}

/// Parsed type-specific header of a GUID-defined section.
///
/// `guid_data` preserves any GUID-specific bytes sitting between the fixed
/// subheader and `data_offset`; they are re-emitted verbatim on assembly.
#[derive(Debug, Clone)]
pub struct GuidDefined {
    pub guid: efi::Guid,
    pub data_offset: u16,
    pub attributes: u16,
    pub guid_data: Vec<u8>,
}

impl GuidDefined {
    /// Whether the payload must be decoded before its contents can be read.
    pub fn processing_required(&self) -> bool {
        self.attributes & header::guided::PROCESSING_REQUIRED != 0
    }
}

/// A firmware file section.
#[derive(Debug)]
pub struct Section {
    section_type: u8,
    total_size: usize,
    extended: bool,
    guid_defined: Option<GuidDefined>,
    compression: Option<header::Compression>,
    encapsulated: Vec<Section>,
    buf: Buffer,
}

impl Section {
    /// Parse one section from the start of `buf`; the section limits itself
    /// to its declared size.
    pub fn parse(buf: Buffer, codec: &dyn SectionCodec) -> Result<Self, FirmwareError> {
        let (total_size, header_size, extended, section_type) = {
            let data = buf.as_slice();
            if data.len() < section::HEADER_SIZE {
                return Err(FirmwareError::ShortBuffer {
                    what: "section header",
                    need: section::HEADER_SIZE,
                    have: data.len(),
                });
            }
            let size24 = u32::from_le_bytes([data[0], data[1], data[2], 0]) as usize;
            let section_type = data[3];
            if size24 == 0xFF_FFFF {
                // saturated 24-bit size, the extended header is in use
                let ext_size = mem::size_of::<header::CommonSectionHeaderExtended>();
                if data.len() < ext_size {
                    return Err(FirmwareError::ShortBuffer {
                        what: "extended section header",
                        need: ext_size,
                        have: data.len(),
                    });
                }
                let total = u32::from_le_bytes(data[4..8].try_into().unwrap()) as usize;
                (total, ext_size, true, section_type)
            } else {
                (size24, section::HEADER_SIZE, false, section_type)
            }
        };

        if total_size < header_size {
            return Err(FirmwareError::invariant(
                "section",
                format!("declared size {total_size:#x} smaller than its header"),
            ));
        }
        if total_size > buf.len() {
            return Err(FirmwareError::ShortBuffer { what: "section contents", need: total_size, have: buf.len() });
        }

        let limited = buf.view(0, total_size)?;
        let (guid_defined, compression, encapsulated) = {
            let bytes = limited.as_slice();
            match section_type {
                section::raw_type::encapsulated::GUID_DEFINED => {
                    Self::parse_guid_defined(&limited, bytes, header_size, codec)?
                }
                section::raw_type::encapsulated::COMPRESSION => {
                    let sub_size = mem::size_of::<header::Compression>();
                    if bytes.len() < header_size + sub_size {
                        return Err(FirmwareError::ShortBuffer {
                            what: "compression section header",
                            need: header_size + sub_size,
                            have: bytes.len(),
                        });
                    }
                    // Safety: bounds checked above; Compression is repr(C, packed).
                    let sub = unsafe {
                        ptr::read_unaligned(bytes[header_size..].as_ptr() as *const header::Compression)
                    };
                    let children = if sub.compression_type == header::NOT_COMPRESSED {
                        Self::parse_list(&limited.view(header_size + sub_size, total_size)?, codec)?
                    } else {
                        // standard-compressed sections are left opaque; the
                        // GUID-defined path is the compression surface here
                        log::debug!("leaving compressed standard section ({total_size:#x} bytes) opaque");
                        Vec::new()
                    };
                    (None, Some(sub), children)
                }
                section::raw_type::encapsulated::DISPOSABLE => {
                    let children = Self::parse_list(&limited.view(header_size, total_size)?, codec)?;
                    (None, None, children)
                }
                _ => (None, None, Vec::new()),
            }
        };

        Ok(Section { section_type, total_size, extended, guid_defined, compression, encapsulated, buf: limited })
    }

    fn parse_guid_defined(
        limited: &Buffer,
        bytes: &[u8],
        header_size: usize,
        codec: &dyn SectionCodec,
    ) -> Result<(Option<GuidDefined>, Option<header::Compression>, Vec<Section>), FirmwareError> {
        let sub_size = header::GUID_DEFINED_SIZE;
        if bytes.len() < header_size + sub_size {
            return Err(FirmwareError::ShortBuffer {
                what: "guid-defined section header",
                need: header_size + sub_size,
                have: bytes.len(),
            });
        }
        // Safety: bounds checked above; GuidDefined is repr(C) over byte-array GUID fields.
        let sub = unsafe { ptr::read_unaligned(bytes[header_size..].as_ptr() as *const header::GuidDefined) };
        let data_offset = sub.data_offset as usize;
        if data_offset < header_size + sub_size || data_offset > bytes.len() {
            return Err(FirmwareError::invariant(
                "guid-defined section",
                format!("data offset {data_offset:#x} outside the section"),
            ));
        }
        let gd = GuidDefined {
            guid: sub.section_definition_guid,
            data_offset: sub.data_offset,
            attributes: sub.attributes,
            guid_data: bytes[header_size + sub_size..data_offset].to_vec(),
        };

        let encapsulated = if gd.processing_required() {
            let decoded = codec.decode(&gd.guid, &bytes[data_offset..])?;
            Self::parse_list(&Buffer::root(decoded), codec)?
        } else {
            // Wrapper without processing (signature, checksum): contents are
            // plain sections. An unparseable payload is kept opaque.
            match Self::parse_list(&limited.view(data_offset, bytes.len())?, codec) {
                Ok(children) => children,
                Err(err) => {
                    log::warn!(
                        "guid-defined section {} payload did not parse as sections: {err}",
                        guid_string(&gd.guid)
                    );
                    Vec::new()
                }
            }
        };
        Ok((Some(gd), None, encapsulated))
    }

    /// Parse a packed list of sections, each 4-byte aligned relative to the
    /// start of the list.
    pub fn parse_list(buf: &Buffer, codec: &dyn SectionCodec) -> Result<Vec<Section>, FirmwareError> {
        let len = buf.len();
        let mut sections = Vec::new();
        let mut offset = 0usize;
        while offset + section::HEADER_SIZE <= len {
            let s = Section::parse(buf.view(offset, len)?, codec)?;
            let size = s.total_size;
            sections.push(s);
            offset = align4((offset + size) as u64) as usize;
        }
        Ok(sections)
    }

    /// Build a leaf section from a type and payload.
    pub fn leaf(section_type: u8, payload: Vec<u8>) -> Result<Self, FirmwareError> {
        let mut s = Section {
            section_type,
            total_size: 0,
            extended: false,
            guid_defined: None,
            compression: None,
            encapsulated: Vec::new(),
            buf: Buffer::default(),
        };
        s.rebuild(payload)?;
        Ok(s)
    }

    /// Regenerate the section header around `payload` and replace the
    /// backing buffer. Type-specific subheaders are re-emitted; sizes and
    /// the GUID-defined data offset are recomputed.
    pub(crate) fn rebuild(&mut self, payload: Vec<u8>) -> Result<(), FirmwareError> {
        // subheader bytes between the common header and the payload
        let sub: Vec<u8> = match (&mut self.guid_defined, &mut self.compression) {
            (Some(gd), _) => {
                let mut sub = Vec::with_capacity(header::GUID_DEFINED_SIZE + gd.guid_data.len());
                sub.extend_from_slice(gd.guid.as_bytes());
                sub.extend_from_slice(&[0u8; 4]); // data_offset + attributes patched below
                sub.extend_from_slice(&gd.guid_data);
                sub
            }
            (None, Some(ch)) => {
                let uncompressed: u32 = payload.len().try_into().map_err(|_| FirmwareError::Oversize {
                    what: "uncompressed section length",
                    size: payload.len(),
                    max: u32::MAX as usize,
                })?;
                ch.uncompressed_length = uncompressed;
                let compression_type = ch.compression_type;
                let mut sub = Vec::with_capacity(mem::size_of::<header::Compression>());
                sub.extend_from_slice(&uncompressed.to_le_bytes());
                sub.push(compression_type);
                sub
            }
            (None, None) => Vec::new(),
        };

        let standard_total = section::HEADER_SIZE + sub.len() + payload.len();
        let (header_size, total_size) = if standard_total < section::MAX_STANDARD_SECTION_SIZE {
            (section::HEADER_SIZE, standard_total)
        } else {
            let ext = mem::size_of::<header::CommonSectionHeaderExtended>();
            (ext, ext + sub.len() + payload.len())
        };

        let mut bytes = Vec::with_capacity(total_size);
        if header_size == section::HEADER_SIZE {
            bytes.extend_from_slice(&(total_size as u32).to_le_bytes()[..3]);
            bytes.push(self.section_type);
        } else {
            bytes.extend_from_slice(&[0xFF, 0xFF, 0xFF]);
            bytes.push(self.section_type);
            let total: u32 = total_size.try_into().map_err(|_| FirmwareError::Oversize {
                what: "section size",
                size: total_size,
                max: u32::MAX as usize,
            })?;
            bytes.extend_from_slice(&total.to_le_bytes());
        }
        bytes.extend_from_slice(&sub);
        if let Some(gd) = &mut self.guid_defined {
            let data_offset: u16 = (header_size + header::GUID_DEFINED_SIZE + gd.guid_data.len())
                .try_into()
                .map_err(|_| FirmwareError::Oversize {
                    what: "guid-defined data offset",
                    size: header_size + header::GUID_DEFINED_SIZE + gd.guid_data.len(),
                    max: u16::MAX as usize,
                })?;
            gd.data_offset = data_offset;
            let field = header_size + 16;
            bytes[field..field + 2].copy_from_slice(&data_offset.to_le_bytes());
            bytes[field + 2..field + 4].copy_from_slice(&gd.attributes.to_le_bytes());
        }
        bytes.extend_from_slice(&payload);

        self.extended = header_size != section::HEADER_SIZE;
        self.total_size = bytes.len();
        self.buf = Buffer::owned(bytes);
        Ok(())
    }

    /// Raw section type byte.
    pub fn section_type(&self) -> u8 {
        self.section_type
    }

    /// Total serialized size, headers included.
    pub fn size(&self) -> usize {
        self.total_size
    }

    /// The GUID-defined subheader, for type 0x02 sections.
    pub fn guid_defined(&self) -> Option<&GuidDefined> {
        self.guid_defined.as_ref()
    }

    /// Byte offset from the start of the section to its payload.
    pub fn payload_offset(&self) -> usize {
        let header_size = if self.extended {
            mem::size_of::<header::CommonSectionHeaderExtended>()
        } else {
            section::HEADER_SIZE
        };
        if let Some(gd) = &self.guid_defined {
            gd.data_offset as usize
        } else if self.compression.is_some() {
            header_size + mem::size_of::<header::Compression>()
        } else {
            header_size
        }
    }

    /// The payload bytes after all headers. For a processed GUID-defined
    /// section this is the encoded payload as stored on flash.
    pub fn payload(&self) -> &[u8] {
        &self.buf.as_slice()[self.payload_offset()..]
    }

    /// Whether this section kind can hold child sections.
    pub fn encapsulation(&self) -> bool {
        matches!(
            self.section_type,
            section::raw_type::encapsulated::COMPRESSION
                | section::raw_type::encapsulated::GUID_DEFINED
                | section::raw_type::encapsulated::DISPOSABLE
        )
    }

    pub fn encapsulated(&self) -> &[Section] {
        &self.encapsulated
    }

    pub fn encapsulated_mut(&mut self) -> &mut Vec<Section> {
        &mut self.encapsulated
    }
}

impl Firmware for Section {
    fn buf(&self) -> &[u8] {
        self.buf.as_slice()
    }

    fn set_buf(&mut self, buf: Buffer) {
        self.total_size = buf.len();
        self.buf = buf;
    }

    fn apply<V: Visitor + ?Sized>(&mut self, v: &mut V) -> Result<(), FirmwareError> {
        v.visit_section(self)
    }

    fn apply_children<V: Visitor + ?Sized>(&mut self, v: &mut V) -> Result<(), FirmwareError> {
        for child in self.encapsulated.iter_mut() {
            child.apply(v)?;
        }
        Ok(())
    }
}
