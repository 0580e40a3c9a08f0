//! The assembler: rebuilds every node's backing buffer bottom-up.
//!
//! A post-order pass. Children are assembled first so leaf buffers are
//! authoritative, then each parent reconstitutes itself: sections re-encode
//! their payloads, files recompute sizes and checksums, volumes re-place
//! files with pad-file insertion and re-checksum their headers, the BIOS
//! region lays elements back out over an erased canvas, and the image
//! concatenates the descriptor and the regions sorted by base address.
//!
//! The erase polarity in force while a file is rewritten is that of its
//! enclosing volume; it is carried as visitor state set on volume entry.
//!
//! ## License
//!
//! Copyright (C) Microsoft Corporation.
//!
//! SPDX-License-Identifier: Apache-2.0
//!

use fwtree_pi::flash::RegionKind;
use fwtree_pi::fw_fs::{ffs::file, fv};

use crate::base::{align, align4, align8, checksum16, erase, guid_string};
use crate::bios::BiosRegion;
use crate::buffer::Buffer;
use crate::err::FirmwareError;
use crate::file::File;
use crate::image::{FlashDescriptor, FlashImage};
use crate::section::{Section, SectionCodec};
use crate::visitor::{Firmware, Visitor};
use crate::volume::FirmwareVolume;

/// Reconstitutes the firmware tree assuming that the leaf node buffers are
/// accurate.
pub struct Assemble<'a> {
    codec: &'a dyn SectionCodec,
    polarity: u8,
}

impl<'a> Assemble<'a> {
    pub fn new(codec: &'a dyn SectionCodec) -> Self {
        Assemble { codec, polarity: 0xFF }
    }

    /// Run the assembler over `node`; afterwards the node's backing buffer
    /// is the output image.
    pub fn run<F: Firmware>(&mut self, node: &mut F) -> Result<(), FirmwareError> {
        node.apply(self)
    }
}

/// Place `bytes` at `offset`, extending the buffer with the erased-cell
/// value up to the insertion point. Placements must be monotonic.
fn insert_at(buf: &mut Vec<u8>, offset: u64, bytes: &[u8], polarity: u8) -> Result<(), FirmwareError> {
    let offset = offset as usize;
    if offset < buf.len() {
        return Err(FirmwareError::invariant(
            "file placement",
            format!("offset {offset:#x} overlaps already placed data ending at {:#x}", buf.len()),
        ));
    }
    buf.resize(offset, polarity);
    buf.extend_from_slice(bytes);
    Ok(())
}

impl Visitor for Assemble<'_> {
    fn visit_section(&mut self, section: &mut Section) -> Result<(), FirmwareError> {
        section.apply_children(self)?;
        if section.encapsulated().is_empty() {
            // leaf or opaque: the buffer is already authoritative
            return Ok(());
        }

        // Concatenate children at 4-byte alignment. Inter-section padding
        // is zero, not erase polarity.
        let mut content: Vec<u8> = Vec::new();
        for child in section.encapsulated() {
            let aligned = align4(content.len() as u64) as usize;
            content.resize(aligned, 0x00);
            content.extend_from_slice(child.buf());
        }

        let payload = match section.guid_defined() {
            Some(gd) if gd.processing_required() => self.codec.encode(&gd.guid, &content)?,
            _ => content,
        };
        section.rebuild(payload)
    }

    fn visit_file(&mut self, file: &mut File) -> Result<(), FirmwareError> {
        file.apply_children(self)?;
        file.rebuild(self.polarity)
    }

    fn visit_volume(&mut self, volume: &mut FirmwareVolume) -> Result<(), FirmwareError> {
        self.polarity = volume.erase_byte();
        volume.apply_children(self)?;

        if volume.files().is_empty() {
            // no children: the buffer already contains the whole volume
            return Ok(());
        }

        let polarity = self.polarity;
        let data_offset = volume.data_offset();
        if (volume.buf().len() as u64) < data_offset {
            return Err(FirmwareError::invariant(
                "firmware volume",
                format!("buffer shorter than its data offset {data_offset:#x}"),
            ));
        }
        let mut buf = volume.buf()[..data_offset as usize].to_vec();

        // Lay the files back out: 8-byte aligned, with pad files inserted
        // wherever a file's data alignment demands it.
        let mut file_offset = data_offset;
        for f in volume.files() {
            let file_bytes = f.buf();
            let file_len = file_bytes.len() as u64;
            if file_len == 0 {
                return Err(FirmwareError::invariant(
                    "firmware volume",
                    format!("file {} has an empty buffer", guid_string(&f.name())),
                ));
            }
            let mut aligned = align8(file_offset);
            let align_base = f.data_alignment();
            if align_base > 1 {
                // the data, not the header, must land on the boundary
                let header_len = f.header_len() as u64;
                let mut data_start = align(aligned + header_len, align_base);
                let mut new_offset = data_start - header_len;
                let gap = new_offset - aligned;
                if gap >= 8 && gap < file::HEADER_SIZE as u64 {
                    // too small to hold a pad file, bump to the next boundary
                    data_start = align(data_start + 1, align_base);
                    new_offset = data_start - header_len;
                }
                if new_offset > aligned {
                    let pad = File::new_pad(new_offset - aligned, polarity)?;
                    insert_at(&mut buf, aligned, pad.buf(), polarity)?;
                }
                aligned = new_offset;
            }
            insert_at(&mut buf, aligned, file_bytes, polarity)?;
            file_offset = aligned + file_len;
        }

        // Resize if the files outgrew the declared length, rounding up to
        // the block size. Only single-entry block maps can be resized.
        let used = buf.len() as u64;
        let mut length = volume.length();
        if length < used {
            let blocks = volume.blocks();
            if blocks.len() != 1 {
                return Err(FirmwareError::invariant(
                    "firmware volume",
                    format!("cannot resize a volume with {} block map entries", blocks.len()),
                ));
            }
            if blocks[0].length == 0 {
                return Err(FirmwareError::invariant("firmware volume", "first block has zero size".to_string()));
            }
            let block_len = blocks[0].length as u64;
            length = align(used, block_len);
            let count: u32 = (length / block_len).try_into().map_err(|_| FirmwareError::Oversize {
                what: "block count",
                size: (length / block_len) as usize,
                max: u32::MAX as usize,
            })?;
            volume.set_geometry(length, count);
        }
        if length > used {
            buf.resize(length as usize, polarity);
        }

        // Patch the header in place and re-checksum it.
        buf[fv::offset::LENGTH..fv::offset::LENGTH + 8].copy_from_slice(&length.to_le_bytes());
        let first_count = volume.blocks().first().map(|block| block.num_blocks).unwrap_or(0);
        buf[fv::offset::FIRST_BLOCK_COUNT..fv::offset::FIRST_BLOCK_COUNT + 4]
            .copy_from_slice(&first_count.to_le_bytes());
        buf[fv::offset::CHECKSUM..fv::offset::CHECKSUM + 2].copy_from_slice(&[0, 0]);
        let header_len = volume.header_len();
        if header_len > buf.len() {
            return Err(FirmwareError::invariant(
                "firmware volume",
                format!("header length {header_len:#x} exceeds the volume"),
            ));
        }
        let checksum = 0u16.wrapping_sub(checksum16(&buf[..header_len])?);
        buf[fv::offset::CHECKSUM..fv::offset::CHECKSUM + 2].copy_from_slice(&checksum.to_le_bytes());
        volume.set_checksum(checksum);

        volume.set_buf(Buffer::owned(buf));
        Ok(())
    }

    fn visit_bios(&mut self, bios: &mut BiosRegion) -> Result<(), FirmwareError> {
        bios.apply_children(self)?;

        let polarity = bios
            .first_volume()
            .map(|volume| volume.erase_byte())
            .ok_or_else(|| FirmwareError::invariant("bios region", "no firmware volume found".to_string()))?;
        self.polarity = polarity;

        let length = bios.length() as usize;
        let buf = {
            let mut buf = vec![0u8; length];
            erase(&mut buf, polarity);
            let mut offset = 0usize;
            for element in bios.elements() {
                let bytes = element.bytes();
                if offset + bytes.len() > length {
                    return Err(FirmwareError::invariant(
                        "bios region",
                        format!(
                            "element at {offset:#x} ({:#x} bytes) overruns the region length {length:#x}",
                            bytes.len()
                        ),
                    ));
                }
                buf[offset..offset + bytes.len()].copy_from_slice(bytes);
                offset += bytes.len();
            }
            buf
        };
        bios.set_buf(Buffer::owned(buf));
        Ok(())
    }

    fn visit_descriptor(&mut self, descriptor: &mut FlashDescriptor) -> Result<(), FirmwareError> {
        // pick up any edits made directly to the descriptor bytes
        descriptor.reparse()
    }

    fn visit_image(&mut self, image: &mut FlashImage) -> Result<(), FirmwareError> {
        image.apply_children(self)?;

        let out = match image.descriptor() {
            None => {
                // descriptor-less image: the BIOS region is the image
                image
                    .bios()
                    .ok_or_else(|| {
                        FirmwareError::invariant("flash image", "bios node is missing".to_string())
                    })?
                    .buf()
                    .to_vec()
            }
            Some(descriptor) => {
                if !descriptor.region(RegionKind::Bios).valid() {
                    return Err(FirmwareError::invariant(
                        "flash image",
                        format!(
                            "no BIOS region: invalid region parameters {:?}",
                            descriptor.region(RegionKind::Bios)
                        ),
                    ));
                }
                let bios = image.bios().ok_or_else(|| {
                    FirmwareError::invariant("flash image", "bios node is missing".to_string())
                })?;

                // Region order on flash is by base address, which need not
                // match tree order after mutation.
                let mut regions: Vec<(u16, &[u8])> =
                    vec![(descriptor.region(RegionKind::Bios).base, bios.buf())];
                for kind in [RegionKind::Me, RegionKind::Gbe, RegionKind::Pd] {
                    if descriptor.region(kind).valid() {
                        let node = image.raw_region(kind).ok_or_else(|| {
                            FirmwareError::invariant(
                                "flash image",
                                format!("{} region is present in the descriptor but absent from the tree", kind.name()),
                            )
                        })?;
                        regions.push((descriptor.region(kind).base, node.buf()));
                    }
                }
                regions.sort_by_key(|(base, _)| *base);

                let mut out = descriptor.buf().to_vec();
                for (_, bytes) in regions {
                    out.extend_from_slice(bytes);
                }
                out
            }
        };
        image.set_buf(Buffer::owned(out));
        Ok(())
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::base::checksum8;
    use crate::image::testutil::build_descriptor;
    use crate::section::NullCodec;
    use crate::volume::testutil::build_fv;
    use fwtree_pi::flash::FlashRegion;
    use fwtree_pi::fw_fs::ffs::section;
    use fwtree_pi::fw_fs::guid::LZMA_SECTION_GUID;
    use r_efi::efi;

    /// Build a standard-header file image with correct checksums.
    fn build_file(file_type: u8, attributes: u8, content: &[u8]) -> Vec<u8> {
        let size = file::HEADER_SIZE + content.len();
        let mut bytes = Vec::with_capacity(size);
        bytes.extend_from_slice(&[0xAB; 16]); // name
        bytes.extend_from_slice(&[0, 0]); // integrity check, patched below
        bytes.push(file_type);
        bytes.push(attributes);
        bytes.extend_from_slice(&(size as u32).to_le_bytes()[..3]);
        bytes.push(0); // state, patched below
        bytes[16] = 0u8.wrapping_sub(checksum8(&bytes));
        bytes[17] = file::EMPTY_BODY_CHECKSUM;
        bytes[file::STATE_OFFSET] = file::raw::state::VALID ^ 0xFF;
        bytes.extend_from_slice(content);
        bytes
    }

    #[test]
    fn minimal_volume_round_trips_bit_for_bit() {
        let image = build_fv(0x1000, 0x1000, &[]);
        let mut volume = FirmwareVolume::parse(Buffer::root(image.clone()), &NullCodec).unwrap();
        Assemble::new(&NullCodec).run(&mut volume).unwrap();

        let out = volume.buf();
        assert_eq!(out.len(), 0x1000);
        assert_eq!(checksum16(&out[..volume.header_len()]).unwrap(), 0);
        assert!(out[72..].iter().all(|&b| b == 0xFF));
        assert_eq!(out, &image[..]);
    }

    #[test]
    fn volume_with_files_reassembles_identically() {
        let file_a = build_file(file::raw::r#type::RAW, 0, &[0x11; 20]);
        let file_b = build_file(file::raw::r#type::RAW, 0, &[0x22; 52]);
        let image = build_fv(0x1000, 0x1000, &[&file_a, &file_b]);
        let mut volume = FirmwareVolume::parse(Buffer::root(image.clone()), &NullCodec).unwrap();
        Assemble::new(&NullCodec).run(&mut volume).unwrap();
        assert_eq!(volume.buf(), &image[..]);
    }

    #[test]
    fn pad_file_inserted_for_data_alignment() {
        // data alignment field 3 => 512-byte alignment
        let aligned_file = build_file(file::raw::r#type::RAW, 0x18, &[0xC3; 40]);
        let image = build_fv(0x1000, 0x1000, &[&aligned_file]);
        let mut volume = FirmwareVolume::parse(Buffer::root(image), &NullCodec).unwrap();
        Assemble::new(&NullCodec).run(&mut volume).unwrap();

        let out = volume.buf().to_vec();
        // a pad file spans [72, 488), the aligned file follows with its
        // data on the 512 boundary
        assert_eq!(&out[488..488 + aligned_file.len()], &aligned_file[..]);
        assert_eq!((488 + file::HEADER_SIZE) % 512, 0);

        let reparsed = FirmwareVolume::parse(Buffer::root(out), &NullCodec).unwrap();
        assert_eq!(reparsed.files().len(), 2);
        assert_eq!(reparsed.files()[0].file_type(), file::raw::r#type::FFS_PAD);
        assert_eq!(reparsed.files()[0].size(), 488 - 72);
        assert!(reparsed.files()[0].content().iter().all(|&b| b == 0xFF));
        assert_eq!(checksum16(&reparsed.buf()[..reparsed.header_len()]).unwrap(), 0);
    }

    #[test]
    fn unusable_gap_bumps_to_the_next_boundary() {
        // after a 24-byte pad file the 16-byte alignment would leave an
        // 8-byte gap, too small for a pad file header
        let pad = File::new_pad(24, 0xFF).unwrap();
        let aligned_file = build_file(file::raw::r#type::RAW, 0x08, &[0xC3; 16]);
        let image = build_fv(0x1000, 0x1000, &[pad.buf(), &aligned_file]);
        let mut volume = FirmwareVolume::parse(Buffer::root(image), &NullCodec).unwrap();
        Assemble::new(&NullCodec).run(&mut volume).unwrap();

        let out = volume.buf().to_vec();
        assert_eq!(&out[120..120 + aligned_file.len()], &aligned_file[..]);
        assert_eq!((120 + file::HEADER_SIZE) % 16, 0);

        let reparsed = FirmwareVolume::parse(Buffer::root(out), &NullCodec).unwrap();
        assert_eq!(reparsed.files().len(), 3);
        assert_eq!(reparsed.files()[1].file_type(), file::raw::r#type::FFS_PAD);
        assert_eq!(reparsed.files()[1].size(), 24);
    }

    #[test]
    fn growing_volume_resizes_to_block_boundary() {
        let pad = File::new_pad(0x28, 0xFF).unwrap();
        let image = build_fv(0x1000, 0x1000, &[pad.buf()]);
        let mut volume = FirmwareVolume::parse(Buffer::root(image), &NullCodec).unwrap();
        volume.files_mut().push(File::new_pad(0xFF8, 0xFF).unwrap());
        Assemble::new(&NullCodec).run(&mut volume).unwrap();

        let out = volume.buf();
        assert_eq!(out.len(), 0x2000);
        assert_eq!(volume.length(), 0x2000);
        assert_eq!(u64::from_le_bytes(out[fv::offset::LENGTH..fv::offset::LENGTH + 8].try_into().unwrap()), 0x2000);
        assert_eq!(
            u32::from_le_bytes(
                out[fv::offset::FIRST_BLOCK_COUNT..fv::offset::FIRST_BLOCK_COUNT + 4].try_into().unwrap()
            ),
            2
        );
        assert_eq!(checksum16(&out[..volume.header_len()]).unwrap(), 0);
        // second file ends at 112 + 0xFF8; the tail is erased
        assert!(out[112 + 0xFF8..].iter().all(|&b| b == 0xFF));
    }

    #[test]
    fn erase_polarity_zero_fills_holes_with_zeros() {
        let mut image = build_fv(0x1000, 0x1000, &[]);
        // clear the erase polarity attribute and fix the checksum
        image[44..48].copy_from_slice(&0u32.to_le_bytes());
        image[fv::offset::CHECKSUM..fv::offset::CHECKSUM + 2].copy_from_slice(&[0, 0]);
        let sum = checksum16(&image[..72]).unwrap();
        image[fv::offset::CHECKSUM..fv::offset::CHECKSUM + 2]
            .copy_from_slice(&0u16.wrapping_sub(sum).to_le_bytes());
        for byte in image[72..].iter_mut() {
            *byte = 0x00;
        }

        let mut volume = FirmwareVolume::parse(Buffer::root(image), &NullCodec).unwrap();
        assert_eq!(volume.erase_byte(), 0x00);
        volume.files_mut().push(File::new_pad(0x30, 0x00).unwrap());
        Assemble::new(&NullCodec).run(&mut volume).unwrap();

        let out = volume.buf();
        assert_eq!(out.len(), 0x1000);
        assert!(out[72 + 0x30..].iter().all(|&b| b == 0x00));
    }

    /// Stand-in compression: reverses the payload. Symmetric, so it
    /// exercises the processing-required paths without a real codec.
    struct ReverseCodec;

    impl SectionCodec for ReverseCodec {
        fn decode(&self, guid: &efi::Guid, data: &[u8]) -> Result<Vec<u8>, FirmwareError> {
            if *guid != LZMA_SECTION_GUID {
                return Err(FirmwareError::UnknownRequiredCodec { guid: guid_string(guid) });
            }
            Ok(data.iter().rev().copied().collect())
        }

        fn encode(&self, guid: &efi::Guid, data: &[u8]) -> Result<Vec<u8>, FirmwareError> {
            self.decode(guid, data)
        }
    }

    fn build_processed_section(inner: &[u8], codec: &ReverseCodec) -> Vec<u8> {
        let encoded = codec.encode(&LZMA_SECTION_GUID, inner).unwrap();
        let total = 24 + encoded.len();
        let mut bytes = Vec::with_capacity(total);
        bytes.extend_from_slice(&(total as u32).to_le_bytes()[..3]);
        bytes.push(section::raw_type::encapsulated::GUID_DEFINED);
        bytes.extend_from_slice(LZMA_SECTION_GUID.as_bytes());
        bytes.extend_from_slice(&24u16.to_le_bytes()); // data offset
        bytes.extend_from_slice(&section::header::guided::PROCESSING_REQUIRED.to_le_bytes());
        bytes.extend_from_slice(&encoded);
        bytes
    }

    #[test]
    fn processed_section_re_encodes_after_mutation() {
        let codec = ReverseCodec;
        let inner = Section::leaf(section::raw_type::RAW, vec![1, 2, 3, 4]).unwrap();
        let bytes = build_processed_section(inner.buf(), &codec);

        let mut parsed = Section::parse(Buffer::owned(bytes.clone()), &codec).unwrap();
        assert_eq!(parsed.encapsulated().len(), 1);
        assert_eq!(parsed.encapsulated()[0].payload(), &[1, 2, 3, 4]);

        // untouched tree re-encodes to the identical image
        Assemble::new(&codec).run(&mut parsed).unwrap();
        assert_eq!(parsed.buf(), &bytes[..]);

        // replace the inner section and re-assemble
        parsed.encapsulated_mut()[0] = Section::leaf(section::raw_type::RAW, vec![9; 5]).unwrap();
        Assemble::new(&codec).run(&mut parsed).unwrap();
        let reparsed = Section::parse(Buffer::owned(parsed.buf().to_vec()), &codec).unwrap();
        assert_eq!(reparsed.encapsulated().len(), 1);
        assert_eq!(reparsed.encapsulated()[0].payload(), &[9; 5]);
    }

    #[test]
    fn unknown_required_codec_fails_assembly() {
        let codec = ReverseCodec;
        let inner = Section::leaf(section::raw_type::RAW, vec![1, 2, 3, 4]).unwrap();
        let bytes = build_processed_section(inner.buf(), &codec);
        let mut parsed = Section::parse(Buffer::owned(bytes), &codec).unwrap();
        assert!(matches!(
            Assemble::new(&NullCodec).run(&mut parsed),
            Err(FirmwareError::UnknownRequiredCodec { .. })
        ));
    }

    #[test]
    fn image_regions_concatenate_in_base_order() {
        // ME sits below BIOS on flash even though the tree lists BIOS first
        let mut data = build_descriptor(
            FlashRegion { base: 2, limit: 3 },
            Some(FlashRegion { base: 1, limit: 1 }),
        );
        data.extend_from_slice(&[0xA5; 0x1000]); // ME at page 1
        data.extend_from_slice(&build_fv(0x2000, 0x1000, &[])); // BIOS at pages 2-3

        let mut image = FlashImage::parse(data.clone(), &NullCodec).unwrap();
        Assemble::new(&NullCodec).run(&mut image).unwrap();
        assert_eq!(image.buf(), &data[..]);
    }

    #[test]
    fn descriptorless_image_assembles_to_its_bios_region() {
        let data = build_fv(0x1000, 0x1000, &[]);
        let mut image = FlashImage::parse(data.clone(), &NullCodec).unwrap();
        Assemble::new(&NullCodec).run(&mut image).unwrap();
        assert_eq!(image.buf(), &data[..]);
    }

    #[test]
    fn bios_without_volume_cannot_assemble() {
        let mut bios =
            crate::bios::BiosRegion::parse(Buffer::root(vec![0xFF; 0x1000]), &NullCodec).unwrap();
        assert!(matches!(
            Assemble::new(&NullCodec).run(&mut bios),
            Err(FirmwareError::Invariant { .. })
        ));
    }
}
