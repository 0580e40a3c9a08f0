//! Well-known firmware storage GUIDs.
//!
//! Filesystem GUIDs identify the layout of a firmware volume; section GUIDs
//! select the handling of GUID-defined sections. Volumes with filesystem
//! GUIDs outside this table are still structurally parseable, they just
//! carry no label.
//!
//! ## License
//!
//! Copyright (C) Microsoft Corporation.
//!
//! SPDX-License-Identifier: Apache-2.0
//!

use r_efi::efi;

/// EFI_FIRMWARE_FILE_SYSTEM_GUID
pub const EFI_FIRMWARE_FILE_SYSTEM_GUID: efi::Guid =
    efi::Guid::from_fields(0x7a9354d9, 0x0468, 0x444a, 0x81, 0xce, &[0x0b, 0xf6, 0x17, 0xd8, 0x90, 0xdf]);

/// EFI_FIRMWARE_FILE_SYSTEM2_GUID
pub const EFI_FIRMWARE_FILE_SYSTEM2_GUID: efi::Guid =
    efi::Guid::from_fields(0x8c8ce578, 0x8a3d, 0x4f1c, 0x99, 0x35, &[0x89, 0x61, 0x85, 0xc3, 0x2d, 0xd3]);

/// EFI_FIRMWARE_FILE_SYSTEM3_GUID
pub const EFI_FIRMWARE_FILE_SYSTEM3_GUID: efi::Guid =
    efi::Guid::from_fields(0x5473c07a, 0x3dcb, 0x4dca, 0xbd, 0x6f, &[0x1e, 0x96, 0x89, 0xe7, 0x34, 0x9a]);

/// EVSA NVRAM store.
pub const NVRAM_EVSA_GUID: efi::Guid =
    efi::Guid::from_fields(0xfff12b8d, 0x7696, 0x4c8b, 0xa9, 0x85, &[0x27, 0x47, 0x07, 0x5b, 0x4f, 0x50]);

/// NVAR NVRAM store.
pub const NVRAM_NVAR_GUID: efi::Guid =
    efi::Guid::from_fields(0xcef5b9a3, 0x476d, 0x497f, 0x9f, 0xdc, &[0xe9, 0x81, 0x43, 0xe0, 0x42, 0x2c]);

/// Secondary EVSA NVRAM store.
pub const NVRAM_EVSA2_GUID: efi::Guid =
    efi::Guid::from_fields(0x00504624, 0x8a59, 0x4eeb, 0xbd, 0x0f, &[0x6b, 0x36, 0xe9, 0x61, 0x28, 0xe0]);

/// Apple boot volume.
pub const APPLE_BOOT_GUID: efi::Guid =
    efi::Guid::from_fields(0x04adeead, 0x61ff, 0x4d31, 0xb6, 0xba, &[0x64, 0xf8, 0xbf, 0x90, 0x1f, 0x5a]);

/// Phoenix flash header, variant 1.
pub const PFH1_GUID: efi::Guid =
    efi::Guid::from_fields(0x16b45da2, 0x7d70, 0x4aea, 0xa5, 0x8d, &[0x76, 0x0e, 0x9e, 0xcb, 0x84, 0x1d]);

/// Phoenix flash header, variant 2.
pub const PFH2_GUID: efi::Guid =
    efi::Guid::from_fields(0xe360bdba, 0xc3ce, 0x46be, 0x8f, 0x37, &[0xb2, 0x31, 0xe5, 0xcb, 0x9f, 0x35]);

/// GUID-defined section payload is LZMA compressed.
pub const LZMA_SECTION_GUID: efi::Guid =
    efi::Guid::from_fields(0xEE4E5898, 0x3914, 0x4259, 0x9D, 0x6E, &[0xDC, 0x7B, 0xD7, 0x94, 0x03, 0xCF]);

/// GUID-defined section payload is LZMA compressed after the x86
/// branch/call/jump filter.
pub const LZMA_F86_SECTION_GUID: efi::Guid =
    efi::Guid::from_fields(0xD42AE6BD, 0x1352, 0x4bfb, 0x90, 0x9A, &[0xCA, 0x72, 0xA6, 0xEA, 0xE8, 0x89]);

/// Human labels for the known firmware volume filesystem GUIDs.
pub const FILESYSTEM_LABELS: [(efi::Guid, &str); 9] = [
    (EFI_FIRMWARE_FILE_SYSTEM_GUID, "FFS1"),
    (EFI_FIRMWARE_FILE_SYSTEM2_GUID, "FFS2"),
    (EFI_FIRMWARE_FILE_SYSTEM3_GUID, "FFS3"),
    (NVRAM_EVSA_GUID, "NVRAM_EVSA"),
    (NVRAM_NVAR_GUID, "NVRAM_NVAR"),
    (NVRAM_EVSA2_GUID, "NVRAM_EVSA2"),
    (APPLE_BOOT_GUID, "APPLE_BOOT"),
    (PFH1_GUID, "PFH1"),
    (PFH2_GUID, "PFH2"),
];

/// Look up the label of a known filesystem GUID.
pub fn filesystem_label(guid: &efi::Guid) -> Option<&'static str> {
    FILESYSTEM_LABELS.iter().find(|(known, _)| known == guid).map(|(_, label)| *label)
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn known_filesystem_guids_have_labels() {
        assert_eq!(filesystem_label(&EFI_FIRMWARE_FILE_SYSTEM2_GUID), Some("FFS2"));
        assert_eq!(filesystem_label(&LZMA_SECTION_GUID), None);
    }
}
