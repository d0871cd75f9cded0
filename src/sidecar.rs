//! The `.parserconfig` sidecar: a binary serialization of the parsed header
//! that lets `Build` reproduce an image without re-parsing the original, and
//! a trailing SHA-1 digest that detects tampering.

use std::io::{Read, Write};

use sha1::{Digest, Sha1};
use subtle::ConstantTimeEq;

use crate::boot::BootImageInfo;
use crate::detect::RamdiskFormat;
use crate::error::{Error, Result};
use crate::io::{read_len_prefixed, read_u32_le, read_u64_le, read_u8, write_len_prefixed, write_u32_le, write_u64_le, write_u8};
use crate::vendor::{VendorBootImageInfo, VendorRamdiskTableEntry};

const SHA1_LEN: usize = 20;

/// Writes the boot sidecar body (without the trailing SHA-1 digest).
pub fn write_boot<W: Write>(info: &BootImageInfo, w: &mut W) -> Result<()> {
    write_len_prefixed(w, crate::boot::MAGIC)?;
    write_u32_le(w, info.header_version)?;
    write_u32_le(w, info.kernel_size)?;
    write_u32_le(w, info.ramdisk_size)?;
    write_u8(w, info.ramdisk_compression.to_u8())?;
    write_u32_le(w, info.page_size)?;
    write_len_prefixed(w, info.os_version.as_bytes())?;
    write_len_prefixed(w, info.os_patch_level.as_bytes())?;
    write_len_prefixed(w, &info.cmdline)?;
    write_u32_le(w, info.kernel_load_address)?;
    write_u32_le(w, info.ramdisk_load_address)?;
    write_u32_le(w, info.second_size)?;
    write_u32_le(w, info.second_load_address)?;
    write_u32_le(w, info.tags_load_address)?;
    write_len_prefixed(w, &info.product_name)?;
    write_len_prefixed(w, &info.extra_cmdline)?;
    write_u32_le(w, info.recovery_dtbo_size)?;
    write_u64_le(w, info.recovery_dtbo_offset)?;
    write_u32_le(w, info.boot_header_size)?;
    write_u32_le(w, info.dtb_size)?;
    write_u64_le(w, info.dtb_load_address)?;
    write_u32_le(w, info.boot_signature_size)?;
    Ok(())
}

/// Reads a boot sidecar body, validating the leading magic.
pub fn read_boot<R: Read>(r: &mut R) -> Result<BootImageInfo> {
    let magic = read_len_prefixed(r)?;
    if magic != crate::boot::MAGIC {
        return Err(Error::InvalidConfig(format!(
            "sidecar magic {:?} is not {:?}",
            String::from_utf8_lossy(&magic),
            std::str::from_utf8(crate::boot::MAGIC).unwrap()
        )));
    }
    let header_version = read_u32_le(r)?;
    let kernel_size = read_u32_le(r)?;
    let ramdisk_size = read_u32_le(r)?;
    let ramdisk_compression = RamdiskFormat::from_u8(read_u8(r)?);
    let page_size = read_u32_le(r)?;
    let os_version = read_string(r)?;
    let os_patch_level = read_string(r)?;
    let cmdline = read_len_prefixed(r)?;
    let kernel_load_address = read_u32_le(r)?;
    let ramdisk_load_address = read_u32_le(r)?;
    let second_size = read_u32_le(r)?;
    let second_load_address = read_u32_le(r)?;
    let tags_load_address = read_u32_le(r)?;
    let product_name = read_len_prefixed(r)?;
    let extra_cmdline = read_len_prefixed(r)?;
    let recovery_dtbo_size = read_u32_le(r)?;
    let recovery_dtbo_offset = read_u64_le(r)?;
    let boot_header_size = read_u32_le(r)?;
    let dtb_size = read_u32_le(r)?;
    let dtb_load_address = read_u64_le(r)?;
    let boot_signature_size = read_u32_le(r)?;

    Ok(BootImageInfo {
        header_version,
        page_size,
        kernel_size,
        kernel_load_address,
        ramdisk_size,
        ramdisk_load_address,
        second_size,
        second_load_address,
        tags_load_address,
        os_version,
        os_patch_level,
        product_name,
        cmdline,
        extra_cmdline,
        recovery_dtbo_size,
        recovery_dtbo_offset,
        boot_header_size,
        dtb_size,
        dtb_load_address,
        boot_signature_size,
        ramdisk_compression,
    })
}

/// Writes the vendor sidecar body (without the trailing SHA-1 digest).
pub fn write_vendor<W: Write>(info: &VendorBootImageInfo, w: &mut W) -> Result<()> {
    write_len_prefixed(w, crate::vendor::MAGIC)?;
    write_u32_le(w, info.header_version)?;
    write_u32_le(w, info.page_size)?;
    write_u32_le(w, info.kernel_load_address)?;
    write_u32_le(w, info.ramdisk_load_address)?;
    write_u32_le(w, info.vendor_ramdisk_size)?;
    write_len_prefixed(w, &info.cmdline)?;
    write_u32_le(w, info.tags_load_address)?;
    write_len_prefixed(w, &info.product_name)?;
    write_u32_le(w, info.header_size)?;
    write_u32_le(w, info.dtb_size)?;
    write_u64_le(w, info.dtb_load_address)?;
    write_u32_le(w, info.vendor_ramdisk_table_size)?;
    write_u32_le(w, info.vendor_ramdisk_table_entry_num)?;
    write_u32_le(w, info.vendor_ramdisk_table_entry_size)?;
    write_u32_le(w, info.vendor_bootconfig_size)?;
    for entry in &info.vendor_ramdisk_table {
        write_len_prefixed(w, entry.output_name.as_bytes())?;
        write_u32_le(w, entry.size)?;
        write_u32_le(w, entry.offset)?;
        write_u32_le(w, entry.entry_type)?;
        write_len_prefixed(w, &entry.name)?;
        for word in entry.board_id {
            write_u32_le(w, word)?;
        }
        write_u8(w, entry.ramdisk_compression.to_u8())?;
    }
    Ok(())
}

/// Reads a vendor sidecar body, validating the leading magic.
pub fn read_vendor<R: Read>(r: &mut R) -> Result<VendorBootImageInfo> {
    let magic = read_len_prefixed(r)?;
    if magic != crate::vendor::MAGIC {
        return Err(Error::InvalidConfig(format!(
            "sidecar magic {:?} is not {:?}",
            String::from_utf8_lossy(&magic),
            std::str::from_utf8(crate::vendor::MAGIC).unwrap()
        )));
    }
    let header_version = read_u32_le(r)?;
    let page_size = read_u32_le(r)?;
    let kernel_load_address = read_u32_le(r)?;
    let ramdisk_load_address = read_u32_le(r)?;
    let vendor_ramdisk_size = read_u32_le(r)?;
    let cmdline = read_len_prefixed(r)?;
    let tags_load_address = read_u32_le(r)?;
    let product_name = read_len_prefixed(r)?;
    let header_size = read_u32_le(r)?;
    let dtb_size = read_u32_le(r)?;
    let dtb_load_address = read_u64_le(r)?;
    let vendor_ramdisk_table_size = read_u32_le(r)?;
    let vendor_ramdisk_table_entry_num = read_u32_le(r)?;
    let vendor_ramdisk_table_entry_size = read_u32_le(r)?;
    let vendor_bootconfig_size = read_u32_le(r)?;

    let mut vendor_ramdisk_table = Vec::with_capacity(vendor_ramdisk_table_entry_num as usize);
    for _ in 0..vendor_ramdisk_table_entry_num {
        let output_name = read_string(r)?;
        let size = read_u32_le(r)?;
        let offset = read_u32_le(r)?;
        let entry_type = read_u32_le(r)?;
        let name = read_len_prefixed(r)?;
        let mut board_id = [0u32; 4];
        for word in board_id.iter_mut() {
            *word = read_u32_le(r)?;
        }
        let ramdisk_compression = RamdiskFormat::from_u8(read_u8(r)?);
        vendor_ramdisk_table.push(VendorRamdiskTableEntry {
            size,
            offset,
            entry_type,
            name,
            board_id,
            output_name,
            ramdisk_compression,
        });
    }

    Ok(VendorBootImageInfo {
        header_version,
        page_size,
        kernel_load_address,
        ramdisk_load_address,
        vendor_ramdisk_size,
        cmdline,
        tags_load_address,
        product_name,
        header_size,
        dtb_size,
        dtb_load_address,
        vendor_ramdisk_table_size,
        vendor_ramdisk_table_entry_num,
        vendor_ramdisk_table_entry_size,
        vendor_bootconfig_size,
        vendor_ramdisk_table,
    })
}

fn read_string<R: Read>(r: &mut R) -> Result<String> {
    let bytes = read_len_prefixed(r)?;
    Ok(String::from_utf8_lossy(&bytes).into_owned())
}

/// Appends a 20-byte SHA-1 digest of `path`'s current content.
pub fn append_sha1(path: &std::path::Path) -> Result<()> {
    let content = std::fs::read(path)?;
    let digest = Sha1::digest(&content);
    let mut file = std::fs::OpenOptions::new().append(true).open(path)?;
    file.write_all(&digest)?;
    Ok(())
}

/// Validates the trailing 20-byte SHA-1 digest against the file's prefix.
pub fn validate_sha1(path: &std::path::Path) -> Result<()> {
    let content = std::fs::read(path)?;
    if content.len() < SHA1_LEN {
        return Err(Error::Integrity {
            path: path.display().to_string(),
        });
    }
    let (body, digest) = content.split_at(content.len() - SHA1_LEN);
    let actual = Sha1::digest(body);
    if actual.as_slice().ct_eq(digest).unwrap_u8() == 0 {
        return Err(Error::Integrity {
            path: path.display().to_string(),
        });
    }
    Ok(())
}

/// Strips the trailing 20-byte SHA-1 digest, returning the sidecar body.
pub fn strip_sha1(content: &[u8]) -> Result<&[u8]> {
    if content.len() < SHA1_LEN {
        return Err(Error::Integrity {
            path: "<sidecar>".into(),
        });
    }
    Ok(&content[..content.len() - SHA1_LEN])
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_boot() -> BootImageInfo {
        BootImageInfo {
            header_version: 2,
            page_size: 2048,
            kernel_size: 4096,
            kernel_load_address: 0x8000,
            ramdisk_size: 0,
            ramdisk_load_address: 0,
            second_size: 0,
            second_load_address: 0,
            tags_load_address: 0x100,
            os_version: "12.0.1".into(),
            os_patch_level: "2024-03".into(),
            product_name: b"coral".to_vec(),
            cmdline: b"console=ttyS0".to_vec(),
            extra_cmdline: Vec::new(),
            recovery_dtbo_size: 0,
            recovery_dtbo_offset: 0,
            boot_header_size: 1660,
            dtb_size: 0,
            dtb_load_address: 0,
            boot_signature_size: 0,
            ramdisk_compression: RamdiskFormat::None,
        }
    }

    #[test]
    fn boot_sidecar_round_trips() {
        let info = sample_boot();
        let mut buf = Vec::new();
        write_boot(&info, &mut buf).unwrap();
        let parsed = read_boot(&mut &buf[..]).unwrap();
        assert_eq!(parsed, info);
    }

    #[test]
    fn vendor_sidecar_round_trips_with_table() {
        let info = VendorBootImageInfo {
            header_version: 4,
            page_size: 4096,
            kernel_load_address: 0,
            ramdisk_load_address: 0,
            vendor_ramdisk_size: 300,
            cmdline: b"console=ttyS0".to_vec(),
            tags_load_address: 0,
            product_name: b"coral".to_vec(),
            header_size: 2128,
            dtb_size: 0,
            dtb_load_address: 0,
            vendor_ramdisk_table_size: 120,
            vendor_ramdisk_table_entry_num: 2,
            vendor_ramdisk_table_entry_size: 60,
            vendor_bootconfig_size: 0,
            vendor_ramdisk_table: vec![
                VendorRamdiskTableEntry {
                    size: 100,
                    offset: 0,
                    entry_type: 1,
                    name: b"first".to_vec(),
                    board_id: [0; 4],
                    output_name: "vendor_ramdisk00".into(),
                    ramdisk_compression: RamdiskFormat::None,
                },
                VendorRamdiskTableEntry {
                    size: 200,
                    offset: 100,
                    entry_type: 1,
                    name: b"second".to_vec(),
                    board_id: [0; 4],
                    output_name: "vendor_ramdisk01".into(),
                    ramdisk_compression: RamdiskFormat::Gzip,
                },
            ],
        };
        let mut buf = Vec::new();
        write_vendor(&info, &mut buf).unwrap();
        let parsed = read_vendor(&mut &buf[..]).unwrap();
        assert_eq!(parsed, info);
    }

    #[test]
    fn sha1_validates_after_append() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join(".parserconfig");
        std::fs::write(&path, b"some sidecar bytes").unwrap();
        append_sha1(&path).unwrap();
        validate_sha1(&path).unwrap();
    }

    #[test]
    fn sha1_rejects_flipped_byte() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join(".parserconfig");
        std::fs::write(&path, b"some sidecar bytes").unwrap();
        append_sha1(&path).unwrap();

        let mut content = std::fs::read(&path).unwrap();
        content[0] ^= 0xFF;
        std::fs::write(&path, content).unwrap();

        let err = validate_sha1(&path).unwrap_err();
        assert!(matches!(err, Error::Integrity { .. }));
    }

    #[test]
    fn sha1_rejects_short_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join(".parserconfig");
        std::fs::write(&path, b"short").unwrap();
        let err = validate_sha1(&path).unwrap_err();
        assert!(matches!(err, Error::Integrity { .. }));
    }
}
