//! Boot-image header parser and writer, versions 0 through 4.
//!
//! ## Section layout, versions 0-2
//!
//! ```text
//! ┌─────────────────────────┐
//! │boot image header        │
//! │+ padding to page size   │
//! ├─────────────────────────┤
//! │kernel                   │
//! │+ padding to page size   │
//! ├─────────────────────────┤
//! │ramdisk                  │
//! │+ padding to page size   │
//! ├─────────────────────────┤
//! │second stage bootloader  │
//! │+ padding to page size   │
//! ├─────────────────────────┤
//! │recovery dtbo/acpio (v1+)│
//! │+ padding to page size   │
//! ├─────────────────────────┤
//! │dtb (v2)                 │
//! │+ padding to page size   │
//! └─────────────────────────┘
//! ```
//!
//! ## Section layout, versions 3-4 (page size fixed at 4096)
//!
//! ```text
//! ┌───────────────────────┐
//! │boot image header      │
//! │+ padding to page size │
//! ├───────────────────────┤
//! │kernel                 │
//! │+ padding to page size │
//! ├───────────────────────┤
//! │ramdisk                │
//! │+ padding to page size │
//! ├───────────────────────┤
//! │boot signature (v4)    │
//! │+ padding to page size │
//! └───────────────────────┘
//! ```
//!
//! `recovery_dtbo` is placed at its explicit stored offset rather than a
//! computed running position; `boot_signature` naturally lands right after
//! the ramdisk since v3/v4 headers carry no `second`/`dtb` fields at all.

use std::io::{Read, Seek, SeekFrom, Write};

use binrw::{binrw, io::NoSeek, BinRead, BinWrite};

use crate::detect::RamdiskFormat;
use crate::error::{Error, Result};
use crate::io::{cstr_trim, number_of_pages};
use crate::version::{OsPatch, OsVersion, OsVersionPatch};

/// The 8-byte magic identifying a classic boot image.
pub const MAGIC: &[u8; 8] = b"ANDROID!";

#[binrw]
#[derive(Clone, Debug, PartialEq, Eq)]
#[brw(little, magic = b"ANDROID!")]
struct WireHeaderV0 {
    kernel_size: u32,
    kernel_addr: u32,
    ramdisk_size: u32,
    ramdisk_addr: u32,
    second_size: u32,
    second_addr: u32,
    tags_addr: u32,
    page_size: u32,
    #[br(temp)]
    #[bw(calc = self.header_version())]
    header_version: u32,
    osversionpatch: OsVersionPatch,
    product_name: [u8; 16],
    cmdline: Box<[u8; 512]>,
    hash_digest: [u8; 32],
    extra_cmdline: Box<[u8; 1024]>,
    #[br(args(header_version))]
    versioned: WireHeaderV0Versioned,
}

impl WireHeaderV0 {
    fn header_version(&self) -> u32 {
        match self.versioned {
            WireHeaderV0Versioned::V0 => 0,
            WireHeaderV0Versioned::V1 { .. } => 1,
            WireHeaderV0Versioned::V2 { .. } => 2,
        }
    }
}

#[binrw]
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[br(import(header_version: u32))]
enum WireHeaderV0Versioned {
    #[br(pre_assert(header_version == 0))]
    V0,
    #[br(pre_assert(header_version == 1))]
    V1 {
        recovery_dtbo_size: u32,
        recovery_dtbo_offset: u64,
        #[br(temp, assert(header_size == 1648))]
        #[bw(calc = 1648)]
        header_size: u32,
    },
    #[br(pre_assert(header_version == 2))]
    V2 {
        recovery_dtbo_size: u32,
        recovery_dtbo_offset: u64,
        #[br(temp, assert(header_size == 1660))]
        #[bw(calc = 1660)]
        header_size: u32,
        dtb_size: u32,
        dtb_addr: u64,
    },
}

#[binrw]
#[derive(Clone, Debug, PartialEq, Eq)]
#[brw(little, magic = b"ANDROID!")]
#[br(assert(header_size == self.header_size()))]
struct WireHeaderV3 {
    kernel_size: u32,
    ramdisk_size: u32,
    osversionpatch: OsVersionPatch,
    #[br(temp)]
    #[bw(calc = self.header_size())]
    header_size: u32,
    #[brw(pad_before = 16)]
    #[br(temp)]
    #[bw(calc = self.header_version())]
    header_version: u32,
    cmdline: Box<[u8; 1536]>,
    #[br(if(header_version == 4))]
    boot_signature_size: Option<u32>,
}

impl WireHeaderV3 {
    const PAGE_SIZE: u32 = 4096;

    fn header_version(&self) -> u32 {
        if self.boot_signature_size.is_some() {
            4
        } else {
            3
        }
    }

    fn header_size(&self) -> u32 {
        if self.boot_signature_size.is_some() {
            1584
        } else {
            1580
        }
    }
}

enum WireHeader {
    V0(WireHeaderV0),
    V3(WireHeaderV3),
}

impl WireHeader {
    fn parse<R: Read + Seek>(reader: &mut R) -> Result<Self> {
        reader.seek(SeekFrom::Start(0x28)).map_err(Error::Seek)?;
        let mut version_buf = [0u8; 4];
        reader.read_exact(&mut version_buf).map_err(Error::Io)?;
        reader.seek(SeekFrom::Start(0)).map_err(Error::Seek)?;

        let version = u32::from_le_bytes(version_buf);
        if version > 1024 {
            // Overlaps a legacy pre-v0 dt_size field; explicitly unsupported.
            return Err(Error::UnsupportedVersion(version));
        }
        Ok(match version {
            0..=2 => Self::V0(WireHeaderV0::read(reader)?),
            3 | 4 => Self::V3(WireHeaderV3::read(reader)?),
            other => return Err(Error::UnsupportedVersion(other)),
        })
    }

    fn write<W: Write>(&self, writer: &mut W) -> Result<()> {
        let writer = &mut NoSeek::new(writer);
        match self {
            Self::V0(h) => h.write(writer)?,
            Self::V3(h) => h.write(writer)?,
        }
        Ok(())
    }
}

/// Parsed header of a classical boot image, independent of wire version.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BootImageInfo {
    pub header_version: u32,
    pub page_size: u32,
    pub kernel_size: u32,
    pub kernel_load_address: u32,
    pub ramdisk_size: u32,
    pub ramdisk_load_address: u32,
    pub second_size: u32,
    pub second_load_address: u32,
    pub tags_load_address: u32,
    /// Decoded `"A.B.C"`, empty when the packed field is zero.
    pub os_version: String,
    /// Decoded `"yyyy-mm"`, empty when the packed field is zero.
    pub os_patch_level: String,
    /// 16-byte board/product name, v<3 only; empty otherwise.
    pub product_name: Vec<u8>,
    /// Command line, up to 512 bytes for v<3, up to 1536 for v>=3.
    pub cmdline: Vec<u8>,
    /// Command line continuation, 1024 bytes, v<3 only.
    pub extra_cmdline: Vec<u8>,
    pub recovery_dtbo_size: u32,
    pub recovery_dtbo_offset: u64,
    pub boot_header_size: u32,
    pub dtb_size: u32,
    pub dtb_load_address: u64,
    pub boot_signature_size: u32,
    pub ramdisk_compression: RamdiskFormat,
}

/// Byte offset and size of each payload section, `None` when absent/empty.
#[derive(Debug, Clone, Copy, Default)]
pub struct BootSections {
    pub kernel: Option<(u64, u32)>,
    pub ramdisk: Option<(u64, u32)>,
    pub second: Option<(u64, u32)>,
    pub recovery_dtbo: Option<(u64, u32)>,
    pub dtb: Option<(u64, u32)>,
    pub boot_signature: Option<(u64, u32)>,
}

fn present(size: u32) -> Option<u32> {
    (size != 0).then_some(size)
}

impl BootImageInfo {
    /// Computes every section's offset and size per the spec's page-aligned
    /// layout. `recovery_dtbo` uses its stored explicit offset rather than a
    /// running sum, since the wire format records it directly.
    pub fn sections(&self) -> BootSections {
        let page = self.page_size;
        let kernel_pages = number_of_pages(self.kernel_size, page);
        let ramdisk_pages = number_of_pages(self.ramdisk_size, page);
        let second_pages = number_of_pages(self.second_size, page);
        let recovery_dtbo_pages = number_of_pages(self.recovery_dtbo_size, page);

        let page = u64::from(page);
        let kernel_pos = page;
        let ramdisk_pos = page * u64::from(1 + kernel_pages);
        let second_pos = page * u64::from(1 + kernel_pages + ramdisk_pages);
        let dtb_pos = page
            * u64::from(1 + kernel_pages + ramdisk_pages + second_pages + recovery_dtbo_pages);
        let boot_signature_pos = page * u64::from(1 + kernel_pages + ramdisk_pages);

        BootSections {
            kernel: present(self.kernel_size).map(|s| (kernel_pos, s)),
            ramdisk: present(self.ramdisk_size).map(|s| (ramdisk_pos, s)),
            second: present(self.second_size).map(|s| (second_pos, s)),
            recovery_dtbo: present(self.recovery_dtbo_size)
                .map(|s| (self.recovery_dtbo_offset, s)),
            dtb: present(self.dtb_size).map(|s| (dtb_pos, s)),
            boot_signature: present(self.boot_signature_size).map(|s| (boot_signature_pos, s)),
        }
    }
}

fn decode_os_version_patch(raw: u32) -> (String, String) {
    let vp = OsVersionPatch::from_raw(raw);
    let version = vp.version();
    let patch = vp.patch();
    (
        if version.is_zero() {
            String::new()
        } else {
            version.to_string()
        },
        if patch.is_zero() {
            String::new()
        } else {
            patch.to_string()
        },
    )
}

fn parse_os_version(s: &str) -> Option<OsVersion> {
    let mut parts = s.split('.');
    let a: u8 = parts.next()?.parse().ok()?;
    let b: u8 = parts.next()?.parse().ok()?;
    let c: u8 = parts.next()?.parse().ok()?;
    if parts.next().is_some() {
        return None;
    }
    Some(OsVersion::new(a, b, c))
}

fn parse_os_patch(s: &str) -> Option<OsPatch> {
    let (year, month) = s.split_once('-')?;
    let year: u16 = year.parse().ok()?;
    let month: u8 = month.parse().ok()?;
    Some(OsPatch::new(year, month))
}

/// Re-encodes the packed `os_version_patch_level` field from its decoded
/// strings. An unparseable string decodes to zero, per spec.
fn encode_os_version_patch(os_version: &str, os_patch_level: &str) -> u32 {
    let version = parse_os_version(os_version).unwrap_or(OsVersion::new(0, 0, 0));
    let patch = parse_os_patch(os_patch_level).unwrap_or(OsPatch::new(2000, 0));
    OsVersionPatch::new(version, patch).to_raw()
}

/// Parses a boot image header from `reader`, which must be positioned at 0.
pub fn parse<R: Read + Seek>(reader: &mut R) -> Result<BootImageInfo> {
    match WireHeader::parse(reader)? {
        WireHeader::V0(h) => {
            let (os_version, os_patch_level) = decode_os_version_patch(h.osversionpatch.to_raw());
            let (recovery_dtbo_size, recovery_dtbo_offset, boot_header_size, dtb_size, dtb_load_address) =
                match h.versioned {
                    WireHeaderV0Versioned::V0 => (0, 0, 0, 0, 0),
                    WireHeaderV0Versioned::V1 {
                        recovery_dtbo_size,
                        recovery_dtbo_offset,
                    } => (recovery_dtbo_size, recovery_dtbo_offset, 1648, 0, 0),
                    WireHeaderV0Versioned::V2 {
                        recovery_dtbo_size,
                        recovery_dtbo_offset,
                        dtb_size,
                        dtb_addr,
                    } => (recovery_dtbo_size, recovery_dtbo_offset, 1660, dtb_size, dtb_addr),
                };
            Ok(BootImageInfo {
                header_version: h.header_version(),
                page_size: h.page_size,
                kernel_size: h.kernel_size,
                kernel_load_address: h.kernel_addr,
                ramdisk_size: h.ramdisk_size,
                ramdisk_load_address: h.ramdisk_addr,
                second_size: h.second_size,
                second_load_address: h.second_addr,
                tags_load_address: h.tags_addr,
                os_version,
                os_patch_level,
                product_name: cstr_trim(&h.product_name).to_vec(),
                cmdline: cstr_trim(&h.cmdline[..]).to_vec(),
                extra_cmdline: cstr_trim(&h.extra_cmdline[..]).to_vec(),
                recovery_dtbo_size,
                recovery_dtbo_offset,
                boot_header_size,
                dtb_size,
                dtb_load_address,
                boot_signature_size: 0,
                ramdisk_compression: RamdiskFormat::None,
            })
        }
        WireHeader::V3(h) => {
            let (os_version, os_patch_level) = decode_os_version_patch(h.osversionpatch.to_raw());
            Ok(BootImageInfo {
                header_version: h.header_version(),
                page_size: WireHeaderV3::PAGE_SIZE,
                kernel_size: h.kernel_size,
                kernel_load_address: 0,
                ramdisk_size: h.ramdisk_size,
                ramdisk_load_address: 0,
                second_size: 0,
                second_load_address: 0,
                tags_load_address: 0,
                os_version,
                os_patch_level,
                product_name: Vec::new(),
                cmdline: cstr_trim(&h.cmdline[..]).to_vec(),
                extra_cmdline: Vec::new(),
                recovery_dtbo_size: 0,
                recovery_dtbo_offset: 0,
                boot_header_size: h.header_size(),
                dtb_size: 0,
                dtb_load_address: 0,
                boot_signature_size: h.boot_signature_size.unwrap_or(0),
                ramdisk_compression: RamdiskFormat::None,
            })
        }
    }
}

fn write_trunc(dest: &mut [u8], src: &[u8]) {
    let n = src.len().min(dest.len());
    dest[..n].copy_from_slice(&src[..n]);
}

fn full_cmdline(info: &BootImageInfo) -> Vec<u8> {
    let mut combined = info.cmdline.clone();
    if !info.extra_cmdline.is_empty() {
        combined.push(b' ');
        combined.extend_from_slice(&info.extra_cmdline);
    }
    combined
}

fn to_wire_v0(info: &BootImageInfo) -> Result<WireHeaderV0> {
    let osversionpatch = OsVersionPatch::from_raw(encode_os_version_patch(
        &info.os_version,
        &info.os_patch_level,
    ));
    let versioned = match info.header_version {
        0 => WireHeaderV0Versioned::V0,
        1 => WireHeaderV0Versioned::V1 {
            recovery_dtbo_size: info.recovery_dtbo_size,
            recovery_dtbo_offset: info.recovery_dtbo_offset,
        },
        2 => WireHeaderV0Versioned::V2 {
            recovery_dtbo_size: info.recovery_dtbo_size,
            recovery_dtbo_offset: info.recovery_dtbo_offset,
            dtb_size: info.dtb_size,
            dtb_addr: info.dtb_load_address,
        },
        v => return Err(Error::UnsupportedVersion(v)),
    };

    let mut product_name = [0u8; 16];
    write_trunc(&mut product_name, &info.product_name);

    let combined = full_cmdline(info);
    let (part1, part2) = if combined.len() > 512 {
        combined.split_at(512)
    } else {
        (combined.as_slice(), &b""[..])
    };
    let mut cmdline = Box::new([0u8; 512]);
    write_trunc(&mut cmdline[..], part1);
    let mut extra_cmdline = Box::new([0u8; 1024]);
    write_trunc(&mut extra_cmdline[..], part2);

    Ok(WireHeaderV0 {
        kernel_size: info.kernel_size,
        kernel_addr: info.kernel_load_address,
        ramdisk_size: info.ramdisk_size,
        ramdisk_addr: info.ramdisk_load_address,
        second_size: info.second_size,
        second_addr: info.second_load_address,
        tags_addr: info.tags_load_address,
        page_size: info.page_size,
        osversionpatch,
        product_name,
        cmdline,
        hash_digest: [0u8; 32],
        extra_cmdline,
        versioned,
    })
}

fn to_wire_v3(info: &BootImageInfo) -> Result<WireHeaderV3> {
    let osversionpatch = OsVersionPatch::from_raw(encode_os_version_patch(
        &info.os_version,
        &info.os_patch_level,
    ));
    let mut cmdline = Box::new([0u8; 1536]);
    write_trunc(&mut cmdline[..], &full_cmdline(info));
    let boot_signature_size = (info.header_version == 4).then_some(info.boot_signature_size);

    Ok(WireHeaderV3 {
        kernel_size: info.kernel_size,
        ramdisk_size: info.ramdisk_size,
        osversionpatch,
        cmdline,
        boot_signature_size,
    })
}

/// Serializes `info` as its header-version-appropriate wire format. The
/// caller still writes each payload section at its page-aligned offset.
pub fn write<W: Write>(info: &BootImageInfo, writer: &mut W) -> Result<()> {
    let wire = match info.header_version {
        0..=2 => WireHeader::V0(to_wire_v0(info)?),
        3 | 4 => WireHeader::V3(to_wire_v3(info)?),
        v => return Err(Error::UnsupportedVersion(v)),
    };
    wire.write(writer)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    fn minimal_v2() -> BootImageInfo {
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
            product_name: Vec::new(),
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
    fn round_trips_minimal_v2_header() {
        let info = minimal_v2();
        let mut buf = Vec::new();
        write(&info, &mut buf).unwrap();

        let mut cursor = Cursor::new(buf);
        let parsed = parse(&mut cursor).unwrap();
        assert_eq!(parsed.header_version, 2);
        assert_eq!(parsed.kernel_size, 4096);
        assert_eq!(parsed.os_version, "12.0.1");
        assert_eq!(parsed.os_patch_level, "2024-03");
        assert_eq!(parsed.cmdline, b"console=ttyS0");
    }

    #[test]
    fn v3_header_forces_4096_page_size() {
        let mut info = minimal_v2();
        info.header_version = 3;
        info.page_size = 4096;
        info.cmdline = b"console=ttyS0 androidboot.hardware=foo".to_vec();

        let mut buf = Vec::new();
        write(&info, &mut buf).unwrap();
        let mut cursor = Cursor::new(buf);
        let parsed = parse(&mut cursor).unwrap();
        assert_eq!(parsed.page_size, 4096);
        assert_eq!(parsed.cmdline, b"console=ttyS0 androidboot.hardware=foo");
    }

    #[test]
    fn zero_os_version_renders_as_empty_strings() {
        let mut info = minimal_v2();
        info.os_version.clear();
        info.os_patch_level.clear();

        let mut buf = Vec::new();
        write(&info, &mut buf).unwrap();
        let mut cursor = Cursor::new(buf);
        let parsed = parse(&mut cursor).unwrap();
        assert_eq!(parsed.os_version, "");
        assert_eq!(parsed.os_patch_level, "");
    }

    #[test]
    fn sections_are_page_aligned_and_contiguous() {
        let mut info = minimal_v2();
        info.ramdisk_size = 10;
        let sections = info.sections();
        let (kernel_pos, _) = sections.kernel.unwrap();
        let (ramdisk_pos, _) = sections.ramdisk.unwrap();
        assert_eq!(kernel_pos, 2048);
        assert_eq!(ramdisk_pos, 2048 * (1 + 2)); // kernel_size=4096 -> 2 pages
    }

    #[test]
    fn recovery_dtbo_uses_its_explicit_offset() {
        let mut info = minimal_v2();
        info.header_version = 1;
        info.recovery_dtbo_size = 50;
        info.recovery_dtbo_offset = 999_999;
        let sections = info.sections();
        assert_eq!(sections.recovery_dtbo, Some((999_999, 50)));
    }

    #[test]
    fn rejects_header_version_over_legacy_threshold() {
        let mut bytes = vec![0u8; 0x2C];
        bytes[..8].copy_from_slice(MAGIC);
        bytes[0x28..0x2C].copy_from_slice(&2000u32.to_le_bytes());
        let mut cursor = Cursor::new(bytes);
        let err = parse(&mut cursor).unwrap_err();
        assert!(matches!(err, Error::UnsupportedVersion(2000)));
    }
}
