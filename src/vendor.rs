//! Vendor-boot header parser and writer, header versions 3 and 4.
//!
//! After `num_header_pages` of header, the regions are: concatenated
//! ramdisks (table order), dtb, ramdisk table (v>3), bootconfig (v>3). For
//! v=3 the whole ramdisk region is a single unnamed entry.

use std::io::{Read, Seek, SeekFrom, Write};

use binrw::{binrw, BinRead, BinWrite};

use crate::detect::{self, RamdiskFormat};
use crate::error::{Error, Result};
use crate::io::{cstr_trim, number_of_pages};

/// The 8-byte magic identifying a vendor-boot image.
pub const MAGIC: &[u8; 8] = b"VNDRBOOT";

#[binrw]
#[derive(Clone, Debug, PartialEq, Eq)]
#[brw(little, magic = b"VNDRBOOT")]
#[br(assert(header_size == self.header_size()))]
struct WireVendorHeader {
    #[br(temp)]
    #[bw(calc = self.header_version())]
    header_version: u32,
    page_size: u32,
    kernel_addr: u32,
    ramdisk_addr: u32,
    vendor_ramdisk_size: u32,
    cmdline: Box<[u8; 2048]>,
    tags_addr: u32,
    product_name: [u8; 16],
    #[br(temp)]
    #[bw(calc = self.header_size())]
    header_size: u32,
    dtb_size: u32,
    dtb_addr: u64,
    #[br(if(header_version == 4))]
    v4: Option<WireVendorHeaderV4>,
}

impl WireVendorHeader {
    fn header_version(&self) -> u32 {
        if self.v4.is_some() {
            4
        } else {
            3
        }
    }
    fn header_size(&self) -> u32 {
        if self.v4.is_some() {
            2128
        } else {
            2112
        }
    }
}

#[derive(BinRead, BinWrite, Clone, Debug, PartialEq, Eq)]
#[brw(little)]
struct WireVendorHeaderV4 {
    vendor_ramdisk_table_size: u32,
    vendor_ramdisk_table_entry_num: u32,
    vendor_ramdisk_table_entry_size: u32,
    bootconfig_size: u32,
}

#[derive(BinRead, BinWrite, Clone, Debug, PartialEq, Eq)]
#[brw(little)]
struct WireTableEntry {
    size: u32,
    offset: u32,
    entry_type: u32,
    name: [u8; 32],
    board_id: [u32; 4],
}

/// One row of the vendor ramdisk table.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VendorRamdiskTableEntry {
    pub size: u32,
    /// Byte offset relative to the concatenated ramdisk region.
    pub offset: u32,
    pub entry_type: u32,
    /// NUL-trimmed, up to 32 bytes.
    pub name: Vec<u8>,
    pub board_id: [u32; 4],
    /// Assigned at unpack: `"vendor_ramdiskNN"`, or `"vendor_ramdisk"` for v3.
    pub output_name: String,
    pub ramdisk_compression: RamdiskFormat,
}

/// Parsed header of a vendor-boot image.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VendorBootImageInfo {
    pub header_version: u32,
    pub page_size: u32,
    pub kernel_load_address: u32,
    pub ramdisk_load_address: u32,
    pub vendor_ramdisk_size: u32,
    pub cmdline: Vec<u8>,
    pub tags_load_address: u32,
    pub product_name: Vec<u8>,
    pub header_size: u32,
    pub dtb_size: u32,
    pub dtb_load_address: u64,
    pub vendor_ramdisk_table_size: u32,
    pub vendor_ramdisk_table_entry_num: u32,
    pub vendor_ramdisk_table_entry_size: u32,
    pub vendor_bootconfig_size: u32,
    pub vendor_ramdisk_table: Vec<VendorRamdiskTableEntry>,
}

/// Byte offsets of the non-header regions.
#[derive(Debug, Clone, Copy, Default)]
pub struct VendorSections {
    pub ramdisk_base: u64,
    pub dtb: Option<(u64, u32)>,
    pub table_offset: Option<u64>,
    pub bootconfig: Option<(u64, u32)>,
}

fn present(size: u32) -> Option<u32> {
    (size != 0).then_some(size)
}

impl VendorBootImageInfo {
    pub fn sections(&self) -> VendorSections {
        let page = self.page_size;
        let header_pages = number_of_pages(self.header_size, page);
        let ramdisk_pages = number_of_pages(self.vendor_ramdisk_size, page);
        let dtb_pages = number_of_pages(self.dtb_size, page);
        let table_pages = number_of_pages(self.vendor_ramdisk_table_size, page);

        let page = u64::from(page);
        let ramdisk_base = page * u64::from(header_pages);
        let dtb_pos = page * u64::from(header_pages + ramdisk_pages);
        let table_pos = page * u64::from(header_pages + ramdisk_pages + dtb_pages);
        let bootconfig_pos = page * u64::from(header_pages + ramdisk_pages + dtb_pages + table_pages);

        VendorSections {
            ramdisk_base,
            dtb: present(self.dtb_size).map(|s| (dtb_pos, s)),
            table_offset: (self.header_version > 3).then_some(table_pos),
            bootconfig: present(self.vendor_bootconfig_size).map(|s| (bootconfig_pos, s)),
        }
    }
}

fn peek_some<R: Read>(r: &mut R, buf: &mut [u8]) -> Result<usize> {
    let mut filled = 0;
    while filled < buf.len() {
        match r.read(&mut buf[filled..]) {
            Ok(0) => break,
            Ok(n) => filled += n,
            Err(ref e) if e.kind() == std::io::ErrorKind::Interrupted => continue,
            Err(e) => return Err(Error::Io(e)),
        }
    }
    Ok(filled)
}

/// Parses a vendor-boot header plus its ramdisk table from `reader`, which
/// must be positioned at 0. When `detect_compression` is set, each
/// ramdisk's leading bytes are probed with the format detector.
pub fn parse<R: Read + Seek>(reader: &mut R, detect_compression: bool) -> Result<VendorBootImageInfo> {
    let wire = WireVendorHeader::read(reader)?;
    let mut info = VendorBootImageInfo {
        header_version: wire.header_version(),
        page_size: wire.page_size,
        kernel_load_address: wire.kernel_addr,
        ramdisk_load_address: wire.ramdisk_addr,
        vendor_ramdisk_size: wire.vendor_ramdisk_size,
        cmdline: cstr_trim(&wire.cmdline[..]).to_vec(),
        tags_load_address: wire.tags_addr,
        product_name: cstr_trim(&wire.product_name).to_vec(),
        header_size: wire.header_size(),
        dtb_size: wire.dtb_size,
        dtb_load_address: wire.dtb_addr,
        vendor_ramdisk_table_size: wire.v4.as_ref().map_or(0, |v| v.vendor_ramdisk_table_size),
        vendor_ramdisk_table_entry_num: wire
            .v4
            .as_ref()
            .map_or(0, |v| v.vendor_ramdisk_table_entry_num),
        vendor_ramdisk_table_entry_size: wire
            .v4
            .as_ref()
            .map_or(0, |v| v.vendor_ramdisk_table_entry_size),
        vendor_bootconfig_size: wire.v4.as_ref().map_or(0, |v| v.bootconfig_size),
        vendor_ramdisk_table: Vec::new(),
    };

    let sections = info.sections();

    if info.header_version > 3 {
        let table_offset = sections.table_offset.expect("header_version > 3");
        let entry_size = u64::from(info.vendor_ramdisk_table_entry_size);
        let mut entries = Vec::with_capacity(info.vendor_ramdisk_table_entry_num as usize);
        for i in 0..info.vendor_ramdisk_table_entry_num {
            reader
                .seek(SeekFrom::Start(table_offset + u64::from(i) * entry_size))
                .map_err(Error::Seek)?;
            let wire_entry = WireTableEntry::read(reader)?;

            let ramdisk_compression = if detect_compression {
                reader
                    .seek(SeekFrom::Start(
                        sections.ramdisk_base + u64::from(wire_entry.offset),
                    ))
                    .map_err(Error::Seek)?;
                let mut probe = [0u8; 16];
                let n = peek_some(reader, &mut probe)?;
                RamdiskFormat::from(detect::detect(&probe[..n]))
            } else {
                RamdiskFormat::None
            };

            entries.push(VendorRamdiskTableEntry {
                size: wire_entry.size,
                offset: wire_entry.offset,
                entry_type: wire_entry.entry_type,
                name: cstr_trim(&wire_entry.name).to_vec(),
                board_id: wire_entry.board_id,
                output_name: format!("vendor_ramdisk{i:02}"),
                ramdisk_compression,
            });
        }
        info.vendor_ramdisk_table = entries;
    } else {
        let ramdisk_compression = if detect_compression && info.vendor_ramdisk_size > 0 {
            reader
                .seek(SeekFrom::Start(sections.ramdisk_base))
                .map_err(Error::Seek)?;
            let mut probe = [0u8; 16];
            let n = peek_some(reader, &mut probe)?;
            RamdiskFormat::from(detect::detect(&probe[..n]))
        } else {
            RamdiskFormat::None
        };
        info.vendor_ramdisk_table = vec![VendorRamdiskTableEntry {
            size: info.vendor_ramdisk_size,
            offset: 0,
            entry_type: 0,
            name: Vec::new(),
            board_id: [0; 4],
            output_name: "vendor_ramdisk".into(),
            ramdisk_compression,
        }];
    }

    Ok(info)
}

/// Recomputes each entry's `offset` as a running prefix sum of prior
/// entries' `size` in table order, then returns the total concatenated
/// size. Always recomputing (rather than preserving parsed offsets) avoids
/// stale offsets after a ramdisk is rebuilt to a different size.
pub fn recompute_table_offsets(entries: &mut [VendorRamdiskTableEntry]) -> u32 {
    let mut running = 0u32;
    for entry in entries.iter_mut() {
        entry.offset = running;
        running += entry.size;
    }
    running
}

fn write_trunc(dest: &mut [u8], src: &[u8]) {
    let n = src.len().min(dest.len());
    dest[..n].copy_from_slice(&src[..n]);
}

/// Serializes the fixed vendor-boot header fields. Ramdisks, dtb, the
/// ramdisk table, and bootconfig are separate page-aligned sections the
/// caller writes at the offsets from [`VendorBootImageInfo::sections`].
pub fn write<W: Write>(info: &VendorBootImageInfo, writer: &mut W) -> Result<()> {
    let mut cmdline = Box::new([0u8; 2048]);
    write_trunc(&mut cmdline[..], &info.cmdline);
    let mut product_name = [0u8; 16];
    write_trunc(&mut product_name, &info.product_name);

    let v4 = (info.header_version == 4).then(|| WireVendorHeaderV4 {
        vendor_ramdisk_table_size: info.vendor_ramdisk_table_size,
        vendor_ramdisk_table_entry_num: info.vendor_ramdisk_table_entry_num,
        vendor_ramdisk_table_entry_size: info.vendor_ramdisk_table_entry_size,
        bootconfig_size: info.vendor_bootconfig_size,
    });

    let wire = WireVendorHeader {
        page_size: info.page_size,
        kernel_addr: info.kernel_load_address,
        ramdisk_addr: info.ramdisk_load_address,
        vendor_ramdisk_size: info.vendor_ramdisk_size,
        cmdline,
        tags_addr: info.tags_load_address,
        product_name,
        dtb_size: info.dtb_size,
        dtb_addr: info.dtb_load_address,
        v4,
    };
    wire.write(writer)?;
    Ok(())
}

/// Serializes the ramdisk table (v>3 only) at the caller's current position.
pub fn write_table<W: Write>(entries: &[VendorRamdiskTableEntry], writer: &mut W) -> Result<()> {
    for entry in entries {
        let mut name = [0u8; 32];
        write_trunc(&mut name, &entry.name);
        let wire_entry = WireTableEntry {
            size: entry.size,
            offset: entry.offset,
            entry_type: entry.entry_type,
            name,
            board_id: entry.board_id,
        };
        wire_entry.write(writer)?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    fn minimal_v3() -> VendorBootImageInfo {
        VendorBootImageInfo {
            header_version: 3,
            page_size: 4096,
            kernel_load_address: 0x8000,
            ramdisk_load_address: 0x1000,
            vendor_ramdisk_size: 0,
            cmdline: b"console=ttyS0".to_vec(),
            tags_load_address: 0,
            product_name: b"coral".to_vec(),
            header_size: 2112,
            dtb_size: 0,
            dtb_load_address: 0,
            vendor_ramdisk_table_size: 0,
            vendor_ramdisk_table_entry_num: 0,
            vendor_ramdisk_table_entry_size: 0,
            vendor_bootconfig_size: 0,
            vendor_ramdisk_table: Vec::new(),
        }
    }

    #[test]
    fn round_trips_v3_header() {
        let info = minimal_v3();
        let mut buf = Vec::new();
        write(&info, &mut buf).unwrap();
        let mut cursor = Cursor::new(buf);
        let parsed = parse(&mut cursor, false).unwrap();
        assert_eq!(parsed.header_version, 3);
        assert_eq!(parsed.cmdline, b"console=ttyS0");
        assert_eq!(parsed.product_name, b"coral");
        assert_eq!(parsed.vendor_ramdisk_table.len(), 1);
        assert_eq!(parsed.vendor_ramdisk_table[0].output_name, "vendor_ramdisk");
    }

    #[test]
    fn round_trips_v4_header_with_table_fields() {
        let mut info = minimal_v3();
        info.header_version = 4;
        info.header_size = 2128;
        info.vendor_ramdisk_table_size = 0;
        info.vendor_ramdisk_table_entry_num = 0;
        info.vendor_ramdisk_table_entry_size = 60;
        info.vendor_bootconfig_size = 32;

        let mut buf = Vec::new();
        write(&info, &mut buf).unwrap();
        let mut cursor = Cursor::new(buf);
        let parsed = parse(&mut cursor, false).unwrap();
        assert_eq!(parsed.header_version, 4);
        assert_eq!(parsed.vendor_ramdisk_table_entry_size, 60);
        assert!(parsed.vendor_ramdisk_table.is_empty());
    }

    #[test]
    fn table_offsets_recompute_as_prefix_sums() {
        let mut entries = vec![
            VendorRamdiskTableEntry {
                size: 100,
                offset: 999,
                entry_type: 1,
                name: b"first".to_vec(),
                board_id: [0; 4],
                output_name: "vendor_ramdisk00".into(),
                ramdisk_compression: RamdiskFormat::None,
            },
            VendorRamdiskTableEntry {
                size: 200,
                offset: 999,
                entry_type: 1,
                name: b"second".to_vec(),
                board_id: [0; 4],
                output_name: "vendor_ramdisk01".into(),
                ramdisk_compression: RamdiskFormat::None,
            },
        ];
        let total = recompute_table_offsets(&mut entries);
        assert_eq!(entries[0].offset, 0);
        assert_eq!(entries[1].offset, 100);
        assert_eq!(total, 300);
    }

    #[test]
    fn sections_place_ramdisk_right_after_header_pages() {
        let mut info = minimal_v3();
        info.vendor_ramdisk_size = 50;
        info.dtb_size = 10;
        let sections = info.sections();
        assert_eq!(sections.ramdisk_base, 4096);
        assert_eq!(sections.dtb, Some((4096 * 2, 10)));
    }
}
