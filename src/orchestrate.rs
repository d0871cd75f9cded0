//! The unpack and build workflows, wiring together the format detector,
//! compression codecs, cpio codec, sidecar, and boot/vendor parsers.

use std::fs;
use std::io::{Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};

use crate::boot::{self, BootImageInfo};
use crate::codec;
use crate::cpio;
use crate::detect::{self, RamdiskFormat};
use crate::error::{Error, Result};
use crate::io::number_of_pages;
use crate::sidecar;
use crate::vendor::{self, VendorBootImageInfo};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ImageKind {
    Boot,
    Vendor,
}

fn peek_magic(path: &Path) -> Result<ImageKind> {
    let mut file = fs::File::open(path)?;
    let mut magic = [0u8; 8];
    file.read_exact(&mut magic)?;
    if magic == *boot::MAGIC {
        Ok(ImageKind::Boot)
    } else if magic == *vendor::MAGIC {
        Ok(ImageKind::Vendor)
    } else {
        Err(Error::InvalidMagic {
            expected: "ANDROID! or VNDRBOOT",
            found: crate::io::to_hex_string(&magic),
        })
    }
}

/// Appends `_1`, `_2`, … to `base` under `parent` until an unused name is found.
fn unique_path(parent: &Path, base: &str) -> PathBuf {
    let candidate = parent.join(base);
    if !candidate.exists() {
        return candidate;
    }
    let mut n = 1u32;
    loop {
        let candidate = parent.join(format!("{base}_{n}"));
        if !candidate.exists() {
            return candidate;
        }
        n += 1;
    }
}

/// Removes stale `*.build` temporary files left by a previous, interrupted build.
fn clean_build_temps(dir: &Path) -> Result<()> {
    if !dir.is_dir() {
        return Ok(());
    }
    for entry in fs::read_dir(dir)? {
        let entry = entry?;
        if entry.path().extension().is_some_and(|e| e == "build") {
            fs::remove_file(entry.path())?;
        }
    }
    Ok(())
}

fn read_head(path: &Path) -> Result<Vec<u8>> {
    let mut file = fs::File::open(path)?;
    let mut buf = [0u8; 16];
    let mut filled = 0;
    loop {
        match file.read(&mut buf[filled..])? {
            0 => break,
            n => filled += n,
        }
        if filled == buf.len() {
            break;
        }
    }
    Ok(buf[..filled].to_vec())
}

fn extract_section<R: Read + Seek>(reader: &mut R, offset: u64, size: u32, path: &Path) -> Result<()> {
    reader.seek(SeekFrom::Start(offset)).map_err(Error::Seek)?;
    let data = crate::io::read_fixed(reader, size as usize)?;
    fs::write(path, data)?;
    Ok(())
}

fn write_section<W: Write + Seek>(w: &mut W, offset: u64, data: &[u8]) -> Result<()> {
    w.seek(SeekFrom::Start(offset)).map_err(Error::Seek)?;
    w.write_all(data)?;
    Ok(())
}

/// Replaces a compressed ramdisk blob at `path` with a directory of the same
/// name holding its extracted contents plus a `.parserconfig` manifest.
fn decode_ramdisk_in_place(path: &Path, format: detect::DetectedFormat) -> Result<()> {
    match format {
        detect::DetectedFormat::Gzip => codec::gzip::decompress(path)?,
        detect::DetectedFormat::Lz4Legacy => codec::lz4::decompress(path)?,
        detect::DetectedFormat::LzmaAlone => codec::lzma::decompress(path)?,
        detect::DetectedFormat::CpioNewc | detect::DetectedFormat::Other => {}
    }
    let archive = fs::read(path)?;
    fs::remove_file(path)?;
    let entries = cpio::extract(&archive[..], path)?;
    fs::write(path.join(".parserconfig"), cpio::render_manifest(&entries))?;
    Ok(())
}

fn compression_to_format(c: RamdiskFormat) -> detect::DetectedFormat {
    match c {
        RamdiskFormat::None => detect::DetectedFormat::CpioNewc,
        RamdiskFormat::Gzip => detect::DetectedFormat::Gzip,
        RamdiskFormat::Lz4 => detect::DetectedFormat::Lz4Legacy,
        RamdiskFormat::Lzma => detect::DetectedFormat::LzmaAlone,
        RamdiskFormat::Other => detect::DetectedFormat::Other,
    }
}

/// Unpacks the image at `source` into a fresh subdirectory of `parent_dir`
/// (named `name`, or `"unpacked"`, deduplicated with a `_N` suffix). Returns
/// the resolved output directory.
pub fn unpack(
    source: &Path,
    parent_dir: &Path,
    name: Option<&str>,
    decode_ramdisk: bool,
) -> Result<PathBuf> {
    let kind = peek_magic(source)?;
    let out_dir = unique_path(parent_dir, name.unwrap_or("unpacked"));
    fs::create_dir_all(&out_dir)?;
    log::info!("unpacking {} into {}", source.display(), out_dir.display());

    let result = unpack_into(kind, source, &out_dir, decode_ramdisk);
    if result.is_err() {
        let _ = fs::remove_dir_all(&out_dir);
    }
    result?;
    Ok(out_dir)
}

fn unpack_into(kind: ImageKind, source: &Path, out_dir: &Path, decode_ramdisk: bool) -> Result<()> {
    let mut file = fs::File::open(source)?;
    match kind {
        ImageKind::Boot => unpack_boot(&mut file, out_dir, decode_ramdisk)?,
        ImageKind::Vendor => unpack_vendor(&mut file, out_dir, decode_ramdisk)?,
    }

    sidecar::append_sha1(&out_dir.join(".parserconfig"))?;
    log::info!("wrote sidecar for {}", out_dir.display());
    Ok(())
}

fn unpack_boot<R: Read + Seek>(reader: &mut R, out_dir: &Path, decode_ramdisk: bool) -> Result<()> {
    let mut info = boot::parse(reader)?;
    let sections = info.sections();

    if let Some((offset, size)) = sections.kernel {
        extract_section(reader, offset, size, &out_dir.join("kernel"))?;
    }
    if let Some((offset, size)) = sections.ramdisk {
        let ramdisk_path = out_dir.join("ramdisk");
        extract_section(reader, offset, size, &ramdisk_path)?;
        let format = detect::detect(&read_head(&ramdisk_path)?);
        info.ramdisk_compression = format.into();
        if decode_ramdisk {
            decode_ramdisk_in_place(&ramdisk_path, format)?;
        }
    }
    if let Some((offset, size)) = sections.second {
        extract_section(reader, offset, size, &out_dir.join("second"))?;
    }
    if let Some((offset, size)) = sections.recovery_dtbo {
        extract_section(reader, offset, size, &out_dir.join("recovery_dtbo"))?;
    }
    if let Some((offset, size)) = sections.dtb {
        extract_section(reader, offset, size, &out_dir.join("dtb"))?;
    }
    if let Some((offset, size)) = sections.boot_signature {
        extract_section(reader, offset, size, &out_dir.join("boot_signature"))?;
    }

    let mut sidecar_file = fs::File::create(out_dir.join(".parserconfig"))?;
    sidecar::write_boot(&info, &mut sidecar_file)
}

fn unpack_vendor<R: Read + Seek>(reader: &mut R, out_dir: &Path, decode_ramdisk: bool) -> Result<()> {
    let mut info = vendor::parse(reader, decode_ramdisk)?;
    let sections = info.sections();

    for entry in info.vendor_ramdisk_table.iter_mut() {
        let ramdisk_path = out_dir.join(&entry.output_name);
        extract_section(
            reader,
            sections.ramdisk_base + u64::from(entry.offset),
            entry.size,
            &ramdisk_path,
        )?;
        if decode_ramdisk {
            decode_ramdisk_in_place(&ramdisk_path, compression_to_format(entry.ramdisk_compression))?;
        }
    }
    if let Some((offset, size)) = sections.dtb {
        extract_section(reader, offset, size, &out_dir.join("dtb"))?;
    }
    if let Some((offset, size)) = sections.bootconfig {
        extract_section(reader, offset, size, &out_dir.join("bootconfig"))?;
    }

    let mut sidecar_file = fs::File::create(out_dir.join(".parserconfig"))?;
    sidecar::write_vendor(&info, &mut sidecar_file)
}

/// Cpio-packs and compresses `path` to a sibling `.build` temp file if it's
/// a directory (its manifest-driven rebuild); otherwise reuses the raw file
/// verbatim. Returns the path whose bytes should be embedded in the image.
fn rebuild_ramdisk(path: &Path, compression: RamdiskFormat) -> Result<PathBuf> {
    if !path.is_dir() {
        return Ok(path.to_path_buf());
    }
    let manifest = fs::read_to_string(path.join(".parserconfig"))?;
    let entries = cpio::parse_manifest(&manifest)?;

    let build_path = path.with_extension("build");
    {
        let mut archive = fs::File::create(&build_path)?;
        cpio::build(&entries, path, &mut archive)?;
    }
    match compression {
        RamdiskFormat::Gzip => codec::gzip::compress(&build_path)?,
        RamdiskFormat::Lz4 => codec::lz4::compress(&build_path)?,
        RamdiskFormat::Lzma => codec::lzma::compress(&build_path)?,
        RamdiskFormat::None | RamdiskFormat::Other => {}
    }
    Ok(build_path)
}

fn cleanup_build_path(path: &Path) {
    if path.extension().is_some_and(|e| e == "build") {
        let _ = fs::remove_file(path);
    }
}

/// Rebuilds the image described by `work_dir`'s `.parserconfig`, validating
/// its SHA-1 first. Returns the path of the freshly written output image.
pub fn build(work_dir: &Path) -> Result<PathBuf> {
    let sidecar_path = work_dir.join(".parserconfig");
    sidecar::validate_sha1(&sidecar_path)?;
    clean_build_temps(work_dir)?;

    let content = fs::read(&sidecar_path)?;
    let body = sidecar::strip_sha1(&content)?;
    if body.len() < 12 {
        return Err(Error::InvalidConfig("sidecar body too short".into()));
    }
    let magic = &body[4..12];

    if magic == boot::MAGIC.as_slice() {
        build_boot(work_dir, body)
    } else if magic == vendor::MAGIC.as_slice() {
        build_vendor(work_dir, body)
    } else {
        Err(Error::InvalidConfig(format!(
            "unrecognized sidecar magic {:?}",
            String::from_utf8_lossy(magic)
        )))
    }
}

fn build_boot(work_dir: &Path, sidecar_body: &[u8]) -> Result<PathBuf> {
    let mut info = sidecar::read_boot(&mut &sidecar_body[..])?;

    let kernel_path = work_dir.join("kernel");
    let ramdisk_path = work_dir.join("ramdisk");
    let second_path = work_dir.join("second");
    let recovery_dtbo_path = work_dir.join("recovery_dtbo");
    let dtb_path = work_dir.join("dtb");
    let boot_signature_path = work_dir.join("boot_signature");

    info.kernel_size = file_size_or_zero(&kernel_path)?;
    info.second_size = file_size_or_zero(&second_path)?;
    info.recovery_dtbo_size = file_size_or_zero(&recovery_dtbo_path)?;
    info.dtb_size = file_size_or_zero(&dtb_path)?;
    info.boot_signature_size = file_size_or_zero(&boot_signature_path)?;

    let ramdisk_final = if ramdisk_path.exists() {
        let rebuilt = rebuild_ramdisk(&ramdisk_path, info.ramdisk_compression)?;
        info.ramdisk_size = fs::metadata(&rebuilt)?.len() as u32;
        Some(rebuilt)
    } else {
        info.ramdisk_size = 0;
        None
    };

    let output_path = work_dir.join("image-new");
    let result = write_boot_image(
        &info,
        &output_path,
        &kernel_path,
        ramdisk_final.as_deref(),
        &second_path,
        &recovery_dtbo_path,
        &dtb_path,
        &boot_signature_path,
    );

    if let Some(path) = &ramdisk_final {
        cleanup_build_path(path);
    }
    result?;
    log::info!("wrote {}", output_path.display());
    Ok(output_path)
}

fn file_size_or_zero(path: &Path) -> Result<u32> {
    if path.exists() {
        Ok(fs::metadata(path)?.len() as u32)
    } else {
        Ok(0)
    }
}

#[allow(clippy::too_many_arguments)]
fn write_boot_image(
    info: &BootImageInfo,
    output_path: &Path,
    kernel_path: &Path,
    ramdisk_path: Option<&Path>,
    second_path: &Path,
    recovery_dtbo_path: &Path,
    dtb_path: &Path,
    boot_signature_path: &Path,
) -> Result<()> {
    let mut out = fs::File::create(output_path)?;
    boot::write(info, &mut out)?;

    let sections = info.sections();
    let page = u64::from(info.page_size);
    let mut furthest = page;

    let mut place = |offset: u64, size: u32, data: &[u8]| -> Result<()> {
        write_section(&mut out, offset, data)?;
        let end = (offset + u64::from(size)).div_ceil(page) * page;
        furthest = furthest.max(end);
        Ok(())
    };

    if let Some((offset, size)) = sections.kernel {
        place(offset, size, &fs::read(kernel_path)?)?;
    }
    if let (Some((offset, size)), Some(path)) = (sections.ramdisk, ramdisk_path) {
        place(offset, size, &fs::read(path)?)?;
    }
    if let Some((offset, size)) = sections.second {
        place(offset, size, &fs::read(second_path)?)?;
    }
    if let Some((offset, size)) = sections.recovery_dtbo {
        place(offset, size, &fs::read(recovery_dtbo_path)?)?;
    }
    if let Some((offset, size)) = sections.dtb {
        place(offset, size, &fs::read(dtb_path)?)?;
    }
    if let Some((offset, size)) = sections.boot_signature {
        place(offset, size, &fs::read(boot_signature_path)?)?;
    }

    out.set_len(furthest)?;
    Ok(())
}

fn build_vendor(work_dir: &Path, sidecar_body: &[u8]) -> Result<PathBuf> {
    let mut info = sidecar::read_vendor(&mut &sidecar_body[..])?;

    let mut rebuilt_paths = Vec::with_capacity(info.vendor_ramdisk_table.len());
    for entry in &info.vendor_ramdisk_table {
        let path = work_dir.join(&entry.output_name);
        rebuilt_paths.push(rebuild_ramdisk(&path, entry.ramdisk_compression)?);
    }
    for (entry, path) in info.vendor_ramdisk_table.iter_mut().zip(&rebuilt_paths) {
        entry.size = fs::metadata(path)?.len() as u32;
    }
    info.vendor_ramdisk_size = vendor::recompute_table_offsets(&mut info.vendor_ramdisk_table);

    let dtb_path = work_dir.join("dtb");
    info.dtb_size = file_size_or_zero(&dtb_path)?;

    let bootconfig_path = work_dir.join("bootconfig");
    info.vendor_bootconfig_size = file_size_or_zero(&bootconfig_path)?;

    if info.header_version > 3 {
        const WIRE_ENTRY_SIZE: u32 = 60;
        info.vendor_ramdisk_table_entry_num = info.vendor_ramdisk_table.len() as u32;
        info.vendor_ramdisk_table_entry_size = WIRE_ENTRY_SIZE;
        info.vendor_ramdisk_table_size =
            info.vendor_ramdisk_table_entry_num * WIRE_ENTRY_SIZE;
    }

    let output_path = work_dir.join("vendor_boot-new");
    let result = write_vendor_image(&info, &output_path, &rebuilt_paths, &dtb_path, &bootconfig_path);

    for path in &rebuilt_paths {
        cleanup_build_path(path);
    }
    result?;
    log::info!("wrote {}", output_path.display());
    Ok(output_path)
}

fn write_vendor_image(
    info: &VendorBootImageInfo,
    output_path: &Path,
    ramdisk_paths: &[PathBuf],
    dtb_path: &Path,
    bootconfig_path: &Path,
) -> Result<()> {
    let mut out = fs::File::create(output_path)?;
    vendor::write(info, &mut out)?;

    let sections = info.sections();
    let page = u64::from(info.page_size);
    let header_pages = u64::from(number_of_pages(info.header_size, info.page_size));
    let mut furthest = header_pages * page;

    for (entry, path) in info.vendor_ramdisk_table.iter().zip(ramdisk_paths) {
        let offset = sections.ramdisk_base + u64::from(entry.offset);
        let data = fs::read(path)?;
        write_section(&mut out, offset, &data)?;
        furthest = furthest.max((offset + data.len() as u64).div_ceil(page) * page);
    }
    if let Some((offset, size)) = sections.dtb {
        write_section(&mut out, offset, &fs::read(dtb_path)?)?;
        furthest = furthest.max((offset + u64::from(size)).div_ceil(page) * page);
    }
    if let Some(table_offset) = sections.table_offset {
        out.seek(SeekFrom::Start(table_offset)).map_err(Error::Seek)?;
        vendor::write_table(&info.vendor_ramdisk_table, &mut out)?;
        let table_end = table_offset + u64::from(info.vendor_ramdisk_table_size);
        furthest = furthest.max(table_end.div_ceil(page) * page);
    }
    if let Some((offset, size)) = sections.bootconfig {
        write_section(&mut out, offset, &fs::read(bootconfig_path)?)?;
        furthest = furthest.max((offset + u64::from(size)).div_ceil(page) * page);
    }

    out.set_len(furthest)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::boot::BootImageInfo;

    #[test]
    fn unique_path_appends_suffix_on_collision() {
        let dir = tempfile::tempdir().unwrap();
        fs::create_dir(dir.path().join("unpacked")).unwrap();
        fs::create_dir(dir.path().join("unpacked_1")).unwrap();
        let resolved = unique_path(dir.path(), "unpacked");
        assert_eq!(resolved, dir.path().join("unpacked_2"));
    }

    #[test]
    fn full_round_trip_minimal_v2_boot_image() {
        let dir = tempfile::tempdir().unwrap();
        let image_path = dir.path().join("boot.img");

        let info = BootImageInfo {
            header_version: 2,
            page_size: 4096,
            kernel_size: 4096,
            kernel_load_address: 0x8000,
            ramdisk_size: 0,
            ramdisk_load_address: 0,
            second_size: 0,
            second_load_address: 0,
            tags_load_address: 0,
            os_version: String::new(),
            os_patch_level: String::new(),
            product_name: Vec::new(),
            cmdline: Vec::new(),
            extra_cmdline: Vec::new(),
            recovery_dtbo_size: 0,
            recovery_dtbo_offset: 0,
            boot_header_size: 1660,
            dtb_size: 0,
            dtb_load_address: 0,
            boot_signature_size: 0,
            ramdisk_compression: RamdiskFormat::None,
        };
        {
            let mut file = fs::File::create(&image_path).unwrap();
            boot::write(&info, &mut file).unwrap();
            file.set_len(4096 * 2).unwrap();
            let mut f = fs::OpenOptions::new().write(true).open(&image_path).unwrap();
            f.seek(SeekFrom::Start(4096)).unwrap();
            f.write_all(&[0xABu8; 4096]).unwrap();
        }

        let out_dir = unpack(&image_path, dir.path(), Some("out"), false).unwrap();
        assert!(out_dir.join("kernel").exists());
        assert!(out_dir.join(".parserconfig").exists());

        let rebuilt = build(&out_dir).unwrap();
        assert!(rebuilt.exists());
        let mut rebuilt_file = fs::File::open(&rebuilt).unwrap();
        let reparsed = boot::parse(&mut rebuilt_file).unwrap();
        assert_eq!(reparsed.header_version, 2);
        assert_eq!(reparsed.kernel_size, 4096);
    }
}
