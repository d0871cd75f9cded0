//! Classifies the leading bytes of a ramdisk blob by compression format.
//!
//! Never mutates its input; used both at unpack time (on the raw ramdisk
//! blob) and for the on-disk `ramdisk_compression` field persisted to the
//! sidecar.

/// The detected container format of a ramdisk blob.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DetectedFormat {
    /// An uncompressed cpio newc archive.
    CpioNewc,
    /// gzip (RFC 1952).
    Gzip,
    /// LZ4 legacy frame.
    Lz4Legacy,
    /// LZMA-alone (no xz container).
    LzmaAlone,
    /// None of the above.
    Other,
}

/// The on-disk/sidecar encoding of a ramdisk's compression, per spec §6.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum RamdiskFormat {
    /// Uncompressed cpio newc (`0`).
    None = 0,
    /// LZ4 legacy frame (`1`).
    Lz4 = 1,
    /// gzip (`2`).
    Gzip = 2,
    /// LZMA-alone (`3`).
    Lzma = 3,
    /// Unrecognized (`255`).
    Other = 255,
}

impl RamdiskFormat {
    /// Maps a raw sidecar byte to a [`RamdiskFormat`], defaulting unknown
    /// values to `Other` rather than failing — the sidecar is trusted but
    /// forward compatibility shouldn't hard-fail on a future tag.
    pub fn from_u8(value: u8) -> Self {
        match value {
            0 => RamdiskFormat::None,
            1 => RamdiskFormat::Lz4,
            2 => RamdiskFormat::Gzip,
            3 => RamdiskFormat::Lzma,
            _ => RamdiskFormat::Other,
        }
    }

    /// The raw sidecar byte for this format.
    pub fn to_u8(self) -> u8 {
        self as u8
    }
}

impl From<DetectedFormat> for RamdiskFormat {
    fn from(detected: DetectedFormat) -> Self {
        match detected {
            DetectedFormat::CpioNewc => RamdiskFormat::None,
            DetectedFormat::Gzip => RamdiskFormat::Gzip,
            DetectedFormat::Lz4Legacy => RamdiskFormat::Lz4,
            DetectedFormat::LzmaAlone => RamdiskFormat::Lzma,
            DetectedFormat::Other => RamdiskFormat::Other,
        }
    }
}

const LZ4_LEGACY_MAGIC: u32 = 0x184C_2102;

fn is_cpio_newc(data: &[u8]) -> bool {
    data.len() >= 6 && matches!(&data[..6], b"070701" | b"070702")
}

fn is_gzip(data: &[u8]) -> bool {
    data.len() >= 2 && data[0] == 0x1F && data[1] == 0x8B
}

fn is_lz4_legacy(data: &[u8]) -> bool {
    data.len() >= 4 && u32::from_le_bytes([data[0], data[1], data[2], data[3]]) == LZ4_LEGACY_MAGIC
}

fn is_lzma_alone(data: &[u8]) -> bool {
    if data.len() < 13 {
        return false;
    }
    if data[0] >= 225 {
        return false;
    }
    let dict_size = u32::from_le_bytes([data[1], data[2], data[3], data[4]]);
    if dict_size == 0 || !dict_size.is_power_of_two() {
        return false;
    }
    let mut size_bytes = [0u8; 8];
    size_bytes.copy_from_slice(&data[5..13]);
    let uncompressed_size = u64::from_le_bytes(size_bytes);
    uncompressed_size == u64::MAX || uncompressed_size <= u64::from(u32::MAX) + 1
}

/// Classifies `data` (the leading ~16 bytes of a blob recommended) into one
/// of the five discriminants documented in spec §4.2. Checks are applied in
/// the order cpio-newc, gzip, LZ4-legacy, LZMA-alone, falling back to
/// `Other` — none of the magics can collide, so order only matters for
/// buffers shorter than the longest probe.
pub fn detect(data: &[u8]) -> DetectedFormat {
    if is_cpio_newc(data) {
        DetectedFormat::CpioNewc
    } else if is_gzip(data) {
        DetectedFormat::Gzip
    } else if is_lz4_legacy(data) {
        DetectedFormat::Lz4Legacy
    } else if is_lzma_alone(data) {
        DetectedFormat::LzmaAlone
    } else {
        DetectedFormat::Other
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn detects_cpio_newc() {
        let mut data = b"070701".to_vec();
        data.extend_from_slice(&[0u8; 10]);
        assert_eq!(detect(&data), DetectedFormat::CpioNewc);

        let mut data2 = b"070702".to_vec();
        data2.extend_from_slice(&[0u8; 10]);
        assert_eq!(detect(&data2), DetectedFormat::CpioNewc);
    }

    #[test]
    fn detects_gzip() {
        let data = [0x1F, 0x8B, 0x08, 0x00, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0];
        assert_eq!(detect(&data), DetectedFormat::Gzip);
    }

    #[test]
    fn detects_lz4_legacy() {
        let mut data = LZ4_LEGACY_MAGIC.to_le_bytes().to_vec();
        data.extend_from_slice(&[0u8; 12]);
        assert_eq!(detect(&data), DetectedFormat::Lz4Legacy);
    }

    #[test]
    fn detects_lzma_alone() {
        // properties byte, 4-byte dict size (power of two), 8-byte unknown-size sentinel
        let mut data = vec![0x5Du8];
        data.extend_from_slice(&(1u32 << 24).to_le_bytes());
        data.extend_from_slice(&u64::MAX.to_le_bytes());
        assert_eq!(detect(&data), DetectedFormat::LzmaAlone);
    }

    #[test]
    fn unrecognized_is_other() {
        let data = [0xFFu8; 16];
        assert_eq!(detect(&data), DetectedFormat::Other);
    }

    #[test]
    fn detect_never_mutates_input() {
        let data = [0x1F, 0x8B, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0];
        let before = data;
        let _ = detect(&data);
        assert_eq!(data, before);
    }
}
