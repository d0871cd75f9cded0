//! LZMA-alone (single-stream, no xz container) streaming codec.
//!
//! The "alone" format is a 1-byte properties byte, 4-byte little-endian
//! dictionary size, 8-byte little-endian uncompressed size, then the raw
//! LZMA stream — exactly what `lzma-rs` reads and writes natively.

use std::fs::File;
use std::io::{BufReader, BufWriter};
use std::path::Path;

use super::{replace_via_tmp, BUFFER_SIZE};
use crate::error::{CodecKind, CodecPhase, Error, Result};

fn codec_err(phase: CodecPhase, message: impl std::fmt::Display) -> Error {
    Error::Codec {
        kind: CodecKind::Lzma,
        phase,
        message: message.to_string(),
    }
}

/// Compresses `path` in place to an LZMA-alone stream.
pub fn compress(path: &Path) -> Result<()> {
    replace_via_tmp(path, CodecKind::Lzma, CodecPhase::Compress, |tmp| {
        let mut input = BufReader::with_capacity(BUFFER_SIZE, File::open(path)?);
        let mut output = BufWriter::with_capacity(BUFFER_SIZE, File::create(tmp)?);
        lzma_rs::lzma_compress(&mut input, &mut output)
            .map_err(|e| codec_err(CodecPhase::Compress, e))?;
        Ok(())
    })
}

/// Decompresses `path` in place from an LZMA-alone stream.
pub fn decompress(path: &Path) -> Result<()> {
    replace_via_tmp(path, CodecKind::Lzma, CodecPhase::Decompress, |tmp| {
        let mut input = BufReader::with_capacity(BUFFER_SIZE, File::open(path)?);
        let mut output = BufWriter::with_capacity(BUFFER_SIZE, File::create(tmp)?);
        lzma_rs::lzma_decompress(&mut input, &mut output)
            .map_err(|e| codec_err(CodecPhase::Decompress, e))?;
        Ok(())
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn roundtrips_small_payload() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("ramdisk");
        let original = b"lzma alone round trip payload".repeat(50);
        std::fs::write(&path, &original).unwrap();

        compress(&path).unwrap();
        let compressed = std::fs::read(&path).unwrap();
        assert!(compressed[0] < 225);

        decompress(&path).unwrap();
        assert_eq!(std::fs::read(&path).unwrap(), original);
    }

    #[test]
    fn rejects_garbage_without_touching_source() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("not_lzma");
        std::fs::write(&path, b"short").unwrap();
        assert!(decompress(&path).is_err());
        assert_eq!(std::fs::read(&path).unwrap(), b"short");
    }
}
