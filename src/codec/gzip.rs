//! gzip (RFC 1952, single member, DEFLATE) streaming codec.

use std::fs::File;
use std::io::{BufReader, BufWriter};
use std::path::Path;

use flate2::read::GzDecoder;
use flate2::write::GzEncoder;
use flate2::Compression;

use super::{replace_via_tmp, BUFFER_SIZE};
use crate::error::{CodecKind, CodecPhase, Result};

/// Decompresses `path` in place.
pub fn decompress(path: &Path) -> Result<()> {
    replace_via_tmp(path, CodecKind::Gzip, CodecPhase::Decompress, |tmp| {
        let input = BufReader::with_capacity(BUFFER_SIZE, File::open(path)?);
        let mut decoder = GzDecoder::new(input);
        let mut output = BufWriter::with_capacity(BUFFER_SIZE, File::create(tmp)?);
        std::io::copy(&mut decoder, &mut output)?;
        Ok(())
    })
}

/// Compresses `path` in place using DEFLATE's best-compression preset.
pub fn compress(path: &Path) -> Result<()> {
    replace_via_tmp(path, CodecKind::Gzip, CodecPhase::Compress, |tmp| {
        let mut input = BufReader::with_capacity(BUFFER_SIZE, File::open(path)?);
        let output = BufWriter::with_capacity(BUFFER_SIZE, File::create(tmp)?);
        let mut encoder = GzEncoder::new(output, Compression::best());
        std::io::copy(&mut input, &mut encoder)?;
        encoder.finish()?;
        Ok(())
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn roundtrips_through_compress_and_decompress() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("ramdisk");
        {
            let mut f = File::create(&path).unwrap();
            f.write_all(b"hello gzip world").unwrap();
        }
        compress(&path).unwrap();
        let compressed = std::fs::read(&path).unwrap();
        assert_eq!(&compressed[..2], &[0x1F, 0x8B]);

        decompress(&path).unwrap();
        assert_eq!(std::fs::read(&path).unwrap(), b"hello gzip world");
    }

    #[test]
    fn failure_leaves_source_untouched() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("not_gzip");
        std::fs::write(&path, b"definitely not gzip data").unwrap();
        assert!(decompress(&path).is_err());
        assert_eq!(std::fs::read(&path).unwrap(), b"definitely not gzip data");
        assert!(!dir.path().join("not_gzip.tmp").exists());
    }
}
