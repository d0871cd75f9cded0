//! LZ4 legacy frame streaming codec.
//!
//! The legacy frame is `0x184C2102` followed by a sequence of blocks, each a
//! 4-byte little-endian compressed-length prefix followed by that many bytes
//! of a raw LZ4 block. Blocks are compressed independently in chunks of up
//! to [`LEGACY_BLOCK_SIZE`] uncompressed bytes, the classic legacy-frame
//! block size; the stream simply ends at EOF.

use std::fs::File;
use std::io::{BufReader, BufWriter, Read, Write};
use std::path::Path;

use super::{replace_via_tmp, BUFFER_SIZE};
use crate::error::{CodecKind, CodecPhase, Error, Result};
use crate::io::{read_u32_le, write_u32_le};

const LZ4_LEGACY_MAGIC: u32 = 0x184C_2102;
/// Maximum uncompressed chunk size per legacy block (8 MiB).
pub const LEGACY_BLOCK_SIZE: usize = 8 * 1024 * 1024;

fn codec_err(phase: CodecPhase, message: impl Into<String>) -> Error {
    Error::Codec {
        kind: CodecKind::Lz4,
        phase,
        message: message.into(),
    }
}

/// Compresses `path` in place as an LZ4 legacy frame.
///
/// Uses `lz4_flex`'s block compressor; ramdisks are not required to
/// round-trip byte-identically (only semantically, after decompression), so
/// the exact compression level isn't load-bearing.
pub fn compress(path: &Path) -> Result<()> {
    replace_via_tmp(path, CodecKind::Lz4, CodecPhase::Compress, |tmp| {
        let mut input = BufReader::with_capacity(BUFFER_SIZE, File::open(path)?);
        let mut output = BufWriter::with_capacity(BUFFER_SIZE, File::create(tmp)?);
        write_u32_le(&mut output, LZ4_LEGACY_MAGIC)?;

        let mut chunk = vec![0u8; LEGACY_BLOCK_SIZE];
        loop {
            let mut filled = 0;
            while filled < chunk.len() {
                match input.read(&mut chunk[filled..])? {
                    0 => break,
                    n => filled += n,
                }
            }
            if filled == 0 {
                break;
            }
            let compressed = lz4_flex::block::compress(&chunk[..filled]);
            write_u32_le(&mut output, compressed.len() as u32)?;
            output.write_all(&compressed)?;
            if filled < chunk.len() {
                break;
            }
        }
        output.flush()?;
        Ok(())
    })
}

/// Decompresses `path` in place from an LZ4 legacy frame.
pub fn decompress(path: &Path) -> Result<()> {
    replace_via_tmp(path, CodecKind::Lz4, CodecPhase::Decompress, |tmp| {
        let mut input = BufReader::with_capacity(BUFFER_SIZE, File::open(path)?);
        let mut output = BufWriter::with_capacity(BUFFER_SIZE, File::create(tmp)?);

        let magic = read_u32_le(&mut input).map_err(|_| {
            codec_err(CodecPhase::Decompress, "truncated LZ4 legacy magic")
        })?;
        if magic != LZ4_LEGACY_MAGIC {
            return Err(codec_err(
                CodecPhase::Decompress,
                format!("bad LZ4 legacy magic: {magic:#010x}"),
            ));
        }

        let mut decompressed = vec![0u8; LEGACY_BLOCK_SIZE];
        loop {
            let block_len = match read_u32_le(&mut input) {
                Ok(len) => len as usize,
                Err(_) => break, // clean EOF between blocks
            };
            let mut block = vec![0u8; block_len];
            input.read_exact(&mut block).map_err(|e| {
                codec_err(CodecPhase::Decompress, format!("truncated block: {e}"))
            })?;
            let n = lz4_flex::block::decompress_into(&block, &mut decompressed).map_err(|e| {
                codec_err(CodecPhase::Decompress, format!("corrupt LZ4 block: {e}"))
            })?;
            output.write_all(&decompressed[..n])?;
        }
        output.flush()?;
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
        std::fs::write(&path, b"the quick brown fox jumps over the lazy dog".repeat(100))
            .unwrap();
        let original = std::fs::read(&path).unwrap();

        compress(&path).unwrap();
        let compressed = std::fs::read(&path).unwrap();
        assert_eq!(
            u32::from_le_bytes(compressed[..4].try_into().unwrap()),
            LZ4_LEGACY_MAGIC
        );

        decompress(&path).unwrap();
        assert_eq!(std::fs::read(&path).unwrap(), original);
    }

    #[test]
    fn rejects_bad_magic_without_touching_source() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("not_lz4");
        std::fs::write(&path, b"not an lz4 legacy frame at all").unwrap();
        assert!(decompress(&path).is_err());
        assert_eq!(std::fs::read(&path).unwrap(), b"not an lz4 legacy frame at all");
    }
}
