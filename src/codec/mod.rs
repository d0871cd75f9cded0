//! Streaming compression codecs for ramdisk payloads.
//!
//! Each codec replaces its input file in place: it streams to a sibling
//! temporary path and, on success, renames the temporary over the source.
//! On any failure the temporary is removed and the source is left untouched.
//! Buffers are fixed-size (≥ 64 KiB) so memory use doesn't scale with
//! payload size.

pub mod gzip;
pub mod lz4;
pub mod lzma;

use std::fs;
use std::path::{Path, PathBuf};

use crate::error::{CodecKind, CodecPhase, Error, Result};

/// Streaming buffer size used by every codec, per spec §4.3.
pub const BUFFER_SIZE: usize = 64 * 1024;

fn sibling_tmp_path(path: &Path) -> PathBuf {
    let mut name = path.file_name().unwrap_or_default().to_os_string();
    name.push(".tmp");
    path.with_file_name(name)
}

/// Runs `op` writing to a sibling temp file, then replaces `path` with it.
/// On failure, removes the temp file and leaves `path` untouched.
pub(crate) fn replace_via_tmp(
    path: &Path,
    kind: CodecKind,
    phase: CodecPhase,
    op: impl FnOnce(&Path) -> Result<()>,
) -> Result<()> {
    let tmp = sibling_tmp_path(path);
    match op(&tmp) {
        Ok(()) => match fs::rename(&tmp, path) {
            Ok(()) => Ok(()),
            Err(e) => {
                let _ = fs::remove_file(&tmp);
                Err(Error::Codec {
                    kind,
                    phase: CodecPhase::Replace,
                    message: e.to_string(),
                })
            }
        },
        Err(e) => {
            let _ = fs::remove_file(&tmp);
            Err(Error::Codec {
                kind,
                phase,
                message: e.to_string(),
            })
        }
    }
}
