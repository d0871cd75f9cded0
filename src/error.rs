//! The crate's error taxonomy.
//!
//! Every fallible operation in the crate returns [`Error`]. Binaries convert
//! this to `anyhow::Error` at the CLI boundary instead of matching variants.

use std::fmt;

/// Kind of a failed compression/decompression operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CodecKind {
    /// gzip / DEFLATE
    Gzip,
    /// LZ4 legacy frame
    Lz4,
    /// LZMA-alone
    Lzma,
}

impl fmt::Display for CodecKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            CodecKind::Gzip => "gzip",
            CodecKind::Lz4 => "lz4",
            CodecKind::Lzma => "lzma",
        })
    }
}

/// Which half of a codec call failed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CodecPhase {
    /// Reading/decoding the source.
    Decompress,
    /// Writing/encoding the destination.
    Compress,
    /// Renaming the temporary file over the source.
    Replace,
}

impl fmt::Display for CodecPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            CodecPhase::Decompress => "decompress",
            CodecPhase::Compress => "compress",
            CodecPhase::Replace => "replace",
        })
    }
}

/// cpio archive/manifest error kind.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CpioErrorKind {
    /// The 6-byte magic wasn't `070701`/`070702`.
    BadMagic,
    /// A manifest line had an unterminated quoted value.
    UnterminatedQuote,
    /// A manifest line was missing a required key.
    MissingKey,
    /// A manifest `type=` value wasn't `dir`/`file`/`symlink`.
    UnknownType,
    /// A referenced payload file was not found under the input directory.
    MissingPayload,
}

impl fmt::Display for CpioErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            CpioErrorKind::BadMagic => "bad cpio magic",
            CpioErrorKind::UnterminatedQuote => "unterminated quote",
            CpioErrorKind::MissingKey => "missing key",
            CpioErrorKind::UnknownType => "unknown entry type",
            CpioErrorKind::MissingPayload => "missing payload file",
        })
    }
}

/// The crate's unified error type.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// The leading magic bytes didn't match `ANDROID!` or `VNDRBOOT`.
    #[error("invalid magic: expected {expected}, found {found}")]
    InvalidMagic {
        /// What was expected.
        expected: &'static str,
        /// A hex dump of what was actually read.
        found: String,
    },

    /// `header_version` named a version this crate doesn't implement.
    #[error("unsupported header version: {0}")]
    UnsupportedVersion(u32),

    /// A read returned fewer bytes than requested.
    #[error("short read: expected {expected} bytes, got {actual}")]
    ShortRead {
        /// Bytes requested.
        expected: usize,
        /// Bytes actually read.
        actual: usize,
    },

    /// A seek was rejected by the underlying source.
    #[error("seek failed")]
    Seek(#[source] std::io::Error),

    /// A compression codec failed.
    #[error("{kind} {phase} failed: {message}")]
    Codec {
        /// Which codec.
        kind: CodecKind,
        /// Which phase.
        phase: CodecPhase,
        /// Human-readable detail.
        message: String,
    },

    /// A cpio archive or manifest was malformed.
    #[error("cpio error ({kind}, line {line_no:?}): {message}")]
    Cpio {
        /// What kind of problem.
        kind: CpioErrorKind,
        /// Manifest line number, if applicable.
        line_no: Option<usize>,
        /// Human-readable detail.
        message: String,
    },

    /// The SHA-1 sidecar digest didn't validate.
    #[error("integrity check failed for {path}")]
    Integrity {
        /// Path of the file that failed validation.
        path: String,
    },

    /// The `.parserconfig` sidecar was malformed or inconsistent.
    #[error("invalid configuration sidecar: {0}")]
    InvalidConfig(String),

    /// Any other I/O failure.
    #[error(transparent)]
    Io(#[from] std::io::Error),

    /// A `binrw`-level parse/serialize failure.
    #[error(transparent)]
    Binrw(#[from] binrw::Error),
}

/// Convenience alias used throughout the crate.
pub type Result<T> = std::result::Result<T, Error>;
