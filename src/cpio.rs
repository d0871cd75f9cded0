//! cpio newc archive codec and its human-editable manifest.
//!
//! Extraction writes regular files and directories to disk, records symlink
//! targets only in the manifest (avoiding platform symlink quirks), and
//! emits one manifest line per archive entry in archive order. Building
//! replays the manifest to reconstruct a byte-exact-enough archive.

use std::fs;
use std::io::{Read, Write};
use std::path::Path;

use crate::error::{CpioErrorKind, Error, Result};

const MAGIC: &[u8; 6] = b"070701";
const HEADER_LEN: usize = 110;
const TRAILER_NAME: &str = "TRAILER!!!";

const S_IFDIR: u32 = 0o040000;
const S_IFREG: u32 = 0o100000;
const S_IFLNK: u32 = 0o120000;
const TYPE_MASK: u32 = 0o170000;

/// One row of the manifest: a single archive entry.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CpioEntry {
    /// Relative, slash-separated path.
    pub path: String,
    /// Entry kind.
    pub kind: EntryKind,
    /// Permission + type-tagged mode (e.g. `0o100754`).
    pub mode: u32,
    pub uid: u32,
    pub gid: u32,
}

/// The kind of a [`CpioEntry`], with its kind-specific data.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EntryKind {
    Dir,
    File,
    Symlink { target: String },
}

impl CpioEntry {
    fn permissions(&self) -> u32 {
        self.mode & 0o7777
    }

    /// Renders this row as one manifest line.
    fn to_manifest_line(&self) -> String {
        let mode_str = format!("{:04o}", self.permissions());
        match &self.kind {
            EntryKind::Dir => format!(
                "path=\"{}\" type=dir mode={} uid={} gid={}",
                self.path, mode_str, self.uid, self.gid
            ),
            EntryKind::File => format!(
                "path=\"{}\" type=file mode={} uid={} gid={}",
                self.path, mode_str, self.uid, self.gid
            ),
            EntryKind::Symlink { target } => format!(
                "path=\"{}\" type=symlink mode={} uid={} gid={} target=\"{}\"",
                self.path, mode_str, self.uid, self.gid, target
            ),
        }
    }
}

fn pad_len(offset: usize) -> usize {
    (4 - (offset % 4)) % 4
}

fn parse_hex_field(field: &[u8], name: &'static str) -> Result<u32> {
    let s = std::str::from_utf8(field).map_err(|_| Error::Cpio {
        kind: CpioErrorKind::BadMagic,
        line_no: None,
        message: format!("{name} field is not ASCII"),
    })?;
    u32::from_str_radix(s, 16).map_err(|_| Error::Cpio {
        kind: CpioErrorKind::BadMagic,
        line_no: None,
        message: format!("{name} field {s:?} is not hex"),
    })
}

/// Extracts a cpio newc archive from `input` into `output_dir`, returning
/// the manifest rows in archive order. Regular files and directories are
/// materialized under `output_dir`; symlink targets are recorded only in
/// the returned rows.
pub fn extract<R: Read>(mut input: R, output_dir: &Path) -> Result<Vec<CpioEntry>> {
    fs::create_dir_all(output_dir)?;
    let mut entries = Vec::new();
    let mut consumed = 0usize;

    loop {
        let mut header = [0u8; HEADER_LEN];
        read_exact_tracked(&mut input, &mut header, &mut consumed)?;
        if &header[..6] != MAGIC.as_slice() {
            return Err(Error::Cpio {
                kind: CpioErrorKind::BadMagic,
                line_no: None,
                message: format!("bad cpio magic at byte {}", consumed - HEADER_LEN),
            });
        }

        let mode = parse_hex_field(&header[14..22], "mode")?;
        let uid = parse_hex_field(&header[22..30], "uid")?;
        let gid = parse_hex_field(&header[30..38], "gid")?;
        let filesize = parse_hex_field(&header[54..62], "filesize")? as usize;
        let namesize = parse_hex_field(&header[94..102], "namesize")? as usize;

        let mut name_buf = vec![0u8; namesize];
        read_exact_tracked(&mut input, &mut name_buf, &mut consumed)?;
        let name = crate::io::cstr_trim(&name_buf);
        let name = String::from_utf8_lossy(name).into_owned();

        let name_pad = pad_len(consumed);
        if name_pad > 0 {
            let mut discard = vec![0u8; name_pad];
            read_exact_tracked(&mut input, &mut discard, &mut consumed)?;
        }

        if name == TRAILER_NAME {
            break;
        }

        let mut content = vec![0u8; filesize];
        read_exact_tracked(&mut input, &mut content, &mut consumed)?;
        let content_pad = pad_len(consumed);
        if content_pad > 0 {
            let mut discard = vec![0u8; content_pad];
            read_exact_tracked(&mut input, &mut discard, &mut consumed)?;
        }

        let file_type = mode & TYPE_MASK;
        let path = output_dir.join(&name);
        match file_type {
            S_IFDIR => {
                fs::create_dir_all(&path)?;
                entries.push(CpioEntry {
                    path: name,
                    kind: EntryKind::Dir,
                    mode,
                    uid,
                    gid,
                });
            }
            S_IFREG => {
                if let Some(parent) = path.parent() {
                    fs::create_dir_all(parent)?;
                }
                fs::write(&path, &content)?;
                entries.push(CpioEntry {
                    path: name,
                    kind: EntryKind::File,
                    mode,
                    uid,
                    gid,
                });
            }
            S_IFLNK => {
                let target = String::from_utf8_lossy(&content).into_owned();
                entries.push(CpioEntry {
                    path: name,
                    kind: EntryKind::Symlink { target },
                    mode,
                    uid,
                    gid,
                });
            }
            other => {
                log::warn!("cpio: skipping unsupported entry {name:?} with mode {other:#o}");
            }
        }
    }

    Ok(entries)
}

fn read_exact_tracked<R: Read>(r: &mut R, buf: &mut [u8], consumed: &mut usize) -> Result<()> {
    r.read_exact(buf).map_err(Error::Io)?;
    *consumed += buf.len();
    Ok(())
}

/// Renders `entries` as manifest text, one line per row in order.
pub fn render_manifest(entries: &[CpioEntry]) -> String {
    let mut out = String::new();
    for entry in entries {
        out.push_str(&entry.to_manifest_line());
        out.push('\n');
    }
    out
}

/// Tokenizes one manifest line into an ordered `key -> value` map.
fn tokenize_line(line: &str, line_no: usize) -> Result<Vec<(String, String)>> {
    let mut pairs = Vec::new();
    let mut chars = line.char_indices().peekable();

    while let Some(&(start, c)) = chars.peek() {
        if c.is_whitespace() {
            chars.next();
            continue;
        }
        let key_start = start;
        let mut key_end = start;
        while let Some(&(i, c)) = chars.peek() {
            if c == '=' {
                break;
            }
            key_end = i + c.len_utf8();
            chars.next();
        }
        match chars.next() {
            Some((_, '=')) => {}
            _ => {
                return Err(Error::Cpio {
                    kind: CpioErrorKind::MissingKey,
                    line_no: Some(line_no),
                    message: format!("expected '=' after key in {line:?}"),
                })
            }
        }
        let key = line[key_start..key_end].to_string();

        let value = if let Some(&(_, '"')) = chars.peek() {
            chars.next();
            let value_start = chars.peek().map(|&(i, _)| i).unwrap_or(line.len());
            let mut value_end = None;
            for (i, c) in chars.by_ref() {
                if c == '"' {
                    value_end = Some(i);
                    break;
                }
            }
            match value_end {
                Some(end) => line[value_start..end].to_string(),
                None => {
                    return Err(Error::Cpio {
                        kind: CpioErrorKind::UnterminatedQuote,
                        line_no: Some(line_no),
                        message: format!("unterminated quote for key {key:?}"),
                    })
                }
            }
        } else {
            let value_start = chars.peek().map(|&(i, _)| i).unwrap_or(line.len());
            let mut value_end = line.len();
            for (i, c) in chars.by_ref() {
                if c.is_whitespace() {
                    value_end = i;
                    break;
                }
                value_end = i + c.len_utf8();
            }
            line[value_start..value_end].to_string()
        };

        pairs.push((key, value));
    }

    Ok(pairs)
}

fn field<'a>(pairs: &'a [(String, String)], key: &str) -> Option<&'a str> {
    pairs
        .iter()
        .find(|(k, _)| k == key)
        .map(|(_, v)| v.as_str())
}

/// Parses manifest text into [`CpioEntry`] rows.
pub fn parse_manifest(text: &str) -> Result<Vec<CpioEntry>> {
    let mut entries = Vec::new();
    for (idx, line) in text.lines().enumerate() {
        let line_no = idx + 1;
        if line.trim().is_empty() {
            continue;
        }
        let pairs = tokenize_line(line, line_no)?;

        let path = field(&pairs, "path")
            .ok_or_else(|| Error::Cpio {
                kind: CpioErrorKind::MissingKey,
                line_no: Some(line_no),
                message: "missing required key 'path'".into(),
            })?
            .to_string();
        let type_str = field(&pairs, "type").ok_or_else(|| Error::Cpio {
            kind: CpioErrorKind::MissingKey,
            line_no: Some(line_no),
            message: "missing required key 'type'".into(),
        })?;

        let (kind, default_mode) = match type_str {
            "dir" => (EntryKind::Dir, 0o755),
            "file" => (EntryKind::File, 0o754),
            "symlink" => {
                let target = field(&pairs, "target")
                    .ok_or_else(|| Error::Cpio {
                        kind: CpioErrorKind::MissingKey,
                        line_no: Some(line_no),
                        message: "symlink entry missing 'target'".into(),
                    })?
                    .to_string();
                (EntryKind::Symlink { target }, 0o754)
            }
            other => {
                return Err(Error::Cpio {
                    kind: CpioErrorKind::UnknownType,
                    line_no: Some(line_no),
                    message: format!("unknown entry type {other:?}"),
                })
            }
        };

        let permissions = match field(&pairs, "mode") {
            Some(m) => u32::from_str_radix(m, 8).map_err(|_| Error::Cpio {
                kind: CpioErrorKind::MissingKey,
                line_no: Some(line_no),
                message: format!("invalid octal mode {m:?}"),
            })?,
            None => default_mode,
        };
        let uid = field(&pairs, "uid").map_or(Ok(0), |v| v.parse()).map_err(|_| {
            Error::Cpio {
                kind: CpioErrorKind::MissingKey,
                line_no: Some(line_no),
                message: "invalid uid".into(),
            }
        })?;
        let gid = field(&pairs, "gid").map_or(Ok(0), |v| v.parse()).map_err(|_| {
            Error::Cpio {
                kind: CpioErrorKind::MissingKey,
                line_no: Some(line_no),
                message: "invalid gid".into(),
            }
        })?;

        let file_type = match kind {
            EntryKind::Dir => S_IFDIR,
            EntryKind::File => S_IFREG,
            EntryKind::Symlink { .. } => S_IFLNK,
        };

        entries.push(CpioEntry {
            path,
            kind,
            mode: file_type | permissions,
            uid,
            gid,
        });
    }
    Ok(entries)
}

fn write_hex_field<W: Write>(w: &mut W, value: u32) -> Result<()> {
    write!(w, "{value:08X}").map_err(|e| Error::Cpio {
        kind: CpioErrorKind::MissingKey,
        line_no: None,
        message: e.to_string(),
    })
}

fn write_entry_header<W: Write>(
    w: &mut W,
    mode: u32,
    uid: u32,
    gid: u32,
    nlink: u32,
    filesize: u32,
    namesize: u32,
) -> Result<()> {
    w.write_all(MAGIC)?;
    write_hex_field(w, 0)?; // ino
    write_hex_field(w, mode)?;
    write_hex_field(w, uid)?;
    write_hex_field(w, gid)?;
    write_hex_field(w, nlink)?;
    write_hex_field(w, 0)?; // mtime
    write_hex_field(w, filesize)?;
    write_hex_field(w, 0)?; // devmajor
    write_hex_field(w, 0)?; // devminor
    write_hex_field(w, 0)?; // rdevmajor
    write_hex_field(w, 0)?; // rdevminor
    write_hex_field(w, namesize)?;
    write_hex_field(w, 0)?; // check
    Ok(())
}

fn write_name_and_content<W: Write>(
    w: &mut W,
    name: &str,
    content: &[u8],
    header_start: usize,
) -> Result<usize> {
    let namesize = name.len() + 1;
    let mut offset = header_start + HEADER_LEN + namesize;
    w.write_all(name.as_bytes())?;
    w.write_all(&[0u8])?;
    let pad = pad_len(offset);
    if pad > 0 {
        w.write_all(&vec![0u8; pad])?;
        offset += pad;
    }
    w.write_all(content)?;
    offset += content.len();
    let pad = pad_len(offset);
    if pad > 0 {
        w.write_all(&vec![0u8; pad])?;
        offset += pad;
    }
    Ok(offset)
}

/// Builds a cpio newc archive from `entries`, reading file/symlink content
/// relative to `input_dir`, and writes it to `output`.
pub fn build<W: Write>(entries: &[CpioEntry], input_dir: &Path, mut output: W) -> Result<()> {
    let mut offset = 0usize;
    for entry in entries {
        let (content, nlink): (Vec<u8>, u32) = match &entry.kind {
            EntryKind::Dir => (Vec::new(), 2),
            EntryKind::File => {
                let path = input_dir.join(&entry.path);
                let content = fs::read(&path).map_err(|_| Error::Cpio {
                    kind: CpioErrorKind::MissingPayload,
                    line_no: None,
                    message: format!("missing payload file {}", path.display()),
                })?;
                (content, 1)
            }
            EntryKind::Symlink { target } => (target.as_bytes().to_vec(), 1),
        };
        let namesize = entry.path.len() as u32 + 1;
        write_entry_header(
            &mut output,
            entry.mode,
            entry.uid,
            entry.gid,
            nlink,
            content.len() as u32,
            namesize,
        )?;
        offset = write_name_and_content(&mut output, &entry.path, &content, offset)?;
    }

    let namesize = TRAILER_NAME.len() as u32 + 1;
    write_entry_header(&mut output, 0, 0, 0, 1, 0, namesize)?;
    write_name_and_content(&mut output, TRAILER_NAME, &[], offset)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_entries() -> Vec<CpioEntry> {
        vec![
            CpioEntry {
                path: "etc".into(),
                kind: EntryKind::Dir,
                mode: S_IFDIR | 0o755,
                uid: 0,
                gid: 0,
            },
            CpioEntry {
                path: "init".into(),
                kind: EntryKind::File,
                mode: S_IFREG | 0o755,
                uid: 0,
                gid: 0,
            },
            CpioEntry {
                path: "etc/passwd".into(),
                kind: EntryKind::Symlink {
                    target: "/bin/true".into(),
                },
                mode: S_IFLNK | 0o777,
                uid: 0,
                gid: 0,
            },
        ]
    }

    #[test]
    fn builds_then_extracts_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("init"), b"hi\n").unwrap();
        let entries = sample_entries();

        let mut archive = Vec::new();
        build(&entries, dir.path(), &mut archive).unwrap();

        let out_dir = tempfile::tempdir().unwrap();
        let extracted = extract(&archive[..], out_dir.path()).unwrap();

        assert_eq!(extracted.len(), entries.len());
        assert_eq!(extracted[1].path, "init");
        assert_eq!(
            std::fs::read(out_dir.path().join("init")).unwrap(),
            b"hi\n"
        );
        match &extracted[2].kind {
            EntryKind::Symlink { target } => assert_eq!(target, "/bin/true"),
            _ => panic!("expected symlink"),
        }
    }

    #[test]
    fn manifest_round_trips_through_text() {
        let entries = sample_entries();
        let text = render_manifest(&entries);
        let parsed = parse_manifest(&text).unwrap();
        assert_eq!(parsed, entries);
    }

    #[test]
    fn manifest_line_matches_spec_example() {
        let entries = vec![CpioEntry {
            path: "init".into(),
            kind: EntryKind::File,
            mode: S_IFREG | 0o755,
            uid: 0,
            gid: 0,
        }];
        let text = render_manifest(&entries);
        assert_eq!(text.trim(), r#"path="init" type=file mode=0755 uid=0 gid=0"#);
    }

    #[test]
    fn symlink_manifest_line_matches_spec_example() {
        let entries = vec![CpioEntry {
            path: "/etc/passwd".into(),
            kind: EntryKind::Symlink {
                target: "/bin/true".into(),
            },
            mode: S_IFLNK | 0o777,
            uid: 0,
            gid: 0,
        }];
        let text = render_manifest(&entries);
        assert_eq!(
            text.trim(),
            r#"path="/etc/passwd" type=symlink mode=0777 uid=0 gid=0 target="/bin/true""#
        );
    }

    #[test]
    fn unterminated_quote_is_fatal() {
        let err = parse_manifest(r#"path="init type=file"#).unwrap_err();
        assert!(matches!(
            err,
            Error::Cpio {
                kind: CpioErrorKind::UnterminatedQuote,
                ..
            }
        ));
    }

    #[test]
    fn missing_required_key_is_fatal() {
        let err = parse_manifest("type=file mode=0755").unwrap_err();
        assert!(matches!(
            err,
            Error::Cpio {
                kind: CpioErrorKind::MissingKey,
                ..
            }
        ));
    }

    #[test]
    fn unknown_type_is_fatal() {
        let err = parse_manifest(r#"path="x" type=fifo"#).unwrap_err();
        assert!(matches!(
            err,
            Error::Cpio {
                kind: CpioErrorKind::UnknownType,
                ..
            }
        ));
    }

    #[test]
    fn bad_magic_is_reported() {
        let err = extract(&b"not a cpio archive at all!!"[..], tempfile::tempdir().unwrap().path())
            .unwrap_err();
        assert!(matches!(
            err,
            Error::Cpio {
                kind: CpioErrorKind::BadMagic,
                ..
            }
        ));
    }
}
