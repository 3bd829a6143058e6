//! Atomic file replacement
//!
//! Content is streamed into a temporary file next to the target, hashed on
//! the way, verified, and only then renamed over the target. Readers see
//! either the old file or the complete new one.

use crate::error::Error;
use anyhow::Result;
use std::fs;
use std::io::{self, BufWriter, Read, Write};
use std::path::Path;

/// BLAKE3 hex digest of a byte slice
pub fn checksum_bytes(bytes: &[u8]) -> String {
    blake3::hash(bytes).to_hex().to_string()
}

/// BLAKE3 hex digest of everything a reader yields
pub fn checksum_reader(reader: &mut impl Read) -> io::Result<String> {
    let mut hasher = blake3::Hasher::new();
    io::copy(reader, &mut hasher)?;
    Ok(hasher.finalize().to_hex().to_string())
}

/// BLAKE3 hex digest of a file's content
pub fn checksum_file(path: &Path) -> Result<String, Error> {
    let mut file = fs::File::open(path).map_err(|e| Error::io(path, e))?;
    checksum_reader(&mut file).map_err(|e| Error::io(path, e))
}

/// Writer that hashes everything passing through it
struct HashingWriter<'h, W: Write> {
    inner: W,
    hasher: &'h mut blake3::Hasher,
}

impl<W: Write> Write for HashingWriter<'_, W> {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        let written = self.inner.write(buf)?;
        self.hasher.update(&buf[..written]);
        Ok(written)
    }

    fn flush(&mut self) -> io::Result<()> {
        self.inner.flush()
    }
}

/// Replace `path` with the bytes written by `produce`
///
/// The temporary file lives in the target's directory so the final rename
/// stays on one filesystem. If `expected` is set and the digest of the
/// produced bytes differs, nothing is replaced. The temporary file is
/// removed on every failure path. Returns the digest of the new content.
pub fn write_atomic<F>(path: &Path, expected: Option<&str>, produce: F) -> Result<String>
where
    F: FnOnce(&mut dyn Write) -> Result<()>,
{
    let dir = match path.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => parent,
        _ => Path::new("."),
    };
    let name = path
        .file_name()
        .map(|name| name.to_string_lossy().into_owned())
        .unwrap_or_default();

    let mut tmp = tempfile::Builder::new()
        .prefix(&format!(".{name}."))
        .suffix(".tmp")
        .tempfile_in(dir)
        .map_err(|e| Error::io(dir, e))?;
    log::trace!("Writing {} through {}", path.display(), tmp.path().display());

    let mut hasher = blake3::Hasher::new();
    {
        let mut sink = HashingWriter {
            inner: BufWriter::new(tmp.as_file_mut()),
            hasher: &mut hasher,
        };
        produce(&mut sink)?;
        sink.flush().map_err(|e| Error::io(path, e))?;
    }
    tmp.as_file()
        .sync_all()
        .map_err(|e| Error::io(tmp.path(), e))?;

    let actual = hasher.finalize().to_hex().to_string();
    if let Some(expected) = expected
        && !expected.eq_ignore_ascii_case(&actual)
    {
        return Err(Error::ChecksumMismatch {
            path: path.to_path_buf(),
            expected: expected.to_string(),
            actual,
        }
        .into());
    }

    match fs::remove_file(path) {
        Ok(()) => {}
        Err(e) if e.kind() == io::ErrorKind::NotFound => {}
        Err(e) => {
            return Err(Error::Replace {
                path: path.to_path_buf(),
                source: e,
            }
            .into());
        }
    }

    tmp.persist(path).map_err(|e| Error::Replace {
        path: path.to_path_buf(),
        source: e.error,
    })?;

    Ok(actual)
}
