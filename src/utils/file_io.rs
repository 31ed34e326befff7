//! Small filesystem helpers shared by the disk backends.
//!
//! Every helper maps `std::io::Error` into [`StorageError::PathError`] so the
//! failing path survives into logs.

use std::fs;
use std::fs::File;
use std::fs::OpenOptions;
use std::io::Write;
use std::path::Path;
use std::path::PathBuf;

use tracing::debug;
use tracing::warn;

use crate::constants::RECORD_HEADER_SIZE;
use crate::constants::TEMP_FILE_SUFFIX;
use crate::Result;
use crate::StorageError;

pub fn create_dir_if_not_exist(path: &Path) -> Result<()> {
    if !path.exists() {
        fs::create_dir_all(path).map_err(|e| StorageError::at_path(path, e))?;
        debug!(?path, "created directory");
    }
    Ok(())
}

/// Persist directory entries (creations, renames, unlinks) of `dir`.
#[cfg(unix)]
pub fn fsync_dir(dir: &Path) -> Result<()> {
    File::open(dir)
        .and_then(|d| d.sync_all())
        .map_err(|e| StorageError::at_path(dir, e).into())
}

#[cfg(not(unix))]
pub fn fsync_dir(_dir: &Path) -> Result<()> {
    Ok(())
}

pub fn temp_path_of(path: &Path) -> PathBuf {
    let mut name = path.file_name().map(|n| n.to_os_string()).unwrap_or_default();
    name.push(TEMP_FILE_SUFFIX);
    path.with_file_name(name)
}

/// Replace `path` with `bytes` so that a crash leaves either the old or the
/// new content: write a sibling temp file, fsync it, rename over `path`,
/// then fsync the parent directory.
pub fn write_atomic(
    path: &Path,
    bytes: &[u8],
    sync: bool,
) -> Result<()> {
    let temp_path = temp_path_of(path);
    {
        let mut file = File::create(&temp_path).map_err(|e| StorageError::at_path(&temp_path, e))?;
        file.write_all(bytes).map_err(|e| StorageError::at_path(&temp_path, e))?;
        if sync {
            file.sync_all().map_err(|e| StorageError::at_path(&temp_path, e))?;
        }
    }
    fs::rename(&temp_path, path).map_err(|e| StorageError::at_path(path, e))?;
    if sync {
        if let Some(parent) = path.parent() {
            fsync_dir(parent)?;
        }
    }
    Ok(())
}

/// Frame `payload` as `[len: u32 BE][crc32(payload): u32 BE][crc32(len, crc): u32 BE][payload]`.
pub fn encode_checksummed(payload: &[u8]) -> Vec<u8> {
    let mut buf = Vec::with_capacity(RECORD_HEADER_SIZE as usize + payload.len());
    buf.extend_from_slice(&(payload.len() as u32).to_be_bytes());
    buf.extend_from_slice(&crc32fast::hash(payload).to_be_bytes());
    let header_crc = crc32fast::hash(&buf);
    buf.extend_from_slice(&header_crc.to_be_bytes());
    buf.extend_from_slice(payload);
    buf
}

/// Parse a record header. Returns `(payload_len, crc)`, or `None` when the
/// header is short or fails its own checksum.
pub fn decode_header(header: &[u8]) -> Option<(u32, u32)> {
    if header.len() < RECORD_HEADER_SIZE as usize {
        return None;
    }
    let len = u32::from_be_bytes(header[0..4].try_into().ok()?);
    let crc = u32::from_be_bytes(header[4..8].try_into().ok()?);
    let header_crc = u32::from_be_bytes(header[8..12].try_into().ok()?);
    if crc32fast::hash(&header[0..8]) != header_crc {
        return None;
    }
    Some((len, crc))
}

/// Inverse of [`encode_checksummed`] for a buffer holding exactly one record.
pub fn decode_checksummed<'a>(
    buf: &'a [u8],
    location: &Path,
) -> Result<&'a [u8]> {
    let (len, crc) = decode_header(buf).ok_or_else(|| {
        StorageError::corruption(location.display().to_string(), "truncated or damaged record header")
    })?;
    let payload = &buf[RECORD_HEADER_SIZE as usize..];
    if payload.len() != len as usize {
        return Err(StorageError::corruption(
            location.display().to_string(),
            format!("record length mismatch: header says {len}, found {}", payload.len()),
        )
        .into());
    }
    if crc32fast::hash(payload) != crc {
        return Err(StorageError::corruption(location.display().to_string(), "checksum mismatch").into());
    }
    Ok(payload)
}

/// Read a checksummed single-record file. `Ok(None)` when it does not exist.
pub fn read_checksummed_file(path: &Path) -> Result<Option<Vec<u8>>> {
    match fs::read(path) {
        Ok(buf) => Ok(Some(decode_checksummed(&buf, path)?.to_vec())),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
        Err(e) => Err(StorageError::at_path(path, e).into()),
    }
}

#[cfg(unix)]
pub fn read_exact_at(
    file: &File,
    buf: &mut [u8],
    offset: u64,
) -> std::io::Result<()> {
    use std::os::unix::fs::FileExt;
    file.read_exact_at(buf, offset)
}

#[cfg(windows)]
pub fn read_exact_at(
    file: &File,
    mut buf: &mut [u8],
    mut offset: u64,
) -> std::io::Result<()> {
    use std::os::windows::fs::FileExt;
    while !buf.is_empty() {
        match file.seek_read(buf, offset) {
            Ok(0) => return Err(std::io::ErrorKind::UnexpectedEof.into()),
            Ok(n) => {
                buf = &mut buf[n..];
                offset += n as u64;
            }
            Err(e) if e.kind() == std::io::ErrorKind::Interrupted => {}
            Err(e) => return Err(e),
        }
    }
    Ok(())
}

pub fn open_for_append(path: &Path) -> Result<File> {
    OpenOptions::new()
        .read(true)
        .append(true)
        .create(true)
        .open(path)
        .map_err(|e| StorageError::at_path(path, e).into())
}

pub fn remove_file_if_exists(path: &Path) -> Result<()> {
    match fs::remove_file(path) {
        Ok(()) => Ok(()),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
        Err(e) => Err(StorageError::at_path(path, e).into()),
    }
}

pub fn remove_dir_if_exists(path: &Path) -> Result<()> {
    match fs::remove_dir_all(path) {
        Ok(()) => Ok(()),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
        Err(e) => Err(StorageError::at_path(path, e).into()),
    }
}

/// Copy a file, or a directory tree, from `src` into `dst`.
///
/// A file lands at `dst/<file name>`; a directory's children land directly
/// under `dst`.
pub fn copy_into(
    src: &Path,
    dst: &Path,
) -> Result<u64> {
    let meta = fs::metadata(src).map_err(|e| StorageError::at_path(src, e))?;
    create_dir_if_not_exist(dst)?;
    if meta.is_file() {
        let name = src
            .file_name()
            .ok_or_else(|| StorageError::InvalidArgument(format!("{src:?} has no file name")))?;
        let target = dst.join(name);
        return fs::copy(src, &target).map_err(|e| StorageError::at_path(&target, e).into());
    }

    let mut copied = 0;
    for entry in fs::read_dir(src).map_err(|e| StorageError::at_path(src, e))? {
        let entry = entry.map_err(|e| StorageError::at_path(src, e))?;
        let path = entry.path();
        if path.is_dir() {
            copied += copy_into(&path, &dst.join(entry.file_name()))?;
        } else {
            let target = dst.join(entry.file_name());
            copied += fs::copy(&path, &target).map_err(|e| StorageError::at_path(&target, e))?;
        }
    }
    Ok(copied)
}

/// fsync every file and directory under `dir`, then `dir` itself.
pub fn sync_tree(dir: &Path) -> Result<()> {
    for entry in fs::read_dir(dir).map_err(|e| StorageError::at_path(dir, e))? {
        let path = entry.map_err(|e| StorageError::at_path(dir, e))?.path();
        if path.is_dir() {
            sync_tree(&path)?;
        } else {
            File::open(&path)
                .and_then(|f| f.sync_all())
                .map_err(|e| StorageError::at_path(&path, e))?;
        }
    }
    fsync_dir(dir)
}

/// Flat list of regular file names under `dir`, relative to it, sorted.
pub fn list_files_recursive(dir: &Path) -> Result<Vec<String>> {
    fn walk(
        root: &Path,
        dir: &Path,
        out: &mut Vec<String>,
    ) -> Result<()> {
        for entry in fs::read_dir(dir).map_err(|e| StorageError::at_path(dir, e))? {
            let path = entry.map_err(|e| StorageError::at_path(dir, e))?.path();
            if path.is_dir() {
                walk(root, &path, out)?;
            } else if let Ok(rel) = path.strip_prefix(root) {
                out.push(rel.to_string_lossy().replace('\\', "/"));
            } else {
                warn!(?path, "file outside of walked root");
            }
        }
        Ok(())
    }

    let mut out = Vec::new();
    if dir.exists() {
        walk(dir, dir, &mut out)?;
    }
    out.sort();
    Ok(out)
}

/// Reject names that would escape the directory they are joined to.
pub fn validate_relative_name(name: &str) -> Result<()> {
    let path = Path::new(name);
    let escapes = name.is_empty()
        || path.is_absolute()
        || path
            .components()
            .any(|c| !matches!(c, std::path::Component::Normal(_)));
    if escapes {
        return Err(StorageError::InvalidArgument(format!("invalid file name {name:?}")).into());
    }
    Ok(())
}
