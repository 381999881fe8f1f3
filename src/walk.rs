//! Filesystem traversal feeding the archive writer
//!
//! [`walk_path`] visits a source root and hands every file and directory to a
//! visitor, one [`Entry`] at a time:
//!
//! - A regular file root is visited once, named by its base name.
//! - A directory root is walked depth-first; the root itself is not visited,
//!   every descendant is named relative to it with `/` separators, and a
//!   directory is always visited before its children.
//! - Anything that is neither a directory nor a regular file below the root
//!   (symlinks, devices, sockets, FIFOs) is skipped. A root of that kind is
//!   rejected with [`TransferError::InvalidSource`].
//!
//! Siblings come in the order the filesystem enumerates them, which is stable
//! for an unchanged directory.
//!
//! A file's content is lent to the visitor as `&mut dyn Read` for the duration
//! of the call and the handle is closed before the walk moves on, so at most
//! one source file is open at any time.

use crate::error::{Result, TransferError};
use std::fs::{self, File};
use std::io::{self, Read};
use std::path::{Component, Path, PathBuf};
use std::time::{SystemTime, UNIX_EPOCH};
use tokio_util::sync::CancellationToken;
use walkdir::WalkDir;

/// Metadata carried with every visited entry
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EntryMetadata {
    /// Size in bytes (0 for directories)
    pub size: u64,
    pub modified: SystemTime,
    /// Permission bits (`0o7777` mask), without the file type
    pub mode: u32,
    pub is_dir: bool,
}

impl EntryMetadata {
    /// Metadata for a regular file
    pub fn file(size: u64, modified: SystemTime, mode: u32) -> Self {
        Self {
            size,
            modified,
            mode: mode & 0o7777,
            is_dir: false,
        }
    }

    /// Metadata for a directory
    pub fn directory(modified: SystemTime, mode: u32) -> Self {
        Self {
            size: 0,
            modified,
            mode: mode & 0o7777,
            is_dir: true,
        }
    }

    /// Build entry metadata from filesystem metadata
    pub fn from_fs(meta: &fs::Metadata) -> Self {
        let modified = meta.modified().unwrap_or(UNIX_EPOCH);
        let mode = permission_bits(meta);
        if meta.is_dir() {
            Self::directory(modified, mode)
        } else {
            Self::file(meta.len(), modified, mode)
        }
    }
}

#[cfg(unix)]
fn permission_bits(meta: &fs::Metadata) -> u32 {
    use std::os::unix::fs::PermissionsExt;
    meta.permissions().mode() & 0o7777
}

#[cfg(not(unix))]
fn permission_bits(meta: &fs::Metadata) -> u32 {
    match (meta.is_dir(), meta.permissions().readonly()) {
        (true, _) => 0o755,
        (false, true) => 0o444,
        (false, false) => 0o644,
    }
}

/// One filesystem object handed to the visitor
pub struct Entry<'a> {
    /// Slash-separated path relative to the archive root
    pub path: String,
    pub metadata: EntryMetadata,
    /// File content; `None` for directories
    pub content: Option<&'a mut dyn Read>,
}

/// Walk `source` and call `visit` for every file and directory, in order.
///
/// The cancellation token is checked before each object is visited and on
/// every read of a file's content. Once it fires, the walk stops with
/// [`TransferError::Cancelled`]. Any error returned by `visit` aborts the walk
/// and is returned as-is.
pub fn walk_path<F>(source: &Path, cancel: &CancellationToken, mut visit: F) -> Result<()>
where
    F: FnMut(Entry<'_>) -> Result<()>,
{
    let source = clean_path(source);

    let meta = fs::symlink_metadata(&source).map_err(|e| TransferError::Walk {
        path: source.clone(),
        source: e,
    })?;
    let file_type = meta.file_type();

    if file_type.is_dir() {
        walk_dir(&source, cancel, &mut visit)
    } else if file_type.is_file() {
        if cancel.is_cancelled() {
            return Err(TransferError::Cancelled);
        }
        let name = source
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .ok_or_else(|| TransferError::InvalidSource(source.clone()))?;
        let mut file = File::open(&source).map_err(|e| TransferError::Walk {
            path: source.clone(),
            source: e,
        })?;
        let mut content = CancelAware::new(&mut file, cancel);
        let result = visit(Entry {
            path: name,
            metadata: EntryMetadata::from_fs(&meta),
            content: Some(&mut content),
        });
        settle(result, cancel)
    } else {
        Err(TransferError::InvalidSource(source))
    }
}

fn walk_dir<F>(root: &Path, cancel: &CancellationToken, visit: &mut F) -> Result<()>
where
    F: FnMut(Entry<'_>) -> Result<()>,
{
    for item in WalkDir::new(root).min_depth(1).follow_links(false) {
        if cancel.is_cancelled() {
            return Err(TransferError::Cancelled);
        }

        let dent = item.map_err(|e| TransferError::Walk {
            path: e.path().unwrap_or(root).to_path_buf(),
            source: e.into(),
        })?;

        let file_type = dent.file_type();
        if !(file_type.is_dir() || file_type.is_file()) {
            tracing::trace!(path = %dent.path().display(), "skipping special file");
            continue;
        }

        let meta = dent.metadata().map_err(|e| TransferError::Walk {
            path: dent.path().to_path_buf(),
            source: e.into(),
        })?;
        let path = relative_slash_path(root, dent.path())?;
        let metadata = EntryMetadata::from_fs(&meta);

        let result = if file_type.is_file() {
            let mut file = File::open(dent.path()).map_err(|e| TransferError::Walk {
                path: dent.path().to_path_buf(),
                source: e,
            })?;
            let mut content = CancelAware::new(&mut file, cancel);
            visit(Entry {
                path,
                metadata,
                content: Some(&mut content),
            })
        } else {
            visit(Entry {
                path,
                metadata,
                content: None,
            })
        };
        settle(result, cancel)?;
    }
    Ok(())
}

/// A failure that races with cancellation is reported as cancellation.
pub(crate) fn settle(result: Result<()>, cancel: &CancellationToken) -> Result<()> {
    match result {
        Err(e) if cancel.is_cancelled() && !e.is_cancelled() => {
            tracing::debug!(error = %e, "visitor failed after cancellation");
            Err(TransferError::Cancelled)
        }
        other => other,
    }
}

fn relative_slash_path(root: &Path, path: &Path) -> Result<String> {
    let rel = path.strip_prefix(root).map_err(|_| TransferError::Walk {
        path: path.to_path_buf(),
        source: io::Error::new(io::ErrorKind::InvalidInput, "path escapes source root"),
    })?;
    let parts: Vec<_> = rel
        .components()
        .map(|c| c.as_os_str().to_string_lossy())
        .collect();
    Ok(parts.join("/"))
}

/// Lexically normalize a path: drop `.` segments and trailing separators and
/// fold `..` into the preceding segment. Symlinks are not resolved.
pub fn clean_path(path: &Path) -> PathBuf {
    let mut out: Vec<Component<'_>> = Vec::new();
    for component in path.components() {
        match component {
            Component::CurDir => {}
            Component::ParentDir => match out.last() {
                Some(Component::Normal(_)) => {
                    out.pop();
                }
                // `/..` is `/`
                Some(Component::RootDir) | Some(Component::Prefix(_)) => {}
                _ => out.push(component),
            },
            _ => out.push(component),
        }
    }
    if out.is_empty() {
        return PathBuf::from(".");
    }
    out.iter().collect()
}

/// Content reader that fails once cancellation is requested.
struct CancelAware<'a, R: Read> {
    inner: R,
    cancel: &'a CancellationToken,
}

impl<'a, R: Read> CancelAware<'a, R> {
    fn new(inner: R, cancel: &'a CancellationToken) -> Self {
        Self { inner, cancel }
    }
}

impl<R: Read> Read for CancelAware<'_, R> {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        if self.cancel.is_cancelled() {
            return Err(io::Error::new(io::ErrorKind::Other, "operation cancelled"));
        }
        self.inner.read(buf)
    }
}
