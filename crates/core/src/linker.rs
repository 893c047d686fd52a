//! Publishing blobs into a commit's snapshot tree.
//!
//! Each logical path becomes a relative symbolic link into the blob pool,
//! or a plain copy of the blob where the filesystem cannot hold symlinks.

use std::io;
use std::path::{Component, Path, PathBuf};
use tracing::{debug, trace, warn};

use crate::layout::is_safe_relative_path;
use crate::resolver::ManifestEntry;
use crate::{Error, Result};

/// How pointers are materialized.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LinkMode {
    /// Relative symbolic link to the blob.
    Symlink,
    /// Full byte copy of the blob.
    Copy,
}

/// State of a pointer relative to its blob.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PointerState {
    /// Nothing at the pointer path.
    Missing,
    /// Pointer and blob both exist; nothing to do.
    Published,
    /// Pointer exists but the blob is gone.
    Stale,
    /// Blob exists but the pointer does not resolve to anything.
    Dangling,
}

/// Writes pointers into one snapshot directory.
#[derive(Debug, Clone)]
pub struct SnapshotLinker {
    snapshot_dir: PathBuf,
    mode: LinkMode,
}

impl SnapshotLinker {
    /// Create a linker for `snapshot_dir`.
    #[must_use]
    pub fn new(snapshot_dir: impl Into<PathBuf>, mode: LinkMode) -> Self {
        Self {
            snapshot_dir: snapshot_dir.into(),
            mode,
        }
    }

    /// Find out whether symlinks can be created inside `dir` by making a
    /// throwaway one.
    #[must_use]
    pub fn probe(dir: &Path) -> LinkMode {
        let supported = tempfile::Builder::new()
            .prefix(".symlink-probe")
            .tempdir_in(dir)
            .and_then(|temp| {
                let target = temp.path().join("target");
                std::fs::write(&target, b"probe")?;
                symlink_file(&target, &temp.path().join("link"))
            });

        match supported {
            Ok(()) => LinkMode::Symlink,
            Err(e) => {
                warn!(
                    dir = ?dir,
                    error = %e,
                    "Symbolic links unsupported, snapshot files will be copied"
                );
                LinkMode::Copy
            }
        }
    }

    /// Mode used for new pointers.
    #[must_use]
    pub const fn mode(&self) -> LinkMode {
        self.mode
    }

    /// Local path of the pointer for a `/`-separated logical path.
    #[must_use]
    pub fn pointer_path(&self, logical_path: &str) -> PathBuf {
        logical_path
            .split('/')
            .filter(|segment| !segment.is_empty())
            .fold(self.snapshot_dir.clone(), |path, segment| path.join(segment))
    }

    /// Inspect the pointer for `logical_path` against `blob_path`.
    ///
    /// A dangling symlink counts as an existing pointer.
    #[must_use]
    pub fn pointer_state(&self, logical_path: &str, blob_path: &Path) -> PointerState {
        let pointer = self.pointer_path(logical_path);
        if std::fs::symlink_metadata(&pointer).is_err() {
            PointerState::Missing
        } else if !blob_path.exists() {
            PointerState::Stale
        } else if std::fs::metadata(&pointer).is_err() {
            PointerState::Dangling
        } else {
            PointerState::Published
        }
    }

    /// Publish `blob_path` at the entry's logical path.
    ///
    /// No-op when the pointer and blob both exist. Otherwise any existing
    /// pointer is replaced.
    pub fn publish(&self, entry: &ManifestEntry, blob_path: &Path) -> Result<PathBuf> {
        if !is_safe_relative_path(&entry.path) {
            return Err(Error::publish(
                &self.snapshot_dir,
                io::Error::new(
                    io::ErrorKind::InvalidInput,
                    format!("'{}' is not a relative path inside the snapshot", entry.path),
                ),
            ));
        }
        let pointer = self.pointer_path(&entry.path);

        if self.pointer_state(&entry.path, blob_path) == PointerState::Published {
            debug!(path = %entry.path, "File already exists");
            return Ok(pointer);
        }

        if let Some(parent) = pointer.parent() {
            std::fs::create_dir_all(parent).map_err(|e| Error::publish(&pointer, e))?;
        }

        if std::fs::symlink_metadata(&pointer).is_ok() {
            std::fs::remove_file(&pointer).map_err(|e| Error::publish(&pointer, e))?;
        }

        match self.mode {
            LinkMode::Symlink => {
                let target = relative_target(&pointer, blob_path);
                if let Err(e) = symlink_file(&target, &pointer) {
                    warn!(
                        path = %entry.path,
                        error = %e,
                        "Could not create symlink, copying file instead"
                    );
                    copy_blob(blob_path, &pointer)?;
                }
            }
            LinkMode::Copy => copy_blob(blob_path, &pointer)?,
        }

        trace!(path = %entry.path, ?pointer, mode = ?self.mode, "Published");
        Ok(pointer)
    }
}

fn copy_blob(blob_path: &Path, pointer: &Path) -> Result<()> {
    std::fs::copy(blob_path, pointer)
        .map(|_| ())
        .map_err(|e| Error::publish(pointer, e))
}

/// Path to `blob` as seen from the directory containing `pointer`.
///
/// Falls back to `blob` unchanged when the two share no leading component.
#[must_use]
pub fn relative_target(pointer: &Path, blob: &Path) -> PathBuf {
    let Some(from) = pointer.parent() else {
        return blob.to_path_buf();
    };
    let from: Vec<Component<'_>> = from.components().collect();
    let to: Vec<Component<'_>> = blob.components().collect();

    let common = from.iter().zip(&to).take_while(|(a, b)| a == b).count();
    if common == 0 {
        return blob.to_path_buf();
    }

    let mut relative = PathBuf::new();
    for _ in common..from.len() {
        relative.push("..");
    }
    for component in &to[common..] {
        relative.push(component.as_os_str());
    }
    relative
}

#[cfg(unix)]
fn symlink_file(original: &Path, link: &Path) -> io::Result<()> {
    std::os::unix::fs::symlink(original, link)
}

#[cfg(windows)]
fn symlink_file(original: &Path, link: &Path) -> io::Result<()> {
    std::os::windows::fs::symlink_file(original, link)
}

#[cfg(not(any(unix, windows)))]
fn symlink_file(_original: &Path, _link: &Path) -> io::Result<()> {
    Err(io::Error::new(
        io::ErrorKind::Unsupported,
        "symbolic links are not supported on this platform",
    ))
}
