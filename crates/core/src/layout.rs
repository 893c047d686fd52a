//! On-disk cache layout.
//!
//! Mirrors the hub client's own cache so tools reading it keep working:
//!
//! ```text
//! <root>/
//! ├── blobs/
//! │   └── <content hash>          # one file per distinct content
//! ├── refs/
//! │   └── main                    # commit id the label last resolved to
//! └── snapshots/
//!     └── <commit>/
//!         └── config.json -> ../../blobs/<content hash>
//! ```

use std::path::{Component, Path, PathBuf};
use tracing::{debug, trace, warn};

use crate::{Error, Result};

/// Directory holding content-addressed blobs.
pub const BLOBS_DIR: &str = "blobs";
/// Directory holding revision pointers.
pub const REFS_DIR: &str = "refs";
/// Directory holding one tree per commit.
pub const SNAPSHOTS_DIR: &str = "snapshots";

/// Whether `name` can be used as one path component inside the cache.
///
/// Rejects empty names, `.`, `..`, separators of either platform and
/// anything the local platform would parse as a root or prefix.
#[must_use]
pub fn is_safe_component(name: &str) -> bool {
    if name.is_empty() || name.contains(['/', '\\', '\0']) {
        return false;
    }
    let mut components = Path::new(name).components();
    matches!(
        (components.next(), components.next()),
        (Some(Component::Normal(_)), None)
    )
}

/// Whether `path` is a relative `/`-separated path made only of safe
/// components, so joining it under a directory stays inside it.
#[must_use]
pub fn is_safe_relative_path(path: &str) -> bool {
    !path.is_empty() && path.split('/').all(is_safe_component)
}

/// Cache layout rooted at one repository's storage folder.
#[derive(Debug, Clone)]
pub struct CacheLayout {
    root: PathBuf,
}

impl CacheLayout {
    /// Create a layout at the specified root directory.
    #[must_use]
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    /// Get the storage root.
    #[must_use]
    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Get the blob pool directory.
    #[must_use]
    pub fn blobs_dir(&self) -> PathBuf {
        self.root.join(BLOBS_DIR)
    }

    /// Get the path for a blob.
    #[must_use]
    pub fn blob_path(&self, content_hash: &str) -> PathBuf {
        self.blobs_dir().join(content_hash)
    }

    /// Get the path of the pointer file for a revision label.
    #[must_use]
    pub fn ref_path(&self, revision: &str) -> PathBuf {
        self.root.join(REFS_DIR).join(revision)
    }

    /// Get the snapshot directory for a commit.
    #[must_use]
    pub fn snapshot_dir(&self, commit: &str) -> PathBuf {
        self.root.join(SNAPSHOTS_DIR).join(commit)
    }

    /// Ensure the root and its three subtrees exist.
    ///
    /// Safe to call repeatedly and concurrently.
    pub fn ensure_dirs(&self) -> Result<()> {
        for dir in [
            self.root.clone(),
            self.blobs_dir(),
            self.root.join(REFS_DIR),
            self.root.join(SNAPSHOTS_DIR),
        ] {
            std::fs::create_dir_all(&dir).map_err(|e| {
                Error::config(format!("could not create directory {}: {e}", dir.display()))
            })?;
        }
        Ok(())
    }

    /// Record that `revision` resolved to `commit`.
    ///
    /// Failure only affects label lookups, so it is logged and swallowed.
    pub fn write_ref(&self, revision: &str, commit: &str) {
        if !is_safe_relative_path(revision) {
            warn!(%revision, "Revision label is not a safe relative path, not writing reference");
            return;
        }
        let path = self.ref_path(revision);
        let result = path
            .parent()
            .map_or(Ok(()), std::fs::create_dir_all)
            .and_then(|()| std::fs::write(&path, commit));
        match result {
            Ok(()) => trace!(%revision, %commit, ?path, "Wrote revision reference"),
            Err(e) => warn!(%revision, ?path, error = %e, "Could not write revision reference"),
        }
    }

    /// Commit a revision label last resolved to, if recorded.
    #[must_use]
    pub fn read_ref(&self, revision: &str) -> Option<String> {
        std::fs::read_to_string(self.ref_path(revision))
            .ok()
            .map(|s| s.trim().to_string())
            .filter(|s| !s.is_empty())
    }

    /// Lay out the cache for `commit` and return its snapshot directory.
    ///
    /// The revision pointer is only written when the label differs from the
    /// commit.
    pub fn prepare(&self, commit: &str, revision: &str) -> Result<PathBuf> {
        if !is_safe_component(commit) {
            return Err(Error::config(format!(
                "commit id '{commit}' cannot be used as a directory name"
            )));
        }
        self.ensure_dirs()?;

        if revision != commit {
            self.write_ref(revision, commit);
        }

        let snapshot_dir = self.snapshot_dir(commit);
        std::fs::create_dir_all(&snapshot_dir).map_err(|e| {
            Error::config(format!(
                "could not create snapshot directory {}: {e}",
                snapshot_dir.display()
            ))
        })?;
        debug!(?snapshot_dir, "Cache layout ready");
        Ok(snapshot_dir)
    }
}
