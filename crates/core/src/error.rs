//! Error types for hub retrieval.

use miette::Diagnostic;
use std::path::PathBuf;
use std::sync::Arc;
use thiserror::Error;

/// Result type for hub retrieval operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur while resolving, fetching or publishing a repository.
#[derive(Error, Debug, Diagnostic)]
pub enum Error {
    /// Listing the repository tree failed. Nothing has been written to disk.
    #[error("Could not resolve {repo_id}@{revision}: {message}")]
    #[diagnostic(
        code(hubfetch::metadata),
        help("Check the repository id, the revision and that your token can read the repository")
    )]
    Metadata {
        /// The repository identifier.
        repo_id: String,
        /// The requested revision label.
        revision: String,
        /// Upstream HTTP status, when a response was received.
        status: Option<u16>,
        /// Error message, including the upstream body when available.
        message: String,
    },

    /// The HEAD probe or body transfer for one file failed.
    ///
    /// A body transfer only times out when no chunk arrives within the
    /// configured timeout; its total duration is unbounded.
    #[error("Transfer of '{path}' failed: {message}")]
    #[diagnostic(code(hubfetch::transport))]
    Transport {
        /// Logical path of the file.
        path: String,
        /// Upstream HTTP status, when a response was received.
        status: Option<u16>,
        /// Error message.
        message: String,
    },

    /// The number of bytes received differs from the declared size.
    #[error("Download size mismatch for '{path}': got {actual} bytes, expected {expected} bytes")]
    #[diagnostic(code(hubfetch::size_mismatch))]
    SizeMismatch {
        /// Logical path of the file.
        path: String,
        /// Declared size.
        expected: u64,
        /// Bytes actually received.
        actual: u64,
    },

    /// The sha256 of an LFS file does not match the tree listing.
    #[error("Digest mismatch for '{path}': expected sha256 {expected}, got {actual}")]
    #[diagnostic(code(hubfetch::digest_mismatch))]
    DigestMismatch {
        /// Logical path of the file.
        path: String,
        /// The expected digest.
        expected: String,
        /// The computed digest.
        actual: String,
    },

    /// Linking or copying a blob into the snapshot tree failed.
    #[error("Could not publish {} into the snapshot: {source}", .path.display())]
    #[diagnostic(
        code(hubfetch::publish),
        help("Check permissions on the snapshot directory")
    )]
    Publish {
        /// The pointer path that could not be written.
        path: PathBuf,
        /// Underlying I/O error.
        #[source]
        source: std::io::Error,
    },

    /// Invalid configuration or an unwritable storage root.
    #[error("Configuration error: {0}")]
    #[diagnostic(code(hubfetch::config))]
    Config(String),

    /// An ignore pattern is not a valid regular expression.
    #[error("Invalid ignore pattern '{pattern}': {source}")]
    #[diagnostic(code(hubfetch::ignore_pattern))]
    InvalidPattern {
        /// The offending pattern.
        pattern: String,
        /// Regex compilation error.
        #[source]
        source: regex::Error,
    },

    /// IO error.
    #[error("IO error: {0}")]
    #[diagnostic(code(hubfetch::io))]
    Io(#[from] std::io::Error),

    /// A download task stopped without reporting a result.
    #[error("Download task aborted: {0}")]
    #[diagnostic(code(hubfetch::task))]
    Task(String),

    /// One or more files could not be retrieved.
    #[error("{} of {total} files failed to download", .failures.len())]
    #[diagnostic(
        code(hubfetch::incomplete),
        help("Files that completed are kept in the cache; re-run to retry the rest")
    )]
    Incomplete {
        /// Number of files that were attempted.
        total: usize,
        /// Per-file failures, sorted by logical path.
        #[related]
        failures: Vec<FileFailure>,
    },
}

/// A failure attributed to one logical path of the manifest.
#[derive(Error, Debug, Diagnostic, Clone)]
#[error("{path}: {error}")]
#[diagnostic(code(hubfetch::file_failed))]
pub struct FileFailure {
    /// Logical path of the file inside the repository.
    pub path: String,
    /// What went wrong. Shared when several paths point at the same blob.
    pub error: Arc<Error>,
}

impl FileFailure {
    /// Attribute an error to a logical path.
    #[must_use]
    pub fn new(path: impl Into<String>, error: impl Into<Arc<Error>>) -> Self {
        Self {
            path: path.into(),
            error: error.into(),
        }
    }
}

impl Error {
    /// Create a metadata (resolution) error.
    #[must_use]
    pub fn metadata(
        repo_id: impl Into<String>,
        revision: impl Into<String>,
        status: Option<u16>,
        message: impl Into<String>,
    ) -> Self {
        Self::Metadata {
            repo_id: repo_id.into(),
            revision: revision.into(),
            status,
            message: message.into(),
        }
    }

    /// Create a transport error for one file.
    #[must_use]
    pub fn transport(
        path: impl Into<String>,
        status: Option<u16>,
        message: impl Into<String>,
    ) -> Self {
        Self::Transport {
            path: path.into(),
            status,
            message: message.into(),
        }
    }

    /// Create a size mismatch error.
    #[must_use]
    pub fn size_mismatch(path: impl Into<String>, expected: u64, actual: u64) -> Self {
        Self::SizeMismatch {
            path: path.into(),
            expected,
            actual,
        }
    }

    /// Create a digest mismatch error.
    #[must_use]
    pub fn digest_mismatch(
        path: impl Into<String>,
        expected: impl Into<String>,
        actual: impl Into<String>,
    ) -> Self {
        Self::DigestMismatch {
            path: path.into(),
            expected: expected.into(),
            actual: actual.into(),
        }
    }

    /// Create a publish error.
    #[must_use]
    pub fn publish(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::Publish {
            path: path.into(),
            source,
        }
    }

    /// Create a configuration error.
    #[must_use]
    pub fn config(message: impl Into<String>) -> Self {
        Self::Config(message.into())
    }

    /// Upstream HTTP status carried by this error, if any.
    #[must_use]
    pub const fn status(&self) -> Option<u16> {
        match self {
            Self::Metadata { status, .. } | Self::Transport { status, .. } => *status,
            _ => None,
        }
    }
}
