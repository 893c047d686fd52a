//! Cache-aware parallel retrieval of model hub repositories.
//!
//! This crate provides functionality to:
//! - Resolve a repository at a revision into a file manifest and a commit
//! - Fetch each file once into a content-addressed blob pool
//! - Publish every file into a per-commit snapshot tree of relative links
//!
//! The on-disk layout matches the upstream hub cache, so snapshots produced
//! here can be read by other hub clients and vice versa.
//!
//! # Example
//!
//! ```ignore
//! use hubfetch_core::{DownloadConfig, Downloader};
//!
//! let downloader = Downloader::new(DownloadConfig::default())?;
//! let snapshot = downloader.download("openai-community/gpt2", "main").await?;
//! println!("{}", snapshot.snapshot_dir.display());
//! ```

#![warn(missing_docs)]

mod config;
mod download;
mod error;
mod fetcher;
mod hub;
mod layout;
mod linker;
mod progress;
mod resolver;

pub use config::{
    DEFAULT_ENDPOINT, DEFAULT_IGNORE_PATTERNS, DEFAULT_MAX_PARALLEL, DEFAULT_REVISION,
    DEFAULT_TIMEOUT, DownloadConfig, MAX_REDIRECTS, RepoType, USER_AGENT, default_hub_cache,
    repo_folder_name,
};
pub use download::{Downloader, IgnoreSet, Snapshot};
pub use error::{Error, FileFailure, Result};
pub use fetcher::{BlobFetcher, FetchOutcome, FileMetadata, INCOMPLETE_SUFFIX, normalize_etag};
pub use hub::HubClient;
pub use layout::{BLOBS_DIR, CacheLayout, REFS_DIR, SNAPSHOTS_DIR};
pub use linker::{LinkMode, PointerState, SnapshotLinker, relative_target};
pub use progress::megabytes;
pub use resolver::{CommitSource, ManifestEntry, REPO_COMMIT_HEADER, Resolved, Resolver};
