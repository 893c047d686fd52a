//! Repository metadata resolution.
//!
//! Turns `repo_id@revision` into a manifest of files and the commit the
//! revision pointed at when the listing was taken.

use reqwest::Method;
use serde::Deserialize;
use tracing::{debug, info, warn};

use crate::hub::HubClient;
use crate::layout::{is_safe_component, is_safe_relative_path};
use crate::{Error, Result};

/// Response header carrying the resolved commit.
pub const REPO_COMMIT_HEADER: &str = "x-repo-commit";

/// One file of the repository.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ManifestEntry {
    /// Path inside the repository, `/`-separated.
    pub path: String,
    /// Content hash; the blob pool key.
    pub content_hash: String,
    /// Size in bytes as listed by the hub.
    pub size: u64,
    /// sha256 of the content for LFS-tracked files.
    pub lfs_sha256: Option<String>,
}

impl ManifestEntry {
    /// Create an entry without LFS information.
    #[must_use]
    pub fn new(path: impl Into<String>, content_hash: impl Into<String>, size: u64) -> Self {
        Self {
            path: path.into(),
            content_hash: content_hash.into(),
            size,
            lfs_sha256: None,
        }
    }
}

/// Where the commit identifier came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CommitSource {
    /// The `X-Repo-Commit` response header.
    Header,
    /// Content hash of the first listed file. Not a real commit id.
    FirstEntry,
    /// The requested revision itself (empty listing, no header).
    Revision,
}

/// Result of resolving a repository at a revision.
#[derive(Debug, Clone)]
pub struct Resolved {
    /// Commit identifier keying the snapshot.
    pub commit: String,
    /// How `commit` was derived.
    pub commit_source: CommitSource,
    /// Regular files of the repository.
    pub manifest: Vec<ManifestEntry>,
}

impl Resolved {
    /// Whether `commit` is a real immutable commit id from the hub.
    #[must_use]
    pub fn is_pinned(&self) -> bool {
        self.commit_source == CommitSource::Header
    }
}

#[derive(Debug, Deserialize)]
struct TreeEntry {
    #[serde(rename = "type")]
    kind: String,
    path: String,
    #[serde(default)]
    oid: String,
    #[serde(default)]
    size: u64,
    #[serde(default)]
    lfs: Option<LfsInfo>,
}

#[derive(Debug, Deserialize)]
struct LfsInfo {
    oid: String,
    #[serde(default)]
    size: u64,
}

impl TreeEntry {
    fn into_manifest_entry(self) -> Option<ManifestEntry> {
        if self.kind != "file" {
            return None;
        }
        let size = match &self.lfs {
            Some(lfs) if lfs.size > 0 => lfs.size,
            _ => self.size,
        };
        Some(ManifestEntry {
            path: self.path,
            content_hash: self.oid,
            size,
            lfs_sha256: self.lfs.map(|lfs| lfs.oid),
        })
    }
}

/// Resolves repositories against the hub tree-listing endpoint.
#[derive(Debug, Clone)]
pub struct Resolver {
    hub: HubClient,
}

impl Resolver {
    /// Create a resolver using `hub` for requests.
    #[must_use]
    pub const fn new(hub: HubClient) -> Self {
        Self { hub }
    }

    /// List `repo_id` at `revision` and derive its commit.
    ///
    /// Issues exactly one request. Failures carry the upstream status and
    /// body and are never retried.
    pub async fn resolve(&self, repo_id: &str, revision: &str) -> Result<Resolved> {
        let url = self.hub.tree_url(repo_id, revision)?;
        debug!(%url, "Listing repository tree");

        let response = self
            .hub
            .request(Method::GET, url)
            .timeout(self.hub.timeout())
            .send()
            .await
            .map_err(|e| {
                Error::metadata(repo_id, revision, None, format!("error making API request: {e}"))
            })?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(Error::metadata(
                repo_id,
                revision,
                Some(status.as_u16()),
                format!("API returned status code: {}, body: {body}", status.as_u16()),
            ));
        }

        let header_commit = response
            .headers()
            .get(REPO_COMMIT_HEADER)
            .and_then(|v| v.to_str().ok())
            .filter(|v| !v.is_empty())
            .map(str::to_string);

        let body = response.bytes().await.map_err(|e| {
            Error::metadata(
                repo_id,
                revision,
                Some(status.as_u16()),
                format!("error reading API response: {e}"),
            )
        })?;
        let entries: Vec<TreeEntry> = serde_json::from_slice(&body).map_err(|e| {
            Error::metadata(
                repo_id,
                revision,
                Some(status.as_u16()),
                format!("error decoding API response: {e}"),
            )
        })?;

        let manifest: Vec<ManifestEntry> = entries
            .into_iter()
            .filter_map(TreeEntry::into_manifest_entry)
            .collect();
        check_manifest(&manifest)
            .map_err(|message| Error::metadata(repo_id, revision, Some(status.as_u16()), message))?;

        let (commit, commit_source) = derive_commit(header_commit, &manifest, revision);
        if !is_safe_component(&commit) {
            return Err(Error::metadata(
                repo_id,
                revision,
                Some(status.as_u16()),
                format!("commit id '{commit}' cannot be used as a directory name"),
            ));
        }
        if commit_source != CommitSource::Header {
            warn!(
                %repo_id,
                %revision,
                %commit,
                source = ?commit_source,
                "Listing did not carry a commit header; snapshot is keyed by a fallback id"
            );
        }

        info!(
            %repo_id,
            %revision,
            %commit,
            files = manifest.len(),
            "Resolved repository"
        );

        Ok(Resolved {
            commit,
            commit_source,
            manifest,
        })
    }
}

/// Every logical path must stay inside the snapshot and every content hash
/// must name a single file in the blob pool.
fn check_manifest(manifest: &[ManifestEntry]) -> std::result::Result<(), String> {
    for entry in manifest {
        if !is_safe_relative_path(&entry.path) {
            return Err(format!("listing contains unsafe file path '{}'", entry.path));
        }
        if !is_safe_component(&entry.content_hash) {
            return Err(format!(
                "listing contains unsafe content hash '{}' for '{}'",
                entry.content_hash, entry.path
            ));
        }
    }
    Ok(())
}

fn derive_commit(
    header: Option<String>,
    manifest: &[ManifestEntry],
    revision: &str,
) -> (String, CommitSource) {
    if let Some(commit) = header {
        return (commit, CommitSource::Header);
    }
    match manifest.first() {
        Some(entry) if !entry.content_hash.is_empty() => {
            (entry.content_hash.clone(), CommitSource::FirstEntry)
        }
        _ => (revision.to_string(), CommitSource::Revision),
    }
}
