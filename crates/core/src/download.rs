//! Parallel orchestration of a whole repository download.
//!
//! A download moves through `Resolving → LayoutReady → Fetching → Done`
//! (or `Failed`). Files are grouped by content hash and each group is
//! handled by one task, so a blob is written by at most one task per
//! invocation. Every task runs to completion; failures are collected and
//! reported together, keyed by logical path.

use regex::Regex;
use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;
use tokio::task::{self, JoinError, JoinSet};
use tracing::{debug, info, warn};

use crate::config::{DEFAULT_REVISION, DownloadConfig};
use crate::fetcher::{BlobFetcher, FetchOutcome};
use crate::hub::HubClient;
use crate::layout::CacheLayout;
use crate::linker::{PointerState, SnapshotLinker};
use crate::resolver::{ManifestEntry, Resolver};
use crate::{Error, FileFailure, Result};

/// Result of a successful download.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Snapshot {
    /// Storage root holding `blobs/`, `refs/` and `snapshots/`.
    pub storage_root: PathBuf,
    /// The commit's snapshot directory.
    pub snapshot_dir: PathBuf,
    /// Commit identifier the snapshot is keyed by.
    pub commit: String,
    /// Files whose content was transferred in this run.
    pub fetched: usize,
    /// Files served from blobs already in the pool.
    pub reused: usize,
    /// Files excluded by the ignore patterns.
    pub skipped: usize,
}

/// Compiled ignore patterns.
#[derive(Debug, Clone, Default)]
pub struct IgnoreSet {
    patterns: Vec<Regex>,
}

impl IgnoreSet {
    /// Compile every pattern, failing on the first invalid one.
    pub fn compile<S: AsRef<str>>(patterns: &[S]) -> Result<Self> {
        let patterns = patterns
            .iter()
            .map(|p| {
                Regex::new(p.as_ref()).map_err(|source| Error::InvalidPattern {
                    pattern: p.as_ref().to_string(),
                    source,
                })
            })
            .collect::<Result<Vec<_>>>()?;
        Ok(Self { patterns })
    }

    /// Whether any pattern matches `path`.
    #[must_use]
    pub fn is_ignored(&self, path: &str) -> bool {
        self.patterns.iter().any(|p| p.is_match(path))
    }

    /// Number of compiled patterns.
    #[must_use]
    pub fn len(&self) -> usize {
        self.patterns.len()
    }

    /// Whether no patterns are set.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.patterns.is_empty()
    }
}

/// Split `manifest` into entries to fetch, grouped by content hash in
/// first-seen order, and the number of ignored entries.
fn plan(manifest: Vec<ManifestEntry>, ignore: &IgnoreSet) -> (Vec<Vec<ManifestEntry>>, usize) {
    let mut groups: Vec<Vec<ManifestEntry>> = Vec::new();
    let mut index: HashMap<String, usize> = HashMap::new();
    let mut skipped = 0;

    for entry in manifest {
        if ignore.is_ignored(&entry.path) {
            debug!(path = %entry.path, "Ignoring file");
            skipped += 1;
            continue;
        }
        match index.get(&entry.content_hash) {
            Some(&i) => groups[i].push(entry),
            None => {
                index.insert(entry.content_hash.clone(), groups.len());
                groups.push(vec![entry]);
            }
        }
    }

    (groups, skipped)
}

/// Outcome of one content-hash group.
#[derive(Debug, Default)]
struct GroupReport {
    fetched: usize,
    reused: usize,
    failures: Vec<FileFailure>,
}

impl GroupReport {
    fn merge(&mut self, other: Self) {
        self.fetched += other.fetched;
        self.reused += other.reused;
        self.failures.extend(other.failures);
    }

    /// Fold in a finished task. A task that panicked or was cancelled
    /// fails every path it owned.
    fn absorb(
        &mut self,
        result: std::result::Result<Self, JoinError>,
        paths_by_task: &mut HashMap<task::Id, Vec<String>>,
    ) {
        match result {
            Ok(group) => self.merge(group),
            Err(e) => {
                let paths = paths_by_task.remove(&e.id()).unwrap_or_default();
                let error = Arc::new(Error::Task(e.to_string()));
                self.failures.extend(
                    paths
                        .into_iter()
                        .map(|path| FileFailure::new(path, Arc::clone(&error))),
                );
            }
        }
    }
}

/// Per-invocation state shared by every task.
#[derive(Debug)]
struct Job {
    repo_id: String,
    revision: String,
    fetcher: BlobFetcher,
    linker: SnapshotLinker,
}

impl Job {
    /// Fetch the blob shared by `entries` once, then publish every path.
    async fn run_group(&self, entries: Vec<ManifestEntry>) -> GroupReport {
        let mut report = GroupReport::default();
        let Some(first) = entries.first() else {
            return report;
        };
        let blob_path = self.fetcher.blob_path(&first.content_hash);

        let mut pending = Vec::new();
        for entry in entries {
            match self.linker.pointer_state(&entry.path, &blob_path) {
                PointerState::Published => {
                    debug!(path = %entry.path, "File already exists");
                    report.reused += 1;
                }
                PointerState::Stale => {
                    warn!(path = %entry.path, "Pointer exists but blob missing, redownloading");
                    pending.push(entry);
                }
                PointerState::Missing | PointerState::Dangling => pending.push(entry),
            }
        }
        let Some(first) = pending.first() else {
            return report;
        };

        let outcome = match self
            .fetcher
            .ensure_blob(&self.repo_id, &self.revision, first)
            .await
        {
            Ok(outcome) => outcome,
            Err(e) => {
                let error = Arc::new(e);
                report.failures.extend(
                    pending
                        .iter()
                        .map(|entry| FileFailure::new(&entry.path, Arc::clone(&error))),
                );
                return report;
            }
        };

        // Only the file that triggered the transfer counts as fetched.
        let mut downloaded = matches!(outcome, FetchOutcome::Downloaded { .. });
        for entry in &pending {
            match self.linker.publish(entry, outcome.path()) {
                Ok(_) if downloaded => {
                    downloaded = false;
                    report.fetched += 1;
                }
                Ok(_) => report.reused += 1,
                Err(e) => report.failures.push(FileFailure::new(&entry.path, e)),
            }
        }
        report
    }
}

/// Downloads whole repositories into the hub cache layout.
#[derive(Debug, Clone)]
pub struct Downloader {
    config: DownloadConfig,
    hub: HubClient,
}

impl Downloader {
    /// Create a downloader. Builds the HTTP client once.
    ///
    /// Fails with [`Error::Config`] when neither a local directory nor a hub
    /// cache is known.
    pub fn new(config: DownloadConfig) -> Result<Self> {
        if config.local_dir.is_none() && config.hub_cache.is_none() {
            return Err(Error::config(
                "could not get home directory; set a hub cache or local directory",
            ));
        }
        let hub = HubClient::new(&config)?;
        Ok(Self { config, hub })
    }

    /// Configuration in use.
    #[must_use]
    pub const fn config(&self) -> &DownloadConfig {
        &self.config
    }

    /// Download `repo_id` at `revision` and return its snapshot.
    ///
    /// An empty revision means `main`. Nothing is written to disk when
    /// resolution fails. When some files fail the others are still
    /// published and [`Error::Incomplete`] lists every failed path.
    pub async fn download(&self, repo_id: &str, revision: &str) -> Result<Snapshot> {
        let revision = if revision.is_empty() {
            DEFAULT_REVISION
        } else {
            revision
        };
        let ignore = IgnoreSet::compile(&self.config.ignore_patterns)?;

        debug!(%repo_id, %revision, "Resolving");
        let resolved = Resolver::new(self.hub.clone())
            .resolve(repo_id, revision)
            .await?;
        // Unpinned fallback ids are not real commits, so files are fetched
        // by the label that was asked for.
        let fetch_revision = if resolved.is_pinned() {
            resolved.commit.clone()
        } else {
            revision.to_string()
        };

        let storage_root = self.config.storage_root(repo_id)?;
        let layout = CacheLayout::new(&storage_root);
        let snapshot_dir = layout.prepare(&resolved.commit, revision)?;
        let mode = SnapshotLinker::probe(layout.root());
        debug!(?storage_root, ?snapshot_dir, ?mode, "Layout ready");

        let (groups, skipped) = plan(resolved.manifest, &ignore);
        let total: usize = groups.iter().map(Vec::len).sum();
        info!(
            %repo_id,
            commit = %resolved.commit,
            files = total,
            blobs = groups.len(),
            skipped,
            max_parallel = self.config.max_parallel,
            "Fetching"
        );

        let job = Arc::new(Job {
            repo_id: repo_id.to_string(),
            revision: fetch_revision,
            fetcher: BlobFetcher::new(self.hub.clone(), layout.blobs_dir()),
            linker: SnapshotLinker::new(&snapshot_dir, mode),
        });

        let report = self.run_groups(job, groups).await;

        if report.failures.is_empty() {
            info!(
                %repo_id,
                commit = %resolved.commit,
                fetched = report.fetched,
                reused = report.reused,
                skipped,
                "Done"
            );
            Ok(Snapshot {
                storage_root,
                snapshot_dir,
                commit: resolved.commit,
                fetched: report.fetched,
                reused: report.reused,
                skipped,
            })
        } else {
            let mut failures = report.failures;
            failures.sort_by(|a, b| a.path.cmp(&b.path));
            warn!(
                %repo_id,
                failed = failures.len(),
                total,
                "Failed"
            );
            Err(Error::Incomplete { total, failures })
        }
    }

    /// Run every group, keeping at most `max_parallel` in flight.
    async fn run_groups(&self, job: Arc<Job>, groups: Vec<Vec<ManifestEntry>>) -> GroupReport {
        let mut join_set = JoinSet::new();
        let mut paths_by_task = HashMap::new();
        let mut report = GroupReport::default();

        for entries in groups {
            let paths: Vec<String> = entries.iter().map(|e| e.path.clone()).collect();
            let job = Arc::clone(&job);
            let handle = join_set.spawn(async move { job.run_group(entries).await });
            paths_by_task.insert(handle.id(), paths);

            if self.config.max_parallel > 0
                && join_set.len() >= self.config.max_parallel
                && let Some(result) = join_set.join_next().await
            {
                report.absorb(result, &mut paths_by_task);
            }
        }
        while let Some(result) = join_set.join_next().await {
            report.absorb(result, &mut paths_by_task);
        }

        report
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn entry(path: &str, hash: &str) -> ManifestEntry {
        ManifestEntry::new(path, hash, 1)
    }

    #[test]
    fn test_new_without_cache_location_is_config_error() {
        let config = DownloadConfig {
            hub_cache: None,
            ..DownloadConfig::new()
        };
        let err = Downloader::new(config.clone()).unwrap_err();
        assert!(matches!(err, Error::Config(_)));

        let downloader = Downloader::new(config.with_local_dir(Some(PathBuf::from("/data/tiny"))));
        assert!(downloader.is_ok());
    }

    #[test]
    fn test_default_patterns_ignore_docs() {
        let ignore = IgnoreSet::compile(crate::config::DEFAULT_IGNORE_PATTERNS).unwrap();
        assert!(ignore.is_ignored("README.md"));
        assert!(ignore.is_ignored("docs/LICENSE.txt"));
        assert!(!ignore.is_ignored("config.json"));
        assert!(!ignore.is_ignored("notes.md.bak"));
    }

    #[test]
    fn test_invalid_pattern() {
        let err = IgnoreSet::compile(&["(unclosed"]).unwrap_err();
        assert!(matches!(err, Error::InvalidPattern { ref pattern, .. } if pattern == "(unclosed"));
    }

    #[test]
    fn test_empty_ignore_set_keeps_everything() {
        let ignore = IgnoreSet::compile::<&str>(&[]).unwrap();
        assert!(ignore.is_empty());
        assert!(!ignore.is_ignored("README.md"));
    }

    #[test]
    fn test_plan_groups_by_hash_in_order() {
        let ignore = IgnoreSet::compile(&[r"\.md$"]).unwrap();
        let manifest = vec![
            entry("a.json", "h1"),
            entry("README.md", "h2"),
            entry("b.bin", "h3"),
            entry("copy/a.json", "h1"),
        ];

        let (groups, skipped) = plan(manifest, &ignore);

        assert_eq!(skipped, 1);
        let paths: Vec<Vec<&str>> = groups
            .iter()
            .map(|g| g.iter().map(|e| e.path.as_str()).collect())
            .collect();
        assert_eq!(paths, vec![vec!["a.json", "copy/a.json"], vec!["b.bin"]]);
    }

    #[test]
    fn test_group_report_merge() {
        let mut report = GroupReport {
            fetched: 1,
            reused: 2,
            failures: vec![],
        };
        report.merge(GroupReport {
            fetched: 3,
            reused: 0,
            failures: vec![FileFailure::new("x", Error::config("boom"))],
        });
        assert_eq!((report.fetched, report.reused, report.failures.len()), (4, 2, 1));
    }
}
