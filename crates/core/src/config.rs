//! Download configuration.
//!
//! Everything the engine needs is carried by [`DownloadConfig`]. The only
//! ambient input the default uses is the home directory, which locates the
//! hub cache shared with the upstream client. Tokens, endpoints and cache
//! overrides are looked up by the caller and passed in explicitly.

use secrecy::SecretString;

use crate::{Error, Result};
use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

/// Default hub endpoint.
pub const DEFAULT_ENDPOINT: &str = "https://huggingface.co";

/// Revision used when the caller does not name one.
pub const DEFAULT_REVISION: &str = "main";

/// Paths skipped unless the caller supplies its own patterns.
pub const DEFAULT_IGNORE_PATTERNS: &[&str] = &[r"\.md$", r"\.txt$"];

/// Default number of files fetched concurrently.
pub const DEFAULT_MAX_PARALLEL: usize = 8;

/// Default bound on a single network call.
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(30);

/// Redirects followed before a request is abandoned.
pub const MAX_REDIRECTS: usize = 10;

/// Client identifier sent with every request.
pub const USER_AGENT: &str = concat!("hubfetch/", env!("CARGO_PKG_VERSION"));

/// Kind of repository on the hub.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum RepoType {
    /// Model repository (the default).
    #[default]
    Model,
    /// Dataset repository.
    Dataset,
    /// Space repository.
    Space,
}

impl RepoType {
    /// Singular name of the kind.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Model => "model",
            Self::Dataset => "dataset",
            Self::Space => "space",
        }
    }

    /// Collection name used by the API and the cache folder tag.
    #[must_use]
    pub const fn plural(self) -> &'static str {
        match self {
            Self::Model => "models",
            Self::Dataset => "datasets",
            Self::Space => "spaces",
        }
    }

    /// Leading path segment of file URLs, if any.
    ///
    /// Models live at the root of the endpoint; datasets and spaces are
    /// namespaced.
    #[must_use]
    pub const fn url_prefix(self) -> Option<&'static str> {
        match self {
            Self::Model => None,
            Self::Dataset => Some("datasets"),
            Self::Space => Some("spaces"),
        }
    }
}

impl fmt::Display for RepoType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for RepoType {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "model" | "models" => Ok(Self::Model),
            "dataset" | "datasets" => Ok(Self::Dataset),
            "space" | "spaces" => Ok(Self::Space),
            _ => Err(format!("Unknown repository type: {s}")),
        }
    }
}

/// Name of the per-repository folder inside the hub cache.
///
/// `org/tiny-model` as a model becomes `models--org--tiny-model`.
#[must_use]
pub fn repo_folder_name(repo_id: &str, repo_type: RepoType) -> String {
    std::iter::once(repo_type.plural())
        .chain(repo_id.split('/'))
        .collect::<Vec<_>>()
        .join("--")
}

/// Default hub cache: `~/.cache/huggingface/hub`.
///
/// `None` when the home directory cannot be determined.
#[must_use]
pub fn default_hub_cache() -> Option<PathBuf> {
    dirs::home_dir().map(|home| home.join(".cache").join("huggingface").join("hub"))
}

/// Configuration for a [`Downloader`](crate::Downloader).
#[derive(Debug, Clone)]
pub struct DownloadConfig {
    /// Hub endpoint, e.g. `https://huggingface.co`.
    pub endpoint: String,
    /// Bearer token for private repositories.
    pub token: Option<SecretString>,
    /// Hub cache holding one folder per repository. `None` when no home
    /// directory was found and none was set.
    pub hub_cache: Option<PathBuf>,
    /// Use this directory as the storage root instead of a hub cache folder.
    pub local_dir: Option<PathBuf>,
    /// Kind of repository being fetched.
    pub repo_type: RepoType,
    /// Regular expressions matched against logical paths; matches are skipped.
    pub ignore_patterns: Vec<String>,
    /// Files fetched concurrently. `0` means one task per file.
    pub max_parallel: usize,
    /// Bound on a single network call.
    pub timeout: Duration,
    /// `User-Agent` header value.
    pub user_agent: String,
}

impl Default for DownloadConfig {
    fn default() -> Self {
        Self {
            endpoint: DEFAULT_ENDPOINT.to_string(),
            token: None,
            hub_cache: default_hub_cache(),
            local_dir: None,
            repo_type: RepoType::default(),
            ignore_patterns: DEFAULT_IGNORE_PATTERNS
                .iter()
                .map(ToString::to_string)
                .collect(),
            max_parallel: DEFAULT_MAX_PARALLEL,
            timeout: DEFAULT_TIMEOUT,
            user_agent: USER_AGENT.to_string(),
        }
    }
}

impl DownloadConfig {
    /// Create a configuration with default settings.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the hub endpoint.
    #[must_use]
    pub fn with_endpoint(mut self, endpoint: impl Into<String>) -> Self {
        self.endpoint = endpoint.into();
        self
    }

    /// Set the bearer token.
    #[must_use]
    pub fn with_token(mut self, token: Option<String>) -> Self {
        self.token = token.filter(|t| !t.is_empty()).map(SecretString::from);
        self
    }

    /// Set the hub cache directory.
    #[must_use]
    pub fn with_hub_cache(mut self, hub_cache: impl Into<PathBuf>) -> Self {
        self.hub_cache = Some(hub_cache.into());
        self
    }

    /// Store the repository directly under `dir`.
    #[must_use]
    pub fn with_local_dir(mut self, dir: Option<PathBuf>) -> Self {
        self.local_dir = dir;
        self
    }

    /// Set the repository kind.
    #[must_use]
    pub fn with_repo_type(mut self, repo_type: RepoType) -> Self {
        self.repo_type = repo_type;
        self
    }

    /// Replace the ignore patterns.
    #[must_use]
    pub fn with_ignore_patterns<I, S>(mut self, patterns: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.ignore_patterns = patterns.into_iter().map(Into::into).collect();
        self
    }

    /// Set the concurrency window.
    #[must_use]
    pub fn with_max_parallel(mut self, max_parallel: usize) -> Self {
        self.max_parallel = max_parallel;
        self
    }

    /// Set the per-call network timeout.
    #[must_use]
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Storage root for `repo_id`: the local directory when set, otherwise
    /// the repository folder inside the hub cache.
    pub fn storage_root(&self, repo_id: &str) -> Result<PathBuf> {
        if let Some(dir) = &self.local_dir {
            return Ok(dir.clone());
        }
        self.hub_cache
            .as_ref()
            .map(|cache| cache.join(repo_folder_name(repo_id, self.repo_type)))
            .ok_or_else(|| {
                Error::config("could not get home directory; set a hub cache or local directory")
            })
    }
}
