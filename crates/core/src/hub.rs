//! HTTP access to the hub: URL construction and authorized requests.

use reqwest::header::{ACCEPT_ENCODING, AUTHORIZATION};
use reqwest::redirect::Policy;
use reqwest::{Client, Method, RequestBuilder, Url};
use secrecy::{ExposeSecret, SecretString};
use std::time::Duration;

use crate::config::{DownloadConfig, MAX_REDIRECTS, RepoType};
use crate::{Error, Result};

/// Hub client shared by the resolver and the blob fetcher.
///
/// Cloning is cheap; the underlying connection pool is shared.
#[derive(Debug, Clone)]
pub struct HubClient {
    http: Client,
    endpoint: Url,
    token: Option<SecretString>,
    repo_type: RepoType,
    timeout: Duration,
}

impl HubClient {
    /// Build a client from the download configuration.
    pub fn new(config: &DownloadConfig) -> Result<Self> {
        let endpoint = Url::parse(&config.endpoint)
            .map_err(|e| Error::config(format!("invalid endpoint '{}': {e}", config.endpoint)))?;
        if endpoint.cannot_be_a_base() {
            return Err(Error::config(format!(
                "invalid endpoint '{}': not a base URL",
                config.endpoint
            )));
        }

        let http = Client::builder()
            .user_agent(config.user_agent.clone())
            .connect_timeout(config.timeout)
            .redirect(Policy::limited(MAX_REDIRECTS))
            .build()
            .map_err(|e| Error::config(format!("failed to create HTTP client: {e}")))?;

        Ok(Self {
            http,
            endpoint,
            token: config.token.clone(),
            repo_type: config.repo_type,
            timeout: config.timeout,
        })
    }

    /// Bound on each request, and on each idle gap while a body streams.
    #[must_use]
    pub const fn timeout(&self) -> Duration {
        self.timeout
    }

    /// Tree listing URL: `{endpoint}/api/{kind}s/{repo_id}/tree/{revision}?recursive=true`.
    pub fn tree_url(&self, repo_id: &str, revision: &str) -> Result<Url> {
        let mut segments = vec!["api", self.repo_type.plural()];
        segments.extend(repo_id.split('/'));
        segments.extend(["tree", revision]);

        let mut url = self.url(segments)?;
        url.query_pairs_mut().append_pair("recursive", "true");
        Ok(url)
    }

    /// File content URL: `{endpoint}/[{kind}s/]{repo_id}/resolve/{revision}/{path}`.
    ///
    /// The revision is a single segment, so `refs/pr/1` is sent as
    /// `refs%2Fpr%2F1`. Path separators in `path` are kept.
    pub fn file_url(&self, repo_id: &str, revision: &str, path: &str) -> Result<Url> {
        let mut segments: Vec<&str> = self.repo_type.url_prefix().into_iter().collect();
        segments.extend(repo_id.split('/'));
        segments.extend(["resolve", revision]);
        segments.extend(path.split('/'));
        self.url(segments)
    }

    /// Start a request carrying the bearer token (when configured) and an
    /// identity encoding preference, so `Content-Length` is byte-exact.
    pub(crate) fn request(&self, method: Method, url: Url) -> RequestBuilder {
        let builder = self
            .http
            .request(method, url)
            .header(ACCEPT_ENCODING, "identity");
        match &self.token {
            Some(token) => {
                builder.header(AUTHORIZATION, format!("Bearer {}", token.expose_secret()))
            }
            None => builder,
        }
    }

    fn url<'a>(&self, segments: impl IntoIterator<Item = &'a str>) -> Result<Url> {
        let mut url = self.endpoint.clone();
        url.path_segments_mut()
            .map_err(|()| Error::config(format!("invalid endpoint '{}'", self.endpoint)))?
            .pop_if_empty()
            .extend(segments);
        Ok(url)
    }
}
