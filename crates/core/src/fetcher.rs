//! Blob retrieval into the content-addressed pool.
//!
//! A blob becomes visible only through the final rename of its
//! `.incomplete` file, so the pool never exposes a partial blob. Any exit
//! before the rename removes the temporary file.

use reqwest::header::{CONTENT_LENGTH, ETAG, HeaderMap};
use reqwest::{Method, Url};
use sha2::{Digest, Sha256};
use std::path::{Path, PathBuf};
use tokio::io::{AsyncWriteExt, BufWriter};
use tracing::{debug, info, warn};

use crate::hub::HubClient;
use crate::layout::is_safe_component;
use crate::progress::{PROGRESS_INTERVAL, ProgressThrottle, megabytes};
use crate::resolver::{ManifestEntry, REPO_COMMIT_HEADER};
use crate::{Error, Result};

/// Buffer size used when writing a body to disk.
pub const DOWNLOAD_CHUNK_SIZE: usize = 8192;

/// Suffix of a blob that is still being written.
pub const INCOMPLETE_SUFFIX: &str = ".incomplete";

const LINKED_ETAG_HEADER: &str = "x-linked-etag";
const LINKED_SIZE_HEADER: &str = "x-linked-size";

/// File metadata returned by the HEAD probe.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FileMetadata {
    /// Commit the file was served from.
    pub commit: Option<String>,
    /// Validation token, unquoted.
    pub etag: Option<String>,
    /// Final URL after redirects.
    pub location: String,
    /// Authoritative size, when the hub reported one.
    pub size: Option<u64>,
}

impl FileMetadata {
    fn from_headers(headers: &HeaderMap, location: String) -> Self {
        let etag = header_str(headers, LINKED_ETAG_HEADER)
            .or_else(|| header_str(headers, ETAG.as_str()))
            .map(|e| normalize_etag(&e))
            .filter(|e| !e.is_empty());
        let size = header_str(headers, LINKED_SIZE_HEADER)
            .or_else(|| header_str(headers, CONTENT_LENGTH.as_str()))
            .and_then(|s| s.trim().parse().ok());

        Self {
            commit: header_str(headers, REPO_COMMIT_HEADER),
            etag,
            location,
            size,
        }
    }
}

/// What [`BlobFetcher::ensure_blob`] did.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FetchOutcome {
    /// The blob was already in the pool; no network call was made.
    Cached(PathBuf),
    /// The blob was downloaded.
    Downloaded {
        /// Path of the blob in the pool.
        path: PathBuf,
        /// Bytes received.
        bytes: u64,
    },
}

impl FetchOutcome {
    /// Path of the blob in the pool.
    #[must_use]
    pub fn path(&self) -> &Path {
        match self {
            Self::Cached(path) | Self::Downloaded { path, .. } => path,
        }
    }
}

/// Removes a temporary file on drop unless it was promoted.
struct IncompleteFile {
    path: PathBuf,
    promoted: bool,
}

impl IncompleteFile {
    fn new(path: PathBuf) -> Self {
        Self {
            path,
            promoted: false,
        }
    }

    async fn promote(mut self, dest: &Path) -> std::io::Result<()> {
        tokio::fs::rename(&self.path, dest).await?;
        self.promoted = true;
        Ok(())
    }
}

impl Drop for IncompleteFile {
    fn drop(&mut self) {
        if self.promoted {
            return;
        }
        match std::fs::remove_file(&self.path) {
            Ok(()) => debug!(path = ?self.path, "Removed incomplete download"),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => warn!(path = ?self.path, error = %e, "Could not remove incomplete download"),
        }
    }
}

/// Downloads manifest entries into a blob pool.
#[derive(Debug, Clone)]
pub struct BlobFetcher {
    hub: HubClient,
    blobs_dir: PathBuf,
}

impl BlobFetcher {
    /// Create a fetcher writing into `blobs_dir`.
    #[must_use]
    pub fn new(hub: HubClient, blobs_dir: impl Into<PathBuf>) -> Self {
        Self {
            hub,
            blobs_dir: blobs_dir.into(),
        }
    }

    /// Path of the blob for a content hash.
    #[must_use]
    pub fn blob_path(&self, content_hash: &str) -> PathBuf {
        self.blobs_dir.join(content_hash)
    }

    /// Make sure the blob for `entry` is in the pool.
    ///
    /// Returns at once when the blob exists. Otherwise probes the file,
    /// streams it into `<blob>.incomplete`, checks its size (and sha256 for
    /// LFS files) and renames it into place.
    ///
    /// The configured timeout bounds the wait for the response head and the
    /// gap between body chunks. A transfer that keeps making progress is
    /// never cut off, however long it takes in total.
    pub async fn ensure_blob(
        &self,
        repo_id: &str,
        revision: &str,
        entry: &ManifestEntry,
    ) -> Result<FetchOutcome> {
        if !is_safe_component(&entry.content_hash) {
            return Err(Error::transport(
                &entry.path,
                None,
                format!("content hash '{}' is not a valid blob name", entry.content_hash),
            ));
        }
        let blob_path = self.blob_path(&entry.content_hash);
        if blob_path.exists() {
            debug!(path = %entry.path, hash = %entry.content_hash, "Blob already cached");
            return Ok(FetchOutcome::Cached(blob_path));
        }

        let url = self.hub.file_url(repo_id, revision, &entry.path)?;
        let metadata = self.probe(&url, &entry.path).await?;
        let expected = metadata
            .size
            .filter(|size| *size > 0)
            .or_else(|| (entry.size > 0).then_some(entry.size));

        info!(
            path = %entry.path,
            size = %megabytes(expected.unwrap_or(0)),
            etag = metadata.etag.as_deref().unwrap_or(""),
            "Downloading"
        );

        let bytes = self.stream_into_pool(url, entry, &blob_path, expected).await?;
        info!(path = %entry.path, bytes, "Downloaded");
        Ok(FetchOutcome::Downloaded {
            path: blob_path,
            bytes,
        })
    }

    /// Header-only request for size and validation token.
    pub async fn probe(&self, url: &Url, path: &str) -> Result<FileMetadata> {
        let response = self
            .hub
            .request(Method::HEAD, url.clone())
            .timeout(self.hub.timeout())
            .send()
            .await
            .map_err(|e| Error::transport(path, None, format!("error making HEAD request: {e}")))?;

        let status = response.status();
        if !status.is_success() {
            return Err(Error::transport(
                path,
                Some(status.as_u16()),
                format!("HEAD request returned status code: {}", status.as_u16()),
            ));
        }

        let metadata = FileMetadata::from_headers(response.headers(), response.url().to_string());
        debug!(%path, ?metadata, "Probed file metadata");
        Ok(metadata)
    }

    async fn stream_into_pool(
        &self,
        url: Url,
        entry: &ManifestEntry,
        blob_path: &Path,
        expected: Option<u64>,
    ) -> Result<u64> {
        let path = entry.path.as_str();
        let timeout = self.hub.timeout();

        let mut tmp_name = blob_path.as_os_str().to_owned();
        tmp_name.push(INCOMPLETE_SUFFIX);
        let incomplete = IncompleteFile::new(PathBuf::from(tmp_name));

        if let Some(parent) = blob_path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        let file = tokio::fs::File::create(&incomplete.path).await?;
        let mut writer = BufWriter::with_capacity(DOWNLOAD_CHUNK_SIZE, file);

        let mut response = tokio::time::timeout(timeout, self.hub.request(Method::GET, url).send())
            .await
            .map_err(|_| Error::transport(path, None, "timed out waiting for response"))?
            .map_err(|e| Error::transport(path, None, format!("error making request: {e}")))?;

        let status = response.status();
        if !status.is_success() {
            return Err(Error::transport(
                path,
                Some(status.as_u16()),
                format!("bad status: {status}"),
            ));
        }

        let mut hasher = entry.lfs_sha256.as_ref().map(|_| Sha256::new());
        let mut progress = ProgressThrottle::new(PROGRESS_INTERVAL);
        let mut downloaded: u64 = 0;

        loop {
            let chunk = tokio::time::timeout(timeout, response.chunk())
                .await
                .map_err(|_| Error::transport(path, None, "timed out reading response"))?
                .map_err(|e| Error::transport(path, None, format!("error reading response: {e}")))?;
            let Some(chunk) = chunk else { break };

            writer.write_all(&chunk).await?;
            if let Some(hasher) = hasher.as_mut() {
                hasher.update(&chunk);
            }
            downloaded += chunk.len() as u64;
            progress.report(path, downloaded, expected);
        }

        writer.flush().await?;
        let file = writer.into_inner();
        file.sync_all().await?;
        drop(file);

        if let Some(expected) = expected
            && downloaded != expected
        {
            return Err(Error::size_mismatch(path, expected, downloaded));
        }

        if let (Some(hasher), Some(expected)) = (hasher, entry.lfs_sha256.as_deref()) {
            let actual = format!("{:x}", hasher.finalize());
            if !actual.eq_ignore_ascii_case(expected) {
                return Err(Error::digest_mismatch(path, expected, actual));
            }
        }

        incomplete.promote(blob_path).await?;
        Ok(downloaded)
    }
}

fn header_str(headers: &HeaderMap, name: &str) -> Option<String> {
    headers
        .get(name)
        .and_then(|v| v.to_str().ok())
        .filter(|v| !v.is_empty())
        .map(str::to_string)
}

/// Strip the weak marker and quotes from an entity tag.
#[must_use]
pub fn normalize_etag(etag: &str) -> String {
    etag.strip_prefix("W/")
        .unwrap_or(etag)
        .trim_matches('"')
        .to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use reqwest::header::HeaderValue;
    use std::time::Duration;

    #[test]
    fn test_normalize_etag() {
        assert_eq!(normalize_etag("\"abc\""), "abc");
        assert_eq!(normalize_etag("W/\"abc\""), "abc");
        assert_eq!(normalize_etag("abc"), "abc");
        assert_eq!(normalize_etag(""), "");
    }

    #[test]
    fn test_metadata_prefers_linked_headers() {
        let mut headers = HeaderMap::new();
        headers.insert(ETAG, HeaderValue::from_static("\"pointer\""));
        headers.insert(LINKED_ETAG_HEADER, HeaderValue::from_static("\"sha\""));
        headers.insert(CONTENT_LENGTH, HeaderValue::from_static("135"));
        headers.insert(LINKED_SIZE_HEADER, HeaderValue::from_static("4096"));
        headers.insert(REPO_COMMIT_HEADER, HeaderValue::from_static("c0ffee"));

        let metadata = FileMetadata::from_headers(&headers, "https://cdn/x".to_string());

        assert_eq!(
            metadata,
            FileMetadata {
                commit: Some("c0ffee".to_string()),
                etag: Some("sha".to_string()),
                location: "https://cdn/x".to_string(),
                size: Some(4096),
            }
        );
    }

    #[test]
    fn test_metadata_without_headers() {
        let metadata = FileMetadata::from_headers(&HeaderMap::new(), String::new());
        assert_eq!(metadata.size, None);
        assert_eq!(metadata.etag, None);
        assert_eq!(metadata.commit, None);
    }

    #[tokio::test]
    async fn test_unsafe_hash_is_refused_without_network() {
        let temp = tempfile::TempDir::new().unwrap();
        let config = crate::DownloadConfig::new().with_endpoint("http://127.0.0.1:9");
        let hub = HubClient::new(&config).unwrap();
        let fetcher = BlobFetcher::new(hub, temp.path().join("blobs"));
        let entry = ManifestEntry::new("config.json", "../outside", 3);

        let err = fetcher.ensure_blob("org/m", "main", &entry).await.unwrap_err();

        assert!(matches!(err, Error::Transport { ref path, .. } if path == "config.json"));
        assert!(!temp.path().join("outside").exists());
    }

    /// Serves one chunked response, pausing `gap` before each chunk.
    async fn serve_trickle(listener: tokio::net::TcpListener, chunks: usize, gap: Duration) {
        use tokio::io::AsyncReadExt;

        let (mut socket, _) = listener.accept().await.unwrap();
        let mut request = Vec::new();
        let mut buf = [0u8; 1024];
        while !request.windows(4).any(|w| w == b"\r\n\r\n") {
            let n = socket.read(&mut buf).await.unwrap();
            request.extend_from_slice(&buf[..n]);
        }
        socket
            .write_all(b"HTTP/1.1 200 OK\r\nTransfer-Encoding: chunked\r\n\r\n")
            .await
            .unwrap();
        for _ in 0..chunks {
            tokio::time::sleep(gap).await;
            socket.write_all(b"2\r\nab\r\n").await.unwrap();
            socket.flush().await.unwrap();
        }
        socket.write_all(b"0\r\n\r\n").await.unwrap();
    }

    #[tokio::test]
    async fn test_live_body_is_not_cut_by_timeout() {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let server = tokio::spawn(serve_trickle(listener, 5, Duration::from_millis(150)));

        let temp = tempfile::TempDir::new().unwrap();
        let config = crate::DownloadConfig::new()
            .with_endpoint(format!("http://{addr}"))
            .with_timeout(Duration::from_millis(400));
        let fetcher = BlobFetcher::new(HubClient::new(&config).unwrap(), temp.path());
        let entry = ManifestEntry::new("model.bin", "abc123", 10);
        let blob = fetcher.blob_path("abc123");
        let url = Url::parse(&format!("http://{addr}/model.bin")).unwrap();

        // Five gaps of 150ms add up to more than the 400ms timeout.
        let bytes = fetcher
            .stream_into_pool(url, &entry, &blob, Some(10))
            .await
            .unwrap();

        assert_eq!(bytes, 10);
        assert_eq!(std::fs::read(&blob).unwrap(), b"ababababab");
        server.await.unwrap();
    }

    #[test]
    fn test_incomplete_file_removed_on_drop() {
        let temp = tempfile::TempDir::new().unwrap();
        let path = temp.path().join("blob.incomplete");
        std::fs::write(&path, b"partial").unwrap();

        drop(IncompleteFile::new(path.clone()));

        assert!(!path.exists());
    }

    #[tokio::test]
    async fn test_incomplete_file_kept_after_promote() {
        let temp = tempfile::TempDir::new().unwrap();
        let tmp = temp.path().join("blob.incomplete");
        let dest = temp.path().join("blob");
        std::fs::write(&tmp, b"content").unwrap();

        IncompleteFile::new(tmp.clone()).promote(&dest).await.unwrap();

        assert!(!tmp.exists());
        assert_eq!(std::fs::read(&dest).unwrap(), b"content");
    }
}
