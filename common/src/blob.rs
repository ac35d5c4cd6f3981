//  Copyright (c) Facebook, Inc. and its affiliates.
//  SPDX-License-Identifier: Apache-2.0

//! Content-addressed blob exchange used to move round artifacts between
//! parties without routing them through the rendezvous server.

use std::fmt;
use std::io::Write;
use std::path::Path;
use std::path::PathBuf;
use std::time::Duration;

use async_trait::async_trait;
use reqwest::multipart::Form;
use reqwest::multipart::Part;
use reqwest::Client;
use serde::Deserialize;
use serde::Serialize;
use sha2::Digest;
use sha2::Sha256;
use thiserror::Error;

/// Address of a blob, derived from its content
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ContentId(String);

impl ContentId {
    pub fn new(id: &str) -> ContentId {
        ContentId(id.trim().to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ContentId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<String> for ContentId {
    fn from(s: String) -> ContentId {
        ContentId::new(&s)
    }
}

#[derive(Debug, Error)]
pub enum BlobError {
    /// Expected early in a round, retry with backoff
    #[error("content {0} is not available yet")]
    NotAvailable(ContentId),
    #[error("transport failure: {0}")]
    Transport(String),
    #[error("invalid content id {0}")]
    InvalidId(String),
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

impl BlobError {
    pub fn is_retryable(&self) -> bool {
        matches!(self, BlobError::NotAvailable(_))
    }
}

#[async_trait]
pub trait BlobExchange: Send + Sync {
    /// Uploads the file at `path`, returns its content id
    async fn put(&self, path: &Path) -> Result<ContentId, BlobError>;

    /// Downloads `cid` into `dest`, returns the written path
    async fn get(&self, cid: &ContentId, dest: &Path) -> Result<PathBuf, BlobError>;
}

/// Lowercase hex SHA-256 of `bytes`
pub fn sha256_hex(bytes: &[u8]) -> String {
    hex::encode(Sha256::digest(bytes))
}

/// Writes `bytes` next to `dest` and renames into place
pub async fn write_atomic(dest: &Path, bytes: Vec<u8>) -> Result<PathBuf, BlobError> {
    let dest = dest.to_path_buf();
    tokio::task::spawn_blocking(move || -> Result<PathBuf, BlobError> {
        let dir = match dest.parent() {
            Some(p) if !p.as_os_str().is_empty() => p.to_path_buf(),
            _ => PathBuf::from("."),
        };
        std::fs::create_dir_all(&dir)?;
        let mut tmp = tempfile::NamedTempFile::new_in(&dir)?;
        tmp.write_all(&bytes)?;
        tmp.flush()?;
        tmp.persist(&dest).map_err(|e| BlobError::Io(e.error))?;
        Ok(dest)
    })
    .await
    .map_err(|e| BlobError::Transport(format!("blocking write aborted: {}", e)))?
}

/// Content-addressed directory on a filesystem shared by both parties.
///
/// The content id is the hex SHA-256 of the bytes.
#[derive(Debug, Clone)]
pub struct LocalBlobStore {
    root: PathBuf,
}

impl LocalBlobStore {
    pub fn new<T: AsRef<Path>>(root: T) -> Result<LocalBlobStore, BlobError> {
        std::fs::create_dir_all(root.as_ref())?;
        Ok(LocalBlobStore {
            root: root.as_ref().to_path_buf(),
        })
    }

    fn blob_path(&self, cid: &ContentId) -> Result<PathBuf, BlobError> {
        let id = cid.as_str();
        if id.len() != 64 || !id.chars().all(|c| c.is_ascii_hexdigit()) {
            return Err(BlobError::InvalidId(id.to_string()));
        }
        Ok(self.root.join(id.to_lowercase()))
    }
}

#[async_trait]
impl BlobExchange for LocalBlobStore {
    async fn put(&self, path: &Path) -> Result<ContentId, BlobError> {
        let bytes = tokio::fs::read(path).await?;
        let cid = ContentId::new(&sha256_hex(&bytes));
        let target = self.blob_path(&cid)?;
        if tokio::fs::metadata(&target).await.is_ok() {
            debug!("blob {} already present", cid);
            return Ok(cid);
        }
        write_atomic(&target, bytes).await?;
        debug!("stored blob {} from {}", cid, path.display());
        Ok(cid)
    }

    async fn get(&self, cid: &ContentId, dest: &Path) -> Result<PathBuf, BlobError> {
        let source = self.blob_path(cid)?;
        let bytes = match tokio::fs::read(&source).await {
            Ok(b) => b,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                return Err(BlobError::NotAvailable(cid.clone()));
            }
            Err(e) => return Err(e.into()),
        };
        if sha256_hex(&bytes) != cid.as_str().to_lowercase() {
            return Err(BlobError::Transport(format!(
                "blob {} does not match its content id",
                cid
            )));
        }
        write_atomic(dest, bytes).await
    }
}

#[derive(Debug, Deserialize)]
struct AddResponse {
    #[serde(rename = "Hash")]
    hash: String,
}

/// Client of an IPFS node's HTTP API (`/api/v0/add`, `/api/v0/cat`)
#[derive(Debug, Clone)]
pub struct IpfsBlobStore {
    api_base: String,
    client: Client,
}

impl IpfsBlobStore {
    pub fn new(api_base: &str, timeout: Duration) -> Result<IpfsBlobStore, BlobError> {
        let client = Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| BlobError::Transport(e.to_string()))?;
        Ok(IpfsBlobStore {
            api_base: api_base.trim_end_matches('/').to_string(),
            client,
        })
    }

    fn classify(cid: Option<&ContentId>, e: reqwest::Error) -> BlobError {
        match cid {
            Some(cid) if e.is_timeout() => BlobError::NotAvailable(cid.clone()),
            _ => BlobError::Transport(e.to_string()),
        }
    }
}

#[async_trait]
impl BlobExchange for IpfsBlobStore {
    async fn put(&self, path: &Path) -> Result<ContentId, BlobError> {
        let bytes = tokio::fs::read(path).await?;
        let name = path
            .file_name()
            .map(|n| n.to_string_lossy().to_string())
            .unwrap_or_else(|| "artifact".to_string());
        let form = Form::new().part("file", Part::bytes(bytes).file_name(name));
        let url = format!("{}/api/v0/add?pin=true", self.api_base);

        let response = self
            .client
            .post(&url)
            .multipart(form)
            .send()
            .await
            .map_err(|e| IpfsBlobStore::classify(None, e))?;
        let response = response
            .error_for_status()
            .map_err(|e| BlobError::Transport(e.to_string()))?;
        let added: AddResponse = response
            .json()
            .await
            .map_err(|e| BlobError::Transport(e.to_string()))?;
        info!("uploaded {} to ipfs as {}", path.display(), added.hash);
        Ok(ContentId::new(&added.hash))
    }

    async fn get(&self, cid: &ContentId, dest: &Path) -> Result<PathBuf, BlobError> {
        let url = format!("{}/api/v0/cat", self.api_base);
        let response = self
            .client
            .post(&url)
            .query(&[("arg", cid.as_str())])
            .send()
            .await
            .map_err(|e| IpfsBlobStore::classify(Some(cid), e))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default().to_lowercase();
            if body.contains("not found") || body.contains("deadline") {
                return Err(BlobError::NotAvailable(cid.clone()));
            }
            return Err(BlobError::Transport(format!(
                "ipfs cat {} returned {}: {}",
                cid, status, body
            )));
        }
        let bytes = response
            .bytes()
            .await
            .map_err(|e| IpfsBlobStore::classify(Some(cid), e))?;
        write_atomic(dest, bytes.to_vec()).await
    }
}

/// Downloads `cid`, retrying while the content is not available yet.
///
/// The delay doubles after each `NotAvailable`; any other error is returned
/// at once. After `attempts` tries the last error is returned.
pub async fn fetch_with_backoff(
    exchange: &dyn BlobExchange,
    cid: &ContentId,
    dest: &Path,
    attempts: usize,
    initial_delay: Duration,
) -> Result<PathBuf, BlobError> {
    let mut delay = initial_delay;
    let mut attempt = 1;
    loop {
        match exchange.get(cid, dest).await {
            Ok(p) => return Ok(p),
            Err(e) if e.is_retryable() && attempt < attempts => {
                warn!(
                    "attempt {}/{} for {}: {}, retrying in {:?}",
                    attempt, attempts, cid, e, delay
                );
                tokio::time::sleep(delay).await;
                delay *= 2;
                attempt += 1;
            }
            Err(e) => return Err(e),
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::AtomicUsize;
    use std::sync::atomic::Ordering;

    use super::*;

    #[tokio::test]
    async fn test_local_put_get() {
        let dir = tempfile::tempdir().unwrap();
        let store = LocalBlobStore::new(dir.path().join("blobs")).unwrap();
        let src = dir.path().join("in.json");
        std::fs::write(&src, b"{\"round\":1}").unwrap();

        let cid = store.put(&src).await.unwrap();
        assert_eq!(cid.as_str(), sha256_hex(b"{\"round\":1}"));
        // same bytes, same id
        assert_eq!(store.put(&src).await.unwrap(), cid);

        let out = store.get(&cid, &dir.path().join("out/x.json")).await.unwrap();
        assert_eq!(std::fs::read(out).unwrap(), b"{\"round\":1}");
    }

    #[tokio::test]
    async fn test_local_unknown_and_invalid() {
        let dir = tempfile::tempdir().unwrap();
        let store = LocalBlobStore::new(dir.path()).unwrap();
        let missing = ContentId::new(&sha256_hex(b"nothing"));
        let dest = dir.path().join("d");
        assert!(matches!(
            store.get(&missing, &dest).await,
            Err(BlobError::NotAvailable(_))
        ));
        assert!(matches!(
            store.get(&ContentId::new("../etc/passwd"), &dest).await,
            Err(BlobError::InvalidId(_))
        ));
    }

    struct Flaky {
        inner: LocalBlobStore,
        failures: usize,
        calls: AtomicUsize,
    }

    #[async_trait]
    impl BlobExchange for Flaky {
        async fn put(&self, path: &Path) -> Result<ContentId, BlobError> {
            self.inner.put(path).await
        }

        async fn get(&self, cid: &ContentId, dest: &Path) -> Result<PathBuf, BlobError> {
            let n = self.calls.fetch_add(1, Ordering::SeqCst);
            if n < self.failures {
                return Err(BlobError::NotAvailable(cid.clone()));
            }
            self.inner.get(cid, dest).await
        }
    }

    #[tokio::test]
    async fn test_backoff_retries_not_available() {
        let dir = tempfile::tempdir().unwrap();
        let src = dir.path().join("a");
        std::fs::write(&src, b"payload").unwrap();
        let flaky = Flaky {
            inner: LocalBlobStore::new(dir.path().join("s")).unwrap(),
            failures: 2,
            calls: AtomicUsize::new(0),
        };
        let cid = flaky.put(&src).await.unwrap();
        let dest = dir.path().join("b");
        let p = fetch_with_backoff(&flaky, &cid, &dest, 3, Duration::from_millis(1))
            .await
            .unwrap();
        assert_eq!(std::fs::read(p).unwrap(), b"payload");
        assert_eq!(flaky.calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_backoff_gives_up() {
        let dir = tempfile::tempdir().unwrap();
        let flaky = Flaky {
            inner: LocalBlobStore::new(dir.path()).unwrap(),
            failures: 10,
            calls: AtomicUsize::new(0),
        };
        let cid = ContentId::new(&sha256_hex(b"x"));
        let r = fetch_with_backoff(&flaky, &cid, &dir.path().join("o"), 2, Duration::from_millis(1)).await;
        assert!(matches!(r, Err(BlobError::NotAvailable(_))));
        assert_eq!(flaky.calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_ipfs_unreachable_is_transport() {
        let store = IpfsBlobStore::new("http://127.0.0.1:9", Duration::from_secs(2)).unwrap();
        let dir = tempfile::tempdir().unwrap();
        let src = dir.path().join("a");
        std::fs::write(&src, b"x").unwrap();
        assert!(matches!(
            store.put(&src).await,
            Err(BlobError::Transport(_))
        ));
    }
}
