//! Resource Cache
//!
//! Short-lived local files (downloaded images, audio, video, composed grids).
//! Every file lives under one cache directory with a unique generated name and
//! is tracked until released. Release is idempotent: the first call deletes the
//! file, later calls are no-ops.

use crate::fetch::{FetchClient, FetchError};
use futures_util::StreamExt;
use parking_lot::Mutex;
use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::io::AsyncWriteExt;
use tracing::{debug, warn};

/// Download failures
#[derive(Debug, thiserror::Error)]
pub enum DownloadError {
    #[error("download failed: {0}")]
    Fetch(#[from] FetchError),

    #[error("cache I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Reference to a transient local file
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ResourceHandle {
    path: PathBuf,
}

impl ResourceHandle {
    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn file_name(&self) -> &str {
        self.path.file_name().and_then(|n| n.to_str()).unwrap_or("file")
    }
}

/// Cache statistics
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ResourceStats {
    pub allocated: u64,
    pub released: u64,
    pub live: usize,
}

/// Local cache of transient files
pub struct ResourceCache {
    dir: PathBuf,
    fetch: FetchClient,
    download_timeout: Duration,
    live: Mutex<HashSet<PathBuf>>,
    allocated: AtomicU64,
    released: AtomicU64,
}

impl ResourceCache {
    /// Open (and create if needed) a cache directory
    pub async fn open(
        dir: impl Into<PathBuf>,
        fetch: FetchClient,
        download_timeout: Duration,
    ) -> std::io::Result<Arc<Self>> {
        let dir = dir.into();
        tokio::fs::create_dir_all(&dir).await?;
        debug!("Resource cache at {}", dir.display());

        Ok(Arc::new(Self {
            dir,
            fetch,
            download_timeout,
            live: Mutex::new(HashSet::new()),
            allocated: AtomicU64::new(0),
            released: AtomicU64::new(0),
        }))
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Reserve a unique tracked path; the file itself is not created
    pub fn allocate(&self, suggested_name: &str) -> ResourceHandle {
        let path = self.dir.join(unique_name(suggested_name));
        self.live.lock().insert(path.clone());
        self.allocated.fetch_add(1, Ordering::Relaxed);
        ResourceHandle { path }
    }

    /// Download `url` into the cache. A failed download leaves no file behind.
    pub async fn materialize(&self, url: &str, suggested_name: &str) -> Result<ResourceHandle, DownloadError> {
        self.materialize_with_timeout(url, suggested_name, self.download_timeout).await
    }

    pub async fn materialize_with_timeout(
        &self,
        url: &str,
        suggested_name: &str,
        timeout: Duration,
    ) -> Result<ResourceHandle, DownloadError> {
        let handle = self.allocate(suggested_name);

        match self.download_into(url, handle.path(), timeout).await {
            Ok(bytes) => {
                debug!("Materialized {} ({} bytes)", handle.file_name(), bytes);
                Ok(handle)
            }
            Err(e) => {
                warn!("Download of {} failed: {}", url, e);
                self.release(&handle).await;
                Err(e)
            }
        }
    }

    /// Write bytes produced locally into a fresh tracked file
    pub async fn store_bytes(&self, suggested_name: &str, bytes: &[u8]) -> Result<ResourceHandle, DownloadError> {
        let handle = self.allocate(suggested_name);
        if let Err(e) = tokio::fs::write(handle.path(), bytes).await {
            self.release(&handle).await;
            return Err(e.into());
        }
        Ok(handle)
    }

    async fn download_into(&self, url: &str, path: &Path, timeout: Duration) -> Result<u64, DownloadError> {
        let response = self.fetch.open(url, timeout).await?;
        let mut file = tokio::fs::File::create(path).await?;
        let mut stream = response.bytes_stream();
        let mut written = 0u64;

        while let Some(chunk) = stream.next().await {
            let chunk = chunk.map_err(FetchError::from)?;
            file.write_all(&chunk).await?;
            written += chunk.len() as u64;
        }
        file.flush().await?;

        Ok(written)
    }

    /// Delete a tracked file. Returns true only for the call that released it.
    pub async fn release(&self, handle: &ResourceHandle) -> bool {
        if !self.untrack(handle) {
            return false;
        }
        match tokio::fs::remove_file(handle.path()).await {
            Ok(()) => debug!("Released {}", handle.file_name()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => warn!("Failed to delete {}: {}", handle.path().display(), e),
        }
        true
    }

    /// Release a batch; one failure does not stop the rest
    pub async fn release_all<'a, I>(&self, handles: I) -> usize
    where
        I: IntoIterator<Item = &'a ResourceHandle>,
    {
        let mut count = 0;
        for handle in handles {
            if self.release(handle).await {
                count += 1;
            }
        }
        count
    }

    /// Synchronous release for drop paths
    pub fn release_blocking(&self, handle: &ResourceHandle) -> bool {
        if !self.untrack(handle) {
            return false;
        }
        if let Err(e) = std::fs::remove_file(handle.path()) {
            if e.kind() != std::io::ErrorKind::NotFound {
                warn!("Failed to delete {}: {}", handle.path().display(), e);
            }
        }
        true
    }

    pub fn is_live(&self, handle: &ResourceHandle) -> bool {
        self.live.lock().contains(handle.path())
    }

    pub fn stats(&self) -> ResourceStats {
        ResourceStats {
            allocated: self.allocated.load(Ordering::Relaxed),
            released: self.released.load(Ordering::Relaxed),
            live: self.live.lock().len(),
        }
    }

    fn untrack(&self, handle: &ResourceHandle) -> bool {
        let removed = self.live.lock().remove(handle.path());
        if removed {
            self.released.fetch_add(1, Ordering::Relaxed);
        }
        removed
    }
}

/// Scoped acquisition: every handle pushed here is released when the scope
/// ends, either through [`ScopedResources::release`] or on drop.
pub struct ScopedResources {
    cache: Arc<ResourceCache>,
    handles: Vec<ResourceHandle>,
}

impl ScopedResources {
    pub fn new(cache: Arc<ResourceCache>) -> Self {
        Self {
            cache,
            handles: Vec::new(),
        }
    }

    pub fn cache(&self) -> &Arc<ResourceCache> {
        &self.cache
    }

    pub async fn materialize(&mut self, url: &str, suggested_name: &str) -> Result<ResourceHandle, DownloadError> {
        let handle = self.cache.materialize(url, suggested_name).await?;
        self.handles.push(handle.clone());
        Ok(handle)
    }

    pub async fn materialize_with_timeout(
        &mut self,
        url: &str,
        suggested_name: &str,
        timeout: Duration,
    ) -> Result<ResourceHandle, DownloadError> {
        let handle = self.cache.materialize_with_timeout(url, suggested_name, timeout).await?;
        self.handles.push(handle.clone());
        Ok(handle)
    }

    pub fn allocate(&mut self, suggested_name: &str) -> ResourceHandle {
        let handle = self.cache.allocate(suggested_name);
        self.handles.push(handle.clone());
        handle
    }

    pub async fn store_bytes(&mut self, suggested_name: &str, bytes: &[u8]) -> Result<ResourceHandle, DownloadError> {
        let handle = self.cache.store_bytes(suggested_name, bytes).await?;
        self.handles.push(handle.clone());
        Ok(handle)
    }

    /// Take a handle out of this scope; the caller now owns its release
    pub fn detach(&mut self, handle: &ResourceHandle) -> bool {
        let before = self.handles.len();
        self.handles.retain(|h| h != handle);
        self.handles.len() != before
    }

    /// Take every handle out of this scope
    pub fn detach_all(&mut self) -> Vec<ResourceHandle> {
        std::mem::take(&mut self.handles)
    }

    pub fn handles(&self) -> &[ResourceHandle] {
        &self.handles
    }

    pub fn len(&self) -> usize {
        self.handles.len()
    }

    pub fn is_empty(&self) -> bool {
        self.handles.is_empty()
    }

    /// Release everything still owned by the scope
    pub async fn release(mut self) -> usize {
        let handles = std::mem::take(&mut self.handles);
        self.cache.release_all(handles.iter()).await
    }
}

impl Drop for ScopedResources {
    fn drop(&mut self) {
        for handle in self.handles.drain(..) {
            self.cache.release_blocking(&handle);
        }
    }
}

/// `stem_<millis>_<random>.ext`, with the stem reduced to safe characters
fn unique_name(suggested: &str) -> String {
    let base = Path::new(suggested)
        .file_name()
        .and_then(|n| n.to_str())
        .unwrap_or("file");

    let (stem, ext) = match base.rsplit_once('.') {
        Some((stem, ext)) if !stem.is_empty() && !ext.is_empty() => (stem, Some(ext)),
        _ => (base, None),
    };

    let clean = |s: &str| -> String {
        s.chars()
            .filter(|c| c.is_ascii_alphanumeric() || *c == '_' || *c == '-')
            .take(48)
            .collect()
    };

    let mut stem = clean(stem);
    if stem.is_empty() {
        stem = "file".to_string();
    }
    let suffix = &uuid::Uuid::new_v4().simple().to_string()[..8];
    let millis = chrono::Utc::now().timestamp_millis();

    match ext.map(clean).filter(|e| !e.is_empty()) {
        Some(ext) => format!("{}_{}_{}.{}", stem, millis, suffix, ext),
        None => format!("{}_{}_{}", stem, millis, suffix),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    async fn test_cache() -> (Arc<ResourceCache>, TempDir) {
        let temp = TempDir::new().expect("Failed to create temp dir");
        let cache = ResourceCache::open(temp.path().join("cache"), FetchClient::new(), Duration::from_secs(5))
            .await
            .unwrap();
        (cache, temp)
    }

    #[test]
    fn test_unique_names() {
        let a = unique_name("mj_1.jpg");
        let b = unique_name("mj_1.jpg");
        assert_ne!(a, b);
        assert!(a.starts_with("mj_1_"));
        assert!(a.ends_with(".jpg"));

        let c = unique_name("../../etc/pass wd");
        assert!(!c.contains('/'));
        assert!(c.starts_with("passwd_"));
    }

    #[tokio::test]
    async fn test_release_is_idempotent() {
        let (cache, _temp) = test_cache().await;
        let handle = cache.store_bytes("a.bin", b"data").await.unwrap();
        assert!(handle.path().exists());

        assert!(cache.release(&handle).await);
        assert!(!handle.path().exists());
        assert!(!cache.release(&handle).await);

        let stats = cache.stats();
        assert_eq!(stats.allocated, 1);
        assert_eq!(stats.released, 1);
        assert_eq!(stats.live, 0);
    }

    #[tokio::test]
    async fn test_release_tolerates_missing_file() {
        let (cache, _temp) = test_cache().await;
        let handle = cache.allocate("never-written.png");
        assert!(cache.release(&handle).await);
    }

    #[tokio::test]
    async fn test_scope_drop_releases() {
        let (cache, _temp) = test_cache().await;
        let path;
        {
            let mut scope = ScopedResources::new(cache.clone());
            let handle = scope.store_bytes("t.txt", b"x").await.unwrap();
            path = handle.path().to_path_buf();
            assert!(path.exists());
        }
        assert!(!path.exists());
        assert_eq!(cache.stats().live, 0);
    }

    #[tokio::test]
    async fn test_detach_survives_scope() {
        let (cache, _temp) = test_cache().await;
        let mut scope = ScopedResources::new(cache.clone());
        let keep = scope.store_bytes("keep.txt", b"k").await.unwrap();
        let drop_me = scope.store_bytes("drop.txt", b"d").await.unwrap();

        assert!(scope.detach(&keep));
        assert_eq!(scope.release().await, 1);

        assert!(keep.path().exists());
        assert!(!drop_me.path().exists());
        assert!(cache.release(&keep).await);
    }

    #[tokio::test]
    async fn test_failed_materialize_leaves_nothing() {
        let mut server = mockito::Server::new_async().await;
        let _m = server.mock("GET", "/gone.png").with_status(404).create_async().await;

        let (cache, _temp) = test_cache().await;
        let err = cache
            .materialize(&format!("{}/gone.png", server.url()), "gone.png")
            .await
            .unwrap_err();
        assert!(matches!(err, DownloadError::Fetch(FetchError::ClientError(404))));

        let leftovers = std::fs::read_dir(cache.dir()).unwrap().count();
        assert_eq!(leftovers, 0);
        assert_eq!(cache.stats().live, 0);
    }

    #[tokio::test]
    async fn test_materialize_writes_body() {
        let mut server = mockito::Server::new_async().await;
        let _m = server
            .mock("GET", "/img.png")
            .with_status(200)
            .with_body(vec![1u8, 2, 3, 4])
            .create_async()
            .await;

        let (cache, _temp) = test_cache().await;
        let handle = cache
            .materialize(&format!("{}/img.png", server.url()), "img.png")
            .await
            .unwrap();
        assert_eq!(std::fs::read(handle.path()).unwrap(), vec![1u8, 2, 3, 4]);
        assert!(cache.is_live(&handle));
    }
}
