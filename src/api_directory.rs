//! API Directory
//!
//! Some backends move around and publish their current base URL in a small
//! JSON document (`{"api": "https://..."}`). Documents are cached for a while
//! so a burst of commands does not refetch them.

use crate::fetch::{Endpoint, FetchClient, FetchError, RequestParams};
use moka::future::Cache;
use serde_json::Value;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tracing::debug;

const DIRECTORY_TIMEOUT: Duration = Duration::from_secs(15);

/// Directory statistics
#[derive(Debug, Clone)]
pub struct DirectoryStats {
    pub documents: u64,
    pub hits: u64,
    pub misses: u64,
}

/// Resolver for published API base URLs
#[derive(Clone)]
pub struct ApiDirectory {
    fetch: FetchClient,
    documents: Cache<String, Arc<Value>>,
    hits: Arc<AtomicU64>,
    misses: Arc<AtomicU64>,
}

impl ApiDirectory {
    pub fn new(fetch: FetchClient, ttl: Duration) -> Self {
        let documents = Cache::builder().max_capacity(32).time_to_live(ttl).build();

        Self {
            fetch,
            documents,
            hits: Arc::new(AtomicU64::new(0)),
            misses: Arc::new(AtomicU64::new(0)),
        }
    }

    /// Base URL published under `field` in the document at `url`, without a
    /// trailing slash
    pub async fn resolve(&self, url: &str, field: &str) -> Result<String, FetchError> {
        let document = self.document(url).await?;
        let base = document
            .get(field)
            .and_then(Value::as_str)
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .ok_or_else(|| FetchError::malformed(format!("directory has no `{}` entry", field)))?;

        Ok(base.trim_end_matches('/').to_string())
    }

    /// Drop a cached document, e.g. after its base URL stopped answering
    pub async fn invalidate(&self, url: &str) {
        self.documents.invalidate(url).await;
    }

    pub fn stats(&self) -> DirectoryStats {
        DirectoryStats {
            documents: self.documents.entry_count(),
            hits: self.hits.load(Ordering::Relaxed),
            misses: self.misses.load(Ordering::Relaxed),
        }
    }

    async fn document(&self, url: &str) -> Result<Arc<Value>, FetchError> {
        if let Some(document) = self.documents.get(url).await {
            self.hits.fetch_add(1, Ordering::Relaxed);
            return Ok(document);
        }
        self.misses.fetch_add(1, Ordering::Relaxed);

        let value: Value = self
            .fetch
            .json(&Endpoint::get(url, DIRECTORY_TIMEOUT), &RequestParams::None)
            .await?;
        if !value.is_object() {
            return Err(FetchError::malformed("directory document is not an object"));
        }

        debug!("API directory loaded: {}", url);
        let document = Arc::new(value);
        self.documents.insert(url.to_string(), document.clone()).await;
        Ok(document)
    }
}
