//! Context-integrity resolver: fetches JSON-LD `@context` documents over
//! HTTPS, enforces a pinned SHA-256 from an allow-list, and caches
//! verified copies so synchronous document loaders can be served without
//! touching the network.

use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use dashmap::DashMap;
use sha2::{Digest, Sha256};
use std::collections::HashMap;
use std::sync::Arc;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ResolverError {
    #[error("resolver: fetch of {url} failed: {reason}")]
    ContextFetchFailed { url: String, reason: String },
    #[error("resolver: {0} is not in the allow-list")]
    ContextNotWhitelisted(String),
    #[error("resolver: integrity mismatch for {url}: observed {observed}, pinned {pinned}")]
    ContextIntegrityMismatch {
        url: String,
        observed: String,
        pinned: String,
    },
    #[error("resolver: {0} is not cached; call prewarm before synchronous use")]
    CacheNotPrewarmed(String),
}

/// Anything that can hand out verified context bytes by URL. The returned
/// `Arc` is a snapshot; cache mutation stays inside the implementation.
#[async_trait]
pub trait ContextSource: Send + Sync {
    async fn resolve(&self, url: &str) -> Result<Arc<Vec<u8>>, ResolverError>;
}

#[derive(Clone)]
struct CacheEntry {
    bytes: Arc<Vec<u8>>,
    expires_at: DateTime<Utc>,
}

/// The production resolver. `resolve` is asynchronous;
/// [`ContextResolver::resolve_cached`] is the synchronous surface for
/// blocking document-loader callbacks and is satisfied entirely from
/// cache, so callers are expected to [`ContextResolver::prewarm`] at
/// startup.
pub struct ContextResolver {
    client: reqwest::Client,
    /// URL to lowercase hex SHA-256 of the only acceptable body.
    allow_list: HashMap<String, String>,
    cache: DashMap<String, CacheEntry>,
    ttl: Duration,
}

impl ContextResolver {
    pub const DEFAULT_TTL_HOURS: i64 = 24;

    pub fn new(allow_list: HashMap<String, String>) -> Self {
        Self::with_ttl(allow_list, Duration::hours(Self::DEFAULT_TTL_HOURS))
    }

    pub fn with_ttl(allow_list: HashMap<String, String>, ttl: Duration) -> Self {
        Self {
            client: reqwest::Client::builder()
                .timeout(std::time::Duration::from_secs(30))
                .build()
                .expect("reqwest client construction is infallible here"),
            allow_list: allow_list
                .into_iter()
                .map(|(url, digest)| (url, digest.to_lowercase()))
                .collect(),
            cache: DashMap::new(),
            ttl,
        }
    }

    /// Returns cached bytes while fresh, otherwise fetches, verifies
    /// against the allow-list, admits to cache, and returns.
    pub async fn resolve(&self, url: &str) -> Result<Arc<Vec<u8>>, ResolverError> {
        if let Some(entry) = self.cache.get(url) {
            if entry.expires_at > Utc::now() {
                return Ok(entry.bytes.clone());
            }
        }

        let body = self
            .client
            .get(url)
            .send()
            .await
            .and_then(|response| response.error_for_status())
            .map_err(|err| ResolverError::ContextFetchFailed {
                url: url.to_string(),
                reason: err.to_string(),
            })?
            .bytes()
            .await
            .map_err(|err| ResolverError::ContextFetchFailed {
                url: url.to_string(),
                reason: err.to_string(),
            })?;

        let observed = hex::encode(Sha256::digest(&body));
        let pinned = self
            .allow_list
            .get(url)
            .ok_or_else(|| ResolverError::ContextNotWhitelisted(url.to_string()))?;
        if &observed != pinned {
            log::warn!("resolver: rejecting {url}: digest {observed} != pinned {pinned}");
            return Err(ResolverError::ContextIntegrityMismatch {
                url: url.to_string(),
                observed,
                pinned: pinned.clone(),
            });
        }

        let bytes = Arc::new(body.to_vec());
        self.cache.insert(
            url.to_string(),
            CacheEntry {
                bytes: bytes.clone(),
                expires_at: Utc::now() + self.ttl,
            },
        );
        log::info!("resolver: admitted {url} ({} bytes)", bytes.len());
        Ok(bytes)
    }

    /// Cache-only lookup. Never performs I/O and never blocks on the
    /// network, which is the whole point: a synchronous JSON-LD document
    /// loader backed by this method cannot deadlock an async runtime.
    pub fn resolve_cached(&self, url: &str) -> Result<Arc<Vec<u8>>, ResolverError> {
        match self.cache.get(url) {
            Some(entry) if entry.expires_at > Utc::now() => Ok(entry.bytes.clone()),
            _ => Err(ResolverError::CacheNotPrewarmed(url.to_string())),
        }
    }

    /// Resolves every URL in `urls`, failing on the first one that cannot
    /// be verified. Meant for startup, before any synchronous consumer
    /// runs.
    pub async fn prewarm<I, S>(&self, urls: I) -> Result<(), ResolverError>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        for url in urls {
            self.resolve(url.as_ref()).await?;
        }
        Ok(())
    }

    pub fn allow_list(&self) -> &HashMap<String, String> {
        &self.allow_list
    }
}

#[async_trait]
impl ContextSource for ContextResolver {
    async fn resolve(&self, url: &str) -> Result<Arc<Vec<u8>>, ResolverError> {
        ContextResolver::resolve(self, url).await
    }
}

/// Deterministic in-memory resolver for tests: a fixed table of context
/// documents whose digests are pinned at construction, no network, no
/// expiry.
pub struct StaticResolver {
    entries: HashMap<String, Arc<Vec<u8>>>,
}

impl StaticResolver {
    pub fn new(documents: HashMap<String, Vec<u8>>) -> Self {
        Self {
            entries: documents
                .into_iter()
                .map(|(url, bytes)| (url, Arc::new(bytes)))
                .collect(),
        }
    }

    /// The contexts the credential test corpus uses, embedded so test
    /// runs resolve them without any network.
    pub fn with_test_contexts() -> Self {
        let mut documents = HashMap::new();
        for (url, body) in [
            (
                "https://www.w3.org/ns/credentials/v2",
                include_str!("../contexts/credentials-v2.jsonld"),
            ),
            (
                "https://www.w3.org/ns/credentials/examples/v2",
                include_str!("../contexts/credentials-examples-v2.jsonld"),
            ),
            (
                "https://w3id.org/citizenship/v4rc1",
                include_str!("../contexts/citizenship-v4rc1.jsonld"),
            ),
        ] {
            documents.insert(url.to_string(), body.as_bytes().to_vec());
        }
        Self::new(documents)
    }

    /// The allow-list matching this resolver's table, for wiring a
    /// [`ContextResolver`] that accepts exactly the embedded documents.
    pub fn pinned_allow_list(&self) -> HashMap<String, String> {
        self.entries
            .iter()
            .map(|(url, bytes)| (url.clone(), hex::encode(Sha256::digest(bytes.as_slice()))))
            .collect()
    }

    pub fn resolve_sync(&self, url: &str) -> Result<Arc<Vec<u8>>, ResolverError> {
        self.entries
            .get(url)
            .cloned()
            .ok_or_else(|| ResolverError::ContextNotWhitelisted(url.to_string()))
    }
}

#[async_trait]
impl ContextSource for StaticResolver {
    async fn resolve(&self, url: &str) -> Result<Arc<Vec<u8>>, ResolverError> {
        self.resolve_sync(url)
    }
}
