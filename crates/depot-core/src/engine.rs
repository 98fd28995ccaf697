//! Request flow: validate, resolve, check staleness, fill, serve.

use std::path::PathBuf;
use std::sync::Arc;

use reqwest::header::HeaderMap;
use tracing::{debug, warn};

use crate::adapters::{MavenAdapter, NpmAdapter, PypiAdapter, Resource};
use crate::config::ProxyConfig;
use crate::error::{CacheError, CacheResult};
use crate::path::CacheRoot;
use crate::responder::{CachedResponse, ConditionalResponder};
use crate::staleness::{self, Freshness};
use crate::store::AtomicStore;
use crate::upstream::UpstreamClient;

/// The cache engine (cheap to clone; all state is shared).
#[derive(Debug, Clone)]
pub struct CacheEngine {
    config: Arc<ProxyConfig>,
    store: AtomicStore,
    responder: ConditionalResponder,
    pypi: PypiAdapter,
    npm: NpmAdapter,
    maven: MavenAdapter,
}

impl CacheEngine {
    /// Create the cache root and the upstream client.
    pub fn new(config: ProxyConfig) -> CacheResult<Self> {
        let root = CacheRoot::new(&config.cache_dir)?;
        let upstream = UpstreamClient::new(&config)?;

        Ok(Self {
            pypi: PypiAdapter::new(&config)?,
            npm: NpmAdapter::new(&config),
            maven: MavenAdapter::new(&config),
            store: AtomicStore::new(root.clone(), upstream),
            responder: ConditionalResponder::new(root),
            config: Arc::new(config),
        })
    }

    pub fn config(&self) -> &ProxyConfig {
        &self.config
    }

    pub fn root(&self) -> &CacheRoot {
        self.store.root()
    }

    pub fn pypi(&self) -> &PypiAdapter {
        &self.pypi
    }

    pub fn npm(&self) -> &NpmAdapter {
        &self.npm
    }

    pub fn maven(&self) -> &MavenAdapter {
        &self.maven
    }

    /// Make sure `resource` is cached and serve it against `headers`.
    pub async fn serve(
        &self,
        resource: &Resource,
        headers: &HeaderMap,
    ) -> CacheResult<CachedResponse> {
        let path = self.ensure(resource).await?;
        self.responder
            .serve(headers, &path, resource.media_type, resource.attachment)
            .await
    }

    /// Make sure `resource` is cached and return its path.
    ///
    /// Revalidation failures caused by upstream unavailability, upstream 5xx
    /// or an unusable upstream body fall back to the existing copy when there
    /// is one.
    pub async fn ensure(&self, resource: &Resource) -> CacheResult<PathBuf> {
        let path = self.root().resolve(&resource.segments)?;

        let freshness = staleness::freshness(&path, resource.ttl_hours);
        if !freshness.needs_fetch() {
            debug!(key = %resource.cache_key(), kind = %resource.kind, "cache hit");
            return Ok(path);
        }
        debug!(key = %resource.cache_key(), kind = %resource.kind, state = ?freshness, "cache miss");

        let result = self.spawn_fill(resource, &path, freshness).await;
        match result {
            Ok(path) => Ok(path),
            Err(e) if e.is_soft_failure() && freshness != Freshness::Missing && path.is_file() => {
                warn!(
                    key = %resource.cache_key(),
                    error = %e,
                    "revalidation failed, serving stale copy"
                );
                Ok(path)
            }
            Err(e) => Err(e),
        }
    }

    /// Run the fill on its own task so a dropped client request does not
    /// cancel an upstream fetch that has already started.
    async fn spawn_fill(
        &self,
        resource: &Resource,
        path: &std::path::Path,
        freshness: Freshness,
    ) -> CacheResult<PathBuf> {
        let store = self.store.clone();
        let request = resource.request.clone();
        let dest = path.to_path_buf();
        let options = resource
            .store
            .clone()
            .with_force_refresh(freshness != Freshness::Missing);

        tokio::spawn(async move { store.fetch_and_store(&request, &dest, options).await })
            .await
            .map_err(|e| CacheError::Io {
                message: format!("fill task failed: {}", e),
            })?
    }
}
