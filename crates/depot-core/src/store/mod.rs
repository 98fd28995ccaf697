//! Atomic store: fetch from upstream and persist under the cache root.
//!
//! Every write to the cache goes through [`AtomicStore`]. Destinations are
//! re-verified against the cache root, bodies land via temp-file + rename,
//! and concurrent fills of one path collapse into a single upstream call.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use serde_json::Value;
use tokio::fs;
use tracing::{debug, info, warn};

use crate::error::{CacheError, CacheResult};
use crate::path::CacheRoot;
use crate::upstream::{FetchRequest, UpstreamClient};

mod inflight;
mod io;

use inflight::InflightFills;

/// Post-processing applied to an upstream body before it is persisted.
pub type Transform = Arc<dyn Fn(&[u8]) -> CacheResult<Vec<u8>> + Send + Sync>;

/// Options for a single fill.
#[derive(Clone, Default)]
pub struct StoreOptions {
    /// Go upstream even if the destination exists.
    pub force_refresh: bool,
    /// Reject bodies that are not valid JSON (before anything is written).
    pub validate_json: bool,
    /// Rewrite the body before persisting.
    pub transform: Option<Transform>,
}

impl std::fmt::Debug for StoreOptions {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StoreOptions")
            .field("force_refresh", &self.force_refresh)
            .field("validate_json", &self.validate_json)
            .field("transform", &self.transform.is_some())
            .finish()
    }
}

impl StoreOptions {
    pub fn refresh() -> Self {
        Self {
            force_refresh: true,
            ..Self::default()
        }
    }

    pub fn with_force_refresh(mut self, force: bool) -> Self {
        self.force_refresh = force;
        self
    }

    pub fn with_json_validation(mut self) -> Self {
        self.validate_json = true;
        self
    }

    pub fn with_transform(mut self, transform: Transform) -> Self {
        self.transform = Some(transform);
        self
    }
}

/// Fetch-and-persist engine (cheap to clone).
#[derive(Debug, Clone)]
pub struct AtomicStore {
    root: CacheRoot,
    upstream: UpstreamClient,
    inflight: Arc<InflightFills>,
}

impl AtomicStore {
    pub fn new(root: CacheRoot, upstream: UpstreamClient) -> Self {
        Self {
            root,
            upstream,
            inflight: Arc::new(InflightFills::default()),
        }
    }

    pub fn root(&self) -> &CacheRoot {
        &self.root
    }

    /// Ensure `dest` holds content for `request` and return its path.
    ///
    /// Without `force_refresh` an existing destination is returned as-is with
    /// no network call.
    pub async fn fetch_and_store(
        &self,
        request: &FetchRequest,
        dest: &Path,
        options: StoreOptions,
    ) -> CacheResult<PathBuf> {
        let dest = self.verify_destination(dest)?;

        let observed = io::modified(&dest).await;
        if observed.is_some() && !options.force_refresh {
            debug!(path = %dest.display(), "cache hit");
            return Ok(dest);
        }

        let _guard = self.inflight.enter(&dest).await;

        // A concurrent fill may have landed while this caller was queued.
        let current = io::modified(&dest).await;
        if current.is_some() && current != observed {
            debug!(path = %dest.display(), "filled by concurrent request");
            return Ok(dest);
        }

        self.fill(request, &dest, &options).await?;
        Ok(dest)
    }

    /// Like [`fetch_and_store`](Self::fetch_and_store) but parse the stored body as JSON.
    pub async fn fetch_and_store_json(
        &self,
        request: &FetchRequest,
        dest: &Path,
        force_refresh: bool,
    ) -> CacheResult<Value> {
        let options = StoreOptions::default()
            .with_force_refresh(force_refresh)
            .with_json_validation();
        let path = self.fetch_and_store(request, dest, options).await?;

        let content = fs::read(&path)
            .await
            .map_err(|e| CacheError::io("failed to read cached JSON", e))?;
        serde_json::from_slice(&content).map_err(|e| CacheError::InvalidResponse {
            message: format!("cached JSON is invalid: {}", e),
        })
    }

    fn verify_destination(&self, dest: &Path) -> CacheResult<PathBuf> {
        self.root.verify(dest).map_err(|_| {
            warn!(path = %dest.display(), "refused write outside cache root");
            CacheError::UnsafeDestination {
                path: dest.display().to_string(),
            }
        })
    }

    async fn fill(
        &self,
        request: &FetchRequest,
        dest: &Path,
        options: &StoreOptions,
    ) -> CacheResult<()> {
        io::ensure_parent(dest).await?;

        let mut body = self.upstream.send(request).await?;

        // Bodies that are inspected or rewritten are small metadata documents.
        let size = if options.transform.is_none() && !options.validate_json {
            io::write_atomic_stream(dest, &mut body).await?
        } else {
            let body = body.bytes().await?;
            let body = match &options.transform {
                Some(transform) => transform(&body)?,
                None => body,
            };

            if options.validate_json {
                serde_json::from_slice::<serde::de::IgnoredAny>(&body).map_err(|e| {
                    CacheError::InvalidResponse {
                        message: format!("upstream body is not JSON ({}): {}", request.url, e),
                    }
                })?;
            }

            let size = body.len() as u64;
            io::write_atomic(dest, body).await?;
            size
        };

        info!(url = %request.url, path = %dest.display(), bytes = size, "stored upstream response");
        Ok(())
    }
}
