//! On-disk cache engine for a PyPI/npm/Maven caching proxy.
//!
//! This crate decides, for any logical registry request, whether to serve
//! from disk, refresh from upstream, or fail:
//!
//! - Path resolution that keeps every client-controlled path inside the cache root
//! - mtime-based staleness per content kind
//! - Atomic fetch-and-store with per-path in-flight deduplication
//! - Conditional responses (`ETag`, `Last-Modified`, 304)
//! - Registry adapters, including the PyPI simple-index link rewrite
//!
//! # Quick Start
//!
//! ```no_run
//! use depot_core::{CacheEngine, ProxyConfig};
//! use reqwest::header::HeaderMap;
//!
//! # async fn example() -> anyhow::Result<()> {
//! let engine = CacheEngine::new(ProxyConfig::from_env())?;
//!
//! let resource = engine.npm().package("@types/react")?;
//! let response = engine.serve(&resource, &HeaderMap::new()).await?;
//! println!("{} {}", response.status(), response.validators.etag);
//! # Ok(())
//! # }
//! ```
//!
//! # Cache layout
//!
//! | Resource | Cache path |
//! |----------|------------|
//! | PyPI simple index | `pypi/simple/<pkg>/index.html` |
//! | PyPI JSON | `pypi/<pkg>[/<ver>]/index.json` |
//! | PyPI file | `pypi/packages/<path>` |
//! | npm document | `npm/<pkg>[/<ver>]/index.json` |
//! | npm tarball | `npm/<pkg>/-/<file>` |
//! | npm bulk advisories | `npm/-/security/<hash>.json` |
//! | Maven | `maven/<path>` |

pub mod adapters;
pub mod config;
pub mod engine;
pub mod error;
pub mod html;
pub mod path;
pub mod responder;
pub mod staleness;
pub mod store;
pub mod upstream;

pub use adapters::{MavenAdapter, NpmAdapter, PypiAdapter, Resource};
pub use config::{ProxyConfig, TtlConfig};
pub use engine::CacheEngine;
pub use error::{CacheError, CacheResult};
pub use path::CacheRoot;
pub use responder::{CachedBody, CachedResponse, ConditionalResponder, Validators};
pub use staleness::{ContentKind, Freshness};
pub use store::{AtomicStore, StoreOptions};
pub use upstream::{FetchMethod, FetchRequest, UpstreamBody, UpstreamClient};
