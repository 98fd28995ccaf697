//! HTTP routing for the depot caching proxy.
//!
//! Maps request paths onto [`depot_core`] adapter operations and renders
//! cached responses. All cache decisions live in the engine.

use axum::{
    body::{Body, Bytes},
    extract::{Path, State},
    http::{
        header::{CONTENT_DISPOSITION, CONTENT_LENGTH, CONTENT_TYPE, ETAG, LAST_MODIFIED},
        HeaderMap, HeaderValue, StatusCode,
    },
    response::{IntoResponse, Response},
    routing::get,
    Json, Router,
};
use depot_core::{CacheEngine, CacheError, CachedResponse, Resource};
use serde_json::json;
use tracing::{error, warn};

pub mod routes;

use routes::{MavenRoute, NpmRoute, PypiRoute};

const BULK_ADVISORY_PATH: &str = "-/npm/v1/security/advisories/bulk";

/// Build the proxy router.
pub fn router(engine: CacheEngine) -> Router {
    Router::new()
        .route("/", get(status))
        .route("/pypi/*rest", get(pypi))
        .route("/npm/*rest", get(npm).post(npm_bulk))
        .route("/maven2/*path", get(maven))
        .fallback(not_found)
        .with_state(engine)
}

async fn status(State(engine): State<CacheEngine>) -> Json<serde_json::Value> {
    Json(json!({
        "status": "ok",
        "message": "Local caching proxy for PyPI, npm and Maven",
        "version": env!("CARGO_PKG_VERSION"),
        "cache_dir": engine.root().path().display().to_string(),
    }))
}

async fn pypi(
    State(engine): State<CacheEngine>,
    Path(rest): Path<String>,
    headers: HeaderMap,
) -> Result<Served, ApiError> {
    let adapter = engine.pypi();
    let resource = match PypiRoute::parse(&rest).ok_or(ApiError::NoRoute)? {
        PypiRoute::SimpleRoot => adapter.simple_root(),
        PypiRoute::SimpleIndex(package) => adapter.simple_index(package)?,
        PypiRoute::PackageJson(package) => adapter.package_json(package)?,
        PypiRoute::VersionJson(package, version) => adapter.version_json(package, version)?,
        PypiRoute::Artifact(path) => adapter.artifact(path)?,
    };
    serve(&engine, &resource, &headers).await
}

async fn npm(
    State(engine): State<CacheEngine>,
    Path(rest): Path<String>,
    headers: HeaderMap,
) -> Result<Served, ApiError> {
    let adapter = engine.npm();
    let resource = match NpmRoute::parse(&rest).ok_or(ApiError::NoRoute)? {
        NpmRoute::Package(package) => adapter.package(package)?,
        NpmRoute::Version(package, version) => adapter.version(package, version)?,
        NpmRoute::Tarball(package, file) => adapter.tarball(package, file)?,
    };
    serve(&engine, &resource, &headers).await
}

async fn npm_bulk(
    State(engine): State<CacheEngine>,
    Path(rest): Path<String>,
    headers: HeaderMap,
    body: Bytes,
) -> Result<Served, ApiError> {
    if rest.trim_end_matches('/') != BULK_ADVISORY_PATH {
        return Err(ApiError::NoRoute);
    }
    let resource = engine.npm().security_bulk(body.to_vec());
    serve(&engine, &resource, &headers).await
}

async fn maven(
    State(engine): State<CacheEngine>,
    Path(path): Path<String>,
    headers: HeaderMap,
) -> Result<Served, ApiError> {
    let MavenRoute(path) = MavenRoute::parse(&path).ok_or(ApiError::NoRoute)?;
    let resource = engine.maven().artifact(path)?;
    serve(&engine, &resource, &headers).await
}

async fn not_found() -> ApiError {
    ApiError::NoRoute
}

async fn serve(
    engine: &CacheEngine,
    resource: &Resource,
    headers: &HeaderMap,
) -> Result<Served, ApiError> {
    Ok(Served(engine.serve(resource, headers).await?))
}

/// A cached file rendered as an HTTP response, streamed from disk.
pub struct Served(pub CachedResponse);

impl IntoResponse for Served {
    fn into_response(self) -> Response {
        let cached = self.0;
        let mut headers = HeaderMap::new();

        if let Ok(etag) = HeaderValue::from_str(&cached.validators.etag) {
            headers.insert(ETAG, etag);
        }
        if let Ok(last_modified) = HeaderValue::from_str(&cached.validators.last_modified) {
            headers.insert(LAST_MODIFIED, last_modified);
        }

        let Some(body) = cached.body else {
            return (StatusCode::NOT_MODIFIED, headers).into_response();
        };

        headers.insert(CONTENT_TYPE, HeaderValue::from_static(cached.media_type));
        if let Some(disposition) = cached
            .content_disposition
            .as_deref()
            .and_then(|d| HeaderValue::from_str(d).ok())
        {
            headers.insert(CONTENT_DISPOSITION, disposition);
        }
        headers.insert(CONTENT_LENGTH, HeaderValue::from(body.len()));

        let stream = futures::stream::try_unfold(body, |mut body| async move {
            Ok::<_, CacheError>(body.next_chunk().await?.map(|chunk| (chunk, body)))
        });
        (StatusCode::OK, headers, Body::from_stream(stream)).into_response()
    }
}

/// Request-path failure, rendered as `{"detail": ...}`.
#[derive(Debug)]
pub enum ApiError {
    /// No proxy route matches the request path.
    NoRoute,
    Cache(CacheError),
}

impl From<CacheError> for ApiError {
    fn from(err: CacheError) -> Self {
        Self::Cache(err)
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, detail) = match self {
            Self::NoRoute => (StatusCode::NOT_FOUND, "Not Found".to_string()),
            Self::Cache(err) => {
                let status = StatusCode::from_u16(err.status_code())
                    .unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
                if err.is_security_violation() {
                    warn!(error = %err, "rejected unsafe cache path");
                } else if status.is_server_error() {
                    error!(error = %err, status = status.as_u16(), "request failed");
                }
                (status, err.to_string())
            }
        };
        (status, Json(json!({ "detail": detail }))).into_response()
    }
}
