//! PyPI-like registry: simple index, JSON API, file distribution.

use std::sync::Arc;

use super::{
    encode_path, encode_segment, join_url, reject_traversal, validate_relative_path,
    validate_version, Resource, MAX_PACKAGE_NAME_LEN,
};
use crate::config::ProxyConfig;
use crate::error::{CacheError, CacheResult};
use crate::html::LinkRewriter;
use crate::staleness::ContentKind;
use crate::upstream::FetchRequest;

const MAX_ARTIFACT_PATH_LEN: usize = 1024;
const ATTACHMENT_EXTENSIONS: &[&str] = &[".whl", ".zip", ".gz", ".tar"];

#[derive(Debug, Clone)]
pub struct PypiAdapter {
    registry_url: String,
    files_url: String,
    metadata_ttl: u64,
    rewriter: Arc<LinkRewriter>,
}

impl PypiAdapter {
    pub fn new(config: &ProxyConfig) -> CacheResult<Self> {
        Ok(Self {
            registry_url: config.pypi_url.clone(),
            files_url: config.pypi_files_url.clone(),
            metadata_ttl: config.ttl.pypi_metadata_hours,
            rewriter: Arc::new(LinkRewriter::new(
                &config.pypi_proxy_base,
                &config.pypi_url,
                &config.pypi_files_url,
            )?),
        })
    }

    /// `/simple/`: the full project list.
    pub fn simple_root(&self) -> Resource {
        Resource::new(
            segments(&["pypi", "simple", "index.html"]),
            FetchRequest::get(join_url(&self.registry_url, "simple/")),
            ContentKind::MutableMetadata,
            self.metadata_ttl,
            "text/html",
        )
    }

    /// `/simple/<package>/`, with links rewritten to point at the proxy.
    pub fn simple_index(&self, package: &str) -> CacheResult<Resource> {
        validate_package_name(package)?;

        let rewriter = Arc::clone(&self.rewriter);
        let mut resource = Resource::new(
            segments(&["pypi", "simple", package, "index.html"]),
            FetchRequest::get(join_url(
                &self.registry_url,
                &format!("simple/{}/", encode_segment(package)),
            )),
            ContentKind::MutableMetadata,
            self.metadata_ttl,
            "text/html",
        );
        resource.store = resource
            .store
            .with_transform(Arc::new(move |body: &[u8]| rewriter.rewrite_document(body)));
        Ok(resource)
    }

    /// `/pypi/<package>/json`.
    pub fn package_json(&self, package: &str) -> CacheResult<Resource> {
        validate_package_name(package)?;

        Ok(Resource::new(
            segments(&["pypi", package, "index.json"]),
            FetchRequest::get(join_url(
                &self.registry_url,
                &format!("pypi/{}/json", encode_segment(package)),
            )),
            ContentKind::MutableMetadata,
            self.metadata_ttl,
            "application/json",
        )
        .json())
    }

    /// `/pypi/<package>/<version>/json`.
    pub fn version_json(&self, package: &str, version: &str) -> CacheResult<Resource> {
        validate_package_name(package)?;
        validate_version(version)?;

        Ok(Resource::new(
            segments(&["pypi", package, version, "index.json"]),
            FetchRequest::get(join_url(
                &self.registry_url,
                &format!(
                    "pypi/{}/{}/json",
                    encode_segment(package),
                    encode_segment(version)
                ),
            )),
            ContentKind::MutableMetadata,
            self.metadata_ttl,
            "application/json",
        )
        .json())
    }

    /// `/packages/<path>` on the file host. A redundant leading `packages/`
    /// is stripped.
    pub fn artifact(&self, path: &str) -> CacheResult<Resource> {
        let path = path.strip_prefix("packages/").unwrap_or(path);
        validate_relative_path("artifact path", path, MAX_ARTIFACT_PATH_LEN, &['+', '!'])?;

        let attachment = ATTACHMENT_EXTENSIONS.iter().any(|ext| path.ends_with(ext));
        Ok(Resource::new(
            segments(&["pypi", "packages", path]),
            FetchRequest::get(join_url(
                &self.files_url,
                &format!("packages/{}", encode_path(path)),
            )),
            ContentKind::ImmutableArtifact,
            0,
            "application/octet-stream",
        )
        .as_attachment(attachment))
    }
}

/// `[A-Za-z0-9][A-Za-z0-9._-]*`, at most 214 chars.
pub fn validate_package_name(package: &str) -> CacheResult<()> {
    let invalid =
        || CacheError::invalid_input(format!("invalid PyPI package name: {:?}", package));

    if package.is_empty() || package.len() > MAX_PACKAGE_NAME_LEN {
        return Err(invalid());
    }
    reject_traversal("PyPI package name", package)?;

    let mut chars = package.chars();
    let starts_alnum = chars.next().is_some_and(|c| c.is_ascii_alphanumeric());
    if !starts_alnum
        || !chars.all(|c| c.is_ascii_alphanumeric() || matches!(c, '.' | '_' | '-'))
    {
        return Err(invalid());
    }
    Ok(())
}

fn segments(parts: &[&str]) -> Vec<String> {
    parts.iter().map(|s| s.to_string()).collect()
}
