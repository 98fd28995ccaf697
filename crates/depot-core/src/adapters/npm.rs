//! npm-like registry: package documents, tarballs, bulk security advisories.

use sha2::{Digest, Sha256};

use super::{
    encode_segment, join_url, reject_traversal, validate_version, Resource, MAX_PACKAGE_NAME_LEN,
};
use crate::config::ProxyConfig;
use crate::error::{CacheError, CacheResult};
use crate::staleness::ContentKind;
use crate::upstream::FetchRequest;

const MAX_TARBALL_NAME_LEN: usize = 255;
const TARBALL_EXTENSIONS: &[&str] = &[".tgz", ".tar.gz", ".tar.bz2", ".tar.xz", ".tar"];
const BULK_ADVISORY_PATH: &str = "-/npm/v1/security/advisories/bulk";
const BODY_HASH_LEN: usize = 32;

/// A validated npm package name, split into scope and bare name.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PackageName<'a> {
    pub scope: Option<&'a str>,
    pub name: &'a str,
}

impl<'a> PackageName<'a> {
    /// Parse `name` or `@scope/name` (case-insensitive `[a-z0-9][a-z0-9._-]*`
    /// for each part, at most 214 chars overall).
    pub fn parse(package: &'a str) -> CacheResult<Self> {
        let invalid =
            || CacheError::invalid_input(format!("invalid npm package name: {:?}", package));

        if package.is_empty() || package.len() > MAX_PACKAGE_NAME_LEN {
            return Err(invalid());
        }
        reject_traversal("npm package name", package)?;

        let (scope, name) = match package.strip_prefix('@') {
            Some(scoped) => {
                let (scope, name) = scoped.split_once('/').ok_or_else(invalid)?;
                (Some(scope), name)
            }
            None => (None, package),
        };

        if !scope.map_or(true, is_name_part) || !is_name_part(name) {
            return Err(invalid());
        }
        Ok(Self { scope, name })
    }

    /// Upstream URL form: `%40scope/name` for scoped packages.
    pub fn url_path(&self) -> String {
        match self.scope {
            Some(scope) => format!(
                "{}/{}",
                encode_segment(&format!("@{}", scope)),
                encode_segment(self.name)
            ),
            None => encode_segment(self.name),
        }
    }

    /// Cache form: `@scope/name` or `name`.
    pub fn cache_path(&self) -> String {
        match self.scope {
            Some(scope) => format!("@{}/{}", scope, self.name),
            None => self.name.to_string(),
        }
    }
}

fn is_name_part(part: &str) -> bool {
    let mut chars = part.chars();
    chars.next().is_some_and(|c| c.is_ascii_alphanumeric())
        && chars.all(|c| c.is_ascii_alphanumeric() || matches!(c, '.' | '_' | '-'))
}

#[derive(Debug, Clone)]
pub struct NpmAdapter {
    registry_url: String,
    metadata_ttl: u64,
    security_ttl: u64,
}

impl NpmAdapter {
    pub fn new(config: &ProxyConfig) -> Self {
        Self {
            registry_url: config.npm_url.clone(),
            metadata_ttl: config.ttl.npm_metadata_hours,
            security_ttl: config.ttl.npm_security_hours,
        }
    }

    /// The package document (`/<package>`).
    pub fn package(&self, package: &str) -> CacheResult<Resource> {
        let name = PackageName::parse(package)?;

        Ok(Resource::new(
            vec!["npm".to_string(), name.cache_path(), "index.json".to_string()],
            FetchRequest::get(join_url(&self.registry_url, &name.url_path())),
            ContentKind::MutableMetadata,
            self.metadata_ttl,
            "application/json",
        )
        .json())
    }

    /// One version's document (`/<package>/<version>`).
    pub fn version(&self, package: &str, version: &str) -> CacheResult<Resource> {
        let name = PackageName::parse(package)?;
        validate_version(version)?;

        Ok(Resource::new(
            vec![
                "npm".to_string(),
                name.cache_path(),
                version.to_string(),
                "index.json".to_string(),
            ],
            FetchRequest::get(join_url(
                &self.registry_url,
                &format!("{}/{}", name.url_path(), encode_segment(version)),
            )),
            ContentKind::MutableMetadata,
            self.metadata_ttl,
            "application/json",
        )
        .json())
    }

    /// A published tarball (`/<package>/-/<file>`).
    pub fn tarball(&self, package: &str, file: &str) -> CacheResult<Resource> {
        let name = PackageName::parse(package)?;
        validate_tarball_name(file)?;

        Ok(Resource::new(
            vec![
                "npm".to_string(),
                name.cache_path(),
                "-".to_string(),
                file.to_string(),
            ],
            FetchRequest::get(join_url(
                &self.registry_url,
                &format!("{}/-/{}", name.url_path(), encode_segment(file)),
            )),
            ContentKind::ImmutableArtifact,
            0,
            tarball_media_type(file),
        ))
    }

    /// A bulk security-advisory query, keyed by a hash of its body.
    pub fn security_bulk(&self, body: Vec<u8>) -> Resource {
        let key = body_hash(&body);

        Resource::new(
            vec![
                "npm".to_string(),
                "-".to_string(),
                "security".to_string(),
                format!("{}.json", key),
            ],
            FetchRequest::post(join_url(&self.registry_url, BULK_ADVISORY_PATH), body),
            ContentKind::VolatileMetadata,
            self.security_ttl,
            "application/json",
        )
        .json()
    }
}

/// Hex SHA-256 of a request body, truncated.
pub fn body_hash(body: &[u8]) -> String {
    let mut hash = hex::encode(Sha256::digest(body));
    hash.truncate(BODY_HASH_LEN);
    hash
}

/// `[A-Za-z0-9._-]+` ending in a tarball extension, at most 255 chars.
pub fn validate_tarball_name(file: &str) -> CacheResult<()> {
    let invalid = || CacheError::invalid_input(format!("invalid tarball name: {:?}", file));

    if file.is_empty() || file.len() > MAX_TARBALL_NAME_LEN {
        return Err(invalid());
    }
    reject_traversal("tarball name", file)?;

    let stem = TARBALL_EXTENSIONS
        .iter()
        .find_map(|ext| file.strip_suffix(ext))
        .ok_or_else(invalid)?;
    if stem.is_empty()
        || !file
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || matches!(c, '.' | '_' | '-'))
    {
        return Err(invalid());
    }
    Ok(())
}

fn tarball_media_type(file: &str) -> &'static str {
    if file.ends_with(".tgz") || file.ends_with(".tar.gz") {
        "application/gzip"
    } else if file.ends_with(".tar") {
        "application/x-tar"
    } else {
        "application/octet-stream"
    }
}
