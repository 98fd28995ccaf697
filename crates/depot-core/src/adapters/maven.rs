//! Maven-like repository, mirrored 1:1 by relative path.

use super::{encode_path, join_url, validate_relative_path, Resource};
use crate::config::ProxyConfig;
use crate::error::CacheResult;
use crate::staleness::ContentKind;
use crate::upstream::FetchRequest;

const MAX_PATH_LEN: usize = 1024;
const METADATA_EXTENSIONS: &[&str] = &[".xml", ".pom", ".sha1", ".md5"];

#[derive(Debug, Clone)]
pub struct MavenAdapter {
    repository_url: String,
    metadata_ttl: u64,
    snapshot_ttl: u64,
}

impl MavenAdapter {
    pub fn new(config: &ProxyConfig) -> Self {
        Self {
            repository_url: config.maven_url.clone(),
            metadata_ttl: config.ttl.maven_metadata_hours,
            snapshot_ttl: config.ttl.maven_snapshot_hours,
        }
    }

    /// Any repository path, e.g. `org/x/y/1.0/y-1.0.pom`.
    pub fn artifact(&self, path: &str) -> CacheResult<Resource> {
        validate_relative_path("maven path", path, MAX_PATH_LEN, &[])?;

        let (kind, ttl_hours) = self.classify(path);
        Ok(Resource::new(
            vec!["maven".to_string(), path.to_string()],
            FetchRequest::get(join_url(&self.repository_url, &encode_path(path))),
            kind,
            ttl_hours,
            media_type(path),
        ))
    }

    /// Snapshot directories win over file type: a `-SNAPSHOT` pom is
    /// republished as often as its jar.
    pub fn classify(&self, path: &str) -> (ContentKind, u64) {
        let mut parents = path.rsplit('/').skip(1);
        if parents.any(|dir| dir.ends_with("-SNAPSHOT")) {
            return (ContentKind::SnapshotArtifact, self.snapshot_ttl);
        }
        if METADATA_EXTENSIONS.iter().any(|ext| path.ends_with(ext)) {
            return (ContentKind::MutableMetadata, self.metadata_ttl);
        }
        (ContentKind::ImmutableArtifact, 0)
    }
}

fn media_type(path: &str) -> &'static str {
    match path.rsplit_once('.').map(|(_, ext)| ext) {
        Some("pom") | Some("xml") => "application/xml",
        Some("sha1") | Some("md5") => "text/plain",
        Some("jar") => "application/java-archive",
        _ => "application/octet-stream",
    }
}
