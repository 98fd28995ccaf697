//! Registry adapters.
//!
//! An adapter is a pure mapping layer: it validates the client-supplied
//! identifiers and turns them into a [`Resource`] (cache location, upstream
//! request, content kind, TTL and serving hints). It never touches the
//! filesystem or the network itself.

use crate::error::{CacheError, CacheResult};
use crate::staleness::ContentKind;
use crate::store::StoreOptions;
use crate::upstream::FetchRequest;

mod maven;
mod npm;
mod pypi;

pub use maven::MavenAdapter;
pub use npm::NpmAdapter;
pub use pypi::PypiAdapter;

/// Maximum package-name length shared by PyPI and npm.
pub const MAX_PACKAGE_NAME_LEN: usize = 214;

/// Maximum version-string length.
pub const MAX_VERSION_LEN: usize = 100;

/// A fully described cacheable resource.
#[derive(Debug, Clone)]
pub struct Resource {
    /// Cache-relative segments, fed to [`CacheRoot::resolve`](crate::path::CacheRoot::resolve).
    pub segments: Vec<String>,
    pub request: FetchRequest,
    pub kind: ContentKind,
    /// Revalidation TTL; `0` means never revalidate.
    pub ttl_hours: u64,
    pub media_type: &'static str,
    pub attachment: bool,
    /// Fill options (JSON validation, body transform). Force-refresh is
    /// decided per request by the engine.
    pub store: StoreOptions,
}

impl Resource {
    fn new(
        segments: Vec<String>,
        request: FetchRequest,
        kind: ContentKind,
        ttl_hours: u64,
        media_type: &'static str,
    ) -> Self {
        Self {
            segments,
            request,
            kind,
            ttl_hours,
            media_type,
            attachment: false,
            store: StoreOptions::default(),
        }
    }

    fn as_attachment(mut self, attachment: bool) -> Self {
        self.attachment = attachment;
        self
    }

    fn json(mut self) -> Self {
        self.store = self.store.with_json_validation();
        self
    }

    /// Cache-relative path, for logs.
    pub fn cache_key(&self) -> String {
        self.segments.join("/")
    }
}

/// Percent-encode one URL path segment, keeping unreserved characters.
pub(crate) fn encode_segment(input: &str) -> String {
    let mut result = String::with_capacity(input.len() * 3);
    for c in input.chars() {
        match c {
            'A'..='Z' | 'a'..='z' | '0'..='9' | '_' | '-' | '~' | '.' => result.push(c),
            _ => {
                let mut buf = [0u8; 4];
                for b in c.encode_utf8(&mut buf).as_bytes() {
                    result.push_str(&format!("%{:02X}", b));
                }
            }
        }
    }
    result
}

/// Percent-encode a `/`-separated relative path segment by segment.
pub(crate) fn encode_path(path: &str) -> String {
    path.split('/')
        .map(encode_segment)
        .collect::<Vec<_>>()
        .join("/")
}

pub(crate) fn join_url(base: &str, path: &str) -> String {
    format!("{}/{}", base.trim_end_matches('/'), path.trim_start_matches('/'))
}

/// Traversal markers rejected in every identifier, whatever the registry.
pub(crate) fn reject_traversal(kind: &str, value: &str) -> CacheResult<()> {
    if value.contains("..") || value.contains('\\') || value.contains('\0') {
        return Err(CacheError::invalid_input(format!(
            "invalid {}: {:?}",
            kind, value
        )));
    }
    Ok(())
}

/// Version strings: `[A-Za-z0-9._+-]`, at most 100 chars, no `..` or `/`.
pub(crate) fn validate_version(version: &str) -> CacheResult<()> {
    let invalid = || CacheError::invalid_input(format!("invalid version: {:?}", version));

    if version.is_empty() || version.len() > MAX_VERSION_LEN {
        return Err(invalid());
    }
    reject_traversal("version", version)?;
    if !version
        .chars()
        .all(|c| c.is_ascii_alphanumeric() || matches!(c, '.' | '_' | '+' | '-'))
    {
        return Err(invalid());
    }
    Ok(())
}

/// Relative repository paths: `[A-Za-z0-9._/-]` plus `extra`, no `//`, no
/// leading `/`, no `..`.
pub(crate) fn validate_relative_path(
    kind: &str,
    path: &str,
    max_len: usize,
    extra: &[char],
) -> CacheResult<()> {
    let invalid = |reason: &str| {
        CacheError::invalid_input(format!("invalid {} {:?}: {}", kind, path, reason))
    };

    if path.is_empty() || path.len() > max_len {
        return Err(invalid("empty or too long"));
    }
    reject_traversal(kind, path)?;
    if path.starts_with('/') {
        return Err(invalid("absolute path"));
    }
    if path.contains("//") {
        return Err(invalid("empty path component"));
    }
    if !path.chars().all(|c| {
        c.is_ascii_alphanumeric() || matches!(c, '.' | '_' | '/' | '-') || extra.contains(&c)
    }) {
        return Err(invalid("unsupported character"));
    }
    Ok(())
}
