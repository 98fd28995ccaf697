//! Conditional responses for cached files.
//!
//! ETags are a weak fingerprint of `(file name, mtime, size)`, not a content
//! hash. `If-None-Match` and `If-Modified-Since` are compared to the computed
//! values as exact strings; there is no HTTP-date range comparison.

use std::path::Path;
use std::time::SystemTime;

use bytes::{Bytes, BytesMut};
use chrono::{DateTime, Utc};
use reqwest::header::{HeaderMap, HeaderName, IF_MODIFIED_SINCE, IF_NONE_MATCH};
use sha2::{Digest, Sha256};
use tokio::fs;
use tokio::io::AsyncReadExt;
use tracing::{debug, warn};

use crate::error::{CacheError, CacheResult};
use crate::path::CacheRoot;

/// Cache validators for one file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Validators {
    /// Quoted entity tag.
    pub etag: String,
    /// RFC 7231 IMF-fixdate.
    pub last_modified: String,
}

impl Validators {
    /// Derive validators from a file's name, mtime and size.
    pub fn compute(file_name: &str, modified: SystemTime, size: u64) -> Self {
        let since_epoch = modified
            .duration_since(SystemTime::UNIX_EPOCH)
            .unwrap_or_default();
        let fingerprint = format!(
            "{}-{}.{:09}-{}",
            file_name,
            since_epoch.as_secs(),
            since_epoch.subsec_nanos(),
            size
        );
        let digest = Sha256::digest(fingerprint.as_bytes());

        let modified: DateTime<Utc> = modified.into();
        Self {
            etag: format!("\"{}\"", hex::encode(digest)),
            last_modified: modified.format("%a, %d %b %Y %H:%M:%S GMT").to_string(),
        }
    }

    /// Whether the request's conditional headers match these validators.
    pub fn matches(&self, headers: &HeaderMap) -> bool {
        header_str(headers, IF_NONE_MATCH) == Some(self.etag.as_str())
            || header_str(headers, IF_MODIFIED_SINCE) == Some(self.last_modified.as_str())
    }
}

// HeaderMap lookups are case-insensitive.
fn header_str(headers: &HeaderMap, name: HeaderName) -> Option<&str> {
    headers.get(name).and_then(|v| v.to_str().ok())
}

const CHUNK_SIZE: usize = 64 * 1024;

/// An open cached file, read in chunks.
///
/// The handle is opened after the containment check, so a later rename over
/// the path does not change what is served.
#[derive(Debug)]
pub struct CachedBody {
    file: fs::File,
    len: u64,
}

impl CachedBody {
    /// Size of the file when it was opened.
    pub fn len(&self) -> u64 {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Next chunk of the file, `None` at end of file.
    pub async fn next_chunk(&mut self) -> CacheResult<Option<Bytes>> {
        let mut buf = BytesMut::with_capacity(CHUNK_SIZE);
        let read = self
            .file
            .read_buf(&mut buf)
            .await
            .map_err(|e| CacheError::io("failed to read cached file", e))?;
        Ok((read > 0).then(|| buf.freeze()))
    }

    /// Read the whole file into memory.
    pub async fn into_bytes(mut self) -> CacheResult<Vec<u8>> {
        let mut content = Vec::with_capacity(usize::try_from(self.len).unwrap_or_default());
        self.file
            .read_to_end(&mut content)
            .await
            .map_err(|e| CacheError::io("failed to read cached file", e))?;
        Ok(content)
    }
}

/// Body and headers for a cached file.
#[derive(Debug)]
pub struct CachedResponse {
    pub validators: Validators,
    pub media_type: &'static str,
    /// `Content-Disposition` value, when served as an attachment.
    pub content_disposition: Option<String>,
    /// `None` means 304 Not Modified.
    pub body: Option<CachedBody>,
}

impl CachedResponse {
    pub fn is_not_modified(&self) -> bool {
        self.body.is_none()
    }

    pub fn status(&self) -> u16 {
        if self.is_not_modified() {
            304
        } else {
            200
        }
    }

    /// Read the body into memory; `None` for 304.
    pub async fn into_bytes(self) -> CacheResult<Option<Vec<u8>>> {
        match self.body {
            Some(body) => Ok(Some(body.into_bytes().await?)),
            None => Ok(None),
        }
    }
}

/// Serves files from the cache root with conditional-GET support.
#[derive(Debug, Clone)]
pub struct ConditionalResponder {
    root: CacheRoot,
}

impl ConditionalResponder {
    pub fn new(root: CacheRoot) -> Self {
        Self { root }
    }

    /// Build the response for `path`, honoring conditional request headers.
    ///
    /// Fails with `NotFound` when the file is absent, not a regular file, or
    /// no longer resolves inside the cache root.
    pub async fn serve(
        &self,
        headers: &HeaderMap,
        path: &Path,
        media_type: &'static str,
        as_attachment: bool,
    ) -> CacheResult<CachedResponse> {
        let not_found = || CacheError::NotFound {
            path: path.display().to_string(),
        };

        let resolved = fs::canonicalize(path).await.map_err(|_| not_found())?;
        let resolved = self.root.verify(&resolved).map_err(|_| {
            warn!(path = %path.display(), "refused to serve file outside cache root");
            not_found()
        })?;

        let file = fs::File::open(&resolved).await.map_err(|e| match e.kind() {
            std::io::ErrorKind::NotFound => not_found(),
            _ => CacheError::io("failed to open cached file", e),
        })?;
        let metadata = file.metadata().await.map_err(|_| not_found())?;
        if !metadata.is_file() {
            return Err(not_found());
        }
        let modified = metadata
            .modified()
            .map_err(|e| CacheError::io("failed to read mtime", e))?;

        let file_name = resolved
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default();
        let validators = Validators::compute(&file_name, modified, metadata.len());

        if validators.matches(headers) {
            debug!(path = %resolved.display(), "not modified");
            return Ok(CachedResponse {
                validators,
                media_type,
                content_disposition: None,
                body: None,
            });
        }

        Ok(CachedResponse {
            validators,
            media_type,
            content_disposition: as_attachment
                .then(|| format!("attachment; filename=\"{}\"", file_name)),
            body: Some(CachedBody {
                file,
                len: metadata.len(),
            }),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use reqwest::header::HeaderValue;
    use std::time::Duration;
    use tempfile::TempDir;

    fn create_responder() -> (ConditionalResponder, CacheRoot, TempDir) {
        let temp_dir = TempDir::new().unwrap();
        let root = CacheRoot::new(temp_dir.path().join("cache")).unwrap();
        (ConditionalResponder::new(root.clone()), root, temp_dir)
    }

    fn write(root: &CacheRoot, segments: &[&str], content: &[u8]) -> std::path::PathBuf {
        let path = root.resolve(segments).unwrap();
        std::fs::create_dir_all(path.parent().unwrap()).unwrap();
        std::fs::write(&path, content).unwrap();
        path
    }

    #[test]
    fn test_validators_format() {
        let modified = SystemTime::UNIX_EPOCH + Duration::from_secs(784_111_777);
        let v = Validators::compute("index.json", modified, 42);
        assert_eq!(v.last_modified, "Sun, 06 Nov 1994 08:49:37 GMT");
        assert!(v.etag.starts_with('"') && v.etag.ends_with('"'));
        assert_eq!(v.etag.len(), 64 + 2);

        let other_size = Validators::compute("index.json", modified, 43);
        assert_ne!(v.etag, other_size.etag);
        let other_name = Validators::compute("index.html", modified, 42);
        assert_ne!(v.etag, other_name.etag);
    }

    #[tokio::test]
    async fn test_full_response() {
        let (responder, root, _temp_dir) = create_responder();
        let path = write(&root, &["pypi", "x", "index.json"], b"{\"name\":\"x\"}");

        let response = responder
            .serve(&HeaderMap::new(), &path, "application/json", false)
            .await
            .unwrap();
        assert_eq!(response.status(), 200);
        assert_eq!(response.media_type, "application/json");
        assert!(response.content_disposition.is_none());
        assert_eq!(response.body.as_ref().map(CachedBody::len), Some(12));
        assert_eq!(
            response.into_bytes().await.unwrap().as_deref(),
            Some(&b"{\"name\":\"x\"}"[..])
        );
    }

    #[tokio::test]
    async fn test_if_none_match_yields_304() {
        let (responder, root, _temp_dir) = create_responder();
        let path = write(&root, &["npm", "lodash", "index.json"], b"{}");

        let first = responder
            .serve(&HeaderMap::new(), &path, "application/json", false)
            .await
            .unwrap();

        let mut headers = HeaderMap::new();
        headers.insert(
            IF_NONE_MATCH,
            HeaderValue::from_str(&first.validators.etag).unwrap(),
        );
        let second = responder
            .serve(&headers, &path, "application/json", false)
            .await
            .unwrap();
        assert!(second.is_not_modified());
        assert_eq!(second.status(), 304);
    }

    #[tokio::test]
    async fn test_if_modified_since_exact_match() {
        let (responder, root, _temp_dir) = create_responder();
        let path = write(&root, &["maven", "a.pom"], b"<project/>");

        let first = responder
            .serve(&HeaderMap::new(), &path, "application/xml", false)
            .await
            .unwrap();

        let mut headers = HeaderMap::new();
        headers.insert(
            IF_MODIFIED_SINCE,
            HeaderValue::from_str(&first.validators.last_modified).unwrap(),
        );
        assert!(responder
            .serve(&headers, &path, "application/xml", false)
            .await
            .unwrap()
            .is_not_modified());

        // Semantically later, textually different: not a match.
        let mut headers = HeaderMap::new();
        headers.insert(
            IF_MODIFIED_SINCE,
            HeaderValue::from_static("Fri, 31 Dec 9999 23:59:59 GMT"),
        );
        assert!(!responder
            .serve(&headers, &path, "application/xml", false)
            .await
            .unwrap()
            .is_not_modified());
    }

    #[tokio::test]
    async fn test_content_change_invalidates_etag() {
        let (responder, root, _temp_dir) = create_responder();
        let path = write(&root, &["npm", "lodash", "index.json"], b"{}");
        let first = responder
            .serve(&HeaderMap::new(), &path, "application/json", false)
            .await
            .unwrap();

        std::fs::write(&path, b"{\"changed\":true}").unwrap();

        let mut headers = HeaderMap::new();
        headers.insert(
            IF_NONE_MATCH,
            HeaderValue::from_str(&first.validators.etag).unwrap(),
        );
        let second = responder
            .serve(&headers, &path, "application/json", false)
            .await
            .unwrap();
        assert!(!second.is_not_modified());
        assert_ne!(second.validators.etag, first.validators.etag);
    }

    #[tokio::test]
    async fn test_large_file_read_in_chunks() {
        let (responder, root, _temp_dir) = create_responder();
        let content: Vec<u8> = (0..CHUNK_SIZE * 2 + 17).map(|i| (i % 251) as u8).collect();
        let path = write(&root, &["maven", "org/x/1.0/x-1.0.jar"], &content);

        let response = responder
            .serve(&HeaderMap::new(), &path, "application/java-archive", true)
            .await
            .unwrap();
        let mut body = response.body.unwrap();
        assert_eq!(body.len(), content.len() as u64);

        let mut chunks = 0;
        let mut streamed = Vec::new();
        while let Some(chunk) = body.next_chunk().await.unwrap() {
            assert!(chunk.len() <= CHUNK_SIZE);
            streamed.extend_from_slice(&chunk);
            chunks += 1;
        }
        assert!(chunks >= 3);
        assert_eq!(streamed, content);
    }

    #[tokio::test]
    async fn test_open_body_survives_replacement() {
        let (responder, root, temp_dir) = create_responder();
        let path = write(&root, &["npm", "lodash", "index.json"], b"{\"v\":1}");

        let response = responder
            .serve(&HeaderMap::new(), &path, "application/json", false)
            .await
            .unwrap();

        let replacement = temp_dir.path().join("cache").join("replacement");
        std::fs::write(&replacement, b"{\"v\":2}").unwrap();
        std::fs::rename(&replacement, &path).unwrap();

        assert_eq!(
            response.into_bytes().await.unwrap().as_deref(),
            Some(&b"{\"v\":1}"[..])
        );
    }

    #[tokio::test]
    async fn test_attachment_header() {
        let (responder, root, _temp_dir) = create_responder();
        let path = write(&root, &["pypi", "packages", "ab/cd/pkg-1.0-py3-none-any.whl"], b"PK");

        let response = responder
            .serve(&HeaderMap::new(), &path, "application/octet-stream", true)
            .await
            .unwrap();
        assert_eq!(
            response.content_disposition.as_deref(),
            Some("attachment; filename=\"pkg-1.0-py3-none-any.whl\"")
        );
    }

    #[tokio::test]
    async fn test_missing_and_directory_are_not_found() {
        let (responder, root, _temp_dir) = create_responder();
        let missing = root.resolve(&["pypi", "nope", "index.json"]).unwrap();
        let err = responder
            .serve(&HeaderMap::new(), &missing, "application/json", false)
            .await
            .unwrap_err();
        assert!(matches!(err, CacheError::NotFound { .. }));

        let dir = root.resolve(&["pypi"]).unwrap();
        std::fs::create_dir_all(&dir).unwrap();
        let err = responder
            .serve(&HeaderMap::new(), &dir, "application/json", false)
            .await
            .unwrap_err();
        assert!(matches!(err, CacheError::NotFound { .. }));
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_symlink_out_of_root_not_served() {
        let (responder, root, temp_dir) = create_responder();
        let secret = temp_dir.path().join("secret.txt");
        std::fs::write(&secret, b"secret").unwrap();
        let link = root.path().join("link.txt");
        std::os::unix::fs::symlink(&secret, &link).unwrap();

        let err = responder
            .serve(&HeaderMap::new(), &link, "text/plain", false)
            .await
            .unwrap_err();
        assert!(matches!(err, CacheError::NotFound { .. }));
    }
}
