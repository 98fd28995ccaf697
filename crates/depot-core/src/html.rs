//! Rewrites upstream links in PyPI simple-index pages to proxy-relative links.
//!
//! Runs once when a page is fetched; the rewritten document is what gets
//! cached.

use html5ever::serialize::{serialize, SerializeOpts};
use html5ever::tendril::TendrilSink;
use html5ever::{parse_document, ParseOpts};
use markup5ever_rcdom::{Handle, NodeData, RcDom, SerializableHandle};
use url::Url;

use crate::error::{CacheError, CacheResult};

/// Link rewriting rules for one PyPI upstream.
#[derive(Debug, Clone)]
pub struct LinkRewriter {
    base: String,
    registry_host: String,
    files_host: String,
}

impl LinkRewriter {
    /// `base` is the proxy prefix (e.g. `/pypi`); hosts are taken from the
    /// configured registry and file-distribution URLs.
    pub fn new(base: &str, registry_url: &str, files_url: &str) -> CacheResult<Self> {
        Ok(Self {
            base: base.trim_end_matches('/').to_string(),
            registry_host: host_of(registry_url)?,
            files_host: host_of(files_url)?,
        })
    }

    /// Parse, rewrite every `<a href>`, and serialize.
    pub fn rewrite_document(&self, html: &[u8]) -> CacheResult<Vec<u8>> {
        let html = std::str::from_utf8(html).map_err(|e| CacheError::InvalidResponse {
            message: format!("index page is not UTF-8: {}", e),
        })?;

        let dom = parse_document(RcDom::default(), ParseOpts::default()).one(html);

        let mut stack: Vec<Handle> = vec![dom.document.clone()];
        while let Some(node) = stack.pop() {
            if let NodeData::Element { name, attrs, .. } = &node.data {
                if &*name.local == "a" {
                    for attr in attrs.borrow_mut().iter_mut() {
                        if &*attr.name.local == "href" {
                            let rewritten = self.rewrite_href(&attr.value);
                            attr.value = rewritten.as_str().into();
                        }
                    }
                }
            }
            stack.extend(node.children.borrow().iter().cloned());
        }

        let mut out = Vec::with_capacity(html.len());
        let document: SerializableHandle = dom.document.clone().into();
        serialize(&mut out, &document, SerializeOpts::default()).map_err(|e| {
            CacheError::InvalidResponse {
                message: format!("failed to serialize index page: {}", e),
            }
        })?;
        Ok(out)
    }

    /// Rewrite one hyperlink; links that match no rule are returned unchanged.
    pub fn rewrite_href(&self, href: &str) -> String {
        match Url::parse(href) {
            Ok(url) if matches!(url.scheme(), "http" | "https") => self
                .rewrite_absolute(&url)
                .unwrap_or_else(|| href.to_string()),
            Ok(_) => href.to_string(),
            Err(_) => self.rewrite_relative(href),
        }
    }

    fn rewrite_absolute(&self, url: &Url) -> Option<String> {
        let host = url.host_str().unwrap_or_default().to_ascii_lowercase();
        let path = url.path();

        let rewritten = if host.ends_with(&self.files_host) && path.contains("/packages/") {
            let suffix = path.split_once("/packages/").map(|(_, s)| s).unwrap_or_default();
            format!("{}/packages/{}", self.base, suffix)
        } else if host.ends_with(&self.registry_host) {
            format!("{}/{}", self.base, path.trim_start_matches('/'))
        } else {
            return None;
        };

        Some(with_query_and_fragment(rewritten, url.query(), url.fragment()))
    }

    fn rewrite_relative(&self, href: &str) -> String {
        let (rest, fragment) = match href.split_once('#') {
            Some((rest, fragment)) => (rest, Some(fragment)),
            None => (href, None),
        };
        let (path, query) = match rest.split_once('?') {
            Some((path, query)) => (path, Some(query)),
            None => (rest, None),
        };

        let rel = path.trim_start_matches('/');
        let rewritten = if let Some(suffix) = rel.strip_prefix("packages/") {
            format!("{}/packages/{}", self.base, suffix)
        } else if rel.starts_with("pypi/") {
            format!("{}/{}", self.base, rel)
        } else {
            return href.to_string();
        };

        with_query_and_fragment(rewritten, query, fragment)
    }
}

fn with_query_and_fragment(mut href: String, query: Option<&str>, fragment: Option<&str>) -> String {
    if let Some(query) = query.filter(|q| !q.is_empty()) {
        href.push('?');
        href.push_str(query);
    }
    if let Some(fragment) = fragment.filter(|f| !f.is_empty()) {
        href.push('#');
        href.push_str(fragment);
    }
    href
}

fn host_of(url: &str) -> CacheResult<String> {
    let parsed = Url::parse(url).map_err(|e| CacheError::InvalidInput {
        message: format!("invalid upstream URL {}: {}", url, e),
    })?;
    parsed
        .host_str()
        .map(|h| h.to_ascii_lowercase())
        .ok_or_else(|| CacheError::InvalidInput {
            message: format!("upstream URL has no host: {}", url),
        })
}
