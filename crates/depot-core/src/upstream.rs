//! Upstream HTTP client: request issue, status mapping, transport retries.
//!
//! This is the only place that interprets upstream status codes. Error
//! statuses are never retried; failures to connect or to receive response
//! headers are retried with jittered exponential backoff up to `max_retries`.
//! Once a body starts streaming it is not retried.

use std::time::Duration;

use bytes::Bytes;
use reqwest::header::{HeaderMap, HeaderValue, USER_AGENT};
use tracing::{debug, warn};

use crate::config::ProxyConfig;
use crate::error::{CacheError, CacheResult};

const USER_AGENT_VALUE: &str = concat!("depot/", env!("CARGO_PKG_VERSION"));

/// HTTP method of an upstream fill.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FetchMethod {
    Get,
    Post,
}

/// One upstream call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FetchRequest {
    pub method: FetchMethod,
    pub url: String,
    pub body: Option<Vec<u8>>,
}

impl FetchRequest {
    pub fn get(url: impl Into<String>) -> Self {
        Self {
            method: FetchMethod::Get,
            url: url.into(),
            body: None,
        }
    }

    pub fn post(url: impl Into<String>, body: Vec<u8>) -> Self {
        Self {
            method: FetchMethod::Post,
            url: url.into(),
            body: Some(body),
        }
    }
}

/// Shared upstream client (cheap to clone).
#[derive(Debug, Clone)]
pub struct UpstreamClient {
    client: reqwest::Client,
    max_retries: u32,
}

impl UpstreamClient {
    pub fn new(config: &ProxyConfig) -> CacheResult<Self> {
        let mut default_headers = HeaderMap::new();
        default_headers.insert(USER_AGENT, HeaderValue::from_static(USER_AGENT_VALUE));

        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .default_headers(default_headers)
            .build()
            .map_err(|e| CacheError::UpstreamUnavailable {
                message: format!("failed to create HTTP client: {}", e),
            })?;

        Ok(Self {
            client,
            max_retries: config.max_retries,
        })
    }

    /// Issue the request and return the success body unread.
    pub async fn send(&self, request: &FetchRequest) -> CacheResult<UpstreamBody> {
        use rand::Rng;

        let mut retries = 0;

        loop {
            match self.send_once(request).await {
                Ok(body) => return Ok(body),
                Err(e) if e.is_retryable() && retries < self.max_retries => {
                    retries += 1;

                    let base_backoff = Duration::from_secs(1 << retries.min(5));
                    let base_backoff = base_backoff.min(Duration::from_secs(30));
                    let jittered_ms =
                        rand::thread_rng().gen_range(0..=base_backoff.as_millis() as u64);
                    let backoff = Duration::from_millis(jittered_ms.max(10));

                    warn!(
                        url = %request.url,
                        error = %e,
                        retry = retries,
                        max_retries = self.max_retries,
                        backoff_ms = backoff.as_millis(),
                        "retrying upstream request"
                    );

                    tokio::time::sleep(backoff).await;
                }
                Err(e) => return Err(e),
            }
        }
    }

    async fn send_once(&self, request: &FetchRequest) -> CacheResult<UpstreamBody> {
        debug!(url = %request.url, method = ?request.method, "upstream request");

        let builder = match request.method {
            FetchMethod::Get => self.client.get(&request.url),
            FetchMethod::Post => {
                let builder = self
                    .client
                    .post(&request.url)
                    .header(reqwest::header::CONTENT_TYPE, "application/json");
                match &request.body {
                    Some(body) => builder.body(body.clone()),
                    None => builder,
                }
            }
        };

        let response = builder.send().await?;
        let status = response.status();

        if !status.is_success() {
            return Err(CacheError::Upstream {
                status: status.as_u16(),
                url: request.url.clone(),
            });
        }

        Ok(UpstreamBody { response })
    }
}

/// Body of a successful upstream response, read on demand.
#[derive(Debug)]
pub struct UpstreamBody {
    response: reqwest::Response,
}

impl UpstreamBody {
    /// Next chunk of the body, `None` once it is exhausted.
    pub async fn chunk(&mut self) -> CacheResult<Option<Bytes>> {
        Ok(self.response.chunk().await?)
    }

    /// Read the rest of the body into memory.
    pub async fn bytes(self) -> CacheResult<Vec<u8>> {
        Ok(self.response.bytes().await?.to_vec())
    }
}
