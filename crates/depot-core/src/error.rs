//! Error types for the cache engine.

/// Cache engine errors.
///
/// Input and path-safety errors are raised before any filesystem or network
/// access and are never retried.
#[derive(Debug, thiserror::Error)]
pub enum CacheError {
    /// Malformed package name, version, filename or repository path.
    #[error("invalid input: {message}")]
    InvalidInput { message: String },

    /// A path segment failed validation (traversal, absolute, NUL, backslash).
    #[error("invalid path segment {segment:?}: {reason}")]
    InvalidPath { segment: String, reason: String },

    /// The resolved path leaves the cache root after canonicalization.
    #[error("path escapes cache root: {path}")]
    PathEscape { path: String },

    /// A write destination is not inside the cache root.
    #[error("refusing to write outside cache root: {path}")]
    UnsafeDestination { path: String },

    /// Upstream answered with a non-success status.
    #[error("upstream returned HTTP {status} for {url}")]
    Upstream { status: u16, url: String },

    /// Upstream could not be reached (connect failure, timeout, broken body).
    #[error("upstream unavailable: {message}")]
    UpstreamUnavailable { message: String },

    /// No cached content exists and none could be produced.
    #[error("not found: {path}")]
    NotFound { path: String },

    /// Upstream body could not be interpreted (e.g. invalid JSON, undecodable HTML).
    #[error("invalid upstream response: {message}")]
    InvalidResponse { message: String },

    /// Local filesystem failure.
    #[error("cache io error: {message}")]
    Io { message: String },
}

impl CacheError {
    /// HTTP status code a client should see for this error.
    pub fn status_code(&self) -> u16 {
        match self {
            // Rejected before any I/O
            Self::InvalidInput { .. } => 400,
            Self::InvalidPath { .. } => 400,
            Self::PathEscape { .. } => 400,
            Self::UnsafeDestination { .. } => 400,

            // Upstream client errors are meaningful to the caller, server errors are not
            Self::Upstream { status, .. } if (400..500).contains(status) => *status,
            Self::Upstream { .. } => 502,
            Self::InvalidResponse { .. } => 502,
            Self::UpstreamUnavailable { .. } => 503,

            Self::NotFound { .. } => 404,
            Self::Io { .. } => 500,
        }
    }

    /// Whether the error indicates an attempt to leave the cache root.
    pub fn is_security_violation(&self) -> bool {
        matches!(self, Self::PathEscape { .. } | Self::UnsafeDestination { .. })
    }

    /// Whether a stale cached copy may be served in place of this error.
    pub fn is_soft_failure(&self) -> bool {
        match self {
            Self::UpstreamUnavailable { .. } | Self::InvalidResponse { .. } => true,
            Self::Upstream { status, .. } => *status >= 500,
            _ => false,
        }
    }

    /// Whether the upstream client should retry the request.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::UpstreamUnavailable { .. })
    }

    pub(crate) fn invalid_input(message: impl Into<String>) -> Self {
        Self::InvalidInput {
            message: message.into(),
        }
    }

    pub(crate) fn io(context: &str, err: std::io::Error) -> Self {
        Self::Io {
            message: format!("{}: {}", context, err),
        }
    }
}

impl From<reqwest::Error> for CacheError {
    fn from(err: reqwest::Error) -> Self {
        if let Some(status) = err.status() {
            return Self::Upstream {
                status: status.as_u16(),
                url: err.url().map(|u| u.to_string()).unwrap_or_default(),
            };
        }
        Self::UpstreamUnavailable {
            message: err.to_string(),
        }
    }
}

/// Result type for cache engine operations.
pub type CacheResult<T> = Result<T, CacheError>;
