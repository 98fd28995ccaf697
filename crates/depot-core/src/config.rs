//! Proxy configuration.
//!
//! Built once at startup and shared read-only with every adapter and the
//! store. Nothing below this module reads the environment.

use std::path::PathBuf;

use serde::{Deserialize, Serialize};

/// Per-content-kind revalidation TTLs, in hours. `0` means never revalidate.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct TtlConfig {
    #[serde(default = "default_metadata_ttl")]
    pub pypi_metadata_hours: u64,

    #[serde(default = "default_metadata_ttl")]
    pub npm_metadata_hours: u64,

    /// Bulk security-advisory responses.
    #[serde(default = "default_security_ttl")]
    pub npm_security_hours: u64,

    #[serde(default = "default_metadata_ttl")]
    pub maven_metadata_hours: u64,

    /// Files under a `-SNAPSHOT` version directory.
    #[serde(default = "default_snapshot_ttl")]
    pub maven_snapshot_hours: u64,
}

impl Default for TtlConfig {
    fn default() -> Self {
        Self {
            pypi_metadata_hours: default_metadata_ttl(),
            npm_metadata_hours: default_metadata_ttl(),
            npm_security_hours: default_security_ttl(),
            maven_metadata_hours: default_metadata_ttl(),
            maven_snapshot_hours: default_snapshot_ttl(),
        }
    }
}

/// Proxy configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProxyConfig {
    /// Cache root directory.
    #[serde(default = "default_cache_dir")]
    pub cache_dir: PathBuf,

    /// PyPI registry base URL (simple index and JSON API).
    #[serde(default = "default_pypi_url")]
    pub pypi_url: String,

    /// PyPI file distribution base URL.
    #[serde(default = "default_pypi_files_url")]
    pub pypi_files_url: String,

    /// npm registry base URL.
    #[serde(default = "default_npm_url")]
    pub npm_url: String,

    /// Maven repository base URL.
    #[serde(default = "default_maven_url")]
    pub maven_url: String,

    /// Path prefix the proxy serves PyPI under; rewritten index links point here.
    #[serde(default = "default_pypi_proxy_base")]
    pub pypi_proxy_base: String,

    #[serde(default)]
    pub ttl: TtlConfig,

    /// Upstream request timeout in seconds.
    #[serde(default = "default_timeout")]
    pub timeout_secs: u64,

    /// Maximum retries for upstream transport failures.
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
}

fn default_cache_dir() -> PathBuf {
    PathBuf::from("cache")
}

fn default_pypi_url() -> String {
    "https://pypi.org".to_string()
}

fn default_pypi_files_url() -> String {
    "https://files.pythonhosted.org".to_string()
}

fn default_npm_url() -> String {
    "https://registry.npmjs.org".to_string()
}

fn default_maven_url() -> String {
    "https://repo1.maven.org/maven2".to_string()
}

fn default_pypi_proxy_base() -> String {
    "/pypi".to_string()
}

fn default_metadata_ttl() -> u64 {
    24
}

fn default_security_ttl() -> u64 {
    6
}

fn default_snapshot_ttl() -> u64 {
    1
}

fn default_timeout() -> u64 {
    30
}

fn default_max_retries() -> u32 {
    3
}

impl Default for ProxyConfig {
    fn default() -> Self {
        Self {
            cache_dir: default_cache_dir(),
            pypi_url: default_pypi_url(),
            pypi_files_url: default_pypi_files_url(),
            npm_url: default_npm_url(),
            maven_url: default_maven_url(),
            pypi_proxy_base: default_pypi_proxy_base(),
            ttl: TtlConfig::default(),
            timeout_secs: default_timeout(),
            max_retries: default_max_retries(),
        }
    }
}

fn env_string(name: &str, default: impl FnOnce() -> String) -> String {
    std::env::var(name)
        .ok()
        .filter(|v| !v.trim().is_empty())
        .unwrap_or_else(default)
}

fn env_parsed<T: std::str::FromStr>(name: &str, default: T) -> T {
    std::env::var(name)
        .ok()
        .and_then(|v| v.trim().parse().ok())
        .unwrap_or(default)
}

impl ProxyConfig {
    /// Create config from environment variables.
    ///
    /// | Variable | Description |
    /// |----------|-------------|
    /// | `NEXUS_CACHE_DIR` | Cache root (default `cache`) |
    /// | `PYPI_REGISTRY` | PyPI base URL |
    /// | `PYPI_FILES_URL` | PyPI file host base URL |
    /// | `NPM_REGISTRY` | npm registry base URL |
    /// | `MAVEN_CENTRAL` | Maven repository base URL |
    /// | `PROXY_PYPI_BASE` | Prefix for rewritten PyPI links |
    /// | `PYPI_METADATA_TTL_HOURS` | PyPI index/JSON TTL |
    /// | `NPM_METADATA_TTL_HOURS` | npm document TTL |
    /// | `NPM_SECURITY_TTL_HOURS` | npm bulk advisory TTL |
    /// | `MAVEN_METADATA_TTL_HOURS` | Maven metadata TTL |
    /// | `MAVEN_SNAPSHOT_TTL_HOURS` | Maven snapshot TTL |
    /// | `REQUEST_TIMEOUT_SECONDS` | Upstream timeout |
    /// | `MAX_RETRIES` | Upstream transport retries |
    pub fn from_env() -> Self {
        let defaults = TtlConfig::default();
        Self {
            cache_dir: std::env::var_os("NEXUS_CACHE_DIR")
                .filter(|v| !v.is_empty())
                .map(PathBuf::from)
                .unwrap_or_else(default_cache_dir),
            pypi_url: env_string("PYPI_REGISTRY", default_pypi_url),
            pypi_files_url: env_string("PYPI_FILES_URL", default_pypi_files_url),
            npm_url: env_string("NPM_REGISTRY", default_npm_url),
            maven_url: env_string("MAVEN_CENTRAL", default_maven_url),
            pypi_proxy_base: env_string("PROXY_PYPI_BASE", default_pypi_proxy_base),
            ttl: TtlConfig {
                pypi_metadata_hours: env_parsed(
                    "PYPI_METADATA_TTL_HOURS",
                    defaults.pypi_metadata_hours,
                ),
                npm_metadata_hours: env_parsed("NPM_METADATA_TTL_HOURS", defaults.npm_metadata_hours),
                npm_security_hours: env_parsed("NPM_SECURITY_TTL_HOURS", defaults.npm_security_hours),
                maven_metadata_hours: env_parsed(
                    "MAVEN_METADATA_TTL_HOURS",
                    defaults.maven_metadata_hours,
                ),
                maven_snapshot_hours: env_parsed(
                    "MAVEN_SNAPSHOT_TTL_HOURS",
                    defaults.maven_snapshot_hours,
                ),
            },
            timeout_secs: env_parsed("REQUEST_TIMEOUT_SECONDS", default_timeout()),
            max_retries: env_parsed("MAX_RETRIES", default_max_retries()),
        }
    }

    /// Set the cache root.
    pub fn with_cache_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.cache_dir = dir.into();
        self
    }

    /// Point every registry at one base URL (each keeps its own path layout).
    pub fn with_upstream(mut self, base: impl Into<String>) -> Self {
        let base = base.into();
        let base = base.trim_end_matches('/');
        self.pypi_url = base.to_string();
        self.pypi_files_url = base.to_string();
        self.npm_url = base.to_string();
        self.maven_url = format!("{}/maven2", base);
        self
    }

    /// Set the PyPI base URL.
    pub fn with_pypi_url(mut self, url: impl Into<String>) -> Self {
        self.pypi_url = url.into();
        self
    }

    /// Set the PyPI file host base URL.
    pub fn with_pypi_files_url(mut self, url: impl Into<String>) -> Self {
        self.pypi_files_url = url.into();
        self
    }

    /// Set the npm registry base URL.
    pub fn with_npm_url(mut self, url: impl Into<String>) -> Self {
        self.npm_url = url.into();
        self
    }

    /// Set the Maven repository base URL.
    pub fn with_maven_url(mut self, url: impl Into<String>) -> Self {
        self.maven_url = url.into();
        self
    }

    /// Replace the TTL table.
    pub fn with_ttl(mut self, ttl: TtlConfig) -> Self {
        self.ttl = ttl;
        self
    }

    /// Set the upstream timeout.
    pub fn with_timeout_secs(mut self, secs: u64) -> Self {
        self.timeout_secs = secs;
        self
    }

    /// Set the retry budget for upstream transport failures.
    pub fn with_max_retries(mut self, retries: u32) -> Self {
        self.max_retries = retries;
        self
    }
}
