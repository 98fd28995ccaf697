//! Staleness policy: mtime-based revalidation decisions.
//!
//! The filesystem is the only metadata store; an entry's age is
//! `now - mtime`. All stat-based freshness decisions go through this module.

use std::io;
use std::path::Path;
use std::time::{Duration, SystemTime};

use tracing::warn;

/// Content class of a cached resource, used to pick its TTL.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ContentKind {
    /// Index pages and registry JSON documents.
    MutableMetadata,
    /// Published packages; never change once released.
    ImmutableArtifact,
    /// Security-advisory bulk responses.
    VolatileMetadata,
    /// Snapshot/pre-release artifacts that are republished in place.
    SnapshotArtifact,
}

impl ContentKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::MutableMetadata => "mutable-metadata",
            Self::ImmutableArtifact => "immutable-artifact",
            Self::VolatileMetadata => "volatile-metadata",
            Self::SnapshotArtifact => "snapshot-artifact",
        }
    }
}

impl std::fmt::Display for ContentKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// State of a cache entry relative to its TTL.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Freshness {
    /// No entry on disk.
    Missing,
    /// Entry exists and is within its TTL (or never expires).
    Fresh,
    /// Entry exists but is older than its TTL.
    Stale,
    /// Entry could not be stat'ed for a reason other than absence.
    Unreadable,
}

impl Freshness {
    /// Whether an upstream revalidation is required.
    pub fn needs_fetch(&self) -> bool {
        !matches!(self, Self::Fresh)
    }
}

/// Convert a TTL in hours into a duration; `None` for `0` (never stale).
pub fn ttl_duration(ttl_hours: u64) -> Option<Duration> {
    if ttl_hours == 0 {
        None
    } else {
        Some(Duration::from_secs(ttl_hours.saturating_mul(3600)))
    }
}

/// Classify a path against `ttl_hours` at the given instant.
///
/// A stat failure other than `NotFound` yields [`Freshness::Unreadable`],
/// which callers treat as stale: a refetch is preferred over serving an
/// entry whose state is unknown.
pub fn freshness_at(path: &Path, ttl_hours: u64, now: SystemTime) -> Freshness {
    let modified = match std::fs::metadata(path).and_then(|m| m.modified()) {
        Ok(modified) => modified,
        Err(e) if e.kind() == io::ErrorKind::NotFound => return Freshness::Missing,
        Err(e) => {
            warn!(path = %path.display(), error = %e, "cache entry unreadable, forcing refetch");
            return Freshness::Unreadable;
        }
    };

    let Some(ttl) = ttl_duration(ttl_hours) else {
        return Freshness::Fresh;
    };

    // An mtime in the future counts as age zero.
    let age = now.duration_since(modified).unwrap_or(Duration::ZERO);
    if age > ttl {
        Freshness::Stale
    } else {
        Freshness::Fresh
    }
}

/// Classify a path against `ttl_hours` now.
pub fn freshness(path: &Path, ttl_hours: u64) -> Freshness {
    freshness_at(path, ttl_hours, SystemTime::now())
}

/// Whether the entry must be revalidated against upstream.
pub fn is_stale(path: &Path, ttl_hours: u64) -> bool {
    freshness(path, ttl_hours).needs_fetch()
}
