//! In-memory backend cache with a freshness window
//!
//! Caches host-to-backend resolutions so the resolution API is called at most
//! once per freshness window for each virtual host. Stale entries are not
//! swept; they are superseded on the next successful resolution.

use std::collections::HashMap;
use std::sync::RwLock;
use std::time::Duration;

use hostgate_shared::CacheFamily;
use tokio::time::Instant;
use url::Url;

/// Default freshness window (1 minute)
pub const DEFAULT_FRESHNESS: Duration = Duration::from_secs(60);

/// A resolved backend and when it was resolved
#[derive(Clone)]
struct ResolvedBackend {
    address: Url,
    resolved_at: Instant,
}

impl ResolvedBackend {
    fn new(address: Url) -> Self {
        Self {
            address,
            resolved_at: Instant::now(),
        }
    }

    fn is_fresh(&self, window: Duration) -> bool {
        self.resolved_at.elapsed() < window
    }
}

/// Thread-safe backend cache, one map per cache family
pub struct BackendCache {
    /// Maps normalized host -> backend for app and community hosts
    apps: RwLock<HashMap<String, ResolvedBackend>>,
    /// Maps normalized host -> backend for function hosts
    functions: RwLock<HashMap<String, ResolvedBackend>>,
    freshness: Duration,
}

impl Default for BackendCache {
    fn default() -> Self {
        Self::new()
    }
}

impl BackendCache {
    /// Create a new cache with the default freshness window
    pub fn new() -> Self {
        Self::with_freshness(DEFAULT_FRESHNESS)
    }

    /// Create a new cache with a custom freshness window
    pub fn with_freshness(freshness: Duration) -> Self {
        Self {
            apps: RwLock::new(HashMap::new()),
            functions: RwLock::new(HashMap::new()),
            freshness,
        }
    }

    fn map(&self, family: CacheFamily) -> &RwLock<HashMap<String, ResolvedBackend>> {
        match family {
            CacheFamily::App => &self.apps,
            CacheFamily::Function => &self.functions,
        }
    }

    /// Get the backend for a host if it was resolved within the freshness window
    /// Returns None on a miss or when the entry is stale
    pub fn lookup(&self, family: CacheFamily, host: &str) -> Option<Url> {
        let map = self.map(family).read().ok()?;
        let entry = map.get(host)?;

        if entry.is_fresh(self.freshness) {
            Some(entry.address.clone())
        } else {
            None
        }
    }

    /// Cache a host -> backend mapping, replacing any previous entry
    pub fn store(&self, family: CacheFamily, host: &str, address: Url) {
        if let Ok(mut map) = self.map(family).write() {
            map.insert(host.to_string(), ResolvedBackend::new(address));
        }
    }

    /// Get cache statistics for one family
    pub fn stats(&self, family: CacheFamily) -> CacheStats {
        if let Ok(map) = self.map(family).read() {
            let total = map.len();
            let fresh = map.values().filter(|e| e.is_fresh(self.freshness)).count();
            CacheStats {
                total_entries: total,
                fresh_entries: fresh,
                stale_entries: total - fresh,
            }
        } else {
            CacheStats::default()
        }
    }

    pub fn freshness(&self) -> Duration {
        self.freshness
    }
}

/// Cache statistics
#[derive(Default, Debug, PartialEq, Eq)]
pub struct CacheStats {
    pub total_entries: usize,
    pub fresh_entries: usize,
    pub stale_entries: usize,
}
