use std::collections::HashMap;
use std::path::Path;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use std::time::Instant;

use serde::Deserialize;
use serde::Serialize;
use tokio::sync::RwLock;

/// C10: resolves opaque upstream ids (users, tags) to display names.
/// Lookups never fail — an unknown id resolves to itself, and the miss is
/// recorded so a later refresh can pick it up. Correctness of the rest of
/// the system never depends on this cache (`spec.md` §4.10): it is a
/// beautifier only.
pub struct IdentityCache {
    inner: RwLock<HashMap<String, CacheEntry>>,
    ttl: Duration,
    snapshot_path: Option<PathBuf>,
}

#[derive(Clone)]
struct CacheEntry {
    name: String,
    refreshed_at: Instant,
}

#[derive(Serialize, Deserialize)]
struct Snapshot {
    entries: HashMap<String, String>,
}

impl IdentityCache {
    pub fn new(ttl: Duration, snapshot_path: Option<PathBuf>) -> Self {
        let mut cache = Self {
            inner: RwLock::new(HashMap::new()),
            ttl,
            snapshot_path,
        };
        cache.load_snapshot();
        cache
    }

    fn load_snapshot(&mut self) {
        let Some(path) = &self.snapshot_path else { return };
        let Ok(contents) = std::fs::read_to_string(path) else { return };
        let Ok(snapshot) = serde_json::from_str::<Snapshot>(&contents) else { return };
        let now = Instant::now();
        let map = snapshot
            .entries
            .into_iter()
            .map(|(id, name)| {
                (
                    id,
                    CacheEntry {
                        name,
                        // snapshot entries are considered immediately stale so
                        // the next lookup schedules a refresh, but still
                        // usable in the meantime
                        refreshed_at: now - self.ttl,
                    },
                )
            })
            .collect();
        self.inner = RwLock::new(map);
    }

    async fn persist_snapshot(&self) {
        let Some(path) = &self.snapshot_path else { return };
        let entries = self
            .inner
            .read()
            .await
            .iter()
            .map(|(id, entry)| (id.clone(), entry.name.clone()))
            .collect();
        let snapshot = Snapshot { entries };
        if let Ok(json) = serde_json::to_string_pretty(&snapshot) {
            let _ = tokio::fs::write(path, json).await;
        }
    }

    /// Resolve `id` to a display name. Returns `id` itself on a cache miss
    /// or stale entry, and `needs_refresh` tells the caller whether to queue
    /// a background lookup.
    pub async fn resolve(&self, id: &str) -> String {
        let cache = self.inner.read().await;
        match cache.get(id) {
            Some(entry) if entry.refreshed_at.elapsed() < self.ttl => entry.name.clone(),
            _ => id.to_string(),
        }
    }

    pub async fn needs_refresh(&self, id: &str) -> bool {
        let cache = self.inner.read().await;
        match cache.get(id) {
            Some(entry) => entry.refreshed_at.elapsed() >= self.ttl,
            None => true,
        }
    }

    pub async fn put(&self, id: &str, name: &str) {
        let mut cache = self.inner.write().await;
        cache.insert(
            id.to_string(),
            CacheEntry {
                name: name.to_string(),
                refreshed_at: Instant::now(),
            },
        );
        drop(cache);
        self.persist_snapshot().await;
    }
}

pub type SharedIdentityCache = Arc<IdentityCache>;

pub fn ensure_state_dir(dir: &Path) -> std::io::Result<()> { std::fs::create_dir_all(dir) }
