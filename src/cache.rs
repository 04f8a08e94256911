//! Refreshing cache for hub data and rankings
//!
//! Every entry has two ages that matter:
//! - past `stale_after` it is still served, and a refresh job for its key is
//!   queued for the background worker
//! - past `max_age` it is dropped and the caller has to fetch synchronously
//!
//! The map is mirrored to a JSON snapshot so a restart begins warm. Snapshot
//! writes are debounced and happen off the request path.

use std::collections::HashMap;
use std::env;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, MutexGuard, Weak};
use std::time::Duration;

use anyhow::{bail, Context, Result};
use chrono::{DateTime, Utc};
use serde::{de::DeserializeOwned, Deserialize, Serialize};
use serde_json::Value;
use tokio::sync::mpsc::{self, error::TrySendError};
use tokio::task::JoinHandle;

const APP_NAME: &str = env!("CARGO_PKG_NAME");

/// Soft and hard expiry for cache entries
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CachePolicy {
    max_age: Duration,
    stale_after: Duration,
}

impl CachePolicy {
    pub fn new(max_age: Duration, stale_after: Duration) -> Result<Self> {
        if stale_after >= max_age {
            bail!(
                "cache stale_after ({}) must be shorter than max_age ({})",
                humantime::format_duration(stale_after),
                humantime::format_duration(max_age)
            );
        }
        Ok(Self {
            max_age,
            stale_after,
        })
    }

    pub fn max_age(&self) -> Duration {
        self.max_age
    }

    pub fn stale_after(&self) -> Duration {
        self.stale_after
    }

    pub fn freshness(&self, age: Duration) -> Freshness {
        if age >= self.max_age {
            Freshness::Expired
        } else if age >= self.stale_after {
            Freshness::Stale
        } else {
            Freshness::Fresh
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Freshness {
    Fresh,
    Stale,
    Expired,
}

impl std::fmt::Display for Freshness {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let text = match self {
            Self::Fresh => "fresh",
            Self::Stale => "stale",
            Self::Expired => "expired",
        };
        f.write_str(text)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CacheEntry {
    pub value: Value,
    pub stored_at: DateTime<Utc>,
}

impl CacheEntry {
    /// `None` when stored in the future, i.e. the clock went backwards
    fn age(&self, now: DateTime<Utc>) -> Option<Duration> {
        (now - self.stored_at).to_std().ok()
    }

    /// An entry from the future has an unknown age and counts as expired
    fn freshness(&self, policy: &CachePolicy, now: DateTime<Utc>) -> Freshness {
        self.age(now)
            .map_or(Freshness::Expired, |age| policy.freshness(age))
    }
}

/// On-disk form of the cache
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CacheSnapshot {
    pub saved_at: DateTime<Utc>,
    /// Hub this data came from; a snapshot for another hub is ignored
    pub server_url: String,
    pub entries: HashMap<String, CacheEntry>,
}

impl CacheSnapshot {
    pub fn read(path: &Path) -> Result<Self> {
        let content = fs::read_to_string(path)
            .with_context(|| format!("reading cache snapshot {}", path.display()))?;
        serde_json::from_str(&content)
            .with_context(|| format!("parsing cache snapshot {}", path.display()))
    }

    fn write(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)
                .with_context(|| format!("creating cache directory {}", parent.display()))?;
        }

        let content = serde_json::to_string(self)?;
        let tmp = path.with_extension("json.tmp");
        fs::write(&tmp, content)
            .with_context(|| format!("writing cache snapshot to {}", tmp.display()))?;
        fs::rename(&tmp, path)
            .with_context(|| format!("replacing cache snapshot {}", path.display()))
    }
}

/// Age and freshness of one cached key
#[derive(Debug, Clone, Serialize)]
pub struct CacheKeyStatus {
    pub key: String,
    pub age_secs: u64,
    pub freshness: Freshness,
}

pub fn describe_entries(
    entries: &HashMap<String, CacheEntry>,
    policy: &CachePolicy,
    now: DateTime<Utc>,
) -> Vec<CacheKeyStatus> {
    let mut status: Vec<CacheKeyStatus> = entries
        .iter()
        .map(|(key, entry)| CacheKeyStatus {
            key: key.clone(),
            age_secs: entry.age(now).unwrap_or_default().as_secs(),
            freshness: entry.freshness(policy, now),
        })
        .collect();
    status.sort_by(|a, b| a.key.cmp(&b.key));
    status
}

#[derive(Debug, Clone)]
struct SnapshotTarget {
    path: PathBuf,
    server_url: String,
}

/// Process-wide cache shared between request handlers and background tasks
pub struct RefreshingCache {
    entries: Mutex<HashMap<String, CacheEntry>>,
    policy: CachePolicy,
    snapshot: Option<SnapshotTarget>,
    refresh_tx: mpsc::Sender<String>,
    refresh_rx: Mutex<Option<mpsc::Receiver<String>>>,
    persist_tx: mpsc::Sender<()>,
    persist_rx: Mutex<Option<mpsc::Receiver<()>>>,
}

impl RefreshingCache {
    /// An empty, memory-only cache. `refresh_queue` bounds pending refresh jobs.
    pub fn new(policy: CachePolicy, refresh_queue: usize) -> Self {
        let (refresh_tx, refresh_rx) = mpsc::channel(refresh_queue.max(1));
        // One pending signal is enough; further sets coalesce into it
        let (persist_tx, persist_rx) = mpsc::channel(1);

        Self {
            entries: Mutex::new(HashMap::new()),
            policy,
            snapshot: None,
            refresh_tx,
            refresh_rx: Mutex::new(Some(refresh_rx)),
            persist_tx,
            persist_rx: Mutex::new(Some(persist_rx)),
        }
    }

    /// Mirror the cache to `path`, first loading whatever is already there.
    ///
    /// A missing, unreadable or foreign snapshot leaves the cache cold.
    pub fn with_snapshot(mut self, path: PathBuf, server_url: &str) -> Self {
        if path.exists() {
            match CacheSnapshot::read(&path) {
                Ok(snapshot) if snapshot.server_url != server_url => {
                    log::info!(
                        "Ignoring cache snapshot for {} (now using {})",
                        snapshot.server_url,
                        server_url
                    );
                }
                Ok(snapshot) => {
                    let now = Utc::now();
                    let entries: HashMap<String, CacheEntry> = snapshot
                        .entries
                        .into_iter()
                        .filter(|(_, entry)| {
                            entry.freshness(&self.policy, now) != Freshness::Expired
                        })
                        .collect();
                    log::info!(
                        "Rehydrated {} cache entries from {}",
                        entries.len(),
                        path.display()
                    );
                    *self.lock() = entries;
                }
                Err(err) => log::warn!("Starting with a cold cache: {err:#}"),
            }
        } else {
            log::debug!("No cache snapshot at {}", path.display());
        }

        self.snapshot = Some(SnapshotTarget {
            path,
            server_url: server_url.to_string(),
        });
        self
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<String, CacheEntry>> {
        // Entries stay consistent even if a holder panicked
        self.entries.lock().unwrap_or_else(|p| p.into_inner())
    }

    /// Cached value for `key`, or `None` if missing or past `max_age`.
    ///
    /// A stale hit still returns the value and queues one refresh job.
    pub fn get(&self, key: &str) -> Option<Value> {
        let now = Utc::now();
        let (value, freshness) = {
            let mut entries = self.lock();
            let entry = entries.get(key)?;
            let freshness = entry.freshness(&self.policy, now);
            if freshness == Freshness::Expired {
                entries.remove(key);
                log::debug!("Cache entry {key} expired");
                return None;
            }
            (entry.value.clone(), freshness)
        };

        if freshness == Freshness::Stale {
            log::debug!("Cache entry {key} is stale, scheduling refresh");
            self.request_refresh(key);
        }
        Some(value)
    }

    /// Typed [`get`](Self::get); a value of the wrong shape counts as a miss
    pub fn get_as<T: DeserializeOwned>(&self, key: &str) -> Option<T> {
        let value = self.get(key)?;
        match serde_json::from_value(value) {
            Ok(typed) => Some(typed),
            Err(err) => {
                log::warn!("Discarding malformed cache entry {key}: {err}");
                None
            }
        }
    }

    pub fn set(&self, key: &str, value: Value) {
        self.set_at(key, value, Utc::now());
    }

    pub(crate) fn set_at(&self, key: &str, value: Value, stored_at: DateTime<Utc>) {
        self.lock()
            .insert(key.to_string(), CacheEntry { value, stored_at });
        self.schedule_persist();
    }

    /// True if the key is missing or past `stale_after`
    pub fn is_stale(&self, key: &str) -> bool {
        let now = Utc::now();
        self.lock()
            .get(key)
            .map(|entry| entry.freshness(&self.policy, now) != Freshness::Fresh)
            .unwrap_or(true)
    }

    /// Remove every key containing `pattern`, returning how many went
    pub fn invalidate_matching(&self, pattern: &str) -> usize {
        let removed = {
            let mut entries = self.lock();
            let before = entries.len();
            entries.retain(|key, _| !key.contains(pattern));
            before - entries.len()
        };

        if removed > 0 {
            log::debug!("Invalidated {removed} cache entries matching {pattern:?}");
            self.schedule_persist();
        }
        removed
    }

    pub fn status(&self) -> Vec<CacheKeyStatus> {
        describe_entries(&self.lock(), &self.policy, Utc::now())
    }

    /// Queue a background refresh of `key`.
    ///
    /// When the queue is full the job is dropped; a later stale read will
    /// queue it again.
    pub fn request_refresh(&self, key: &str) {
        match self.refresh_tx.try_send(key.to_string()) {
            Ok(()) => {}
            Err(TrySendError::Full(key)) => {
                log::debug!("Refresh queue full, dropping refresh of {key}");
            }
            Err(TrySendError::Closed(key)) => {
                log::debug!("No refresh worker running, dropping refresh of {key}");
            }
        }
    }

    /// Hand out the receiving end of the refresh queue. Only the first call
    /// gets it.
    pub fn take_refresh_jobs(&self) -> Option<mpsc::Receiver<String>> {
        self.refresh_rx
            .lock()
            .unwrap_or_else(|p| p.into_inner())
            .take()
    }

    fn schedule_persist(&self) {
        if self.snapshot.is_some() {
            // Full means a write is already pending
            let _ = self.persist_tx.try_send(());
        }
    }

    /// Write the snapshot now, blocking the calling thread
    pub fn flush(&self) -> Result<()> {
        let Some(target) = &self.snapshot else {
            return Ok(());
        };

        let snapshot = CacheSnapshot {
            saved_at: Utc::now(),
            server_url: target.server_url.clone(),
            entries: self.lock().clone(),
        };
        snapshot.write(&target.path)?;
        log::debug!(
            "Saved {} cache entries to {}",
            snapshot.entries.len(),
            target.path.display()
        );
        Ok(())
    }

    /// Start the task that writes the snapshot after changes settle.
    ///
    /// The task ends once the cache is dropped.
    pub fn spawn_persister(self: &Arc<Self>, debounce: Duration) -> Option<JoinHandle<()>> {
        self.snapshot.as_ref()?;
        let mut signals = self
            .persist_rx
            .lock()
            .unwrap_or_else(|p| p.into_inner())
            .take()?;
        let cache: Weak<Self> = Arc::downgrade(self);

        Some(tokio::spawn(async move {
            while signals.recv().await.is_some() {
                tokio::time::sleep(debounce).await;
                while signals.try_recv().is_ok() {}

                let Some(cache) = cache.upgrade() else {
                    break;
                };
                match tokio::task::spawn_blocking(move || cache.flush()).await {
                    Ok(Ok(())) => {}
                    Ok(Err(err)) => log::warn!("Failed to persist cache: {err:#}"),
                    Err(err) => log::error!("Cache persist task failed: {err}"),
                }
            }
            log::debug!("Cache persister stopped");
        }))
    }
}

impl std::fmt::Debug for RefreshingCache {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RefreshingCache")
            .field("policy", &self.policy)
            .field("snapshot", &self.snapshot)
            .finish_non_exhaustive()
    }
}

/// Get the cache directory path
pub fn cache_dir() -> Result<PathBuf> {
    if let Some(dir) = env::var_os("XDG_CACHE_HOME").filter(|v| !v.is_empty()) {
        return Ok(PathBuf::from(dir).join(APP_NAME));
    }

    if let Some(mut dir) = dirs::cache_dir() {
        dir.push(APP_NAME);
        return Ok(dir);
    }

    dirs::home_dir()
        .map(|home| home.join(".cache").join(APP_NAME))
        .ok_or_else(|| anyhow::anyhow!("unable to determine cache directory"))
}

/// Delete the snapshot file, returning whether one existed
pub fn remove_snapshot(path: &Path) -> Result<bool> {
    if !path.exists() {
        return Ok(false);
    }
    fs::remove_file(path)
        .with_context(|| format!("removing cache snapshot {}", path.display()))?;
    Ok(true)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use tokio::sync::mpsc::error::TryRecvError;

    const HUB: &str = "http://localhost:8123";

    fn policy() -> CachePolicy {
        CachePolicy::new(Duration::from_secs(3600), Duration::from_secs(300)).unwrap()
    }

    fn ago(secs: i64) -> DateTime<Utc> {
        Utc::now() - chrono::Duration::seconds(secs)
    }

    #[test]
    fn test_policy_requires_stale_before_max_age() {
        assert!(CachePolicy::new(Duration::from_secs(60), Duration::from_secs(60)).is_err());
        assert!(CachePolicy::new(Duration::from_secs(60), Duration::from_secs(90)).is_err());
        assert!(CachePolicy::new(Duration::from_secs(60), Duration::from_secs(30)).is_ok());
    }

    #[test]
    fn test_policy_freshness() {
        let policy = policy();
        assert_eq!(policy.freshness(Duration::from_secs(0)), Freshness::Fresh);
        assert_eq!(policy.freshness(Duration::from_secs(300)), Freshness::Stale);
        assert_eq!(policy.freshness(Duration::from_secs(3599)), Freshness::Stale);
        assert_eq!(policy.freshness(Duration::from_secs(3600)), Freshness::Expired);
    }

    #[test]
    fn test_set_then_get() {
        let cache = RefreshingCache::new(policy(), 8);
        cache.set("areas", json!({"kitchen": "Kitchen"}));

        assert_eq!(cache.get("areas"), Some(json!({"kitchen": "Kitchen"})));
        assert!(!cache.is_stale("areas"));
        assert!(cache.get("missing").is_none());
        assert!(cache.is_stale("missing"));
    }

    #[test]
    fn test_expired_entry_is_absent_and_evicted() {
        let cache = RefreshingCache::new(policy(), 8);
        let mut jobs = cache.take_refresh_jobs().unwrap();
        cache.set_at("areas", json!({}), ago(3601));

        assert!(cache.get("areas").is_none());
        assert!(cache.status().is_empty());
        // Expiry forces a synchronous fetch, not a background one
        assert!(matches!(jobs.try_recv(), Err(TryRecvError::Empty)));
    }

    #[test]
    fn test_entry_from_the_future_is_expired() {
        let cache = RefreshingCache::new(policy(), 8);
        cache.set_at("areas", json!({}), ago(-600));

        assert!(cache.is_stale("areas"));
        assert!(cache.get("areas").is_none());
        assert!(cache.status().is_empty());
    }

    #[test]
    fn test_rehydrate_skips_entries_from_the_future() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("cache.json");

        let cache = RefreshingCache::new(policy(), 8).with_snapshot(path.clone(), HUB);
        cache.set("areas", json!({"office": "Office"}));
        cache.set_at("scripts_and_scenes", json!([]), ago(-3600));
        cache.flush().unwrap();

        let restored = RefreshingCache::new(policy(), 8).with_snapshot(path, HUB);
        let keys: Vec<String> = restored.status().into_iter().map(|s| s.key).collect();
        assert_eq!(keys, vec!["areas"]);
    }

    #[test]
    fn test_stale_get_serves_value_and_queues_one_refresh() {
        let cache = RefreshingCache::new(policy(), 8);
        let mut jobs = cache.take_refresh_jobs().unwrap();
        cache.set_at("scripts_and_scenes", json!(["old"]), ago(600));

        assert!(cache.is_stale("scripts_and_scenes"));
        assert_eq!(cache.get("scripts_and_scenes"), Some(json!(["old"])));

        assert_eq!(jobs.try_recv().unwrap(), "scripts_and_scenes");
        assert!(matches!(jobs.try_recv(), Err(TryRecvError::Empty)));
    }

    #[test]
    fn test_fresh_get_queues_nothing() {
        let cache = RefreshingCache::new(policy(), 8);
        let mut jobs = cache.take_refresh_jobs().unwrap();
        cache.set("areas", json!({}));
        cache.get("areas");
        assert!(matches!(jobs.try_recv(), Err(TryRecvError::Empty)));
    }

    #[test]
    fn test_refresh_queue_is_bounded() {
        let cache = RefreshingCache::new(policy(), 2);
        let mut jobs = cache.take_refresh_jobs().unwrap();
        cache.set_at("areas", json!({}), ago(600));

        for _ in 0..10 {
            cache.get("areas");
        }

        assert!(jobs.try_recv().is_ok());
        assert!(jobs.try_recv().is_ok());
        assert!(matches!(jobs.try_recv(), Err(TryRecvError::Empty)));
    }

    #[test]
    fn test_take_refresh_jobs_once() {
        let cache = RefreshingCache::new(policy(), 2);
        assert!(cache.take_refresh_jobs().is_some());
        assert!(cache.take_refresh_jobs().is_none());
    }

    #[test]
    fn test_invalidate_matching_only_touches_matching_keys() {
        let cache = RefreshingCache::new(policy(), 8);
        cache.set("most_used_07", json!([]));
        cache.set("most_used_08", json!([]));
        cache.set("most_used_23", json!([]));
        cache.set("areas", json!({}));
        cache.set("scripts_and_scenes", json!([]));

        assert_eq!(cache.invalidate_matching("most_used_"), 3);

        let keys: Vec<String> = cache.status().into_iter().map(|s| s.key).collect();
        assert_eq!(keys, vec!["areas", "scripts_and_scenes"]);
    }

    #[test]
    fn test_get_as_rejects_wrong_shape() {
        let cache = RefreshingCache::new(policy(), 8);
        cache.set("areas", json!("not a map"));
        let areas: Option<HashMap<String, String>> = cache.get_as("areas");
        assert!(areas.is_none());
    }

    #[test]
    fn test_flush_and_rehydrate() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("cache.json");

        let cache = RefreshingCache::new(policy(), 8).with_snapshot(path.clone(), HUB);
        cache.set("areas", json!({"office": "Office"}));
        cache.set_at("most_used_09", json!([]), ago(7200));
        cache.flush().unwrap();

        let restored = RefreshingCache::new(policy(), 8).with_snapshot(path, HUB);
        assert_eq!(restored.get("areas"), Some(json!({"office": "Office"})));
        // Already past max_age when loaded
        assert!(restored.status().iter().all(|s| s.key != "most_used_09"));
    }

    #[test]
    fn test_snapshot_for_other_hub_is_ignored() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("cache.json");

        let cache = RefreshingCache::new(policy(), 8).with_snapshot(path.clone(), HUB);
        cache.set("areas", json!({}));
        cache.flush().unwrap();

        let other = RefreshingCache::new(policy(), 8).with_snapshot(path, "http://other:8123");
        assert!(other.get("areas").is_none());
    }

    #[test]
    fn test_corrupt_snapshot_gives_cold_cache() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("cache.json");
        fs::write(&path, "{ not json").unwrap();

        let cache = RefreshingCache::new(policy(), 8).with_snapshot(path, HUB);
        assert!(cache.status().is_empty());
    }

    #[tokio::test]
    async fn test_persister_writes_after_set() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("cache.json");

        let cache = Arc::new(RefreshingCache::new(policy(), 8).with_snapshot(path.clone(), HUB));
        let handle = cache.spawn_persister(Duration::from_millis(10)).unwrap();
        assert!(cache.spawn_persister(Duration::from_millis(10)).is_none());

        cache.set("areas", json!({"garage": "Garage"}));

        let mut saved = None;
        for _ in 0..100 {
            tokio::time::sleep(Duration::from_millis(20)).await;
            if let Ok(snapshot) = CacheSnapshot::read(&path) {
                saved = Some(snapshot);
                break;
            }
        }
        let saved = saved.expect("snapshot was not written");
        assert_eq!(saved.server_url, HUB);
        assert!(saved.entries.contains_key("areas"));

        drop(cache);
        tokio::time::timeout(Duration::from_secs(2), handle)
            .await
            .expect("persister did not stop")
            .unwrap();
    }

    #[test]
    fn test_remove_snapshot() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("cache.json");
        assert!(!remove_snapshot(&path).unwrap());
        fs::write(&path, "{}").unwrap();
        assert!(remove_snapshot(&path).unwrap());
        assert!(!path.exists());
    }

    #[test]
    fn test_cache_dir() {
        let dir = cache_dir().unwrap();
        assert!(dir.to_string_lossy().contains("launchpad"));
    }
}
