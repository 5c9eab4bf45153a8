//! Transform cache.
//!
//! Memoizes generated modules by module id. An entry is only served while the
//! source file's modification time equals the one recorded when the entry was
//! produced. The cache is LRU-bounded and can be mirrored to a JSON snapshot
//! on disk so a restarted host starts warm.

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::mpsc::{self, RecvTimeoutError, Sender};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::{Duration, UNIX_EPOCH};

use crate::codegen::GeneratedModule;
use crate::config::CacheOptions;
use crate::error::{CompilerError, Result};

const SNAPSHOT_VERSION: u32 = 1;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CacheEntry {
    pub key: String,
    pub file_path: String,
    pub content_hash: String,
    pub mtime_ms: u64,
    pub payload: GeneratedModule,
    #[serde(skip)]
    last_access: u64,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CacheStats {
    pub entries: usize,
    pub hits: u64,
    pub misses: u64,
    pub evictions: u64,
    pub invalidations: u64,
}

#[derive(Serialize, Deserialize)]
struct Snapshot {
    version: u32,
    entries: Vec<CacheEntry>,
}

#[derive(Default)]
struct CacheState {
    entries: HashMap<String, CacheEntry>,
    tick: u64,
    stats: CacheStats,
}

impl CacheState {
    fn next_tick(&mut self) -> u64 {
        self.tick += 1;
        self.tick
    }

    fn evict_lru(&mut self) {
        let oldest = self
            .entries
            .values()
            .min_by_key(|e| e.last_access)
            .map(|e| e.key.clone());
        if let Some(key) = oldest {
            log::debug!("[sfc] cache evict {}", key);
            self.entries.remove(&key);
            self.stats.evictions += 1;
        }
    }
}

pub struct TransformCache {
    state: Mutex<CacheState>,
    max_entries: usize,
    snapshot_path: Option<PathBuf>,
    snapshot_interval: Duration,
}

impl TransformCache {
    pub fn new(options: &CacheOptions) -> Self {
        TransformCache {
            state: Mutex::new(CacheState::default()),
            max_entries: options.max_entries,
            snapshot_path: options.snapshot_path.clone(),
            snapshot_interval: Duration::from_millis(options.snapshot_interval_ms.max(1)),
        }
    }

    pub fn compute_hash(text: &str) -> String {
        let mut hasher = Sha256::new();
        hasher.update(text.as_bytes());
        hex::encode(hasher.finalize())
    }

    /// Modification time in milliseconds since the epoch.
    pub fn file_mtime_ms(path: &Path) -> Option<u64> {
        let modified = fs::metadata(path).and_then(|m| m.modified()).ok()?;
        modified
            .duration_since(UNIX_EPOCH)
            .ok()
            .map(|d| d.as_millis() as u64)
    }

    /// Return the cached module if the file has not been modified since it
    /// was produced. A stale entry is evicted.
    pub fn get(&self, id: &str, file_path: &Path) -> Option<GeneratedModule> {
        let current = Self::file_mtime_ms(file_path);
        let mut state = self.state.lock();

        let recorded = state.entries.get(id).map(|entry| entry.mtime_ms);
        let Some(recorded) = recorded else {
            state.stats.misses += 1;
            log::debug!("[sfc] cache miss {}", id);
            return None;
        };

        if current != Some(recorded) {
            log::debug!("[sfc] cache stale {}", id);
            state.entries.remove(id);
            state.stats.misses += 1;
            state.stats.invalidations += 1;
            return None;
        }

        let tick = state.next_tick();
        state.stats.hits += 1;
        let entry = state.entries.get_mut(id)?;
        entry.last_access = tick;
        log::debug!("[sfc] cache hit {}", id);
        Some(entry.payload.clone())
    }

    /// Insert using the file's current modification time.
    pub fn set(&self, id: &str, file_path: &Path, payload: GeneratedModule) {
        let mtime = Self::file_mtime_ms(file_path).unwrap_or(0);
        self.set_with_mtime(id, file_path, mtime, payload);
    }

    /// Insert with the modification time observed before the source was read,
    /// so an edit made during compilation leaves a stale (never served) entry.
    pub fn set_with_mtime(&self, id: &str, file_path: &Path, mtime_ms: u64, payload: GeneratedModule) {
        if self.max_entries == 0 {
            return;
        }

        let mut state = self.state.lock();
        if !state.entries.contains_key(id) {
            while state.entries.len() >= self.max_entries {
                state.evict_lru();
            }
        }

        let last_access = state.next_tick();
        state.entries.insert(
            id.to_string(),
            CacheEntry {
                key: id.to_string(),
                file_path: file_path.to_string_lossy().to_string(),
                content_hash: Self::compute_hash(&payload.code),
                mtime_ms,
                payload,
                last_access,
            },
        );
    }

    pub fn invalidate(&self, id: &str) -> bool {
        let mut state = self.state.lock();
        let removed = state.entries.remove(id).is_some();
        if removed {
            state.stats.invalidations += 1;
        }
        removed
    }

    pub fn clear(&self) {
        let mut state = self.state.lock();
        let count = state.entries.len() as u64;
        state.entries.clear();
        state.stats.invalidations += count;
    }

    pub fn len(&self) -> usize {
        self.state.lock().entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn contains(&self, id: &str) -> bool {
        self.state.lock().entries.contains_key(id)
    }

    pub fn stats(&self) -> CacheStats {
        let state = self.state.lock();
        CacheStats {
            entries: state.entries.len(),
            ..state.stats
        }
    }

    // ═══════════════════════════════════════════════════════════════════════════
    // SNAPSHOTS
    // ═══════════════════════════════════════════════════════════════════════════

    pub fn save_snapshot(&self, path: &Path) -> Result<()> {
        let snapshot = {
            let state = self.state.lock();
            let mut entries: Vec<CacheEntry> = state.entries.values().cloned().collect();
            entries.sort_by_key(|e| e.last_access);
            Snapshot {
                version: SNAPSHOT_VERSION,
                entries,
            }
        };

        let data = serde_json::to_string(&snapshot)?;
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent).map_err(|e| CompilerError::io(parent.display().to_string(), e))?;
        }
        fs::write(path, data).map_err(|e| CompilerError::io(path.display().to_string(), e))?;
        log::info!(
            "[sfc] saved cache snapshot ({} entries) to {}",
            snapshot.entries.len(),
            path.display()
        );
        Ok(())
    }

    /// Load entries from a snapshot. Any failure leaves the cache cold.
    pub fn load_snapshot(&self, path: &Path) -> usize {
        let snapshot = match fs::read_to_string(path)
            .ok()
            .and_then(|data| serde_json::from_str::<Snapshot>(&data).ok())
        {
            Some(s) if s.version == SNAPSHOT_VERSION => s,
            Some(s) => {
                log::debug!("[sfc] ignoring cache snapshot version {}", s.version);
                return 0;
            }
            None => return 0,
        };

        let mut loaded = 0;
        for entry in snapshot.entries {
            let path = PathBuf::from(&entry.file_path);
            self.set_with_mtime(&entry.key, &path, entry.mtime_ms, entry.payload);
            loaded += 1;
        }
        log::info!("[sfc] loaded {} cache entries from {}", loaded, path.display());
        loaded
    }

    /// Build a cache from options, loading the configured snapshot if present.
    pub fn from_options(options: &CacheOptions) -> Self {
        let cache = TransformCache::new(options);
        if let Some(path) = &cache.snapshot_path {
            cache.load_snapshot(path);
        }
        cache
    }

    /// Save to the configured snapshot path once. A failed write is logged and
    /// leaves the in-memory cache untouched. `false` when nothing was written.
    pub fn flush_snapshot(&self) -> bool {
        let Some(path) = &self.snapshot_path else {
            return false;
        };
        match self.save_snapshot(path) {
            Ok(()) => true,
            Err(e) => {
                log::warn!("[sfc] cache snapshot not saved: {}", e);
                false
            }
        }
    }

    /// Save to the configured snapshot path every interval until the returned
    /// handle is dropped. `None` when no snapshot path is configured.
    pub fn start_snapshot_timer(self: &Arc<Self>) -> Option<SnapshotTimer> {
        let path = self.snapshot_path.clone()?;
        let interval = self.snapshot_interval;
        let cache = Arc::clone(self);
        let (stop, stopped) = mpsc::channel::<()>();

        let handle = std::thread::spawn(move || loop {
            match stopped.recv_timeout(interval) {
                Err(RecvTimeoutError::Timeout) => {
                    if let Err(e) = cache.save_snapshot(&path) {
                        log::debug!("[sfc] cache snapshot failed: {}", e);
                    }
                }
                _ => break,
            }
        });

        Some(SnapshotTimer {
            stop: Some(stop),
            handle: Some(handle),
        })
    }
}

pub struct SnapshotTimer {
    stop: Option<Sender<()>>,
    handle: Option<JoinHandle<()>>,
}

impl Drop for SnapshotTimer {
    fn drop(&mut self) {
        drop(self.stop.take());
        if let Some(handle) = self.handle.take() {
            let _ = handle.join();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::script::ExportShape;
    use std::time::SystemTime;

    fn module(code: &str) -> GeneratedModule {
        GeneratedModule {
            code: code.to_string(),
            source_map: None,
            scoped_css: None,
            global_css: None,
            template_text: String::new(),
            tag: Some("x-a".to_string()),
            shape: ExportShape::Missing,
            annotations: vec![],
            annotation_table: vec![],
            route: None,
            diagnostics: vec![],
        }
    }

    fn touch(path: &Path, secs: u64) {
        fs::write(path, "<template></template>").unwrap();
        let file = fs::File::options().write(true).open(path).unwrap();
        file.set_modified(SystemTime::UNIX_EPOCH + Duration::from_secs(secs))
            .unwrap();
    }

    fn options(max_entries: usize) -> CacheOptions {
        CacheOptions {
            max_entries,
            ..CacheOptions::default()
        }
    }

    #[test]
    fn test_get_requires_matching_mtime() {
        let dir = tempfile::tempdir().unwrap();
        let file = dir.path().join("a.sfc");
        touch(&file, 1_000);

        let cache = TransformCache::new(&options(10));
        cache.set("a", &file, module("code-a"));
        assert_eq!(cache.get("a", &file).unwrap().code, "code-a");

        touch(&file, 2_000);
        assert!(cache.get("a", &file).is_none());
        assert!(!cache.contains("a"));

        let stats = cache.stats();
        assert_eq!(stats.hits, 1);
        assert_eq!(stats.misses, 1);
        assert_eq!(stats.invalidations, 1);
    }

    #[test]
    fn test_lru_eviction() {
        let dir = tempfile::tempdir().unwrap();
        let file = dir.path().join("a.sfc");
        touch(&file, 1_000);

        let cache = TransformCache::new(&options(2));
        cache.set("a", &file, module("a"));
        cache.set("b", &file, module("b"));
        assert!(cache.get("a", &file).is_some());
        cache.set("c", &file, module("c"));

        assert!(cache.contains("a"));
        assert!(!cache.contains("b"));
        assert!(cache.contains("c"));
        assert_eq!(cache.stats().evictions, 1);
    }

    #[test]
    fn test_invalidate_and_clear() {
        let dir = tempfile::tempdir().unwrap();
        let file = dir.path().join("a.sfc");
        touch(&file, 1_000);

        let cache = TransformCache::new(&options(10));
        cache.set("a", &file, module("a"));
        cache.set("b", &file, module("b"));
        assert!(cache.invalidate("a"));
        assert!(!cache.invalidate("a"));
        cache.clear();
        assert!(cache.is_empty());
    }

    #[test]
    fn test_content_hash() {
        let dir = tempfile::tempdir().unwrap();
        let file = dir.path().join("a.sfc");
        touch(&file, 1_000);

        let cache = TransformCache::new(&options(10));
        cache.set("a", &file, module("abc"));
        let state = cache.state.lock();
        assert_eq!(
            state.entries["a"].content_hash,
            "ba7816bf8f01cfea414140de5dae2223b00361a396177a9cb410ff61f20015ad"
        );
    }

    #[test]
    fn test_snapshot_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let file = dir.path().join("a.sfc");
        let snapshot = dir.path().join("cache/snapshot.json");
        touch(&file, 1_000);

        let cache = TransformCache::new(&options(10));
        cache.set("a", &file, module("code-a"));
        cache.save_snapshot(&snapshot).unwrap();

        let restored = TransformCache::new(&options(10));
        assert_eq!(restored.load_snapshot(&snapshot), 1);
        assert_eq!(restored.get("a", &file).unwrap().code, "code-a");
    }

    #[test]
    fn test_bad_snapshot_yields_cold_cache() {
        let dir = tempfile::tempdir().unwrap();
        let garbage = dir.path().join("garbage.json");
        fs::write(&garbage, "{ not json").unwrap();
        let old = dir.path().join("old.json");
        fs::write(&old, r#"{"version":0,"entries":[]}"#).unwrap();

        let cache = TransformCache::new(&options(10));
        assert_eq!(cache.load_snapshot(&garbage), 0);
        assert_eq!(cache.load_snapshot(&old), 0);
        assert_eq!(cache.load_snapshot(&dir.path().join("missing.json")), 0);
        assert!(cache.is_empty());
    }

    #[test]
    fn test_flush_snapshot_failure_is_not_fatal() {
        let dir = tempfile::tempdir().unwrap();
        let file = dir.path().join("a.sfc");
        touch(&file, 1_000);
        let blocker = dir.path().join("blocker");
        fs::write(&blocker, "not a directory").unwrap();

        let cache = TransformCache::new(&CacheOptions {
            max_entries: 10,
            snapshot_path: Some(blocker.join("snap.json")),
            snapshot_interval_ms: 10,
        });
        cache.set("a", &file, module("a"));

        assert!(cache.save_snapshot(&blocker.join("snap.json")).is_err());
        assert!(!cache.flush_snapshot());
        assert_eq!(cache.get("a", &file).unwrap().code, "a");

        let unset = TransformCache::new(&options(10));
        assert!(!unset.flush_snapshot());
    }

    #[test]
    fn test_snapshot_timer_writes_and_stops() {
        let dir = tempfile::tempdir().unwrap();
        let file = dir.path().join("a.sfc");
        let snapshot = dir.path().join("snap.json");
        touch(&file, 1_000);

        let cache = Arc::new(TransformCache::new(&CacheOptions {
            max_entries: 10,
            snapshot_path: Some(snapshot.clone()),
            snapshot_interval_ms: 10,
        }));
        cache.set("a", &file, module("a"));

        let timer = cache.start_snapshot_timer().unwrap();
        let deadline = std::time::Instant::now() + Duration::from_secs(5);
        while !snapshot.exists() && std::time::Instant::now() < deadline {
            std::thread::sleep(Duration::from_millis(5));
        }
        drop(timer);
        assert!(snapshot.exists());
    }
}
