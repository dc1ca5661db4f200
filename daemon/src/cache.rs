use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use common::UpdateError;

/// Total cache size that triggers an eviction pass on the next save.
pub const MAX_CACHE_SIZE: u64 = 500 * 1024 * 1024;

/// Entries older than this are evicted regardless of size pressure.
pub const MAX_CACHE_AGE_SECS: i64 = 7 * 24 * 60 * 60;

/// One downloaded wallpaper on disk.
#[derive(Debug, Clone)]
pub struct CacheEntry {
    pub path: PathBuf,
    pub created_at: DateTime<Utc>,
    pub size_bytes: u64,
}

/// Disk-backed store of downloaded wallpapers.
///
/// Owns its directory exclusively. Files are named
/// `{remote id}_{unix millis}.jpg`, making every entry unique and
/// chronologically sortable from the name alone. A maintenance pass runs at
/// construction and before every write: when the total size exceeds
/// [`MAX_CACHE_SIZE`] all entries past [`MAX_CACHE_AGE_SECS`] are evicted.
/// Age is the only eviction signal, there is no size-based LRU.
pub struct CacheStore {
    dir: PathBuf,
    max_size: u64,
    max_age_secs: i64,
    /// Serializes save/evict/clear; reads stay lock-free.
    write_lock: Mutex<()>,
}

impl CacheStore {
    pub fn new(dir: impl Into<PathBuf>) -> Result<Self> {
        Self::with_limits(dir, MAX_CACHE_SIZE, MAX_CACHE_AGE_SECS)
    }

    /// Construction with explicit limits, for tests.
    pub fn with_limits(dir: impl Into<PathBuf>, max_size: u64, max_age_secs: i64) -> Result<Self> {
        let dir = dir.into();
        std::fs::create_dir_all(&dir)
            .with_context(|| format!("Failed to create cache directory: {}", dir.display()))?;

        let store = Self {
            dir,
            max_size,
            max_age_secs,
            write_lock: Mutex::new(()),
        };

        // Clear out anything a previous process lifetime left behind.
        store.evict_expired();

        Ok(store)
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Write downloaded bytes as a new cache entry and return its path.
    ///
    /// Runs the maintenance pass first. The write goes through a temp file
    /// renamed into place, so a failed save leaves no partial entry.
    pub fn save(&self, id: &str, bytes: &[u8]) -> Result<PathBuf, UpdateError> {
        let _guard = self.write_lock.lock().unwrap();

        if self.total_size() > self.max_size {
            log::info!(
                "Cache exceeds {} bytes, running age-based eviction",
                self.max_size
            );
            self.evict_expired_locked();
        }

        let file_name = format!("{}_{}.jpg", id, Utc::now().timestamp_millis());
        let path = self.dir.join(&file_name);

        self.write_atomically(&path, bytes).map_err(|e| {
            log::error!("Failed to save {}: {:#}", path.display(), e);
            UpdateError::CacheSaveFailed(e.to_string())
        })?;

        log::info!("Cached wallpaper: {} ({} bytes)", path.display(), bytes.len());
        Ok(path)
    }

    fn write_atomically(&self, path: &Path, bytes: &[u8]) -> Result<()> {
        let mut tmp = tempfile::NamedTempFile::new_in(&self.dir)
            .context("Failed to create temporary cache file")?;
        tmp.write_all(bytes)?;
        // On failure the temp file is dropped and removed with it.
        tmp.persist(path)
            .with_context(|| format!("Failed to place cache file: {}", path.display()))?;
        Ok(())
    }

    /// All entries, newest first.
    ///
    /// Tolerates concurrent writes: a file that disappears mid-listing is
    /// simply skipped.
    pub fn entries(&self) -> Vec<CacheEntry> {
        let read_dir = match std::fs::read_dir(&self.dir) {
            Ok(rd) => rd,
            Err(e) => {
                log::warn!("Failed to read cache directory: {}", e);
                return Vec::new();
            }
        };

        let mut entries: Vec<CacheEntry> = read_dir
            .flatten()
            .filter_map(|dirent| {
                let path = dirent.path();
                if !path.is_file() {
                    return None;
                }
                let metadata = dirent.metadata().ok()?;
                Some(CacheEntry {
                    created_at: Self::creation_time(&path, &metadata),
                    size_bytes: metadata.len(),
                    path,
                })
            })
            .collect();

        entries.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        entries
    }

    /// Remove every entry whose age exceeds the configured maximum.
    pub fn evict_expired(&self) {
        let _guard = self.write_lock.lock().unwrap();
        self.evict_expired_locked();
    }

    fn evict_expired_locked(&self) {
        let cutoff = Utc::now() - chrono::Duration::seconds(self.max_age_secs);

        for entry in self.entries() {
            if entry.created_at < cutoff {
                match std::fs::remove_file(&entry.path) {
                    Ok(()) => log::info!("Evicted expired cache entry: {}", entry.path.display()),
                    Err(e) => log::warn!("Failed to evict {}: {}", entry.path.display(), e),
                }
            }
        }
    }

    /// Remove every cached file.
    pub fn clear(&self) -> Result<(), UpdateError> {
        let _guard = self.write_lock.lock().unwrap();

        for entry in self.entries() {
            std::fs::remove_file(&entry.path)
                .map_err(|e| UpdateError::Unknown(format!("failed to clear cache: {}", e)))?;
        }

        log::info!("Cache cleared");
        Ok(())
    }

    fn total_size(&self) -> u64 {
        self.entries().iter().map(|e| e.size_bytes).sum()
    }

    /// Download time, parsed from the `{id}_{unix millis}` file name with
    /// the filesystem mtime as fallback for foreign files.
    fn creation_time(path: &Path, metadata: &std::fs::Metadata) -> DateTime<Utc> {
        let from_name = path
            .file_stem()
            .and_then(|stem| stem.to_str())
            .and_then(|stem| stem.rsplit_once('_'))
            .and_then(|(_, millis)| millis.parse::<i64>().ok())
            .and_then(DateTime::<Utc>::from_timestamp_millis);

        from_name.unwrap_or_else(|| {
            metadata
                .modified()
                .map(DateTime::<Utc>::from)
                .unwrap_or_else(|_| Utc::now())
        })
    }
}
