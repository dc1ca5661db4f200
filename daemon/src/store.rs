use anyhow::{Context, Result};
use std::collections::BTreeMap;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

/// Key-value persistence for the daemon's durable settings.
///
/// Holds the update interval, the fan-out mode and the last-success
/// timestamp. Writes are best-effort: a store that cannot persist logs the
/// failure and keeps serving the in-memory value, so a full disk never takes
/// the update pipeline down with it.
pub trait KvStore: Send + Sync {
    fn get(&self, key: &str) -> Option<String>;
    fn set(&self, key: &str, value: &str);
}

/// [`KvStore`] backed by a single JSON file.
///
/// The whole map is rewritten on every set, via a temp file in the same
/// directory renamed over the target so readers never observe a torn write.
pub struct JsonFileStore {
    path: PathBuf,
    values: Mutex<BTreeMap<String, String>>,
}

impl JsonFileStore {
    /// Open the store, loading any previously persisted values.
    pub fn open(path: impl Into<PathBuf>) -> Result<Self> {
        let path = path.into();

        let values = if path.exists() {
            let contents = std::fs::read_to_string(&path)
                .with_context(|| format!("Failed to read state file: {}", path.display()))?;
            serde_json::from_str(&contents)
                .with_context(|| format!("Failed to parse state file: {}", path.display()))?
        } else {
            BTreeMap::new()
        };

        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)
                .with_context(|| format!("Failed to create state directory: {}", parent.display()))?;
        }

        Ok(Self {
            path,
            values: Mutex::new(values),
        })
    }

    fn persist(&self, values: &BTreeMap<String, String>) -> Result<()> {
        let parent = self.path.parent().unwrap_or_else(|| Path::new("."));
        let json = serde_json::to_string_pretty(values)?;

        let mut tmp = tempfile::NamedTempFile::new_in(parent)
            .context("Failed to create temporary state file")?;
        tmp.write_all(json.as_bytes())?;
        tmp.persist(&self.path)
            .with_context(|| format!("Failed to replace state file: {}", self.path.display()))?;
        Ok(())
    }
}

impl KvStore for JsonFileStore {
    fn get(&self, key: &str) -> Option<String> {
        self.values.lock().unwrap().get(key).cloned()
    }

    fn set(&self, key: &str, value: &str) {
        let mut values = self.values.lock().unwrap();
        values.insert(key.to_string(), value.to_string());

        if let Err(e) = self.persist(&values) {
            log::warn!("Failed to persist state: {e:#}");
        }
    }
}

/// In-memory [`KvStore`] for tests.
#[derive(Default)]
pub struct MemoryStore {
    values: Mutex<BTreeMap<String, String>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl KvStore for MemoryStore {
    fn get(&self, key: &str) -> Option<String> {
        self.values.lock().unwrap().get(key).cloned()
    }

    fn set(&self, key: &str, value: &str) {
        self.values
            .lock()
            .unwrap()
            .insert(key.to_string(), value.to_string());
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_memory_store_round_trip() {
        let store = MemoryStore::new();
        assert_eq!(store.get("WallpaperMode"), None);

        store.set("WallpaperMode", "different");
        assert_eq!(store.get("WallpaperMode"), Some("different".to_string()));

        store.set("WallpaperMode", "same");
        assert_eq!(store.get("WallpaperMode"), Some("same".to_string()));
    }

    #[test]
    fn test_file_store_survives_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("state.json");

        {
            let store = JsonFileStore::open(&path).unwrap();
            store.set("UpdateInterval", r#"{"hours":2,"minutes":30}"#);
            store.set("LastWallpaperUpdate", "2026-08-05T10:00:00Z");
        }

        let store = JsonFileStore::open(&path).unwrap();
        assert_eq!(
            store.get("UpdateInterval"),
            Some(r#"{"hours":2,"minutes":30}"#.to_string())
        );
        assert_eq!(
            store.get("LastWallpaperUpdate"),
            Some("2026-08-05T10:00:00Z".to_string())
        );
    }

    #[test]
    fn test_file_store_missing_file_starts_empty() {
        let dir = tempfile::tempdir().unwrap();
        let store = JsonFileStore::open(dir.path().join("state.json")).unwrap();
        assert_eq!(store.get("anything"), None);
    }

    #[test]
    fn test_file_store_rejects_corrupt_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("state.json");
        std::fs::write(&path, "not json").unwrap();

        assert!(JsonFileStore::open(&path).is_err());
    }

    #[test]
    fn test_file_store_writes_are_atomic() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("state.json");

        let store = JsonFileStore::open(&path).unwrap();
        store.set("a", "1");
        store.set("b", "2");

        // The on-disk file is always a complete, parseable snapshot.
        let contents = std::fs::read_to_string(&path).unwrap();
        let parsed: BTreeMap<String, String> = serde_json::from_str(&contents).unwrap();
        assert_eq!(parsed.len(), 2);
        assert_eq!(parsed["a"], "1");
        assert_eq!(parsed["b"], "2");
    }
}
