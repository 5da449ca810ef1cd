//! Strike persistence backends.

use std::fs;
use std::io::{self, Write};
use std::path::PathBuf;

use thiserror::Error;
use tracing::debug;

use super::StrikeMap;

/// Errors raised by a strike backend.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("strike store I/O error at {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("strike store at {path} is corrupt: {source}")]
    Corrupt {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },

    #[error("strike store unavailable: {0}")]
    #[allow(dead_code)]
    Unavailable(String),
}

/// Durable key-value storage for strike counts.
///
/// Implementations persist a whole snapshot at a time; the caller serializes
/// writes.
pub trait StrikeBackend: Send + Sync {
    /// Read the persisted mapping. `Ok(None)` means nothing was persisted yet.
    fn load(&self) -> Result<Option<StrikeMap>, StoreError>;

    /// Durably replace the persisted mapping with `strikes`.
    fn persist(&self, strikes: &StrikeMap) -> Result<(), StoreError>;

    /// Move unreadable state out of the way before it gets overwritten.
    fn quarantine(&self) -> Result<(), StoreError> {
        Ok(())
    }

    /// Human readable location, for logs.
    fn describe(&self) -> String;
}

/// Flat JSON object on disk: `{ "<user id>": <count> }`.
#[derive(Debug, Clone)]
pub struct JsonFileBackend {
    path: PathBuf,
}

impl JsonFileBackend {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    fn io_err(&self, source: io::Error) -> StoreError {
        StoreError::Io {
            path: self.path.clone(),
            source,
        }
    }

    fn sibling(&self, suffix: &str) -> PathBuf {
        let mut name = self.path.as_os_str().to_owned();
        name.push(suffix);
        PathBuf::from(name)
    }
}

impl StrikeBackend for JsonFileBackend {
    fn load(&self) -> Result<Option<StrikeMap>, StoreError> {
        let raw = match fs::read_to_string(&self.path) {
            Ok(raw) => raw,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(self.io_err(e)),
        };

        // An empty file is what a crash between create and write leaves behind.
        if raw.trim().is_empty() {
            return Ok(None);
        }

        serde_json::from_str(&raw)
            .map(Some)
            .map_err(|source| StoreError::Corrupt {
                path: self.path.clone(),
                source,
            })
    }

    fn persist(&self, strikes: &StrikeMap) -> Result<(), StoreError> {
        if let Some(parent) = self.path.parent()
            && !parent.as_os_str().is_empty()
        {
            fs::create_dir_all(parent).map_err(|e| self.io_err(e))?;
        }

        let body = serde_json::to_vec_pretty(strikes).map_err(|e| self.io_err(e.into()))?;

        // Write to a temp file and rename so a crash never leaves a torn file.
        let tmp = self.sibling(".tmp");
        {
            let mut file = fs::File::create(&tmp).map_err(|e| self.io_err(e))?;
            file.write_all(&body).map_err(|e| self.io_err(e))?;
            file.sync_all().map_err(|e| self.io_err(e))?;
        }
        fs::rename(&tmp, &self.path).map_err(|e| self.io_err(e))?;

        debug!("Persisted {} strike records to {}", strikes.len(), self.path.display());
        Ok(())
    }

    fn quarantine(&self) -> Result<(), StoreError> {
        let target = self.sibling(".corrupt");
        match fs::rename(&self.path, &target) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(self.io_err(e)),
        }
    }

    fn describe(&self) -> String {
        self.path.display().to_string()
    }
}

/// In-memory backend for tests.
#[cfg(test)]
#[derive(Debug, Default)]
pub struct MemoryBackend {
    pub state: parking_lot::Mutex<Option<StrikeMap>>,
    pub fail_writes: std::sync::atomic::AtomicBool,
    pub writes: std::sync::atomic::AtomicUsize,
}

#[cfg(test)]
impl MemoryBackend {
    pub fn persisted(&self, user: &str) -> Option<u32> {
        self.state.lock().as_ref().and_then(|m| m.get(user).copied())
    }
}

#[cfg(test)]
impl StrikeBackend for MemoryBackend {
    fn load(&self) -> Result<Option<StrikeMap>, StoreError> {
        Ok(self.state.lock().clone())
    }

    fn persist(&self, strikes: &StrikeMap) -> Result<(), StoreError> {
        use std::sync::atomic::Ordering;

        if self.fail_writes.load(Ordering::SeqCst) {
            return Err(StoreError::Unavailable("writes disabled".into()));
        }
        self.writes.fetch_add(1, Ordering::SeqCst);
        *self.state.lock() = Some(strikes.clone());
        Ok(())
    }

    fn describe(&self) -> String {
        "memory".to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_missing_file_loads_as_none() {
        let dir = tempfile::tempdir().unwrap();
        let backend = JsonFileBackend::new(dir.path().join("strikes.json"));
        assert!(backend.load().unwrap().is_none());
    }

    #[test]
    fn test_persist_then_load() {
        let dir = tempfile::tempdir().unwrap();
        let backend = JsonFileBackend::new(dir.path().join("nested/strikes.json"));

        let mut map = StrikeMap::new();
        map.insert("5511999990000@c.us".to_string(), 2);
        backend.persist(&map).unwrap();

        assert_eq!(backend.load().unwrap(), Some(map));
        assert!(!dir.path().join("nested/strikes.json.tmp").exists());
    }

    #[test]
    fn test_malformed_file_is_corrupt() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("strikes.json");
        fs::write(&path, "{ not json").unwrap();

        let backend = JsonFileBackend::new(&path);
        assert!(matches!(backend.load(), Err(StoreError::Corrupt { .. })));
    }

    #[test]
    fn test_negative_count_is_corrupt() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("strikes.json");
        fs::write(&path, r#"{"a@c.us": -1}"#).unwrap();

        let backend = JsonFileBackend::new(&path);
        assert!(matches!(backend.load(), Err(StoreError::Corrupt { .. })));
    }

    #[test]
    fn test_quarantine_moves_file_aside() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("strikes.json");
        fs::write(&path, "garbage").unwrap();

        let backend = JsonFileBackend::new(&path);
        backend.quarantine().unwrap();

        assert!(!path.exists());
        assert_eq!(
            fs::read_to_string(dir.path().join("strikes.json.corrupt")).unwrap(),
            "garbage"
        );
    }
}
