//! File-backed non-volatile store
//!
//! Values live in a small JSON map that is rewritten on every change.
//! A missing or corrupt file reads as empty.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use tracing::warn;

use super::{CollabResult, CollaboratorError, NvKey, NvStore};

pub struct JsonFileStore {
    path: PathBuf,
    values: Mutex<BTreeMap<NvKey, u32>>,
}

impl JsonFileStore {
    /// Open `nvdata.json` inside `dir`
    pub fn open(dir: &Path) -> Self {
        let path = dir.join("nvdata.json");
        let values = match std::fs::read(&path) {
            Ok(bytes) => serde_json::from_slice(&bytes).unwrap_or_else(|e| {
                warn!(?path, error = %e, "corrupt nvdata, starting empty");
                BTreeMap::new()
            }),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => BTreeMap::new(),
            Err(e) => {
                warn!(?path, error = %e, "unreadable nvdata, starting empty");
                BTreeMap::new()
            }
        };

        Self {
            path,
            values: Mutex::new(values),
        }
    }

    fn persist(&self, values: &BTreeMap<NvKey, u32>) -> CollabResult<()> {
        let io_error = |e: &dyn std::fmt::Display| CollaboratorError::Rejected {
            subsystem: "nvdata",
            reason: e.to_string(),
        };
        let bytes = serde_json::to_vec_pretty(values).map_err(|e| io_error(&e))?;
        std::fs::write(&self.path, bytes).map_err(|e| io_error(&e))
    }

    fn update(&self, key: NvKey, value: u32, overwrite: bool) -> CollabResult<()> {
        let mut values = self.values.lock().unwrap_or_else(|e| e.into_inner());
        if !overwrite && values.contains_key(&key) {
            return Ok(());
        }
        values.insert(key, value);
        self.persist(&values)
    }
}

impl NvStore for JsonFileStore {
    fn read(&self, key: NvKey) -> CollabResult<Option<u32>> {
        let values = self.values.lock().unwrap_or_else(|e| e.into_inner());
        Ok(values.get(&key).copied())
    }

    fn write(&self, key: NvKey, value: u32) -> CollabResult<()> {
        self.update(key, value, true)
    }

    fn init_default(&self, key: NvKey, value: u32) -> CollabResult<()> {
        self.update(key, value, false)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_values_survive_reopen() {
        let dir = tempfile::tempdir().unwrap();
        {
            let store = JsonFileStore::open(dir.path());
            assert_eq!(store.read(NvKey::Volume).unwrap(), None);
            store.write(NvKey::Volume, 6).unwrap();
        }

        let store = JsonFileStore::open(dir.path());
        assert_eq!(store.read(NvKey::Volume).unwrap(), Some(6));
    }

    #[test]
    fn test_init_default_does_not_overwrite() {
        let dir = tempfile::tempdir().unwrap();
        let store = JsonFileStore::open(dir.path());
        store.init_default(NvKey::Volume, 5).unwrap();
        store.init_default(NvKey::Volume, 2).unwrap();
        assert_eq!(store.read(NvKey::Volume).unwrap(), Some(5));
    }

    #[test]
    fn test_corrupt_file_reads_empty() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("nvdata.json"), b"{not json").unwrap();
        let store = JsonFileStore::open(dir.path());
        assert_eq!(store.read(NvKey::Volume).unwrap(), None);
    }

    #[test]
    fn test_write_failure_is_reported() {
        let dir = tempfile::tempdir().unwrap();
        let store = JsonFileStore::open(&dir.path().join("missing"));
        assert!(store.write(NvKey::Volume, 3).is_err());
    }
}
