//! JSON-file backend: `keys.json` and `rosters.json` inside a data directory.
//!
//! Writes go to a temporary sibling first and are renamed into place, so a
//! crash mid-write leaves the previous snapshot intact.

use serde::{de::DeserializeOwned, Serialize};
use std::fs;
use std::path::{Path, PathBuf};

use crate::{KeyMap, KeyStore, RosterStore, StoreError, StoredMeeting};

const KEYS_FILE: &str = "keys.json";
const ROSTERS_FILE: &str = "rosters.json";

/// File-backed implementation of [`KeyStore`] and [`RosterStore`].
pub struct JsonFileStore {
    dir: PathBuf,
}

impl JsonFileStore {
    /// Open (and create if needed) a store rooted at `dir`.
    pub fn open(dir: impl Into<PathBuf>) -> Result<Self, StoreError> {
        let dir = dir.into();
        fs::create_dir_all(&dir)?;
        Ok(Self { dir })
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    fn read<T: DeserializeOwned + Default>(&self, name: &str) -> Result<T, StoreError> {
        let path = self.dir.join(name);
        let raw = match fs::read_to_string(&path) {
            Ok(raw) => raw,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(T::default()),
            Err(e) => return Err(e.into()),
        };
        serde_json::from_str(&raw)
            .map_err(|e| StoreError::Corruption(format!("{}: {e}", path.display())))
    }

    fn write<T: Serialize + ?Sized>(&self, name: &str, value: &T) -> Result<(), StoreError> {
        let path = self.dir.join(name);
        let tmp = path.with_extension("json.tmp");
        let body = serde_json::to_string_pretty(value)?;
        fs::write(&tmp, body)?;
        fs::rename(&tmp, &path)?;
        tracing::debug!(path = %path.display(), "snapshot written");
        Ok(())
    }
}

impl KeyStore for JsonFileStore {
    fn load_keys(&self) -> Result<KeyMap, StoreError> {
        self.read(KEYS_FILE)
    }

    fn save_keys(&self, keys: &KeyMap) -> Result<(), StoreError> {
        self.write(KEYS_FILE, keys)
    }
}

impl RosterStore for JsonFileStore {
    fn load_meetings(&self) -> Result<Vec<StoredMeeting>, StoreError> {
        self.read(ROSTERS_FILE)
    }

    fn save_meetings(&self, meetings: &[StoredMeeting]) -> Result<(), StoreError> {
        self.write(ROSTERS_FILE, meetings)
    }
}
