//! Nullable store: thread-safe in-memory storage for testing.

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Mutex;
use troof_store::{KeyMap, KeyStore, RosterStore, StoreError, StoredMeeting};

/// An in-memory key + roster store for testing.
/// Thread-safe for use with tokio's multi-threaded runtime.
pub struct NullStore {
    keys: Mutex<KeyMap>,
    meetings: Mutex<Vec<StoredMeeting>>,
    saves: AtomicUsize,
    fail_writes: AtomicBool,
}

impl NullStore {
    pub fn new() -> Self {
        Self {
            keys: Mutex::new(KeyMap::new()),
            meetings: Mutex::new(Vec::new()),
            saves: AtomicUsize::new(0),
            fail_writes: AtomicBool::new(false),
        }
    }

    /// Pre-populate the stored keys, as if written by an earlier run.
    pub fn with_keys(keys: KeyMap) -> Self {
        let store = Self::new();
        *store.keys.lock().unwrap() = keys;
        store
    }

    /// Pre-populate the stored rosters.
    pub fn with_meetings(meetings: Vec<StoredMeeting>) -> Self {
        let store = Self::new();
        *store.meetings.lock().unwrap() = meetings;
        store
    }

    /// Make every subsequent save fail with a backend error.
    pub fn fail_writes(&self, fail: bool) {
        self.fail_writes.store(fail, Ordering::SeqCst);
    }

    /// Number of successful saves (keys and rosters combined).
    pub fn save_count(&self) -> usize {
        self.saves.load(Ordering::SeqCst)
    }

    pub fn stored_keys(&self) -> KeyMap {
        self.keys.lock().unwrap().clone()
    }

    pub fn stored_meetings(&self) -> Vec<StoredMeeting> {
        self.meetings.lock().unwrap().clone()
    }

    fn check_writable(&self) -> Result<(), StoreError> {
        if self.fail_writes.load(Ordering::SeqCst) {
            return Err(StoreError::Backend("null store configured to fail".into()));
        }
        self.saves.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

impl Default for NullStore {
    fn default() -> Self {
        Self::new()
    }
}

impl KeyStore for NullStore {
    fn load_keys(&self) -> Result<KeyMap, StoreError> {
        Ok(self.keys.lock().unwrap().clone())
    }

    fn save_keys(&self, keys: &KeyMap) -> Result<(), StoreError> {
        self.check_writable()?;
        *self.keys.lock().unwrap() = keys.clone();
        Ok(())
    }
}

impl RosterStore for NullStore {
    fn load_meetings(&self) -> Result<Vec<StoredMeeting>, StoreError> {
        Ok(self.meetings.lock().unwrap().clone())
    }

    fn save_meetings(&self, meetings: &[StoredMeeting]) -> Result<(), StoreError> {
        self.check_writable()?;
        *self.meetings.lock().unwrap() = meetings.to_vec();
        Ok(())
    }
}
