//! In-memory key-value store.

use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use parking_lot::Mutex;

use super::{KeyValueStore, StoreError, StoreKey};

/// Shared in-memory store. Clones see the same contents, which lets a test
/// drop a messenger and load a new one over the same data.
#[derive(Debug, Clone, Default)]
pub struct MemoryStore {
    values: Arc<Mutex<HashMap<StoreKey, String>>>,
    fail_writes: Arc<AtomicBool>,
}

impl MemoryStore {
    /// Create an empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Make every subsequent `put` and `delete` fail (or succeed again).
    pub fn set_fail_writes(&self, fail: bool) {
        self.fail_writes.store(fail, Ordering::SeqCst);
    }

    /// Raw value under `key`, for assertions.
    #[must_use]
    pub fn raw(&self, key: StoreKey) -> Option<String> {
        self.values.lock().get(&key).cloned()
    }

    fn check_writable(&self, key: StoreKey) -> Result<(), StoreError> {
        if self.fail_writes.load(Ordering::SeqCst) {
            Err(StoreError::WriteFailed {
                key,
                reason: "writes disabled".to_string(),
            })
        } else {
            Ok(())
        }
    }
}

impl KeyValueStore for MemoryStore {
    async fn get(&self, key: StoreKey) -> Result<Option<String>, StoreError> {
        Ok(self.values.lock().get(&key).cloned())
    }

    async fn put(&self, key: StoreKey, value: String) -> Result<(), StoreError> {
        self.check_writable(key)?;
        self.values.lock().insert(key, value);
        Ok(())
    }

    async fn delete(&self, key: StoreKey) -> Result<(), StoreError> {
        self.check_writable(key)?;
        self.values.lock().remove(&key);
        Ok(())
    }
}
