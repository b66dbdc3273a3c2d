//! In-process store with switchable failure modes

use super::RemoteStore;
use crate::error::StoreError;
use async_trait::async_trait;
use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Mutex;
use std::time::Duration;

#[derive(Default)]
struct MemoryState {
    data: HashMap<String, Vec<u8>>,
    failing_reads: HashSet<String>,
    failing_writes: HashSet<String>,
    cancel_next_write: bool,
    read_delay: Option<Duration>,
}

/// Map-backed `RemoteStore` with atomic compare-and-set
pub struct MemoryStore {
    state: Mutex<MemoryState>,
    available: AtomicBool,
    writable: AtomicBool,
    reads: AtomicUsize,
    writes: AtomicUsize,
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryStore {
    pub fn new() -> Self {
        Self {
            state: Mutex::new(MemoryState::default()),
            available: AtomicBool::new(true),
            writable: AtomicBool::new(true),
            reads: AtomicUsize::new(0),
            writes: AtomicUsize::new(0),
        }
    }

    /// A store without a signer: every write fails with `Unauthenticated`
    pub fn read_only() -> Self {
        let store = Self::new();
        store.writable.store(false, Ordering::SeqCst);
        store
    }

    /// Seeds a value without going through the async write path
    pub fn insert(&self, key: &str, value: impl Into<Vec<u8>>) {
        self.lock().data.insert(key.to_string(), value.into());
    }

    pub fn value(&self, key: &str) -> Option<Vec<u8>> {
        self.lock().data.get(key).cloned()
    }

    pub fn set_available(&self, available: bool) {
        self.available.store(available, Ordering::SeqCst);
    }

    pub fn set_writable(&self, writable: bool) {
        self.writable.store(writable, Ordering::SeqCst);
    }

    pub fn fail_reads_for(&self, key: &str) {
        self.lock().failing_reads.insert(key.to_string());
    }

    pub fn fail_writes_for(&self, key: &str) {
        self.lock().failing_writes.insert(key.to_string());
    }

    pub fn clear_failures(&self) {
        let mut state = self.lock();
        state.failing_reads.clear();
        state.failing_writes.clear();
        state.cancel_next_write = false;
    }

    /// The next write is declined as if the signer refused it
    pub fn cancel_next_write(&self) {
        self.lock().cancel_next_write = true;
    }

    /// Delays every read; the value returned is the one present when the read began
    pub fn set_read_delay(&self, delay: Option<Duration>) {
        self.lock().read_delay = delay;
    }

    /// Number of `get` calls served or attempted
    pub fn read_count(&self) -> usize {
        self.reads.load(Ordering::SeqCst)
    }

    /// Number of `set`/`compare_and_set` calls attempted
    pub fn write_count(&self) -> usize {
        self.writes.load(Ordering::SeqCst)
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, MemoryState> {
        // State stays consistent across a poisoned lock: every mutation is a single insert.
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn check_write(&self, state: &mut MemoryState, key: &str) -> Result<(), StoreError> {
        if !self.available.load(Ordering::SeqCst) {
            return Err(StoreError::Unavailable);
        }
        if !self.writable.load(Ordering::SeqCst) {
            return Err(StoreError::Unauthenticated);
        }
        if state.cancel_next_write {
            state.cancel_next_write = false;
            return Err(StoreError::Cancelled);
        }
        if state.failing_writes.contains(key) {
            return Err(StoreError::Rejected(format!("write to {} refused", key)));
        }
        Ok(())
    }
}

#[async_trait]
impl RemoteStore for MemoryStore {
    async fn is_available(&self) -> bool {
        self.available.load(Ordering::SeqCst)
    }

    async fn get(&self, key: &str) -> Result<Vec<u8>, StoreError> {
        self.reads.fetch_add(1, Ordering::SeqCst);
        let (value, delay) = {
            let state = self.lock();
            if !self.available.load(Ordering::SeqCst) {
                return Err(StoreError::Unavailable);
            }
            if state.failing_reads.contains(key) {
                return Err(StoreError::Rejected(format!("read of {} refused", key)));
            }
            (
                state.data.get(key).cloned().unwrap_or_default(),
                state.read_delay,
            )
        };
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }
        Ok(value)
    }

    async fn set(&self, key: &str, value: Vec<u8>) -> Result<(), StoreError> {
        self.writes.fetch_add(1, Ordering::SeqCst);
        let mut state = self.lock();
        self.check_write(&mut state, key)?;
        state.data.insert(key.to_string(), value);
        Ok(())
    }

    async fn compare_and_set(
        &self,
        key: &str,
        expected: &[u8],
        value: Vec<u8>,
    ) -> Result<bool, StoreError> {
        self.writes.fetch_add(1, Ordering::SeqCst);
        let mut state = self.lock();
        self.check_write(&mut state, key)?;
        let current = state.data.get(key).map(Vec::as_slice).unwrap_or_default();
        if current != expected {
            return Ok(false);
        }
        state.data.insert(key.to_string(), value);
        Ok(true)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_absent_key_reads_empty() {
        let store = MemoryStore::new();
        assert!(store.get("missing").await.unwrap().is_empty());
        store.set("k", b"v".to_vec()).await.unwrap();
        assert_eq!(store.get("k").await.unwrap(), b"v");
    }

    #[tokio::test]
    async fn test_compare_and_set() {
        let store = MemoryStore::new();
        assert!(store.compare_and_set("k", b"", b"1".to_vec()).await.unwrap());
        assert!(!store.compare_and_set("k", b"", b"2".to_vec()).await.unwrap());
        assert!(store.compare_and_set("k", b"1", b"2".to_vec()).await.unwrap());
        assert_eq!(store.value("k").unwrap(), b"2");
    }

    #[tokio::test]
    async fn test_failure_modes() {
        let store = MemoryStore::read_only();
        assert!(matches!(
            store.set("k", vec![1]).await,
            Err(StoreError::Unauthenticated)
        ));

        store.set_writable(true);
        store.cancel_next_write();
        assert!(matches!(
            store.set("k", vec![1]).await,
            Err(StoreError::Cancelled)
        ));
        store.set("k", vec![1]).await.unwrap();

        store.fail_reads_for("k");
        store.fail_writes_for("k");
        store.cancel_next_write();
        store.clear_failures();
        assert_eq!(store.get("k").await.unwrap(), vec![1]);
        store.set("k", vec![2]).await.unwrap();

        store.set_available(false);
        assert!(!store.is_available().await);
        assert!(matches!(store.get("k").await, Err(StoreError::Unavailable)));
        assert_eq!(store.read_count(), 2);
        assert_eq!(store.write_count(), 4);
    }
}
