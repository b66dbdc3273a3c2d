//! Durable single-process store
//!
//! Every write is appended to a segmented log under `base_path`; the live map
//! is rebuilt on open by replaying the `snapshot` file and then all segments.
//! `compact` folds the map into a new snapshot and drops the segments.
//! Disk work runs on tokio's blocking pool so runtime workers never wait on
//! `fsync`.

use super::segment::Segment;
use super::RemoteStore;
use crate::error::StoreError;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, MutexGuard};

const DEFAULT_ENTRIES_PER_SEGMENT: usize = 1024;

#[derive(Debug, Serialize, Deserialize)]
struct LogEntry {
    key: String,
    value: Vec<u8>,
}

#[derive(Debug, Serialize, Deserialize, Default)]
struct SnapshotFile {
    last_index: u64,
    data: HashMap<String, Vec<u8>>,
}

struct FileState {
    base_path: PathBuf,
    segments: BTreeMap<u64, Segment>,
    data: HashMap<String, Vec<u8>>,
    next_index: u64,
    entries_per_segment: usize,
}

pub struct FileStore {
    state: Arc<Mutex<FileState>>,
}

fn invalid_data<E>(e: E) -> io::Error
where
    E: Into<Box<dyn std::error::Error + Send + Sync>>,
{
    io::Error::new(io::ErrorKind::InvalidData, e)
}

fn segment_start(path: &Path) -> Option<u64> {
    path.file_name()?
        .to_str()?
        .strip_prefix("segment_")?
        .strip_suffix(".log")?
        .parse::<u64>()
        .ok()
}

impl FileStore {
    pub fn open<P: AsRef<Path>>(base_path: P) -> io::Result<Self> {
        Self::open_with_segment_size(base_path, DEFAULT_ENTRIES_PER_SEGMENT)
    }

    pub fn open_with_segment_size<P: AsRef<Path>>(
        base_path: P,
        entries_per_segment: usize,
    ) -> io::Result<Self> {
        let base_path = base_path.as_ref().to_path_buf();
        fs::create_dir_all(&base_path)?;

        let snapshot_path = base_path.join("snapshot");
        let snapshot = if snapshot_path.exists() {
            let bytes = fs::read(&snapshot_path)?;
            bincode::deserialize::<SnapshotFile>(&bytes).map_err(invalid_data)?
        } else {
            SnapshotFile::default()
        };
        let mut data = snapshot.data;
        let mut next_index = snapshot.last_index;

        let mut segment_files: Vec<(u64, PathBuf)> = fs::read_dir(&base_path)?
            .filter_map(|entry| {
                let path = entry.ok()?.path();
                if !path.is_file() {
                    return None;
                }
                segment_start(&path).map(|start| (start, path))
            })
            .collect();
        segment_files.sort_by_key(|(start, _)| *start);

        let mut segments = BTreeMap::new();
        for (start_index, path) in segment_files {
            let mut segment = Segment::new(&path, start_index)?;
            for index in segment.get_start_index()..segment.get_end_index() {
                // Entries already folded into the snapshot
                if index < snapshot.last_index {
                    continue;
                }
                let entry: LogEntry =
                    bincode::deserialize(&segment.read_entry(index)?).map_err(invalid_data)?;
                data.insert(entry.key, entry.value);
            }
            next_index = next_index.max(segment.get_end_index());
            segments.insert(start_index, segment);
        }

        log::info!(
            "opened file store at {} with {} keys, next index {}",
            base_path.display(),
            data.len(),
            next_index
        );

        Ok(FileStore {
            state: Arc::new(Mutex::new(FileState {
                base_path,
                segments,
                data,
                next_index,
                entries_per_segment: entries_per_segment.max(1),
            })),
        })
    }

    /// Writes the live map to the snapshot file and removes every segment
    pub async fn compact(&self) -> io::Result<()> {
        self.blocking(|state| state.compact()).await
    }

    pub async fn segment_count(&self) -> usize {
        lock(&self.state).segments.len()
    }

    /// Runs `f` against the locked state on the blocking pool
    async fn blocking<T, F>(&self, f: F) -> io::Result<T>
    where
        T: Send + 'static,
        F: FnOnce(&mut FileState) -> io::Result<T> + Send + 'static,
    {
        let state = self.state.clone();
        tokio::task::spawn_blocking(move || f(&mut lock(&state)))
            .await
            .map_err(|e| io::Error::new(io::ErrorKind::Other, e))?
    }
}

fn lock(state: &Mutex<FileState>) -> MutexGuard<'_, FileState> {
    // A panicked writer leaves at worst a torn log tail, which open() repairs.
    state.lock().unwrap_or_else(|e| e.into_inner())
}

impl FileState {
    fn compact(&mut self) -> io::Result<()> {
        let snapshot = SnapshotFile {
            last_index: self.next_index,
            data: self.data.clone(),
        };
        let snapshot_path = self.base_path.join("snapshot");
        let temp_path = self.base_path.join("snapshot.tmp");

        let bytes = bincode::serialize(&snapshot).map_err(invalid_data)?;
        fs::write(&temp_path, &bytes)?;
        fs::rename(&temp_path, &snapshot_path)?;

        let segments = std::mem::take(&mut self.segments);
        for (_, segment) in segments {
            segment.remove()?;
        }
        Ok(())
    }

    fn tail_segment(&mut self) -> io::Result<&mut Segment> {
        let needs_new = match self.segments.values().next_back() {
            Some(tail) => {
                tail.len() >= self.entries_per_segment
                    || tail.get_end_index() != self.next_index
            }
            None => true,
        };
        if needs_new {
            let start = self.next_index;
            let path = self.base_path.join(format!("segment_{}.log", start));
            self.segments.insert(start, Segment::new(path, start)?);
        }
        self.segments
            .values_mut()
            .next_back()
            .ok_or_else(|| io::Error::new(io::ErrorKind::Other, "no tail segment"))
    }

    fn write(&mut self, key: &str, value: Vec<u8>) -> io::Result<()> {
        let entry = LogEntry {
            key: key.to_string(),
            value,
        };
        let bytes = bincode::serialize(&entry).map_err(invalid_data)?;
        self.tail_segment()?.append(&[bytes])?;
        self.next_index += 1;
        self.data.insert(entry.key, entry.value);
        Ok(())
    }
}

#[async_trait]
impl RemoteStore for FileStore {
    async fn is_available(&self) -> bool {
        true
    }

    async fn get(&self, key: &str) -> Result<Vec<u8>, StoreError> {
        let key = key.to_string();
        let value = self
            .blocking(move |state| Ok(state.data.get(&key).cloned().unwrap_or_default()))
            .await?;
        Ok(value)
    }

    async fn set(&self, key: &str, value: Vec<u8>) -> Result<(), StoreError> {
        let key = key.to_string();
        self.blocking(move |state| state.write(&key, value)).await?;
        Ok(())
    }

    async fn compare_and_set(
        &self,
        key: &str,
        expected: &[u8],
        value: Vec<u8>,
    ) -> Result<bool, StoreError> {
        let key = key.to_string();
        let expected = expected.to_vec();
        let swapped = self
            .blocking(move |state| {
                let current = state.data.get(&key).map(Vec::as_slice).unwrap_or_default();
                if current != expected.as_slice() {
                    return Ok(false);
                }
                state.write(&key, value)?;
                Ok(true)
            })
            .await?;
        Ok(swapped)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[tokio::test]
    async fn test_values_survive_reopen() {
        let dir = TempDir::new().unwrap();
        {
            let store = FileStore::open_with_segment_size(dir.path(), 2).unwrap();
            store.set("a", b"1".to_vec()).await.unwrap();
            store.set("b", b"2".to_vec()).await.unwrap();
            store.set("a", b"3".to_vec()).await.unwrap();
            assert_eq!(store.segment_count().await, 2);
        }

        let store = FileStore::open_with_segment_size(dir.path(), 2).unwrap();
        assert_eq!(store.get("a").await.unwrap(), b"3");
        assert_eq!(store.get("b").await.unwrap(), b"2");
        assert!(store.get("c").await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_compact_then_reopen() {
        let dir = TempDir::new().unwrap();
        {
            let store = FileStore::open_with_segment_size(dir.path(), 2).unwrap();
            for i in 0..5u8 {
                store.set("counter", vec![i]).await.unwrap();
            }
            store.compact().await.unwrap();
            assert_eq!(store.segment_count().await, 0);
            store.set("after", b"x".to_vec()).await.unwrap();
        }

        let store = FileStore::open_with_segment_size(dir.path(), 2).unwrap();
        assert_eq!(store.get("counter").await.unwrap(), vec![4]);
        assert_eq!(store.get("after").await.unwrap(), b"x");
    }

    #[tokio::test]
    async fn test_compare_and_set_is_checked() {
        let dir = TempDir::new().unwrap();
        let store = FileStore::open(dir.path()).unwrap();
        assert!(store.compare_and_set("k", b"", b"1".to_vec()).await.unwrap());
        assert!(!store.compare_and_set("k", b"", b"2".to_vec()).await.unwrap());
        assert_eq!(store.get("k").await.unwrap(), b"1");
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_concurrent_writers_share_the_log() {
        let dir = TempDir::new().unwrap();
        let store = Arc::new(FileStore::open_with_segment_size(dir.path(), 4).unwrap());

        let handles: Vec<_> = (0..8u8)
            .map(|i| {
                let store = store.clone();
                tokio::spawn(async move { store.set(&format!("k{}", i), vec![i]).await })
            })
            .collect();
        for handle in handles {
            handle.await.unwrap().unwrap();
        }
        assert_eq!(store.segment_count().await, 2);
        drop(store);

        let store = FileStore::open_with_segment_size(dir.path(), 4).unwrap();
        for i in 0..8u8 {
            assert_eq!(store.get(&format!("k{}", i)).await.unwrap(), vec![i]);
        }
    }
}
