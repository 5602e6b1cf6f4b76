//! In-memory shard store with per-key locking.
//!
//! Each node holds two of these: the primary copy of its own key range and
//! the replica of its ring predecessor's range. Writers take a per-key
//! guard that the replication path holds across its forwarding round-trip,
//! so a replica observes writes to any one key in the primary's order.
//!
//! Locking is bucket-granular: keys spread over enough buckets that
//! independent keys effectively never share a critical section.

pub mod error;

pub use error::Error;

use std::collections::HashMap;
use std::hash::Hasher;
use std::sync::atomic::{AtomicUsize, Ordering};

use bytes::Bytes;
use fnv::FnvHasher;
use tokio::sync::{Mutex, MutexGuard};

use crate::sharding::{Key, KEY_SIZE};

const BUCKETS: usize = 1024;

pub struct ShardStore {
    buckets: Vec<Mutex<HashMap<Key, Bytes>>>,
    mem_used: AtomicUsize,
    mem_limit: usize,
    len: AtomicUsize,
}

impl ShardStore {
    pub fn new() -> Self {
        Self::with_limit(usize::MAX)
    }

    /// A store that fails writes with [`Error::OutOfSpace`] once it holds
    /// more than `limit` bytes of keys and values.
    pub fn with_limit(limit: usize) -> Self {
        Self {
            buckets: (0..BUCKETS).map(|_| Mutex::new(HashMap::new())).collect(),
            mem_used: AtomicUsize::new(0),
            mem_limit: limit,
            len: AtomicUsize::new(0),
        }
    }

    fn bucket(&self, key: &Key) -> &Mutex<HashMap<Key, Bytes>> {
        let mut hasher = FnvHasher::default();
        hasher.write(key.as_bytes());

        &self.buckets[hasher.finish() as usize % BUCKETS]
    }

    pub async fn get(&self, key: &Key) -> Option<Bytes> {
        self.bucket(key).lock().await.get(key).cloned()
    }

    /// Take the write lock for a key. Every other writer of the same key
    /// blocks until the guard drops.
    pub async fn lock(&self, key: Key) -> KeyGuard<'_> {
        KeyGuard {
            store: self,
            key,
            entries: self.bucket(&key).lock().await,
        }
    }

    /// Install a value under its own lock, returning the displaced one.
    pub async fn put(&self, key: Key, value: Bytes) -> Result<Option<Bytes>, Error> {
        self.lock(key).await.put(value)
    }

    pub fn len(&self) -> usize {
        self.len.load(Ordering::Relaxed)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Number of snapshot chunks; pair with [`Self::chunk`] to walk the
    /// store without holding any lock for long.
    pub fn chunk_count(&self) -> usize {
        BUCKETS
    }

    /// Snapshot of one chunk. Weakly consistent with concurrent writers:
    /// every key present when the walk started is visited.
    pub async fn chunk(&self, index: usize) -> Vec<(Key, Bytes)> {
        self.buckets[index]
            .lock()
            .await
            .iter()
            .map(|(key, value)| (*key, value.clone()))
            .collect()
    }

    /// Snapshot of the whole store.
    pub async fn entries(&self) -> Vec<(Key, Bytes)> {
        let mut entries = Vec::with_capacity(self.len());

        for index in 0..self.chunk_count() {
            entries.extend(self.chunk(index).await);
        }

        entries
    }
}

impl Default for ShardStore {
    fn default() -> Self {
        Self::new()
    }
}

/// Exclusive access to one key, held across composite operations.
pub struct KeyGuard<'a> {
    store: &'a ShardStore,
    key: Key,
    entries: MutexGuard<'a, HashMap<Key, Bytes>>,
}

impl KeyGuard<'_> {
    pub fn get(&self) -> Option<Bytes> {
        self.entries.get(&self.key).cloned()
    }

    /// Install a value, returning the displaced one.
    pub fn put(&mut self, value: Bytes) -> Result<Option<Bytes>, Error> {
        let added = KEY_SIZE + value.len();
        let freed = self
            .entries
            .get(&self.key)
            .map(|old| KEY_SIZE + old.len())
            .unwrap_or(0);
        let used = self.store.mem_used.fetch_add(added, Ordering::Relaxed) + added;

        if used.saturating_sub(freed) > self.store.mem_limit {
            self.store.mem_used.fetch_sub(added, Ordering::Relaxed);
            return Err(Error::OutOfSpace);
        }

        let displaced = self.entries.insert(self.key, value);

        match displaced {
            Some(ref old) => {
                self.store
                    .mem_used
                    .fetch_sub(KEY_SIZE + old.len(), Ordering::Relaxed);
            }
            None => {
                self.store.len.fetch_add(1, Ordering::Relaxed);
            }
        }

        Ok(displaced)
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use std::sync::Arc;
    use std::time::Duration;

    fn key(byte: u8) -> Key {
        Key::new([byte; KEY_SIZE])
    }

    #[tokio::test]
    async fn test_put_get() {
        let store = ShardStore::new();

        assert!(store.get(&key(1)).await.is_none());

        let displaced = store.put(key(1), Bytes::from_static(b"one")).await.unwrap();
        assert!(displaced.is_none());
        assert_eq!(store.get(&key(1)).await.unwrap(), &b"one"[..]);
        assert_eq!(store.len(), 1);

        let displaced = store
            .put(key(1), Bytes::from_static(b"uno"))
            .await
            .unwrap()
            .unwrap();
        assert_eq!(&displaced[..], b"one");
        assert_eq!(store.get(&key(1)).await.unwrap(), &b"uno"[..]);
        assert_eq!(store.len(), 1);
    }

    #[tokio::test]
    async fn test_out_of_space() {
        let store = ShardStore::with_limit(KEY_SIZE + 8);

        store.put(key(1), Bytes::from_static(b"12345678")).await.unwrap();
        let err = store
            .put(key(2), Bytes::from_static(b"x"))
            .await
            .unwrap_err();
        assert_eq!(err, Error::OutOfSpace);

        // Replacing a value stays within budget.
        store.put(key(1), Bytes::from_static(b"1234")).await.unwrap();
    }

    #[tokio::test]
    async fn test_entries() {
        let store = ShardStore::new();

        for byte in 0..50u8 {
            store
                .put(key(byte), Bytes::copy_from_slice(&[byte]))
                .await
                .unwrap();
        }

        let mut entries = store.entries().await;
        assert_eq!(entries.len(), 50);

        entries.sort_by_key(|(_, value)| value[0]);
        for (byte, (k, value)) in entries.iter().enumerate() {
            assert_eq!(*k, key(byte as u8));
            assert_eq!(value[0], byte as u8);
        }
    }

    #[tokio::test]
    async fn test_guard_serializes_writers() {
        let store = Arc::new(ShardStore::new());
        let mut guard = store.lock(key(7)).await;
        guard.put(Bytes::from_static(b"first")).unwrap();

        let store2 = store.clone();
        let writer = tokio::spawn(async move {
            store2.put(key(7), Bytes::from_static(b"second")).await.unwrap();
        });

        // The spawned writer is stuck behind the guard.
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert!(!writer.is_finished());
        assert_eq!(guard.get().unwrap(), &b"first"[..]);

        drop(guard);
        writer.await.unwrap();
        assert_eq!(store.get(&key(7)).await.unwrap(), &b"second"[..]);
    }
}
