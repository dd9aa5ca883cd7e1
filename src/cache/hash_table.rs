//! Fixed-bucket, open-chaining hash table keyed by virtual path.
//!
//! The conceptual design calls for `clone`/`copy`/`free_clone` operations so
//! a caller can read a record after dropping the reader/writer lock. Because
//! entries are held behind `Arc<FileEntry>` rather than owned allocations,
//! cloning the `Arc` (an atomic refcount bump) already gives every caller
//! its own handle that outlives the lock guard — there is no separate
//! "free" step to adapt, since the last `Arc` drop reclaims the record.

use std::sync::Arc;

use crate::cache::{FileEntry, Lookup};
use crate::fingerprint::path_hash;

const BUCKET_COUNT: usize = 4096;

enum Slot {
    Entry(Arc<FileEntry>),
    LocalFs,
    LoopFs,
}

/// The filename cache itself: `alloc`, `get`, `invalidate`.
pub struct HashTable {
    buckets: Vec<Vec<(String, Slot)>>,
}

impl HashTable {
    pub fn new() -> Self {
        HashTable {
            buckets: (0..BUCKET_COUNT).map(|_| Vec::new()).collect(),
        }
    }

    fn bucket_index(path: &str) -> usize {
        (path_hash(path) as usize) % BUCKET_COUNT
    }

    pub fn get(&self, path: &str) -> Lookup {
        let idx = Self::bucket_index(path);
        for (p, slot) in &self.buckets[idx] {
            if p == path {
                return match slot {
                    Slot::Entry(e) => Lookup::Entry(Arc::clone(e)),
                    Slot::LocalFs => Lookup::LocalFs,
                    Slot::LoopFs => Lookup::LoopFs,
                };
            }
        }
        Lookup::Miss
    }

    /// Overwrites any prior entry for `path` and returns a fresh owned
    /// handle to the inserted record.
    pub fn alloc(&mut self, path: &str, entry: FileEntry) -> Arc<FileEntry> {
        let arc = Arc::new(entry);
        self.insert_slot(path, Slot::Entry(Arc::clone(&arc)));
        arc
    }

    pub fn mark_local_fs(&mut self, path: &str) {
        self.insert_slot(path, Slot::LocalFs);
    }

    pub fn mark_loop_fs(&mut self, path: &str) {
        self.insert_slot(path, Slot::LoopFs);
    }

    pub fn invalidate(&mut self, path: &str) {
        let idx = Self::bucket_index(path);
        self.buckets[idx].retain(|(p, _)| p != path);
    }

    fn insert_slot(&mut self, path: &str, slot: Slot) {
        let idx = Self::bucket_index(path);
        let bucket = &mut self.buckets[idx];
        if let Some(existing) = bucket.iter_mut().find(|(p, _)| p == path) {
            existing.1 = slot;
        } else {
            bucket.push((path.to_string(), slot));
        }
    }
}

impl Default for HashTable {
    fn default() -> Self {
        Self::new()
    }
}
