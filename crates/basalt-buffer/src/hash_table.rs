//! Extendible hash table used as the buffer pool's page directory.

use parking_lot::Mutex;
use std::collections::hash_map::DefaultHasher;
use std::hash::{BuildHasher, BuildHasherDefault, Hash};
use tracing::trace;

/// A dictionary with an extendible-hashing directory.
///
/// The directory holds `2^global_depth` slots, each pointing at a bucket in
/// a dense arena; a bucket with local depth `d` is shared by every slot whose
/// low `d` hash bits agree. Buckets split on overflow, doubling the directory
/// when the overflowing bucket's local depth has caught up with the global
/// depth. Buckets are never merged.
///
/// A single latch serializes all operations. The hasher is pluggable so tests
/// can pin slot distributions; the default is the deterministic SipHash used
/// by the standard library.
pub struct ExtendibleHashTable<K, V, S = BuildHasherDefault<DefaultHasher>> {
    /// Maximum entries per bucket.
    bucket_size: usize,
    /// Hash function factory.
    hash_builder: S,
    /// Directory and bucket arena, guarded by the table latch.
    inner: Mutex<Directory<K, V>>,
}

struct Directory<K, V> {
    /// Number of low-order hash bits used to index the directory.
    global_depth: u32,
    /// Number of distinct buckets addressed by the directory.
    num_buckets: usize,
    /// Directory slots: indexes into `buckets`, length `2^global_depth`.
    dir: Vec<usize>,
    /// Bucket arena. Split victims are reused in place for the zero half.
    buckets: Vec<Bucket<K, V>>,
}

struct Bucket<K, V> {
    /// Number of hash bits shared by every key in this bucket.
    depth: u32,
    /// Entries, unique by key.
    items: Vec<(K, V)>,
}

#[inline]
fn slot_index(hash: u64, global_depth: u32) -> usize {
    (hash & ((1u64 << global_depth) - 1)) as usize
}

impl<K, V> ExtendibleHashTable<K, V>
where
    K: Hash + Eq,
{
    /// Creates a table with the given bucket capacity and the default hasher.
    pub fn new(bucket_size: usize) -> Self {
        Self::with_hasher(bucket_size, BuildHasherDefault::default())
    }
}

impl<K, V, S> ExtendibleHashTable<K, V, S>
where
    K: Hash + Eq,
    S: BuildHasher,
{
    /// Creates a table with the given bucket capacity and hasher.
    pub fn with_hasher(bucket_size: usize, hash_builder: S) -> Self {
        assert!(bucket_size > 0, "bucket_size must be non-zero");
        Self {
            bucket_size,
            hash_builder,
            inner: Mutex::new(Directory {
                global_depth: 0,
                num_buckets: 1,
                dir: vec![0],
                buckets: vec![Bucket {
                    depth: 0,
                    items: Vec::new(),
                }],
            }),
        }
    }

    #[inline]
    fn hash(&self, key: &K) -> u64 {
        self.hash_builder.hash_one(key)
    }

    /// Looks up the value for a key.
    pub fn find(&self, key: &K) -> Option<V>
    where
        V: Clone,
    {
        let inner = self.inner.lock();
        let idx = slot_index(self.hash(key), inner.global_depth);
        let bucket = &inner.buckets[inner.dir[idx]];
        bucket
            .items
            .iter()
            .find(|(k, _)| k == key)
            .map(|(_, v)| v.clone())
    }

    /// Inserts a key-value pair, overwriting the value on a duplicate key.
    pub fn insert(&self, key: K, value: V) {
        let mut inner = self.inner.lock();
        let hash = self.hash(&key);

        // Overwrite in place if the key is already present; no growth needed.
        let idx = slot_index(hash, inner.global_depth);
        let bucket_id = inner.dir[idx];
        if let Some(entry) = inner.buckets[bucket_id]
            .items
            .iter_mut()
            .find(|(k, _)| *k == key)
        {
            entry.1 = value;
            return;
        }

        let mut idx = idx;
        loop {
            let bucket_id = inner.dir[idx];
            if inner.buckets[bucket_id].items.len() < self.bucket_size {
                break;
            }

            let local = inner.buckets[bucket_id].depth;
            if local == inner.global_depth {
                // Double the directory: append a copy of every slot pointer.
                let old_len = inner.dir.len();
                for i in 0..old_len {
                    let target = inner.dir[i];
                    inner.dir.push(target);
                }
                inner.global_depth += 1;
                trace!(global_depth = inner.global_depth, "doubled hash directory");
            }

            // Split the victim: it keeps the slots whose bit `local` is 0,
            // a fresh bucket takes the slots whose bit `local` is 1.
            let entries = std::mem::take(&mut inner.buckets[bucket_id].items);
            inner.buckets[bucket_id].depth = local + 1;
            let new_id = inner.buckets.len();
            inner.buckets.push(Bucket {
                depth: local + 1,
                items: Vec::new(),
            });
            inner.num_buckets += 1;

            for slot in 0..inner.dir.len() {
                if inner.dir[slot] == bucket_id && (slot >> local) & 1 == 1 {
                    inner.dir[slot] = new_id;
                }
            }

            // Rehash the victim's entries between the pair.
            for (k, v) in entries {
                let target = slot_index(self.hash(&k), inner.global_depth);
                let target_bucket = inner.dir[target];
                inner.buckets[target_bucket].items.push((k, v));
            }

            // The target bucket may still be full after an adversarial
            // collision; recompute and go again.
            idx = slot_index(hash, inner.global_depth);
        }

        let bucket_id = inner.dir[idx];
        inner.buckets[bucket_id].items.push((key, value));
    }

    /// Removes a key. Returns true if it was present.
    pub fn remove(&self, key: &K) -> bool {
        let mut inner = self.inner.lock();
        let idx = slot_index(self.hash(key), inner.global_depth);
        let bucket_id = inner.dir[idx];
        let items = &mut inner.buckets[bucket_id].items;
        match items.iter().position(|(k, _)| k == key) {
            Some(pos) => {
                items.remove(pos);
                true
            }
            None => false,
        }
    }

    /// Returns the global depth of the directory.
    pub fn global_depth(&self) -> u32 {
        self.inner.lock().global_depth
    }

    /// Returns the local depth of the bucket addressed by a directory slot.
    pub fn local_depth(&self, dir_index: usize) -> u32 {
        let inner = self.inner.lock();
        inner.buckets[inner.dir[dir_index]].depth
    }

    /// Returns the number of distinct buckets.
    pub fn num_buckets(&self) -> usize {
        self.inner.lock().num_buckets
    }

    /// Returns the total number of entries in the table.
    pub fn len(&self) -> usize {
        let inner = self.inner.lock();
        let mut seen = vec![false; inner.buckets.len()];
        let mut count = 0;
        for &bucket_id in &inner.dir {
            if !seen[bucket_id] {
                seen[bucket_id] = true;
                count += inner.buckets[bucket_id].items.len();
            }
        }
        count
    }

    /// Returns true if the table has no entries.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
