use std::collections::hash_map::DefaultHasher;
use std::hash::{BuildHasher, BuildHasherDefault, Hash};

use log::trace;
use parking_lot::Mutex;

/// Deepest a bucket may split to. A bucket at this depth grows past
/// `bucket_size` instead of splitting again.
const MAX_DEPTH: u32 = 32;

/// A bucket holds at most `bucket_size` entries sharing the low `depth` bits
/// of their hash, except when splitting cannot separate them.
#[derive(Debug)]
struct Bucket<K, V> {
    depth: u32,
    items: Vec<(K, V)>,
}

impl<K: Eq, V> Bucket<K, V> {
    fn new(depth: u32, capacity: usize) -> Self {
        Self {
            depth,
            items: Vec::with_capacity(capacity),
        }
    }

    fn position(&self, key: &K) -> Option<usize> {
        self.items.iter().position(|(k, _)| k == key)
    }
}

#[derive(Debug)]
struct Directory<K, V> {
    global_depth: u32,
    /// Directory slot -> index into `buckets`; several slots may share a bucket
    slots: Vec<usize>,
    buckets: Vec<Bucket<K, V>>,
    len: usize,
}

impl<K, V> Directory<K, V> {
    fn slot_of(&self, hash: u64) -> usize {
        (hash as usize) & ((1usize << self.global_depth) - 1)
    }
}

/// Extendible hash table used as the buffer pool's page table.
///
/// The directory grows by doubling and buckets split locally, so an insert
/// never rehashes more than the one overflowing bucket. The whole table sits
/// behind a single mutex: every operation, including a split, is atomic with
/// respect to every other.
///
/// The default hasher is deterministic; supply any `BuildHasher` with
/// [`ExtendibleHashTable::with_hasher`].
pub struct ExtendibleHashTable<K, V, S = BuildHasherDefault<DefaultHasher>> {
    bucket_size: usize,
    hash_builder: S,
    inner: Mutex<Directory<K, V>>,
}

impl<K, V> ExtendibleHashTable<K, V>
where
    K: Eq + Hash,
{
    /// Creates an empty table with global depth 0 and a single bucket.
    pub fn new(bucket_size: usize) -> Self {
        Self::with_hasher(bucket_size, BuildHasherDefault::default())
    }
}

impl<K, V, S> ExtendibleHashTable<K, V, S>
where
    K: Eq + Hash,
    S: BuildHasher,
{
    pub fn with_hasher(bucket_size: usize, hash_builder: S) -> Self {
        assert!(bucket_size > 0, "bucket size must be at least 1");
        Self {
            bucket_size,
            hash_builder,
            inner: Mutex::new(Directory {
                global_depth: 0,
                slots: vec![0],
                buckets: vec![Bucket::new(0, bucket_size)],
                len: 0,
            }),
        }
    }

    fn hash(&self, key: &K) -> u64 {
        self.hash_builder.hash_one(key)
    }

    /// Looks up the value stored for `key`.
    pub fn find(&self, key: &K) -> Option<V>
    where
        V: Clone,
    {
        let dir = self.inner.lock();
        let bucket = &dir.buckets[dir.slots[dir.slot_of(self.hash(key))]];
        bucket
            .items
            .iter()
            .find(|(k, _)| k == key)
            .map(|(_, v)| v.clone())
    }

    /// Removes `key`. Returns false if it was not present.
    ///
    /// Buckets are never merged and the directory never shrinks.
    pub fn remove(&self, key: &K) -> bool {
        let mut dir = self.inner.lock();
        let slot = dir.slot_of(self.hash(key));
        let bucket_idx = dir.slots[slot];
        let bucket = &mut dir.buckets[bucket_idx];
        match bucket.position(key) {
            Some(pos) => {
                bucket.items.swap_remove(pos);
                dir.len -= 1;
                true
            }
            None => false,
        }
    }

    /// Inserts or overwrites the value for `key`.
    ///
    /// A full target bucket is split (doubling the directory first when the
    /// bucket is already at global depth) and the insert is retried, since
    /// the key may now map to the new sibling. When every entry in the bucket
    /// has the same full hash as `key`, or the bucket is at the maximum
    /// depth, no split can make room and the bucket overflows instead.
    pub fn insert(&self, key: K, value: V) {
        let hash = self.hash(&key);
        let mut dir = self.inner.lock();

        loop {
            let slot = dir.slot_of(hash);
            let bucket_idx = dir.slots[slot];
            let bucket = &mut dir.buckets[bucket_idx];

            if let Some(pos) = bucket.position(&key) {
                bucket.items[pos].1 = value;
                return;
            }
            if bucket.items.len() < self.bucket_size {
                bucket.items.push((key, value));
                dir.len += 1;
                return;
            }
            let inseparable = bucket.depth >= MAX_DEPTH
                || bucket.items.iter().all(|(k, _)| self.hash(k) == hash);
            if inseparable {
                trace!("Bucket {} overflowing past {} entries", bucket_idx, self.bucket_size);
                bucket.items.push((key, value));
                dir.len += 1;
                return;
            }

            self.split_bucket(&mut dir, bucket_idx);
        }
    }

    fn split_bucket(&self, dir: &mut Directory<K, V>, bucket_idx: usize) {
        let local_depth = dir.buckets[bucket_idx].depth;

        if local_depth == dir.global_depth {
            dir.slots.extend_from_within(..);
            dir.global_depth += 1;
            trace!(
                "Page table directory doubled to global depth {}",
                dir.global_depth
            );
        }

        let split_bit = 1u64 << local_depth;
        let new_idx = dir.buckets.len();

        let old_items = std::mem::take(&mut dir.buckets[bucket_idx].items);
        let (moved, kept): (Vec<_>, Vec<_>) = old_items
            .into_iter()
            .partition(|(k, _)| self.hash(k) & split_bit != 0);

        let old_bucket = &mut dir.buckets[bucket_idx];
        old_bucket.depth = local_depth + 1;
        old_bucket.items = kept;

        let mut sibling = Bucket::new(local_depth + 1, self.bucket_size);
        sibling.items = moved;
        dir.buckets.push(sibling);

        for (slot, target) in dir.slots.iter_mut().enumerate() {
            if *target == bucket_idx && (slot as u64) & split_bit != 0 {
                *target = new_idx;
            }
        }
    }

    /// Number of hash bits the directory currently indexes on.
    pub fn global_depth(&self) -> u32 {
        self.inner.lock().global_depth
    }

    /// Local depth of the bucket referenced by directory slot `dir_index`.
    pub fn local_depth(&self, dir_index: usize) -> u32 {
        let dir = self.inner.lock();
        dir.buckets[dir.slots[dir_index]].depth
    }

    /// Number of distinct buckets.
    pub fn num_buckets(&self) -> usize {
        self.inner.lock().buckets.len()
    }

    /// Number of stored entries.
    pub fn len(&self) -> usize {
        self.inner.lock().len
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Snapshot of every key currently in the table.
    pub fn keys(&self) -> Vec<K>
    where
        K: Clone,
    {
        let dir = self.inner.lock();
        dir.buckets
            .iter()
            .flat_map(|bucket| bucket.items.iter().map(|(k, _)| k.clone()))
            .collect()
    }
}
