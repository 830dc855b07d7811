use std::collections::hash_map::DefaultHasher;
use std::collections::HashMap;
use std::hash::{Hash, Hasher};

use parking_lot::Mutex;

/// A bucket holds up to `bucket_size` entries plus its own depth and id.
/// The id is the bucket's low `local_depth` bit pattern; every directory
/// slot whose index matches `id mod 2^local_depth` points at the bucket.
struct Bucket<K, V> {
    id: usize,
    local_depth: usize,
    items: HashMap<K, V>,
}

struct Inner<K, V> {
    global_depth: usize,
    /// Directory indexed by the low `global_depth` bits of the key hash;
    /// values are indices into `buckets`.
    directory: Vec<usize>,
    buckets: Vec<Bucket<K, V>>,
    pair_count: usize,
}

/// Extendible hash table: a directory of bucket references that doubles
/// only when a splitting bucket's local depth exceeds the global depth.
/// Used as the buffer pool's page table; a single mutex serialises all
/// public operations, which is acceptable because the buffer pool already
/// serialises at a coarser grain.
pub struct ExtendibleHashTable<K, V> {
    bucket_size: usize,
    inner: Mutex<Inner<K, V>>,
}

impl<K, V> ExtendibleHashTable<K, V>
where
    K: Hash + Eq + Clone,
    V: Clone,
{
    pub fn new(bucket_size: usize) -> Self {
        assert!(bucket_size > 0);
        Self {
            bucket_size,
            inner: Mutex::new(Inner {
                global_depth: 0,
                directory: vec![0],
                buckets: vec![Bucket {
                    id: 0,
                    local_depth: 0,
                    items: HashMap::new(),
                }],
                pair_count: 0,
            }),
        }
    }

    fn hash(key: &K) -> u64 {
        let mut hasher = DefaultHasher::new();
        key.hash(&mut hasher);
        hasher.finish()
    }

    pub fn find(&self, key: &K) -> Option<V> {
        let inner = self.inner.lock();
        let slot = (Self::hash(key) as usize) & ((1 << inner.global_depth) - 1);
        let bucket = &inner.buckets[inner.directory[slot]];
        bucket.items.get(key).cloned()
    }

    /// Inserts a pair, overwriting the value on a duplicate key. Splits the
    /// target bucket when it exceeds capacity.
    pub fn insert(&self, key: K, value: V) {
        let mut inner = self.inner.lock();

        let slot = (Self::hash(&key) as usize) & ((1 << inner.global_depth) - 1);
        let bucket_idx = inner.directory[slot];
        if inner.buckets[bucket_idx]
            .items
            .insert(key, value)
            .is_none()
        {
            inner.pair_count += 1;
        }

        if inner.buckets[bucket_idx].items.len() > self.bucket_size {
            self.split(&mut inner, bucket_idx);
        }
    }

    pub fn remove(&self, key: &K) -> bool {
        let mut inner = self.inner.lock();
        let slot = (Self::hash(key) as usize) & ((1 << inner.global_depth) - 1);
        let bucket_idx = inner.directory[slot];
        if inner.buckets[bucket_idx].items.remove(key).is_some() {
            inner.pair_count -= 1;
            true
        } else {
            false
        }
    }

    pub fn global_depth(&self) -> usize {
        self.inner.lock().global_depth
    }

    /// Local depth of the bucket a directory slot points at.
    pub fn local_depth(&self, directory_index: usize) -> usize {
        let inner = self.inner.lock();
        inner.buckets[inner.directory[directory_index]].local_depth
    }

    pub fn num_buckets(&self) -> usize {
        self.inner.lock().buckets.len()
    }

    pub fn size(&self) -> usize {
        self.inner.lock().pair_count
    }

    pub fn is_empty(&self) -> bool {
        self.size() == 0
    }

    /// Splits an overfull bucket: raise its local depth and re-partition by
    /// the newly significant hash bit, retrying while one side stays empty.
    /// The directory doubles when the bucket's depth outgrows the global
    /// depth; otherwise only the slots addressing the new bucket move.
    fn split(&self, inner: &mut Inner<K, V>, bucket_idx: usize) {
        let new_items;
        loop {
            let bucket = &mut inner.buckets[bucket_idx];
            bucket.local_depth += 1;
            assert!(
                bucket.local_depth < u64::BITS as usize,
                "extendible hash exhausted the hash width"
            );

            let bit = 1u64 << (bucket.local_depth - 1);
            let mut high: HashMap<K, V> = HashMap::new();
            let keys: Vec<K> = bucket
                .items
                .keys()
                .filter(|k| Self::hash(k) & bit != 0)
                .cloned()
                .collect();
            for k in keys {
                let v = bucket.items.remove(&k).unwrap();
                high.insert(k, v);
            }

            if high.is_empty() {
                continue;
            }
            if bucket.items.is_empty() {
                // Everything landed on the high side; keep it in place and
                // examine the next bit.
                bucket.items = high;
                bucket.id |= bit as usize;
                continue;
            }

            new_items = high;
            break;
        }

        let local_depth = inner.buckets[bucket_idx].local_depth;
        let new_id = inner.buckets[bucket_idx].id | (1 << (local_depth - 1));
        let new_idx = inner.buckets.len();
        inner.buckets.push(Bucket {
            id: new_id,
            local_depth,
            items: new_items,
        });

        if local_depth > inner.global_depth {
            // Double the directory once per missing depth bit, then re-index
            // every slot against the bucket it now addresses.
            let factor = 1usize << (local_depth - inner.global_depth);
            let old_len = inner.directory.len();
            inner.global_depth = local_depth;

            let mut directory = Vec::with_capacity(old_len * factor);
            for _ in 0..factor {
                directory.extend_from_slice(&inner.directory);
            }
            inner.directory = directory;
        }

        // Every slot whose low bits spell the new bucket's id moves over;
        // the matching slots recur at strides of 2^local_depth.
        let mask = (1 << local_depth) - 1;
        let dir_len = inner.directory.len();
        let mut slot = new_id & mask;
        while slot < dir_len {
            inner.directory[slot] = new_idx;
            slot += 1 << local_depth;
        }

        // The old bucket may still spill over if the re-partition was skewed.
        if inner.buckets[bucket_idx].items.len() > self.bucket_size {
            self.split(inner, bucket_idx);
        } else if inner.buckets[new_idx].items.len() > self.bucket_size {
            self.split(inner, new_idx);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_hash_insert_find() {
        let table: ExtendibleHashTable<u32, u32> = ExtendibleHashTable::new(4);

        for i in 0..20 {
            table.insert(i, i * 10);
        }

        for i in 0..20 {
            assert_eq!(table.find(&i), Some(i * 10), "lost key {}", i);
        }
        assert_eq!(table.find(&99), None);
        assert_eq!(table.size(), 20);
    }

    #[test]
    fn test_hash_overwrite_duplicate() {
        let table: ExtendibleHashTable<u32, String> = ExtendibleHashTable::new(4);

        table.insert(1, "a".to_string());
        table.insert(1, "b".to_string());

        assert_eq!(table.find(&1), Some("b".to_string()));
        assert_eq!(table.size(), 1);
    }

    #[test]
    fn test_hash_remove() {
        let table: ExtendibleHashTable<u32, u32> = ExtendibleHashTable::new(4);

        for i in 0..10 {
            table.insert(i, i);
        }
        assert!(table.remove(&3));
        assert!(!table.remove(&3));
        assert_eq!(table.find(&3), None);
        assert_eq!(table.size(), 9);
    }

    #[test]
    fn test_hash_splits_grow_directory() {
        let table: ExtendibleHashTable<u32, u32> = ExtendibleHashTable::new(2);

        for i in 0..100 {
            table.insert(i, i);
        }

        assert!(table.num_buckets() > 1);
        assert!(table.global_depth() >= 1);
        for i in 0..100 {
            assert_eq!(table.find(&i), Some(i), "lost key {} after splits", i);
        }
    }

    #[test]
    fn test_hash_local_depth_bounded_by_global() {
        let table: ExtendibleHashTable<u64, u64> = ExtendibleHashTable::new(3);

        for i in 0..200 {
            table.insert(i, i);
        }

        let global = table.global_depth();
        for slot in 0..(1 << global) {
            assert!(table.local_depth(slot) <= global);
        }
    }

    #[test]
    fn test_hash_many_keys_large_buckets() {
        let table: ExtendibleHashTable<u32, u32> = ExtendibleHashTable::new(50);

        for i in 0..1000 {
            table.insert(i, 1000 - i);
        }
        for i in 0..1000 {
            assert_eq!(table.find(&i), Some(1000 - i));
        }
    }
}
