//! Key index module
//!
//! Per-node index of owned records, sharded into 256 buckets by `key mod 256`.

use crate::dht::node::Key;
use crate::storage::backend::Location;

/// Number of buckets (one per value of the key's low byte)
pub const BUCKET_COUNT: usize = 256;

/// An owned record: the key and where its blob lives
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IndexEntry {
    pub key: Key,
    pub location: Location,
}

impl IndexEntry {
    /// Create a new entry
    pub fn new(key: Key, location: Location) -> Self {
        Self { key, location }
    }
}

/// A bucket in the index
#[derive(Debug, Clone, Default)]
pub struct IndexBucket {
    /// Entries in insertion order
    pub entries: Vec<IndexEntry>,
}

impl IndexBucket {
    /// Insert an entry, replacing any entry with the same key.
    ///
    /// Returns the replaced location.
    pub fn insert(&mut self, entry: IndexEntry) -> Option<Location> {
        if let Some(pos) = self.entries.iter().position(|e| e.key == entry.key) {
            let old = std::mem::replace(&mut self.entries[pos].location, entry.location);
            return Some(old);
        }
        self.entries.push(entry);
        None
    }

    /// Remove the entry for a key
    pub fn remove(&mut self, key: &Key) -> Option<IndexEntry> {
        let pos = self.entries.iter().position(|e| e.key == *key)?;
        Some(self.entries.remove(pos))
    }

    /// Find the entry for a key
    pub fn find(&self, key: &Key) -> Option<&IndexEntry> {
        self.entries.iter().find(|e| e.key == *key)
    }

    /// Number of entries in the bucket
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Check if the bucket is empty
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

/// Index of records owned by one node
#[derive(Debug, Clone)]
pub struct KeyIndex {
    buckets: Vec<IndexBucket>,
}

impl Default for KeyIndex {
    fn default() -> Self {
        Self::new()
    }
}

impl KeyIndex {
    /// Create an empty index
    pub fn new() -> Self {
        Self {
            buckets: vec![IndexBucket::default(); BUCKET_COUNT],
        }
    }

    /// Insert or replace the entry for `key`
    pub fn insert(&mut self, key: Key, location: Location) -> Option<Location> {
        self.buckets[Self::bucket_index(&key)].insert(IndexEntry::new(key, location))
    }

    /// Look up the location stored for `key`
    pub fn get(&self, key: &Key) -> Option<&Location> {
        self.buckets[Self::bucket_index(key)].find(key).map(|e| &e.location)
    }

    /// Remove the entry for `key`
    pub fn remove(&mut self, key: &Key) -> Option<IndexEntry> {
        self.buckets[Self::bucket_index(key)].remove(key)
    }

    /// Check whether `key` is indexed
    pub fn contains(&self, key: &Key) -> bool {
        self.get(key).is_some()
    }

    /// Iterate over all entries, bucket by bucket
    pub fn entries(&self) -> impl Iterator<Item = &IndexEntry> {
        self.buckets.iter().flat_map(|b| b.entries.iter())
    }

    /// Get a bucket by its index
    pub fn bucket(&self, index: u8) -> &IndexBucket {
        &self.buckets[index as usize]
    }

    /// Total number of entries
    pub fn len(&self) -> usize {
        self.buckets.iter().map(|b| b.len()).sum()
    }

    /// Check if the index is empty
    pub fn is_empty(&self) -> bool {
        self.buckets.iter().all(|b| b.is_empty())
    }

    fn bucket_index(key: &Key) -> usize {
        key.bucket() as usize
    }
}
