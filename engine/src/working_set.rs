//! The bounded in-memory working set mirroring the three durable tables,
//! plus the pending-request bookkeeping the scheduler drives. A single
//! coarse `tokio::sync::Mutex` (owned by `Engine`) guards one
//! `WorkingSet` value covering all three maps, chosen over `RwLock`
//! because mutation here is write-serializing rather than readers/writer.

use std::collections::HashMap;
use std::time::Instant;

use storagesync_core::{Digest256, HeaderEntry, PartEntry};
use storagesync_storage::DescriptorRecord;

/// Hard cap shared by every in-memory map.
pub const WORKING_SET_CAP: usize = 500;

pub type HeaderKey = (Digest256, Digest256);
pub type PartKey = (Digest256, Digest256, Digest256);

#[derive(Clone, Copy, Debug)]
pub struct PendingPartRequest {
    pub last_request_time: Instant,
    pub in_flight: bool,
}

/// A bounded `HashMap` that silently drops inserts once it holds
/// `WORKING_SET_CAP` entries — new entries past the cap are still
/// written through to disk by the caller, just not mirrored in memory.
/// Returns whether the entry landed in memory so callers can tell that
/// apart from an actual error (it isn't one).
#[derive(Default)]
pub struct BoundedMap<K, V> {
    inner: HashMap<K, V>,
}

impl<K: std::hash::Hash + Eq + Clone, V> BoundedMap<K, V> {
    pub fn new() -> Self {
        BoundedMap {
            inner: HashMap::new(),
        }
    }

    pub fn len(&self) -> usize {
        self.inner.len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.is_empty()
    }

    pub fn get(&self, key: &K) -> Option<&V> {
        self.inner.get(key)
    }

    pub fn contains_key(&self, key: &K) -> bool {
        self.inner.contains_key(key)
    }

    pub fn remove(&mut self, key: &K) -> Option<V> {
        self.inner.remove(key)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&K, &V)> {
        self.inner.iter()
    }

    pub fn keys(&self) -> impl Iterator<Item = &K> {
        self.inner.keys()
    }

    /// Inserts `value`, but only if the map is under cap or the key
    /// already exists (an update to an existing entry is never dropped —
    /// only *new* entries are subject to the cap). Returns `true` if the
    /// map now holds the value in memory.
    pub fn try_insert(&mut self, key: K, value: V) -> bool {
        if self.inner.len() >= WORKING_SET_CAP && !self.inner.contains_key(&key) {
            return false;
        }
        self.inner.insert(key, value);
        true
    }

    pub fn clear(&mut self) {
        self.inner.clear();
    }
}

/// The three bounded caches plus the scheduler's pending-request metadata.
/// Owned exclusively by `Engine`, behind one `tokio::sync::Mutex`.
#[derive(Default)]
pub struct WorkingSet {
    pub headers: BoundedMap<HeaderKey, HeaderEntry>,
    pub descriptors: BoundedMap<Digest256, DescriptorRecord>,
    pub parts: BoundedMap<PartKey, PartEntry>,
    pub pending_header_probes: HashMap<HeaderKey, Instant>,
    pub pending_part_requests: HashMap<PartKey, PendingPartRequest>,
}

impl WorkingSet {
    pub fn new() -> Self {
        WorkingSet::default()
    }

    /// Drops a completed part row from memory along with its pending-request
    /// bookkeeping, as the scheduler's reconcile pass does when retiring
    /// finished entries.
    pub fn retire_part(&mut self, key: PartKey) {
        self.parts.remove(&key);
        self.pending_part_requests.remove(&key);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn bounded_map_drops_new_entries_past_cap() {
        let mut map: BoundedMap<u32, u32> = BoundedMap::new();
        for i in 0..600 {
            map.try_insert(i, i);
        }
        assert_eq!(map.len(), WORKING_SET_CAP);
    }

    #[test]
    fn bounded_map_allows_updates_to_existing_keys_past_cap() {
        let mut map: BoundedMap<u32, u32> = BoundedMap::new();
        for i in 0..WORKING_SET_CAP as u32 {
            map.try_insert(i, i);
        }
        assert!(map.try_insert(0, 999));
        assert_eq!(map.get(&0), Some(&999));
        assert!(!map.try_insert(WORKING_SET_CAP as u32, 1));
        assert_eq!(map.len(), WORKING_SET_CAP);
    }
}
