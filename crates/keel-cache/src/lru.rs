//! Bounded LRU cache with predicate-gated eviction.

use keel_common::{KeelError, Result};
use std::collections::HashMap;
use std::hash::Hash;
use sysinfo::System;

/// Sentinel index meaning "no entry".
const NIL: usize = usize::MAX;

/// Minimum capacity returned by [`auto_capacity`].
const MIN_AUTO_CAPACITY: usize = 1_000;

/// Returns a cache capacity sized to 25% of available system RAM, assuming
/// `entry_bytes` per resident entry. Minimum 1,000 entries so caching stays
/// useful on low-memory systems.
pub fn auto_capacity(entry_bytes: usize) -> usize {
    let mut sys = System::new();
    sys.refresh_memory();

    let available_bytes = sys.available_memory() as usize;
    let target_bytes = available_bytes / 4;
    (target_bytes / entry_bytes.max(1)).max(MIN_AUTO_CAPACITY)
}

struct Entry<K, V> {
    key: K,
    value: V,
    prev: usize,
    next: usize,
}

/// A bounded map with LRU eviction.
///
/// Entries form a doubly-linked recency list over a slab; `get` promotes the
/// entry to the MRU end. Eviction never happens behind the caller's back:
/// `insert` consults an `evictable` predicate and fails with
/// [`KeelError::CacheFull`] when every resident entry is protected. This
/// keeps page semantics (a dirty page is the only current copy of its data)
/// out of the cache itself.
pub struct LruCache<K, V> {
    capacity: usize,
    /// Key to slab index.
    map: HashMap<K, usize>,
    /// Slab of entries linked in recency order.
    entries: Vec<Entry<K, V>>,
    /// MRU end of the recency list.
    head: usize,
    /// LRU end of the recency list.
    tail: usize,
}

impl<K, V> LruCache<K, V>
where
    K: Eq + Hash + Clone,
{
    /// Creates a cache bounded to `capacity` entries.
    ///
    /// # Panics
    ///
    /// Panics if `capacity` is zero.
    pub fn new(capacity: usize) -> Self {
        assert!(capacity > 0, "cache capacity must be non-zero");
        Self {
            capacity,
            map: HashMap::with_capacity(capacity),
            entries: Vec::with_capacity(capacity),
            head: NIL,
            tail: NIL,
        }
    }

    /// Returns the maximum number of entries.
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Returns the number of resident entries.
    pub fn len(&self) -> usize {
        self.map.len()
    }

    /// Returns true if the cache holds no entries.
    pub fn is_empty(&self) -> bool {
        self.map.is_empty()
    }

    /// Returns true if `key` is resident.
    pub fn contains(&self, key: &K) -> bool {
        self.map.contains_key(key)
    }

    /// Looks up `key` and promotes the entry to most-recently-used.
    pub fn get(&mut self, key: &K) -> Option<&V> {
        let idx = *self.map.get(key)?;
        self.detach(idx);
        self.attach_front(idx);
        Some(&self.entries[idx].value)
    }

    /// Looks up `key` without touching recency.
    pub fn peek(&self, key: &K) -> Option<&V> {
        let idx = *self.map.get(key)?;
        Some(&self.entries[idx].value)
    }

    /// Inserts or replaces an entry, promoting it to most-recently-used.
    ///
    /// At capacity, the least-recently-used entry for which `evictable`
    /// returns true is dropped to make room; the scan walks from the LRU end
    /// toward the MRU end. Returns the evicted pair, if any.
    ///
    /// # Errors
    ///
    /// Returns [`KeelError::CacheFull`] when the cache is at capacity and no
    /// entry is evictable.
    pub fn insert<F>(&mut self, key: K, value: V, evictable: F) -> Result<Option<(K, V)>>
    where
        F: Fn(&V) -> bool,
    {
        if let Some(&idx) = self.map.get(&key) {
            self.entries[idx].value = value;
            self.detach(idx);
            self.attach_front(idx);
            return Ok(None);
        }

        let evicted = if self.map.len() >= self.capacity {
            let victim = self.find_victim(&evictable).ok_or(KeelError::CacheFull)?;
            Some(self.replace(victim, key, value))
        } else {
            let idx = self.entries.len();
            self.entries.push(Entry {
                key: key.clone(),
                value,
                prev: NIL,
                next: NIL,
            });
            self.map.insert(key, idx);
            self.attach_front(idx);
            None
        };

        Ok(evicted)
    }

    /// Iterates over resident entries from most- to least-recently-used
    /// without touching recency.
    pub fn iter(&self) -> Iter<'_, K, V> {
        Iter {
            cache: self,
            next: self.head,
        }
    }

    /// Scans from the LRU end toward the MRU end for the first entry the
    /// predicate allows evicting.
    fn find_victim<F>(&self, evictable: &F) -> Option<usize>
    where
        F: Fn(&V) -> bool,
    {
        let mut idx = self.tail;
        while idx != NIL {
            if evictable(&self.entries[idx].value) {
                return Some(idx);
            }
            idx = self.entries[idx].prev;
        }
        None
    }

    /// Evicts the entry in slot `idx`, reusing the slot for the new entry.
    /// Returns the evicted pair.
    fn replace(&mut self, idx: usize, key: K, value: V) -> (K, V) {
        self.detach(idx);

        let old = std::mem::replace(
            &mut self.entries[idx],
            Entry {
                key: key.clone(),
                value,
                prev: NIL,
                next: NIL,
            },
        );
        self.map.remove(&old.key);
        self.map.insert(key, idx);
        self.attach_front(idx);

        (old.key, old.value)
    }

    /// Unlinks `idx` from the recency list.
    fn detach(&mut self, idx: usize) {
        let prev = self.entries[idx].prev;
        let next = self.entries[idx].next;

        if prev == NIL {
            self.head = next;
        } else {
            self.entries[prev].next = next;
        }
        if next == NIL {
            self.tail = prev;
        } else {
            self.entries[next].prev = prev;
        }
    }

    /// Links `idx` at the MRU end of the recency list.
    fn attach_front(&mut self, idx: usize) {
        self.entries[idx].prev = NIL;
        self.entries[idx].next = self.head;
        if self.head != NIL {
            self.entries[self.head].prev = idx;
        }
        self.head = idx;
        if self.tail == NIL {
            self.tail = idx;
        }
    }
}

/// Iterator over cache entries in recency order (MRU first).
pub struct Iter<'a, K, V> {
    cache: &'a LruCache<K, V>,
    next: usize,
}

impl<'a, K, V> Iterator for Iter<'a, K, V> {
    type Item = (&'a K, &'a V);

    fn next(&mut self) -> Option<Self::Item> {
        if self.next == NIL {
            return None;
        }
        let entry = &self.cache.entries[self.next];
        self.next = entry.next;
        Some((&entry.key, &entry.value))
    }
}
