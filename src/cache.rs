//! Bounded in-memory response cache with LRU eviction and per-entry TTL.
//!
//! Sits on the hot path of every HTTP handler, storing fully serialized
//! response bodies (JSON or PNG bytes). Lookups are O(1) through a hash
//! map; recency is a doubly linked list threaded through a slab of
//! entries by index, so no unsafe pointer juggling is needed. A single
//! mutex guards the whole structure: even `get` mutates, because a hit
//! moves the entry to the most-recently-used position.
//!
//! Expired entries are removed lazily when touched; capacity overflow
//! evicts from the least-recently-used tail eagerly on insert.

use parking_lot::Mutex;
use std::collections::HashMap;
use std::time::{Duration, Instant};

/// Longest accepted cache key, in bytes.
pub const CACHE_KEY_MAX_LEN: usize = 255;

/// Sentinel index for list ends and detached entries.
const NIL: usize = usize::MAX;

struct Entry {
    key: String,
    value: Vec<u8>,
    expires_at: Instant,
    prev: usize,
    next: usize,
}

struct Inner {
    capacity: usize,
    default_ttl: Duration,
    map: HashMap<String, usize>,
    slots: Vec<Entry>,
    free: Vec<usize>,
    head: usize,
    tail: usize,
}

/// Thread-safe LRU+TTL cache over binary values.
pub struct ResponseCache {
    inner: Mutex<Inner>,
}

impl ResponseCache {
    /// Creates a cache holding at most `capacity` entries, each expiring
    /// after `default_ttl` unless a per-entry TTL is given. Floors: one
    /// entry, one second.
    pub fn new(capacity: usize, default_ttl: Duration) -> Self {
        Self {
            inner: Mutex::new(Inner {
                capacity: capacity.max(1),
                default_ttl: default_ttl.max(Duration::from_secs(1)),
                map: HashMap::new(),
                slots: Vec::new(),
                free: Vec::new(),
                head: NIL,
                tail: NIL,
            }),
        }
    }

    /// Returns an owned copy of the value for `key`, touching its
    /// recency. An expired entry is removed and reported as a miss.
    pub fn get(&self, key: &str) -> Option<Vec<u8>> {
        let mut inner = self.inner.lock();
        let idx = *inner.map.get(key)?;

        if inner.slots[idx].expires_at <= Instant::now() {
            inner.remove_index(idx);
            return None;
        }

        inner.detach(idx);
        inner.push_front(idx);
        Some(inner.slots[idx].value.clone())
    }

    /// Inserts or replaces `key`. `ttl` of `None` selects the default.
    /// Evicts from the LRU tail until the capacity bound holds again.
    ///
    /// Returns `false`, leaving the cache unchanged, for a key longer
    /// than [`CACHE_KEY_MAX_LEN`].
    pub fn set(&self, key: &str, value: &[u8], ttl: Option<Duration>) -> bool {
        if key.len() > CACHE_KEY_MAX_LEN {
            return false;
        }

        let mut inner = self.inner.lock();
        let expires_at = Instant::now() + ttl.unwrap_or(inner.default_ttl);

        if let Some(&idx) = inner.map.get(key) {
            let entry = &mut inner.slots[idx];
            entry.value = value.to_vec();
            entry.expires_at = expires_at;
            inner.detach(idx);
            inner.push_front(idx);
            return true;
        }

        while inner.map.len() >= inner.capacity {
            inner.evict_tail();
        }

        let idx = match inner.free.pop() {
            Some(idx) => {
                let entry = &mut inner.slots[idx];
                entry.key = key.to_string();
                entry.value = value.to_vec();
                entry.expires_at = expires_at;
                idx
            }
            None => {
                inner.slots.push(Entry {
                    key: key.to_string(),
                    value: value.to_vec(),
                    expires_at,
                    prev: NIL,
                    next: NIL,
                });
                inner.slots.len() - 1
            }
        };

        inner.map.insert(key.to_string(), idx);
        inner.push_front(idx);
        true
    }

    /// Removes `key` if present.
    pub fn invalidate(&self, key: &str) {
        let mut inner = self.inner.lock();
        if let Some(&idx) = inner.map.get(key) {
            inner.remove_index(idx);
        }
    }

    /// Drops every entry.
    pub fn clear(&self) {
        let mut inner = self.inner.lock();
        inner.map.clear();
        inner.slots.clear();
        inner.free.clear();
        inner.head = NIL;
        inner.tail = NIL;
    }

    /// Live entry count (expired-but-untouched entries included).
    pub fn len(&self) -> usize {
        self.inner.lock().map.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl Inner {
    /// Unlinks `idx` from the recency list.
    fn detach(&mut self, idx: usize) {
        let (prev, next) = (self.slots[idx].prev, self.slots[idx].next);
        if prev != NIL {
            self.slots[prev].next = next;
        } else {
            self.head = next;
        }
        if next != NIL {
            self.slots[next].prev = prev;
        } else {
            self.tail = prev;
        }
        self.slots[idx].prev = NIL;
        self.slots[idx].next = NIL;
    }

    /// Links `idx` at the most-recently-used position.
    fn push_front(&mut self, idx: usize) {
        self.slots[idx].prev = NIL;
        self.slots[idx].next = self.head;
        if self.head != NIL {
            self.slots[self.head].prev = idx;
        }
        self.head = idx;
        if self.tail == NIL {
            self.tail = idx;
        }
    }

    /// Removes the entry at `idx` from the map and list, recycling its slot.
    fn remove_index(&mut self, idx: usize) {
        self.detach(idx);
        let key = std::mem::take(&mut self.slots[idx].key);
        self.map.remove(&key);
        self.slots[idx].value = Vec::new();
        self.free.push(idx);
    }

    /// Evicts the least-recently-used entry.
    fn evict_tail(&mut self) {
        if self.tail != NIL {
            self.remove_index(self.tail);
        }
    }
}
