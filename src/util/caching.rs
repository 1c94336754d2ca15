//! Bounded, LRU-evicting set and map used for package-id deduplication and
//! for the acceptor's cache of recently-minted sockets.

use std::collections::VecDeque;
use std::hash::Hash;

use ahash::{AHashMap, AHashSet};

/// A fixed-capacity set. `check_update` is the only mutating operation: it
/// reports whether the value was already present, and in either case
/// promotes it to most-recently-used, evicting the oldest entry if the set
/// was already at capacity.
#[derive(Debug)]
pub struct CachingSet<T> {
    capacity: usize,
    order: VecDeque<T>,
    members: AHashSet<T>,
}

impl<T> CachingSet<T>
where
    T: Eq + Hash + Clone,
{
    pub fn new(capacity: usize) -> Self {
        assert!(capacity > 0);
        Self {
            capacity,
            order: VecDeque::with_capacity(capacity),
            members: AHashSet::with_capacity(capacity),
        }
    }

    pub fn len(&self) -> usize {
        self.members.len()
    }

    pub fn is_empty(&self) -> bool {
        self.members.is_empty()
    }

    pub fn contains(&self, value: &T) -> bool {
        self.members.contains(value)
    }

    /// Returns `true` if `value` was already present. Always promotes
    /// `value` to most-recently-used (inserting it if new).
    pub fn check_update(&mut self, value: T) -> bool {
        if self.members.contains(&value) {
            self.promote(&value);
            return true;
        }

        if self.members.len() >= self.capacity {
            if let Some(oldest) = self.order.pop_front() {
                self.members.remove(&oldest);
            }
        }

        self.order.push_back(value.clone());
        self.members.insert(value);
        false
    }

    fn promote(&mut self, value: &T) {
        if let Some(pos) = self.order.iter().position(|v| v == value) {
            let v = self.order.remove(pos).unwrap();
            self.order.push_back(v);
        }
    }
}

/// A fixed-capacity map with the same LRU discipline as [`CachingSet`].
#[derive(Debug)]
pub struct CachingMap<K, V> {
    capacity: usize,
    order: VecDeque<K>,
    entries: AHashMap<K, V>,
}

impl<K, V> CachingMap<K, V>
where
    K: Eq + Hash + Clone,
{
    pub fn new(capacity: usize) -> Self {
        assert!(capacity > 0);
        Self {
            capacity,
            order: VecDeque::with_capacity(capacity),
            entries: AHashMap::with_capacity(capacity),
        }
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Looks the key up without affecting its recency.
    pub fn get(&self, key: &K) -> Option<&V> {
        self.entries.get(key)
    }

    /// Looks the key up, promoting it to most-recently-used on hit.
    pub fn get_update(&mut self, key: &K) -> Option<&V> {
        if self.entries.contains_key(key) {
            self.promote(key);
        }
        self.entries.get(key)
    }

    /// Inserts or updates `key`, promoting it to most-recently-used.
    /// Returns `true` if the key already existed.
    pub fn put_update(&mut self, key: K, value: V) -> bool {
        let existed = self.entries.contains_key(&key);

        if existed {
            self.promote(&key);
        } else {
            if self.entries.len() >= self.capacity {
                if let Some(oldest) = self.order.pop_front() {
                    self.entries.remove(&oldest);
                }
            }
            self.order.push_back(key.clone());
        }

        self.entries.insert(key, value);
        existed
    }

    pub fn erase(&mut self, key: &K) -> Option<V> {
        if let Some(pos) = self.order.iter().position(|k| k == key) {
            self.order.remove(pos);
        }
        self.entries.remove(key)
    }

    fn promote(&mut self, key: &K) {
        if let Some(pos) = self.order.iter().position(|k| k == key) {
            let k = self.order.remove(pos).unwrap();
            self.order.push_back(k);
        }
    }
}
