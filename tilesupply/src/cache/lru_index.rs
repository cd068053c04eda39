//! Access-ordered index shared by the memory and disk caches.
//!
//! An explicit doubly-linked list of entries plus a key → slot lookup table.
//! The list runs from least recently used (head) to most recently used (tail).
//! Nodes live in a slab (`Vec<Option<Node>>`) and link to each other by slot
//! index, so no entry is ever boxed individually and freed slots are reused.
//!
//! The index never evicts on its own. Callers insert, then call
//! [`LruIndex::pop_lru`] as many times as their capacity policy requires.

use std::collections::HashMap;
use std::hash::Hash;

struct Node<K, V> {
    key: K,
    value: V,
    prev: Option<usize>,
    next: Option<usize>,
}

/// Key → value map that remembers access order.
pub struct LruIndex<K, V> {
    slots: Vec<Option<Node<K, V>>>,
    free: Vec<usize>,
    lookup: HashMap<K, usize>,
    head: Option<usize>,
    tail: Option<usize>,
}

impl<K, V> LruIndex<K, V>
where
    K: Eq + Hash + Clone,
{
    /// Creates an empty index.
    pub fn new() -> Self {
        Self::with_capacity(0)
    }

    /// Creates an empty index with room for `capacity` entries.
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            slots: Vec::with_capacity(capacity),
            free: Vec::new(),
            lookup: HashMap::with_capacity(capacity),
            head: None,
            tail: None,
        }
    }

    /// Number of entries.
    pub fn len(&self) -> usize {
        self.lookup.len()
    }

    /// True when there are no entries.
    pub fn is_empty(&self) -> bool {
        self.lookup.is_empty()
    }

    /// True when `key` is present. Does not affect recency.
    pub fn contains(&self, key: &K) -> bool {
        self.lookup.contains_key(key)
    }

    /// Returns the value for `key` without affecting recency.
    pub fn peek(&self, key: &K) -> Option<&V> {
        let slot = *self.lookup.get(key)?;
        self.node(slot).map(|n| &n.value)
    }

    /// Returns the value for `key` and marks it most recently used.
    pub fn get(&mut self, key: &K) -> Option<&V> {
        let slot = *self.lookup.get(key)?;
        self.move_to_tail(slot);
        self.node(slot).map(|n| &n.value)
    }

    /// Inserts or replaces `key`, marking it most recently used.
    ///
    /// Returns the previous value when the key was already present.
    pub fn insert(&mut self, key: K, value: V) -> Option<V> {
        if let Some(&slot) = self.lookup.get(&key) {
            self.move_to_tail(slot);
            return self
                .slots
                .get_mut(slot)
                .and_then(Option::as_mut)
                .map(|n| std::mem::replace(&mut n.value, value));
        }

        let node = Node {
            key: key.clone(),
            value,
            prev: self.tail,
            next: None,
        };

        let slot = match self.free.pop() {
            Some(slot) => {
                self.slots[slot] = Some(node);
                slot
            }
            None => {
                self.slots.push(Some(node));
                self.slots.len() - 1
            }
        };

        match self.tail {
            Some(tail) => {
                if let Some(n) = self.slots[tail].as_mut() {
                    n.next = Some(slot);
                }
            }
            None => self.head = Some(slot),
        }
        self.tail = Some(slot);
        self.lookup.insert(key, slot);

        None
    }

    /// Removes `key` and returns its value.
    pub fn remove(&mut self, key: &K) -> Option<V> {
        let slot = self.lookup.remove(key)?;
        self.unlink(slot);
        self.release(slot).map(|(_, v)| v)
    }

    /// Removes and returns the least recently used entry.
    pub fn pop_lru(&mut self) -> Option<(K, V)> {
        let slot = self.head?;
        self.unlink(slot);
        let (key, value) = self.release(slot)?;
        self.lookup.remove(&key);
        Some((key, value))
    }

    /// Returns the least recently used key without removing it.
    pub fn peek_lru(&self) -> Option<&K> {
        self.head.and_then(|slot| self.node(slot)).map(|n| &n.key)
    }

    /// Removes every entry, returning them from least to most recently used.
    pub fn drain(&mut self) -> Vec<(K, V)> {
        let mut out = Vec::with_capacity(self.len());
        while let Some(entry) = self.pop_lru() {
            out.push(entry);
        }
        self.slots.clear();
        self.free.clear();
        out
    }

    /// Keys from least to most recently used.
    pub fn keys(&self) -> Vec<K> {
        let mut keys = Vec::with_capacity(self.len());
        let mut cursor = self.head;
        while let Some(slot) = cursor {
            match self.node(slot) {
                Some(n) => {
                    keys.push(n.key.clone());
                    cursor = n.next;
                }
                None => break,
            }
        }
        keys
    }

    fn node(&self, slot: usize) -> Option<&Node<K, V>> {
        self.slots.get(slot).and_then(Option::as_ref)
    }

    fn release(&mut self, slot: usize) -> Option<(K, V)> {
        let node = self.slots.get_mut(slot)?.take()?;
        self.free.push(slot);
        Some((node.key, node.value))
    }

    fn unlink(&mut self, slot: usize) {
        let (prev, next) = match self.node(slot) {
            Some(n) => (n.prev, n.next),
            None => return,
        };

        match prev {
            Some(p) => {
                if let Some(n) = self.slots[p].as_mut() {
                    n.next = next;
                }
            }
            None => self.head = next,
        }
        match next {
            Some(nx) => {
                if let Some(n) = self.slots[nx].as_mut() {
                    n.prev = prev;
                }
            }
            None => self.tail = prev,
        }

        if let Some(n) = self.slots[slot].as_mut() {
            n.prev = None;
            n.next = None;
        }
    }

    fn move_to_tail(&mut self, slot: usize) {
        if self.tail == Some(slot) {
            return;
        }
        self.unlink(slot);

        let old_tail = self.tail;
        if let Some(n) = self.slots[slot].as_mut() {
            n.prev = old_tail;
            n.next = None;
        }
        match old_tail {
            Some(t) => {
                if let Some(n) = self.slots[t].as_mut() {
                    n.next = Some(slot);
                }
            }
            None => self.head = Some(slot),
        }
        self.tail = Some(slot);
    }
}

impl<K, V> Default for LruIndex<K, V>
where
    K: Eq + Hash + Clone,
{
    fn default() -> Self {
        Self::new()
    }
}
