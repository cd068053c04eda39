//! LIFO request stack without duplicates.
//!
//! The newest request is served first: it belongs to the viewport edge the
//! user is looking at right now. Pushing a key that is already queued moves
//! it to the top instead of adding a second entry.

use std::collections::HashSet;

use crate::coord::TileKey;

/// Pending tile requests, newest on top.
#[derive(Debug, Default, Clone)]
pub struct RequestStack {
    stack: Vec<TileKey>,
    members: HashSet<TileKey>,
}

impl RequestStack {
    /// Creates an empty stack.
    pub fn new() -> Self {
        Self::default()
    }

    /// Pushes `key` on top. Returns false if it was already queued, in which
    /// case it is moved to the top.
    pub fn push(&mut self, key: TileKey) -> bool {
        if self.members.insert(key) {
            self.stack.push(key);
            return true;
        }

        if let Some(pos) = self.stack.iter().rposition(|k| *k == key) {
            self.stack.remove(pos);
        }
        self.stack.push(key);
        false
    }

    /// Removes and returns the newest key.
    pub fn pop(&mut self) -> Option<TileKey> {
        let key = self.stack.pop()?;
        self.members.remove(&key);
        Some(key)
    }

    /// True when `key` is queued.
    pub fn contains(&self, key: &TileKey) -> bool {
        self.members.contains(key)
    }

    /// Number of queued keys.
    pub fn len(&self) -> usize {
        self.stack.len()
    }

    /// True when nothing is queued.
    pub fn is_empty(&self) -> bool {
        self.stack.is_empty()
    }

    /// Drops every queued key. Returns how many were dropped.
    pub fn clear(&mut self) -> usize {
        let count = self.stack.len();
        self.stack.clear();
        self.members.clear();
        count
    }

    /// Queued keys from oldest to newest.
    pub fn keys(&self) -> &[TileKey] {
        &self.stack
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn test_pop_order_is_lifo() {
        let mut stack = RequestStack::new();
        stack.push(TileKey::new(1, 0));
        stack.push(TileKey::new(2, 0));
        stack.push(TileKey::new(3, 0));

        assert_eq!(stack.pop(), Some(TileKey::new(3, 0)));
        assert_eq!(stack.pop(), Some(TileKey::new(2, 0)));
        assert_eq!(stack.pop(), Some(TileKey::new(1, 0)));
        assert_eq!(stack.pop(), None);
    }

    #[test]
    fn test_repush_moves_to_top() {
        let mut stack = RequestStack::new();
        assert!(stack.push(TileKey::new(1, 1)));
        assert!(stack.push(TileKey::new(2, 2)));
        assert!(!stack.push(TileKey::new(1, 1)));

        assert_eq!(stack.len(), 2);
        assert_eq!(stack.pop(), Some(TileKey::new(1, 1)));
        assert_eq!(stack.pop(), Some(TileKey::new(2, 2)));
    }

    #[test]
    fn test_pop_allows_requeue() {
        let mut stack = RequestStack::new();
        stack.push(TileKey::new(4, 4));
        stack.pop();

        assert!(!stack.contains(&TileKey::new(4, 4)));
        assert!(stack.push(TileKey::new(4, 4)));
    }

    #[test]
    fn test_clear() {
        let mut stack = RequestStack::new();
        stack.push(TileKey::new(1, 0));
        stack.push(TileKey::new(2, 0));

        assert_eq!(stack.clear(), 2);
        assert!(stack.is_empty());
        assert!(!stack.contains(&TileKey::new(1, 0)));
    }

    proptest! {
        /// The stack never holds a key twice, and pops follow last-push order.
        #[test]
        fn prop_no_duplicates_and_last_push_wins(
            pushes in prop::collection::vec((0i32..6, 0i32..6), 0..60)
        ) {
            let mut stack = RequestStack::new();
            for (x, y) in &pushes {
                stack.push(TileKey::new(*x, *y));
            }

            let mut seen = HashSet::new();
            let mut expected = Vec::new();
            for (x, y) in pushes.iter().rev() {
                let key = TileKey::new(*x, *y);
                if seen.insert(key) {
                    expected.push(key);
                }
            }

            prop_assert_eq!(stack.len(), expected.len());
            let mut popped = Vec::new();
            while let Some(key) = stack.pop() {
                popped.push(key);
            }
            prop_assert_eq!(popped, expected);
        }
    }
}
