//! LRU Index Module
//!
//! Implements Least Recently Used ordering for cache eviction.

use std::collections::HashMap;

#[derive(Debug)]
struct Node {
    key: String,
    prev: Option<usize>,
    next: Option<usize>,
}

// == LRU Index ==
/// Doubly linked list of keys co-indexed with a hash map from key to node.
///
/// - Head = Most recently used
/// - Tail = Least recently used
///
/// Nodes live in a slab so that touch, remove and evict are all O(1).
#[derive(Debug, Default)]
pub struct LruIndex {
    nodes: Vec<Node>,
    free: Vec<usize>,
    index: HashMap<String, usize>,
    head: Option<usize>,
    tail: Option<usize>,
}

impl LruIndex {
    // == Constructor ==
    /// Creates a new empty LRU index.
    pub fn new() -> Self {
        Self::default()
    }

    // == Touch ==
    /// Marks a key as most recently used (moves it to the head).
    ///
    /// If the key is new, it is added at the head.
    pub fn touch(&mut self, key: &str) {
        if let Some(&slot) = self.index.get(key) {
            self.detach(slot);
            self.attach_head(slot);
            return;
        }

        let node = Node {
            key: key.to_string(),
            prev: None,
            next: None,
        };
        let slot = match self.free.pop() {
            Some(slot) => {
                self.nodes[slot] = node;
                slot
            }
            None => {
                self.nodes.push(node);
                self.nodes.len() - 1
            }
        };
        self.attach_head(slot);
        self.index.insert(key.to_string(), slot);
    }

    // == Remove ==
    /// Removes a key from the index. Returns whether it was present.
    pub fn remove(&mut self, key: &str) -> bool {
        match self.index.remove(key) {
            Some(slot) => {
                self.detach(slot);
                self.release(slot);
                true
            }
            None => false,
        }
    }

    // == Evict Oldest ==
    /// Returns and removes the least recently used key.
    ///
    /// Returns None if the index is empty.
    pub fn evict_oldest(&mut self) -> Option<String> {
        let slot = self.tail?;
        self.detach(slot);
        let key = std::mem::take(&mut self.nodes[slot].key);
        self.index.remove(&key);
        self.free.push(slot);
        Some(key)
    }

    // == Peek Oldest ==
    /// Returns the least recently used key without removing it.
    pub fn peek_oldest(&self) -> Option<&str> {
        self.tail.map(|slot| self.nodes[slot].key.as_str())
    }

    /// Returns the most recently used key.
    pub fn peek_newest(&self) -> Option<&str> {
        self.head.map(|slot| self.nodes[slot].key.as_str())
    }

    pub fn len(&self) -> usize {
        self.index.len()
    }

    pub fn is_empty(&self) -> bool {
        self.index.is_empty()
    }

    pub fn contains(&self, key: &str) -> bool {
        self.index.contains_key(key)
    }

    // == Clear ==
    pub fn clear(&mut self) {
        self.nodes.clear();
        self.free.clear();
        self.index.clear();
        self.head = None;
        self.tail = None;
    }

    /// Keys ordered from most to least recently used.
    pub fn keys(&self) -> Vec<String> {
        let mut keys = Vec::with_capacity(self.len());
        let mut cursor = self.head;
        while let Some(slot) = cursor {
            keys.push(self.nodes[slot].key.clone());
            cursor = self.nodes[slot].next;
        }
        keys
    }

    fn release(&mut self, slot: usize) {
        self.nodes[slot].key.clear();
        self.free.push(slot);
    }

    // [prev] <-> [slot] <-> [next]  becomes  [prev] <-> [next]
    fn detach(&mut self, slot: usize) {
        let (prev, next) = {
            let node = &self.nodes[slot];
            (node.prev, node.next)
        };
        match prev {
            Some(p) => self.nodes[p].next = next,
            None => self.head = next,
        }
        match next {
            Some(n) => self.nodes[n].prev = prev,
            None => self.tail = prev,
        }
        let node = &mut self.nodes[slot];
        node.prev = None;
        node.next = None;
    }

    fn attach_head(&mut self, slot: usize) {
        self.nodes[slot].next = self.head;
        self.nodes[slot].prev = None;
        if let Some(old_head) = self.head {
            self.nodes[old_head].prev = Some(slot);
        }
        self.head = Some(slot);
        if self.tail.is_none() {
            self.tail = Some(slot);
        }
    }
}

// == Unit Tests ==
#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_lru_new() {
        let lru = LruIndex::new();
        assert!(lru.is_empty());
        assert_eq!(lru.len(), 0);
        assert_eq!(lru.peek_oldest(), None);
    }

    #[test]
    fn test_lru_touch_new_key() {
        let mut lru = LruIndex::new();

        lru.touch("key1");
        lru.touch("key2");
        lru.touch("key3");

        assert_eq!(lru.len(), 3);
        // key1 is oldest (added first)
        assert_eq!(lru.peek_oldest(), Some("key1"));
        assert_eq!(lru.peek_newest(), Some("key3"));
    }

    #[test]
    fn test_lru_touch_existing_key() {
        let mut lru = LruIndex::new();

        lru.touch("key1");
        lru.touch("key2");
        lru.touch("key3");
        lru.touch("key1");

        assert_eq!(lru.len(), 3);
        assert_eq!(lru.peek_oldest(), Some("key2"));
        assert_eq!(lru.keys(), vec!["key1", "key3", "key2"]);
    }

    #[test]
    fn test_lru_evict_oldest() {
        let mut lru = LruIndex::new();

        lru.touch("key1");
        lru.touch("key2");
        lru.touch("key3");

        assert_eq!(lru.evict_oldest(), Some("key1".to_string()));
        assert_eq!(lru.len(), 2);
        assert!(!lru.contains("key1"));

        assert_eq!(lru.evict_oldest(), Some("key2".to_string()));
        assert_eq!(lru.evict_oldest(), Some("key3".to_string()));
        assert_eq!(lru.evict_oldest(), None);
        assert!(lru.is_empty());
    }

    #[test]
    fn test_lru_remove_middle_head_tail() {
        let mut lru = LruIndex::new();

        lru.touch("a");
        lru.touch("b");
        lru.touch("c");

        assert!(lru.remove("b"));
        assert_eq!(lru.keys(), vec!["c", "a"]);

        assert!(lru.remove("c"));
        assert_eq!(lru.peek_newest(), Some("a"));

        assert!(lru.remove("a"));
        assert!(lru.is_empty());
        assert_eq!(lru.peek_newest(), None);
        assert_eq!(lru.peek_oldest(), None);
    }

    #[test]
    fn test_lru_remove_nonexistent_key() {
        let mut lru = LruIndex::new();

        lru.touch("key1");
        lru.touch("key2");

        assert!(!lru.remove("nonexistent"));
        assert_eq!(lru.len(), 2);
    }

    #[test]
    fn test_lru_slots_are_reused() {
        let mut lru = LruIndex::new();

        for round in 0..10 {
            lru.touch(&format!("k{}", round));
            lru.touch(&format!("j{}", round));
            lru.remove(&format!("k{}", round));
            lru.evict_oldest();
        }

        assert!(lru.is_empty());
        assert!(lru.nodes.len() <= 2);
    }

    #[test]
    fn test_lru_order_after_multiple_touches() {
        let mut lru = LruIndex::new();

        lru.touch("a");
        lru.touch("b");
        lru.touch("c");

        lru.touch("a");
        lru.touch("c");
        lru.touch("b");

        // head -> [b, c, a] <- tail
        assert_eq!(lru.evict_oldest(), Some("a".to_string()));
        assert_eq!(lru.evict_oldest(), Some("c".to_string()));
        assert_eq!(lru.evict_oldest(), Some("b".to_string()));
    }

    #[test]
    fn test_lru_clear() {
        let mut lru = LruIndex::new();
        lru.touch("a");
        lru.touch("b");

        lru.clear();

        assert!(lru.is_empty());
        assert!(lru.keys().is_empty());
        lru.touch("c");
        assert_eq!(lru.keys(), vec!["c"]);
    }
}
