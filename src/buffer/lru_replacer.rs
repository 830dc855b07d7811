use std::collections::HashMap;
use std::hash::Hash;

use parking_lot::Mutex;

const NIL: usize = usize::MAX;

#[derive(Clone, Copy)]
struct Node<T> {
    value: T,
    prev: usize,
    next: usize,
}

struct Inner<T> {
    /// Slab of list nodes; `free` recycles vacated slots
    nodes: Vec<Node<T>>,
    free: Vec<usize>,
    /// Head is the least recently used entry, tail the most recent
    head: usize,
    tail: usize,
    index: HashMap<T, usize>,
}

/// LRU replacement policy: a doubly linked list with a hash index, all
/// operations O(1) amortised under a single internal mutex. The buffer
/// pool keeps pinned frames out of the replacer, so whatever sits at the
/// head is always a legal victim.
pub struct LruReplacer<T> {
    inner: Mutex<Inner<T>>,
}

impl<T> LruReplacer<T>
where
    T: Copy + Eq + Hash,
{
    pub fn new() -> Self {
        Self {
            inner: Mutex::new(Inner {
                nodes: Vec::new(),
                free: Vec::new(),
                head: NIL,
                tail: NIL,
                index: HashMap::new(),
            }),
        }
    }

    /// Appends a value at the most-recently-used end, or moves it there if
    /// already present.
    pub fn insert(&self, value: T) {
        let mut inner = self.inner.lock();
        if let Some(idx) = inner.index.get(&value).copied() {
            Self::unlink(&mut inner, idx);
            Self::push_tail(&mut inner, idx);
            return;
        }

        let node = Node {
            value,
            prev: NIL,
            next: NIL,
        };
        let idx = if let Some(idx) = inner.free.pop() {
            inner.nodes[idx] = node;
            idx
        } else {
            inner.nodes.push(node);
            inner.nodes.len() - 1
        };
        inner.index.insert(value, idx);
        Self::push_tail(&mut inner, idx);
    }

    /// Removes and returns the least recently used value.
    pub fn victim(&self) -> Option<T> {
        let mut inner = self.inner.lock();
        let idx = inner.head;
        if idx == NIL {
            return None;
        }
        let value = inner.nodes[idx].value;
        Self::unlink(&mut inner, idx);
        inner.free.push(idx);
        inner.index.remove(&value);
        Some(value)
    }

    /// Removes a specific value; returns whether it was present.
    pub fn erase(&self, value: T) -> bool {
        let mut inner = self.inner.lock();
        if let Some(idx) = inner.index.remove(&value) {
            Self::unlink(&mut inner, idx);
            inner.free.push(idx);
            true
        } else {
            false
        }
    }

    pub fn size(&self) -> usize {
        self.inner.lock().index.len()
    }

    fn unlink(inner: &mut Inner<T>, idx: usize) {
        let (prev, next) = {
            let node = &inner.nodes[idx];
            (node.prev, node.next)
        };
        if prev != NIL {
            inner.nodes[prev].next = next;
        } else {
            inner.head = next;
        }
        if next != NIL {
            inner.nodes[next].prev = prev;
        } else {
            inner.tail = prev;
        }
        inner.nodes[idx].prev = NIL;
        inner.nodes[idx].next = NIL;
    }

    fn push_tail(inner: &mut Inner<T>, idx: usize) {
        let tail = inner.tail;
        inner.nodes[idx].prev = tail;
        inner.nodes[idx].next = NIL;
        if tail != NIL {
            inner.nodes[tail].next = idx;
        } else {
            inner.head = idx;
        }
        inner.tail = idx;
    }
}

impl<T> Default for LruReplacer<T>
where
    T: Copy + Eq + Hash,
{
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_lru_replacer_victim_order() {
        let replacer: LruReplacer<u32> = LruReplacer::new();

        replacer.insert(1);
        replacer.insert(2);
        replacer.insert(3);
        assert_eq!(replacer.size(), 3);

        assert_eq!(replacer.victim(), Some(1));
        assert_eq!(replacer.victim(), Some(2));
        assert_eq!(replacer.victim(), Some(3));
        assert_eq!(replacer.victim(), None);
    }

    #[test]
    fn test_lru_replacer_reinsert_moves_to_tail() {
        let replacer: LruReplacer<u32> = LruReplacer::new();

        replacer.insert(1);
        replacer.insert(2);
        replacer.insert(1);

        assert_eq!(replacer.victim(), Some(2));
        assert_eq!(replacer.victim(), Some(1));
    }

    #[test]
    fn test_lru_replacer_erase() {
        let replacer: LruReplacer<u32> = LruReplacer::new();

        replacer.insert(1);
        replacer.insert(2);
        replacer.insert(3);

        assert!(replacer.erase(2));
        assert!(!replacer.erase(2));
        assert_eq!(replacer.size(), 2);

        assert_eq!(replacer.victim(), Some(1));
        assert_eq!(replacer.victim(), Some(3));
    }

    #[test]
    fn test_lru_replacer_slot_reuse() {
        let replacer: LruReplacer<u32> = LruReplacer::new();

        for round in 0..10 {
            for i in 0..100 {
                replacer.insert(round * 100 + i);
            }
            for i in 0..100 {
                assert_eq!(replacer.victim(), Some(round * 100 + i));
            }
        }
        assert_eq!(replacer.size(), 0);
    }
}
