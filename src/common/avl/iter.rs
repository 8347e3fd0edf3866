use super::{AvlMultiMap, NodeId};

use std::iter::FusedIterator;

/// An in-order iterator over the entries of an [`AvlMultiMap`].
pub(crate) struct Iter<'a, K, V> {
    map: &'a AvlMultiMap<K, V>,
    front: NodeId,
    // One past the last node still to be yielded from the back.
    back: NodeId,
    remaining: usize,
}

impl<'a, K, V> Iter<'a, K, V> {
    pub(super) fn new(
        map: &'a AvlMultiMap<K, V>,
        front: NodeId,
        back: NodeId,
        remaining: usize,
    ) -> Self {
        Self {
            map,
            front,
            back,
            remaining,
        }
    }
}

impl<'a, K, V> Iterator for Iter<'a, K, V> {
    type Item = (&'a K, &'a V);

    fn next(&mut self) -> Option<Self::Item> {
        if self.remaining == 0 {
            return None;
        }
        let node = self.front;
        self.front = self.map.successor(node);
        self.remaining -= 1;
        Some(self.map.entry(node))
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        (self.remaining, Some(self.remaining))
    }
}

impl<'a, K, V> DoubleEndedIterator for Iter<'a, K, V> {
    fn next_back(&mut self) -> Option<Self::Item> {
        if self.remaining == 0 {
            return None;
        }
        self.back = self.map.predecessor(self.back);
        self.remaining -= 1;
        Some(self.map.entry(self.back))
    }
}

impl<'a, K, V> ExactSizeIterator for Iter<'a, K, V> {}

impl<'a, K, V> FusedIterator for Iter<'a, K, V> {}
