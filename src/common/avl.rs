//! An AVL tree based ordered multimap whose nodes live in an arena.
//!
//! Nodes are addressed by indices into a `Vec` instead of pointers, and keep a
//! back-link to their parent so that in-order successor and predecessor are
//! found without a stack. Index `0` is a sentinel: its left child is the root,
//! and it doubles as the "end" position of an in-order traversal.
//!
//! Every insertion returns a [`Handle`], which stays valid across unrelated
//! insertions and removals and lets the owner remove or re-key its entry in
//! `O(log n)`. Handles carry a generation so that a handle to a removed node is
//! rejected even after its slot has been reused.

mod iter;

pub(crate) use iter::Iter;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
struct NodeId(usize);

const SENTINEL: NodeId = NodeId(0);

/// A stable reference to an entry of an [`AvlMultiMap`].
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub(crate) struct Handle {
    node: NodeId,
    generation: u32,
}

/// `height(right) - height(left)`, which AVL keeps within `-1..=1`.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum Factor {
    LeftHeavy,
    Balanced,
    RightHeavy,
}

struct Node<K, V> {
    parent: NodeId,
    left: Option<NodeId>,
    right: Option<NodeId>,
    factor: Factor,
    generation: u32,
    // `None` for the sentinel and for vacant slots.
    entry: Option<(K, V)>,
}

impl<K, V> Node<K, V> {
    fn vacant(generation: u32) -> Self {
        Self {
            parent: SENTINEL,
            left: None,
            right: None,
            factor: Factor::Balanced,
            generation,
            entry: None,
        }
    }
}

/// An ordered multimap. Entries with equal keys are all kept; their relative
/// order is whatever the tree shape makes it, not their insertion order.
pub(crate) struct AvlMultiMap<K, V> {
    nodes: Vec<Node<K, V>>,
    vacant: Vec<NodeId>,
    /// The leftmost node, or the sentinel when the map is empty.
    start: NodeId,
    len: usize,
}

impl<K, V> Default for AvlMultiMap<K, V> {
    fn default() -> Self {
        Self::new()
    }
}

impl<K, V> AvlMultiMap<K, V> {
    pub(crate) fn new() -> Self {
        Self {
            nodes: vec![Node::vacant(0)],
            vacant: Vec::new(),
            start: SENTINEL,
            len: 0,
        }
    }

    #[allow(dead_code)]
    pub(crate) fn len(&self) -> usize {
        self.len
    }

    pub(crate) fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Returns the entry with the smallest key.
    pub(crate) fn first(&self) -> Option<(&K, &V)> {
        self.iter().next()
    }

    /// Removes and returns the entry with the smallest key.
    pub(crate) fn pop_first(&mut self) -> Option<(K, V)> {
        if self.is_empty() {
            None
        } else {
            Some(self.remove_node(self.start))
        }
    }

    /// Returns the entry referred to by `handle`, or `None` if it was removed.
    #[allow(dead_code)]
    pub(crate) fn get(&self, handle: Handle) -> Option<(&K, &V)> {
        if self.is_live(handle) {
            Some(self.entry(handle.node))
        } else {
            None
        }
    }

    /// Removes the entry referred to by `handle`. Returns `None` if it was
    /// already removed.
    pub(crate) fn remove(&mut self, handle: Handle) -> Option<(K, V)> {
        if self.is_live(handle) {
            Some(self.remove_node(handle.node))
        } else {
            None
        }
    }

    /// Removes every entry. All outstanding handles become invalid.
    pub(crate) fn clear(&mut self) {
        for (i, node) in self.nodes.iter_mut().enumerate().skip(1) {
            if node.entry.take().is_some() {
                *node = Node::vacant(node.generation.wrapping_add(1));
                self.vacant.push(NodeId(i));
            }
        }
        self.nodes[SENTINEL.0].left = None;
        self.start = SENTINEL;
        self.len = 0;
    }

    /// Returns an iterator over the entries in ascending key order.
    pub(crate) fn iter(&self) -> Iter<'_, K, V> {
        Iter::new(self, self.start, SENTINEL, self.len)
    }

    fn is_live(&self, handle: Handle) -> bool {
        handle.node != SENTINEL
            && self
                .nodes
                .get(handle.node.0)
                .map_or(false, |n| n.generation == handle.generation && n.entry.is_some())
    }

    fn alloc(&mut self, key: K, value: V) -> NodeId {
        if let Some(id) = self.vacant.pop() {
            let node = self.node_mut(id);
            node.entry = Some((key, value));
            id
        } else {
            let mut node = Node::vacant(0);
            node.entry = Some((key, value));
            self.nodes.push(node);
            NodeId(self.nodes.len() - 1)
        }
    }

    fn release(&mut self, id: NodeId) -> (K, V) {
        let node = self.node_mut(id);
        let generation = node.generation.wrapping_add(1);
        let entry = std::mem::replace(node, Node::vacant(generation)).entry;
        self.vacant.push(id);
        match entry {
            Some(entry) => entry,
            None => unreachable!("released a vacant node"),
        }
    }

    // Node accessors.

    fn node(&self, id: NodeId) -> &Node<K, V> {
        &self.nodes[id.0]
    }

    fn node_mut(&mut self, id: NodeId) -> &mut Node<K, V> {
        &mut self.nodes[id.0]
    }

    fn entry(&self, id: NodeId) -> (&K, &V) {
        match &self.node(id).entry {
            Some((k, v)) => (k, v),
            None => unreachable!("the sentinel or a vacant node has no entry"),
        }
    }

    fn key(&self, id: NodeId) -> &K {
        self.entry(id).0
    }

    fn parent(&self, id: NodeId) -> NodeId {
        self.node(id).parent
    }

    fn left(&self, id: NodeId) -> Option<NodeId> {
        self.node(id).left
    }

    fn right(&self, id: NodeId) -> Option<NodeId> {
        self.node(id).right
    }

    fn factor(&self, id: NodeId) -> Factor {
        self.node(id).factor
    }

    fn set_factor(&mut self, id: NodeId, factor: Factor) {
        self.node_mut(id).factor = factor;
    }

    fn is_left_child(&self, id: NodeId) -> bool {
        self.left(self.parent(id)) == Some(id)
    }

    // Traversal.

    fn minimum(&self, mut x: NodeId) -> NodeId {
        while let Some(l) = self.left(x) {
            x = l;
        }
        x
    }

    fn maximum(&self, mut x: NodeId) -> NodeId {
        while let Some(r) = self.right(x) {
            x = r;
        }
        x
    }

    /// The in-order successor of `x`, or the sentinel if `x` is the last node.
    fn successor(&self, mut x: NodeId) -> NodeId {
        if let Some(r) = self.right(x) {
            return self.minimum(r);
        }
        while self.right(self.parent(x)) == Some(x) {
            x = self.parent(x);
        }
        self.parent(x)
    }

    /// The in-order predecessor of `x`. The predecessor of the sentinel is the
    /// last node.
    fn predecessor(&self, mut x: NodeId) -> NodeId {
        if let Some(l) = self.left(x) {
            return self.maximum(l);
        }
        while x != SENTINEL && self.is_left_child(x) {
            x = self.parent(x);
        }
        self.parent(x)
    }

    // Structural primitives.

    /// Makes `new` take the place of `old` as a child of `parent`.
    fn replace_child(&mut self, parent: NodeId, old: NodeId, new: Option<NodeId>) {
        if self.left(parent) == Some(old) {
            self.node_mut(parent).left = new;
        } else {
            self.node_mut(parent).right = new;
        }
    }

    /// Replaces the subtree rooted at `u` with the subtree rooted at `v`.
    fn transplant(&mut self, u: NodeId, v: Option<NodeId>) {
        let p = self.parent(u);
        self.replace_child(p, u, v);
        if let Some(v) = v {
            self.node_mut(v).parent = p;
        }
    }

    fn rotate_left(&mut self, x: NodeId) {
        let z = self.right(x).expect("rotate_left needs a right child");
        let z_left = self.left(z);
        self.node_mut(x).right = z_left;
        if let Some(n) = z_left {
            self.node_mut(n).parent = x;
        }

        let p = self.parent(x);
        self.node_mut(z).parent = p;
        self.replace_child(p, x, Some(z));

        self.node_mut(z).left = Some(x);
        self.node_mut(x).parent = z;

        if self.factor(z) == Factor::Balanced {
            self.set_factor(x, Factor::RightHeavy);
            self.set_factor(z, Factor::LeftHeavy);
        } else {
            self.set_factor(x, Factor::Balanced);
            self.set_factor(z, Factor::Balanced);
        }
    }

    fn rotate_right(&mut self, x: NodeId) {
        let z = self.left(x).expect("rotate_right needs a left child");
        let z_right = self.right(z);
        self.node_mut(x).left = z_right;
        if let Some(n) = z_right {
            self.node_mut(n).parent = x;
        }

        let p = self.parent(x);
        self.node_mut(z).parent = p;
        self.replace_child(p, x, Some(z));

        self.node_mut(z).right = Some(x);
        self.node_mut(x).parent = z;

        if self.factor(z) == Factor::Balanced {
            self.set_factor(x, Factor::LeftHeavy);
            self.set_factor(z, Factor::RightHeavy);
        } else {
            self.set_factor(x, Factor::Balanced);
            self.set_factor(z, Factor::Balanced);
        }
    }

    /// Double rotation for a right child that leans left.
    fn rotate_right_left(&mut self, x: NodeId) {
        let z = self.right(x).expect("rotate_right_left needs a right child");
        let y = self.left(z).expect("rotate_right_left needs a right-left grandchild");
        let (y_left, y_right) = (self.left(y), self.right(y));

        self.node_mut(z).left = y_right;
        if let Some(n) = y_right {
            self.node_mut(n).parent = z;
        }
        self.node_mut(y).right = Some(z);
        self.node_mut(z).parent = y;

        self.node_mut(x).right = y_left;
        if let Some(n) = y_left {
            self.node_mut(n).parent = x;
        }

        let p = self.parent(x);
        self.node_mut(y).parent = p;
        self.replace_child(p, x, Some(y));

        self.node_mut(y).left = Some(x);
        self.node_mut(x).parent = y;

        let (x_factor, z_factor) = match self.factor(y) {
            Factor::RightHeavy => (Factor::LeftHeavy, Factor::Balanced),
            Factor::LeftHeavy => (Factor::Balanced, Factor::RightHeavy),
            Factor::Balanced => (Factor::Balanced, Factor::Balanced),
        };
        self.set_factor(x, x_factor);
        self.set_factor(z, z_factor);
        self.set_factor(y, Factor::Balanced);
    }

    /// Double rotation for a left child that leans right.
    fn rotate_left_right(&mut self, x: NodeId) {
        let z = self.left(x).expect("rotate_left_right needs a left child");
        let y = self.right(z).expect("rotate_left_right needs a left-right grandchild");
        let (y_left, y_right) = (self.left(y), self.right(y));

        self.node_mut(z).right = y_left;
        if let Some(n) = y_left {
            self.node_mut(n).parent = z;
        }
        self.node_mut(y).left = Some(z);
        self.node_mut(z).parent = y;

        self.node_mut(x).left = y_right;
        if let Some(n) = y_right {
            self.node_mut(n).parent = x;
        }

        let p = self.parent(x);
        self.node_mut(y).parent = p;
        self.replace_child(p, x, Some(y));

        self.node_mut(y).right = Some(x);
        self.node_mut(x).parent = y;

        let (x_factor, z_factor) = match self.factor(y) {
            Factor::LeftHeavy => (Factor::RightHeavy, Factor::Balanced),
            Factor::RightHeavy => (Factor::Balanced, Factor::LeftHeavy),
            Factor::Balanced => (Factor::Balanced, Factor::Balanced),
        };
        self.set_factor(x, x_factor);
        self.set_factor(z, z_factor);
        self.set_factor(y, Factor::Balanced);
    }

    /// Walks up from `x`, whose left (or right) subtree just grew by one level.
    /// Stops after the first rotation, since a rotation after an insertion
    /// restores the subtree's previous height.
    fn balance_after_insert(&mut self, mut x: NodeId, mut child_is_left: bool) {
        while x != SENTINEL {
            if child_is_left {
                match self.factor(x) {
                    Factor::RightHeavy => {
                        self.set_factor(x, Factor::Balanced);
                        return;
                    }
                    Factor::LeftHeavy => {
                        let l = self.left(x).expect("a left-heavy node has a left child");
                        if self.factor(l) == Factor::RightHeavy {
                            self.rotate_left_right(x);
                        } else {
                            self.rotate_right(x);
                        }
                        return;
                    }
                    Factor::Balanced => self.set_factor(x, Factor::LeftHeavy),
                }
            } else {
                match self.factor(x) {
                    Factor::LeftHeavy => {
                        self.set_factor(x, Factor::Balanced);
                        return;
                    }
                    Factor::RightHeavy => {
                        let r = self.right(x).expect("a right-heavy node has a right child");
                        if self.factor(r) == Factor::LeftHeavy {
                            self.rotate_right_left(x);
                        } else {
                            self.rotate_left(x);
                        }
                        return;
                    }
                    Factor::Balanced => self.set_factor(x, Factor::RightHeavy),
                }
            }

            child_is_left = self.is_left_child(x);
            x = self.parent(x);
        }
    }

    /// Walks up from `x`, whose left (or right) subtree just shrank by one
    /// level. A rotation may leave the subtree one level shorter, in which case
    /// the walk continues from the new subtree root. It stops when a subtree
    /// keeps its height.
    fn balance_after_remove(&mut self, mut x: NodeId, mut child_is_left: bool) {
        while x != SENTINEL {
            if child_is_left {
                match self.factor(x) {
                    Factor::Balanced => {
                        self.set_factor(x, Factor::RightHeavy);
                        return;
                    }
                    Factor::RightHeavy => {
                        let r = self.right(x).expect("a right-heavy node has a right child");
                        let b = self.factor(r);
                        if b == Factor::LeftHeavy {
                            self.rotate_right_left(x);
                        } else {
                            self.rotate_left(x);
                        }
                        if b == Factor::Balanced {
                            return;
                        }
                        x = self.parent(x);
                    }
                    Factor::LeftHeavy => self.set_factor(x, Factor::Balanced),
                }
            } else {
                match self.factor(x) {
                    Factor::Balanced => {
                        self.set_factor(x, Factor::LeftHeavy);
                        return;
                    }
                    Factor::LeftHeavy => {
                        let l = self.left(x).expect("a left-heavy node has a left child");
                        let b = self.factor(l);
                        if b == Factor::RightHeavy {
                            self.rotate_left_right(x);
                        } else {
                            self.rotate_right(x);
                        }
                        if b == Factor::Balanced {
                            return;
                        }
                        x = self.parent(x);
                    }
                    Factor::RightHeavy => self.set_factor(x, Factor::Balanced),
                }
            }

            child_is_left = self.is_left_child(x);
            x = self.parent(x);
        }
    }

    /// Unlinks `z` from the tree, rebalances, and frees its slot.
    ///
    /// A node with two children is replaced by its in-order successor when it
    /// leans right, and by its predecessor otherwise, taking from the taller
    /// side.
    fn remove_node(&mut self, z: NodeId) -> (K, V) {
        if self.start == z {
            self.start = self.successor(z);
        }

        let mut x = self.parent(z);
        let mut child_is_left = self.is_left_child(z);

        match (self.left(z), self.right(z)) {
            (None, right) => self.transplant(z, right),
            (left, None) => self.transplant(z, left),
            (Some(z_left), Some(z_right)) => {
                let y = if self.factor(z) == Factor::RightHeavy {
                    let y = self.minimum(z_right);
                    x = y;
                    child_is_left = self.is_left_child(y);

                    if self.parent(y) != z {
                        x = self.parent(y);
                        let y_right = self.right(y);
                        self.transplant(y, y_right);
                        self.node_mut(y).right = Some(z_right);
                        self.node_mut(z_right).parent = y;
                    }

                    self.transplant(z, Some(y));
                    self.node_mut(y).left = Some(z_left);
                    self.node_mut(z_left).parent = y;
                    y
                } else {
                    let y = self.maximum(z_left);
                    x = y;
                    child_is_left = self.is_left_child(y);

                    if self.parent(y) != z {
                        x = self.parent(y);
                        let y_left = self.left(y);
                        self.transplant(y, y_left);
                        self.node_mut(y).left = Some(z_left);
                        self.node_mut(z_left).parent = y;
                    }

                    self.transplant(z, Some(y));
                    self.node_mut(y).right = Some(z_right);
                    self.node_mut(z_right).parent = y;
                    y
                };
                let factor = self.factor(z);
                self.set_factor(y, factor);
            }
        }

        self.balance_after_remove(x, child_is_left);
        self.len -= 1;
        self.release(z)
    }
}

impl<K: Ord, V> AvlMultiMap<K, V> {
    /// Inserts an entry and returns a handle to it. An entry with an equal key
    /// is placed after the existing ones along the search path.
    pub(crate) fn insert(&mut self, key: K, value: V) -> Handle {
        let z = self.alloc(key, value);

        let mut x = SENTINEL;
        let mut child_is_left = true;
        let mut y = self.left(SENTINEL);
        while let Some(n) = y {
            x = n;
            child_is_left = self.key(z) < self.key(n);
            y = if child_is_left {
                self.left(n)
            } else {
                self.right(n)
            };
        }

        self.node_mut(z).parent = x;
        if child_is_left {
            self.node_mut(x).left = Some(z);
        } else {
            self.node_mut(x).right = Some(z);
        }

        if let Some(l) = self.left(self.start) {
            self.start = l;
        }

        self.balance_after_insert(x, child_is_left);
        self.len += 1;

        Handle {
            node: z,
            generation: self.node(z).generation,
        }
    }

    /// Changes the key of the entry referred to by `handle` and returns the
    /// handle to use from now on. Returns `None` if the handle is stale.
    ///
    /// If the new key still sorts between the entry's neighbours, the key is
    /// rewritten in place and `handle` stays valid. Otherwise the entry is moved
    /// and a new handle is returned.
    pub(crate) fn update_key(&mut self, handle: Handle, key: K) -> Option<Handle> {
        if !self.is_live(handle) {
            return None;
        }

        let n = handle.node;
        let prev = self.predecessor(n);
        let next = self.successor(n);
        let fits = (prev == SENTINEL || *self.key(prev) <= key)
            && (next == SENTINEL || key <= *self.key(next));

        if fits {
            if let Some((k, _)) = &mut self.node_mut(n).entry {
                *k = key;
            }
            Some(handle)
        } else {
            let (_, value) = self.remove_node(n);
            Some(self.insert(key, value))
        }
    }
}

#[cfg(test)]
impl<K: Ord + std::fmt::Debug, V> AvlMultiMap<K, V> {
    /// Panics unless the links, balance factors, ordering, `len` and `start`
    /// are all consistent. Returns the height of the tree.
    pub(crate) fn check_invariants(&self) -> usize {
        fn walk<K: Ord + std::fmt::Debug, V>(
            map: &AvlMultiMap<K, V>,
            n: Option<NodeId>,
            parent: NodeId,
            count: &mut usize,
        ) -> usize {
            let Some(n) = n else { return 0 };
            assert_eq!(map.parent(n), parent, "bad parent link of {n:?}");
            assert!(map.node(n).entry.is_some(), "{n:?} is vacant");
            *count += 1;

            let lh = walk(map, map.left(n), n, count);
            let rh = walk(map, map.right(n), n, count);
            let expected = match rh as isize - lh as isize {
                -1 => Factor::LeftHeavy,
                0 => Factor::Balanced,
                1 => Factor::RightHeavy,
                d => panic!("{n:?} is unbalanced by {d}"),
            };
            assert_eq!(map.factor(n), expected, "bad factor of {n:?}");
            lh.max(rh) + 1
        }

        assert_eq!(self.right(SENTINEL), None);
        let mut count = 0;
        let height = walk(self, self.left(SENTINEL), SENTINEL, &mut count);
        assert_eq!(count, self.len);

        let root_min = self.left(SENTINEL).map_or(SENTINEL, |r| self.minimum(r));
        assert_eq!(self.start, root_min);

        let keys = self.iter().map(|(k, _)| k).collect::<Vec<_>>();
        assert_eq!(keys.len(), self.len);
        assert!(keys.windows(2).all(|w| w[0] <= w[1]), "out of order: {keys:?}");

        height
    }
}

#[cfg(test)]
mod tests {
    use super::{AvlMultiMap, Handle};

    use proptest::prelude::*;

    fn keys<K: Copy, V>(map: &AvlMultiMap<K, V>) -> Vec<K> {
        map.iter().map(|(k, _)| *k).collect()
    }

    #[test]
    fn empty() {
        let mut map = AvlMultiMap::<u32, ()>::new();
        assert!(map.is_empty());
        assert_eq!(map.first(), None);
        assert_eq!(map.pop_first(), None);
        assert_eq!(map.iter().next(), None);
        assert_eq!(map.check_invariants(), 0);
    }

    #[test]
    fn ascending_inserts_stay_balanced() {
        let mut map = AvlMultiMap::new();
        for i in 0..1024u32 {
            map.insert(i, i * 10);
        }
        // An AVL tree with 1024 nodes is at most 1.44 * log2(1026) high.
        assert!(map.check_invariants() <= 14);
        assert_eq!(map.len(), 1024);
        assert_eq!(map.first(), Some((&0, &0)));

        for i in 0..1024u32 {
            assert_eq!(map.pop_first(), Some((i, i * 10)));
        }
        assert!(map.is_empty());
        map.check_invariants();
    }

    #[test]
    fn descending_inserts_track_the_first_entry() {
        let mut map = AvlMultiMap::new();
        for i in (0..100u32).rev() {
            map.insert(i, ());
            assert_eq!(map.first().map(|(k, _)| *k), Some(i));
        }
        map.check_invariants();
        assert_eq!(keys(&map), (0..100).collect::<Vec<_>>());
    }

    #[test]
    fn duplicate_keys_are_all_kept() {
        let mut map = AvlMultiMap::new();
        let handles = ["a", "b", "c", "d"].map(|v| map.insert(7, v));
        map.insert(3, "x");
        map.insert(9, "y");
        map.check_invariants();

        assert_eq!(keys(&map), vec![3, 7, 7, 7, 7, 9]);
        for (h, v) in handles.iter().zip(["a", "b", "c", "d"]) {
            assert_eq!(map.get(*h), Some((&7, &v)));
        }

        assert_eq!(map.remove(handles[2]), Some((7, "c")));
        assert_eq!(map.get(handles[2]), None);
        assert_eq!(map.get(handles[1]), Some((&7, &"b")));
        map.check_invariants();
    }

    #[test]
    fn handles_survive_unrelated_changes() {
        let mut map = AvlMultiMap::new();
        let handles = (0..64u32).map(|i| map.insert(i, i)).collect::<Vec<_>>();

        for h in handles.iter().step_by(2) {
            map.remove(*h);
        }
        for i in 100..150u32 {
            map.insert(i, i);
        }
        map.check_invariants();

        for (i, h) in handles.iter().enumerate() {
            let i = i as u32;
            if i % 2 == 0 {
                assert_eq!(map.get(*h), None);
            } else {
                assert_eq!(map.get(*h), Some((&i, &i)));
            }
        }
    }

    #[test]
    fn stale_handles_are_rejected_after_reuse() {
        let mut map = AvlMultiMap::new();
        let h = map.insert(1, "one");
        assert_eq!(map.remove(h), Some((1, "one")));

        // The freed slot is reused by the next insertion.
        let h2 = map.insert(2, "two");
        assert_ne!(h, h2);
        assert_eq!(map.get(h), None);
        assert_eq!(map.remove(h), None);
        assert_eq!(map.update_key(h, 5), None);
        assert_eq!(map.get(h2), Some((&2, &"two")));
    }

    #[test]
    fn update_key_in_place() {
        let mut map = AvlMultiMap::new();
        map.insert(10, "a");
        let h = map.insert(20, "b");
        map.insert(30, "c");

        // Still between its neighbours, so the handle is kept.
        assert_eq!(map.update_key(h, 25), Some(h));
        assert_eq!(keys(&map), vec![10, 25, 30]);

        // Equal to a neighbour is still in place.
        assert_eq!(map.update_key(h, 30), Some(h));
        map.check_invariants();
    }

    #[test]
    fn update_key_moves_the_entry() {
        let mut map = AvlMultiMap::new();
        let h1 = map.insert(10, "a");
        let h2 = map.insert(20, "b");
        map.insert(30, "c");

        let moved = map.update_key(h1, 40).unwrap();
        assert_eq!(map.get(moved), Some((&40, &"a")));
        assert_eq!(keys(&map), vec![20, 30, 40]);
        assert_eq!(map.first(), Some((&20, &"b")));
        assert_eq!(map.get(h2), Some((&20, &"b")));

        let moved = map.update_key(moved, 1).unwrap();
        assert_eq!(map.first(), Some((&1, &"a")));
        assert_eq!(map.get(moved), Some((&1, &"a")));
        map.check_invariants();
    }

    #[test]
    fn clear_invalidates_every_handle() {
        let mut map = AvlMultiMap::new();
        let handles = (0..10u32).map(|i| map.insert(i, ())).collect::<Vec<_>>();
        map.clear();

        assert!(map.is_empty());
        assert_eq!(map.first(), None);
        assert!(handles.iter().all(|h| map.get(*h).is_none()));
        map.check_invariants();

        let h = map.insert(42, ());
        assert_eq!(map.first(), Some((&42, &())));
        assert_eq!(map.get(h), Some((&42, &())));
        map.check_invariants();
    }

    #[test]
    fn iterates_from_both_ends() {
        let mut map = AvlMultiMap::new();
        for i in [5u32, 1, 4, 2, 3] {
            map.insert(i, ());
        }

        let mut iter = map.iter();
        assert_eq!(iter.len(), 5);
        assert_eq!(iter.next().map(|(k, _)| *k), Some(1));
        assert_eq!(iter.next_back().map(|(k, _)| *k), Some(5));
        assert_eq!(iter.next_back().map(|(k, _)| *k), Some(4));
        assert_eq!(iter.len(), 2);
        assert_eq!(iter.next().map(|(k, _)| *k), Some(2));
        assert_eq!(iter.next().map(|(k, _)| *k), Some(3));
        assert_eq!(iter.next(), None);
        assert_eq!(iter.next_back(), None);

        let rev = map.iter().rev().map(|(k, _)| *k).collect::<Vec<_>>();
        assert_eq!(rev, vec![5, 4, 3, 2, 1]);
    }

    #[derive(Clone, Debug)]
    enum Op {
        Insert(u8),
        Remove(usize),
        UpdateKey(usize, u8),
        PopFirst,
    }

    fn op() -> impl Strategy<Value = Op> {
        prop_oneof![
            3 => any::<u8>().prop_map(Op::Insert),
            2 => any::<usize>().prop_map(Op::Remove),
            2 => (any::<usize>(), any::<u8>()).prop_map(|(i, k)| Op::UpdateKey(i, k)),
            1 => Just(Op::PopFirst),
        ]
    }

    proptest! {
        // Runs random operations against the tree and a sorted `Vec` model,
        // where each value is a unique id.
        #[test]
        fn behaves_like_a_sorted_vec(ops in prop::collection::vec(op(), 1..300)) {
            let mut map = AvlMultiMap::new();
            let mut model: Vec<(u8, u32)> = Vec::new();
            let mut live: Vec<(Handle, u32)> = Vec::new();
            let mut next_id = 0u32;

            for op in ops {
                match op {
                    Op::Insert(k) => {
                        let h = map.insert(k, next_id);
                        model.push((k, next_id));
                        live.push((h, next_id));
                        next_id += 1;
                    }
                    Op::Remove(i) if !live.is_empty() => {
                        let (h, id) = live.swap_remove(i % live.len());
                        let (k, v) = map.remove(h).unwrap();
                        prop_assert_eq!(v, id);
                        let pos = model.iter().position(|e| *e == (k, id)).unwrap();
                        model.remove(pos);
                        prop_assert_eq!(map.remove(h), None);
                    }
                    Op::UpdateKey(i, k) if !live.is_empty() => {
                        let i = i % live.len();
                        let (h, id) = live[i];
                        let h = map.update_key(h, k).unwrap();
                        prop_assert_eq!(map.get(h), Some((&k, &id)));
                        live[i].0 = h;
                        let e = model.iter_mut().find(|e| e.1 == id).unwrap();
                        e.0 = k;
                    }
                    Op::PopFirst => {
                        let min = model.iter().map(|e| e.0).min();
                        match map.pop_first() {
                            Some((k, id)) => {
                                prop_assert_eq!(Some(k), min);
                                model.retain(|e| e.1 != id);
                                live.retain(|e| e.1 != id);
                            }
                            None => prop_assert!(model.is_empty()),
                        }
                    }
                    _ => {}
                }

                map.check_invariants();
                prop_assert_eq!(map.len(), model.len());
                for (h, id) in &live {
                    prop_assert_eq!(map.get(*h).map(|(_, v)| *v), Some(*id));
                }
            }

            let mut expected = model.iter().map(|e| e.0).collect::<Vec<_>>();
            expected.sort_unstable();
            prop_assert_eq!(keys(&map), expected);
        }
    }
}
