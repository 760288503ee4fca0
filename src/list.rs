//! Intrusive circular doubly linked list capability.
//!
//! The list algorithms are generic over where the head, the count and
//! the per-node links live; the small list keeps its links inside the
//! tag words of 8-byte blocks, the explicit list inside the payload of
//! larger ones. Nodes are `u64` handles and `NIL` is never a member.

use crate::heap::NIL;

/// Anchor of a list whose nodes live elsewhere: the head handle and
/// the node count.
pub struct ListAnchor {
    pub(crate) head: u64,
    pub(crate) count: u64,
}

impl ListAnchor {
    pub(crate) const fn new() -> ListAnchor {
        ListAnchor {
            head: NIL,
            count: 0,
        }
    }

    pub fn head(&self) -> u64 {
        self.head
    }

    pub fn count(&self) -> u64 {
        self.count
    }
}

pub trait List {
    fn head(&self) -> u64;
    fn set_head(&mut self, new_head: u64);

    fn count(&self) -> u64;
    fn set_count(&mut self, new_count: u64);

    fn node_prev(&self, node: u64) -> u64;
    fn set_node_prev(&mut self, node: u64, prev: u64);

    fn node_next(&self, node: u64) -> u64;
    fn set_node_next(&mut self, node: u64, next: u64);

    /// Tears down node-local state when the node leaves the list.
    fn destruct_node(&mut self, _node: u64) {}

    fn nodes_equal(&self, first: u64, second: u64) -> bool {
        first == second
    }

    /// Head-inserts `node`; in the empty list the node becomes its own
    /// neighborhood.
    fn insert_node(&mut self, node: u64) -> bool {
        if node == NIL {
            return false;
        }
        let head = self.head();
        let count = self.count();

        if head == NIL && count == 0 {
            self.set_head(node);
            self.set_count(1);
            self.set_node_prev(node, node);
            self.set_node_next(node, node);
            true
        } else if head != NIL && count != 0 {
            let head_prev = self.node_prev(head);

            self.set_node_next(node, head);
            self.set_node_prev(head, node);

            self.set_node_next(head_prev, node);
            self.set_node_prev(node, head_prev);

            self.set_head(node);
            self.set_count(count + 1);
            true
        } else {
            false
        }
    }

    /// Splices `node` out of its neighborhood; deleting the head moves
    /// the head to the next node.
    fn delete_node(&mut self, node: u64) -> bool {
        let head = self.head();
        if head == NIL || node == NIL {
            return false;
        }

        // the same splice works for the single-node list
        let prev = self.node_prev(node);
        let next = self.node_next(node);
        self.set_node_next(prev, next);
        self.set_node_prev(next, prev);

        if self.nodes_equal(node, head) {
            self.set_head(next);
        }

        self.destruct_node(node);

        let count = self.count() - 1;
        self.set_count(count);
        if count == 0 {
            self.set_head(NIL);
        }
        true
    }

    /// Returns the current head and advances it by one step; the list
    /// is infinite-cyclic iteration fuel.
    fn rotate_head(&mut self) -> u64 {
        let head = self.head();
        if head == NIL {
            return NIL;
        }
        let next = self.node_next(head);
        self.set_head(next);
        head
    }

    /// Walks `index` nexts from the head.
    fn node_by_index(&self, index: u64) -> u64 {
        let mut node = self.head();
        if node == NIL || index >= self.count() {
            return NIL;
        }
        for _ in 0..index {
            node = self.node_next(node);
        }
        node
    }
}
