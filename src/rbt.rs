//! Size-indexed intrusive red-black tree of free blocks.
//!
//! The tree never owns node memory: a node is a free block, its
//! parent/left/right links overlay the payload words and its color
//! rides in footer bit 1. The key is the block size read straight from
//! the header, so duplicate keys are common; the BST invariant is the
//! relaxed `left.max_key <= key <= right.min_key` and insertion
//! descends right on equality, clustering duplicates on right spines.

use crate::heap::{Heap, NIL};
use crate::tmverbose;

/// Blocks of at least this size are indexed by the tree: header +
/// parent + left + right + footer, rounded up one step.
pub const MIN_REDBLACK_TREE_BLOCKSIZE: u32 = 40;

#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub enum Color {
    Red,
    Black,
}

impl Color {
    pub(crate) fn from_bit(bit: u32) -> Color {
        if bit == 0 {
            Color::Red
        } else {
            Color::Black
        }
    }

    pub(crate) fn bit(self) -> u32 {
        match self {
            Color::Red => 0,
            Color::Black => 1,
        }
    }
}

#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub enum Child {
    Left,
    Right,
}

/// Red-black tree capability over `u64` node handles. Implementors
/// provide the root cell and the per-node accessors; the insertion,
/// deletion and search algorithms are generic. A NIL node reads as
/// BLACK with no children.
pub trait RbTree {
    fn root(&self) -> u64;
    fn set_root(&mut self, new_root: u64);

    fn is_null(&self, node: u64) -> bool {
        node == NIL
    }

    fn nodes_equal(&self, first: u64, second: u64) -> bool {
        first == second
    }

    /// Tears down node-local state when the node leaves the tree.
    fn destruct_node(&mut self, _node: u64) {}

    fn parent(&self, node: u64) -> u64;
    fn set_parent(&mut self, node: u64, parent: u64);

    fn left(&self, node: u64) -> u64;
    fn set_left(&mut self, node: u64, left: u64);

    fn right(&self, node: u64) -> u64;
    fn set_right(&mut self, node: u64, right: u64);

    fn color(&self, node: u64) -> Color;
    fn set_color(&mut self, node: u64, color: Color);

    fn key(&self, node: u64) -> u64;

    fn bst_set_child(&mut self, parent: u64, child: u64, direction: Child) {
        match direction {
            Child::Left => self.set_left(parent, child),
            Child::Right => self.set_right(parent, child),
        }
        if !self.is_null(child) {
            self.set_parent(child, parent);
        }
    }

    /// Reroutes the victim's parent (or the root cell) to `node`. The
    /// victim keeps its own links; the caller decides its fate.
    fn bst_replace(&mut self, victim: u64, node: u64) {
        assert!(!self.is_null(victim));

        let v_parent = self.parent(victim);
        if self.nodes_equal(victim, self.root()) {
            assert!(self.is_null(v_parent));
            self.set_root(node);
            if !self.is_null(node) {
                self.set_parent(node, NIL);
            }
            return;
        }

        if self.nodes_equal(victim, self.left(v_parent)) {
            self.bst_set_child(v_parent, node, Child::Left);
        } else {
            assert!(self.nodes_equal(victim, self.right(v_parent)));
            self.bst_set_child(v_parent, node, Child::Right);
        }
    }

    /// Plain BST insertion; equal keys descend right.
    fn bst_insert(&mut self, node: u64) {
        assert!(!self.is_null(node));

        let mut root = self.root();
        if self.is_null(root) {
            self.set_parent(node, NIL);
            self.set_left(node, NIL);
            self.set_right(node, NIL);
            self.set_color(node, Color::Black);
            self.set_root(node);
            return;
        }

        let node_key = self.key(node);
        loop {
            let root_key = self.key(root);
            if node_key < root_key {
                let root_left = self.left(root);
                if self.is_null(root_left) {
                    self.bst_set_child(root, node, Child::Left);
                    return;
                }
                root = root_left;
            } else {
                // equal keys go right, so duplicates cluster on the
                // right spine of their first occurrence
                let root_right = self.right(root);
                if self.is_null(root_right) {
                    self.bst_set_child(root, node, Child::Right);
                    return;
                }
                root = root_right;
            }
        }
    }

    /// The four rotation shapes, re-parenting through `bst_replace`.
    /// Returns the new subtree root.
    ///
    /// ```text
    /// LL (g,(p,(n,A,B),C),D) => (p,(n,A,B),(g,C,D))
    /// LR (g,(p,A,(n,B,C)),D) => (n,(p,A,B),(g,C,D))
    /// RL (g,A,(p,(n,B,C),D)) => (n,(g,A,B),(p,C,D))
    /// RR (g,A,(p,B,(n,C,D))) => (p,(g,A,B),(n,C,D))
    /// ```
    fn rotate(&mut self, node: u64, parent: u64, grandparent: u64) -> u64 {
        assert!(!self.is_null(node));
        assert!(!self.is_null(parent));
        assert!(!self.is_null(grandparent));
        assert!(self.nodes_equal(parent, self.parent(node)));
        assert!(self.nodes_equal(grandparent, self.parent(parent)));

        let node_left = self.left(node);
        let node_right = self.right(node);
        let parent_left = self.left(parent);
        let parent_right = self.right(parent);

        if self.nodes_equal(self.left(grandparent), parent) {
            if self.nodes_equal(parent_left, node) {
                self.bst_replace(grandparent, parent);
                self.bst_set_child(grandparent, parent_right, Child::Left);
                self.bst_set_child(parent, grandparent, Child::Right);
                parent
            } else {
                self.bst_replace(grandparent, node);
                self.bst_set_child(parent, node_left, Child::Right);
                self.bst_set_child(node, parent, Child::Left);
                self.bst_set_child(grandparent, node_right, Child::Left);
                self.bst_set_child(node, grandparent, Child::Right);
                node
            }
        } else if self.nodes_equal(parent_left, node) {
            self.bst_replace(grandparent, node);
            self.bst_set_child(grandparent, node_left, Child::Right);
            self.bst_set_child(node, grandparent, Child::Left);
            self.bst_set_child(parent, node_right, Child::Left);
            self.bst_set_child(node, parent, Child::Right);
            node
        } else {
            self.bst_replace(grandparent, parent);
            self.bst_set_child(grandparent, parent_left, Child::Right);
            self.bst_set_child(parent, grandparent, Child::Left);
            parent
        }
    }

    /// Inserts `node`: BST insert as a red node, then float the
    /// red-red conflict up by rotate-and-recolor until it dissolves.
    fn insert_node(&mut self, node: u64) {
        assert!(!self.is_null(node));

        self.set_color(node, Color::Red);
        self.set_parent(node, NIL);
        self.set_left(node, NIL);
        self.set_right(node, NIL);

        self.bst_insert(node);

        let mut cur = node;
        loop {
            let cur_parent = self.parent(cur);
            if self.is_null(cur_parent) {
                // a red node floating to the root raises the black
                // height of the whole tree by one
                self.set_color(cur, Color::Black);
                return;
            }
            if self.color(cur_parent) == Color::Black {
                return;
            }

            // red parent: the grandparent exists and is black
            assert!(self.color(cur) == Color::Red);
            let cur_grandparent = self.parent(cur_parent);
            assert!(!self.is_null(cur_grandparent));
            assert!(self.color(cur_grandparent) == Color::Black);

            let subroot = self.rotate(cur, cur_parent, cur_grandparent);

            // all three participants turn black; the subtree root
            // turns red and carries the conflict one level up
            self.set_color(cur, Color::Black);
            self.set_color(cur_parent, Color::Black);
            self.set_color(cur_grandparent, Color::Black);
            self.set_color(subroot, Color::Red);

            cur = subroot;
        }
    }

    /// Splices `node` out of the BST, reducing the two-children case
    /// to a leaf or single-child deletion by an in-order-successor
    /// swap in which the colors stay with the positions. Returns the
    /// parent owing a double black, or NIL when none arises.
    fn delete_node_only(&mut self, node: u64) -> u64 {
        if self.is_null(self.root()) || self.is_null(node) {
            return NIL;
        }

        let node_left = self.left(node);
        let node_right = self.right(node);
        let left_null = self.is_null(node_left);
        let right_null = self.is_null(node_right);

        if left_null && right_null {
            // a black leaf leaves a double-black NIL behind
            let mut db_parent = NIL;
            if self.color(node) == Color::Black {
                db_parent = self.parent(node);
            }
            self.bst_replace(node, NIL);
            self.destruct_node(node);
            db_parent
        } else if left_null || right_null {
            // one child only: the node is black, the child is red
            assert!(self.color(node) == Color::Black);
            let red_child = if left_null { node_right } else { node_left };
            assert!(self.color(red_child) == Color::Red);
            assert!(self.is_null(self.left(red_child)));
            assert!(self.is_null(self.right(red_child)));

            self.set_color(red_child, Color::Black);
            self.bst_replace(node, red_child);
            self.destruct_node(node);
            NIL
        } else {
            // two children: swap with the in-order successor; only
            // the BST shape is transiently wrong
            let s;
            if self.is_null(self.left(node_right)) {
                // (x,A,(s,#,C))
                s = node_right;

                self.bst_set_child(node, self.right(s), Child::Right);
                self.bst_set_child(node, NIL, Child::Left);

                self.bst_replace(node, s);

                self.bst_set_child(s, node_left, Child::Left);
                self.bst_set_child(s, node, Child::Right);
            } else {
                // leftmost node of the right subtree
                let mut succ = node_right;
                loop {
                    let succ_left = self.left(succ);
                    if self.is_null(succ_left) {
                        break;
                    }
                    succ = succ_left;
                }
                s = succ;

                let s_parent = self.parent(s);
                self.bst_set_child(node, NIL, Child::Left);
                self.bst_set_child(node, self.right(s), Child::Right);

                self.bst_replace(node, s);

                self.bst_set_child(s, node_left, Child::Left);
                self.bst_set_child(s, node_right, Child::Right);
                self.bst_set_child(s_parent, node, Child::Left);
            }

            let node_color = self.color(node);
            let s_color = self.color(s);
            self.set_color(node, s_color);
            self.set_color(s, node_color);

            assert!(!self.is_null(node));
            assert!(self.is_null(self.left(node)));
            self.delete_node_only(node)
        }
    }

    /// Recovers (parent, sibling, near, far) around the double black.
    /// `db` may be NIL right after a leaf deletion, in which case the
    /// stale `parent_in` reference drives the calculation; near is the
    /// sibling's child on the double black's side, far the opposite
    /// one.
    fn psnf(&self, db: u64, parent_in: u64) -> (u64, u64, u64, u64) {
        let parent = if self.is_null(db) {
            parent_in
        } else {
            self.parent(db)
        };
        if self.is_null(parent) {
            return (NIL, NIL, NIL, NIL);
        }

        let parent_left = self.left(parent);
        let parent_right = self.right(parent);

        let (sibling, near, far);
        if self.nodes_equal(db, parent_left) {
            // (p, db, (s, near, far))
            sibling = parent_right;
            near = self.left(sibling);
            far = self.right(sibling);
        } else {
            assert!(self.nodes_equal(db, parent_right));
            // (p, (s, far, near), db)
            sibling = parent_left;
            near = self.right(sibling);
            far = self.left(sibling);
        }
        assert!(!self.is_null(sibling));

        (parent, sibling, near, far)
    }

    /// Deletes `node`, then discharges the double black by iterating
    /// on the psnf color vector (RED = 0, BLACK = 1). A double black
    /// that reaches the root is absorbed.
    fn delete_node(&mut self, node: u64) {
        let mut db = NIL;
        let mut parent = self.delete_node_only(node);
        if self.is_null(parent) {
            return;
        }

        while !self.nodes_equal(db, self.root()) {
            let (p, sibling, near, far) = self.psnf(db, parent);
            if self.is_null(p) {
                break;
            }

            let psnf_color = (self.color(p).bit() << 3)
                | (self.color(sibling).bit() << 2)
                | (self.color(near).bit() << 1)
                | self.color(far).bit();

            match psnf_color {
                0xF => {
                    // nothing red to borrow: push the obligation up
                    self.set_color(sibling, Color::Red);
                    db = p;
                    parent = self.parent(db);
                }
                0xB => {
                    // red sibling: rotate it over and retry as one of
                    // the black-sibling shapes
                    self.rotate(far, sibling, p);
                    self.set_color(sibling, Color::Black);
                    self.set_color(p, Color::Red);
                    parent = p;
                }
                0x7 => {
                    // the parent hands its red down
                    self.set_color(p, Color::Black);
                    self.set_color(sibling, Color::Red);
                    break;
                }
                0x4 | 0x5 | 0xC | 0xD => {
                    // near red, far black
                    let p_color = self.color(p);
                    self.rotate(near, sibling, p);
                    self.set_color(near, p_color);
                    self.set_color(p, Color::Black);
                    break;
                }
                0x6 | 0xE => {
                    // far red
                    let p_color = self.color(p);
                    self.rotate(far, sibling, p);
                    self.set_color(sibling, p_color);
                    self.set_color(p, Color::Black);
                    self.set_color(far, Color::Black);
                    break;
                }
                _ => unreachable!(),
            }
        }
    }

    /// First node whose key is >= `key`, or NIL. Returns the leftmost
    /// of equal keys: equals live on right spines, so the first one
    /// met while descending is the topmost occurrence.
    fn find_ge(&self, key: u64) -> u64 {
        let mut node = self.root();
        let mut best = NIL;
        while !self.is_null(node) {
            let node_key = self.key(node);
            if key == node_key {
                return node;
            } else if key < node_key {
                best = node;
                node = self.left(node);
            } else {
                node = self.right(node);
            }
        }
        best
    }
}

/* ------------------------------------- */
/*  Verification                         */
/* ------------------------------------- */

/// Checks the red-black properties of the whole tree: equal black
/// heights, no red-red edge, parent links consistent, and the relaxed
/// key ordering.
pub fn verify<T: RbTree + ?Sized>(tree: &T) {
    let root = tree.root();
    if tree.is_null(root) {
        return;
    }
    assert!(tree.is_null(tree.parent(root)));
    verify_subtree(tree, root);
}

/// Returns (black height, min key, max key) of the subtree.
pub fn verify_subtree<T: RbTree + ?Sized>(tree: &T, node: u64) -> (u64, u64, u64) {
    if tree.is_null(node) {
        return (1, 0, 0);
    }

    let key = tree.key(node);
    let left = tree.left(node);
    let right = tree.right(node);

    if !tree.is_null(left) {
        assert!(tree.nodes_equal(tree.parent(left), node));
    }
    if !tree.is_null(right) {
        assert!(tree.nodes_equal(tree.parent(right), node));
    }

    let (left_bh, left_min, left_max) = verify_subtree(tree, left);
    let (right_bh, right_min, right_max) = verify_subtree(tree, right);
    assert!(left_bh == right_bh);

    let black_height = match tree.color(node) {
        Color::Black => left_bh + 1,
        Color::Red => {
            assert!(tree.color(left) == Color::Black);
            assert!(tree.color(right) == Color::Black);
            left_bh
        }
    };

    let mut key_min = key;
    let mut key_max = key;
    if !tree.is_null(left) {
        assert!(left_max <= key);
        key_min = left_min;
    }
    if !tree.is_null(right) {
        assert!(key <= right_min);
        key_max = right_max;
    }

    (black_height, key_min, key_max)
}

pub fn subtree_count<T: RbTree + ?Sized>(tree: &T, node: u64) -> u64 {
    if tree.is_null(node) {
        return 0;
    }
    1 + subtree_count(tree, tree.left(node)) + subtree_count(tree, tree.right(node))
}

pub fn subtree_contains<T: RbTree + ?Sized>(tree: &T, node: u64, target: u64) -> bool {
    if tree.is_null(node) {
        return false;
    }
    tree.nodes_equal(node, target)
        || subtree_contains(tree, tree.left(node), target)
        || subtree_contains(tree, tree.right(node), target)
}

/* ------------------------------------- */
/*  The free-block tree                  */
/* ------------------------------------- */

/// Anchor of a tree whose nodes live elsewhere.
pub struct TreeAnchor {
    pub(crate) root: u64,
}

impl TreeAnchor {
    pub(crate) const fn new() -> TreeAnchor {
        TreeAnchor { root: NIL }
    }

    pub fn root(&self) -> u64 {
        self.root
    }
}

/// A view coupling the heap bytes with the tree anchor. The node key
/// is the block size in the header; parent/left/right overlay the
/// payload at offsets 4, 8 and 12; the color rides in footer bit 1.
pub struct FreeTree<'a> {
    pub(crate) heap: &'a mut Heap,
    pub(crate) anchor: &'a mut TreeAnchor,
}

impl<'a> FreeTree<'a> {
    pub fn new(heap: &'a mut Heap, anchor: &'a mut TreeAnchor) -> FreeTree<'a> {
        FreeTree { heap, anchor }
    }

    /// Inserts a free block large enough to carry a tree node.
    pub fn insert(&mut self, free_header: u64) {
        assert!(self.heap.first_block() <= free_header && free_header <= self.heap.last_block());
        assert!(free_header % 8 == 4);
        assert!(self.heap.block_size(free_header) >= MIN_REDBLACK_TREE_BLOCKSIZE);
        assert!(!self.heap.allocated(free_header));

        tmverbose!("RBT: insert block {}", free_header);
        self.insert_node(free_header);
    }

    /// Removes a block about to be allocated or merged.
    pub fn remove(&mut self, free_header: u64) {
        assert!(self.heap.first_block() <= free_header && free_header <= self.heap.last_block());
        assert!(free_header % 8 == 4);
        assert!(self.heap.block_size(free_header) >= MIN_REDBLACK_TREE_BLOCKSIZE);

        tmverbose!("RBT: remove block {}", free_header);
        self.delete_node(free_header);
    }
}

impl RbTree for FreeTree<'_> {
    fn root(&self) -> u64 {
        self.anchor.root
    }

    fn set_root(&mut self, new_root: u64) {
        self.anchor.root = new_root;
    }

    fn parent(&self, node: u64) -> u64 {
        self.heap.field32(node, MIN_REDBLACK_TREE_BLOCKSIZE, 4)
    }

    fn set_parent(&mut self, node: u64, parent: u64) {
        self.heap
            .set_field32(node, parent, MIN_REDBLACK_TREE_BLOCKSIZE, 4);
    }

    fn left(&self, node: u64) -> u64 {
        self.heap.field32(node, MIN_REDBLACK_TREE_BLOCKSIZE, 8)
    }

    fn set_left(&mut self, node: u64, left: u64) {
        self.heap
            .set_field32(node, left, MIN_REDBLACK_TREE_BLOCKSIZE, 8);
    }

    fn right(&self, node: u64) -> u64 {
        self.heap.field32(node, MIN_REDBLACK_TREE_BLOCKSIZE, 12)
    }

    fn set_right(&mut self, node: u64, right: u64) {
        self.heap
            .set_field32(node, right, MIN_REDBLACK_TREE_BLOCKSIZE, 12);
    }

    fn color(&self, node: u64) -> Color {
        if node == NIL {
            return Color::Black;
        }
        assert!(node % 8 == 4);
        assert!(self.heap.block_size(node) >= MIN_REDBLACK_TREE_BLOCKSIZE);

        let footer = self.heap.footer(node);
        Color::from_bit((self.heap.word(footer) >> 1) & 0x1)
    }

    fn set_color(&mut self, node: u64, color: Color) {
        if node == NIL {
            return;
        }
        assert!(node % 8 == 4);
        assert!(self.heap.block_size(node) >= MIN_REDBLACK_TREE_BLOCKSIZE);

        let footer = self.heap.footer(node);
        let word = (self.heap.word(footer) & 0xFFFF_FFFD) | (color.bit() << 1);
        self.heap.set_word(footer, word);
    }

    fn key(&self, node: u64) -> u64 {
        self.heap.block_size(node) as u64
    }
}
