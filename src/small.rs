//! The small free list: exactly-8-byte free blocks.
//!
//! An 8-byte block owns only its header and one trailing word, so the
//! links alias the tags: prev takes the header's size field (redundant
//! while B8 conveys the size), next takes the trailing word. Block
//! headers sit at offsets congruent to 4 mod 8, so a link's low three
//! bits are implied: masked away on store, restored as `| 0x4` on
//! load, leaving room for the A/P8/B8 bits underneath.

use crate::heap::Heap;
use crate::list::{List, ListAnchor};

/// A view coupling the heap bytes with the small-list anchor.
pub struct SmallList<'a> {
    pub(crate) heap: &'a mut Heap,
    pub(crate) anchor: &'a mut ListAnchor,
}

impl<'a> SmallList<'a> {
    pub fn new(heap: &'a mut Heap, anchor: &'a mut ListAnchor) -> SmallList<'a> {
        SmallList { heap, anchor }
    }

    /// Inserts a free 8-byte block.
    pub fn insert(&mut self, free_header: u64) {
        assert!(self.heap.first_block() <= free_header && free_header <= self.heap.last_block());
        assert!(free_header % 8 == 4);
        assert!(self.heap.block_size(free_header) == 8);
        assert!(!self.heap.allocated(free_header));

        self.insert_node(free_header);
    }

    /// Removes an 8-byte block about to be allocated or merged.
    pub fn remove(&mut self, free_header: u64) {
        assert!(self.heap.first_block() <= free_header && free_header <= self.heap.last_block());
        assert!(free_header % 8 == 4);
        assert!(self.heap.block_size(free_header) == 8);

        self.delete_node(free_header);
    }
}

impl List for SmallList<'_> {
    fn head(&self) -> u64 {
        self.anchor.head
    }

    fn set_head(&mut self, new_head: u64) {
        self.anchor.head = new_head;
    }

    fn count(&self) -> u64 {
        self.anchor.count
    }

    fn set_count(&mut self, new_count: u64) {
        self.anchor.count = new_count;
    }

    fn node_prev(&self, node: u64) -> u64 {
        assert!(node % 8 == 4);
        assert!(!self.heap.allocated(node));

        (self.heap.word(node) as u64 & !0x7) | 0x4
    }

    fn set_node_prev(&mut self, node: u64, prev: u64) {
        assert!(node % 8 == 4);
        assert!(!self.heap.allocated(node));
        assert!(prev % 8 == 4);
        assert!(prev >> 32 == 0);

        let word = (self.heap.word(node) & 0x0000_0007) | (prev as u32 & !0x7);
        self.heap.set_word(node, word);
    }

    fn node_next(&self, node: u64) -> u64 {
        assert!(node % 8 == 4);
        assert!(!self.heap.allocated(node));

        (self.heap.word(node + 4) as u64 & !0x7) | 0x4
    }

    fn set_node_next(&mut self, node: u64, next: u64) {
        assert!(node % 8 == 4);
        assert!(!self.heap.allocated(node));
        assert!(next % 8 == 4);
        assert!(next >> 32 == 0);

        let word = (self.heap.word(node + 4) & 0x0000_0007) | (next as u32 & !0x7);
        self.heap.set_word(node + 4, word);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::block::tests::build_heap;
    use crate::heap::NIL;

    fn free8(heap: &Heap) -> [u64; 3] {
        // [F8][A16][F8][A16][F8][A4024]
        let b0 = heap.first_block();
        [b0, b0 + 24, b0 + 48]
    }

    fn heap_with_three_free8() -> Heap {
        build_heap(&[(8, false), (16, true), (8, false), (16, true), (8, false), (4024, true)])
    }

    #[test]
    fn ring_grows_by_head_insert() {
        let mut heap = heap_with_three_free8();
        let mut anchor = ListAnchor::new();
        let [b0, b1, b2] = free8(&heap);

        let mut list = SmallList::new(&mut heap, &mut anchor);
        list.insert(b0);
        assert_eq!(list.head(), b0);
        assert_eq!(list.node_prev(b0), b0);
        assert_eq!(list.node_next(b0), b0);

        list.insert(b1);
        list.insert(b2);
        assert_eq!(list.count(), 3);
        assert_eq!(list.head(), b2);
        // head-insert order: b2 -> b1 -> b0 -> b2
        assert_eq!(list.node_next(b2), b1);
        assert_eq!(list.node_next(b1), b0);
        assert_eq!(list.node_next(b0), b2);
        assert_eq!(list.node_prev(b2), b0);
        assert_eq!(list.node_by_index(2), b0);
    }

    #[test]
    fn links_survive_the_tag_bits() {
        let mut heap = heap_with_three_free8();
        let mut anchor = ListAnchor::new();
        let [b0, b1, _] = free8(&heap);

        let mut list = SmallList::new(&mut heap, &mut anchor);
        list.insert(b0);
        list.insert(b1);

        // the stored words are 8-aligned; the low three bits stay with
        // the tags and the link is recovered with the +4 re-added
        assert_eq!(list.node_next(b1), b0);
        assert_eq!(list.node_prev(b0), b1);
        assert_eq!(heap.block_size(b0), 8);
        assert_eq!(heap.block_size(b1), 8);
        assert!(!heap.allocated(b0));
        assert!(!heap.allocated(b1));
    }

    #[test]
    fn delete_rewires_and_empties() {
        let mut heap = heap_with_three_free8();
        let mut anchor = ListAnchor::new();
        let [b0, b1, b2] = free8(&heap);

        let mut list = SmallList::new(&mut heap, &mut anchor);
        list.insert(b0);
        list.insert(b1);
        list.insert(b2);

        list.remove(b1);
        assert_eq!(list.count(), 2);
        assert_eq!(list.node_next(b2), b0);
        assert_eq!(list.node_prev(b0), b2);

        // deleting the head moves it forward
        list.remove(b2);
        assert_eq!(list.head(), b0);

        list.remove(b0);
        assert_eq!(list.count(), 0);
        assert_eq!(list.head(), NIL);
    }

    #[test]
    fn rotate_head_cycles() {
        let mut heap = heap_with_three_free8();
        let mut anchor = ListAnchor::new();
        let [b0, b1, b2] = free8(&heap);

        let mut list = SmallList::new(&mut heap, &mut anchor);
        list.insert(b0);
        list.insert(b1);
        list.insert(b2);

        assert_eq!(list.rotate_head(), b2);
        assert_eq!(list.rotate_head(), b1);
        assert_eq!(list.rotate_head(), b0);
        assert_eq!(list.rotate_head(), b2);
        assert_eq!(list.count(), 3);
    }
}
