//! Allocation policy: search, split, merge and heap extension.
//!
//! The policy owns the heap bytes and the anchors of every free-block
//! index, and is the only layer allowed to flip a block between
//! allocated and free: a block leaves its index before its tags are
//! rewritten and enters an index only after they are complete, so the
//! intrusive links never alias live tag bits.

#[cfg(any(feature = "explicit", feature = "segregated"))]
use crate::explicit::ExplicitList;
#[cfg(any(feature = "explicit", feature = "segregated"))]
use crate::explicit::MIN_EXPLICIT_FREE_LIST_BLOCKSIZE;
use crate::heap::{Heap, HEAP_MAX_SIZE, NIL, PAGE_SIZE};
use crate::list::{List, ListAnchor};
use crate::rbt::TreeAnchor;
#[cfg(feature = "segregated")]
use crate::rbt::{self, FreeTree, RbTree, MIN_REDBLACK_TREE_BLOCKSIZE};
use crate::small::SmallList;
use crate::tmverbose;
use crate::tmverbose::{HEAP_CHECKS, VERBOSE_DEL};

#[cfg(feature = "explicit")]
const MIN_BLOCK_SIZE: u32 = MIN_EXPLICIT_FREE_LIST_BLOCKSIZE;
#[cfg(any(feature = "implicit", feature = "segregated"))]
const MIN_BLOCK_SIZE: u32 = 8;

/// Block size to payload size: tiny payloads fit the 8-byte block,
/// everything else rounds to 8 and gains a header and a footer.
fn request2size(size: u32) -> u32 {
    if size <= 4 {
        8
    } else {
        crate::common::round_up(size as u64, 8) as u32 + 8
    }
}

/// A boundary-tag allocator over a fixed 32 KiB heap, growable
/// page-by-page, with the free-block index strategy chosen at build
/// time: `implicit` scans the heap, `explicit` keeps a free list,
/// `segregated` routes by size class to a small list, an explicit
/// list and a size-keyed red-black tree.
pub struct TagMalloc {
    heap: Heap,
    small: ListAnchor,
    explicit: ListAnchor,
    tree: TreeAnchor,
}

impl TagMalloc {
    /// Creates an allocator with an initialized one-page heap.
    #[allow(clippy::new_without_default)]
    pub fn new() -> TagMalloc {
        let mut allocator = TagMalloc {
            heap: Heap::new(),
            small: ListAnchor::new(),
            explicit: ListAnchor::new(),
            tree: TreeAnchor::new(),
        };
        allocator.heap_init();
        allocator
    }

    pub fn heap(&self) -> &Heap {
        &self.heap
    }

    pub fn small_list(&self) -> &ListAnchor {
        &self.small
    }

    pub fn explicit_list(&self) -> &ListAnchor {
        &self.explicit
    }

    pub fn free_tree(&self) -> &TreeAnchor {
        &self.tree
    }

    /* ------------------------------------- */
    /*  Initialization                       */
    /* ------------------------------------- */

    /// Idempotent reset: zeroes the heap, reinstalls the sentinels,
    /// turns the rest of the first page into one free block and seeds
    /// the active index with it. Invalidates every address handed out
    /// before.
    pub fn heap_init(&mut self) -> bool {
        self.heap.reset();
        self.small = ListAnchor::new();
        self.explicit = ListAnchor::new();
        self.tree = TreeAnchor::new();

        let prologue = self.heap.prologue();
        self.heap.set_allocated(prologue, true);
        self.heap.set_block_size(prologue, 8);

        let epilogue = self.heap.epilogue();
        self.heap.set_allocated(epilogue, true);
        self.heap.set_block_size(epilogue, 0);

        // not-in-use word + prologue + epilogue
        let first = self.heap.first_block();
        let first_size = (PAGE_SIZE - 4 - 8 - 4) as u32;
        self.heap.set_allocated(first, false);
        self.heap.set_block_size(first, first_size);
        let first_footer = self.heap.footer(first);
        self.heap.set_allocated(first_footer, false);
        self.heap.set_block_size(first_footer, first_size);

        self.index_insert(first);
        self.check_state();
        true
    }

    /* ------------------------------------- */
    /*  Allocation                           */
    /* ------------------------------------- */

    /// Allocates `size` payload bytes. Returns the 8-byte-aligned
    /// payload offset, or NIL when the heap cannot grow any further.
    pub fn alloc(&mut self, size: u32) -> u64 {
        tmverbose!("{}", VERBOSE_DEL);
        tmverbose!("MALLOC: size = {}", size);
        assert!(size > 0 && (size as u64) < HEAP_MAX_SIZE - 4 - 8 - 4);

        let req = request2size(size);

        let block = self.search(req);
        if block != NIL {
            let payload = self.carve(block, req);
            tmverbose!("MALLOC: result mem {}", payload);
            self.check_state();
            return payload;
        }

        // no index can help: grow the heap, fusing the grant with a
        // free tail block
        let old_last = self.heap.last_block();
        let last_free = !self.heap.allocated(old_last);
        let last_size = self.heap.block_size(old_last);
        if last_free {
            self.index_delete(old_last);
        }

        let to_request = if last_free { req - last_size } else { req };
        let old_epilogue = self.heap.epilogue();
        let granted = self.heap.extend(to_request);
        if granted == 0 {
            tmverbose!("MALLOC: the OS refused to grow the heap");
            if last_free {
                self.index_insert(old_last);
            }
            self.check_state();
            return NIL;
        }

        let (new_last, new_last_size) = if last_free {
            (old_last, last_size + granted)
        } else {
            // the old epilogue header becomes the new free tail block
            (old_epilogue, granted)
        };
        self.heap.set_allocated(new_last, false);
        self.heap.set_block_size(new_last, new_last_size);
        let new_last_footer = self.heap.footer(new_last);
        self.heap.set_allocated(new_last_footer, false);
        self.heap.set_block_size(new_last_footer, new_last_size);
        self.index_insert(new_last);

        let block = self.search(req);
        assert!(block != NIL);
        let payload = self.carve(block, req);
        tmverbose!("MALLOC: result mem {} after extension", payload);
        self.check_state();
        payload
    }

    /// Takes `req` bytes out of the free block `b`: removes it from
    /// its index, splits off the remainder when it can stand alone as
    /// a block, reindexes the remainder. Returns the payload offset.
    fn carve(&mut self, b: u64, req: u32) -> u64 {
        let b_size = self.heap.block_size(b);
        assert!(!self.heap.allocated(b));
        assert!(b_size >= req);

        self.index_delete(b);

        if b_size - req >= MIN_BLOCK_SIZE {
            tmverbose!("MALLOC: split {} off block [{}, {}]", req, b, b_size);

            // the old footer becomes the remainder's footer
            let old_footer = self.heap.footer(b);
            self.heap.set_allocated(old_footer, false);
            self.heap.set_block_size(old_footer, b_size - req);

            self.heap.set_allocated(b, true);
            self.heap.set_block_size(b, req);
            let b_footer = self.heap.footer(b);
            self.heap.set_allocated(b_footer, true);
            self.heap.set_block_size(b_footer, req);

            let remainder = self.heap.next_header(b);
            self.heap.set_allocated(remainder, false);
            self.heap.set_block_size(remainder, b_size - req);
            assert!(self.heap.footer(remainder) == old_footer);

            self.index_insert(remainder);
        } else {
            tmverbose!("MALLOC: use whole block [{}, {}]", b, b_size);

            self.heap.set_allocated(b, true);
            self.heap.set_block_size(b, b_size);
            let b_footer = self.heap.footer(b);
            self.heap.set_allocated(b_footer, true);
            self.heap.set_block_size(b_footer, b_size);
        }

        self.heap.payload(b)
    }

    /* ------------------------------------- */
    /*  Free                                 */
    /* ------------------------------------- */

    /// Returns a previously allocated payload to the heap, coalescing
    /// with free neighbors. NIL is a no-op; anything else that is not
    /// a live allocated payload is a contract violation.
    pub fn free(&mut self, payload_vaddr: u64) {
        tmverbose!("{}", VERBOSE_DEL);
        tmverbose!("FREE: mem = {}", payload_vaddr);
        if payload_vaddr == NIL {
            return;
        }

        assert!(
            self.heap.first_block() < payload_vaddr && payload_vaddr < self.heap.epilogue()
        );
        assert!(payload_vaddr & 0x7 == 0);

        let req = self.heap.header(payload_vaddr);
        let req_footer = self.heap.footer(req);

        // anything already free here is a double free
        assert!(self.heap.allocated(req));

        let next = self.heap.next_header(req);
        let prev = self.heap.prev_header(req);
        let next_allocated = self.heap.allocated(next);
        let prev_allocated = self.heap.allocated(prev);

        if next_allocated && prev_allocated {
            // *A(A->F)A*
            self.heap.set_allocated(req, false);
            self.heap.set_allocated(req_footer, false);
            self.index_insert(req);
        } else if !next_allocated && prev_allocated {
            // *A(A->F)FA* => *A[FF]A*
            self.index_delete(next);
            let merged = self.merge(req, next);
            self.index_insert(merged);
        } else if next_allocated && !prev_allocated {
            // *AF(A->F)A* => *A[FF]A*
            self.index_delete(prev);
            let merged = self.merge(prev, req);
            self.index_insert(merged);
        } else {
            // *AF(A->F)FA* => *A[FFF]A*
            self.index_delete(prev);
            self.index_delete(next);
            let merged = self.merge(prev, req);
            let merged = self.merge(merged, next);
            self.index_insert(merged);
        }
        self.check_state();
    }

    /// Fuses two adjacent blocks into one free block. The footer is
    /// written through `footer(low)` after the size update so the
    /// 8-byte-block indirection resolves on the combined block.
    fn merge(&mut self, low: u64, high: u64) -> u64 {
        assert!(low % 8 == 4 && high % 8 == 4);
        assert!(self.heap.first_block() <= low && low < self.heap.last_block());
        assert!(self.heap.first_block() < high && high <= self.heap.last_block());
        assert!(self.heap.next_header(low) == high);
        assert!(self.heap.prev_header(high) == low);

        let block_size = self.heap.block_size(low) + self.heap.block_size(high);

        self.heap.set_block_size(low, block_size);
        self.heap.set_allocated(low, false);

        let footer = self.heap.footer(low);
        self.heap.set_block_size(footer, block_size);
        self.heap.set_allocated(footer, false);

        low
    }

    /* ------------------------------------- */
    /*  Index dispatch                       */
    /* ------------------------------------- */

    #[cfg(feature = "implicit")]
    fn index_insert(&mut self, free_header: u64) {
        if self.heap.block_size(free_header) == 8 {
            SmallList::new(&mut self.heap, &mut self.small).insert(free_header);
        }
    }

    #[cfg(feature = "implicit")]
    fn index_delete(&mut self, free_header: u64) {
        if self.heap.block_size(free_header) == 8 {
            SmallList::new(&mut self.heap, &mut self.small).remove(free_header);
        }
    }

    #[cfg(feature = "explicit")]
    fn index_insert(&mut self, free_header: u64) {
        if self.heap.block_size(free_header) == 8 {
            SmallList::new(&mut self.heap, &mut self.small).insert(free_header);
        } else {
            ExplicitList::new(&mut self.heap, &mut self.explicit).insert(free_header);
        }
    }

    #[cfg(feature = "explicit")]
    fn index_delete(&mut self, free_header: u64) {
        if self.heap.block_size(free_header) == 8 {
            SmallList::new(&mut self.heap, &mut self.small).remove(free_header);
        } else {
            ExplicitList::new(&mut self.heap, &mut self.explicit).remove(free_header);
        }
    }

    #[cfg(feature = "segregated")]
    fn index_insert(&mut self, free_header: u64) {
        let block_size = self.heap.block_size(free_header);
        if block_size == 8 {
            SmallList::new(&mut self.heap, &mut self.small).insert(free_header);
        } else if block_size < MIN_REDBLACK_TREE_BLOCKSIZE {
            ExplicitList::new(&mut self.heap, &mut self.explicit).insert(free_header);
        } else {
            FreeTree::new(&mut self.heap, &mut self.tree).insert(free_header);
        }
    }

    #[cfg(feature = "segregated")]
    fn index_delete(&mut self, free_header: u64) {
        let block_size = self.heap.block_size(free_header);
        if block_size == 8 {
            SmallList::new(&mut self.heap, &mut self.small).remove(free_header);
        } else if block_size < MIN_REDBLACK_TREE_BLOCKSIZE {
            ExplicitList::new(&mut self.heap, &mut self.explicit).remove(free_header);
        } else {
            FreeTree::new(&mut self.heap, &mut self.tree).remove(free_header);
        }
    }

    /* ------------------------------------- */
    /*  Search                               */
    /* ------------------------------------- */

    /// Finds a free block of at least `req` bytes, or NIL. The block
    /// stays in its index; `carve` takes it out.
    #[cfg(feature = "implicit")]
    fn search(&mut self, req: u32) -> u64 {
        if req == 8 && self.small.count() != 0 {
            return self.small.head();
        }

        // first fit over the whole heap
        let epilogue = self.heap.epilogue();
        let mut b = self.heap.first_block();
        while b != epilogue {
            if !self.heap.allocated(b) && self.heap.block_size(b) >= req {
                return b;
            }
            b = self.heap.next_header(b);
        }
        NIL
    }

    #[cfg(feature = "explicit")]
    fn search(&mut self, req: u32) -> u64 {
        if req == 8 && self.small.count() != 0 {
            return self.small.head();
        }
        ExplicitList::new(&mut self.heap, &mut self.explicit).first_fit(req)
    }

    #[cfg(feature = "segregated")]
    fn search(&mut self, req: u32) -> u64 {
        if req == 8 && self.small.count() != 0 {
            return self.small.head();
        }
        if req < MIN_REDBLACK_TREE_BLOCKSIZE {
            let b = ExplicitList::new(&mut self.heap, &mut self.explicit).first_fit(req);
            if b != NIL {
                return b;
            }
        }
        // best fit among the tree blocks
        let tree = FreeTree::new(&mut self.heap, &mut self.tree);
        tree.find_ge(req as u64)
    }

    /* ------------------------------------- */
    /*  Accounting                           */
    /* ------------------------------------- */

    /// Total bytes currently held by allocated blocks.
    pub fn allocated_bytes(&self) -> u64 {
        let epilogue = self.heap.epilogue();
        let mut total = 0;
        let mut b = self.heap.first_block();
        while b != epilogue {
            if self.heap.allocated(b) {
                total += self.heap.block_size(b) as u64;
            }
            b = self.heap.next_header(b);
        }
        total
    }

    /* ------------------------------------- */
    /*  Sanity checks                        */
    /* ------------------------------------- */

    fn check_state(&mut self) {
        if !HEAP_CHECKS {
            return;
        }
        self.check_heap();
        self.check_indexes();
    }

    /// Walks every block reaffirming the boundary-tag invariants: no
    /// two adjacent free blocks, header and footer agreeing, B8 and P8
    /// telling the truth.
    fn check_heap(&self) {
        let epilogue = self.heap.epilogue();
        let mut consecutive_free = 0;
        let mut b = self.heap.first_block();
        while b != epilogue {
            assert!(b % 8 == 4);
            let size = self.heap.block_size(b);
            assert!(size >= 8 && size % 8 == 0);
            assert!(self.heap.is_block8(b) == (size == 8));

            let next = self.heap.next_header(b);
            assert!(self.heap.is_bit_set(next, crate::heap::P8_BIT) == (size == 8));

            if size > 8 {
                let footer = self.heap.footer(b);
                assert!(self.heap.block_size(footer) == size);
                assert!(self.heap.allocated(footer) == self.heap.allocated(b));
            }

            if self.heap.allocated(b) {
                consecutive_free = 0;
            } else {
                consecutive_free += 1;
            }
            assert!(consecutive_free <= 1);

            b = next;
        }
        assert!(self.heap.allocated(epilogue));
        assert!(self.heap.word(epilogue) & 0xFFFF_FFF8 == 0);
    }

    #[cfg(feature = "implicit")]
    fn check_indexes(&mut self) {
        self.check_small_list();
    }

    #[cfg(feature = "explicit")]
    fn check_indexes(&mut self) {
        self.check_small_list();
        self.check_explicit_list(MIN_EXPLICIT_FREE_LIST_BLOCKSIZE, u32::MAX);
    }

    #[cfg(feature = "segregated")]
    fn check_indexes(&mut self) {
        self.check_small_list();
        self.check_explicit_list(
            MIN_EXPLICIT_FREE_LIST_BLOCKSIZE,
            MIN_REDBLACK_TREE_BLOCKSIZE - 8,
        );
        self.check_tree();
    }

    /// Every free 8-byte block is on the ring, the ring is mutually
    /// linked, and walking `count` steps either way returns to the
    /// head through distinct free blocks.
    fn check_small_list(&mut self) {
        let epilogue = self.heap.epilogue();
        let mut counter = 0;
        let mut head_seen = false;
        let mut b = self.heap.first_block();
        while b != epilogue {
            if !self.heap.allocated(b) && self.heap.block_size(b) == 8 {
                let list = SmallList::new(&mut self.heap, &mut self.small);
                let prev = list.node_prev(b);
                let next = list.node_next(b);
                assert!(list.node_next(prev) == b);
                assert!(list.node_prev(next) == b);
                assert!(!self.heap.allocated(prev));
                assert!(!self.heap.allocated(next));
                if b == self.small.head() {
                    head_seen = true;
                }
                counter += 1;
            }
            b = self.heap.next_header(b);
        }
        assert!(self.small.count() == 0 || head_seen);
        assert!(self.small.count() == counter);

        let count = self.small.count();
        let list = SmallList::new(&mut self.heap, &mut self.small);
        let head = list.node_by_index(0);
        let mut p = head;
        let mut n = head;
        for _ in 0..count {
            assert!(!list.heap.allocated(p) && list.heap.block_size(p) == 8);
            assert!(!list.heap.allocated(n) && list.heap.block_size(n) == 8);
            p = list.node_prev(p);
            n = list.node_next(n);
        }
        if count != 0 {
            assert!(p == head && n == head);
        }
    }

    /// Same census for the explicit list over its size class.
    #[cfg(any(feature = "explicit", feature = "segregated"))]
    fn check_explicit_list(&mut self, min_size: u32, max_size: u32) {
        let epilogue = self.heap.epilogue();
        let mut counter = 0;
        let mut head_seen = false;
        let mut b = self.heap.first_block();
        while b != epilogue {
            let size = self.heap.block_size(b);
            if !self.heap.allocated(b) && min_size <= size && size <= max_size {
                let list = ExplicitList::new(&mut self.heap, &mut self.explicit);
                let prev = list.node_prev(b);
                let next = list.node_next(b);
                assert!(list.node_next(prev) == b);
                assert!(list.node_prev(next) == b);
                assert!(!self.heap.allocated(prev));
                assert!(!self.heap.allocated(next));
                if b == self.explicit.head() {
                    head_seen = true;
                }
                counter += 1;
            }
            b = self.heap.next_header(b);
        }
        assert!(self.explicit.count() == 0 || head_seen);
        assert!(self.explicit.count() == counter);

        let count = self.explicit.count();
        let list = ExplicitList::new(&mut self.heap, &mut self.explicit);
        let head = list.node_by_index(0);
        let mut p = head;
        let mut n = head;
        for _ in 0..count {
            let p_size = list.heap.block_size(p);
            let n_size = list.heap.block_size(n);
            assert!(!list.heap.allocated(p) && min_size <= p_size && p_size <= max_size);
            assert!(!list.heap.allocated(n) && min_size <= n_size && n_size <= max_size);
            p = list.node_prev(p);
            n = list.node_next(n);
        }
        if count != 0 {
            assert!(p == head && n == head);
        }
    }

    /// The tree is a well-formed red-black tree and indexes exactly
    /// the free blocks of its size class.
    #[cfg(feature = "segregated")]
    fn check_tree(&mut self) {
        {
            let tree = FreeTree::new(&mut self.heap, &mut self.tree);
            rbt::verify(&tree);
        }

        let epilogue = self.heap.epilogue();
        let mut counter = 0;
        let mut b = self.heap.first_block();
        while b != epilogue {
            let size = self.heap.block_size(b);
            if !self.heap.allocated(b) && size >= MIN_REDBLACK_TREE_BLOCKSIZE {
                let tree = FreeTree::new(&mut self.heap, &mut self.tree);
                let root = tree.root();
                assert!(rbt::subtree_contains(&tree, root, b));
                counter += 1;
            }
            b = self.heap.next_header(b);
        }

        let tree = FreeTree::new(&mut self.heap, &mut self.tree);
        let root = tree.root();
        assert!(counter == rbt::subtree_count(&tree, root));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::vec::Vec;

    #[test]
    fn init_shape() {
        let a = TagMalloc::new();
        let heap = a.heap();
        let first = heap.first_block();

        assert_eq!(first, 12);
        assert_eq!(heap.block_size(first), 4080);
        assert!(!heap.allocated(first));
        assert_eq!(heap.last_block(), first);
        assert_eq!(heap.epilogue(), 4092);
        assert!(heap.allocated(heap.epilogue()));
        assert_eq!(heap.block_size(heap.epilogue()), 0);
        assert_eq!(a.allocated_bytes(), 0);
    }

    #[test]
    fn split_and_remerge() {
        let mut a = TagMalloc::new();
        let p = a.alloc(16);
        assert_eq!(p, 16);
        assert_eq!(a.allocated_bytes(), 24);

        a.free(p);
        let heap = a.heap();
        let first = heap.first_block();
        assert_eq!(heap.block_size(first), 4080);
        assert!(!heap.allocated(first));
        assert!(heap.is_last_block(first));
        assert_eq!(a.allocated_bytes(), 0);
    }

    #[test]
    fn small_blocks_come_and_go_through_the_small_list() {
        let mut a = TagMalloc::new();
        let p1 = a.alloc(4);
        let p2 = a.alloc(4);
        assert_eq!(p1, 16);
        assert_eq!(p2, 24);

        a.free(p1);
        assert_eq!(a.small_list().count(), 1);

        a.free(p2);
        assert_eq!(a.small_list().count(), 0);
        let heap = a.heap();
        assert!(!heap.allocated(heap.first_block()));
        assert!(heap.is_last_block(heap.first_block()));
    }

    #[test]
    fn an_eight_byte_block_is_recycled() {
        let mut a = TagMalloc::new();
        let p1 = a.alloc(4);
        let _p2 = a.alloc(100);
        a.free(p1);
        assert_eq!(a.small_list().count(), 1);

        // the freed 8-byte block serves the next tiny request
        let p3 = a.alloc(3);
        assert_eq!(p3, p1);
        assert_eq!(a.small_list().count(), 0);
    }

    #[test]
    fn alloc_then_free_restores_the_shape() {
        let mut a = TagMalloc::new();
        for size in [1u32, 4, 8, 13, 100, 1000, 4072] {
            let p = a.alloc(size);
            assert!(p != NIL);
            assert!(p % 8 == 0);
            a.free(p);

            let heap = a.heap();
            let first = heap.first_block();
            assert_eq!(heap.block_size(first), 4080);
            assert!(!heap.allocated(first));
            assert!(heap.is_last_block(first));
        }
    }

    #[test]
    fn free_nil_is_a_noop() {
        let mut a = TagMalloc::new();
        a.free(NIL);
        assert_eq!(a.heap().block_size(a.heap().first_block()), 4080);
    }

    #[test]
    fn free_order_does_not_matter() {
        for order in [[0usize, 1, 2], [2, 1, 0], [1, 0, 2], [1, 2, 0]] {
            let mut a = TagMalloc::new();
            let ptrs = [a.alloc(24), a.alloc(100), a.alloc(500)];
            for i in order {
                a.free(ptrs[i]);
            }
            let heap = a.heap();
            assert!(heap.is_last_block(heap.first_block()));
            assert!(!heap.allocated(heap.first_block()));
            assert_eq!(heap.block_size(heap.first_block()), 4080);
        }
    }

    #[test]
    fn extension_runs_to_the_cap_and_stops() {
        let mut a = TagMalloc::new();
        let mut ptrs = Vec::new();
        loop {
            let p = a.alloc(1024);
            if p == NIL {
                break;
            }
            ptrs.push(p);
        }
        // 31 * 1032 bytes fit into the 32 KiB cap, the 32nd does not
        assert_eq!(ptrs.len(), 31);
        assert_eq!(a.heap().end(), HEAP_MAX_SIZE);
        assert_eq!(a.alloc(1024), NIL);

        for p in ptrs {
            a.free(p);
        }
        let heap = a.heap();
        let first = heap.first_block();
        assert!(!heap.allocated(first));
        assert!(heap.is_last_block(first));
        assert_eq!(heap.block_size(first), (HEAP_MAX_SIZE - 16) as u32);
    }

    #[test]
    fn reinit_matches_a_pristine_heap() {
        let fresh = TagMalloc::new();
        let mut a = TagMalloc::new();
        let p1 = a.alloc(100);
        let p2 = a.alloc(5);
        let _p3 = a.alloc(900);
        a.free(p1);
        a.free(p2);

        a.heap_init();
        assert_eq!(a.heap().start(), fresh.heap().start());
        assert_eq!(a.heap().end(), fresh.heap().end());
        assert!(a.heap().bytes()[..] == fresh.heap().bytes()[..]);
        assert_eq!(a.small_list().count(), 0);
        assert_eq!(a.explicit_list().count(), 0);
    }

    #[cfg(feature = "segregated")]
    #[test]
    fn size_classes_route_to_their_indexes() {
        let mut a = TagMalloc::new();
        let p1 = a.alloc(16);
        let _p2 = a.alloc(16);
        a.free(p1);

        // a 24-byte block lands on the explicit list, the big tail
        // stays in the tree
        assert_eq!(a.explicit_list().count(), 1);
        assert_eq!(a.small_list().count(), 0);
        assert!(a.free_tree().root() != NIL);

        // the listed block serves the next mid-size request exactly
        let p4 = a.alloc(16);
        assert_eq!(p4, p1);
        assert_eq!(a.explicit_list().count(), 0);
    }

    #[cfg(feature = "segregated")]
    #[test]
    fn the_tree_answers_with_a_best_fit() {
        let mut a = TagMalloc::new();
        let p48 = a.alloc(40);
        let _s1 = a.alloc(4);
        let p88 = a.alloc(80);
        let _s2 = a.alloc(4);
        let p128 = a.alloc(120);
        let _s3 = a.alloc(4);

        a.free(p48);
        a.free(p88);
        a.free(p128);

        // free blocks of 48, 88 and 128 bytes are all tree-indexed
        let p = a.alloc(80);
        assert_eq!(p, p88);
    }

    #[test]
    fn randomized_churn_under_full_checks() {
        use rand::rngs::StdRng;
        use rand::{Rng, SeedableRng};

        let mut a = TagMalloc::new();
        let mut rng = StdRng::seed_from_u64(1);
        let mut ptrs = Vec::new();

        // every alloc and free below re-walks the heap and indexes
        for _ in 0..3000 {
            if ptrs.is_empty() || rng.gen::<bool>() {
                let p = a.alloc(rng.gen_range(1..=1024u32));
                if p != NIL {
                    ptrs.push(p);
                }
            } else {
                let idx = rng.gen_range(0..ptrs.len());
                a.free(ptrs.swap_remove(idx));
            }
        }
        for p in ptrs.drain(..) {
            a.free(p);
        }

        let heap = a.heap();
        assert!(heap.is_last_block(heap.first_block()));
        assert!(!heap.allocated(heap.first_block()));
    }

    #[cfg(feature = "implicit")]
    #[test]
    fn implicit_search_is_first_fit() {
        let mut a = TagMalloc::new();
        let p48 = a.alloc(40);
        let _s1 = a.alloc(4);
        let p88 = a.alloc(80);
        let _s2 = a.alloc(4);

        a.free(p48);
        a.free(p88);

        // the heap scan stops at the lower-addressed 48-byte block
        // even though the 88-byte one fits more tightly
        let p = a.alloc(40);
        assert_eq!(p, p48);
    }
}
