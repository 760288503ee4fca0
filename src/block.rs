//! Block boundary tags and heap traversal.
//!
//! Every block starts with a 4-byte header at an offset congruent to
//! 4 mod 8 carrying the size, the allocated bit and the B8/P8 tags.
//! Blocks larger than 8 bytes mirror the header in a footer at
//! `block end - 4` so that a neighbor can be found by reading one word.
//! An 8-byte block has no footer: the B8 bit in its own header and the
//! P8 bit in the next header convey the size, which frees the size
//! field and the trailing word for the small-list links.
//!
//! ```text
//! Allocated block:                   Free block:
//! ff ff ff f9/f1   footer            ff ff ff f8/f0   footer
//! xx xx xx xx      payload           ?? ?? ?? ??
//! xx xx xx xx      payload           nn nn nn nn      next (explicit)
//! xx xx xx xx      payload           pp pp pp pp      prev (explicit)
//! hh hh hh h9/h1   header            hh hh hh h8/h0   header
//! ```

use crate::common::round_up;
use crate::heap::{Heap, AF_BIT, B8_BIT, NIL, P8_BIT, PAGE_SIZE};
use crate::tmverbose::HEAP_CHECKS;

impl Heap {
    /* ------------------------------------- */
    /*  Sentinels                            */
    /* ------------------------------------- */

    /// Header of the allocated 8-byte block guarding the low end.
    pub fn prologue(&self) -> u64 {
        assert!(self.end() > self.start());
        assert!((self.end() - self.start()) % PAGE_SIZE == 0);
        assert!(self.start() % PAGE_SIZE == 0);

        // 4 for the not-in-use word
        self.start() + 4
    }

    /// The header-only block guarding the high end: size 0, allocated.
    pub fn epilogue(&self) -> u64 {
        assert!(self.end() > self.start());
        assert!((self.end() - self.start()) % PAGE_SIZE == 0);
        assert!(self.start() % PAGE_SIZE == 0);

        self.end() - 4
    }

    pub fn first_block(&self) -> u64 {
        // 4 for the not-in-use word, 8 for the prologue
        self.prologue() + 8
    }

    pub fn last_block(&self) -> u64 {
        self.prev_header(self.epilogue())
    }

    pub fn is_first_block(&self, vaddr: u64) -> bool {
        if vaddr == NIL {
            return false;
        }
        assert!(self.first_block() <= vaddr && vaddr < self.epilogue());
        assert!(vaddr & 0x3 == 0);

        self.header(vaddr) == self.first_block()
    }

    pub fn is_last_block(&self, vaddr: u64) -> bool {
        if vaddr == NIL {
            return false;
        }
        assert!(self.first_block() <= vaddr && vaddr < self.epilogue());
        assert!(vaddr & 0x3 == 0);

        let header = self.header(vaddr);
        header + self.block_size(header) as u64 == self.epilogue()
    }

    /* ------------------------------------- */
    /*  Address conversion                   */
    /* ------------------------------------- */

    /// `vaddr` may be a header address (8n + 4) or a payload address
    /// (8n); so may the argument of `header` and `footer`.
    pub fn payload(&self, vaddr: u64) -> u64 {
        if vaddr == NIL {
            return NIL;
        }
        assert!(self.first_block() <= vaddr && vaddr < self.epilogue());
        assert!(vaddr & 0x3 == 0);

        round_up(vaddr, 8)
    }

    pub fn header(&self, vaddr: u64) -> u64 {
        if vaddr == NIL {
            return NIL;
        }
        assert!(self.first_block() <= vaddr && vaddr <= self.epilogue());
        assert!(vaddr & 0x3 == 0);

        round_up(vaddr, 8) - 4
    }

    pub fn footer(&self, vaddr: u64) -> u64 {
        if vaddr == NIL {
            return NIL;
        }
        assert!(self.first_block() <= vaddr && vaddr < self.epilogue());
        assert!(vaddr & 0x3 == 0);

        let header = self.header(vaddr);
        let footer = header + self.block_size(header) as u64 - 4;
        assert!(self.first_block() < footer && footer < self.epilogue());
        footer
    }

    /* ------------------------------------- */
    /*  8-byte block encoding                */
    /* ------------------------------------- */

    /// An 8-byte block announces itself through the B8 bit of its
    /// header and the P8 bit of the next header; `vaddr` may be the
    /// header or the trailing (footer-position) word.
    pub(crate) fn is_block8(&self, vaddr: u64) -> bool {
        if vaddr == NIL {
            return false;
        }
        assert!(self.prologue() <= vaddr && vaddr <= self.epilogue());

        if vaddr % 8 == 4 {
            if self.is_bit_set(vaddr, B8_BIT) {
                if HEAP_CHECKS {
                    self.check_block8(vaddr);
                }
                return true;
            }
        } else if vaddr % 8 == 0 {
            let next_header = vaddr + 4;
            if next_header <= self.epilogue() && self.is_bit_set(next_header, P8_BIT) {
                if HEAP_CHECKS {
                    self.check_block8(vaddr - 4);
                }
                return true;
            }
        }
        false
    }

    /// Cross-checks the B8/P8 encoding of the 8-byte block at or
    /// around `vaddr`.
    pub(crate) fn check_block8(&self, vaddr: u64) {
        if vaddr == NIL {
            return;
        }
        assert!(vaddr % 4 == 0);
        assert!(self.prologue() <= vaddr && vaddr <= self.epilogue());

        let header = if vaddr % 8 == 4 { vaddr } else { vaddr - 4 };
        let next_header = header + 8;

        // an 8-byte block never sits at the epilogue
        assert!(next_header <= self.epilogue());
        assert!(self.is_bit_set(header, B8_BIT));
        assert!(self.is_bit_set(next_header, P8_BIT));

        if self.allocated(header) {
            assert!(self.word(header) & 0xFFFF_FFF8 == 8);
        }
    }

    /* ------------------------------------- */
    /*  Size and allocated bits              */
    /* ------------------------------------- */

    /// Applicable to both header and footer addresses.
    pub fn block_size(&self, header_vaddr: u64) -> u32 {
        if header_vaddr == NIL {
            return 0;
        }
        assert!(self.prologue() <= header_vaddr && header_vaddr <= self.epilogue());
        assert!(header_vaddr & 0x3 == 0);

        if self.is_block8(header_vaddr) {
            return 8;
        }
        self.word(header_vaddr) & 0xFFFF_FFF8
    }

    /// Applicable to both header and footer addresses. Writing size 8
    /// installs the B8/P8 encoding; on a free 8-byte block the size
    /// field itself is left alone because it carries the small-list
    /// prev link.
    pub fn set_block_size(&mut self, header_vaddr: u64, block_size: u32) {
        if header_vaddr == NIL {
            return;
        }
        assert!(self.prologue() <= header_vaddr && header_vaddr <= self.epilogue());
        assert!(header_vaddr & 0x3 == 0);
        assert!(block_size & 0x7 == 0);

        let mut header_vaddr = header_vaddr;
        if block_size == 8 {
            if header_vaddr % 8 == 0 {
                // a small block has no footer; reroute to the header
                header_vaddr -= 4;
            }
            let next_header = header_vaddr + 8;

            self.set_bit(header_vaddr, B8_BIT);
            if next_header <= self.epilogue() {
                self.set_bit(next_header, P8_BIT);
            }

            if !self.allocated(header_vaddr) {
                // free 8-byte blocks keep their prev link in the size field
                return;
            }
        } else {
            let next_header = if header_vaddr % 8 == 4 {
                header_vaddr + block_size as u64
            } else {
                // a footer; the next header is one word up
                header_vaddr + 4
            };

            self.reset_bit(header_vaddr, B8_BIT);
            if next_header <= self.epilogue() {
                self.reset_bit(next_header, P8_BIT);
            }
        }

        let word = self.word(header_vaddr);
        self.set_word(header_vaddr, (word & 0x0000_0007) | block_size);

        if HEAP_CHECKS && block_size == 8 {
            self.check_block8(header_vaddr);
        }
    }

    /// Applicable to both header and footer addresses; a footer
    /// address is rerouted to the header when the next header's P8 bit
    /// says the block is 8 bytes and has no true footer.
    pub fn allocated(&self, header_vaddr: u64) -> bool {
        if header_vaddr == NIL {
            // treating NIL as allocated lets coalescing skip the edges
            return true;
        }
        assert!(self.prologue() <= header_vaddr && header_vaddr <= self.epilogue());
        assert!(header_vaddr & 0x3 == 0);

        let mut header_vaddr = header_vaddr;
        if header_vaddr % 8 == 0 {
            let next_header = header_vaddr + 4;
            assert!(next_header <= self.epilogue());
            if self.is_bit_set(next_header, P8_BIT) {
                header_vaddr -= 4;
                if HEAP_CHECKS {
                    self.check_block8(header_vaddr);
                }
            }
        }
        self.is_bit_set(header_vaddr, AF_BIT)
    }

    /// Mirrors `allocated` for the 8-byte footer indirection; touches
    /// only the allocated bit.
    pub fn set_allocated(&mut self, header_vaddr: u64, allocated: bool) {
        if header_vaddr == NIL {
            return;
        }
        assert!(self.prologue() <= header_vaddr && header_vaddr <= self.epilogue());
        assert!(header_vaddr & 0x3 == 0);

        let mut header_vaddr = header_vaddr;
        if header_vaddr % 8 == 0 {
            let next_header = header_vaddr + 4;
            assert!(next_header <= self.epilogue());
            if self.is_bit_set(next_header, P8_BIT) {
                header_vaddr -= 4;
                if HEAP_CHECKS {
                    self.check_block8(header_vaddr);
                }
            }
        }
        if allocated {
            self.set_bit(header_vaddr, AF_BIT);
        } else {
            self.reset_bit(header_vaddr, AF_BIT);
        }
    }

    /* ------------------------------------- */
    /*  Traversal                            */
    /* ------------------------------------- */

    pub fn next_header(&self, vaddr: u64) -> u64 {
        if vaddr == NIL || vaddr == self.epilogue() {
            return NIL;
        }
        assert!(self.first_block() <= vaddr && vaddr < self.epilogue());
        assert!(vaddr & 0x3 == 0);

        let header = self.header(vaddr);
        let next_header = header + self.block_size(header) as u64;
        assert!(self.first_block() < next_header && next_header <= self.epilogue());
        next_header
    }

    pub fn prev_header(&self, vaddr: u64) -> u64 {
        if vaddr == NIL || vaddr == self.prologue() {
            return NIL;
        }
        assert!(self.first_block() <= vaddr && vaddr <= self.epilogue());
        assert!(vaddr & 0x3 == 0);

        let header = self.header(vaddr);
        if self.is_bit_set(header, P8_BIT) {
            // the previous block is 8 bytes and has no footer to read
            let prev_header = header - 8;
            if HEAP_CHECKS {
                self.check_block8(prev_header);
            }
            return prev_header;
        }

        let prev_footer = header - 4;
        let prev_block_size = self.block_size(prev_footer) as u64;
        let prev_header = header - prev_block_size;

        assert!(self.first_block() <= prev_header && prev_header < self.epilogue());
        assert!(self.block_size(prev_header) == self.block_size(prev_footer));
        assert!(self.allocated(prev_header) == self.allocated(prev_footer));

        prev_header
    }

    /* ------------------------------------- */
    /*  Free block fields                    */
    /* ------------------------------------- */

    /// Reads the 32-bit link stored `offset` bytes into a free block
    /// of at least `min_block_size` bytes.
    pub(crate) fn field32(&self, header_vaddr: u64, min_block_size: u32, offset: u64) -> u64 {
        if header_vaddr == NIL {
            return NIL;
        }
        assert!(self.first_block() <= header_vaddr && header_vaddr <= self.last_block());
        assert!(header_vaddr % 8 == 4);
        assert!(self.block_size(header_vaddr) >= min_block_size);
        assert!(offset % 4 == 0);

        self.word(header_vaddr + offset) as u64
    }

    pub(crate) fn set_field32(
        &mut self,
        header_vaddr: u64,
        block_ptr: u64,
        min_block_size: u32,
        offset: u64,
    ) {
        if header_vaddr == NIL {
            return;
        }
        assert!(self.first_block() <= header_vaddr && header_vaddr <= self.last_block());
        assert!(header_vaddr % 8 == 4);
        assert!(self.block_size(header_vaddr) >= min_block_size);

        assert!(
            block_ptr == NIL
                || (self.first_block() <= block_ptr && block_ptr <= self.last_block())
        );
        assert!(block_ptr == NIL || block_ptr % 8 == 4);
        assert!(block_ptr == NIL || self.block_size(block_ptr) >= min_block_size);

        assert!(offset % 4 == 0);

        // links are 32-bit heap offsets
        assert!(block_ptr >> 32 == 0);
        self.set_word(header_vaddr + offset, block_ptr as u32);
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use rand::rngs::StdRng;
    use rand::{Rng, SeedableRng};
    use std::vec::Vec;

    /// Installs the sentinels and partitions the first page into the
    /// given (size, allocated) blocks; the sizes must sum to 4080.
    pub(crate) fn build_heap(blocks: &[(u32, bool)]) -> Heap {
        let mut heap = Heap::new();
        heap.reset();

        let prologue = heap.prologue();
        heap.set_allocated(prologue, true);
        heap.set_block_size(prologue, 8);

        let epilogue = heap.epilogue();
        heap.set_allocated(epilogue, true);
        heap.set_block_size(epilogue, 0);

        let mut h = heap.first_block();
        for &(size, allocated) in blocks {
            heap.set_allocated(h, allocated);
            heap.set_block_size(h, size);
            if size > 8 {
                let f = h + size as u64 - 4;
                heap.set_allocated(f, allocated);
                heap.set_block_size(f, size);
            }
            h += size as u64;
        }
        assert_eq!(h, heap.epilogue());
        heap
    }

    #[test]
    fn size_and_allocated_bits_are_disjoint() {
        let mut heap = build_heap(&[(4080, false)]);
        let first = heap.first_block();

        heap.set_allocated(first, false);
        heap.set_block_size(first, 0x128);
        assert_eq!(heap.block_size(first), 0x128);
        assert!(!heap.allocated(first));

        heap.set_allocated(first, true);
        assert_eq!(heap.block_size(first), 0x128);
        assert!(heap.allocated(first));

        heap.set_block_size(first, 0x130);
        assert_eq!(heap.block_size(first), 0x130);
        assert!(heap.allocated(first));
    }

    #[test]
    fn header_footer_payload_conversions() {
        let heap = build_heap(&[(4080, false)]);
        let first = heap.first_block();
        let footer = heap.footer(first);

        assert_eq!(heap.payload(first), first + 4);
        assert_eq!(heap.payload(first + 4), first + 4);
        assert_eq!(heap.header(first), first);
        assert_eq!(heap.header(first + 4), first);
        assert_eq!(footer, first + 4080 - 8 + 4);
        assert_eq!(heap.footer(first + 4), footer);
    }

    #[test]
    fn sentinel_positions() {
        let heap = build_heap(&[(4080, false)]);
        assert_eq!(heap.prologue(), 4);
        assert_eq!(heap.first_block(), 12);
        assert_eq!(heap.epilogue(), 4092);
        assert_eq!(heap.last_block(), 12);
        assert!(heap.is_first_block(12));
        assert!(heap.is_last_block(12));
    }

    #[test]
    fn small_block_has_no_footer() {
        let heap = build_heap(&[(8, true), (4072, false)]);
        let first = heap.first_block();

        assert_eq!(heap.block_size(first), 8);
        assert!(heap.allocated(first));
        // the trailing word reroutes to the header
        assert_eq!(heap.block_size(first + 4), 8);
        assert!(heap.allocated(first + 4));

        let second = heap.next_header(first);
        assert_eq!(second, first + 8);
        assert!(heap.is_bit_set(second, P8_BIT));
        assert_eq!(heap.prev_header(second), first);
    }

    #[test]
    fn traversal_walks_random_partitions() {
        let mut rng = StdRng::seed_from_u64(123456);
        let mut heap = Heap::new();
        heap.reset();

        let prologue = heap.prologue();
        heap.set_allocated(prologue, true);
        heap.set_block_size(prologue, 8);
        let epilogue = heap.epilogue();
        heap.set_allocated(epilogue, true);
        heap.set_block_size(epilogue, 0);

        let mut blocks: Vec<(u64, u32, bool)> = Vec::new();
        let mut h = heap.first_block();
        let mut allocated = true;
        while h < epilogue {
            let room = (epilogue - h) as u32;
            let mut size = 8 * (1 + rng.gen_range(0..16u32));
            if size > room {
                size = room;
            }
            // never leave two free neighbors
            allocated = !(allocated && rng.gen_range(0..3) >= 1);

            heap.set_allocated(h, allocated);
            heap.set_block_size(h, size);
            if size > 8 {
                let f = h + size as u64 - 4;
                heap.set_allocated(f, allocated);
                heap.set_block_size(f, size);
            }
            blocks.push((h, size, allocated));
            h += size as u64;
        }

        let mut h = heap.first_block();
        for &(vaddr, size, allocated) in blocks.iter() {
            assert_eq!(h, vaddr);
            assert_eq!(heap.block_size(h), size);
            assert_eq!(heap.allocated(h), allocated);
            h = heap.next_header(h);
        }
        assert_eq!(h, epilogue);

        let mut h = heap.last_block();
        for &(vaddr, size, allocated) in blocks.iter().rev() {
            assert_eq!(h, vaddr);
            assert_eq!(heap.block_size(h), size);
            assert_eq!(heap.allocated(h), allocated);
            h = heap.prev_header(h);
        }
        assert_eq!(h, NIL);
    }
}
