//! An educational boundary-tag heap allocator.
//!
//! The allocator services variable-size requests against a single
//! contiguous 32 KiB byte region grown page-by-page from an abstract
//! `brk`-like primitive. Every block carries a Knuth-style boundary
//! tag: a 4-byte header mirrored, for blocks larger than 8 bytes, by a
//! 4-byte footer, so that coalescing can reach both neighbors with
//! plain offset arithmetic. Blocks of exactly 8 bytes have no footer;
//! a pair of tag bits (B8 in their own header, P8 in the next one)
//! encodes the size instead and frees the tag words for list links.
//!
//! Free blocks are indexed by one of three strategies, chosen with a
//! cargo feature:
//!
//! * `implicit` - no index; allocation scans the heap first-fit
//!   (8-byte blocks still keep a small list).
//! * `explicit` - an intrusive circular doubly linked free list whose
//!   links overlay the payload of free blocks.
//! * `segregated` (default) - a small list for 8-byte blocks, an
//!   explicit list for 16..=32, and a size-keyed intrusive red-black
//!   tree for everything larger, answering best-fit queries.
//!
//! Addresses handed out and taken back are byte offsets into the heap
//! ("virtual addresses"), with 0 reserved as [`NIL`]; the heap bytes
//! are owned by the [`TagMalloc`] value and no machine pointers are
//! ever exposed.
//!
//! ```
//! use tagmalloc::{TagMalloc, NIL};
//!
//! let mut a = TagMalloc::new();
//! let p = a.alloc(100);
//! assert!(p != NIL && p % 8 == 0);
//! a.free(p);
//! ```
//!
//! This is a single-threaded teaching allocator: no `realloc`, no
//! alignment above 8 bytes, no thread safety, no hardening. Capacity
//! exhaustion is reported as a [`NIL`] return from `alloc`; every
//! other misuse is a contract violation that aborts.

#![no_std]

#[cfg(test)]
extern crate std;

#[cfg(not(any(feature = "implicit", feature = "explicit", feature = "segregated")))]
compile_error!(
    "select a free-block index profile: `implicit`, `explicit` or `segregated`"
);

#[cfg(any(
    all(feature = "implicit", feature = "explicit"),
    all(feature = "implicit", feature = "segregated"),
    all(feature = "explicit", feature = "segregated"),
))]
compile_error!("the index profiles are mutually exclusive; enable exactly one");

pub mod block;
pub mod common;
pub mod explicit;
pub mod heap;
pub mod list;
pub mod rbt;
pub mod small;
pub mod tagmalloc;
pub mod tmverbose;

pub use crate::heap::{Heap, HEAP_MAX_SIZE, NIL, PAGE_SIZE};
pub use crate::tagmalloc::TagMalloc;
