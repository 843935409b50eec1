//! Persistent int→int B+ tree index.
//!
//! This crate provides the index core used by the commit indexing layer:
//!
//! - `PageCache`: write-back cache of page buffers over a byte store
//! - `IntBtree`: a paged B+ tree mapping `i32` keys to non-zero `i32` values
//!
//! The tree descends with preemptive splits (a full node is split on the way
//! down, so a parent always has room for a bubbled median), keeps entries
//! packed and sorted inside fixed-size pages, and flushes every page it
//! touches before an operation returns. Zero is the absent-value sentinel;
//! `remove` is not supported.

mod cache;
mod node;
mod tree;

pub use cache::PageCache;
pub use tree::IntBtree;
