//! Storage layer for braid.
//!
//! This crate provides:
//! - The `ByteStore` trait: byte-addressable storage with big-endian 32-bit words
//! - `MappedStore`: a resizable memory-mapped file store
//! - `MemStore`: an in-memory store for tests and ephemeral indexes
//! - Page allocation: the `PageAllocator` trait and `BumpAllocator`

mod alloc;
mod mapped;
mod store;

pub use alloc::{BumpAllocator, PageAllocator};
pub use mapped::MappedStore;
pub use store::{ByteStore, MemStore};
