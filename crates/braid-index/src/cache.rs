//! Write-back page cache.

use std::collections::hash_map::Entry;
use std::collections::HashMap;

use braid_common::Result;
use braid_store::ByteStore;
use tracing::trace;

/// Caches whole pages of the underlying store as owned buffers.
///
/// Node operations perform many small reads and writes per page; serving them
/// from a pinned buffer avoids crossing the storage API for every field.
/// A page is pulled from the store on first access and the same buffer is
/// returned for every later access, so all views of a page observe each
/// other's writes. Mutations stay in the buffer until `writeback` (or
/// `flush_all`) pushes them down.
///
/// The cache is unbounded and single-threaded; the owner may drop it wholesale
/// between sessions once everything is flushed.
pub struct PageCache<S> {
    store: S,
    page_size: usize,
    pages: HashMap<i32, Box<[u8]>>,
}

impl<S: ByteStore> PageCache<S> {
    /// Creates an empty cache over `store` for pages of `page_size` bytes.
    pub fn new(store: S, page_size: usize) -> Self {
        Self {
            store,
            page_size,
            pages: HashMap::new(),
        }
    }

    /// Page size this cache serves.
    pub fn page_size(&self) -> usize {
        self.page_size
    }

    /// Number of pages currently cached.
    pub fn cached_pages(&self) -> usize {
        self.pages.len()
    }

    /// Returns the buffer for the page at `address`, reading it from the
    /// store on first access.
    pub fn buffer_mut(&mut self, address: i32) -> Result<&mut [u8]> {
        debug_assert!(address > 0);
        let buf = match self.pages.entry(address) {
            Entry::Occupied(entry) => entry.into_mut(),
            Entry::Vacant(entry) => {
                let mut buf = vec![0u8; self.page_size].into_boxed_slice();
                self.store.get_bytes(address as u32, &mut buf)?;
                trace!(address, "page cache miss");
                entry.insert(buf)
            }
        };
        Ok(buf)
    }

    /// Installs a zeroed buffer for a freshly allocated page.
    ///
    /// The store may not contain the page yet; the buffer reaches it on the
    /// first `writeback`.
    pub fn install_zeroed(&mut self, address: i32) {
        debug_assert!(address > 0);
        self.pages
            .insert(address, vec![0u8; self.page_size].into_boxed_slice());
    }

    /// Writes the cached buffer for `address` back to the store, keeping it
    /// cached. A no-op if the page was never loaded.
    pub fn writeback(&mut self, address: i32) -> Result<()> {
        if let Some(buf) = self.pages.get(&address) {
            self.store.put_bytes(address as u32, buf)?;
            trace!(address, "page writeback");
        }
        Ok(())
    }

    /// Writes every cached page back to the store.
    pub fn flush_all(&mut self) -> Result<()> {
        for (&address, buf) in &self.pages {
            self.store.put_bytes(address as u32, buf)?;
        }
        trace!(pages = self.pages.len(), "page cache flushed");
        Ok(())
    }

    /// The underlying store.
    pub fn store(&self) -> &S {
        &self.store
    }

    /// Mutable access to the underlying store.
    pub fn store_mut(&mut self) -> &mut S {
        &mut self.store
    }

    /// Consumes the cache and releases the underlying store.
    ///
    /// Unflushed buffers are discarded; call `flush_all` first to keep them.
    pub fn into_store(self) -> S {
        self.store
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use braid_store::MemStore;

    fn store_with_page(address: u32, page_size: usize, fill: u8) -> MemStore {
        let mut store = MemStore::new();
        store.put_bytes(address, &vec![fill; page_size]).unwrap();
        store
    }

    #[test]
    fn test_miss_pulls_from_store() {
        let store = store_with_page(64, 64, 0xAA);
        let mut cache = PageCache::new(store, 64);

        let buf = cache.buffer_mut(64).unwrap();
        assert_eq!(buf.len(), 64);
        assert!(buf.iter().all(|&b| b == 0xAA));
        assert_eq!(cache.cached_pages(), 1);
    }

    #[test]
    fn test_same_buffer_identity() {
        let store = store_with_page(64, 64, 0);
        let mut cache = PageCache::new(store, 64);

        cache.buffer_mut(64).unwrap()[10] = 0x42;
        // A second access sees the earlier mutation, not a fresh store read
        assert_eq!(cache.buffer_mut(64).unwrap()[10], 0x42);
        assert_eq!(cache.cached_pages(), 1);
    }

    #[test]
    fn test_mutation_invisible_until_writeback() {
        let store = store_with_page(64, 64, 0);
        let mut cache = PageCache::new(store, 64);

        cache.buffer_mut(64).unwrap()[0] = 0x42;
        assert_eq!(cache.store().get_u8(64).unwrap(), 0);

        cache.writeback(64).unwrap();
        assert_eq!(cache.store().get_u8(64).unwrap(), 0x42);
    }

    #[test]
    fn test_writeback_unloaded_is_noop() {
        let mut cache = PageCache::new(MemStore::new(), 64);
        cache.writeback(64).unwrap();
        assert_eq!(cache.store().len(), 0);
    }

    #[test]
    fn test_install_zeroed_fresh_page() {
        // Store is empty: a plain miss would fail, an installed page works
        let mut cache = PageCache::new(MemStore::new(), 64);
        assert!(cache.buffer_mut(64).is_err());

        cache.install_zeroed(64);
        let buf = cache.buffer_mut(64).unwrap();
        assert!(buf.iter().all(|&b| b == 0));

        cache.buffer_mut(64).unwrap()[5] = 7;
        cache.writeback(64).unwrap();
        assert_eq!(cache.store().get_u8(69).unwrap(), 7);
    }

    #[test]
    fn test_flush_all() {
        let mut cache = PageCache::new(MemStore::new(), 64);
        for page in 1..=4 {
            let address = page * 64;
            cache.install_zeroed(address);
            cache.buffer_mut(address).unwrap()[0] = page as u8;
        }
        cache.flush_all().unwrap();

        let store = cache.into_store();
        for page in 1..=4u32 {
            assert_eq!(store.get_u8(page * 64).unwrap(), page as u8);
        }
    }
}
