//! The B+ tree: descent, preemptive splits, and the public API.

use braid_common::{BraidError, BtreeConfig, Result, ABSENT, ENTRY_LEN};
use braid_store::{ByteStore, PageAllocator};
use tracing::debug;

use crate::cache::PageCache;
use crate::node::NodeView;

/// Persistent paged B+ tree mapping `i32` keys to non-zero `i32` values.
///
/// The tree owns its page cache (and through it the byte store) plus a
/// per-tree scratch buffer for entry block moves, so two trees never share
/// mutable state. All operations take `&mut self`: access is exclusive for
/// the duration of a call and every page touched by a `put` is written back
/// through the cache before the call returns. Durability of the store itself
/// (fsync) is the caller's business.
pub struct IntBtree<S> {
    cache: PageCache<S>,
    allocator: Box<dyn PageAllocator>,
    page_size: usize,
    max_children: i16,
    root_address: i32,
    page_count: u32,
    size: u32,
    max_steps_searched: u32,
    scratch: Vec<u8>,
}

impl<S: ByteStore> IntBtree<S> {
    /// Creates an empty tree: allocates the root page and formats it as a
    /// zeroed leaf.
    pub fn create(
        store: S,
        mut allocator: Box<dyn PageAllocator>,
        config: &BtreeConfig,
    ) -> Result<Self> {
        let max_children = config.max_interior_children()?;
        let root_address = allocator.allocate_page()?;
        Self::check_page_address(config.page_size, root_address)?;

        let mut cache = PageCache::new(store, config.page_size);
        cache.install_zeroed(root_address);
        let mut root = NodeView::new(max_children, root_address);
        root.set_leaf(&mut cache, true)?;
        root.sync(&mut cache)?;

        debug!(root_address, page_size = config.page_size, "created index");

        Ok(Self {
            cache,
            allocator,
            page_size: config.page_size,
            max_children,
            root_address,
            page_count: 1,
            size: 0,
            max_steps_searched: 0,
            scratch: vec![0u8; config.page_size],
        })
    }

    /// Attaches to an existing tree whose root page sits at `root_address`.
    ///
    /// Counters start over: `page_count` is 1 and `size` is 0; the owner that
    /// persisted them restores them through the setters.
    pub fn open(
        store: S,
        allocator: Box<dyn PageAllocator>,
        config: &BtreeConfig,
        root_address: i32,
    ) -> Result<Self> {
        let max_children = config.max_interior_children()?;
        Self::check_page_address(config.page_size, root_address)?;

        debug!(root_address, page_size = config.page_size, "opened index");

        Ok(Self {
            cache: PageCache::new(store, config.page_size),
            allocator,
            page_size: config.page_size,
            max_children,
            root_address,
            page_count: 1,
            size: 0,
            max_steps_searched: 0,
            scratch: vec![0u8; config.page_size],
        })
    }

    fn check_page_address(page_size: usize, address: i32) -> Result<()> {
        if address <= 0 || address as usize % page_size != 0 {
            return Err(BraidError::Storage(format!(
                "{} is not a valid page address for page size {}",
                address, page_size
            )));
        }
        Ok(())
    }

    /// Looks up `key`, returning its value or [`ABSENT`] (0).
    pub fn get(&mut self, key: i32) -> Result<i32> {
        let mut node = NodeView::new(self.max_children, self.root_address);
        let pos = self.locate(&mut node, key, false)?;
        if pos < 0 {
            return Ok(ABSENT);
        }
        node.address_at(&mut self.cache, pos as i16)
    }

    /// Inserts or updates `key`. `value` must be non-zero.
    pub fn put(&mut self, key: i32, value: i32) -> Result<()> {
        if value == ABSENT {
            return Err(BraidError::ZeroValue);
        }
        let mut node = NodeView::new(self.max_children, self.root_address);
        let pos = self.locate(&mut node, key, true)?;
        if pos < 0 {
            self.size += 1;
            node.insert_leaf(&mut self.cache, key, value, (-pos - 1) as i16)?;
        } else {
            node.set_address_at(&mut self.cache, pos as i16, value)?;
            node.sync(&mut self.cache)?;
        }
        Ok(())
    }

    /// Deletion is not supported.
    pub fn remove(&mut self, _key: i32) -> Result<i32> {
        Err(BraidError::Unsupported("remove"))
    }

    /// Address of the root page.
    pub fn root_address(&self) -> i32 {
        self.root_address
    }

    /// Re-seats the tree on a different root page.
    pub fn set_root_address(&mut self, root_address: i32) -> Result<()> {
        Self::check_page_address(self.page_size, root_address)?;
        self.root_address = root_address;
        Ok(())
    }

    /// Number of live keys inserted through this handle.
    pub fn size(&self) -> u32 {
        self.size
    }

    /// Number of pages this handle has seen, starting at 1 for the root.
    pub fn page_count(&self) -> u32 {
        self.page_count
    }

    /// High-water mark of descent steps over all lookups so far.
    pub fn max_steps_searched(&self) -> u32 {
        self.max_steps_searched
    }

    /// Restores a persisted high-water mark.
    pub fn set_max_steps_searched(&mut self, max_steps_searched: u32) {
        self.max_steps_searched = max_steps_searched;
    }

    /// Page size in bytes.
    pub fn page_size(&self) -> usize {
        self.page_size
    }

    /// Writes every cached page back to the store.
    pub fn flush(&mut self) -> Result<()> {
        self.cache.flush_all()
    }

    /// Consumes the tree and releases the underlying store.
    pub fn into_store(mut self) -> Result<S> {
        self.cache.flush_all()?;
        Ok(self.cache.into_store())
    }

    /// Calls `f(key, value)` for every live entry in ascending key order.
    pub fn for_each(&mut self, mut f: impl FnMut(i32, i32)) -> Result<()> {
        self.walk(self.root_address, &mut f)
    }

    fn walk(&mut self, address: i32, f: &mut impl FnMut(i32, i32)) -> Result<()> {
        let mut node = NodeView::new(self.max_children, address);
        let count = node.child_count(&mut self.cache)?;
        if node.is_leaf(&mut self.cache)? {
            for i in 0..count {
                let key = node.key_at(&mut self.cache, i)?;
                let value = node.address_at(&mut self.cache, i)?;
                f(key, value);
            }
            return Ok(());
        }
        for i in 0..=count {
            let child = self.child_address(&mut node, i)?;
            self.walk(child, f)?;
        }
        Ok(())
    }

    /// Reads the child pointer at `slot`, checking the negated encoding and
    /// page alignment.
    fn child_address(&mut self, node: &mut NodeView, slot: i16) -> Result<i32> {
        let stored = node.address_at(&mut self.cache, slot)?;
        let child = -stored;
        if child <= 0 || child as usize % self.page_size != 0 {
            return Err(BraidError::corrupt(
                node.address(),
                format!("child pointer {} at slot {} is not a page address", stored, slot),
            ));
        }
        Ok(child)
    }

    /// Descends from the root to the leaf that owns `key` and binary-searches
    /// it, returning the slot of an exact match or `-(insertion_point + 1)`.
    ///
    /// With `splitting`, a full node is split before it is searched and the
    /// cursor re-seats on the returned parent for a retry; the step counter
    /// backs up by one, so the recorded high-water mark counts each level
    /// once even when splits force retries.
    fn locate(&mut self, node: &mut NodeView, key: i32, splitting: bool) -> Result<i32> {
        let mut steps: i32 = 0;
        let mut parent_address: i32 = 0;

        loop {
            if splitting && node.is_full(&mut self.cache)? {
                parent_address = self.split_node(node, parent_address)?;
                node.seat(parent_address);
                steps -= 1;
            }

            let result = node.search(&mut self.cache, key)?;
            steps += 1;

            if node.is_leaf(&mut self.cache)? {
                if steps > 0 && steps as u32 > self.max_steps_searched {
                    self.max_steps_searched = steps as u32;
                }
                return Ok(result);
            }

            let slot = if result >= 0 { result + 1 } else { -result - 1 };
            let child = self.child_address(node, slot as i16)?;
            parent_address = node.address();
            node.seat(child);
        }
    }

    /// Allocates a fresh zeroed page.
    fn next_page(&mut self) -> Result<i32> {
        let address = self.allocator.allocate_page()?;
        Self::check_page_address(self.page_size, address)?;
        self.page_count += 1;
        self.cache.install_zeroed(address);
        Ok(address)
    }

    /// Splits the full node under the cursor, bubbling the median key into
    /// the parent, and returns the address the cursor should retry from.
    ///
    /// The upper half of the entries moves to a fresh sibling. For a leaf the
    /// median is the sibling's first key and stays there; for an interior
    /// node the median is promoted and dropped from both halves, and the
    /// trailing child pointer is carried over. With `parent_address == 0` the
    /// node is the root: a fresh root is allocated pointing at both halves.
    fn split_node(&mut self, node: &mut NodeView, parent_address: i32) -> Result<i32> {
        let mut max_index = self.max_children / 2;
        let leaf = node.is_leaf(&mut self.cache)?;

        let sibling_address = self.next_page()?;
        let mut sibling = NodeView::new(self.max_children, sibling_address);
        sibling.set_leaf(&mut self.cache, leaf)?;

        let record_count = node.child_count(&mut self.cache)?;
        let moved = record_count - max_index;
        sibling.set_child_count(&mut self.cache, moved)?;

        let bytes = moved as usize * ENTRY_LEN;
        node.read_entries_into(&mut self.cache, max_index, moved, &mut self.scratch[..bytes])?;
        sibling.write_entries_from(&mut self.cache, 0, moved, &self.scratch[..bytes])?;

        let median_key;
        if leaf {
            median_key = sibling.key_at(&mut self.cache, 0)?;
        } else {
            let trailing = node.address_at(&mut self.cache, record_count)?;
            sibling.set_address_at(&mut self.cache, moved, trailing)?;
            // The key count is odd (the child count is even), so the middle
            // key goes to the parent instead of staying in either half.
            max_index -= 1;
            median_key = node.key_at(&mut self.cache, max_index)?;
        }
        node.set_child_count(&mut self.cache, max_index)?;

        let retry_address;
        if parent_address != 0 {
            let mut parent = NodeView::new(self.max_children, parent_address);
            let slot = parent.search(&mut self.cache, median_key)?;
            debug_assert!(slot < 0);
            parent.insert_interior(&mut self.cache, median_key, -sibling_address, (-slot - 1) as i16)?;
            retry_address = parent_address;
            debug!(
                address = node.address(),
                sibling = sibling_address,
                median_key,
                leaf,
                "split node"
            );
        } else {
            let new_root = self.next_page()?;
            self.root_address = new_root;
            let mut root = NodeView::new(self.max_children, new_root);
            root.set_child_count(&mut self.cache, 1)?;
            root.set_key_at(&mut self.cache, 0, median_key)?;
            root.set_address_at(&mut self.cache, 0, -node.address())?;
            root.set_address_at(&mut self.cache, 1, -sibling_address)?;
            root.sync(&mut self.cache)?;
            retry_address = new_root;
            debug!(
                old_root = node.address(),
                new_root,
                sibling = sibling_address,
                median_key,
                "split root"
            );
        }

        node.sync(&mut self.cache)?;
        sibling.sync(&mut self.cache)?;

        Ok(retry_address)
    }
}
