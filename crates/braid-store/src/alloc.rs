//! Page allocation.

use braid_common::{BraidError, Result};

/// Hands out addresses of fresh pages.
///
/// Returned addresses are positive multiples of the page size. Address 0 is
/// reserved: the index uses it as the "no parent" sentinel, and interior
/// pages store child addresses negated, so a page at 0 would be
/// indistinguishable from an absent one.
pub trait PageAllocator {
    /// Returns the address of a freshly allocated page.
    fn allocate_page(&mut self) -> Result<i32>;
}

/// Sequential allocator over a growing store.
///
/// Pages are carved off a watermark, the way a file grows one page at a time
/// at its end. The watermark starts at `page_size` so address 0 stays
/// reserved for file-level metadata.
#[derive(Debug)]
pub struct BumpAllocator {
    page_size: usize,
    // Tracked wider than the address space so the last addressable page can
    // still be handed out before exhaustion is reported.
    next: i64,
}

impl BumpAllocator {
    /// Creates an allocator whose first page sits at `page_size`.
    pub fn new(page_size: usize) -> Self {
        Self::with_watermark(page_size, page_size as i32)
    }

    /// Creates an allocator resuming at `next`, e.g. after reopening a store
    /// that already holds pages.
    pub fn with_watermark(page_size: usize, next: i32) -> Self {
        debug_assert!(next > 0 && next as usize % page_size == 0);
        Self {
            page_size,
            next: next as i64,
        }
    }

    /// The watermark the next allocation will be served from.
    pub fn watermark(&self) -> i64 {
        self.next
    }
}

impl PageAllocator for BumpAllocator {
    fn allocate_page(&mut self) -> Result<i32> {
        if self.next > i32::MAX as i64 {
            return Err(BraidError::Storage(format!(
                "page address space exhausted at watermark {}",
                self.next
            )));
        }
        let address = self.next as i32;
        self.next += self.page_size as i64;
        Ok(address)
    }
}
