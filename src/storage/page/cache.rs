use std::sync::Arc;

use tracing::error;

use super::store::PageStore;
use super::Page;
use crate::common::DriftResult;
use crate::storage::cache::{Backing, CacheRef, RefCache};

pub type PageRef = CacheRef<PageBacking>;

pub struct PageBacking {
    store: Arc<PageStore>,
}

impl Backing for PageBacking {
    type Item = Page;

    fn load(&self, page_number: u64) -> DriftResult<Page> {
        let data = self.store.read_page(page_number)?;
        Ok(Page::new(page_number, data))
    }

    fn evict(&self, page_number: u64, page: &Page) {
        if !page.is_dirty() {
            return;
        }
        let result = page.with_data(|d| self.store.write_page(page_number, d));
        match result {
            Ok(()) => page.set_dirty(false),
            // Nothing to return to from Drop; the page is lost from memory
            // but its mutations are already covered by the log.
            Err(e) => error!("failed to write back page {}: {}", page_number, e),
        }
    }
}

/// The buffer cache: pinned pages with write-back on final release.
pub struct PageCache {
    cache: Arc<RefCache<PageBacking>>,
    store: Arc<PageStore>,
}

impl PageCache {
    pub fn new(store: Arc<PageStore>, capacity: usize) -> Self {
        Self {
            cache: Arc::new(RefCache::new(
                PageBacking {
                    store: Arc::clone(&store),
                },
                capacity,
            )),
            store,
        }
    }

    /// Pin a page, loading it from the store if absent.
    pub fn get(&self, page_number: u64) -> DriftResult<PageRef> {
        self.cache.get(page_number)
    }

    /// Append a new page and flush it. The page is not cached; a later
    /// `get` loads it back.
    pub fn new_page(&self, data: &[u8]) -> DriftResult<u64> {
        self.store.append_page(data)
    }

    pub fn truncate_to(&self, page_count: u64) -> DriftResult<()> {
        self.store.truncate_to(page_count)
    }

    pub fn page_count(&self) -> u64 {
        self.store.page_count()
    }
}
