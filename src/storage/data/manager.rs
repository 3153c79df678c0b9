use std::sync::Arc;

use crate::common::{DriftError, DriftResult};
use crate::config::PAGE_SIZE_BYTES;
use crate::storage::cache::{Backing, CacheRef, RefCache};
use crate::storage::page::{data_page_bytes, PageCache, PageIndex};
use crate::storage::wal::{record, InsertRecord, Logger};

use super::item::DataItem;

pub type DataItemRef = CacheRef<ItemBacking>;

pub struct ItemBacking {
    pages: Arc<PageCache>,
}

impl Backing for ItemBacking {
    type Item = DataItem;

    fn load(&self, uid: u64) -> DriftResult<DataItem> {
        let page = self.pages.get(record::uid_page_number(uid))?;
        Ok(DataItem::parse(page, record::uid_offset(uid)))
    }

    fn evict(&self, _uid: u64, _item: &DataItem) {
        // Dropping the item unpins its page; the page cache handles
        // write-back.
    }
}

/// Record-level entry point: wraps payloads into slots, places them via the
/// free-space index, and keeps the WAL ahead of every page mutation.
pub struct DataManager {
    pages: Arc<PageCache>,
    index: Arc<PageIndex>,
    logger: Arc<Logger>,
    items: Arc<RefCache<ItemBacking>>,
}

impl DataManager {
    pub fn new(
        pages: Arc<PageCache>,
        index: Arc<PageIndex>,
        logger: Arc<Logger>,
        capacity: usize,
    ) -> Self {
        Self {
            items: Arc::new(RefCache::new(
                ItemBacking {
                    pages: Arc::clone(&pages),
                },
                capacity,
            )),
            pages,
            index,
            logger,
        }
    }

    /// Pin the slot at `uid`. `None` once the slot has been invalidated.
    pub fn read(&self, uid: u64) -> DriftResult<Option<DataItemRef>> {
        let item = self.items.get(uid)?;
        if !item.is_valid() {
            return Ok(None);
        }
        Ok(Some(item))
    }

    /// Write `data` as a fresh slot and return its uid. The insert record
    /// hits the log before the page is touched.
    pub fn insert(&self, xid: u64, data: &[u8]) -> DriftResult<u64> {
        let raw = DataItem::construct(data);
        if raw.len() > PAGE_SIZE_BYTES - 2 {
            return Err(DriftError::StorageError(format!(
                "record of {} bytes cannot fit a page",
                raw.len()
            )));
        }

        let mut target = None;
        for _ in 0..10 {
            if let Some(info) = self.index.select(raw.len()) {
                target = Some(self.pages.get(info.page_number)?);
                break;
            }
            // No page can hold it; grow the file by one empty page.
            let page_number = self.pages.new_page(&data_page_bytes())?;
            self.index.add(page_number, PAGE_SIZE_BYTES - 2);
        }
        let page = target.ok_or_else(|| {
            DriftError::StorageError("no page with enough free space".to_string())
        })?;

        let offset = page.fso();
        let payload = InsertRecord::encode(xid, page.number(), offset, &raw);
        self.logger.append(&payload)?;

        let slot = page.insert_data(&raw);
        self.index.add(page.number(), page.free_space());
        Ok(record::make_uid(page.number(), slot))
    }
}
