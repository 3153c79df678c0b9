use std::sync::{Mutex, MutexGuard};

use crate::common::DriftResult;
use crate::storage::page::PageRef;
use crate::storage::wal::{record, Logger, UpdateRecord};

pub const VALID_FLAG_LEN: usize = 1;
pub const DATA_SIZE_LEN: usize = 2;
/// `[valid:1][size:2]` in front of every slot payload.
pub const ITEM_HEADER_LEN: usize = VALID_FLAG_LEN + DATA_SIZE_LEN;

const VALID: u8 = 0;

/// A record slot on a data page: `[valid:1][size:2][payload]`, addressed by
/// `uid = page << 32 | offset`. The item pins its page for as long as it
/// lives; bytes are reached through the page buffer, whose read lock keeps
/// multi-byte observations torn-free. Mutation goes through [`Self::before`].
pub struct DataItem {
    page: PageRef,
    offset: usize,
    len: usize,
    uid: u64,
    write_lock: Mutex<()>,
}

impl DataItem {
    /// Wrap a payload in the slot format, valid.
    pub fn construct(data: &[u8]) -> Vec<u8> {
        let mut raw = Vec::with_capacity(ITEM_HEADER_LEN + data.len());
        raw.push(VALID);
        raw.extend(&(data.len() as u16).to_le_bytes());
        raw.extend(data);
        raw
    }

    /// View the slot at `offset` of a pinned page.
    pub fn parse(page: PageRef, offset: u16) -> Self {
        let start = offset as usize;
        let size = page.with_data(|d| {
            u16::from_le_bytes([d[start + VALID_FLAG_LEN], d[start + VALID_FLAG_LEN + 1]])
        });
        let uid = record::make_uid(page.number(), offset);
        Self {
            page,
            offset: start,
            len: ITEM_HEADER_LEN + size as usize,
            uid,
            write_lock: Mutex::new(()),
        }
    }

    pub fn uid(&self) -> u64 {
        self.uid
    }

    pub fn is_valid(&self) -> bool {
        self.page.with_data(|d| d[self.offset] == VALID)
    }

    /// Copy of the user payload.
    pub fn data(&self) -> Vec<u8> {
        self.with_payload(|p| p.to_vec())
    }

    /// Run `f` over the payload under the page read lock.
    pub fn with_payload<R>(&self, f: impl FnOnce(&[u8]) -> R) -> R {
        self.page.with_data(|d| {
            f(&d[self.offset + ITEM_HEADER_LEN..self.offset + self.len])
        })
    }

    fn raw(&self) -> Vec<u8> {
        self.page
            .with_data(|d| d[self.offset..self.offset + self.len].to_vec())
    }

    /// Open the write protocol: take the item's write lock, mark the page
    /// dirty, and snapshot the slot. The guard's [`ItemWriteGuard::after`]
    /// logs the mutation; [`ItemWriteGuard::rollback`] restores the
    /// snapshot instead.
    pub fn before(&self) -> ItemWriteGuard<'_> {
        let lock = self.write_lock.lock().unwrap();
        self.page.set_dirty(true);
        let old = self.raw();
        ItemWriteGuard {
            item: self,
            old,
            _lock: lock,
        }
    }
}

pub struct ItemWriteGuard<'a> {
    item: &'a DataItem,
    old: Vec<u8>,
    _lock: MutexGuard<'a, ()>,
}

impl ItemWriteGuard<'_> {
    /// Overwrite payload bytes starting at `pos` (payload-relative).
    pub fn write_payload(&mut self, pos: usize, bytes: &[u8]) {
        let start = self.item.offset + ITEM_HEADER_LEN + pos;
        self.item
            .page
            .with_data_mut(|d| d[start..start + bytes.len()].copy_from_slice(bytes));
    }

    /// Close the protocol: emit the update record for the mutation, then
    /// let the write lock go. The append is durable before the lock is
    /// released, so log order matches mutation order per slot.
    pub fn after(self, xid: u64, logger: &Logger) -> DriftResult<()> {
        let new = self.item.raw();
        let payload = UpdateRecord::encode(xid, self.item.uid(), &self.old, &new);
        logger.append(&payload)
    }

    /// Abandon the mutation: put the snapshot back.
    pub fn rollback(self) {
        let start = self.item.offset;
        self.item
            .page
            .with_data_mut(|d| d[start..start + self.old.len()].copy_from_slice(&self.old));
    }
}
