use std::collections::HashMap;

use tracing::info;

use crate::common::{DriftError, DriftResult};
use crate::storage::page::PageCache;
use crate::storage::wal::{record, InsertRecord, Logger, UpdateRecord, INSERT_RECORD, UPDATE_RECORD};
use crate::tx::XidStore;

/// Bring the data file back to a consistent state from the log.
///
/// Three passes: size the file to the highest page any record names (so
/// replay never writes past the end), redo every finished transaction in
/// log order, then undo the ones still active at the crash, newest record
/// first, and pin their status to aborted.
///
/// Redo covers aborted transactions too: their row locks were released at
/// abort, so a later committed write to the same slot may follow in the
/// log and must win by replay order. Stamps of aborted transactions are
/// dead under the visibility rules, so re-applying them changes nothing a
/// reader can see. Active transactions, by contrast, still held their
/// locks at the crash, so nothing newer sits on their slots and restoring
/// the before image is safe.
pub fn recover(logger: &Logger, pages: &PageCache, xids: &XidStore) -> DriftResult<()> {
    info!("starting recovery");
    truncate_to_known_pages(logger, pages)?;
    let redone = redo_finished(logger, pages, xids)?;
    let undone = undo_active(logger, pages, xids)?;
    info!("recovery completed, {} records redone, {} undone", redone, undone);
    Ok(())
}

fn truncate_to_known_pages(logger: &Logger, pages: &PageCache) -> DriftResult<()> {
    let mut max_page_number = 0;
    logger.reset();
    while let Some(payload) = logger.next()? {
        let page_number = match record_type(&payload)? {
            INSERT_RECORD => InsertRecord::decode(&payload)?.page_number,
            _ => UpdateRecord::decode(&payload)?.page_number,
        };
        max_page_number = max_page_number.max(page_number);
    }
    if max_page_number == 0 {
        max_page_number = 1;
    }
    pages.truncate_to(max_page_number)
}

fn redo_finished(logger: &Logger, pages: &PageCache, xids: &XidStore) -> DriftResult<usize> {
    let mut redone = 0;
    logger.reset();
    while let Some(payload) = logger.next()? {
        if xids.is_active(record::record_xid(&payload)?)? {
            continue;
        }
        match record_type(&payload)? {
            INSERT_RECORD => {
                let rec = InsertRecord::decode(&payload)?;
                let page = pages.get(rec.page_number)?;
                page.update_data(&rec.raw, rec.offset);
            }
            _ => {
                let rec = UpdateRecord::decode(&payload)?;
                let page = pages.get(rec.page_number)?;
                page.update_data(&rec.new_raw, rec.offset);
            }
        }
        redone += 1;
    }
    Ok(redone)
}

fn undo_active(logger: &Logger, pages: &PageCache, xids: &XidStore) -> DriftResult<usize> {
    let mut per_xid: HashMap<u64, Vec<Vec<u8>>> = HashMap::new();
    logger.reset();
    while let Some(payload) = logger.next()? {
        let xid = record::record_xid(&payload)?;
        if xids.is_active(xid)? {
            per_xid.entry(xid).or_default().push(payload);
        }
    }

    let mut undone = 0;
    for (xid, records) in per_xid {
        for payload in records.iter().rev() {
            match record_type(payload)? {
                INSERT_RECORD => {
                    let rec = InsertRecord::decode(payload)?;
                    let page = pages.get(rec.page_number)?;
                    // An undone insert stays in place, flagged invalid.
                    let mut raw = rec.raw;
                    raw[0] = 1;
                    page.update_data(&raw, rec.offset);
                }
                _ => {
                    let rec = UpdateRecord::decode(payload)?;
                    let page = pages.get(rec.page_number)?;
                    page.update_data(&rec.old_raw, rec.offset);
                }
            }
            undone += 1;
        }
        xids.abort(xid)?;
    }
    Ok(undone)
}

fn record_type(payload: &[u8]) -> DriftResult<u8> {
    match payload.first() {
        Some(&t) if t == INSERT_RECORD || t == UPDATE_RECORD => Ok(t),
        _ => Err(DriftError::WalError("unknown log record type".to_string())),
    }
}
