use crate::common::DriftResult;
use crate::tx::{IsolationLevel, Transaction, XidStore};

use super::entry::Entry;

/// Can `t` see this version at its isolation level?
pub fn is_visible(xids: &XidStore, t: &Transaction, entry: &Entry) -> DriftResult<bool> {
    match t.level {
        IsolationLevel::ReadCommitted => read_committed(xids, t, entry),
        IsolationLevel::RepeatableRead => repeatable_read(xids, t, entry),
    }
}

/// A version another transaction committed over the top of `t`'s view.
/// Only meaningful at repeatable read; the caller decides whether to treat
/// it as a conflict.
pub fn is_version_skip(xids: &XidStore, t: &Transaction, entry: &Entry) -> DriftResult<bool> {
    if t.level == IsolationLevel::ReadCommitted {
        return Ok(false);
    }
    let xdel = entry.xdel();
    Ok(xids.is_committed(xdel)? && (xdel > t.xid || t.in_snapshot(xdel)))
}

fn read_committed(xids: &XidStore, t: &Transaction, entry: &Entry) -> DriftResult<bool> {
    let xcrt = entry.xcrt();
    let xdel = entry.xdel();
    if xcrt == t.xid && xdel == 0 {
        return Ok(true);
    }
    if xids.is_committed(xcrt)? {
        if xdel == 0 {
            return Ok(true);
        }
        if xdel != t.xid && !xids.is_committed(xdel)? {
            return Ok(true);
        }
    }
    Ok(false)
}

fn repeatable_read(xids: &XidStore, t: &Transaction, entry: &Entry) -> DriftResult<bool> {
    let xcrt = entry.xcrt();
    let xdel = entry.xdel();
    if xcrt == t.xid && xdel == 0 {
        return Ok(true);
    }
    // The creator counts only if it committed before we began.
    if xids.is_committed(xcrt)? && xcrt < t.xid && !t.in_snapshot(xcrt) {
        if xdel == 0 {
            return Ok(true);
        }
        if xdel != t.xid {
            // A deletion we cannot see leaves the version alive for us.
            if !xids.is_committed(xdel)? || xdel > t.xid || t.in_snapshot(xdel) {
                return Ok(true);
            }
        }
    }
    Ok(false)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::data::DataManager;
    use crate::storage::page::{PageCache, PageIndex, PageStore};
    use crate::storage::wal::Logger;
    use crate::tx::SUPER_XID;
    use std::collections::HashMap;
    use std::sync::Arc;
    use tempfile::TempDir;

    struct Fixture {
        dm: DataManager,
        logger: Arc<Logger>,
        xids: Arc<XidStore>,
    }

    fn fixture(dir: &TempDir) -> Fixture {
        let store = Arc::new(PageStore::open(dir.path().join(".db")).unwrap());
        let pages = Arc::new(PageCache::new(store, 16));
        let logger = Arc::new(Logger::open(dir.path().join(".log")).unwrap());
        let xids = Arc::new(XidStore::open(dir.path().join(".xid")).unwrap());
        let dm = DataManager::new(pages, Arc::new(PageIndex::new()), Arc::clone(&logger), 16);
        Fixture { dm, logger, xids }
    }

    fn entry_made_by(f: &Fixture, xid: u64) -> Entry {
        let uid = f.dm.insert(xid, &Entry::make(b"row", xid)).unwrap();
        Entry::load(&f.dm, uid).unwrap()
    }

    fn tx(xid: u64, level: IsolationLevel) -> Transaction {
        Transaction::new(xid, level, &HashMap::new())
    }

    #[test]
    fn test_rc_own_and_committed_versions() {
        let dir = TempDir::new().unwrap();
        let f = fixture(&dir);
        let writer = f.xids.begin().unwrap();
        let entry = entry_made_by(&f, writer);

        // Uncommitted foreign write is invisible, own write is visible.
        let me = tx(f.xids.begin().unwrap(), IsolationLevel::ReadCommitted);
        assert!(!is_visible(&f.xids, &me, &entry).unwrap());
        let own = tx(writer, IsolationLevel::ReadCommitted);
        assert!(is_visible(&f.xids, &own, &entry).unwrap());

        f.xids.commit(writer).unwrap();
        assert!(is_visible(&f.xids, &me, &entry).unwrap());
    }

    #[test]
    fn test_rc_deletion_rules() {
        let dir = TempDir::new().unwrap();
        let f = fixture(&dir);
        let entry = entry_made_by(&f, SUPER_XID);

        let deleter = f.xids.begin().unwrap();
        entry.set_xdel(deleter, &f.logger).unwrap();

        let me = tx(f.xids.begin().unwrap(), IsolationLevel::ReadCommitted);
        // Pending deletion by someone else: still visible.
        assert!(is_visible(&f.xids, &me, &entry).unwrap());
        // Deleted by me: gone for me.
        let as_deleter = tx(deleter, IsolationLevel::ReadCommitted);
        assert!(!is_visible(&f.xids, &as_deleter, &entry).unwrap());
        // Committed deletion: gone for everyone.
        f.xids.commit(deleter).unwrap();
        assert!(!is_visible(&f.xids, &me, &entry).unwrap());
    }

    #[test]
    fn test_rr_hides_later_commits() {
        let dir = TempDir::new().unwrap();
        let f = fixture(&dir);

        let me = tx(f.xids.begin().unwrap(), IsolationLevel::RepeatableRead);
        let later = f.xids.begin().unwrap();
        let entry = entry_made_by(&f, later);
        f.xids.commit(later).unwrap();

        // Committed, but after I began: hidden at RR, seen at RC.
        assert!(!is_visible(&f.xids, &me, &entry).unwrap());
        let rc = tx(me.xid, IsolationLevel::ReadCommitted);
        assert!(is_visible(&f.xids, &rc, &entry).unwrap());
    }

    #[test]
    fn test_rr_snapshot_hides_concurrent_creator() {
        let dir = TempDir::new().unwrap();
        let f = fixture(&dir);

        let concurrent = f.xids.begin().unwrap();
        let mut active = HashMap::new();
        active.insert(
            concurrent,
            Arc::new(tx(concurrent, IsolationLevel::ReadCommitted)),
        );

        let me = Transaction::new(
            f.xids.begin().unwrap(),
            IsolationLevel::RepeatableRead,
            &active,
        );
        let entry = entry_made_by(&f, concurrent);
        f.xids.commit(concurrent).unwrap();

        // Creator was in-flight when I began, even though its xid is lower.
        assert!(!is_visible(&f.xids, &me, &entry).unwrap());
    }

    #[test]
    fn test_rr_keeps_version_deleted_after_begin() {
        let dir = TempDir::new().unwrap();
        let f = fixture(&dir);
        let entry = entry_made_by(&f, SUPER_XID);

        let me = tx(f.xids.begin().unwrap(), IsolationLevel::RepeatableRead);
        let deleter = f.xids.begin().unwrap();
        entry.set_xdel(deleter, &f.logger).unwrap();
        f.xids.commit(deleter).unwrap();

        // The deletion committed after I began: I keep the old version,
        // and the skip predicate reports the overwrite.
        assert!(is_visible(&f.xids, &me, &entry).unwrap());
        assert!(is_version_skip(&f.xids, &me, &entry).unwrap());

        let rc = tx(me.xid, IsolationLevel::ReadCommitted);
        assert!(!is_visible(&f.xids, &rc, &entry).unwrap());
        assert!(!is_version_skip(&f.xids, &rc, &entry).unwrap());
    }
}
