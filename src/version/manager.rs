use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use tracing::debug;

use crate::common::{DriftError, DriftResult};
use crate::storage::cache::{Backing, RefCache};
use crate::storage::data::DataManager;
use crate::storage::wal::Logger;
use crate::tx::{IsolationLevel, Transaction, XidStore, SUPER_XID};

use super::entry::Entry;
use super::lock_table::LockTable;
use super::visibility;

pub struct EntryBacking {
    dm: Arc<DataManager>,
}

impl Backing for EntryBacking {
    type Item = Entry;

    fn load(&self, uid: u64) -> DriftResult<Entry> {
        Entry::load(&self.dm, uid)
    }

    fn evict(&self, _uid: u64, _entry: &Entry) {
        // Dropping the entry releases its slot, which unpins the page.
    }
}

/// The transactional face of the engine: versioned reads and writes on top
/// of the record layer, with row locks and per-transaction visibility.
pub struct VersionManager {
    dm: Arc<DataManager>,
    xids: Arc<XidStore>,
    logger: Arc<Logger>,
    locks: LockTable,
    entries: Arc<RefCache<EntryBacking>>,
    active: Mutex<HashMap<u64, Arc<Transaction>>>,
}

impl VersionManager {
    pub fn new(
        dm: Arc<DataManager>,
        xids: Arc<XidStore>,
        logger: Arc<Logger>,
        capacity: usize,
    ) -> Self {
        let mut active = HashMap::new();
        // The super transaction is always open; recovery treats its writes
        // as committed.
        active.insert(
            SUPER_XID,
            Arc::new(Transaction::new(
                SUPER_XID,
                IsolationLevel::ReadCommitted,
                &HashMap::new(),
            )),
        );
        Self {
            entries: Arc::new(RefCache::new(EntryBacking { dm: Arc::clone(&dm) }, capacity)),
            dm,
            xids,
            logger,
            locks: LockTable::new(),
            active: Mutex::new(active),
        }
    }

    /// Open a transaction and return its xid. The snapshot of in-flight
    /// xids is taken under the same lock that installs the transaction, so
    /// no begin can slip between the two.
    pub fn begin(&self, level: IsolationLevel) -> DriftResult<u64> {
        let mut active = self.active.lock().unwrap();
        let xid = self.xids.begin()?;
        let t = Arc::new(Transaction::new(xid, level, &active));
        active.insert(xid, t);
        debug!("transaction {} began at {:?}", xid, level);
        Ok(xid)
    }

    /// The version at `uid` as `xid` sees it, or `None` if no visible
    /// version exists there.
    pub fn read(&self, xid: u64, uid: u64) -> DriftResult<Option<Vec<u8>>> {
        let t = self.transaction(xid)?;
        let entry = match self.entries.get(uid) {
            Ok(entry) => entry,
            Err(DriftError::InvalidEntry) => return Ok(None),
            Err(e) => return Err(e),
        };
        if visibility::is_visible(&self.xids, &t, &entry)? {
            Ok(Some(entry.data()))
        } else {
            Ok(None)
        }
    }

    pub fn insert(&self, xid: u64, data: &[u8]) -> DriftResult<u64> {
        let t = self.transaction(xid)?;
        self.dm.insert(t.xid, &Entry::make(data, t.xid))
    }

    /// Delete the version at `uid`. `false` when there is nothing visible
    /// to delete or `xid` already deleted it. Waits for the row lock; a
    /// would-be deadlock, or a repeatable-read transaction finding its
    /// version overwritten by a commit it cannot see, aborts the
    /// transaction and surfaces as an error.
    pub fn delete(&self, xid: u64, uid: u64) -> DriftResult<bool> {
        let t = self.transaction(xid)?;
        let entry = match self.entries.get(uid) {
            Ok(entry) => entry,
            Err(DriftError::InvalidEntry) => return Ok(false),
            Err(e) => return Err(e),
        };
        if !visibility::is_visible(&self.xids, &t, &entry)? {
            return Ok(false);
        }
        match self.locks.acquire(t.xid, uid) {
            Ok(None) => {}
            Ok(Some(waiter)) => waiter.wait(),
            Err(DriftError::Deadlock) => {
                self.auto_abort(&t)?;
                return Err(DriftError::Deadlock);
            }
            Err(e) => return Err(e),
        }
        if entry.xdel() == t.xid {
            return Ok(false);
        }
        if visibility::is_version_skip(&self.xids, &t, &entry)? {
            self.auto_abort(&t)?;
            return Err(DriftError::ConcurrentUpdate);
        }
        entry.set_xdel(t.xid, &self.logger)?;
        debug!("xid {} deleted entry {}", t.xid, entry.uid());
        Ok(true)
    }

    pub fn commit(&self, xid: u64) -> DriftResult<()> {
        if xid == SUPER_XID {
            return Err(DriftError::TransactionError(
                "the super transaction never ends".to_string(),
            ));
        }
        let t = {
            let mut active = self.active.lock().unwrap();
            active.remove(&xid).ok_or_else(|| {
                DriftError::TransactionError(format!("xid {} is not open", xid))
            })?
        };
        if t.is_auto_aborted() {
            return Err(DriftError::TransactionError(format!(
                "xid {} was aborted on deadlock",
                xid
            )));
        }
        self.locks.release(xid);
        self.xids.commit(xid)?;
        debug!("transaction {} committed", xid);
        Ok(())
    }

    /// Idempotent; a transaction aborted from the lock path only needs to
    /// be uninstalled.
    pub fn abort(&self, xid: u64) -> DriftResult<()> {
        if xid == SUPER_XID {
            return Err(DriftError::TransactionError(
                "the super transaction never ends".to_string(),
            ));
        }
        let t = {
            let mut active = self.active.lock().unwrap();
            active.remove(&xid)
        };
        let Some(t) = t else {
            return Ok(());
        };
        if !t.is_auto_aborted() {
            self.locks.release(xid);
        }
        self.xids.abort(xid)?;
        debug!("transaction {} aborted", xid);
        Ok(())
    }

    /// Roll the transaction back from inside the lock path; the caller's
    /// later abort finds the work already done.
    fn auto_abort(&self, t: &Transaction) -> DriftResult<()> {
        t.set_auto_aborted();
        self.locks.release(t.xid);
        self.xids.abort(t.xid)
    }

    fn transaction(&self, xid: u64) -> DriftResult<Arc<Transaction>> {
        let active = self.active.lock().unwrap();
        let t = active.get(&xid).ok_or_else(|| {
            DriftError::TransactionError(format!("xid {} is not open", xid))
        })?;
        if t.is_auto_aborted() {
            return Err(DriftError::TransactionError(format!(
                "xid {} was aborted on deadlock",
                xid
            )));
        }
        Ok(Arc::clone(t))
    }
}
