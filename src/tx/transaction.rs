use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use super::xid_store::SUPER_XID;

/// Isolation levels: `0` reads anything committed, `1` only what was
/// committed before the transaction began.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IsolationLevel {
    ReadCommitted = 0,
    RepeatableRead = 1,
}

/// An open transaction. The snapshot holds the xids that were active at
/// begin time and is only populated for repeatable read, where it fences
/// off their later commits.
pub struct Transaction {
    pub xid: u64,
    pub level: IsolationLevel,
    snapshot: HashSet<u64>,
    auto_aborted: AtomicBool,
}

impl Transaction {
    pub fn new(
        xid: u64,
        level: IsolationLevel,
        active: &HashMap<u64, Arc<Transaction>>,
    ) -> Self {
        let snapshot = match level {
            IsolationLevel::ReadCommitted => HashSet::new(),
            IsolationLevel::RepeatableRead => active.keys().copied().collect(),
        };
        Self {
            xid,
            level,
            snapshot,
            auto_aborted: AtomicBool::new(false),
        }
    }

    pub fn in_snapshot(&self, xid: u64) -> bool {
        if xid == SUPER_XID {
            return false;
        }
        self.snapshot.contains(&xid)
    }

    pub fn is_auto_aborted(&self) -> bool {
        self.auto_aborted.load(Ordering::Acquire)
    }

    pub fn set_auto_aborted(&self) {
        self.auto_aborted.store(true, Ordering::Release);
    }
}
