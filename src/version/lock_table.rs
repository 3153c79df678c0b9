use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Condvar, Mutex};

use tracing::debug;

use crate::common::{DriftError, DriftResult};

/// One-shot latch a blocked transaction parks on until the lock it wants
/// is handed over.
pub struct Waiter {
    granted: Mutex<bool>,
    cv: Condvar,
}

impl Waiter {
    fn new() -> Self {
        Self {
            granted: Mutex::new(false),
            cv: Condvar::new(),
        }
    }

    pub fn wait(&self) {
        let mut granted = self.granted.lock().unwrap();
        while !*granted {
            granted = self.cv.wait(granted).unwrap();
        }
    }

    fn notify(&self) {
        let mut granted = self.granted.lock().unwrap();
        *granted = true;
        self.cv.notify_all();
    }
}

#[derive(Default)]
struct TableState {
    /// uids each transaction holds.
    held: HashMap<u64, VecDeque<u64>>,
    /// Current holder of each uid.
    owner: HashMap<u64, u64>,
    /// Transactions queued on each uid; new arrivals at the front,
    /// handover pops from the front.
    waiters: HashMap<u64, VecDeque<u64>>,
    /// The single uid each blocked transaction waits for.
    waiting_for: HashMap<u64, u64>,
    /// Latch of each blocked transaction.
    wait_lock: HashMap<u64, Arc<Waiter>>,
}

/// Exclusive row locks with deadlock prevention: before a transaction is
/// allowed to block, the wait-for graph (`xid → waited uid → its owner`)
/// is checked for a cycle the new edge would close.
pub struct LockTable {
    state: Mutex<TableState>,
}

impl LockTable {
    pub fn new() -> Self {
        Self {
            state: Mutex::new(TableState::default()),
        }
    }

    /// Claim `uid` for `xid`. `None` means the lock is held (either it
    /// already was, or it was free); `Some(waiter)` means the caller must
    /// block on the latch. A would-be deadlock fails instead of blocking.
    pub fn acquire(&self, xid: u64, uid: u64) -> DriftResult<Option<Arc<Waiter>>> {
        let mut state = self.state.lock().unwrap();

        if state.held.get(&xid).is_some_and(|uids| uids.contains(&uid)) {
            return Ok(None);
        }
        if !state.owner.contains_key(&uid) {
            state.owner.insert(uid, xid);
            state.held.entry(xid).or_default().push_back(uid);
            return Ok(None);
        }

        state.waiting_for.insert(xid, uid);
        state.waiters.entry(uid).or_default().push_front(xid);
        if has_deadlock(&state) {
            debug!("deadlock: xid {} cannot wait for uid {}", xid, uid);
            state.waiting_for.remove(&xid);
            let queue = state.waiters.get_mut(&uid).unwrap();
            queue.retain(|&waiting| waiting != xid);
            if queue.is_empty() {
                state.waiters.remove(&uid);
            }
            return Err(DriftError::Deadlock);
        }
        let waiter = Arc::new(Waiter::new());
        state.wait_lock.insert(xid, Arc::clone(&waiter));
        Ok(Some(waiter))
    }

    /// Drop everything `xid` holds or waits for, handing each freed uid to
    /// its first still-parked waiter.
    pub fn release(&self, xid: u64) {
        let mut state = self.state.lock().unwrap();
        if let Some(uids) = state.held.remove(&xid) {
            for uid in uids {
                promote_waiter(&mut state, uid);
            }
        }
        state.waiting_for.remove(&xid);
        state.wait_lock.remove(&xid);
    }
}

impl Default for LockTable {
    fn default() -> Self {
        Self::new()
    }
}

/// Hand `uid` to the first queued transaction whose latch is still
/// registered, recording the new ownership on both sides.
fn promote_waiter(state: &mut TableState, uid: u64) {
    state.owner.remove(&uid);
    loop {
        let Some(queue) = state.waiters.get_mut(&uid) else {
            return;
        };
        let Some(next) = queue.pop_front() else {
            state.waiters.remove(&uid);
            return;
        };
        if queue.is_empty() {
            state.waiters.remove(&uid);
        }
        if let Some(waiter) = state.wait_lock.remove(&next) {
            state.owner.insert(uid, next);
            state.held.entry(next).or_default().push_back(uid);
            state.waiting_for.remove(&next);
            waiter.notify();
            return;
        }
    }
}

fn has_deadlock(state: &TableState) -> bool {
    let mut stamps: HashMap<u64, u64> = HashMap::new();
    let mut stamp = 1;
    for &xid in state.held.keys() {
        if stamps.get(&xid).copied().unwrap_or(0) > 0 {
            continue;
        }
        stamp += 1;
        if dfs(state, xid, &mut stamps, stamp) {
            return true;
        }
    }
    false
}

fn dfs(state: &TableState, xid: u64, stamps: &mut HashMap<u64, u64>, stamp: u64) -> bool {
    match stamps.get(&xid) {
        Some(&s) if s == stamp => return true,
        Some(&s) if s < stamp => return false,
        _ => {}
    }
    stamps.insert(xid, stamp);
    let Some(&uid) = state.waiting_for.get(&xid) else {
        return false;
    };
    let Some(&owner) = state.owner.get(&uid) else {
        return false;
    };
    dfs(state, owner, stamps, stamp)
}
