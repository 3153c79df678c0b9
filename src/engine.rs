use std::fs;
use std::path::Path;
use std::sync::Arc;

use tracing::info;

use crate::common::{DriftError, DriftResult};
use crate::config::{DB_FILE, DEFAULT_DATA_DIR, PAGE_SIZE_BYTES, WAL_FILE, XID_FILE};
use crate::storage::page::{control_page_bytes, PageCache, PageIndex, PageStore};
use crate::storage::recover::recover;
use crate::storage::wal::Logger;
use crate::storage::data::DataManager;
use crate::tx::{IsolationLevel, XidStore};
use crate::version::VersionManager;

/// The assembled engine. One `Engine` value owns every component; there
/// are no process-wide singletons, so tests and embedders can run several
/// instances against different directories.
///
/// Dropping an `Engine` without [`Engine::close`] leaves the clean-shutdown
/// marker unwritten, which is exactly a crash: the next open replays the
/// log.
pub struct Engine {
    pages: Arc<PageCache>,
    vm: VersionManager,
}

impl Engine {
    /// Open (or create) the engine in `dir`, with `memory` bytes of page
    /// cache. Runs recovery when the previous run did not close cleanly.
    pub fn open<P: AsRef<Path>>(dir: P, memory: u64) -> DriftResult<Self> {
        let dir = dir.as_ref();
        fs::create_dir_all(dir)?;
        let capacity = memory as usize / PAGE_SIZE_BYTES;
        if capacity == 0 {
            return Err(DriftError::StorageError(
                "memory budget below one page".to_string(),
            ));
        }

        let xids = Arc::new(XidStore::open(dir.join(XID_FILE))?);
        let store = Arc::new(PageStore::open(dir.join(DB_FILE))?);
        let pages = Arc::new(PageCache::new(store, capacity));
        let logger = Arc::new(Logger::open(dir.join(WAL_FILE))?);

        if pages.page_count() == 0 {
            let page_number = pages.new_page(&control_page_bytes())?;
            if page_number != 1 {
                return Err(DriftError::StorageError(
                    "data file did not begin with the control page".to_string(),
                ));
            }
            info!("created fresh data file");
        } else {
            let clean = {
                let control = pages.get(1)?;
                control.clean_shutdown_ok()
            };
            if !clean {
                info!("unclean shutdown detected");
                recover(&logger, &pages, &xids)?;
            }
            let control = pages.get(1)?;
            control.init_control();
        }

        let index = Arc::new(PageIndex::new());
        for page_number in 2..=pages.page_count() {
            let page = pages.get(page_number)?;
            index.add(page_number, page.free_space());
        }

        let dm = Arc::new(DataManager::new(
            Arc::clone(&pages),
            index,
            Arc::clone(&logger),
            capacity,
        ));
        let vm = VersionManager::new(dm, xids, logger, capacity);
        Ok(Self { pages, vm })
    }

    /// [`Engine::open`] in the default data directory.
    pub fn open_default(memory: u64) -> DriftResult<Self> {
        Self::open(DEFAULT_DATA_DIR, memory)
    }

    pub fn begin(&self, level: IsolationLevel) -> DriftResult<u64> {
        self.vm.begin(level)
    }

    pub fn commit(&self, xid: u64) -> DriftResult<()> {
        self.vm.commit(xid)
    }

    pub fn abort(&self, xid: u64) -> DriftResult<()> {
        self.vm.abort(xid)
    }

    pub fn read(&self, xid: u64, uid: u64) -> DriftResult<Option<Vec<u8>>> {
        self.vm.read(xid, uid)
    }

    pub fn insert(&self, xid: u64, data: &[u8]) -> DriftResult<u64> {
        self.vm.insert(xid, data)
    }

    pub fn delete(&self, xid: u64, uid: u64) -> DriftResult<bool> {
        self.vm.delete(xid, uid)
    }

    /// Shut down cleanly: stamp the control page so the next open skips
    /// recovery. Everything else is already durable.
    pub fn close(self) -> DriftResult<()> {
        let control = self.pages.get(1)?;
        control.mark_clean_shutdown();
        info!("engine closed cleanly");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tx::SUPER_XID;
    use std::thread;
    use std::time::Duration;
    use tempfile::TempDir;

    const MEMORY: u64 = 1 << 20;
    const RC: IsolationLevel = IsolationLevel::ReadCommitted;
    const RR: IsolationLevel = IsolationLevel::RepeatableRead;

    #[test]
    fn test_insert_read_commit_reopen() {
        let dir = TempDir::new().unwrap();
        let uid;
        {
            let engine = Engine::open(dir.path(), MEMORY).unwrap();
            let xid = engine.begin(RC).unwrap();
            uid = engine.insert(xid, b"hello").unwrap();
            assert_eq!(engine.read(xid, uid).unwrap().unwrap(), b"hello");
            engine.commit(xid).unwrap();
            engine.close().unwrap();
        }
        let engine = Engine::open(dir.path(), MEMORY).unwrap();
        let xid = engine.begin(RC).unwrap();
        assert_eq!(engine.read(xid, uid).unwrap().unwrap(), b"hello");
    }

    #[test]
    fn test_crash_before_commit_rolls_back() {
        let dir = TempDir::new().unwrap();
        let uid;
        {
            let engine = Engine::open(dir.path(), MEMORY).unwrap();
            let xid = engine.begin(RC).unwrap();
            uid = engine.insert(xid, b"A").unwrap();
            // Dropped without close: a crash.
        }
        let engine = Engine::open(dir.path(), MEMORY).unwrap();
        let xid = engine.begin(RC).unwrap();
        assert_eq!(engine.read(xid, uid).unwrap(), None);
    }

    #[test]
    fn test_double_crash_stays_rolled_back() {
        let dir = TempDir::new().unwrap();
        let uid;
        {
            let engine = Engine::open(dir.path(), MEMORY).unwrap();
            let xid = engine.begin(RC).unwrap();
            uid = engine.insert(xid, b"A").unwrap();
        }
        {
            // Recovery runs here, then this instance crashes too.
            let engine = Engine::open(dir.path(), MEMORY).unwrap();
            let xid = engine.begin(RC).unwrap();
            assert_eq!(engine.read(xid, uid).unwrap(), None);
        }
        let engine = Engine::open(dir.path(), MEMORY).unwrap();
        let xid = engine.begin(RC).unwrap();
        assert_eq!(engine.read(xid, uid).unwrap(), None);
    }

    #[test]
    fn test_crash_after_commit_survives() {
        let dir = TempDir::new().unwrap();
        let uid;
        {
            let engine = Engine::open(dir.path(), MEMORY).unwrap();
            let xid = engine.begin(RC).unwrap();
            uid = engine.insert(xid, b"A").unwrap();
            engine.commit(xid).unwrap();
        }
        let engine = Engine::open(dir.path(), MEMORY).unwrap();
        let xid = engine.begin(RC).unwrap();
        assert_eq!(engine.read(xid, uid).unwrap().unwrap(), b"A");
    }

    #[test]
    fn test_crash_after_committed_delete() {
        let dir = TempDir::new().unwrap();
        let uid;
        {
            let engine = Engine::open(dir.path(), MEMORY).unwrap();
            let setup = engine.begin(RC).unwrap();
            uid = engine.insert(setup, b"doomed").unwrap();
            engine.commit(setup).unwrap();

            let xid = engine.begin(RC).unwrap();
            assert!(engine.delete(xid, uid).unwrap());
            engine.commit(xid).unwrap();
        }
        let engine = Engine::open(dir.path(), MEMORY).unwrap();
        let xid = engine.begin(RC).unwrap();
        assert_eq!(engine.read(xid, uid).unwrap(), None);
    }

    #[test]
    fn test_aborted_insert_invisible_without_crash() {
        let dir = TempDir::new().unwrap();
        let engine = Engine::open(dir.path(), MEMORY).unwrap();
        let xid = engine.begin(RC).unwrap();
        let uid = engine.insert(xid, b"undone").unwrap();
        engine.abort(xid).unwrap();

        let other = engine.begin(RC).unwrap();
        assert_eq!(engine.read(other, uid).unwrap(), None);
        // Aborting again is harmless.
        engine.abort(xid).unwrap();
    }

    #[test]
    fn test_repeatable_read_hides_later_commit() {
        let dir = TempDir::new().unwrap();
        let engine = Engine::open(dir.path(), MEMORY).unwrap();

        let x1 = engine.begin(RR).unwrap();
        let x2 = engine.begin(RC).unwrap();
        let u2 = engine.insert(x2, b"Z").unwrap();
        engine.commit(x2).unwrap();

        assert_eq!(engine.read(x1, u2).unwrap(), None);
        // Read committed picks it up immediately.
        let x3 = engine.begin(RC).unwrap();
        assert_eq!(engine.read(x3, u2).unwrap().unwrap(), b"Z");
    }

    #[test]
    fn test_repeatable_read_stable_across_delete() {
        let dir = TempDir::new().unwrap();
        let engine = Engine::open(dir.path(), MEMORY).unwrap();
        let uid = engine.insert(SUPER_XID, b"steady").unwrap();

        let reader = engine.begin(RR).unwrap();
        assert_eq!(engine.read(reader, uid).unwrap().unwrap(), b"steady");

        let deleter = engine.begin(RC).unwrap();
        assert!(engine.delete(deleter, uid).unwrap());
        engine.commit(deleter).unwrap();

        // The deletion committed after the reader began.
        assert_eq!(engine.read(reader, uid).unwrap().unwrap(), b"steady");
        let after = engine.begin(RC).unwrap();
        assert_eq!(engine.read(after, uid).unwrap(), None);
    }

    #[test]
    fn test_rr_delete_conflict_aborts() {
        let dir = TempDir::new().unwrap();
        let engine = Engine::open(dir.path(), MEMORY).unwrap();
        let uid = engine.insert(SUPER_XID, b"contested").unwrap();

        let reader = engine.begin(RR).unwrap();
        assert_eq!(engine.read(reader, uid).unwrap().unwrap(), b"contested");

        let deleter = engine.begin(RC).unwrap();
        assert!(engine.delete(deleter, uid).unwrap());
        engine.commit(deleter).unwrap();

        // The reader still sees the old version but may not overwrite a
        // deletion it cannot see.
        match engine.delete(reader, uid) {
            Err(DriftError::ConcurrentUpdate) => {}
            other => panic!("expected ConcurrentUpdate, got {:?}", other),
        }
        assert!(engine.read(reader, uid).is_err());
        engine.abort(reader).unwrap();
    }

    #[test]
    fn test_double_delete_returns_false() {
        let dir = TempDir::new().unwrap();
        let engine = Engine::open(dir.path(), MEMORY).unwrap();
        let setup = engine.begin(RC).unwrap();
        let uid = engine.insert(setup, b"once").unwrap();
        engine.commit(setup).unwrap();

        let xid = engine.begin(RC).unwrap();
        assert!(engine.delete(xid, uid).unwrap());
        assert!(!engine.delete(xid, uid).unwrap());
        assert_eq!(engine.read(xid, uid).unwrap(), None);
    }

    #[test]
    fn test_deadlock_fails_fast_and_unblocks() {
        let dir = TempDir::new().unwrap();
        let engine = Arc::new(Engine::open(dir.path(), MEMORY).unwrap());
        let setup = engine.begin(RC).unwrap();
        let ua = engine.insert(setup, b"a").unwrap();
        let ub = engine.insert(setup, b"b").unwrap();
        engine.commit(setup).unwrap();

        let x1 = engine.begin(RC).unwrap();
        let x2 = engine.begin(RC).unwrap();
        assert!(engine.delete(x1, ua).unwrap());
        assert!(engine.delete(x2, ub).unwrap());

        let engine2 = Arc::clone(&engine);
        let blocked = thread::spawn(move || engine2.delete(x1, ub));

        // Give the first deleter time to park on the lock.
        thread::sleep(Duration::from_millis(100));
        match engine.delete(x2, ua) {
            Err(DriftError::Deadlock) => {}
            other => panic!("expected Deadlock, got {:?}", other),
        }

        // The auto-abort released x2's locks, so the parked delete wins.
        assert!(blocked.join().unwrap().unwrap());
        engine.commit(x1).unwrap();
        engine.abort(x2).unwrap();

        // x2's transaction is unusable after the deadlock.
        assert!(engine.read(x2, ua).is_err());
    }

    #[test]
    fn test_super_transaction_is_always_open() {
        let dir = TempDir::new().unwrap();
        let engine = Engine::open(dir.path(), MEMORY).unwrap();
        let uid = engine.insert(SUPER_XID, b"root").unwrap();
        assert_eq!(engine.read(SUPER_XID, uid).unwrap().unwrap(), b"root");

        let xid = engine.begin(RC).unwrap();
        assert_eq!(engine.read(xid, uid).unwrap().unwrap(), b"root");
        assert!(engine.commit(SUPER_XID).is_err());
    }

    #[test]
    fn test_many_records_span_pages() {
        let dir = TempDir::new().unwrap();
        let uids;
        {
            let engine = Engine::open(dir.path(), MEMORY).unwrap();
            let xid = engine.begin(RC).unwrap();
            uids = (0..64u32)
                .map(|i| engine.insert(xid, &vec![i as u8; 200]).unwrap())
                .collect::<Vec<_>>();
            engine.commit(xid).unwrap();
            engine.close().unwrap();
        }
        let engine = Engine::open(dir.path(), MEMORY).unwrap();
        let xid = engine.begin(RC).unwrap();
        for (i, uid) in uids.iter().enumerate() {
            assert_eq!(engine.read(xid, *uid).unwrap().unwrap(), vec![i as u8; 200]);
        }
    }

    #[test]
    fn test_unknown_xid_rejected() {
        let dir = TempDir::new().unwrap();
        let engine = Engine::open(dir.path(), MEMORY).unwrap();
        assert!(engine.read(99, 1).is_err());
        assert!(engine.insert(99, b"x").is_err());
    }
}
