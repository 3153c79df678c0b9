use std::fs::{File, OpenOptions};
use std::io::{Read, Seek, SeekFrom, Write};
use std::path::Path;
use std::sync::Mutex;

use crate::common::{DriftError, DriftResult};

/// XID of the super transaction: permanently committed, usable without a
/// `begin`.
pub const SUPER_XID: u64 = 0;

const HEADER_LEN: u64 = 8;

const ACTIVE: u8 = 0;
const COMMITTED: u8 = 1;
const ABORTED: u8 = 2;

/// Persistent transaction status table.
///
/// File layout: `[xidCounter:8]` followed by one status byte per xid,
/// 1-based. The counter is authoritative: a file whose size disagrees with
/// `8 + counter` is refused.
pub struct XidStore {
    inner: Mutex<XidFile>,
}

struct XidFile {
    file: File,
    counter: u64,
}

impl XidStore {
    pub fn open<P: AsRef<Path>>(path: P) -> DriftResult<Self> {
        let path = path.as_ref();
        if !path.exists() {
            let mut file = File::create(path)?;
            file.write_all(&0u64.to_le_bytes())?;
            file.sync_all()?;
        }
        let mut file = OpenOptions::new().read(true).write(true).open(path)?;
        let size = file.metadata()?.len();
        if size < HEADER_LEN {
            return Err(DriftError::XidError(
                "xid file too short for its counter".to_string(),
            ));
        }
        file.seek(SeekFrom::Start(0))?;
        let mut header = [0u8; 8];
        file.read_exact(&mut header)?;
        let counter = u64::from_le_bytes(header);
        if size != HEADER_LEN + counter {
            return Err(DriftError::XidError(format!(
                "xid file size {} does not match counter {}",
                size, counter
            )));
        }
        Ok(Self {
            inner: Mutex::new(XidFile { file, counter }),
        })
    }

    /// Allocate the next xid, persist its `active` byte and the bumped
    /// counter, and return it.
    pub fn begin(&self) -> DriftResult<u64> {
        let mut inner = self.inner.lock().unwrap();
        let xid = inner.counter + 1;
        inner.file.seek(SeekFrom::Start(status_offset(xid)))?;
        inner.file.write_all(&[ACTIVE])?;
        inner.counter = xid;
        inner.file.seek(SeekFrom::Start(0))?;
        inner.file.write_all(&xid.to_le_bytes())?;
        inner.file.sync_data()?;
        Ok(xid)
    }

    pub fn commit(&self, xid: u64) -> DriftResult<()> {
        self.update(xid, COMMITTED)
    }

    pub fn abort(&self, xid: u64) -> DriftResult<()> {
        self.update(xid, ABORTED)
    }

    pub fn is_active(&self, xid: u64) -> DriftResult<bool> {
        if xid == SUPER_XID {
            return Ok(false);
        }
        Ok(self.status(xid)? == ACTIVE)
    }

    pub fn is_committed(&self, xid: u64) -> DriftResult<bool> {
        if xid == SUPER_XID {
            return Ok(true);
        }
        Ok(self.status(xid)? == COMMITTED)
    }

    pub fn is_aborted(&self, xid: u64) -> DriftResult<bool> {
        if xid == SUPER_XID {
            return Ok(false);
        }
        Ok(self.status(xid)? == ABORTED)
    }

    fn update(&self, xid: u64, status: u8) -> DriftResult<()> {
        let mut inner = self.inner.lock().unwrap();
        Self::check_allocated(&inner, xid)?;
        inner.file.seek(SeekFrom::Start(status_offset(xid)))?;
        inner.file.write_all(&[status])?;
        inner.file.sync_data()?;
        Ok(())
    }

    fn status(&self, xid: u64) -> DriftResult<u8> {
        let mut inner = self.inner.lock().unwrap();
        Self::check_allocated(&inner, xid)?;
        inner.file.seek(SeekFrom::Start(status_offset(xid)))?;
        let mut status = [0u8; 1];
        inner.file.read_exact(&mut status)?;
        Ok(status[0])
    }

    fn check_allocated(inner: &XidFile, xid: u64) -> DriftResult<()> {
        if xid == SUPER_XID || xid > inner.counter {
            return Err(DriftError::XidError(format!("xid {} was never allocated", xid)));
        }
        Ok(())
    }
}

fn status_offset(xid: u64) -> u64 {
    HEADER_LEN + (xid - 1)
}
