use crate::common::{DriftError, DriftResult};
use crate::storage::data::{DataItemRef, DataManager};
use crate::storage::wal::Logger;

pub const XCRT_LEN: usize = 8;
pub const XDEL_LEN: usize = 8;
/// `[XCRT:8][XDEL:8]` in front of the user data.
pub const ENTRY_HEADER_LEN: usize = XCRT_LEN + XDEL_LEN;

/// One record version as the transaction layer sees it. XCRT names the
/// creating transaction and never changes; XDEL stays zero until the one
/// transaction that deletes this version stamps itself in.
pub struct Entry {
    uid: u64,
    item: DataItemRef,
}

impl Entry {
    /// Pin the version at `uid`. Slots invalidated by recovery surface as
    /// [`DriftError::InvalidEntry`].
    pub fn load(dm: &DataManager, uid: u64) -> DriftResult<Self> {
        match dm.read(uid)? {
            Some(item) => Ok(Self { uid, item }),
            None => Err(DriftError::InvalidEntry),
        }
    }

    /// Encode a fresh version owned by `xid`.
    pub fn make(data: &[u8], xid: u64) -> Vec<u8> {
        let mut entry = Vec::with_capacity(ENTRY_HEADER_LEN + data.len());
        entry.extend(&xid.to_le_bytes());
        entry.extend(&0u64.to_le_bytes());
        entry.extend(data);
        entry
    }

    pub fn uid(&self) -> u64 {
        self.uid
    }

    /// Copy of the user data past the version stamps.
    pub fn data(&self) -> Vec<u8> {
        let mut payload = self.item.data();
        payload.drain(..ENTRY_HEADER_LEN);
        payload
    }

    pub fn xcrt(&self) -> u64 {
        self.item
            .with_payload(|p| u64::from_le_bytes(p[..XCRT_LEN].try_into().unwrap()))
    }

    pub fn xdel(&self) -> u64 {
        self.item.with_payload(|p| {
            u64::from_le_bytes(p[XCRT_LEN..ENTRY_HEADER_LEN].try_into().unwrap())
        })
    }

    /// Stamp `xid` as the deleter, through the slot write protocol so the
    /// mutation is logged before it becomes evictable.
    pub fn set_xdel(&self, xid: u64, logger: &Logger) -> DriftResult<()> {
        let mut guard = self.item.before();
        guard.write_payload(XCRT_LEN, &xid.to_le_bytes());
        guard.after(xid, logger)
    }
}
