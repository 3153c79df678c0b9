pub mod store;
pub use store::PageStore;

pub mod cache;
pub use cache::{PageCache, PageRef};

pub mod index;
pub use index::{PageIndex, PageInfo};

use std::sync::RwLock;
use std::sync::atomic::{AtomicBool, Ordering};

use crate::config::PAGE_SIZE_BYTES;

/// Length of the startup nonce on the control page. Bytes 0..64 are filled
/// with random data at every open; bytes 64..128 receive a copy only on
/// clean shutdown, so equality of the two halves marks a clean close.
const CHECK_LENGTH: usize = 64;

/// Width of the free-space offset at the head of every data page.
const FSO_LENGTH: usize = 2;

/// An in-memory page. The buffer lives under an `RwLock`; the read side is
/// also what record readers take to observe multi-byte fields without
/// tearing. The dirty flag decides write-back when the page leaves the
/// cache.
pub struct Page {
    number: u64,
    data: RwLock<Vec<u8>>,
    dirty: AtomicBool,
}

impl Page {
    pub fn new(number: u64, mut data: Vec<u8>) -> Self {
        data.resize(PAGE_SIZE_BYTES, 0);
        Self {
            number,
            data: RwLock::new(data),
            dirty: AtomicBool::new(false),
        }
    }

    pub fn number(&self) -> u64 {
        self.number
    }

    pub fn is_dirty(&self) -> bool {
        self.dirty.load(Ordering::Acquire)
    }

    pub fn set_dirty(&self, dirty: bool) {
        self.dirty.store(dirty, Ordering::Release);
    }

    pub fn with_data<R>(&self, f: impl FnOnce(&[u8]) -> R) -> R {
        let data = self.data.read().unwrap();
        f(&data)
    }

    /// Mutable access; marks the page dirty.
    pub fn with_data_mut<R>(&self, f: impl FnOnce(&mut [u8]) -> R) -> R {
        let mut data = self.data.write().unwrap();
        self.set_dirty(true);
        f(&mut data)
    }

    /// Free-space offset: where the next record lands on a data page.
    pub fn fso(&self) -> u16 {
        self.with_data(|d| u16::from_le_bytes([d[0], d[1]]))
    }

    /// Copy `raw` at the current FSO and advance it. Returns the slot
    /// offset the bytes landed at.
    pub fn insert_data(&self, raw: &[u8]) -> u16 {
        self.with_data_mut(|d| {
            let offset = u16::from_le_bytes([d[0], d[1]]);
            let start = offset as usize;
            d[start..start + raw.len()].copy_from_slice(raw);
            let new_fso = offset + raw.len() as u16;
            d[0..FSO_LENGTH].copy_from_slice(&new_fso.to_le_bytes());
            offset
        })
    }

    /// Copy `raw` at `offset`, pushing the FSO forward if the write ends
    /// past it. Used by log replay, where slots may land on pages whose
    /// FSO was never advanced.
    pub fn update_data(&self, raw: &[u8], offset: u16) {
        self.with_data_mut(|d| {
            let start = offset as usize;
            d[start..start + raw.len()].copy_from_slice(raw);
            let old_fso = u16::from_le_bytes([d[0], d[1]]);
            let end = (FSO_LENGTH + start + raw.len()) as u16;
            d[0..FSO_LENGTH].copy_from_slice(&old_fso.max(end).to_le_bytes());
        });
    }

    /// Replay can push the FSO past the end of a full page; such pages
    /// simply report nothing free.
    pub fn free_space(&self) -> usize {
        PAGE_SIZE_BYTES.saturating_sub(self.fso() as usize)
    }

    /// Stamp a fresh startup nonce on the control page.
    pub fn init_control(&self) {
        self.with_data_mut(|d| {
            for b in d[..CHECK_LENGTH].iter_mut() {
                *b = rand::random::<u8>();
            }
        });
    }

    /// Record a clean shutdown: the nonce is copied beside itself.
    pub fn mark_clean_shutdown(&self) {
        self.with_data_mut(|d| d.copy_within(0..CHECK_LENGTH, CHECK_LENGTH));
    }

    pub fn clean_shutdown_ok(&self) -> bool {
        self.with_data(|d| d[..CHECK_LENGTH] == d[CHECK_LENGTH..2 * CHECK_LENGTH])
    }
}

/// Bytes of a fresh control page (random nonce, stale second half).
pub fn control_page_bytes() -> Vec<u8> {
    let mut data = vec![0u8; PAGE_SIZE_BYTES];
    for b in data[..CHECK_LENGTH].iter_mut() {
        *b = rand::random::<u8>();
    }
    data
}

/// Bytes of a fresh, empty data page (FSO right past itself).
pub fn data_page_bytes() -> Vec<u8> {
    let mut data = vec![0u8; PAGE_SIZE_BYTES];
    data[0..FSO_LENGTH].copy_from_slice(&(FSO_LENGTH as u16).to_le_bytes());
    data
}
