use std::sync::Mutex;

use crate::config::PAGE_SIZE_BYTES;

const LEVELS: usize = 100;
const INTERVAL: usize = PAGE_SIZE_BYTES / LEVELS;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PageInfo {
    pub page_number: u64,
    pub free_space: usize,
}

/// Bucketed index of data pages by free space, for picking an insertion
/// target without scanning the file. Selecting a page removes it from the
/// index; whoever consumed space must `add` the page back with its new
/// free-space figure.
pub struct PageIndex {
    buckets: Mutex<Vec<Vec<PageInfo>>>,
}

impl PageIndex {
    pub fn new() -> Self {
        Self {
            buckets: Mutex::new(vec![Vec::new(); LEVELS + 1]),
        }
    }

    pub fn add(&self, page_number: u64, free_space: usize) {
        let mut buckets = self.buckets.lock().unwrap();
        // A near-empty page lands past the last interval; clamp it in.
        let level = (free_space / INTERVAL).min(LEVELS);
        buckets[level].push(PageInfo {
            page_number,
            free_space,
        });
    }

    /// Pick a page with at least `need` free bytes, preferring the
    /// smallest sufficient bucket.
    pub fn select(&self, need: usize) -> Option<PageInfo> {
        let mut buckets = self.buckets.lock().unwrap();
        let mut level = need / INTERVAL;
        if level < LEVELS {
            level += 1;
        }
        while level < LEVELS {
            if let Some(info) = buckets[level].pop() {
                return Some(info);
            }
            level += 1;
        }
        // The topmost bucket holds mixed sizes; check the actual figure.
        let top = &mut buckets[LEVELS];
        let pos = top.iter().position(|info| need <= info.free_space)?;
        Some(top.remove(pos))
    }
}

impl Default for PageIndex {
    fn default() -> Self {
        Self::new()
    }
}
