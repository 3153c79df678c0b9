use std::fs::{File, OpenOptions};
use std::io::{Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use std::sync::atomic::{AtomicU64, Ordering};

use crate::common::DriftResult;
use crate::config::PAGE_SIZE_BYTES;

/// Paged I/O over the single data file. Pages are 1-based; all file access
/// is serialized on one mutex, separate from any in-memory cache lock.
/// Writes are synced before returning so replay always sees durable bytes.
pub struct PageStore {
    file: Mutex<File>,
    page_count: AtomicU64,
    _path: PathBuf,
}

impl PageStore {
    pub fn open<P: AsRef<Path>>(path: P) -> DriftResult<Self> {
        let path = path.as_ref();
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .open(path)?;
        let size = file.metadata()?.len();
        Ok(Self {
            file: Mutex::new(file),
            page_count: AtomicU64::new(size / PAGE_SIZE_BYTES as u64),
            _path: path.to_path_buf(),
        })
    }

    pub fn page_count(&self) -> u64 {
        self.page_count.load(Ordering::Acquire)
    }

    pub fn read_page(&self, page_number: u64) -> DriftResult<Vec<u8>> {
        let mut file = self.file.lock().unwrap();
        file.seek(SeekFrom::Start(page_offset(page_number)))?;
        let mut buf = vec![0u8; PAGE_SIZE_BYTES];
        file.read_exact(&mut buf)?;
        Ok(buf)
    }

    pub fn write_page(&self, page_number: u64, data: &[u8]) -> DriftResult<()> {
        let mut file = self.file.lock().unwrap();
        file.seek(SeekFrom::Start(page_offset(page_number)))?;
        file.write_all(data)?;
        file.sync_data()?;
        Ok(())
    }

    /// Append a page at the end of the file and return its number.
    pub fn append_page(&self, data: &[u8]) -> DriftResult<u64> {
        let mut file = self.file.lock().unwrap();
        let page_number = self.page_count.load(Ordering::Acquire) + 1;
        file.seek(SeekFrom::Start(page_offset(page_number)))?;
        file.write_all(data)?;
        file.sync_data()?;
        self.page_count.store(page_number, Ordering::Release);
        Ok(page_number)
    }

    /// Resize the file to exactly `page_count` pages, zero-filling growth.
    pub fn truncate_to(&self, page_count: u64) -> DriftResult<()> {
        let file = self.file.lock().unwrap();
        file.set_len(page_count * PAGE_SIZE_BYTES as u64)?;
        file.sync_data()?;
        self.page_count.store(page_count, Ordering::Release);
        Ok(())
    }
}

fn page_offset(page_number: u64) -> u64 {
    (page_number - 1) * PAGE_SIZE_BYTES as u64
}
