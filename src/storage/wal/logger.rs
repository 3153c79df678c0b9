use std::fs::{File, OpenOptions};
use std::io::{Read, Seek, SeekFrom, Write};
use std::path::Path;
use std::sync::Mutex;

use tracing::{debug, info, warn};

use crate::common::{DriftError, DriftResult};

/// Multiplier of the rolling checksum.
const SEED: u32 = 6160506;

const XCHECKSUM_LEN: u64 = 4;
const SIZE_LEN: usize = 4;
const CHECKSUM_LEN: usize = 4;
const RECORD_HEADER_LEN: usize = SIZE_LEN + CHECKSUM_LEN;

/// Append-only write-ahead log.
///
/// File layout: `[xChecksum:4][record...]` where each record is
/// `[size:4][checksum:4][payload]`. `xChecksum` is the rolling checksum of
/// every well-formed record in order; a half-written tail fails either its
/// own checksum or the size bound and is cut off at open. Appends are
/// durable before they return, which is what lets dirty pages be flushed
/// at any later point.
pub struct Logger {
    inner: Mutex<LogInner>,
}

struct LogInner {
    file: File,
    x_checksum: u32,
    position: u64,
}

fn checksum(initial: u32, data: &[u8]) -> u32 {
    data.iter()
        .fold(initial, |c, b| c.wrapping_mul(SEED).wrapping_add(*b as u32))
}

impl Logger {
    pub fn open<P: AsRef<Path>>(path: P) -> DriftResult<Self> {
        let path = path.as_ref();
        if !path.exists() {
            let mut file = File::create(path)?;
            file.write_all(&0u32.to_le_bytes())?;
            file.sync_all()?;
        }
        let mut file = OpenOptions::new().read(true).write(true).open(path)?;
        let size = file.metadata()?.len();
        if size < XCHECKSUM_LEN {
            return Err(DriftError::WalError(
                "log file too short for its checksum header".to_string(),
            ));
        }
        file.seek(SeekFrom::Start(0))?;
        let mut header = [0u8; 4];
        file.read_exact(&mut header)?;
        let x_checksum = u32::from_le_bytes(header);

        let mut inner = LogInner {
            file,
            x_checksum,
            position: XCHECKSUM_LEN,
        };
        Self::check_and_remove_tail(&mut inner)?;
        Ok(Self {
            inner: Mutex::new(inner),
        })
    }

    /// Walk every record, drop the bad tail, and verify the header
    /// checksum against what the walk accumulated.
    fn check_and_remove_tail(inner: &mut LogInner) -> DriftResult<()> {
        inner.position = XCHECKSUM_LEN;
        let mut walked = 0u32;
        while let Some(record) = Self::next_record(inner)? {
            walked = checksum(walked, &record);
        }
        let size = inner.file.metadata()?.len();
        if inner.position < size {
            warn!(
                "truncating bad log tail: {} -> {} bytes",
                size, inner.position
            );
            inner.file.set_len(inner.position)?;
            inner.file.sync_data()?;
        }
        if walked != inner.x_checksum {
            return Err(DriftError::WalError(format!(
                "log checksum mismatch: stored {:#x}, walked {:#x}",
                inner.x_checksum, walked
            )));
        }
        inner.position = XCHECKSUM_LEN;
        Ok(())
    }

    /// Read the record at the current position, verifying its checksum.
    /// Returns the whole record bytes and advances; `None` at the first
    /// record that overruns the file or fails verification.
    fn next_record(inner: &mut LogInner) -> DriftResult<Option<Vec<u8>>> {
        let size = inner.file.metadata()?.len();
        if inner.position + RECORD_HEADER_LEN as u64 > size {
            return Ok(None);
        }
        inner.file.seek(SeekFrom::Start(inner.position))?;
        let mut header = [0u8; RECORD_HEADER_LEN];
        inner.file.read_exact(&mut header)?;
        let data_len = u32::from_le_bytes(header[..SIZE_LEN].try_into().unwrap()) as u64;
        if inner.position + RECORD_HEADER_LEN as u64 + data_len > size {
            return Ok(None);
        }
        let mut record = vec![0u8; RECORD_HEADER_LEN + data_len as usize];
        inner.file.seek(SeekFrom::Start(inner.position))?;
        inner.file.read_exact(&mut record)?;

        let stored = u32::from_le_bytes(record[SIZE_LEN..RECORD_HEADER_LEN].try_into().unwrap());
        let actual = checksum(0, &record[RECORD_HEADER_LEN..]);
        if stored != actual {
            return Ok(None);
        }
        inner.position += record.len() as u64;
        Ok(Some(record))
    }

    /// Append one payload. Durable when this returns.
    pub fn append(&self, payload: &[u8]) -> DriftResult<()> {
        let mut record = Vec::with_capacity(RECORD_HEADER_LEN + payload.len());
        record.extend(&(payload.len() as u32).to_le_bytes());
        record.extend(&checksum(0, payload).to_le_bytes());
        record.extend(payload);

        let mut inner = self.inner.lock().unwrap();
        debug!("appending {} byte log record", payload.len());
        inner.file.seek(SeekFrom::End(0))?;
        inner.file.write_all(&record)?;
        inner.x_checksum = checksum(inner.x_checksum, &record);
        let x_checksum = inner.x_checksum;
        inner.file.seek(SeekFrom::Start(0))?;
        inner.file.write_all(&x_checksum.to_le_bytes())?;
        inner.file.sync_data()?;
        Ok(())
    }

    /// Rewind the iteration cursor to the first record.
    pub fn reset(&self) {
        let mut inner = self.inner.lock().unwrap();
        inner.position = XCHECKSUM_LEN;
    }

    /// Next payload in file order, or `None` past the last record.
    pub fn next(&self) -> DriftResult<Option<Vec<u8>>> {
        let mut inner = self.inner.lock().unwrap();
        match Self::next_record(&mut inner)? {
            Some(record) => Ok(Some(record[RECORD_HEADER_LEN..].to_vec())),
            None => Ok(None),
        }
    }
}

impl Drop for Logger {
    fn drop(&mut self) {
        if let Ok(inner) = self.inner.lock() {
            if let Err(e) = inner.file.sync_all() {
                info!("log sync on drop failed: {}", e);
            }
        }
    }
}
