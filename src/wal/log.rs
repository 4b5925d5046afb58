//! Append-only checksummed log file.
//!
//! ```text
//! +-----------+---------------------------+---------------------------+
//! | xChecksum | size | checksum | data ... | size | checksum | data ... |
//! +-----------+---------------------------+---------------------------+
//!     4B         4B      4B
//! ```
//!
//! `checksum` covers a record's data. `xChecksum` accumulates over every
//! whole record (framing included) in file order and is rewritten after
//! each append. On open the file is cut back to the longest record prefix
//! whose accumulated checksum equals the header, which drops a torn tail.

use crate::error::{Result, StorageError};
use parking_lot::Mutex;
use std::fs::{File, OpenOptions};
use std::io::{Read, Seek, SeekFrom, Write};
use std::path::Path;

const SEED: i32 = 13331;

const HEADER_LEN: u64 = 4;
const OFFSET_CHECKSUM: usize = 4;
const OFFSET_DATA: usize = 8;

/// Fold bytes into a running checksum
pub fn checksum(acc: i32, bytes: &[u8]) -> i32 {
    bytes.iter().fold(acc, |acc, &b| {
        acc.wrapping_mul(SEED).wrapping_add(b as i8 as i32)
    })
}

fn wrap(data: &[u8]) -> Vec<u8> {
    let mut record = Vec::with_capacity(OFFSET_DATA + data.len());
    record.extend_from_slice(&(data.len() as u32).to_be_bytes());
    record.extend_from_slice(&checksum(0, data).to_be_bytes());
    record.extend_from_slice(data);
    record
}

struct WalInner {
    file: File,
    /// Checksum over all records up to `file_size`
    x_checksum: i32,
    /// End of the valid region
    file_size: u64,
    /// Read cursor
    position: u64,
}

impl WalInner {
    /// Read the whole record at the cursor and advance past it, or return
    /// `None` if the record is torn or fails its checksum.
    fn next_record(&mut self) -> Result<Option<Vec<u8>>> {
        if self.position + OFFSET_DATA as u64 > self.file_size {
            return Ok(None);
        }

        let mut size_buf = [0u8; 4];
        self.file.seek(SeekFrom::Start(self.position))?;
        self.file.read_exact(&mut size_buf)?;
        let size = u32::from_be_bytes(size_buf) as u64;
        if self.position + OFFSET_DATA as u64 + size > self.file_size {
            return Ok(None);
        }

        let mut record = vec![0u8; OFFSET_DATA + size as usize];
        self.file.seek(SeekFrom::Start(self.position))?;
        self.file.read_exact(&mut record)?;

        let stored = i32::from_be_bytes([
            record[OFFSET_CHECKSUM],
            record[OFFSET_CHECKSUM + 1],
            record[OFFSET_CHECKSUM + 2],
            record[OFFSET_CHECKSUM + 3],
        ]);
        if checksum(0, &record[OFFSET_DATA..]) != stored {
            return Ok(None);
        }

        self.position += record.len() as u64;
        Ok(Some(record))
    }

    fn write_header(&mut self) -> Result<()> {
        self.file.seek(SeekFrom::Start(0))?;
        self.file.write_all(&self.x_checksum.to_be_bytes())?;
        self.file.sync_data()?;
        Ok(())
    }
}

/// The write-ahead log
pub struct Wal {
    inner: Mutex<WalInner>,
}

impl Wal {
    /// Create an empty log. Fails if the file exists.
    pub fn create(path: &Path) -> Result<Self> {
        if path.exists() {
            return Err(StorageError::FileExists(path.to_path_buf()));
        }

        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create_new(true)
            .open(path)?;

        let mut inner = WalInner {
            file,
            x_checksum: 0,
            file_size: HEADER_LEN,
            position: HEADER_LEN,
        };
        inner.write_header()?;

        Ok(Self {
            inner: Mutex::new(inner),
        })
    }

    /// Open an existing log, validating it and dropping any torn tail
    pub fn open(path: &Path) -> Result<Self> {
        if !path.exists() {
            return Err(StorageError::FileNotExists(path.to_path_buf()));
        }

        let mut file = OpenOptions::new().read(true).write(true).open(path)?;
        let len = file.metadata()?.len();
        if len < HEADER_LEN {
            return Err(StorageError::bad_log(format!(
                "file is {} bytes, shorter than its header",
                len
            )));
        }

        let mut header = [0u8; 4];
        file.read_exact(&mut header)?;
        let x_checksum = i32::from_be_bytes(header);

        let mut inner = WalInner {
            file,
            x_checksum,
            file_size: len,
            position: HEADER_LEN,
        };

        // longest prefix whose accumulated checksum matches the header
        let mut acc = 0i32;
        let mut good_end = (acc == x_checksum).then_some(HEADER_LEN);
        while let Some(record) = inner.next_record()? {
            acc = checksum(acc, &record);
            if acc == x_checksum {
                good_end = Some(inner.position);
            }
        }

        let good_end = good_end.ok_or_else(|| {
            StorageError::bad_log("no record prefix matches the header checksum")
        })?;

        if good_end < len {
            tracing::debug!(
                valid = good_end,
                dropped = len - good_end,
                "truncating torn log tail"
            );
            inner.file.set_len(good_end)?;
            inner.file.sync_all()?;
        }
        inner.file_size = good_end;
        inner.position = HEADER_LEN;

        Ok(Self {
            inner: Mutex::new(inner),
        })
    }

    /// Append one record and fold it into the header checksum.
    ///
    /// The record and header are synced before this returns.
    pub fn log(&self, data: &[u8]) -> Result<()> {
        let record = wrap(data);

        let mut inner = self.inner.lock();
        let end = inner.file_size;
        inner.file.seek(SeekFrom::Start(end))?;
        inner.file.write_all(&record)?;
        inner.file_size = end + record.len() as u64;

        inner.x_checksum = checksum(inner.x_checksum, &record);
        inner.write_header()
    }

    /// Move the read cursor to the first record
    pub fn rewind(&self) {
        self.inner.lock().position = HEADER_LEN;
    }

    /// Read the data of the next record, or `None` at the end of the log
    pub fn next(&self) -> Result<Option<Vec<u8>>> {
        let mut inner = self.inner.lock();
        Ok(inner
            .next_record()?
            .map(|record| record[OFFSET_DATA..].to_vec()))
    }

    /// Read every record from the start of the log
    pub fn records(&self) -> Result<Vec<Vec<u8>>> {
        self.rewind();
        let mut records = Vec::new();
        while let Some(data) = self.next()? {
            records.push(data);
        }
        Ok(records)
    }

    /// Bytes in the valid region of the log, header included
    pub fn len(&self) -> u64 {
        self.inner.lock().file_size
    }

    pub fn is_empty(&self) -> bool {
        self.len() == HEADER_LEN
    }

    /// Sync the log file
    pub fn close(&self) -> Result<()> {
        self.inner.lock().file.sync_all()?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn test_checksum_signed_bytes() {
        assert_eq!(checksum(0, &[]), 0);
        assert_eq!(checksum(0, &[1]), 1);
        assert_eq!(checksum(0, &[1, 2]), 13331 + 2);
        // bytes are folded as signed values
        assert_eq!(checksum(0, &[0xFF]), -1);
        // accumulation is associative over concatenation
        assert_eq!(checksum(checksum(0, b"ab"), b"cd"), checksum(0, b"abcd"));
    }

    #[test]
    fn test_log_and_read_back() -> Result<()> {
        let dir = tempdir().unwrap();
        let path = dir.path().join("test.log");

        {
            let wal = Wal::create(&path)?;
            assert!(wal.is_empty());
            wal.log(b"first")?;
            wal.log(b"second")?;
            wal.close()?;
        }

        let wal = Wal::open(&path)?;
        assert_eq!(wal.records()?, vec![b"first".to_vec(), b"second".to_vec()]);

        // appends after open land behind the existing records
        wal.log(b"third")?;
        wal.rewind();
        assert_eq!(wal.next()?, Some(b"first".to_vec()));
        assert_eq!(wal.next()?, Some(b"second".to_vec()));
        assert_eq!(wal.next()?, Some(b"third".to_vec()));
        assert_eq!(wal.next()?, None);
        Ok(())
    }

    #[test]
    fn test_torn_tail_is_truncated() -> Result<()> {
        let dir = tempdir().unwrap();
        let path = dir.path().join("test.log");

        let good_len = {
            let wal = Wal::create(&path)?;
            wal.log(b"committed")?;
            wal.len()
        };

        // half of a record that never finished writing
        {
            let mut file = OpenOptions::new().append(true).open(&path)?;
            file.write_all(&wrap(b"lost record")[..10])?;
        }

        let wal = Wal::open(&path)?;
        assert_eq!(wal.len(), good_len);
        assert_eq!(std::fs::metadata(&path)?.len(), good_len);
        assert_eq!(wal.records()?, vec![b"committed".to_vec()]);
        Ok(())
    }

    #[test]
    fn test_record_without_header_update_is_dropped() -> Result<()> {
        let dir = tempdir().unwrap();
        let path = dir.path().join("test.log");

        let good_len = {
            let wal = Wal::create(&path)?;
            wal.log(b"one")?;
            wal.len()
        };

        // a complete record whose header checksum update never happened
        {
            let mut file = OpenOptions::new().append(true).open(&path)?;
            file.write_all(&wrap(b"two"))?;
        }

        let wal = Wal::open(&path)?;
        assert_eq!(wal.len(), good_len);
        assert_eq!(wal.records()?, vec![b"one".to_vec()]);
        Ok(())
    }

    #[test]
    fn test_bad_header_is_rejected() -> Result<()> {
        let dir = tempdir().unwrap();
        let path = dir.path().join("test.log");

        {
            let wal = Wal::create(&path)?;
            wal.log(b"data")?;
        }
        {
            let mut file = OpenOptions::new().write(true).open(&path)?;
            file.write_all(&0x1234_5678i32.to_be_bytes())?;
        }

        assert!(matches!(Wal::open(&path), Err(StorageError::BadLogFile(_))));

        std::fs::write(&path, [0u8; 2])?;
        assert!(matches!(Wal::open(&path), Err(StorageError::BadLogFile(_))));
        Ok(())
    }
}
