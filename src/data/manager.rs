//! Data manager: records on top of the buffer pool and the log.
//!
//! Inserts are logged before the page changes. Records are cached as
//! [`DataItem`]s, each pinning its page until the item is evicted.

use crate::buffer::{BufferPool, BufferPoolImpl, CacheLoader, ResourceCache};
use crate::data::item::{self, DataItem};
use crate::error::{Result, StorageError};
use crate::page::{data_page, validity, Page};
use crate::storage::FreeSpaceIndex;
use crate::txn::TransactionLedger;
use crate::types::{InsertRedo, PageId, Uid, Xid};
use crate::wal::{self, LogRecord, Wal};
use std::path::Path;
use std::sync::Arc;

/// Select-or-allocate rounds before an insert gives up
const INSERT_ATTEMPTS: usize = 5;

/// Loads data items; an item holds its page until evicted
pub struct ItemLoader {
    pool: Arc<dyn BufferPool>,
    wal: Arc<Wal>,
}

impl CacheLoader for ItemLoader {
    type Item = DataItem;

    fn load_miss(&self, key: u64) -> Result<Arc<DataItem>> {
        let uid = Uid(key);
        let page = self.pool.get_page(uid.page_id())?;
        match DataItem::new(uid, Arc::clone(&page), Arc::clone(&self.wal)) {
            Ok(item) => Ok(Arc::new(item)),
            Err(e) => {
                self.pool.release(&page)?;
                Err(e)
            }
        }
    }

    fn evict(&self, _key: u64, item: &Arc<DataItem>) -> Result<()> {
        self.pool.release(item.page())
    }
}

pub struct DataManager {
    items: ResourceCache<ItemLoader>,
    pool: Arc<dyn BufferPool>,
    wal: Arc<Wal>,
    free_space: FreeSpaceIndex,
    /// Page 1, pinned for the manager's lifetime
    validity_page: Arc<Page>,
}

impl DataManager {
    /// Create a fresh page file and log
    pub fn create(db_path: &Path, log_path: &Path, memory: u64) -> Result<Self> {
        let pool: Arc<dyn BufferPool> = Arc::new(BufferPoolImpl::create(db_path, memory)?);
        let wal = Arc::new(Wal::create(log_path)?);

        let page_id = pool.new_page(&validity::init_raw())?;
        if page_id != PageId::VALIDITY {
            return Err(StorageError::corruption(format!(
                "validity page allocated as page {}",
                page_id
            )));
        }
        let validity_page = pool.get_page(page_id)?;
        pool.flush_page(&validity_page)?;

        Ok(Self::assemble(pool, wal, validity_page))
    }

    /// Open an existing page file, recovering it if the last run crashed
    pub fn open(
        db_path: &Path,
        log_path: &Path,
        memory: u64,
        ledger: &TransactionLedger,
        insert_redo: InsertRedo,
    ) -> Result<Self> {
        let pool: Arc<dyn BufferPool> = Arc::new(BufferPoolImpl::open(db_path, memory)?);
        let wal = Arc::new(Wal::open(log_path)?);

        let validity_page = pool.get_page(PageId::VALIDITY)?;
        if !validity::check(&validity_page) {
            wal::recover(&wal, pool.as_ref(), ledger, insert_redo)?;
        }

        let dm = Self::assemble(pool, wal, validity_page);
        dm.fill_free_space()?;

        validity::set_open(&dm.validity_page);
        dm.pool.flush_page(&dm.validity_page)?;
        Ok(dm)
    }

    fn assemble(pool: Arc<dyn BufferPool>, wal: Arc<Wal>, validity_page: Arc<Page>) -> Self {
        let loader = ItemLoader {
            pool: Arc::clone(&pool),
            wal: Arc::clone(&wal),
        };
        Self {
            items: ResourceCache::new(loader, 0),
            pool,
            wal,
            free_space: FreeSpaceIndex::new(),
            validity_page,
        }
    }

    /// Register every data page with the free-space index
    fn fill_free_space(&self) -> Result<()> {
        for n in PageId::FIRST_DATA.value()..=self.pool.page_count() {
            let page = self.pool.get_page(PageId::new(n))?;
            let free = data_page::free_space(&page.lock());
            self.free_space.add(page.id(), free);
            self.pool.release(&page)?;
        }
        Ok(())
    }

    /// Read a record. Withdrawn records read as `None`.
    ///
    /// A returned item must be handed back through `release`.
    pub fn read(&self, uid: Uid) -> Result<Option<Arc<DataItem>>> {
        let item = self.items.get(uid.value())?;
        if item.is_valid() {
            Ok(Some(item))
        } else {
            self.items.release(uid.value())?;
            Ok(None)
        }
    }

    pub fn release(&self, item: &DataItem) -> Result<()> {
        self.items.release(item.uid().value())
    }

    /// Insert a payload under `xid` and return its uid
    pub fn insert(&self, xid: Xid, data: &[u8]) -> Result<Uid> {
        let raw = item::wrap_raw(data);
        if raw.len() > data_page::MAX_FREE_SPACE {
            return Err(StorageError::DataTooLarge {
                size: raw.len(),
                max: data_page::MAX_FREE_SPACE,
            });
        }

        for _ in 0..INSERT_ATTEMPTS {
            let info = match self.free_space.select(raw.len()) {
                Some(info) => info,
                None => {
                    let page_id = self.pool.new_page(&data_page::init_raw())?;
                    self.free_space.add(page_id, data_page::MAX_FREE_SPACE);
                    continue;
                }
            };

            let page = match self.pool.get_page(info.page_id) {
                Ok(page) => page,
                Err(e) => {
                    self.free_space.add(info.page_id, info.free_space);
                    return Err(e);
                }
            };

            let appended = self.append(xid, &page, &raw);

            // the page goes back into the index whether or not the insert landed
            let free = data_page::free_space(&page.lock());
            self.free_space.add(page.id(), free);
            self.pool.release(&page)?;

            if let Some(offset) = appended? {
                return Ok(Uid::from_address(page.id(), offset));
            }
        }
        Err(StorageError::DatabaseBusy)
    }

    /// Log and write `raw` at the page's free-space offset. `None` if the
    /// page turns out to be too full; nothing is logged then.
    fn append(&self, xid: Xid, page: &Page, raw: &[u8]) -> Result<Option<u16>> {
        let mut buf = page.lock_mut();
        if data_page::free_space(&buf) < raw.len() {
            return Ok(None);
        }
        let offset = data_page::free_space_offset(&buf);
        self.wal
            .log(&LogRecord::encode_insert(xid, page.id(), offset, raw))?;
        Ok(Some(data_page::insert(&mut buf, raw)))
    }

    /// Flush everything and stamp a clean shutdown
    pub fn close(&self) -> Result<()> {
        self.items.close()?;
        self.wal.close()?;

        validity::set_close(&self.validity_page);
        self.pool.flush_page(&self.validity_page)?;
        self.pool.release(&self.validity_page)?;
        self.pool.close()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{PAGE_SIZE, SUPER_XID};
    use std::fs;
    use std::path::PathBuf;
    use std::sync::Barrier;
    use std::thread;
    use tempfile::{tempdir, TempDir};

    const MEMORY: u64 = 64 * PAGE_SIZE as u64;

    struct Files {
        _dir: TempDir,
        db: PathBuf,
        log: PathBuf,
        xid: PathBuf,
    }

    fn files() -> Files {
        let dir = tempdir().unwrap();
        let base = dir.path().join("test");
        Files {
            db: base.with_extension("db"),
            log: base.with_extension("log"),
            xid: base.with_extension("xid"),
            _dir: dir,
        }
    }

    fn read_vec(dm: &DataManager, uid: Uid) -> Result<Option<Vec<u8>>> {
        Ok(match dm.read(uid)? {
            Some(item) => {
                let data = item.data();
                dm.release(&item)?;
                Some(data)
            }
            None => None,
        })
    }

    fn update(dm: &DataManager, xid: Xid, uid: Uid, payload: &[u8]) -> Result<()> {
        let item = dm.read(uid)?.unwrap();
        let mut mutation = item.before();
        mutation.payload_mut().copy_from_slice(payload);
        mutation.after(xid)?;
        dm.release(&item)
    }

    fn copy_files(from: &Files, to: &Files) -> Result<()> {
        fs::copy(&from.db, &to.db)?;
        fs::copy(&from.log, &to.log)?;
        fs::copy(&from.xid, &to.xid)?;
        Ok(())
    }

    fn page_bytes(path: &Path) -> Result<Vec<u8>> {
        let bytes = fs::read(path)?;
        // page 1 carries random validity stamps
        Ok(bytes[PAGE_SIZE.min(bytes.len())..].to_vec())
    }

    #[test]
    fn test_insert_and_read() -> Result<()> {
        let f = files();
        let dm = DataManager::create(&f.db, &f.log, MEMORY)?;

        let uid = dm.insert(SUPER_XID, b"hello")?;
        assert_eq!(uid.page_id(), PageId::FIRST_DATA);
        assert_eq!(uid.offset(), 2);
        assert_eq!(read_vec(&dm, uid)?, Some(b"hello".to_vec()));

        let second = dm.insert(SUPER_XID, b"world")?;
        assert_eq!(second.page_id(), PageId::FIRST_DATA);
        assert_eq!(second.offset(), 2 + 3 + 5);
        dm.close()?;
        Ok(())
    }

    #[test]
    fn test_data_too_large() -> Result<()> {
        let f = files();
        let dm = DataManager::create(&f.db, &f.log, MEMORY)?;

        let big = vec![7u8; data_page::MAX_FREE_SPACE];
        assert!(matches!(
            dm.insert(SUPER_XID, &big),
            Err(StorageError::DataTooLarge { .. })
        ));

        // exactly one page worth of record fits
        let fits = vec![7u8; data_page::MAX_FREE_SPACE - 3];
        let uid = dm.insert(SUPER_XID, &fits)?;
        assert_eq!(read_vec(&dm, uid)?.map(|v| v.len()), Some(fits.len()));
        Ok(())
    }

    #[test]
    fn test_near_full_record_takes_a_fresh_page() -> Result<()> {
        let f = files();
        let ledger = TransactionLedger::create(&f.xid)?;
        let big = vec![1u8; 8184];

        let (small_uid, big_uid) = {
            let dm = DataManager::create(&f.db, &f.log, MEMORY)?;
            let small_uid = dm.insert(SUPER_XID, b"x")?;
            // the first page sits in the top bucket but lacks room for this
            let big_uid = dm.insert(SUPER_XID, &big)?;
            assert_ne!(big_uid.page_id(), small_uid.page_id());
            assert_eq!(big_uid.offset(), 2);
            assert_eq!(read_vec(&dm, big_uid)?, Some(big.clone()));
            (small_uid, big_uid)
        };

        let dm = DataManager::open(&f.db, &f.log, MEMORY, &ledger, InsertRedo::Standard)?;
        assert_eq!(read_vec(&dm, small_uid)?, Some(b"x".to_vec()));
        assert_eq!(read_vec(&dm, big_uid)?, Some(big));
        dm.close()?;
        Ok(())
    }

    #[test]
    fn test_clean_reopen() -> Result<()> {
        let f = files();
        let ledger = TransactionLedger::create(&f.xid)?;

        let uid = {
            let dm = DataManager::create(&f.db, &f.log, MEMORY)?;
            let uid = dm.insert(SUPER_XID, b"durable")?;
            dm.close()?;
            uid
        };

        let dm = DataManager::open(&f.db, &f.log, MEMORY, &ledger, InsertRedo::Standard)?;
        assert_eq!(read_vec(&dm, uid)?, Some(b"durable".to_vec()));

        // free space survived the restart, so the next insert shares the page
        let next = dm.insert(SUPER_XID, b"more")?;
        assert_eq!(next.page_id(), uid.page_id());
        dm.close()?;
        Ok(())
    }

    #[test]
    fn test_concurrent_inserts() -> Result<()> {
        const THREADS: usize = 4;
        const PER_THREAD: usize = 50;

        let f = files();
        let dm = Arc::new(DataManager::create(&f.db, &f.log, MEMORY)?);
        let barrier = Arc::new(Barrier::new(THREADS));

        let handles: Vec<_> = (0..THREADS)
            .map(|t| {
                let dm = Arc::clone(&dm);
                let barrier = Arc::clone(&barrier);
                thread::spawn(move || -> Result<Vec<(Uid, Vec<u8>)>> {
                    barrier.wait();
                    (0..PER_THREAD)
                        .map(|i| {
                            let payload = format!("thread-{}-row-{:04}", t, i).into_bytes();
                            Ok((dm.insert(SUPER_XID, &payload)?, payload))
                        })
                        .collect()
                })
            })
            .collect();

        let mut rows = Vec::new();
        for handle in handles {
            rows.extend(handle.join().unwrap()?);
        }

        let mut uids: Vec<Uid> = rows.iter().map(|(uid, _)| *uid).collect();
        uids.sort();
        uids.dedup();
        assert_eq!(uids.len(), THREADS * PER_THREAD);

        for (uid, payload) in rows {
            assert_eq!(read_vec(&dm, uid)?, Some(payload));
        }
        Ok(())
    }

    #[test]
    fn test_recovery_redo_and_undo() -> Result<()> {
        let f = files();
        let ledger = TransactionLedger::create(&f.xid)?;
        let committed = ledger.begin()?;
        let unfinished = ledger.begin()?;

        let (kept, changed, withdrawn) = {
            let dm = DataManager::create(&f.db, &f.log, MEMORY)?;
            let kept = dm.insert(committed, b"kept")?;
            let changed = dm.insert(SUPER_XID, b"aaaa")?;
            update(&dm, committed, changed, b"bbbb")?;
            update(&dm, unfinished, changed, b"cccc")?;
            let withdrawn = dm.insert(unfinished, b"gone")?;
            ledger.commit(committed)?;
            // dropped without close: dirty pages never reach disk
            (kept, changed, withdrawn)
        };

        let dm = DataManager::open(&f.db, &f.log, MEMORY, &ledger, InsertRedo::Standard)?;
        assert_eq!(read_vec(&dm, kept)?, Some(b"kept".to_vec()));
        assert_eq!(read_vec(&dm, changed)?, Some(b"bbbb".to_vec()));
        assert_eq!(read_vec(&dm, withdrawn)?, None);
        assert!(ledger.is_aborted(unfinished)?);
        dm.close()?;
        Ok(())
    }

    #[test]
    fn test_recovery_is_deterministic() -> Result<()> {
        let crashed = files();
        {
            let ledger = TransactionLedger::create(&crashed.xid)?;
            let committed = ledger.begin()?;
            let unfinished = ledger.begin()?;
            let dm = DataManager::create(&crashed.db, &crashed.log, MEMORY)?;
            let uid = dm.insert(committed, b"row-1")?;
            dm.insert(unfinished, b"row-2")?;
            update(&dm, unfinished, uid, b"row-X")?;
            ledger.commit(committed)?;
        }

        let mut results = Vec::new();
        for _ in 0..2 {
            let run = files();
            copy_files(&crashed, &run)?;
            let ledger = TransactionLedger::open(&run.xid)?;
            let dm = DataManager::open(&run.db, &run.log, MEMORY, &ledger, InsertRedo::Standard)?;
            dm.close()?;
            results.push(page_bytes(&run.db)?);
        }
        assert_eq!(results[0], results[1]);
        Ok(())
    }

    #[test]
    fn test_recovery_after_repeated_crash() -> Result<()> {
        let f = files();
        let ledger = TransactionLedger::create(&f.xid)?;
        let xid = ledger.begin()?;

        let uid = {
            let dm = DataManager::create(&f.db, &f.log, MEMORY)?;
            let uid = dm.insert(xid, b"first")?;
            ledger.commit(xid)?;
            uid
        };

        // crash again straight after recovering
        {
            let dm = DataManager::open(&f.db, &f.log, MEMORY, &ledger, InsertRedo::Standard)?;
            assert_eq!(read_vec(&dm, uid)?, Some(b"first".to_vec()));
        }

        let dm = DataManager::open(&f.db, &f.log, MEMORY, &ledger, InsertRedo::Standard)?;
        assert_eq!(read_vec(&dm, uid)?, Some(b"first".to_vec()));
        dm.close()?;
        Ok(())
    }

    #[test]
    fn test_recovery_truncates_unlogged_pages() -> Result<()> {
        let f = files();
        let ledger = TransactionLedger::create(&f.xid)?;

        {
            let dm = DataManager::create(&f.db, &f.log, MEMORY)?;
            dm.insert(SUPER_XID, b"row")?;
            // allocated and durable, but no log record mentions it
            dm.pool.new_page(&data_page::init_raw())?;
            assert_eq!(dm.pool.page_count(), 3);
        }

        let dm = DataManager::open(&f.db, &f.log, MEMORY, &ledger, InsertRedo::Standard)?;
        assert_eq!(dm.pool.page_count(), 2);
        dm.close()?;
        Ok(())
    }

    #[test]
    fn test_legacy_insert_redo_withdraws_rows() -> Result<()> {
        let f = files();
        let ledger = TransactionLedger::create(&f.xid)?;
        let xid = ledger.begin()?;

        let uid = {
            let dm = DataManager::create(&f.db, &f.log, MEMORY)?;
            let uid = dm.insert(xid, b"replayed")?;
            ledger.commit(xid)?;
            uid
        };

        let dm = DataManager::open(&f.db, &f.log, MEMORY, &ledger, InsertRedo::Legacy)?;
        assert_eq!(read_vec(&dm, uid)?, None);
        dm.close()?;
        Ok(())
    }
}
