use std::path::Path;
use std::sync::Arc;

use crate::buffer::BufferPoolManager;
use crate::common::{PageId, QuarryError, Result, DEFAULT_BUFFER_POOL_SIZE};
use crate::concurrency::{LockManager, Transaction, TransactionManager};
use crate::storage::disk::DiskManager;
use crate::storage::page::HeaderPage;
use crate::table::TableHeap;
use crate::wal::{LogManager, LogRecovery};

/// Page 0 of the database file, mapping object names to root pages.
const HEADER_PAGE_ID: PageId = PageId::new(0);

/// StorageEngine wires the subsystems together behind one explicit handle:
/// disk manager, write-ahead log, buffer pool, lock manager and
/// transaction manager. There is no process-wide state; hosts that need a
/// singleton keep one of these at their extension boundary.
pub struct StorageEngine {
    disk_manager: Arc<DiskManager>,
    log_manager: Arc<LogManager>,
    buffer_pool: Arc<BufferPoolManager>,
    lock_manager: Arc<LockManager>,
    transaction_manager: TransactionManager,
}

impl StorageEngine {
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        Self::open_with_pool_size(path, DEFAULT_BUFFER_POOL_SIZE)
    }

    pub fn open_with_pool_size<P: AsRef<Path>>(path: P, pool_size: usize) -> Result<Self> {
        let disk_manager = Arc::new(DiskManager::new(path)?);
        let log_manager = Arc::new(LogManager::new(Arc::clone(&disk_manager), pool_size));
        let buffer_pool = Arc::new(BufferPoolManager::with_log_manager(
            pool_size,
            Arc::clone(&disk_manager),
            Some(Arc::clone(&log_manager)),
        ));
        let lock_manager = Arc::new(LockManager::new());
        let transaction_manager = TransactionManager::new(
            Arc::clone(&lock_manager),
            Some(Arc::clone(&log_manager)),
        );

        let engine = Self {
            disk_manager,
            log_manager,
            buffer_pool,
            lock_manager,
            transaction_manager,
        };
        engine.ensure_header_page()?;
        Ok(engine)
    }

    /// Replays the write-ahead log (redo then undo). Must run before
    /// logging is enabled, on an otherwise idle engine.
    pub fn recover(&self) -> Result<()> {
        assert!(
            !self.log_manager.is_enabled(),
            "recovery requires logging to be off"
        );
        LogRecovery::new(Arc::clone(&self.disk_manager), Arc::clone(&self.buffer_pool)).recover()
    }

    /// Starts the WAL flush thread; from here on every data operation is
    /// logged and commits wait for durability.
    pub fn enable_logging(&self) {
        self.log_manager.run_flush_thread();
    }

    /// Stops the flush thread and writes all dirty pages back.
    pub fn close(&self) -> Result<()> {
        self.log_manager.stop_flush_thread();
        self.buffer_pool.flush_all_dirty_pages()
    }

    /// Creates a table heap and registers its first page under `name`.
    pub fn create_table(&self, name: &str, txn: &Transaction) -> Result<Arc<TableHeap>> {
        let heap = TableHeap::new(
            Arc::clone(&self.buffer_pool),
            Arc::clone(&self.lock_manager),
            Some(Arc::clone(&self.log_manager)),
            txn,
        )?;

        let mut guard = self.buffer_pool.fetch_page_write(HEADER_PAGE_ID)?;
        HeaderPage::new(guard.data_mut()).insert_record(name, heap.first_page_id())?;
        Ok(heap)
    }

    /// Opens a table registered in the header page.
    pub fn open_table(&self, name: &str) -> Result<Arc<TableHeap>> {
        let first_page_id = {
            let mut guard = self.buffer_pool.fetch_page_write(HEADER_PAGE_ID)?;
            HeaderPage::new(guard.data_mut())
                .get_root_id(name)
                .ok_or_else(|| QuarryError::ObjectNotFound(name.to_string()))?
        };

        Ok(TableHeap::open(
            Arc::clone(&self.buffer_pool),
            Arc::clone(&self.lock_manager),
            Some(Arc::clone(&self.log_manager)),
            first_page_id,
        ))
    }

    pub fn disk_manager(&self) -> &Arc<DiskManager> {
        &self.disk_manager
    }

    pub fn log_manager(&self) -> &Arc<LogManager> {
        &self.log_manager
    }

    pub fn buffer_pool(&self) -> &Arc<BufferPoolManager> {
        &self.buffer_pool
    }

    pub fn lock_manager(&self) -> &Arc<LockManager> {
        &self.lock_manager
    }

    pub fn transaction_manager(&self) -> &TransactionManager {
        &self.transaction_manager
    }

    fn ensure_header_page(&self) -> Result<()> {
        match self.buffer_pool.fetch_page_read(HEADER_PAGE_ID) {
            Ok(_) => Ok(()),
            Err(QuarryError::Io(_)) => {
                let mut guard = self.buffer_pool.new_page()?;
                assert_eq!(
                    guard.page_id(),
                    HEADER_PAGE_ID,
                    "header page must be page 0"
                );
                HeaderPage::new(guard.data_mut()).init();
                Ok(())
            }
            Err(e) => Err(e),
        }
    }
}
