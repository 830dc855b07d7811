use std::sync::Arc;

use tracing::debug;

use crate::buffer::BufferPoolManager;
use crate::common::{PageId, QuarryError, RecordId, Result, PAGE_SIZE};
use crate::concurrency::{LockManager, Transaction, TransactionState, WriteOp, WriteRecord};
use crate::storage::page::{TablePage, TablePageRef};
use crate::wal::{LogManager, LogRecord, LogRecordType};

/// Largest tuple a fresh page can take: page minus header and one slot.
const MAX_TUPLE_SIZE: usize = PAGE_SIZE - 24 - 8;

/// TableHeap is a linked list of slotted pages holding one table's tuples.
/// Every operation cooperates with the lock manager (tuple locks under
/// strict 2PL) and the log manager (a record is appended before the page's
/// LSN advances), and records its undo information in the transaction's
/// write set.
pub struct TableHeap {
    buffer_pool: Arc<BufferPoolManager>,
    lock_manager: Arc<LockManager>,
    log_manager: Option<Arc<LogManager>>,
    first_page_id: PageId,
}

impl TableHeap {
    /// Creates a heap with one empty page.
    pub fn new(
        buffer_pool: Arc<BufferPoolManager>,
        lock_manager: Arc<LockManager>,
        log_manager: Option<Arc<LogManager>>,
        txn: &Transaction,
    ) -> Result<Arc<Self>> {
        let mut guard = buffer_pool.new_page()?;
        let first_page_id = guard.page_id();
        TablePage::new(guard.data_mut()).init(first_page_id, None);

        let heap = Arc::new(Self {
            buffer_pool,
            lock_manager,
            log_manager,
            first_page_id,
        });

        if let Some(log_manager) = heap.enabled_log_manager() {
            let mut record = LogRecord::new_page(txn.id(), txn.prev_lsn(), None, first_page_id);
            let lsn = log_manager.append(&mut record);
            txn.set_prev_lsn(lsn);
            guard.set_lsn(lsn);
        }

        Ok(heap)
    }

    /// Reopens a heap whose first page already exists.
    pub fn open(
        buffer_pool: Arc<BufferPoolManager>,
        lock_manager: Arc<LockManager>,
        log_manager: Option<Arc<LogManager>>,
        first_page_id: PageId,
    ) -> Arc<Self> {
        Arc::new(Self {
            buffer_pool,
            lock_manager,
            log_manager,
            first_page_id,
        })
    }

    pub fn first_page_id(&self) -> PageId {
        self.first_page_id
    }

    /// Inserts a tuple into the first page with room, linking a fresh page
    /// at the tail when none has. The new RID is locked exclusively and the
    /// insert recorded in the write set.
    pub fn insert_tuple(self: &Arc<Self>, data: &[u8], txn: &Transaction) -> Result<RecordId> {
        if data.len() > MAX_TUPLE_SIZE {
            return Err(QuarryError::PageOverflow {
                tuple_size: data.len(),
                available: MAX_TUPLE_SIZE,
            });
        }

        let mut page_id = self.first_page_id;
        let rid = loop {
            let mut guard = self.buffer_pool.fetch_page_write(page_id)?;
            let insert_result = {
                let mut page = TablePage::new(guard.data_mut());
                page.insert_tuple(data)
            };

            match insert_result {
                Ok(rid) => {
                    if let Some(log_manager) = self.enabled_log_manager() {
                        let mut record = LogRecord::data(
                            txn.id(),
                            txn.prev_lsn(),
                            LogRecordType::Insert,
                            rid,
                            data.to_vec(),
                        );
                        let lsn = log_manager.append(&mut record);
                        txn.set_prev_lsn(lsn);
                        guard.set_lsn(lsn);
                    }
                    break rid;
                }
                Err(QuarryError::PageOverflow { .. }) => {
                    let next = TablePageRef::new(guard.data()).next_page_id();
                    match next {
                        Some(next_id) => {
                            drop(guard);
                            page_id = next_id;
                        }
                        None => {
                            let new_id = self.append_page(&mut guard, page_id, txn)?;
                            drop(guard);
                            page_id = new_id;
                        }
                    }
                }
                Err(e) => return Err(e),
            }
        };

        self.lock_manager.lock_exclusive(txn, rid)?;
        if txn.state() == TransactionState::Growing {
            txn.push_write_record(WriteRecord::new(
                rid,
                WriteOp::Insert,
                Vec::new(),
                Arc::clone(self),
            ));
        }
        Ok(rid)
    }

    /// Tombstones a tuple. The deletion is deferred: commit makes it
    /// physical via apply_delete, abort reverts it via rollback_delete.
    pub fn mark_delete(self: &Arc<Self>, rid: RecordId, txn: &Transaction) -> Result<()> {
        self.acquire_exclusive(rid, txn)?;

        let mut guard = self.buffer_pool.fetch_page_write(rid.page_id)?;
        let tuple = {
            let mut page = TablePage::new(guard.data_mut());
            let tuple = page.peek_tuple(rid)?;
            page.mark_delete(rid)?;
            tuple
        };

        if let Some(log_manager) = self.enabled_log_manager() {
            let mut record = LogRecord::data(
                txn.id(),
                txn.prev_lsn(),
                LogRecordType::MarkDelete,
                rid,
                tuple,
            );
            let lsn = log_manager.append(&mut record);
            txn.set_prev_lsn(lsn);
            guard.set_lsn(lsn);
        }

        if txn.state() == TransactionState::Growing {
            txn.push_write_record(WriteRecord::new(
                rid,
                WriteOp::Delete,
                Vec::new(),
                Arc::clone(self),
            ));
        }
        Ok(())
    }

    /// Replaces a tuple in place, capturing the old image for undo.
    pub fn update_tuple(
        self: &Arc<Self>,
        rid: RecordId,
        data: &[u8],
        txn: &Transaction,
    ) -> Result<()> {
        self.acquire_exclusive(rid, txn)?;

        let mut guard = self.buffer_pool.fetch_page_write(rid.page_id)?;
        let old_tuple = {
            let mut page = TablePage::new(guard.data_mut());
            page.update_tuple(rid, data)?
        };

        if let Some(log_manager) = self.enabled_log_manager() {
            let mut record = LogRecord::update(
                txn.id(),
                txn.prev_lsn(),
                rid,
                old_tuple.clone(),
                data.to_vec(),
            );
            let lsn = log_manager.append(&mut record);
            txn.set_prev_lsn(lsn);
            guard.set_lsn(lsn);
        }

        if txn.state() == TransactionState::Growing {
            txn.push_write_record(WriteRecord::new(
                rid,
                WriteOp::Update,
                old_tuple,
                Arc::clone(self),
            ));
        }
        Ok(())
    }

    /// Physically reclaims a tuple's slot. Called at commit for tombstones
    /// and at abort to undo inserts; the caller already holds the exclusive
    /// lock, which is released here.
    pub fn apply_delete(&self, rid: RecordId, txn: &Transaction) -> Result<()> {
        debug_assert!(txn.holds_exclusive(rid), "apply_delete without the lock");

        let mut guard = self.buffer_pool.fetch_page_write(rid.page_id)?;
        let tuple = {
            let mut page = TablePage::new(guard.data_mut());
            let tuple = page.peek_tuple(rid)?;
            page.apply_delete(rid)?;
            tuple
        };

        if let Some(log_manager) = self.enabled_log_manager() {
            let mut record = LogRecord::data(
                txn.id(),
                txn.prev_lsn(),
                LogRecordType::ApplyDelete,
                rid,
                tuple,
            );
            let lsn = log_manager.append(&mut record);
            txn.set_prev_lsn(lsn);
            guard.set_lsn(lsn);
        }
        drop(guard);

        self.lock_manager.unlock(txn, rid)?;
        Ok(())
    }

    /// Resurrects a tombstoned tuple when its deleting transaction aborts.
    pub fn rollback_delete(&self, rid: RecordId, txn: &Transaction) -> Result<()> {
        let mut guard = self.buffer_pool.fetch_page_write(rid.page_id)?;
        let tuple = {
            let mut page = TablePage::new(guard.data_mut());
            page.rollback_delete(rid)?;
            page.get_tuple(rid)?
        };

        if let Some(log_manager) = self.enabled_log_manager() {
            let mut record = LogRecord::data(
                txn.id(),
                txn.prev_lsn(),
                LogRecordType::RollbackDelete,
                rid,
                tuple,
            );
            let lsn = log_manager.append(&mut record);
            txn.set_prev_lsn(lsn);
            guard.set_lsn(lsn);
        }
        Ok(())
    }

    /// Copies a tuple out under a shared lock (unless one is already held).
    pub fn get_tuple(&self, rid: RecordId, txn: &Transaction) -> Result<Vec<u8>> {
        if !txn.holds_shared(rid) && !txn.holds_exclusive(rid) {
            self.lock_manager.lock_shared(txn, rid)?;
        }

        let guard = self.buffer_pool.fetch_page_read(rid.page_id)?;
        TablePageRef::new(guard.data()).get_tuple(rid)
    }

    /// Links a fresh page after `tail_id` and returns its id. The caller
    /// holds the tail's write guard, passed in so the next pointer and the
    /// new page are wired under the same latch.
    fn append_page(
        &self,
        tail_guard: &mut crate::buffer::WritePageGuard,
        tail_id: PageId,
        txn: &Transaction,
    ) -> Result<PageId> {
        let mut new_guard = self.buffer_pool.new_page()?;
        let new_id = new_guard.page_id();
        TablePage::new(new_guard.data_mut()).init(new_id, Some(tail_id));

        if let Some(log_manager) = self.enabled_log_manager() {
            let mut record = LogRecord::new_page(txn.id(), txn.prev_lsn(), Some(tail_id), new_id);
            let lsn = log_manager.append(&mut record);
            txn.set_prev_lsn(lsn);
            new_guard.set_lsn(lsn);
        }

        TablePage::new(tail_guard.data_mut()).set_next_page_id(Some(new_id));
        debug!(page = %new_id, "linked new heap page");
        Ok(new_id)
    }

    /// Takes the exclusive tuple lock, upgrading a held share. No-op when
    /// the transaction already holds it (commit/abort undo paths included).
    fn acquire_exclusive(&self, rid: RecordId, txn: &Transaction) -> Result<()> {
        if txn.holds_exclusive(rid) {
            Ok(())
        } else if txn.holds_shared(rid) {
            self.lock_manager.lock_upgrade(txn, rid)
        } else {
            self.lock_manager.lock_exclusive(txn, rid)
        }
    }

    fn enabled_log_manager(&self) -> Option<&Arc<LogManager>> {
        self.log_manager.as_ref().filter(|lm| lm.is_enabled())
    }
}
