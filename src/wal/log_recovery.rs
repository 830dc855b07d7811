use std::collections::HashMap;
use std::sync::Arc;

use tracing::debug;

use crate::buffer::{BufferPoolManager, WritePageGuard};
use crate::common::{Lsn, PageId, QuarryError, Result, TxnId, INVALID_LSN, PAGE_SIZE};
use crate::storage::disk::DiskManager;
use crate::storage::page::TablePage;

use super::{LogPayload, LogRecord, LogRecordType};

/// LogRecovery replays the write-ahead log after a crash: a forward redo
/// pass reapplies every effect missing from the data pages, then a backward
/// undo pass reverts the transactions that never reached COMMIT or ABORT.
/// Runs on a quiescent engine with logging disabled.
pub struct LogRecovery {
    disk_manager: Arc<DiskManager>,
    buffer_pool: Arc<BufferPoolManager>,
    /// Latest LSN seen per transaction still in flight at end of log
    active_txns: HashMap<TxnId, Lsn>,
    /// Byte offset of every record in the loaded log image
    lsn_offsets: HashMap<Lsn, usize>,
    log: Vec<u8>,
}

impl LogRecovery {
    pub fn new(disk_manager: Arc<DiskManager>, buffer_pool: Arc<BufferPoolManager>) -> Self {
        Self {
            disk_manager,
            buffer_pool,
            active_txns: HashMap::new(),
            lsn_offsets: HashMap::new(),
            log: Vec::new(),
        }
    }

    /// Full crash recovery: redo, undo, then write every page back.
    pub fn recover(&mut self) -> Result<()> {
        self.redo()?;
        self.undo()?;
        self.buffer_pool.flush_all_dirty_pages()
    }

    fn load_log(&mut self) -> Result<()> {
        self.log.clear();
        let mut offset = 0u64;
        let mut chunk = vec![0u8; 8 * PAGE_SIZE];
        while self.disk_manager.read_log(&mut chunk, offset)? {
            self.log.extend_from_slice(&chunk);
            offset += chunk.len() as u64;
        }
        Ok(())
    }

    /// Scans the log forward, reapplying any record whose effect did not
    /// reach the data file before the crash (page LSN older than record
    /// LSN) and tracking which transactions never terminated.
    pub fn redo(&mut self) -> Result<()> {
        self.load_log()?;

        let mut offset = 0usize;
        while let Some(record) = LogRecord::deserialize(&self.log[offset..]) {
            self.lsn_offsets.insert(record.lsn, offset);
            offset += record.size as usize;

            match record.record_type {
                LogRecordType::Begin => {
                    self.active_txns.insert(record.txn_id, record.lsn);
                }
                LogRecordType::Commit | LogRecordType::Abort => {
                    self.active_txns.remove(&record.txn_id);
                }
                _ => {
                    self.active_txns.insert(record.txn_id, record.lsn);
                    self.redo_record(&record)?;
                }
            }
        }

        debug!(
            records_to = offset,
            in_flight = self.active_txns.len(),
            "redo pass complete"
        );
        Ok(())
    }

    fn redo_record(&self, record: &LogRecord) -> Result<()> {
        match &record.payload {
            LogPayload::Data { rid, tuple } => {
                let mut guard = self.buffer_pool.fetch_page_write(rid.page_id)?;
                let mut page = TablePage::new(guard.data_mut());
                if page.lsn() >= record.lsn {
                    return Ok(());
                }
                match record.record_type {
                    LogRecordType::Insert => {
                        // The page is in its pre-insert state, so the slot
                        // choice replays deterministically.
                        let new_rid = page.insert_tuple(tuple)?;
                        if new_rid != *rid {
                            return Err(QuarryError::Corruption(format!(
                                "redo insert landed at {} instead of {}",
                                new_rid, rid
                            )));
                        }
                    }
                    LogRecordType::MarkDelete => page.mark_delete(*rid)?,
                    LogRecordType::ApplyDelete => page.apply_delete(*rid)?,
                    LogRecordType::RollbackDelete => page.rollback_delete(*rid)?,
                    _ => unreachable!("data payload with non-data record type"),
                }
                page.set_lsn(record.lsn);
            }
            LogPayload::Update { rid, new_tuple, .. } => {
                let mut guard = self.buffer_pool.fetch_page_write(rid.page_id)?;
                let mut page = TablePage::new(guard.data_mut());
                if page.lsn() >= record.lsn {
                    return Ok(());
                }
                page.update_tuple(*rid, new_tuple)?;
                page.set_lsn(record.lsn);
            }
            LogPayload::NewPage {
                prev_page_id,
                page_id,
            } => {
                self.disk_manager.ensure_allocated(*page_id);
                let mut guard = self.fetch_or_install(*page_id)?;
                {
                    let mut page = TablePage::new(guard.data_mut());
                    if page.lsn() < record.lsn {
                        page.init(*page_id, *prev_page_id);
                        page.set_lsn(record.lsn);
                    }
                }
                drop(guard);

                if let Some(prev_id) = prev_page_id {
                    let mut prev_guard = self.buffer_pool.fetch_page_write(*prev_id)?;
                    let mut prev_page = TablePage::new(prev_guard.data_mut());
                    if prev_page.next_page_id() != Some(*page_id) {
                        prev_page.set_next_page_id(Some(*page_id));
                    }
                }
            }
            LogPayload::Txn => {}
        }
        Ok(())
    }

    /// Walks every unfinished transaction's prev-LSN chain backwards,
    /// reverting its effects.
    pub fn undo(&mut self) -> Result<()> {
        for (&txn_id, &last_lsn) in &self.active_txns {
            debug!(txn = %txn_id, "undoing unfinished transaction");

            let mut lsn = last_lsn;
            while lsn != INVALID_LSN {
                let offset = *self.lsn_offsets.get(&lsn).ok_or_else(|| {
                    QuarryError::Corruption(format!("undo chain references unknown LSN {}", lsn))
                })?;
                let record = LogRecord::deserialize(&self.log[offset..]).ok_or_else(|| {
                    QuarryError::Corruption(format!("unreadable log record at LSN {}", lsn))
                })?;

                match (&record.record_type, &record.payload) {
                    (LogRecordType::Insert, LogPayload::Data { rid, .. }) => {
                        let mut guard = self.buffer_pool.fetch_page_write(rid.page_id)?;
                        TablePage::new(guard.data_mut()).apply_delete(*rid)?;
                    }
                    (LogRecordType::MarkDelete, LogPayload::Data { rid, .. }) => {
                        let mut guard = self.buffer_pool.fetch_page_write(rid.page_id)?;
                        TablePage::new(guard.data_mut()).rollback_delete(*rid)?;
                    }
                    (LogRecordType::RollbackDelete, LogPayload::Data { rid, .. }) => {
                        let mut guard = self.buffer_pool.fetch_page_write(rid.page_id)?;
                        TablePage::new(guard.data_mut()).mark_delete(*rid)?;
                    }
                    (LogRecordType::ApplyDelete, LogPayload::Data { rid, tuple }) => {
                        let mut guard = self.buffer_pool.fetch_page_write(rid.page_id)?;
                        // The slot was freed by the apply-delete, so the
                        // re-insert reclaims it deterministically.
                        let new_rid = TablePage::new(guard.data_mut()).insert_tuple(tuple)?;
                        if new_rid != *rid {
                            return Err(QuarryError::Corruption(format!(
                                "undo of apply-delete landed at {} instead of {}",
                                new_rid, rid
                            )));
                        }
                    }
                    (LogRecordType::Update, LogPayload::Update { rid, old_tuple, .. }) => {
                        let mut guard = self.buffer_pool.fetch_page_write(rid.page_id)?;
                        TablePage::new(guard.data_mut()).update_tuple(*rid, old_tuple)?;
                    }
                    _ => {}
                }

                lsn = record.prev_lsn;
            }
        }

        self.active_txns.clear();
        Ok(())
    }

    fn fetch_or_install(&self, page_id: PageId) -> Result<WritePageGuard> {
        match self.buffer_pool.fetch_page_write(page_id) {
            Ok(guard) => Ok(guard),
            Err(QuarryError::Io(_)) => self.buffer_pool.install_zeroed_page(page_id),
            Err(e) => Err(e),
        }
    }
}
