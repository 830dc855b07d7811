use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;

use tracing::debug;

use crate::common::{Result, TxnId};
use crate::wal::{LogManager, LogRecord, LogRecordType};

use super::{LockManager, Transaction, TransactionState, WriteOp};

/// TransactionManager hands out transaction ids and drives termination:
/// commit applies deferred deletions and waits for the COMMIT record to
/// reach stable storage; abort undoes the write set back to front. Both
/// finish by releasing every lock the transaction holds, which is what
/// makes the protocol strict 2PL.
pub struct TransactionManager {
    next_txn_id: AtomicU32,
    lock_manager: Arc<LockManager>,
    log_manager: Option<Arc<LogManager>>,
}

impl TransactionManager {
    pub fn new(lock_manager: Arc<LockManager>, log_manager: Option<Arc<LogManager>>) -> Self {
        Self {
            next_txn_id: AtomicU32::new(1),
            lock_manager,
            log_manager,
        }
    }

    /// Starts a new transaction with the next monotonic id.
    pub fn begin(&self) -> Arc<Transaction> {
        let id = TxnId::new(self.next_txn_id.fetch_add(1, Ordering::SeqCst));
        let txn = Arc::new(Transaction::new(id));

        if let Some(log_manager) = self.enabled_log_manager() {
            let mut record = LogRecord::txn(txn.id(), txn.prev_lsn(), LogRecordType::Begin);
            let lsn = log_manager.append(&mut record);
            txn.set_prev_lsn(lsn);
        }

        txn
    }

    /// Commits: tombstoned deletions become physical, the COMMIT record is
    /// forced to disk, and all locks are released.
    pub fn commit(&self, txn: &Transaction) -> Result<()> {
        txn.set_state(TransactionState::Committed);

        // Deferred deletion happens now, back to front.
        while let Some(record) = txn.pop_write_record() {
            if record.op == WriteOp::Delete {
                record.table.apply_delete(record.rid, txn)?;
            }
        }

        if let Some(log_manager) = self.enabled_log_manager() {
            let mut record = LogRecord::txn(txn.id(), txn.prev_lsn(), LogRecordType::Commit);
            let lsn = log_manager.append(&mut record);
            txn.set_prev_lsn(lsn);

            // A transaction is committed only once all of its records are
            // on stable storage.
            log_manager.flush_until(lsn);
        }

        self.release_all_locks(txn)?;
        debug!(txn = %txn.id(), "committed");
        Ok(())
    }

    /// Aborts: the write set is undone back to front, the ABORT record is
    /// forced to disk, and all locks are released.
    pub fn abort(&self, txn: &Transaction) -> Result<()> {
        txn.set_state(TransactionState::Aborted);

        while let Some(record) = txn.pop_write_record() {
            match record.op {
                WriteOp::Insert => record.table.apply_delete(record.rid, txn)?,
                WriteOp::Delete => record.table.rollback_delete(record.rid, txn)?,
                WriteOp::Update => {
                    record.table.update_tuple(record.rid, &record.old_tuple, txn)?;
                }
            }
        }

        if let Some(log_manager) = self.enabled_log_manager() {
            let mut record = LogRecord::txn(txn.id(), txn.prev_lsn(), LogRecordType::Abort);
            let lsn = log_manager.append(&mut record);
            txn.set_prev_lsn(lsn);
            log_manager.flush_until(lsn);
        }

        self.release_all_locks(txn)?;
        debug!(txn = %txn.id(), "aborted");
        Ok(())
    }

    fn release_all_locks(&self, txn: &Transaction) -> Result<()> {
        for rid in txn.locked_rids() {
            self.lock_manager.unlock(txn, rid)?;
        }
        Ok(())
    }

    fn enabled_log_manager(&self) -> Option<&Arc<LogManager>> {
        self.log_manager.as_ref().filter(|lm| lm.is_enabled())
    }
}
