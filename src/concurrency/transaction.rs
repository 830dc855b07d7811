use std::collections::HashSet;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;

use crate::common::{Lsn, RecordId, TxnId, INVALID_LSN};
use crate::table::TableHeap;

/// Transaction states:
///
/// ```text
///     _________________________
///    |                         v
/// GROWING -> SHRINKING -> COMMITTED   ABORTED
///    |__________|________________________^
/// ```
///
/// Under strict 2PL a transaction stays GROWING until commit or abort.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransactionState {
    Growing,
    Shrinking,
    Committed,
    Aborted,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WriteOp {
    Insert,
    Delete,
    Update,
}

/// One entry of a transaction's write set, enough to undo the operation:
/// the RID it touched, what it did, the prior image for updates, and the
/// heap it happened in.
#[derive(Clone)]
pub struct WriteRecord {
    pub rid: RecordId,
    pub op: WriteOp,
    /// Prior tuple image; populated for updates only
    pub old_tuple: Vec<u8>,
    pub table: Arc<TableHeap>,
}

impl WriteRecord {
    pub fn new(rid: RecordId, op: WriteOp, old_tuple: Vec<u8>, table: Arc<TableHeap>) -> Self {
        Self {
            rid,
            op,
            old_tuple,
            table,
        }
    }
}

/// A transaction context threaded through every heap, index and lock call.
/// Interior mutability lets the lock manager, table heap and transaction
/// manager all drive it behind a shared reference.
pub struct Transaction {
    id: TxnId,
    state: Mutex<TransactionState>,
    /// LSN of this transaction's most recent log record
    prev_lsn: AtomicU32,
    /// RIDs this transaction holds shared locks on
    shared_lock_set: Mutex<HashSet<RecordId>>,
    /// RIDs this transaction holds exclusive locks on
    exclusive_lock_set: Mutex<HashSet<RecordId>>,
    /// Undo information, appended in operation order
    write_set: Mutex<Vec<WriteRecord>>,
}

impl Transaction {
    pub fn new(id: TxnId) -> Self {
        Self {
            id,
            state: Mutex::new(TransactionState::Growing),
            prev_lsn: AtomicU32::new(INVALID_LSN),
            shared_lock_set: Mutex::new(HashSet::new()),
            exclusive_lock_set: Mutex::new(HashSet::new()),
            write_set: Mutex::new(Vec::new()),
        }
    }

    pub fn id(&self) -> TxnId {
        self.id
    }

    pub fn state(&self) -> TransactionState {
        *self.state.lock()
    }

    pub fn set_state(&self, state: TransactionState) {
        *self.state.lock() = state;
    }

    pub fn prev_lsn(&self) -> Lsn {
        self.prev_lsn.load(Ordering::Acquire)
    }

    pub fn set_prev_lsn(&self, lsn: Lsn) {
        self.prev_lsn.store(lsn, Ordering::Release);
    }

    pub fn holds_shared(&self, rid: RecordId) -> bool {
        self.shared_lock_set.lock().contains(&rid)
    }

    pub fn holds_exclusive(&self, rid: RecordId) -> bool {
        self.exclusive_lock_set.lock().contains(&rid)
    }

    pub fn add_shared_lock(&self, rid: RecordId) {
        self.shared_lock_set.lock().insert(rid);
    }

    pub fn add_exclusive_lock(&self, rid: RecordId) {
        self.exclusive_lock_set.lock().insert(rid);
    }

    /// Moves a RID from the shared to the exclusive set on lock upgrade.
    pub fn promote_lock(&self, rid: RecordId) {
        self.shared_lock_set.lock().remove(&rid);
        self.exclusive_lock_set.lock().insert(rid);
    }

    pub fn remove_lock(&self, rid: RecordId) {
        self.shared_lock_set.lock().remove(&rid);
        self.exclusive_lock_set.lock().remove(&rid);
    }

    /// Every RID this transaction currently holds a lock on.
    pub fn locked_rids(&self) -> Vec<RecordId> {
        let mut rids: Vec<RecordId> = self.shared_lock_set.lock().iter().copied().collect();
        rids.extend(self.exclusive_lock_set.lock().iter().copied());
        rids
    }

    pub fn push_write_record(&self, record: WriteRecord) {
        self.write_set.lock().push(record);
    }

    /// Pops the most recent write record; commit and abort walk the set
    /// back to front.
    pub fn pop_write_record(&self) -> Option<WriteRecord> {
        self.write_set.lock().pop()
    }

    pub fn write_set_len(&self) -> usize {
        self.write_set.lock().len()
    }
}
