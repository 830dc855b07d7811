use std::collections::HashMap;

use parking_lot::{Condvar, Mutex};
use tracing::debug;

use crate::common::{QuarryError, RecordId, Result, TxnId};

use super::{Transaction, TransactionState};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum LockMode {
    Shared,
    Exclusive,
}

#[derive(Debug, Clone, Copy)]
struct Request {
    txn_id: TxnId,
    mode: LockMode,
    granted: bool,
}

/// Per-RID wait list. Requests are kept in arrival order (upgrades are
/// repositioned); `oldest` is the smallest transaction id that has ever
/// queued here and anchors the wait-die decision.
struct LockQueue {
    queue: Vec<Request>,
    exclusive_count: usize,
    oldest: TxnId,
}

impl LockQueue {
    fn new(oldest: TxnId) -> Self {
        Self {
            queue: Vec::new(),
            exclusive_count: 0,
            oldest,
        }
    }

    fn position_of(&self, txn_id: TxnId) -> Option<usize> {
        self.queue.iter().position(|r| r.txn_id == txn_id)
    }
}

/// Tuple-level lock manager implementing strict two-phase locking with
/// wait-die deadlock prevention. A request dies when an exclusive request
/// is already queued on the RID and the requester is younger than the
/// oldest transaction that ever touched it; the victim is marked ABORTED
/// before the call returns. One mutex and one condition variable cover the
/// whole table, as conflicts funnel through the same wait lists anyway.
pub struct LockManager {
    strict: bool,
    table: Mutex<HashMap<RecordId, LockQueue>>,
    cond: Condvar,
}

impl LockManager {
    /// Creates a strict-2PL lock manager (locks release only at
    /// commit/abort).
    pub fn new() -> Self {
        Self::with_strictness(true)
    }

    /// Non-strict mode transitions the transaction to SHRINKING on its
    /// first unlock instead of rejecting early release.
    pub fn with_strictness(strict: bool) -> Self {
        Self {
            strict,
            table: Mutex::new(HashMap::new()),
            cond: Condvar::new(),
        }
    }

    /// Acquires a shared lock, blocking until every earlier request on the
    /// RID is a granted share.
    pub fn lock_shared(&self, txn: &Transaction, rid: RecordId) -> Result<()> {
        let mut table = self.table.lock();
        self.admission_check(txn)?;

        let entry = table
            .entry(rid)
            .or_insert_with(|| LockQueue::new(txn.id()));

        // Wait-die: a share arriving behind a queued exclusive dies unless
        // it is the oldest to ever queue here.
        if entry.exclusive_count > 0 && txn.id() > entry.oldest {
            txn.set_state(TransactionState::Aborted);
            debug!(txn = %txn.id(), %rid, "wait-die killed shared request");
            return Err(QuarryError::TxnAborted(txn.id()));
        }
        if txn.id() < entry.oldest {
            entry.oldest = txn.id();
        }
        entry.queue.push(Request {
            txn_id: txn.id(),
            mode: LockMode::Shared,
            granted: false,
        });

        loop {
            let entry = table.get_mut(&rid).expect("wait list vanished");
            let my_pos = entry.position_of(txn.id()).expect("request vanished");
            let ready = entry.queue[..my_pos]
                .iter()
                .all(|r| r.mode == LockMode::Shared && r.granted);
            if ready {
                entry.queue[my_pos].granted = true;
                break;
            }
            self.cond.wait(&mut table);
        }

        txn.add_shared_lock(rid);
        self.cond.notify_all();
        Ok(())
    }

    /// Acquires an exclusive lock, blocking until the request heads the
    /// wait list.
    pub fn lock_exclusive(&self, txn: &Transaction, rid: RecordId) -> Result<()> {
        let mut table = self.table.lock();
        self.admission_check(txn)?;

        let entry = table
            .entry(rid)
            .or_insert_with(|| LockQueue::new(txn.id()));

        if entry.exclusive_count > 0 && txn.id() > entry.oldest {
            txn.set_state(TransactionState::Aborted);
            debug!(txn = %txn.id(), %rid, "wait-die killed exclusive request");
            return Err(QuarryError::TxnAborted(txn.id()));
        }
        if txn.id() < entry.oldest {
            entry.oldest = txn.id();
        }
        entry.queue.push(Request {
            txn_id: txn.id(),
            mode: LockMode::Exclusive,
            granted: false,
        });
        entry.exclusive_count += 1;

        loop {
            let entry = table.get_mut(&rid).expect("wait list vanished");
            if entry.queue[0].txn_id == txn.id() {
                entry.queue[0].granted = true;
                break;
            }
            self.cond.wait(&mut table);
        }

        txn.add_exclusive_lock(rid);
        Ok(())
    }

    /// Converts a held shared lock into an exclusive one without releasing
    /// it, so a read-then-write transaction cannot deadlock itself. The
    /// request is relocated just before the first queued exclusive and
    /// waits to reach the head of the list.
    pub fn lock_upgrade(&self, txn: &Transaction, rid: RecordId) -> Result<()> {
        let mut table = self.table.lock();
        self.admission_check(txn)?;

        {
            let entry = table.get_mut(&rid).ok_or_else(|| {
                QuarryError::Corruption(format!("upgrade on unlocked rid {}", rid))
            })?;
            let src = entry
                .position_of(txn.id())
                .ok_or_else(|| QuarryError::Corruption(format!("upgrade without a share on {}", rid)))?;
            let tgt = entry.queue[src..]
                .iter()
                .position(|r| r.mode == LockMode::Exclusive)
                .map(|i| src + i)
                .unwrap_or(entry.queue.len());

            // Wait-die against everything that will sit ahead of us.
            if entry.queue[..tgt]
                .iter()
                .any(|r| r.txn_id < txn.id())
            {
                txn.set_state(TransactionState::Aborted);
                debug!(txn = %txn.id(), %rid, "wait-die killed upgrade");
                return Err(QuarryError::TxnAborted(txn.id()));
            }

            let mut request = entry.queue.remove(src);
            request.mode = LockMode::Exclusive;
            request.granted = false;
            // `tgt` already accounts for the removal: every index left of it
            // shifted by at most the removed slot.
            entry.queue.insert(tgt - 1, request);
            entry.exclusive_count += 1;
        }

        loop {
            let entry = table.get_mut(&rid).expect("wait list vanished");
            if entry.queue[0].txn_id == txn.id() {
                entry.queue[0].granted = true;
                break;
            }
            self.cond.wait(&mut table);
        }

        txn.promote_lock(rid);
        Ok(())
    }

    /// Releases a lock. Under strict 2PL only terminated transactions may
    /// unlock; otherwise the first unlock moves the transaction to
    /// SHRINKING.
    pub fn unlock(&self, txn: &Transaction, rid: RecordId) -> Result<()> {
        let mut table = self.table.lock();

        if self.strict {
            if !matches!(
                txn.state(),
                TransactionState::Committed | TransactionState::Aborted
            ) {
                txn.set_state(TransactionState::Aborted);
                return Err(QuarryError::TxnAborted(txn.id()));
            }
        } else if txn.state() == TransactionState::Growing {
            txn.set_state(TransactionState::Shrinking);
        }

        if let Some(entry) = table.get_mut(&rid) {
            if let Some(pos) = entry.position_of(txn.id()) {
                let removed = entry.queue.remove(pos);
                if removed.mode == LockMode::Exclusive {
                    entry.exclusive_count -= 1;
                }
                if pos == 0 || removed.mode == LockMode::Exclusive {
                    self.cond.notify_all();
                }
            }
        }

        txn.remove_lock(rid);
        Ok(())
    }

    fn admission_check(&self, txn: &Transaction) -> Result<()> {
        match txn.state() {
            TransactionState::Aborted => Err(QuarryError::TxnAborted(txn.id())),
            TransactionState::Growing => Ok(()),
            _ => {
                // 2PL admits new locks only in the growing phase
                txn.set_state(TransactionState::Aborted);
                Err(QuarryError::TxnAborted(txn.id()))
            }
        }
    }
}

impl Default for LockManager {
    fn default() -> Self {
        Self::new()
    }
}
