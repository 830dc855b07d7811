use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::Duration;

use crossbeam_channel::{bounded, RecvTimeoutError, Sender};
use parking_lot::{Condvar, Mutex};
use tracing::{debug, warn};

use crate::common::{Lsn, INVALID_LSN, LOG_TIMEOUT, PAGE_SIZE};
use crate::storage::disk::DiskManager;

use super::LogRecord;

enum FlushMessage {
    Flush,
    Shutdown,
}

struct LogBuffers {
    /// Buffer appenders serialize into
    active: Vec<u8>,
    /// The second buffer, parked here between flush rounds
    standby: Option<Vec<u8>>,
    /// Highest LSN sitting in the active buffer
    highest_lsn: Lsn,
}

/// LogManager maintains the append-only write-ahead log: records are
/// serialized into one of two in-memory buffers, and a background thread
/// swaps buffers and writes the full one out, driven by a timer, by
/// appenders running out of space, and by explicit flush demands from
/// commit/abort and the buffer pool's eviction path.
pub struct LogManager {
    disk_manager: Arc<DiskManager>,
    /// Capacity of each of the two log buffers
    capacity: usize,
    /// When false the whole subsystem is a no-op and the engine runs
    /// without durability
    enabled: AtomicBool,
    /// Next LSN to hand out; the first real record gets LSN 1
    next_lsn: AtomicU32,
    /// Highest LSN known to have reached stable storage
    persistent_lsn: AtomicU32,
    buffers: Mutex<LogBuffers>,
    /// Serialises flush rounds so batches reach the file in LSN order
    flush_latch: Mutex<()>,
    /// Signalled when a flush round frees the active buffer
    buffer_cond: Condvar,
    /// Pairs with `flush_cond` for flush-completion waits
    sync_latch: Mutex<()>,
    flush_cond: Condvar,
    wake_tx: Mutex<Option<Sender<FlushMessage>>>,
    flush_thread: Mutex<Option<JoinHandle<()>>>,
}

impl LogManager {
    pub fn new(disk_manager: Arc<DiskManager>, pool_size: usize) -> Self {
        let capacity = (pool_size + 1) * PAGE_SIZE;
        Self {
            disk_manager,
            capacity,
            enabled: AtomicBool::new(false),
            next_lsn: AtomicU32::new(1),
            persistent_lsn: AtomicU32::new(INVALID_LSN),
            buffers: Mutex::new(LogBuffers {
                active: Vec::with_capacity(capacity),
                standby: Some(Vec::with_capacity(capacity)),
                highest_lsn: INVALID_LSN,
            }),
            flush_latch: Mutex::new(()),
            buffer_cond: Condvar::new(),
            sync_latch: Mutex::new(()),
            flush_cond: Condvar::new(),
            wake_tx: Mutex::new(None),
            flush_thread: Mutex::new(None),
        }
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled.load(Ordering::Acquire)
    }

    pub fn persistent_lsn(&self) -> Lsn {
        self.persistent_lsn.load(Ordering::Acquire)
    }

    /// LSN of the most recently appended record.
    pub fn last_lsn(&self) -> Lsn {
        self.next_lsn.load(Ordering::Acquire) - 1
    }

    /// Starts the background flush thread and enables logging.
    pub fn run_flush_thread(self: &Arc<Self>) {
        let mut thread = self.flush_thread.lock();
        if thread.is_some() {
            return;
        }

        let (tx, rx) = bounded::<FlushMessage>(64);
        *self.wake_tx.lock() = Some(tx);
        self.enabled.store(true, Ordering::Release);

        let manager = Arc::clone(self);
        *thread = Some(std::thread::spawn(move || loop {
            match rx.recv_timeout(LOG_TIMEOUT) {
                Ok(FlushMessage::Flush) | Err(RecvTimeoutError::Timeout) => {
                    manager.flush_round();
                }
                Ok(FlushMessage::Shutdown) | Err(RecvTimeoutError::Disconnected) => {
                    // Drain whatever is still buffered before exiting
                    manager.flush_round();
                    break;
                }
            }
        }));
    }

    /// Disables logging and joins the flush thread after a final flush.
    pub fn stop_flush_thread(&self) {
        let handle = {
            let mut thread = self.flush_thread.lock();
            let Some(handle) = thread.take() else {
                return;
            };
            if let Some(tx) = self.wake_tx.lock().take() {
                let _ = tx.send(FlushMessage::Shutdown);
            }
            handle
        };
        let _ = handle.join();
        self.enabled.store(false, Ordering::Release);
    }

    /// Serializes a record into the active buffer, assigns it the next LSN
    /// (written back into the record) and returns that LSN. When the buffer
    /// cannot take the record, the flush thread is woken and the appender
    /// waits for the swap. No-op returning INVALID_LSN while disabled.
    pub fn append(&self, record: &mut LogRecord) -> Lsn {
        if !self.is_enabled() {
            return INVALID_LSN;
        }

        let size = record.serialized_size();
        assert!(size <= self.capacity, "log record exceeds the log buffer");

        let mut buffers = self.buffers.lock();
        while buffers.active.len() + size > self.capacity {
            self.request_flush();
            self.buffer_cond.wait(&mut buffers);
        }

        let lsn = self.next_lsn.fetch_add(1, Ordering::SeqCst);
        record.lsn = lsn;
        record.serialize_into(&mut buffers.active);
        buffers.highest_lsn = lsn;
        lsn
    }

    /// Blocks until every record up to `lsn` is on stable storage. Used by
    /// commit/abort (group commit) and by the buffer pool before writing
    /// back a page whose LSN is not yet covered.
    pub fn flush_until(&self, lsn: Lsn) {
        if !self.is_enabled() || lsn == INVALID_LSN {
            return;
        }
        let target = lsn.min(self.last_lsn());

        let mut sync = self.sync_latch.lock();
        while self.persistent_lsn() < target {
            self.request_flush();
            let _ = self
                .flush_cond
                .wait_for(&mut sync, Duration::from_millis(50));
        }
    }

    /// Forces one flush round from the calling thread. Useful when the
    /// flush thread is not running (tests, shutdown paths).
    pub fn flush_now(&self) {
        self.flush_round();
    }

    fn request_flush(&self) {
        if let Some(tx) = &*self.wake_tx.lock() {
            let _ = tx.try_send(FlushMessage::Flush);
        }
    }

    /// Swaps the buffers and writes the retired one to disk.
    fn flush_round(&self) {
        let _flush = self.flush_latch.lock();
        let (mut flush_buf, highest) = {
            let mut buffers = self.buffers.lock();
            if buffers.active.is_empty() {
                return;
            }
            let mut flush_buf = buffers
                .standby
                .take()
                .unwrap_or_else(|| Vec::with_capacity(self.capacity));
            std::mem::swap(&mut buffers.active, &mut flush_buf);
            let highest = buffers.highest_lsn;
            self.buffer_cond.notify_all();
            (flush_buf, highest)
        };

        match self.disk_manager.write_log(&flush_buf) {
            Ok(()) => {
                self.persistent_lsn.fetch_max(highest, Ordering::AcqRel);
                debug!(persistent_lsn = highest, "log flush round complete");
            }
            Err(e) => warn!(error = %e, "log flush failed; records remain volatile"),
        }

        flush_buf.clear();
        self.buffers.lock().standby = Some(flush_buf);

        let _sync = self.sync_latch.lock();
        self.flush_cond.notify_all();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::common::{PageId, RecordId, SlotId, TxnId};
    use crate::wal::LogRecordType;

    fn create_log_manager() -> (Arc<LogManager>, tempfile::NamedTempFile) {
        let temp_file = tempfile::NamedTempFile::new().unwrap();
        let dm = Arc::new(DiskManager::new(temp_file.path()).unwrap());
        (Arc::new(LogManager::new(dm, 4)), temp_file)
    }

    #[test]
    fn test_log_manager_disabled_is_noop() {
        let (lm, _temp) = create_log_manager();

        let mut record = LogRecord::txn(TxnId::new(1), INVALID_LSN, LogRecordType::Begin);
        assert_eq!(lm.append(&mut record), INVALID_LSN);
        assert_eq!(lm.persistent_lsn(), INVALID_LSN);
    }

    #[test]
    fn test_log_manager_append_assigns_lsns() {
        let (lm, _temp) = create_log_manager();
        lm.run_flush_thread();

        let mut r1 = LogRecord::txn(TxnId::new(1), INVALID_LSN, LogRecordType::Begin);
        let mut r2 = LogRecord::txn(TxnId::new(2), INVALID_LSN, LogRecordType::Begin);

        assert_eq!(lm.append(&mut r1), 1);
        assert_eq!(r1.lsn, 1);
        assert_eq!(lm.append(&mut r2), 2);

        lm.stop_flush_thread();
    }

    #[test]
    fn test_log_manager_flush_until_advances_persistent_lsn() {
        let (lm, _temp) = create_log_manager();
        lm.run_flush_thread();

        let rid = RecordId::new(PageId::new(1), SlotId::new(0));
        let mut record = LogRecord::data(
            TxnId::new(1),
            INVALID_LSN,
            LogRecordType::Insert,
            rid,
            vec![7u8; 64],
        );
        let lsn = lm.append(&mut record);

        lm.flush_until(lsn);
        assert!(lm.persistent_lsn() >= lsn);

        lm.stop_flush_thread();
    }

    #[test]
    fn test_log_manager_stop_flushes_tail() {
        let (lm, temp) = create_log_manager();
        lm.run_flush_thread();

        let mut record = LogRecord::txn(TxnId::new(1), INVALID_LSN, LogRecordType::Begin);
        let lsn = lm.append(&mut record);
        lm.stop_flush_thread();

        assert!(lm.persistent_lsn() >= lsn);

        let log_path = DiskManager::log_path_for(temp.path());
        let log_size = std::fs::metadata(log_path).unwrap().len();
        assert_eq!(log_size as usize, record.serialized_size());
    }

    #[test]
    fn test_log_manager_group_commit_many_appenders() {
        let (lm, _temp) = create_log_manager();
        lm.run_flush_thread();

        let mut handles = Vec::new();
        for t in 0..4 {
            let lm = Arc::clone(&lm);
            handles.push(std::thread::spawn(move || {
                let mut last = INVALID_LSN;
                for _ in 0..50 {
                    let mut record =
                        LogRecord::txn(TxnId::new(t), INVALID_LSN, LogRecordType::Begin);
                    last = lm.append(&mut record);
                }
                lm.flush_until(last);
                last
            }));
        }

        for handle in handles {
            let last = handle.join().unwrap();
            assert!(lm.persistent_lsn() >= last);
        }

        lm.stop_flush_thread();
    }
}
