use std::fs::{File, OpenOptions};
use std::io::{Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};

use parking_lot::Mutex;
use tracing::debug;

use crate::common::{PageId, QuarryError, Result, PAGE_SIZE};

/// DiskManager performs paged I/O against the database file and sequential
/// I/O against the companion log file (database path + ".log").
/// Page ids are allocated monotonically; a page's byte offset in the
/// database file is `page_id * PAGE_SIZE`.
pub struct DiskManager {
    /// Database file handle; the mutex ensures exclusive access to the cursor
    db_file: Mutex<File>,
    /// Log file handle
    log_file: Mutex<File>,
    /// Base path of the database file
    db_path: PathBuf,
    /// Next page id to hand out; never reused
    next_page_id: AtomicU32,
    /// Number of log flushes performed
    num_flushes: AtomicU32,
    /// Whether a log flush is currently in progress
    flushing: AtomicBool,
}

impl DiskManager {
    /// Opens (or creates) the database file and its log file. The next page
    /// id resumes from the current size of the database file.
    pub fn new<P: AsRef<Path>>(db_path: P) -> Result<Self> {
        let db_path = db_path.as_ref().to_path_buf();

        let db_file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(false)
            .open(&db_path)?;

        let log_path = Self::log_path_for(&db_path);
        let log_file = OpenOptions::new()
            .read(true)
            .append(true)
            .create(true)
            .open(&log_path)?;

        let file_size = db_file.metadata()?.len();
        let next_page_id = (file_size / PAGE_SIZE as u64) as u32;

        Ok(Self {
            db_file: Mutex::new(db_file),
            log_file: Mutex::new(log_file),
            db_path,
            next_page_id: AtomicU32::new(next_page_id),
            num_flushes: AtomicU32::new(0),
            flushing: AtomicBool::new(false),
        })
    }

    /// Derives the log file path from the database path ("test.db" -> "test.db.log")
    pub fn log_path_for(db_path: &Path) -> PathBuf {
        let mut path_str = db_path.to_string_lossy().to_string();
        path_str.push_str(".log");
        PathBuf::from(path_str)
    }

    /// Reads a page from disk into the provided buffer. Reading a page that
    /// lies entirely beyond the end of the file is an error; a short read
    /// within the file zero-fills the remainder.
    pub fn read_page(&self, page_id: PageId, data: &mut [u8]) -> Result<()> {
        assert_eq!(data.len(), PAGE_SIZE, "buffer must be PAGE_SIZE bytes");

        let byte_offset = page_id.as_u32() as u64 * PAGE_SIZE as u64;

        let mut file = self.db_file.lock();
        let file_size = file.metadata()?.len();
        if byte_offset >= file_size {
            return Err(QuarryError::Io(std::io::Error::new(
                std::io::ErrorKind::UnexpectedEof,
                format!("read of page {} past end of file", page_id),
            )));
        }

        file.seek(SeekFrom::Start(byte_offset))?;
        let bytes_read = file.read(data)?;
        if bytes_read < PAGE_SIZE {
            data[bytes_read..].fill(0);
        }

        Ok(())
    }

    /// Writes a page to disk from the provided buffer and flushes the
    /// application buffers to the kernel. fsync is reserved for the log.
    pub fn write_page(&self, page_id: PageId, data: &[u8]) -> Result<()> {
        assert_eq!(data.len(), PAGE_SIZE, "buffer must be PAGE_SIZE bytes");

        let byte_offset = page_id.as_u32() as u64 * PAGE_SIZE as u64;

        let mut file = self.db_file.lock();
        file.seek(SeekFrom::Start(byte_offset))?;
        file.write_all(data)?;
        file.flush()?;

        Ok(())
    }

    /// Appends a buffer of serialized log records to the log file and forces
    /// it to stable storage.
    pub fn write_log(&self, data: &[u8]) -> Result<()> {
        if data.is_empty() {
            return Ok(());
        }

        self.flushing.store(true, Ordering::Release);
        let res = {
            let mut file = self.log_file.lock();
            file.write_all(data)
                .and_then(|_| file.flush())
                .and_then(|_| file.sync_data())
        };
        self.flushing.store(false, Ordering::Release);
        res?;

        self.num_flushes.fetch_add(1, Ordering::Relaxed);
        debug!(bytes = data.len(), "log flushed to disk");
        Ok(())
    }

    /// Reads up to `data.len()` bytes of the log at the given offset.
    /// Returns `Ok(false)` at end of log; a short read zero-fills the
    /// remainder of the buffer.
    pub fn read_log(&self, data: &mut [u8], offset: u64) -> Result<bool> {
        let mut file = self.log_file.lock();
        if offset >= file.metadata()?.len() {
            return Ok(false);
        }

        file.seek(SeekFrom::Start(offset))?;
        let bytes_read = file.read(data)?;
        if bytes_read < data.len() {
            data[bytes_read..].fill(0);
        }

        Ok(true)
    }

    /// Hands out the next page id. Does not touch the disk; the page
    /// materializes in the file on its first write-back.
    pub fn allocate_page(&self) -> PageId {
        PageId::new(self.next_page_id.fetch_add(1, Ordering::SeqCst))
    }

    /// Reclamation is deferred; deallocated ids are simply never reissued.
    pub fn deallocate_page(&self, _page_id: PageId) {}

    /// Raises the allocation cursor so `page_id` is never reissued. Used by
    /// recovery when the log names pages that never reached the data file.
    pub fn ensure_allocated(&self, page_id: PageId) {
        self.next_page_id
            .fetch_max(page_id.as_u32() + 1, Ordering::SeqCst);
    }

    pub fn num_flushes(&self) -> u32 {
        self.num_flushes.load(Ordering::Relaxed)
    }

    pub fn is_flushing(&self) -> bool {
        self.flushing.load(Ordering::Acquire)
    }

    pub fn db_path(&self) -> &Path {
        &self.db_path
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_disk_manager_new() {
        let temp_dir = tempfile::tempdir().unwrap();
        let db_path = temp_dir.path().join("test.db");

        let dm = DiskManager::new(&db_path).unwrap();

        assert!(db_path.exists());
        assert!(DiskManager::log_path_for(&db_path).exists());
        assert_eq!(dm.allocate_page(), PageId::new(0));
        assert_eq!(dm.allocate_page(), PageId::new(1));
    }

    #[test]
    fn test_disk_manager_read_write() {
        let temp_dir = tempfile::tempdir().unwrap();
        let dm = DiskManager::new(temp_dir.path().join("rw.db")).unwrap();

        let page_id = dm.allocate_page();

        let mut write_data = [0u8; PAGE_SIZE];
        write_data[0] = 42;
        write_data[100] = 255;
        write_data[PAGE_SIZE - 1] = 128;
        dm.write_page(page_id, &write_data).unwrap();

        let mut read_data = [0u8; PAGE_SIZE];
        dm.read_page(page_id, &mut read_data).unwrap();

        assert_eq!(read_data[0], 42);
        assert_eq!(read_data[100], 255);
        assert_eq!(read_data[PAGE_SIZE - 1], 128);
    }

    #[test]
    fn test_disk_manager_read_past_eof() {
        let temp_dir = tempfile::tempdir().unwrap();
        let dm = DiskManager::new(temp_dir.path().join("eof.db")).unwrap();

        let mut data = [0u8; PAGE_SIZE];
        assert!(dm.read_page(PageId::new(7), &mut data).is_err());
    }

    #[test]
    fn test_disk_manager_next_page_id_resumes() {
        let temp_dir = tempfile::tempdir().unwrap();
        let db_path = temp_dir.path().join("persist.db");

        {
            let dm = DiskManager::new(&db_path).unwrap();
            let p0 = dm.allocate_page();
            let p1 = dm.allocate_page();
            dm.write_page(p0, &[1u8; PAGE_SIZE]).unwrap();
            dm.write_page(p1, &[2u8; PAGE_SIZE]).unwrap();
        }

        {
            let dm = DiskManager::new(&db_path).unwrap();
            assert_eq!(dm.allocate_page(), PageId::new(2));

            let mut data = [0u8; PAGE_SIZE];
            dm.read_page(PageId::new(1), &mut data).unwrap();
            assert_eq!(data[0], 2);
        }
    }

    #[test]
    fn test_disk_manager_log_round_trip() {
        let temp_dir = tempfile::tempdir().unwrap();
        let dm = DiskManager::new(temp_dir.path().join("log.db")).unwrap();

        dm.write_log(b"first-batch").unwrap();
        dm.write_log(b"second").unwrap();
        assert_eq!(dm.num_flushes(), 2);

        let mut buf = [0u8; 11];
        assert!(dm.read_log(&mut buf, 0).unwrap());
        assert_eq!(&buf, b"first-batch");

        let mut buf = [0u8; 6];
        assert!(dm.read_log(&mut buf, 11).unwrap());
        assert_eq!(&buf, b"second");

        // Past the end of the log
        let mut buf = [0u8; 4];
        assert!(!dm.read_log(&mut buf, 1000).unwrap());
    }
}
