//! Quarry - the core storage engine of a disk-oriented RDBMS
//!
//! This crate provides the storage half of a relational database: data
//! lives in 4 KB pages on disk, a buffer pool caches and pins pages in
//! memory, and transactions run under strict two-phase locking with
//! write-ahead logging for durability.
//!
//! # Architecture
//!
//! - **Storage** (`storage`): paged disk I/O and on-disk page layouts
//!   - `DiskManager`: reads/writes pages and appends to the log file
//!   - `HeaderPage`: page 0, mapping object names to root pages
//!   - `TablePage`: slotted pages with tombstone-based deletion
//! - **Buffer pool** (`buffer`): a fixed set of frames with an LRU
//!   replacer; callers hold pages through RAII read/write guards whose
//!   drop unpins the frame
//! - **Page table** (`hash`): an extendible hash directory mapping page
//!   ids to frames
//! - **Write-ahead log** (`wal`): double-buffered log records, a
//!   background flush thread with group commit, and crash recovery
//! - **Concurrency** (`concurrency`): tuple-level lock manager with
//!   wait-die deadlock prevention, transaction contexts and the
//!   transaction manager driving commit/abort
//! - **Index** (`index`): a concurrent on-disk B+tree with latch-coupled
//!   descent and a leaf-chain iterator
//! - **Table heap** (`table`): linked slotted pages carrying one table's
//!   tuples, cooperating with the lock and log managers
//!
//! The `StorageEngine` handle wires everything together.
//!
//! # Example
//!
//! ```rust,no_run
//! use quarry::StorageEngine;
//!
//! let engine = StorageEngine::open("demo.db").unwrap();
//! engine.enable_logging();
//!
//! let txn = engine.transaction_manager().begin();
//! let table = engine.create_table("people", &txn).unwrap();
//! let rid = table.insert_tuple(b"alice", &txn).unwrap();
//! engine.transaction_manager().commit(&txn).unwrap();
//!
//! let txn = engine.transaction_manager().begin();
//! assert_eq!(table.get_tuple(rid, &txn).unwrap(), b"alice");
//! engine.transaction_manager().commit(&txn).unwrap();
//!
//! engine.close().unwrap();
//! ```

pub mod buffer;
pub mod common;
pub mod concurrency;
pub mod engine;
pub mod hash;
pub mod index;
pub mod storage;
pub mod table;
pub mod wal;

// Re-export commonly used types at the crate root
pub use common::{PageId, QuarryError, RecordId, Result, SlotId, TxnId};
pub use engine::StorageEngine;
