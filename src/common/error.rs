use thiserror::Error;

use super::types::{PageId, RecordId, SlotId, TxnId};

/// Database error types
#[derive(Error, Debug)]
pub enum QuarryError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Page {0} not found")]
    PageNotFound(PageId),

    #[error("Buffer pool is full, all pages are pinned")]
    BufferPoolFull,

    #[error("Invalid page ID: {0}")]
    InvalidPageId(PageId),

    #[error("Page {0} is still pinned")]
    PageStillPinned(PageId),

    #[error("Page overflow: tuple size {tuple_size} exceeds available space {available}")]
    PageOverflow { tuple_size: usize, available: usize },

    #[error("Invalid slot: {0:?}")]
    InvalidSlot(SlotId),

    #[error("Slot {0:?} is empty")]
    EmptySlot(SlotId),

    #[error("Tuple {0} not found")]
    TupleNotFound(RecordId),

    #[error("Duplicate key")]
    DuplicateKey,

    #[error("Key not found")]
    KeyNotFound,

    #[error("Tree order {order} out of range for key size {key_size}")]
    OrderOutOfRange { order: usize, key_size: usize },

    #[error("Transaction {0} is aborted")]
    TxnAborted(TxnId),

    #[error("Object {0:?} not found in header page")]
    ObjectNotFound(String),

    #[error("Header page is full")]
    HeaderFull,

    #[error("Object name {0:?} exceeds the header entry width")]
    NameTooLong(String),

    #[error("Corruption: {0}")]
    Corruption(String),
}

pub type Result<T> = std::result::Result<T, QuarryError>;
