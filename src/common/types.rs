use std::fmt;

/// Page identifier type - uniquely identifies a page on disk.
/// The page id doubles as the page's offset (times PAGE_SIZE) within the
/// database file.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct PageId(pub u32);

impl PageId {
    pub const fn new(id: u32) -> Self {
        Self(id)
    }

    pub fn as_u32(&self) -> u32 {
        self.0
    }

    pub fn as_usize(&self) -> usize {
        self.0 as usize
    }
}

impl fmt::Display for PageId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "PageId({})", self.0)
    }
}

/// Frame identifier type - identifies a buffer frame in the buffer pool
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct FrameId(pub u32);

impl FrameId {
    pub const fn new(id: u32) -> Self {
        Self(id)
    }

    pub fn as_usize(&self) -> usize {
        self.0 as usize
    }

    pub fn as_u32(&self) -> u32 {
        self.0
    }
}

impl fmt::Display for FrameId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "FrameId({})", self.0)
    }
}

/// Slot number within a slotted table page
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SlotId(pub u32);

impl SlotId {
    pub const fn new(id: u32) -> Self {
        Self(id)
    }

    pub fn as_u32(&self) -> u32 {
        self.0
    }

    pub fn as_usize(&self) -> usize {
        self.0 as usize
    }
}

/// Record identifier - locates a tuple as (page id, slot number)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct RecordId {
    pub page_id: PageId,
    pub slot_id: SlotId,
}

impl RecordId {
    pub const fn new(page_id: PageId, slot_id: SlotId) -> Self {
        Self { page_id, slot_id }
    }

    /// Serialized width in index pages and log records
    pub const SERIALIZED_SIZE: usize = 8;

    pub fn serialize_into(&self, buf: &mut [u8]) {
        buf[0..4].copy_from_slice(&self.page_id.as_u32().to_le_bytes());
        buf[4..8].copy_from_slice(&self.slot_id.as_u32().to_le_bytes());
    }

    pub fn deserialize_from(buf: &[u8]) -> Self {
        let page_id = u32::from_le_bytes(buf[0..4].try_into().unwrap());
        let slot_id = u32::from_le_bytes(buf[4..8].try_into().unwrap());
        Self::new(PageId::new(page_id), SlotId::new(slot_id))
    }
}

impl fmt::Display for RecordId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "Rid({}, {})",
            self.page_id.as_u32(),
            self.slot_id.as_u32()
        )
    }
}

/// Transaction identifier, allocated monotonically by the transaction
/// manager. A smaller id means an older transaction; wait-die compares
/// these directly.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TxnId(pub u32);

impl TxnId {
    pub const fn new(id: u32) -> Self {
        Self(id)
    }

    pub fn as_u32(&self) -> u32 {
        self.0
    }
}

impl fmt::Display for TxnId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Txn({})", self.0)
    }
}

/// LSN (Log Sequence Number) - monotonically increasing identifier of a
/// log record. Serialized as 4 bytes little-endian.
pub type Lsn = u32;

/// LSN of a page that has never been logged against; real LSNs start at 1
pub const INVALID_LSN: Lsn = 0;
