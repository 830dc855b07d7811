use crate::common::{
    Lsn, PageId, QuarryError, RecordId, Result, SlotId, INVALID_PAGE_ID, PAGE_SIZE,
};

/// Table page layout:
///
/// | Field              | Offset | Size |
/// |--------------------|--------|------|
/// | page_id            | 0      | 4    |
/// | lsn                | 4      | 4    |
/// | prev_page_id       | 8      | 4    |
/// | next_page_id       | 12     | 4    |
/// | free_space_pointer | 16     | 4    |
/// | tuple_count        | 20     | 4    |
/// | slot directory     | 24     | 8 each, growing upward |
///
/// Tuple payloads grow downward from the end of the page; the free space
/// pointer marks the lower edge of the payload region. Each slot is a
/// (offset: u32, size: i32) pair. A negative size is a tombstone reserved
/// for the deleting transaction; a zero size marks a reusable empty slot.
const PAGE_ID_OFFSET: usize = 0;
const LSN_OFFSET: usize = 4;
const PREV_PAGE_ID_OFFSET: usize = 8;
const NEXT_PAGE_ID_OFFSET: usize = 12;
const FREE_SPACE_POINTER_OFFSET: usize = 16;
const TUPLE_COUNT_OFFSET: usize = 20;
const HEADER_SIZE: usize = 24;
const SLOT_SIZE: usize = 8;

/// Mutable view of a table page.
pub struct TablePage<'a> {
    data: &'a mut [u8],
}

impl<'a> TablePage<'a> {
    pub fn new(data: &'a mut [u8]) -> Self {
        assert_eq!(data.len(), PAGE_SIZE);
        Self { data }
    }

    pub fn init(&mut self, page_id: PageId, prev_page_id: Option<PageId>) {
        self.data.fill(0);
        self.set_u32(PAGE_ID_OFFSET, page_id.as_u32());
        self.set_page_id_field(PREV_PAGE_ID_OFFSET, prev_page_id);
        self.set_page_id_field(NEXT_PAGE_ID_OFFSET, None);
        self.set_u32(FREE_SPACE_POINTER_OFFSET, PAGE_SIZE as u32);
        self.set_u32(TUPLE_COUNT_OFFSET, 0);
    }

    fn get_u32(&self, offset: usize) -> u32 {
        u32::from_le_bytes(self.data[offset..offset + 4].try_into().unwrap())
    }

    fn set_u32(&mut self, offset: usize, value: u32) {
        self.data[offset..offset + 4].copy_from_slice(&value.to_le_bytes());
    }

    fn set_page_id_field(&mut self, offset: usize, page_id: Option<PageId>) {
        self.set_u32(offset, page_id.unwrap_or(INVALID_PAGE_ID).as_u32());
    }

    fn get_page_id_field(&self, offset: usize) -> Option<PageId> {
        let value = self.get_u32(offset);
        if value == INVALID_PAGE_ID.as_u32() {
            None
        } else {
            Some(PageId::new(value))
        }
    }

    pub fn page_id(&self) -> PageId {
        PageId::new(self.get_u32(PAGE_ID_OFFSET))
    }

    pub fn lsn(&self) -> Lsn {
        self.get_u32(LSN_OFFSET)
    }

    pub fn set_lsn(&mut self, lsn: Lsn) {
        self.set_u32(LSN_OFFSET, lsn);
    }

    pub fn prev_page_id(&self) -> Option<PageId> {
        self.get_page_id_field(PREV_PAGE_ID_OFFSET)
    }

    pub fn set_prev_page_id(&mut self, page_id: Option<PageId>) {
        self.set_page_id_field(PREV_PAGE_ID_OFFSET, page_id);
    }

    pub fn next_page_id(&self) -> Option<PageId> {
        self.get_page_id_field(NEXT_PAGE_ID_OFFSET)
    }

    pub fn set_next_page_id(&mut self, page_id: Option<PageId>) {
        self.set_page_id_field(NEXT_PAGE_ID_OFFSET, page_id);
    }

    fn free_space_pointer(&self) -> usize {
        self.get_u32(FREE_SPACE_POINTER_OFFSET) as usize
    }

    fn set_free_space_pointer(&mut self, offset: usize) {
        self.set_u32(FREE_SPACE_POINTER_OFFSET, offset as u32);
    }

    /// Number of slots in the directory, tombstones and empties included.
    pub fn tuple_count(&self) -> usize {
        self.get_u32(TUPLE_COUNT_OFFSET) as usize
    }

    fn set_tuple_count(&mut self, count: usize) {
        self.set_u32(TUPLE_COUNT_OFFSET, count as u32);
    }

    /// Number of slots holding a live (non-deleted) tuple.
    pub fn live_tuple_count(&self) -> usize {
        (0..self.tuple_count())
            .filter(|&i| self.tuple_size(i) > 0)
            .count()
    }

    fn tuple_offset(&self, slot: usize) -> usize {
        self.get_u32(HEADER_SIZE + slot * SLOT_SIZE) as usize
    }

    fn set_tuple_offset(&mut self, slot: usize, offset: usize) {
        self.set_u32(HEADER_SIZE + slot * SLOT_SIZE, offset as u32);
    }

    fn tuple_size(&self, slot: usize) -> i32 {
        let offset = HEADER_SIZE + slot * SLOT_SIZE + 4;
        i32::from_le_bytes(self.data[offset..offset + 4].try_into().unwrap())
    }

    fn set_tuple_size(&mut self, slot: usize, size: i32) {
        let offset = HEADER_SIZE + slot * SLOT_SIZE + 4;
        self.data[offset..offset + 4].copy_from_slice(&size.to_le_bytes());
    }

    fn free_space(&self) -> usize {
        self.free_space_pointer() - HEADER_SIZE - self.tuple_count() * SLOT_SIZE
    }

    /// Inserts a tuple, reusing an empty slot when one exists.
    pub fn insert_tuple(&mut self, tuple: &[u8]) -> Result<RecordId> {
        let tuple_size = tuple.len();
        if self.free_space() < tuple_size {
            return Err(QuarryError::PageOverflow {
                tuple_size,
                available: self.free_space(),
            });
        }

        let count = self.tuple_count();
        let slot = (0..count)
            .find(|&i| self.tuple_size(i) == 0)
            .unwrap_or(count);

        if slot == count {
            // A fresh slot also consumes directory space
            if self.free_space() < tuple_size + SLOT_SIZE {
                return Err(QuarryError::PageOverflow {
                    tuple_size: tuple_size + SLOT_SIZE,
                    available: self.free_space(),
                });
            }
            self.set_tuple_count(count + 1);
        }

        let offset = self.free_space_pointer() - tuple_size;
        self.data[offset..offset + tuple_size].copy_from_slice(tuple);
        self.set_free_space_pointer(offset);
        self.set_tuple_offset(slot, offset);
        self.set_tuple_size(slot, tuple_size as i32);

        Ok(RecordId::new(self.page_id(), SlotId::new(slot as u32)))
    }

    /// Copies out the tuple at the given slot. Tombstoned and empty slots
    /// read as not-found.
    pub fn get_tuple(&self, rid: RecordId) -> Result<Vec<u8>> {
        let slot = rid.slot_id.as_usize();
        if slot >= self.tuple_count() {
            return Err(QuarryError::InvalidSlot(rid.slot_id));
        }
        let size = self.tuple_size(slot);
        if size <= 0 {
            return Err(QuarryError::TupleNotFound(rid));
        }

        let offset = self.tuple_offset(slot);
        Ok(self.data[offset..offset + size as usize].to_vec())
    }

    /// Copies out the tuple bytes whether or not the slot is tombstoned.
    /// Deletion paths use this to capture the payload for their log records.
    pub fn peek_tuple(&self, rid: RecordId) -> Result<Vec<u8>> {
        let slot = rid.slot_id.as_usize();
        if slot >= self.tuple_count() {
            return Err(QuarryError::InvalidSlot(rid.slot_id));
        }
        let size = self.tuple_size(slot);
        if size == 0 {
            return Err(QuarryError::TupleNotFound(rid));
        }
        let size = size.unsigned_abs() as usize;

        let offset = self.tuple_offset(slot);
        Ok(self.data[offset..offset + size].to_vec())
    }

    /// Flips the slot size negative, reserving the tuple for the deleting
    /// transaction without releasing its space.
    pub fn mark_delete(&mut self, rid: RecordId) -> Result<()> {
        let slot = rid.slot_id.as_usize();
        if slot >= self.tuple_count() {
            return Err(QuarryError::InvalidSlot(rid.slot_id));
        }
        let size = self.tuple_size(slot);
        if size <= 0 {
            return Err(QuarryError::TupleNotFound(rid));
        }

        self.set_tuple_size(slot, -size);
        Ok(())
    }

    /// Reverts a mark-delete, making the tuple visible again.
    pub fn rollback_delete(&mut self, rid: RecordId) -> Result<()> {
        let slot = rid.slot_id.as_usize();
        if slot >= self.tuple_count() {
            return Err(QuarryError::InvalidSlot(rid.slot_id));
        }
        let size = self.tuple_size(slot);
        if size < 0 {
            self.set_tuple_size(slot, -size);
        }
        Ok(())
    }

    /// Physically removes the tuple (tombstoned or live) and compacts the
    /// payload region. The slot becomes empty and reusable.
    pub fn apply_delete(&mut self, rid: RecordId) -> Result<()> {
        let slot = rid.slot_id.as_usize();
        if slot >= self.tuple_count() {
            return Err(QuarryError::InvalidSlot(rid.slot_id));
        }
        let mut size = self.tuple_size(slot);
        if size == 0 {
            return Err(QuarryError::TupleNotFound(rid));
        }
        if size < 0 {
            size = -size;
        }
        let size = size as usize;

        let tuple_offset = self.tuple_offset(slot);
        let fsp = self.free_space_pointer();

        self.data.copy_within(fsp..tuple_offset, fsp + size);
        self.set_free_space_pointer(fsp + size);
        self.set_tuple_size(slot, 0);
        self.set_tuple_offset(slot, 0);

        let count = self.tuple_count();
        for i in 0..count {
            let offset_i = self.tuple_offset(i);
            if self.tuple_size(i) != 0 && offset_i < tuple_offset {
                self.set_tuple_offset(i, offset_i + size);
            }
        }
        Ok(())
    }

    /// Replaces the tuple in place, shifting neighbouring payloads to absorb
    /// the size delta. Returns the previous tuple bytes.
    pub fn update_tuple(&mut self, rid: RecordId, new_tuple: &[u8]) -> Result<Vec<u8>> {
        let slot = rid.slot_id.as_usize();
        if slot >= self.tuple_count() {
            return Err(QuarryError::InvalidSlot(rid.slot_id));
        }
        let old_size_raw = self.tuple_size(slot);
        if old_size_raw <= 0 {
            return Err(QuarryError::TupleNotFound(rid));
        }
        let old_size = old_size_raw as usize;
        let new_size = new_tuple.len();

        if self.free_space() + old_size < new_size {
            return Err(QuarryError::PageOverflow {
                tuple_size: new_size,
                available: self.free_space() + old_size,
            });
        }

        let tuple_offset = self.tuple_offset(slot);
        let old_tuple = self.data[tuple_offset..tuple_offset + old_size].to_vec();
        let fsp = self.free_space_pointer();

        // Shift everything below the tuple by the size delta, then lay the
        // new payload down at the adjusted position.
        let new_fsp = fsp + old_size - new_size;
        self.data.copy_within(fsp..tuple_offset, new_fsp);
        self.set_free_space_pointer(new_fsp);

        let new_offset = tuple_offset + old_size - new_size;
        self.data[new_offset..new_offset + new_size].copy_from_slice(new_tuple);
        self.set_tuple_size(slot, new_size as i32);

        let count = self.tuple_count();
        for i in 0..count {
            let offset_i = self.tuple_offset(i);
            if self.tuple_size(i) != 0 && offset_i <= tuple_offset {
                self.set_tuple_offset(i, offset_i + old_size - new_size);
            }
        }
        Ok(old_tuple)
    }
}

/// Read-only view of a table page.
pub struct TablePageRef<'a> {
    data: &'a [u8],
}

impl<'a> TablePageRef<'a> {
    pub fn new(data: &'a [u8]) -> Self {
        assert_eq!(data.len(), PAGE_SIZE);
        Self { data }
    }

    fn get_u32(&self, offset: usize) -> u32 {
        u32::from_le_bytes(self.data[offset..offset + 4].try_into().unwrap())
    }

    pub fn page_id(&self) -> PageId {
        PageId::new(self.get_u32(PAGE_ID_OFFSET))
    }

    pub fn lsn(&self) -> Lsn {
        self.get_u32(LSN_OFFSET)
    }

    pub fn next_page_id(&self) -> Option<PageId> {
        let value = self.get_u32(NEXT_PAGE_ID_OFFSET);
        if value == INVALID_PAGE_ID.as_u32() {
            None
        } else {
            Some(PageId::new(value))
        }
    }

    pub fn tuple_count(&self) -> usize {
        self.get_u32(TUPLE_COUNT_OFFSET) as usize
    }

    fn tuple_size(&self, slot: usize) -> i32 {
        let offset = HEADER_SIZE + slot * SLOT_SIZE + 4;
        i32::from_le_bytes(self.data[offset..offset + 4].try_into().unwrap())
    }

    pub fn live_tuple_count(&self) -> usize {
        (0..self.tuple_count())
            .filter(|&i| self.tuple_size(i) > 0)
            .count()
    }

    pub fn get_tuple(&self, rid: RecordId) -> Result<Vec<u8>> {
        let slot = rid.slot_id.as_usize();
        if slot >= self.tuple_count() {
            return Err(QuarryError::InvalidSlot(rid.slot_id));
        }
        let size = self.tuple_size(slot);
        if size <= 0 {
            return Err(QuarryError::TupleNotFound(rid));
        }

        let offset = self.get_u32(HEADER_SIZE + slot * SLOT_SIZE) as usize;
        Ok(self.data[offset..offset + size as usize].to_vec())
    }
}
