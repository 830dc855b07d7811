use crate::common::{Lsn, PageId, RecordId, TxnId, INVALID_LSN, INVALID_PAGE_ID};

/// Size of the header every log record starts with:
/// | size | lsn | txn_id | prev_lsn | record_type |, 4 bytes LE each.
pub const LOG_HEADER_SIZE: usize = 20;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u32)]
pub enum LogRecordType {
    Invalid = 0,
    Insert = 1,
    MarkDelete = 2,
    ApplyDelete = 3,
    RollbackDelete = 4,
    Update = 5,
    Begin = 6,
    Commit = 7,
    Abort = 8,
    NewPage = 9,
}

impl LogRecordType {
    fn from_u32(value: u32) -> Option<Self> {
        Some(match value {
            1 => Self::Insert,
            2 => Self::MarkDelete,
            3 => Self::ApplyDelete,
            4 => Self::RollbackDelete,
            5 => Self::Update,
            6 => Self::Begin,
            7 => Self::Commit,
            8 => Self::Abort,
            9 => Self::NewPage,
            _ => return None,
        })
    }
}

/// Type-specific payload of a log record.
///
/// Data operations carry the RID and the tuple bytes (length-prefixed on
/// the wire); updates carry both images; NewPage carries the page being
/// created and its predecessor in the heap's page list.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LogPayload {
    Txn,
    Data {
        rid: RecordId,
        tuple: Vec<u8>,
    },
    Update {
        rid: RecordId,
        old_tuple: Vec<u8>,
        new_tuple: Vec<u8>,
    },
    NewPage {
        prev_page_id: Option<PageId>,
        page_id: PageId,
    },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LogRecord {
    pub size: u32,
    pub lsn: Lsn,
    pub txn_id: TxnId,
    pub prev_lsn: Lsn,
    pub record_type: LogRecordType,
    pub payload: LogPayload,
}

impl LogRecord {
    /// Builds a BEGIN / COMMIT / ABORT record.
    pub fn txn(txn_id: TxnId, prev_lsn: Lsn, record_type: LogRecordType) -> Self {
        debug_assert!(matches!(
            record_type,
            LogRecordType::Begin | LogRecordType::Commit | LogRecordType::Abort
        ));
        let mut record = Self {
            size: 0,
            lsn: INVALID_LSN,
            txn_id,
            prev_lsn,
            record_type,
            payload: LogPayload::Txn,
        };
        record.size = record.serialized_size() as u32;
        record
    }

    /// Builds an INSERT / MARK_DELETE / APPLY_DELETE / ROLLBACK_DELETE record.
    pub fn data(
        txn_id: TxnId,
        prev_lsn: Lsn,
        record_type: LogRecordType,
        rid: RecordId,
        tuple: Vec<u8>,
    ) -> Self {
        debug_assert!(matches!(
            record_type,
            LogRecordType::Insert
                | LogRecordType::MarkDelete
                | LogRecordType::ApplyDelete
                | LogRecordType::RollbackDelete
        ));
        let mut record = Self {
            size: 0,
            lsn: INVALID_LSN,
            txn_id,
            prev_lsn,
            record_type,
            payload: LogPayload::Data { rid, tuple },
        };
        record.size = record.serialized_size() as u32;
        record
    }

    /// Builds an UPDATE record carrying both tuple images.
    pub fn update(
        txn_id: TxnId,
        prev_lsn: Lsn,
        rid: RecordId,
        old_tuple: Vec<u8>,
        new_tuple: Vec<u8>,
    ) -> Self {
        let mut record = Self {
            size: 0,
            lsn: INVALID_LSN,
            txn_id,
            prev_lsn,
            record_type: LogRecordType::Update,
            payload: LogPayload::Update {
                rid,
                old_tuple,
                new_tuple,
            },
        };
        record.size = record.serialized_size() as u32;
        record
    }

    /// Builds a NEW_PAGE record.
    pub fn new_page(
        txn_id: TxnId,
        prev_lsn: Lsn,
        prev_page_id: Option<PageId>,
        page_id: PageId,
    ) -> Self {
        let mut record = Self {
            size: 0,
            lsn: INVALID_LSN,
            txn_id,
            prev_lsn,
            record_type: LogRecordType::NewPage,
            payload: LogPayload::NewPage {
                prev_page_id,
                page_id,
            },
        };
        record.size = record.serialized_size() as u32;
        record
    }

    pub fn serialized_size(&self) -> usize {
        LOG_HEADER_SIZE
            + match &self.payload {
                LogPayload::Txn => 0,
                LogPayload::Data { tuple, .. } => RecordId::SERIALIZED_SIZE + 4 + tuple.len(),
                LogPayload::Update {
                    old_tuple,
                    new_tuple,
                    ..
                } => RecordId::SERIALIZED_SIZE + 4 + old_tuple.len() + 4 + new_tuple.len(),
                LogPayload::NewPage { .. } => 8,
            }
    }

    /// Appends the serialized record to `out`.
    pub fn serialize_into(&self, out: &mut Vec<u8>) {
        out.extend_from_slice(&self.size.to_le_bytes());
        out.extend_from_slice(&self.lsn.to_le_bytes());
        out.extend_from_slice(&self.txn_id.as_u32().to_le_bytes());
        out.extend_from_slice(&self.prev_lsn.to_le_bytes());
        out.extend_from_slice(&(self.record_type as u32).to_le_bytes());

        match &self.payload {
            LogPayload::Txn => {}
            LogPayload::Data { rid, tuple } => {
                let mut rid_buf = [0u8; RecordId::SERIALIZED_SIZE];
                rid.serialize_into(&mut rid_buf);
                out.extend_from_slice(&rid_buf);
                out.extend_from_slice(&(tuple.len() as u32).to_le_bytes());
                out.extend_from_slice(tuple);
            }
            LogPayload::Update {
                rid,
                old_tuple,
                new_tuple,
            } => {
                let mut rid_buf = [0u8; RecordId::SERIALIZED_SIZE];
                rid.serialize_into(&mut rid_buf);
                out.extend_from_slice(&rid_buf);
                out.extend_from_slice(&(old_tuple.len() as u32).to_le_bytes());
                out.extend_from_slice(old_tuple);
                out.extend_from_slice(&(new_tuple.len() as u32).to_le_bytes());
                out.extend_from_slice(new_tuple);
            }
            LogPayload::NewPage {
                prev_page_id,
                page_id,
            } => {
                let prev = prev_page_id.unwrap_or(INVALID_PAGE_ID);
                out.extend_from_slice(&prev.as_u32().to_le_bytes());
                out.extend_from_slice(&page_id.as_u32().to_le_bytes());
            }
        }
    }

    /// Reads one record back from a byte slice. Returns None when the bytes
    /// do not form a complete record (end of log).
    pub fn deserialize(buf: &[u8]) -> Option<LogRecord> {
        if buf.len() < LOG_HEADER_SIZE {
            return None;
        }
        let size = u32::from_le_bytes(buf[0..4].try_into().unwrap());
        let lsn = u32::from_le_bytes(buf[4..8].try_into().unwrap());
        let txn_id = TxnId::new(u32::from_le_bytes(buf[8..12].try_into().unwrap()));
        let prev_lsn = u32::from_le_bytes(buf[12..16].try_into().unwrap());
        let record_type = LogRecordType::from_u32(u32::from_le_bytes(buf[16..20].try_into().unwrap()))?;

        if size as usize > buf.len() || (size as usize) < LOG_HEADER_SIZE || lsn == INVALID_LSN {
            return None;
        }
        let body = &buf[LOG_HEADER_SIZE..size as usize];

        let payload = match record_type {
            LogRecordType::Begin | LogRecordType::Commit | LogRecordType::Abort => LogPayload::Txn,
            LogRecordType::Insert
            | LogRecordType::MarkDelete
            | LogRecordType::ApplyDelete
            | LogRecordType::RollbackDelete => {
                let rid = RecordId::deserialize_from(&body[0..8]);
                let len = u32::from_le_bytes(body[8..12].try_into().unwrap()) as usize;
                let tuple = body[12..12 + len].to_vec();
                LogPayload::Data { rid, tuple }
            }
            LogRecordType::Update => {
                let rid = RecordId::deserialize_from(&body[0..8]);
                let old_len = u32::from_le_bytes(body[8..12].try_into().unwrap()) as usize;
                let old_tuple = body[12..12 + old_len].to_vec();
                let new_start = 12 + old_len;
                let new_len =
                    u32::from_le_bytes(body[new_start..new_start + 4].try_into().unwrap()) as usize;
                let new_tuple = body[new_start + 4..new_start + 4 + new_len].to_vec();
                LogPayload::Update {
                    rid,
                    old_tuple,
                    new_tuple,
                }
            }
            LogRecordType::NewPage => {
                let prev = u32::from_le_bytes(body[0..4].try_into().unwrap());
                let page_id = PageId::new(u32::from_le_bytes(body[4..8].try_into().unwrap()));
                let prev_page_id = if prev == INVALID_PAGE_ID.as_u32() {
                    None
                } else {
                    Some(PageId::new(prev))
                };
                LogPayload::NewPage {
                    prev_page_id,
                    page_id,
                }
            }
            LogRecordType::Invalid => return None,
        };

        Some(LogRecord {
            size,
            lsn,
            txn_id,
            prev_lsn,
            record_type,
            payload,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::common::SlotId;

    fn round_trip(record: &LogRecord) -> LogRecord {
        let mut buf = Vec::new();
        record.serialize_into(&mut buf);
        assert_eq!(buf.len(), record.serialized_size());
        LogRecord::deserialize(&buf).unwrap()
    }

    #[test]
    fn test_log_record_txn_round_trip() {
        let mut record = LogRecord::txn(TxnId::new(7), 3, LogRecordType::Commit);
        record.lsn = 4;
        assert_eq!(round_trip(&record), record);
        assert_eq!(record.size as usize, LOG_HEADER_SIZE);
    }

    #[test]
    fn test_log_record_insert_round_trip() {
        let rid = RecordId::new(PageId::new(2), SlotId::new(5));
        let mut record = LogRecord::data(
            TxnId::new(1),
            INVALID_LSN,
            LogRecordType::Insert,
            rid,
            b"payload".to_vec(),
        );
        record.lsn = 1;
        let decoded = round_trip(&record);
        assert_eq!(decoded.record_type, LogRecordType::Insert);
        assert_eq!(
            decoded.payload,
            LogPayload::Data {
                rid,
                tuple: b"payload".to_vec()
            }
        );
    }

    #[test]
    fn test_log_record_update_round_trip() {
        let rid = RecordId::new(PageId::new(9), SlotId::new(0));
        let mut record = LogRecord::update(TxnId::new(3), 11, rid, b"old".to_vec(), b"newer".to_vec());
        record.lsn = 12;
        assert_eq!(round_trip(&record), record);
    }

    #[test]
    fn test_log_record_new_page_round_trip() {
        let mut record =
            LogRecord::new_page(TxnId::new(2), 5, Some(PageId::new(1)), PageId::new(8));
        record.lsn = 6;
        assert_eq!(round_trip(&record), record);

        let mut root = LogRecord::new_page(TxnId::new(2), 5, None, PageId::new(1));
        root.lsn = 7;
        assert_eq!(round_trip(&root), root);
    }

    #[test]
    fn test_log_record_deserialize_garbage() {
        assert!(LogRecord::deserialize(&[]).is_none());
        assert!(LogRecord::deserialize(&[0u8; LOG_HEADER_SIZE]).is_none());
    }
}
