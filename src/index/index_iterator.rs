use std::sync::Arc;

use crate::buffer::{BufferPoolManager, ReadPageGuard};
use crate::common::{RecordId, Result};

use super::btree_page::LeafPageRef;

/// Forward iterator over the leaf chain. It keeps the current leaf pinned
/// and read-latched, so each visited leaf is a consistent snapshot; when a
/// leaf is exhausted the next one is latched before the current one is
/// released. Inserts racing past the iterator's position may be missed.
pub struct IndexIterator {
    buffer_pool: Arc<BufferPoolManager>,
    key_size: usize,
    current: Option<ReadPageGuard>,
    index: usize,
}

impl IndexIterator {
    pub(crate) fn new(
        buffer_pool: Arc<BufferPoolManager>,
        key_size: usize,
        leaf: ReadPageGuard,
        index: usize,
    ) -> Self {
        Self {
            buffer_pool,
            key_size,
            current: Some(leaf),
            index,
        }
    }

    pub(crate) fn exhausted(buffer_pool: Arc<BufferPoolManager>, key_size: usize) -> Self {
        Self {
            buffer_pool,
            key_size,
            current: None,
            index: 0,
        }
    }

    /// Yields the next (key, RID) pair in key order.
    pub fn advance(&mut self) -> Result<Option<(Vec<u8>, RecordId)>> {
        loop {
            let Some(guard) = &self.current else {
                return Ok(None);
            };
            let leaf = LeafPageRef::new(guard.data(), self.key_size);

            if self.index < leaf.size() {
                let key = leaf.key_at(self.index).to_vec();
                let rid = leaf.rid_at(self.index);
                self.index += 1;
                return Ok(Some((key, rid)));
            }

            match leaf.next_page_id() {
                Some(next) => {
                    // Latch the next leaf before letting the current one go.
                    let next_guard = self.buffer_pool.fetch_page_read(next)?;
                    self.current = Some(next_guard);
                    self.index = 0;
                }
                None => {
                    self.current = None;
                    return Ok(None);
                }
            }
        }
    }
}

impl Iterator for IndexIterator {
    type Item = Result<(Vec<u8>, RecordId)>;

    fn next(&mut self) -> Option<Self::Item> {
        match self.advance() {
            Ok(Some(item)) => Some(Ok(item)),
            Ok(None) => None,
            Err(e) => Some(Err(e)),
        }
    }
}
