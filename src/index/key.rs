use std::cmp::Ordering;

/// Total order over the fixed-width byte keys stored in the tree. The tree
/// never interprets key bytes itself; widths are configured per index and
/// the comparator is supplied by the host.
pub trait KeyComparator: Send + Sync {
    fn compare(&self, a: &[u8], b: &[u8]) -> Ordering;
}

/// Orders keys by their raw bytes.
pub struct BytewiseComparator;

impl KeyComparator for BytewiseComparator {
    fn compare(&self, a: &[u8], b: &[u8]) -> Ordering {
        a.cmp(b)
    }
}

/// Orders keys whose first four bytes are a little-endian u32.
pub struct IntegerComparator;

impl KeyComparator for IntegerComparator {
    fn compare(&self, a: &[u8], b: &[u8]) -> Ordering {
        if a.len() < 4 || b.len() < 4 {
            return a.len().cmp(&b.len());
        }

        let a_val = u32::from_le_bytes([a[0], a[1], a[2], a[3]]);
        let b_val = u32::from_le_bytes([b[0], b[1], b[2], b[3]]);

        a_val.cmp(&b_val)
    }
}
