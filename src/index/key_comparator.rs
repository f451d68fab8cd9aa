use std::cmp::Ordering;

/// Total order over fixed-width index keys.
pub trait KeyComparator: Send + Sync {
    fn compare(&self, a: &[u8], b: &[u8]) -> Ordering;
}

/// Orders keys by their first four bytes read as a little-endian `u32`.
/// Shorter keys compare by length.
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

/// Orders keys by their first eight bytes read as a little-endian `i64`.
/// Shorter keys compare by length.
pub struct I64Comparator;

impl KeyComparator for I64Comparator {
    fn compare(&self, a: &[u8], b: &[u8]) -> Ordering {
        match (a.get(..8), b.get(..8)) {
            (Some(a8), Some(b8)) => {
                let mut a_buf = [0u8; 8];
                let mut b_buf = [0u8; 8];
                a_buf.copy_from_slice(a8);
                b_buf.copy_from_slice(b8);
                i64::from_le_bytes(a_buf).cmp(&i64::from_le_bytes(b_buf))
            }
            _ => a.len().cmp(&b.len()),
        }
    }
}

/// Lexicographic byte order.
pub struct BytewiseComparator;

impl KeyComparator for BytewiseComparator {
    fn compare(&self, a: &[u8], b: &[u8]) -> Ordering {
        a.cmp(b)
    }
}
