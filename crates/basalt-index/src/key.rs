//! Key capability for the B+Tree index.

/// A fixed-width, totally-ordered key that can be stored in index pages.
///
/// The comparator of the index is the `Ord` bound; the codec places keys in
/// page entry arrays at fixed offsets, so `ENCODED_SIZE` must be exact.
pub trait IndexKey: Copy + Ord + Send + Sync + std::fmt::Debug + 'static {
    /// Number of bytes a key occupies inside a page.
    const ENCODED_SIZE: usize;

    /// Encodes the key into `buf`, which is exactly `ENCODED_SIZE` bytes.
    fn encode_to(&self, buf: &mut [u8]);

    /// Decodes a key from `buf`, which is exactly `ENCODED_SIZE` bytes.
    fn decode_from(buf: &[u8]) -> Self;
}

impl IndexKey for i64 {
    const ENCODED_SIZE: usize = 8;

    fn encode_to(&self, buf: &mut [u8]) {
        buf.copy_from_slice(&self.to_le_bytes());
    }

    fn decode_from(buf: &[u8]) -> Self {
        i64::from_le_bytes(buf.try_into().expect("key buffer is ENCODED_SIZE bytes"))
    }
}

impl IndexKey for u64 {
    const ENCODED_SIZE: usize = 8;

    fn encode_to(&self, buf: &mut [u8]) {
        buf.copy_from_slice(&self.to_le_bytes());
    }

    fn decode_from(buf: &[u8]) -> Self {
        u64::from_le_bytes(buf.try_into().expect("key buffer is ENCODED_SIZE bytes"))
    }
}

impl IndexKey for i32 {
    const ENCODED_SIZE: usize = 4;

    fn encode_to(&self, buf: &mut [u8]) {
        buf.copy_from_slice(&self.to_le_bytes());
    }

    fn decode_from(buf: &[u8]) -> Self {
        i32::from_le_bytes(buf.try_into().expect("key buffer is ENCODED_SIZE bytes"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn roundtrip<K: IndexKey>(key: K) -> K {
        let mut buf = vec![0u8; K::ENCODED_SIZE];
        key.encode_to(&mut buf);
        K::decode_from(&buf)
    }

    #[test]
    fn test_i64_roundtrip() {
        for key in [0i64, 1, -1, 42, i64::MIN, i64::MAX] {
            assert_eq!(roundtrip(key), key);
        }
    }

    #[test]
    fn test_u64_roundtrip() {
        for key in [0u64, 1, u64::MAX] {
            assert_eq!(roundtrip(key), key);
        }
    }

    #[test]
    fn test_i32_roundtrip() {
        for key in [0i32, -7, i32::MIN, i32::MAX] {
            assert_eq!(roundtrip(key), key);
        }
    }

    #[test]
    fn test_encoded_sizes() {
        assert_eq!(<i64 as IndexKey>::ENCODED_SIZE, 8);
        assert_eq!(<u64 as IndexKey>::ENCODED_SIZE, 8);
        assert_eq!(<i32 as IndexKey>::ENCODED_SIZE, 4);
    }
}
