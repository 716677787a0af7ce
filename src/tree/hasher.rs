//! Hash primitives for tree, bucket and state digests
//!
//! Every digest in the system is BLAKE3 so that leaf, node, bucket and node-level
//! fingerprints all compose from the same function.

use crate::error::ApiError;
use crate::types::Hash;

/// Digest a single byte slice
pub fn digest(bytes: &[u8]) -> Hash {
    *blake3::hash(bytes).as_bytes()
}

/// Digest the concatenation of several parts without allocating the concatenation
pub fn digest_concat<'a, I>(parts: I) -> Hash
where
    I: IntoIterator<Item = &'a [u8]>,
{
    let mut hasher = blake3::Hasher::new();
    for part in parts {
        hasher.update(part);
    }
    *hasher.finalize().as_bytes()
}

/// Return the bit at `position` of `id`, counting from byte 0, bit 0 upward
///
/// This defines the tree topology: changing it invalidates every stored tree in the
/// cluster.
pub fn bit_at(position: usize, id: &[u8]) -> Result<u8, ApiError> {
    let byte = id.get(position / 8).ok_or_else(|| {
        ApiError::InvalidIdentifier(format!(
            "bit position {} beyond identifier of {} bytes",
            position,
            id.len()
        ))
    })?;
    Ok((byte >> (position % 8)) & 1)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_bit_at_least_significant_first() {
        let id = [0b0000_0101u8, 0b1000_0000u8];
        assert_eq!(bit_at(0, &id).unwrap(), 1);
        assert_eq!(bit_at(1, &id).unwrap(), 0);
        assert_eq!(bit_at(2, &id).unwrap(), 1);
        assert_eq!(bit_at(7, &id).unwrap(), 0);
        assert_eq!(bit_at(8, &id).unwrap(), 0);
        assert_eq!(bit_at(15, &id).unwrap(), 1);
    }

    #[test]
    fn test_bit_at_out_of_range() {
        let err = bit_at(16, &[0xff, 0xff]).unwrap_err();
        assert!(matches!(err, ApiError::InvalidIdentifier(_)));
        assert!(bit_at(0, &[]).is_err());
    }

    #[test]
    fn test_digest_concat_matches_digest_of_concatenation() {
        let joined = digest(b"leftright");
        let parts = digest_concat([b"left".as_slice(), b"right".as_slice()]);
        assert_eq!(joined, parts);
    }
}
