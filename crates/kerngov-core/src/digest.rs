//! # Snapshot Digests
//!
//! Deterministic fingerprints of a kernel map, used to compare the live
//! Registry with a replayed one (and to print a short digest from the CLI).
//!
//! The canonical form is the JSON encoding of the `BTreeMap`: keys sort by
//! id and struct fields keep declaration order, so equal maps always encode
//! to equal bytes.

use crate::{Kernel, KernelError};
use std::collections::BTreeMap;

const FNV_OFFSET: u64 = 0xcbf2_9ce4_8422_2325;
const FNV_PRIME: u64 = 0x0000_0100_0000_01b3;

/// Canonical bytes of a kernel map.
pub fn canonical_bytes(kernels: &BTreeMap<String, Kernel>) -> Result<Vec<u8>, KernelError> {
    serde_json::to_vec(kernels).map_err(|e| KernelError::Persistence(e.to_string()))
}

/// 64-bit FNV-1a checksum of the canonical bytes.
///
/// Not a cryptographic hash: it detects accidental divergence, not
/// tampering. Enable `crypto-hash` for [`snapshot_crypto_hash`].
pub fn snapshot_checksum(kernels: &BTreeMap<String, Kernel>) -> Result<u64, KernelError> {
    Ok(fnv1a(&canonical_bytes(kernels)?))
}

fn fnv1a(bytes: &[u8]) -> u64 {
    bytes.iter().fold(FNV_OFFSET, |hash, byte| {
        (hash ^ u64::from(*byte)).wrapping_mul(FNV_PRIME)
    })
}

/// BLAKE3 hash of the canonical bytes, as 64 hex characters.
#[cfg(feature = "crypto-hash")]
pub fn snapshot_crypto_hash(kernels: &BTreeMap<String, Kernel>) -> Result<String, KernelError> {
    Ok(blake3::hash(&canonical_bytes(kernels)?).to_hex().to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fnv_matches_reference_vectors() {
        assert_eq!(fnv1a(b""), 0xcbf2_9ce4_8422_2325);
        assert_eq!(fnv1a(b"a"), 0xaf63_dc4c_8601_ec8c);
    }

    #[test]
    fn empty_map_is_stable() {
        let empty = BTreeMap::new();
        assert_eq!(
            snapshot_checksum(&empty).expect("checksum"),
            snapshot_checksum(&empty).expect("checksum")
        );
        assert_eq!(canonical_bytes(&empty).expect("bytes"), b"{}".to_vec());
    }

    #[cfg(feature = "crypto-hash")]
    #[test]
    fn crypto_hash_is_hex() {
        let hash = snapshot_crypto_hash(&BTreeMap::new()).expect("hash");
        assert_eq!(hash.len(), 64);
    }
}
