use keymesh_core::types::Fingerprint;
use sha3::{Digest, Sha3_512};

/// Compute SHA3-512 of arbitrary bytes → 64-byte array.
pub fn sha3_512(data: &[u8]) -> [u8; 64] {
    let mut hasher = Sha3_512::new();
    hasher.update(data);
    let out = hasher.finalize();
    let mut arr = [0u8; 64];
    arr.copy_from_slice(&out);
    arr
}

/// Derive a Fingerprint from raw Dilithium5 public key bytes.
///
/// The fingerprint is a pure function of the public key; any record whose
/// recomputed fingerprint disagrees with its embedded key is adversarial.
pub fn fingerprint_from_pubkey(pubkey_bytes: &[u8]) -> Fingerprint {
    Fingerprint::from_bytes(sha3_512(pubkey_bytes))
}

/// Derive a 64-byte overlay key: SHA3-512 over the concatenation of `parts`.
///
/// Overlay services key their records as `SHA3-512(fp_hex ‖ suffix)` or
/// `SHA3-512(name ‖ suffix)`; this is the single derivation point.
pub fn overlay_key(parts: &[&[u8]]) -> Vec<u8> {
    let mut hasher = Sha3_512::new();
    for part in parts {
        hasher.update(part);
    }
    hasher.finalize().to_vec()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn digest_is_64_bytes_and_stable() {
        let a = sha3_512(b"keymesh");
        let b = sha3_512(b"keymesh");
        assert_eq!(a, b);
        assert_ne!(a, sha3_512(b"keymesh!"));
    }

    #[test]
    fn overlay_key_concatenates() {
        let joined = overlay_key(&[b"alice", b":lookup"]);
        assert_eq!(joined, sha3_512(b"alice:lookup").to_vec());
    }

    #[test]
    fn fingerprint_matches_digest() {
        let pk = vec![0x42u8; 2592];
        let fp = fingerprint_from_pubkey(&pk);
        assert_eq!(*fp.as_bytes(), sha3_512(&pk));
    }
}
