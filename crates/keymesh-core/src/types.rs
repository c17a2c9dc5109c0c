use std::fmt;

use serde::de::Error as _;
use serde::{Deserialize, Deserializer, Serialize, Serializer};

use crate::constants::{FINGERPRINT_BYTES, FINGERPRINT_HEX_CHARS};
use crate::error::KeymeshError;

/// Unix timestamp (seconds, UTC).
pub type Timestamp = u64;

/// Caller-assigned slot identifier at a DHT key. Signed puts with the same
/// value id replace each other.
pub type ValueId = u64;

// ── Fingerprint ──────────────────────────────────────────────────────────────

/// 64-byte SHA3-512 digest of a Dilithium5 public key, rendered as 128
/// lowercase hex characters. The canonical identifier throughout the overlay;
/// names are aliases.
#[derive(Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Fingerprint(pub [u8; FINGERPRINT_BYTES]);

impl Fingerprint {
    pub fn from_bytes(b: [u8; FINGERPRINT_BYTES]) -> Self {
        Self(b)
    }

    pub fn as_bytes(&self) -> &[u8; FINGERPRINT_BYTES] {
        &self.0
    }

    /// Lowercase 128-hex rendering.
    pub fn to_hex(&self) -> String {
        hex::encode(self.0)
    }

    /// Parse a 128-hex fingerprint. Either case accepted; stored canonically.
    pub fn from_hex(s: &str) -> Result<Self, KeymeshError> {
        if s.len() != FINGERPRINT_HEX_CHARS {
            return Err(KeymeshError::InvalidArgument(format!(
                "fingerprint must be {} hex chars, got {}",
                FINGERPRINT_HEX_CHARS,
                s.len()
            )));
        }
        let bytes = hex::decode(s)
            .map_err(|_| KeymeshError::InvalidArgument("fingerprint is not hex".into()))?;
        let mut arr = [0u8; FINGERPRINT_BYTES];
        arr.copy_from_slice(&bytes);
        Ok(Self(arr))
    }

    /// True when `s` has the shape of a fingerprint (128 hex chars).
    pub fn looks_like_fingerprint(s: &str) -> bool {
        s.len() == FINGERPRINT_HEX_CHARS && s.bytes().all(|b| b.is_ascii_hexdigit())
    }
}

impl fmt::Display for Fingerprint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.to_hex())
    }
}

impl fmt::Debug for Fingerprint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Fingerprint({}…)", &self.to_hex()[..16])
    }
}

// On the wire (JSON records) a fingerprint is its hex string.
impl Serialize for Fingerprint {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.to_hex())
    }
}

impl<'de> Deserialize<'de> for Fingerprint {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        Fingerprint::from_hex(&s).map_err(D::Error::custom)
    }
}

// ── DilithiumPublicKey ───────────────────────────────────────────────────────

/// Dilithium5 public key (2592 bytes per NIST FIPS 204).
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DilithiumPublicKey(pub Vec<u8>);

impl DilithiumPublicKey {
    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }
}

impl fmt::Debug for DilithiumPublicKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "DilithiumPublicKey({}b)", self.0.len())
    }
}

/// Dilithium5 detached signature (4595 bytes per NIST FIPS 204).
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DilithiumSignature(pub Vec<u8>);

impl DilithiumSignature {
    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }
}

impl fmt::Debug for DilithiumSignature {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "DilithiumSignature({}b)", self.0.len())
    }
}

// ── KyberPublicKey ───────────────────────────────────────────────────────────

/// Kyber1024 encapsulation key (1568 bytes per NIST FIPS 203).
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct KyberPublicKey(pub Vec<u8>);

impl KyberPublicKey {
    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }
}

impl fmt::Debug for KyberPublicKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "KyberPublicKey({}b)", self.0.len())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fingerprint_hex_round_trip() {
        let fp = Fingerprint::from_bytes([0xAB; FINGERPRINT_BYTES]);
        let hex = fp.to_hex();
        assert_eq!(hex.len(), FINGERPRINT_HEX_CHARS);
        assert_eq!(hex, hex.to_lowercase());
        assert_eq!(Fingerprint::from_hex(&hex).unwrap(), fp);
    }

    #[test]
    fn fingerprint_rejects_bad_input() {
        assert!(Fingerprint::from_hex("abcd").is_err());
        let not_hex = "zz".repeat(64);
        assert!(Fingerprint::from_hex(&not_hex).is_err());
    }

    #[test]
    fn fingerprint_shape_check() {
        assert!(Fingerprint::looks_like_fingerprint(&"a1".repeat(64)));
        assert!(!Fingerprint::looks_like_fingerprint("alice"));
        assert!(!Fingerprint::looks_like_fingerprint(&"g1".repeat(64)));
    }

    #[test]
    fn fingerprint_serde_is_hex_string() {
        let fp = Fingerprint::from_bytes([7; FINGERPRINT_BYTES]);
        let json = serde_json::to_string(&fp).unwrap();
        assert_eq!(json, format!("\"{}\"", fp.to_hex()));
        let back: Fingerprint = serde_json::from_str(&json).unwrap();
        assert_eq!(back, fp);
    }
}
