use serde::{Deserialize, Serialize};

use keymesh_core::codec::ByteWriter;
use keymesh_core::types::{DilithiumPublicKey, DilithiumSignature, Fingerprint};
use keymesh_core::KeymeshError;
use keymesh_crypto::{fingerprint_from_pubkey, verify_signature};

/// Reverse mapping: proof that the key holder asserted a display name at a
/// point in time. Stored at `SHA3-512(fp ‖ ":reverse")`, separate from the
/// forward bundle.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ReverseRecord {
    #[serde(with = "hex::serde")]
    pub dilithium_pubkey: Vec<u8>,
    /// The asserted display name.
    pub identity: String,
    pub timestamp: u64,
    pub fingerprint: Fingerprint,
    #[serde(with = "hex::serde")]
    pub signature: Vec<u8>,
}

impl ReverseRecord {
    /// Signature covers `dilithium_pub ‖ identity_bytes ‖ be64(timestamp)`.
    pub fn signing_bytes(&self) -> Vec<u8> {
        let mut w =
            ByteWriter::with_capacity(self.dilithium_pubkey.len() + self.identity.len() + 8);
        w.put_bytes(&self.dilithium_pubkey)
            .put_bytes(self.identity.as_bytes())
            .put_u64(self.timestamp);
        w.into_bytes()
    }

    pub fn build(
        dilithium_pubkey: Vec<u8>,
        identity: String,
        timestamp: u64,
        dilithium_secret: &[u8],
    ) -> Result<Self, KeymeshError> {
        let fingerprint = fingerprint_from_pubkey(&dilithium_pubkey);
        let mut record = Self {
            dilithium_pubkey,
            identity,
            timestamp,
            fingerprint,
            signature: Vec::new(),
        };
        let sig = keymesh_crypto::sign(dilithium_secret, &record.signing_bytes())
            .map_err(|_| KeymeshError::SignatureInvalid)?;
        record.signature = sig.0;
        Ok(record)
    }

    /// Recompute the fingerprint from the embedded key and verify the
    /// signature; either mismatch rejects the record.
    pub fn verify(&self) -> Result<(), KeymeshError> {
        if fingerprint_from_pubkey(&self.dilithium_pubkey) != self.fingerprint {
            return Err(KeymeshError::SignatureInvalid);
        }
        verify_signature(
            &DilithiumPublicKey(self.dilithium_pubkey.clone()),
            &self.signing_bytes(),
            &DilithiumSignature(self.signature.clone()),
        )
        .map_err(|_| KeymeshError::SignatureInvalid)
    }

    pub fn to_json(&self) -> Result<Vec<u8>, KeymeshError> {
        serde_json::to_vec(self).map_err(|e| KeymeshError::Serialization(e.to_string()))
    }

    pub fn from_json(bytes: &[u8]) -> Result<Self, KeymeshError> {
        serde_json::from_slice(bytes).map_err(|e| KeymeshError::Serialization(e.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use keymesh_crypto::KeyPair;

    #[test]
    fn reverse_record_round_trip() {
        let kp = KeyPair::generate();
        let record = ReverseRecord::build(
            kp.dilithium_public.0.clone(),
            "alice".into(),
            42,
            kp.dilithium_secret_bytes(),
        )
        .unwrap();
        assert!(record.verify().is_ok());
        assert_eq!(record.fingerprint, kp.fingerprint);

        let back = ReverseRecord::from_json(&record.to_json().unwrap()).unwrap();
        assert_eq!(back, record);
    }

    #[test]
    fn foreign_pubkey_fails_fingerprint_check() {
        let kp = KeyPair::generate();
        let other = KeyPair::generate();
        let mut record = ReverseRecord::build(
            kp.dilithium_public.0.clone(),
            "alice".into(),
            42,
            kp.dilithium_secret_bytes(),
        )
        .unwrap();
        // Swap in another identity's key: digest no longer matches.
        record.dilithium_pubkey = other.dilithium_public.0.clone();
        assert!(record.verify().is_err());
    }

    #[test]
    fn tampered_identity_fails_signature() {
        let kp = KeyPair::generate();
        let mut record = ReverseRecord::build(
            kp.dilithium_public.0.clone(),
            "alice".into(),
            42,
            kp.dilithium_secret_bytes(),
        )
        .unwrap();
        record.identity = "mallory".into();
        assert!(record.verify().is_err());
    }
}
