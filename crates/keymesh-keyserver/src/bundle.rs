use serde::{Deserialize, Serialize};

use keymesh_core::codec::ByteWriter;
use keymesh_core::constants::MAX_DISPLAY_NAME_CHARS;
use keymesh_core::types::{DilithiumPublicKey, DilithiumSignature, Fingerprint};
use keymesh_core::KeymeshError;
use keymesh_crypto::{fingerprint_from_pubkey, verify_signature};

/// A published key bundle: the public half of an identity, self-signed.
///
/// Wire format is UTF-8 JSON with hex-encoded byte fields.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct KeyBundle {
    #[serde(with = "hex::serde")]
    pub dilithium_pubkey: Vec<u8>,
    #[serde(with = "hex::serde")]
    pub kyber_pubkey: Vec<u8>,
    pub fingerprint: Fingerprint,
    pub display_name: Option<String>,
    pub timestamp: u64,
    /// Monotonic per identity; bumped on every key rotation.
    pub version: u32,
    #[serde(with = "hex::serde")]
    pub signature: Vec<u8>,
}

impl KeyBundle {
    /// Canonical signing input:
    /// `identity_bytes ‖ dilithium_pub ‖ kyber_pub ‖ be64(timestamp) ‖
    /// be32(version) ‖ fingerprint_hex_bytes`; identity_bytes is the
    /// display-name UTF-8 (empty when unset).
    pub fn signing_bytes(&self) -> Vec<u8> {
        let name = self.display_name.as_deref().unwrap_or("");
        let fp_hex = self.fingerprint.to_hex();
        let mut w = ByteWriter::with_capacity(
            name.len() + self.dilithium_pubkey.len() + self.kyber_pubkey.len() + 12 + 128,
        );
        w.put_bytes(name.as_bytes())
            .put_bytes(&self.dilithium_pubkey)
            .put_bytes(&self.kyber_pubkey)
            .put_u64(self.timestamp)
            .put_u32(self.version)
            .put_bytes(fp_hex.as_bytes());
        w.into_bytes()
    }

    /// Build and sign a bundle.
    pub fn build(
        fingerprint: Fingerprint,
        display_name: Option<String>,
        dilithium_pubkey: Vec<u8>,
        kyber_pubkey: Vec<u8>,
        timestamp: u64,
        version: u32,
        dilithium_secret: &[u8],
    ) -> Result<Self, KeymeshError> {
        if let Some(name) = &display_name {
            if name.chars().count() > MAX_DISPLAY_NAME_CHARS {
                return Err(KeymeshError::InvalidArgument(format!(
                    "display name exceeds {} characters",
                    MAX_DISPLAY_NAME_CHARS
                )));
            }
        }
        let mut bundle = Self {
            dilithium_pubkey,
            kyber_pubkey,
            fingerprint,
            display_name,
            timestamp,
            version,
            signature: Vec::new(),
        };
        let sig = keymesh_crypto::sign(dilithium_secret, &bundle.signing_bytes())
            .map_err(|_| KeymeshError::SignatureInvalid)?;
        bundle.signature = sig.0;
        Ok(bundle)
    }

    /// Full verification: the fingerprint must be the digest of the embedded
    /// signing key, and the signature must verify under that key. No
    /// external PKI is consulted.
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
    use keymesh_core::time::now_secs;
    use keymesh_crypto::KeyPair;

    fn bundle_for(kp: &KeyPair, name: Option<&str>) -> KeyBundle {
        KeyBundle::build(
            kp.fingerprint.clone(),
            name.map(String::from),
            kp.dilithium_public.0.clone(),
            kp.kyber_public.0.clone(),
            now_secs(),
            1,
            kp.dilithium_secret_bytes(),
        )
        .unwrap()
    }

    #[test]
    fn built_bundle_verifies() {
        let kp = KeyPair::generate();
        assert!(bundle_for(&kp, Some("alice")).verify().is_ok());
        assert!(bundle_for(&kp, None).verify().is_ok());
    }

    #[test]
    fn wrong_fingerprint_is_rejected() {
        let kp = KeyPair::generate();
        let mut bundle = bundle_for(&kp, Some("alice"));
        bundle.fingerprint = Fingerprint::from_bytes([0; 64]);
        assert!(matches!(
            bundle.verify(),
            Err(KeymeshError::SignatureInvalid)
        ));
    }

    #[test]
    fn tampered_name_is_rejected() {
        let kp = KeyPair::generate();
        let mut bundle = bundle_for(&kp, Some("alice"));
        bundle.display_name = Some("mallory".into());
        assert!(bundle.verify().is_err());
    }

    #[test]
    fn oversized_display_name_rejected_at_build() {
        let kp = KeyPair::generate();
        let long = "x".repeat(MAX_DISPLAY_NAME_CHARS + 1);
        let res = KeyBundle::build(
            kp.fingerprint.clone(),
            Some(long),
            kp.dilithium_public.0.clone(),
            kp.kyber_public.0.clone(),
            0,
            1,
            kp.dilithium_secret_bytes(),
        );
        assert!(res.is_err());
    }

    #[test]
    fn json_round_trip_preserves_bytes() {
        let kp = KeyPair::generate();
        let bundle = bundle_for(&kp, Some("alice"));
        let json = bundle.to_json().unwrap();
        let back = KeyBundle::from_json(&json).unwrap();
        assert_eq!(back, bundle);
        assert!(back.verify().is_ok());
    }
}
