use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use keymesh_core::codec::ByteWriter;
use keymesh_core::types::{DilithiumPublicKey, DilithiumSignature, Fingerprint};
use keymesh_core::KeymeshError;
use keymesh_crypto::{fingerprint_from_pubkey, verify_signature};

/// The canonical signed identity record: key bundle fields plus on-chain
/// anchored name registration, wallet addresses, social handles, and a bio.
///
/// Published at `SHA3-512(fp ‖ ":profile")` as a signed permanent value,
/// `value_id = 1`; wire format is UTF-8 JSON with hex byte fields.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct IdentityRecord {
    pub fingerprint: Fingerprint,
    #[serde(with = "hex::serde")]
    pub dilithium_pubkey: Vec<u8>,
    #[serde(with = "hex::serde")]
    pub kyber_pubkey: Vec<u8>,

    // ── Name registration ────────────────────────────────────────────────────
    pub has_registered_name: bool,
    pub registered_name: String,
    pub name_registered_at: u64,
    pub name_expires_at: u64,
    pub registration_tx_hash: String,
    pub registration_network: String,
    pub name_version: u32,

    // ── Profile ──────────────────────────────────────────────────────────────
    /// network → address. BTreeMap so the canonical layout is order-stable.
    pub wallets: BTreeMap<String, String>,
    /// platform → handle.
    pub socials: BTreeMap<String, String>,
    pub bio: String,
    pub profile_picture_hash: String,

    pub timestamp: u64,
    pub version: u32,
    #[serde(with = "hex::serde")]
    pub signature: Vec<u8>,
}

/// Canonical rendering of a string map: sorted `k=v` pairs joined with ';'.
fn map_bytes(map: &BTreeMap<String, String>) -> Vec<u8> {
    let mut out = Vec::new();
    for (i, (k, v)) in map.iter().enumerate() {
        if i > 0 {
            out.push(b';');
        }
        out.extend_from_slice(k.as_bytes());
        out.push(b'=');
        out.extend_from_slice(v.as_bytes());
    }
    out
}

impl IdentityRecord {
    /// Empty record for an identity that has published keys but nothing else.
    pub fn skeleton(
        fingerprint: Fingerprint,
        dilithium_pubkey: Vec<u8>,
        kyber_pubkey: Vec<u8>,
    ) -> Self {
        Self {
            fingerprint,
            dilithium_pubkey,
            kyber_pubkey,
            has_registered_name: false,
            registered_name: String::new(),
            name_registered_at: 0,
            name_expires_at: 0,
            registration_tx_hash: String::new(),
            registration_network: String::new(),
            name_version: 0,
            wallets: BTreeMap::new(),
            socials: BTreeMap::new(),
            bio: String::new(),
            profile_picture_hash: String::new(),
            timestamp: 0,
            version: 0,
            signature: Vec::new(),
        }
    }

    /// Canonical signing input. Field order is fixed by the protocol; every
    /// integer is big-endian fixed width.
    pub fn signing_bytes(&self) -> Vec<u8> {
        let fp_hex = self.fingerprint.to_hex();
        let mut w = ByteWriter::new();
        w.put_bytes(fp_hex.as_bytes())
            .put_bytes(&self.dilithium_pubkey)
            .put_bytes(&self.kyber_pubkey)
            .put_u8(self.has_registered_name as u8)
            .put_bytes(self.registered_name.as_bytes())
            .put_u64(self.name_registered_at)
            .put_u64(self.name_expires_at)
            .put_bytes(self.registration_tx_hash.as_bytes())
            .put_bytes(self.registration_network.as_bytes())
            .put_u32(self.name_version)
            .put_bytes(&map_bytes(&self.wallets))
            .put_bytes(&map_bytes(&self.socials))
            .put_bytes(self.bio.as_bytes())
            .put_bytes(self.profile_picture_hash.as_bytes())
            .put_u64(self.timestamp)
            .put_u32(self.version);
        w.into_bytes()
    }

    /// Re-sign after mutation.
    pub fn sign(&mut self, dilithium_secret: &[u8]) -> Result<(), KeymeshError> {
        let sig = keymesh_crypto::sign(dilithium_secret, &self.signing_bytes())
            .map_err(|_| KeymeshError::SignatureInvalid)?;
        self.signature = sig.0;
        Ok(())
    }

    /// Self-contained verification: the fingerprint is the digest of the
    /// embedded signing key and the signature verifies under it.
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

    /// Whether the registered name is live at `now`.
    pub fn name_active(&self, now: u64) -> bool {
        self.has_registered_name && now < self.name_expires_at
    }

    pub fn to_json(&self) -> Result<Vec<u8>, KeymeshError> {
        serde_json::to_vec(self).map_err(|e| KeymeshError::Serialization(e.to_string()))
    }

    pub fn from_json(bytes: &[u8]) -> Result<Self, KeymeshError> {
        serde_json::from_slice(bytes).map_err(|e| KeymeshError::Serialization(e.to_string()))
    }
}

/// Profile fields an application may overwrite in one update.
#[derive(Clone, Debug, Default)]
pub struct ProfilePatch {
    pub wallets: Option<BTreeMap<String, String>>,
    pub socials: Option<BTreeMap<String, String>>,
    pub bio: Option<String>,
    pub profile_picture_hash: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use keymesh_crypto::KeyPair;

    fn signed_skeleton(kp: &KeyPair) -> IdentityRecord {
        let mut record = IdentityRecord::skeleton(
            kp.fingerprint.clone(),
            kp.dilithium_public.0.clone(),
            kp.kyber_public.0.clone(),
        );
        record.timestamp = 1_000;
        record.version = 1;
        record.sign(kp.dilithium_secret_bytes()).unwrap();
        record
    }

    #[test]
    fn signed_record_verifies() {
        let kp = KeyPair::generate();
        assert!(signed_skeleton(&kp).verify().is_ok());
    }

    #[test]
    fn any_field_mutation_breaks_the_signature() {
        let kp = KeyPair::generate();
        let mut record = signed_skeleton(&kp);
        record.bio = "edited".into();
        assert!(record.verify().is_err());

        let mut record = signed_skeleton(&kp);
        record.wallets.insert("btc".into(), "1abc".into());
        assert!(record.verify().is_err());

        let mut record = signed_skeleton(&kp);
        record.has_registered_name = true;
        assert!(record.verify().is_err());
    }

    #[test]
    fn canonical_map_rendering_is_sorted_and_stable() {
        let mut a = BTreeMap::new();
        a.insert("eth".to_string(), "0xabc".to_string());
        a.insert("btc".to_string(), "1abc".to_string());
        assert_eq!(map_bytes(&a), b"btc=1abc;eth=0xabc".to_vec());
        assert!(map_bytes(&BTreeMap::new()).is_empty());
    }

    #[test]
    fn name_active_window() {
        let kp = KeyPair::generate();
        let mut record = signed_skeleton(&kp);
        record.has_registered_name = true;
        record.name_expires_at = 500;
        assert!(record.name_active(499));
        assert!(!record.name_active(500));
    }

    #[test]
    fn json_round_trip() {
        let kp = KeyPair::generate();
        let record = signed_skeleton(&kp);
        let back = IdentityRecord::from_json(&record.to_json().unwrap()).unwrap();
        assert_eq!(back, record);
        assert!(back.verify().is_ok());
    }
}
