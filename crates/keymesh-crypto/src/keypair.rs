use keymesh_core::types::{DilithiumPublicKey, Fingerprint, KyberPublicKey};
use pqcrypto_dilithium::dilithium5;
use pqcrypto_kyber::kyber1024;
use pqcrypto_traits::kem::{PublicKey as KemPublicKey, SecretKey as KemSecretKey};
use pqcrypto_traits::sign::{PublicKey, SecretKey};
use serde::{Deserialize, Serialize};
use zeroize::Zeroizing;

use crate::fingerprint::fingerprint_from_pubkey;

/// A Keymesh identity keypair: Dilithium5 signing keys, Kyber1024
/// encapsulation keys, and the derived fingerprint.
///
/// Secret key bytes are wiped on drop.
#[derive(Serialize, Deserialize)]
pub struct KeyPair {
    pub fingerprint: Fingerprint,
    pub dilithium_public: DilithiumPublicKey,
    pub kyber_public: KyberPublicKey,
    dilithium_secret: Vec<u8>,
    kyber_secret: Vec<u8>,
}

impl KeyPair {
    /// Generate a fresh Dilithium5 + Kyber1024 identity.
    pub fn generate() -> Self {
        let (dpk, dsk) = dilithium5::keypair();
        let (kpk, ksk) = kyber1024::keypair();
        let dpk_bytes = dpk.as_bytes().to_vec();
        let fingerprint = fingerprint_from_pubkey(&dpk_bytes);
        Self {
            fingerprint,
            dilithium_public: DilithiumPublicKey(dpk_bytes),
            kyber_public: KyberPublicKey(kpk.as_bytes().to_vec()),
            dilithium_secret: dsk.as_bytes().to_vec(),
            kyber_secret: ksk.as_bytes().to_vec(),
        }
    }

    /// Restore a KeyPair from raw key bytes (e.g. loaded from a keyfile).
    pub fn from_raw(
        dilithium_public: Vec<u8>,
        dilithium_secret: Vec<u8>,
        kyber_public: Vec<u8>,
        kyber_secret: Vec<u8>,
    ) -> Self {
        let fingerprint = fingerprint_from_pubkey(&dilithium_public);
        Self {
            fingerprint,
            dilithium_public: DilithiumPublicKey(dilithium_public),
            kyber_public: KyberPublicKey(kyber_public),
            dilithium_secret,
            kyber_secret,
        }
    }

    /// Sign `message` using the Dilithium5 secret key.
    pub fn sign(&self, message: &[u8]) -> keymesh_core::types::DilithiumSignature {
        let sk = Zeroizing::new(self.dilithium_secret.clone());
        crate::dilithium::sign(&sk, message).expect("sign with valid secret key is infallible")
    }

    /// Read-only view of the Dilithium5 secret key bytes.
    pub fn dilithium_secret_bytes(&self) -> &[u8] {
        &self.dilithium_secret
    }

    /// Read-only view of the Kyber1024 secret key bytes.
    pub fn kyber_secret_bytes(&self) -> &[u8] {
        &self.kyber_secret
    }
}

impl Drop for KeyPair {
    fn drop(&mut self) {
        use zeroize::Zeroize;
        self.dilithium_secret.zeroize();
        self.kyber_secret.zeroize();
    }
}

impl std::fmt::Debug for KeyPair {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "KeyPair {{ fingerprint: {:?} }}", self.fingerprint)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dilithium::verify_signature;
    use keymesh_core::constants::{DILITHIUM5_PUBLICKEY_BYTES, KYBER1024_PUBLICKEY_BYTES};

    #[test]
    fn generated_keys_have_spec_sizes() {
        let kp = KeyPair::generate();
        assert_eq!(kp.dilithium_public.0.len(), DILITHIUM5_PUBLICKEY_BYTES);
        assert_eq!(kp.kyber_public.0.len(), KYBER1024_PUBLICKEY_BYTES);
    }

    #[test]
    fn fingerprint_is_derived_from_signing_key() {
        let kp = KeyPair::generate();
        assert_eq!(
            kp.fingerprint,
            fingerprint_from_pubkey(&kp.dilithium_public.0)
        );
    }

    #[test]
    fn keypair_signs_verifiably() {
        let kp = KeyPair::generate();
        let sig = kp.sign(b"hello");
        assert!(verify_signature(&kp.dilithium_public, b"hello", &sig).is_ok());
    }
}
