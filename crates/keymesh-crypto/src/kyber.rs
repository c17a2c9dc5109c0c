//! Kyber1024 key encapsulation.
//!
//! The overlay itself never encrypts: the Kyber public key rides in the key
//! bundle so that peers can encapsulate message keys at the application
//! layer. These wrappers are that collaborator surface.

use keymesh_core::types::KyberPublicKey;
use pqcrypto_kyber::kyber1024;
use pqcrypto_traits::kem::{Ciphertext, PublicKey, SecretKey, SharedSecret};

use crate::dilithium::SignatureError;

/// Encapsulate against a peer's Kyber1024 public key.
/// Returns `(shared_secret, ciphertext)`.
pub fn encapsulate(public_key: &KyberPublicKey) -> Result<(Vec<u8>, Vec<u8>), SignatureError> {
    let pk = kyber1024::PublicKey::from_bytes(&public_key.0).map_err(|_| {
        SignatureError::InvalidPublicKeyLength {
            expected: kyber1024::public_key_bytes(),
            got: public_key.0.len(),
        }
    })?;
    let (shared, ct) = kyber1024::encapsulate(&pk);
    Ok((shared.as_bytes().to_vec(), ct.as_bytes().to_vec()))
}

/// Recover the shared secret from a ciphertext with our Kyber1024 secret key.
pub fn decapsulate(
    ciphertext: &[u8],
    secret_key_bytes: &[u8],
) -> Result<Vec<u8>, SignatureError> {
    let sk = kyber1024::SecretKey::from_bytes(secret_key_bytes)
        .map_err(|_| SignatureError::InvalidSignature)?;
    let ct = kyber1024::Ciphertext::from_bytes(ciphertext)
        .map_err(|_| SignatureError::InvalidSignature)?;
    let shared = kyber1024::decapsulate(&ct, &sk);
    Ok(shared.as_bytes().to_vec())
}
