use keymesh_core::types::{DilithiumPublicKey, DilithiumSignature};
use keymesh_core::KeymeshError;
use pqcrypto_dilithium::dilithium5;
use pqcrypto_traits::sign::{DetachedSignature, PublicKey, SecretKey};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum SignatureError {
    #[error("invalid signature")]
    InvalidSignature,
    #[error("invalid public key length: expected {expected}, got {got}")]
    InvalidPublicKeyLength { expected: usize, got: usize },
}

impl From<SignatureError> for KeymeshError {
    fn from(_: SignatureError) -> Self {
        KeymeshError::SignatureInvalid
    }
}

/// Sign `message` with a Dilithium5 secret key.
/// Returns a detached signature.
pub fn sign(secret_key_bytes: &[u8], message: &[u8]) -> Result<DilithiumSignature, SignatureError> {
    let sk = dilithium5::SecretKey::from_bytes(secret_key_bytes)
        .map_err(|_| SignatureError::InvalidSignature)?;
    let sig = dilithium5::detached_sign(message, &sk);
    Ok(DilithiumSignature(sig.as_bytes().to_vec()))
}

/// Verify a detached Dilithium5 signature.
pub fn verify_signature(
    public_key: &DilithiumPublicKey,
    message: &[u8],
    signature: &DilithiumSignature,
) -> Result<(), SignatureError> {
    let pk = dilithium5::PublicKey::from_bytes(&public_key.0).map_err(|_| {
        SignatureError::InvalidPublicKeyLength {
            expected: dilithium5::public_key_bytes(),
            got: public_key.0.len(),
        }
    })?;
    let sig = dilithium5::DetachedSignature::from_bytes(&signature.0)
        .map_err(|_| SignatureError::InvalidSignature)?;
    dilithium5::verify_detached_signature(&sig, message, &pk)
        .map_err(|_| SignatureError::InvalidSignature)
}

#[cfg(test)]
mod tests {
    use super::*;
    use pqcrypto_dilithium::dilithium5;

    #[test]
    fn sign_verify_round_trip() {
        let (pk, sk) = dilithium5::keypair();
        let pk_bytes = DilithiumPublicKey(pk.as_bytes().to_vec());
        let message = b"names are aliases; keys are identity";

        let sig = sign(sk.as_bytes(), message).unwrap();
        assert!(verify_signature(&pk_bytes, message, &sig).is_ok());
    }

    #[test]
    fn tampered_message_fails() {
        let (pk, sk) = dilithium5::keypair();
        let pk_bytes = DilithiumPublicKey(pk.as_bytes().to_vec());
        let sig = sign(sk.as_bytes(), b"original").unwrap();
        assert!(verify_signature(&pk_bytes, b"tampered", &sig).is_err());
    }

    #[test]
    fn wrong_key_fails() {
        let (_, sk) = dilithium5::keypair();
        let (other_pk, _) = dilithium5::keypair();
        let other = DilithiumPublicKey(other_pk.as_bytes().to_vec());
        let sig = sign(sk.as_bytes(), b"message").unwrap();
        assert!(verify_signature(&other, b"message", &sig).is_err());
    }
}
