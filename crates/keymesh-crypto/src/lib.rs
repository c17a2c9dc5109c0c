pub mod dilithium;
pub mod fingerprint;
pub mod keypair;
pub mod kyber;

pub use dilithium::{sign, verify_signature, SignatureError};
pub use fingerprint::{fingerprint_from_pubkey, overlay_key, sha3_512};
pub use keypair::KeyPair;
