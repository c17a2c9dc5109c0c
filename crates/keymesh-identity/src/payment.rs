//! External payment-verification collaborator.
//!
//! Name registration is gated on an on-chain payment receipt. The chain RPC
//! itself lives outside this crate; the registry only needs a yes/no with a
//! failure-mode split: a transaction that exists but fails validation
//! (wrong amount, recipient, or memo) is a rejection, while an unreachable
//! or erroring RPC endpoint is an infrastructure fault; the two map to
//! different overlay errors.

use thiserror::Error;

use keymesh_core::KeymeshError;

#[derive(Debug, Error)]
pub enum PaymentError {
    /// The transaction was found but does not pay for this name.
    #[error("registration transaction rejected: {0}")]
    Rejected(String),
    /// RPC failure or transaction not found.
    #[error("registration rpc failed: {0}")]
    Rpc(String),
}

impl From<PaymentError> for KeymeshError {
    fn from(e: PaymentError) -> Self {
        match e {
            PaymentError::Rejected(_) => KeymeshError::Unauthorized,
            PaymentError::Rpc(msg) => KeymeshError::Rpc(msg),
        }
    }
}

/// Verifies that `tx_hash` on `network` pays for the registration of
/// `expected_name` (amount, recipient, and memo binding the name).
pub trait PaymentVerifier: Send + Sync {
    fn verify_registration(
        &self,
        tx_hash: &str,
        network: &str,
        expected_name: &str,
    ) -> Result<(), PaymentError>;
}
