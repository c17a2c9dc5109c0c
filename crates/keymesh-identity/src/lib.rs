//! Unified identity records and the payment-gated name registry.

pub mod payment;
pub mod record;
pub mod service;

pub use payment::{PaymentError, PaymentVerifier};
pub use record::{IdentityRecord, ProfilePatch};
pub use service::IdentityService;
