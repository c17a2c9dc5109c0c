use thiserror::Error;

/// Unified error type for every Keymesh overlay service.
///
/// Each variant is one of the machine-readable kinds the overlay reports to
/// applications. Remote failures never panic: adversarial records map to
/// `SignatureInvalid`, network faults to `Transport`, and application-level
/// errors from the underlying RPC layer to `Rpc` (never retried against
/// alternate endpoints).
#[derive(Debug, Error)]
pub enum KeymeshError {
    // ── Input validation ─────────────────────────────────────────────────────
    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    // ── Lookup ───────────────────────────────────────────────────────────────
    #[error("not found")]
    NotFound,

    // ── Verification ─────────────────────────────────────────────────────────
    #[error("signature verification failed")]
    SignatureInvalid,

    // ── Network ──────────────────────────────────────────────────────────────
    #[error("transport failure: {0}")]
    Transport(String),

    #[error("rpc error: {0}")]
    Rpc(String),

    /// The permanent-put confirmation handshake exceeded its window.
    #[error("operation timed out")]
    Timeout,

    // ── Ownership ────────────────────────────────────────────────────────────
    #[error("conflict: {0}")]
    Conflict(String),

    /// Rejected by the external ecosystem (e.g. payment verification).
    #[error("unauthorized")]
    Unauthorized,

    // ── Local state ──────────────────────────────────────────────────────────
    #[error("storage error: {0}")]
    Storage(String),

    #[error("serialization error: {0}")]
    Serialization(String),
}
