//! ─── Keymesh Protocol Constants ─────────────────────────────────────────────
//!
//! Identifiers are SHA3-512 digests of Dilithium5 public keys; names are
//! aliases. All multi-byte integers are big-endian on the wire and in
//! signing buffers.

// ── DHT value types ──────────────────────────────────────────────────────────

/// Short-lived values (offline messages, transient records). TTL 7 days.
pub const TYPE_7DAY: u32 = 0x1001;

/// Long-lived values (key bundles, aliases, profiles). TTL 365 days.
/// Permanent values carry this tag and are republished indefinitely by
/// bootstrap nodes.
pub const TYPE_365DAY: u32 = 0x1002;

/// TTL of `TYPE_7DAY` values, seconds.
pub const TTL_7DAY_SECS: u64 = 7 * 24 * 3600;

/// TTL of `TYPE_365DAY` values, seconds.
pub const TTL_365DAY_SECS: u64 = 365 * 24 * 3600;

/// Largest value accepted at a single DHT key.
pub const MAX_VALUE_SIZE: usize = 56 * 1024;

/// Overlay convention: the canonical record at a key lives at this value id.
pub const CANONICAL_VALUE_ID: u64 = 1;

// ── Key material sizes ───────────────────────────────────────────────────────

/// Dilithium5 public key length per NIST FIPS 204.
pub const DILITHIUM5_PUBLICKEY_BYTES: usize = 2592;

/// Dilithium5 detached signature length per NIST FIPS 204.
pub const DILITHIUM5_SIGNATURE_BYTES: usize = 4595;

/// Kyber1024 public key length per NIST FIPS 203.
pub const KYBER1024_PUBLICKEY_BYTES: usize = 1568;

/// Raw fingerprint digest length (SHA3-512).
pub const FINGERPRINT_BYTES: usize = 64;

/// Fingerprint rendered as lowercase hex.
pub const FINGERPRINT_HEX_CHARS: usize = 128;

// ── Names and display names ──────────────────────────────────────────────────

/// Registered names: 3–20 characters, `[A-Za-z0-9]`, compared lowercase.
pub const NAME_MIN_CHARS: usize = 3;
pub const NAME_MAX_CHARS: usize = 20;

/// Display names attached to key bundles.
pub const MAX_DISPLAY_NAME_CHARS: usize = 128;

/// A name registration or renewal is valid for this long.
pub const NAME_REGISTRATION_SECS: u64 = TTL_365DAY_SECS;

// ── DHT key derivation suffixes ──────────────────────────────────────────────
//
// Overlay keys are `SHA3-512(input)` where input concatenates the fingerprint
// hex (or lowercase name) with one of these suffixes.

pub const KEY_SUFFIX_PUBKEY: &str = ":pubkey";
pub const KEY_SUFFIX_REVERSE: &str = ":reverse";
pub const KEY_SUFFIX_LOOKUP: &str = ":lookup";
pub const KEY_SUFFIX_PROFILE: &str = ":profile";

/// Outbox keys: `SHA3-512(sender_fp ‖ ":outbox:" ‖ recipient_fp)`.
pub const KEY_INFIX_OUTBOX: &str = ":outbox:";

// ── Outbox framing ───────────────────────────────────────────────────────────

/// Leading magic of every serialized outbox entry.
pub const OUTBOX_MAGIC: u32 = 0xDEAD_BEEF;

/// Outbox frame format version.
pub const OUTBOX_VERSION: u8 = 1;

/// Default message TTL when the sender does not choose one.
pub const DEFAULT_OUTBOX_TTL_SECS: u64 = TTL_7DAY_SECS;

// ── Substrate timing ─────────────────────────────────────────────────────────

/// Permanent-put handshake: wait this long for a write acknowledgement.
pub const PUT_CONFIRM_TIMEOUT_SECS: u64 = 30;

/// Permanent-put handshake: settle delay between write and verify read.
pub const PUT_VERIFY_DELAY_SECS: u64 = 5;

/// Read timeout for the verify step and for synchronous gets.
pub const GET_TIMEOUT_SECS: u64 = 10;

/// Generic timeout for synchronous substrate operations.
pub const DHT_OP_TIMEOUT_SECS: u64 = 10;

// ── Persistence ──────────────────────────────────────────────────────────────

/// Values closer than this to expiry are not worth persisting.
pub const PERSIST_FLOOR_SECS: u64 = 3600;

/// Bootstrap nodes re-put active persisted rows at this interval.
pub const REPUBLISH_INTERVAL_SECS: u64 = 3600;

/// Stored keys of these hex lengths are legacy derived infohashes
/// (20 raw bytes rendered as 40 hex chars, or hex of that hex). Republishing
/// them would re-hash the infohash and relocate the value; restore skips them.
pub const LEGACY_INFOHASH_HEX_LENS: [usize; 2] = [40, 80];
