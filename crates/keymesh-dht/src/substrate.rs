//! The substrate contract presented to overlay services.
//!
//! The API is synchronous: callers are application threads that block on a
//! single-shot completion channel with a timeout, while the network
//! implementation schedules I/O on its own runtime task. `get_async` is the
//! one cooperative entry point: its callback runs on the runtime task, not
//! the call site.

use std::time::Duration;

use keymesh_core::constants::{TTL_365DAY_SECS, TTL_7DAY_SECS, TYPE_365DAY, TYPE_7DAY};
use keymesh_core::KeymeshError;

/// Callback for [`DhtSubstrate::get_async`]. Invoked once per observed
/// value; return `false` to halt iteration. Unless halted, iteration ends
/// with a terminal `None`, which is also the whole delivery when the key
/// has no values.
pub type GetCallback = Box<dyn FnMut(Option<Vec<u8>>) -> bool + Send>;

/// Overlay health counters.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct DhtStats {
    pub known_nodes: usize,
    pub stored_values: usize,
    pub good_nodes_ipv4: usize,
    pub good_nodes_ipv6: usize,
}

impl DhtStats {
    /// Ready as soon as at least one good node is reachable over either
    /// address family.
    pub fn ready(&self) -> bool {
        self.good_nodes_ipv4 + self.good_nodes_ipv6 >= 1
    }
}

/// Select the value type for a requested TTL: a year or longer is long-lived,
/// anything else short-lived. `None` (permanent) is stored as long-lived and
/// republished indefinitely.
pub fn type_for_ttl(ttl: Option<Duration>) -> u32 {
    match ttl {
        None => TYPE_365DAY,
        Some(d) if d.as_secs() >= TTL_365DAY_SECS => TYPE_365DAY,
        Some(_) => TYPE_7DAY,
    }
}

/// Kademlia-class overlay with typed values, per-type TTL, and signed
/// replacing puts.
pub trait DhtSubstrate: Send + Sync {
    /// Unsigned put, default 7-day TTL. Repeated puts accumulate.
    fn put(&self, key: &[u8], value: &[u8]) -> Result<(), KeymeshError> {
        self.put_ttl(key, value, Some(Duration::from_secs(TTL_7DAY_SECS)))
    }

    /// Unsigned put with an explicit TTL. `None` marks the value permanent
    /// and performs the synchronous confirmation handshake: wait for a write
    /// acknowledgement, settle, and re-read; success only if the round trip
    /// observes the value. Handshake expiry is `KeymeshError::Timeout`.
    fn put_ttl(
        &self,
        key: &[u8],
        value: &[u8],
        ttl: Option<Duration>,
    ) -> Result<(), KeymeshError>;

    /// Signed put at a caller-chosen slot. A later put with the same
    /// (key, value_id) replaces this value; sequence numbers auto-increment.
    fn put_signed(
        &self,
        key: &[u8],
        value: &[u8],
        value_id: u64,
        ttl: Duration,
    ) -> Result<(), KeymeshError>;

    /// Signed put with infinite TTL: the only replacement primitive for
    /// permanent records. Overlay services keep their canonical record at
    /// `value_id = 1`.
    fn put_signed_permanent(
        &self,
        key: &[u8],
        value: &[u8],
        value_id: u64,
    ) -> Result<(), KeymeshError>;

    /// First value observed at `key`.
    fn get(&self, key: &[u8]) -> Result<Vec<u8>, KeymeshError> {
        self.get_all(key)?
            .into_iter()
            .next()
            .ok_or(KeymeshError::NotFound)
    }

    /// Every value currently held at `key` (append-only semantics force
    /// multi-version reads). Empty when the key is unknown.
    fn get_all(&self, key: &[u8]) -> Result<Vec<Vec<u8>>, KeymeshError>;

    /// Cooperative get: never blocks the caller; the callback fires on the
    /// runtime task once per value and may halt iteration.
    fn get_async(&self, key: &[u8], callback: GetCallback);

    /// Best-effort removal. Values also expire naturally.
    fn delete(&self, key: &[u8]) -> Result<(), KeymeshError>;

    fn get_stats(&self) -> Result<DhtStats, KeymeshError>;

    /// Re-insert a previously persisted envelope under its ORIGINAL key,
    /// preserving type, slot, and TTL. Used by restore and republish.
    fn republish(&self, key: &[u8], envelope_bytes: &[u8]) -> Result<(), KeymeshError>;
}
