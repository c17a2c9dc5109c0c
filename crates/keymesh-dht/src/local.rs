//! In-process substrate implementation.
//!
//! Same envelope, slot, and TTL semantics as the network node, minus the
//! network: puts merge straight into a local table and the permanent-put
//! handshake degenerates to an immediate read-back. Backs the overlay test
//! suites and bootstrap-less tooling.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use keymesh_core::time::now_secs;
use keymesh_core::KeymeshError;
use keymesh_crypto::KeyPair;
use keymesh_store::{should_persist, PersistentStore, StoredValue};

use crate::record::{RecordEnvelope, RecordSet};
use crate::substrate::{type_for_ttl, DhtStats, DhtSubstrate, GetCallback};

pub struct LocalDht {
    sets: Arc<Mutex<HashMap<Vec<u8>, RecordSet>>>,
    keypair: Arc<KeyPair>,
    store: Option<Arc<PersistentStore>>,
}

impl LocalDht {
    /// Ephemeral node: fresh record-signing identity, no persistence.
    pub fn new() -> Self {
        Self {
            sets: Arc::new(Mutex::new(HashMap::new())),
            keypair: Arc::new(KeyPair::generate()),
            store: None,
        }
    }

    /// Bootstrap-style node: accepted values are mirrored into `store`.
    pub fn with_store(store: Arc<PersistentStore>) -> Self {
        Self {
            sets: Arc::new(Mutex::new(HashMap::new())),
            keypair: Arc::new(KeyPair::generate()),
            store: Some(store),
        }
    }

    fn insert_envelope(
        &self,
        key: &[u8],
        env: RecordEnvelope,
        persist: bool,
    ) -> Result<(), KeymeshError> {
        let now = now_secs();
        let mut sets = self.sets.lock().expect("record table mutex poisoned");
        let set = sets.entry(key.to_vec()).or_default();
        let changed = set.merge_entry(env.clone(), now)?;
        drop(sets);

        if changed && persist {
            if let Some(store) = &self.store {
                if should_persist(env.value_type(), env.expires_at(), now) {
                    store.put(&StoredValue {
                        key: key.to_vec(),
                        value_id: env.slot_id(),
                        value: env.encode()?,
                        value_type: env.value_type(),
                        created_at: env.created_at(),
                        expires_at: env.expires_at(),
                    })?;
                }
            }
        }
        Ok(())
    }

    fn expires_from_ttl(ttl: Option<Duration>, now: u64) -> u64 {
        match ttl {
            None => 0,
            Some(d) => now + d.as_secs(),
        }
    }
}

impl Default for LocalDht {
    fn default() -> Self {
        Self::new()
    }
}

impl DhtSubstrate for LocalDht {
    fn put_ttl(
        &self,
        key: &[u8],
        value: &[u8],
        ttl: Option<Duration>,
    ) -> Result<(), KeymeshError> {
        let now = now_secs();
        let env = RecordEnvelope::new_unsigned(
            type_for_ttl(ttl),
            value.to_vec(),
            now,
            Self::expires_from_ttl(ttl, now),
        );
        self.insert_envelope(key, env, true)?;

        if ttl.is_none() {
            // In-process confirmation: the read-back is the round trip.
            let present = self.get_all(key)?.iter().any(|v| v == value);
            if !present {
                return Err(KeymeshError::Timeout);
            }
        }
        Ok(())
    }

    fn put_signed(
        &self,
        key: &[u8],
        value: &[u8],
        value_id: u64,
        ttl: Duration,
    ) -> Result<(), KeymeshError> {
        let now = now_secs();
        let seq = {
            let sets = self.sets.lock().expect("record table mutex poisoned");
            sets.get(key)
                .and_then(|s| s.highest_seq(value_id))
                .map_or(1, |s| s + 1)
        };
        let env = RecordEnvelope::new_signed(
            &self.keypair,
            type_for_ttl(Some(ttl)),
            value_id,
            seq,
            value.to_vec(),
            now,
            now + ttl.as_secs(),
        );
        self.insert_envelope(key, env, true)
    }

    fn put_signed_permanent(
        &self,
        key: &[u8],
        value: &[u8],
        value_id: u64,
    ) -> Result<(), KeymeshError> {
        let now = now_secs();
        let seq = {
            let sets = self.sets.lock().expect("record table mutex poisoned");
            sets.get(key)
                .and_then(|s| s.highest_seq(value_id))
                .map_or(1, |s| s + 1)
        };
        let env = RecordEnvelope::new_signed(
            &self.keypair,
            type_for_ttl(None),
            value_id,
            seq,
            value.to_vec(),
            now,
            0,
        );
        self.insert_envelope(key, env, true)
    }

    fn get_all(&self, key: &[u8]) -> Result<Vec<Vec<u8>>, KeymeshError> {
        let now = now_secs();
        let sets = self.sets.lock().expect("record table mutex poisoned");
        Ok(sets.get(key).map(|s| s.values(now)).unwrap_or_default())
    }

    fn get_async(&self, key: &[u8], mut callback: GetCallback) {
        let values = self.get_all(key).unwrap_or_default();
        std::thread::spawn(move || {
            for v in values {
                if !callback(Some(v)) {
                    return;
                }
            }
            callback(None);
        });
    }

    fn delete(&self, key: &[u8]) -> Result<(), KeymeshError> {
        let mut sets = self.sets.lock().expect("record table mutex poisoned");
        sets.remove(key);
        drop(sets);
        if let Some(store) = &self.store {
            store.delete_key(key)?;
        }
        Ok(())
    }

    fn get_stats(&self) -> Result<DhtStats, KeymeshError> {
        let now = now_secs();
        let sets = self.sets.lock().expect("record table mutex poisoned");
        let stored_values = sets.values().map(|s| s.values(now).len()).sum();
        Ok(DhtStats {
            known_nodes: 0,
            stored_values,
            good_nodes_ipv4: 0,
            good_nodes_ipv6: 0,
        })
    }

    fn republish(&self, key: &[u8], envelope_bytes: &[u8]) -> Result<(), KeymeshError> {
        let env = RecordEnvelope::decode(envelope_bytes)?;
        // Restored rows came FROM the persistent store; re-mirroring them
        // would only churn the table.
        self.insert_envelope(key, env, false)
    }
}
