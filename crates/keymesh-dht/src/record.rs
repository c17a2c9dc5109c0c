//! Typed record envelopes and the per-key record set.
//!
//! Every value stored at an overlay key travels inside an envelope carrying
//! its type tag and expiry. Unsigned envelopes accumulate (append-only);
//! signed envelopes occupy a (key, value id) slot where a strictly greater
//! sequence number replaces the previous value and a stale one is ignored;
//! a record is never downgraded to an earlier sequence.

use serde::{Deserialize, Serialize};
use tracing::warn;

use keymesh_core::codec::ByteWriter;
use keymesh_core::constants::MAX_VALUE_SIZE;
use keymesh_core::types::{DilithiumPublicKey, DilithiumSignature};
use keymesh_core::KeymeshError;
use keymesh_crypto::KeyPair;

// ── RecordEnvelope ───────────────────────────────────────────────────────────

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub enum RecordEnvelope {
    /// Append-only value. `nonce` distinguishes repeated puts of identical
    /// payloads.
    Unsigned {
        value_type: u32,
        payload: Vec<u8>,
        created_at: u64,
        /// 0 = permanent.
        expires_at: u64,
        nonce: u64,
    },
    /// Slot value signed by the publishing node's Dilithium5 key.
    /// Signature covers `value_id_be ‖ seq_be ‖ value_type_be ‖ payload`.
    Signed {
        value_type: u32,
        value_id: u64,
        seq: u64,
        publisher: Vec<u8>,
        payload: Vec<u8>,
        created_at: u64,
        /// 0 = permanent.
        expires_at: u64,
        signature: Vec<u8>,
    },
}

/// The byte string a signed envelope commits to.
fn signed_bytes(value_id: u64, seq: u64, value_type: u32, payload: &[u8]) -> Vec<u8> {
    let mut w = ByteWriter::with_capacity(20 + payload.len());
    w.put_u64(value_id).put_u64(seq).put_u32(value_type).put_bytes(payload);
    w.into_bytes()
}

impl RecordEnvelope {
    pub fn new_unsigned(value_type: u32, payload: Vec<u8>, created_at: u64, expires_at: u64) -> Self {
        RecordEnvelope::Unsigned {
            value_type,
            payload,
            created_at,
            expires_at,
            nonce: rand::random(),
        }
    }

    pub fn new_signed(
        keypair: &KeyPair,
        value_type: u32,
        value_id: u64,
        seq: u64,
        payload: Vec<u8>,
        created_at: u64,
        expires_at: u64,
    ) -> Self {
        let signature = keypair.sign(&signed_bytes(value_id, seq, value_type, &payload));
        RecordEnvelope::Signed {
            value_type,
            value_id,
            seq,
            publisher: keypair.dilithium_public.0.clone(),
            payload,
            created_at,
            expires_at,
            signature: signature.0,
        }
    }

    pub fn payload(&self) -> &[u8] {
        match self {
            RecordEnvelope::Unsigned { payload, .. } => payload,
            RecordEnvelope::Signed { payload, .. } => payload,
        }
    }

    pub fn value_type(&self) -> u32 {
        match self {
            RecordEnvelope::Unsigned { value_type, .. } => *value_type,
            RecordEnvelope::Signed { value_type, .. } => *value_type,
        }
    }

    pub fn expires_at(&self) -> u64 {
        match self {
            RecordEnvelope::Unsigned { expires_at, .. } => *expires_at,
            RecordEnvelope::Signed { expires_at, .. } => *expires_at,
        }
    }

    pub fn created_at(&self) -> u64 {
        match self {
            RecordEnvelope::Unsigned { created_at, .. } => *created_at,
            RecordEnvelope::Signed { created_at, .. } => *created_at,
        }
    }

    /// The slot this envelope occupies in the persistent store: the value id
    /// for signed envelopes, the put nonce for unsigned ones.
    pub fn slot_id(&self) -> u64 {
        match self {
            RecordEnvelope::Unsigned { nonce, .. } => *nonce,
            RecordEnvelope::Signed { value_id, .. } => *value_id,
        }
    }

    pub fn is_permanent(&self) -> bool {
        self.expires_at() == 0
    }

    pub fn is_expired(&self, now: u64) -> bool {
        let exp = self.expires_at();
        exp != 0 && now >= exp
    }

    /// Size bound for all envelopes; signature check for signed ones.
    pub fn validate(&self) -> Result<(), KeymeshError> {
        if self.payload().len() > MAX_VALUE_SIZE {
            return Err(KeymeshError::InvalidArgument(format!(
                "value exceeds {} bytes",
                MAX_VALUE_SIZE
            )));
        }
        match self {
            RecordEnvelope::Unsigned { .. } => Ok(()),
            RecordEnvelope::Signed {
                value_type,
                value_id,
                seq,
                publisher,
                payload,
                signature,
                ..
            } => {
                let pk = DilithiumPublicKey(publisher.clone());
                let sig = DilithiumSignature(signature.clone());
                let msg = signed_bytes(*value_id, *seq, *value_type, payload);
                keymesh_crypto::verify_signature(&pk, &msg, &sig)
                    .map_err(|_| KeymeshError::SignatureInvalid)
            }
        }
    }

    pub fn encode(&self) -> Result<Vec<u8>, KeymeshError> {
        bincode::serialize(self).map_err(|e| KeymeshError::Serialization(e.to_string()))
    }

    pub fn decode(bytes: &[u8]) -> Result<Self, KeymeshError> {
        bincode::deserialize(bytes).map_err(|e| KeymeshError::Serialization(e.to_string()))
    }
}

// ── RecordSet ────────────────────────────────────────────────────────────────

/// Every envelope currently held at one overlay key. This is the unit
/// replicated between storage nodes; merging two sets is commutative given
/// the slot/sequence rules, so replicas converge regardless of delivery
/// order.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct RecordSet {
    entries: Vec<RecordEnvelope>,
}

impl RecordSet {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn entries(&self) -> &[RecordEnvelope] {
        &self.entries
    }

    /// Merge one validated envelope. Returns whether the set changed.
    ///
    /// Signed: a strictly greater seq replaces the slot; equal or lower is
    /// ignored. Unsigned: appended unless the same put (nonce + payload) is
    /// already present. Expired incoming entries are dropped.
    pub fn merge_entry(&mut self, env: RecordEnvelope, now: u64) -> Result<bool, KeymeshError> {
        env.validate()?;
        if env.is_expired(now) {
            return Ok(false);
        }
        if let RecordEnvelope::Signed {
            value_id,
            seq,
            publisher,
            ..
        } = &env
        {
            let (incoming_id, incoming_seq) = (*value_id, *seq);
            let incoming_publisher = publisher.clone();
            let slot = self.entries.iter().position(|e| {
                matches!(e, RecordEnvelope::Signed { value_id: eid, .. } if *eid == incoming_id)
            });
            if let Some(idx) = slot {
                if let RecordEnvelope::Signed {
                    seq: existing_seq,
                    publisher: existing_publisher,
                    ..
                } = &self.entries[idx]
                {
                    if incoming_seq <= *existing_seq {
                        return Ok(false);
                    }
                    if *existing_publisher != incoming_publisher {
                        warn!(value_id = incoming_id, "slot publisher changed on replace");
                    }
                }
                self.entries[idx] = env;
                return Ok(true);
            }
            self.entries.push(env);
            return Ok(true);
        }

        if let RecordEnvelope::Unsigned { nonce, payload, .. } = &env {
            let dup = self.entries.iter().any(|e| {
                matches!(e, RecordEnvelope::Unsigned { nonce: n, payload: p, .. }
                    if n == nonce && p == payload)
            });
            if dup {
                return Ok(false);
            }
        }
        self.entries.push(env);
        Ok(true)
    }

    /// Merge a whole replica set; invalid entries are dropped with a log
    /// line, never an error; good entries still merge.
    pub fn merge_set(&mut self, other: RecordSet, now: u64) -> usize {
        let mut changed = 0;
        for env in other.entries {
            match self.merge_entry(env, now) {
                Ok(true) => changed += 1,
                Ok(false) => {}
                Err(e) => warn!(error = %e, "dropping invalid replica entry"),
            }
        }
        changed
    }

    pub fn prune_expired(&mut self, now: u64) {
        self.entries.retain(|e| !e.is_expired(now));
    }

    /// Non-expired payloads, insertion order.
    pub fn values(&self, now: u64) -> Vec<Vec<u8>> {
        self.entries
            .iter()
            .filter(|e| !e.is_expired(now))
            .map(|e| e.payload().to_vec())
            .collect()
    }

    /// Highest sequence currently occupying `value_id`, if any.
    pub fn highest_seq(&self, value_id: u64) -> Option<u64> {
        self.entries.iter().find_map(|e| match e {
            RecordEnvelope::Signed { value_id: id, seq, .. } if *id == value_id => Some(*seq),
            _ => None,
        })
    }

    pub fn encode(&self) -> Result<Vec<u8>, KeymeshError> {
        bincode::serialize(self).map_err(|e| KeymeshError::Serialization(e.to_string()))
    }

    pub fn decode(bytes: &[u8]) -> Result<Self, KeymeshError> {
        bincode::deserialize(bytes).map_err(|e| KeymeshError::Serialization(e.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use keymesh_core::constants::{TYPE_365DAY, TYPE_7DAY};

    fn signer() -> KeyPair {
        KeyPair::generate()
    }

    #[test]
    fn signed_envelope_validates_and_detects_tampering() {
        let kp = signer();
        let env = RecordEnvelope::new_signed(&kp, TYPE_365DAY, 1, 1, b"v".to_vec(), 100, 0);
        assert!(env.validate().is_ok());

        let mut bad = env.clone();
        if let RecordEnvelope::Signed { payload, .. } = &mut bad {
            payload[0] ^= 0xFF;
        }
        assert!(matches!(bad.validate(), Err(KeymeshError::SignatureInvalid)));
    }

    #[test]
    fn oversized_payload_rejected() {
        let env = RecordEnvelope::new_unsigned(TYPE_7DAY, vec![0; MAX_VALUE_SIZE + 1], 0, 0);
        assert!(env.validate().is_err());
    }

    #[test]
    fn signed_slot_replacement_and_stale_rejection() {
        let kp = signer();
        let mut set = RecordSet::new();
        let v1 = RecordEnvelope::new_signed(&kp, TYPE_365DAY, 1, 1, b"v1".to_vec(), 100, 0);
        let v2 = RecordEnvelope::new_signed(&kp, TYPE_365DAY, 1, 2, b"v2".to_vec(), 200, 0);
        let stale = RecordEnvelope::new_signed(&kp, TYPE_365DAY, 1, 1, b"old".to_vec(), 300, 0);

        assert!(set.merge_entry(v1, 0).unwrap());
        assert!(set.merge_entry(v2, 0).unwrap());
        // Never downgrade to an earlier sequence.
        assert!(!set.merge_entry(stale, 0).unwrap());

        assert_eq!(set.values(0), vec![b"v2".to_vec()]);
        assert_eq!(set.highest_seq(1), Some(2));
    }

    #[test]
    fn distinct_slots_coexist() {
        let kp = signer();
        let mut set = RecordSet::new();
        set.merge_entry(
            RecordEnvelope::new_signed(&kp, TYPE_365DAY, 1, 1, b"a".to_vec(), 0, 0),
            0,
        )
        .unwrap();
        set.merge_entry(
            RecordEnvelope::new_signed(&kp, TYPE_365DAY, 2, 1, b"b".to_vec(), 0, 0),
            0,
        )
        .unwrap();
        assert_eq!(set.len(), 2);
    }

    #[test]
    fn unsigned_puts_accumulate() {
        let mut set = RecordSet::new();
        let a = RecordEnvelope::new_unsigned(TYPE_7DAY, b"same".to_vec(), 0, 0);
        let b = RecordEnvelope::new_unsigned(TYPE_7DAY, b"same".to_vec(), 0, 0);
        assert!(set.merge_entry(a.clone(), 0).unwrap());
        assert!(set.merge_entry(b, 0).unwrap());
        // Replaying the identical put is a no-op.
        assert!(!set.merge_entry(a, 0).unwrap());
        assert_eq!(set.len(), 2);
    }

    #[test]
    fn expired_entries_are_dropped() {
        let mut set = RecordSet::new();
        set.merge_entry(RecordEnvelope::new_unsigned(TYPE_7DAY, b"x".to_vec(), 0, 100), 0)
            .unwrap();
        assert_eq!(set.values(99).len(), 1);
        assert!(set.values(100).is_empty());
        set.prune_expired(100);
        assert!(set.is_empty());
    }

    #[test]
    fn merge_sets_converges_regardless_of_order() {
        let kp = signer();
        let e1 = RecordEnvelope::new_signed(&kp, TYPE_365DAY, 1, 1, b"v1".to_vec(), 0, 0);
        let e2 = RecordEnvelope::new_signed(&kp, TYPE_365DAY, 1, 2, b"v2".to_vec(), 0, 0);
        let un = RecordEnvelope::new_unsigned(TYPE_7DAY, b"u".to_vec(), 0, 0);

        let mut left = RecordSet::new();
        left.merge_entry(e1.clone(), 0).unwrap();
        left.merge_entry(un.clone(), 0).unwrap();

        let mut right = RecordSet::new();
        right.merge_entry(e2.clone(), 0).unwrap();

        let mut a = left.clone();
        a.merge_set(right.clone(), 0);
        let mut b = right;
        b.merge_set(left, 0);

        let mut av = a.values(0);
        let mut bv = b.values(0);
        av.sort();
        bv.sort();
        assert_eq!(av, bv);
        assert_eq!(a.highest_seq(1), Some(2));
    }

    #[test]
    fn set_round_trips_through_bincode() {
        let kp = signer();
        let mut set = RecordSet::new();
        set.merge_entry(
            RecordEnvelope::new_signed(&kp, TYPE_365DAY, 1, 1, b"v".to_vec(), 5, 0),
            0,
        )
        .unwrap();
        let bytes = set.encode().unwrap();
        assert_eq!(RecordSet::decode(&bytes).unwrap(), set);
    }
}
