use std::sync::Arc;
use std::time::Duration;

use tracing::warn;

use keymesh_core::constants::{CANONICAL_VALUE_ID, DEFAULT_OUTBOX_TTL_SECS, KEY_INFIX_OUTBOX};
use keymesh_core::time::now_secs;
use keymesh_core::types::Fingerprint;
use keymesh_core::KeymeshError;
use keymesh_crypto::overlay_key;
use keymesh_dht::DhtSubstrate;

use crate::frame::{decode_entries, encode_entries, OutboxEntry};

/// `SHA3-512(sender_fp ‖ ":outbox:" ‖ recipient_fp)`: the sender's log for
/// one recipient. The sender is the sole writer.
pub fn outbox_key(sender: &Fingerprint, recipient: &Fingerprint) -> Vec<u8> {
    overlay_key(&[
        sender.to_hex().as_bytes(),
        KEY_INFIX_OUTBOX.as_bytes(),
        recipient.to_hex().as_bytes(),
    ])
}

pub struct Outbox<D: DhtSubstrate> {
    dht: Arc<D>,
}

impl<D: DhtSubstrate> Outbox<D> {
    pub fn new(dht: Arc<D>) -> Self {
        Self { dht }
    }

    /// Append `ciphertext` to the sender's outbox for `recipient`.
    ///
    /// The current rollup is read back (largest version wins when replicas
    /// disagree), expired entries are dropped, the new entry is appended,
    /// and the whole log is re-written through the replacing signed put;
    /// subsequent writes by the same sender replace rather than accumulate.
    /// Returns the rollup's entry count.
    pub fn queue(
        &self,
        sender: &Fingerprint,
        recipient: &Fingerprint,
        ciphertext: &[u8],
        ttl: Option<Duration>,
    ) -> Result<usize, KeymeshError> {
        if ciphertext.is_empty() {
            return Err(KeymeshError::InvalidArgument("empty ciphertext".into()));
        }
        let ttl = ttl.unwrap_or(Duration::from_secs(DEFAULT_OUTBOX_TTL_SECS));
        let key = outbox_key(sender, recipient);
        let now = now_secs();

        let mut entries = self.load_rollup(&key, now);
        entries.push(OutboxEntry {
            timestamp: now,
            expiry: now + ttl.as_secs(),
            sender: sender.clone(),
            recipient: recipient.clone(),
            ciphertext: ciphertext.to_vec(),
        });
        let bytes = encode_entries(&entries);
        self.dht.put_signed(&key, &bytes, CANONICAL_VALUE_ID, ttl)?;
        Ok(entries.len())
    }

    /// Current live entries of one outbox: largest observed rollup, minus
    /// anything expired. Undecodable rollups count as empty; a corrupt
    /// value must not wedge the sender's queue.
    fn load_rollup(&self, key: &[u8], now: u64) -> Vec<OutboxEntry> {
        let versions = match self.dht.get_all(key) {
            Ok(v) => v,
            Err(e) => {
                warn!(error = %e, "outbox read failed; starting empty");
                return Vec::new();
            }
        };
        let largest = versions.into_iter().max_by_key(|v| v.len());
        let Some(bytes) = largest else {
            return Vec::new();
        };
        match decode_entries(&bytes) {
            Ok(mut entries) => {
                entries.retain(|e| !e.is_expired(now));
                entries
            }
            Err(e) => {
                warn!(error = %e, "undecodable outbox rollup; starting empty");
                Vec::new()
            }
        }
    }

    /// Sweep the outboxes of every known sender and merge the live entries
    /// addressed to `recipient`. De-duplication by ciphertext content is the
    /// recipient's local concern; no server-side deletion happens here.
    pub fn retrieve(
        &self,
        recipient: &Fingerprint,
        senders: &[Fingerprint],
    ) -> Result<Vec<OutboxEntry>, KeymeshError> {
        let now = now_secs();
        let mut merged = Vec::new();
        for sender in senders {
            let key = outbox_key(sender, recipient);
            let bytes = match self.dht.get(&key) {
                Ok(bytes) => bytes,
                Err(KeymeshError::NotFound) => continue,
                Err(e) => {
                    warn!(sender = %sender, error = %e, "outbox sweep skipping sender");
                    continue;
                }
            };
            match decode_entries(&bytes) {
                Ok(entries) => {
                    merged.extend(
                        entries
                            .into_iter()
                            .filter(|e| !e.is_expired(now) && e.recipient == *recipient),
                    );
                }
                Err(e) => warn!(sender = %sender, error = %e, "undecodable outbox skipped"),
            }
        }
        Ok(merged)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use keymesh_dht::LocalDht;

    fn outbox() -> (Outbox<LocalDht>, Arc<LocalDht>) {
        let dht = Arc::new(LocalDht::new());
        (Outbox::new(Arc::clone(&dht)), dht)
    }

    fn fp(byte: u8) -> Fingerprint {
        Fingerprint::from_bytes([byte; 64])
    }

    #[test]
    fn queue_then_retrieve_round_trip() {
        let (outbox, _) = outbox();
        let (s, r) = (fp(1), fp(2));
        outbox.queue(&s, &r, b"ciphertext-1", None).unwrap();

        let got = outbox.retrieve(&r, &[s.clone()]).unwrap();
        assert_eq!(got.len(), 1);
        assert_eq!(got[0].ciphertext, b"ciphertext-1");
        assert_eq!(got[0].sender, s);
    }

    #[test]
    fn repeated_queues_replace_the_rollup() {
        let (outbox, dht) = outbox();
        let (s, r) = (fp(1), fp(2));
        assert_eq!(outbox.queue(&s, &r, b"c1", None).unwrap(), 1);
        assert_eq!(outbox.queue(&s, &r, b"c2", None).unwrap(), 2);

        // One rollup at the key, not an accumulated log per write.
        let versions = dht.get_all(&outbox_key(&s, &r)).unwrap();
        assert_eq!(versions.len(), 1);

        let got = outbox.retrieve(&r, &[s]).unwrap();
        let mut texts: Vec<_> = got.iter().map(|e| e.ciphertext.clone()).collect();
        texts.sort();
        assert_eq!(texts, vec![b"c1".to_vec(), b"c2".to_vec()]);
    }

    #[test]
    fn multi_sender_sweep_returns_exactly_the_union() {
        let (outbox, _) = outbox();
        let (s1, s2, r) = (fp(1), fp(2), fp(3));
        outbox.queue(&s1, &r, b"c1", None).unwrap();
        outbox.queue(&s1, &r, b"c2", None).unwrap();
        outbox.queue(&s2, &r, b"c3", None).unwrap();

        let got = outbox.retrieve(&r, &[s1, s2]).unwrap();
        let mut texts: Vec<_> = got.iter().map(|e| e.ciphertext.clone()).collect();
        texts.sort();
        assert_eq!(
            texts,
            vec![b"c1".to_vec(), b"c2".to_vec(), b"c3".to_vec()]
        );
    }

    #[test]
    fn expired_entries_never_surface() {
        let (outbox, _) = outbox();
        let (s, r) = (fp(1), fp(2));
        // expiry = now: already past the inclusive boundary.
        outbox.queue(&s, &r, b"gone", Some(Duration::ZERO)).unwrap();
        outbox.queue(&s, &r, b"alive", None).unwrap();

        let got = outbox.retrieve(&r, &[s]).unwrap();
        assert_eq!(got.len(), 1);
        assert_eq!(got[0].ciphertext, b"alive");
    }

    #[test]
    fn outboxes_are_per_recipient() {
        let (outbox, _) = outbox();
        let (s, r1, r2) = (fp(1), fp(2), fp(3));
        outbox.queue(&s, &r1, b"for-r1", None).unwrap();

        assert!(outbox.retrieve(&r2, &[s.clone()]).unwrap().is_empty());
        assert_eq!(outbox.retrieve(&r1, &[s]).unwrap().len(), 1);
    }

    #[test]
    fn unknown_senders_are_skipped_silently() {
        let (outbox, _) = outbox();
        let (s, r) = (fp(1), fp(2));
        outbox.queue(&s, &r, b"c1", None).unwrap();
        let got = outbox.retrieve(&r, &[s, fp(9)]).unwrap();
        assert_eq!(got.len(), 1);
    }

    #[test]
    fn empty_ciphertext_is_invalid() {
        let (outbox, _) = outbox();
        assert!(matches!(
            outbox.queue(&fp(1), &fp(2), b"", None),
            Err(KeymeshError::InvalidArgument(_))
        ));
    }

    #[test]
    fn corrupt_rollup_does_not_wedge_the_queue() {
        let (outbox, dht) = outbox();
        let (s, r) = (fp(1), fp(2));
        let key = outbox_key(&s, &r);
        dht.put_signed(&key, b"garbage", CANONICAL_VALUE_ID, Duration::from_secs(3600))
            .unwrap();

        // The corrupt rollup reads as empty; queueing starts fresh over it.
        assert_eq!(outbox.queue(&s, &r, b"c1", None).unwrap(), 1);
        assert_eq!(outbox.retrieve(&r, &[s]).unwrap().len(), 1);
    }
}
