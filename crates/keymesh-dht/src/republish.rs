//! Restore and republish: bootstrap nodes replay persisted values into the
//! overlay at startup and on an hourly cadence so that network churn never
//! loses permanent data.

use std::sync::Arc;
use std::time::Duration;

use tracing::{debug, info, warn};

use keymesh_core::time::now_secs;
use keymesh_store::{is_legacy_infohash_key, PersistentStore};

use crate::substrate::DhtSubstrate;

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct RestoreSummary {
    pub restored: usize,
    pub skipped_legacy: usize,
    pub failed: usize,
}

/// Replay every active row into the substrate under its ORIGINAL key,
/// preserving type, slot, and TTL.
///
/// Rows whose key is a 40- or 80-character hex blob were written by the
/// legacy format that persisted the derived infohash; republishing one would
/// re-hash the infohash and relocate the value, so they are skipped (and
/// left in the store). A failing row is logged and skipped; one bad row
/// never blocks the queue.
pub fn restore_from_store(store: &PersistentStore, dht: &dyn DhtSubstrate) -> RestoreSummary {
    let now = now_secs();
    let rows = match store.iterate_active(now) {
        Ok(rows) => rows,
        Err(e) => {
            warn!(error = %e, "persistent store unreadable; nothing restored");
            return RestoreSummary::default();
        }
    };

    let mut summary = RestoreSummary::default();
    for row in rows {
        if is_legacy_infohash_key(&row.key) {
            warn!(
                key_len = row.key.len(),
                "skipping legacy-format entry (derived infohash key)"
            );
            summary.skipped_legacy += 1;
            continue;
        }
        match dht.republish(&row.key, &row.value) {
            Ok(()) => summary.restored += 1,
            Err(e) => {
                warn!(error = %e, "republish failed for stored row");
                summary.failed += 1;
            }
        }
    }
    info!(
        restored = summary.restored,
        skipped_legacy = summary.skipped_legacy,
        failed = summary.failed,
        "persistent store restore complete"
    );
    summary
}

/// Background variant of [`restore_from_store`] for use at node startup.
pub async fn restore_async(
    store: Arc<PersistentStore>,
    dht: Arc<dyn DhtSubstrate>,
) -> RestoreSummary {
    tokio::task::spawn_blocking(move || restore_from_store(&store, dht.as_ref()))
        .await
        .unwrap_or_default()
}

/// Periodic republish worker: purge expired rows, then replay the survivors.
/// Runs until the task is dropped.
pub async fn republish_loop(
    store: Arc<PersistentStore>,
    dht: Arc<dyn DhtSubstrate>,
    interval: Duration,
) {
    let mut ticker = tokio::time::interval(interval);
    ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
    // The first tick completes immediately; skip it so startup restore and
    // the first periodic pass do not race.
    ticker.tick().await;
    loop {
        ticker.tick().await;
        let now = now_secs();
        match store.purge_expired(now) {
            Ok(purged) if purged > 0 => debug!(purged, "purged expired rows"),
            Ok(_) => {}
            Err(e) => warn!(error = %e, "purge failed"),
        }
        restore_async(Arc::clone(&store), Arc::clone(&dht)).await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::local::LocalDht;
    use crate::record::RecordEnvelope;
    use keymesh_core::constants::{TYPE_365DAY, TYPE_7DAY};
    use keymesh_store::StoredValue;

    fn stored_row(key: Vec<u8>, payload: &[u8]) -> StoredValue {
        let env = RecordEnvelope::new_unsigned(TYPE_365DAY, payload.to_vec(), now_secs(), 0);
        StoredValue {
            key,
            value_id: env.slot_id(),
            value: env.encode().unwrap(),
            value_type: TYPE_365DAY,
            created_at: env.created_at(),
            expires_at: 0,
        }
    }

    #[test]
    fn restore_replays_rows_byte_equal() {
        let store = PersistentStore::open_in_memory().unwrap();
        store.put(&stored_row(vec![0xAA; 64], b"permanent value")).unwrap();

        let dht = LocalDht::new();
        let summary = restore_from_store(&store, &dht);
        assert_eq!(summary.restored, 1);
        assert_eq!(dht.get(&[0xAA; 64]).unwrap(), b"permanent value");
    }

    #[test]
    fn restore_skips_legacy_keys_and_keeps_rows() {
        let store = PersistentStore::open_in_memory().unwrap();
        let legacy_key: Vec<u8> = b"0123456789abcdef0123456789abcdef01234567".to_vec();
        assert_eq!(legacy_key.len(), 40);
        store.put(&stored_row(legacy_key.clone(), b"misplaced")).unwrap();
        store.put(&stored_row(vec![0xBB; 64], b"good")).unwrap();

        let dht = LocalDht::new();
        let summary = restore_from_store(&store, &dht);
        assert_eq!(summary.skipped_legacy, 1);
        assert_eq!(summary.restored, 1);

        // The legacy value is nowhere in the overlay, but its row survives.
        assert!(dht.get_all(&legacy_key).unwrap().is_empty());
        assert_eq!(store.count().unwrap(), 2);
    }

    #[test]
    fn restore_survives_one_bad_row() {
        let store = PersistentStore::open_in_memory().unwrap();
        store
            .put(&StoredValue {
                key: vec![0xCC; 64],
                value_id: 1,
                value: b"not an envelope".to_vec(),
                value_type: TYPE_7DAY,
                created_at: 0,
                expires_at: 0,
            })
            .unwrap();
        store.put(&stored_row(vec![0xDD; 64], b"good")).unwrap();

        let dht = LocalDht::new();
        let summary = restore_from_store(&store, &dht);
        assert_eq!(summary.failed, 1);
        assert_eq!(summary.restored, 1);
        assert_eq!(dht.get(&[0xDD; 64]).unwrap(), b"good");
    }

    #[test]
    fn full_round_trip_through_restart() {
        // Publish on a bootstrap-style node, "restart" into a fresh overlay,
        // restore, and read the value back byte-equal.
        let store = Arc::new(PersistentStore::open_in_memory().unwrap());
        let first = LocalDht::with_store(Arc::clone(&store));
        first.put_ttl(b"round-trip-key", b"survives restarts", None).unwrap();
        drop(first);

        let second = LocalDht::new();
        let summary = restore_from_store(&store, &second);
        assert_eq!(summary.restored, 1);
        assert_eq!(
            second.get(b"round-trip-key").unwrap(),
            b"survives restarts"
        );
    }
}
