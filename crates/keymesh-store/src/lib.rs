//! Durable value store for bootstrap nodes.
//!
//! One SQLite file per node, one row per (original DHT key, value id). The
//! table survives restarts and drives periodic republish, so permanent
//! values outlive network churn.
//!
//! The `key_hash` column holds the ORIGINAL application key (typically 64
//! bytes of SHA3-512), never the derived overlay infohash. An earlier
//! deployment stored the 20-byte infohash rendered as 40 hex characters;
//! republishing such a row re-hashes the infohash and relocates the value,
//! so restore skips any row whose key has that legacy shape.

use std::path::Path;
use std::sync::Mutex;

use rusqlite::{params, Connection};

use keymesh_core::constants::{
    LEGACY_INFOHASH_HEX_LENS, PERSIST_FLOOR_SECS, TYPE_365DAY, TYPE_7DAY,
};
use keymesh_core::KeymeshError;

/// One persisted DHT value.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct StoredValue {
    /// Original application key (not the overlay infohash).
    pub key: Vec<u8>,
    /// Slot identifier; signed puts with the same id replace each other.
    pub value_id: u64,
    pub value: Vec<u8>,
    pub value_type: u32,
    pub created_at: u64,
    /// 0 = permanent.
    pub expires_at: u64,
}

impl StoredValue {
    pub fn is_permanent(&self) -> bool {
        self.expires_at == 0
    }
}

/// Persist iff the type is known and the value is permanent or still far
/// enough from expiry to be worth a disk write.
pub fn should_persist(value_type: u32, expires_at: u64, now: u64) -> bool {
    if value_type != TYPE_7DAY && value_type != TYPE_365DAY {
        return false;
    }
    expires_at == 0 || expires_at > now + PERSIST_FLOOR_SECS
}

/// Detect keys written by the legacy format: the derived infohash rendered
/// as a 40- or 80-character hex blob instead of the original key bytes.
pub fn is_legacy_infohash_key(key: &[u8]) -> bool {
    LEGACY_INFOHASH_HEX_LENS.contains(&key.len())
        && key.iter().all(|b| b.is_ascii_hexdigit())
}

/// SQLite-backed table of persisted DHT values.
///
/// The connection sits behind a mutex: one writer at a time, per the
/// shared-resource policy. Readers clone rows out under the same lock;
/// the table is small (bootstrap working set) and scans are rare.
pub struct PersistentStore {
    conn: Mutex<Connection>,
}

impl PersistentStore {
    /// Open or create the store at `path`.
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self, KeymeshError> {
        let conn = Connection::open(path).map_err(storage_err)?;
        conn.execute_batch(
            "CREATE TABLE IF NOT EXISTS dht_values (
                 key_hash   BLOB    NOT NULL,
                 value_id   INTEGER NOT NULL,
                 value_data BLOB    NOT NULL,
                 value_type INTEGER NOT NULL,
                 created_at INTEGER NOT NULL,
                 expires_at INTEGER NOT NULL,
                 PRIMARY KEY (key_hash, value_id)
             );
             CREATE INDEX IF NOT EXISTS idx_dht_values_expires
                 ON dht_values (expires_at);",
        )
        .map_err(storage_err)?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    /// In-memory store (tests, ephemeral tooling).
    pub fn open_in_memory() -> Result<Self, KeymeshError> {
        let conn = Connection::open_in_memory().map_err(storage_err)?;
        conn.execute_batch(
            "CREATE TABLE IF NOT EXISTS dht_values (
                 key_hash   BLOB    NOT NULL,
                 value_id   INTEGER NOT NULL,
                 value_data BLOB    NOT NULL,
                 value_type INTEGER NOT NULL,
                 created_at INTEGER NOT NULL,
                 expires_at INTEGER NOT NULL,
                 PRIMARY KEY (key_hash, value_id)
             );",
        )
        .map_err(storage_err)?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    /// Upsert by (key, value_id).
    pub fn put(&self, v: &StoredValue) -> Result<(), KeymeshError> {
        let conn = self.conn.lock().expect("store mutex poisoned");
        conn.execute(
            "INSERT INTO dht_values
                 (key_hash, value_id, value_data, value_type, created_at, expires_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6)
             ON CONFLICT (key_hash, value_id) DO UPDATE SET
                 value_data = excluded.value_data,
                 value_type = excluded.value_type,
                 created_at = excluded.created_at,
                 expires_at = excluded.expires_at",
            params![
                v.key,
                v.value_id as i64,
                v.value,
                v.value_type as i64,
                v.created_at as i64,
                v.expires_at as i64,
            ],
        )
        .map_err(storage_err)?;
        Ok(())
    }

    /// All rows still alive at `now`: permanent, or expiring later.
    pub fn iterate_active(&self, now: u64) -> Result<Vec<StoredValue>, KeymeshError> {
        let conn = self.conn.lock().expect("store mutex poisoned");
        let mut stmt = conn
            .prepare(
                "SELECT key_hash, value_id, value_data, value_type, created_at, expires_at
                 FROM dht_values
                 WHERE expires_at = 0 OR expires_at > ?1",
            )
            .map_err(storage_err)?;
        let rows = stmt
            .query_map(params![now as i64], |row| {
                Ok(StoredValue {
                    key: row.get(0)?,
                    value_id: row.get::<_, i64>(1)? as u64,
                    value: row.get(2)?,
                    value_type: row.get::<_, i64>(3)? as u32,
                    created_at: row.get::<_, i64>(4)? as u64,
                    expires_at: row.get::<_, i64>(5)? as u64,
                })
            })
            .map_err(storage_err)?;
        let mut out = Vec::new();
        for row in rows {
            out.push(row.map_err(storage_err)?);
        }
        Ok(out)
    }

    /// Drop rows with `0 < expires_at <= now`. Returns the number removed.
    pub fn purge_expired(&self, now: u64) -> Result<usize, KeymeshError> {
        let conn = self.conn.lock().expect("store mutex poisoned");
        conn.execute(
            "DELETE FROM dht_values WHERE expires_at > 0 AND expires_at <= ?1",
            params![now as i64],
        )
        .map_err(storage_err)
    }

    /// Remove every slot stored under `key` (best-effort delete mirror).
    pub fn delete_key(&self, key: &[u8]) -> Result<usize, KeymeshError> {
        let conn = self.conn.lock().expect("store mutex poisoned");
        conn.execute("DELETE FROM dht_values WHERE key_hash = ?1", params![key])
            .map_err(storage_err)
    }

    /// Total row count (including expired rows not yet purged).
    pub fn count(&self) -> Result<u64, KeymeshError> {
        let conn = self.conn.lock().expect("store mutex poisoned");
        conn.query_row("SELECT COUNT(*) FROM dht_values", [], |row| {
            row.get::<_, i64>(0)
        })
        .map(|n| n as u64)
        .map_err(storage_err)
    }
}

fn storage_err(e: rusqlite::Error) -> KeymeshError {
    KeymeshError::Storage(e.to_string())
}
