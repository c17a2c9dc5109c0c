//! Outbox wire framing.
//!
//! A value at an outbox key is a length-prefixed array of entries, every
//! integer big-endian:
//!
//! ```text
//! [u32 count]
//! ( [u32 magic][u8 version][u64 timestamp][u64 expiry]
//!   [u16 sender_len][u16 recipient_len][u32 ciphertext_len]
//!   [sender][recipient][ciphertext] )*
//! ```
//!
//! Decoding checks magic and version and refuses truncated frames.

use keymesh_core::codec::{ByteReader, ByteWriter};
use keymesh_core::constants::{OUTBOX_MAGIC, OUTBOX_VERSION};
use keymesh_core::types::Fingerprint;
use keymesh_core::KeymeshError;

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct OutboxEntry {
    pub timestamp: u64,
    pub expiry: u64,
    pub sender: Fingerprint,
    pub recipient: Fingerprint,
    pub ciphertext: Vec<u8>,
}

impl OutboxEntry {
    pub fn is_expired(&self, now: u64) -> bool {
        now >= self.expiry
    }
}

pub fn encode_entries(entries: &[OutboxEntry]) -> Vec<u8> {
    let mut w = ByteWriter::new();
    w.put_u32(entries.len() as u32);
    for entry in entries {
        let sender = entry.sender.to_hex();
        let recipient = entry.recipient.to_hex();
        w.put_u32(OUTBOX_MAGIC)
            .put_u8(OUTBOX_VERSION)
            .put_u64(entry.timestamp)
            .put_u64(entry.expiry)
            .put_u16(sender.len() as u16)
            .put_u16(recipient.len() as u16)
            .put_u32(entry.ciphertext.len() as u32)
            .put_bytes(sender.as_bytes())
            .put_bytes(recipient.as_bytes())
            .put_bytes(&entry.ciphertext);
    }
    w.into_bytes()
}

pub fn decode_entries(bytes: &[u8]) -> Result<Vec<OutboxEntry>, KeymeshError> {
    let mut r = ByteReader::new(bytes);
    let count = r.take_u32()? as usize;
    let mut entries = Vec::with_capacity(count.min(1024));
    for _ in 0..count {
        let magic = r.take_u32()?;
        if magic != OUTBOX_MAGIC {
            return Err(KeymeshError::InvalidArgument(format!(
                "bad outbox magic {magic:#010x}"
            )));
        }
        let version = r.take_u8()?;
        if version != OUTBOX_VERSION {
            return Err(KeymeshError::InvalidArgument(format!(
                "unsupported outbox version {version}"
            )));
        }
        let timestamp = r.take_u64()?;
        let expiry = r.take_u64()?;
        let sender_len = r.take_u16()? as usize;
        let recipient_len = r.take_u16()? as usize;
        let ciphertext_len = r.take_u32()? as usize;
        let sender = std::str::from_utf8(r.take_bytes(sender_len)?)
            .map_err(|_| KeymeshError::InvalidArgument("sender is not ASCII hex".into()))
            .and_then(Fingerprint::from_hex)?;
        let recipient = std::str::from_utf8(r.take_bytes(recipient_len)?)
            .map_err(|_| KeymeshError::InvalidArgument("recipient is not ASCII hex".into()))
            .and_then(Fingerprint::from_hex)?;
        let ciphertext = r.take_bytes(ciphertext_len)?.to_vec();
        entries.push(OutboxEntry {
            timestamp,
            expiry,
            sender,
            recipient,
            ciphertext,
        });
    }
    if !r.is_empty() {
        return Err(KeymeshError::InvalidArgument(
            "trailing bytes after outbox entries".into(),
        ));
    }
    Ok(entries)
}
