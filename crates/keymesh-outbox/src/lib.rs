//! Store-and-forward offline messaging.
//!
//! Each sender owns one append log per recipient at
//! `SHA3-512(sender_fp ‖ ":outbox:" ‖ recipient_fp)`; recipients sweep the
//! outboxes of every contact they know. Deletion is never a recipient
//! operation: entries expire, and senders rotate their own rollups.

pub mod frame;
pub mod outbox;

pub use frame::OutboxEntry;
pub use outbox::{outbox_key, Outbox};
