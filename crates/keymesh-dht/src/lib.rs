//! DHT substrate: a Kademlia-class overlay extended with typed values,
//! per-type TTL, and signed puts whose (key, value id) slots replace rather
//! than accumulate.
//!
//! Overlay services talk to [`substrate::DhtSubstrate`]; two implementations
//! exist: [`network::NetworkDht`] (libp2p swarm) and [`local::LocalDht`]
//! (in-process, same semantics, used by tests and bootstrap-less tooling).

pub mod config;
pub mod identity;
pub mod local;
pub mod network;
pub mod record;
pub mod republish;
pub mod substrate;

pub use config::DhtConfig;
pub use local::LocalDht;
pub use network::{DhtNode, NetworkDht};
pub use record::{RecordEnvelope, RecordSet};
pub use substrate::{DhtStats, DhtSubstrate, GetCallback};
