//! libp2p-backed substrate node.
//!
//! One tokio task owns the swarm (Kademlia + identify + ping) and a command
//! channel; the [`NetworkDht`] facade implements [`DhtSubstrate`] by sending
//! commands and blocking on single-shot completion channels. Values at an
//! overlay key replicate as one Kademlia record holding the encoded
//! [`RecordSet`]; replicas converge by merging sets on every read and every
//! accepted inbound store.

use std::collections::{HashMap, HashSet};
use std::net::SocketAddr;
use std::sync::mpsc::SyncSender;
use std::sync::Arc;
use std::time::Duration;

use futures::StreamExt;
use libp2p::kad::store::{MemoryStore, MemoryStoreConfig, RecordStore};
use libp2p::swarm::{NetworkBehaviour, SwarmEvent};
use libp2p::{identify, kad, multiaddr::Protocol, noise, ping, tcp, yamux, Multiaddr, PeerId, Swarm};
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use keymesh_core::constants::{
    DHT_OP_TIMEOUT_SECS, GET_TIMEOUT_SECS, PUT_CONFIRM_TIMEOUT_SECS, PUT_VERIFY_DELAY_SECS,
};
use keymesh_core::time::now_secs;
use keymesh_core::KeymeshError;
use keymesh_crypto::KeyPair;
use keymesh_store::{should_persist, PersistentStore, StoredValue};

use crate::config::DhtConfig;
use crate::record::{RecordEnvelope, RecordSet};
use crate::substrate::{type_for_ttl, DhtStats, DhtSubstrate, GetCallback};

/// Combined libp2p network behaviour for a Keymesh node.
///
/// The `#[derive(NetworkBehaviour)]` macro auto-generates a
/// `KeymeshBehaviourEvent` enum with one variant per field.
#[derive(NetworkBehaviour)]
pub struct KeymeshBehaviour {
    pub kademlia: kad::Behaviour<MemoryStore>,
    pub identify: identify::Behaviour,
    pub ping: ping::Behaviour,
}

// ── Commands ─────────────────────────────────────────────────────────────────

enum DhtCommand {
    PutUnsigned {
        key: Vec<u8>,
        payload: Vec<u8>,
        ttl_secs: Option<u64>,
        reply: SyncSender<Result<(), KeymeshError>>,
    },
    PutSigned {
        key: Vec<u8>,
        payload: Vec<u8>,
        value_id: u64,
        ttl_secs: Option<u64>,
        reply: SyncSender<Result<(), KeymeshError>>,
    },
    GetAll {
        key: Vec<u8>,
        reply: SyncSender<Result<Vec<Vec<u8>>, KeymeshError>>,
    },
    GetAsync {
        key: Vec<u8>,
        callback: GetCallback,
    },
    Delete {
        key: Vec<u8>,
        reply: SyncSender<Result<(), KeymeshError>>,
    },
    Stats {
        reply: SyncSender<DhtStats>,
    },
    Republish {
        key: Vec<u8>,
        envelope: RecordEnvelope,
    },
}

enum GetReply {
    Sync(SyncSender<Result<Vec<Vec<u8>>, KeymeshError>>),
    Async(GetCallback),
}

struct GetPending {
    merged: RecordSet,
    reply: GetReply,
}

/// Parse an `ip:port` bootstrap entry into a TCP multiaddr.
fn multiaddr_from_hostport(entry: &str) -> Option<Multiaddr> {
    let addr: SocketAddr = entry.parse().ok()?;
    let mut ma = Multiaddr::empty();
    match addr {
        SocketAddr::V4(v4) => ma.push(Protocol::Ip4(*v4.ip())),
        SocketAddr::V6(v6) => ma.push(Protocol::Ip6(*v6.ip())),
    }
    ma.push(Protocol::Tcp(addr.port()));
    Some(ma)
}

fn is_ipv4(addr: &Multiaddr) -> bool {
    addr.iter().any(|p| matches!(p, Protocol::Ip4(_)))
}

// ── DhtNode ──────────────────────────────────────────────────────────────────

/// Owns the libp2p Swarm and the local record table.
/// Pass to `tokio::spawn(node.run())`.
pub struct DhtNode {
    swarm: Swarm<KeymeshBehaviour>,
    sets: HashMap<Vec<u8>, RecordSet>,
    /// Store hook: present on bootstrap nodes, captured by Arc at
    /// construction; accepted values are mirrored through it.
    store: Option<Arc<PersistentStore>>,
    record_keys: Arc<KeyPair>,
    cmd_rx: mpsc::Receiver<DhtCommand>,
    pending_puts: HashMap<kad::QueryId, Option<SyncSender<Result<(), KeymeshError>>>>,
    pending_gets: HashMap<kad::QueryId, GetPending>,
    bootstrap_nodes: Vec<String>,
    next_bootstrap: usize,
    good_ipv4: HashSet<PeerId>,
    good_ipv6: HashSet<PeerId>,
}

impl DhtNode {
    /// Build the node and return `(DhtNode, NetworkDht)`.
    ///
    /// `identity` is the transport identity (persisted for bootstrap nodes,
    /// ephemeral otherwise); `store` attaches the persistence hook.
    pub fn new(
        config: &DhtConfig,
        identity: libp2p::identity::Keypair,
        store: Option<Arc<PersistentStore>>,
    ) -> Result<(Self, NetworkDht), Box<dyn std::error::Error + Send + Sync>> {
        let protocol_version = config.protocol_version.clone();
        let mut swarm = libp2p::SwarmBuilder::with_existing_identity(identity)
            .with_tokio()
            .with_tcp(
                tcp::Config::default(),
                noise::Config::new,
                yamux::Config::default,
            )?
            .with_behaviour(|key: &libp2p::identity::Keypair| {
                let peer_id = key.public().to_peer_id();

                let mut kad_config = kad::Config::new(kad::PROTOCOL_NAME);
                kad_config.set_record_filtering(kad::StoreInserts::FilterBoth);
                // A record carries a whole RecordSet; leave generous headroom
                // over the single-value cap.
                kad_config.set_max_packet_size(10 * 1024 * 1024);

                let record_store = MemoryStore::with_config(
                    peer_id,
                    MemoryStoreConfig {
                        max_value_bytes: 10 * 1024 * 1024,
                        ..Default::default()
                    },
                );
                let kademlia = kad::Behaviour::with_config(peer_id, record_store, kad_config);

                let identify = identify::Behaviour::new(identify::Config::new(
                    protocol_version.clone(),
                    key.public(),
                ));

                let ping = ping::Behaviour::default();

                KeymeshBehaviour { kademlia, identify, ping }
            })?
            .build();

        swarm
            .behaviour_mut()
            .kademlia
            .set_mode(Some(kad::Mode::Server));

        let listen_addr: Multiaddr = format!("/ip4/0.0.0.0/tcp/{}", config.port).parse()?;
        swarm.listen_on(listen_addr)?;

        let (cmd_tx, cmd_rx) = mpsc::channel(256);

        let mut node = DhtNode {
            swarm,
            sets: HashMap::new(),
            store,
            record_keys: Arc::new(KeyPair::generate()),
            cmd_rx,
            pending_puts: HashMap::new(),
            pending_gets: HashMap::new(),
            bootstrap_nodes: config.bootstrap_nodes.clone(),
            next_bootstrap: 0,
            good_ipv4: HashSet::new(),
            good_ipv6: HashSet::new(),
        };
        node.dial_next_bootstrap();

        Ok((node, NetworkDht { cmd_tx }))
    }

    /// Dial the next configured bootstrap endpoint. Rotation is a plain
    /// round-robin with no backoff.
    fn dial_next_bootstrap(&mut self) {
        if self.bootstrap_nodes.is_empty() {
            return;
        }
        let entry = &self.bootstrap_nodes[self.next_bootstrap % self.bootstrap_nodes.len()];
        self.next_bootstrap += 1;
        match multiaddr_from_hostport(entry) {
            Some(addr) => {
                debug!(addr = %addr, "dialing bootstrap node");
                if let Err(e) = self.swarm.dial(addr) {
                    warn!(error = %e, "bootstrap dial failed");
                }
            }
            None => warn!(entry = %entry, "unparseable bootstrap entry"),
        }
    }

    /// Drive the node event loop. Run in a dedicated tokio task.
    pub async fn run(mut self) {
        loop {
            tokio::select! {
                cmd = self.cmd_rx.recv() => match cmd {
                    Some(cmd) => self.handle_command(cmd),
                    None => {
                        info!("command channel closed; node task exiting");
                        break;
                    }
                },
                event = self.swarm.select_next_some() => self.handle_event(event),
            }
        }
    }

    // ── Local record table ───────────────────────────────────────────────────

    /// Merge an envelope into the local table, refresh the served Kademlia
    /// record, and mirror through the store hook when asked.
    fn apply_envelope(
        &mut self,
        key: &[u8],
        env: RecordEnvelope,
        mirror: bool,
    ) -> Result<Vec<u8>, KeymeshError> {
        let now = now_secs();
        let mut set = self.sets.remove(key).unwrap_or_default();
        let changed = match set.merge_entry(env.clone(), now) {
            Ok(c) => c,
            Err(e) => {
                self.sets.insert(key.to_vec(), set);
                return Err(e);
            }
        };
        set.prune_expired(now);
        let encoded = set.encode()?;
        self.sets.insert(key.to_vec(), set);

        let record = kad::Record {
            key: kad::RecordKey::new(&key),
            value: encoded.clone(),
            publisher: None,
            expires: None,
        };
        if let Err(e) = self.swarm.behaviour_mut().kademlia.store_mut().put(record) {
            warn!(error = %e, "kademlia store rejected record");
        }

        if changed && mirror {
            if let Some(store) = &self.store {
                if should_persist(env.value_type(), env.expires_at(), now) {
                    let row = StoredValue {
                        key: key.to_vec(),
                        value_id: env.slot_id(),
                        value: env.encode()?,
                        value_type: env.value_type(),
                        created_at: env.created_at(),
                        expires_at: env.expires_at(),
                    };
                    if let Err(e) = store.put(&row) {
                        warn!(error = %e, "persistent store write failed");
                    }
                }
            }
        }
        Ok(encoded)
    }

    fn start_network_put(
        &mut self,
        key: &[u8],
        encoded_set: Vec<u8>,
        reply: Option<SyncSender<Result<(), KeymeshError>>>,
    ) {
        let record = kad::Record {
            key: kad::RecordKey::new(&key),
            value: encoded_set,
            publisher: None,
            expires: None,
        };
        match self
            .swarm
            .behaviour_mut()
            .kademlia
            .put_record(record, kad::Quorum::One)
        {
            Ok(qid) => {
                self.pending_puts.insert(qid, reply);
            }
            Err(e) => {
                if let Some(reply) = reply {
                    let _ = reply.try_send(Err(KeymeshError::Storage(e.to_string())));
                }
            }
        }
    }

    fn start_get(&mut self, key: Vec<u8>, reply: GetReply) {
        let qid = self
            .swarm
            .behaviour_mut()
            .kademlia
            .get_record(kad::RecordKey::new(&key));
        let merged = self.sets.get(&key).cloned().unwrap_or_default();
        self.pending_gets.insert(qid, GetPending { merged, reply });
    }

    fn finish_get(&mut self, id: kad::QueryId, transport_error: Option<String>) {
        let Some(pending) = self.pending_gets.remove(&id) else {
            return;
        };
        let now = now_secs();
        let values = pending.merged.values(now);
        match pending.reply {
            GetReply::Sync(tx) => {
                let result = match transport_error {
                    Some(e) if values.is_empty() => Err(KeymeshError::Transport(e)),
                    _ => Ok(values),
                };
                let _ = tx.try_send(result);
            }
            GetReply::Async(mut callback) => {
                for v in values {
                    if !callback(Some(v)) {
                        return;
                    }
                }
                callback(None);
            }
        }
    }

    // ── Command handling ─────────────────────────────────────────────────────

    fn handle_command(&mut self, cmd: DhtCommand) {
        match cmd {
            DhtCommand::PutUnsigned { key, payload, ttl_secs, reply } => {
                let now = now_secs();
                let ttl = ttl_secs.map(Duration::from_secs);
                let env = RecordEnvelope::new_unsigned(
                    type_for_ttl(ttl),
                    payload,
                    now,
                    ttl_secs.map_or(0, |t| now + t),
                );
                match self.apply_envelope(&key, env, true) {
                    Ok(encoded) => self.start_network_put(&key, encoded, Some(reply)),
                    Err(e) => {
                        let _ = reply.try_send(Err(e));
                    }
                }
            }
            DhtCommand::PutSigned { key, payload, value_id, ttl_secs, reply } => {
                let now = now_secs();
                let ttl = ttl_secs.map(Duration::from_secs);
                let seq = self
                    .sets
                    .get(&key)
                    .and_then(|s| s.highest_seq(value_id))
                    .map_or(1, |s| s + 1);
                let env = RecordEnvelope::new_signed(
                    &self.record_keys,
                    type_for_ttl(ttl),
                    value_id,
                    seq,
                    payload,
                    now,
                    ttl_secs.map_or(0, |t| now + t),
                );
                match self.apply_envelope(&key, env, true) {
                    Ok(encoded) => self.start_network_put(&key, encoded, Some(reply)),
                    Err(e) => {
                        let _ = reply.try_send(Err(e));
                    }
                }
            }
            DhtCommand::GetAll { key, reply } => self.start_get(key, GetReply::Sync(reply)),
            DhtCommand::GetAsync { key, callback } => {
                self.start_get(key, GetReply::Async(callback))
            }
            DhtCommand::Delete { key, reply } => {
                self.sets.remove(&key);
                self.swarm
                    .behaviour_mut()
                    .kademlia
                    .remove_record(&kad::RecordKey::new(&key));
                if let Some(store) = &self.store {
                    if let Err(e) = store.delete_key(&key) {
                        warn!(error = %e, "persistent store delete failed");
                    }
                }
                let _ = reply.try_send(Ok(()));
            }
            DhtCommand::Stats { reply } => {
                let now = now_secs();
                let stored_values = self.sets.values().map(|s| s.values(now).len()).sum();
                let known_nodes = self
                    .swarm
                    .behaviour_mut()
                    .kademlia
                    .kbuckets()
                    .map(|bucket| bucket.num_entries())
                    .sum();
                let _ = reply.try_send(DhtStats {
                    known_nodes,
                    stored_values,
                    good_nodes_ipv4: self.good_ipv4.len(),
                    good_nodes_ipv6: self.good_ipv6.len(),
                });
            }
            DhtCommand::Republish { key, envelope } => {
                // Restored rows came from the persistent store; no re-mirror.
                match self.apply_envelope(&key, envelope, false) {
                    Ok(encoded) => self.start_network_put(&key, encoded, None),
                    Err(e) => warn!(error = %e, "republish rejected"),
                }
            }
        }
    }

    // ── Swarm events ─────────────────────────────────────────────────────────

    fn handle_event(&mut self, event: SwarmEvent<KeymeshBehaviourEvent>) {
        match event {
            SwarmEvent::NewListenAddr { address, .. } => {
                info!(addr = %address, "DHT listening on");
            }
            SwarmEvent::Behaviour(KeymeshBehaviourEvent::Kademlia(
                kad::Event::OutboundQueryProgressed { id, result, .. },
            )) => self.handle_query_result(id, result),
            SwarmEvent::Behaviour(KeymeshBehaviourEvent::Kademlia(
                kad::Event::InboundRequest {
                    request: kad::InboundRequest::PutRecord { source, record, .. },
                },
            )) => {
                if let Some(record) = record {
                    self.handle_inbound_put(source, record);
                }
            }
            SwarmEvent::Behaviour(KeymeshBehaviourEvent::Identify(
                identify::Event::Received { peer_id, info, .. },
            )) => {
                for addr in info.listen_addrs {
                    self.swarm
                        .behaviour_mut()
                        .kademlia
                        .add_address(&peer_id, addr);
                }
                let _ = self.swarm.behaviour_mut().kademlia.bootstrap();
            }
            SwarmEvent::ConnectionEstablished { peer_id, endpoint, .. } => {
                let addr = endpoint.get_remote_address();
                if is_ipv4(addr) {
                    self.good_ipv4.insert(peer_id);
                } else {
                    self.good_ipv6.insert(peer_id);
                }
                debug!(peer = %peer_id, "connection established");
            }
            SwarmEvent::ConnectionClosed { peer_id, num_established, .. } => {
                if num_established == 0 {
                    self.good_ipv4.remove(&peer_id);
                    self.good_ipv6.remove(&peer_id);
                }
                debug!(peer = %peer_id, "connection closed");
            }
            SwarmEvent::OutgoingConnectionError { error, .. } => {
                debug!(error = %error, "outgoing connection failed; rotating bootstrap");
                self.dial_next_bootstrap();
            }
            _ => {}
        }
    }

    fn handle_query_result(&mut self, id: kad::QueryId, result: kad::QueryResult) {
        match result {
            kad::QueryResult::PutRecord(res) => {
                if let Some(reply) = self.pending_puts.remove(&id) {
                    let outcome = match res {
                        Ok(_) => Ok(()),
                        Err(kad::PutRecordError::QuorumFailed { .. }) => {
                            Err(KeymeshError::Transport("put quorum failed".into()))
                        }
                        Err(kad::PutRecordError::Timeout { .. }) => {
                            Err(KeymeshError::Transport("put timed out".into()))
                        }
                    };
                    match reply {
                        Some(tx) => {
                            let _ = tx.try_send(outcome);
                        }
                        None => {
                            if let Err(e) = outcome {
                                debug!(error = %e, "background put failed");
                            }
                        }
                    }
                }
            }
            kad::QueryResult::GetRecord(res) => match res {
                Ok(kad::GetRecordOk::FoundRecord(peer_record)) => {
                    if let Some(pending) = self.pending_gets.get_mut(&id) {
                        match RecordSet::decode(&peer_record.record.value) {
                            Ok(set) => {
                                pending.merged.merge_set(set, now_secs());
                            }
                            Err(e) => {
                                warn!(error = %e, "undecodable replica record")
                            }
                        }
                    }
                }
                Ok(kad::GetRecordOk::FinishedWithNoAdditionalRecord { .. }) => {
                    self.finish_get(id, None);
                }
                Err(kad::GetRecordError::NotFound { .. }) => {
                    self.finish_get(id, None);
                }
                Err(kad::GetRecordError::QuorumFailed { .. }) => {
                    self.finish_get(id, Some("get quorum failed".into()));
                }
                Err(kad::GetRecordError::Timeout { .. }) => {
                    self.finish_get(id, Some("get timed out".into()));
                }
            },
            kad::QueryResult::Bootstrap(Ok(_)) => {}
            kad::QueryResult::Bootstrap(Err(e)) => {
                debug!(error = ?e, "kademlia bootstrap query failed");
            }
            _ => {}
        }
    }

    /// Inbound store from a remote peer: validate and merge; accepted
    /// envelopes flow through the store hook like local puts.
    fn handle_inbound_put(&mut self, source: PeerId, record: kad::Record) {
        let key = record.key.to_vec();
        match RecordSet::decode(&record.value) {
            Ok(incoming) => {
                let mut accepted = 0;
                for env in incoming.entries().to_vec() {
                    match self.apply_envelope(&key, env, true) {
                        Ok(_) => accepted += 1,
                        Err(e) => {
                            warn!(peer = %source, error = %e, "rejected inbound record entry")
                        }
                    }
                }
                debug!(peer = %source, accepted, "inbound store merged");
            }
            Err(e) => warn!(peer = %source, error = %e, "undecodable inbound record"),
        }
    }
}

// ── NetworkDht facade ────────────────────────────────────────────────────────

/// Application-facing handle; cheap to clone. Every method is synchronous
/// and safe to call from plain threads; each blocks on a single-shot
/// completion channel with a timeout.
#[derive(Clone)]
pub struct NetworkDht {
    cmd_tx: mpsc::Sender<DhtCommand>,
}

impl NetworkDht {
    fn send(&self, cmd: DhtCommand) -> Result<(), KeymeshError> {
        self.cmd_tx
            .try_send(cmd)
            .map_err(|_| KeymeshError::Transport("dht task unavailable".into()))
    }

    fn put_and_wait(
        &self,
        cmd: impl FnOnce(SyncSender<Result<(), KeymeshError>>) -> DhtCommand,
        timeout: Duration,
        on_timeout: KeymeshError,
    ) -> Result<(), KeymeshError> {
        let (tx, rx) = std::sync::mpsc::sync_channel(1);
        self.send(cmd(tx))?;
        match rx.recv_timeout(timeout) {
            Ok(result) => result,
            Err(_) => Err(on_timeout),
        }
    }
}

impl DhtSubstrate for NetworkDht {
    fn put_ttl(
        &self,
        key: &[u8],
        value: &[u8],
        ttl: Option<Duration>,
    ) -> Result<(), KeymeshError> {
        match ttl {
            Some(ttl) => self.put_and_wait(
                |reply| DhtCommand::PutUnsigned {
                    key: key.to_vec(),
                    payload: value.to_vec(),
                    ttl_secs: Some(ttl.as_secs()),
                    reply,
                },
                Duration::from_secs(DHT_OP_TIMEOUT_SECS),
                KeymeshError::Transport("put timed out".into()),
            ),
            None => {
                // Permanent put: write ack, settle, verify read.
                self.put_and_wait(
                    |reply| DhtCommand::PutUnsigned {
                        key: key.to_vec(),
                        payload: value.to_vec(),
                        ttl_secs: None,
                        reply,
                    },
                    Duration::from_secs(PUT_CONFIRM_TIMEOUT_SECS),
                    KeymeshError::Timeout,
                )?;
                std::thread::sleep(Duration::from_secs(PUT_VERIFY_DELAY_SECS));
                let observed = self.get_all(key)?;
                if observed.iter().any(|v| v == value) {
                    Ok(())
                } else {
                    Err(KeymeshError::Timeout)
                }
            }
        }
    }

    fn put_signed(
        &self,
        key: &[u8],
        value: &[u8],
        value_id: u64,
        ttl: Duration,
    ) -> Result<(), KeymeshError> {
        self.put_and_wait(
            |reply| DhtCommand::PutSigned {
                key: key.to_vec(),
                payload: value.to_vec(),
                value_id,
                ttl_secs: Some(ttl.as_secs()),
                reply,
            },
            Duration::from_secs(DHT_OP_TIMEOUT_SECS),
            KeymeshError::Transport("put timed out".into()),
        )
    }

    fn put_signed_permanent(
        &self,
        key: &[u8],
        value: &[u8],
        value_id: u64,
    ) -> Result<(), KeymeshError> {
        self.put_and_wait(
            |reply| DhtCommand::PutSigned {
                key: key.to_vec(),
                payload: value.to_vec(),
                value_id,
                ttl_secs: None,
                reply,
            },
            Duration::from_secs(PUT_CONFIRM_TIMEOUT_SECS),
            KeymeshError::Timeout,
        )
    }

    fn get_all(&self, key: &[u8]) -> Result<Vec<Vec<u8>>, KeymeshError> {
        let (tx, rx) = std::sync::mpsc::sync_channel(1);
        self.send(DhtCommand::GetAll {
            key: key.to_vec(),
            reply: tx,
        })?;
        match rx.recv_timeout(Duration::from_secs(GET_TIMEOUT_SECS)) {
            Ok(result) => result,
            Err(_) => Err(KeymeshError::Transport("get timed out".into())),
        }
    }

    fn get_async(&self, key: &[u8], callback: GetCallback) {
        if self
            .send(DhtCommand::GetAsync {
                key: key.to_vec(),
                callback,
            })
            .is_err()
        {
            warn!("dht task unavailable; async get dropped");
        }
    }

    fn delete(&self, key: &[u8]) -> Result<(), KeymeshError> {
        self.put_and_wait(
            |reply| DhtCommand::Delete {
                key: key.to_vec(),
                reply,
            },
            Duration::from_secs(DHT_OP_TIMEOUT_SECS),
            KeymeshError::Transport("delete timed out".into()),
        )
    }

    fn get_stats(&self) -> Result<DhtStats, KeymeshError> {
        let (tx, rx) = std::sync::mpsc::sync_channel(1);
        self.send(DhtCommand::Stats { reply: tx })?;
        rx.recv_timeout(Duration::from_secs(DHT_OP_TIMEOUT_SECS))
            .map_err(|_| KeymeshError::Transport("stats timed out".into()))
    }

    fn republish(&self, key: &[u8], envelope_bytes: &[u8]) -> Result<(), KeymeshError> {
        let envelope = RecordEnvelope::decode(envelope_bytes)?;
        self.send(DhtCommand::Republish {
            key: key.to_vec(),
            envelope,
        })
    }
}
