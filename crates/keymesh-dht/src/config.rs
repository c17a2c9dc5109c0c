use std::path::PathBuf;

/// Configuration for a Keymesh DHT node.
#[derive(Debug, Clone)]
pub struct DhtConfig {
    /// TCP listen port.
    pub port: u16,
    /// Bootstrap nodes persist accepted values and their own identity.
    pub is_bootstrap: bool,
    /// SQLite file for the persistent value store (bootstrap nodes).
    pub persistence_path: Option<PathBuf>,
    /// Base path for the on-disk identity (`<base>.crt` / `<base>.pem`).
    pub identity_path: Option<PathBuf>,
    /// Ordered `ip:port` list; user nodes rotate through on transport
    /// failure.
    pub bootstrap_nodes: Vec<String>,
    /// Protocol version string advertised to peers.
    pub protocol_version: String,
}

impl Default for DhtConfig {
    fn default() -> Self {
        Self {
            port: 4222,
            is_bootstrap: false,
            persistence_path: None,
            identity_path: None,
            bootstrap_nodes: Vec::new(),
            protocol_version: "/keymesh/1.0.0".into(),
        }
    }
}
