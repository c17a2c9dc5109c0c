//! keymesh-node — the Keymesh DHT node binary.
//!
//! Startup sequence:
//!   1. Open the persistent value store (bootstrap nodes)
//!   2. Load or generate the on-disk node identity (bootstrap nodes)
//!   3. Start the DHT swarm task
//!   4. Restore persisted values back into the overlay
//!   5. Run the hourly republish/purge worker until shutdown

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use clap::Parser;
use tracing::{info, warn};

use keymesh_core::constants::REPUBLISH_INTERVAL_SECS;
use keymesh_dht::republish::{republish_loop, restore_async};
use keymesh_dht::{identity, DhtConfig, DhtNode, DhtSubstrate};
use keymesh_store::PersistentStore;

#[derive(Parser, Debug)]
#[command(
    name = "keymesh-node",
    version,
    about = "Keymesh node — identity, naming, and offline messages over a DHT"
)]
struct Args {
    /// TCP listen port.
    #[arg(long, default_value_t = 4222)]
    port: u16,

    /// Run as a bootstrap node: persistent identity and value store.
    #[arg(long)]
    bootstrap: bool,

    /// Data directory (value store, identity files).
    #[arg(long, default_value = "~/.keymesh")]
    data_dir: PathBuf,

    /// Bootstrap endpoints as `ip:port` (comma-separated). Rotated through
    /// on transport failure.
    #[arg(long, value_delimiter = ',')]
    bootstrap_peers: Vec<String>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info,keymesh=debug".parse().unwrap()),
        )
        .init();

    let args = Args::parse();
    info!(bootstrap = args.bootstrap, "keymesh node starting");

    let data_dir = expand_tilde(&args.data_dir);
    std::fs::create_dir_all(&data_dir)
        .with_context(|| format!("creating data dir {}", data_dir.display()))?;

    let config = DhtConfig {
        port: args.port,
        is_bootstrap: args.bootstrap,
        persistence_path: args.bootstrap.then(|| data_dir.join("values.db")),
        identity_path: args.bootstrap.then(|| data_dir.join("identity")),
        bootstrap_nodes: args.bootstrap_peers.clone(),
        ..DhtConfig::default()
    };

    // ── Persistent store (bootstrap only) ─────────────────────────────────────
    let store = match &config.persistence_path {
        Some(path) => Some(Arc::new(
            PersistentStore::open(path)
                .map_err(|e| anyhow::anyhow!("opening value store: {e}"))?,
        )),
        None => None,
    };

    // ── Node identity ─────────────────────────────────────────────────────────
    let keypair = match &config.identity_path {
        Some(base) => identity::load_or_generate(base)
            .map_err(|e| anyhow::anyhow!("loading node identity: {e}"))?,
        None => identity::ephemeral(),
    };

    // ── DHT node ──────────────────────────────────────────────────────────────
    let (node, dht) = DhtNode::new(&config, keypair, store.clone())
        .map_err(|e| anyhow::anyhow!("building DHT node: {e}"))?;
    tokio::spawn(node.run());
    let dht: Arc<dyn DhtSubstrate> = Arc::new(dht);

    // ── Restore + republish (bootstrap only) ──────────────────────────────────
    if let Some(store) = store {
        let summary = restore_async(Arc::clone(&store), Arc::clone(&dht)).await;
        info!(
            restored = summary.restored,
            skipped_legacy = summary.skipped_legacy,
            "startup restore finished"
        );
        tokio::spawn(republish_loop(
            store,
            Arc::clone(&dht),
            Duration::from_secs(REPUBLISH_INTERVAL_SECS),
        ));
    }

    // ── Ready-state reporting ─────────────────────────────────────────────────
    let stats_dht = Arc::clone(&dht);
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(Duration::from_secs(60));
        loop {
            ticker.tick().await;
            let stats_dht = Arc::clone(&stats_dht);
            let stats =
                tokio::task::spawn_blocking(move || stats_dht.get_stats()).await;
            match stats {
                Ok(Ok(stats)) => info!(
                    ready = stats.ready(),
                    known_nodes = stats.known_nodes,
                    stored_values = stats.stored_values,
                    "overlay status"
                ),
                Ok(Err(e)) => warn!(error = %e, "stats unavailable"),
                Err(e) => warn!(error = %e, "stats task failed"),
            }
        }
    });

    info!("node ready");
    tokio::signal::ctrl_c().await?;
    info!("shutting down");
    Ok(())
}

/// Expand a leading `~` to the user's home directory (`HOME` or `USERPROFILE`).
fn expand_tilde(path: &Path) -> PathBuf {
    if let Ok(stripped) = path.strip_prefix("~") {
        if let Ok(home) = std::env::var("HOME").or_else(|_| std::env::var("USERPROFILE")) {
            return PathBuf::from(home).join(stripped);
        }
    }
    path.to_path_buf()
}
