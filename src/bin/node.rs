//! A full Ahmiyat node: restores the chain, listens for peers, gossips and
//! produces blocks.

use ahmiyat::config::{ConsensusMode, NodeConfig};
use ahmiyat::consensus::quorum::LocalSigners;
use ahmiyat::consensus::Engine;
use ahmiyat::identity::{Ed25519Identity, Keypair};
use ahmiyat::p2p::Node;
use ahmiyat::storage::SledStore;
use anyhow::Context;
use clap::Parser;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
#[command(name = "ahmiyat-node", version, about = "Ahmiyat ledger node")]
struct Args {
    /// TOML config file; `AHMIYAT_` environment variables override it
    #[arg(long)]
    config: Option<PathBuf>,

    #[arg(long)]
    listen: Option<String>,

    /// Bootstrap peer endpoint (repeatable)
    #[arg(long = "peer")]
    peers: Vec<String>,

    #[arg(long)]
    mode: Option<ConsensusMode>,

    /// Label the producer key is derived from; a fresh key is used otherwise
    #[arg(long)]
    producer_seed: Option<String>,

    /// Delegate key labels this node signs acknowledgements for (repeatable)
    #[arg(long = "delegate-key")]
    delegate_keys: Vec<String>,

    #[arg(long)]
    data_dir: Option<String>,

    /// Seconds between production attempts
    #[arg(long, default_value_t = 5)]
    block_interval: u64,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with_target(false)
        .init();

    let args = Args::parse();
    let mut config = NodeConfig::load(args.config.as_deref()).context("loading configuration")?;
    if let Some(listen) = args.listen {
        config.network.listen_addr = listen;
    }
    config.network.bootstrap_peers.extend(args.peers);
    if let Some(mode) = args.mode {
        config.consensus.mode = mode;
    }
    if let Some(dir) = args.data_dir {
        config.storage.path = dir;
    }

    let producer = match &args.producer_seed {
        Some(label) => Keypair::from_label(label),
        None => Keypair::generate(),
    };
    tracing::info!(
        mode = %config.consensus.mode,
        producer = %producer.address(),
        store = %config.storage.path,
        "starting node"
    );

    let store = SledStore::open(&config.storage.path)
        .with_context(|| format!("opening store at {}", config.storage.path))?;
    let signers = LocalSigners::new(args.delegate_keys.iter().map(|l| Keypair::from_label(l)).collect());
    let engine = Engine::with_store(&config, Arc::new(Ed25519Identity), Box::new(store))
        .context("restoring chain")?
        .with_ack_source(Box::new(signers));
    let engine = Arc::new(engine);

    let (node, listener) = Node::bind(Arc::clone(&engine), config.network.clone())
        .await
        .context("binding listener")?;

    tokio::spawn(Arc::clone(&node).serve(listener));
    tokio::spawn(Arc::clone(&node).run_discovery());
    tokio::spawn(Arc::clone(&node).run_producer(
        producer.address().to_string(),
        Duration::from_secs(args.block_interval.max(1)),
    ));
    node.discover_peers().await;

    tokio::signal::ctrl_c().await.context("waiting for shutdown signal")?;
    tracing::info!(height = engine.height(), "shutting down");
    if !engine.persist() {
        tracing::error!("final save failed");
    }
    Ok(())
}
