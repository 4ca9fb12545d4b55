// storagesync node binary: wires the durable tables, the gossip overlay,
// the replication engine, and the periodic scheduler together.

mod config;

use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::Parser;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use config::{Cli, Command, RunArgs};
use storagesync_core::Digest256;
use storagesync_engine::{Engine, SchedulerConfig};
use storagesync_net::{PeerNetwork, SwarmNetwork};

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.verbose);

    match cli.command {
        Command::Run(args) => run(cli.storage_root, args).await,
        Command::Purge(purge_args) => purge(cli.storage_root, purge_args.file_digest).await,
    }
}

fn init_tracing(verbose: bool) {
    let filter = if verbose {
        EnvFilter::new("debug")
    } else {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"))
    };
    tracing_subscriber::fmt().with_env_filter(filter).init();
}

async fn run(storage_root: std::path::PathBuf, args: RunArgs) -> Result<()> {
    info!(listen_addr = %args.listen_addr, "starting node");

    let (swarm, mut inbound) = SwarmNetwork::spawn(&args.listen_addr)
        .context("failed to start the libp2p swarm")?;

    for addr in &args.bootnodes {
        match addr.parse::<storagesync_net::Multiaddr>() {
            Ok(multiaddr) => {
                info!(addr = %multiaddr, "dialing bootstrap peer");
                swarm.dial(multiaddr);
            }
            Err(e) => warn!(addr = %addr, error = %e, "skipping unparseable bootstrap address"),
        }
    }

    let network: Arc<dyn PeerNetwork> = Arc::new(swarm);

    let engine = Arc::new(
        Engine::open(&storage_root, network)
            .with_context(|| format!("failed to open storage root {}", storage_root.display()))?,
    );

    let scheduler_config = SchedulerConfig {
        tick_interval: Duration::from_secs(args.tick_interval_secs),
        header_probe_interval: Duration::from_secs(args.header_probe_interval_secs),
        part_fetch_interval: Duration::from_secs(args.part_fetch_interval_secs),
        reconcile_interval: Duration::from_secs(args.reconcile_interval_secs),
        ..SchedulerConfig::default()
    };
    let scheduler = storagesync_engine::scheduler::start(engine.clone(), scheduler_config);

    info!("node ready, processing inbound messages");

    let shutdown = tokio::signal::ctrl_c();
    tokio::pin!(shutdown);

    loop {
        tokio::select! {
            event = inbound.recv() => {
                match event {
                    Some(storagesync_net::InboundEvent::Message { from, message }) => {
                        engine.handle_inbound(from, message).await;
                    }
                    Some(storagesync_net::InboundEvent::PeerConnected(peer)) => {
                        info!(peer = %peer, "peer connected");
                    }
                    Some(storagesync_net::InboundEvent::PeerDisconnected(peer)) => {
                        info!(peer = %peer, "peer disconnected");
                    }
                    None => {
                        warn!("inbound event channel closed, shutting down");
                        break;
                    }
                }
            }
            _ = &mut shutdown => {
                info!("received shutdown signal");
                break;
            }
        }
    }

    scheduler.stop().await;
    Ok(())
}

async fn purge(storage_root: std::path::PathBuf, file_digest_hex: String) -> Result<()> {
    let file_digest: Digest256 = file_digest_hex
        .parse()
        .context("file digest must be 64 hex characters")?;

    struct NoopNetwork;
    #[async_trait::async_trait]
    impl PeerNetwork for NoopNetwork {
        async fn broadcast(&self, _msg: storagesync_net::Message) {}
        async fn send(&self, _peer: storagesync_net::PeerId, _msg: storagesync_net::Message) {}
        async fn peers(&self) -> Vec<storagesync_net::PeerId> {
            Vec::new()
        }
    }

    let engine = Engine::open(&storage_root, Arc::new(NoopNetwork))
        .with_context(|| format!("failed to open storage root {}", storage_root.display()))?;
    engine.purge_file(file_digest).await?;
    info!(file_digest = %file_digest, "purge complete");
    Ok(())
}
