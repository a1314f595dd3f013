// Seedpeer node: bind, join the overlay through the seed list, report connections.

mod config;
mod display;

use std::net::SocketAddr;
use std::time::Duration;

use anyhow::Context;
use clap::Parser;
use log::info;
use seedpeer_core::{generate_secret_key, Keypair, Node, NodeConfig};

const REPORT_INTERVAL: Duration = Duration::from_secs(5);

#[derive(Debug, Parser)]
#[command(name = "seedpeer-node", version, about = "Seedpeer test node")]
struct Cli {
    /// Hex encoded 32 byte secret key. Omit to generate one.
    #[arg(long)]
    private_key: Option<String>,
    /// Comma separated seed addresses, e.g.
    /// /ip4/192.168.1.7/tcp/35153/p2p/<peer-id>,/ip4/127.0.0.1/tcp/35153/p2p/<peer-id>
    #[arg(long)]
    initial_peer_list: Option<String>,
    /// Listen address, e.g. 0.0.0.0:4001 (port 0 picks a free port).
    #[arg(long)]
    listen_addr: Option<SocketAddr>,
    /// Print a new secret key and its peer ID, then exit.
    #[arg(long)]
    generate_key: bool,
}

fn main() -> anyhow::Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();
    let cli = Cli::parse();

    if cli.generate_key {
        let secret = generate_secret_key();
        let keypair = Keypair::from_secret_bytes(&secret)?;
        println!("private key: {}", hex::encode(secret));
        println!("peer id:     {}", keypair.peer_id());
        return Ok(());
    }

    let mut cfg = config::load()?;
    cfg.apply_overrides(cli.private_key, cli.initial_peer_list.as_deref(), cli.listen_addr);
    let node_config = cfg.node_config()?;

    let rt = tokio::runtime::Runtime::new()?;
    rt.block_on(run(node_config))
}

async fn run(node_config: NodeConfig) -> anyhow::Result<()> {
    let node = Node::new(node_config)
        .await
        .context("failed to start node")?;
    node.bootstrap();

    let shutdown = shutdown_signal();
    tokio::pin!(shutdown);
    loop {
        tokio::select! {
            res = &mut shutdown => {
                res?;
                info!("terminating at user's signal...");
                break;
            }
            _ = tokio::time::sleep(REPORT_INTERVAL) => {
                println!("{}", display::report(&node.addresses(), node.connected_addresses()));
            }
        }
    }
    node.close();
    Ok(())
}

/// Wait for Ctrl+C or SIGTERM (Unix).
async fn shutdown_signal() -> std::io::Result<()> {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{signal, SignalKind};
        let mut sigterm = signal(SignalKind::terminate())?;
        tokio::select! {
            res = tokio::signal::ctrl_c() => res?,
            _ = sigterm.recv() => {}
        }
    }
    #[cfg(not(unix))]
    {
        tokio::signal::ctrl_c().await?;
    }
    Ok(())
}
