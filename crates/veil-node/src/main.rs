//! The veil overlay node.
//!
//! With `--listen` the node accepts bootstrap connections; with
//! `--entrypoint` it joins an existing mesh through that member. Either
//! alone is a valid deployment (pure entrypoint, or client-only node).

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Context;
use clap::Parser;
use tokio::net::TcpListener;
use tracing_subscriber::EnvFilter;

use veil_core::{gateway, MeshNode, NodeConfig};
use veil_crypto::Identity;
use veil_transport::WebRtcConnector;

#[derive(Parser)]
#[command(name = "veild")]
#[command(about = "Anonymous peer-to-peer mesh overlay node", long_about = None)]
struct Cli {
    /// Address to accept bootstrap connections on, e.g. 0.0.0.0:8000.
    /// Omit for a client-only node.
    #[arg(short = 'l', long, visible_alias = "lp")]
    listen: Option<String>,

    /// Existing member to join through, as host:port.
    #[arg(short = 'e', long, visible_alias = "ep")]
    entrypoint: Option<String>,

    /// Private key file; generated when absent.
    #[arg(long, default_value = "private_key.pem")]
    private_key: PathBuf,

    /// Public key file; generated when absent.
    #[arg(long, default_value = "public_key.pem")]
    public_key: PathBuf,

    /// STUN server for brokered channels.
    #[arg(long, default_value = "stun:stun.l.google.com:19302")]
    stun: Vec<String>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into()))
        .init();

    let cli = Cli::parse();
    if cli.listen.is_none() && cli.entrypoint.is_none() {
        anyhow::bail!("nothing to do: pass --listen, --entrypoint, or both");
    }

    let identity = Identity::load_or_generate(&cli.private_key, &cli.public_key)
        .context("loading identity")?;
    tracing::info!(mesh = %identity.hash(), "identity ready");

    let config = NodeConfig {
        stun_urls: cli.stun.clone(),
        ..NodeConfig::default()
    };
    let connector = Arc::new(WebRtcConnector::new(config.stun_urls.clone()));
    let node = MeshNode::new(identity, config, connector);
    node.start();

    if let Some(listen) = &cli.listen {
        let listener = TcpListener::bind(listen)
            .await
            .with_context(|| format!("binding {listen}"))?;
        let serving = Arc::clone(&node);
        tokio::spawn(async move {
            if let Err(e) = gateway::serve(serving, listener).await {
                tracing::error!(error = %e, "gateway failed");
            }
        });
    }

    if let Some(entrypoint) = &cli.entrypoint {
        node.attach(entrypoint)
            .await
            .with_context(|| format!("attaching to {entrypoint}"))?;
    }

    tokio::signal::ctrl_c().await.context("waiting for ctrl-c")?;
    node.shutdown();
    Ok(())
}
