//! Node entry point: telemetry, configuration, wiring, tick loops, HTTP.

use std::sync::Arc;
use tracing::{error, info};

use coc_node::config::NodeConfig;
use coc_node::ticks;
use coc_node::Node;
use coc_p2p::{DnsSeedResolver, P2pServerConfig};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    coc_telemetry::init_tracing("info");

    let config = NodeConfig::from_env().map_err(|e| {
        error!(error = %e, "configuration invalid");
        anyhow::anyhow!(e)
    })?;
    info!(data_dir = %config.data_dir.display(), chain_id = config.chain_id, "starting node");

    let node = Arc::new(Node::build(config.clone())?);

    // DNS seeds are optional; a resolver failure only disables them.
    let seeds = match coc_p2p::dns_seeds::HickoryTxtResolver::system() {
        Ok(resolver) if !config.dns_seeds.is_empty() => Some(Arc::new(DnsSeedResolver::new(
            Box::new(resolver),
            300_000,
        ))),
        _ => None,
    };

    let server = tokio::spawn(coc_p2p::serve(
        Arc::clone(&node.p2p),
        P2pServerConfig {
            bind: config.p2p_bind,
            protocol: "coc/1".into(),
            fanout_peers: config.max_peers,
        },
    ));
    let propose = tokio::spawn(ticks::propose_loop(
        Arc::clone(&node),
        node.shutdown_signal(),
    ));
    let sync = tokio::spawn(ticks::sync_loop(Arc::clone(&node), node.shutdown_signal()));
    let discovery = tokio::spawn(ticks::discovery_loop(
        Arc::clone(&node),
        seeds,
        node.shutdown_signal(),
    ));
    let pose = tokio::spawn(ticks::pose_loop(Arc::clone(&node), node.shutdown_signal()));

    tokio::signal::ctrl_c().await?;
    info!("interrupt received, shutting down");
    node.stop();

    let _ = tokio::join!(propose, sync, discovery, pose);
    server.abort();
    Ok(())
}
