//! # Tick Loops
//!
//! The event loops that drive the node: propose, sync, discovery and the
//! PoSe agent. Each loop is one tokio task watching the shared shutdown
//! signal; every outbound call inside a loop carries its own timeout, so
//! a dead peer can only cost one bounded await.

use std::sync::Arc;
use tokio::sync::watch;
use tokio::time::{interval, Duration};
use tracing::{debug, info, warn};

use coc_chain::should_switch_fork;
use coc_p2p::{DnsSeedResolver, PeerInfo, ScoreEvent};
use coc_pose::TargetNode;
use coc_telemetry::NodeMetrics;

use crate::node::Node;
use crate::now_ms;

/// Propose tick: at every block interval, try to produce the next block.
/// With BFT enabled the candidate goes through a coordinator round and is
/// applied by the finalize callback; without it, the engine applies
/// directly.
pub async fn propose_loop(node: Arc<Node>, mut shutdown: watch::Receiver<bool>) {
    let mut ticker = interval(Duration::from_millis(node.config.block_interval_ms));
    loop {
        tokio::select! {
            _ = ticker.tick() => {}
            _ = shutdown.changed() => {
                info!("propose loop stopping");
                return;
            }
        }
        let now = now_ms();

        if node.config.bft {
            // Drive timeouts first so a stuck round clears.
            let set = node.engine.lock().governance().cloned();
            let Some(set) = set else {
                warn!("bft enabled without governance; skipping propose tick");
                continue;
            };
            let timeout_actions = node.bft.lock().tick(&set, now);
            node.hooks.run_bft_actions(timeout_actions);

            let candidate = { node.engine.lock().build_candidate_block(now) };
            match candidate {
                Ok(Some(block)) => {
                    let height = block.number;
                    let started = { node.bft.lock().start_round(block, height, &set, now) };
                    match started {
                        Ok(actions) => node.hooks.run_bft_actions(actions),
                        Err(e) => debug!(error = %e, "round not started"),
                    }
                }
                Ok(None) => {}
                Err(e) => warn!(error = %e, "candidate build failed"),
            }
        } else {
            let proposed = { node.engine.lock().propose_next_block(now) };
            match proposed {
                Ok(Some(block)) => {
                    NodeMetrics::bump(&node.metrics.blocks_applied);
                    node.hooks.gossip_block(&block);
                }
                Ok(None) => {}
                Err(e) => warn!(error = %e, "propose tick failed"),
            }
        }
    }
}

/// Sync tick: pull a peer's chain snapshot and either adopt incremental
/// blocks or fall back to a state snapshot fast-path.
pub async fn sync_loop(node: Arc<Node>, mut shutdown: watch::Receiver<bool>) {
    let mut ticker = interval(Duration::from_millis(node.config.sync_interval_ms));
    loop {
        tokio::select! {
            _ = ticker.tick() => {}
            _ = shutdown.changed() => {
                info!("sync loop stopping");
                return;
            }
        }
        for peer in node.discovery.sample(1) {
            sync_from_peer(&node, &peer).await;
        }
    }
}

async fn sync_from_peer(node: &Arc<Node>, peer: &PeerInfo) {
    let now = now_ms();
    let snapshot = match node.client.chain_snapshot(peer).await {
        Ok(snapshot) => snapshot,
        Err(e) => {
            debug!(peer = %peer.id, error = %e, "chain snapshot fetch failed");
            node.scoring.record(&peer.id, ScoreEvent::Timeout, now);
            return;
        }
    };

    let local_tip = {
        let engine = node.engine.lock();
        match engine.tip() {
            Ok(tip) => tip.map(|b| b.fork_tip()),
            Err(e) => {
                warn!(error = %e, "local tip read failed");
                return;
            }
        }
    };
    if let Some(local) = &local_tip {
        if should_switch_fork(local, &snapshot.tip).is_none() {
            node.scoring.record(&peer.id, ScoreEvent::Success, now);
            return;
        }
    }

    // Incremental adoption first.
    let adopted = {
        let mut engine = node.engine.lock();
        engine.maybe_adopt_snapshot(&snapshot.blocks, now)
    };
    match adopted {
        Ok(applied) if applied > 0 => {
            info!(peer = %peer.id, applied, "adopted peer blocks");
            node.scoring.record(&peer.id, ScoreEvent::Success, now);
            return;
        }
        Ok(_) => {}
        Err(e) => {
            debug!(peer = %peer.id, error = %e, "incremental adoption failed");
        }
    }

    // Too far behind: state snapshot fast-path.
    let local_height = local_tip.map(|t| t.height).unwrap_or(0);
    if snapshot.height <= local_height + 1 {
        return;
    }
    info!(peer = %peer.id, remote = snapshot.height, local = local_height, "snap-sync fast path");
    let state_doc = match node.client.state_snapshot(peer).await {
        Ok(doc) => doc,
        Err(e) => {
            node.scoring.record(&peer.id, ScoreEvent::Failure, now);
            debug!(error = %e, "state snapshot fetch failed");
            return;
        }
    };
    let imported: Result<(u64, usize), String> = (|| {
        let parsed =
            coc_state::StateSnapshot::deserialize(&state_doc).map_err(|e| e.to_string())?;
        let mut engine = node.engine.lock();
        let root = engine
            .import_state_snapshot(&parsed)
            .map_err(|e| e.to_string())?;
        let count = engine
            .import_snap_sync_blocks(&snapshot.blocks, Some(root))
            .map_err(|e| e.to_string())?;
        Ok((parsed.block_height, count))
    })();
    match imported {
        Ok((height, count)) => {
            info!(peer = %peer.id, height, count, "snap-sync complete");
            node.scoring.record(&peer.id, ScoreEvent::Success, now);
        }
        Err(e) => {
            warn!(peer = %peer.id, error = %e, "snap-sync failed");
            node.scoring.record(&peer.id, ScoreEvent::InvalidData, now);
        }
    }
}

/// Discovery tick: learn peers from neighbors and DNS seeds, verify
/// quarantined candidates, decay scores, prune bookkeeping.
pub async fn discovery_loop(
    node: Arc<Node>,
    seeds: Option<Arc<DnsSeedResolver>>,
    mut shutdown: watch::Receiver<bool>,
) {
    let interval_ms = node.discovery.config().discovery_interval_ms;
    let mut ticker = interval(Duration::from_millis(interval_ms));
    loop {
        tokio::select! {
            _ = ticker.tick() => {}
            _ = shutdown.changed() => {
                info!("discovery loop stopping");
                return;
            }
        }
        let now = now_ms();

        // Ask up to three neighbors for their peer lists.
        for peer in node.discovery.sample(3) {
            match node.client.peers(&peer).await {
                Ok(list) => {
                    node.scoring.record(&peer.id, ScoreEvent::Success, now);
                    for candidate in list {
                        if let Err(reason) = node.discovery.add_candidate(candidate, now) {
                            debug!(reason, "candidate filtered");
                        }
                    }
                }
                Err(e) => {
                    debug!(peer = %peer.id, error = %e, "peer list fetch failed");
                    node.scoring.record(&peer.id, ScoreEvent::Failure, now);
                }
            }
        }

        // DNS seeds feed the same filter.
        if let Some(resolver) = &seeds {
            for domain in &node.config.dns_seeds {
                match resolver.resolve(domain, now).await {
                    Ok(found) => {
                        for candidate in found {
                            let _ = node.discovery.add_candidate(candidate, now);
                        }
                    }
                    Err(e) => debug!(domain, error = %e, "seed lookup failed"),
                }
            }
        }

        // Identity-proof handshake promotes quarantined candidates.
        for candidate in node.discovery.quarantined(3) {
            match node.client.verify_identity(&candidate).await {
                Ok(true) => {
                    node.discovery.promote(&candidate.id);
                }
                Ok(false) => {
                    warn!(peer = %candidate.id, "identity proof failed");
                    node.discovery.remove(&candidate.id);
                    node.scoring.record(&candidate.id, ScoreEvent::InvalidData, now);
                }
                Err(e) => {
                    debug!(peer = %candidate.id, error = %e, "identity proof unreachable");
                    node.scoring.record(&candidate.id, ScoreEvent::Timeout, now);
                }
            }
        }

        node.scoring.decay_tick(now);
        node.scoring.prune(now);
        node.p2p.limiter.prune(now);
    }
}

/// PoSe agent tick: targets track the verified peer set.
pub async fn pose_loop(node: Arc<Node>, mut shutdown: watch::Receiver<bool>) {
    let mut ticker = interval(Duration::from_millis(node.config.agent_interval_ms));
    loop {
        tokio::select! {
            _ = ticker.tick() => {}
            _ = shutdown.changed() => {
                info!("pose loop stopping");
                return;
            }
        }
        let targets: Vec<TargetNode> = node
            .discovery
            .known_peers(node.config.max_peers)
            .into_iter()
            .map(|peer| TargetNode {
                id: peer.id,
                url: peer.url,
                storage_root: None,
                storage_tree_size: 0,
            })
            .collect();
        node.agent.set_targets(targets);
        match node.agent.tick(now_ms()).await {
            Ok(report) if !report.skipped => {
                debug!(
                    issued = report.issued,
                    verified = report.verified,
                    failed = report.failed,
                    "pose tick"
                );
            }
            Ok(_) => {}
            Err(e) => warn!(error = %e, "pose tick failed"),
        }
    }
}
