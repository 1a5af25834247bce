//! Rumor mongering sessions.
//!
//! A session pushes one rumor at one peer and waits for either a status
//! handed over by the dispatcher or a timeout. At most one session exists
//! per peer at any instant; the session map entry is the claim. One task
//! follows the whole chain of sessions (same-peer continuation, coin-flip
//! restarts), registering a fresh claim for each hop.

use crate::node::NodeState;
use gossip_proto::{GossipPacket, RumorMessage, StatusPacket};
use gossip_store::StatusDiff;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::oneshot;
use tracing::{debug, info, warn};

/// How long a session waits for a status before flipping the coin.
const RUMOR_TIMEOUT: Duration = Duration::from_secs(1);

/// Claim the per-peer session slot. None when a session toward this peer
/// is already in flight.
fn try_register(
    state: &Arc<NodeState>,
    peer: SocketAddr,
) -> Option<oneshot::Receiver<StatusPacket>> {
    let mut sessions = state.monger_sessions.lock();
    if sessions.contains_key(&peer) {
        debug!(peer = %peer, "Mongering with this peer already in progress, aborting");
        return None;
    }
    let (tx, rx) = oneshot::channel();
    sessions.insert(peer, tx);
    Some(rx)
}

/// Start mongering `rumor` toward `peer`, or a random peer (excluding
/// `exclude`) when none is given. Aborts cleanly if the peer already has a
/// session.
pub(crate) async fn spread_rumor(
    state: &Arc<NodeState>,
    rumor: RumorMessage,
    peer: Option<SocketAddr>,
    exclude: Option<SocketAddr>,
) {
    let Some(peer) = peer.or_else(|| state.peers.random(exclude)) else {
        warn!("No peer available for mongering");
        return;
    };
    let Some(rx) = try_register(state, peer) else {
        return;
    };

    info!(peer = %peer, origin = %rumor.origin, id = rumor.id, "Mongering");
    state.send_to(peer, GossipPacket::Rumor(rumor.clone())).await;

    tokio::spawn(run_sessions(Arc::clone(state), rumor, peer, rx));
}

enum SessionEvent {
    Status(StatusPacket),
    SenderGone,
    Timeout,
}

/// Drive one chain of mongering sessions to completion.
async fn run_sessions(
    state: Arc<NodeState>,
    mut rumor: RumorMessage,
    mut peer: SocketAddr,
    mut rx: oneshot::Receiver<StatusPacket>,
) {
    loop {
        let event = tokio::select! {
            status = rx => match status {
                Ok(status) => SessionEvent::Status(status),
                Err(_) => SessionEvent::SenderGone,
            },
            _ = tokio::time::sleep(RUMOR_TIMEOUT) => SessionEvent::Timeout,
        };

        match event {
            SessionEvent::Status(status) => {
                // The dispatcher already removed our map entry.
                match state.store.diff(&status) {
                    StatusDiff::HaveRumor(missing) => {
                        // The peer lacks a rumor: a fresh session toward the
                        // same peer, now carrying that rumor.
                        debug!(peer = %peer, origin = %missing.origin, id = missing.id,
                               "Peer is behind, sending the missing rumor");
                        let Some(new_rx) = try_register(&state, peer) else {
                            return;
                        };
                        state
                            .send_to(peer, GossipPacket::Rumor(missing.clone()))
                            .await;
                        rumor = missing;
                        rx = new_rx;
                    }
                    StatusDiff::RemoteHasNew => {
                        debug!(peer = %peer, "Peer is ahead, answering with own status");
                        state
                            .send_to(peer, GossipPacket::Status(state.store.status()))
                            .await;
                        return;
                    }
                    StatusDiff::InSync => {
                        debug!(peer = %peer, "In sync");
                        match flip_coin(&state, peer) {
                            Some((next_peer, new_rx)) => {
                                state
                                    .send_to(next_peer, GossipPacket::Rumor(rumor.clone()))
                                    .await;
                                peer = next_peer;
                                rx = new_rx;
                            }
                            None => return,
                        }
                    }
                }
            }
            SessionEvent::SenderGone => {
                // Map entry was dropped without a send; nothing to clean.
                return;
            }
            SessionEvent::Timeout => {
                debug!(peer = %peer, "Status timeout");
                state.monger_sessions.lock().remove(&peer);
                match flip_coin(&state, peer) {
                    Some((next_peer, new_rx)) => {
                        info!(peer = %next_peer, origin = %rumor.origin, id = rumor.id,
                              "Coin says continue, mongering on");
                        state
                            .send_to(next_peer, GossipPacket::Rumor(rumor.clone()))
                            .await;
                        peer = next_peer;
                        rx = new_rx;
                    }
                    None => return,
                }
            }
        }
    }
}

/// Fair coin: on heads pick a fresh peer (excluding the previous one) and
/// claim its session slot.
fn flip_coin(
    state: &Arc<NodeState>,
    previous: SocketAddr,
) -> Option<(SocketAddr, oneshot::Receiver<StatusPacket>)> {
    if !rand::random::<bool>() {
        debug!("Coin says stop");
        return None;
    }
    let peer = state.peers.random(Some(previous))?;
    let rx = try_register(state, peer)?;
    Some((peer, rx))
}
