//! The dispatcher: classifies every inbound packet and performs the
//! minimal state mutation plus outbound enqueues.
//!
//! One logical owner for all shared state; subsystem tasks (mongering,
//! download, search, miner) are fed through per-key channels installed
//! here.

use crate::downloader;
use crate::mongering;
use crate::node::NodeState;
use crate::search;
use gossip_proto::{
    BlockPublish, ClientPacket, DataReply, DataRequest, FileRecord, GossipPacket, PrivateMessage,
    RumorMessage, SearchReply, SearchRequest, SimpleMessage, StatusPacket, TxPublish,
    DEFAULT_HOP_LIMIT, TX_HOP_LIMIT,
};
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

/// How long an answered search request stays suppressed.
const RECENT_SEARCH_TIMEOUT: Duration = Duration::from_millis(500);

/// Process one packet from the local client.
pub(crate) async fn handle_client(state: &Arc<NodeState>, packet: ClientPacket) {
    match packet {
        ClientPacket::Rumor { text } => {
            info!(text = %text, "Client rumor");
            if state.simple_mode() {
                let message = SimpleMessage {
                    origin: state.name(),
                    relay_addr: state.peer_addr().to_string(),
                    text,
                };
                process_simple(state, message, None).await;
            } else {
                publish_local_rumor(state, text).await;
            }
        }
        ClientPacket::RouteRumor => {
            if state.simple_mode() {
                warn!("Route rumoring is pointless in simple mode, ignoring");
                return;
            }
            debug!("Client route rumor");
            publish_local_rumor(state, String::new()).await;
        }
        ClientPacket::Private { text, destination } => {
            info!(destination = %destination, "Client private message");
            let message = PrivateMessage {
                origin: state.name(),
                id: 0,
                text,
                destination,
                hop_limit: DEFAULT_HOP_LIMIT,
            };
            process_private(state, message).await;
        }
        ClientPacket::Share { path } => {
            info!(path = %path, "Client share request");
            process_client_share(state, &path).await;
        }
        ClientPacket::Download {
            name,
            destination,
            hash,
        } => {
            info!(name = %name, destination = %destination, "Client download request");
            let destination = if destination.is_empty() {
                // Resolve the origin from the current search's full matches.
                match search::resolve_download_origin(state, &hash) {
                    Some(origin) => origin,
                    None => {
                        warn!("No full match holds the requested hash, cannot download");
                        return;
                    }
                }
            } else {
                destination
            };
            downloader::start_download(state, destination, name, hash).await;
        }
        ClientPacket::Search { keywords, budget } => {
            info!(keywords = ?keywords, budget, "Client search request");
            search::start_search(state, keywords, budget);
        }
    }
}

/// Process one packet from a peer. The source address is unioned into the
/// peer set before classification.
pub(crate) async fn handle_peer(state: &Arc<NodeState>, packet: GossipPacket, src: SocketAddr) {
    state.peers.add(src);

    match packet {
        GossipPacket::Simple(message) => {
            debug!(from = %src, origin = %message.origin, "Simple message");
            process_simple(state, message, Some(src)).await;
        }
        GossipPacket::Rumor(rumor) => {
            debug!(from = %src, origin = %rumor.origin, id = rumor.id, "Rumor");
            process_rumor_from_peer(state, rumor, src).await;
        }
        GossipPacket::Status(status) => {
            debug!(from = %src, entries = status.want.len(), "Status");
            process_status(state, status, src).await;
        }
        GossipPacket::Private(message) => {
            debug!(from = %src, destination = %message.destination, "Private");
            process_private(state, message).await;
        }
        GossipPacket::DataRequest(request) => {
            debug!(from = %src, destination = %request.destination, "Data request");
            process_data_request(state, request).await;
        }
        GossipPacket::DataReply(reply) => {
            debug!(from = %src, destination = %reply.destination, "Data reply");
            process_data_reply(state, reply).await;
        }
        GossipPacket::SearchRequest(request) => {
            debug!(from = %src, origin = %request.origin, budget = request.budget, "Search request");
            process_search_request_from_peer(state, request).await;
        }
        GossipPacket::SearchReply(reply) => {
            debug!(from = %src, destination = %reply.destination, "Search reply");
            process_search_reply(state, reply).await;
        }
        GossipPacket::TxPublish(tx) => {
            debug!(from = %src, name = %tx.file.name, "Tx publish");
            process_tx_publish(state, tx).await;
        }
        GossipPacket::BlockPublish(publish) => {
            debug!(from = %src, "Block publish");
            process_block_publish(state, publish).await;
        }
    }
}

/// Assign the next local id, admit and start mongering.
async fn publish_local_rumor(state: &Arc<NodeState>, text: String) {
    let origin = state.name();
    let rumor = RumorMessage {
        id: state.store.next_id(&origin),
        origin,
        text,
    };
    process_rumor(state, rumor).await;
}

/// Flood mode: rewrite the relay address and copy to every peer except the
/// source.
async fn process_simple(state: &Arc<NodeState>, mut message: SimpleMessage, src: Option<SocketAddr>) {
    message.relay_addr = state.peer_addr().to_string();
    state
        .send_all_except(GossipPacket::Simple(message), src)
        .await;
}

/// Rumor from a peer: learn the route if new, admit, ack with the
/// advanced clock, then monger onward.
async fn process_rumor_from_peer(state: &Arc<NodeState>, rumor: RumorMessage, src: SocketAddr) {
    if state.store.is_new(&rumor) {
        state.routing.update(&rumor.origin, src);
    }
    let admitted = state.store.add_rumor(rumor.clone());

    // The ack carries the vector clock as it stands after admission, so
    // the sender sees this rumor accounted for.
    state
        .send_to(src, GossipPacket::Status(state.store.status()))
        .await;

    if !admitted {
        debug!(origin = %rumor.origin, id = rumor.id, "Rumor not new, skipping");
        return;
    }
    if state.peers.is_empty() {
        warn!("No peers known, cannot monger");
        return;
    }
    mongering::spread_rumor(state, rumor, None, Some(src)).await;
}

/// Admit a locally-published rumor and start mongering it.
async fn process_rumor(state: &Arc<NodeState>, rumor: RumorMessage) {
    if !state.store.add_rumor(rumor.clone()) {
        debug!(origin = %rumor.origin, id = rumor.id, "Rumor not new, skipping");
        return;
    }

    if state.peers.is_empty() {
        warn!("No peers known, cannot monger");
        return;
    }
    mongering::spread_rumor(state, rumor, None, None).await;
}

/// Status from a peer: hand off to the mongering session keyed by that
/// peer exactly once, otherwise treat as anti-entropy.
async fn process_status(state: &Arc<NodeState>, status: StatusPacket, src: SocketAddr) {
    let session = state.monger_sessions.lock().remove(&src);
    let status = match session {
        Some(tx) => match tx.send(status) {
            Ok(()) => return,
            // The session timed out concurrently; fall through to
            // anti-entropy with the status handed back.
            Err(status) => {
                debug!(peer = %src, "Mongering session vanished, treating status as anti-entropy");
                status
            }
        },
        None => status,
    };

    match state.store.diff(&status) {
        gossip_store::StatusDiff::HaveRumor(rumor) => {
            mongering::spread_rumor(state, rumor, Some(src), None).await;
        }
        gossip_store::StatusDiff::RemoteHasNew => {
            state
                .send_to(src, GossipPacket::Status(state.store.status()))
                .await;
        }
        gossip_store::StatusDiff::InSync => {
            debug!(peer = %src, "In sync");
        }
    }
}

/// Private message: consume if ours, else forward with one hop less.
async fn process_private(state: &Arc<NodeState>, mut message: PrivateMessage) {
    if message.destination == state.name() {
        info!(origin = %message.origin, "Private message received");
        state.store.add_private(message);
        return;
    }
    if message.hop_limit == 0 {
        warn!(destination = %message.destination, "Private hop limit exhausted, dropped");
        return;
    }
    message.hop_limit -= 1;
    let destination = message.destination.clone();
    state
        .send_via_next_hop(&destination, GossipPacket::Private(message))
        .await;
}

/// Data request: serve from shared then downloading files if ours, else
/// forward.
async fn process_data_request(state: &Arc<NodeState>, mut request: DataRequest) {
    if request.destination == state.name() {
        let data = state
            .shared
            .chunk_or_metafile(&request.hash)
            .or_else(|| state.downloads.chunk_or_metafile(&request.hash));
        let Some(data) = data else {
            warn!(
                origin = %request.origin,
                hash = %hex::encode(request.hash),
                "Requested hash not held, dropping request"
            );
            return;
        };

        let reply = DataReply {
            origin: state.name(),
            destination: request.origin.clone(),
            hop_limit: DEFAULT_HOP_LIMIT,
            hash: request.hash,
            data,
        };
        state
            .send_via_next_hop(&request.origin, GossipPacket::DataReply(reply))
            .await;
        return;
    }

    if request.hop_limit == 0 {
        warn!(destination = %request.destination, "Data request hop limit exhausted, dropped");
        return;
    }
    request.hop_limit -= 1;
    let destination = request.destination.clone();
    state
        .send_via_next_hop(&destination, GossipPacket::DataRequest(request))
        .await;
}

/// Data reply: route into the download task keyed by the reply's origin.
async fn process_data_reply(state: &Arc<NodeState>, mut reply: DataReply) {
    if reply.destination != state.name() {
        if reply.hop_limit == 0 {
            warn!(destination = %reply.destination, "Data reply hop limit exhausted, dropped");
            return;
        }
        reply.hop_limit -= 1;
        let destination = reply.destination.clone();
        state
            .send_via_next_hop(&destination, GossipPacket::DataReply(reply))
            .await;
        return;
    }

    let channel = state.download_channels.lock().get(&reply.origin).cloned();
    match channel {
        Some(tx) => {
            if tx.send(reply).await.is_err() {
                debug!("Download task already gone, reply dropped");
            }
        }
        None => warn!(origin = %reply.origin, "Not downloading from this origin, reply dropped"),
    }
}

/// Search request from a peer: suppress recently-answered duplicates, then
/// process.
async fn process_search_request_from_peer(state: &Arc<NodeState>, request: SearchRequest) {
    let key = format!("{},{}", request.origin, request.keywords.join(","));
    if state.recent_searches.contains_key(&key) {
        debug!(key = %key, "Search request answered recently, suppressed");
        return;
    }
    state.recent_searches.insert(key.clone(), ());
    tokio::spawn({
        let state = Arc::clone(state);
        async move {
            tokio::time::sleep(RECENT_SEARCH_TIMEOUT).await;
            state.recent_searches.remove(&key);
        }
    });

    process_search_request(state, request).await;
}

/// Search request core, shared with the local expanding-ring dispatch.
///
/// For foreign origins: answer with local matches, deduct one from the
/// budget. In all cases the residual budget is split across known peers,
/// floor plus one extra for the first `budget mod peers` of them; peers
/// that would get zero are skipped.
pub(crate) async fn process_search_request(state: &Arc<NodeState>, request: SearchRequest) {
    let name = state.name();
    let mut budget = request.budget;

    if request.origin != name {
        let mut results = state.shared.search_results(&request.keywords);
        results.extend(state.downloads.search_results(&request.keywords));

        if !results.is_empty() {
            info!(
                origin = %request.origin,
                keywords = ?request.keywords,
                matches = results.len(),
                "Answering search request"
            );
            let reply = SearchReply {
                origin: name.clone(),
                destination: request.origin.clone(),
                hop_limit: DEFAULT_HOP_LIMIT,
                results,
            };
            state
                .send_via_next_hop(&request.origin, GossipPacket::SearchReply(reply))
                .await;
        }

        budget = budget.saturating_sub(1);
        if budget == 0 {
            debug!(keywords = ?request.keywords, "Search budget exhausted");
            return;
        }
    }

    let peers = state.peers.all();
    if peers.is_empty() {
        return;
    }
    let share = budget / peers.len() as u64;
    let mut remainder = budget % peers.len() as u64;
    for peer in peers {
        let mut peer_budget = share;
        if remainder > 0 {
            peer_budget += 1;
            remainder -= 1;
        }
        if peer_budget == 0 {
            continue;
        }
        state
            .send_to(
                peer,
                GossipPacket::SearchRequest(SearchRequest {
                    origin: request.origin.clone(),
                    budget: peer_budget,
                    keywords: request.keywords.clone(),
                }),
            )
            .await;
    }
}

/// Search reply: route to the singleton search task if alive.
async fn process_search_reply(state: &Arc<NodeState>, mut reply: SearchReply) {
    if reply.destination != state.name() {
        if reply.hop_limit == 0 {
            warn!(destination = %reply.destination, "Search reply hop limit exhausted, dropped");
            return;
        }
        reply.hop_limit -= 1;
        let destination = reply.destination.clone();
        state
            .send_via_next_hop(&destination, GossipPacket::SearchReply(reply))
            .await;
        return;
    }

    let channel = {
        let search = state.search.lock();
        search
            .as_ref()
            .filter(|s| s.is_alive())
            .map(|s| s.reply_sender())
    };
    match channel {
        Some(tx) => {
            if tx.send(reply).await.is_err() {
                debug!("Search task already gone, reply dropped");
            }
        }
        None => warn!("No live search, reply dropped"),
    }
}

/// Transaction gossip: submit to the blockchain, re-broadcast if new.
async fn process_tx_publish(state: &Arc<NodeState>, tx: TxPublish) {
    if !state.chain.add_transaction(&tx) {
        return;
    }
    if tx.hop_limit == 0 {
        debug!(name = %tx.file.name, "Tx accepted, hop limit spent");
        return;
    }
    state
        .send_all(GossipPacket::TxPublish(TxPublish {
            file: tx.file,
            hop_limit: tx.hop_limit - 1,
        }))
        .await;
}

/// Block gossip: submit to the blockchain, re-broadcast if new.
async fn process_block_publish(state: &Arc<NodeState>, publish: BlockPublish) {
    if !state.chain.add_block(&publish.block) {
        return;
    }
    if publish.hop_limit == 0 {
        debug!("Block accepted, hop limit spent");
        return;
    }
    state
        .send_all(GossipPacket::BlockPublish(BlockPublish {
            block: publish.block,
            hop_limit: publish.hop_limit - 1,
        }))
        .await;
}

/// Share a file, then claim its name on the blockchain and gossip the
/// claim.
async fn process_client_share(state: &Arc<NodeState>, path: &str) {
    let summary = match state.shared.share(std::path::Path::new(path)) {
        Ok(summary) => summary,
        Err(e) => {
            warn!(path = %path, error = %e, "Sharing failed");
            return;
        }
    };

    let tx = TxPublish {
        file: FileRecord {
            name: summary.name.clone(),
            size: summary.size as i64,
            metafile_hash: summary.meta_hash,
        },
        hop_limit: TX_HOP_LIMIT,
    };

    if !state.chain.add_transaction(&tx) {
        warn!(
            name = %summary.name,
            "File shared, but its name is already claimed on the blockchain"
        );
        return;
    }

    info!(name = %summary.name, "Gossiping filename claim");
    state.send_all(GossipPacket::TxPublish(tx)).await;
}

/// Install a download reply channel. Part of the dispatcher so the map and
/// the download store are updated together.
pub(crate) fn install_download_channel(
    state: &Arc<NodeState>,
    origin: &str,
    name: &str,
    hash: gossip_proto::Hash32,
) -> Option<mpsc::Receiver<DataReply>> {
    let mut channels = state.download_channels.lock();
    if !state.downloads.start(origin, name, hash) {
        warn!(origin = %origin, "Already downloading from this origin, request rejected");
        return None;
    }
    let (tx, rx) = mpsc::channel(16);
    channels.insert(origin.to_string(), tx);
    Some(rx)
}
