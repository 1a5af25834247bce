//! Per-origin download tasks.
//!
//! Each task owns one download: it requests the metafile, then chunks one
//! at a time, retransmitting the last request on timeout and abandoning
//! after too many consecutive timeouts. Verified data advances the record
//! in the download store; anything else re-requests the same hash.

use crate::dispatcher;
use crate::node::NodeState;
use gossip_files::ReplyOutcome;
use gossip_proto::{DataReply, DataRequest, GossipPacket, Hash32, DEFAULT_HOP_LIMIT};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

/// How long to wait for a data reply before retransmitting.
const DOWNLOAD_REPLY_TIMEOUT: Duration = Duration::from_secs(5);

/// Consecutive timeouts before a download is abandoned.
const DOWNLOAD_MAX_RETRIES: u32 = 5;

/// Register a download and spawn its task. Rejected when a download from
/// this origin is already running.
pub(crate) async fn start_download(
    state: &Arc<NodeState>,
    origin: String,
    name: String,
    hash: Hash32,
) {
    let Some(rx) = dispatcher::install_download_channel(state, &origin, &name, hash) else {
        return;
    };

    info!(origin = %origin, name = %name, metahash = %hex::encode(hash), "Download started");
    send_request(state, &origin, hash).await;

    tokio::spawn(run_download(Arc::clone(state), origin, hash, rx));
}

async fn send_request(state: &Arc<NodeState>, origin: &str, hash: Hash32) {
    let request = DataRequest {
        origin: state.name(),
        destination: origin.to_string(),
        hop_limit: DEFAULT_HOP_LIMIT,
        hash,
    };
    state
        .send_via_next_hop(origin, GossipPacket::DataRequest(request))
        .await;
}

async fn run_download(
    state: Arc<NodeState>,
    origin: String,
    meta_hash: Hash32,
    mut rx: mpsc::Receiver<DataReply>,
) {
    let mut last_requested = meta_hash;
    let mut retries_left = DOWNLOAD_MAX_RETRIES;

    loop {
        tokio::select! {
            reply = rx.recv() => {
                let Some(reply) = reply else {
                    return;
                };
                match state.downloads.process_reply(&origin, &reply) {
                    ReplyOutcome::Finished => {
                        info!(origin = %origin, "Download finished");
                        state.download_channels.lock().remove(&origin);
                        return;
                    }
                    ReplyOutcome::Progress => {
                        retries_left = DOWNLOAD_MAX_RETRIES;
                        match state.downloads.next_request_hash(&origin) {
                            Some(next) => {
                                last_requested = next;
                                send_request(&state, &origin, next).await;
                            }
                            None => {
                                // Progress with nothing missing should not
                                // happen; wait for further replies.
                                warn!(origin = %origin, "No chunk left to request");
                            }
                        }
                    }
                    ReplyOutcome::Rejected => {
                        debug!(origin = %origin, "Reply rejected, re-requesting same hash");
                        send_request(&state, &origin, last_requested).await;
                    }
                }
            }
            _ = tokio::time::sleep(DOWNLOAD_REPLY_TIMEOUT) => {
                retries_left -= 1;
                if retries_left == 0 {
                    warn!(origin = %origin, "Download retries exhausted, abandoning");
                    state.download_channels.lock().remove(&origin);
                    state.downloads.drop_download(&origin);
                    return;
                }
                debug!(
                    origin = %origin,
                    hash = %hex::encode(last_requested),
                    retries_left,
                    "Reply timeout, retransmitting"
                );
                send_request(&state, &origin, last_requested).await;
            }
        }
    }
}
