//! The expanding-ring search.
//!
//! At most one search runs at a time. The task dispatches the search
//! locally through the dispatcher's request path with origin = self,
//! waits a reply interval, and doubles the budget until either enough full
//! matches arrived or the maximum budget has been spent, plus one linger
//! interval for stragglers.

use crate::dispatcher;
use crate::node::NodeState;
use gossip_proto::{Hash32, SearchReply, SearchRequest};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::time::Instant;
use tracing::{debug, info, warn};

/// Budget of the first ring when none was given.
const SEARCH_START_BUDGET: u64 = 2;

/// Largest ring budget.
const SEARCH_MAX_BUDGET: u64 = 32;

/// Wait between rings for replies to trickle in.
const SEARCH_REPLY_TIMEOUT: Duration = Duration::from_secs(1);

/// Full matches that satisfy a search.
const SEARCH_FULL_MATCH_THRESHOLD: usize = 2;

/// A search result asserting the origin holds every chunk of the file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FullMatch {
    pub origin: String,
    pub file_name: String,
    pub metafile_hash: Hash32,
}

/// The singleton search state, shared between dispatcher and search task.
pub(crate) struct CurrentSearch {
    keywords: Vec<String>,
    full_matches: Vec<FullMatch>,
    alive: bool,
    reply_tx: mpsc::Sender<SearchReply>,
}

impl CurrentSearch {
    pub(crate) fn is_alive(&self) -> bool {
        self.alive
    }

    pub(crate) fn reply_sender(&self) -> mpsc::Sender<SearchReply> {
        self.reply_tx.clone()
    }

    pub(crate) fn full_matches(&self) -> Vec<FullMatch> {
        self.full_matches.clone()
    }
}

/// Start a search unless one is already running.
pub(crate) fn start_search(state: &Arc<NodeState>, keywords: Vec<String>, budget: u64) {
    let mut search = state.search.lock();
    if let Some(running) = search.as_ref().filter(|s| s.alive) {
        warn!(
            running = ?running.keywords,
            "A search is already in progress, request rejected"
        );
        return;
    }

    let (reply_tx, reply_rx) = mpsc::channel(64);
    *search = Some(CurrentSearch {
        keywords: keywords.clone(),
        full_matches: Vec::new(),
        alive: true,
        reply_tx,
    });
    drop(search);

    tokio::spawn(run_search(Arc::clone(state), keywords, budget, reply_rx));
}

/// Origin that produced a full match for this metahash, for downloads with
/// no explicit destination.
pub(crate) fn resolve_download_origin(state: &Arc<NodeState>, hash: &Hash32) -> Option<String> {
    let search = state.search.lock();
    search.as_ref().and_then(|s| {
        s.full_matches
            .iter()
            .find(|m| m.metafile_hash == *hash)
            .map(|m| m.origin.clone())
    })
}

async fn run_search(
    state: Arc<NodeState>,
    keywords: Vec<String>,
    explicit_budget: u64,
    mut reply_rx: mpsc::Receiver<SearchReply>,
) {
    // An explicit budget is used for a single ring; otherwise the ring
    // expands by doubling.
    let (mut budget, max_budget) = if explicit_budget == 0 {
        (SEARCH_START_BUDGET, SEARCH_MAX_BUDGET)
    } else {
        (explicit_budget, explicit_budget)
    };

    // First ring goes out immediately.
    let mut next_ring = Instant::now();
    let mut lingering = false;

    loop {
        tokio::select! {
            _ = tokio::time::sleep_until(next_ring) => {
                if lingering {
                    info!(keywords = ?keywords, "Search exhausted its budget, giving up");
                    shutdown(&state);
                    return;
                }
                if budget > max_budget {
                    debug!("Max budget reached, lingering for late replies");
                    lingering = true;
                    next_ring = Instant::now() + 2 * SEARCH_REPLY_TIMEOUT;
                    continue;
                }

                info!(keywords = ?keywords, budget, "Sending search ring");
                let request = SearchRequest {
                    origin: state.name(),
                    budget,
                    keywords: keywords.clone(),
                };
                dispatcher::process_search_request(&state, request).await;

                budget = budget.saturating_mul(2);
                next_ring = Instant::now() + SEARCH_REPLY_TIMEOUT;
            }
            reply = reply_rx.recv() => {
                let Some(reply) = reply else {
                    shutdown(&state);
                    return;
                };
                let total = record_reply(&state, reply);
                if total >= SEARCH_FULL_MATCH_THRESHOLD {
                    info!(keywords = ?keywords, matches = total, "Search finished");
                    shutdown(&state);
                    return;
                }
            }
        }
    }
}

/// Fold a reply into the match list. Full matches are deduplicated by
/// (origin, metahash); partial matches are reported but never counted.
fn record_reply(state: &Arc<NodeState>, reply: SearchReply) -> usize {
    let mut search = state.search.lock();
    let Some(current) = search.as_mut().filter(|s| s.alive) else {
        return 0;
    };

    for result in &reply.results {
        info!(
            file = %result.file_name,
            at = %reply.origin,
            metafile = %hex::encode(result.metafile_hash),
            chunks = ?result.chunk_map,
            "Search match"
        );

        if !result.is_full_match() {
            debug!(file = %result.file_name, "Partial match, not counted");
            continue;
        }

        let duplicate = current
            .full_matches
            .iter()
            .any(|m| m.origin == reply.origin && m.metafile_hash == result.metafile_hash);
        if !duplicate {
            current.full_matches.push(FullMatch {
                origin: reply.origin.clone(),
                file_name: result.file_name.clone(),
                metafile_hash: result.metafile_hash,
            });
        }
    }

    current.full_matches.len()
}

fn shutdown(state: &Arc<NodeState>) {
    if let Some(search) = state.search.lock().as_mut() {
        search.alive = false;
    }
}
