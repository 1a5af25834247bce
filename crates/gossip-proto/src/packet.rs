//! Gossip and client packet types.
//!
//! A `GossipPacket` is the unit exchanged between peers, a `ClientPacket` the
//! unit sent by a local client. Both are tagged unions: exactly one variant
//! is populated per datagram.

use crate::hash::Hash32;

/// Flood-mode message, relayed to every known peer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SimpleMessage {
    /// Name of the originating node.
    pub origin: String,
    /// Address of the latest relay in `ip:port` form.
    pub relay_addr: String,
    /// Message text.
    pub text: String,
}

/// Gossip-mode rumor. Ids per origin are contiguous starting at 1.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RumorMessage {
    /// Name of the originating node.
    pub origin: String,
    /// Id assigned by the origin.
    pub id: u32,
    /// Message text; empty for a route rumor.
    pub text: String,
}

impl RumorMessage {
    /// A route rumor carries no payload, it only advances clocks and routes.
    pub fn is_route_rumor(&self) -> bool {
        self.text.is_empty()
    }
}

/// One vector-clock entry: the next id still needed from an origin.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StatusEntry {
    /// Origin name.
    pub identifier: String,
    /// Next id this node still needs from the origin.
    pub next_id: u32,
}

/// Vector-clock exchange packet.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct StatusPacket {
    pub want: Vec<StatusEntry>,
}

impl StatusPacket {
    /// Look up the next id wanted for an origin; absent means 1.
    pub fn next_id_for(&self, origin: &str) -> u32 {
        self.want
            .iter()
            .find(|e| e.identifier == origin)
            .map(|e| e.next_id)
            .unwrap_or(1)
    }
}

/// Point-to-point message delivered along next-hop routes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PrivateMessage {
    pub origin: String,
    pub id: u32,
    pub text: String,
    pub destination: String,
    pub hop_limit: u32,
}

/// Request for the chunk or metafile stored under `hash`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DataRequest {
    pub origin: String,
    pub destination: String,
    pub hop_limit: u32,
    pub hash: Hash32,
}

/// Reply carrying the bytes stored under `hash`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DataReply {
    pub origin: String,
    pub destination: String,
    pub hop_limit: u32,
    pub hash: Hash32,
    pub data: Vec<u8>,
}

/// Budgeted keyword search flooded through the mesh.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SearchRequest {
    pub origin: String,
    pub budget: u64,
    pub keywords: Vec<String>,
}

/// One file a searched node holds chunks of.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SearchResult {
    pub file_name: String,
    pub metafile_hash: Hash32,
    /// 1-based indices of the chunks the replier holds.
    pub chunk_map: Vec<u64>,
    pub chunk_count: u64,
}

impl SearchResult {
    /// A full match asserts the replier holds every chunk.
    pub fn is_full_match(&self) -> bool {
        self.chunk_map.len() as u64 == self.chunk_count
    }
}

/// Reply to a search request, routed back to the searcher.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SearchReply {
    pub origin: String,
    pub destination: String,
    pub hop_limit: u32,
    pub results: Vec<SearchResult>,
}

/// A filename-to-metafile binding claimed on the blockchain.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileRecord {
    pub name: String,
    pub size: i64,
    pub metafile_hash: Hash32,
}

/// Transaction gossip: claim a filename across the mesh.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TxPublish {
    pub file: FileRecord,
    pub hop_limit: u32,
}

/// A mined block. Validity is proof-of-work over the block hash.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Block {
    pub prev_hash: Hash32,
    pub nonce: [u8; 32],
    pub transactions: Vec<TxPublish>,
}

/// Block gossip.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BlockPublish {
    pub block: Block,
    pub hop_limit: u32,
}

/// The peer-to-peer packet. Exactly one variant per datagram.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum GossipPacket {
    Simple(SimpleMessage),
    Rumor(RumorMessage),
    Status(StatusPacket),
    Private(PrivateMessage),
    DataRequest(DataRequest),
    DataReply(DataReply),
    SearchRequest(SearchRequest),
    SearchReply(SearchReply),
    TxPublish(TxPublish),
    BlockPublish(BlockPublish),
}

impl GossipPacket {
    /// Short name of the populated variant, for logging.
    pub fn kind(&self) -> &'static str {
        match self {
            GossipPacket::Simple(_) => "simple",
            GossipPacket::Rumor(_) => "rumor",
            GossipPacket::Status(_) => "status",
            GossipPacket::Private(_) => "private",
            GossipPacket::DataRequest(_) => "data-request",
            GossipPacket::DataReply(_) => "data-reply",
            GossipPacket::SearchRequest(_) => "search-request",
            GossipPacket::SearchReply(_) => "search-reply",
            GossipPacket::TxPublish(_) => "tx-publish",
            GossipPacket::BlockPublish(_) => "block-publish",
        }
    }
}

/// The local client packet.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ClientPacket {
    /// Publish a rumor (or a simple message in flood mode).
    Rumor { text: String },
    /// Publish an empty rumor so the mesh learns a route to this node.
    RouteRumor,
    /// Send a private message to a named destination.
    Private { text: String, destination: String },
    /// Share a file from the local filesystem.
    Share { path: String },
    /// Download a file by metahash. An empty destination resolves the
    /// origin from the current search's full matches.
    Download {
        name: String,
        destination: String,
        hash: Hash32,
    },
    /// Start a keyword search. Budget 0 means expanding-ring.
    Search { keywords: Vec<String>, budget: u64 },
}
