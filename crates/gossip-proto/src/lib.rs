//! # gossip-proto
//!
//! Wire protocol for the gossip mesh.
//!
//! This crate provides:
//! - The gossip and client packet types (tagged unions, one variant populated)
//! - A binary codec for UDP datagrams
//! - SHA-256 hashing for transactions, blocks and file chunks
//! - The proof-of-work validity rule

mod codec;
mod error;
mod hash;
mod packet;

pub use codec::{decode_client_packet, decode_packet, encode_client_packet, encode_packet};
pub use error::{ProtoError, ProtoResult};
pub use hash::{sha256, Hash32};
pub use packet::{
    Block, BlockPublish, ClientPacket, DataReply, DataRequest, FileRecord, GossipPacket,
    PrivateMessage, RumorMessage, SearchReply, SearchRequest, SearchResult, SimpleMessage,
    StatusEntry, StatusPacket, TxPublish,
};

/// Maximum size of a single encoded datagram.
pub const MAX_PACKET_SIZE: usize = 16 * 1024;

/// Hop limit for destination-addressed unicast (private, data, search reply).
pub const DEFAULT_HOP_LIMIT: u32 = 10;

/// Hop limit for transaction gossip.
pub const TX_HOP_LIMIT: u32 = 10;

/// Hop limit for block gossip.
pub const BLOCK_HOP_LIMIT: u32 = 20;

/// Number of leading zero bytes a block hash must have to be valid.
pub const POW_LEADING_ZERO_BYTES: usize = 2;
