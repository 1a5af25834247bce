//! # gossip-store
//!
//! In-memory stores shared by the node's tasks:
//! - [`MessageStore`]: per-origin rumor logs with a derived vector clock,
//!   plus the private messages addressed to this node
//! - [`RoutingTable`]: DSDV-style next-hop table learned from rumor origins

mod messages;
mod routing;

pub use messages::{MessageStore, StatusDiff};
pub use routing::RoutingTable;
