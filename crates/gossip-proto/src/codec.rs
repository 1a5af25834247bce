//! Binary codec for gossip and client packets.
//!
//! One datagram carries one packet:
//!
//! ```text
//! +--------+------------------------+
//! |  Tag   |        Fields          |
//! | 1 byte |  (variant-specific)    |
//! +--------+------------------------+
//! ```
//!
//! Strings are `u16` big-endian length + UTF-8 bytes, byte blobs are `u32`
//! big-endian length + bytes, hashes are fixed 32 bytes, list counts are
//! `u16` big-endian. Decoding is strict: unknown tags, truncated input and
//! oversized packets are rejected with a typed error.

use crate::error::{ProtoError, ProtoResult};
use crate::hash::Hash32;
use crate::packet::{
    Block, BlockPublish, ClientPacket, DataReply, DataRequest, FileRecord, GossipPacket,
    PrivateMessage, RumorMessage, SearchReply, SearchRequest, SearchResult, SimpleMessage,
    StatusEntry, StatusPacket, TxPublish,
};
use crate::MAX_PACKET_SIZE;
use bytes::{Buf, BufMut, Bytes, BytesMut};

// Gossip packet tags.
const TAG_SIMPLE: u8 = 1;
const TAG_RUMOR: u8 = 2;
const TAG_STATUS: u8 = 3;
const TAG_PRIVATE: u8 = 4;
const TAG_DATA_REQUEST: u8 = 5;
const TAG_DATA_REPLY: u8 = 6;
const TAG_SEARCH_REQUEST: u8 = 7;
const TAG_SEARCH_REPLY: u8 = 8;
const TAG_TX_PUBLISH: u8 = 9;
const TAG_BLOCK_PUBLISH: u8 = 10;

// Client packet tags.
const TAG_CLIENT_RUMOR: u8 = 1;
const TAG_CLIENT_ROUTE_RUMOR: u8 = 2;
const TAG_CLIENT_PRIVATE: u8 = 3;
const TAG_CLIENT_SHARE: u8 = 4;
const TAG_CLIENT_DOWNLOAD: u8 = 5;
const TAG_CLIENT_SEARCH: u8 = 6;

fn put_string(buf: &mut BytesMut, s: &str) {
    buf.put_u16(s.len() as u16);
    buf.put_slice(s.as_bytes());
}

fn put_blob(buf: &mut BytesMut, data: &[u8]) {
    buf.put_u32(data.len() as u32);
    buf.put_slice(data);
}

fn get_string(buf: &mut Bytes, field: &'static str) -> ProtoResult<String> {
    if buf.remaining() < 2 {
        return Err(ProtoError::Truncated(field));
    }
    let len = buf.get_u16() as usize;
    if buf.remaining() < len {
        return Err(ProtoError::Truncated(field));
    }
    let raw = buf.copy_to_bytes(len);
    String::from_utf8(raw.to_vec()).map_err(|_| ProtoError::InvalidUtf8(field))
}

fn get_blob(buf: &mut Bytes, field: &'static str) -> ProtoResult<Vec<u8>> {
    if buf.remaining() < 4 {
        return Err(ProtoError::Truncated(field));
    }
    let len = buf.get_u32() as usize;
    if buf.remaining() < len {
        return Err(ProtoError::Truncated(field));
    }
    Ok(buf.copy_to_bytes(len).to_vec())
}

fn get_hash(buf: &mut Bytes, field: &'static str) -> ProtoResult<Hash32> {
    if buf.remaining() < 32 {
        return Err(ProtoError::Truncated(field));
    }
    let mut out = [0u8; 32];
    buf.copy_to_slice(&mut out);
    Ok(out)
}

fn get_u16(buf: &mut Bytes, field: &'static str) -> ProtoResult<u16> {
    if buf.remaining() < 2 {
        return Err(ProtoError::Truncated(field));
    }
    Ok(buf.get_u16())
}

fn get_u32(buf: &mut Bytes, field: &'static str) -> ProtoResult<u32> {
    if buf.remaining() < 4 {
        return Err(ProtoError::Truncated(field));
    }
    Ok(buf.get_u32())
}

fn get_u64(buf: &mut Bytes, field: &'static str) -> ProtoResult<u64> {
    if buf.remaining() < 8 {
        return Err(ProtoError::Truncated(field));
    }
    Ok(buf.get_u64())
}

fn get_i64(buf: &mut Bytes, field: &'static str) -> ProtoResult<i64> {
    if buf.remaining() < 8 {
        return Err(ProtoError::Truncated(field));
    }
    Ok(buf.get_i64())
}

fn put_tx(buf: &mut BytesMut, tx: &TxPublish) {
    put_string(buf, &tx.file.name);
    buf.put_i64(tx.file.size);
    buf.put_slice(&tx.file.metafile_hash);
    buf.put_u32(tx.hop_limit);
}

fn get_tx(buf: &mut Bytes) -> ProtoResult<TxPublish> {
    let name = get_string(buf, "tx.name")?;
    let size = get_i64(buf, "tx.size")?;
    let metafile_hash = get_hash(buf, "tx.metafile_hash")?;
    let hop_limit = get_u32(buf, "tx.hop_limit")?;
    Ok(TxPublish {
        file: FileRecord {
            name,
            size,
            metafile_hash,
        },
        hop_limit,
    })
}

fn put_block(buf: &mut BytesMut, block: &Block) {
    buf.put_slice(&block.prev_hash);
    buf.put_slice(&block.nonce);
    buf.put_u16(block.transactions.len() as u16);
    for tx in &block.transactions {
        put_tx(buf, tx);
    }
}

fn get_block(buf: &mut Bytes) -> ProtoResult<Block> {
    let prev_hash = get_hash(buf, "block.prev_hash")?;
    let nonce = get_hash(buf, "block.nonce")?;
    let count = get_u16(buf, "block.tx_count")? as usize;
    let mut transactions = Vec::with_capacity(count);
    for _ in 0..count {
        transactions.push(get_tx(buf)?);
    }
    Ok(Block {
        prev_hash,
        nonce,
        transactions,
    })
}

/// Encode a gossip packet into datagram bytes.
pub fn encode_packet(packet: &GossipPacket) -> ProtoResult<Vec<u8>> {
    let mut buf = BytesMut::with_capacity(256);

    match packet {
        GossipPacket::Simple(m) => {
            buf.put_u8(TAG_SIMPLE);
            put_string(&mut buf, &m.origin);
            put_string(&mut buf, &m.relay_addr);
            put_string(&mut buf, &m.text);
        }
        GossipPacket::Rumor(m) => {
            buf.put_u8(TAG_RUMOR);
            put_string(&mut buf, &m.origin);
            buf.put_u32(m.id);
            put_string(&mut buf, &m.text);
        }
        GossipPacket::Status(m) => {
            buf.put_u8(TAG_STATUS);
            buf.put_u16(m.want.len() as u16);
            for entry in &m.want {
                put_string(&mut buf, &entry.identifier);
                buf.put_u32(entry.next_id);
            }
        }
        GossipPacket::Private(m) => {
            buf.put_u8(TAG_PRIVATE);
            put_string(&mut buf, &m.origin);
            buf.put_u32(m.id);
            put_string(&mut buf, &m.text);
            put_string(&mut buf, &m.destination);
            buf.put_u32(m.hop_limit);
        }
        GossipPacket::DataRequest(m) => {
            buf.put_u8(TAG_DATA_REQUEST);
            put_string(&mut buf, &m.origin);
            put_string(&mut buf, &m.destination);
            buf.put_u32(m.hop_limit);
            buf.put_slice(&m.hash);
        }
        GossipPacket::DataReply(m) => {
            buf.put_u8(TAG_DATA_REPLY);
            put_string(&mut buf, &m.origin);
            put_string(&mut buf, &m.destination);
            buf.put_u32(m.hop_limit);
            buf.put_slice(&m.hash);
            put_blob(&mut buf, &m.data);
        }
        GossipPacket::SearchRequest(m) => {
            buf.put_u8(TAG_SEARCH_REQUEST);
            put_string(&mut buf, &m.origin);
            buf.put_u64(m.budget);
            buf.put_u16(m.keywords.len() as u16);
            for kw in &m.keywords {
                put_string(&mut buf, kw);
            }
        }
        GossipPacket::SearchReply(m) => {
            buf.put_u8(TAG_SEARCH_REPLY);
            put_string(&mut buf, &m.origin);
            put_string(&mut buf, &m.destination);
            buf.put_u32(m.hop_limit);
            buf.put_u16(m.results.len() as u16);
            for result in &m.results {
                put_string(&mut buf, &result.file_name);
                buf.put_slice(&result.metafile_hash);
                buf.put_u16(result.chunk_map.len() as u16);
                for idx in &result.chunk_map {
                    buf.put_u64(*idx);
                }
                buf.put_u64(result.chunk_count);
            }
        }
        GossipPacket::TxPublish(m) => {
            buf.put_u8(TAG_TX_PUBLISH);
            put_tx(&mut buf, m);
        }
        GossipPacket::BlockPublish(m) => {
            buf.put_u8(TAG_BLOCK_PUBLISH);
            put_block(&mut buf, &m.block);
            buf.put_u32(m.hop_limit);
        }
    }

    if buf.len() > MAX_PACKET_SIZE {
        return Err(ProtoError::PacketTooLarge {
            size: buf.len(),
            max: MAX_PACKET_SIZE,
        });
    }

    Ok(buf.to_vec())
}

/// Decode a gossip packet from datagram bytes.
pub fn decode_packet(data: &[u8]) -> ProtoResult<GossipPacket> {
    if data.len() > MAX_PACKET_SIZE {
        return Err(ProtoError::PacketTooLarge {
            size: data.len(),
            max: MAX_PACKET_SIZE,
        });
    }

    let mut buf = Bytes::copy_from_slice(data);
    if buf.remaining() < 1 {
        return Err(ProtoError::Truncated("tag"));
    }
    let tag = buf.get_u8();

    match tag {
        TAG_SIMPLE => Ok(GossipPacket::Simple(SimpleMessage {
            origin: get_string(&mut buf, "simple.origin")?,
            relay_addr: get_string(&mut buf, "simple.relay_addr")?,
            text: get_string(&mut buf, "simple.text")?,
        })),
        TAG_RUMOR => Ok(GossipPacket::Rumor(RumorMessage {
            origin: get_string(&mut buf, "rumor.origin")?,
            id: get_u32(&mut buf, "rumor.id")?,
            text: get_string(&mut buf, "rumor.text")?,
        })),
        TAG_STATUS => {
            let count = get_u16(&mut buf, "status.count")? as usize;
            let mut want = Vec::with_capacity(count);
            for _ in 0..count {
                want.push(StatusEntry {
                    identifier: get_string(&mut buf, "status.identifier")?,
                    next_id: get_u32(&mut buf, "status.next_id")?,
                });
            }
            Ok(GossipPacket::Status(StatusPacket { want }))
        }
        TAG_PRIVATE => Ok(GossipPacket::Private(PrivateMessage {
            origin: get_string(&mut buf, "private.origin")?,
            id: get_u32(&mut buf, "private.id")?,
            text: get_string(&mut buf, "private.text")?,
            destination: get_string(&mut buf, "private.destination")?,
            hop_limit: get_u32(&mut buf, "private.hop_limit")?,
        })),
        TAG_DATA_REQUEST => Ok(GossipPacket::DataRequest(DataRequest {
            origin: get_string(&mut buf, "data_request.origin")?,
            destination: get_string(&mut buf, "data_request.destination")?,
            hop_limit: get_u32(&mut buf, "data_request.hop_limit")?,
            hash: get_hash(&mut buf, "data_request.hash")?,
        })),
        TAG_DATA_REPLY => Ok(GossipPacket::DataReply(DataReply {
            origin: get_string(&mut buf, "data_reply.origin")?,
            destination: get_string(&mut buf, "data_reply.destination")?,
            hop_limit: get_u32(&mut buf, "data_reply.hop_limit")?,
            hash: get_hash(&mut buf, "data_reply.hash")?,
            data: get_blob(&mut buf, "data_reply.data")?,
        })),
        TAG_SEARCH_REQUEST => {
            let origin = get_string(&mut buf, "search_request.origin")?;
            let budget = get_u64(&mut buf, "search_request.budget")?;
            let count = get_u16(&mut buf, "search_request.keyword_count")? as usize;
            let mut keywords = Vec::with_capacity(count);
            for _ in 0..count {
                keywords.push(get_string(&mut buf, "search_request.keyword")?);
            }
            Ok(GossipPacket::SearchRequest(SearchRequest {
                origin,
                budget,
                keywords,
            }))
        }
        TAG_SEARCH_REPLY => {
            let origin = get_string(&mut buf, "search_reply.origin")?;
            let destination = get_string(&mut buf, "search_reply.destination")?;
            let hop_limit = get_u32(&mut buf, "search_reply.hop_limit")?;
            let count = get_u16(&mut buf, "search_reply.result_count")? as usize;
            let mut results = Vec::with_capacity(count);
            for _ in 0..count {
                let file_name = get_string(&mut buf, "search_reply.file_name")?;
                let metafile_hash = get_hash(&mut buf, "search_reply.metafile_hash")?;
                let map_len = get_u16(&mut buf, "search_reply.chunk_map_len")? as usize;
                let mut chunk_map = Vec::with_capacity(map_len);
                for _ in 0..map_len {
                    chunk_map.push(get_u64(&mut buf, "search_reply.chunk_map")?);
                }
                let chunk_count = get_u64(&mut buf, "search_reply.chunk_count")?;
                results.push(SearchResult {
                    file_name,
                    metafile_hash,
                    chunk_map,
                    chunk_count,
                });
            }
            Ok(GossipPacket::SearchReply(SearchReply {
                origin,
                destination,
                hop_limit,
                results,
            }))
        }
        TAG_TX_PUBLISH => Ok(GossipPacket::TxPublish(get_tx(&mut buf)?)),
        TAG_BLOCK_PUBLISH => {
            let block = get_block(&mut buf)?;
            let hop_limit = get_u32(&mut buf, "block_publish.hop_limit")?;
            Ok(GossipPacket::BlockPublish(BlockPublish { block, hop_limit }))
        }
        other => Err(ProtoError::UnknownDiscriminant(other)),
    }
}

/// Encode a client packet into datagram bytes.
pub fn encode_client_packet(packet: &ClientPacket) -> ProtoResult<Vec<u8>> {
    let mut buf = BytesMut::with_capacity(128);

    match packet {
        ClientPacket::Rumor { text } => {
            buf.put_u8(TAG_CLIENT_RUMOR);
            put_string(&mut buf, text);
        }
        ClientPacket::RouteRumor => {
            buf.put_u8(TAG_CLIENT_ROUTE_RUMOR);
        }
        ClientPacket::Private { text, destination } => {
            buf.put_u8(TAG_CLIENT_PRIVATE);
            put_string(&mut buf, text);
            put_string(&mut buf, destination);
        }
        ClientPacket::Share { path } => {
            buf.put_u8(TAG_CLIENT_SHARE);
            put_string(&mut buf, path);
        }
        ClientPacket::Download {
            name,
            destination,
            hash,
        } => {
            buf.put_u8(TAG_CLIENT_DOWNLOAD);
            put_string(&mut buf, name);
            put_string(&mut buf, destination);
            buf.put_slice(hash);
        }
        ClientPacket::Search { keywords, budget } => {
            buf.put_u8(TAG_CLIENT_SEARCH);
            buf.put_u64(*budget);
            buf.put_u16(keywords.len() as u16);
            for kw in keywords {
                put_string(&mut buf, kw);
            }
        }
    }

    if buf.len() > MAX_PACKET_SIZE {
        return Err(ProtoError::PacketTooLarge {
            size: buf.len(),
            max: MAX_PACKET_SIZE,
        });
    }

    Ok(buf.to_vec())
}

/// Decode a client packet from datagram bytes.
pub fn decode_client_packet(data: &[u8]) -> ProtoResult<ClientPacket> {
    let mut buf = Bytes::copy_from_slice(data);
    if buf.remaining() < 1 {
        return Err(ProtoError::Truncated("tag"));
    }
    let tag = buf.get_u8();

    match tag {
        TAG_CLIENT_RUMOR => Ok(ClientPacket::Rumor {
            text: get_string(&mut buf, "client.text")?,
        }),
        TAG_CLIENT_ROUTE_RUMOR => Ok(ClientPacket::RouteRumor),
        TAG_CLIENT_PRIVATE => Ok(ClientPacket::Private {
            text: get_string(&mut buf, "client.text")?,
            destination: get_string(&mut buf, "client.destination")?,
        }),
        TAG_CLIENT_SHARE => Ok(ClientPacket::Share {
            path: get_string(&mut buf, "client.path")?,
        }),
        TAG_CLIENT_DOWNLOAD => Ok(ClientPacket::Download {
            name: get_string(&mut buf, "client.name")?,
            destination: get_string(&mut buf, "client.destination")?,
            hash: get_hash(&mut buf, "client.hash")?,
        }),
        TAG_CLIENT_SEARCH => {
            let budget = get_u64(&mut buf, "client.budget")?;
            let count = get_u16(&mut buf, "client.keyword_count")? as usize;
            let mut keywords = Vec::with_capacity(count);
            for _ in 0..count {
                keywords.push(get_string(&mut buf, "client.keyword")?);
            }
            Ok(ClientPacket::Search { keywords, budget })
        }
        other => Err(ProtoError::UnknownDiscriminant(other)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_rumor_roundtrip() {
        let packet = GossipPacket::Rumor(RumorMessage {
            origin: "alice".to_string(),
            id: 3,
            text: "hello mesh".to_string(),
        });

        let bytes = encode_packet(&packet).unwrap();
        let decoded = decode_packet(&bytes).unwrap();
        assert_eq!(decoded, packet);
    }

    #[test]
    fn test_status_and_route_rumor_roundtrip() {
        let packet = GossipPacket::Status(StatusPacket {
            want: vec![
                StatusEntry {
                    identifier: "alice".to_string(),
                    next_id: 4,
                },
                StatusEntry {
                    identifier: "bob".to_string(),
                    next_id: 1,
                },
            ],
        });
        let decoded = decode_packet(&encode_packet(&packet).unwrap()).unwrap();
        assert_eq!(decoded, packet);

        // Empty text survives the trip; it is what marks a route rumor.
        let route = GossipPacket::Rumor(RumorMessage {
            origin: "carol".to_string(),
            id: 1,
            text: String::new(),
        });
        match decode_packet(&encode_packet(&route).unwrap()).unwrap() {
            GossipPacket::Rumor(r) => assert!(r.is_route_rumor()),
            other => panic!("wrong variant: {:?}", other),
        }
    }

    #[test]
    fn test_data_reply_roundtrip() {
        let packet = GossipPacket::DataReply(DataReply {
            origin: "d".to_string(),
            destination: "e".to_string(),
            hop_limit: 9,
            hash: [0xAB; 32],
            data: vec![1, 2, 3, 4, 5],
        });
        let decoded = decode_packet(&encode_packet(&packet).unwrap()).unwrap();
        assert_eq!(decoded, packet);
    }

    #[test]
    fn test_search_reply_roundtrip() {
        let packet = GossipPacket::SearchReply(SearchReply {
            origin: "d".to_string(),
            destination: "e".to_string(),
            hop_limit: 10,
            results: vec![SearchResult {
                file_name: "ubuntu.iso".to_string(),
                metafile_hash: [0x11; 32],
                chunk_map: vec![1, 2, 3],
                chunk_count: 3,
            }],
        });
        let decoded = decode_packet(&encode_packet(&packet).unwrap()).unwrap();
        assert_eq!(decoded, packet);
    }

    #[test]
    fn test_block_publish_roundtrip() {
        let packet = GossipPacket::BlockPublish(BlockPublish {
            block: Block {
                prev_hash: [0u8; 32],
                nonce: [5u8; 32],
                transactions: vec![TxPublish {
                    file: FileRecord {
                        name: "claim.txt".to_string(),
                        size: 4096,
                        metafile_hash: [9u8; 32],
                    },
                    hop_limit: 10,
                }],
            },
            hop_limit: 20,
        });
        let decoded = decode_packet(&encode_packet(&packet).unwrap()).unwrap();
        assert_eq!(decoded, packet);
    }

    #[test]
    fn test_client_packet_roundtrip() {
        let packets = vec![
            ClientPacket::Rumor {
                text: "hi".to_string(),
            },
            ClientPacket::RouteRumor,
            ClientPacket::Download {
                name: "f".to_string(),
                destination: String::new(),
                hash: [3u8; 32],
            },
            ClientPacket::Search {
                keywords: vec!["ubuntu".to_string(), "iso".to_string()],
                budget: 0,
            },
        ];
        for packet in packets {
            let decoded = decode_client_packet(&encode_client_packet(&packet).unwrap()).unwrap();
            assert_eq!(decoded, packet);
        }
    }

    #[test]
    fn test_truncated_and_unknown_inputs_rejected() {
        assert!(matches!(
            decode_packet(&[]),
            Err(ProtoError::Truncated(_))
        ));
        assert!(matches!(
            decode_packet(&[0xEE]),
            Err(ProtoError::UnknownDiscriminant(0xEE))
        ));

        // Cut a valid rumor short at every prefix; none may panic.
        let bytes = encode_packet(&GossipPacket::Rumor(RumorMessage {
            origin: "alice".to_string(),
            id: 1,
            text: "x".to_string(),
        }))
        .unwrap();
        for cut in 1..bytes.len() {
            assert!(decode_packet(&bytes[..cut]).is_err());
        }
    }
}
