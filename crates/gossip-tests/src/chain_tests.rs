//! Blockchain gossip between nodes.

use crate::generators::{metahash_of, patterned_bytes, write_test_file};
use crate::harness::{link, wait_for, TestNode};
use gossip_proto::{
    encode_packet, Block, BlockPublish, ClientPacket, FileRecord, GossipPacket, TxPublish,
    BLOCK_HOP_LIMIT,
};
use std::time::Duration;
use tokio::net::UdpSocket;

const SCENARIO_TIMEOUT: Duration = Duration::from_secs(20);

/// Brute-force a valid nonce for a block claiming these transactions.
fn mine(prev_hash: [u8; 32], transactions: Vec<TxPublish>) -> Block {
    let mut block = Block {
        prev_hash,
        nonce: [0u8; 32],
        transactions,
    };
    let mut counter: u64 = 0;
    loop {
        block.nonce[..8].copy_from_slice(&counter.to_le_bytes());
        if block.pow_ok() {
            return block;
        }
        counter += 1;
    }
}

/// A mined block published into the mesh confirms the pending claim on
/// every node and is re-broadcast peer to peer.
#[tokio::test(flavor = "multi_thread")]
async fn test_block_publish_confirms_pending_claim_mesh_wide() {
    let d = TestNode::spawn("D").await;
    let e = TestNode::spawn("E").await;
    link(&d, &e);

    // D shares a file; the claim gossips to E's pending set.
    let contents = patterned_bytes(600, 5);
    let input_dir = tempfile::TempDir::new().unwrap();
    let path = write_test_file(input_dir.path(), "claimed.bin", &contents);
    d.client_send(ClientPacket::Share {
        path: path.display().to_string(),
    })
    .await;
    assert!(
        wait_for(SCENARIO_TIMEOUT, || {
            !e.state.chain().pending_snapshot().is_empty()
                && !d.state.chain().pending_snapshot().is_empty()
        })
        .await,
        "claim never became pending on both nodes"
    );

    // A third party mines the block holding the claim and publishes it to
    // E only; E must re-broadcast it to D.
    let tx = TxPublish {
        file: FileRecord {
            name: "claimed.bin".to_string(),
            size: contents.len() as i64,
            metafile_hash: metahash_of(&contents),
        },
        hop_limit: 10,
    };
    let block = mine([0u8; 32], vec![tx]);
    let publish = GossipPacket::BlockPublish(BlockPublish {
        block,
        hop_limit: BLOCK_HOP_LIMIT,
    });

    let miner_socket = UdpSocket::bind("127.0.0.1:0").await.unwrap();
    miner_socket
        .send_to(&encode_packet(&publish).unwrap(), e.peer_addr)
        .await
        .unwrap();

    let confirmed = wait_for(SCENARIO_TIMEOUT, || {
        d.state.chain().depth() == 1
            && e.state.chain().depth() == 1
            && d.state.chain().pending_snapshot().is_empty()
            && e.state.chain().pending_snapshot().is_empty()
    })
    .await;
    assert!(confirmed, "block never confirmed the claim on both nodes");

    // Re-claiming the confirmed name is now rejected everywhere.
    let rival = TxPublish {
        file: FileRecord {
            name: "claimed.bin".to_string(),
            size: 1,
            metafile_hash: [9u8; 32],
        },
        hop_limit: 10,
    };
    assert!(!d.state.chain().add_transaction(&rival));
    assert!(!e.state.chain().add_transaction(&rival));
}
