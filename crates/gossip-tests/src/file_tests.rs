//! File sharing, download and search scenarios.

use crate::generators::{metahash_of, patterned_bytes, write_test_file};
use crate::harness::{link, wait_for, TestNode};
use gossip_files::CHUNK_SIZE;
use gossip_proto::ClientPacket;
use std::time::Duration;

const SCENARIO_TIMEOUT: Duration = Duration::from_secs(20);

/// Announce both nodes to each other so routes exist in both directions.
async fn announce_routes(d: &TestNode, e: &TestNode) {
    d.client_send(ClientPacket::Rumor {
        text: "d here".to_string(),
    })
    .await;
    e.client_send(ClientPacket::Rumor {
        text: "e here".to_string(),
    })
    .await;

    assert!(
        wait_for(SCENARIO_TIMEOUT, || {
            d.state.routing().next_hop(&e.state.name()).is_some()
                && e.state.routing().next_hop(&d.state.name()).is_some()
        })
        .await,
        "routes never established"
    );
}

/// Scenario: D shares a 3-chunk file, E downloads it by metahash. The
/// reassembled bytes equal the original.
#[tokio::test(flavor = "multi_thread")]
async fn test_download_happy_path() {
    let d = TestNode::spawn("D").await;
    let e = TestNode::spawn("E").await;
    link(&d, &e);
    announce_routes(&d, &e).await;

    let contents = patterned_bytes(2 * CHUNK_SIZE + 512, 7);
    let input_dir = tempfile::TempDir::new().unwrap();
    let path = write_test_file(input_dir.path(), "payload.bin", &contents);
    let metahash = metahash_of(&contents);

    d.client_send(ClientPacket::Share {
        path: path.display().to_string(),
    })
    .await;

    // Sharing also gossips the filename claim; E's chain should see it.
    assert!(
        wait_for(SCENARIO_TIMEOUT, || {
            e.state
                .chain()
                .pending_snapshot()
                .iter()
                .any(|tx| tx.file.name == "payload.bin")
        })
        .await,
        "filename claim never reached E"
    );

    e.client_send(ClientPacket::Download {
        name: "copy.bin".to_string(),
        destination: "D".to_string(),
        hash: metahash,
    })
    .await;

    let downloaded = wait_for(SCENARIO_TIMEOUT, || {
        std::fs::read(e.downloads_path().join("copy.bin"))
            .map(|bytes| bytes == contents)
            .unwrap_or(false)
    })
    .await;
    assert!(downloaded, "download never completed with the original bytes");
}

/// Scenario: D shares `ubuntu.iso`, E's expanding-ring search for
/// "ubuntu" records a full match at D.
#[tokio::test(flavor = "multi_thread")]
async fn test_search_finds_full_match() {
    let d = TestNode::spawn("D").await;
    let e = TestNode::spawn("E").await;
    link(&d, &e);
    announce_routes(&d, &e).await;

    let contents = patterned_bytes(CHUNK_SIZE + 100, 3);
    let input_dir = tempfile::TempDir::new().unwrap();
    let path = write_test_file(input_dir.path(), "ubuntu.iso", &contents);
    let metahash = metahash_of(&contents);

    d.client_send(ClientPacket::Share {
        path: path.display().to_string(),
    })
    .await;
    // Wait until D actually serves the file before searching.
    assert!(
        wait_for(SCENARIO_TIMEOUT, || {
            d.state.shared().shared_names().contains(&"ubuntu.iso".to_string())
        })
        .await
    );

    e.client_send(ClientPacket::Search {
        keywords: vec!["ubuntu".to_string()],
        budget: 0,
    })
    .await;

    let matched = wait_for(SCENARIO_TIMEOUT, || {
        e.state.search_matches().iter().any(|m| {
            m.origin == "D" && m.file_name == "ubuntu.iso" && m.metafile_hash == metahash
        })
    })
    .await;
    assert!(matched, "search never produced the full match");
}

/// A second concurrent download from the same origin is rejected while the
/// first is in flight.
#[tokio::test(flavor = "multi_thread")]
async fn test_concurrent_download_from_same_origin_rejected() {
    let e = TestNode::spawn("E").await;

    // No route to anywhere; the first download just sits retrying, which
    // is enough to occupy the origin slot.
    assert!(e.state.downloads().start("D", "first.bin", [1u8; 32]));
    assert!(!e.state.downloads().start("D", "second.bin", [2u8; 32]));
}
