//! Test harness for integration tests.
//!
//! Spawns real nodes on ephemeral localhost ports and drives them through
//! their client endpoints, exactly as an operator would.

use gossip_node::{Node, NodeConfig, NodeState};
use gossip_proto::{encode_client_packet, ClientPacket};
use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tempfile::TempDir;
use tokio::net::UdpSocket;

/// A running node plus the handles a test needs to poke at it.
pub struct TestNode {
    /// Shared state handle, the same one the node's tasks use.
    pub state: Arc<NodeState>,
    /// The node's peer endpoint.
    pub peer_addr: SocketAddr,
    /// The node's client endpoint.
    pub client_addr: SocketAddr,
    client_socket: UdpSocket,
    downloads_dir: TempDir,
    _shared_dir: TempDir,
}

impl TestNode {
    /// Spawn a node with no seed peers and mining off. Topology is wired
    /// afterwards with [`link`].
    pub async fn spawn(name: &str) -> Self {
        let shared_dir = TempDir::new().expect("temp shared dir");
        let downloads_dir = TempDir::new().expect("temp downloads dir");

        let config = NodeConfig {
            name: name.to_string(),
            client_bind: "127.0.0.1:0".to_string(),
            peer_bind: "127.0.0.1:0".to_string(),
            peers: Vec::new(),
            simple: false,
            shared_dir: shared_dir.path().to_path_buf(),
            downloads_dir: downloads_dir.path().to_path_buf(),
            route_rumor_secs: 0,
            mining: false,
        };

        Self::spawn_with(config, shared_dir, downloads_dir).await
    }

    /// Spawn a node from an explicit configuration. Bind addresses are
    /// overridden to ephemeral ports.
    pub async fn spawn_with(
        mut config: NodeConfig,
        shared_dir: TempDir,
        downloads_dir: TempDir,
    ) -> Self {
        config.client_bind = "127.0.0.1:0".to_string();
        config.peer_bind = "127.0.0.1:0".to_string();
        config.shared_dir = shared_dir.path().to_path_buf();
        config.downloads_dir = downloads_dir.path().to_path_buf();

        let node = Node::new(config).await.expect("node binds");
        let state = node.state();
        let peer_addr = state.peer_addr();
        let client_addr = state.client_addr();
        tokio::spawn(node.run());

        let client_socket = UdpSocket::bind("127.0.0.1:0").await.expect("client socket");

        Self {
            state,
            peer_addr,
            client_addr,
            client_socket,
            downloads_dir,
            _shared_dir: shared_dir,
        }
    }

    /// Send one client packet to the node's client endpoint.
    pub async fn client_send(&self, packet: ClientPacket) {
        let bytes = encode_client_packet(&packet).expect("client packet encodes");
        self.client_socket
            .send_to(&bytes, self.client_addr)
            .await
            .expect("client datagram sent");
    }

    /// Where this node assembles downloads.
    pub fn downloads_path(&self) -> PathBuf {
        self.downloads_dir.path().to_path_buf()
    }
}

/// Make two nodes mutual peers.
pub fn link(a: &TestNode, b: &TestNode) {
    a.state.peers().add(b.peer_addr);
    b.state.peers().add(a.peer_addr);
}

/// Poll a predicate until it holds or the timeout passes.
pub async fn wait_for(timeout: Duration, mut predicate: impl FnMut() -> bool) -> bool {
    let deadline = tokio::time::Instant::now() + timeout;
    loop {
        if predicate() {
            return true;
        }
        if tokio::time::Instant::now() >= deadline {
            return false;
        }
        tokio::time::sleep(Duration::from_millis(50)).await;
    }
}
