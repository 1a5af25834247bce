//! Node assembly: sockets, shared state and long-running tasks.

use crate::config::NodeConfig;
use crate::dispatcher;
use crate::peers::PeerSet;
use crate::search::{CurrentSearch, FullMatch};
use anyhow::{Context, Result};
use dashmap::DashMap;
use gossip_chain::{Blockchain, Miner};
use gossip_files::{DownloadStore, SharedFileStore};
use gossip_proto::{
    decode_client_packet, decode_packet, encode_packet, Block, BlockPublish, ClientPacket,
    DataReply, GossipPacket, StatusPacket, BLOCK_HOP_LIMIT, MAX_PACKET_SIZE,
};
use gossip_store::{MessageStore, RoutingTable};
use parking_lot::{Mutex, RwLock};
use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::UdpSocket;
use tokio::sync::{mpsc, oneshot};
use tracing::{debug, info, warn};

/// Period of the anti-entropy status exchange.
pub(crate) const ANTI_ENTROPY_TIMEOUT: Duration = Duration::from_secs(10);

/// All state shared between the dispatcher and the protocol tasks.
///
/// Everything here is a field of the node value; tasks receive explicit
/// `Arc` references.
pub struct NodeState {
    name: RwLock<String>,
    simple_mode: bool,
    peer_addr: SocketAddr,
    client_addr: SocketAddr,
    pub(crate) peers: PeerSet,
    pub(crate) routing: RoutingTable,
    pub(crate) store: MessageStore,
    pub(crate) shared: SharedFileStore,
    pub(crate) downloads: DownloadStore,
    pub(crate) chain: Arc<Blockchain>,
    /// Peer -> pending mongering session waiting for a status.
    pub(crate) monger_sessions: Mutex<HashMap<SocketAddr, oneshot::Sender<StatusPacket>>>,
    /// Origin -> reply channel of the download task.
    pub(crate) download_channels: Mutex<HashMap<String, mpsc::Sender<DataReply>>>,
    /// The singleton search, if one was ever started.
    pub(crate) search: Mutex<Option<CurrentSearch>>,
    /// Recently answered search requests, suppressed for a short window.
    pub(crate) recent_searches: DashMap<String, ()>,
    egress: mpsc::Sender<(SocketAddr, GossipPacket)>,
}

impl NodeState {
    /// The node's current name. It may be renamed at runtime, so every
    /// packet construction reads it fresh.
    pub fn name(&self) -> String {
        self.name.read().clone()
    }

    /// Rename the node.
    pub fn set_name(&self, name: String) {
        *self.name.write() = name;
    }

    /// Whether the node floods simple messages instead of gossiping.
    pub fn simple_mode(&self) -> bool {
        self.simple_mode
    }

    /// Bound peer endpoint.
    pub fn peer_addr(&self) -> SocketAddr {
        self.peer_addr
    }

    /// Bound client endpoint.
    pub fn client_addr(&self) -> SocketAddr {
        self.client_addr
    }

    pub fn peers(&self) -> &PeerSet {
        &self.peers
    }

    pub fn routing(&self) -> &RoutingTable {
        &self.routing
    }

    pub fn store(&self) -> &MessageStore {
        &self.store
    }

    pub fn shared(&self) -> &SharedFileStore {
        &self.shared
    }

    pub fn downloads(&self) -> &DownloadStore {
        &self.downloads
    }

    pub fn chain(&self) -> &Arc<Blockchain> {
        &self.chain
    }

    /// Full matches collected by the current (or last) search.
    pub fn search_matches(&self) -> Vec<FullMatch> {
        self.search
            .lock()
            .as_ref()
            .map(|s| s.full_matches())
            .unwrap_or_default()
    }

    /// Is a search currently running?
    pub fn search_alive(&self) -> bool {
        self.search.lock().as_ref().is_some_and(|s| s.is_alive())
    }

    /// Enqueue one packet toward one peer.
    pub(crate) async fn send_to(&self, peer: SocketAddr, packet: GossipPacket) {
        if self.egress.send((peer, packet)).await.is_err() {
            warn!("Egress queue closed, dropping packet");
        }
    }

    /// Enqueue a packet to every known peer, optionally excluding one.
    pub(crate) async fn send_all_except(
        &self,
        packet: GossipPacket,
        except: Option<SocketAddr>,
    ) {
        for peer in self.peers.all() {
            if Some(peer) == except {
                continue;
            }
            self.send_to(peer, packet.clone()).await;
        }
    }

    /// Enqueue a packet to every known peer.
    pub(crate) async fn send_all(&self, packet: GossipPacket) {
        self.send_all_except(packet, None).await;
    }

    /// Forward a destination-addressed packet along the next-hop route.
    /// Dropped with a warning when no route is known.
    pub(crate) async fn send_via_next_hop(&self, destination: &str, packet: GossipPacket) {
        match self.routing.next_hop(destination) {
            Some(peer) => self.send_to(peer, packet).await,
            None => warn!(
                destination = %destination,
                kind = packet.kind(),
                "No next hop known, dropping packet"
            ),
        }
    }
}

/// The gossip node. `new` binds the sockets, `run` spawns the tasks and
/// drives the dispatcher until shutdown.
pub struct Node {
    state: Arc<NodeState>,
    config: NodeConfig,
    client_socket: Arc<UdpSocket>,
    peer_socket: Arc<UdpSocket>,
    egress_rx: mpsc::Receiver<(SocketAddr, GossipPacket)>,
}

impl Node {
    /// Bind both UDP endpoints and assemble the shared state.
    pub async fn new(config: NodeConfig) -> Result<Self> {
        let client_socket = UdpSocket::bind(&config.client_bind)
            .await
            .with_context(|| format!("Failed to bind client endpoint {}", config.client_bind))?;
        let peer_socket = UdpSocket::bind(&config.peer_bind)
            .await
            .with_context(|| format!("Failed to bind peer endpoint {}", config.peer_bind))?;

        let client_addr = client_socket.local_addr()?;
        let peer_addr = peer_socket.local_addr()?;

        let mut seeds = Vec::new();
        for peer in &config.peers {
            match peer.parse::<SocketAddr>() {
                Ok(addr) => seeds.push(addr),
                Err(e) => warn!(peer = %peer, error = %e, "Ignoring unparseable seed peer"),
            }
        }

        let (egress_tx, egress_rx) = mpsc::channel(1024);

        let state = Arc::new(NodeState {
            name: RwLock::new(config.name.clone()),
            simple_mode: config.simple,
            peer_addr,
            client_addr,
            peers: PeerSet::new(seeds),
            routing: RoutingTable::new(),
            store: MessageStore::new(),
            shared: SharedFileStore::new(&config.shared_dir),
            downloads: DownloadStore::new(&config.downloads_dir),
            chain: Arc::new(Blockchain::new()),
            monger_sessions: Mutex::new(HashMap::new()),
            download_channels: Mutex::new(HashMap::new()),
            search: Mutex::new(None),
            recent_searches: DashMap::new(),
            egress: egress_tx,
        });

        info!(
            name = %config.name,
            client = %client_addr,
            peer = %peer_addr,
            peers = state.peers.len(),
            simple = config.simple,
            "Node initialized"
        );

        Ok(Self {
            state,
            config,
            client_socket: Arc::new(client_socket),
            peer_socket: Arc::new(peer_socket),
            egress_rx,
        })
    }

    /// Handle to the shared state, for the operator surface and tests.
    pub fn state(&self) -> Arc<NodeState> {
        Arc::clone(&self.state)
    }

    /// Spawn every task and run the dispatcher until the ingress channels
    /// close.
    pub async fn run(self) -> Result<()> {
        let Node {
            state,
            config,
            client_socket,
            peer_socket,
            mut egress_rx,
        } = self;

        let (client_tx, mut client_rx) = mpsc::channel::<ClientPacket>(1024);
        let (peer_tx, mut peer_rx) = mpsc::channel::<(GossipPacket, SocketAddr)>(1024);

        // Client-ingress reader.
        tokio::spawn({
            let socket = Arc::clone(&client_socket);
            async move {
                let mut buf = vec![0u8; MAX_PACKET_SIZE];
                loop {
                    match socket.recv_from(&mut buf).await {
                        Ok((len, _)) => match decode_client_packet(&buf[..len]) {
                            Ok(packet) => {
                                if client_tx.send(packet).await.is_err() {
                                    break;
                                }
                            }
                            Err(e) => warn!(error = %e, "Undecodable client packet"),
                        },
                        Err(e) => warn!(error = %e, "Client socket receive error"),
                    }
                }
            }
        });

        // Peer-ingress reader.
        tokio::spawn({
            let socket = Arc::clone(&peer_socket);
            async move {
                let mut buf = vec![0u8; MAX_PACKET_SIZE];
                loop {
                    match socket.recv_from(&mut buf).await {
                        Ok((len, src)) => match decode_packet(&buf[..len]) {
                            Ok(packet) => {
                                if peer_tx.send((packet, src)).await.is_err() {
                                    break;
                                }
                            }
                            Err(e) => warn!(from = %src, error = %e, "Undecodable peer packet"),
                        },
                        Err(e) => warn!(error = %e, "Peer socket receive error"),
                    }
                }
            }
        });

        // Peer-egress writer: the single ordered stream of datagrams out.
        // Send errors are logged and swallowed; the protocols handle loss.
        tokio::spawn({
            let socket = Arc::clone(&peer_socket);
            async move {
                while let Some((peer, packet)) = egress_rx.recv().await {
                    match encode_packet(&packet) {
                        Ok(bytes) => {
                            debug!(to = %peer, kind = packet.kind(), "Sending packet");
                            if let Err(e) = socket.send_to(&bytes, peer).await {
                                warn!(to = %peer, error = %e, "Datagram send failed");
                            }
                        }
                        Err(e) => warn!(kind = packet.kind(), error = %e, "Encode failed"),
                    }
                }
            }
        });

        // Anti-entropy timer.
        tokio::spawn({
            let state = Arc::clone(&state);
            async move {
                loop {
                    tokio::time::sleep(ANTI_ENTROPY_TIMEOUT).await;
                    if state.peers.is_empty() {
                        tokio::time::sleep(ANTI_ENTROPY_TIMEOUT * 5).await;
                        continue;
                    }
                    if let Some(peer) = state.peers.random(None) {
                        debug!(peer = %peer, "Anti-entropy status");
                        state
                            .send_to(peer, GossipPacket::Status(state.store.status()))
                            .await;
                    }
                }
            }
        });

        // Route-rumor timer: one immediately, then periodically.
        if config.route_rumor_secs > 0 && !config.simple {
            let state = Arc::clone(&state);
            let period = Duration::from_secs(config.route_rumor_secs);
            tokio::spawn(async move {
                loop {
                    dispatcher::handle_client(&state, ClientPacket::RouteRumor).await;
                    tokio::time::sleep(period).await;
                }
            });
        }

        // Miner plus the forwarder publishing its blocks to the mesh.
        let _miner = if config.mining {
            let (block_tx, mut block_rx) = mpsc::channel::<Block>(16);
            let miner = Miner::spawn(Arc::clone(&state.chain), block_tx);
            tokio::spawn({
                let state = Arc::clone(&state);
                async move {
                    while let Some(block) = block_rx.recv().await {
                        info!("Publishing mined block to all peers");
                        state
                            .send_all(GossipPacket::BlockPublish(BlockPublish {
                                block,
                                hop_limit: BLOCK_HOP_LIMIT,
                            }))
                            .await;
                    }
                }
            });
            Some(miner)
        } else {
            None
        };

        info!("Node running");

        // The dispatcher: single consumer of both ingress queues.
        loop {
            tokio::select! {
                client = client_rx.recv() => match client {
                    Some(packet) => dispatcher::handle_client(&state, packet).await,
                    None => break,
                },
                peer = peer_rx.recv() => match peer {
                    Some((packet, src)) => dispatcher::handle_peer(&state, packet, src).await,
                    None => break,
                },
            }
        }

        info!("Dispatcher stopped");
        Ok(())
    }
}
