//! The consensus network service.
//!
//! Ties the pieces together: connections are handed to the [`Handler`],
//! which registers them with the [`PeerSet`]; what the BFT engine publishes
//! on the [`EventBus`] is gossiped by the [`Router`]; decoded inbound
//! messages leave through a bounded crossbeam channel of
//! `inbound_channel_capacity` entries, whose receiver goes to the engine.
//!
//! # Architecture
//!
//! ```text
//!  ┌──────────────────────────────────────────────────────────┐
//!  │                    BFT consensus engine                  │
//!  └───────┬──────────────────────────────────────▲───────────┘
//!          │ EventBus (publish_*)                 │ crossbeam
//!          │                                      │ InboundMsg
//!  ┌───────▼──────────────────────────────────────┴───────────┐
//!  │                    ConsensusNetwork                       │
//!  │                                                           │
//!  │  ┌────────────┐  gossip   ┌───────────┐   ┌────────────┐  │
//!  │  │   Router   │──────────▶│  PeerSet  │◀──│  Handler   │  │
//!  │  │ (6 loops)  │           │ (reporter)│   │ (per peer) │  │
//!  │  └─────┬──────┘           └─────┬─────┘   └─────▲──────┘  │
//!  │        │ consensus nodes        │ queues        │ frames  │
//!  │  ┌─────▼──────────┐       ┌─────▼───────────────┴──────┐  │
//!  │  │WitnessRotation │       │ Peer: broadcast loop + rw  │  │
//!  │  └────────────────┘       └────────────────────────────┘  │
//!  └───────────────────────────────────────────────────────────┘
//! ```

use {
    crate::{
        config::ConsensusNetConfig,
        error::Result,
        event::EventBus,
        handler::{Handler, HeadSource, InboundMsg},
        message::{ConsensusMsg, EncodedMsg},
        peer_set::PeerSet,
        router::{ConsensusNodeSource, Router},
        transport::{FramedTransport, MsgReadWriter},
        NodeId,
    },
    crossbeam_channel::Receiver,
    log::{debug, info},
    parking_lot::Mutex,
    std::{net::SocketAddr, sync::Arc},
    tokio::{net::TcpStream, task::JoinHandle},
};

/// The running network layer of one node.
pub struct ConsensusNetwork {
    config: ConsensusNetConfig,
    peers: Arc<PeerSet>,
    router: Arc<Router>,
    handler: Arc<Handler>,
    bus: Arc<EventBus>,
    tasks: Mutex<Vec<JoinHandle<()>>>,
}

impl ConsensusNetwork {
    /// Build the service. Nothing runs until [`start`](Self::start).
    ///
    /// * `nodes` reports which node ids are consensus nodes, usually a
    ///   `WitnessRotation`.
    /// * `head` reports the local chain head for handshakes.
    ///
    /// Also returns the receiving end of the engine channel, which carries
    /// every decoded message from every peer.
    pub fn new(
        config: ConsensusNetConfig,
        nodes: Arc<dyn ConsensusNodeSource>,
        head: Arc<dyn HeadSource>,
    ) -> Result<(Self, Receiver<InboundMsg>)> {
        config.validate()?;
        let peers = Arc::new(PeerSet::new(config.max_peers));
        Ok(Self::with_parts(config, Router::new(peers, nodes), head))
    }

    /// Like [`new`](Self::new) with a caller-built router, e.g. one with a
    /// seeded rng. The router's seen set is resized to
    /// `config.seen_capacity`.
    pub fn with_router(
        config: ConsensusNetConfig,
        router: Router,
        head: Arc<dyn HeadSource>,
    ) -> Result<(Self, Receiver<InboundMsg>)> {
        config.validate()?;
        Ok(Self::with_parts(config, router, head))
    }

    fn with_parts(
        config: ConsensusNetConfig,
        router: Router,
        head: Arc<dyn HeadSource>,
    ) -> (Self, Receiver<InboundMsg>) {
        let router = Arc::new(router.with_seen_capacity(config.seen_capacity));
        let peers = router.peers().clone();
        let (inbound, engine) = crossbeam_channel::bounded(config.inbound_channel_capacity);
        let handler = Arc::new(Handler::new(
            config.clone(),
            peers.clone(),
            router.clone(),
            head,
            inbound,
        ));
        let network = Self {
            config,
            peers,
            router,
            handler,
            bus: Arc::new(EventBus::new()),
            tasks: Mutex::new(Vec::new()),
        };
        (network, engine)
    }

    /// Spawn the router's broadcast loops and the peer reporter.
    pub fn start(&self) {
        let mut tasks = self.tasks.lock();
        tasks.extend(self.router.spawn_broadcast_loops(
            &self.bus,
            &self.config.events,
            self.config.local_mode,
        ));
        tasks.push(self.peers.spawn_reporter(self.config.report_interval));
        info!(
            "consensus network started (max_peers={}, local_mode={:?}, relay={})",
            self.config.max_peers, self.config.local_mode, self.config.relay_inbound
        );
    }

    /// Serve a connection in the background until it ends.
    pub fn handle_peer(&self, node_id: NodeId, rw: Arc<dyn MsgReadWriter>) -> JoinHandle<()> {
        let handler = self.handler.clone();
        tokio::spawn(async move {
            if let Err(e) = handler.run_peer(node_id, rw).await {
                debug!("connection to {node_id} ended: {e}");
            }
        })
    }

    /// Serve an accepted TCP connection from `node_id`.
    pub fn accept(&self, stream: TcpStream, node_id: NodeId) -> Result<JoinHandle<()>> {
        let transport = FramedTransport::new(stream, self.config.max_message_size)?;
        Ok(self.handle_peer(node_id, Arc::new(transport)))
    }

    /// Connect to `node_id` at `addr` and serve the connection.
    pub async fn dial(&self, addr: SocketAddr, node_id: NodeId) -> Result<JoinHandle<()>> {
        let transport = FramedTransport::connect(addr, self.config.max_message_size).await?;
        Ok(self.handle_peer(node_id, Arc::new(transport)))
    }

    /// Queue `msg` for one registered peer. Returns `false` if the peer's
    /// queue was full.
    pub fn send_to(&self, peer_id: &str, msg: &ConsensusMsg) -> Result<bool> {
        let peer = self.peers.get(peer_id)?;
        let encoded = EncodedMsg::from_consensus(msg)?;
        Ok(peer.async_send(Arc::new(encoded)))
    }

    pub fn bus(&self) -> &Arc<EventBus> {
        &self.bus
    }

    pub fn peers(&self) -> &Arc<PeerSet> {
        &self.peers
    }

    pub fn router(&self) -> &Arc<Router> {
        &self.router
    }

    pub fn config(&self) -> &ConsensusNetConfig {
        &self.config
    }

    /// Close the bus and the peer set and wait for the background tasks.
    pub async fn stop(&self) {
        self.bus.close();
        self.peers.close();
        let tasks: Vec<_> = self.tasks.lock().drain(..).collect();
        for task in tasks {
            if let Err(e) = task.await {
                debug!("network task ended abnormally: {e}");
            }
        }
        info!("consensus network stopped");
    }
}
