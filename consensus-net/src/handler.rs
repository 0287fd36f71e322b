//! Inbound side of a peer connection.
//!
//! [`Handler::run_peer`] owns a connection from handshake to teardown and
//! feeds every frame through [`Handler::handle_msg`], which decodes it,
//! records that the sender holds it, passes it to the BFT engine, and
//! optionally relays it onward through the [`Router`]. A message this node
//! has already handled only updates the sender's known-cache.

use {
    crate::{
        config::ConsensusNetConfig,
        error::{ConsensusNetError, Result},
        message::{ConsensusMsg, KnownClass, Msg},
        peer::Peer,
        peer_set::PeerSet,
        router::{MsgPackage, Router},
        transport::MsgReadWriter,
        NodeId,
    },
    crossbeam_channel::{Sender, TrySendError},
    log::{debug, info, trace, warn},
    solana_hash::Hash,
    std::sync::Arc,
};

/// Reports the local chain head for the handshake.
pub trait HeadSource: Send + Sync {
    /// `(height, hash)` of the current block.
    fn head(&self) -> (u64, Hash);
}

impl<F> HeadSource for F
where
    F: Fn() -> (u64, Hash) + Send + Sync,
{
    fn head(&self) -> (u64, Hash) {
        self()
    }
}

/// A decoded message on its way to the BFT engine.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InboundMsg {
    pub peer_id: String,
    pub node_id: NodeId,
    pub msg: ConsensusMsg,
}

/// Whether the connection can keep going after `err` from `handle_msg`.
fn is_recoverable(err: &ConsensusNetError) -> bool {
    matches!(
        err,
        ConsensusNetError::Decode { .. } | ConsensusNetError::UnknownMessageType(_)
    )
}

pub struct Handler {
    config: ConsensusNetConfig,
    peers: Arc<PeerSet>,
    router: Arc<Router>,
    head: Arc<dyn HeadSource>,
    inbound: Sender<InboundMsg>,
}

impl Handler {
    pub fn new(
        config: ConsensusNetConfig,
        peers: Arc<PeerSet>,
        router: Arc<Router>,
        head: Arc<dyn HeadSource>,
        inbound: Sender<InboundMsg>,
    ) -> Self {
        Self {
            config,
            peers,
            router,
            head,
            inbound,
        }
    }

    /// Process one frame received from `peer`.
    pub async fn handle_msg(&self, peer: &Peer, msg: Msg) -> Result<()> {
        if msg.size() > self.config.max_message_size {
            return Err(ConsensusNetError::MessageTooLarge {
                size: msg.size(),
                max: self.config.max_message_size,
            });
        }
        let decoded = ConsensusMsg::from_msg(&msg)?;
        let msg_type = decoded.msg_type();
        let class = msg_type.known_class();
        let hash = msg.fingerprint();
        peer.mark_known(KnownClass::Generic, hash);
        if class != KnownClass::Generic {
            peer.mark_known(class, hash);
        }
        if !self.router.mark_seen(hash) {
            trace!("already handled {msg_type} {hash}, again from peer {}", peer.id());
            return Ok(());
        }
        trace!("received {msg_type} {hash} from peer {}", peer.id());

        let relay = (self.config.relay_inbound && class != KnownClass::Generic)
            .then(|| MsgPackage::relayed(decoded.clone(), self.config.relay_mode, peer.id()));

        match self.inbound.try_send(InboundMsg {
            peer_id: peer.id().to_string(),
            node_id: *peer.node_id(),
            msg: decoded,
        }) {
            Ok(()) => {}
            Err(TrySendError::Full(_)) => {
                debug!("dropping {msg_type} from peer {}: engine busy", peer.id());
            }
            Err(TrySendError::Disconnected(_)) => return Err(ConsensusNetError::ChannelClosed),
        }

        if let Some(pkg) = relay {
            if let Err(e) = self.router.gossip(pkg).await {
                debug!("relay of {msg_type} {hash} failed: {e}");
            }
        }
        Ok(())
    }

    /// Drive one connection: handshake, register, read until it ends,
    /// unregister.
    ///
    /// Returns `Ok(())` when the peer was closed locally and the error that
    /// ended the connection otherwise.
    pub async fn run_peer(&self, node_id: NodeId, rw: Arc<dyn MsgReadWriter>) -> Result<()> {
        if self.peers.is_closed() {
            rw.disconnect();
            return Err(ConsensusNetError::PeerSetClosed);
        }
        if self.peers.len() >= self.config.max_peers {
            rw.disconnect();
            return Err(ConsensusNetError::MaxPeersReached(self.config.max_peers));
        }

        let peer = Arc::new(Peer::new(node_id, rw, &self.config));
        let (height, head) = self.head.head();
        let status = match peer.handshake(height, head).await {
            Ok(status) => status,
            Err(e) => {
                debug!("handshake with peer {} failed: {e}", peer.id());
                peer.close();
                return Err(e);
            }
        };
        if let Err(e) = self.peers.register(peer.clone()) {
            peer.close();
            return Err(e);
        }
        info!(
            "peer {} connected at height {} ({})",
            peer.id(),
            status.bn,
            status.current_block
        );

        let result = self.read_loop(&peer).await;
        if let Err(e) = &result {
            debug!("peer {} read loop ended: {e}", peer.id());
        }
        if self.peers.unregister(peer.id()).is_err() {
            // Already removed, e.g. by a set-wide close.
            peer.close();
        }
        result
    }

    async fn read_loop(&self, peer: &Arc<Peer>) -> Result<()> {
        loop {
            let msg = tokio::select! {
                biased;
                _ = peer.closed() => return Ok(()),
                msg = peer.read_msg() => msg?,
            };
            if let Err(e) = self.handle_msg(peer, msg).await {
                if !is_recoverable(&e) {
                    return Err(e);
                }
                warn!("ignoring bad message from peer {}: {e}", peer.id());
            }
        }
    }
}
