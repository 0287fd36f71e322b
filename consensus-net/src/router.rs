//! Gossip routing: which peers receive each consensus message.
//!
//! Peers are split into *consensus* peers (current or previous witnesses,
//! as reported by a [`ConsensusNodeSource`]) and *observers*. Depending on
//! the message type the router sends to
//!
//! - **mixing**: every consensus peer that does not already hold the
//!   message plus a random sample of up to half the observers (proposals,
//!   votes, confirmations, block-hash announcements);
//! - **consensus only**: consensus peers that do not already hold the
//!   message (view changes, view-change votes, block fetches). The highest
//!   prepared block query ignores the known-filter and always reaches all
//!   of them.
//!
//! Relayed messages use [`PropagationMode::Partial`], which truncates the
//! selection to `floor(sqrt(n))` peers.
//!
//! The router also remembers every fingerprint this node has gossiped or
//! accepted from a peer, so a message bouncing around the mesh is handled
//! once per node.

use {
    crate::{
        bounded_set::BoundedSet,
        config::EventCapacities,
        error::{ConsensusNetError, Result},
        event::EventBus,
        message::{ConsensusMsg, EncodedMsg, KnownClass, MessageType},
        peer::{peer_id, Peer},
        peer_set::PeerSet,
        Fingerprint, NodeId,
    },
    cbft_witness_rotation::{CandidatePool, RotationError, WitnessRotation},
    log::{debug, error, trace, warn},
    parking_lot::Mutex,
    rand::{rngs::StdRng, Rng, SeedableRng},
    std::{collections::HashSet, sync::Arc},
    tokio::{sync::mpsc, task::JoinHandle},
};

/// Supplies the identities of the current consensus nodes.
pub trait ConsensusNodeSource: Send + Sync {
    fn consensus_nodes(&self) -> std::result::Result<Vec<NodeId>, RotationError>;
}

impl<P: CandidatePool> ConsensusNodeSource for WitnessRotation<P> {
    fn consensus_nodes(&self) -> std::result::Result<Vec<NodeId>, RotationError> {
        WitnessRotation::consensus_nodes(self)
    }
}

/// How widely a message is propagated.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PropagationMode {
    /// Every peer that does not already hold the message.
    Full,
    /// Selection by message type.
    Mixing,
    /// Selection by message type, truncated to `floor(sqrt(n))` peers.
    Partial,
}

/// A message handed to [`Router::gossip`].
#[derive(Debug, Clone)]
pub struct MsgPackage {
    pub msg: ConsensusMsg,
    pub mode: PropagationMode,
    /// Id of the peer the message came from, for relayed messages.
    pub origin: Option<String>,
}

impl MsgPackage {
    pub fn new(msg: ConsensusMsg, mode: PropagationMode) -> Self {
        Self {
            msg,
            mode,
            origin: None,
        }
    }

    pub fn relayed(msg: ConsensusMsg, mode: PropagationMode, origin: impl Into<String>) -> Self {
        Self {
            msg,
            mode,
            origin: Some(origin.into()),
        }
    }
}

/// Sub-linear fanout used for relayed messages: `floor(sqrt(n))`.
pub fn partial_fanout(n: usize) -> usize {
    let square_fits = |r: usize| r.checked_mul(r).is_some_and(|sq| sq <= n);
    // Float sqrt can be off by one for large n.
    let mut root = (n as f64).sqrt() as usize;
    while root > 0 && !square_fits(root) {
        root = root.saturating_sub(1);
    }
    while square_fits(root.saturating_add(1)) {
        root = root.saturating_add(1);
    }
    root
}

/// Pick up to `k` distinct peers at random, skipping those `reject` returns
/// true for.
///
/// Probes at most `3 * peers.len()` random positions, so it may return
/// fewer than `k` peers even when enough eligible ones exist.
pub fn k_random_nodes<R: Rng + ?Sized>(
    k: usize,
    peers: &[Arc<Peer>],
    reject: impl Fn(&Peer) -> bool,
    rng: &mut R,
) -> Vec<Arc<Peer>> {
    let n = peers.len();
    let mut selected: Vec<Arc<Peer>> = Vec::with_capacity(k.min(n));
    if n == 0 {
        return selected;
    }
    let probes = n.saturating_mul(3);
    for _ in 0..probes {
        if selected.len() >= k {
            break;
        }
        let Some(candidate) = peers.get(rng.random_range(0..n)) else {
            continue;
        };
        if reject(candidate) || selected.iter().any(|p| Arc::ptr_eq(p, candidate)) {
            continue;
        }
        selected.push(candidate.clone());
    }
    selected
}

/// Capacity of the node-level seen set unless overridden with
/// [`Router::with_seen_capacity`].
pub const DEFAULT_SEEN_CAPACITY: usize = 60_000;

/// Decides targets for consensus messages and hands them to peers.
pub struct Router {
    peers: Arc<PeerSet>,
    nodes: Arc<dyn ConsensusNodeSource>,
    rng: Mutex<StdRng>,
    /// Fingerprints this node has already handled.
    seen: BoundedSet<Fingerprint>,
}

impl Router {
    pub fn new(peers: Arc<PeerSet>, nodes: Arc<dyn ConsensusNodeSource>) -> Self {
        Self::with_rng(peers, nodes, StdRng::from_os_rng())
    }

    /// Use a caller-provided RNG for observer sampling.
    pub fn with_rng(peers: Arc<PeerSet>, nodes: Arc<dyn ConsensusNodeSource>, rng: StdRng) -> Self {
        Self {
            peers,
            nodes,
            rng: Mutex::new(rng),
            seen: BoundedSet::new(DEFAULT_SEEN_CAPACITY),
        }
    }

    pub fn with_seen_capacity(mut self, capacity: usize) -> Self {
        self.seen = BoundedSet::new(capacity);
        self
    }

    pub fn peers(&self) -> &Arc<PeerSet> {
        &self.peers
    }

    /// Record that this node has handled `hash`. Returns `false` if it
    /// already had, in which case the message must not be delivered or
    /// relayed again.
    pub fn mark_seen(&self, hash: Fingerprint) -> bool {
        self.seen.add(hash)
    }

    pub fn has_seen(&self, hash: &Fingerprint) -> bool {
        self.seen.contains(hash)
    }

    /// Registered peers split into `(consensus, observers)`.
    pub fn classify_peers(&self) -> Result<(Vec<Arc<Peer>>, Vec<Arc<Peer>>)> {
        let ids: HashSet<String> = self.nodes.consensus_nodes()?.iter().map(peer_id).collect();
        Ok(self
            .peers
            .peers()
            .into_iter()
            .partition(|p| ids.contains(p.id())))
    }

    /// Targets for a message of type `msg_type` with fingerprint `hash`.
    pub fn select_nodes_by_msg_type(
        &self,
        msg_type: MessageType,
        hash: &Fingerprint,
    ) -> Result<Vec<Arc<Peer>>> {
        match msg_type {
            MessageType::PrepareBlock
            | MessageType::PrepareVote
            | MessageType::ConfirmedPrepareBlock
            | MessageType::PrepareBlockHash => self.mixing_random_nodes(msg_type.known_class(), hash),
            MessageType::ViewChange
            | MessageType::ViewChangeVote
            | MessageType::GetPrepareBlock => {
                self.consensus_nodes_without(Some(msg_type.known_class()), hash)
            }
            MessageType::GetHighestPrepareBlock => self.consensus_nodes_without(None, hash),
            MessageType::Status
            | MessageType::GetPrepareVote
            | MessageType::PrepareVotes
            | MessageType::HighestPrepareBlock => Err(ConsensusNetError::Unroutable(msg_type)),
        }
    }

    fn consensus_nodes_without(
        &self,
        class: Option<KnownClass>,
        hash: &Fingerprint,
    ) -> Result<Vec<Arc<Peer>>> {
        let (consensus, _) = self.classify_peers()?;
        Ok(match class {
            Some(class) => consensus
                .into_iter()
                .filter(|p| !p.has_known(class, hash))
                .collect(),
            None => consensus,
        })
    }

    fn mixing_random_nodes(&self, class: KnownClass, hash: &Fingerprint) -> Result<Vec<Arc<Peer>>> {
        let (consensus, observers) = self.classify_peers()?;
        let mut selected: Vec<Arc<Peer>> = consensus
            .into_iter()
            .filter(|p| !p.has_known(class, hash))
            .collect();
        let k = observers.len() / 2;
        let sampled = k_random_nodes(
            k,
            &observers,
            |p| p.has_known(class, hash),
            &mut *self.rng.lock(),
        );
        selected.extend(sampled);
        Ok(selected)
    }

    /// Propagate one message and return how many peers accepted it.
    pub async fn gossip(&self, pkg: MsgPackage) -> Result<usize> {
        let encoded = Arc::new(EncodedMsg::from_consensus(&pkg.msg)?);
        let msg_type = encoded.msg_type;
        let class = encoded.known_class();
        let hash = encoded.fingerprint;
        let origin = pkg.origin.as_deref();
        self.seen.add(hash);

        if matches!(
            msg_type,
            MessageType::ConfirmedPrepareBlock | MessageType::PrepareBlockHash
        ) && self
            .peers
            .peers()
            .iter()
            .any(|p| Some(p.id()) != origin && p.has_known(class, &hash))
        {
            trace!("skipping {msg_type} {hash}: already held by a peer");
            return Ok(0);
        }

        let mut targets = match pkg.mode {
            PropagationMode::Full => self.peers.peers_without(class, &hash),
            PropagationMode::Mixing | PropagationMode::Partial => {
                self.select_nodes_by_msg_type(msg_type, &hash)?
            }
        };
        targets.retain(|p| Some(p.id()) != origin);
        if pkg.mode == PropagationMode::Partial {
            targets.truncate(partial_fanout(targets.len()));
        }
        debug!(
            "gossip {msg_type} {hash} ({:?}) to [{}]",
            pkg.mode,
            targets.iter().map(|p| p.id()).collect::<Vec<_>>().join(",")
        );

        let mut delivered = 0usize;
        if class == KnownClass::Generic {
            for peer in &targets {
                match peer.write_msg(&encoded.msg).await {
                    Ok(()) => {
                        peer.mark_known(KnownClass::Generic, hash);
                        delivered = delivered.saturating_add(1);
                    }
                    Err(e) => error!("send {msg_type} to peer {} failed: {e}", peer.id()),
                }
            }
        } else {
            for peer in &targets {
                if peer.async_send(encoded.clone()) {
                    delivered = delivered.saturating_add(1);
                }
            }
        }
        trace!("propagated {msg_type} {hash} to {delivered} peers");
        Ok(delivered)
    }

    /// Spawn one loop per event feed; each gossips what the engine
    /// publishes with `mode` until the bus is closed.
    pub fn spawn_broadcast_loops(
        self: &Arc<Self>,
        bus: &EventBus,
        capacities: &EventCapacities,
        mode: PropagationMode,
    ) -> Vec<JoinHandle<()>> {
        vec![
            self.spawn_loop(
                "prepare_block",
                bus.prepare_blocks.subscribe(capacities.prepare_blocks),
                mode,
            ),
            self.spawn_loop(
                "prepare_vote",
                bus.prepare_votes.subscribe(capacities.prepare_votes),
                mode,
            ),
            self.spawn_loop(
                "confirmed_prepare_block",
                bus.confirmed_prepare_blocks
                    .subscribe(capacities.confirmed_prepare_blocks),
                mode,
            ),
            self.spawn_loop(
                "prepare_block_hash",
                bus.prepare_block_hashes
                    .subscribe(capacities.prepare_block_hashes),
                mode,
            ),
            self.spawn_loop(
                "view_change",
                bus.view_changes.subscribe(capacities.view_changes),
                mode,
            ),
            self.spawn_loop(
                "view_change_vote",
                bus.view_change_votes.subscribe(capacities.view_change_votes),
                mode,
            ),
        ]
    }

    fn spawn_loop<E>(
        self: &Arc<Self>,
        name: &'static str,
        mut events: mpsc::Receiver<E>,
        mode: PropagationMode,
    ) -> JoinHandle<()>
    where
        E: Into<ConsensusMsg> + Send + 'static,
    {
        let router = Arc::clone(self);
        tokio::spawn(async move {
            while let Some(event) = events.recv().await {
                if let Err(e) = router.gossip(MsgPackage::new(event.into(), mode)).await {
                    warn!("{name} gossip failed: {e}");
                }
            }
            debug!("{name} broadcast loop stopped");
        })
    }
}
