//! Shared test utilities for CBFT end-to-end tests.
//!
//! Provides a small simulated cluster:
//! - Nodes with their own witness rotation and consensus network
//! - In-memory links that run the real handshake on both ends
//! - Polling helpers for inbound delivery and peer registration

use {
    cbft_consensus_net::{
        message::{
            BlockData, ConfirmedPrepareBlock, PrepareBlock, PrepareBlockHash, PrepareVote,
            ViewChange,
        },
        transport::msg_pipe,
        ConsensusNetConfig, ConsensusNetwork, InboundMsg, NodeId, Router,
    },
    cbft_witness_rotation::{
        candidate_pool::testing::StaticCandidatePool, RotationConfig, WitnessRotation,
    },
    crossbeam_channel::Receiver,
    rand::{rngs::StdRng, SeedableRng},
    solana_hash::Hash,
    std::{sync::Arc, time::Duration},
    tokio::time::Instant,
};

// ─────────────────────────────────────────────────────────────────────────────
// Constants
// ─────────────────────────────────────────────────────────────────────────────

/// How long a polling helper waits before giving up.
pub const WAIT_TIMEOUT: Duration = Duration::from_secs(5);

/// Poll interval of the waiting helpers.
pub const POLL_INTERVAL: Duration = Duration::from_millis(5);

/// Settle time used when asserting that something does *not* arrive.
pub const QUIET_PERIOD: Duration = Duration::from_millis(200);

/// Witness set size of the test candidate pool.
pub const WITNESSES_PER_ROUND: usize = 2;

// ─────────────────────────────────────────────────────────────────────────────
// Nodes
// ─────────────────────────────────────────────────────────────────────────────

pub type TestRotation = WitnessRotation<StaticCandidatePool>;

/// One simulated node.
pub struct TestNode {
    pub id: NodeId,
    pub network: ConsensusNetwork,
    pub inbound: Receiver<InboundMsg>,
    pub rotation: Arc<TestRotation>,
}

impl TestNode {
    /// Create and start a node that treats `witnesses` as the consensus
    /// nodes. Observer sampling is seeded from the node id.
    pub fn start(
        id: NodeId,
        witnesses: Vec<NodeId>,
        config: ConsensusNetConfig,
        rotation_config: RotationConfig,
    ) -> Self {
        let rotation = Arc::new(
            WitnessRotation::new(
                witnesses,
                StaticCandidatePool::new(WITNESSES_PER_ROUND),
                rotation_config,
            )
            .unwrap(),
        );
        let (network, inbound) = {
            let peers = Arc::new(cbft_consensus_net::peer_set::PeerSet::new(config.max_peers));
            let seed = u64::from(id.to_bytes()[0]);
            let router = Router::with_rng(peers, rotation.clone(), StdRng::seed_from_u64(seed));
            let head = move || (0u64, Hash::default());
            ConsensusNetwork::with_router(config, router, Arc::new(head)).unwrap()
        };
        network.start();
        Self {
            id,
            network,
            inbound,
            rotation,
        }
    }

    /// Start a node with dev defaults and the default rotation schedule.
    pub fn dev(id: NodeId, witnesses: Vec<NodeId>) -> Self {
        Self::start(
            id,
            witnesses,
            ConsensusNetConfig::dev_default(),
            RotationConfig::default(),
        )
    }

    pub fn peer_count(&self) -> usize {
        self.network.peers().len()
    }

    /// Drain everything currently queued for the engine.
    pub fn drain_inbound(&self) -> Vec<InboundMsg> {
        self.inbound.try_iter().collect()
    }

    /// Wait for the next inbound message, or `None` after [`WAIT_TIMEOUT`].
    pub async fn next_inbound(&self) -> Option<InboundMsg> {
        let start = Instant::now();
        while start.elapsed() < WAIT_TIMEOUT {
            if let Ok(msg) = self.inbound.try_recv() {
                return Some(msg);
            }
            tokio::time::sleep(POLL_INTERVAL).await;
        }
        None
    }

    pub async fn stop(&self) {
        self.network.stop().await;
    }
}

/// Deterministic node id.
pub fn node(n: u8) -> NodeId {
    NodeId::new_from_array([n; 32])
}

/// Link two nodes with an in-memory pipe and wait until each has registered
/// the other.
pub async fn link(a: &TestNode, b: &TestNode) {
    let (a_end, b_end) = msg_pipe(64);
    let before = (a.peer_count(), b.peer_count());
    a.network.handle_peer(b.id, Arc::new(a_end));
    b.network.handle_peer(a.id, Arc::new(b_end));
    wait_until(|| a.peer_count() > before.0 && b.peer_count() > before.1).await;
}

/// Poll `cond` until it holds. Panics after [`WAIT_TIMEOUT`].
pub async fn wait_until(cond: impl Fn() -> bool) {
    let start = Instant::now();
    while !cond() {
        assert!(start.elapsed() < WAIT_TIMEOUT, "condition not met in {WAIT_TIMEOUT:?}");
        tokio::time::sleep(POLL_INTERVAL).await;
    }
}

/// Give in-flight messages time to land.
pub async fn settle() {
    tokio::time::sleep(QUIET_PERIOD).await;
}

// ─────────────────────────────────────────────────────────────────────────────
// Messages
// ─────────────────────────────────────────────────────────────────────────────

pub fn block_hash(n: u64) -> Hash {
    let mut bytes = [0u8; 32];
    bytes[..8].copy_from_slice(&n.to_le_bytes());
    Hash::new_from_array(bytes)
}

pub fn sample_vote(number: u64, validator: NodeId) -> PrepareVote {
    PrepareVote {
        timestamp: 1_700_000_000,
        hash: block_hash(number),
        number,
        validator_index: 0,
        validator_addr: validator,
        signature: vec![0xab; 64],
    }
}

pub fn sample_prepare_block(number: u64, proposer: NodeId) -> PrepareBlock {
    PrepareBlock {
        timestamp: 1_700_000_000,
        block: BlockData {
            number,
            hash: block_hash(number),
            parent_hash: block_hash(number.saturating_sub(1)),
            timestamp: 1_700_000_000,
            proposer,
            payload: vec![7; 128],
        },
        proposal_index: 0,
        proposal_addr: proposer,
        view: None,
        view_change_votes: Vec::new(),
    }
}

pub fn sample_confirmed(number: u64) -> ConfirmedPrepareBlock {
    ConfirmedPrepareBlock {
        hash: block_hash(number),
        number,
        vote_bits: vec![0b1011],
    }
}

pub fn sample_block_hash(number: u64) -> PrepareBlockHash {
    PrepareBlockHash {
        hash: block_hash(number),
        number,
    }
}

pub fn sample_view_change(base: u64, proposer: NodeId) -> ViewChange {
    ViewChange {
        timestamp: 1_700_000_000,
        proposal_index: 1,
        proposal_addr: proposer,
        base_block_num: base,
        base_block_hash: block_hash(base),
        signature: vec![0xcd; 64],
    }
}

/// Initialize env_logger once for test output.
pub fn init_logging() {
    let _ = env_logger::builder()
        .is_test(true)
        .filter_level(log::LevelFilter::Info)
        .try_init();
}
