//! The witness rotation engine.
//!
//! [`WitnessRotation`] holds the witness lists of the current round
//! (`primary`) and the previous round (`formerly`), plus the height and
//! timestamp at which the last rotation completed. All four fields sit
//! behind one reader/writer lock so that a rotation is observed either
//! completely or not at all.
//!
//! Switches are additionally serialized end to end: the candidate pool
//! call, the witness read and the install happen under one mutex, so two
//! overlapping `switch`/`advance` calls cannot both act on the same
//! boundary.

use {
    crate::{
        candidate_pool::{Candidate, CandidatePool, ChainHead, WithdrawDecision, WitnessRound},
        config::{ConfigError, RotationConfig},
        error::RotationError,
        NodeId,
    },
    log::*,
    parking_lot::{Mutex, RwLock},
    solana_pubkey::Pubkey,
};

#[derive(Debug, Clone, Default, PartialEq, Eq)]
struct RotationState {
    /// Witnesses of the previous round.
    formerly_nodes: Vec<NodeId>,
    /// Witnesses of the current round.
    primary_nodes: Vec<NodeId>,
    /// Height at which the last rotation completed.
    last_cycle_block_num: u64,
    /// Start of the current epoch in seconds since the unix epoch. Usually
    /// the timestamp of the block that completed the previous rotation.
    start_time_of_epoch: i64,
}

/// What [`WitnessRotation::advance`] did for a committed block.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RotationStep {
    /// Nothing was due at this height.
    Idle,
    /// The election ran and produced this many witnesses.
    Elected(usize),
    /// The election was due but the candidate pool failed.
    ElectionFailed,
    /// The witness lists rotated at this height.
    Switched,
    /// The switch was due but did not happen; it is retried on the next block.
    SwitchFailed,
}

/// Current and previous witness sets with epoch bookkeeping.
pub struct WitnessRotation<P: CandidatePool> {
    state: RwLock<RotationState>,
    /// Held for the whole of a switch. `true` while the pool has promoted
    /// its next set but the rotation has not installed it yet.
    pool_ahead: Mutex<bool>,
    candidate_pool: P,
    config: RotationConfig,
}

impl<P: CandidatePool> std::fmt::Debug for WitnessRotation<P> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let state = self.state.read();
        f.debug_struct("WitnessRotation")
            .field("primary_nodes", &state.primary_nodes.len())
            .field("formerly_nodes", &state.formerly_nodes.len())
            .field("last_cycle_block_num", &state.last_cycle_block_num)
            .field("start_time_of_epoch", &state.start_time_of_epoch)
            .finish()
    }
}

impl<P: CandidatePool> WitnessRotation<P> {
    /// Create a rotation seeded with the genesis witnesses. Both lists start
    /// out as `initial_nodes`.
    pub fn new(
        initial_nodes: Vec<NodeId>,
        candidate_pool: P,
        config: RotationConfig,
    ) -> Result<Self, ConfigError> {
        config.validate()?;
        Ok(Self {
            state: RwLock::new(RotationState {
                formerly_nodes: initial_nodes.clone(),
                primary_nodes: initial_nodes,
                last_cycle_block_num: 0,
                start_time_of_epoch: 0,
            }),
            pool_ahead: Mutex::new(false),
            candidate_pool,
            config,
        })
    }

    pub fn config(&self) -> &RotationConfig {
        &self.config
    }

    pub fn candidate_pool(&self) -> &P {
        &self.candidate_pool
    }

    // -- Membership queries --

    /// Whether `address` belongs to a witness of the current round.
    ///
    /// Node identities are public keys, so an address matches a node when
    /// it equals the node's key.
    pub fn is_primary(&self, address: &Pubkey) -> bool {
        self.state
            .read()
            .primary_nodes
            .iter()
            .any(|node| node == address)
    }

    /// Position of `node_id` in `primary ++ formerly`, or `-1` if absent.
    pub fn node_index(&self, node_id: &NodeId) -> i64 {
        let state = self.state.read();
        state
            .primary_nodes
            .iter()
            .chain(state.formerly_nodes.iter())
            .position(|node| node == node_id)
            .and_then(|idx| i64::try_from(idx).ok())
            .unwrap_or(-1)
    }

    pub fn primary_nodes(&self) -> Vec<NodeId> {
        self.state.read().primary_nodes.clone()
    }

    pub fn formerly_nodes(&self) -> Vec<NodeId> {
        self.state.read().formerly_nodes.clone()
    }

    /// `(primary, formerly)` read under one lock acquisition.
    pub fn witness_lists(&self) -> (Vec<NodeId>, Vec<NodeId>) {
        let state = self.state.read();
        (state.primary_nodes.clone(), state.formerly_nodes.clone())
    }

    /// Nodes the network should treat as consensus peers: the current
    /// witnesses followed by previous-round witnesses that were not
    /// re-elected.
    pub fn consensus_nodes(&self) -> Result<Vec<NodeId>, RotationError> {
        let state = self.state.read();
        let mut nodes = state.primary_nodes.clone();
        for node in &state.formerly_nodes {
            if !nodes.contains(node) {
                nodes.push(*node);
            }
        }
        if nodes.is_empty() {
            return Err(RotationError::NoWitnesses);
        }
        Ok(nodes)
    }

    // -- Epoch bookkeeping --

    pub fn last_cycle_block_num(&self) -> u64 {
        self.state.read().last_cycle_block_num
    }

    pub fn set_last_cycle_block_num(&self, block_number: u64) {
        self.state.write().last_cycle_block_num = block_number;
    }

    pub fn start_time_of_epoch(&self) -> i64 {
        self.state.read().start_time_of_epoch
    }

    pub fn set_start_time_of_epoch(&self, start_time_of_epoch: i64) {
        self.state.write().start_time_of_epoch = start_time_of_epoch;
        info!("epoch start time set to {start_time_of_epoch}");
    }

    // -- Rotation --

    /// Ask the candidate pool for the next witness set. Does not touch the
    /// rotation's own lists.
    pub fn election(&self, state: &P::State) -> Result<Vec<Candidate>, RotationError> {
        Ok(self.candidate_pool.election(state)?)
    }

    /// Rotate `primary` into `formerly` and install the freshly switched
    /// witness set as `primary`.
    ///
    /// Returns `false`, leaving both lists untouched, if the pool refuses to
    /// switch, fails to report the new witnesses, or reports none.
    ///
    /// If the pool switched but its witnesses could not be read, the next
    /// attempt only re-reads them instead of asking the pool to switch
    /// again.
    pub fn switch(&self, state: &P::State) -> bool {
        let mut pool_ahead = self.pool_ahead.lock();
        self.switch_locked(&mut pool_ahead, state, None)
    }

    /// Whether the pool has switched past the witnesses this rotation holds.
    pub fn is_pool_ahead(&self) -> bool {
        *self.pool_ahead.lock()
    }

    fn switch_locked(
        &self,
        pool_ahead: &mut bool,
        state: &P::State,
        boundary: Option<(u64, i64)>,
    ) -> bool {
        if !*pool_ahead && !self.candidate_pool.switch(state) {
            warn!("candidate pool refused to switch witnesses");
            return false;
        }
        let witnesses = match self.candidate_pool.get_witness(state, WitnessRound::Current) {
            Ok(witnesses) => witnesses,
            Err(e) => {
                *pool_ahead = true;
                error!(
                    "candidate pool switched but its witnesses are unreadable, rotation still \
                     holds the previous round until they can be read: {e}"
                );
                return false;
            }
        };
        *pool_ahead = false;
        if witnesses.is_empty() {
            warn!("candidate pool switched to an empty witness set, keeping current witnesses");
            return false;
        }
        let next: Vec<NodeId> = witnesses.into_iter().map(|c| c.node_id).collect();

        let mut guard = self.state.write();
        let previous = std::mem::replace(&mut guard.primary_nodes, next);
        guard.formerly_nodes = previous;
        if let Some((height, timestamp)) = boundary {
            guard.last_cycle_block_num = height;
            guard.start_time_of_epoch = timestamp;
        }
        info!(
            "witnesses rotated: {} primary, {} formerly (last cycle {})",
            guard.primary_nodes.len(),
            guard.formerly_nodes.len(),
            guard.last_cycle_block_num
        );
        true
    }

    /// Drive elections and switches from committed block heights.
    ///
    /// At `election_height` the election runs; from `switch_height` on the
    /// switch is attempted until it succeeds, at which point the committed
    /// height and timestamp become the new cycle start.
    pub fn advance(&self, state: &P::State, height: u64, timestamp: i64) -> RotationStep {
        let mut pool_ahead = self.pool_ahead.lock();
        let last_cycle = self.last_cycle_block_num();
        if height >= self.config.switch_height(last_cycle) {
            return if self.switch_locked(&mut pool_ahead, state, Some((height, timestamp))) {
                RotationStep::Switched
            } else {
                RotationStep::SwitchFailed
            };
        }
        if height == self.config.election_height(last_cycle) {
            return match self.election(state) {
                Ok(elected) => {
                    debug!("elected {} witnesses at height {height}", elected.len());
                    RotationStep::Elected(elected.len())
                }
                Err(e) => {
                    warn!("election at height {height} failed: {e}");
                    RotationStep::ElectionFailed
                }
            };
        }
        RotationStep::Idle
    }

    /// Load both lists from persisted state when resuming from a non-genesis
    /// head. On a genesis head the initial witnesses are kept.
    pub fn set_candidate_pool(
        &self,
        state: &P::State,
        chain: &impl ChainHead,
    ) -> Result<(), RotationError> {
        if chain.is_at_genesis() {
            return Ok(());
        }
        let witnesses = self
            .candidate_pool
            .get_witness(state, WitnessRound::Current)
            .inspect_err(|e| error!("failed to load witnesses from state: {e}"))?;
        if witnesses.is_empty() {
            return Err(RotationError::EmptyPersistedWitnesses(chain.current_number()));
        }
        let ids: Vec<NodeId> = witnesses.into_iter().map(|c| c.node_id).collect();
        let mut guard = self.state.write();
        guard.formerly_nodes = ids.clone();
        guard.primary_nodes = ids;
        info!(
            "restored {} witnesses at height {}",
            guard.primary_nodes.len(),
            chain.current_number()
        );
        Ok(())
    }

    // -- Candidate pool pass-through --

    pub fn get_witness(
        &self,
        state: &P::State,
        round: WitnessRound,
    ) -> Result<Vec<Candidate>, RotationError> {
        Ok(self.candidate_pool.get_witness(state, round)?)
    }

    pub fn set_candidate(&self, state: &P::State, candidate: Candidate) -> Result<(), RotationError> {
        Ok(self.candidate_pool.set_candidate(state, candidate)?)
    }

    pub fn get_candidate(
        &self,
        state: &P::State,
        node_id: &NodeId,
    ) -> Result<Option<Candidate>, RotationError> {
        Ok(self.candidate_pool.get_candidate(state, node_id)?)
    }

    pub fn withdraw_candidate(
        &self,
        state: &P::State,
        node_id: &NodeId,
        amount: u64,
        block_number: u64,
    ) -> WithdrawDecision {
        let decision = self
            .candidate_pool
            .withdraw_candidate(state, node_id, amount, block_number);
        if let WithdrawDecision::Rejected(reason) = &decision {
            debug!("withdrawal of {amount} by {node_id} rejected: {reason:?}");
        }
        decision
    }
}
