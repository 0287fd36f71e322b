//! Collaborator interfaces consumed by the rotation engine.
//!
//! The staking economics (deposits, refunds, ranking) live outside this
//! crate. [`CandidatePool`] is the narrow surface the rotation needs from
//! it, and [`ChainHead`] answers the genesis-vs-current question used on
//! startup.

use {
    crate::{error::CandidatePoolError, NodeId},
    serde::{Deserialize, Serialize},
    solana_pubkey::Pubkey,
};

/// Which round of witnesses to read from staking state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum WitnessRound {
    /// Witnesses of the round that just ended.
    Previous,
    /// Witnesses of the active round.
    Current,
    /// Witnesses elected for the upcoming round.
    Next,
}

/// A staking candidate as recorded by the candidate pool.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Candidate {
    /// Consensus identity of the candidate node.
    pub node_id: NodeId,
    /// Account that owns the deposit.
    pub owner: Pubkey,
    /// Current deposit.
    pub deposit: u64,
    /// Height at which the deposit was made.
    pub block_number: u64,
    /// Commission in basis points.
    pub fee_bps: u16,
}

/// Why a withdrawal was refused.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WithdrawRejection {
    /// The node is not a candidate.
    UnknownCandidate,
    /// The requested amount exceeds the deposit.
    InsufficientDeposit { requested: u64, available: u64 },
    /// Withdrawals are locked while the node is an active witness.
    ActiveWitness,
}

/// Outcome of a withdrawal request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WithdrawDecision {
    /// The withdrawal was recorded; `refunded` becomes claimable and
    /// `remaining` stays deposited.
    Accepted { refunded: u64, remaining: u64 },
    /// Nothing changed.
    Rejected(WithdrawRejection),
}

impl WithdrawDecision {
    pub fn is_accepted(&self) -> bool {
        matches!(self, Self::Accepted { .. })
    }
}

/// The staking collaborator that elects witnesses.
///
/// `State` is whatever snapshot of chain state the pool reads from; the
/// rotation only passes it through.
pub trait CandidatePool: Send + Sync {
    type State: ?Sized;

    /// Compute the next witness set without changing rotation state.
    fn election(&self, state: &Self::State) -> Result<Vec<Candidate>, CandidatePoolError>;

    /// Promote the elected set to current inside staking state.
    /// Returns `false` when there is nothing to promote.
    fn switch(&self, state: &Self::State) -> bool;

    /// Read the witnesses of the given round.
    fn get_witness(
        &self,
        state: &Self::State,
        round: WitnessRound,
    ) -> Result<Vec<Candidate>, CandidatePoolError>;

    /// Insert or update a candidate.
    fn set_candidate(
        &self,
        state: &Self::State,
        candidate: Candidate,
    ) -> Result<(), CandidatePoolError>;

    /// Look up a candidate.
    fn get_candidate(
        &self,
        state: &Self::State,
        node_id: &NodeId,
    ) -> Result<Option<Candidate>, CandidatePoolError>;

    /// Withdraw part or all of a candidate's deposit.
    fn withdraw_candidate(
        &self,
        state: &Self::State,
        node_id: &NodeId,
        amount: u64,
        block_number: u64,
    ) -> WithdrawDecision;
}

/// Minimal view of the local chain used at startup.
pub trait ChainHead {
    fn genesis_number(&self) -> u64;
    fn current_number(&self) -> u64;

    fn is_at_genesis(&self) -> bool {
        self.genesis_number() == self.current_number()
    }
}

/// In-memory candidate pool for tests and simulations.
#[cfg(any(test, feature = "dev-context-only-utils"))]
pub mod testing {
    use {super::*, parking_lot::Mutex, std::collections::HashMap};

    #[derive(Debug, Default)]
    struct PoolState {
        candidates: HashMap<NodeId, Candidate>,
        previous: Vec<NodeId>,
        current: Vec<NodeId>,
        next: Vec<NodeId>,
        fail_reads: bool,
    }

    /// A candidate pool whose witness rounds are set directly by the test.
    ///
    /// `election` ranks candidates by deposit (descending, node id
    /// ascending for ties) and keeps the top `witness_count`.
    #[derive(Debug)]
    pub struct StaticCandidatePool {
        witness_count: usize,
        inner: Mutex<PoolState>,
    }

    impl StaticCandidatePool {
        pub fn new(witness_count: usize) -> Self {
            Self {
                witness_count,
                inner: Mutex::new(PoolState::default()),
            }
        }

        pub fn set_round(&self, round: WitnessRound, nodes: Vec<NodeId>) {
            let mut inner = self.inner.lock();
            match round {
                WitnessRound::Previous => inner.previous = nodes,
                WitnessRound::Current => inner.current = nodes,
                WitnessRound::Next => inner.next = nodes,
            }
        }

        /// Make every read fail with `StateUnavailable`.
        pub fn set_failing(&self, failing: bool) {
            self.inner.lock().fail_reads = failing;
        }

        fn candidate_for(inner: &PoolState, node_id: &NodeId) -> Candidate {
            inner
                .candidates
                .get(node_id)
                .cloned()
                .unwrap_or(Candidate {
                    node_id: *node_id,
                    owner: *node_id,
                    deposit: 0,
                    block_number: 0,
                    fee_bps: 0,
                })
        }
    }

    impl CandidatePool for StaticCandidatePool {
        type State = ();

        fn election(&self, _state: &()) -> Result<Vec<Candidate>, CandidatePoolError> {
            let mut inner = self.inner.lock();
            if inner.fail_reads {
                return Err(CandidatePoolError::StateUnavailable("election".into()));
            }
            let mut ranked: Vec<Candidate> = inner.candidates.values().cloned().collect();
            ranked.sort_by(|a, b| {
                b.deposit
                    .cmp(&a.deposit)
                    .then_with(|| a.node_id.cmp(&b.node_id))
            });
            ranked.truncate(self.witness_count);
            inner.next = ranked.iter().map(|c| c.node_id).collect();
            Ok(ranked)
        }

        fn switch(&self, _state: &()) -> bool {
            let mut inner = self.inner.lock();
            if inner.fail_reads || inner.next.is_empty() {
                return false;
            }
            let next = std::mem::take(&mut inner.next);
            let current = std::mem::replace(&mut inner.current, next);
            inner.previous = current;
            true
        }

        fn get_witness(
            &self,
            _state: &(),
            round: WitnessRound,
        ) -> Result<Vec<Candidate>, CandidatePoolError> {
            let inner = self.inner.lock();
            if inner.fail_reads {
                return Err(CandidatePoolError::StateUnavailable("witness".into()));
            }
            let ids = match round {
                WitnessRound::Previous => &inner.previous,
                WitnessRound::Current => &inner.current,
                WitnessRound::Next => &inner.next,
            };
            Ok(ids.iter().map(|id| Self::candidate_for(&inner, id)).collect())
        }

        fn set_candidate(&self, _state: &(), candidate: Candidate) -> Result<(), CandidatePoolError> {
            if candidate.deposit == 0 {
                return Err(CandidatePoolError::InvalidCandidate {
                    node_id: candidate.node_id,
                    reason: "zero deposit".into(),
                });
            }
            self.inner
                .lock()
                .candidates
                .insert(candidate.node_id, candidate);
            Ok(())
        }

        fn get_candidate(
            &self,
            _state: &(),
            node_id: &NodeId,
        ) -> Result<Option<Candidate>, CandidatePoolError> {
            Ok(self.inner.lock().candidates.get(node_id).cloned())
        }

        fn withdraw_candidate(
            &self,
            _state: &(),
            node_id: &NodeId,
            amount: u64,
            _block_number: u64,
        ) -> WithdrawDecision {
            let mut inner = self.inner.lock();
            if inner.current.contains(node_id) {
                return WithdrawDecision::Rejected(WithdrawRejection::ActiveWitness);
            }
            let Some(candidate) = inner.candidates.get_mut(node_id) else {
                return WithdrawDecision::Rejected(WithdrawRejection::UnknownCandidate);
            };
            let Some(remaining) = candidate.deposit.checked_sub(amount) else {
                return WithdrawDecision::Rejected(WithdrawRejection::InsufficientDeposit {
                    requested: amount,
                    available: candidate.deposit,
                });
            };
            candidate.deposit = remaining;
            if remaining == 0 {
                inner.candidates.remove(node_id);
            }
            WithdrawDecision::Accepted {
                refunded: amount,
                remaining,
            }
        }
    }

    /// Fixed chain head.
    #[derive(Debug, Clone, Copy)]
    pub struct FixedChainHead {
        pub genesis: u64,
        pub current: u64,
    }

    impl ChainHead for FixedChainHead {
        fn genesis_number(&self) -> u64 {
            self.genesis
        }

        fn current_number(&self) -> u64 {
            self.current
        }
    }
}
