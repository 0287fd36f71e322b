//! Error types for witness rotation.

use {crate::NodeId, thiserror::Error};

/// Failures reported by the staking candidate pool.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum CandidatePoolError {
    /// The state snapshot could not be read or decoded.
    #[error("candidate pool state unavailable: {0}")]
    StateUnavailable(String),

    /// The node is not a registered candidate.
    #[error("unknown candidate: {0}")]
    UnknownCandidate(NodeId),

    /// The candidate record was rejected (e.g. zero deposit).
    #[error("invalid candidate {node_id}: {reason}")]
    InvalidCandidate {
        /// Candidate being written.
        node_id: NodeId,
        /// Human-readable reason.
        reason: String,
    },
}

/// Errors raised by [`WitnessRotation`](crate::WitnessRotation).
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum RotationError {
    /// Both witness lists are empty, so there are no consensus nodes yet.
    #[error("no witnesses available")]
    NoWitnesses,

    /// The candidate pool failed while loading or computing witnesses.
    #[error(transparent)]
    CandidatePool(#[from] CandidatePoolError),

    /// Persisted state reported an empty witness list on a non-genesis chain.
    #[error("persisted witness list is empty at height {0}")]
    EmptyPersistedWitnesses(u64),
}
