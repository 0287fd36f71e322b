//! CBFT DPoS Witness Rotation
//!
//! This crate tracks which nodes are the *witnesses* (consensus nodes) of
//! the current and the previous round, and rotates them at epoch
//! boundaries:
//!
//! 1. **Election**: some blocks before an epoch ends, the candidate pool
//!    computes the next witness set from staking state.
//! 2. **Switch**: at the boundary, the current witnesses become the
//!    *formerly* list and the freshly elected set becomes the *primary*
//!    list, atomically.
//! 3. **Queries**: the network router and the BFT engine ask whether a
//!    node is a witness, where it sits in the rotation, and which nodes
//!    should be treated as consensus peers.
//!
//! # Key Properties
//!
//! - Readers never observe a primary list from round N next to a formerly
//!   list from round N-2: both lists live behind a single lock and are
//!   replaced together.
//! - A rotation is all-or-nothing. If the candidate pool fails or reports
//!   an empty witness set, nothing changes.
//! - A node resuming from non-genesis state reloads the witness lists from
//!   persisted state instead of starting empty.
//!
//! # Architecture
//!
//! ```text
//! ┌───────────────────────────────────────────┐
//! │             WitnessRotation               │
//! │  ┌──────────────┐   ┌──────────────────┐  │
//! │  │ RotationState│   │  RotationConfig  │  │
//! │  │ primary      │   │  epoch_length    │  │
//! │  │ formerly     │   │  election_dist.  │  │
//! │  │ last cycle   │   └──────────────────┘  │
//! │  └──────────────┘                         │
//! │          │ election / switch / witness    │
//! │  ┌───────▼────────────────────────────┐   │
//! │  │ CandidatePool (staking collaborator)│  │
//! │  └────────────────────────────────────┘   │
//! └───────────────────────────────────────────┘
//! ```

pub mod candidate_pool;
pub mod config;
pub mod error;
pub mod rotation;

pub use {
    candidate_pool::{
        Candidate, CandidatePool, ChainHead, WithdrawDecision, WithdrawRejection, WitnessRound,
    },
    config::{ConfigError, RotationConfig},
    error::{CandidatePoolError, RotationError},
    rotation::{RotationStep, WitnessRotation},
};

/// Identity of a node on the consensus network.
pub type NodeId = solana_pubkey::Pubkey;
