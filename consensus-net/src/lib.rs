//! CBFT Consensus Networking Layer
//!
//! Peer-to-peer plumbing for a BFT/DPoS consensus engine. It handles:
//!
//! - **Connections**: a status handshake, then length-prefixed bincode
//!   frames over TCP (or an in-memory pipe in tests).
//! - **Deduplication**: every peer remembers a bounded window of message
//!   fingerprints it is known to hold, per message class.
//! - **Routing**: messages go to consensus nodes (current and previous
//!   witnesses) and a random half of the observers, or to consensus nodes
//!   only, depending on their type.
//! - **Fan-out**: each peer drains per-class outbound queues in its own
//!   task, so a slow peer never blocks the engine.
//!
//! ## Architecture
//!
//! ```text
//!  ┌─────────────────────────────────────────────────┐
//!  │  BFT consensus engine                           │
//!  │  → EventBus (proposals, votes, view changes)    │
//!  │  ← InboundMsg (crossbeam channel)               │
//!  └──────────────┬───────────────────▲──────────────┘
//!                 │                   │
//!  ┌──────────────▼───────┐  ┌────────┴──────────────┐
//!  │ Router               │  │ Handler               │
//!  │ • select by type     │  │ • handshake, decode   │
//!  │ • mixing / partial   │  │ • mark known, relay   │
//!  └──────────────┬───────┘  └────────▲──────────────┘
//!                 │                   │
//!  ┌──────────────▼───────────────────┴──────────────┐
//!  │ PeerSet → Peer (known caches, queues, loop)     │
//!  └──────────────┬───────────────────▲──────────────┘
//!                 │                   │
//!  ┌──────────────▼───────────────────┴──────────────┐
//!  │ Transport (TCP frames / memory pipe)            │
//!  └─────────────────────────────────────────────────┘
//! ```
//!
//! ## Crate modules
//!
//! | Module | Purpose |
//! |--------|---------|
//! | [`bounded_set`] | FIFO-evicting set of recent fingerprints |
//! | [`config`]      | `ConsensusNetConfig` defaults and dev overrides |
//! | [`error`]       | Crate-wide error enum |
//! | [`event`]       | Engine-to-router event feeds |
//! | [`handler`]     | Per-connection inbound processing |
//! | [`message`]     | Wire types, bincode ser/de, framing helpers |
//! | [`peer`]        | One remote node: caches, queues, handshake |
//! | [`peer_set`]    | Registered peers |
//! | [`router`]      | Target selection and gossip |
//! | [`service`]     | Wires everything into a running network |
//! | [`transport`]   | TCP and in-memory frame transports |

pub mod bounded_set;
pub mod config;
pub mod error;
pub mod event;
pub mod handler;
pub mod message;
pub mod peer;
pub mod peer_set;
pub mod router;
pub mod service;
pub mod transport;

/// Identity of a node on the network.
pub type NodeId = solana_pubkey::Pubkey;

/// Deduplication fingerprint of an encoded message.
pub type Fingerprint = solana_hash::Hash;

pub use {
    cbft_witness_rotation::{RotationConfig, WitnessRotation},
    config::ConsensusNetConfig,
    error::{ConsensusNetError, Result},
    handler::{HeadSource, InboundMsg},
    message::{ConsensusMsg, MessageType},
    router::{ConsensusNodeSource, MsgPackage, PropagationMode, Router},
    service::ConsensusNetwork,
};
