//! CBFT End-to-End Test Suite
//!
//! Runs several complete [`ConsensusNetwork`](cbft_consensus_net::ConsensusNetwork)
//! nodes in one process, linked by in-memory pipes or loopback TCP, and
//! checks what actually arrives at each node.
//!
//! Each test file can be run independently:
//!
//! ```bash
//! cargo test -p cbft-e2e-tests --test gossip_routing -- --nocapture
//! cargo test -p cbft-e2e-tests --test peer_lifecycle -- --nocapture
//! cargo test -p cbft-e2e-tests --test witness_lifecycle -- --nocapture
//! ```

pub mod helpers;
