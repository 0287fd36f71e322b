//! Configuration for the consensus networking layer.

use {crate::router::PropagationMode, std::time::Duration};

/// Capacities of the per-peer known-message caches.
///
/// Each cache remembers which fingerprints a peer is known to hold so the
/// router can skip it. Old fingerprints are forgotten first.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KnownCapacities {
    /// Any message, including point-to-point requests and replies.
    pub generic: usize,
    pub prepare_blocks: usize,
    pub prepare_votes: usize,
    pub confirmed_prepare_blocks: usize,
    pub prepare_block_hashes: usize,
    pub view_changes: usize,
    pub view_change_votes: usize,
}

impl Default for KnownCapacities {
    fn default() -> Self {
        Self {
            generic: 60_000,
            prepare_blocks: 10_000,
            prepare_votes: 1_024,
            confirmed_prepare_blocks: 1_024,
            prepare_block_hashes: 2_048,
            view_changes: 2_048,
            view_change_votes: 2_048,
        }
    }
}

/// Capacities of the per-peer outbound queues drained by the broadcaster.
///
/// These are deliberately tiny: a peer that cannot keep up loses messages
/// instead of holding memory.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QueueCapacities {
    /// Point-to-point replies queued through `send_to`.
    pub generic: usize,
    pub prepare_blocks: usize,
    pub prepare_votes: usize,
    pub confirmed_prepare_blocks: usize,
    pub prepare_block_hashes: usize,
    pub view_changes: usize,
    pub view_change_votes: usize,
}

impl Default for QueueCapacities {
    fn default() -> Self {
        Self {
            generic: 64,
            prepare_blocks: 4,
            prepare_votes: 4,
            confirmed_prepare_blocks: 4,
            prepare_block_hashes: 4,
            view_changes: 4,
            view_change_votes: 10,
        }
    }
}

/// Capacities of the router's event subscriptions, one per event type.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EventCapacities {
    pub prepare_blocks: usize,
    pub prepare_votes: usize,
    pub confirmed_prepare_blocks: usize,
    pub prepare_block_hashes: usize,
    pub view_changes: usize,
    pub view_change_votes: usize,
}

impl Default for EventCapacities {
    fn default() -> Self {
        Self {
            prepare_blocks: 1_024,
            prepare_votes: 1_024,
            confirmed_prepare_blocks: 1_024,
            prepare_block_hashes: 2_048,
            view_changes: 1_024,
            view_change_votes: 2_048,
        }
    }
}

/// Configuration for the consensus P2P network.
#[derive(Debug, Clone)]
pub struct ConsensusNetConfig {
    pub known: KnownCapacities,
    pub queues: QueueCapacities,
    pub events: EventCapacities,

    /// Fingerprints this node has already delivered or gossiped. A repeat
    /// is neither delivered to the engine nor relayed again.
    pub seen_capacity: usize,

    /// How long both directions of the status exchange may take.
    /// Default: 5 s.
    pub handshake_timeout: Duration,

    /// Maximum size of a single message payload in bytes.
    /// Default: 10 MiB.
    pub max_message_size: usize,

    /// Buffer of the channel `ConsensusNetwork` creates to carry decoded
    /// inbound messages to the consensus engine. Messages are dropped when
    /// it is full.
    pub inbound_channel_capacity: usize,

    /// Maximum number of registered peers.
    pub max_peers: usize,

    /// Interval between peer-population log lines.
    /// Default: 2 s.
    pub report_interval: Duration,

    /// Whether messages received from a peer are re-gossiped.
    pub relay_inbound: bool,

    /// Propagation mode for re-gossiped messages.
    /// Default: [`PropagationMode::Partial`].
    pub relay_mode: PropagationMode,

    /// Propagation mode for messages produced by the local engine.
    /// Default: [`PropagationMode::Mixing`].
    pub local_mode: PropagationMode,
}

impl Default for ConsensusNetConfig {
    fn default() -> Self {
        Self {
            known: KnownCapacities::default(),
            queues: QueueCapacities::default(),
            events: EventCapacities::default(),
            seen_capacity: 60_000,
            handshake_timeout: Duration::from_secs(5),
            max_message_size: 10_485_760, // 10 MiB
            inbound_channel_capacity: 4_096,
            max_peers: 50,
            report_interval: Duration::from_secs(2),
            relay_inbound: true,
            relay_mode: PropagationMode::Partial,
            local_mode: PropagationMode::Mixing,
        }
    }
}

impl ConsensusNetConfig {
    /// Create a config suitable for local testing with small buffers and
    /// short timeouts.
    #[cfg(any(test, feature = "dev-context-only-utils"))]
    pub fn dev_default() -> Self {
        Self {
            known: KnownCapacities {
                generic: 1_024,
                prepare_blocks: 128,
                prepare_votes: 128,
                confirmed_prepare_blocks: 128,
                prepare_block_hashes: 128,
                view_changes: 128,
                view_change_votes: 128,
            },
            queues: QueueCapacities::default(),
            events: EventCapacities {
                prepare_blocks: 64,
                prepare_votes: 64,
                confirmed_prepare_blocks: 64,
                prepare_block_hashes: 64,
                view_changes: 64,
                view_change_votes: 64,
            },
            seen_capacity: 1_024,
            handshake_timeout: Duration::from_millis(500),
            max_message_size: 1_048_576,
            inbound_channel_capacity: 256,
            max_peers: 16,
            report_interval: Duration::from_millis(200),
            relay_inbound: false,
            relay_mode: PropagationMode::Partial,
            local_mode: PropagationMode::Mixing,
        }
    }

    /// Validate configuration parameters.
    pub fn validate(&self) -> Result<(), ConfigError> {
        let known = [
            ("known.generic", self.known.generic),
            ("known.prepare_blocks", self.known.prepare_blocks),
            ("known.prepare_votes", self.known.prepare_votes),
            (
                "known.confirmed_prepare_blocks",
                self.known.confirmed_prepare_blocks,
            ),
            ("known.prepare_block_hashes", self.known.prepare_block_hashes),
            ("known.view_changes", self.known.view_changes),
            ("known.view_change_votes", self.known.view_change_votes),
        ];
        let queues = [
            ("queues.generic", self.queues.generic),
            ("queues.prepare_blocks", self.queues.prepare_blocks),
            ("queues.prepare_votes", self.queues.prepare_votes),
            (
                "queues.confirmed_prepare_blocks",
                self.queues.confirmed_prepare_blocks,
            ),
            ("queues.prepare_block_hashes", self.queues.prepare_block_hashes),
            ("queues.view_changes", self.queues.view_changes),
            ("queues.view_change_votes", self.queues.view_change_votes),
        ];
        let events = [
            ("events.prepare_blocks", self.events.prepare_blocks),
            ("events.prepare_votes", self.events.prepare_votes),
            (
                "events.confirmed_prepare_blocks",
                self.events.confirmed_prepare_blocks,
            ),
            ("events.prepare_block_hashes", self.events.prepare_block_hashes),
            ("events.view_changes", self.events.view_changes),
            ("events.view_change_votes", self.events.view_change_votes),
            ("inbound_channel_capacity", self.inbound_channel_capacity),
            ("seen_capacity", self.seen_capacity),
        ];
        if let Some((name, _)) = known
            .iter()
            .chain(queues.iter())
            .chain(events.iter())
            .find(|(_, capacity)| *capacity == 0)
        {
            return Err(ConfigError::ZeroCapacity(name));
        }
        if self.handshake_timeout.is_zero() {
            return Err(ConfigError::ZeroHandshakeTimeout);
        }
        if self.report_interval.is_zero() {
            return Err(ConfigError::ZeroReportInterval);
        }
        if self.max_message_size == 0 || u32::try_from(self.max_message_size).is_err() {
            return Err(ConfigError::InvalidMaxMessageSize(self.max_message_size));
        }
        if self.max_peers == 0 {
            return Err(ConfigError::ZeroMaxPeers);
        }
        Ok(())
    }
}

/// Errors in network configuration.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ConfigError {
    #[error("{0} must be > 0")]
    ZeroCapacity(&'static str),
    #[error("handshake_timeout must be > 0")]
    ZeroHandshakeTimeout,
    #[error("report_interval must be > 0")]
    ZeroReportInterval,
    #[error("max_message_size must be in [1, u32::MAX], got {0}")]
    InvalidMaxMessageSize(usize),
    #[error("max_peers must be > 0")]
    ZeroMaxPeers,
}
