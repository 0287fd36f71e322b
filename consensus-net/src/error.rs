//! Error types for the consensus networking layer.

use {
    crate::message::MessageType,
    std::time::Duration,
    thiserror::Error,
};

/// Errors that can occur in the consensus networking layer.
///
/// Transport errors are local to one peer. Protocol errors reject a single
/// operation. Neither is ever fatal to the node.
#[derive(Error, Debug)]
pub enum ConsensusNetError {
    /// Transport-level I/O error.
    #[error("transport error: {0}")]
    Transport(#[from] std::io::Error),

    /// The remote end went away or the transport was disconnected locally.
    #[error("peer disconnected")]
    Disconnected,

    /// The first message of a handshake was not a status message.
    #[error("first message has code {0}, expected status")]
    NoStatusMsg(u8),

    /// Message exceeds the maximum allowed size.
    #[error("message too large: {size} bytes (max {max} bytes)")]
    MessageTooLarge {
        /// Actual message size.
        size: usize,
        /// Configured maximum.
        max: usize,
    },

    /// The payload could not be decoded as the type its code announced.
    #[error("failed to decode {code:?} payload: {reason}")]
    Decode {
        code: MessageType,
        reason: String,
    },

    /// The message code does not name any known message type.
    #[error("unknown message type code {0}")]
    UnknownMessageType(u8),

    /// A status message arrived after the handshake finished.
    #[error("unexpected status message")]
    UnexpectedStatus,

    /// The remote did not complete the handshake in time.
    #[error("handshake timed out after {0:?}")]
    HandshakeTimeout(Duration),

    /// The peer is not registered with the peer set.
    #[error("peer {0} is not registered")]
    NotRegistered(String),

    /// A peer with the same identity is already registered.
    #[error("peer {0} is already registered")]
    AlreadyRegistered(String),

    /// The peer set has been closed and accepts no new peers.
    #[error("peer set is closed")]
    PeerSetClosed,

    /// Maximum peer count has been reached.
    #[error("maximum peers reached: {0}")]
    MaxPeersReached(usize),

    /// The channel used to deliver messages to the consensus engine is closed.
    #[error("consensus channel closed")]
    ChannelClosed,

    /// The router has no selection rule for this message type.
    #[error("no routing rule for {0:?}")]
    Unroutable(MessageType),

    /// The witness rotation could not report the consensus nodes.
    #[error("consensus nodes unavailable: {0}")]
    NoConsensusNodes(#[from] cbft_witness_rotation::RotationError),

    /// Failed to serialize a message.
    #[error("serialization error: {0}")]
    Serialization(#[from] bincode::Error),

    #[error("invalid configuration: {0}")]
    Config(#[from] crate::config::ConfigError),
}

impl ConsensusNetError {
    /// Whether the error means the underlying connection is unusable.
    pub fn is_transport(&self) -> bool {
        matches!(self, Self::Transport(_) | Self::Disconnected)
    }
}

/// Convenience result type for consensus networking operations.
pub type Result<T> = std::result::Result<T, ConsensusNetError>;
