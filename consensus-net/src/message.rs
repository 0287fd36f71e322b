//! Message types and serialization for consensus network communication.
//!
//! Every message travels as a [`Msg`] frame: a one-byte [`MessageType`]
//! code plus a bincode payload. On TCP the frame is written as
//!
//! ```text
//! [1 byte: code] [4 bytes: payload length (u32-le)] [N bytes: bincode payload]
//! ```
//!
//! The fingerprint used for deduplication is the sha256 of the code byte
//! followed by the payload, so the same logical message always has the
//! same fingerprint no matter which peer relayed it. Payloads are decoded
//! strictly: trailing bytes are rejected, so a payload that decodes is
//! byte-for-byte the canonical encoding of its message.

use {
    crate::{
        error::{ConsensusNetError, Result},
        Fingerprint, NodeId,
    },
    bincode::Options,
    serde::{de::DeserializeOwned, Deserialize, Serialize},
    solana_hash::Hash,
    std::fmt,
};

/// Size of the TCP frame header: code byte plus u32 length.
pub const FRAME_HEADER_LEN: usize = 5;

/// Fixed-width little-endian bincode, refusing trailing bytes on decode.
fn wire_options() -> impl Options {
    bincode::DefaultOptions::new()
        .with_fixint_encoding()
        .reject_trailing_bytes()
}

// ── Message type codes ──────────────────────────────────────────────────────

/// Discriminant of every message on the consensus channel.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[repr(u8)]
pub enum MessageType {
    Status = 0x00,
    PrepareBlock = 0x01,
    PrepareVote = 0x02,
    ViewChange = 0x03,
    ViewChangeVote = 0x04,
    ConfirmedPrepareBlock = 0x05,
    GetPrepareVote = 0x06,
    PrepareVotes = 0x07,
    GetPrepareBlock = 0x08,
    GetHighestPrepareBlock = 0x09,
    HighestPrepareBlock = 0x0a,
    PrepareBlockHash = 0x0b,
}

impl MessageType {
    pub const ALL: [MessageType; 12] = [
        Self::Status,
        Self::PrepareBlock,
        Self::PrepareVote,
        Self::ViewChange,
        Self::ViewChangeVote,
        Self::ConfirmedPrepareBlock,
        Self::GetPrepareVote,
        Self::PrepareVotes,
        Self::GetPrepareBlock,
        Self::GetHighestPrepareBlock,
        Self::HighestPrepareBlock,
        Self::PrepareBlockHash,
    ];

    pub fn code(self) -> u8 {
        self as u8
    }

    pub fn from_code(code: u8) -> Result<Self> {
        Self::ALL
            .into_iter()
            .find(|ty| ty.code() == code)
            .ok_or(ConsensusNetError::UnknownMessageType(code))
    }

    /// The known-cache that tracks this type. Types without a dedicated
    /// cache share the generic one.
    pub fn known_class(self) -> KnownClass {
        match self {
            Self::PrepareBlock => KnownClass::PrepareBlock,
            Self::PrepareVote => KnownClass::PrepareVote,
            Self::ConfirmedPrepareBlock => KnownClass::ConfirmedPrepareBlock,
            Self::PrepareBlockHash => KnownClass::PrepareBlockHash,
            Self::ViewChange => KnownClass::ViewChange,
            Self::ViewChangeVote => KnownClass::ViewChangeVote,
            Self::Status
            | Self::GetPrepareVote
            | Self::PrepareVotes
            | Self::GetPrepareBlock
            | Self::GetHighestPrepareBlock
            | Self::HighestPrepareBlock => KnownClass::Generic,
        }
    }
}

impl fmt::Display for MessageType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(self, f)
    }
}

/// Names the per-peer known-message caches.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum KnownClass {
    Generic,
    PrepareBlock,
    PrepareVote,
    ConfirmedPrepareBlock,
    PrepareBlockHash,
    ViewChange,
    ViewChangeVote,
}

impl KnownClass {
    /// The six classes with their own cache and outbound queue.
    pub const BROADCAST: [KnownClass; 6] = [
        Self::PrepareBlock,
        Self::PrepareVote,
        Self::ConfirmedPrepareBlock,
        Self::PrepareBlockHash,
        Self::ViewChange,
        Self::ViewChangeVote,
    ];
}

// ── Payloads ────────────────────────────────────────────────────────────────

/// Handshake payload: the sender's head.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub struct StatusData {
    /// Height of the sender's current block.
    pub bn: u64,
    /// Hash of the sender's current block.
    pub current_block: Hash,
}

/// A proposed block as carried by consensus messages. The transaction
/// payload is opaque to this layer.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct BlockData {
    pub number: u64,
    pub hash: Hash,
    pub parent_hash: Hash,
    pub timestamp: i64,
    pub proposer: NodeId,
    pub payload: Vec<u8>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct PrepareBlock {
    pub timestamp: i64,
    pub block: BlockData,
    pub proposal_index: u32,
    pub proposal_addr: NodeId,
    /// View change that authorised this proposal, if any.
    pub view: Option<ViewChange>,
    pub view_change_votes: Vec<ViewChangeVote>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct PrepareVote {
    pub timestamp: i64,
    pub hash: Hash,
    pub number: u64,
    pub validator_index: u32,
    pub validator_addr: NodeId,
    pub signature: Vec<u8>,
}

/// Announces that a block gathered enough prepare votes.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ConfirmedPrepareBlock {
    pub hash: Hash,
    pub number: u64,
    /// Bitmap of validator indices that voted.
    pub vote_bits: Vec<u8>,
}

/// Lightweight announcement of a block by hash.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct PrepareBlockHash {
    pub hash: Hash,
    pub number: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ViewChange {
    pub timestamp: i64,
    pub proposal_index: u32,
    pub proposal_addr: NodeId,
    pub base_block_num: u64,
    pub base_block_hash: Hash,
    pub signature: Vec<u8>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ViewChangeVote {
    pub timestamp: i64,
    pub block_num: u64,
    pub block_hash: Hash,
    pub proposal_index: u32,
    pub proposal_addr: NodeId,
    pub validator_index: u32,
    pub validator_addr: NodeId,
    pub signature: Vec<u8>,
}

/// Request for the votes of a block the sender is missing.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct GetPrepareVote {
    pub hash: Hash,
    pub number: u64,
    /// Votes the requester already holds.
    pub vote_bits: Vec<u8>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct PrepareVotes {
    pub hash: Hash,
    pub number: u64,
    pub votes: Vec<PrepareVote>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct GetPrepareBlock {
    pub hash: Hash,
    pub number: u64,
}

/// Asks every consensus node for blocks above `lowest`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct GetHighestPrepareBlock {
    pub lowest: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct HighestPrepareBlock {
    pub committed_blocks: Vec<BlockData>,
    pub unconfirmed_blocks: Vec<PrepareBlock>,
    pub votes: Vec<PrepareVotes>,
}

// ── Decoded message ─────────────────────────────────────────────────────────

/// Any consensus message other than the handshake status.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConsensusMsg {
    PrepareBlock(PrepareBlock),
    PrepareVote(PrepareVote),
    ViewChange(ViewChange),
    ViewChangeVote(ViewChangeVote),
    ConfirmedPrepareBlock(ConfirmedPrepareBlock),
    GetPrepareVote(GetPrepareVote),
    PrepareVotes(PrepareVotes),
    GetPrepareBlock(GetPrepareBlock),
    GetHighestPrepareBlock(GetHighestPrepareBlock),
    HighestPrepareBlock(HighestPrepareBlock),
    PrepareBlockHash(PrepareBlockHash),
}

impl ConsensusMsg {
    pub fn msg_type(&self) -> MessageType {
        match self {
            Self::PrepareBlock(_) => MessageType::PrepareBlock,
            Self::PrepareVote(_) => MessageType::PrepareVote,
            Self::ViewChange(_) => MessageType::ViewChange,
            Self::ViewChangeVote(_) => MessageType::ViewChangeVote,
            Self::ConfirmedPrepareBlock(_) => MessageType::ConfirmedPrepareBlock,
            Self::GetPrepareVote(_) => MessageType::GetPrepareVote,
            Self::PrepareVotes(_) => MessageType::PrepareVotes,
            Self::GetPrepareBlock(_) => MessageType::GetPrepareBlock,
            Self::GetHighestPrepareBlock(_) => MessageType::GetHighestPrepareBlock,
            Self::HighestPrepareBlock(_) => MessageType::HighestPrepareBlock,
            Self::PrepareBlockHash(_) => MessageType::PrepareBlockHash,
        }
    }

    /// Serialize into a wire frame.
    pub fn to_msg(&self) -> Result<Msg> {
        let code = self.msg_type();
        match self {
            Self::PrepareBlock(m) => Msg::encode(code, m),
            Self::PrepareVote(m) => Msg::encode(code, m),
            Self::ViewChange(m) => Msg::encode(code, m),
            Self::ViewChangeVote(m) => Msg::encode(code, m),
            Self::ConfirmedPrepareBlock(m) => Msg::encode(code, m),
            Self::GetPrepareVote(m) => Msg::encode(code, m),
            Self::PrepareVotes(m) => Msg::encode(code, m),
            Self::GetPrepareBlock(m) => Msg::encode(code, m),
            Self::GetHighestPrepareBlock(m) => Msg::encode(code, m),
            Self::HighestPrepareBlock(m) => Msg::encode(code, m),
            Self::PrepareBlockHash(m) => Msg::encode(code, m),
        }
    }

    /// Decode a wire frame. Status frames are rejected since they are only
    /// valid during the handshake.
    pub fn from_msg(msg: &Msg) -> Result<Self> {
        let code = MessageType::from_code(msg.code)?;
        Ok(match code {
            MessageType::Status => return Err(ConsensusNetError::UnexpectedStatus),
            MessageType::PrepareBlock => Self::PrepareBlock(msg.decode()?),
            MessageType::PrepareVote => Self::PrepareVote(msg.decode()?),
            MessageType::ViewChange => Self::ViewChange(msg.decode()?),
            MessageType::ViewChangeVote => Self::ViewChangeVote(msg.decode()?),
            MessageType::ConfirmedPrepareBlock => Self::ConfirmedPrepareBlock(msg.decode()?),
            MessageType::GetPrepareVote => Self::GetPrepareVote(msg.decode()?),
            MessageType::PrepareVotes => Self::PrepareVotes(msg.decode()?),
            MessageType::GetPrepareBlock => Self::GetPrepareBlock(msg.decode()?),
            MessageType::GetHighestPrepareBlock => Self::GetHighestPrepareBlock(msg.decode()?),
            MessageType::HighestPrepareBlock => Self::HighestPrepareBlock(msg.decode()?),
            MessageType::PrepareBlockHash => Self::PrepareBlockHash(msg.decode()?),
        })
    }

    /// Deduplication fingerprint of this message.
    pub fn msg_hash(&self) -> Result<Fingerprint> {
        Ok(self.to_msg()?.fingerprint())
    }
}

// ── Wire frame ──────────────────────────────────────────────────────────────

/// A raw frame: type code plus bincode payload.
#[derive(Clone, PartialEq, Eq)]
pub struct Msg {
    pub code: u8,
    pub payload: Vec<u8>,
}

impl fmt::Debug for Msg {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Msg")
            .field("code", &self.code)
            .field("size", &self.payload.len())
            .finish()
    }
}

impl Msg {
    pub fn encode<T: Serialize>(code: MessageType, value: &T) -> Result<Self> {
        Ok(Self {
            code: code.code(),
            payload: wire_options().serialize(value)?,
        })
    }

    pub fn status(status: &StatusData) -> Result<Self> {
        Self::encode(MessageType::Status, status)
    }

    /// Decode the payload as `T`. The caller is responsible for matching
    /// `T` to the code.
    pub fn decode<T: DeserializeOwned>(&self) -> Result<T> {
        wire_options().deserialize(&self.payload).map_err(|e| ConsensusNetError::Decode {
            code: MessageType::from_code(self.code).unwrap_or(MessageType::Status),
            reason: e.to_string(),
        })
    }

    /// Payload size in bytes.
    pub fn size(&self) -> usize {
        self.payload.len()
    }

    pub fn fingerprint(&self) -> Fingerprint {
        solana_sha256_hasher::hashv(&[&[self.code][..], self.payload.as_slice()])
    }

    /// Serialize with the TCP frame header.
    pub fn to_frame(&self, max_size: usize) -> Result<Vec<u8>> {
        if self.payload.len() > max_size {
            return Err(ConsensusNetError::MessageTooLarge {
                size: self.payload.len(),
                max: max_size,
            });
        }
        let len = u32::try_from(self.payload.len()).map_err(|_| {
            ConsensusNetError::MessageTooLarge {
                size: self.payload.len(),
                max: u32::MAX as usize,
            }
        })?;
        let mut buf = Vec::with_capacity(FRAME_HEADER_LEN.saturating_add(self.payload.len()));
        buf.push(self.code);
        buf.extend_from_slice(&len.to_le_bytes());
        buf.extend_from_slice(&self.payload);
        Ok(buf)
    }

    /// Split a frame header into its code and payload length.
    pub fn read_frame_header(header: &[u8; FRAME_HEADER_LEN]) -> (u8, usize) {
        let [code, l0, l1, l2, l3] = *header;
        (code, u32::from_le_bytes([l0, l1, l2, l3]) as usize)
    }
}

/// A message encoded once and shared by every peer it is queued for.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EncodedMsg {
    pub msg_type: MessageType,
    pub fingerprint: Fingerprint,
    pub msg: Msg,
}

impl EncodedMsg {
    pub fn new<T: Serialize>(msg_type: MessageType, value: &T) -> Result<Self> {
        Ok(Self::from_msg(msg_type, Msg::encode(msg_type, value)?))
    }

    pub fn from_consensus(msg: &ConsensusMsg) -> Result<Self> {
        Ok(Self::from_msg(msg.msg_type(), msg.to_msg()?))
    }

    fn from_msg(msg_type: MessageType, msg: Msg) -> Self {
        Self {
            msg_type,
            fingerprint: msg.fingerprint(),
            msg,
        }
    }

    pub fn known_class(&self) -> KnownClass {
        self.msg_type.known_class()
    }
}

// ── Tests ───────────────────────────────────────────────────────────────────
