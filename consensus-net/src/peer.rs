//! Per-connection state for one remote consensus node.
//!
//! A [`Peer`] owns the transport to the remote, one known-message cache
//! per [`KnownClass`], and one small outbound queue per class drained by
//! its [`broadcast`](Peer::broadcast) loop.
//!
//! ```text
//!  Router ── async_send_* ──► [queue] ──► broadcast() ──► send_* ──► transport
//!                 │                                          │
//!                 └──────────── mark known ◄─────────────────┘
//! ```
//!
//! A peer is `Active` from registration until it is closed, either
//! explicitly or by a failed send inside the broadcast loop. It never
//! becomes active again.

use {
    crate::{
        bounded_set::BoundedSet,
        config::ConsensusNetConfig,
        error::{ConsensusNetError, Result},
        message::{
            ConfirmedPrepareBlock, EncodedMsg, KnownClass, MessageType, Msg, PrepareBlock,
            PrepareBlockHash, PrepareVote, StatusData, ViewChange, ViewChangeVote,
        },
        transport::MsgReadWriter,
        Fingerprint, NodeId,
    },
    log::{debug, trace},
    parking_lot::Mutex,
    solana_hash::Hash,
    std::{fmt, sync::Arc, time::Duration},
    tokio::sync::mpsc::{self, error::TrySendError},
    tokio_util::sync::CancellationToken,
};

/// Number of identity bytes used for a peer's string id.
pub const PEER_ID_PREFIX_LEN: usize = 8;

/// Short string identity of a node: hex of the first eight key bytes.
pub fn peer_id(node_id: &NodeId) -> String {
    let bytes = node_id.to_bytes();
    hex::encode(&bytes[..PEER_ID_PREFIX_LEN])
}

type Outbound = Arc<EncodedMsg>;

struct KnownSets {
    generic: BoundedSet<Fingerprint>,
    prepare_blocks: BoundedSet<Fingerprint>,
    prepare_votes: BoundedSet<Fingerprint>,
    confirmed_prepare_blocks: BoundedSet<Fingerprint>,
    prepare_block_hashes: BoundedSet<Fingerprint>,
    view_changes: BoundedSet<Fingerprint>,
    view_change_votes: BoundedSet<Fingerprint>,
}

impl KnownSets {
    fn new(config: &ConsensusNetConfig) -> Self {
        let known = &config.known;
        Self {
            generic: BoundedSet::new(known.generic),
            prepare_blocks: BoundedSet::new(known.prepare_blocks),
            prepare_votes: BoundedSet::new(known.prepare_votes),
            confirmed_prepare_blocks: BoundedSet::new(known.confirmed_prepare_blocks),
            prepare_block_hashes: BoundedSet::new(known.prepare_block_hashes),
            view_changes: BoundedSet::new(known.view_changes),
            view_change_votes: BoundedSet::new(known.view_change_votes),
        }
    }

    fn get(&self, class: KnownClass) -> &BoundedSet<Fingerprint> {
        match class {
            KnownClass::Generic => &self.generic,
            KnownClass::PrepareBlock => &self.prepare_blocks,
            KnownClass::PrepareVote => &self.prepare_votes,
            KnownClass::ConfirmedPrepareBlock => &self.confirmed_prepare_blocks,
            KnownClass::PrepareBlockHash => &self.prepare_block_hashes,
            KnownClass::ViewChange => &self.view_changes,
            KnownClass::ViewChangeVote => &self.view_change_votes,
        }
    }
}

struct QueueSenders {
    generic: mpsc::Sender<Outbound>,
    prepare_blocks: mpsc::Sender<Outbound>,
    prepare_votes: mpsc::Sender<Outbound>,
    confirmed_prepare_blocks: mpsc::Sender<Outbound>,
    prepare_block_hashes: mpsc::Sender<Outbound>,
    view_changes: mpsc::Sender<Outbound>,
    view_change_votes: mpsc::Sender<Outbound>,
}

impl QueueSenders {
    fn get(&self, class: KnownClass) -> &mpsc::Sender<Outbound> {
        match class {
            KnownClass::Generic => &self.generic,
            KnownClass::PrepareBlock => &self.prepare_blocks,
            KnownClass::PrepareVote => &self.prepare_votes,
            KnownClass::ConfirmedPrepareBlock => &self.confirmed_prepare_blocks,
            KnownClass::PrepareBlockHash => &self.prepare_block_hashes,
            KnownClass::ViewChange => &self.view_changes,
            KnownClass::ViewChangeVote => &self.view_change_votes,
        }
    }
}

struct QueueReceivers {
    generic: mpsc::Receiver<Outbound>,
    prepare_blocks: mpsc::Receiver<Outbound>,
    prepare_votes: mpsc::Receiver<Outbound>,
    confirmed_prepare_blocks: mpsc::Receiver<Outbound>,
    prepare_block_hashes: mpsc::Receiver<Outbound>,
    view_changes: mpsc::Receiver<Outbound>,
    view_change_votes: mpsc::Receiver<Outbound>,
}

fn queues(config: &ConsensusNetConfig) -> (QueueSenders, QueueReceivers) {
    let q = &config.queues;
    let (generic_tx, generic_rx) = mpsc::channel(q.generic.max(1));
    let (pb_tx, pb_rx) = mpsc::channel(q.prepare_blocks.max(1));
    let (pv_tx, pv_rx) = mpsc::channel(q.prepare_votes.max(1));
    let (cpb_tx, cpb_rx) = mpsc::channel(q.confirmed_prepare_blocks.max(1));
    let (pbh_tx, pbh_rx) = mpsc::channel(q.prepare_block_hashes.max(1));
    let (vc_tx, vc_rx) = mpsc::channel(q.view_changes.max(1));
    let (vcv_tx, vcv_rx) = mpsc::channel(q.view_change_votes.max(1));
    (
        QueueSenders {
            generic: generic_tx,
            prepare_blocks: pb_tx,
            prepare_votes: pv_tx,
            confirmed_prepare_blocks: cpb_tx,
            prepare_block_hashes: pbh_tx,
            view_changes: vc_tx,
            view_change_votes: vcv_tx,
        },
        QueueReceivers {
            generic: generic_rx,
            prepare_blocks: pb_rx,
            prepare_votes: pv_rx,
            confirmed_prepare_blocks: cpb_rx,
            prepare_block_hashes: pbh_rx,
            view_changes: vc_rx,
            view_change_votes: vcv_rx,
        },
    )
}

/// A connected remote consensus node.
pub struct Peer {
    id: String,
    node_id: NodeId,
    rw: Arc<dyn MsgReadWriter>,
    term: CancellationToken,
    known: KnownSets,
    senders: QueueSenders,
    /// Taken by the broadcast loop when it starts.
    receivers: Mutex<Option<QueueReceivers>>,
    handshake_timeout: Duration,
    max_message_size: usize,
}

impl fmt::Debug for Peer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Peer")
            .field("id", &self.id)
            .field("closed", &self.is_closed())
            .finish()
    }
}

impl Peer {
    pub fn new(node_id: NodeId, rw: Arc<dyn MsgReadWriter>, config: &ConsensusNetConfig) -> Self {
        let (senders, receivers) = queues(config);
        Self {
            id: peer_id(&node_id),
            node_id,
            rw,
            term: CancellationToken::new(),
            known: KnownSets::new(config),
            senders,
            receivers: Mutex::new(Some(receivers)),
            handshake_timeout: config.handshake_timeout,
            max_message_size: config.max_message_size,
        }
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn node_id(&self) -> &NodeId {
        &self.node_id
    }

    // ── Known-message caches ────────────────────────────────────────────

    /// Record that the remote holds `hash` in the given class cache.
    pub fn mark_known(&self, class: KnownClass, hash: Fingerprint) {
        self.known.get(class).add(hash);
    }

    pub fn has_known(&self, class: KnownClass, hash: &Fingerprint) -> bool {
        self.known.get(class).contains(hash)
    }

    /// Entries currently held by a class cache.
    pub fn known_len(&self, class: KnownClass) -> usize {
        self.known.get(class).len()
    }

    fn mark_encoded(&self, msg: &EncodedMsg) {
        let class = msg.known_class();
        self.mark_known(class, msg.fingerprint);
        if class != KnownClass::Generic {
            self.mark_known(KnownClass::Generic, msg.fingerprint);
        }
    }

    // ── Sending ─────────────────────────────────────────────────────────

    /// Mark the message known and write it to the transport, waiting for
    /// the write to finish. Transport errors are returned unchanged.
    pub async fn send(&self, msg: &EncodedMsg) -> Result<()> {
        self.mark_encoded(msg);
        self.rw.write_msg(&msg.msg).await
    }

    /// Queue the message for the broadcast loop without waiting.
    ///
    /// Returns `false` if the class queue is full or the peer is closed, in
    /// which case the message is dropped. Never blocks.
    pub fn async_send(&self, msg: Outbound) -> bool {
        let class = msg.known_class();
        let fingerprint = msg.fingerprint;
        let msg_type = msg.msg_type;
        match self.senders.get(class).try_send(msg) {
            Ok(()) => {
                self.mark_known(class, fingerprint);
                if class != KnownClass::Generic {
                    self.mark_known(KnownClass::Generic, fingerprint);
                }
                true
            }
            Err(TrySendError::Full(_)) => {
                debug!(
                    "dropping {msg_type} {fingerprint} for peer {}: queue full",
                    self.id
                );
                false
            }
            Err(TrySendError::Closed(_)) => {
                trace!("dropping {msg_type} for closed peer {}", self.id);
                false
            }
        }
    }

    pub async fn send_prepare_block(&self, msg: &PrepareBlock) -> Result<()> {
        self.send(&EncodedMsg::new(MessageType::PrepareBlock, msg)?).await
    }

    pub fn async_send_prepare_block(&self, msg: &PrepareBlock) -> Result<bool> {
        Ok(self.async_send(Arc::new(EncodedMsg::new(MessageType::PrepareBlock, msg)?)))
    }

    pub async fn send_prepare_vote(&self, msg: &PrepareVote) -> Result<()> {
        self.send(&EncodedMsg::new(MessageType::PrepareVote, msg)?).await
    }

    pub fn async_send_prepare_vote(&self, msg: &PrepareVote) -> Result<bool> {
        Ok(self.async_send(Arc::new(EncodedMsg::new(MessageType::PrepareVote, msg)?)))
    }

    pub async fn send_confirmed_prepare_block(&self, msg: &ConfirmedPrepareBlock) -> Result<()> {
        self.send(&EncodedMsg::new(MessageType::ConfirmedPrepareBlock, msg)?)
            .await
    }

    pub fn async_send_confirmed_prepare_block(&self, msg: &ConfirmedPrepareBlock) -> Result<bool> {
        Ok(self.async_send(Arc::new(EncodedMsg::new(
            MessageType::ConfirmedPrepareBlock,
            msg,
        )?)))
    }

    pub async fn send_prepare_block_hash(&self, msg: &PrepareBlockHash) -> Result<()> {
        self.send(&EncodedMsg::new(MessageType::PrepareBlockHash, msg)?)
            .await
    }

    pub fn async_send_prepare_block_hash(&self, msg: &PrepareBlockHash) -> Result<bool> {
        Ok(self.async_send(Arc::new(EncodedMsg::new(
            MessageType::PrepareBlockHash,
            msg,
        )?)))
    }

    pub async fn send_view_change(&self, msg: &ViewChange) -> Result<()> {
        self.send(&EncodedMsg::new(MessageType::ViewChange, msg)?).await
    }

    pub fn async_send_view_change(&self, msg: &ViewChange) -> Result<bool> {
        Ok(self.async_send(Arc::new(EncodedMsg::new(MessageType::ViewChange, msg)?)))
    }

    pub async fn send_view_change_vote(&self, msg: &ViewChangeVote) -> Result<()> {
        self.send(&EncodedMsg::new(MessageType::ViewChangeVote, msg)?)
            .await
    }

    pub fn async_send_view_change_vote(&self, msg: &ViewChangeVote) -> Result<bool> {
        Ok(self.async_send(Arc::new(EncodedMsg::new(
            MessageType::ViewChangeVote,
            msg,
        )?)))
    }

    // ── Broadcast loop ──────────────────────────────────────────────────

    /// Drain the outbound queues until the peer is closed or a send fails.
    ///
    /// Each queue is delivered in FIFO order. A failed send closes the
    /// peer; whoever owns the read side notices and unregisters it.
    /// Only the first call does anything.
    pub async fn broadcast(&self) {
        let Some(mut q) = self.receivers.lock().take() else {
            debug!("broadcast loop for peer {} already started", self.id);
            return;
        };
        while !self.term.is_cancelled() {
            let next = tokio::select! {
                _ = self.term.cancelled() => break,
                Some(m) = q.prepare_blocks.recv() => m,
                Some(m) = q.prepare_votes.recv() => m,
                Some(m) = q.confirmed_prepare_blocks.recv() => m,
                Some(m) = q.prepare_block_hashes.recv() => m,
                Some(m) = q.view_changes.recv() => m,
                Some(m) = q.view_change_votes.recv() => m,
                Some(m) = q.generic.recv() => m,
                else => break,
            };
            if let Err(e) = self.send(&next).await {
                debug!("peer {} broadcast failed: {e}", self.id);
                self.term.cancel();
                break;
            }
            trace!("sent {} {} to peer {}", next.msg_type, next.fingerprint, self.id);
        }
        debug!("broadcast loop for peer {} stopped", self.id);
    }

    // ── Handshake ───────────────────────────────────────────────────────

    /// Exchange status messages with the remote.
    ///
    /// Sending our status and reading theirs run concurrently; both must
    /// finish within the handshake timeout.
    pub async fn handshake(&self, height: u64, head: Hash) -> Result<StatusData> {
        let status = Msg::status(&StatusData {
            bn: height,
            current_block: head,
        })?;
        let exchange = async { tokio::try_join!(self.rw.write_msg(&status), self.read_status()) };
        match tokio::time::timeout(self.handshake_timeout, exchange).await {
            Ok(Ok(((), remote))) => {
                debug!(
                    "handshake with peer {} done: remote head {} at {}",
                    self.id, remote.current_block, remote.bn
                );
                Ok(remote)
            }
            Ok(Err(e)) => Err(e),
            Err(_) => Err(ConsensusNetError::HandshakeTimeout(self.handshake_timeout)),
        }
    }

    async fn read_status(&self) -> Result<StatusData> {
        let msg = self.rw.read_msg().await?;
        if msg.code != MessageType::Status.code() {
            return Err(ConsensusNetError::NoStatusMsg(msg.code));
        }
        if msg.size() > self.max_message_size {
            return Err(ConsensusNetError::MessageTooLarge {
                size: msg.size(),
                max: self.max_message_size,
            });
        }
        msg.decode()
    }

    // ── Lifecycle ───────────────────────────────────────────────────────

    /// Next inbound frame from the remote.
    pub async fn read_msg(&self) -> Result<Msg> {
        self.rw.read_msg().await
    }

    /// Write a frame directly, bypassing queues and caches.
    pub async fn write_msg(&self, msg: &Msg) -> Result<()> {
        self.rw.write_msg(msg).await
    }

    /// Stop the broadcast loop and disconnect the transport. Idempotent.
    pub fn close(&self) {
        self.term.cancel();
        self.rw.disconnect();
    }

    pub fn is_closed(&self) -> bool {
        self.term.is_cancelled()
    }

    /// Resolves once the peer is closed.
    pub async fn closed(&self) {
        self.term.cancelled().await
    }
}
