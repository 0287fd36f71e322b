//! Typed event feeds between the BFT engine and the router.
//!
//! The engine publishes what it produced (a proposal, a vote, ...) on the
//! [`EventBus`]; the router subscribes one loop per event type and gossips
//! each event to the network. Publishing never blocks: a subscriber whose
//! buffer is full misses the event.
//!
//! Unsubscribing is dropping the receiver. [`EventBus::close`] drops every
//! sender, which ends every subscriber loop.

use {
    crate::message::{
        ConfirmedPrepareBlock, ConsensusMsg, PrepareBlock, PrepareBlockHash, PrepareVote,
        ViewChange, ViewChangeVote,
    },
    log::debug,
    parking_lot::Mutex,
    tokio::sync::mpsc::{self, error::TrySendError},
};

// ── Events ──────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewPrepareBlockEvent {
    pub prepare_block: PrepareBlock,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewPrepareVoteEvent {
    pub prepare_vote: PrepareVote,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewConfirmedPrepareBlockEvent {
    pub confirmed_prepare_block: ConfirmedPrepareBlock,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewPrepareBlockHashEvent {
    pub prepare_block_hash: PrepareBlockHash,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewViewChangeEvent {
    pub view_change: ViewChange,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewViewChangeVoteEvent {
    pub view_change_vote: ViewChangeVote,
}

impl From<NewPrepareBlockEvent> for ConsensusMsg {
    fn from(event: NewPrepareBlockEvent) -> Self {
        Self::PrepareBlock(event.prepare_block)
    }
}

impl From<NewPrepareVoteEvent> for ConsensusMsg {
    fn from(event: NewPrepareVoteEvent) -> Self {
        Self::PrepareVote(event.prepare_vote)
    }
}

impl From<NewConfirmedPrepareBlockEvent> for ConsensusMsg {
    fn from(event: NewConfirmedPrepareBlockEvent) -> Self {
        Self::ConfirmedPrepareBlock(event.confirmed_prepare_block)
    }
}

impl From<NewPrepareBlockHashEvent> for ConsensusMsg {
    fn from(event: NewPrepareBlockHashEvent) -> Self {
        Self::PrepareBlockHash(event.prepare_block_hash)
    }
}

impl From<NewViewChangeEvent> for ConsensusMsg {
    fn from(event: NewViewChangeEvent) -> Self {
        Self::ViewChange(event.view_change)
    }
}

impl From<NewViewChangeVoteEvent> for ConsensusMsg {
    fn from(event: NewViewChangeVoteEvent) -> Self {
        Self::ViewChangeVote(event.view_change_vote)
    }
}

// ── Feed ────────────────────────────────────────────────────────────────────

#[derive(Debug)]
struct FeedState<T> {
    subscribers: Vec<mpsc::Sender<T>>,
    closed: bool,
}

/// A one-to-many feed of `T`.
#[derive(Debug)]
pub struct EventFeed<T> {
    name: &'static str,
    state: Mutex<FeedState<T>>,
}

impl<T: Clone> EventFeed<T> {
    pub fn new(name: &'static str) -> Self {
        Self {
            name,
            state: Mutex::new(FeedState {
                subscribers: Vec::new(),
                closed: false,
            }),
        }
    }

    /// Register a subscriber buffering up to `capacity` events. On a closed
    /// feed the returned receiver is already finished.
    pub fn subscribe(&self, capacity: usize) -> mpsc::Receiver<T> {
        let (tx, rx) = mpsc::channel(capacity.max(1));
        let mut state = self.state.lock();
        if !state.closed {
            state.subscribers.push(tx);
        }
        rx
    }

    /// Deliver `event` to every subscriber with room for it and return how
    /// many received it. Subscribers that went away are pruned.
    pub fn send(&self, event: T) -> usize {
        let mut state = self.state.lock();
        let mut delivered = 0usize;
        state.subscribers.retain(|tx| match tx.try_send(event.clone()) {
            Ok(()) => {
                delivered = delivered.saturating_add(1);
                true
            }
            Err(TrySendError::Full(_)) => {
                debug!("{} subscriber full, dropping event", self.name);
                true
            }
            Err(TrySendError::Closed(_)) => false,
        });
        delivered
    }

    pub fn subscriber_count(&self) -> usize {
        self.state.lock().subscribers.len()
    }

    /// Drop every subscriber sender and refuse new subscriptions.
    pub fn close(&self) {
        let mut state = self.state.lock();
        state.subscribers.clear();
        state.closed = true;
    }
}

// ── Bus ─────────────────────────────────────────────────────────────────────

/// One feed per event type produced by the BFT engine.
#[derive(Debug)]
pub struct EventBus {
    pub prepare_blocks: EventFeed<NewPrepareBlockEvent>,
    pub prepare_votes: EventFeed<NewPrepareVoteEvent>,
    pub confirmed_prepare_blocks: EventFeed<NewConfirmedPrepareBlockEvent>,
    pub prepare_block_hashes: EventFeed<NewPrepareBlockHashEvent>,
    pub view_changes: EventFeed<NewViewChangeEvent>,
    pub view_change_votes: EventFeed<NewViewChangeVoteEvent>,
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new()
    }
}

impl EventBus {
    pub fn new() -> Self {
        Self {
            prepare_blocks: EventFeed::new("prepare_block"),
            prepare_votes: EventFeed::new("prepare_vote"),
            confirmed_prepare_blocks: EventFeed::new("confirmed_prepare_block"),
            prepare_block_hashes: EventFeed::new("prepare_block_hash"),
            view_changes: EventFeed::new("view_change"),
            view_change_votes: EventFeed::new("view_change_vote"),
        }
    }

    pub fn publish_prepare_block(&self, prepare_block: PrepareBlock) -> usize {
        self.prepare_blocks
            .send(NewPrepareBlockEvent { prepare_block })
    }

    pub fn publish_prepare_vote(&self, prepare_vote: PrepareVote) -> usize {
        self.prepare_votes.send(NewPrepareVoteEvent { prepare_vote })
    }

    pub fn publish_confirmed_prepare_block(
        &self,
        confirmed_prepare_block: ConfirmedPrepareBlock,
    ) -> usize {
        self.confirmed_prepare_blocks
            .send(NewConfirmedPrepareBlockEvent {
                confirmed_prepare_block,
            })
    }

    pub fn publish_prepare_block_hash(&self, prepare_block_hash: PrepareBlockHash) -> usize {
        self.prepare_block_hashes
            .send(NewPrepareBlockHashEvent { prepare_block_hash })
    }

    pub fn publish_view_change(&self, view_change: ViewChange) -> usize {
        self.view_changes.send(NewViewChangeEvent { view_change })
    }

    pub fn publish_view_change_vote(&self, view_change_vote: ViewChangeVote) -> usize {
        self.view_change_votes
            .send(NewViewChangeVoteEvent { view_change_vote })
    }

    pub fn close(&self) {
        self.prepare_blocks.close();
        self.prepare_votes.close();
        self.confirmed_prepare_blocks.close();
        self.prepare_block_hashes.close();
        self.view_changes.close();
        self.view_change_votes.close();
    }
}
