//! The set of registered peers.
//!
//! [`PeerSet`] is the single source of truth for "who are we talking to?".
//! Registration starts a peer's broadcast loop; unregistration and
//! [`close`](PeerSet::close) shut peers down. All queries return snapshots,
//! so callers never iterate while holding the lock.

use {
    crate::{
        error::{ConsensusNetError, Result},
        message::KnownClass,
        peer::Peer,
        Fingerprint,
    },
    log::{debug, info},
    parking_lot::RwLock,
    std::{collections::HashMap, sync::Arc, time::Duration},
    tokio::task::JoinHandle,
    tokio_util::sync::CancellationToken,
};

#[derive(Debug, Default)]
struct Inner {
    peers: HashMap<String, Arc<Peer>>,
    closed: bool,
}

/// Registered peers keyed by their short id.
#[derive(Debug)]
pub struct PeerSet {
    inner: RwLock<Inner>,
    max_peers: usize,
    /// Cancelled on [`close`](PeerSet::close); stops the reporter.
    shutdown: CancellationToken,
}

impl PeerSet {
    pub fn new(max_peers: usize) -> Self {
        Self {
            inner: RwLock::new(Inner::default()),
            max_peers,
            shutdown: CancellationToken::new(),
        }
    }

    /// Add a peer and spawn its broadcast loop.
    ///
    /// Fails if the set is closed or full, or if a peer with the same id is
    /// already registered.
    pub fn register(&self, peer: Arc<Peer>) -> Result<()> {
        {
            let mut inner = self.inner.write();
            if inner.closed {
                return Err(ConsensusNetError::PeerSetClosed);
            }
            if inner.peers.contains_key(peer.id()) {
                return Err(ConsensusNetError::AlreadyRegistered(peer.id().to_string()));
            }
            if inner.peers.len() >= self.max_peers {
                return Err(ConsensusNetError::MaxPeersReached(self.max_peers));
            }
            inner.peers.insert(peer.id().to_string(), peer.clone());
        }
        info!("registered peer {}", peer.id());
        tokio::spawn(async move { peer.broadcast().await });
        Ok(())
    }

    /// Remove and close a peer.
    pub fn unregister(&self, id: &str) -> Result<()> {
        let Some(peer) = self.inner.write().peers.remove(id) else {
            return Err(ConsensusNetError::NotRegistered(id.to_string()));
        };
        peer.close();
        info!("unregistered peer {id}");
        Ok(())
    }

    pub fn get(&self, id: &str) -> Result<Arc<Peer>> {
        self.inner
            .read()
            .peers
            .get(id)
            .cloned()
            .ok_or_else(|| ConsensusNetError::NotRegistered(id.to_string()))
    }

    /// Snapshot of every registered peer.
    pub fn peers(&self) -> Vec<Arc<Peer>> {
        self.inner.read().peers.values().cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.inner.read().peers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Snapshot of peers whose `class` cache does not hold `hash`.
    pub fn peers_without(&self, class: KnownClass, hash: &Fingerprint) -> Vec<Arc<Peer>> {
        self.inner
            .read()
            .peers
            .values()
            .filter(|p| !p.has_known(class, hash))
            .cloned()
            .collect()
    }

    pub fn peers_without_prepare_block(&self, hash: &Fingerprint) -> Vec<Arc<Peer>> {
        self.peers_without(KnownClass::PrepareBlock, hash)
    }

    pub fn peers_without_prepare_vote(&self, hash: &Fingerprint) -> Vec<Arc<Peer>> {
        self.peers_without(KnownClass::PrepareVote, hash)
    }

    pub fn peers_without_confirmed_prepare_block(&self, hash: &Fingerprint) -> Vec<Arc<Peer>> {
        self.peers_without(KnownClass::ConfirmedPrepareBlock, hash)
    }

    pub fn peers_without_prepare_block_hash(&self, hash: &Fingerprint) -> Vec<Arc<Peer>> {
        self.peers_without(KnownClass::PrepareBlockHash, hash)
    }

    pub fn peers_without_view_change(&self, hash: &Fingerprint) -> Vec<Arc<Peer>> {
        self.peers_without(KnownClass::ViewChange, hash)
    }

    pub fn peers_without_view_change_vote(&self, hash: &Fingerprint) -> Vec<Arc<Peer>> {
        self.peers_without(KnownClass::ViewChangeVote, hash)
    }

    /// Disconnect every peer and refuse further registrations. Terminal.
    pub fn close(&self) {
        let mut inner = self.inner.write();
        for peer in inner.peers.values() {
            peer.close();
        }
        inner.peers.clear();
        inner.closed = true;
        self.shutdown.cancel();
        info!("peer set closed");
    }

    pub fn is_closed(&self) -> bool {
        self.inner.read().closed
    }

    /// Spawn a task that logs the peer population every `interval` until
    /// the set is closed. Diagnostic only.
    pub fn spawn_reporter(self: &Arc<Self>, interval: Duration) -> JoinHandle<()> {
        let set = Arc::clone(self);
        let shutdown = self.shutdown.clone();
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            loop {
                tokio::select! {
                    biased;
                    _ = shutdown.cancelled() => break,
                    _ = ticker.tick() => {
                        let mut ids: Vec<String> =
                            set.peers().iter().map(|p| p.id().to_string()).collect();
                        ids.sort_unstable();
                        debug!("current peers: {} {:?}", ids.len(), ids);
                    }
                }
            }
        })
    }
}
