//! E2E Test: Gossip Routing Between Live Nodes
//!
//! Verifies who actually receives what:
//! - Mixing selection reaches every consensus peer and half the observers
//! - Consensus-only messages never reach observers
//! - A block hash already held by a peer is not re-announced
//! - Relayed messages are truncated to sqrt(n) peers and skip the origin
//! - A mesh that relays everything still delivers each vote once per node

use {
    cbft_consensus_net::{peer::peer_id, ConsensusMsg, ConsensusNetConfig, PropagationMode},
    cbft_e2e_tests::helpers::*,
    cbft_witness_rotation::RotationConfig,
    std::sync::Arc,
};

// ─────────────────────────────────────────────────────────────────────────────
// Test: a local vote reaches every consensus peer and half the observers
// ─────────────────────────────────────────────────────────────────────────────

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_mixing_vote_reaches_consensus_and_half_the_observers() {
    init_logging();
    let witnesses = vec![node(1), node(2), node(3)];
    let a = TestNode::dev(node(1), witnesses.clone());
    let b = TestNode::dev(node(2), witnesses.clone());
    let c = TestNode::dev(node(3), witnesses.clone());
    let observers: Vec<TestNode> = (10..14).map(|n| TestNode::dev(node(n), witnesses.clone())).collect();

    link(&a, &b).await;
    link(&a, &c).await;
    for o in &observers {
        link(&a, o).await;
    }
    assert_eq!(a.peer_count(), 6);

    let vote = sample_vote(1, a.id);
    assert!(a.network.bus().publish_prepare_vote(vote.clone()) > 0);

    for consensus in [&b, &c] {
        let got = consensus.next_inbound().await.expect("consensus peer gets the vote");
        assert_eq!(got.msg, ConsensusMsg::PrepareVote(vote.clone()));
        assert_eq!(got.node_id, a.id);
    }

    // 4 observers, so exactly 2 are sampled.
    wait_until(|| {
        observers
            .iter()
            .filter(|o| !o.inbound.is_empty())
            .count()
            >= 2
    })
    .await;
    settle().await;
    let reached: usize = observers.iter().map(|o| o.drain_inbound().len()).sum();
    assert_eq!(reached, 2);

    a.stop().await;
}

// ─────────────────────────────────────────────────────────────────────────────
// Test: view changes stay among consensus nodes
// ─────────────────────────────────────────────────────────────────────────────

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_view_change_is_consensus_only() {
    init_logging();
    let witnesses = vec![node(1), node(2)];
    let a = TestNode::dev(node(1), witnesses.clone());
    let b = TestNode::dev(node(2), witnesses.clone());
    let observer = TestNode::dev(node(9), witnesses.clone());
    link(&a, &b).await;
    link(&a, &observer).await;

    let view_change = sample_view_change(5, a.id);
    a.network.bus().publish_view_change(view_change.clone());

    let got = b.next_inbound().await.expect("witness gets the view change");
    assert_eq!(got.msg, ConsensusMsg::ViewChange(view_change));
    settle().await;
    assert!(observer.drain_inbound().is_empty());
}

// ─────────────────────────────────────────────────────────────────────────────
// Test: an announcement a peer already sent us is not re-announced
// ─────────────────────────────────────────────────────────────────────────────

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_known_block_hash_is_not_reannounced() {
    init_logging();
    let witnesses = vec![node(1), node(2), node(3)];
    let a = TestNode::dev(node(1), witnesses.clone());
    let b = TestNode::dev(node(2), witnesses.clone());
    let c = TestNode::dev(node(3), witnesses.clone());
    link(&a, &b).await;
    link(&a, &c).await;

    // B announces to A directly, so A records that B holds it.
    let announcement = sample_block_hash(42);
    assert!(b
        .network
        .send_to(&peer_id(&a.id), &ConsensusMsg::PrepareBlockHash(announcement.clone()))
        .unwrap());
    let got = a.next_inbound().await.expect("A receives the announcement");
    assert_eq!(got.msg, ConsensusMsg::PrepareBlockHash(announcement.clone()));

    // A's engine announces the same block: nobody hears it again.
    a.network.bus().publish_prepare_block_hash(announcement);
    settle().await;
    assert!(b.drain_inbound().is_empty());
    assert!(c.drain_inbound().is_empty());

    // A fresh announcement still goes out.
    a.network.bus().publish_prepare_block_hash(sample_block_hash(43));
    assert!(c.next_inbound().await.is_some());
}

// ─────────────────────────────────────────────────────────────────────────────
// Test: relayed votes fan out to floor(sqrt(n)) peers, never the origin
// ─────────────────────────────────────────────────────────────────────────────

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_partial_relay_fans_out_to_sqrt_peers() {
    init_logging();
    let witnesses: Vec<_> = (1..=6).map(node).collect();
    let mut relay_config = ConsensusNetConfig::dev_default();
    relay_config.relay_inbound = true;
    relay_config.relay_mode = PropagationMode::Partial;
    let hub = TestNode::start(
        node(1),
        witnesses.clone(),
        relay_config,
        RotationConfig::default(),
    );
    let origin = TestNode::dev(node(2), witnesses.clone());
    let others: Vec<TestNode> = (3..=6).map(|n| TestNode::dev(node(n), witnesses.clone())).collect();
    link(&hub, &origin).await;
    for o in &others {
        link(&hub, o).await;
    }

    let vote = sample_vote(7, origin.id);
    origin
        .network
        .send_to(
            &peer_id(&hub.id),
            &ConsensusMsg::PrepareVote(vote.clone()),
        )
        .unwrap();
    assert!(hub.next_inbound().await.is_some());

    // Four eligible peers once the origin is excluded: floor(sqrt(4)) = 2.
    wait_until(|| others.iter().filter(|o| !o.inbound.is_empty()).count() >= 2).await;
    settle().await;
    let relayed: usize = others.iter().map(|o| o.drain_inbound().len()).sum();
    assert_eq!(relayed, 2);
    assert!(origin.drain_inbound().is_empty());

    let hub_peers = Arc::clone(hub.network.peers());
    hub.stop().await;
    assert!(hub_peers.is_closed());
}

// ─────────────────────────────────────────────────────────────────────────────
// Test: a fully meshed, relaying witness set hands each vote to each engine once
// ─────────────────────────────────────────────────────────────────────────────

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_relaying_mesh_delivers_each_vote_once() {
    init_logging();
    let witnesses: Vec<_> = (1..=4).map(node).collect();
    let mut config = ConsensusNetConfig::dev_default();
    config.relay_inbound = true;
    let defaults = ConsensusNetConfig::default();
    assert!(defaults.relay_inbound);
    assert_eq!(config.relay_mode, defaults.relay_mode);

    let nodes: Vec<TestNode> = witnesses
        .iter()
        .map(|&id| TestNode::start(id, witnesses.clone(), config.clone(), RotationConfig::default()))
        .collect();
    for (i, a) in nodes.iter().enumerate() {
        for b in &nodes[i..][1..] {
            link(a, b).await;
        }
    }
    assert!(nodes.iter().all(|n| n.peer_count() == 3));

    for (number, sender) in (1u64..).zip(&nodes) {
        let vote = sample_vote(number, sender.id);
        sender.network.bus().publish_prepare_vote(vote.clone());
        for other in nodes.iter().filter(|n| n.id != sender.id) {
            let got = other.next_inbound().await.expect("every witness gets the vote");
            assert_eq!(got.msg, ConsensusMsg::PrepareVote(vote.clone()));
        }
        // Relays and echoes have had time to circulate: nothing more arrives.
        settle().await;
        for n in &nodes {
            assert!(n.drain_inbound().is_empty(), "vote {number} delivered twice");
        }
    }

    for n in &nodes {
        n.stop().await;
    }
}
