//! E2E Test: Witness Rotation Drives Routing
//!
//! Verifies that epoch transitions change who counts as a consensus peer:
//! - Elect and switch a new witness set from staking deposits
//! - Previous witnesses keep receiving consensus-only traffic for one epoch
//! - Nodes that dropped out of both lists stop receiving it
//! - A failed switch leaves routing untouched

use {
    cbft_consensus_net::{ConsensusMsg, ConsensusNetConfig},
    cbft_e2e_tests::helpers::*,
    cbft_witness_rotation::{Candidate, RotationConfig, RotationStep},
};

fn candidate(n: u8, deposit: u64) -> Candidate {
    Candidate {
        node_id: node(n),
        owner: node(n),
        deposit,
        block_number: 1,
        fee_bps: 500,
    }
}

/// Feed heights `from..=to` into the rotation and return the non-idle steps.
fn advance(net: &TestNode, from: u64, to: u64) -> Vec<(u64, RotationStep)> {
    (from..=to)
        .filter_map(|h| {
            let step = net.rotation.advance(&(), h, i64::try_from(h).unwrap());
            (step != RotationStep::Idle).then_some((h, step))
        })
        .collect()
}

// ─────────────────────────────────────────────────────────────────────────────
// Test: two epochs of rotation, observed through view-change delivery
// ─────────────────────────────────────────────────────────────────────────────

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_rotation_moves_consensus_traffic() {
    init_logging();
    let genesis = vec![node(1), node(2)];
    let a = TestNode::start(
        node(1),
        genesis.clone(),
        ConsensusNetConfig::dev_default(),
        RotationConfig {
            epoch_length: 10,
            election_distance: 2,
        },
    );
    let peers: Vec<TestNode> = (2..=5).map(|n| TestNode::dev(node(n), genesis.clone())).collect();
    for p in &peers {
        link(&a, p).await;
    }
    let (b, c, d, e) = (&peers[0], &peers[1], &peers[2], &peers[3]);

    // Epoch 1: C and D stake the most.
    for (n, deposit) in [(3, 300), (4, 200), (5, 100)] {
        a.rotation.set_candidate(&(), candidate(n, deposit)).unwrap();
    }
    assert_eq!(
        advance(&a, 1, 10),
        vec![(8, RotationStep::Elected(2)), (10, RotationStep::Switched)]
    );
    assert_eq!(a.rotation.primary_nodes(), vec![node(3), node(4)]);
    assert_eq!(a.rotation.formerly_nodes(), genesis);
    assert_eq!(a.rotation.last_cycle_block_num(), 10);

    // B (formerly) and C, D (primary) hear view changes; E does not.
    let vc = sample_view_change(10, a.id);
    a.network.bus().publish_view_change(vc.clone());
    for p in [b, c, d] {
        let got = p.next_inbound().await.expect("consensus peer gets the view change");
        assert_eq!(got.msg, ConsensusMsg::ViewChange(vc.clone()));
    }
    settle().await;
    assert!(e.drain_inbound().is_empty());

    // Epoch 2: E outbids everyone.
    a.rotation.set_candidate(&(), candidate(5, 1_000)).unwrap();
    assert_eq!(
        advance(&a, 11, 20),
        vec![(18, RotationStep::Elected(2)), (20, RotationStep::Switched)]
    );
    assert_eq!(a.rotation.primary_nodes(), vec![node(5), node(3)]);
    assert_eq!(a.rotation.formerly_nodes(), vec![node(3), node(4)]);

    let vc = sample_view_change(20, a.id);
    a.network.bus().publish_view_change(vc.clone());
    for p in [c, d, e] {
        let got = p.next_inbound().await.expect("consensus peer gets the view change");
        assert_eq!(got.msg, ConsensusMsg::ViewChange(vc.clone()));
    }
    settle().await;
    assert!(b.drain_inbound().is_empty());

    a.stop().await;
}

// ─────────────────────────────────────────────────────────────────────────────
// Test: an election with no candidates cannot rotate the witnesses away
// ─────────────────────────────────────────────────────────────────────────────

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_empty_election_keeps_witnesses() {
    init_logging();
    let genesis = vec![node(1), node(2)];
    let a = TestNode::start(
        node(1),
        genesis.clone(),
        ConsensusNetConfig::dev_default(),
        RotationConfig {
            epoch_length: 10,
            election_distance: 2,
        },
    );
    let b = TestNode::dev(node(2), genesis.clone());
    link(&a, &b).await;

    assert_eq!(
        advance(&a, 1, 12),
        vec![
            (8, RotationStep::Elected(0)),
            (10, RotationStep::SwitchFailed),
            (11, RotationStep::SwitchFailed),
            (12, RotationStep::SwitchFailed),
        ]
    );
    assert_eq!(a.rotation.primary_nodes(), genesis);
    assert_eq!(a.rotation.last_cycle_block_num(), 0);

    let vc = sample_view_change(12, a.id);
    a.network.bus().publish_view_change(vc.clone());
    let got = b.next_inbound().await.expect("witness still reachable");
    assert_eq!(got.msg, ConsensusMsg::ViewChange(vc));
}
