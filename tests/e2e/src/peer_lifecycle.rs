//! E2E Test: Peer Connection Lifecycle
//!
//! Verifies how connections come and go:
//! - Two nodes exchange a proposal over loopback TCP
//! - A silent remote is dropped after the handshake timeout
//! - A second connection from an already registered node is refused
//! - Stopping a node unregisters it on the other side

use {
    cbft_consensus_net::{
        message::{Msg, StatusData},
        transport::{msg_pipe, MsgReadWriter},
        ConsensusMsg,
    },
    cbft_e2e_tests::helpers::*,
    solana_hash::Hash,
    std::{sync::Arc, time::Duration},
    tokio::net::TcpListener,
};

// ─────────────────────────────────────────────────────────────────────────────
// Test: a proposal crosses a real TCP connection intact
// ─────────────────────────────────────────────────────────────────────────────

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_prepare_block_over_tcp() {
    init_logging();
    let witnesses = vec![node(1), node(2)];
    let a = TestNode::dev(node(1), witnesses.clone());
    let b = TestNode::dev(node(2), witnesses);

    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let accept = tokio::spawn(async move { listener.accept().await.unwrap().0 });
    a.network.dial(addr, b.id).await.unwrap();
    b.network.accept(accept.await.unwrap(), a.id).unwrap();
    wait_until(|| a.peer_count() == 1 && b.peer_count() == 1).await;

    let proposal = sample_prepare_block(12, a.id);
    a.network.bus().publish_prepare_block(proposal.clone());
    let got = b.next_inbound().await.expect("B receives the proposal");
    assert_eq!(got.msg, ConsensusMsg::PrepareBlock(proposal));
    assert_eq!(got.node_id, a.id);

    a.stop().await;
    wait_until(|| b.peer_count() == 0).await;
    b.stop().await;
}

// ─────────────────────────────────────────────────────────────────────────────
// Test: a remote that never sends its status is disconnected
// ─────────────────────────────────────────────────────────────────────────────

#[tokio::test(start_paused = true)]
async fn test_silent_remote_times_out() {
    init_logging();
    let a = TestNode::dev(node(1), vec![node(1)]);
    let (local, remote) = msg_pipe(8);
    a.network.handle_peer(node(7), Arc::new(local));

    // dev_default allows 500 ms for the handshake.
    tokio::time::sleep(Duration::from_millis(400)).await;
    assert!(!remote.is_closed());
    tokio::time::sleep(Duration::from_millis(200)).await;
    assert!(remote.is_closed());
    assert_eq!(a.peer_count(), 0);
}

// ─────────────────────────────────────────────────────────────────────────────
// Test: the same node cannot be registered twice
// ─────────────────────────────────────────────────────────────────────────────

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_duplicate_connection_is_refused() {
    init_logging();
    let witnesses = vec![node(1), node(2)];
    let a = TestNode::dev(node(1), witnesses.clone());
    let b = TestNode::dev(node(2), witnesses);
    link(&a, &b).await;

    // A second link claiming to be B, driven by hand.
    let (local, impostor) = msg_pipe(8);
    a.network.handle_peer(b.id, Arc::new(local));
    impostor
        .write_msg(
            &Msg::status(&StatusData {
                bn: 0,
                current_block: Hash::default(),
            })
            .unwrap(),
        )
        .await
        .unwrap();
    // Our status may or may not be read before the link is torn down.
    let _ = impostor.read_msg().await;
    wait_until(|| impostor.is_closed()).await;
    assert_eq!(a.peer_count(), 1);

    // The original link still carries traffic.
    let view_change = sample_view_change(3, a.id);
    a.network.bus().publish_view_change(view_change.clone());
    let got = b.next_inbound().await.expect("original link still works");
    assert_eq!(got.msg, ConsensusMsg::ViewChange(view_change));
}

// ─────────────────────────────────────────────────────────────────────────────
// Test: stopping a node removes it from its neighbours
// ─────────────────────────────────────────────────────────────────────────────

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_stop_unregisters_on_both_sides() {
    init_logging();
    let witnesses = vec![node(1), node(2), node(3)];
    let a = TestNode::dev(node(1), witnesses.clone());
    let b = TestNode::dev(node(2), witnesses.clone());
    let c = TestNode::dev(node(3), witnesses);
    link(&a, &b).await;
    link(&a, &c).await;
    assert_eq!(a.peer_count(), 2);

    b.stop().await;
    assert_eq!(b.peer_count(), 0);
    wait_until(|| a.peer_count() == 1).await;

    // Gossip keeps flowing to the remaining peer.
    let confirmed = sample_confirmed(9);
    a.network.bus().publish_confirmed_prepare_block(confirmed.clone());
    let got = c.next_inbound().await.expect("C still receives");
    assert_eq!(got.msg, ConsensusMsg::ConfirmedPrepareBlock(confirmed));

    // A stopped node refuses new connections.
    let (local, remote) = msg_pipe(8);
    b.network.handle_peer(node(4), Arc::new(local));
    wait_until(|| remote.is_closed()).await;
}
