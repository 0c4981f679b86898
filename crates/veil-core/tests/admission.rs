//! Admission scenarios: the challenge protocol over in-process links.

mod common;

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use common::{eventually, link, quick_config, spawn_node, ManualPeer};

use veil_core::PeerState;
use veil_crypto::unwrap_challenge;
use veil_signal::{Signal, SignalKind};
use veil_transport::memory::MemoryRtc;

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn bootstrap_pair_becomes_trusted_without_brokers() {
    let a = spawn_node(quick_config(), MemoryRtc::new());
    let b = spawn_node(quick_config(), MemoryRtc::new());

    // B chose A, so B trusts the link immediately; A must challenge first.
    link(&a, &b, false, true).await;

    assert_eq!(b.peer_state(a.hash()), Some(PeerState::Trusted));
    let b_hash = b.hash().clone();
    let a2 = a.clone();
    eventually("first peer trusted directly", move || {
        a2.peer_state(&b_hash) == Some(PeerState::Trusted)
    })
    .await;
    assert_eq!(a.peer_count(), 1);
    assert_eq!(b.peer_count(), 1);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn wrong_challenge_echo_costs_the_slot() {
    let a = spawn_node(quick_config(), MemoryRtc::new());
    let mut newcomer = ManualPeer::attach(&a).await;

    let frame = newcomer.expect_frame().await;
    assert_eq!(frame.kind(), SignalKind::SolveChallenge);
    // Echo something that is definitely not the challenge plaintext.
    newcomer
        .to_node
        .send(Signal::new(SignalKind::TestChallenge, vec![0u8; 32]))
        .await
        .unwrap();

    let a2 = a.clone();
    eventually("cheater disconnected", move || a2.peer_count() == 0).await;
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn silent_newcomer_is_dropped_at_the_deadline() {
    let a = spawn_node(quick_config(), MemoryRtc::new());
    let mut newcomer = ManualPeer::attach(&a).await;

    let frame = newcomer.expect_frame().await;
    assert_eq!(frame.kind(), SignalKind::SolveChallenge);
    // Say nothing and wait out the challenge timeout.

    let a2 = a.clone();
    eventually("silent newcomer disconnected", move || a2.peer_count() == 0).await;
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn honest_challenge_solution_is_accepted() {
    let a = spawn_node(quick_config(), MemoryRtc::new());
    let mut newcomer = ManualPeer::attach(&a).await;
    let newcomer_hash = newcomer.identity.hash().clone();

    let frame = newcomer.expect_frame().await;
    let plaintext =
        unwrap_challenge(&frame.signal.payload, newcomer.identity.private()).expect("unwrap");
    newcomer
        .to_node
        .send(Signal::new(SignalKind::TestChallenge, plaintext))
        .await
        .unwrap();

    // A has only this one peer, so verification fast-tracks to Trusted.
    let a2 = a.clone();
    eventually("honest newcomer trusted", move || {
        a2.peer_state(&newcomer_hash) == Some(PeerState::Trusted)
    })
    .await;
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn replayed_frames_are_dispatched_once() {
    let a = spawn_node(quick_config(), MemoryRtc::new());
    let b = spawn_node(quick_config(), MemoryRtc::new());
    link(&a, &b, true, true).await;

    let hits = Arc::new(AtomicUsize::new(0));
    let counted = hits.clone();
    // A live non-consuming observer: counts every dispatch it is offered.
    a.add_reaction(Duration::from_secs(30), move |income| {
        if income.kind() == SignalKind::ConnectionSecret {
            counted.fetch_add(1, Ordering::SeqCst);
        }
        false
    });

    let replayed = Signal::new(SignalKind::ConnectionSecret, vec![0xab; 32]);
    b.send(a.hash(), replayed.clone());
    b.send(a.hash(), replayed.clone());
    b.send(a.hash(), replayed);

    let observed = hits.clone();
    eventually("first copy dispatched", move || {
        observed.load(Ordering::SeqCst) >= 1
    })
    .await;
    tokio::time::sleep(Duration::from_millis(300)).await;
    assert_eq!(hits.load(Ordering::SeqCst), 1);
}
