//! Boundary scenarios: the real HTTP gateway and WebSocket bootstrap over
//! loopback.

mod common;

use std::sync::Arc;

use common::{eventually, quick_config, spawn_node};

use tokio::net::TcpListener;

use veil_core::{gateway, PeerState};
use veil_transport::memory::MemoryRtc;

async fn serve_gateway(node: &Arc<veil_core::MeshNode>) -> String {
    let listener = TcpListener::bind("127.0.0.1:0").await.expect("bind");
    let addr = listener.local_addr().expect("addr");
    let serving = Arc::clone(node);
    tokio::spawn(async move {
        let _ = gateway::serve(serving, listener).await;
    });
    format!("127.0.0.1:{}", addr.port())
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn id_endpoint_serves_the_identifier() {
    let a = spawn_node(quick_config(), MemoryRtc::new());
    let entrypoint = serve_gateway(&a).await;

    let body = reqwest::get(format!("http://{entrypoint}/id"))
        .await
        .expect("request")
        .text()
        .await
        .expect("body");
    assert_eq!(body, a.mesh().as_str());
    assert!(body.len() <= 1024);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn bootstrap_over_loopback_websocket() {
    let a = spawn_node(quick_config(), MemoryRtc::new());
    let entrypoint = serve_gateway(&a).await;

    let b = spawn_node(quick_config(), MemoryRtc::new());
    let head = b.attach(&entrypoint).await.expect("attach");
    assert_eq!(&head, a.hash());
    assert_eq!(b.peer_state(&head), Some(PeerState::Trusted));

    // A challenges over the fresh socket and, having no other peers,
    // fast-tracks B to Trusted.
    let (a2, b_hash) = (a.clone(), b.hash().clone());
    eventually("entrypoint trusts the joiner", move || {
        a2.peer_state(&b_hash) == Some(PeerState::Trusted)
    })
    .await;
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn upgrade_without_mesh_header_is_refused() {
    let a = spawn_node(quick_config(), MemoryRtc::new());
    let entrypoint = serve_gateway(&a).await;

    let result = tokio_tungstenite::connect_async(format!("ws://{entrypoint}/ws")).await;
    assert!(result.is_err(), "upgrade should be refused outright");
    assert_eq!(a.peer_count(), 0);
}
