//! Shared scaffolding for multi-node scenarios.
#![allow(dead_code)]

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::mpsc;

use veil_core::{MeshNode, NodeConfig};
use veil_crypto::Identity;
use veil_signal::{Income, Signal};
use veil_transport::memory::memory_link_pair;
use veil_transport::{LinkContext, RtcConnector};

/// Protocol timeouts shrunk so failure paths settle in milliseconds.
pub fn quick_config() -> NodeConfig {
    NodeConfig {
        workers: 2,
        challenge_timeout: Duration::from_millis(500),
        invite_collect_timeout: Duration::from_millis(1500),
        broker_latch_timeout: Duration::from_millis(1500),
        settle_unit: Duration::from_millis(1500),
        broker_offer_timeout: Duration::from_millis(1500),
        answer_timeout: Duration::from_millis(1500),
        secret_timeout: Duration::from_millis(1000),
        ..NodeConfig::default()
    }
}

pub fn spawn_node(config: NodeConfig, connector: Arc<dyn RtcConnector>) -> Arc<MeshNode> {
    let identity = Identity::generate().expect("keygen");
    let node = MeshNode::new(identity, config, connector);
    node.start();
    node
}

/// Wire two nodes together over an in-process link.
pub async fn link(
    left: &Arc<MeshNode>,
    right: &Arc<MeshNode>,
    left_trusts_right: bool,
    right_trusts_left: bool,
) {
    let (left_side, right_side) = memory_link_pair();
    left.add_peer(right.mesh().clone(), left_trusts_right, left_side)
        .await
        .expect("left seat");
    right
        .add_peer(left.mesh().clone(), right_trusts_left, right_side)
        .await
        .expect("right seat");
}

/// A scripted peer the tests steer by hand: one link half toward a real
/// node, with raw access to both directions.
pub struct ManualPeer {
    pub identity: Identity,
    pub to_node: mpsc::Sender<Signal>,
    pub from_node: mpsc::Receiver<Income>,
}

impl ManualPeer {
    /// Attach a scripted peer to `node` as an untrusted inbound contact.
    pub async fn attach(node: &Arc<MeshNode>) -> Self {
        let identity = Identity::generate().expect("keygen");
        let (node_side, manual_side) = memory_link_pair();
        node.add_peer(identity.mesh().clone(), false, node_side)
            .await
            .expect("seat");

        let (to_node, outbox) = mpsc::channel(16);
        let from_node = manual_side(LinkContext {
            peer: node.hash().clone(),
            outbox,
        });
        Self {
            identity,
            to_node,
            from_node,
        }
    }

    pub async fn expect_frame(&mut self) -> Income {
        tokio::time::timeout(Duration::from_secs(5), self.from_node.recv())
            .await
            .expect("frame within deadline")
            .expect("link still up")
    }
}

/// Poll until `condition` holds or a generous deadline passes.
pub async fn eventually(what: &str, mut condition: impl FnMut() -> bool) {
    for _ in 0..400 {
        if condition() {
            return;
        }
        tokio::time::sleep(Duration::from_millis(25)).await;
    }
    panic!("never happened: {what}");
}

/// Assert `condition` keeps holding for a little while.
pub async fn consistently(what: &str, mut condition: impl FnMut() -> bool) {
    for _ in 0..20 {
        if !condition() {
            panic!("stopped holding: {what}");
        }
        tokio::time::sleep(Duration::from_millis(25)).await;
    }
}
