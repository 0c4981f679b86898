//! HTTP boundary: `GET /id` and the `GET /ws` upgrade.
//!
//! The gateway exists only for bootstrap. A prospective peer fetches the
//! node's mesh identifier from `/id`, then upgrades `/ws` with its own
//! identifier in the `Mesh` header; a missing or unusable header is refused
//! before the upgrade, a full table with 503. Admission proper starts the
//! moment the socket lands in the connection table untrusted.

use std::sync::Arc;

use axum::extract::ws::WebSocketUpgrade;
use axum::extract::State;
use axum::http::{HeaderMap, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::get;
use axum::Router;
use tokio::net::TcpListener;
use tower_http::trace::TraceLayer;

use veil_crypto::{public_key_of, MeshId};
use veil_transport::websocket;

use crate::{MeshError, MeshNode};

pub fn router(node: Arc<MeshNode>) -> Router {
    Router::new()
        .route("/id", get(identifier))
        .route("/ws", get(upgrade))
        .layer(TraceLayer::new_for_http())
        .with_state(node)
}

/// Serve the gateway until the node shuts down.
pub async fn serve(node: Arc<MeshNode>, listener: TcpListener) -> Result<(), MeshError> {
    let shutdown = node.shutdown.clone();
    tracing::info!(addr = ?listener.local_addr().ok(), "gateway listening");
    axum::serve(listener, router(node))
        .with_graceful_shutdown(shutdown.cancelled_owned())
        .await?;
    Ok(())
}

async fn identifier(State(node): State<Arc<MeshNode>>) -> String {
    node.mesh().as_str().to_owned()
}

async fn upgrade(
    State(node): State<Arc<MeshNode>>,
    headers: HeaderMap,
    ws: WebSocketUpgrade,
) -> Response {
    let mesh = headers
        .get("Mesh")
        .and_then(|value| value.to_str().ok())
        .map(str::trim)
        .filter(|value| !value.is_empty());
    let Some(mesh) = mesh else {
        tracing::warn!("upgrade without a Mesh header refused");
        return StatusCode::BAD_REQUEST.into_response();
    };
    let mesh = MeshId::new(mesh);
    if public_key_of(&mesh).is_err() {
        tracing::warn!("upgrade with an unusable Mesh header refused");
        return StatusCode::BAD_REQUEST.into_response();
    }
    if node.peer_count() >= node.config().slot_capacity {
        tracing::warn!("upgrade refused: no free slot");
        return StatusCode::SERVICE_UNAVAILABLE.into_response();
    }

    ws.on_upgrade(move |socket| async move {
        if let Err(e) = node
            .add_peer(mesh, false, websocket::server_link(socket))
            .await
        {
            tracing::warn!(error = %e, "inbound peer could not be seated");
        }
    })
}
