//! Outbound bootstrap: fetch an entrypoint's identity, dial its WebSocket.
//!
//! The bootstrap slot is created Trusted (we chose this contact), and the
//! entrypoint will immediately challenge us in return.

use std::sync::Arc;

use http::header::HeaderValue;
use tokio_tungstenite::tungstenite::client::IntoClientRequest;

use veil_crypto::{public_key_of, MeshHash, MeshId};
use veil_transport::websocket;

use crate::{MeshError, MeshNode};

/// Upper bound on the `/id` body; identifiers are well under this.
const MAX_IDENTIFIER_LEN: usize = 1024;

pub(crate) async fn attach(
    node: &Arc<MeshNode>,
    entrypoint: &str,
) -> Result<MeshHash, MeshError> {
    if node.peer_count() >= node.config.slot_capacity {
        return Err(MeshError::BusySlots);
    }

    tracing::debug!(entrypoint, "fetching entrypoint identity");
    let response = reqwest::get(format!("http://{entrypoint}/id"))
        .await
        .map_err(|e| MeshError::Bootstrap(format!("fetching /id: {e}")))?;
    if !response.status().is_success() {
        return Err(MeshError::Bootstrap(format!(
            "/id answered {}",
            response.status()
        )));
    }
    let body = response
        .bytes()
        .await
        .map_err(|e| MeshError::Bootstrap(format!("reading /id: {e}")))?;
    if body.len() > MAX_IDENTIFIER_LEN {
        return Err(MeshError::Bootstrap("identifier too long".to_string()));
    }
    let mesh = std::str::from_utf8(&body)
        .map_err(|_| MeshError::Bootstrap("identifier is not utf-8".to_string()))?
        .trim();
    let mesh = MeshId::new(mesh);
    public_key_of(&mesh)?;

    let mut request = format!("ws://{entrypoint}/ws")
        .into_client_request()
        .map_err(|e| MeshError::Bootstrap(format!("bad entrypoint: {e}")))?;
    request.headers_mut().insert(
        "Mesh",
        HeaderValue::from_str(node.mesh().as_str())
            .map_err(|e| MeshError::Bootstrap(format!("own identifier unusable: {e}")))?,
    );
    let (stream, _) = tokio_tungstenite::connect_async(request)
        .await
        .map_err(|e| MeshError::Bootstrap(format!("dialling /ws: {e}")))?;

    tracing::info!(entrypoint, head = %mesh.hash(), "attached to entrypoint");
    node.add_peer(mesh, true, websocket::client_link(stream)).await
}
