//! WebSocket links: the bootstrap hop.
//!
//! Both sides speak one binary frame per signal. The server side receives
//! an already-upgraded socket from the HTTP gateway; the client side wraps
//! the stream produced by the outbound dialler. Non-binary frames are
//! ignored; undecodable frames are dropped without disconnecting (stale
//! peers replaying old traffic are expected).

use futures::{SinkExt, StreamExt};
use tokio::sync::mpsc;

use veil_signal::{Income, Signal};

use crate::{LinkContext, LinkFactory, INBOUND_BUFFER};

/// What a websocket message contributes to the link, once the
/// backing-specific enum is peeled off.
enum Frame {
    Data(Vec<u8>),
    Close,
    Other,
}

/// Unifies the axum- and tungstenite-flavoured message enums.
trait WsMessage: Send + 'static {
    fn binary(data: Vec<u8>) -> Self;
    fn into_frame(self) -> Frame;
}

impl WsMessage for axum::extract::ws::Message {
    fn binary(data: Vec<u8>) -> Self {
        axum::extract::ws::Message::Binary(data)
    }

    fn into_frame(self) -> Frame {
        match self {
            axum::extract::ws::Message::Binary(data) => Frame::Data(data),
            axum::extract::ws::Message::Close(_) => Frame::Close,
            _ => Frame::Other,
        }
    }
}

impl WsMessage for tokio_tungstenite::tungstenite::Message {
    fn binary(data: Vec<u8>) -> Self {
        tokio_tungstenite::tungstenite::Message::Binary(data)
    }

    fn into_frame(self) -> Frame {
        match self {
            tokio_tungstenite::tungstenite::Message::Binary(data) => Frame::Data(data),
            tokio_tungstenite::tungstenite::Message::Close(_) => Frame::Close,
            _ => Frame::Other,
        }
    }
}

/// Link over a socket accepted by the HTTP gateway.
pub fn server_link(socket: axum::extract::ws::WebSocket) -> LinkFactory {
    Box::new(move |ctx| spawn_pumps(socket, ctx))
}

/// Link over a socket dialled toward an entrypoint.
pub fn client_link<S>(stream: tokio_tungstenite::WebSocketStream<S>) -> LinkFactory
where
    S: tokio::io::AsyncRead + tokio::io::AsyncWrite + Unpin + Send + 'static,
{
    Box::new(move |ctx| spawn_pumps(stream, ctx))
}

fn spawn_pumps<S, M, E>(socket: S, ctx: LinkContext) -> mpsc::Receiver<Income>
where
    S: StreamExt<Item = Result<M, E>> + SinkExt<M> + Unpin + Send + 'static,
    M: WsMessage,
    E: std::fmt::Display + Send,
    <S as futures::Sink<M>>::Error: std::fmt::Display + Send,
{
    let LinkContext { peer, mut outbox } = ctx;
    let (inbox_tx, inbox_rx) = mpsc::channel(INBOUND_BUFFER);
    let (mut sink, mut stream) = socket.split();

    let writer_peer = peer.clone();
    tokio::spawn(async move {
        while let Some(signal) = outbox.recv().await {
            if let Err(e) = sink.send(M::binary(signal.encode())).await {
                tracing::debug!(peer = %writer_peer, error = %e, "websocket write failed");
                break;
            }
        }
        // Either the slot was removed (outbox closed) or the write failed;
        // both end with a close handshake attempt.
        let _ = sink.close().await;
    });

    tokio::spawn(async move {
        while let Some(next) = stream.next().await {
            let message = match next {
                Ok(message) => message,
                Err(e) => {
                    tracing::debug!(peer = %peer, error = %e, "websocket read failed");
                    break;
                }
            };
            let data = match message.into_frame() {
                Frame::Data(data) => data,
                Frame::Close => break,
                Frame::Other => continue,
            };
            let signal = match Signal::decode(&data) {
                Ok(signal) => signal,
                Err(e) => {
                    tracing::debug!(peer = %peer, error = %e, "dropping unparseable frame");
                    continue;
                }
            };
            if inbox_tx
                .send(Income::new(peer.clone(), signal))
                .await
                .is_err()
            {
                break;
            }
        }
        // Dropping the sender terminates the slot's drain task.
    });

    inbox_rx
}
