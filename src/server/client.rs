//! Per-client transport plumbing.
//!
//! Each accepted WebSocket gets a reader half (forwarding frames into the
//! core event queue) and a writer half (draining the client's outbound
//! queue). Neither half touches shared state; the core loop is the only
//! place client bookkeeping happens.

use futures_util::{SinkExt, StreamExt};
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::sync::mpsc;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::WebSocketStream;

use super::ServerEvent;

/// Opaque comparable client identity, issued by the accept loop.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ClientId(pub u64);

impl std::fmt::Display for ClientId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Outbound frame sender for one client.
///
/// Sends are fire-and-forget: once the connection is gone the queue
/// receiver is dropped and frames destined for the dead client vanish,
/// which is exactly the contract for in-flight results of a disconnected
/// caller.
#[derive(Debug, Clone)]
pub struct ClientSink {
    tx: mpsc::UnboundedSender<Message>,
}

impl ClientSink {
    /// Wrap an outbound queue sender.
    pub fn new(tx: mpsc::UnboundedSender<Message>) -> Self {
        Self { tx }
    }

    /// Queue a text frame.
    pub fn send_text(&self, text: String) {
        let _ = self.tx.send(Message::Text(text));
    }

    /// Queue a binary frame.
    pub fn send_binary(&self, data: Vec<u8>) {
        let _ = self.tx.send(Message::Binary(data));
    }
}

/// Drive one client connection until either side hangs up.
///
/// Announces the client to the core loop, pumps inbound frames into the
/// event queue in arrival order (preserving the binary-before-RPC ordering
/// the blob protocol depends on), and reports the disconnect at the end.
pub async fn run_connection<S>(
    ws: WebSocketStream<S>,
    id: ClientId,
    events: mpsc::UnboundedSender<ServerEvent>,
) where
    S: AsyncRead + AsyncWrite + Unpin,
{
    let (mut ws_tx, mut ws_rx) = ws.split();
    let (tx, mut rx) = mpsc::unbounded_channel();
    if events
        .send(ServerEvent::Connected { id, sink: ClientSink::new(tx) })
        .is_err()
    {
        return;
    }

    let writer = async {
        while let Some(message) = rx.recv().await {
            if ws_tx.send(message).await.is_err() {
                break;
            }
        }
    };

    let reader = async {
        while let Some(frame) = ws_rx.next().await {
            match frame {
                Ok(Message::Text(text)) => {
                    if events.send(ServerEvent::Text { id, text }).is_err() {
                        break;
                    }
                }
                Ok(Message::Binary(data)) => {
                    if events.send(ServerEvent::Binary { id, data }).is_err() {
                        break;
                    }
                }
                Ok(Message::Close(_)) => break,
                // Ping/pong are answered by tungstenite itself.
                Ok(_) => {}
                Err(err) => {
                    log::debug!("[server] client {id}: read error: {err}");
                    break;
                }
            }
        }
    };

    // The reader finishing (close frame, error, EOF) ends the connection;
    // the writer is torn down with it and any still-queued frames for the
    // dead client are discarded.
    tokio::select! {
        () = reader => {}
        () = writer => {}
    }

    let _ = events.send(ServerEvent::Disconnected { id });
}
