//! WebSocket front-end for the signaling handler.
//!
//! One task per connection reads text frames and feeds the handler; a second
//! task per connection drains the outbound channel onto the socket, so all
//! sends to one client are written by a single writer in submission order.

use std::io;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use futures_util::{SinkExt, StreamExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::mpsc;
use tokio_tungstenite::tungstenite::handshake::server::{ErrorResponse, Request, Response};
use tokio_tungstenite::tungstenite::http::StatusCode;
use tokio_tungstenite::tungstenite::protocol::WebSocketConfig;
use tokio_tungstenite::tungstenite::{self, Message};

use crate::handler::CallHandler;
use crate::media::PipelineFactory;
use crate::session::{ConnId, Connection};

// ============================================================================
// Constants
// ============================================================================

/// Endpoint path clients connect to.
pub const SIGNALING_PATH: &str = "/call";

/// Maximum accepted text-frame size (SDP payloads fit comfortably).
pub const MAX_TEXT_MESSAGE_SIZE: usize = 32 * 1024;

// ============================================================================
// Server
// ============================================================================

/// Accepts WebSocket connections and dispatches their frames to a
/// [`CallHandler`].
pub struct SignalingServer {
    listener: TcpListener,
    handler: Arc<CallHandler>,
    next_conn_id: AtomicU64,
}

impl SignalingServer {
    /// Bind the listening socket; calls are negotiated through `factory`.
    pub async fn bind(addr: &str, factory: Arc<dyn PipelineFactory>) -> io::Result<Self> {
        let listener = TcpListener::bind(addr).await?;
        log::info!("Signaling server listening on {}", listener.local_addr()?);
        Ok(SignalingServer {
            listener,
            handler: Arc::new(CallHandler::new(factory)),
            next_conn_id: AtomicU64::new(1),
        })
    }

    pub fn local_addr(&self) -> io::Result<SocketAddr> {
        self.listener.local_addr()
    }

    pub fn handler(&self) -> Arc<CallHandler> {
        self.handler.clone()
    }

    /// Accept connections until the listener fails.
    pub async fn run(self) -> io::Result<()> {
        loop {
            let (stream, peer_addr) = self.listener.accept().await?;
            let conn_id = self.next_conn_id.fetch_add(1, Ordering::Relaxed);
            log::info!("New connection from {} (conn={})", peer_addr, conn_id);

            let handler = self.handler.clone();
            tokio::spawn(async move {
                if let Err(e) = handle_connection(&handler, stream, conn_id).await {
                    log::debug!("Connection {} ended with error: {}", conn_id, e);
                }
                handler.connection_closed(conn_id).await;
                log::info!("Connection {} closed", conn_id);
            });
        }
    }
}

// ============================================================================
// Per-Connection Tasks
// ============================================================================

async fn handle_connection(
    handler: &CallHandler,
    stream: TcpStream,
    conn_id: ConnId,
) -> tungstenite::Result<()> {
    let check_path = |request: &Request, response: Response| {
        if request.uri().path() == SIGNALING_PATH {
            Ok(response)
        } else {
            log::debug!(
                "Rejecting connection {} on path '{}'",
                conn_id,
                request.uri().path()
            );
            let mut not_found = ErrorResponse::new(Some("not found".to_owned()));
            *not_found.status_mut() = StatusCode::NOT_FOUND;
            Err(not_found)
        }
    };
    let config = WebSocketConfig::default().max_message_size(Some(MAX_TEXT_MESSAGE_SIZE));

    let ws =
        tokio_tungstenite::accept_hdr_async_with_config(stream, check_path, Some(config)).await?;
    let (mut ws_writer, mut ws_reader) = ws.split();

    let (outbound, mut outbound_rx) = mpsc::unbounded_channel();
    let conn = Connection::new(conn_id, outbound);

    // Single writer: everything queued for this client leaves through here.
    let writer = tokio::spawn(async move {
        while let Some(message) = outbound_rx.recv().await {
            let text = match serde_json::to_string(&message) {
                Ok(text) => text,
                Err(e) => {
                    log::error!("Failed to encode outbound message: {}", e);
                    continue;
                }
            };
            log::trace!("conn={} tx: {}", conn_id, text);
            if ws_writer.send(Message::text(text)).await.is_err() {
                break;
            }
        }
    });

    let result = loop {
        match ws_reader.next().await {
            Some(Ok(Message::Text(text))) => handler.handle_message(&conn, text.as_str()).await,
            Some(Ok(Message::Close(_))) | None => break Ok(()),
            // Pings are answered by tungstenite; binary frames are not part
            // of the protocol.
            Some(Ok(_)) => {}
            Some(Err(e)) => break Err(e),
        }
    };

    drop(conn);
    writer.abort();
    result
}
