//! Per-connection and per-user session state.
//!
//! A [`Connection`] is the transport-facing half: an identifier plus the
//! single-writer outbound channel for that socket. A [`UserSession`] wraps a
//! connection once a name is attached and carries the call state: the pending
//! SDP offer, the call-partner linkage, the assigned media endpoint, and the
//! ICE candidates buffered until that endpoint exists.

use std::sync::{Arc, Mutex, MutexGuard};

use tokio::sync::mpsc::UnboundedSender;
use tokio::sync::Mutex as AsyncMutex;

use crate::media::MediaEndpoint;
use crate::protocol::{IceCandidate, ServerMessage};

/// Opaque connection identifier, stable for the connection's lifetime.
pub type ConnId = u64;

// ============================================================================
// Connection
// ============================================================================

/// Handle to one client connection's outbound message path.
///
/// Cloneable; all clones feed the same writer task, which drains the channel
/// in submission order so messages to one connection never interleave.
#[derive(Clone)]
pub struct Connection {
    id: ConnId,
    outbound: UnboundedSender<ServerMessage>,
}

impl Connection {
    pub fn new(id: ConnId, outbound: UnboundedSender<ServerMessage>) -> Self {
        Connection { id, outbound }
    }

    pub fn id(&self) -> ConnId {
        self.id
    }

    /// Enqueue a message for delivery.
    ///
    /// A closed connection is not an error of the signaling core: the message
    /// is dropped and the loss is logged.
    pub fn send(&self, message: ServerMessage) {
        if self.outbound.send(message).is_err() {
            log::debug!("Connection {} is gone; dropping outbound message", self.id);
        }
    }
}

// ============================================================================
// User Session
// ============================================================================

#[derive(Default)]
struct CallFields {
    sdp_offer: Option<String>,
    calling_to: Option<String>,
    calling_from: Option<String>,
}

#[derive(Default)]
struct MediaFields {
    endpoint: Option<Arc<dyn MediaEndpoint>>,
    pending_candidates: Vec<IceCandidate>,
}

/// A participant: a named connection plus its call state.
pub struct UserSession {
    conn: Connection,
    name: String,
    call: Mutex<CallFields>,
    media: AsyncMutex<MediaFields>,
}

impl UserSession {
    pub fn new(conn: Connection, name: impl Into<String>) -> Self {
        UserSession {
            conn,
            name: name.into(),
            call: Mutex::new(CallFields::default()),
            media: AsyncMutex::new(MediaFields::default()),
        }
    }

    pub fn id(&self) -> ConnId {
        self.conn.id()
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Deliver a protocol message to this participant.
    pub fn send(&self, message: ServerMessage) {
        log::debug!("Sending message to user '{}': {:?}", self.name, message);
        self.conn.send(message);
    }

    pub fn set_sdp_offer(&self, offer: impl Into<String>) {
        self.call_fields().sdp_offer = Some(offer.into());
    }

    pub fn sdp_offer(&self) -> Option<String> {
        self.call_fields().sdp_offer.clone()
    }

    /// Mark this session as calling `peer`. A session is either calling or
    /// being called, never both, so the opposite direction is dropped.
    pub fn set_calling_to(&self, peer: &str) {
        let mut call = self.call_fields();
        call.calling_to = Some(peer.to_owned());
        call.calling_from = None;
    }

    pub fn calling_to(&self) -> Option<String> {
        self.call_fields().calling_to.clone()
    }

    /// Mark this session as being called by `peer`; see [`set_calling_to`].
    ///
    /// [`set_calling_to`]: UserSession::set_calling_to
    pub fn set_calling_from(&self, peer: &str) {
        let mut call = self.call_fields();
        call.calling_from = Some(peer.to_owned());
        call.calling_to = None;
    }

    pub fn calling_from(&self) -> Option<String> {
        self.call_fields().calling_from.clone()
    }

    /// The name of the current call partner, in either direction.
    pub fn call_peer(&self) -> Option<String> {
        let call = self.call_fields();
        call.calling_from.clone().or_else(|| call.calling_to.clone())
    }

    /// Assign the media endpoint, then drain buffered candidates into it in
    /// receipt order. The media lock serializes this against `add_candidate`,
    /// so no candidate can slip past the drain.
    pub async fn set_endpoint(&self, endpoint: Arc<dyn MediaEndpoint>) {
        let mut media = self.media.lock().await;
        let pending = std::mem::take(&mut media.pending_candidates);
        if !pending.is_empty() {
            log::debug!(
                "Flushing {} buffered candidates for user '{}'",
                pending.len(),
                self.name
            );
        }
        for candidate in pending {
            endpoint.add_ice_candidate(candidate).await;
        }
        media.endpoint = Some(endpoint);
    }

    /// Forward a candidate to the endpoint, or buffer it until one exists.
    pub async fn add_candidate(&self, candidate: IceCandidate) {
        let mut media = self.media.lock().await;
        if let Some(endpoint) = media.endpoint.clone() {
            endpoint.add_ice_candidate(candidate).await;
        } else {
            media.pending_candidates.push(candidate);
        }
    }

    /// Drop all call state: endpoint, buffered candidates, pending offer and
    /// partner linkage. Idempotent; registration is untouched.
    pub async fn clear(&self) {
        let mut media = self.media.lock().await;
        media.endpoint = None;
        media.pending_candidates.clear();
        drop(media);

        *self.call_fields() = CallFields::default();
    }

    fn call_fields(&self) -> MutexGuard<'_, CallFields> {
        self.call.lock().expect("call state lock poisoned")
    }
}
