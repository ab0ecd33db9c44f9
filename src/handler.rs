//! Protocol handler for one-to-one call signaling.
//!
//! # Call Flow
//!
//! ```text
//! caller                      server                       callee
//!   │──── register ─────────────►│◄──────────── register ─────│
//!   │◄─── registerResponse ──────│───── registerResponse ────►│
//!   │                            │                            │
//!   │──── call ─────────────────►│                            │
//!   │                            │───── incomingCall ────────►│
//!   │                            │◄──── incomingCallResponse ─│
//!   │                            │  (pipeline + SDP answers)  │
//!   │                            │───── startCommunication ──►│
//!   │◄─── callResponse ──────────│                            │
//!   │◄─── iceCandidate ──────────│───── iceCandidate ────────►│
//!   │                            │                            │
//!   │──── stop ─────────────────►│                            │
//!   │                            │───── stopCommunication ───►│
//! ```
//!
//! The handler owns the registry and the map binding connection ids to the
//! pipeline of their active call. Both participants' bindings are created
//! and removed together, under a single lock acquisition. Pipeline
//! construction and SDP negotiation are slow collaborator calls and run
//! with no lock held.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};

use crate::media::{CallParty, IceCandidateCallback, MediaError, MediaPipeline, PipelineFactory};
use crate::protocol::{self, ClientMessage, ServerMessage};
use crate::registry::Registry;
use crate::session::{ConnId, Connection, UserSession};

type PipelineMap = HashMap<ConnId, Arc<dyn MediaPipeline>>;

/// Dispatches inbound messages and drives the call-lifecycle state machine.
pub struct CallHandler {
    registry: Registry,
    pipelines: Mutex<PipelineMap>,
    factory: Arc<dyn PipelineFactory>,
}

impl CallHandler {
    pub fn new(factory: Arc<dyn PipelineFactory>) -> Self {
        CallHandler {
            registry: Registry::new(),
            pipelines: Mutex::new(HashMap::new()),
            factory,
        }
    }

    pub fn registry(&self) -> &Registry {
        &self.registry
    }

    /// Number of connection ids currently bound to a pipeline (two per
    /// active call).
    pub fn pipeline_binding_count(&self) -> usize {
        self.pipelines().len()
    }

    // ========================================================================
    // Transport hooks
    // ========================================================================

    /// Process one inbound text frame from `conn`.
    pub async fn handle_message(&self, conn: &Connection, raw: &str) {
        let user = self.registry.lookup_by_id(conn.id());
        match &user {
            Some(user) => log::debug!("Incoming message from user '{}': {}", user.name(), raw),
            None => log::debug!("Incoming message from new connection {}: {}", conn.id(), raw),
        }

        let message = match protocol::decode(raw) {
            Ok(message) => message,
            Err(e) => {
                self.reject_malformed(conn, raw, &e);
                return;
            }
        };

        match message {
            ClientMessage::Register { name } => self.register(conn, name),
            ClientMessage::Call {
                to,
                from,
                is_video_call,
                sdp_offer,
            } => self.call(conn, user, to, from, is_video_call, sdp_offer),
            ClientMessage::IncomingCallResponse {
                call_response,
                from,
                sdp_offer,
            } => {
                self.incoming_call_response(conn, user, call_response, from, sdp_offer)
                    .await
            }
            ClientMessage::OnIceCandidate { candidate } => match user {
                Some(user) => user.add_candidate(candidate).await,
                None => log::debug!(
                    "Dropping ICE candidate from unregistered connection {}",
                    conn.id()
                ),
            },
            ClientMessage::Stop => self.stop(conn.id()).await,
        }
    }

    /// The connection is gone: tear down any active call, then drop the
    /// registration.
    pub async fn connection_closed(&self, conn_id: ConnId) {
        self.stop(conn_id).await;
        self.registry.remove_by_id(conn_id);
    }

    // ========================================================================
    // Registration
    // ========================================================================

    fn register(&self, conn: &Connection, name: String) {
        let session = Arc::new(UserSession::new(conn.clone(), name.clone()));

        let response = if name.is_empty() {
            "rejected: empty user name".to_owned()
        } else if self.registry.lookup_by_id(conn.id()).is_some() {
            "rejected: connection already registered".to_owned()
        } else if !self.registry.register(session.clone()) {
            format!("rejected: user '{}' already registered", name)
        } else {
            "accepted".to_owned()
        };

        // The reply goes through the session even when registration failed;
        // a rejected session is simply never inserted.
        session.send(ServerMessage::RegisterResponse {
            response,
            message: None,
        });
    }

    // ========================================================================
    // Call setup
    // ========================================================================

    fn call(
        &self,
        conn: &Connection,
        user: Option<Arc<UserSession>>,
        to: String,
        from: String,
        is_video_call: bool,
        sdp_offer: String,
    ) {
        let Some(caller) = user else {
            conn.send(ServerMessage::CallResponse {
                response: "rejected: caller is not registered".to_owned(),
                sdp_answer: None,
                message: None,
            });
            return;
        };

        match self.registry.lookup_by_name(&to) {
            Some(callee) => {
                log::debug!("User '{}' calling '{}'", from, to);
                caller.set_sdp_offer(sdp_offer);
                caller.set_calling_to(&to);

                callee.send(ServerMessage::IncomingCall {
                    from: from.clone(),
                    is_video_call,
                });
                callee.set_calling_from(&from);
            }
            None => {
                caller.send(ServerMessage::CallResponse {
                    response: format!("rejected: user '{}' is not registered", to),
                    sdp_answer: None,
                    message: None,
                });
            }
        }
    }

    async fn incoming_call_response(
        &self,
        conn: &Connection,
        user: Option<Arc<UserSession>>,
        call_response: String,
        from: String,
        sdp_offer: Option<String>,
    ) {
        let Some(callee) = user else {
            conn.send(rejection(
                "rejected: responder is not registered".to_owned(),
            ));
            return;
        };

        let Some(caller) = self.registry.lookup_by_name(&from) else {
            callee.send(rejection(format!(
                "rejected: user '{}' is not registered",
                from
            )));
            return;
        };

        if call_response != "accept" {
            log::debug!("Call from '{}' rejected by '{}'", from, callee.name());
            caller.send(rejection("rejected".to_owned()));
            caller.clear().await;
            callee.clear().await;
            return;
        }

        let linked = caller.calling_to().as_deref() == Some(callee.name())
            && callee.calling_from().as_deref() == Some(from.as_str());
        if !linked {
            callee.send(rejection(format!("rejected: no pending call from '{}'", from)));
            return;
        }

        let Some(callee_offer) = sdp_offer else {
            callee.send(rejection("rejected: missing sdpOffer".to_owned()));
            return;
        };

        self.accept_call(caller, callee, callee_offer).await;
    }

    async fn accept_call(
        &self,
        caller: Arc<UserSession>,
        callee: Arc<UserSession>,
        callee_offer: String,
    ) {
        log::debug!(
            "Call from '{}' accepted by '{}'",
            caller.name(),
            callee.name()
        );

        let pipeline = match self.factory.create().await {
            Ok(pipeline) => pipeline,
            Err(e) => {
                log::error!(
                    "Failed to create media pipeline for '{}' -> '{}': {}",
                    caller.name(),
                    callee.name(),
                    e
                );
                self.fail_call(&caller, &callee, None).await;
                return;
            }
        };

        {
            let mut pipelines = self.pipelines();
            pipelines.insert(caller.id(), pipeline.clone());
            pipelines.insert(callee.id(), pipeline.clone());
        }

        if let Err(e) = self
            .establish_media(&pipeline, &caller, &callee, &callee_offer)
            .await
        {
            log::error!(
                "Media negotiation failed for '{}' -> '{}': {}",
                caller.name(),
                callee.name(),
                e
            );
            self.fail_call(&caller, &callee, Some(pipeline)).await;
        }
    }

    /// The fallible part of call acceptance. Any error here leaves the
    /// rollback to [`fail_call`](CallHandler::fail_call).
    async fn establish_media(
        &self,
        pipeline: &Arc<dyn MediaPipeline>,
        caller: &Arc<UserSession>,
        callee: &Arc<UserSession>,
        callee_offer: &str,
    ) -> Result<(), MediaError> {
        let callee_endpoint = pipeline.callee_endpoint();
        callee.set_endpoint(callee_endpoint.clone()).await;
        callee_endpoint.on_ice_candidate_found(candidate_forwarder(callee.clone()));

        let caller_endpoint = pipeline.caller_endpoint();
        caller.set_endpoint(caller_endpoint.clone()).await;
        caller_endpoint.on_ice_candidate_found(candidate_forwarder(caller.clone()));

        // Callee side first: deployed clients expect the callee to hold its
        // answer, and its gathering to have started, before the caller's
        // answer goes out.
        let callee_answer = pipeline
            .generate_sdp_answer(CallParty::Callee, callee_offer)
            .await?;
        callee.send(ServerMessage::StartCommunication {
            sdp_answer: callee_answer,
        });
        callee_endpoint.gather_candidates().await?;

        let caller_offer = caller.sdp_offer().ok_or_else(|| {
            MediaError::Negotiation(format!("user '{}' has no pending offer", caller.name()))
        })?;
        let caller_answer = pipeline
            .generate_sdp_answer(CallParty::Caller, &caller_offer)
            .await?;
        caller.send(ServerMessage::CallResponse {
            response: "accepted".to_owned(),
            sdp_answer: Some(caller_answer),
            message: None,
        });
        caller_endpoint.gather_candidates().await?;

        Ok(())
    }

    /// Compensate a failed acceptance: every step already taken is undone,
    /// and both parties end idle. `pipeline` is `None` when construction
    /// itself failed.
    async fn fail_call(
        &self,
        caller: &Arc<UserSession>,
        callee: &Arc<UserSession>,
        pipeline: Option<Arc<dyn MediaPipeline>>,
    ) {
        if let Some(pipeline) = pipeline {
            pipeline.release().await;
        }

        {
            let mut pipelines = self.pipelines();
            pipelines.remove(&caller.id());
            pipelines.remove(&callee.id());
        }

        caller.clear().await;
        callee.clear().await;

        caller.send(rejection("rejected".to_owned()));
        callee.send(ServerMessage::StopCommunication);
    }

    // ========================================================================
    // Teardown
    // ========================================================================

    /// Hang up the call `conn_id` is part of, if any.
    ///
    /// Releases the pipeline, removes both participants' bindings, notifies
    /// the other participant and clears both sessions' call state. Without
    /// an active pipeline this is a no-op, which makes `stop`, repeated
    /// `stop` and `stop`-then-disconnect all safe.
    pub async fn stop(&self, conn_id: ConnId) {
        let stopper = self.registry.lookup_by_id(conn_id);
        let peer = stopper
            .as_ref()
            .and_then(|s| s.call_peer())
            .and_then(|name| self.registry.lookup_by_name(&name));

        let pipeline = {
            let mut pipelines = self.pipelines();
            let pipeline = pipelines.remove(&conn_id);
            if pipeline.is_some() {
                if let Some(peer) = &peer {
                    pipelines.remove(&peer.id());
                }
            }
            pipeline
        };

        let Some(pipeline) = pipeline else {
            return;
        };

        log::debug!("Releasing pipeline for connection {}", conn_id);
        pipeline.release().await;

        if let Some(peer) = peer {
            peer.send(ServerMessage::StopCommunication);
            peer.clear().await;
        }
        if let Some(stopper) = stopper {
            stopper.clear().await;
        }
    }

    // ========================================================================
    // Helpers
    // ========================================================================

    fn reject_malformed(&self, conn: &Connection, raw: &str, err: &serde_json::Error) {
        log::warn!("Malformed message on connection {}: {}", conn.id(), err);
        match protocol::message_kind(raw).as_deref() {
            Some("register") => conn.send(ServerMessage::RegisterResponse {
                response: "rejected".to_owned(),
                message: Some(err.to_string()),
            }),
            Some("call") | Some("incomingCallResponse") => conn.send(ServerMessage::CallResponse {
                response: "rejected".to_owned(),
                sdp_answer: None,
                message: Some(err.to_string()),
            }),
            // Malformed candidates are dropped like unknown kinds: neither
            // has a response the client is waiting on.
            _ => {}
        }
    }

    fn pipelines(&self) -> MutexGuard<'_, PipelineMap> {
        self.pipelines.lock().expect("pipeline map lock poisoned")
    }
}

/// Forward candidates found by the pipeline into the session's serialized
/// send path, so they order correctly against other outbound traffic.
fn candidate_forwarder(session: Arc<UserSession>) -> IceCandidateCallback {
    Box::new(move |candidate| {
        session.send(ServerMessage::IceCandidate { candidate });
    })
}

fn rejection(response: String) -> ServerMessage {
    ServerMessage::CallResponse {
        response,
        sdp_answer: None,
        message: None,
    }
}
