//! Signaling protocol messages.
//!
//! Every frame on the wire is a self-contained JSON text message tagged by
//! its `"id"` field. Field names are camelCase to match the deployed web
//! clients, so the serde representation renames accordingly.

use serde::{Deserialize, Serialize};

// ============================================================================
// ICE Candidate
// ============================================================================

/// An ICE candidate as exchanged with clients and the media pipeline.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct IceCandidate {
    pub candidate: String,
    pub sdp_mid: String,
    pub sdp_m_line_index: u32,
}

// ============================================================================
// Inbound Messages
// ============================================================================

/// Messages received from clients.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "id", rename_all = "camelCase", rename_all_fields = "camelCase")]
pub enum ClientMessage {
    /// Claim a display name for this connection
    Register { name: String },

    /// Invite another registered user to a call
    Call {
        to: String,
        from: String,
        is_video_call: bool,
        sdp_offer: String,
    },

    /// Callee's answer to an `incomingCall` notification
    IncomingCallResponse {
        call_response: String,
        from: String,
        /// Present when accepting
        #[serde(default)]
        sdp_offer: Option<String>,
    },

    /// A locally gathered ICE candidate, to forward to the media pipeline
    OnIceCandidate { candidate: IceCandidate },

    /// Hang up the current call
    Stop,
}

// ============================================================================
// Outbound Messages
// ============================================================================

/// Messages sent to clients.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "id", rename_all = "camelCase", rename_all_fields = "camelCase")]
pub enum ServerMessage {
    /// Result of a `register` request: `"accepted"` or `"rejected: <reason>"`
    RegisterResponse {
        response: String,
        /// Failure description for malformed requests
        #[serde(default, skip_serializing_if = "Option::is_none")]
        message: Option<String>,
    },

    /// Result of a `call` or `incomingCallResponse` request, to the caller
    CallResponse {
        response: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        sdp_answer: Option<String>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        message: Option<String>,
    },

    /// Call invitation, to the callee
    IncomingCall { from: String, is_video_call: bool },

    /// SDP answer for an accepted call, to the callee
    StartCommunication { sdp_answer: String },

    /// The peer hung up or dropped; the call is over
    StopCommunication,

    /// An ICE candidate found by the media pipeline for this participant
    IceCandidate { candidate: IceCandidate },
}

// ============================================================================
// Decoding
// ============================================================================

/// Decode one inbound text frame.
pub fn decode(raw: &str) -> Result<ClientMessage, serde_json::Error> {
    serde_json::from_str(raw)
}

/// Peek at the `"id"` discriminator of a raw frame.
///
/// Used to pick the right rejection shape for frames that fail to decode.
pub fn message_kind(raw: &str) -> Option<String> {
    let value: serde_json::Value = serde_json::from_str(raw).ok()?;
    value.get("id")?.as_str().map(str::to_owned)
}
