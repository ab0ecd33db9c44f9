//! Media pipeline collaborator interface.
//!
//! The signaling core never touches media itself. An external media-pipeline
//! service builds a pipeline per accepted call, with one endpoint per
//! participant, and answers SDP offers. These traits are the surface the
//! core consumes; the hosting application supplies the implementation.

use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;

use crate::protocol::IceCandidate;

// ============================================================================
// Errors
// ============================================================================

/// Errors reported by the media pipeline collaborator.
#[derive(Debug)]
pub enum MediaError {
    /// Pipeline construction, teardown or candidate gathering failed
    Pipeline(String),
    /// SDP answer generation failed
    Negotiation(String),
}

impl fmt::Display for MediaError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MediaError::Pipeline(msg) => write!(f, "media pipeline error: {}", msg),
            MediaError::Negotiation(msg) => write!(f, "sdp negotiation error: {}", msg),
        }
    }
}

impl std::error::Error for MediaError {}

// ============================================================================
// Traits
// ============================================================================

/// Which side of the call an operation concerns.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CallParty {
    Caller,
    Callee,
}

/// Callback invoked for each ICE candidate the pipeline finds for an
/// endpoint. Delivered into the owning session's serialized send path.
pub type IceCandidateCallback = Box<dyn Fn(IceCandidate) + Send + Sync>;

/// A media termination point bound to one participant.
#[async_trait]
pub trait MediaEndpoint: Send + Sync {
    /// Feed a remote candidate into the endpoint.
    async fn add_ice_candidate(&self, candidate: IceCandidate);

    /// Subscribe to candidates found locally for this endpoint.
    fn on_ice_candidate_found(&self, callback: IceCandidateCallback);

    /// Start gathering local candidates; found ones arrive via the
    /// subscription above.
    async fn gather_candidates(&self) -> Result<(), MediaError>;
}

/// A pairing of two endpoints carrying media between the call participants.
#[async_trait]
pub trait MediaPipeline: Send + Sync {
    fn caller_endpoint(&self) -> Arc<dyn MediaEndpoint>;

    fn callee_endpoint(&self) -> Arc<dyn MediaEndpoint>;

    /// Produce the SDP answer for one party's offer.
    async fn generate_sdp_answer(
        &self,
        party: CallParty,
        offer: &str,
    ) -> Result<String, MediaError>;

    /// Tear the pipeline down. Must be idempotent: teardown can race with a
    /// concurrently completing setup.
    async fn release(&self);
}

/// Constructor for call pipelines, implemented by the hosting application.
#[async_trait]
pub trait PipelineFactory: Send + Sync {
    async fn create(&self) -> Result<Arc<dyn MediaPipeline>, MediaError>;
}
