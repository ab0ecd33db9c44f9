//! One-to-one call signaling core.
//!
//! A signaling server that:
//! - Registers participants under unique display names
//! - Relays call invitations between registered peers
//! - Negotiates session descriptions through an external media pipeline
//! - Buffers ICE candidates until a media endpoint is assigned
//! - Tears down call state on hangup or disconnect
//!
//! The crate is a library: the hosting application supplies the media
//! pipeline implementation (see [`media::PipelineFactory`]) and runs the
//! WebSocket front-end via [`server::SignalingServer`], or wires
//! [`handler::CallHandler`] to a transport of its own.

pub mod handler;
pub mod media;
pub mod protocol;
pub mod registry;
pub mod server;
pub mod session;

pub use handler::CallHandler;
pub use media::{CallParty, MediaEndpoint, MediaError, MediaPipeline, PipelineFactory};
pub use protocol::{ClientMessage, IceCandidate, ServerMessage};
pub use registry::Registry;
pub use server::SignalingServer;
pub use session::{ConnId, Connection, UserSession};
