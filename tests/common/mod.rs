//! Shared test support: a recording mock of the media pipeline collaborator
//! and channel-backed peers for driving the handler directly.

#![allow(dead_code)]

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use tokio::sync::mpsc;

use call_signaling::media::IceCandidateCallback;
use call_signaling::{
    CallHandler, CallParty, ConnId, Connection, IceCandidate, MediaEndpoint, MediaError,
    MediaPipeline, PipelineFactory, ServerMessage,
};

// ============================================================================
// Mock Media Pipeline
// ============================================================================

/// Factory producing recording pipelines; `ops` is a chronological log of
/// the collaborator calls the handler makes, shared by all pipelines.
pub struct MockFactory {
    fail_create: bool,
    fail_negotiation: bool,
    ops: Arc<Mutex<Vec<String>>>,
    pipelines: Mutex<Vec<Arc<MockPipeline>>>,
}

impl MockFactory {
    pub fn new() -> Arc<Self> {
        Self::with_failures(false, false)
    }

    /// Pipeline construction itself fails.
    pub fn failing_create() -> Arc<Self> {
        Self::with_failures(true, false)
    }

    /// Construction succeeds but SDP negotiation fails.
    pub fn failing_negotiation() -> Arc<Self> {
        Self::with_failures(false, true)
    }

    fn with_failures(fail_create: bool, fail_negotiation: bool) -> Arc<Self> {
        Arc::new(MockFactory {
            fail_create,
            fail_negotiation,
            ops: Arc::new(Mutex::new(Vec::new())),
            pipelines: Mutex::new(Vec::new()),
        })
    }

    pub fn ops(&self) -> Vec<String> {
        self.ops.lock().unwrap().clone()
    }

    pub fn pipeline(&self, index: usize) -> Arc<MockPipeline> {
        self.pipelines.lock().unwrap()[index].clone()
    }

    pub fn pipeline_count(&self) -> usize {
        self.pipelines.lock().unwrap().len()
    }
}

#[async_trait]
impl PipelineFactory for MockFactory {
    async fn create(&self) -> Result<Arc<dyn MediaPipeline>, MediaError> {
        if self.fail_create {
            return Err(MediaError::Pipeline("media server unreachable".to_owned()));
        }
        let pipeline = Arc::new(MockPipeline::new(self.ops.clone(), self.fail_negotiation));
        self.pipelines.lock().unwrap().push(pipeline.clone());
        Ok(pipeline)
    }
}

pub struct MockPipeline {
    caller_ep: Arc<MockEndpoint>,
    callee_ep: Arc<MockEndpoint>,
    released: AtomicUsize,
    fail_negotiation: bool,
    ops: Arc<Mutex<Vec<String>>>,
}

impl MockPipeline {
    fn new(ops: Arc<Mutex<Vec<String>>>, fail_negotiation: bool) -> Self {
        MockPipeline {
            caller_ep: Arc::new(MockEndpoint::new("caller", ops.clone())),
            callee_ep: Arc::new(MockEndpoint::new("callee", ops.clone())),
            released: AtomicUsize::new(0),
            fail_negotiation,
            ops,
        }
    }

    pub fn caller_mock(&self) -> Arc<MockEndpoint> {
        self.caller_ep.clone()
    }

    pub fn callee_mock(&self) -> Arc<MockEndpoint> {
        self.callee_ep.clone()
    }

    pub fn release_count(&self) -> usize {
        self.released.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl MediaPipeline for MockPipeline {
    fn caller_endpoint(&self) -> Arc<dyn MediaEndpoint> {
        self.caller_ep.clone()
    }

    fn callee_endpoint(&self) -> Arc<dyn MediaEndpoint> {
        self.callee_ep.clone()
    }

    async fn generate_sdp_answer(
        &self,
        party: CallParty,
        offer: &str,
    ) -> Result<String, MediaError> {
        if self.fail_negotiation {
            return Err(MediaError::Negotiation("no common codec".to_owned()));
        }
        let label = match party {
            CallParty::Caller => "caller",
            CallParty::Callee => "callee",
        };
        self.ops.lock().unwrap().push(format!("answer:{}", label));
        Ok(format!("answer-for-{}", offer))
    }

    async fn release(&self) {
        self.released.fetch_add(1, Ordering::SeqCst);
        self.ops.lock().unwrap().push("release".to_owned());
    }
}

pub struct MockEndpoint {
    label: &'static str,
    added: Mutex<Vec<IceCandidate>>,
    callback: Mutex<Option<IceCandidateCallback>>,
    ops: Arc<Mutex<Vec<String>>>,
}

impl MockEndpoint {
    fn new(label: &'static str, ops: Arc<Mutex<Vec<String>>>) -> Self {
        MockEndpoint {
            label,
            added: Mutex::new(Vec::new()),
            callback: Mutex::new(None),
            ops,
        }
    }

    /// Candidates the handler fed into this endpoint, in arrival order.
    pub fn added(&self) -> Vec<IceCandidate> {
        self.added.lock().unwrap().clone()
    }

    pub fn has_callback(&self) -> bool {
        self.callback.lock().unwrap().is_some()
    }

    /// Simulate the pipeline finding a local candidate.
    pub fn fire_candidate(&self, candidate: IceCandidate) {
        if let Some(callback) = self.callback.lock().unwrap().as_ref() {
            callback(candidate);
        }
    }
}

#[async_trait]
impl MediaEndpoint for MockEndpoint {
    async fn add_ice_candidate(&self, candidate: IceCandidate) {
        self.added.lock().unwrap().push(candidate);
    }

    fn on_ice_candidate_found(&self, callback: IceCandidateCallback) {
        *self.callback.lock().unwrap() = Some(callback);
    }

    async fn gather_candidates(&self) -> Result<(), MediaError> {
        self.ops.lock().unwrap().push(format!("gather:{}", self.label));
        Ok(())
    }
}

// ============================================================================
// Test Peers
// ============================================================================

/// A fake client: a connection handle plus the receiving end of its
/// outbound channel.
pub struct TestPeer {
    pub conn: Connection,
    rx: mpsc::UnboundedReceiver<ServerMessage>,
}

impl TestPeer {
    pub fn new(id: ConnId) -> Self {
        let (tx, rx) = mpsc::unbounded_channel();
        TestPeer {
            conn: Connection::new(id, tx),
            rx,
        }
    }

    /// Next message the server queued for this peer; panics if there is none.
    pub fn recv(&mut self) -> ServerMessage {
        self.rx.try_recv().expect("expected an outbound message")
    }

    pub fn assert_quiet(&mut self) {
        if let Ok(message) = self.rx.try_recv() {
            panic!("unexpected outbound message: {:?}", message);
        }
    }
}

/// Register `peer` under `name` and consume the accepted response.
pub async fn register(handler: &CallHandler, peer: &mut TestPeer, name: &str) {
    handler
        .handle_message(
            &peer.conn,
            &format!(r#"{{"id":"register","name":"{}"}}"#, name),
        )
        .await;
    assert_eq!(
        peer.recv(),
        ServerMessage::RegisterResponse {
            response: "accepted".to_owned(),
            message: None,
        }
    );
}

pub fn candidate(n: u32) -> IceCandidate {
    IceCandidate {
        candidate: format!("candidate:{}", n),
        sdp_mid: "audio".to_owned(),
        sdp_m_line_index: n,
    }
}
