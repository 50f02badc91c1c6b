//! Recording doubles for the peer seam.

use std::sync::{Arc, Mutex};

use arcade_proto::{IceCandidate, SdpType, SessionDescription};
use async_trait::async_trait;

use super::{DataChannelHandle, PeerConnection, PeerError, PeerEvent, PeerEventSink, PeerFactory};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PeerCall {
    SetRemote(SessionDescription),
    CreateAnswer,
    SetLocal(SessionDescription),
    AddCandidate(IceCandidate),
    Close,
}

#[derive(Default)]
struct MockPeerState {
    calls: Vec<PeerCall>,
    reject_remote: Option<String>,
    reject_candidates: bool,
}

/// Peer that records every call. Answers echo the offer SDP back.
#[derive(Clone, Default)]
pub struct MockPeer {
    state: Arc<Mutex<MockPeerState>>,
}

impl MockPeer {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn calls(&self) -> Vec<PeerCall> {
        self.state.lock().map(|s| s.calls.clone()).unwrap_or_default()
    }

    pub fn added_candidates(&self) -> Vec<IceCandidate> {
        self.calls()
            .into_iter()
            .filter_map(|call| match call {
                PeerCall::AddCandidate(candidate) => Some(candidate),
                _ => None,
            })
            .collect()
    }

    pub fn close_count(&self) -> usize {
        self.calls()
            .iter()
            .filter(|call| matches!(call, PeerCall::Close))
            .count()
    }

    /// Make the next `set_remote_description` fail with `reason`.
    pub fn reject_remote(&self, reason: impl Into<String>) {
        if let Ok(mut state) = self.state.lock() {
            state.reject_remote = Some(reason.into());
        }
    }

    pub fn reject_candidates(&self, reject: bool) {
        if let Ok(mut state) = self.state.lock() {
            state.reject_candidates = reject;
        }
    }

    fn record(&self, call: PeerCall) {
        if let Ok(mut state) = self.state.lock() {
            state.calls.push(call);
        }
    }
}

#[async_trait]
impl PeerConnection for MockPeer {
    async fn set_remote_description(
        &self,
        description: SessionDescription,
    ) -> Result<(), PeerError> {
        self.record(PeerCall::SetRemote(description));
        let rejection = self
            .state
            .lock()
            .ok()
            .and_then(|mut state| state.reject_remote.take());
        match rejection {
            Some(reason) => Err(PeerError::Rejected(reason)),
            None => Ok(()),
        }
    }

    async fn create_answer(&self) -> Result<SessionDescription, PeerError> {
        self.record(PeerCall::CreateAnswer);
        let offer = self.calls().into_iter().rev().find_map(|call| match call {
            PeerCall::SetRemote(description) if description.sdp_type == SdpType::Offer => {
                Some(description.sdp)
            }
            _ => None,
        });
        offer
            .map(SessionDescription::answer)
            .ok_or_else(|| PeerError::Rejected("no remote offer".into()))
    }

    async fn set_local_description(
        &self,
        description: SessionDescription,
    ) -> Result<(), PeerError> {
        self.record(PeerCall::SetLocal(description));
        Ok(())
    }

    async fn add_ice_candidate(&self, candidate: IceCandidate) -> Result<(), PeerError> {
        self.record(PeerCall::AddCandidate(candidate));
        let reject = self.state.lock().map(|s| s.reject_candidates).unwrap_or(false);
        if reject {
            Err(PeerError::Rejected("candidate refused".into()))
        } else {
            Ok(())
        }
    }

    async fn close(&self) -> Result<(), PeerError> {
        self.record(PeerCall::Close);
        Ok(())
    }
}

/// Data channel that keeps every text it was asked to send.
pub struct MockDataChannel {
    label: String,
    sent: Mutex<Vec<String>>,
    closed: Mutex<bool>,
}

impl MockDataChannel {
    pub fn new(label: impl Into<String>) -> Arc<Self> {
        Arc::new(Self {
            label: label.into(),
            sent: Mutex::new(Vec::new()),
            closed: Mutex::new(false),
        })
    }

    pub fn sent(&self) -> Vec<String> {
        self.sent.lock().map(|s| s.clone()).unwrap_or_default()
    }

    pub fn is_closed(&self) -> bool {
        self.closed.lock().map(|c| *c).unwrap_or(false)
    }
}

#[async_trait]
impl DataChannelHandle for MockDataChannel {
    fn label(&self) -> &str {
        &self.label
    }

    async fn send_text(&self, text: &str) -> Result<(), PeerError> {
        if self.is_closed() {
            return Err(PeerError::Closed);
        }
        if let Ok(mut sent) = self.sent.lock() {
            sent.push(text.to_string());
        }
        Ok(())
    }

    async fn close(&self) {
        if let Ok(mut closed) = self.closed.lock() {
            *closed = true;
        }
    }
}

#[derive(Default)]
struct FactoryState {
    peers: Vec<(MockPeer, PeerEventSink)>,
}

/// Hands out [`MockPeer`]s and keeps each one with its event sink so tests
/// can play the engine's side.
#[derive(Clone, Default)]
pub struct MockPeerFactory {
    state: Arc<Mutex<FactoryState>>,
}

impl MockPeerFactory {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn created(&self) -> usize {
        self.state.lock().map(|s| s.peers.len()).unwrap_or(0)
    }

    /// Most recently created peer.
    pub fn last_peer(&self) -> Option<MockPeer> {
        self.state
            .lock()
            .ok()
            .and_then(|s| s.peers.last().map(|(peer, _)| peer.clone()))
    }

    pub fn peer(&self, index: usize) -> Option<MockPeer> {
        self.state
            .lock()
            .ok()
            .and_then(|s| s.peers.get(index).map(|(peer, _)| peer.clone()))
    }

    /// Emit `event` as the most recently created peer.
    pub fn emit(&self, event: PeerEvent) -> bool {
        match self.created().checked_sub(1) {
            Some(index) => self.emit_from(index, event),
            None => false,
        }
    }

    /// Emit `event` as the peer created at `index`.
    pub fn emit_from(&self, index: usize, event: PeerEvent) -> bool {
        let sink = self
            .state
            .lock()
            .ok()
            .and_then(|s| s.peers.get(index).map(|(_, sink)| sink.clone()));
        match sink {
            Some(sink) => {
                sink.emit(event);
                true
            }
            None => false,
        }
    }
}

#[async_trait]
impl PeerFactory for MockPeerFactory {
    async fn create(&self, events: PeerEventSink) -> Result<Arc<dyn PeerConnection>, PeerError> {
        let peer = MockPeer::new();
        if let Ok(mut state) = self.state.lock() {
            state.peers.push((peer.clone(), events));
        }
        Ok(Arc::new(peer))
    }
}
