//! Seam between negotiation and the WebRTC engine.
//!
//! Negotiation only ever talks to [`PeerConnection`]; the engine reports back
//! through a [`PeerEventSink`] so every callback lands on the session's event
//! loop instead of running inside the engine's own tasks.

use std::fmt;
use std::sync::Arc;

use arcade_proto::{IceCandidate, SessionDescription};
use async_trait::async_trait;
use thiserror::Error;
use tokio::sync::mpsc;

pub mod mock;
pub mod webrtc;

#[derive(Debug, Error)]
pub enum PeerError {
    /// The engine refused an operation, e.g. an unparseable SDP.
    #[error("peer connection rejected the operation: {0}")]
    Rejected(String),
    #[error("unsupported session description type")]
    Unsupported,
    #[error("peer connection is closed")]
    Closed,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PeerState {
    New,
    Connecting,
    Connected,
    Disconnected,
    Failed,
    Closed,
}

impl PeerState {
    /// States after which the attempt cannot recover.
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            PeerState::Disconnected | PeerState::Failed | PeerState::Closed
        )
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TrackInfo {
    /// `audio` or `video`
    pub kind: String,
    pub id: String,
    pub stream_id: String,
}

#[async_trait]
pub trait DataChannelHandle: Send + Sync {
    fn label(&self) -> &str;
    async fn send_text(&self, text: &str) -> Result<(), PeerError>;
    async fn close(&self);
}

impl fmt::Debug for dyn DataChannelHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DataChannel")
            .field("label", &self.label())
            .finish()
    }
}

#[derive(Debug, Clone)]
pub enum PeerEvent {
    /// A local candidate that must be announced to the remote side.
    CandidateGenerated(IceCandidate),
    TrackReceived(TrackInfo),
    DataChannelOpened {
        label: String,
        handle: Arc<dyn DataChannelHandle>,
    },
    DataChannelClosed(String),
    ConnectionStateChanged(PeerState),
}

/// Where a peer reports its events. Each event is tagged with the generation
/// of the attempt that created the peer so stale reports can be discarded.
#[derive(Clone)]
pub struct PeerEventSink {
    generation: u64,
    tx: mpsc::UnboundedSender<(u64, PeerEvent)>,
}

impl PeerEventSink {
    pub fn new(generation: u64, tx: mpsc::UnboundedSender<(u64, PeerEvent)>) -> Self {
        Self { generation, tx }
    }

    pub fn emit(&self, event: PeerEvent) {
        let _ = self.tx.send((self.generation, event));
    }
}

#[async_trait]
pub trait PeerConnection: Send + Sync {
    async fn set_remote_description(&self, description: SessionDescription)
    -> Result<(), PeerError>;
    async fn create_answer(&self) -> Result<SessionDescription, PeerError>;
    async fn set_local_description(&self, description: SessionDescription)
    -> Result<(), PeerError>;
    async fn add_ice_candidate(&self, candidate: IceCandidate) -> Result<(), PeerError>;
    async fn close(&self) -> Result<(), PeerError>;
}

#[async_trait]
pub trait PeerFactory: Send + Sync {
    async fn create(&self, events: PeerEventSink) -> Result<Arc<dyn PeerConnection>, PeerError>;
}
