use std::mem;

use arcade_proto::IceCandidate;
use tracing::{debug, trace, warn};

use crate::peer::PeerConnection;

/// Holds remote ICE candidates until the remote description has been applied.
///
/// The peer rejects candidates that arrive before its remote description, so
/// anything submitted earlier is queued and replayed in arrival order by
/// [`mark_remote_description_set`](Self::mark_remote_description_set). Both
/// operations take `&mut self`; the owning event loop cannot interleave a
/// `submit` with a flush, so each candidate is delivered exactly once.
#[derive(Debug, Default)]
pub struct IceCandidateBuffer {
    remote_description_set: bool,
    pending: Vec<IceCandidate>,
}

impl IceCandidateBuffer {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_remote_description_set(&self) -> bool {
        self.remote_description_set
    }

    pub fn pending(&self) -> &[IceCandidate] {
        &self.pending
    }

    pub async fn submit(&mut self, candidate: IceCandidate, peer: &dyn PeerConnection) {
        if self.remote_description_set {
            deliver(peer, candidate).await;
        } else {
            trace!(
                target: "arcade::negotiation",
                queued = self.pending.len() + 1,
                "queueing remote candidate until remote description is set"
            );
            self.pending.push(candidate);
        }
    }

    pub async fn mark_remote_description_set(&mut self, peer: &dyn PeerConnection) {
        self.remote_description_set = true;
        let pending = mem::take(&mut self.pending);
        if !pending.is_empty() {
            debug!(
                target: "arcade::negotiation",
                count = pending.len(),
                "flushing buffered remote candidates"
            );
        }
        for candidate in pending {
            deliver(peer, candidate).await;
        }
    }

    pub fn reset(&mut self) {
        self.remote_description_set = false;
        self.pending.clear();
    }
}

// A refused candidate is not retried; the remaining paths may still connect.
async fn deliver(peer: &dyn PeerConnection, candidate: IceCandidate) {
    if let Err(err) = peer.add_ice_candidate(candidate).await {
        warn!(target: "arcade::negotiation", error = %err, "peer rejected remote candidate");
    }
}
