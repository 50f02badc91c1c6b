//! Answer-only offer/answer/ICE state machine for one peer-connection attempt.
//!
//! The worker always originates the offer. A [`Negotiator`] sends the init
//! request, applies the offer it gets back, answers it and then releases any
//! remote candidates that arrived early. A fresh negotiator (and peer) is
//! built for every attempt; a stopped one stays [`NegotiationState::Closed`].

use std::fmt;
use std::sync::Arc;

use arcade_proto::{
    DecodeError, EncodeError, Envelope, GameEntry, IceCandidate, Label, SessionDescription, encode,
};
use serde_json::json;
use thiserror::Error;
use tracing::{debug, info, warn};

use crate::peer::{PeerConnection, PeerError};
use crate::signaling::{SignalingChannel, SignalingError};

mod ice_buffer;

pub use ice_buffer::IceCandidateBuffer;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NegotiationState {
    Idle,
    AwaitingOffer,
    AnsweringOffer,
    RemoteDescriptionSet,
    Closed,
}

impl fmt::Display for NegotiationState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            NegotiationState::Idle => "idle",
            NegotiationState::AwaitingOffer => "awaiting-offer",
            NegotiationState::AnsweringOffer => "answering-offer",
            NegotiationState::RemoteDescriptionSet => "remote-description-set",
            NegotiationState::Closed => "closed",
        };
        f.write_str(name)
    }
}

#[derive(Debug, Error)]
pub enum NegotiationError {
    #[error("malformed envelope: {0}")]
    Frame(#[from] DecodeError),
    #[error("unexpected {label} while {state}")]
    UnexpectedLabel {
        label: Label,
        state: NegotiationState,
    },
    #[error("relay reported an error on {label}: {message}")]
    Relay { label: Label, message: String },
    #[error("negotiation failed: {0}")]
    Failure(String),
    #[error(transparent)]
    Signaling(#[from] SignalingError),
}

impl From<EncodeError> for NegotiationError {
    fn from(err: EncodeError) -> Self {
        NegotiationError::Signaling(SignalingError::Encode(err))
    }
}

impl From<PeerError> for NegotiationError {
    fn from(err: PeerError) -> Self {
        NegotiationError::Failure(err.to_string())
    }
}

/// What a handled envelope means for the session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum NegotiationOutcome {
    Nothing,
    /// The answer went out and the remote description is applied.
    Established,
    Catalog(Vec<GameEntry>),
}

fn catalog(envelope: &Envelope) -> Result<NegotiationOutcome, NegotiationError> {
    let games: Vec<GameEntry> = envelope.parse()?;
    Ok(NegotiationOutcome::Catalog(games))
}

/// Interpret an envelope that arrives while no attempt exists. Only the
/// catalog and relay error reports mean anything then.
pub fn handle_without_attempt(envelope: &Envelope) -> Result<NegotiationOutcome, NegotiationError> {
    match (envelope.label, envelope.error.as_deref()) {
        (label, Some(message)) => Err(NegotiationError::Relay {
            label,
            message: message.to_string(),
        }),
        (Label::CoordinatorHandshake, None) => catalog(envelope),
        (label, None) => Err(NegotiationError::UnexpectedLabel {
            label,
            state: NegotiationState::Closed,
        }),
    }
}

pub struct Negotiator {
    state: NegotiationState,
    peer: Arc<dyn PeerConnection>,
    signaling: SignalingChannel,
    candidates: IceCandidateBuffer,
}

impl Negotiator {
    pub fn new(peer: Arc<dyn PeerConnection>, signaling: SignalingChannel) -> Self {
        Self {
            state: NegotiationState::Idle,
            peer,
            signaling,
            candidates: IceCandidateBuffer::new(),
        }
    }

    pub fn state(&self) -> NegotiationState {
        self.state
    }

    pub fn is_established(&self) -> bool {
        self.state == NegotiationState::RemoteDescriptionSet
    }

    pub fn is_closed(&self) -> bool {
        self.state == NegotiationState::Closed
    }

    pub fn candidates(&self) -> &IceCandidateBuffer {
        &self.candidates
    }

    /// Ask the worker for an offer. Only valid from `Idle`; a failed send
    /// leaves the state unchanged.
    pub fn start(&mut self) -> Result<(), NegotiationError> {
        if self.state != NegotiationState::Idle {
            return Err(NegotiationError::UnexpectedLabel {
                label: Label::WebRtcInit,
                state: self.state,
            });
        }
        self.signaling.send(&encode(Label::WebRtcInit, &json!({}))?)?;
        self.state = NegotiationState::AwaitingOffer;
        debug!(target: "arcade::negotiation", "sent init, awaiting offer");
        Ok(())
    }

    pub async fn handle(
        &mut self,
        envelope: &Envelope,
    ) -> Result<NegotiationOutcome, NegotiationError> {
        let awaiting = self.state == NegotiationState::AwaitingOffer;
        match (envelope.label, envelope.error.as_deref()) {
            (Label::WebRtcInit | Label::WebRtcOffer, Some(reason)) if awaiting => {
                warn!(target: "arcade::negotiation", label = %envelope.label, reason, "worker could not start negotiation");
                self.teardown().await;
                Err(NegotiationError::Failure(format!(
                    "{} reported: {reason}",
                    envelope.label
                )))
            }
            (label, Some(message)) => Err(NegotiationError::Relay {
                label,
                message: message.to_string(),
            }),
            (Label::CoordinatorHandshake, None) => catalog(envelope),
            (Label::WebRtcIceCandidate, None) if !self.is_closed() => {
                let candidate: IceCandidate = envelope.parse()?;
                self.candidates.submit(candidate, self.peer.as_ref()).await;
                Ok(NegotiationOutcome::Nothing)
            }
            (Label::WebRtcOffer, None) if awaiting => {
                let offer: SessionDescription = envelope.parse()?;
                self.answer(offer).await
            }
            (label, None) => Err(NegotiationError::UnexpectedLabel {
                label,
                state: self.state,
            }),
        }
    }

    async fn answer(
        &mut self,
        offer: SessionDescription,
    ) -> Result<NegotiationOutcome, NegotiationError> {
        self.state = NegotiationState::AnsweringOffer;
        if let Err(err) = self.apply_offer(offer).await {
            warn!(target: "arcade::negotiation", error = %err, "answering offer failed");
            self.teardown().await;
            return Err(err);
        }
        self.candidates
            .mark_remote_description_set(self.peer.as_ref())
            .await;
        self.state = NegotiationState::RemoteDescriptionSet;
        info!(target: "arcade::negotiation", "remote description set, answer sent");
        Ok(NegotiationOutcome::Established)
    }

    async fn apply_offer(&self, offer: SessionDescription) -> Result<(), NegotiationError> {
        self.peer.set_remote_description(offer).await?;
        let answer = self.peer.create_answer().await?;
        self.peer.set_local_description(answer.clone()).await?;
        self.signaling
            .send(&encode(Label::WebRtcAnswer, &answer)?)?;
        Ok(())
    }

    /// Send a locally gathered candidate to the worker.
    pub fn announce_candidate(&self, candidate: &IceCandidate) -> Result<(), NegotiationError> {
        if self.is_closed() {
            return Ok(());
        }
        self.signaling
            .send(&encode(Label::WebRtcIceCandidate, candidate)?)?;
        Ok(())
    }

    /// Tear the attempt down. Returns false when it was already closed.
    pub async fn stop(&mut self) -> bool {
        if self.is_closed() {
            return false;
        }
        self.teardown().await;
        true
    }

    async fn teardown(&mut self) {
        if let Err(err) = self.peer.close().await {
            debug!(target: "arcade::negotiation", error = %err, "peer close failed");
        }
        self.candidates.reset();
        self.state = NegotiationState::Closed;
    }
}
