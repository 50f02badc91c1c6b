//! Top-level client session.
//!
//! [`SessionController::run`] is the only place core state is mutated. UI
//! commands, relay traffic and peer callbacks all arrive as queued events and
//! each is handled to completion before the next one is looked at.

use std::fmt;
use std::sync::Arc;

use arcade_proto::{EncodeError, Envelope, GameEntry, Label, MouseInput, StartGame, encode};
use thiserror::Error;
use tokio::sync::{mpsc, watch};
use tracing::{debug, info, trace, warn};

use crate::channels::{ChannelError, DataChannelRouter};
use crate::input::{KeyAction, Keymap};
use crate::negotiation::{
    NegotiationError, NegotiationOutcome, NegotiationState, Negotiator, handle_without_attempt,
};
use crate::peer::{PeerError, PeerEvent, PeerEventSink, PeerFactory, PeerState, TrackInfo};
use crate::signaling::{SignalingChannel, SignalingError, SignalingEvent, SignalingEvents};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Menu,
    Negotiating,
    Streaming,
}

impl fmt::Display for SessionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            SessionState::Menu => "menu",
            SessionState::Negotiating => "negotiating",
            SessionState::Streaming => "streaming",
        };
        f.write_str(name)
    }
}

#[derive(Debug, Error)]
pub enum SessionError {
    #[error("session controller is no longer running")]
    Stopped,
    #[error(transparent)]
    Negotiation(#[from] NegotiationError),
    #[error(transparent)]
    Signaling(#[from] SignalingError),
    #[error(transparent)]
    Peer(#[from] PeerError),
    #[error(transparent)]
    Channel(#[from] ChannelError),
}

impl From<EncodeError> for SessionError {
    fn from(err: EncodeError) -> Self {
        SessionError::Signaling(SignalingError::Encode(err))
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionCommand {
    StartGame(String),
    StopGame,
    Key { code: String, pressed: bool },
    Mouse(MouseInput),
    Shutdown,
}

/// Cloneable front door for UI code.
#[derive(Clone)]
pub struct SessionHandle {
    commands: mpsc::UnboundedSender<SessionCommand>,
    state: watch::Receiver<SessionState>,
    catalog: watch::Receiver<Vec<GameEntry>>,
}

impl SessionHandle {
    fn send(&self, command: SessionCommand) -> Result<(), SessionError> {
        self.commands
            .send(command)
            .map_err(|_| SessionError::Stopped)
    }

    pub fn start_game(&self, game: impl Into<String>) -> Result<(), SessionError> {
        self.send(SessionCommand::StartGame(game.into()))
    }

    pub fn stop_game(&self) -> Result<(), SessionError> {
        self.send(SessionCommand::StopGame)
    }

    pub fn key(&self, code: impl Into<String>, pressed: bool) -> Result<(), SessionError> {
        self.send(SessionCommand::Key {
            code: code.into(),
            pressed,
        })
    }

    pub fn mouse(&self, input: MouseInput) -> Result<(), SessionError> {
        self.send(SessionCommand::Mouse(input))
    }

    pub fn shutdown(&self) -> Result<(), SessionError> {
        self.send(SessionCommand::Shutdown)
    }

    pub fn state(&self) -> SessionState {
        *self.state.borrow()
    }

    pub fn catalog(&self) -> Vec<GameEntry> {
        self.catalog.borrow().clone()
    }

    pub fn subscribe_state(&self) -> watch::Receiver<SessionState> {
        self.state.clone()
    }

    pub fn subscribe_catalog(&self) -> watch::Receiver<Vec<GameEntry>> {
        self.catalog.clone()
    }

    /// Resolve once the session reaches `target`.
    pub async fn wait_for_state(&self, target: SessionState) -> Result<(), SessionError> {
        let mut state = self.state.clone();
        state
            .wait_for(|state| *state == target)
            .await
            .map(|_| ())
            .map_err(|_| SessionError::Stopped)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Flow {
    Continue,
    Shutdown,
}

struct Inbox {
    commands: mpsc::UnboundedReceiver<SessionCommand>,
    signaling: SignalingEvents,
    peer: mpsc::UnboundedReceiver<(u64, PeerEvent)>,
}

pub struct SessionController {
    signaling: SignalingChannel,
    factory: Arc<dyn PeerFactory>,
    keymap: Keymap,
    negotiator: Option<Negotiator>,
    generation: u64,
    router: DataChannelRouter,
    tracks: Vec<TrackInfo>,
    state: SessionState,
    state_tx: watch::Sender<SessionState>,
    catalog_tx: watch::Sender<Vec<GameEntry>>,
    peer_tx: mpsc::UnboundedSender<(u64, PeerEvent)>,
    inbox: Option<Inbox>,
}

impl SessionController {
    pub fn new(
        signaling: SignalingChannel,
        signaling_events: SignalingEvents,
        factory: Arc<dyn PeerFactory>,
    ) -> (Self, SessionHandle) {
        let (commands_tx, commands_rx) = mpsc::unbounded_channel();
        let (peer_tx, peer_rx) = mpsc::unbounded_channel();
        let (state_tx, state_rx) = watch::channel(SessionState::Menu);
        let (catalog_tx, catalog_rx) = watch::channel(Vec::new());
        let controller = Self {
            signaling,
            factory,
            keymap: Keymap::default(),
            negotiator: None,
            generation: 0,
            router: DataChannelRouter::new(),
            tracks: Vec::new(),
            state: SessionState::Menu,
            state_tx,
            catalog_tx,
            peer_tx,
            inbox: Some(Inbox {
                commands: commands_rx,
                signaling: signaling_events,
                peer: peer_rx,
            }),
        };
        let handle = SessionHandle {
            commands: commands_tx,
            state: state_rx,
            catalog: catalog_rx,
        };
        (controller, handle)
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    pub fn negotiation_state(&self) -> Option<NegotiationState> {
        self.negotiator.as_ref().map(Negotiator::state)
    }

    pub fn tracks(&self) -> &[TrackInfo] {
        &self.tracks
    }

    /// Process events until shutdown, the relay link is gone for good, or
    /// every [`SessionHandle`] has been dropped.
    pub async fn run(mut self) -> Result<(), SessionError> {
        let Some(mut inbox) = self.inbox.take() else {
            return Err(SessionError::Stopped);
        };
        loop {
            let flow = tokio::select! {
                command = inbox.commands.recv() => match command {
                    Some(command) => self.on_command(command).await,
                    None => Flow::Shutdown,
                },
                event = inbox.signaling.recv() => match event {
                    Some(event) => self.on_signaling(event).await,
                    None => Flow::Shutdown,
                },
                Some((generation, event)) = inbox.peer.recv() => {
                    self.on_peer(generation, event).await;
                    Flow::Continue
                }
            };
            if flow == Flow::Shutdown {
                break;
            }
        }
        self.end_session().await;
        self.signaling.close();
        info!(target: "arcade::session", "session controller stopped");
        Ok(())
    }

    async fn on_command(&mut self, command: SessionCommand) -> Flow {
        let result = match command {
            SessionCommand::StartGame(game) => self.start_game(&game).await,
            SessionCommand::StopGame => {
                self.stop_game().await;
                Ok(())
            }
            SessionCommand::Key { code, pressed } => self.key(&code, pressed).await,
            SessionCommand::Mouse(input) => self.mouse(&input).await,
            SessionCommand::Shutdown => return Flow::Shutdown,
        };
        match result {
            Ok(()) => {}
            Err(SessionError::Channel(err @ ChannelError::NotReady(_))) => {
                debug!(target: "arcade::session", %err, "dropping input");
            }
            Err(err) => warn!(target: "arcade::session", error = %err, "command failed"),
        }
        Flow::Continue
    }

    /// Begin a negotiation ahead of any game request so the connection is
    /// ready by the time one is made.
    pub async fn prepare(&mut self) -> Result<(), SessionError> {
        if self.negotiator.as_ref().is_some_and(|n| !n.is_closed()) {
            return Ok(());
        }
        self.generation += 1;
        let sink = PeerEventSink::new(self.generation, self.peer_tx.clone());
        let peer = self.factory.create(sink).await?;
        let mut negotiator = Negotiator::new(peer, self.signaling.clone());
        if let Err(err) = negotiator.start() {
            negotiator.stop().await;
            return Err(err.into());
        }
        debug!(target: "arcade::session", generation = self.generation, "negotiation started");
        self.negotiator = Some(negotiator);
        Ok(())
    }

    pub async fn start_game(&mut self, game: &str) -> Result<(), SessionError> {
        if self.state != SessionState::Menu {
            warn!(target: "arcade::session", game, state = %self.state, "a game is already running");
            return Ok(());
        }
        self.prepare().await?;
        let request = encode(
            Label::StartGame,
            &StartGame {
                game: game.to_string(),
            },
        )?;
        self.signaling.send(&request)?;
        info!(target: "arcade::session", game, "game requested");
        let established = self
            .negotiator
            .as_ref()
            .is_some_and(Negotiator::is_established);
        self.set_state(if established {
            SessionState::Streaming
        } else {
            SessionState::Negotiating
        });
        Ok(())
    }

    /// Leave the running game. Does nothing from the menu.
    pub async fn stop_game(&mut self) {
        if self.state == SessionState::Menu {
            trace!(target: "arcade::session", "stop requested with no game running");
            return;
        }
        if let Err(err) = self.signaling.send(&Envelope::bare(Label::StopGame)) {
            warn!(target: "arcade::session", error = %err, "could not notify relay of stop");
        }
        self.end_session().await;
    }

    async fn key(&mut self, code: &str, pressed: bool) -> Result<(), SessionError> {
        match self.keymap.translate(code, pressed) {
            Some(KeyAction::Quit) => {
                self.stop_game().await;
                Ok(())
            }
            Some(KeyAction::Button(input)) => {
                if !self.forwards_input() {
                    return Ok(());
                }
                Ok(self.router.send_keyboard(&input).await?)
            }
            None => {
                trace!(target: "arcade::session", code, "unbound key");
                Ok(())
            }
        }
    }

    async fn mouse(&mut self, input: &MouseInput) -> Result<(), SessionError> {
        if !self.forwards_input() {
            return Ok(());
        }
        Ok(self.router.send_mouse(input).await?)
    }

    fn forwards_input(&self) -> bool {
        if self.state == SessionState::Streaming {
            true
        } else {
            trace!(target: "arcade::session", state = %self.state, "input ignored outside a game");
            false
        }
    }

    async fn on_signaling(&mut self, event: SignalingEvent) -> Flow {
        match event {
            SignalingEvent::Connected => {
                info!(target: "arcade::session", "relay connected");
                if let Err(err) = self.prepare().await {
                    warn!(target: "arcade::session", error = %err, "could not start negotiation");
                }
                Flow::Continue
            }
            SignalingEvent::Envelope(envelope) => {
                self.on_envelope(&envelope).await;
                Flow::Continue
            }
            SignalingEvent::Disconnected { code, reconnecting } => {
                warn!(target: "arcade::session", ?code, reconnecting, "relay disconnected");
                self.end_session().await;
                if reconnecting {
                    Flow::Continue
                } else {
                    Flow::Shutdown
                }
            }
        }
    }

    async fn on_envelope(&mut self, envelope: &Envelope) {
        let outcome = match self.negotiator.as_mut() {
            Some(negotiator) => negotiator.handle(envelope).await,
            None => handle_without_attempt(envelope),
        };
        match outcome {
            Ok(NegotiationOutcome::Nothing) => {}
            Ok(NegotiationOutcome::Catalog(games)) => {
                info!(target: "arcade::session", count = games.len(), "game catalog received");
                self.catalog_tx.send_replace(games);
            }
            Ok(NegotiationOutcome::Established) => {
                if self.state == SessionState::Negotiating {
                    self.set_state(SessionState::Streaming);
                }
            }
            Err(err @ (NegotiationError::Frame(_) | NegotiationError::UnexpectedLabel { .. })) => {
                debug!(target: "arcade::session", %err, "ignoring envelope");
            }
            Err(err @ NegotiationError::Relay { .. }) => {
                warn!(target: "arcade::session", %err, "relay error");
            }
            Err(err) => {
                warn!(target: "arcade::session", error = %err, "negotiation failed");
            }
        }
        if self.negotiator.as_ref().is_some_and(Negotiator::is_closed) {
            self.end_session().await;
        }
    }

    async fn on_peer(&mut self, generation: u64, event: PeerEvent) {
        if generation != self.generation || self.negotiator.is_none() {
            trace!(target: "arcade::session", generation, current = self.generation, "dropping stale peer event");
            return;
        }
        match event {
            PeerEvent::CandidateGenerated(candidate) => {
                if let Some(negotiator) = self.negotiator.as_ref() {
                    if let Err(err) = negotiator.announce_candidate(&candidate) {
                        warn!(target: "arcade::session", error = %err, "could not announce local candidate");
                    }
                }
            }
            PeerEvent::TrackReceived(track) => {
                debug!(target: "arcade::session", kind = %track.kind, id = %track.id, "track attached");
                self.tracks.push(track);
            }
            PeerEvent::DataChannelOpened { label, handle } => {
                self.router.register(&label, handle);
            }
            PeerEvent::DataChannelClosed(label) => {
                debug!(target: "arcade::session", label = %label, "data channel closed by peer");
            }
            PeerEvent::ConnectionStateChanged(state) => {
                debug!(target: "arcade::session", ?state, "peer connection state");
                if state.is_terminal() {
                    if state == PeerState::Failed {
                        warn!(target: "arcade::session", "peer connection failed");
                    } else {
                        info!(target: "arcade::session", ?state, "peer connection ended");
                    }
                    self.end_session().await;
                }
            }
        }
    }

    /// Tear down the current attempt and go back to the menu.
    async fn end_session(&mut self) {
        if let Some(mut negotiator) = self.negotiator.take() {
            negotiator.stop().await;
        }
        self.router.close_all().await;
        self.tracks.clear();
        self.set_state(SessionState::Menu);
    }

    fn set_state(&mut self, next: SessionState) {
        if self.state == next {
            return;
        }
        info!(target: "arcade::session", from = %self.state, to = %next, "session state");
        self.state = next;
        self.state_tx.send_replace(next);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::peer::mock::{MockDataChannel, MockPeerFactory};
    use crate::signaling::LocalRelay;
    use arcade_proto::SessionDescription;

    fn setup() -> (SessionController, SessionHandle, MockPeerFactory, LocalRelay) {
        let (signaling, events, relay) = SignalingChannel::local_pair();
        let factory = MockPeerFactory::new();
        let (controller, handle) =
            SessionController::new(signaling, events, Arc::new(factory.clone()));
        (controller, handle, factory, relay)
    }

    fn offer() -> Envelope {
        encode(Label::WebRtcOffer, &SessionDescription::offer("v=0\r\n")).unwrap()
    }

    #[tokio::test]
    async fn start_game_requests_the_game_and_negotiates() {
        let (mut controller, handle, factory, mut relay) = setup();
        controller.start_game("pong").await.unwrap();

        assert_eq!(controller.state(), SessionState::Negotiating);
        assert_eq!(handle.state(), SessionState::Negotiating);
        assert_eq!(factory.created(), 1);
        let labels: Vec<_> = relay.sent().into_iter().map(|e| e.label).collect();
        assert_eq!(labels, vec![Label::WebRtcInit, Label::StartGame]);

        controller.on_envelope(&offer()).await;
        assert_eq!(controller.state(), SessionState::Streaming);
        assert_eq!(
            controller.negotiation_state(),
            Some(NegotiationState::RemoteDescriptionSet)
        );
    }

    #[tokio::test]
    async fn prepared_connection_streams_immediately() {
        let (mut controller, _handle, factory, mut relay) = setup();
        controller.prepare().await.unwrap();
        controller.on_envelope(&offer()).await;
        assert_eq!(controller.state(), SessionState::Menu);
        relay.sent();

        controller.start_game("pong").await.unwrap();
        assert_eq!(controller.state(), SessionState::Streaming);
        assert_eq!(factory.created(), 1);
        let labels: Vec<_> = relay.sent().into_iter().map(|e| e.label).collect();
        assert_eq!(labels, vec![Label::StartGame]);
    }

    #[tokio::test]
    async fn stop_twice_tears_down_once() {
        let (mut controller, _handle, factory, mut relay) = setup();
        controller.start_game("pong").await.unwrap();
        controller.on_envelope(&offer()).await;
        relay.sent();

        controller.stop_game().await;
        controller.stop_game().await;

        assert_eq!(controller.state(), SessionState::Menu);
        assert_eq!(factory.last_peer().unwrap().close_count(), 1);
        let labels: Vec<_> = relay.sent().into_iter().map(|e| e.label).collect();
        assert_eq!(labels, vec![Label::StopGame]);
    }

    #[tokio::test]
    async fn input_flows_once_channels_open() {
        let (mut controller, _handle, _factory, _relay) = setup();
        controller.start_game("pong").await.unwrap();
        controller.on_envelope(&offer()).await;

        let early = controller.key("ArrowUp", true).await.unwrap_err();
        assert!(matches!(
            early,
            SessionError::Channel(ChannelError::NotReady(_))
        ));

        let keyboard = MockDataChannel::new("keyboard");
        controller
            .on_peer(
                controller.generation,
                PeerEvent::DataChannelOpened {
                    label: "keyboard".into(),
                    handle: keyboard.clone(),
                },
            )
            .await;
        controller.key("ArrowUp", true).await.unwrap();
        assert_eq!(
            keyboard.sent(),
            vec![r#"{"user":0,"button_state":[{"button":4,"pressed":true}]}"#.to_string()]
        );

        controller.key("KeyQ", true).await.unwrap();
        assert_eq!(controller.state(), SessionState::Menu);
        assert!(keyboard.is_closed());
    }

    #[tokio::test]
    async fn stale_generation_events_are_ignored() {
        let (mut controller, _handle, factory, _relay) = setup();
        controller.start_game("pong").await.unwrap();
        controller.stop_game().await;
        controller.start_game("pong").await.unwrap();
        assert_eq!(factory.created(), 2);

        let stale = controller.generation - 1;
        controller
            .on_peer(stale, PeerEvent::ConnectionStateChanged(PeerState::Failed))
            .await;
        assert_eq!(controller.state(), SessionState::Negotiating);

        controller
            .on_peer(
                controller.generation,
                PeerEvent::ConnectionStateChanged(PeerState::Failed),
            )
            .await;
        assert_eq!(controller.state(), SessionState::Menu);
        assert!(controller.negotiation_state().is_none());
    }

    #[tokio::test]
    async fn rejected_offer_returns_to_menu() {
        let (mut controller, _handle, factory, _relay) = setup();
        controller.start_game("pong").await.unwrap();
        factory.last_peer().unwrap().reject_remote("bad sdp");
        controller.on_envelope(&offer()).await;
        assert_eq!(controller.state(), SessionState::Menu);
        assert!(controller.negotiation_state().is_none());
    }

    #[tokio::test]
    async fn relay_drop_returns_to_menu() {
        let (mut controller, _handle, _factory, _relay) = setup();
        controller.start_game("pong").await.unwrap();
        let flow = controller
            .on_signaling(SignalingEvent::Disconnected {
                code: Some(1006),
                reconnecting: true,
            })
            .await;
        assert_eq!(flow, Flow::Continue);
        assert_eq!(controller.state(), SessionState::Menu);

        let flow = controller
            .on_signaling(SignalingEvent::Disconnected {
                code: Some(1000),
                reconnecting: false,
            })
            .await;
        assert_eq!(flow, Flow::Shutdown);
    }

    #[tokio::test]
    async fn tracks_are_recorded_until_teardown() {
        let (mut controller, _handle, _factory, _relay) = setup();
        controller.start_game("pong").await.unwrap();
        controller
            .on_peer(
                controller.generation,
                PeerEvent::TrackReceived(TrackInfo {
                    kind: "video".into(),
                    id: "video".into(),
                    stream_id: "game".into(),
                }),
            )
            .await;
        assert_eq!(controller.tracks().len(), 1);
        controller.stop_game().await;
        assert!(controller.tracks().is_empty());
    }
}
