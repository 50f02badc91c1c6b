//! Ordered, reconnecting websocket link to the relay.
//!
//! A supervisor task owns the socket. Outbound envelopes are queued on an
//! unbounded channel and written in order; inbound frames are decoded and
//! handed to the consumer as [`SignalingEvent`]s in arrival order. Frames that
//! fail to decode never leave this module.

use std::sync::Arc;
use std::sync::Mutex;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use arcade_proto::{EncodeError, Envelope, decode};
use futures_util::{SinkExt, StreamExt};
use thiserror::Error;
use tokio::net::TcpStream;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::{Instant, sleep_until};
use tokio_tungstenite::tungstenite::protocol::CloseFrame;
use tokio_tungstenite::tungstenite::protocol::frame::coding::CloseCode;
use tokio_tungstenite::tungstenite::{Error as WsError, Message, error::ProtocolError};
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream, connect_async};
use tracing::{debug, info, trace, warn};
use url::Url;

mod local;

pub use local::LocalRelay;

/// Close code that marks an intentional shutdown; every other code reconnects.
pub const NORMAL_CLOSURE: u16 = 1000;

#[derive(Debug, Clone)]
pub struct SignalingConfig {
    pub url: Url,
    pub reconnect_interval: Duration,
    pub max_reconnect_attempts: u32,
}

impl SignalingConfig {
    pub fn new(url: Url) -> Self {
        Self {
            url,
            reconnect_interval: Duration::from_secs(5),
            max_reconnect_attempts: 20,
        }
    }
}

#[derive(Debug, Error)]
pub enum SignalingError {
    #[error("signaling channel is not connected")]
    ChannelUnavailable,
    #[error("signaling channel was closed")]
    Closed,
    #[error("invalid signaling url: {0}")]
    InvalidUrl(String),
    #[error(transparent)]
    Encode(#[from] EncodeError),
}

#[derive(Debug, Clone, PartialEq)]
pub enum SignalingEvent {
    Connected,
    Envelope(Envelope),
    /// The link went down. `reconnecting` is false once the channel has
    /// stopped for good (normal closure, explicit close, or retries exhausted).
    Disconnected {
        code: Option<u16>,
        reconnecting: bool,
    },
}

pub type SignalingEvents = mpsc::UnboundedReceiver<SignalingEvent>;

#[derive(Debug)]
enum Outbound {
    Text(String),
    Close,
}

struct Shared {
    outbound: mpsc::UnboundedSender<Outbound>,
    connected: AtomicBool,
    closing: AtomicBool,
    task: Mutex<Option<JoinHandle<()>>>,
}

/// Cloneable handle to the relay link. All clones share one connection.
#[derive(Clone)]
pub struct SignalingChannel {
    shared: Arc<Shared>,
}

impl SignalingChannel {
    /// Start the supervisor and begin connecting to `config.url`. The first
    /// [`SignalingEvent::Connected`] arrives once the socket is up.
    pub fn connect(config: SignalingConfig) -> (Self, SignalingEvents) {
        let (outbound_tx, outbound_rx) = mpsc::unbounded_channel();
        let (events_tx, events_rx) = mpsc::unbounded_channel();
        let shared = Arc::new(Shared {
            outbound: outbound_tx,
            connected: AtomicBool::new(false),
            closing: AtomicBool::new(false),
            task: Mutex::new(None),
        });
        let handle = tokio::spawn(supervise(
            config,
            Arc::clone(&shared),
            outbound_rx,
            events_tx,
        ));
        if let Ok(mut task) = shared.task.lock() {
            *task = Some(handle);
        }
        (Self { shared }, events_rx)
    }

    pub fn is_connected(&self) -> bool {
        self.shared.connected.load(Ordering::SeqCst)
    }

    /// Queue an envelope for the socket writer.
    ///
    /// `Ok` means queued, not written. A frame queued as the link drops is
    /// discarded with a warning and is not replayed after a reconnect.
    pub fn send(&self, envelope: &Envelope) -> Result<(), SignalingError> {
        if self.shared.closing.load(Ordering::SeqCst) {
            return Err(SignalingError::Closed);
        }
        if !self.is_connected() {
            return Err(SignalingError::ChannelUnavailable);
        }
        let text = envelope.to_text()?;
        self.shared
            .outbound
            .send(Outbound::Text(text))
            .map_err(|_| SignalingError::ChannelUnavailable)?;
        trace!(target: "arcade::signaling", label = %envelope.label, "queued envelope");
        Ok(())
    }

    /// Close with code 1000 and stop reconnecting. Idempotent.
    pub fn close(&self) {
        if self.shared.closing.swap(true, Ordering::SeqCst) {
            return;
        }
        debug!(target: "arcade::signaling", "closing signaling channel");
        let _ = self.shared.outbound.send(Outbound::Close);
    }

    /// Wait for the supervisor to finish after [`close`](Self::close).
    pub async fn closed(&self) {
        let handle = self.shared.task.lock().ok().and_then(|mut task| task.take());
        if let Some(handle) = handle {
            let _ = handle.await;
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum LinkOutcome {
    /// Peer sent a close frame, possibly without a code.
    Closed(Option<u16>),
    /// Socket errored or ended without a close frame.
    Dropped,
    /// Connect attempt failed.
    Failed,
    /// Local shutdown, or nobody is listening for events any more.
    Shutdown,
}

impl LinkOutcome {
    fn code(self) -> Option<u16> {
        match self {
            LinkOutcome::Closed(code) => code,
            LinkOutcome::Shutdown => Some(NORMAL_CLOSURE),
            LinkOutcome::Dropped | LinkOutcome::Failed => None,
        }
    }

    fn is_intentional(self) -> bool {
        matches!(
            self,
            LinkOutcome::Closed(Some(NORMAL_CLOSURE)) | LinkOutcome::Shutdown
        )
    }
}

async fn supervise(
    config: SignalingConfig,
    shared: Arc<Shared>,
    mut outbound_rx: mpsc::UnboundedReceiver<Outbound>,
    events_tx: mpsc::UnboundedSender<SignalingEvent>,
) {
    let mut failures: u32 = 0;
    loop {
        if shared.closing.load(Ordering::SeqCst) {
            break;
        }
        let outcome = match connect_async(config.url.as_str()).await {
            Ok((stream, _)) => {
                failures = 0;
                shared.connected.store(true, Ordering::SeqCst);
                info!(target: "arcade::signaling", url = %config.url, "signaling websocket connected");
                let outcome = if events_tx.send(SignalingEvent::Connected).is_err() {
                    LinkOutcome::Shutdown
                } else {
                    pump(stream, &mut outbound_rx, &events_tx).await
                };
                shared.connected.store(false, Ordering::SeqCst);
                outcome
            }
            Err(err) => {
                warn!(target: "arcade::signaling", url = %config.url, error = %err, "signaling connect failed");
                LinkOutcome::Failed
            }
        };

        let code = outcome.code();
        if outcome.is_intentional() || shared.closing.load(Ordering::SeqCst) {
            info!(target: "arcade::signaling", ?code, "signaling channel closed");
            let _ = events_tx.send(SignalingEvent::Disconnected {
                code,
                reconnecting: false,
            });
            break;
        }

        failures += 1;
        let reconnecting = failures <= config.max_reconnect_attempts;
        if outcome != LinkOutcome::Failed || !reconnecting {
            let _ = events_tx.send(SignalingEvent::Disconnected { code, reconnecting });
        }
        if !reconnecting {
            warn!(
                target: "arcade::signaling",
                attempts = config.max_reconnect_attempts,
                "giving up on signaling reconnect"
            );
            break;
        }
        debug!(
            target: "arcade::signaling",
            ?code,
            attempt = failures,
            delay_ms = config.reconnect_interval.as_millis() as u64,
            "scheduling signaling reconnect"
        );
        if !wait_before_retry(config.reconnect_interval, &mut outbound_rx).await {
            let _ = events_tx.send(SignalingEvent::Disconnected {
                code: Some(NORMAL_CLOSURE),
                reconnecting: false,
            });
            break;
        }
    }
    shared.connected.store(false, Ordering::SeqCst);
}

/// Returns false when a close was requested while waiting.
async fn wait_before_retry(
    interval: Duration,
    outbound_rx: &mut mpsc::UnboundedReceiver<Outbound>,
) -> bool {
    let deadline = Instant::now() + interval;
    loop {
        tokio::select! {
            _ = sleep_until(deadline) => return true,
            outbound = outbound_rx.recv() => match outbound {
                Some(Outbound::Text(text)) => {
                    warn!(target: "arcade::signaling", bytes = text.len(), "discarding frame queued before disconnect");
                }
                Some(Outbound::Close) | None => return false,
            },
        }
    }
}

async fn pump(
    stream: WebSocketStream<MaybeTlsStream<TcpStream>>,
    outbound_rx: &mut mpsc::UnboundedReceiver<Outbound>,
    events_tx: &mpsc::UnboundedSender<SignalingEvent>,
) -> LinkOutcome {
    let (mut ws_write, mut ws_read) = stream.split();
    loop {
        tokio::select! {
            outbound = outbound_rx.recv() => match outbound {
                Some(Outbound::Text(text)) => {
                    if let Err(err) = ws_write.send(Message::Text(text)).await {
                        warn!(target: "arcade::signaling", error = %err, "signaling write failed");
                        return LinkOutcome::Dropped;
                    }
                }
                Some(Outbound::Close) | None => {
                    let frame = CloseFrame {
                        code: CloseCode::Normal,
                        reason: "client shutdown".into(),
                    };
                    let _ = ws_write.send(Message::Close(Some(frame))).await;
                    return LinkOutcome::Shutdown;
                }
            },
            inbound = ws_read.next() => match inbound {
                Some(Ok(Message::Text(text))) => {
                    trace!(target: "arcade::signaling", kind = "text", len = text.len(), "ws_in");
                    if !deliver(&text, events_tx) {
                        return LinkOutcome::Shutdown;
                    }
                }
                Some(Ok(Message::Binary(data))) => {
                    trace!(target: "arcade::signaling", kind = "binary", len = data.len(), "ws_in");
                    match String::from_utf8(data) {
                        Ok(text) => {
                            if !deliver(&text, events_tx) {
                                return LinkOutcome::Shutdown;
                            }
                        }
                        Err(err) => {
                            warn!(target: "arcade::signaling", error = %err, "dropping non-utf8 signaling frame");
                        }
                    }
                }
                Some(Ok(Message::Close(frame))) => {
                    let code = frame.map(|frame| u16::from(frame.code));
                    debug!(target: "arcade::signaling", ?code, "relay closed signaling websocket");
                    return LinkOutcome::Closed(code);
                }
                Some(Ok(_)) => {}
                Some(Err(err)) => {
                    match &err {
                        WsError::ConnectionClosed
                        | WsError::AlreadyClosed
                        | WsError::Protocol(ProtocolError::ResetWithoutClosingHandshake) => {
                            debug!(target: "arcade::signaling", "signaling websocket closed: {err}");
                        }
                        _ => {
                            warn!(target: "arcade::signaling", "signaling websocket error: {err}");
                        }
                    }
                    return LinkOutcome::Dropped;
                }
                None => return LinkOutcome::Dropped,
            },
        }
    }
}

/// Decode and forward one frame. Returns false once the consumer is gone.
fn deliver(text: &str, events_tx: &mpsc::UnboundedSender<SignalingEvent>) -> bool {
    match decode(text) {
        Ok(envelope) => {
            debug!(target: "arcade::signaling", label = %envelope.label, "received envelope");
            events_tx.send(SignalingEvent::Envelope(envelope)).is_ok()
        }
        Err(err) => {
            warn!(target: "arcade::signaling", error = %err, "dropping malformed signaling frame");
            true
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn only_normal_closure_is_intentional() {
        assert!(LinkOutcome::Closed(Some(NORMAL_CLOSURE)).is_intentional());
        assert!(LinkOutcome::Shutdown.is_intentional());
        assert!(!LinkOutcome::Closed(Some(1001)).is_intentional());
        assert!(!LinkOutcome::Closed(None).is_intentional());
        assert!(!LinkOutcome::Dropped.is_intentional());
        assert!(!LinkOutcome::Failed.is_intentional());
    }

    #[test]
    fn malformed_frames_are_dropped_without_stopping() {
        let (events_tx, mut events_rx) = mpsc::unbounded_channel();
        assert!(deliver("not json", &events_tx));
        assert!(deliver(r#"{"label":"msg_webrtc_offer","payload":"%%"}"#, &events_tx));
        assert!(events_rx.try_recv().is_err());

        let stop = Envelope::bare(arcade_proto::Label::StopGame);
        assert!(deliver(&stop.to_text().unwrap(), &events_tx));
        assert_eq!(
            events_rx.try_recv().unwrap(),
            SignalingEvent::Envelope(stop)
        );
    }

    #[test]
    fn deliver_reports_a_dropped_consumer() {
        let (events_tx, events_rx) = mpsc::unbounded_channel();
        drop(events_rx);
        let stop = Envelope::bare(arcade_proto::Label::StopGame);
        assert!(!deliver(&stop.to_text().unwrap(), &events_tx));
    }

    #[tokio::test]
    async fn frames_queued_across_a_drop_are_discarded_during_the_wait() {
        let (outbound_tx, mut outbound_rx) = mpsc::unbounded_channel();
        outbound_tx.send(Outbound::Text("late".into())).unwrap();
        assert!(wait_before_retry(Duration::from_millis(20), &mut outbound_rx).await);
        assert!(outbound_rx.try_recv().is_err());

        outbound_tx.send(Outbound::Text("late".into())).unwrap();
        outbound_tx.send(Outbound::Close).unwrap();
        assert!(!wait_before_retry(Duration::from_secs(5), &mut outbound_rx).await);
    }

    #[tokio::test]
    async fn send_while_disconnected_is_unavailable() {
        let (channel, _events, relay) = SignalingChannel::local_pair();
        relay.disconnect(Some(1006));
        let err = channel
            .send(&Envelope::bare(arcade_proto::Label::StopGame))
            .unwrap_err();
        assert!(matches!(err, SignalingError::ChannelUnavailable));
    }
}
