use std::sync::Arc;
use std::sync::Mutex;
use std::sync::atomic::{AtomicBool, Ordering};

use arcade_proto::{Envelope, decode};
use tokio::sync::mpsc;
use tracing::warn;

use super::{NORMAL_CLOSURE, Outbound, Shared, SignalingChannel, SignalingEvent, SignalingEvents};

/// In-process stand-in for the relay. Frames written through the paired
/// [`SignalingChannel`] come out here as wire text, and frames injected here
/// go through the same decode path as the websocket reader.
pub struct LocalRelay {
    shared: Arc<Shared>,
    outbound: mpsc::UnboundedReceiver<Outbound>,
    events: mpsc::UnboundedSender<SignalingEvent>,
}

impl SignalingChannel {
    /// A channel wired to an in-memory relay. It starts connected and emits no
    /// initial event.
    pub fn local_pair() -> (SignalingChannel, SignalingEvents, LocalRelay) {
        let (outbound_tx, outbound_rx) = mpsc::unbounded_channel();
        let (events_tx, events_rx) = mpsc::unbounded_channel();
        let shared = Arc::new(Shared {
            outbound: outbound_tx,
            connected: AtomicBool::new(true),
            closing: AtomicBool::new(false),
            task: Mutex::new(None),
        });
        let relay = LocalRelay {
            shared: Arc::clone(&shared),
            outbound: outbound_rx,
            events: events_tx,
        };
        (SignalingChannel { shared }, events_rx, relay)
    }
}

impl LocalRelay {
    /// Next frame the client wrote, if one is queued.
    pub fn try_recv_text(&mut self) -> Option<String> {
        loop {
            match self.outbound.try_recv() {
                Ok(Outbound::Text(text)) => return Some(text),
                Ok(Outbound::Close) => continue,
                Err(_) => return None,
            }
        }
    }

    pub async fn recv_text(&mut self) -> Option<String> {
        loop {
            match self.outbound.recv().await? {
                Outbound::Text(text) => return Some(text),
                Outbound::Close => continue,
            }
        }
    }

    /// Next frame the client wrote, decoded.
    pub async fn recv(&mut self) -> Option<Envelope> {
        let text = self.recv_text().await?;
        decode(&text).ok()
    }

    /// Drain and decode everything the client has written so far.
    pub fn sent(&mut self) -> Vec<Envelope> {
        let mut sent = Vec::new();
        while let Some(text) = self.try_recv_text() {
            if let Ok(envelope) = decode(&text) {
                sent.push(envelope);
            }
        }
        sent
    }

    /// Hand an envelope to the client as if the relay had sent it.
    pub fn deliver(&self, envelope: &Envelope) {
        match envelope.to_text() {
            Ok(text) => {
                self.deliver_text(&text);
            }
            Err(err) => warn!(target: "arcade::signaling", error = %err, "local relay encode failed"),
        }
    }

    /// Returns false when the frame does not decode; such frames are dropped.
    pub fn deliver_text(&self, text: &str) -> bool {
        match decode(text) {
            Ok(envelope) => {
                let _ = self.events.send(SignalingEvent::Envelope(envelope));
                true
            }
            Err(err) => {
                warn!(target: "arcade::signaling", error = %err, "dropping malformed signaling frame");
                false
            }
        }
    }

    pub fn connect(&self) {
        self.shared.connected.store(true, Ordering::SeqCst);
        let _ = self.events.send(SignalingEvent::Connected);
    }

    /// Simulate the relay closing the link with `code`.
    pub fn disconnect(&self, code: Option<u16>) {
        self.shared.connected.store(false, Ordering::SeqCst);
        let _ = self.events.send(SignalingEvent::Disconnected {
            code,
            reconnecting: code != Some(NORMAL_CLOSURE),
        });
    }

    /// True once the client asked for a normal closure.
    pub fn close_requested(&self) -> bool {
        self.shared.closing.load(Ordering::SeqCst)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use arcade_proto::{Label, StartGame, encode};

    #[tokio::test]
    async fn frames_flow_both_ways_in_order() {
        let (channel, mut events, mut relay) = SignalingChannel::local_pair();

        channel.send(&Envelope::bare(Label::WebRtcInit)).unwrap();
        channel
            .send(&encode(Label::StartGame, &StartGame { game: "pong".into() }).unwrap())
            .unwrap();
        let sent = relay.sent();
        assert_eq!(
            sent.iter().map(|e| e.label).collect::<Vec<_>>(),
            vec![Label::WebRtcInit, Label::StartGame]
        );

        relay.deliver(&Envelope::bare(Label::StopGame));
        assert!(!relay.deliver_text("garbage"));
        relay.deliver(&Envelope::bare(Label::WebRtcInit));
        assert_eq!(
            events.recv().await,
            Some(SignalingEvent::Envelope(Envelope::bare(Label::StopGame)))
        );
        assert_eq!(
            events.recv().await,
            Some(SignalingEvent::Envelope(Envelope::bare(Label::WebRtcInit)))
        );
    }

    #[tokio::test]
    async fn close_is_idempotent_and_visible_to_the_relay() {
        let (channel, _events, mut relay) = SignalingChannel::local_pair();
        channel.close();
        channel.close();
        assert!(relay.close_requested());
        assert!(relay.try_recv_text().is_none());
    }
}
