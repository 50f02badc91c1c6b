use std::sync::Arc;

use arcade_proto::{IceCandidate, SdpType, SessionDescription};
use async_trait::async_trait;
use tracing::{debug, info, trace, warn};
use webrtc::api::interceptor_registry::register_default_interceptors;
use webrtc::api::media_engine::MediaEngine;
use webrtc::api::{API, APIBuilder};
use webrtc::data_channel::RTCDataChannel;
use webrtc::ice_transport::ice_candidate::{RTCIceCandidate, RTCIceCandidateInit};
use webrtc::ice_transport::ice_server::RTCIceServer;
use webrtc::interceptor::registry::Registry;
use webrtc::peer_connection::RTCPeerConnection;
use webrtc::peer_connection::configuration::RTCConfiguration;
use webrtc::peer_connection::peer_connection_state::RTCPeerConnectionState;
use webrtc::peer_connection::sdp::sdp_type::RTCSdpType;
use webrtc::peer_connection::sdp::session_description::RTCSessionDescription;
use webrtc::rtp_transceiver::rtp_receiver::RTCRtpReceiver;
use webrtc::rtp_transceiver::RTCRtpTransceiver;
use webrtc::track::track_remote::TrackRemote;

use super::{
    DataChannelHandle, PeerConnection, PeerError, PeerEvent, PeerEventSink, PeerFactory,
    PeerState, TrackInfo,
};

fn rejected(err: impl std::fmt::Display) -> PeerError {
    PeerError::Rejected(err.to_string())
}

fn build_api() -> Result<API, PeerError> {
    let mut media_engine = MediaEngine::default();
    media_engine.register_default_codecs().map_err(rejected)?;

    let mut registry = Registry::new();
    registry = register_default_interceptors(registry, &mut media_engine).map_err(rejected)?;

    Ok(APIBuilder::new()
        .with_media_engine(media_engine)
        .with_interceptor_registry(registry)
        .build())
}

/// Builds real peer connections configured with the given STUN/TURN urls.
pub struct WebRtcPeerFactory {
    api: API,
    ice_servers: Vec<String>,
}

impl WebRtcPeerFactory {
    pub fn new(ice_servers: Vec<String>) -> Result<Self, PeerError> {
        Ok(Self {
            api: build_api()?,
            ice_servers,
        })
    }

    fn configuration(&self) -> RTCConfiguration {
        let ice_servers = if self.ice_servers.is_empty() {
            Vec::new()
        } else {
            vec![RTCIceServer {
                urls: self.ice_servers.clone(),
                ..Default::default()
            }]
        };
        RTCConfiguration {
            ice_servers,
            ..Default::default()
        }
    }
}

#[async_trait]
impl PeerFactory for WebRtcPeerFactory {
    async fn create(&self, events: PeerEventSink) -> Result<Arc<dyn PeerConnection>, PeerError> {
        let pc = Arc::new(
            self.api
                .new_peer_connection(self.configuration())
                .await
                .map_err(rejected)?,
        );
        install_handlers(&pc, events);
        Ok(Arc::new(WebRtcPeer { pc }))
    }
}

fn install_handlers(pc: &Arc<RTCPeerConnection>, events: PeerEventSink) {
    let sink = events.clone();
    pc.on_ice_candidate(Box::new(move |candidate: Option<RTCIceCandidate>| {
        let sink = sink.clone();
        Box::pin(async move {
            // None marks the end of gathering.
            let Some(candidate) = candidate else {
                trace!(target: "arcade::peer", "ice gathering complete");
                return;
            };
            match candidate.to_json() {
                Ok(init) => sink.emit(PeerEvent::CandidateGenerated(IceCandidate {
                    candidate: init.candidate,
                    sdp_mid: init.sdp_mid,
                    sdp_mline_index: init.sdp_mline_index,
                    username_fragment: init.username_fragment,
                })),
                Err(err) => {
                    warn!(target: "arcade::peer", error = %err, "failed to serialize local candidate")
                }
            }
        })
    }));

    let sink = events.clone();
    pc.on_track(Box::new(
        move |track: Arc<TrackRemote>, _receiver: Arc<RTCRtpReceiver>, _transceiver: Arc<RTCRtpTransceiver>| {
            let sink = sink.clone();
            Box::pin(async move {
                let info = TrackInfo {
                    kind: track.kind().to_string(),
                    id: track.id(),
                    stream_id: track.stream_id(),
                };
                info!(
                    target: "arcade::peer",
                    kind = %info.kind,
                    id = %info.id,
                    stream = %info.stream_id,
                    "remote track received"
                );
                sink.emit(PeerEvent::TrackReceived(info));
                tokio::spawn(drain_track(track));
            })
        },
    ));

    let sink = events.clone();
    pc.on_data_channel(Box::new(move |dc: Arc<RTCDataChannel>| {
        let sink = sink.clone();
        Box::pin(async move {
            let label = dc.label().to_string();
            debug!(target: "arcade::peer", label = %label, "remote data channel announced");

            let open_sink = sink.clone();
            let open_dc = Arc::clone(&dc);
            dc.on_open(Box::new(move || {
                Box::pin(async move {
                    let label = open_dc.label().to_string();
                    debug!(target: "arcade::peer", label = %label, "data channel open");
                    open_sink.emit(PeerEvent::DataChannelOpened {
                        label,
                        handle: Arc::new(WebRtcDataChannel { dc: open_dc }),
                    });
                })
            }));

            let close_sink = sink.clone();
            dc.on_close(Box::new(move || {
                let sink = close_sink.clone();
                let label = label.clone();
                Box::pin(async move {
                    debug!(target: "arcade::peer", label = %label, "data channel closed");
                    sink.emit(PeerEvent::DataChannelClosed(label));
                })
            }));
        })
    }));

    let sink = events;
    pc.on_peer_connection_state_change(Box::new(move |state: RTCPeerConnectionState| {
        let sink = sink.clone();
        Box::pin(async move {
            debug!(target: "arcade::peer", ?state, "peer connection state changed");
            sink.emit(PeerEvent::ConnectionStateChanged(map_state(state)));
        })
    }));
}

// Frames are not rendered; reading keeps the receive buffers from filling.
async fn drain_track(track: Arc<TrackRemote>) {
    let mut packets: u64 = 0;
    while track.read_rtp().await.is_ok() {
        packets += 1;
    }
    trace!(target: "arcade::peer", id = %track.id(), packets, "remote track ended");
}

fn map_state(state: RTCPeerConnectionState) -> PeerState {
    match state {
        RTCPeerConnectionState::Unspecified | RTCPeerConnectionState::New => PeerState::New,
        RTCPeerConnectionState::Connecting => PeerState::Connecting,
        RTCPeerConnectionState::Connected => PeerState::Connected,
        RTCPeerConnectionState::Disconnected => PeerState::Disconnected,
        RTCPeerConnectionState::Failed => PeerState::Failed,
        RTCPeerConnectionState::Closed => PeerState::Closed,
    }
}

fn to_rtc_description(description: SessionDescription) -> Result<RTCSessionDescription, PeerError> {
    match description.sdp_type {
        SdpType::Offer => RTCSessionDescription::offer(description.sdp).map_err(rejected),
        SdpType::Answer => RTCSessionDescription::answer(description.sdp).map_err(rejected),
        SdpType::Pranswer => RTCSessionDescription::pranswer(description.sdp).map_err(rejected),
        SdpType::Rollback => Err(PeerError::Unsupported),
    }
}

fn from_rtc_description(description: RTCSessionDescription) -> Result<SessionDescription, PeerError> {
    let sdp_type = match description.sdp_type {
        RTCSdpType::Offer => SdpType::Offer,
        RTCSdpType::Answer => SdpType::Answer,
        RTCSdpType::Pranswer => SdpType::Pranswer,
        RTCSdpType::Rollback | RTCSdpType::Unspecified => return Err(PeerError::Unsupported),
    };
    Ok(SessionDescription {
        sdp_type,
        sdp: description.sdp,
    })
}

struct WebRtcPeer {
    pc: Arc<RTCPeerConnection>,
}

#[async_trait]
impl PeerConnection for WebRtcPeer {
    async fn set_remote_description(
        &self,
        description: SessionDescription,
    ) -> Result<(), PeerError> {
        let description = to_rtc_description(description)?;
        self.pc
            .set_remote_description(description)
            .await
            .map_err(rejected)
    }

    async fn create_answer(&self) -> Result<SessionDescription, PeerError> {
        let answer = self.pc.create_answer(None).await.map_err(rejected)?;
        from_rtc_description(answer)
    }

    async fn set_local_description(
        &self,
        description: SessionDescription,
    ) -> Result<(), PeerError> {
        let description = to_rtc_description(description)?;
        self.pc
            .set_local_description(description)
            .await
            .map_err(rejected)
    }

    async fn add_ice_candidate(&self, candidate: IceCandidate) -> Result<(), PeerError> {
        let init = RTCIceCandidateInit {
            candidate: candidate.candidate,
            sdp_mid: candidate.sdp_mid,
            sdp_mline_index: candidate.sdp_mline_index,
            username_fragment: candidate.username_fragment,
        };
        self.pc.add_ice_candidate(init).await.map_err(rejected)
    }

    async fn close(&self) -> Result<(), PeerError> {
        self.pc.close().await.map_err(rejected)
    }
}

struct WebRtcDataChannel {
    dc: Arc<RTCDataChannel>,
}

#[async_trait]
impl DataChannelHandle for WebRtcDataChannel {
    fn label(&self) -> &str {
        self.dc.label()
    }

    async fn send_text(&self, text: &str) -> Result<(), PeerError> {
        self.dc
            .send_text(text.to_string())
            .await
            .map(|_| ())
            .map_err(rejected)
    }

    async fn close(&self) {
        if let Err(err) = self.dc.close().await {
            debug!(target: "arcade::peer", label = %self.dc.label(), error = %err, "data channel close failed");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rollback_is_not_supported() {
        let err = to_rtc_description(SessionDescription {
            sdp_type: SdpType::Rollback,
            sdp: String::new(),
        })
        .unwrap_err();
        assert!(matches!(err, PeerError::Unsupported));
    }

    #[test]
    fn terminal_states_map_through() {
        assert_eq!(map_state(RTCPeerConnectionState::Failed), PeerState::Failed);
        assert!(map_state(RTCPeerConnectionState::Closed).is_terminal());
        assert!(!map_state(RTCPeerConnectionState::Connecting).is_terminal());
    }

    #[tokio::test]
    async fn factory_builds_a_peer_without_ice_servers() {
        let factory = WebRtcPeerFactory::new(Vec::new()).unwrap();
        assert!(factory.configuration().ice_servers.is_empty());
        let (tx, _rx) = tokio::sync::mpsc::unbounded_channel();
        let peer = factory.create(PeerEventSink::new(1, tx)).await.unwrap();
        peer.close().await.unwrap();
    }
}
