use std::fmt;
use std::str::FromStr;

use base64::Engine as _;
use base64::engine::general_purpose::STANDARD as BASE64_STANDARD;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;

/// Intent of a signaling message. The set is closed; anything else on the wire
/// is rejected at decode time.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Label {
    CoordinatorHandshake,
    WebRtcInit,
    WebRtcOffer,
    WebRtcAnswer,
    WebRtcIceCandidate,
    StartGame,
    StopGame,
}

impl Label {
    pub const ALL: [Label; 7] = [
        Label::CoordinatorHandshake,
        Label::WebRtcInit,
        Label::WebRtcOffer,
        Label::WebRtcAnswer,
        Label::WebRtcIceCandidate,
        Label::StartGame,
        Label::StopGame,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            Label::CoordinatorHandshake => "msg_coor_handshake",
            Label::WebRtcInit => "msg_webrtc_init",
            Label::WebRtcOffer => "msg_webrtc_offer",
            Label::WebRtcAnswer => "msg_webrtc_answer",
            Label::WebRtcIceCandidate => "msg_webrtc_ice_candidate",
            Label::StartGame => "msg_start_game",
            Label::StopGame => "msg_stop_game",
        }
    }
}

impl fmt::Display for Label {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Label {
    type Err = DecodeError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        Label::ALL
            .into_iter()
            .find(|label| label.as_str() == value)
            .ok_or_else(|| DecodeError::UnknownLabel(value.to_string()))
    }
}

#[derive(Debug, Error)]
pub enum DecodeError {
    #[error("malformed signaling frame: {0}")]
    Frame(#[source] serde_json::Error),
    #[error("invalid payload encoding: {0}")]
    Payload(#[source] base64::DecodeError),
    #[error("payload is not valid utf-8: {0}")]
    PayloadUtf8(#[source] std::string::FromUtf8Error),
    #[error("unknown signaling label {0:?}")]
    UnknownLabel(String),
    #[error("payload for {label} does not match its schema: {source}")]
    Inner {
        label: Label,
        #[source]
        source: serde_json::Error,
    },
}

#[derive(Debug, Error)]
#[error("failed to serialize signaling payload: {0}")]
pub struct EncodeError(#[from] serde_json::Error);

/// One signaling message. `payload` holds the inner JSON text in the clear;
/// the reversible text encoding is applied only on the wire.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Envelope {
    pub label: Label,
    pub payload: String,
    pub error: Option<String>,
}

#[derive(Serialize, Deserialize)]
struct WireFrame {
    label: String,
    #[serde(default)]
    payload: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    error: Option<Value>,
}

impl Envelope {
    /// An envelope with no inner value, e.g. `msg_stop_game`.
    pub fn bare(label: Label) -> Self {
        Self {
            label,
            payload: String::new(),
            error: None,
        }
    }

    /// Deserialize the inner value. No schema is checked until this is called.
    pub fn parse<T: DeserializeOwned>(&self) -> Result<T, DecodeError> {
        serde_json::from_str(&self.payload).map_err(|source| DecodeError::Inner {
            label: self.label,
            source,
        })
    }

    /// Render the wire frame: `{"label": .., "payload": base64(json), "error": ..}`.
    pub fn to_text(&self) -> Result<String, EncodeError> {
        let frame = WireFrame {
            label: self.label.as_str().to_string(),
            payload: Some(BASE64_STANDARD.encode(self.payload.as_bytes())),
            error: self.error.clone().map(Value::String),
        };
        Ok(serde_json::to_string(&frame)?)
    }
}

pub fn encode<T: Serialize + ?Sized>(label: Label, inner: &T) -> Result<Envelope, EncodeError> {
    Ok(Envelope {
        label,
        payload: serde_json::to_string(inner)?,
        error: None,
    })
}

pub fn decode(raw: &str) -> Result<Envelope, DecodeError> {
    let frame: WireFrame = serde_json::from_str(raw).map_err(DecodeError::Frame)?;
    let label = frame.label.parse::<Label>()?;
    let payload = match frame.payload.as_deref() {
        None | Some("") => String::new(),
        Some(text) => {
            let bytes = BASE64_STANDARD
                .decode(text)
                .map_err(DecodeError::Payload)?;
            String::from_utf8(bytes).map_err(DecodeError::PayloadUtf8)?
        }
    };
    Ok(Envelope {
        label,
        payload,
        error: frame.error.and_then(relay_error_text),
    })
}

// The Go relay serializes its `error` interface as `{}` when set and `null`
// when not, so any non-null value counts as an error report.
fn relay_error_text(value: Value) -> Option<String> {
    match value {
        Value::Null => None,
        Value::String(text) if text.is_empty() => None,
        Value::String(text) => Some(text),
        other => Some(other.to_string()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::payload::{GameEntry, IceCandidate, SessionDescription, StartGame};
    use serde_json::json;

    #[test]
    fn start_game_round_trips_through_the_wire() {
        let envelope = encode(
            Label::StartGame,
            &StartGame {
                game: "pong".into(),
            },
        )
        .unwrap();
        let text = envelope.to_text().unwrap();
        let decoded = decode(&text).unwrap();
        assert_eq!(decoded, envelope);
        let inner: StartGame = decoded.parse().unwrap();
        assert_eq!(inner.game, "pong");
    }

    #[test]
    fn payload_is_base64_of_the_inner_json() {
        let envelope = encode(Label::WebRtcInit, &json!({})).unwrap();
        let frame: Value = serde_json::from_str(&envelope.to_text().unwrap()).unwrap();
        assert_eq!(frame["label"], "msg_webrtc_init");
        assert_eq!(frame["payload"], "e30=");
        assert!(frame.get("error").is_none());
    }

    #[test]
    fn every_label_survives_a_round_trip() {
        let offer = SessionDescription::offer("v=0\r\no=- 1 1 IN IP4 0.0.0.0\r\n");
        let candidate = IceCandidate {
            candidate: "candidate:1 1 udp 2130706431 10.0.0.2 50000 typ host".into(),
            sdp_mid: Some("0".into()),
            sdp_mline_index: Some(0),
            username_fragment: None,
        };
        for label in Label::ALL {
            let envelope = match label {
                Label::CoordinatorHandshake => {
                    encode(label, &vec![GameEntry { name: "mario".into() }])
                }
                Label::WebRtcOffer | Label::WebRtcAnswer => encode(label, &offer),
                Label::WebRtcIceCandidate => encode(label, &candidate),
                Label::StartGame => encode(label, &StartGame { game: "zelda".into() }),
                Label::WebRtcInit | Label::StopGame => encode(label, &json!({})),
            }
            .unwrap();
            let decoded = decode(&envelope.to_text().unwrap()).unwrap();
            assert_eq!(decoded.label, label);
            assert_eq!(decoded.payload, envelope.payload);
        }
    }

    #[test]
    fn escaped_and_non_ascii_values_survive_a_round_trip() {
        let game = StartGame {
            game: "π\"\\\n/\u{0}ゲーム 🎮".into(),
        };
        let catalog = vec![
            GameEntry { name: "Pokémon \"Red\"".into() },
            GameEntry { name: "tab\tend\r\n".into() },
        ];

        let text = encode(Label::StartGame, &game).unwrap().to_text().unwrap();
        let decoded: StartGame = decode(&text).unwrap().parse().unwrap();
        assert_eq!(decoded, game);

        let text = encode(Label::CoordinatorHandshake, &catalog)
            .unwrap()
            .to_text()
            .unwrap();
        let decoded: Vec<GameEntry> = decode(&text).unwrap().parse().unwrap();
        assert_eq!(decoded, catalog);
    }

    #[test]
    fn invalid_outer_json_is_a_frame_error() {
        let err = decode("{not json").unwrap_err();
        assert!(matches!(err, DecodeError::Frame(_)), "{err:?}");
    }

    #[test]
    fn invalid_payload_encoding_is_distinct_from_frame_error() {
        let err = decode(r#"{"label":"msg_webrtc_offer","payload":"%%%"}"#).unwrap_err();
        assert!(matches!(err, DecodeError::Payload(_)), "{err:?}");
    }

    #[test]
    fn unknown_label_is_rejected() {
        let err = decode(r#"{"label":"msg_chat","payload":""}"#).unwrap_err();
        assert!(matches!(err, DecodeError::UnknownLabel(ref label) if label == "msg_chat"));
    }

    #[test]
    fn relay_error_reports_are_normalized() {
        let go_error = decode(r#"{"label":"msg_webrtc_init","payload":null,"error":{}}"#).unwrap();
        assert_eq!(go_error.payload, "");
        assert_eq!(go_error.error.as_deref(), Some("{}"));

        let text_error =
            decode(r#"{"label":"msg_start_game","payload":"","error":"no worker"}"#).unwrap();
        assert_eq!(text_error.error.as_deref(), Some("no worker"));

        let no_error = decode(r#"{"label":"msg_stop_game","payload":"","error":null}"#).unwrap();
        assert_eq!(no_error.error, None);
    }

    #[test]
    fn parse_reports_schema_mismatch_with_label() {
        let envelope = Envelope {
            label: Label::WebRtcOffer,
            payload: r#"{"sdp": 3}"#.into(),
            error: None,
        };
        let err = envelope.parse::<SessionDescription>().unwrap_err();
        assert!(matches!(
            err,
            DecodeError::Inner {
                label: Label::WebRtcOffer,
                ..
            }
        ));
    }
}
