use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SdpType {
    Offer,
    Pranswer,
    Answer,
    Rollback,
}

/// Session description as browsers and pion serialize it: `{"type", "sdp"}`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionDescription {
    #[serde(rename = "type")]
    pub sdp_type: SdpType,
    pub sdp: String,
}

impl SessionDescription {
    pub fn offer(sdp: impl Into<String>) -> Self {
        Self {
            sdp_type: SdpType::Offer,
            sdp: sdp.into(),
        }
    }

    pub fn answer(sdp: impl Into<String>) -> Self {
        Self {
            sdp_type: SdpType::Answer,
            sdp: sdp.into(),
        }
    }
}

/// `RTCIceCandidateInit` wire shape.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct IceCandidate {
    pub candidate: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sdp_mid: Option<String>,
    #[serde(
        rename = "sdpMLineIndex",
        default,
        skip_serializing_if = "Option::is_none"
    )]
    pub sdp_mline_index: Option<u16>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub username_fragment: Option<String>,
}

/// One selectable item from the `msg_coor_handshake` catalog.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GameEntry {
    pub name: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StartGame {
    pub game: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ButtonState {
    pub button: u32,
    pub pressed: bool,
}

/// Sent on the `keyboard` data channel.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct KeyboardInput {
    pub user: u32,
    pub button_state: Vec<ButtonState>,
}

impl KeyboardInput {
    pub fn single(user: u32, button: u32, pressed: bool) -> Self {
        Self {
            user,
            button_state: vec![ButtonState { button, pressed }],
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(into = "i32", try_from = "i32")]
pub enum MouseButton {
    None,
    Left,
    Middle,
    Right,
}

impl From<MouseButton> for i32 {
    fn from(button: MouseButton) -> Self {
        match button {
            MouseButton::None => 0,
            MouseButton::Left => 1,
            MouseButton::Middle => 2,
            MouseButton::Right => 3,
        }
    }
}

impl TryFrom<i32> for MouseButton {
    type Error = String;

    fn try_from(value: i32) -> Result<Self, Self::Error> {
        match value {
            0 => Ok(MouseButton::None),
            1 => Ok(MouseButton::Left),
            2 => Ok(MouseButton::Middle),
            3 => Ok(MouseButton::Right),
            other => Err(format!("unknown mouse button {other}")),
        }
    }
}

/// Sent on the `mouse` data channel. Positions are relative motion.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct MouseInput {
    pub user: u32,
    pub button: MouseButton,
    pub pos_x: i32,
    // The worker decodes this field under its misspelled name.
    #[serde(rename = "pox_y")]
    pub pos_y: i32,
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn ice_candidate_uses_browser_field_names() {
        let candidate = IceCandidate {
            candidate: "candidate:0 1 UDP 2122252543 192.168.1.4 54321 typ host".into(),
            sdp_mid: Some("0".into()),
            sdp_mline_index: Some(0),
            username_fragment: None,
        };
        let value = serde_json::to_value(&candidate).unwrap();
        assert_eq!(
            value,
            json!({
                "candidate": "candidate:0 1 UDP 2122252543 192.168.1.4 54321 typ host",
                "sdpMid": "0",
                "sdpMLineIndex": 0
            })
        );
    }

    #[test]
    fn ice_candidate_accepts_null_fields() {
        let parsed: IceCandidate = serde_json::from_value(json!({
            "candidate": "candidate:1 1 udp 1 1.2.3.4 9 typ host",
            "sdpMid": null,
            "sdpMLineIndex": null,
            "usernameFragment": null
        }))
        .unwrap();
        assert_eq!(parsed.sdp_mid, None);
        assert_eq!(parsed.sdp_mline_index, None);
    }

    #[test]
    fn session_description_uses_type_key() {
        let value = serde_json::to_value(SessionDescription::answer("v=0")).unwrap();
        assert_eq!(value, json!({"type": "answer", "sdp": "v=0"}));
    }

    #[test]
    fn mouse_input_matches_worker_schema() {
        let input = MouseInput {
            user: 0,
            button: MouseButton::Left,
            pos_x: -3,
            pos_y: 7,
        };
        let value = serde_json::to_value(input).unwrap();
        assert_eq!(
            value,
            json!({"user": 0, "button": 1, "pos_x": -3, "pox_y": 7})
        );
        assert!(serde_json::from_value::<MouseInput>(json!({
            "user": 0, "button": 9, "pos_x": 0, "pox_y": 0
        }))
        .is_err());
    }

    #[test]
    fn keyboard_input_matches_worker_schema() {
        let value = serde_json::to_value(KeyboardInput::single(0, 4, true)).unwrap();
        assert_eq!(
            value,
            json!({"user": 0, "button_state": [{"button": 4, "pressed": true}]})
        );
    }
}
