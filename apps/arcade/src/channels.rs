use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use arcade_proto::{KeyboardInput, MouseInput};
use thiserror::Error;
use tracing::{debug, trace};

use crate::peer::{DataChannelHandle, PeerError};

/// The two input channels the worker opens.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum InputClass {
    Keyboard,
    Mouse,
}

impl InputClass {
    pub fn label(self) -> &'static str {
        match self {
            InputClass::Keyboard => "keyboard",
            InputClass::Mouse => "mouse",
        }
    }

    pub fn from_label(label: &str) -> Option<Self> {
        match label {
            "keyboard" => Some(InputClass::Keyboard),
            "mouse" => Some(InputClass::Mouse),
            _ => None,
        }
    }
}

impl fmt::Display for InputClass {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

#[derive(Debug, Error)]
pub enum ChannelError {
    #[error("{0} channel is not open yet")]
    NotReady(InputClass),
    #[error("failed to encode input: {0}")]
    Encode(#[from] serde_json::Error),
    #[error("{class} channel send failed: {source}")]
    Send {
        class: InputClass,
        #[source]
        source: PeerError,
    },
}

/// Registry of open input channels for the current connection.
#[derive(Default)]
pub struct DataChannelRouter {
    channels: HashMap<InputClass, Arc<dyn DataChannelHandle>>,
}

impl DataChannelRouter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register an opened channel. Returns the class it was filed under, or
    /// `None` for labels this client does not use.
    pub fn register(
        &mut self,
        label: &str,
        handle: Arc<dyn DataChannelHandle>,
    ) -> Option<InputClass> {
        let Some(class) = InputClass::from_label(label) else {
            debug!(target: "arcade::channels", label, "ignoring unknown data channel");
            return None;
        };
        debug!(target: "arcade::channels", %class, "data channel ready");
        self.channels.insert(class, handle);
        Some(class)
    }

    pub fn is_ready(&self, class: InputClass) -> bool {
        self.channels.contains_key(&class)
    }

    pub async fn send_on(&self, class: InputClass, payload: &str) -> Result<(), ChannelError> {
        let handle = self
            .channels
            .get(&class)
            .ok_or(ChannelError::NotReady(class))?;
        handle
            .send_text(payload)
            .await
            .map_err(|source| ChannelError::Send { class, source })?;
        trace!(target: "arcade::channels", %class, len = payload.len(), "input sent");
        Ok(())
    }

    pub async fn send_keyboard(&self, input: &KeyboardInput) -> Result<(), ChannelError> {
        let payload = serde_json::to_string(input)?;
        self.send_on(InputClass::Keyboard, &payload).await
    }

    pub async fn send_mouse(&self, input: &MouseInput) -> Result<(), ChannelError> {
        let payload = serde_json::to_string(input)?;
        self.send_on(InputClass::Mouse, &payload).await
    }

    /// Close and forget every channel. Only called when the session ends.
    pub async fn close_all(&mut self) {
        for (class, handle) in self.channels.drain() {
            trace!(target: "arcade::channels", %class, "closing data channel");
            handle.close().await;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::peer::mock::MockDataChannel;
    use arcade_proto::MouseButton;

    #[tokio::test]
    async fn keyboard_before_open_is_not_ready() {
        let router = DataChannelRouter::new();
        let err = router.send_on(InputClass::Keyboard, "{}").await.unwrap_err();
        assert!(matches!(err, ChannelError::NotReady(InputClass::Keyboard)));
    }

    #[tokio::test]
    async fn open_channels_carry_serialized_input() {
        let mut router = DataChannelRouter::new();
        let keyboard = MockDataChannel::new("keyboard");
        let mouse = MockDataChannel::new("mouse");
        assert_eq!(
            router.register("keyboard", keyboard.clone()),
            Some(InputClass::Keyboard)
        );
        assert_eq!(router.register("mouse", mouse.clone()), Some(InputClass::Mouse));

        router
            .send_keyboard(&KeyboardInput::single(0, 8, true))
            .await
            .unwrap();
        router
            .send_mouse(&MouseInput {
                user: 0,
                button: MouseButton::None,
                pos_x: 4,
                pos_y: -2,
            })
            .await
            .unwrap();

        assert_eq!(
            keyboard.sent(),
            vec![r#"{"user":0,"button_state":[{"button":8,"pressed":true}]}"#.to_string()]
        );
        assert_eq!(
            mouse.sent(),
            vec![r#"{"user":0,"button":0,"pos_x":4,"pox_y":-2}"#.to_string()]
        );
    }

    #[tokio::test]
    async fn unknown_labels_are_ignored() {
        let mut router = DataChannelRouter::new();
        assert_eq!(router.register("chat", MockDataChannel::new("chat")), None);
        assert!(!router.is_ready(InputClass::Keyboard));
        assert!(!router.is_ready(InputClass::Mouse));
    }

    #[tokio::test]
    async fn close_all_closes_and_clears() {
        let mut router = DataChannelRouter::new();
        let keyboard = MockDataChannel::new("keyboard");
        router.register("keyboard", keyboard.clone());
        router.close_all().await;
        assert!(keyboard.is_closed());
        assert!(matches!(
            router.send_on(InputClass::Keyboard, "{}").await,
            Err(ChannelError::NotReady(_))
        ));
    }
}
