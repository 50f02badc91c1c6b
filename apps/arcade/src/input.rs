use std::collections::HashMap;

use arcade_proto::KeyboardInput;

/// libretro `RETRO_DEVICE_ID_JOYPAD_*` ids, in wire order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u32)]
pub enum RetroButton {
    B = 0,
    Y = 1,
    Select = 2,
    Start = 3,
    Up = 4,
    Down = 5,
    Left = 6,
    Right = 7,
    A = 8,
    X = 9,
    L = 10,
    R = 11,
    L2 = 12,
    R2 = 13,
    L3 = 14,
    R3 = 15,
}

impl RetroButton {
    pub fn id(self) -> u32 {
        self as u32
    }
}

/// Key that leaves the running game instead of reaching the worker.
pub const QUIT_KEY: &str = "KeyQ";

/// Only one player is supported.
pub const PLAYER_ONE: u32 = 0;

const DEFAULT_BINDINGS: &[(&str, RetroButton)] = &[
    ("KeyZ", RetroButton::B),
    ("KeyA", RetroButton::Y),
    ("ShiftRight", RetroButton::Select),
    ("Enter", RetroButton::Start),
    ("ArrowUp", RetroButton::Up),
    ("ArrowDown", RetroButton::Down),
    ("ArrowLeft", RetroButton::Left),
    ("ArrowRight", RetroButton::Right),
    ("KeyX", RetroButton::A),
    ("KeyS", RetroButton::X),
    ("KeyW", RetroButton::L),
    ("KeyE", RetroButton::R),
    ("Digit1", RetroButton::L2),
    ("Digit2", RetroButton::R2),
    ("Digit3", RetroButton::L3),
    ("Digit4", RetroButton::R3),
];

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum KeyAction {
    Quit,
    Button(KeyboardInput),
}

/// Maps browser-style key codes (`KeyboardEvent.code`) to retropad buttons.
#[derive(Debug, Clone)]
pub struct Keymap {
    bindings: HashMap<String, RetroButton>,
}

impl Default for Keymap {
    fn default() -> Self {
        Self {
            bindings: DEFAULT_BINDINGS
                .iter()
                .map(|(code, button)| (code.to_string(), *button))
                .collect(),
        }
    }
}

impl Keymap {
    pub fn button(&self, code: &str) -> Option<RetroButton> {
        self.bindings.get(code).copied()
    }

    /// Translate a key transition. Releasing the quit key and unbound keys
    /// produce nothing.
    pub fn translate(&self, code: &str, pressed: bool) -> Option<KeyAction> {
        if code == QUIT_KEY {
            return pressed.then_some(KeyAction::Quit);
        }
        let button = self.button(code)?;
        Some(KeyAction::Button(KeyboardInput::single(
            PLAYER_ONE,
            button.id(),
            pressed,
        )))
    }
}
