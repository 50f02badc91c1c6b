//! Shared protocol definitions for client ↔ relay signaling.
//! Kept free of runtime code so the relay, the worker and the client can all
//! agree on one set of wire types.

mod envelope;
mod payload;

pub use envelope::{DecodeError, EncodeError, Envelope, Label, decode, encode};
pub use payload::{
    ButtonState, GameEntry, IceCandidate, KeyboardInput, MouseButton, MouseInput, SdpType,
    SessionDescription, StartGame,
};
