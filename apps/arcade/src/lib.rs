pub mod channels;
pub mod config;
pub mod input;
pub mod negotiation;
pub mod peer;
pub mod session;
pub mod signaling;
pub mod telemetry;
pub mod terminal;
