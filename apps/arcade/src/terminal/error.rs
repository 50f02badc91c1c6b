use crate::session::SessionError;
use crate::signaling::SignalingError;
use std::io;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum CliError {
    #[error("{0}")]
    Session(#[from] SessionError),
    #[error("{0}")]
    Signaling(#[from] SignalingError),
    #[error("io error: {0}")]
    Io(#[from] io::Error),
    #[error("peer connection setup failed: {0}")]
    PeerSetup(String),
    #[error("terminal runtime error: {0}")]
    Runtime(String),
    #[error("invalid argument: {0}")]
    InvalidArgument(String),
}
