use clap::{Args, Parser};
use std::path::PathBuf;

use crate::config::{Config, DEFAULT_SIGNALING_URL};
use crate::telemetry::logging::{LogConfig, LogLevel};

#[derive(Parser, Debug)]
#[command(
    name = "arcade",
    about = "Play a cloud-streamed game over WebRTC from the terminal",
    author,
    version
)]
pub struct Cli {
    #[arg(
        long,
        env = "ARCADE_SIGNALING_URL",
        default_value = DEFAULT_SIGNALING_URL,
        help = "Websocket address of the signaling relay"
    )]
    pub signaling_url: String,

    #[arg(
        long = "ice-server",
        value_name = "URL",
        help = "STUN/TURN server url; repeat for several (defaults to ARCADE_ICE_SERVERS)"
    )]
    pub ice_servers: Vec<String>,

    #[arg(
        long,
        value_name = "GAME",
        help = "Start this game as soon as the relay lists it"
    )]
    pub game: Option<String>,

    #[command(flatten)]
    pub logging: LoggingArgs,
}

impl Cli {
    /// Environment configuration with the command-line overrides applied.
    pub fn config(&self) -> Config {
        let mut config = Config::from_env();
        config.signaling_url = self.signaling_url.clone();
        if !self.ice_servers.is_empty() {
            config.ice_servers = self.ice_servers.clone();
        }
        config
    }
}

#[derive(Args, Debug, Clone)]
pub struct LoggingArgs {
    #[arg(
        long = "log-level",
        value_enum,
        env = "ARCADE_LOG_LEVEL",
        default_value_t = LogLevel::Warn,
        help = "Minimum log level (error, warn, info, debug, trace)"
    )]
    pub level: LogLevel,

    #[arg(
        long = "log-file",
        value_name = "PATH",
        env = "ARCADE_LOG_FILE",
        help = "Write logs to the specified file instead of stderr"
    )]
    pub file: Option<PathBuf>,
}

impl LoggingArgs {
    pub fn to_config(&self) -> LogConfig {
        LogConfig {
            level: self.level,
            file: self.file.clone(),
        }
    }
}
