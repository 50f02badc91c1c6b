use std::env;
use std::time::Duration;

use url::Url;

use crate::signaling::{SignalingConfig, SignalingError};

pub const DEFAULT_SIGNALING_URL: &str = "ws://localhost:9090/init/user/ws";
pub const DEFAULT_ICE_SERVER: &str = "stun:stun.l.google.com:19302";
const DEFAULT_RECONNECT_INTERVAL_MS: u64 = 5_000;
const DEFAULT_RECONNECT_ATTEMPTS: u32 = 20;

/// Arcade client configuration
#[derive(Debug, Clone)]
pub struct Config {
    /// Relay websocket address
    pub signaling_url: String,
    /// STUN/TURN urls handed to the peer connection
    pub ice_servers: Vec<String>,
    pub reconnect_interval: Duration,
    pub reconnect_attempts: u32,
}

impl Config {
    /// Load configuration from environment variables
    pub fn from_env() -> Self {
        let defaults = Self::default();
        let signaling_url = env::var("ARCADE_SIGNALING_URL")
            .ok()
            .filter(|value| !value.trim().is_empty())
            .unwrap_or(defaults.signaling_url);
        let ice_servers = env::var("ARCADE_ICE_SERVERS")
            .map(|value| parse_ice_servers(&value))
            .unwrap_or(defaults.ice_servers);
        let reconnect_interval = env::var("ARCADE_RECONNECT_INTERVAL_MS")
            .ok()
            .and_then(|value| value.trim().parse().ok())
            .map(Duration::from_millis)
            .unwrap_or(defaults.reconnect_interval);
        let reconnect_attempts = env::var("ARCADE_RECONNECT_ATTEMPTS")
            .ok()
            .and_then(|value| value.trim().parse().ok())
            .unwrap_or(defaults.reconnect_attempts);
        Self {
            signaling_url,
            ice_servers,
            reconnect_interval,
            reconnect_attempts,
        }
    }

    pub fn signaling(&self) -> Result<SignalingConfig, SignalingError> {
        let url = Url::parse(&self.signaling_url).map_err(|err| {
            SignalingError::InvalidUrl(format!("{}: {err}", self.signaling_url))
        })?;
        if !matches!(url.scheme(), "ws" | "wss") {
            return Err(SignalingError::InvalidUrl(format!(
                "{}: expected ws:// or wss://",
                self.signaling_url
            )));
        }
        Ok(SignalingConfig {
            url,
            reconnect_interval: self.reconnect_interval,
            max_reconnect_attempts: self.reconnect_attempts,
        })
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            signaling_url: DEFAULT_SIGNALING_URL.to_string(),
            ice_servers: vec![DEFAULT_ICE_SERVER.to_string()],
            reconnect_interval: Duration::from_millis(DEFAULT_RECONNECT_INTERVAL_MS),
            reconnect_attempts: DEFAULT_RECONNECT_ATTEMPTS,
        }
    }
}

/// Comma separated; an empty value disables public STUN entirely.
pub fn parse_ice_servers(value: &str) -> Vec<String> {
    value
        .split(',')
        .map(str::trim)
        .filter(|server| !server.is_empty())
        .map(str::to_string)
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::{LazyLock, Mutex};

    // Mutex to ensure environment variable tests don't run in parallel
    static ENV_MUTEX: LazyLock<Mutex<()>> = LazyLock::new(|| Mutex::new(()));

    const VARS: [&str; 4] = [
        "ARCADE_SIGNALING_URL",
        "ARCADE_ICE_SERVERS",
        "ARCADE_RECONNECT_INTERVAL_MS",
        "ARCADE_RECONNECT_ATTEMPTS",
    ];

    fn clear_vars() {
        for var in VARS {
            unsafe {
                env::remove_var(var);
            }
        }
    }

    #[test]
    fn test_default_config() {
        let config = Config::default();
        assert_eq!(config.signaling_url, DEFAULT_SIGNALING_URL);
        assert_eq!(config.ice_servers, vec![DEFAULT_ICE_SERVER.to_string()]);
        assert_eq!(config.reconnect_interval, Duration::from_secs(5));
        assert_eq!(config.reconnect_attempts, 20);
    }

    #[test]
    fn test_config_from_env_default() {
        let _lock = ENV_MUTEX.lock().unwrap();
        clear_vars();
        let config = Config::from_env();
        assert_eq!(config.signaling_url, DEFAULT_SIGNALING_URL);
        assert_eq!(config.reconnect_attempts, 20);
    }

    #[test]
    fn test_config_from_env_custom() {
        let _lock = ENV_MUTEX.lock().unwrap();
        clear_vars();
        unsafe {
            env::set_var("ARCADE_SIGNALING_URL", "wss://relay.example.com/init/user/ws");
            env::set_var("ARCADE_ICE_SERVERS", "stun:a.example:3478, turn:b.example:3478");
            env::set_var("ARCADE_RECONNECT_INTERVAL_MS", "250");
            env::set_var("ARCADE_RECONNECT_ATTEMPTS", "3");
        }
        let config = Config::from_env();
        clear_vars();

        assert_eq!(config.signaling_url, "wss://relay.example.com/init/user/ws");
        assert_eq!(
            config.ice_servers,
            vec!["stun:a.example:3478".to_string(), "turn:b.example:3478".to_string()]
        );
        assert_eq!(config.reconnect_interval, Duration::from_millis(250));
        assert_eq!(config.reconnect_attempts, 3);
    }

    #[test]
    fn empty_ice_servers_disable_stun() {
        assert!(parse_ice_servers("").is_empty());
        assert!(parse_ice_servers(" , ").is_empty());
    }

    #[test]
    fn signaling_config_rejects_non_websocket_urls() {
        let config = Config {
            signaling_url: "http://localhost:9090/init/user/ws".into(),
            ..Config::default()
        };
        assert!(matches!(
            config.signaling(),
            Err(SignalingError::InvalidUrl(_))
        ));

        let ok = Config::default().signaling().unwrap();
        assert_eq!(ok.url.as_str(), DEFAULT_SIGNALING_URL);
        assert_eq!(ok.max_reconnect_attempts, 20);
    }
}
