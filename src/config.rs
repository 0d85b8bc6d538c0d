//! Environment-variable driven configuration.
//!
//! Mirrors the source project's `forwarder::config` pattern: a typed
//! `Config` struct built from defaults overridden by env vars, with a
//! `ConfigError` raised only for genuinely-required fields. Only
//! `MESSAGING_API_URL`'s absence is non-fatal — it falls back to a
//! documented production default.

use crate::error::ConfigError;
use std::env;

/// Production default base URL, used when `MESSAGING_API_URL` is unset.
pub const DEFAULT_API_URL: &str = "https://api.messaging.example.com";

/// Default UDP port, overridable by `MESSAGING_UDP_PORT`.
pub const DEFAULT_UDP_PORT: u16 = 9999;

/// Default local TCP bridge port.
pub const DEFAULT_TCP_PORT: u16 = 7071;

/// Runtime configuration for a `messaging-agent` client.
#[derive(Debug, Clone)]
pub struct Config {
    pub api_url: String,
    pub api_key: Option<String>,
    pub udp_port: u16,
    pub webrtc_native_dir: Option<String>,
}

impl Config {
    /// Build a `Config` from the process environment:
    /// - `MESSAGING_API_URL` (optional, has a production default)
    /// - `MESSAGING_API_KEY` / `DEFAULT_API_KEY` (optional developer key)
    /// - `MESSAGING_UDP_PORT` (optional, must parse as `1..=65535`)
    /// - `WEBRTC_NATIVE_DIR` (optional)
    pub fn from_env() -> Result<Self, ConfigError> {
        let api_url = env::var("MESSAGING_API_URL").unwrap_or_else(|_| DEFAULT_API_URL.to_owned());

        let api_key = env::var("MESSAGING_API_KEY")
            .or_else(|_| env::var("DEFAULT_API_KEY"))
            .ok();

        let udp_port = match env::var("MESSAGING_UDP_PORT") {
            Ok(raw) => raw.parse::<u16>().map_err(|_| ConfigError::InvalidValue {
                field: "MESSAGING_UDP_PORT",
                reason: format!("{raw:?} is not a valid port in 1..=65535"),
            })?,
            Err(_) => DEFAULT_UDP_PORT,
        };
        if udp_port == 0 {
            return Err(ConfigError::InvalidValue {
                field: "MESSAGING_UDP_PORT",
                reason: "port 0 is not a valid UDP port".to_owned(),
            });
        }

        let webrtc_native_dir = env::var("WEBRTC_NATIVE_DIR").ok();

        Ok(Config {
            api_url,
            api_key,
            udp_port,
            webrtc_native_dir,
        })
    }
}

impl Default for Config {
    fn default() -> Self {
        Config {
            api_url: DEFAULT_API_URL.to_owned(),
            api_key: None,
            udp_port: DEFAULT_UDP_PORT,
            webrtc_native_dir: None,
        }
    }
}
