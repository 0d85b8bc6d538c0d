//! `messaging-agent` — client-side agent runtime for a real-time messaging
//! platform channel: session/offset core, dual-transport (HTTP + UDP)
//! dispatch, and a WebRTC signaling coordinator layered on top of channel
//! events.
//!
//! This crate is the library; `services/bridge` wraps it with a
//! line-delimited JSON TCP control protocol for non-Rust callers.

pub mod agent_context;
pub mod channel_api;
pub mod config;
pub mod error;
pub mod http_transport;
pub mod persistence;
#[cfg(test)]
mod test_support;
pub mod udp_transport;
pub mod util;
pub mod webrtc;

mod session;

pub use agent_context::AgentContext;
pub use channel_api::{ChannelApi, ConnectOutcome, ConnectParams, PullOutcome};
pub use config::Config;
pub use error::AgentError;
pub use http_transport::HttpTransport;
pub use persistence::{SessionSnapshot, SessionStore};
pub use session::{ConnectConfig, EventBatch, EventHandler, Session, SessionEvent, SessionState};
pub use udp_transport::UdpTransport;

pub use msg_crypto as crypto;
pub use msg_protocol as protocol;

/// Construct the HTTP/UDP transports and a [`ChannelApi`] from a [`Config`],
/// the way a host application assembles the pieces before calling
/// [`Session::connect`]. UDP is best-effort: if the host/port can't be
/// resolved the channel API still works over HTTP alone, with `udpPush`/
/// `udpPull` simply reporting failure/empty results.
pub async fn build_channel_api(config: &Config, udp_host: &str) -> std::sync::Arc<ChannelApi> {
    let http = std::sync::Arc::new(HttpTransport::new(config.api_url.clone(), config.api_key.clone()));
    let udp = match UdpTransport::connect(udp_host, config).await {
        Ok(udp) => Some(std::sync::Arc::new(udp)),
        Err(e) => {
            tracing::warn!(error = %e, "udp transport unavailable, continuing over http only");
            None
        }
    };
    std::sync::Arc::new(ChannelApi::new(http, udp))
}
