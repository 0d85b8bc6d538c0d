//! Channel API — stateless facade over the HTTP/UDP transports applying
//! authentication hashing and request shaping.
//!
//! Every operation here catches transport/protocol failures internally and
//! returns a typed failure value (`false`, an empty result, or a
//! default-constructed response) rather than letting an error escape the
//! facade.

use crate::http_transport::{HttpTransport, LONG_POLL_TIMEOUT, RequestOutcome, DEFAULT_TIMEOUT};
use crate::udp_transport::UdpTransport;
use msg_protocol::{
    AgentInfo, ApiKeyScope, ConnectData, ConnectRequest, CreateChannelData, CreateChannelRequest,
    DisconnectRequest, EventType, OperationResponse, PollSource, PullData, PullRequest, PushRequest,
    ReceiveConfig, SessionOnlyRequest, Status, UdpAction,
};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

/// Inputs to `connect`. Either `channel_id` or a
/// `(channel_name, channel_password_hash)` pair must be present — enforced
/// by the session core before this is built, since the facade itself never
/// raises `ConfigError` (it has no error channel to raise it on).
#[derive(Debug, Clone)]
pub struct ConnectParams {
    pub channel_id: Option<String>,
    pub channel_name: String,
    /// Already-hashed password (never the raw password).
    pub channel_password_hash: String,
    pub agent_name: String,
    pub session_id: Option<String>,
    pub enable_webrtc_relay: bool,
    pub api_key_scope: ApiKeyScope,
    pub agent_context: HashMap<String, String>,
}

/// Outcome of `connect`/`create_channel`. Success is `status == "success" &&
/// session_id` non-empty; anything else — including transport failure —
/// collapses to `Failed`, since the caller cannot distinguish the two.
#[derive(Debug, Clone)]
pub enum ConnectOutcome {
    Connected(ConnectData),
    Failed { message: Option<String> },
}

impl ConnectOutcome {
    pub fn is_connected(&self) -> bool {
        matches!(self, ConnectOutcome::Connected(_))
    }
}

/// Outcome of a `/pull` call, retaining enough shape for the session core
/// to classify "unknown session" (an auth/reconnect trigger) separately
/// from "no data yet" or a transient transport hiccup.
#[derive(Debug, Clone)]
pub enum PullOutcome {
    Data(PullData),
    AuthError(String),
    NotFound(String),
    TransportFailure,
}

/// A non-success `status:"error"` body with no 401/403/404 on the wire can
/// still describe an unknown/expired session. This is the only place
/// that inspects the message text, and only to route to reconnect.
fn classify_error_message(message: Option<&str>) -> PullOutcome {
    let lower = message.unwrap_or_default().to_ascii_lowercase();
    if lower.contains("session") && (lower.contains("unknown") || lower.contains("expired") || lower.contains("invalid")) {
        PullOutcome::AuthError(message.unwrap_or_default().to_owned())
    } else {
        PullOutcome::TransportFailure
    }
}

pub struct ChannelApi {
    http: Arc<HttpTransport>,
    udp: Option<Arc<UdpTransport>>,
}

impl ChannelApi {
    pub fn new(http: Arc<HttpTransport>, udp: Option<Arc<UdpTransport>>) -> Self {
        Self { http, udp }
    }

    pub async fn create_channel(&self, name: &str, password_hash: &str) -> Option<String> {
        let body = CreateChannelRequest {
            channel_name: name.to_owned(),
            channel_password: password_hash.to_owned(),
        };
        let response = self.post_json::<_, CreateChannelData>("/create-channel", &body, DEFAULT_TIMEOUT).await?;
        if response.is_ok() {
            response.data.map(|d| d.channel_id)
        } else {
            None
        }
    }

    pub async fn connect(&self, params: ConnectParams) -> ConnectOutcome {
        let body = ConnectRequest {
            channel_id: params.channel_id,
            channel_name: params.channel_name,
            channel_password: params.channel_password_hash,
            agent_name: params.agent_name,
            session_id: params.session_id,
            enable_webrtc_relay: params.enable_webrtc_relay,
            api_key_scope: params.api_key_scope,
            agent_context: params.agent_context,
        };
        match self.post_json::<_, ConnectData>("/connect", &body, DEFAULT_TIMEOUT).await {
            Some(response) if response.is_ok() => match response.data {
                Some(data) if !data.session_id.is_empty() => ConnectOutcome::Connected(data),
                _ => ConnectOutcome::Failed { message: response.status_message },
            },
            Some(response) => ConnectOutcome::Failed { message: response.status_message },
            None => ConnectOutcome::Failed { message: None },
        }
    }

    #[allow(clippy::too_many_arguments)]
    pub async fn push(
        &self,
        session_id: &str,
        event_type: EventType,
        to: &str,
        filter: Option<String>,
        content: &str,
        encrypted: bool,
        ephemeral: Option<bool>,
    ) -> bool {
        let body = PushRequest {
            session_id: session_id.to_owned(),
            event_type,
            to: to.to_owned(),
            filter,
            content: content.to_owned(),
            encrypted,
            ephemeral,
        };
        self.post_ok("/push", &body, DEFAULT_TIMEOUT).await
    }

    pub async fn pull(
        &self,
        session_id: &str,
        global_offset: i64,
        local_offset: i64,
        limit: u32,
        poll_source: PollSource,
    ) -> PullData {
        match self.pull_outcome(session_id, global_offset, local_offset, limit, poll_source).await {
            PullOutcome::Data(data) => data,
            _ => PullData::default(),
        }
    }

    /// Like [`Self::pull`] but preserves enough of the failure shape for
    /// the session core's reconnect/backoff classification, which the plain bool/empty-result facade can't express.
    pub async fn pull_outcome(
        &self,
        session_id: &str,
        global_offset: i64,
        local_offset: i64,
        limit: u32,
        poll_source: PollSource,
    ) -> PullOutcome {
        let body = PullRequest {
            session_id: session_id.to_owned(),
            receive_config: ReceiveConfig { global_offset, local_offset, limit, poll_source },
        };
        let Ok(encoded) = serde_json::to_string(&body) else {
            return PullOutcome::TransportFailure;
        };
        match self.http.post("/pull", encoded, LONG_POLL_TIMEOUT).await {
            Ok(RequestOutcome::Response(resp)) => {
                if resp.status == 401 || resp.status == 403 {
                    return PullOutcome::AuthError(format!("http {}", resp.status));
                }
                if resp.status == 404 {
                    return PullOutcome::NotFound(format!("http {}", resp.status));
                }
                if !resp.is_ok() {
                    return PullOutcome::TransportFailure;
                }
                match serde_json::from_str::<OperationResponse<PullData>>(&resp.body) {
                    Ok(parsed) if parsed.is_ok() => PullOutcome::Data(parsed.data.unwrap_or_default()),
                    Ok(parsed) => classify_error_message(parsed.status_message.as_deref()),
                    Err(e) => {
                        tracing::debug!(error = %e, "malformed pull response body");
                        PullOutcome::TransportFailure
                    }
                }
            }
            Ok(RequestOutcome::ConnectionReset) => PullOutcome::TransportFailure,
            Err(e) => {
                tracing::debug!(error = %e, "pull transport error");
                PullOutcome::TransportFailure
            }
        }
    }

    pub async fn list_agents(&self, session_id: &str) -> Vec<AgentInfo> {
        self.list_agents_at("/list-agents", session_id).await
    }

    pub async fn list_system_agents(&self, session_id: &str) -> Vec<AgentInfo> {
        self.list_agents_at("/list-system-agents", session_id).await
    }

    async fn list_agents_at(&self, path: &str, session_id: &str) -> Vec<AgentInfo> {
        let body = SessionOnlyRequest { session_id: session_id.to_owned() };
        match self.post_json::<_, Vec<AgentInfo>>(path, &body, DEFAULT_TIMEOUT).await {
            Some(response) if response.is_ok() => response.data.unwrap_or_default(),
            _ => Vec::new(),
        }
    }

    /// Best-effort: never surfaces server failure to the caller.
    pub async fn disconnect(&self, session_id: &str) -> bool {
        let body = DisconnectRequest { session_id: session_id.to_owned(), async_disconnect: None };
        self.post_ok("/disconnect", &body, DEFAULT_TIMEOUT).await
    }

    pub async fn udp_push(
        &self,
        session_id: &str,
        event_type: EventType,
        to: &str,
        filter: Option<String>,
        content: &str,
        encrypted: bool,
        ephemeral: Option<bool>,
    ) -> bool {
        let Some(udp) = &self.udp else { return false };
        let payload = PushRequest {
            session_id: session_id.to_owned(),
            event_type,
            to: to.to_owned(),
            filter,
            content: content.to_owned(),
            encrypted,
            ephemeral,
        };
        let envelope = msg_protocol::UdpEnvelope { action: UdpAction::Push, payload, request_id: None };
        udp.send(&envelope).await
    }

    /// `udpPull` uses `send_and_wait` with a short (≤3s) timeout and
    /// returns an empty result on timeout.
    pub async fn udp_pull(
        &self,
        session_id: &str,
        global_offset: i64,
        local_offset: i64,
        limit: u32,
        poll_source: PollSource,
    ) -> PullData {
        let Some(udp) = &self.udp else { return PullData::default() };
        let payload = PullRequest {
            session_id: session_id.to_owned(),
            receive_config: ReceiveConfig { global_offset, local_offset, limit, poll_source },
        };
        udp.send_and_wait::<_, OperationResponse<PullData>>(UdpAction::Pull, payload, Duration::from_secs(3))
            .await
            .filter(OperationResponse::is_ok)
            .and_then(|r| r.data)
            .unwrap_or_default()
    }

    async fn post_json<B: serde::Serialize, T: serde::de::DeserializeOwned>(
        &self,
        path: &str,
        body: &B,
        timeout: Duration,
    ) -> Option<OperationResponse<T>> {
        let encoded = serde_json::to_string(body).ok()?;
        match self.http.post(path, encoded, timeout).await {
            Ok(RequestOutcome::Response(resp)) if resp.is_ok() => {
                match serde_json::from_str::<OperationResponse<T>>(&resp.body) {
                    Ok(parsed) => Some(parsed),
                    Err(e) => {
                        tracing::debug!(path, error = %e, "malformed operation response body");
                        None
                    }
                }
            }
            Ok(RequestOutcome::Response(resp)) => {
                tracing::debug!(path, status = resp.status, "non-2xx channel api response");
                Some(OperationResponse { status: Status::Error, data: None, status_message: None })
            }
            Ok(RequestOutcome::ConnectionReset) => {
                tracing::warn!(path, "channel api call dropped by local throttle");
                None
            }
            Err(e) => {
                tracing::debug!(path, error = %e, "channel api transport error");
                None
            }
        }
    }

    async fn post_ok<B: serde::Serialize>(&self, path: &str, body: &B, timeout: Duration) -> bool {
        self.post_json::<_, serde_json::Value>(path, body, timeout)
            .await
            .map(|r| r.is_ok())
            .unwrap_or(false)
    }
}
