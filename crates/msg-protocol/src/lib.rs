// msg-protocol: wire types for the messaging-agent channel API.
//
// These mirror the JSON request/response bodies the service expects and
// the UDP envelope that wraps the same payloads. No I/O lives here — just
// the shapes and their serde contract, so both the HTTP and UDP transports
// encode/decode identically.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;

// ---------------------------------------------------------------------------
// Enumerations
// ---------------------------------------------------------------------------

/// Event payload type. Serializes as its uppercase name on the wire.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum EventType {
    ChatText,
    ChatFile,
    /// `CHAT_WEBRTC_SIGNAL` is the historical name for this type; some
    /// deployments emit `WEBRTC_SIGNALING` instead. Both decode to this
    /// variant; we always encode `WEBRTC_SIGNALING`.
    #[serde(alias = "CHAT_WEBRTC_SIGNAL", rename = "WEBRTC_SIGNALING")]
    WebrtcSignaling,
    GameState,
    GameInput,
    GameSync,
    Custom,
}

/// Channel identity derivation / authorization scope.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ApiKeyScope {
    Private,
    Public,
}

/// Opaque poll-fulfillment hint. The client never interprets this value;
/// it is carried through to the server and echoed back in pull responses.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum PollSource {
    Auto,
    Cache,
    Kafka,
    Database,
}

/// Top-level status discriminator used by every operation response.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Status {
    Success,
    Error,
}

// ---------------------------------------------------------------------------
// Event
// ---------------------------------------------------------------------------

/// A single channel event as delivered by a pull response.
///
/// `global_offset`/`local_offset` are `None` for ephemeral events, which are
/// never assigned durable offsets.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EventMessage {
    pub timestamp: i64,
    pub from: String,
    /// Recipient agent name, or `"*"` for broadcast.
    pub to: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub filter: Option<String>,
    #[serde(rename = "type")]
    pub event_type: EventType,
    pub content: String,
    #[serde(default)]
    pub encrypted: bool,
    #[serde(default)]
    pub ephemeral: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub global_offset: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub local_offset: Option<i64>,
}

// ---------------------------------------------------------------------------
// AgentInfo
// ---------------------------------------------------------------------------

/// Observed view of another participant on the channel.
///
/// `role` is `None` for a normal agent; any `Some(_)` value marks a system
/// role. Client code must never hard-code role name strings — treat any
/// non-null role as "system" (see `listSystemAgents`).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AgentInfo {
    pub agent_name: String,
    pub agent_type: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub descriptor: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ip_address: Option<String>,
    pub connection_time: i64,
    #[serde(default)]
    pub metadata: HashMap<String, String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub role: Option<String>,
    /// Comma-list shorthand filter the agent joined with, if any.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub custom_event_type: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub restricted_capabilities: Option<Vec<String>>,
}

impl AgentInfo {
    /// True when this agent represents a system role.
    pub fn is_system(&self) -> bool {
        self.role.is_some()
    }
}

// ---------------------------------------------------------------------------
// /create-channel
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateChannelRequest {
    pub channel_name: String,
    /// The already-hashed password (never the raw password).
    pub channel_password: String,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateChannelData {
    pub channel_id: String,
}

// ---------------------------------------------------------------------------
// /connect
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ConnectRequest {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub channel_id: Option<String>,
    pub channel_name: String,
    /// The already-hashed password.
    pub channel_password: String,
    pub agent_name: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub session_id: Option<String>,
    pub enable_webrtc_relay: bool,
    pub api_key_scope: ApiKeyScope,
    pub agent_context: HashMap<String, String>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConnectData {
    pub session_id: String,
    pub channel_id: String,
    pub global_offset: i64,
    pub local_offset: i64,
    pub connection_time: i64,
    #[serde(default)]
    pub message: Option<String>,
}

// ---------------------------------------------------------------------------
// /push
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PushRequest {
    pub session_id: String,
    #[serde(rename = "type")]
    pub event_type: EventType,
    /// Empty string when `filter` is used instead of a direct recipient.
    pub to: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub filter: Option<String>,
    pub content: String,
    pub encrypted: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub ephemeral: Option<bool>,
}

// ---------------------------------------------------------------------------
// /pull
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ReceiveConfig {
    pub global_offset: i64,
    pub local_offset: i64,
    pub limit: u32,
    pub poll_source: PollSource,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PullRequest {
    pub session_id: String,
    pub receive_config: ReceiveConfig,
}

/// Pull response payload.
///
/// Accepts both `events` and the legacy `messages` key for the durable
/// array. `next_global_offset`/`next_local_offset` are the sole source of
/// truth for cursor advancement; a missing field means the corresponding
/// cursor is unchanged, which is why both are `Option`.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PullData {
    #[serde(default, alias = "messages")]
    pub events: Vec<EventMessage>,
    #[serde(default)]
    pub ephemeral_events: Vec<EventMessage>,
    #[serde(default)]
    pub next_global_offset: Option<i64>,
    #[serde(default)]
    pub next_local_offset: Option<i64>,
    #[serde(default)]
    pub poll_source: Option<PollSource>,
}

// ---------------------------------------------------------------------------
// /disconnect
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DisconnectRequest {
    pub session_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub async_disconnect: Option<bool>,
}

// ---------------------------------------------------------------------------
// /list-agents, /list-system-agents
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionOnlyRequest {
    pub session_id: String,
}

// ---------------------------------------------------------------------------
// Generic operation envelope
// ---------------------------------------------------------------------------

/// `{status, data?, statusMessage?}` — the envelope every HTTP operation
/// response uses. `success + HTTP 2xx` is the only outcome treated as OK;
/// callers check `status` themselves rather than relying on serde alone.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OperationResponse<T> {
    pub status: Status,
    #[serde(default)]
    pub data: Option<T>,
    #[serde(default)]
    pub status_message: Option<String>,
}

impl<T> OperationResponse<T> {
    pub fn is_ok(&self) -> bool {
        matches!(self.status, Status::Success)
    }
}

// ---------------------------------------------------------------------------
// UDP envelope
// ---------------------------------------------------------------------------

/// `{action, payload, requestId?}` — one datagram, one request.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct UdpEnvelope<T: Serialize> {
    pub action: UdpAction,
    pub payload: T,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub request_id: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum UdpAction {
    Push,
    Pull,
}

/// The service's UDP reply: `{status:"ok", requestId?, result}`.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UdpReply<T> {
    pub status: String,
    #[serde(default)]
    pub request_id: Option<String>,
    pub result: T,
}

// ---------------------------------------------------------------------------
// WebRTC signaling content (carried inside an EventMessage's `content`)
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum SignalKind {
    Offer,
    Answer,
    IceCandidate,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct IceCandidateInit {
    pub candidate: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sdp_m_line_index: Option<u16>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sdp_mid: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WebrtcSignal {
    #[serde(rename = "type")]
    pub kind: SignalKind,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sdp: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub candidate: Option<IceCandidateInit>,
    pub stream_session_id: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn event_type_serializes_uppercase() {
        let json = serde_json::to_string(&EventType::ChatText).unwrap();
        assert_eq!(json, "\"CHAT_TEXT\"");
    }

    #[test]
    fn webrtc_signal_type_accepts_legacy_alias() {
        let legacy: EventType = serde_json::from_str("\"CHAT_WEBRTC_SIGNAL\"").unwrap();
        assert_eq!(legacy, EventType::WebrtcSignaling);
        let current: EventType = serde_json::from_str("\"WEBRTC_SIGNALING\"").unwrap();
        assert_eq!(current, EventType::WebrtcSignaling);
        let encoded = serde_json::to_string(&EventType::WebrtcSignaling).unwrap();
        assert_eq!(encoded, "\"WEBRTC_SIGNALING\"");
    }

    #[test]
    fn pull_data_events_or_messages_key_both_decode() {
        let via_events = r#"{"events":[],"nextGlobalOffset":5,"nextLocalOffset":2}"#;
        let via_messages = r#"{"messages":[],"nextGlobalOffset":5,"nextLocalOffset":2}"#;
        let a: PullData = serde_json::from_str(via_events).unwrap();
        let b: PullData = serde_json::from_str(via_messages).unwrap();
        assert_eq!(a.next_global_offset, Some(5));
        assert_eq!(b.next_global_offset, Some(5));
        assert!(a.events.is_empty() && b.events.is_empty());
    }

    #[test]
    fn pull_data_missing_offsets_are_none() {
        let json = r#"{"events":[]}"#;
        let data: PullData = serde_json::from_str(json).unwrap();
        assert!(data.next_global_offset.is_none());
        assert!(data.next_local_offset.is_none());
    }

    #[test]
    fn agent_info_is_system_reflects_non_null_role() {
        let normal = AgentInfo {
            agent_name: "alice".into(),
            agent_type: "RUST-AGENT".into(),
            descriptor: None,
            ip_address: None,
            connection_time: 0,
            metadata: HashMap::new(),
            role: None,
            custom_event_type: None,
            restricted_capabilities: None,
        };
        assert!(!normal.is_system());
        let system = AgentInfo { role: Some("moderator".into()), ..normal };
        assert!(system.is_system());
    }
}
