//! Line-delimited JSON control protocol.
//!
//! One [`BridgeRequest`] per line in, one [`BridgeResponse`] per line out;
//! event lines the background receive loop streams are interleaved with
//! replies, each carrying a monotonic `seq` so a client can detect drops.

use msg_protocol::{AgentInfo, ApiKeyScope, EventMessage, EventType};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Request verbs — the union of the Channel API operations.
#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "op", rename_all = "camelCase")]
pub enum BridgeRequest {
    Connect {
        channel_name: String,
        #[serde(default)]
        channel_password: Option<String>,
        #[serde(default)]
        channel_id: Option<String>,
        agent_name: String,
        #[serde(default)]
        enable_webrtc_relay: bool,
        #[serde(default)]
        api_key_scope: Option<ApiKeyScope>,
        #[serde(default)]
        agent_context: HashMap<String, String>,
        #[serde(default = "default_true")]
        check_last_session: bool,
    },
    Push {
        #[serde(rename = "type")]
        event_type: EventType,
        content: String,
        #[serde(default)]
        to: Option<String>,
        #[serde(default)]
        filter: Option<String>,
        #[serde(default)]
        encrypted: bool,
        #[serde(default)]
        ephemeral: bool,
    },
    UdpPush {
        #[serde(rename = "type")]
        event_type: EventType,
        content: String,
        #[serde(default)]
        to: Option<String>,
        #[serde(default)]
        filter: Option<String>,
        #[serde(default)]
        encrypted: bool,
        #[serde(default)]
        ephemeral: bool,
    },
    /// Events already stream asynchronously as they're delivered to this
    /// connection's session; `pull` is a synchronous,
    /// offset-neutral snapshot of the current cursor for clients that want
    /// to confirm liveness without waiting on the next streamed batch.
    Pull,
    UdpPull {
        #[serde(default = "default_udp_pull_limit")]
        limit: u32,
    },
    ListAgents,
    ListSystemAgents,
    Disconnect,
}

fn default_true() -> bool {
    true
}

fn default_udp_pull_limit() -> u32 {
    50
}

/// `{status:"ok"|"error", data?, error?}` plus the bridge's monotonic `seq`.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct BridgeResponse {
    pub seq: u64,
    pub status: BridgeStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<serde_json::Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

#[derive(Debug, Clone, Copy, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum BridgeStatus {
    Ok,
    Error,
}

impl BridgeResponse {
    pub fn ok(seq: u64, data: impl Serialize) -> Self {
        Self {
            seq,
            status: BridgeStatus::Ok,
            data: serde_json::to_value(data).ok(),
            error: None,
        }
    }

    pub fn ok_empty(seq: u64) -> Self {
        Self { seq, status: BridgeStatus::Ok, data: None, error: None }
    }

    pub fn error(seq: u64, message: impl Into<String>) -> Self {
        Self { seq, status: BridgeStatus::Error, data: None, error: Some(message.into()) }
    }
}

/// Payload of a streamed `{status:"ok", data:{kind:"event", ...}}` line.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StreamedEvent<'a> {
    pub kind: &'static str,
    pub ephemeral: bool,
    pub event: &'a EventMessage,
}

impl<'a> StreamedEvent<'a> {
    pub fn durable(event: &'a EventMessage) -> Self {
        Self { kind: "event", ephemeral: false, event }
    }

    pub fn ephemeral(event: &'a EventMessage) -> Self {
        Self { kind: "event", ephemeral: true, event }
    }
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ConnectResponseData {
    pub session_id: String,
    pub channel_id: String,
    pub global_offset: i64,
    pub local_offset: i64,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PullSnapshotData {
    pub global_offset: i64,
    pub local_offset: i64,
}

#[derive(Debug, Clone, Serialize)]
pub struct AgentsData(pub Vec<AgentInfo>);
