//! Per-connection bridge session.
//!
//! Each TCP client maps to exactly one `messaging_agent::Session`. Requests
//! are read one line at a time; replies and asynchronously-streamed events
//! are written to the same socket, serialized with a per-connection write
//! lock the way `local_fanout::serve_consumer` serializes writes to one
//! consumer at a time — a slow client only blocks its own line.

use crate::protocol::{
    AgentsData, BridgeRequest, BridgeResponse, ConnectResponseData, PullSnapshotData, StreamedEvent,
};
use async_trait::async_trait;
use messaging_agent::channel_api::ChannelApi;
use messaging_agent::persistence::SessionStore;
use messaging_agent::util::{Clock, SystemClock};
use messaging_agent::{AgentContext, ConnectConfig, EventBatch, EventHandler, Session, SessionState};
use msg_protocol::ApiKeyScope;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::TcpStream;
use tokio::sync::Mutex;

/// Streams durable/ephemeral batches for one connection back over its
/// socket as they're delivered to the underlying session, tagging each
/// event line with the connection's monotonic `seq`.
struct StreamingHandler {
    writer: Arc<Mutex<tokio::net::tcp::OwnedWriteHalf>>,
    seq: Arc<AtomicU64>,
}

#[async_trait]
impl EventHandler for StreamingHandler {
    async fn on_events(&self, batch: EventBatch) -> Result<(), String> {
        for event in &batch.durable {
            write_line(&self.writer, &self.seq, BridgeResponse::ok(next_seq(&self.seq), StreamedEvent::durable(event)))
                .await;
        }
        for event in &batch.ephemeral {
            write_line(
                &self.writer,
                &self.seq,
                BridgeResponse::ok(next_seq(&self.seq), StreamedEvent::ephemeral(event)),
            )
            .await;
        }
        Ok(())
    }
}

fn next_seq(seq: &AtomicU64) -> u64 {
    seq.fetch_add(1, Ordering::SeqCst)
}

async fn write_line(writer: &Arc<Mutex<tokio::net::tcp::OwnedWriteHalf>>, _seq: &AtomicU64, response: BridgeResponse) {
    let Ok(mut line) = serde_json::to_vec(&response) else { return };
    line.push(b'\n');
    let mut w = writer.lock().await;
    let _ = w.write_all(&line).await;
}

/// Shared, connection-independent context every bridge connection needs to
/// build a session.
#[derive(Clone)]
pub struct BridgeContext {
    pub api: Arc<ChannelApi>,
    pub store: Arc<SessionStore>,
}

/// Serve one accepted TCP connection until it disconnects or the stream
/// ends.
pub async fn serve_connection(stream: TcpStream, ctx: BridgeContext) {
    let (read_half, write_half) = stream.into_split();
    let writer = Arc::new(Mutex::new(write_half));
    let seq = Arc::new(AtomicU64::new(0));
    let mut reader = BufReader::new(read_half);
    let mut session: Option<Arc<Session>> = None;

    let mut line = String::new();
    loop {
        line.clear();
        let read = reader.read_line(&mut line).await;
        match read {
            Ok(0) => break,
            Ok(_) => {}
            Err(e) => {
                tracing::debug!(error = %e, "bridge connection read error");
                break;
            }
        }
        let trimmed = line.trim();
        if trimmed.is_empty() {
            continue;
        }

        let request: BridgeRequest = match serde_json::from_str(trimmed) {
            Ok(req) => req,
            Err(e) => {
                write_line(&writer, &seq, BridgeResponse::error(next_seq(&seq), format!("malformed request: {e}"))).await;
                continue;
            }
        };

        let response = handle_request(request, &ctx, &mut session, &writer, &seq).await;
        write_line(&writer, &seq, response).await;

        if let Some(s) = session.as_ref() {
            if matches!(s.state().await, SessionState::Closed) {
                break;
            }
        }
    }

    if let Some(s) = session.take() {
        let _ = s.disconnect().await;
    }
}

#[allow(clippy::too_many_lines)]
async fn handle_request(
    request: BridgeRequest,
    ctx: &BridgeContext,
    session: &mut Option<Arc<Session>>,
    writer: &Arc<Mutex<tokio::net::tcp::OwnedWriteHalf>>,
    seq: &Arc<AtomicU64>,
) -> BridgeResponse {
    let this_seq = next_seq(seq);
    match request {
        BridgeRequest::Connect {
            channel_name,
            channel_password,
            channel_id,
            agent_name,
            enable_webrtc_relay,
            api_key_scope,
            agent_context,
            check_last_session,
        } => {
            let config = ConnectConfig {
                channel_name,
                channel_password,
                channel_id,
                agent_name,
                enable_webrtc_relay,
                api_key_scope: api_key_scope.unwrap_or(ApiKeyScope::Public),
                agent_context: AgentContext::from(agent_context),
                check_last_session,
                ..Default::default()
            };
            let clock: Arc<dyn Clock> = Arc::new(SystemClock);
            match Session::connect(Arc::clone(&ctx.api), Arc::clone(&ctx.store), clock, config).await {
                Ok(new_session) => {
                    let new_session = Arc::new(new_session);
                    let handler = Arc::new(StreamingHandler { writer: Arc::clone(writer), seq: Arc::clone(seq) });
                    new_session.set_handler(handler).await;
                    let (go, lo) = new_session.offsets().await;
                    let data = ConnectResponseData {
                        session_id: new_session.session_id().await,
                        channel_id: new_session.channel_id().await,
                        global_offset: go,
                        local_offset: lo,
                    };
                    *session = Some(new_session);
                    BridgeResponse::ok(this_seq, data)
                }
                Err(e) => BridgeResponse::error(this_seq, e.to_string()),
            }
        }

        BridgeRequest::Push { event_type, content, to, filter, encrypted, ephemeral } => {
            let Some(s) = session.as_ref() else {
                return BridgeResponse::error(this_seq, "push before connect");
            };
            let ok = s.push(event_type, &content, to.as_deref(), encrypted, ephemeral, filter).await;
            if ok {
                BridgeResponse::ok_empty(this_seq)
            } else {
                BridgeResponse::error(this_seq, "push failed")
            }
        }

        BridgeRequest::UdpPush { event_type, content, to, filter, encrypted, ephemeral } => {
            let Some(s) = session.as_ref() else {
                return BridgeResponse::error(this_seq, "udpPush before connect");
            };
            let ok = s.udp_push(event_type, &content, to.as_deref(), encrypted, ephemeral, filter).await;
            if ok {
                BridgeResponse::ok_empty(this_seq)
            } else {
                BridgeResponse::error(this_seq, "udp push failed")
            }
        }

        BridgeRequest::Pull => {
            let Some(s) = session.as_ref() else {
                return BridgeResponse::error(this_seq, "pull before connect");
            };
            let (go, lo) = s.offsets().await;
            BridgeResponse::ok(this_seq, PullSnapshotData { global_offset: go, local_offset: lo })
        }

        BridgeRequest::UdpPull { limit } => {
            let Some(s) = session.as_ref() else {
                return BridgeResponse::error(this_seq, "udpPull before connect");
            };
            let events = s.udp_pull(limit).await;
            BridgeResponse::ok(this_seq, events)
        }

        BridgeRequest::ListAgents => {
            let Some(s) = session.as_ref() else {
                return BridgeResponse::error(this_seq, "listAgents before connect");
            };
            BridgeResponse::ok(this_seq, AgentsData(s.list_agents().await))
        }

        BridgeRequest::ListSystemAgents => {
            let Some(s) = session.as_ref() else {
                return BridgeResponse::error(this_seq, "listSystemAgents before connect");
            };
            BridgeResponse::ok(this_seq, AgentsData(s.list_system_agents().await))
        }

        BridgeRequest::Disconnect => match session.take() {
            Some(s) => {
                let ok = s.disconnect().await;
                if ok {
                    BridgeResponse::ok_empty(this_seq)
                } else {
                    BridgeResponse::error(this_seq, "disconnect reported failure")
                }
            }
            None => BridgeResponse::ok_empty(this_seq),
        },
    }
}
