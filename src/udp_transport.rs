//! Connectionless UDP envelope transport.
//!
//! Fire-and-forget `send`, and `send_and_wait` with `requestId` correlation
//! via a shared receive demultiplexer — a single socket is reused and
//! concurrent waiters are served by one background reader task fanning
//! replies out over `tokio::sync::broadcast`, rather than per-call sockets.

use crate::config::Config;
use crate::error::TransportError;
use msg_protocol::{UdpAction, UdpEnvelope, UdpReply};
use serde::Serialize;
use serde::de::DeserializeOwned;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::UdpSocket;
use tokio::sync::broadcast;
use uuid::Uuid;

const REPLY_CHANNEL_CAPACITY: usize = 256;

/// A UDP transport bound to an ephemeral local port, talking to a fixed
/// remote host:port resolved once at construction and cached.
pub struct UdpTransport {
    socket: Arc<UdpSocket>,
    remote_addr: SocketAddr,
    replies: broadcast::Sender<(Option<String>, Vec<u8>)>,
    _reader: tokio::task::JoinHandle<()>,
}

impl UdpTransport {
    /// Resolve `host` with the port from `config` (or `MESSAGING_UDP_PORT`
    /// via `Config::from_env`), bind an ephemeral local socket, and start
    /// the background reader that demultiplexes replies by `requestId`.
    pub async fn connect(host: &str, config: &Config) -> Result<Self, TransportError> {
        let remote_addr: SocketAddr = tokio::net::lookup_host((host, config.udp_port))
            .await?
            .next()
            .ok_or_else(|| {
                TransportError::Udp(std::io::Error::new(
                    std::io::ErrorKind::NotFound,
                    format!("could not resolve {host}:{}", config.udp_port),
                ))
            })?;

        let local_bind = if remote_addr.is_ipv6() { "[::]:0" } else { "0.0.0.0:0" };
        let socket = Arc::new(UdpSocket::bind(local_bind).await.map_err(|e| {
            tracing::warn!(error = %e, "udp socket bind failed");
            TransportError::Udp(e)
        })?);

        let (tx, _rx) = broadcast::channel(REPLY_CHANNEL_CAPACITY);
        let reader = tokio::spawn(reader_loop(Arc::clone(&socket), tx.clone()));

        Ok(Self {
            socket,
            remote_addr,
            replies: tx,
            _reader: reader,
        })
    }

    pub fn local_addr(&self) -> std::io::Result<SocketAddr> {
        self.socket.local_addr()
    }

    /// Fire-and-forget send. Returns `true` on a successful write syscall;
    /// never retransmits.
    pub async fn send<T: Serialize>(&self, envelope: &UdpEnvelope<T>) -> bool {
        match serde_json::to_vec(envelope) {
            Ok(bytes) => self.socket.send_to(&bytes, self.remote_addr).await.is_ok(),
            Err(e) => {
                tracing::debug!(error = %e, "failed to encode udp envelope");
                false
            }
        }
    }

    /// Send `envelope` (stamping a fresh `requestId` if absent) and wait up
    /// to `timeout` for a reply whose `requestId` matches, correlated via
    /// the shared reader task. Returns `None` on timeout or socket error.
    pub async fn send_and_wait<T: Serialize, R: DeserializeOwned>(
        &self,
        action: UdpAction,
        payload: T,
        timeout: Duration,
    ) -> Option<R> {
        let request_id = Uuid::new_v4().to_string();
        let envelope = UdpEnvelope {
            action,
            payload,
            request_id: Some(request_id.clone()),
        };
        let mut rx = self.replies.subscribe();
        if !self.send(&envelope).await {
            return None;
        }

        let wait = async {
            loop {
                match rx.recv().await {
                    Ok((Some(rid), bytes)) if rid == request_id => {
                        return serde_json::from_slice::<UdpReply<R>>(&bytes)
                            .ok()
                            .map(|reply| reply.result);
                    }
                    Ok(_) => continue,
                    Err(broadcast::error::RecvError::Lagged(_)) => continue,
                    Err(broadcast::error::RecvError::Closed) => return None,
                }
            }
        };

        tokio::time::timeout(timeout, wait).await.ok().flatten()
    }
}

async fn reader_loop(socket: Arc<UdpSocket>, tx: broadcast::Sender<(Option<String>, Vec<u8>)>) {
    let mut buf = vec![0u8; 65536];
    loop {
        match socket.recv_from(&mut buf).await {
            Ok((len, _from)) => {
                let request_id = serde_json::from_slice::<serde_json::Value>(&buf[..len])
                    .ok()
                    .and_then(|v| v.get("requestId").and_then(|r| r.as_str()).map(str::to_owned));
                let _ = tx.send((request_id, buf[..len].to_vec()));
            }
            Err(e) => {
                tracing::debug!(error = %e, "udp reader loop stopped");
                break;
            }
        }
    }
}
