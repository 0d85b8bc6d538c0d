//! In-process HTTP stub used by integration tests (no network-mocking
//! crate dependency, mirroring the source project's own test style).
//!
//! Accepts raw HTTP/1.1 POST requests on a loopback `TcpListener`, matches
//! on the request path, and replies with a caller-queued JSON body. Each
//! path has its own FIFO queue of canned responses so a single stub can
//! drive a multi-step scenario (connect, then several pulls).

#![cfg(test)]

use std::collections::HashMap;
use std::sync::Mutex;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpListener;

pub struct StubResponse {
    pub status: u16,
    pub body: String,
}

impl StubResponse {
    pub fn ok(body: impl Into<String>) -> Self {
        Self { status: 200, body: body.into() }
    }
}

pub struct HttpStub {
    addr: std::net::SocketAddr,
    _task: tokio::task::JoinHandle<()>,
}

impl HttpStub {
    /// Start a stub server pre-loaded with `routes`: path -> ordered
    /// responses, one consumed per matching request (the last one repeats
    /// once exhausted).
    pub async fn start(routes: HashMap<&'static str, Vec<StubResponse>>) -> Self {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let routes: HashMap<String, Mutex<Vec<StubResponse>>> =
            routes.into_iter().map(|(k, v)| (k.to_owned(), Mutex::new(v))).collect();
        let routes = std::sync::Arc::new(routes);

        let task = tokio::spawn(async move {
            loop {
                let Ok((mut stream, _)) = listener.accept().await else { break };
                let routes = std::sync::Arc::clone(&routes);
                tokio::spawn(async move {
                    let mut buf = vec![0u8; 65536];
                    let Ok(n) = stream.read(&mut buf).await else { return };
                    if n == 0 {
                        return;
                    }
                    let request = String::from_utf8_lossy(&buf[..n]);
                    let path = request
                        .lines()
                        .next()
                        .and_then(|line| line.split_whitespace().nth(1))
                        .unwrap_or("/")
                        .to_owned();

                    let (status, body) = {
                        let queue = routes.get(path.as_str());
                        match queue {
                            Some(q) => {
                                let mut q = q.lock().unwrap();
                                if q.len() > 1 {
                                    let r = q.remove(0);
                                    (r.status, r.body)
                                } else if let Some(r) = q.first() {
                                    (r.status, r.body.clone())
                                } else {
                                    (404, "{}".to_owned())
                                }
                            }
                            None => (404, "{}".to_owned()),
                        }
                    };

                    let reason = if status == 200 { "OK" } else { "ERR" };
                    let response = format!(
                        "HTTP/1.1 {status} {reason}\r\nContent-Type: application/json\r\nContent-Length: {}\r\nConnection: close\r\n\r\n{body}",
                        body.len()
                    );
                    let _ = stream.write_all(response.as_bytes()).await;
                    let _ = stream.shutdown().await;
                });
            }
        });

        Self { addr, _task: task }
    }

    pub fn base_url(&self) -> String {
        format!("http://{}", self.addr)
    }
}
