//! WebRTC signaling coordinator.
//!
//! Layered entirely on top of channel events of type `WEBRTC_SIGNALING` —
//! this module owns no media code. It drives a per-`streamSessionId` state
//! machine, calling out to a pluggable [`PeerConnectionFactory`] the way the
//! source project's `control_api::AppState` drives `rt_updater::workflow`
//! state transitions from inbound HTTP calls rather than owning the update
//! logic itself.
//!
//! A [`WebrtcDispatchHandler`] sits in front of the application's own
//! [`EventHandler`](crate::session::EventHandler): it intercepts
//! `WEBRTC_SIGNALING` batches for the coordinator and forwards everything
//! else untouched — a "user handler ∪ WebRTC signaling coordinator" inbound
//! fan-out without the coordinator needing to know about the application's
//! handler type.

use crate::session::{EventBatch, EventHandler, Session};
use async_trait::async_trait;
use msg_protocol::{EventMessage, EventType, IceCandidateInit, SignalKind, WebrtcSignal};
use std::collections::HashMap;
use std::sync::{Arc, Weak};
use tokio::sync::Mutex;

/// Which side of the handshake a stream session is playing.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StreamRole {
    Offerer,
    Answerer,
}

/// Per-stream state machine.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StreamState {
    Pending,
    OfferSent,
    OfferReceived,
    AnswerSent,
    AnswerReceived,
    Connected,
    Failed,
    Closed,
}

/// Live state for one `streamSessionId`, independent of the underlying
/// peer connection the factory creates.
#[derive(Debug, Clone)]
pub struct RtcStreamSession {
    pub remote_agent: String,
    pub role: StreamRole,
    pub state: StreamState,
    pub local_sdp: Option<String>,
    pub remote_sdp: Option<String>,
    pub local_candidates: Vec<IceCandidateInit>,
    pub remote_candidates: Vec<IceCandidateInit>,
    pub created_at: i64,
}

/// The media stack the coordinator delegates to. Deliberately SDP-as-string
/// and not tied to any concrete peer-connection crate — concrete WebRTC
/// media stacks are out of scope here; this trait is the pluggable seam a
/// host fills in.
#[async_trait]
pub trait PeerConnectionFactory: Send + Sync {
    async fn create_answer_for_offer(
        &self,
        stream_session_id: &str,
        remote_agent: &str,
        sdp: &str,
    ) -> Result<String, String>;

    async fn create_offer_for_stream(
        &self,
        stream_session_id: &str,
        remote_agent: &str,
    ) -> Result<String, String>;

    async fn handle_remote_answer(&self, stream_session_id: &str, sdp: &str) -> Result<(), String>;

    async fn add_ice_candidate(
        &self,
        stream_session_id: &str,
        candidate: &IceCandidateInit,
    ) -> Result<(), String>;

    async fn close_peer_connection(&self, stream_session_id: &str);
}

/// A factory that answers/offers with an empty SDP and otherwise no-ops —
/// lets a host exercise the signaling state machine before a real media
/// stack (e.g. `webrtc-rs`) is wired in.
pub struct NullPeerConnectionFactory;

#[async_trait]
impl PeerConnectionFactory for NullPeerConnectionFactory {
    async fn create_answer_for_offer(&self, _: &str, _: &str, _: &str) -> Result<String, String> {
        Ok(String::new())
    }

    async fn create_offer_for_stream(&self, _: &str, _: &str) -> Result<String, String> {
        Ok(String::new())
    }

    async fn handle_remote_answer(&self, _: &str, _: &str) -> Result<(), String> {
        Ok(())
    }

    async fn add_ice_candidate(&self, _: &str, _: &IceCandidateInit) -> Result<(), String> {
        Ok(())
    }

    async fn close_peer_connection(&self, _: &str) {}
}

/// Observer for signaling milestones the application may want to react to
/// (e.g. updating call UI).
#[async_trait]
pub trait WebrtcEventListener: Send + Sync {
    async fn on_stream_offer_received(&self, stream_session_id: &str, remote_agent: &str, sdp: &str);
    async fn on_stream_answer_received(&self, stream_session_id: &str, remote_agent: &str, sdp: &str);
    async fn on_ice_candidate_received(&self, stream_session_id: &str, candidate: &IceCandidateInit);
    async fn on_remote_stream_ready(&self, stream_session_id: &str, remote_agent: &str);
    async fn on_peer_connection_error(&self, stream_session_id: &str, message: &str);
}

/// A listener that does nothing, for applications that only care about the
/// factory's media side-effects and not the signaling milestones.
pub struct NullWebrtcEventListener;

#[async_trait]
impl WebrtcEventListener for NullWebrtcEventListener {
    async fn on_stream_offer_received(&self, _: &str, _: &str, _: &str) {}
    async fn on_stream_answer_received(&self, _: &str, _: &str, _: &str) {}
    async fn on_ice_candidate_received(&self, _: &str, _: &IceCandidateInit) {}
    async fn on_remote_stream_ready(&self, _: &str, _: &str) {}
    async fn on_peer_connection_error(&self, _: &str, _: &str) {}
}

/// SDP/ICE state machine keyed by `streamSessionId`, bridged to a
/// [`PeerConnectionFactory`].
///
/// Holds a [`Weak`] reference back to the [`Session`] it signals over so
/// that installing this coordinator as (part of) the session's event
/// handler doesn't create an `Arc` reference cycle — the coordinator only
/// needs `push` while the session is alive, never the reverse.
pub struct WebrtcCoordinator {
    session: Weak<Session>,
    factory: Arc<dyn PeerConnectionFactory>,
    listener: Arc<dyn WebrtcEventListener>,
    streams: Mutex<HashMap<String, RtcStreamSession>>,
    clock: Arc<dyn crate::util::Clock>,
}

impl WebrtcCoordinator {
    pub fn new(
        session: &Arc<Session>,
        factory: Arc<dyn PeerConnectionFactory>,
        listener: Arc<dyn WebrtcEventListener>,
        clock: Arc<dyn crate::util::Clock>,
    ) -> Arc<Self> {
        Arc::new(Self {
            session: Arc::downgrade(session),
            factory,
            listener,
            streams: Mutex::new(HashMap::new()),
            clock,
        })
    }

    /// Snapshot of a stream's current state, if known.
    pub async fn stream_state(&self, stream_session_id: &str) -> Option<StreamState> {
        self.streams.lock().await.get(stream_session_id).map(|s| s.state)
    }

    /// Offerer side: ask the factory for a local SDP offer and publish it
    /// to `remote_agent` (`Pending → OfferSent`).
    pub async fn create_offer(&self, stream_session_id: &str, remote_agent: &str) -> Result<(), String> {
        {
            let mut streams = self.streams.lock().await;
            streams.insert(
                stream_session_id.to_owned(),
                RtcStreamSession {
                    remote_agent: remote_agent.to_owned(),
                    role: StreamRole::Offerer,
                    state: StreamState::Pending,
                    local_sdp: None,
                    remote_sdp: None,
                    local_candidates: Vec::new(),
                    remote_candidates: Vec::new(),
                    created_at: self.clock.now_ms(),
                },
            );
        }

        let sdp = match self.factory.create_offer_for_stream(stream_session_id, remote_agent).await {
            Ok(sdp) => sdp,
            Err(e) => {
                self.mark_failed(stream_session_id).await;
                return Err(e);
            }
        };

        self.publish(
            remote_agent,
            WebrtcSignal {
                kind: SignalKind::Offer,
                sdp: Some(sdp.clone()),
                candidate: None,
                stream_session_id: stream_session_id.to_owned(),
            },
        )
        .await;

        let mut streams = self.streams.lock().await;
        if let Some(s) = streams.get_mut(stream_session_id) {
            s.local_sdp = Some(sdp);
            s.state = StreamState::OfferSent;
        }
        Ok(())
    }

    /// Emit a locally-generated ICE candidate to the peer, appending it to
    /// the local candidate list first.
    pub async fn emit_local_ice_candidate(&self, stream_session_id: &str, candidate: IceCandidateInit) {
        let remote_agent = {
            let mut streams = self.streams.lock().await;
            let Some(s) = streams.get_mut(stream_session_id) else { return };
            s.local_candidates.push(candidate.clone());
            s.remote_agent.clone()
        };
        self.publish(
            &remote_agent,
            WebrtcSignal {
                kind: SignalKind::IceCandidate,
                sdp: None,
                candidate: Some(candidate),
                stream_session_id: stream_session_id.to_owned(),
            },
        )
        .await;
    }

    /// The factory reports the underlying connection is established
    /// (`AnswerReceived|AnswerSent → Connected`).
    pub async fn notify_connected(&self, stream_session_id: &str) {
        let remote_agent = {
            let mut streams = self.streams.lock().await;
            let Some(s) = streams.get_mut(stream_session_id) else { return };
            s.state = StreamState::Connected;
            s.remote_agent.clone()
        };
        self.listener.on_remote_stream_ready(stream_session_id, &remote_agent).await;
    }

    /// The factory reports a fatal error (`any state → Failed`).
    pub async fn notify_error(&self, stream_session_id: &str, message: &str) {
        self.mark_failed(stream_session_id).await;
        self.listener.on_peer_connection_error(stream_session_id, message).await;
    }

    async fn mark_failed(&self, stream_session_id: &str) {
        if let Some(s) = self.streams.lock().await.get_mut(stream_session_id) {
            s.state = StreamState::Failed;
        }
    }

    /// Tear down a stream (`any state → Closed`).
    pub async fn close_stream(&self, stream_session_id: &str) {
        self.factory.close_peer_connection(stream_session_id).await;
        let mut streams = self.streams.lock().await;
        if let Some(s) = streams.get_mut(stream_session_id) {
            s.state = StreamState::Closed;
        }
    }

    /// Route an inbound `WEBRTC_SIGNALING` event through the state machine.
    /// Non-signaling events and malformed content are ignored.
    pub async fn handle_event(&self, event: &EventMessage) {
        if event.event_type != EventType::WebrtcSignaling {
            return;
        }
        let signal: WebrtcSignal = match serde_json::from_str(&event.content) {
            Ok(s) => s,
            Err(e) => {
                tracing::debug!(error = %e, "malformed webrtc signaling content");
                return;
            }
        };

        match signal.kind {
            SignalKind::Offer => self.handle_offer(&event.from, &signal).await,
            SignalKind::Answer => self.handle_answer(&event.from, &signal).await,
            SignalKind::IceCandidate => self.handle_ice_candidate(&signal).await,
        }
    }

    async fn handle_offer(&self, remote_agent: &str, signal: &WebrtcSignal) {
        let Some(sdp) = &signal.sdp else { return };
        {
            let mut streams = self.streams.lock().await;
            streams
                .entry(signal.stream_session_id.clone())
                .or_insert_with(|| RtcStreamSession {
                    remote_agent: remote_agent.to_owned(),
                    role: StreamRole::Answerer,
                    state: StreamState::Pending,
                    local_sdp: None,
                    remote_sdp: None,
                    local_candidates: Vec::new(),
                    remote_candidates: Vec::new(),
                    created_at: self.clock.now_ms(),
                })
                .remote_sdp = Some(sdp.clone());
            if let Some(s) = streams.get_mut(&signal.stream_session_id) {
                s.state = StreamState::OfferReceived;
            }
        }
        self.listener
            .on_stream_offer_received(&signal.stream_session_id, remote_agent, sdp)
            .await;

        let answer = match self
            .factory
            .create_answer_for_offer(&signal.stream_session_id, remote_agent, sdp)
            .await
        {
            Ok(answer) => answer,
            Err(e) => {
                self.notify_error(&signal.stream_session_id, &e).await;
                return;
            }
        };

        self.publish(
            remote_agent,
            WebrtcSignal {
                kind: SignalKind::Answer,
                sdp: Some(answer.clone()),
                candidate: None,
                stream_session_id: signal.stream_session_id.clone(),
            },
        )
        .await;

        let mut streams = self.streams.lock().await;
        if let Some(s) = streams.get_mut(&signal.stream_session_id) {
            s.local_sdp = Some(answer);
            s.state = StreamState::AnswerSent;
        }
    }

    async fn handle_answer(&self, remote_agent: &str, signal: &WebrtcSignal) {
        let Some(sdp) = &signal.sdp else { return };
        if let Err(e) = self.factory.handle_remote_answer(&signal.stream_session_id, sdp).await {
            self.notify_error(&signal.stream_session_id, &e).await;
            return;
        }
        {
            let mut streams = self.streams.lock().await;
            if let Some(s) = streams.get_mut(&signal.stream_session_id) {
                s.remote_sdp = Some(sdp.clone());
                s.state = StreamState::AnswerReceived;
            }
        }
        self.listener
            .on_stream_answer_received(&signal.stream_session_id, remote_agent, sdp)
            .await;
    }

    async fn handle_ice_candidate(&self, signal: &WebrtcSignal) {
        let Some(candidate) = &signal.candidate else { return };
        {
            let mut streams = self.streams.lock().await;
            if let Some(s) = streams.get_mut(&signal.stream_session_id) {
                s.remote_candidates.push(candidate.clone());
            }
        }
        if let Err(e) = self.factory.add_ice_candidate(&signal.stream_session_id, candidate).await {
            tracing::debug!(stream_session_id = %signal.stream_session_id, error = %e, "factory rejected ice candidate");
        }
        self.listener
            .on_ice_candidate_received(&signal.stream_session_id, candidate)
            .await;
    }

    async fn publish(&self, to: &str, signal: WebrtcSignal) {
        let Some(session) = self.session.upgrade() else { return };
        let Ok(content) = serde_json::to_string(&signal) else { return };
        let _ = session.push(EventType::WebrtcSignaling, &content, Some(to), false, false, None).await;
    }
}

/// Wraps the application's [`EventHandler`] so `WEBRTC_SIGNALING` batches
/// are routed to the coordinator and everything else reaches the
/// application unchanged.
pub struct WebrtcDispatchHandler {
    coordinator: Arc<WebrtcCoordinator>,
    inner: Option<Arc<dyn EventHandler>>,
}

impl WebrtcDispatchHandler {
    pub fn new(coordinator: Arc<WebrtcCoordinator>, inner: Option<Arc<dyn EventHandler>>) -> Self {
        Self { coordinator, inner }
    }
}

#[async_trait]
impl EventHandler for WebrtcDispatchHandler {
    async fn on_events(&self, batch: EventBatch) -> Result<(), String> {
        let mut app_durable = Vec::with_capacity(batch.durable.len());
        for event in batch.durable {
            if event.event_type == EventType::WebrtcSignaling {
                self.coordinator.handle_event(&event).await;
            } else {
                app_durable.push(event);
            }
        }
        let mut app_ephemeral = Vec::with_capacity(batch.ephemeral.len());
        for event in batch.ephemeral {
            if event.event_type == EventType::WebrtcSignaling {
                self.coordinator.handle_event(&event).await;
            } else {
                app_ephemeral.push(event);
            }
        }

        if let Some(inner) = &self.inner {
            if !app_durable.is_empty() || !app_ephemeral.is_empty() {
                inner
                    .on_events(EventBatch { durable: app_durable, ephemeral: app_ephemeral })
                    .await?;
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::util::SystemClock;
    use tokio::sync::Mutex as TokioMutex;

    struct RecordingFactory {
        answer: String,
        offer: String,
    }

    #[async_trait]
    impl PeerConnectionFactory for RecordingFactory {
        async fn create_answer_for_offer(&self, _: &str, _: &str, _: &str) -> Result<String, String> {
            Ok(self.answer.clone())
        }
        async fn create_offer_for_stream(&self, _: &str, _: &str) -> Result<String, String> {
            Ok(self.offer.clone())
        }
        async fn handle_remote_answer(&self, _: &str, _: &str) -> Result<(), String> {
            Ok(())
        }
        async fn add_ice_candidate(&self, _: &str, _: &IceCandidateInit) -> Result<(), String> {
            Ok(())
        }
        async fn close_peer_connection(&self, _: &str) {}
    }

    #[derive(Default)]
    struct RecordingListener {
        offers: TokioMutex<Vec<(String, String)>>,
    }

    #[async_trait]
    impl WebrtcEventListener for RecordingListener {
        async fn on_stream_offer_received(&self, stream_session_id: &str, remote_agent: &str, _sdp: &str) {
            self.offers
                .lock()
                .await
                .push((stream_session_id.to_owned(), remote_agent.to_owned()));
        }
        async fn on_stream_answer_received(&self, _: &str, _: &str, _: &str) {}
        async fn on_ice_candidate_received(&self, _: &str, _: &IceCandidateInit) {}
        async fn on_remote_stream_ready(&self, _: &str, _: &str) {}
        async fn on_peer_connection_error(&self, _: &str, _: &str) {}
    }

    #[tokio::test]
    async fn inbound_offer_transitions_to_offer_received_then_answer_sent() {
        // We can't easily stand up a full Session for this unit test without
        // a live connect; instead we verify the pure signal-classification
        // and state-transition logic via `handle_event` against a
        // coordinator whose `session` Weak is already dangling (publish
        // becomes a no-op), which is exactly how the coordinator behaves
        // after its Session has been dropped.
        let factory = Arc::new(RecordingFactory { answer: "sdp-answer".into(), offer: "sdp-offer".into() });
        let listener = Arc::new(RecordingListener::default());
        let dangling: Weak<Session> = Weak::new();
        let coordinator = Arc::new(WebrtcCoordinator {
            session: dangling,
            factory,
            listener: listener.clone(),
            streams: Mutex::new(HashMap::new()),
            clock: Arc::new(SystemClock),
        });

        let offer_event = EventMessage {
            timestamp: 0,
            from: "bob".into(),
            to: "alice".into(),
            filter: None,
            event_type: EventType::WebrtcSignaling,
            content: serde_json::to_string(&WebrtcSignal {
                kind: SignalKind::Offer,
                sdp: Some("remote-offer".into()),
                candidate: None,
                stream_session_id: "stream-1".into(),
            })
            .unwrap(),
            encrypted: false,
            ephemeral: false,
            global_offset: Some(1),
            local_offset: Some(1),
        };

        coordinator.handle_event(&offer_event).await;
        assert_eq!(coordinator.stream_state("stream-1").await, Some(StreamState::AnswerSent));
        assert_eq!(listener.offers.lock().await.as_slice(), &[("stream-1".to_owned(), "bob".to_owned())]);
    }

    #[tokio::test]
    async fn inbound_ice_candidate_is_appended_to_remote_list() {
        let factory = Arc::new(RecordingFactory { answer: "a".into(), offer: "o".into() });
        let listener = Arc::new(RecordingListener::default());
        let coordinator = Arc::new(WebrtcCoordinator {
            session: Weak::new(),
            factory,
            listener,
            streams: Mutex::new(HashMap::from([(
                "stream-1".to_owned(),
                RtcStreamSession {
                    remote_agent: "bob".into(),
                    role: StreamRole::Offerer,
                    state: StreamState::OfferSent,
                    local_sdp: Some("o".into()),
                    remote_sdp: None,
                    local_candidates: Vec::new(),
                    remote_candidates: Vec::new(),
                    created_at: 0,
                },
            )])),
            clock: Arc::new(SystemClock),
        });

        let candidate_event = EventMessage {
            timestamp: 0,
            from: "bob".into(),
            to: "alice".into(),
            filter: None,
            event_type: EventType::WebrtcSignaling,
            content: serde_json::to_string(&WebrtcSignal {
                kind: SignalKind::IceCandidate,
                sdp: None,
                candidate: Some(IceCandidateInit {
                    candidate: "candidate:1 1 UDP ...".into(),
                    sdp_m_line_index: Some(0),
                    sdp_mid: Some("0".into()),
                }),
                stream_session_id: "stream-1".into(),
            })
            .unwrap(),
            encrypted: false,
            ephemeral: false,
            global_offset: Some(2),
            local_offset: Some(2),
        };

        coordinator.handle_event(&candidate_event).await;
        let streams = coordinator.streams.lock().await;
        assert_eq!(streams["stream-1"].remote_candidates.len(), 1);
    }

    #[tokio::test]
    async fn dispatch_handler_routes_signaling_away_from_inner_handler() {
        struct InnerRecorder(TokioMutex<Vec<EventBatch>>);
        #[async_trait]
        impl EventHandler for InnerRecorder {
            async fn on_events(&self, batch: EventBatch) -> Result<(), String> {
                self.0.lock().await.push(batch);
                Ok(())
            }
        }

        let factory = Arc::new(RecordingFactory { answer: "a".into(), offer: "o".into() });
        let listener = Arc::new(RecordingListener::default());
        let coordinator = Arc::new(WebrtcCoordinator {
            session: Weak::new(),
            factory,
            listener,
            streams: Mutex::new(HashMap::new()),
            clock: Arc::new(SystemClock),
        });
        let inner = Arc::new(InnerRecorder(TokioMutex::new(Vec::new())));
        let dispatcher = WebrtcDispatchHandler::new(coordinator.clone(), Some(inner.clone()));

        let chat_event = EventMessage {
            timestamp: 0,
            from: "bob".into(),
            to: "alice".into(),
            filter: None,
            event_type: EventType::ChatText,
            content: "hi".into(),
            encrypted: false,
            ephemeral: false,
            global_offset: Some(1),
            local_offset: Some(1),
        };
        let signal_event = EventMessage {
            event_type: EventType::WebrtcSignaling,
            content: serde_json::to_string(&WebrtcSignal {
                kind: SignalKind::IceCandidate,
                sdp: None,
                candidate: Some(IceCandidateInit { candidate: "c".into(), sdp_m_line_index: None, sdp_mid: None }),
                stream_session_id: "s1".into(),
            })
            .unwrap(),
            ..chat_event.clone()
        };

        dispatcher
            .on_events(EventBatch { durable: vec![chat_event.clone(), signal_event], ephemeral: vec![] })
            .await
            .unwrap();

        let calls = inner.0.lock().await;
        assert_eq!(calls.len(), 1);
        assert_eq!(calls[0].durable.len(), 1);
        assert_eq!(calls[0].durable[0].event_type, EventType::ChatText);
    }
}
