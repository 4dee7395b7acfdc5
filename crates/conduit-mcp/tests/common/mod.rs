//! Shared test harness: an in-process transport wired to channels, so tests
//! can inject payloads and observe everything the server sends back.

// Not every test binary uses every helper.
#![allow(dead_code)]

use std::sync::Arc;
use std::time::Duration;

use serde_json::Value;
use tokio::sync::{mpsc, Mutex};

use conduit_mcp::auth::AuthContext;
use conduit_mcp::error::{TransportError, TransportResult};
use conduit_mcp::server::McpServer;
use conduit_mcp::transport::{CloseReason, Transport, TransportEvent};

/// A transport backed by channels instead of sockets.
pub struct ChannelTransport {
    events: Mutex<Option<mpsc::Sender<TransportEvent>>>,
    outbound: mpsc::UnboundedSender<(String, String)>,
}

impl ChannelTransport {
    /// Returns the transport and the receiver of everything it sends.
    pub fn new() -> (Arc<Self>, mpsc::UnboundedReceiver<(String, String)>) {
        let (outbound, outbound_rx) = mpsc::unbounded_channel();
        let transport = Arc::new(Self { events: Mutex::new(None), outbound });
        (transport, outbound_rx)
    }

    async fn emit(&self, event: TransportEvent) {
        let sender = self.events.lock().await.clone();
        if let Some(sender) = sender {
            sender.send(event).await.expect("event pump gone");
        }
    }

    /// Announce a new client session.
    pub async fn open_session(&self, session_id: &str) {
        self.emit(TransportEvent::SessionOpen { session_id: session_id.to_owned() }).await;
    }

    /// Inject one raw payload from a client.
    pub async fn inject(&self, session_id: &str, payload: impl Into<String>) {
        self.emit(TransportEvent::Incoming {
            session_id: session_id.to_owned(),
            payload: payload.into(),
            auth: None,
        })
        .await;
    }

    /// Inject a payload carrying a validated auth context.
    pub async fn inject_with_auth(
        &self,
        session_id: &str,
        payload: impl Into<String>,
        auth: AuthContext,
    ) {
        self.emit(TransportEvent::Incoming {
            session_id: session_id.to_owned(),
            payload: payload.into(),
            auth: Some(auth),
        })
        .await;
    }

    /// Announce a client disconnect.
    pub async fn drop_session(&self, session_id: &str) {
        self.emit(TransportEvent::SessionClose {
            session_id: session_id.to_owned(),
            reason: CloseReason::Disconnected,
        })
        .await;
    }
}

#[async_trait::async_trait]
impl Transport for ChannelTransport {
    async fn start(&self) -> TransportResult<mpsc::Receiver<TransportEvent>> {
        let (tx, rx) = mpsc::channel(64);
        *self.events.lock().await = Some(tx);
        Ok(rx)
    }

    async fn send(&self, session_id: &str, payload: String) -> TransportResult<()> {
        self.outbound
            .send((session_id.to_owned(), payload))
            .map_err(|_| TransportError::Closed)
    }

    async fn broadcast(&self, payload: String) -> TransportResult<()> {
        self.outbound
            .send(("*".to_owned(), payload))
            .map_err(|_| TransportError::Closed)
    }

    async fn close(&self) -> TransportResult<()> {
        self.events.lock().await.take();
        Ok(())
    }
}

/// A connected server plus the client's view of the wire.
pub struct Harness {
    pub server: McpServer,
    pub transport: Arc<ChannelTransport>,
    outbound: mpsc::UnboundedReceiver<(String, String)>,
}

impl Harness {
    /// Connect `server` to a fresh channel transport.
    pub async fn connect(server: McpServer) -> Self {
        let (transport, outbound) = ChannelTransport::new();
        server
            .connect(Arc::clone(&transport) as Arc<dyn Transport>)
            .await
            .expect("connect");
        Self { server, transport, outbound }
    }

    /// Next outgoing frame as `(session_id, parsed_json)`.
    pub async fn next_frame(&mut self) -> (String, Value) {
        let (session, payload) = tokio::time::timeout(Duration::from_secs(5), self.outbound.recv())
            .await
            .expect("timed out waiting for server output")
            .expect("transport closed");
        let value = serde_json::from_str(&payload).expect("server emitted invalid JSON");
        (session, value)
    }

    /// Next frame that is a response to `id` on `session`, skipping
    /// notifications and frames for other sessions.
    pub async fn response_for(&mut self, session: &str, id: &Value) -> Value {
        loop {
            let (frame_session, frame) = self.next_frame().await;
            if frame_session == session && frame.get("id") == Some(id) {
                return frame;
            }
        }
    }

    /// Next notification with the given method, skipping everything else.
    pub async fn notification(&mut self, method: &str) -> (String, Value) {
        loop {
            let (session, frame) = self.next_frame().await;
            if frame.get("method").and_then(Value::as_str) == Some(method) {
                return (session, frame);
            }
        }
    }

    /// Assert no frame arrives for a short grace period.
    pub async fn assert_quiet(&mut self) {
        let outcome =
            tokio::time::timeout(Duration::from_millis(200), self.outbound.recv()).await;
        assert!(outcome.is_err(), "expected silence, got {outcome:?}");
    }

    /// Run the initialize handshake for `session`.
    pub async fn handshake(&mut self, session: &str) {
        self.transport.open_session(session).await;
        self.transport
            .inject(
                session,
                serde_json::json!({
                    "jsonrpc": "2.0",
                    "id": "init",
                    "method": "initialize",
                    "params": {
                        "protocolVersion": "2024-11-05",
                        "capabilities": {},
                        "clientInfo": { "name": "test-client", "version": "0" }
                    }
                })
                .to_string(),
            )
            .await;
        let response = self.response_for(session, &serde_json::json!("init")).await;
        assert!(response.get("result").is_some(), "initialize failed: {response}");
        self.transport
            .inject(
                session,
                r#"{"jsonrpc":"2.0","method":"notifications/initialized"}"#,
            )
            .await;
        // The notification produces no reply and is handled on its own
        // task; wait for the state flip so later requests cannot race it.
        let core = self.server.core();
        let deadline = tokio::time::Instant::now() + Duration::from_secs(5);
        loop {
            if let Some(live) = core.sessions.get(session).await {
                if live.is_initialized() {
                    break;
                }
            }
            assert!(tokio::time::Instant::now() < deadline, "handshake never completed");
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    }
}
