//! HTTP + Server-Sent-Events transport.
//!
//! Two endpoints:
//! - `GET <sse_path>` opens the event stream. The first frame is an
//!   `endpoint` event telling the client where to POST
//!   (`<messages_path>?sessionId=<id>`); every later server-to-client
//!   message arrives as a `message` event. Keepalive comments go out every
//!   15 seconds.
//! - `POST <messages_path>?sessionId=<id>` enqueues one JSON-RPC payload and
//!   answers `202 Accepted` immediately; actual responses ride the SSE
//!   stream.
//!
//! Session ids are random UUIDs, allocated per GET and unguessable. POSTs
//! naming an unknown session get `404`.

use std::collections::HashMap;
use std::convert::Infallible;
use std::net::{Ipv4Addr, SocketAddr};
use std::sync::Arc;
use std::time::Duration;

use axum::extract::{Query, State};
use axum::http::StatusCode;
use axum::middleware;
use axum::response::sse::{Event, KeepAlive, Sse};
use axum::response::IntoResponse;
use axum::routing::{get, post};
use axum::{Extension, Json, Router};
use futures::stream::{self, Stream, StreamExt};
use serde::Deserialize;
use tokio::net::TcpListener;
use tokio::sync::{mpsc, watch, Mutex, RwLock};
use tokio::task::JoinHandle;
use tokio_stream::wrappers::ReceiverStream;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;

use super::{CloseReason, Transport, TransportEvent};
use crate::auth::{bearer_middleware, AuthContext, AuthGate};
use crate::config::Config;
use crate::error::{TransportError, TransportResult};

/// SSE transport settings.
#[derive(Debug, Clone)]
pub struct SseConfig {
    pub port: u16,
    pub fallback_ports: Vec<u16>,
    pub sse_path: String,
    pub messages_path: String,
    pub keepalive_interval: Duration,
}

impl From<&Config> for SseConfig {
    fn from(config: &Config) -> Self {
        Self {
            port: config.port,
            fallback_ports: config.fallback_ports.clone(),
            sse_path: config.sse_path.clone(),
            messages_path: config.messages_path.clone(),
            keepalive_interval: config.keepalive_interval,
        }
    }
}

/// Query parameters for the messages endpoint.
#[derive(Debug, Deserialize)]
struct MessageQuery {
    #[serde(rename = "sessionId")]
    session_id: Option<String>,
}

struct SseState {
    sessions: RwLock<HashMap<String, mpsc::Sender<String>>>,
    events: mpsc::Sender<TransportEvent>,
    messages_path: String,
    keepalive_interval: Duration,
}

/// The HTTP/SSE transport.
pub struct SseTransport {
    config: SseConfig,
    gate: Arc<AuthGate>,
    state: Mutex<Option<Arc<SseState>>>,
    shutdown: watch::Sender<bool>,
    local_addr: std::sync::Mutex<Option<SocketAddr>>,
    server_task: Mutex<Option<JoinHandle<()>>>,
}

impl SseTransport {
    /// Create a transport; nothing binds until [`Transport::start`].
    #[must_use]
    pub fn new(config: SseConfig, gate: AuthGate) -> Self {
        let (shutdown, _) = watch::channel(false);
        Self {
            config,
            gate: Arc::new(gate),
            state: Mutex::new(None),
            shutdown,
            local_addr: std::sync::Mutex::new(None),
            server_task: Mutex::new(None),
        }
    }

    /// The bound address, once started. Mainly for tests binding port 0.
    #[must_use]
    pub fn local_addr(&self) -> Option<SocketAddr> {
        *self.local_addr.lock().unwrap_or_else(std::sync::PoisonError::into_inner)
    }

    async fn bind(&self) -> TransportResult<TcpListener> {
        let mut ports = vec![self.config.port];
        ports.extend(&self.config.fallback_ports);

        for port in &ports {
            match TcpListener::bind((Ipv4Addr::UNSPECIFIED, *port)).await {
                Ok(listener) => {
                    let addr = listener.local_addr()?;
                    tracing::info!(addr = %addr, "SSE transport listening");
                    return Ok(listener);
                }
                Err(err) if err.kind() == std::io::ErrorKind::AddrInUse => {
                    tracing::warn!(port = *port, "Port in use, trying next");
                }
                Err(err) => return Err(err.into()),
            }
        }
        Err(TransportError::Bind { ports })
    }
}

#[async_trait::async_trait]
impl Transport for SseTransport {
    async fn start(&self) -> TransportResult<mpsc::Receiver<TransportEvent>> {
        let (events_tx, events_rx) = mpsc::channel(256);

        let state = Arc::new(SseState {
            sessions: RwLock::new(HashMap::new()),
            events: events_tx,
            messages_path: self.config.messages_path.clone(),
            keepalive_interval: self.config.keepalive_interval,
        });
        *self.state.lock().await = Some(Arc::clone(&state));

        let router = Router::new()
            .route("/health", get(handle_health))
            .route(&self.config.sse_path, get(handle_sse))
            .route(&self.config.messages_path, post(handle_messages))
            .layer(middleware::from_fn_with_state(
                Arc::clone(&self.gate),
                bearer_middleware,
            ))
            .layer(CorsLayer::permissive())
            .layer(TraceLayer::new_for_http())
            .with_state(state);

        let listener = self.bind().await?;
        *self
            .local_addr
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner) =
            Some(listener.local_addr()?);

        let mut shutdown_rx = self.shutdown.subscribe();
        let task = tokio::spawn(async move {
            let result = axum::serve(listener, router)
                .with_graceful_shutdown(async move {
                    let _ = shutdown_rx.changed().await;
                })
                .await;
            if let Err(err) = result {
                tracing::error!(error = %err, "SSE server terminated");
            }
        });
        *self.server_task.lock().await = Some(task);

        Ok(events_rx)
    }

    async fn send(&self, session_id: &str, payload: String) -> TransportResult<()> {
        let state = self.state.lock().await.clone().ok_or(TransportError::Closed)?;
        let sender = state.sessions.read().await.get(session_id).cloned();
        let Some(sender) = sender else {
            return Err(TransportError::SessionNotFound(session_id.to_owned()));
        };
        sender
            .send(payload)
            .await
            .map_err(|_| TransportError::SessionNotFound(session_id.to_owned()))
    }

    async fn broadcast(&self, payload: String) -> TransportResult<()> {
        let state = self.state.lock().await.clone().ok_or(TransportError::Closed)?;
        let senders: Vec<_> = state.sessions.read().await.values().cloned().collect();
        for sender in senders {
            // A session mid-disconnect is not an error for the others.
            let _ = sender.send(payload.clone()).await;
        }
        Ok(())
    }

    async fn close(&self) -> TransportResult<()> {
        if let Some(state) = self.state.lock().await.take() {
            let mut sessions = state.sessions.write().await;
            for (session_id, _) in sessions.drain() {
                let _ = state
                    .events
                    .send(TransportEvent::SessionClose {
                        session_id,
                        reason: CloseReason::Shutdown,
                    })
                    .await;
            }
        }
        let _ = self.shutdown.send(true);
        if let Some(task) = self.server_task.lock().await.take() {
            let _ = task.await;
        }
        Ok(())
    }
}

impl std::fmt::Debug for SseTransport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SseTransport")
            .field("config", &self.config)
            .field("gate", &self.gate)
            .finish()
    }
}

async fn handle_health(State(state): State<Arc<SseState>>) -> impl IntoResponse {
    let sessions = state.sessions.read().await.len();
    Json(serde_json::json!({
        "status": "ok",
        "service": env!("CARGO_PKG_NAME"),
        "version": env!("CARGO_PKG_VERSION"),
        "sessions": sessions,
    }))
}

/// `GET <sse_path>`: allocate a session and stream server-to-client frames.
async fn handle_sse(
    State(state): State<Arc<SseState>>,
    auth: Option<Extension<AuthContext>>,
) -> impl IntoResponse {
    let session_id = uuid::Uuid::new_v4().to_string();
    let (tx, rx) = mpsc::channel::<String>(64);

    state
        .sessions
        .write()
        .await
        .insert(session_id.clone(), tx);

    if state
        .events
        .send(TransportEvent::SessionOpen { session_id: session_id.clone() })
        .await
        .is_err()
    {
        state.sessions.write().await.remove(&session_id);
        return StatusCode::SERVICE_UNAVAILABLE.into_response();
    }

    tracing::info!(
        session_id = %session_id,
        authenticated = auth.is_some(),
        "New SSE stream connection"
    );

    let endpoint = format!("{}?sessionId={}", state.messages_path, session_id);
    let stream = build_session_stream(Arc::clone(&state), session_id, endpoint, rx);

    Sse::new(stream)
        .keep_alive(
            KeepAlive::new()
                .interval(state.keepalive_interval)
                .text("keepalive"),
        )
        .into_response()
}

/// Endpoint event first, then live messages. The guard rides inside the
/// stream so dropping it (client disconnect or shutdown) reports the close.
fn build_session_stream(
    state: Arc<SseState>,
    session_id: String,
    endpoint: String,
    rx: mpsc::Receiver<String>,
) -> impl Stream<Item = Result<Event, Infallible>> {
    let guard = DisconnectGuard { state, session_id };

    let first = stream::once(async move {
        Ok::<_, Infallible>(Event::default().event("endpoint").data(endpoint))
    });
    let live = ReceiverStream::new(rx).map(move |payload| {
        let _ = &guard;
        Ok(Event::default().event("message").data(payload))
    });
    first.chain(live)
}

struct DisconnectGuard {
    state: Arc<SseState>,
    session_id: String,
}

impl Drop for DisconnectGuard {
    fn drop(&mut self) {
        let state = Arc::clone(&self.state);
        let session_id = self.session_id.clone();
        tokio::spawn(async move {
            let removed = state.sessions.write().await.remove(&session_id).is_some();
            if removed {
                tracing::info!(session_id = %session_id, "SSE stream closed");
                let _ = state
                    .events
                    .send(TransportEvent::SessionClose {
                        session_id,
                        reason: CloseReason::Disconnected,
                    })
                    .await;
            }
        });
    }
}

/// `POST <messages_path>?sessionId=<id>`: enqueue one payload.
async fn handle_messages(
    State(state): State<Arc<SseState>>,
    Query(query): Query<MessageQuery>,
    auth: Option<Extension<AuthContext>>,
    body: String,
) -> impl IntoResponse {
    let Some(session_id) = query.session_id else {
        return (StatusCode::BAD_REQUEST, "missing sessionId").into_response();
    };

    if !state.sessions.read().await.contains_key(&session_id) {
        return (StatusCode::NOT_FOUND, "unknown session").into_response();
    }

    let event = TransportEvent::Incoming {
        session_id,
        payload: body,
        auth: auth.map(|Extension(ctx)| ctx),
    };
    if state.events.send(event).await.is_err() {
        return StatusCode::SERVICE_UNAVAILABLE.into_response();
    }

    StatusCode::ACCEPTED.into_response()
}
