//! Transport abstraction.
//!
//! Transports are responsible only for framing and session identification:
//! they deliver raw payloads in (tagged with a session id and, on HTTP, the
//! request's auth context) and accept serialized messages out. Everything
//! else - parsing, dispatch, session state - happens above them.

pub mod sse;
pub mod stdio;

pub use sse::SseTransport;
pub use stdio::StdioTransport;

use tokio::sync::mpsc;

use crate::auth::AuthContext;
use crate::error::TransportResult;

/// Why a session went away.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CloseReason {
    /// The peer dropped the connection.
    Disconnected,
    /// The input stream reached EOF (stdio).
    EndOfInput,
    /// The server is shutting down.
    Shutdown,
}

/// Events a transport reports to the server core.
#[derive(Debug)]
pub enum TransportEvent {
    /// A client connected; the core creates the session.
    SessionOpen {
        session_id: String,
    },
    /// One raw inbound payload (a message or a batch).
    Incoming {
        session_id: String,
        payload: String,
        /// Auth context validated by the HTTP middleware, when present.
        auth: Option<AuthContext>,
    },
    /// The session is gone; the core cancels its pending work.
    SessionClose {
        session_id: String,
        reason: CloseReason,
    },
}

/// A server-side transport: one (stdio) or many (SSE) client sessions.
#[async_trait::async_trait]
pub trait Transport: Send + Sync + 'static {
    /// Start serving and return the event stream. Called once.
    async fn start(&self) -> TransportResult<mpsc::Receiver<TransportEvent>>;

    /// Deliver one serialized message to a session. Writes to the same
    /// session never interleave.
    async fn send(&self, session_id: &str, payload: String) -> TransportResult<()>;

    /// Deliver one serialized message to every live session.
    async fn broadcast(&self, payload: String) -> TransportResult<()>;

    /// Stop serving and close every session.
    async fn close(&self) -> TransportResult<()>;
}
