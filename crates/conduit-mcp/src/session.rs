//! Session state and lifecycle.
//!
//! A session is one client's logical connection: created when the transport
//! announces it, initialized by the `initialize`/`notifications/initialized`
//! handshake, destroyed on disconnect. Destruction cancels every pending
//! operation the session still owns.

use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicI64, Ordering};
use std::time::Instant;

use tokio::sync::{oneshot, Mutex, RwLock};

use crate::auth::AuthContext;
use crate::error::{McpError, McpResult};
use crate::progress::CancellationToken;
use crate::protocol::content::{Implementation, Root};
use crate::protocol::{negotiate_version, JsonRpcResponse, LogLevel, RequestId};

/// What kind of work a pending operation represents.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OperationKind {
    ToolCall,
    ResourceRead,
    PromptGet,
    Completion,
    Other,
}

/// One in-flight operation owned by a session.
#[derive(Debug, Clone)]
pub struct PendingOperation {
    /// Unique within the session.
    pub id: String,
    pub kind: OperationKind,
    /// The originating request id, when the operation answers a request.
    pub request_id: Option<RequestId>,
    /// Shared cancellation handle; its flag is the `cancelled` state.
    pub token: CancellationToken,
    pub created_at: Instant,
}

/// Per-client connection state.
pub struct Session {
    /// Unique session identifier, minted by the transport.
    pub id: String,
    /// When the transport opened the session.
    pub connected_at: Instant,

    initialize_received: AtomicBool,
    initialized: AtomicBool,
    protocol_version: RwLock<Option<&'static str>>,
    client_capabilities: RwLock<serde_json::Value>,
    client_info: RwLock<Option<Implementation>>,
    roots: RwLock<Vec<Root>>,
    auth: RwLock<Option<AuthContext>>,
    log_level: RwLock<Option<LogLevel>>,
    pending: Mutex<HashMap<String, PendingOperation>>,
    next_operation: AtomicI64,

    // Server-originated requests awaiting a client response.
    outbound: Mutex<HashMap<i64, oneshot::Sender<JsonRpcResponse>>>,
    next_outbound: AtomicI64,
}

impl Session {
    /// Create a fresh, uninitialized session.
    #[must_use]
    pub fn new(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            connected_at: Instant::now(),
            initialize_received: AtomicBool::new(false),
            initialized: AtomicBool::new(false),
            protocol_version: RwLock::new(None),
            client_capabilities: RwLock::new(serde_json::Value::Null),
            client_info: RwLock::new(None),
            roots: RwLock::new(Vec::new()),
            auth: RwLock::new(None),
            log_level: RwLock::new(None),
            pending: Mutex::new(HashMap::new()),
            next_operation: AtomicI64::new(1),
            outbound: Mutex::new(HashMap::new()),
            next_outbound: AtomicI64::new(1),
        }
    }

    /// Run version negotiation and record the client's identity.
    ///
    /// Succeeds at most once; a second `initialize` is an invalid request.
    /// Failed negotiation leaves the session open for another attempt.
    pub async fn begin_initialize(
        &self,
        client_version: &str,
        capabilities: serde_json::Value,
        client_info: Option<Implementation>,
    ) -> McpResult<&'static str> {
        if self.initialize_received.load(Ordering::SeqCst) {
            return Err(McpError::invalid_request("initialize already received"));
        }
        let Some(version) = negotiate_version(client_version) else {
            return Err(McpError::incompatible_version(client_version));
        };
        self.initialize_received.store(true, Ordering::SeqCst);
        *self.protocol_version.write().await = Some(version);
        *self.client_capabilities.write().await = capabilities;
        *self.client_info.write().await = client_info;
        Ok(version)
    }

    /// Complete the handshake (`notifications/initialized`).
    pub fn mark_initialized(&self) {
        self.initialized.store(true, Ordering::SeqCst);
    }

    /// Whether the handshake completed.
    #[must_use]
    pub fn is_initialized(&self) -> bool {
        self.initialized.load(Ordering::SeqCst)
    }

    /// The negotiated protocol version, once `initialize` succeeded.
    pub async fn protocol_version(&self) -> Option<&'static str> {
        *self.protocol_version.read().await
    }

    /// Capabilities the client declared during `initialize`.
    pub async fn client_capabilities(&self) -> serde_json::Value {
        self.client_capabilities.read().await.clone()
    }

    /// Replace the client-disclosed roots.
    pub async fn set_roots(&self, roots: Vec<Root>) {
        *self.roots.write().await = roots;
    }

    /// Current roots.
    pub async fn roots(&self) -> Vec<Root> {
        self.roots.read().await.clone()
    }

    /// Attach a validated auth context.
    pub async fn set_auth(&self, auth: AuthContext) {
        *self.auth.write().await = Some(auth);
    }

    /// The auth context, if any request on this session authenticated.
    pub async fn auth(&self) -> Option<AuthContext> {
        self.auth.read().await.clone()
    }

    /// Set the `logging/setLevel` threshold.
    pub async fn set_log_level(&self, level: LogLevel) {
        *self.log_level.write().await = Some(level);
    }

    /// Whether a log message at `level` should be delivered.
    pub async fn wants_log(&self, level: LogLevel) -> bool {
        self.log_level.read().await.is_none_or(|min| level >= min)
    }

    /// Register an in-flight operation; returns its id and token.
    pub async fn register_operation(
        &self,
        kind: OperationKind,
        request_id: Option<RequestId>,
    ) -> (String, CancellationToken) {
        let op_id = format!("op-{}", self.next_operation.fetch_add(1, Ordering::SeqCst));
        let token = CancellationToken::new();
        let op = PendingOperation {
            id: op_id.clone(),
            kind,
            request_id,
            token: token.clone(),
            created_at: Instant::now(),
        };
        self.pending.lock().await.insert(op_id.clone(), op);
        (op_id, token)
    }

    /// Remove a finished operation.
    pub async fn complete_operation(&self, op_id: &str) {
        self.pending.lock().await.remove(op_id);
    }

    /// Cancel the operation answering `request_id`, if still pending.
    pub async fn cancel_request(&self, request_id: &RequestId) -> bool {
        let pending = self.pending.lock().await;
        let Some(op) = pending
            .values()
            .find(|op| op.request_id.as_ref() == Some(request_id))
        else {
            return false;
        };
        op.token.cancel();
        true
    }

    /// Cancel everything. Called when the session closes.
    pub async fn cancel_all(&self) -> usize {
        let pending = self.pending.lock().await;
        for op in pending.values() {
            op.token.cancel();
        }
        pending.len()
    }

    /// Number of in-flight operations.
    pub async fn pending_count(&self) -> usize {
        self.pending.lock().await.len()
    }

    /// Allocate an id for a server-originated request and register the
    /// response slot.
    pub async fn register_outbound(&self) -> (i64, oneshot::Receiver<JsonRpcResponse>) {
        let id = self.next_outbound.fetch_add(1, Ordering::SeqCst);
        let (tx, rx) = oneshot::channel();
        self.outbound.lock().await.insert(id, tx);
        (id, rx)
    }

    /// Route a client response to the waiting server-originated request.
    pub async fn resolve_outbound(&self, response: JsonRpcResponse) -> bool {
        let Some(id) = response.id.as_i64() else { return false };
        let Some(tx) = self.outbound.lock().await.remove(&id) else {
            return false;
        };
        tx.send(response).is_ok()
    }

    /// Drop a response slot whose request timed out or was abandoned.
    pub async fn forget_outbound(&self, id: i64) {
        self.outbound.lock().await.remove(&id);
    }
}

impl std::fmt::Debug for Session {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Session")
            .field("id", &self.id)
            .field("initialized", &self.is_initialized())
            .finish()
    }
}

/// All live sessions, keyed by id.
#[derive(Clone, Default)]
pub struct SessionManager {
    sessions: Arc<RwLock<HashMap<String, Arc<Session>>>>,
}

impl SessionManager {
    /// Create an empty manager.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Create and register a session under `id`.
    pub async fn create(&self, id: impl Into<String>) -> Arc<Session> {
        let id = id.into();
        let session = Arc::new(Session::new(id.clone()));
        self.sessions.write().await.insert(id, Arc::clone(&session));
        tracing::info!(session_id = %session.id, "Session opened");
        session
    }

    /// Look up a session.
    pub async fn get(&self, id: &str) -> Option<Arc<Session>> {
        self.sessions.read().await.get(id).cloned()
    }

    /// Remove a session, returning it for teardown.
    pub async fn remove(&self, id: &str) -> Option<Arc<Session>> {
        let removed = self.sessions.write().await.remove(id);
        if removed.is_some() {
            tracing::info!(session_id = %id, "Session closed");
        }
        removed
    }

    /// Snapshot of every live session.
    pub async fn all(&self) -> Vec<Arc<Session>> {
        self.sessions.read().await.values().cloned().collect()
    }

    /// Number of live sessions.
    pub async fn count(&self) -> usize {
        self.sessions.read().await.len()
    }
}

impl std::fmt::Debug for SessionManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SessionManager").finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_initialize_once() {
        let session = Session::new("s1");
        let version = session
            .begin_initialize("2025-03-26", serde_json::json!({}), None)
            .await
            .unwrap();
        assert_eq!(version, "2025-03-26");

        let err = session
            .begin_initialize("2025-03-26", serde_json::json!({}), None)
            .await
            .unwrap_err();
        assert_eq!(err.code, crate::error::codes::INVALID_REQUEST);
    }

    #[tokio::test]
    async fn test_failed_negotiation_allows_retry() {
        let session = Session::new("s1");
        let err = session
            .begin_initialize("2020-01-01", serde_json::json!({}), None)
            .await
            .unwrap_err();
        assert_eq!(err.code, crate::error::codes::INCOMPATIBLE_VERSION);
        assert!(session.protocol_version().await.is_none());

        // A corrected attempt still works.
        session
            .begin_initialize("2024-11-05", serde_json::json!({}), None)
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn test_handshake_flag() {
        let session = Session::new("s1");
        assert!(!session.is_initialized());
        session.mark_initialized();
        assert!(session.is_initialized());
    }

    #[tokio::test]
    async fn test_cancel_by_request_id() {
        let session = Session::new("s1");
        let (_, token) = session
            .register_operation(OperationKind::ToolCall, Some(serde_json::json!(7)))
            .await;
        assert!(!token.is_cancelled());

        assert!(session.cancel_request(&serde_json::json!(7)).await);
        assert!(token.is_cancelled());

        assert!(!session.cancel_request(&serde_json::json!(99)).await);
    }

    #[tokio::test]
    async fn test_close_cancels_all_pending() {
        let session = Session::new("s1");
        let (_, t1) = session.register_operation(OperationKind::ToolCall, None).await;
        let (_, t2) = session
            .register_operation(OperationKind::ResourceRead, Some(serde_json::json!("a")))
            .await;
        assert_eq!(session.cancel_all().await, 2);
        assert!(t1.is_cancelled());
        assert!(t2.is_cancelled());
    }

    #[tokio::test]
    async fn test_operation_ids_unique() {
        let session = Session::new("s1");
        let (a, _) = session.register_operation(OperationKind::Other, None).await;
        let (b, _) = session.register_operation(OperationKind::Other, None).await;
        assert_ne!(a, b);
        assert_eq!(session.pending_count().await, 2);
        session.complete_operation(&a).await;
        assert_eq!(session.pending_count().await, 1);
    }

    #[tokio::test]
    async fn test_outbound_resolution() {
        let session = Session::new("s1");
        let (id, rx) = session.register_outbound().await;
        let response = JsonRpcResponse::success(serde_json::json!(id), serde_json::json!({"ok": true}));
        assert!(session.resolve_outbound(response).await);
        let delivered = rx.await.unwrap();
        assert_eq!(delivered.result.unwrap()["ok"], true);
    }

    #[tokio::test]
    async fn test_log_level_filter() {
        let session = Session::new("s1");
        assert!(session.wants_log(LogLevel::Debug).await);
        session.set_log_level(LogLevel::Warning).await;
        assert!(!session.wants_log(LogLevel::Info).await);
        assert!(session.wants_log(LogLevel::Error).await);
    }

    #[tokio::test]
    async fn test_manager_lifecycle() {
        let manager = SessionManager::new();
        let session = manager.create("s1").await;
        assert_eq!(manager.count().await, 1);
        assert!(manager.get("s1").await.is_some());
        assert!(manager.get("nope").await.is_none());

        let removed = manager.remove("s1").await.unwrap();
        assert_eq!(removed.id, session.id);
        assert_eq!(manager.count().await, 0);
    }
}
