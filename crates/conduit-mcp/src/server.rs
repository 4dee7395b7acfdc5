//! Server facade.
//!
//! Composes the registry, session manager, rate limiter, auth validator,
//! and transport into one server. The embedding application registers its
//! tools, resources, and prompts here, connects a transport, and shuts the
//! whole thing down gracefully.

use std::sync::Arc;
use std::time::Duration;

use serde_json::{json, Value};
use tokio::sync::RwLock;
use tokio::task::JoinHandle;

use crate::auth::TokenValidator;
use crate::config::Config;
use crate::dispatch::Dispatcher;
use crate::error::{McpError, McpResult, TransportResult};
use crate::handler::CompletionHandler;
use crate::limiter::{RateLimitConfig, RateLimiter};
use crate::protocol::content::{Implementation, ServerCapabilities};
use crate::protocol::{JsonRpcNotification, JsonRpcRequest, JsonRpcResponse, LogLevel};
use crate::registry::{Prompt, Registry, RegistryChange, Resource, Tool};
use crate::session::{Session, SessionManager};
use crate::transport::{CloseReason, Transport, TransportEvent};

/// How long a server-originated request waits for the client.
const CLIENT_REQUEST_TIMEOUT: Duration = Duration::from_secs(10);

/// Shared state behind the facade and the dispatcher.
pub struct ServerCore {
    pub info: Implementation,
    pub capabilities: ServerCapabilities,
    pub config: Config,
    pub registry: Registry,
    pub sessions: SessionManager,
    pub limiter: Option<RateLimiter>,
    pub validator: Option<Arc<dyn TokenValidator>>,
    completion: std::sync::RwLock<Option<Arc<dyn CompletionHandler>>>,
    transport: RwLock<Option<Arc<dyn Transport>>>,
}

impl ServerCore {
    /// The connected transport, if any.
    pub async fn transport(&self) -> Option<Arc<dyn Transport>> {
        self.transport.read().await.clone()
    }

    /// The registered completion handler, if any.
    pub fn completion_handler(&self) -> Option<Arc<dyn CompletionHandler>> {
        self.completion
            .read()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
            .clone()
    }

    /// Serialize and deliver one message to a session; delivery failures
    /// close nothing here, they just get logged.
    pub async fn send_to_session(&self, session_id: &str, payload: String) {
        let Some(transport) = self.transport().await else {
            tracing::warn!(session_id = %session_id, "No transport to deliver message");
            return;
        };
        if let Err(err) = transport.send(session_id, payload).await {
            tracing::debug!(session_id = %session_id, error = %err, "Delivery failed");
        }
    }

    /// Send a notification to one session.
    pub async fn notify_session(&self, session_id: &str, method: &str, params: Value) {
        let note = JsonRpcNotification::new(method, params);
        self.send_to_session(session_id, note.to_value().to_string()).await;
    }

    /// Send a notification to every session on the transport.
    pub async fn broadcast_notification(&self, method: &str, params: Value) {
        let Some(transport) = self.transport().await else {
            return;
        };
        let note = JsonRpcNotification::new(method, params);
        if let Err(err) = transport.broadcast(note.to_value().to_string()).await {
            tracing::debug!(method = %method, error = %err, "Broadcast failed");
        }
    }

    /// Deliver a log message to one session, honoring its
    /// `logging/setLevel` threshold.
    pub async fn log_to_session(&self, session: &Arc<Session>, level: LogLevel, message: &str) {
        if !self.capabilities.logging || !session.wants_log(level).await {
            return;
        }
        self.notify_session(
            &session.id,
            "notifications/message",
            json!({ "level": level.as_str(), "data": { "message": message } }),
        )
        .await;
    }

    /// Issue a server-originated request and await the client's response.
    pub async fn request_from_client(
        &self,
        session: &Arc<Session>,
        method: &str,
        params: Value,
    ) -> McpResult<JsonRpcResponse> {
        let transport = self
            .transport()
            .await
            .ok_or_else(|| McpError::internal("no transport connected"))?;
        let (id, response_rx) = session.register_outbound().await;
        let request = JsonRpcRequest { id: json!(id), method: method.to_owned(), params };

        if let Err(err) = transport.send(&session.id, request.to_value().to_string()).await {
            session.forget_outbound(id).await;
            return Err(McpError::internal(format!("send failed: {err}")));
        }

        match tokio::time::timeout(CLIENT_REQUEST_TIMEOUT, response_rx).await {
            Ok(Ok(response)) => Ok(response),
            Ok(Err(_)) => {
                Err(McpError::internal("client response channel dropped"))
            }
            Err(_) => {
                session.forget_outbound(id).await;
                Err(McpError::internal(format!("client did not answer {method}")))
            }
        }
    }

    /// Tear down one session: cancel pending work, flush limiter buckets,
    /// drop subscriptions.
    pub async fn close_session(&self, session_id: &str, reason: CloseReason) {
        let Some(session) = self.sessions.remove(session_id).await else {
            return;
        };
        let cancelled = session.cancel_all().await;
        if let Some(limiter) = &self.limiter {
            limiter.flush_session(session_id);
        }
        self.registry.drop_session(session_id);
        tracing::info!(
            session_id = %session_id,
            reason = ?reason,
            cancelled_operations = cancelled,
            "Session torn down"
        );
    }

    /// Emit a `listChanged` notification when the capability is advertised.
    pub async fn announce_change(&self, change: RegistryChange) {
        let advertised = match change {
            RegistryChange::Tools => self.capabilities.tools_list_changed,
            RegistryChange::Resources => self.capabilities.resources_list_changed,
            RegistryChange::Prompts => self.capabilities.prompts_list_changed,
        };
        if advertised {
            self.broadcast_notification(change.notification_method(), json!({})).await;
        }
    }
}

impl std::fmt::Debug for ServerCore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ServerCore")
            .field("info", &self.info)
            .field("registry", &self.registry)
            .finish()
    }
}

/// Builder for [`McpServer`].
pub struct ServerBuilder {
    info: Implementation,
    capabilities: ServerCapabilities,
    config: Config,
    limiter: Option<RateLimitConfig>,
    validator: Option<Arc<dyn TokenValidator>>,
    completion: Option<Arc<dyn CompletionHandler>>,
}

impl ServerBuilder {
    /// Start a builder with the server's advertised identity.
    #[must_use]
    pub fn new(name: impl Into<String>, version: impl Into<String>) -> Self {
        Self {
            info: Implementation { name: name.into(), version: version.into() },
            capabilities: ServerCapabilities::default(),
            config: Config::default(),
            limiter: None,
            validator: None,
            completion: None,
        }
    }

    /// Override the advertised capabilities.
    #[must_use]
    pub fn capabilities(mut self, capabilities: ServerCapabilities) -> Self {
        self.capabilities = capabilities;
        self
    }

    /// Supply the server configuration.
    #[must_use]
    pub fn config(mut self, config: Config) -> Self {
        self.config = config;
        self
    }

    /// Enable the sliding-window rate limiter.
    #[must_use]
    pub fn rate_limit(mut self, limit: RateLimitConfig) -> Self {
        self.limiter = Some(limit);
        self
    }

    /// Install a token validator; scoped methods then require auth.
    #[must_use]
    pub fn validator(mut self, validator: Arc<dyn TokenValidator>) -> Self {
        self.validator = Some(validator);
        self
    }

    /// Install the `completion/complete` handler.
    #[must_use]
    pub fn completion(mut self, handler: Arc<dyn CompletionHandler>) -> Self {
        self.completion = Some(handler);
        self
    }

    /// Build the server. If capabilities enable completion but no handler
    /// was supplied, the capability is withdrawn.
    #[must_use]
    pub fn build(self) -> McpServer {
        let mut capabilities = self.capabilities;
        capabilities.completion = capabilities.completion && self.completion.is_some();

        McpServer {
            core: Arc::new(ServerCore {
                info: self.info,
                capabilities,
                config: self.config,
                registry: Registry::new(),
                sessions: SessionManager::new(),
                limiter: self.limiter.map(RateLimiter::new),
                validator: self.validator,
                completion: std::sync::RwLock::new(self.completion),
                transport: RwLock::new(None),
            }),
        }
    }
}

/// The MCP server.
#[derive(Clone)]
pub struct McpServer {
    core: Arc<ServerCore>,
}

impl McpServer {
    /// Start building a server.
    #[must_use]
    pub fn builder(name: impl Into<String>, version: impl Into<String>) -> ServerBuilder {
        ServerBuilder::new(name, version)
    }

    /// Shared state, for the dispatcher and tests.
    #[must_use]
    pub fn core(&self) -> Arc<ServerCore> {
        Arc::clone(&self.core)
    }

    /// Register (or replace) a tool and announce the change.
    pub async fn add_tool(&self, tool: Tool) {
        let name = tool.info.name.clone();
        let replaced = self.core.registry.register_tool(tool);
        tracing::debug!(tool = %name, replaced, "Tool registered");
        self.core.announce_change(RegistryChange::Tools).await;
    }

    /// Remove a tool; announces only when something was removed.
    pub async fn remove_tool(&self, name: &str) -> bool {
        let removed = self.core.registry.remove_tool(name);
        if removed {
            self.core.announce_change(RegistryChange::Tools).await;
        }
        removed
    }

    /// Register (or replace) a resource or template and announce.
    pub async fn add_resource(&self, resource: Resource) {
        let uri = resource.uri.clone();
        let replaced = self.core.registry.register_resource(resource);
        tracing::debug!(uri = %uri, replaced, "Resource registered");
        self.core.announce_change(RegistryChange::Resources).await;
    }

    /// Remove a resource; announces only when something was removed.
    pub async fn remove_resource(&self, uri: &str) -> bool {
        let removed = self.core.registry.remove_resource(uri);
        if removed {
            self.core.announce_change(RegistryChange::Resources).await;
        }
        removed
    }

    /// Register (or replace) a prompt and announce.
    pub async fn add_prompt(&self, prompt: Prompt) {
        let name = prompt.info.name.clone();
        let replaced = self.core.registry.register_prompt(prompt);
        tracing::debug!(prompt = %name, replaced, "Prompt registered");
        self.core.announce_change(RegistryChange::Prompts).await;
    }

    /// Remove a prompt; announces only when something was removed.
    pub async fn remove_prompt(&self, name: &str) -> bool {
        let removed = self.core.registry.remove_prompt(name);
        if removed {
            self.core.announce_change(RegistryChange::Prompts).await;
        }
        removed
    }

    /// Deliver a log message to every session that wants this level.
    pub async fn send_log(&self, level: LogLevel, message: &str) {
        for session in self.core.sessions.all().await {
            self.core.log_to_session(&session, level, message).await;
        }
    }

    /// Emit a progress notification for a client-supplied token.
    pub async fn notify_progress(
        &self,
        session_id: &str,
        progress_token: Value,
        progress: f64,
        total: Option<f64>,
    ) {
        let mut params = json!({ "progressToken": progress_token, "progress": progress });
        if let Some(total) = total {
            params["total"] = json!(total);
        }
        self.core
            .notify_session(session_id, "notifications/progress", params)
            .await;
    }

    /// Tell subscribed sessions that a resource changed.
    pub async fn notify_resource_updated(&self, uri: &str) {
        for session_id in self.core.registry.subscribers(uri) {
            self.core
                .notify_session(
                    &session_id,
                    "notifications/resources/updated",
                    json!({ "uri": uri }),
                )
                .await;
        }
    }

    /// Ask a client to sample a message (`sampling/createMessage`).
    pub async fn create_message(&self, session_id: &str, params: Value) -> McpResult<Value> {
        let session = self
            .core
            .sessions
            .get(session_id)
            .await
            .ok_or_else(|| McpError::internal(format!("unknown session: {session_id}")))?;
        let response = self
            .core
            .request_from_client(&session, "sampling/createMessage", params)
            .await?;
        match (response.result, response.error) {
            (Some(result), _) => Ok(result),
            (None, Some(error)) => Err(McpError {
                code: error.code,
                message: error.message,
                data: error.data,
            }),
            (None, None) => Err(McpError::internal("empty client response")),
        }
    }

    /// Attach a transport and start pumping its events.
    ///
    /// The returned handle resolves when the transport's event stream ends.
    pub async fn connect(&self, transport: Arc<dyn Transport>) -> TransportResult<JoinHandle<()>> {
        let mut events = transport.start().await?;
        *self.core.transport.write().await = Some(Arc::clone(&transport));

        let dispatcher = Dispatcher::new(self.core());
        let core = self.core();
        let pump = tokio::spawn(async move {
            while let Some(event) = events.recv().await {
                match event {
                    TransportEvent::SessionOpen { session_id } => {
                        core.sessions.create(session_id).await;
                    }
                    TransportEvent::Incoming { session_id, payload, auth } => {
                        // Requests within a session run concurrently; clients
                        // correlate responses by id.
                        let dispatcher = dispatcher.clone();
                        let core = Arc::clone(&core);
                        tokio::spawn(async move {
                            if let Some(reply) =
                                dispatcher.process(&session_id, &payload, auth).await
                            {
                                core.send_to_session(&session_id, reply).await;
                            }
                        });
                    }
                    TransportEvent::SessionClose { session_id, reason } => {
                        core.close_session(&session_id, reason).await;
                    }
                }
            }
            tracing::debug!("Transport event stream ended");
        });

        tracing::info!(server = %self.core.info.name, "Transport connected");
        Ok(pump)
    }

    /// Graceful shutdown: notify clients, tear down sessions, close the
    /// transport.
    pub async fn shutdown(&self) -> TransportResult<()> {
        tracing::info!("Shutting down");
        self.core
            .broadcast_notification("notifications/shutdown", json!({}))
            .await;

        for session in self.core.sessions.all().await {
            self.core.close_session(&session.id, CloseReason::Shutdown).await;
        }

        let transport = self.core.transport.write().await.take();
        if let Some(transport) = transport {
            transport.close().await?;
        }
        Ok(())
    }
}

impl std::fmt::Debug for McpServer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("McpServer").field("core", &self.core).finish()
    }
}
