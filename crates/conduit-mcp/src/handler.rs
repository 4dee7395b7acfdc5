//! Handler traits and the per-request context.
//!
//! The core never executes user code itself: tools, resources, prompts, and
//! completion are opaque handlers supplied by the embedding application.
//! Each invocation receives a [`RequestContext`] carrying the session, the
//! caller's auth context, a cancellation token, and (when the client asked
//! for it) a progress reporter.

use std::collections::HashMap;
use std::sync::Arc;

use crate::auth::AuthContext;
use crate::error::{McpError, McpResult};
use crate::progress::{CancellationToken, ProgressReporter};
use crate::protocol::content::{CallToolResult, GetPromptResult, ResourceContents};
use crate::session::Session;

/// Everything a handler may need about the request it serves.
#[derive(Debug)]
pub struct RequestContext {
    /// The session the request arrived on.
    pub session: Arc<Session>,
    /// Auth context, when the caller authenticated.
    pub auth: Option<AuthContext>,
    /// Cooperative cancellation handle for this request.
    pub cancellation: CancellationToken,
    progress: Option<ProgressReporter>,
}

impl RequestContext {
    /// Assemble a context. The dispatcher is the usual caller; tests build
    /// these directly.
    #[must_use]
    pub fn new(
        session: Arc<Session>,
        auth: Option<AuthContext>,
        cancellation: CancellationToken,
        progress: Option<ProgressReporter>,
    ) -> Self {
        Self { session, auth, cancellation, progress }
    }

    /// Whether `$/cancelRequest` already hit this request.
    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        self.cancellation.is_cancelled()
    }

    /// Bail out with `-32105` if cancelled. Handlers call this at their
    /// safe points.
    pub fn ensure_active(&self) -> McpResult<()> {
        if self.is_cancelled() {
            Err(McpError::cancelled())
        } else {
            Ok(())
        }
    }

    /// Suspend until cancellation. Useful in `tokio::select!` arms.
    pub async fn cancelled(&self) {
        self.cancellation.cancelled().await;
    }

    /// Emit a progress update, if the request carried a progress token.
    pub async fn report_progress(&self, progress: f64, total: Option<f64>) {
        if let Some(reporter) = &self.progress {
            reporter.report(progress, total).await;
        }
    }
}

/// A callable tool.
#[async_trait::async_trait]
pub trait ToolHandler: Send + Sync {
    /// Execute with the client-supplied arguments.
    async fn call(
        &self,
        arguments: serde_json::Value,
        cx: &RequestContext,
    ) -> McpResult<CallToolResult>;
}

/// A readable resource, static or templated.
#[async_trait::async_trait]
pub trait ResourceHandler: Send + Sync {
    /// Read the resource. `params` holds the expanded `{var}` captures for
    /// templated URIs and is empty for static ones.
    async fn read(
        &self,
        uri: &str,
        params: &HashMap<String, String>,
        cx: &RequestContext,
    ) -> McpResult<Vec<ResourceContents>>;
}

/// A parameterized prompt.
#[async_trait::async_trait]
pub trait PromptHandler: Send + Sync {
    /// Render the prompt with the resolved arguments (defaults applied).
    async fn get(
        &self,
        arguments: HashMap<String, String>,
        cx: &RequestContext,
    ) -> McpResult<GetPromptResult>;
}

/// Opaque `completion/complete` pass-through.
#[async_trait::async_trait]
pub trait CompletionHandler: Send + Sync {
    /// Produce a completion result for the raw request params.
    async fn complete(
        &self,
        params: serde_json::Value,
        cx: &RequestContext,
    ) -> McpResult<serde_json::Value>;
}
