//! Error types for the MCP server core.
//!
//! Uses `thiserror` for structured error handling. Protocol-visible failures
//! are `McpError` values carrying a JSON-RPC error code; transport failures
//! are a separate enum that never crosses the wire.

use std::time::Duration;

/// JSON-RPC and MCP error codes.
pub mod codes {
    /// Malformed JSON.
    pub const PARSE_ERROR: i32 = -32700;
    /// Not a valid JSON-RPC 2.0 message.
    pub const INVALID_REQUEST: i32 = -32600;
    /// No handler registered for the method.
    pub const METHOD_NOT_FOUND: i32 = -32601;
    /// Parameters failed validation.
    pub const INVALID_PARAMS: i32 = -32602;
    /// Unexpected handler failure.
    pub const INTERNAL_ERROR: i32 = -32603;
    /// Request received before the `initialize` handshake completed.
    pub const SERVER_NOT_INITIALIZED: i32 = -32002;
    /// No resource registered for the URI.
    pub const RESOURCE_NOT_FOUND: i32 = -32100;
    /// No tool registered under the name.
    pub const TOOL_NOT_FOUND: i32 = -32101;
    /// No prompt registered under the name.
    pub const PROMPT_NOT_FOUND: i32 = -32102;
    /// No mutually supported protocol version.
    pub const INCOMPATIBLE_VERSION: i32 = -32103;
    /// Missing, invalid, or under-scoped credentials.
    pub const UNAUTHORIZED: i32 = -32104;
    /// The operation observed its cancellation token.
    pub const OPERATION_CANCELLED: i32 = -32105;
    /// The sliding-window limiter denied the request.
    pub const RATE_LIMITED: i32 = -32106;
}

/// A protocol-level error: serializes into the JSON-RPC `error` member.
#[derive(thiserror::Error, Debug, Clone, PartialEq)]
#[error("{message} ({code})")]
pub struct McpError {
    /// JSON-RPC or MCP-specific error code.
    pub code: i32,
    /// Human-readable message.
    pub message: String,
    /// Optional structured detail (e.g. `retryAfter`).
    pub data: Option<serde_json::Value>,
}

impl McpError {
    /// Create an error with a bare code and message.
    #[must_use]
    pub fn new(code: i32, message: impl Into<String>) -> Self {
        Self { code, message: message.into(), data: None }
    }

    /// Attach structured data to the error.
    #[must_use]
    pub fn with_data(mut self, data: serde_json::Value) -> Self {
        self.data = Some(data);
        self
    }

    /// Malformed JSON on the wire.
    #[must_use]
    pub fn parse_error(detail: impl std::fmt::Display) -> Self {
        Self::new(codes::PARSE_ERROR, format!("Parse error: {detail}"))
    }

    /// Structurally invalid JSON-RPC message.
    #[must_use]
    pub fn invalid_request(detail: impl std::fmt::Display) -> Self {
        Self::new(codes::INVALID_REQUEST, format!("Invalid request: {detail}"))
    }

    /// Unknown method name.
    #[must_use]
    pub fn method_not_found(method: &str) -> Self {
        Self::new(codes::METHOD_NOT_FOUND, format!("Method not found: {method}"))
    }

    /// Parameter validation failure.
    #[must_use]
    pub fn invalid_params(detail: impl std::fmt::Display) -> Self {
        Self::new(codes::INVALID_PARAMS, format!("Invalid params: {detail}"))
    }

    /// Unexpected failure inside a handler.
    #[must_use]
    pub fn internal(detail: impl std::fmt::Display) -> Self {
        Self::new(codes::INTERNAL_ERROR, format!("Internal error: {detail}"))
    }

    /// Request arrived before `notifications/initialized`.
    #[must_use]
    pub fn not_initialized() -> Self {
        Self::new(codes::SERVER_NOT_INITIALIZED, "Server not initialized")
    }

    /// No resource matches the URI.
    #[must_use]
    pub fn resource_not_found(uri: &str) -> Self {
        Self::new(codes::RESOURCE_NOT_FOUND, format!("Resource not found: {uri}"))
    }

    /// No tool registered under the name.
    #[must_use]
    pub fn tool_not_found(name: &str) -> Self {
        Self::new(codes::TOOL_NOT_FOUND, format!("Tool not found: {name}"))
    }

    /// No prompt registered under the name.
    #[must_use]
    pub fn prompt_not_found(name: &str) -> Self {
        Self::new(codes::PROMPT_NOT_FOUND, format!("Prompt not found: {name}"))
    }

    /// Version negotiation failed.
    #[must_use]
    pub fn incompatible_version(requested: &str) -> Self {
        Self::new(
            codes::INCOMPATIBLE_VERSION,
            format!("Unsupported protocol version: {requested}"),
        )
    }

    /// Credentials absent or rejected.
    #[must_use]
    pub fn unauthorized() -> Self {
        Self::new(codes::UNAUTHORIZED, "Unauthorized")
    }

    /// Token valid but missing the required scope.
    #[must_use]
    pub fn forbidden(scope: &str) -> Self {
        Self::new(codes::UNAUTHORIZED, format!("Missing required scope: {scope}"))
            .with_data(serde_json::Value::String("forbidden".to_owned()))
    }

    /// The handler observed cancellation and unwound.
    #[must_use]
    pub fn cancelled() -> Self {
        Self::new(codes::OPERATION_CANCELLED, "Operation cancelled")
    }

    /// Denied by the sliding-window limiter.
    #[must_use]
    pub fn rate_limited(retry_after: Duration) -> Self {
        Self::new(codes::RATE_LIMITED, "Rate limit exceeded")
            .with_data(serde_json::json!({ "retryAfter": retry_after.as_secs_f64() }))
    }

    /// The `retryAfter` hint, if this is a rate-limit error.
    #[must_use]
    pub fn retry_after(&self) -> Option<Duration> {
        if self.code != codes::RATE_LIMITED {
            return None;
        }
        self.data
            .as_ref()
            .and_then(|d| d.get("retryAfter"))
            .and_then(serde_json::Value::as_f64)
            .map(Duration::from_secs_f64)
    }
}

impl From<serde_json::Error> for McpError {
    fn from(err: serde_json::Error) -> Self {
        Self::parse_error(err)
    }
}

/// Errors raised by the transport layer. These close sessions or abort
/// startup; they are never serialized into JSON-RPC responses.
#[derive(thiserror::Error, Debug)]
pub enum TransportError {
    /// Underlying stream failure.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// No configured port could be bound.
    #[error("Failed to bind any of ports {ports:?}")]
    Bind {
        /// Every port that was attempted.
        ports: Vec<u16>,
    },

    /// Outbound message could not be serialized.
    #[error("Serialization error: {0}")]
    Serde(#[from] serde_json::Error),

    /// Target session is gone.
    #[error("Unknown session: {0}")]
    SessionNotFound(String),

    /// The transport has been shut down.
    #[error("Transport closed")]
    Closed,
}

/// Result alias for protocol operations.
pub type McpResult<T> = Result<T, McpError>;

/// Result alias for transport operations.
pub type TransportResult<T> = Result<T, TransportError>;
