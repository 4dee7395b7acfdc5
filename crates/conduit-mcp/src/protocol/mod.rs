//! JSON-RPC 2.0 message model.
//!
//! The wire types mirror the MCP dialect: requests carry an `id` and a
//! `method`, notifications a `method` only, responses an `id` and exactly one
//! of `result`/`error`. Batches are ordered arrays of the former three.

pub mod codec;
pub mod content;

use std::borrow::Cow;

use serde::Serialize;

use crate::error::McpError;

/// Protocol versions this server can negotiate, oldest first.
///
/// Version strings are ISO dates, so lexicographic order is chronological.
pub const SUPPORTED_VERSIONS: &[&str] = &["2024-11-05", "2025-03-26"];

/// The only JSON-RPC version this server speaks.
pub const JSONRPC_VERSION: &str = "2.0";

/// A request id: JSON-RPC allows numbers and strings. `null` ids are treated
/// as absent during parsing, so a stored id is always a number or a string.
pub type RequestId = serde_json::Value;

/// JSON-RPC request: expects exactly one response with the same id.
#[derive(Debug, Clone, PartialEq)]
pub struct JsonRpcRequest {
    /// Request id, echoed on the response.
    pub id: RequestId,
    /// Method name, e.g. `tools/call`.
    pub method: String,
    /// Parameters; `Null` when the request carried none.
    pub params: serde_json::Value,
}

impl JsonRpcRequest {
    /// Serialize into a wire-ready JSON value.
    #[must_use]
    pub fn to_value(&self) -> serde_json::Value {
        let mut obj = serde_json::json!({
            "jsonrpc": JSONRPC_VERSION,
            "id": self.id,
            "method": self.method,
        });
        if !self.params.is_null() {
            obj["params"] = self.params.clone();
        }
        obj
    }

    /// The `_meta.progressToken` field, if the client supplied one.
    #[must_use]
    pub fn progress_token(&self) -> Option<&serde_json::Value> {
        let token = self.params.get("_meta")?.get("progressToken")?;
        if token.is_null() { None } else { Some(token) }
    }
}

/// JSON-RPC notification: fire-and-forget, never answered.
#[derive(Debug, Clone, PartialEq)]
pub struct JsonRpcNotification {
    /// Method name, e.g. `notifications/initialized`.
    pub method: String,
    /// Parameters; `Null` when the notification carried none.
    pub params: serde_json::Value,
}

impl JsonRpcNotification {
    /// Build a notification.
    #[must_use]
    pub fn new(method: impl Into<String>, params: serde_json::Value) -> Self {
        Self { method: method.into(), params }
    }

    /// Serialize into a wire-ready JSON value.
    #[must_use]
    pub fn to_value(&self) -> serde_json::Value {
        let mut obj = serde_json::json!({
            "jsonrpc": JSONRPC_VERSION,
            "method": self.method,
        });
        if !self.params.is_null() {
            obj["params"] = self.params.clone();
        }
        obj
    }
}

/// JSON-RPC response.
#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct JsonRpcResponse {
    pub jsonrpc: Cow<'static, str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub result: Option<serde_json::Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<JsonRpcErrorObject>,
    pub id: serde_json::Value,
}

/// The `error` member of a failed response.
#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct JsonRpcErrorObject {
    pub code: i32,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<serde_json::Value>,
}

impl JsonRpcResponse {
    /// Successful response for `id`.
    #[must_use]
    pub fn success(id: RequestId, result: serde_json::Value) -> Self {
        Self {
            jsonrpc: Cow::Borrowed(JSONRPC_VERSION),
            result: Some(result),
            error: None,
            id,
        }
    }

    /// Error response for `id` (`Null` when the request id is unknown).
    #[must_use]
    pub fn error(id: RequestId, err: McpError) -> Self {
        Self {
            jsonrpc: Cow::Borrowed(JSONRPC_VERSION),
            result: None,
            error: Some(JsonRpcErrorObject {
                code: err.code,
                message: err.message,
                data: err.data,
            }),
            id,
        }
    }

    /// The error code, if this is an error response.
    #[must_use]
    pub fn error_code(&self) -> Option<i32> {
        self.error.as_ref().map(|e| e.code)
    }
}

/// A parsed inbound message.
#[derive(Debug, Clone, PartialEq)]
pub enum Message {
    /// Request expecting a response.
    Request(JsonRpcRequest),
    /// Notification expecting nothing back.
    Notification(JsonRpcNotification),
    /// Response to a server-originated request.
    Response(JsonRpcResponse),
    /// Ordered batch. Elements are never themselves batches.
    Batch(Vec<Message>),
    /// A structurally invalid batch element. Kept in place so its slot still
    /// yields an ordered error response.
    Invalid {
        /// The id, if one could be recovered from the malformed element.
        id: Option<RequestId>,
        /// What was wrong with it.
        error: McpError,
    },
}

/// Log severity for `notifications/message` and `logging/setLevel`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum LogLevel {
    Debug,
    Info,
    Warning,
    Error,
}

impl LogLevel {
    /// Parse the wire representation.
    #[must_use]
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "debug" => Some(Self::Debug),
            "info" => Some(Self::Info),
            "warning" => Some(Self::Warning),
            "error" => Some(Self::Error),
            _ => None,
        }
    }

    /// The wire representation.
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Debug => "debug",
            Self::Info => "info",
            Self::Warning => "warning",
            Self::Error => "error",
        }
    }
}

/// Pick the newest supported version that is not newer than the client's.
///
/// Returns `None` when the client predates everything we speak.
#[must_use]
pub fn negotiate_version(client_version: &str) -> Option<&'static str> {
    SUPPORTED_VERSIONS
        .iter()
        .rev()
        .find(|v| **v <= client_version)
        .copied()
}
