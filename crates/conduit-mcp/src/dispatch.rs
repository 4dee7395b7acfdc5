//! Message dispatch.
//!
//! One ordered pipeline per inbound message: parse, initialization gate,
//! rate limit, auth, method routing, handler invocation, response assembly.
//! Batches fan out concurrently but join in request order; notifications
//! never produce a response. Handler panics are contained here and mapped to
//! `-32603` - they never take the process down.

use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;

use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine as _;
use futures::FutureExt;
use serde_json::{json, Value};

use crate::auth::{required_scope, AuthContext};
use crate::error::{codes, McpError, McpResult};
use crate::handler::RequestContext;
use crate::limiter::RateDecision;
use crate::progress::ProgressReporter;
use crate::protocol::content::Root;
use crate::protocol::{
    codec, JsonRpcNotification, JsonRpcRequest, JsonRpcResponse, LogLevel, Message,
};
use crate::server::ServerCore;
use crate::session::{OperationKind, Session};

/// Routes parsed messages to handlers and assembles replies.
#[derive(Clone)]
pub struct Dispatcher {
    core: Arc<ServerCore>,
}

impl Dispatcher {
    /// Create a dispatcher over the shared server state.
    #[must_use]
    pub fn new(core: Arc<ServerCore>) -> Self {
        Self { core }
    }

    /// Process one raw inbound payload. Returns the serialized reply, or
    /// `None` when nothing goes back (notifications, client responses,
    /// all-notification batches).
    pub async fn process(
        &self,
        session_id: &str,
        payload: &str,
        auth: Option<AuthContext>,
    ) -> Option<String> {
        let Some(session) = self.core.sessions.get(session_id).await else {
            tracing::warn!(session_id = %session_id, "Dropping payload for unknown session");
            return None;
        };
        if let Some(auth) = auth {
            session.set_auth(auth).await;
        }

        let message = match codec::decode_str(payload) {
            Ok(message) => message,
            Err(err) => {
                return Some(codec::encode_response(&JsonRpcResponse::error(Value::Null, err)));
            }
        };

        match message {
            Message::Request(req) => {
                let response = self.handle_request(&session, req).await;
                Some(codec::encode_response(&response))
            }
            Message::Notification(note) => {
                self.handle_notification(&session, note).await;
                None
            }
            Message::Response(response) => {
                if !session.resolve_outbound(response).await {
                    tracing::debug!(session_id = %session.id, "Unmatched client response");
                }
                None
            }
            Message::Batch(items) => {
                let replies = futures::future::join_all(
                    items.into_iter().map(|item| self.handle_batch_item(&session, item)),
                )
                .await;
                let responses: Vec<JsonRpcResponse> = replies.into_iter().flatten().collect();
                if responses.is_empty() {
                    None
                } else {
                    Some(codec::encode_batch_responses(&responses))
                }
            }
            Message::Invalid { id, error } => Some(codec::encode_response(
                &JsonRpcResponse::error(id.unwrap_or(Value::Null), error),
            )),
        }
    }

    async fn handle_batch_item(
        &self,
        session: &Arc<Session>,
        item: Message,
    ) -> Option<JsonRpcResponse> {
        match item {
            Message::Request(req) => Some(self.handle_request(session, req).await),
            Message::Notification(note) => {
                self.handle_notification(session, note).await;
                None
            }
            Message::Response(response) => {
                session.resolve_outbound(response).await;
                None
            }
            Message::Invalid { id, error } => {
                Some(JsonRpcResponse::error(id.unwrap_or(Value::Null), error))
            }
            Message::Batch(_) => Some(JsonRpcResponse::error(
                Value::Null,
                McpError::invalid_request("nested batch"),
            )),
        }
    }

    /// Run the full request pipeline and build exactly one response.
    pub async fn handle_request(
        &self,
        session: &Arc<Session>,
        req: JsonRpcRequest,
    ) -> JsonRpcResponse {
        let id = req.id.clone();
        let method = req.method.clone();
        match self.check_and_route(session, req).await {
            Ok(result) => JsonRpcResponse::success(id, result),
            Err(err) => {
                if err.code == codes::INTERNAL_ERROR {
                    self.core
                        .log_to_session(session, LogLevel::Error, &err.message)
                        .await;
                }
                tracing::debug!(
                    session_id = %session.id,
                    method = %method,
                    code = err.code,
                    "Request failed"
                );
                JsonRpcResponse::error(id, err)
            }
        }
    }

    async fn check_and_route(
        &self,
        session: &Arc<Session>,
        req: JsonRpcRequest,
    ) -> McpResult<Value> {
        let method = req.method.as_str();

        // `ping` is always allowed; everything else but `initialize` waits
        // for the handshake.
        if !matches!(method, "initialize" | "ping") && !session.is_initialized() {
            return Err(McpError::not_initialized());
        }

        if let Some(limiter) = &self.core.limiter {
            if let RateDecision::Deny { retry_after } =
                limiter.check(&session.id, method, &req.params)
            {
                return Err(McpError::rate_limited(retry_after));
            }
        }

        if self.core.validator.is_some() {
            if let Some(scope) = required_scope(method) {
                let auth = session.auth().await.ok_or_else(McpError::unauthorized)?;
                if !auth.has_scope(scope) {
                    return Err(McpError::forbidden(scope));
                }
            }
        }

        match method {
            "initialize" => self.initialize(session, &req.params).await,
            "ping" => Ok(json!({})),
            "tools/list" => self.paginate(&self.core.registry.list_tools(), &req.params, "tools"),
            "tools/call" => self.call_tool(session, req).await,
            "resources/list" => {
                self.paginate(&self.core.registry.list_resources(), &req.params, "resources")
            }
            "resources/templates/list" => self.paginate(
                &self.core.registry.list_templates(),
                &req.params,
                "resourceTemplates",
            ),
            "resources/read" => self.read_resource(session, req).await,
            "resources/subscribe" => self.subscribe_resource(session, &req.params),
            "resources/unsubscribe" => self.unsubscribe_resource(session, &req.params),
            "prompts/list" => {
                self.paginate(&self.core.registry.list_prompts(), &req.params, "prompts")
            }
            "prompts/get" => self.get_prompt(session, req).await,
            "completion/complete" => self.complete(session, req).await,
            "logging/setLevel" => self.set_log_level(session, &req.params).await,
            other => Err(McpError::method_not_found(other)),
        }
    }

    async fn initialize(&self, session: &Arc<Session>, params: &Value) -> McpResult<Value> {
        let client_version = params
            .get("protocolVersion")
            .and_then(Value::as_str)
            .ok_or_else(|| McpError::invalid_params("missing protocolVersion"))?;
        let capabilities = params.get("capabilities").cloned().unwrap_or_else(|| json!({}));
        let client_info = params
            .get("clientInfo")
            .and_then(|v| serde_json::from_value(v.clone()).ok());

        let negotiated = session
            .begin_initialize(client_version, capabilities, client_info)
            .await?;

        tracing::info!(
            session_id = %session.id,
            client_version = %client_version,
            negotiated = %negotiated,
            "Initialize handshake"
        );

        Ok(json!({
            "protocolVersion": negotiated,
            "capabilities": self.core.capabilities.to_wire(),
            "serverInfo": self.core.info,
        }))
    }

    async fn call_tool(&self, session: &Arc<Session>, req: JsonRpcRequest) -> McpResult<Value> {
        let name = req
            .params
            .get("name")
            .and_then(Value::as_str)
            .ok_or_else(|| McpError::invalid_params("missing tool name"))?;
        let tool = self
            .core
            .registry
            .get_tool(name)
            .ok_or_else(|| McpError::tool_not_found(name))?;
        let arguments = req.params.get("arguments").cloned().unwrap_or_else(|| json!({}));
        let progress_token = req.progress_token().cloned();

        tracing::debug!(session_id = %session.id, tool = %name, "Executing tool");

        self.run_operation(session, OperationKind::ToolCall, req.id, progress_token, |cx| {
            async move {
                let result = tool.handler.call(arguments, &cx).await?;
                serde_json::to_value(result).map_err(|e| McpError::internal(e))
            }
        })
        .await
    }

    async fn read_resource(&self, session: &Arc<Session>, req: JsonRpcRequest) -> McpResult<Value> {
        let uri = req
            .params
            .get("uri")
            .and_then(Value::as_str)
            .ok_or_else(|| McpError::invalid_params("missing uri"))?
            .to_owned();
        let resolved = self
            .core
            .registry
            .resolve_resource(&uri)
            .ok_or_else(|| McpError::resource_not_found(&uri))?;
        let progress_token = req.progress_token().cloned();

        self.run_operation(session, OperationKind::ResourceRead, req.id, progress_token, |cx| {
            async move {
                let contents = resolved.handler.read(&resolved.uri, &resolved.params, &cx).await?;
                Ok(json!({ "contents": contents }))
            }
        })
        .await
    }

    fn subscribe_resource(&self, session: &Arc<Session>, params: &Value) -> McpResult<Value> {
        if !self.core.capabilities.resource_subscribe {
            return Err(McpError::method_not_found("resources/subscribe"));
        }
        let uri = params
            .get("uri")
            .and_then(Value::as_str)
            .ok_or_else(|| McpError::invalid_params("missing uri"))?;
        if self.core.registry.resolve_resource(uri).is_none() {
            return Err(McpError::resource_not_found(uri));
        }
        self.core.registry.subscribe(uri, &session.id);
        Ok(json!({}))
    }

    fn unsubscribe_resource(&self, session: &Arc<Session>, params: &Value) -> McpResult<Value> {
        let uri = params
            .get("uri")
            .and_then(Value::as_str)
            .ok_or_else(|| McpError::invalid_params("missing uri"))?;
        self.core.registry.unsubscribe(uri, &session.id);
        Ok(json!({}))
    }

    async fn get_prompt(&self, session: &Arc<Session>, req: JsonRpcRequest) -> McpResult<Value> {
        let name = req
            .params
            .get("name")
            .and_then(Value::as_str)
            .ok_or_else(|| McpError::invalid_params("missing prompt name"))?;
        let prompt = self
            .core
            .registry
            .get_prompt(name)
            .ok_or_else(|| McpError::prompt_not_found(name))?;

        let mut arguments: HashMap<String, String> = HashMap::new();
        if let Some(raw) = req.params.get("arguments") {
            let object = raw
                .as_object()
                .ok_or_else(|| McpError::invalid_params("arguments must be an object"))?;
            for (key, value) in object {
                let value = value
                    .as_str()
                    .ok_or_else(|| McpError::invalid_params("prompt arguments must be strings"))?;
                arguments.insert(key.clone(), value.to_owned());
            }
        }

        for declared in &prompt.info.arguments {
            if arguments.contains_key(&declared.name) {
                continue;
            }
            match &declared.default {
                Some(default) => {
                    arguments.insert(declared.name.clone(), default.clone());
                }
                None if declared.required => {
                    return Err(McpError::invalid_params(format!(
                        "missing required argument: {}",
                        declared.name
                    )));
                }
                None => {}
            }
        }

        let progress_token = req.progress_token().cloned();
        self.run_operation(session, OperationKind::PromptGet, req.id, progress_token, |cx| {
            async move {
                let result = prompt.handler.get(arguments, &cx).await?;
                serde_json::to_value(result).map_err(|e| McpError::internal(e))
            }
        })
        .await
    }

    async fn complete(&self, session: &Arc<Session>, req: JsonRpcRequest) -> McpResult<Value> {
        let Some(handler) = self.core.completion_handler() else {
            return Err(McpError::method_not_found("completion/complete"));
        };
        let params = req.params.clone();
        let progress_token = req.progress_token().cloned();
        self.run_operation(session, OperationKind::Completion, req.id, progress_token, |cx| {
            async move { handler.complete(params, &cx).await }
        })
        .await
    }

    async fn set_log_level(&self, session: &Arc<Session>, params: &Value) -> McpResult<Value> {
        let level = params
            .get("level")
            .and_then(Value::as_str)
            .and_then(LogLevel::parse)
            .ok_or_else(|| McpError::invalid_params("unknown log level"))?;
        session.set_log_level(level).await;
        Ok(json!({}))
    }

    /// Register a pending operation, invoke the handler with its context,
    /// and contain panics. A cancellation observed at any point before the
    /// response wins over whatever the handler returned.
    async fn run_operation<F, Fut>(
        &self,
        session: &Arc<Session>,
        kind: OperationKind,
        request_id: Value,
        progress_token: Option<Value>,
        f: F,
    ) -> McpResult<Value>
    where
        F: FnOnce(RequestContext) -> Fut,
        Fut: Future<Output = McpResult<Value>>,
    {
        let (op_id, token) = session.register_operation(kind, Some(request_id)).await;

        let progress = match (progress_token, self.core.transport().await) {
            (Some(progress_token), Some(transport)) => Some(ProgressReporter::new(
                transport,
                session.id.clone(),
                progress_token,
            )),
            _ => None,
        };
        let cx = RequestContext::new(
            Arc::clone(session),
            session.auth().await,
            token.clone(),
            progress,
        );

        let outcome = std::panic::AssertUnwindSafe(f(cx)).catch_unwind().await;
        session.complete_operation(&op_id).await;

        if token.is_cancelled() {
            return Err(McpError::cancelled());
        }

        match outcome {
            Ok(result) => result,
            Err(panic) => {
                tracing::error!(
                    session_id = %session.id,
                    detail = panic_message(&*panic),
                    "Handler panicked"
                );
                Err(McpError::internal("handler panicked"))
            }
        }
    }

    async fn handle_notification(&self, session: &Arc<Session>, note: JsonRpcNotification) {
        match note.method.as_str() {
            "notifications/initialized" | "initialized" => {
                if session.protocol_version().await.is_some() {
                    session.mark_initialized();
                    tracing::info!(session_id = %session.id, "Session initialized");
                } else {
                    tracing::warn!(
                        session_id = %session.id,
                        "Ignoring initialized notification before initialize"
                    );
                }
            }
            "$/cancelRequest" | "notifications/cancelled" => {
                let Some(request_id) = note.params.get("requestId").filter(|v| !v.is_null())
                else {
                    tracing::debug!("Cancel notification without requestId");
                    return;
                };
                let hit = session.cancel_request(request_id).await;
                tracing::debug!(
                    session_id = %session.id,
                    request_id = %request_id,
                    pending = hit,
                    "Cancel requested"
                );
            }
            "notifications/roots/list_changed" => {
                if session.is_initialized() {
                    self.refresh_roots(session).await;
                }
            }
            "notifications/progress" => {
                tracing::debug!(session_id = %session.id, "Client progress update");
            }
            other => {
                tracing::debug!(session_id = %session.id, method = %other, "Ignoring notification");
            }
        }
    }

    /// Ask the client for its current roots and cache them on the session.
    async fn refresh_roots(&self, session: &Arc<Session>) {
        match self.core.request_from_client(session, "roots/list", json!({})).await {
            Ok(response) => {
                let roots = response
                    .result
                    .as_ref()
                    .and_then(|r| r.get("roots"))
                    .cloned()
                    .unwrap_or_else(|| json!([]));
                match serde_json::from_value::<Vec<Root>>(roots) {
                    Ok(roots) => {
                        tracing::debug!(
                            session_id = %session.id,
                            count = roots.len(),
                            "Roots updated"
                        );
                        session.set_roots(roots).await;
                    }
                    Err(err) => {
                        tracing::warn!(session_id = %session.id, error = %err, "Bad roots shape");
                    }
                }
            }
            Err(err) => {
                tracing::debug!(session_id = %session.id, error = %err, "roots/list failed");
            }
        }
    }

    fn paginate<T: serde::Serialize>(
        &self,
        items: &[T],
        params: &Value,
        field: &str,
    ) -> McpResult<Value> {
        let offset = match params.get("cursor").and_then(Value::as_str) {
            Some(cursor) => decode_cursor(cursor)?,
            None => 0,
        };
        if offset > items.len() {
            return Err(McpError::invalid_params("cursor out of range"));
        }
        let end = (offset + self.core.config.page_size).min(items.len());
        let page = &items[offset..end];
        let mut result = json!({ field: page });
        if end < items.len() {
            result["nextCursor"] = json!(encode_cursor(end));
        }
        Ok(result)
    }
}

impl std::fmt::Debug for Dispatcher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Dispatcher").finish()
    }
}

fn encode_cursor(offset: usize) -> String {
    BASE64.encode(format!("offset:{offset}"))
}

fn decode_cursor(cursor: &str) -> McpResult<usize> {
    let malformed = || McpError::invalid_params("malformed cursor");
    let bytes = BASE64.decode(cursor).map_err(|_| malformed())?;
    let text = String::from_utf8(bytes).map_err(|_| malformed())?;
    text.strip_prefix("offset:")
        .and_then(|n| n.parse().ok())
        .ok_or_else(malformed)
}

fn panic_message(panic: &(dyn std::any::Any + Send)) -> &str {
    panic
        .downcast_ref::<&str>()
        .copied()
        .or_else(|| panic.downcast_ref::<String>().map(String::as_str))
        .unwrap_or("opaque panic payload")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cursor_roundtrip() {
        let cursor = encode_cursor(17);
        assert_eq!(decode_cursor(&cursor).unwrap(), 17);
    }

    #[test]
    fn test_malformed_cursor_rejected() {
        for bad in ["???", "b2Zmc2V0", ""] {
            let err = decode_cursor(bad).unwrap_err();
            assert_eq!(err.code, codes::INVALID_PARAMS);
        }
        // Valid base64, wrong payload.
        let err = decode_cursor(&BASE64.encode("page:3")).unwrap_err();
        assert_eq!(err.code, codes::INVALID_PARAMS);
    }
}
