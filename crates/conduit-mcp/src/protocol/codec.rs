//! Stateless JSON-RPC 2.0 framing.
//!
//! Parses UTF-8 payloads into [`Message`] values and emits strict wire JSON.
//! Malformed JSON fails with `-32700`; structural violations (wrong
//! `jsonrpc`, empty batch, non-object element at the top level) fail with
//! `-32600`.

use serde_json::Value;

use super::{JsonRpcNotification, JsonRpcRequest, JsonRpcResponse, Message, JSONRPC_VERSION};
use crate::error::{McpError, McpResult};

/// Parse a raw payload into a message.
pub fn decode(payload: &[u8]) -> McpResult<Message> {
    let text = std::str::from_utf8(payload).map_err(McpError::parse_error)?;
    decode_str(text)
}

/// Parse a UTF-8 payload into a message.
pub fn decode_str(text: &str) -> McpResult<Message> {
    let value: Value = serde_json::from_str(text).map_err(McpError::parse_error)?;
    decode_value(value)
}

/// Classify an already-parsed JSON value.
///
/// Structural violations come back as [`Message::Invalid`] carrying whatever
/// id could be recovered, so the reply can still be addressed; only
/// unparseable JSON and empty batches are outright errors.
pub fn decode_value(value: Value) -> McpResult<Message> {
    match value {
        Value::Array(items) => {
            if items.is_empty() {
                return Err(McpError::invalid_request("empty batch"));
            }
            let messages = items
                .into_iter()
                .map(|item| match classify(item) {
                    Ok(msg) => msg,
                    Err((id, error)) => Message::Invalid { id, error },
                })
                .collect();
            Ok(Message::Batch(messages))
        }
        other => Ok(classify(other).unwrap_or_else(|(id, error)| Message::Invalid { id, error })),
    }
}

/// Serialize a message back to wire JSON.
#[must_use]
pub fn encode(message: &Message) -> String {
    encode_value(message).to_string()
}

fn encode_value(message: &Message) -> Value {
    match message {
        Message::Request(req) => req.to_value(),
        Message::Notification(note) => note.to_value(),
        Message::Response(resp) => {
            serde_json::to_value(resp).unwrap_or(Value::Null)
        }
        Message::Batch(items) => Value::Array(items.iter().map(encode_value).collect()),
        Message::Invalid { id, error } => {
            let resp = JsonRpcResponse::error(
                id.clone().unwrap_or(Value::Null),
                error.clone(),
            );
            serde_json::to_value(&resp).unwrap_or(Value::Null)
        }
    }
}

/// Serialize a single response.
#[must_use]
pub fn encode_response(response: &JsonRpcResponse) -> String {
    serde_json::to_string(response).unwrap_or_default()
}

/// Serialize a batch response, preserving order. Always an array, even for
/// a batch that produced one response.
#[must_use]
pub fn encode_batch_responses(responses: &[JsonRpcResponse]) -> String {
    serde_json::to_string(responses).unwrap_or_default()
}

type ClassifyError = (Option<Value>, McpError);

/// Classify one non-batch JSON value. On failure, returns whatever id could
/// be recovered so the caller can still address an error response.
fn classify(value: Value) -> Result<Message, ClassifyError> {
    let Value::Object(mut obj) = value else {
        return Err((None, McpError::invalid_request("expected a JSON object")));
    };

    let id = match obj.remove("id") {
        Some(Value::Null) | None => None,
        Some(id @ (Value::Number(_) | Value::String(_))) => Some(id),
        Some(_) => {
            return Err((None, McpError::invalid_request("id must be a number or string")));
        }
    };

    match obj.get("jsonrpc").and_then(Value::as_str) {
        Some(JSONRPC_VERSION) => {}
        Some(other) => {
            let msg = format!("unsupported jsonrpc version: {other}");
            return Err((id, McpError::invalid_request(msg)));
        }
        None => {
            return Err((id, McpError::invalid_request("missing jsonrpc field")));
        }
    }

    let method = match obj.remove("method") {
        Some(Value::String(m)) => Some(m),
        Some(_) => {
            return Err((id, McpError::invalid_request("method must be a string")));
        }
        None => None,
    };

    if let Some(method) = method {
        let params = obj.remove("params").unwrap_or(Value::Null);
        if !(params.is_null() || params.is_object() || params.is_array()) {
            return Err((id, McpError::invalid_request("params must be structured")));
        }
        return Ok(match id {
            Some(id) => Message::Request(JsonRpcRequest { id, method, params }),
            None => Message::Notification(JsonRpcNotification { method, params }),
        });
    }

    let result = obj.remove("result");
    let error = obj.remove("error");
    match (result, error) {
        (Some(_), Some(_)) => {
            Err((id, McpError::invalid_request("response carries both result and error")))
        }
        (None, None) => Err((id, McpError::invalid_request("missing method"))),
        (result, error) => {
            let error = match error {
                Some(e) => Some(parse_error_object(e).map_err(|err| (id.clone(), err))?),
                None => None,
            };
            Ok(Message::Response(JsonRpcResponse {
                jsonrpc: std::borrow::Cow::Borrowed(JSONRPC_VERSION),
                result,
                error,
                id: id.unwrap_or(Value::Null),
            }))
        }
    }
}

fn parse_error_object(value: Value) -> McpResult<super::JsonRpcErrorObject> {
    let code = value
        .get("code")
        .and_then(Value::as_i64)
        .ok_or_else(|| McpError::invalid_request("error object missing code"))?;
    let message = value
        .get("message")
        .and_then(Value::as_str)
        .unwrap_or_default()
        .to_owned();
    let data = value.get("data").filter(|d| !d.is_null()).cloned();
    Ok(super::JsonRpcErrorObject { code: code as i32, message, data })
}
