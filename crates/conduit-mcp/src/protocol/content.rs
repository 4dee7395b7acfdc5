//! MCP wire shapes: content blocks, capability flags, and the descriptors
//! returned by the list endpoints.
//!
//! `Content` is a tagged union with a `type` discriminator in
//! `{"text","image","resource"}`; the codec branches on the tag, never on
//! field presence.

use serde::{Deserialize, Serialize};

/// A block of content returned by tools and prompts.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum Content {
    /// Plain text.
    Text {
        text: String,
    },
    /// An image, by URL or inline base64 payload.
    #[serde(rename_all = "camelCase")]
    Image {
        mime_type: String,
        #[serde(skip_serializing_if = "Option::is_none")]
        url: Option<String>,
        #[serde(skip_serializing_if = "Option::is_none")]
        base64_data: Option<String>,
    },
    /// Embedded resource contents.
    #[serde(rename_all = "camelCase")]
    Resource {
        uri: String,
        #[serde(skip_serializing_if = "Option::is_none")]
        mime_type: Option<String>,
        #[serde(skip_serializing_if = "Option::is_none")]
        text: Option<String>,
        #[serde(skip_serializing_if = "Option::is_none")]
        blob: Option<String>,
    },
}

impl Content {
    /// Text content.
    #[must_use]
    pub fn text(text: impl Into<String>) -> Self {
        Self::Text { text: text.into() }
    }

    /// Image content referencing a URL.
    #[must_use]
    pub fn image_url(mime_type: impl Into<String>, url: impl Into<String>) -> Self {
        Self::Image { mime_type: mime_type.into(), url: Some(url.into()), base64_data: None }
    }

    /// Image content carrying inline base64 data.
    #[must_use]
    pub fn image_data(mime_type: impl Into<String>, base64_data: impl Into<String>) -> Self {
        Self::Image {
            mime_type: mime_type.into(),
            url: None,
            base64_data: Some(base64_data.into()),
        }
    }
}

/// Result of `tools/call`.
///
/// The field is `content`; the legacy `contents` spelling is rejected by the
/// typed deserializer.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct CallToolResult {
    pub content: Vec<Content>,
    #[serde(rename = "isError", skip_serializing_if = "Option::is_none")]
    pub is_error: Option<bool>,
}

impl CallToolResult {
    /// A successful result with a single text block.
    #[must_use]
    pub fn text(text: impl Into<String>) -> Self {
        Self { content: vec![Content::text(text)], is_error: None }
    }

    /// A domain-level failure surfaced inside the result.
    #[must_use]
    pub fn error_text(text: impl Into<String>) -> Self {
        Self { content: vec![Content::text(text)], is_error: Some(true) }
    }
}

/// One entry of a `resources/read` result.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ResourceContents {
    pub uri: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub mime_type: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub text: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub blob: Option<String>,
}

impl ResourceContents {
    /// Text contents for `uri`.
    #[must_use]
    pub fn text(uri: impl Into<String>, mime_type: impl Into<String>, text: impl Into<String>) -> Self {
        Self {
            uri: uri.into(),
            mime_type: Some(mime_type.into()),
            text: Some(text.into()),
            blob: None,
        }
    }

    /// Binary contents for `uri`, base64-encoded.
    #[must_use]
    pub fn blob(uri: impl Into<String>, mime_type: impl Into<String>, blob: impl Into<String>) -> Self {
        Self {
            uri: uri.into(),
            mime_type: Some(mime_type.into()),
            text: None,
            blob: Some(blob.into()),
        }
    }
}

/// A message produced by `prompts/get`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct PromptMessage {
    pub role: String,
    pub content: Content,
}

/// Result of `prompts/get`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct GetPromptResult {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    pub messages: Vec<PromptMessage>,
}

/// Tool descriptor for `tools/list`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ToolInfo {
    pub name: String,
    pub description: String,
    #[serde(rename = "inputSchema")]
    pub input_schema: serde_json::Value,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub annotations: Option<serde_json::Value>,
}

/// Resource descriptor for `resources/list`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ResourceInfo {
    pub uri: String,
    pub name: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub mime_type: Option<String>,
}

/// Template descriptor for `resources/templates/list`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ResourceTemplateInfo {
    pub uri_template: String,
    pub name: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub mime_type: Option<String>,
}

/// One declared prompt argument.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct PromptArgument {
    pub name: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(default)]
    pub required: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub default: Option<String>,
}

/// Prompt descriptor for `prompts/list`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct PromptInfo {
    pub name: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub arguments: Vec<PromptArgument>,
}

/// Name/version pair identifying either endpoint.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Implementation {
    pub name: String,
    pub version: String,
}

/// A filesystem-like location disclosed by the client.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Root {
    pub uri: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
}

/// What this server advertises during `initialize`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ServerCapabilities {
    pub tools: bool,
    pub tools_list_changed: bool,
    pub resources: bool,
    pub resources_list_changed: bool,
    pub resource_subscribe: bool,
    pub prompts: bool,
    pub prompts_list_changed: bool,
    pub logging: bool,
    pub completion: bool,
}

impl Default for ServerCapabilities {
    fn default() -> Self {
        Self {
            tools: true,
            tools_list_changed: true,
            resources: true,
            resources_list_changed: true,
            resource_subscribe: true,
            prompts: true,
            prompts_list_changed: true,
            logging: true,
            completion: false,
        }
    }
}

impl ServerCapabilities {
    /// Serialize into the nested wire shape used by `initialize`.
    #[must_use]
    pub fn to_wire(&self) -> serde_json::Value {
        let mut caps = serde_json::Map::new();
        if self.tools {
            caps.insert(
                "tools".into(),
                serde_json::json!({ "listChanged": self.tools_list_changed }),
            );
        }
        if self.resources {
            caps.insert(
                "resources".into(),
                serde_json::json!({
                    "listChanged": self.resources_list_changed,
                    "subscribe": self.resource_subscribe,
                }),
            );
        }
        if self.prompts {
            caps.insert(
                "prompts".into(),
                serde_json::json!({ "listChanged": self.prompts_list_changed }),
            );
        }
        if self.logging {
            caps.insert("logging".into(), serde_json::json!({}));
        }
        if self.completion {
            caps.insert("completions".into(), serde_json::json!({}));
        }
        serde_json::Value::Object(caps)
    }
}
