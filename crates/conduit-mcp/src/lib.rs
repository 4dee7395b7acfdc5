//! Conduit MCP server core
//!
//! A transport-agnostic Model Context Protocol server: JSON-RPC 2.0
//! dispatch, session lifecycle, and a registry of tools, resources, and
//! prompts, served over stdio or HTTP with Server-Sent-Events.
//!
//! # Features
//!
//! - **Pluggable transports**: line-delimited stdio for desktop hosts, SSE
//!   for remote clients, or anything implementing [`transport::Transport`]
//! - **Session engine**: capability negotiation, initialize handshake,
//!   per-session pending-operation tracking
//! - **Cooperative cancellation** and client-correlated progress reporting
//! - **Sliding-window rate limiting** keyed per session and method
//! - **Bearer-token auth**: static API keys or OAuth 2.1 introspection,
//!   with a method-to-scope authorization map
//!
//! # Example
//!
//! ```no_run
//! use std::sync::Arc;
//! use conduit_mcp::{config::Config, server::McpServer, transport::StdioTransport};
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let server = McpServer::builder("my-server", "1.0.0")
//!         .config(Config::from_env()?)
//!         .build();
//!     // server.add_tool(...) and friends, then:
//!     let pump = server.connect(Arc::new(StdioTransport::new())).await?;
//!     pump.await?;
//!     Ok(())
//! }
//! ```

pub mod auth;
pub mod config;
pub mod dispatch;
pub mod error;
pub mod handler;
pub mod limiter;
pub mod progress;
pub mod protocol;
pub mod registry;
pub mod server;
pub mod session;
pub mod transport;

pub use config::Config;
pub use error::{McpError, McpResult, TransportError};
pub use handler::{
    CompletionHandler, PromptHandler, RequestContext, ResourceHandler, ToolHandler,
};
pub use protocol::content::{
    CallToolResult, Content, GetPromptResult, Implementation, PromptArgument, PromptMessage,
    ResourceContents, ServerCapabilities,
};
pub use registry::{Prompt, Resource, Tool};
pub use server::McpServer;
