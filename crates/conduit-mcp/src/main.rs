//! Conduit MCP server - entry point.
//!
//! A demo embedding of the core: registers a `hello` tool, an in-memory
//! resource pair, and a `greeting` prompt, then serves them over stdio (for
//! desktop hosts) or HTTP with SSE.

use std::collections::HashMap;
use std::sync::Arc;

use clap::Parser;
use serde_json::Value;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use conduit_mcp::auth::StaticTokenValidator;
use conduit_mcp::config::Config;
use conduit_mcp::limiter::RateLimitConfig;
use conduit_mcp::protocol::content::PromptMessage;
use conduit_mcp::server::McpServer;
use conduit_mcp::transport::{SseTransport, StdioTransport};
use conduit_mcp::{
    CallToolResult, Content, GetPromptResult, McpResult, Prompt, PromptArgument, RequestContext,
    Resource, ResourceContents, Tool,
};

#[derive(Parser, Debug)]
#[command(name = "conduit-mcp")]
#[command(about = "Model Context Protocol server core")]
#[command(version)]
struct Cli {
    /// Transport mode: stdio or http
    #[arg(long, default_value = "stdio")]
    transport: Transport,

    /// HTTP server port (only used with --transport http)
    #[arg(long, default_value = "8000", env = "PORT")]
    port: u16,

    /// Path serving the SSE event stream (only used with --transport http)
    #[arg(long, default_value = "/sse")]
    sse_path: String,

    /// Path accepting client POSTs (only used with --transport http)
    #[arg(long, default_value = "/messages")]
    messages_path: String,

    /// Bearer token required from clients (optional)
    #[arg(long, env = "MCP_AUTH_TOKEN")]
    auth_token: Option<String>,

    /// Reject unauthenticated HTTP requests outright
    #[arg(long)]
    strict_auth: bool,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, default_value = "info", env = "RUST_LOG")]
    log_level: String,

    /// Output logs as JSON
    #[arg(long)]
    json_logs: bool,
}

#[derive(Debug, Clone, Copy, Default, clap::ValueEnum)]
enum Transport {
    /// Standard input/output (for desktop hosts)
    #[default]
    Stdio,
    /// HTTP with Server-Sent Events
    Http,
}

fn init_tracing(log_level: &str, json: bool) {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(log_level));

    // Diagnostics always go to stderr: in stdio mode stdout carries the
    // protocol.
    let subscriber = tracing_subscriber::registry().with(filter);
    if json {
        subscriber
            .with(tracing_subscriber::fmt::layer().json().with_writer(std::io::stderr))
            .init();
    } else {
        subscriber
            .with(tracing_subscriber::fmt::layer().compact().with_writer(std::io::stderr))
            .init();
    }
}

struct HelloTool;

#[async_trait::async_trait]
impl conduit_mcp::ToolHandler for HelloTool {
    async fn call(&self, arguments: Value, cx: &RequestContext) -> McpResult<CallToolResult> {
        cx.ensure_active()?;
        let name = arguments.get("name").and_then(Value::as_str).unwrap_or("world");
        Ok(CallToolResult::text(format!("Hello, {name}!")))
    }
}

struct ReadmeResource;

#[async_trait::async_trait]
impl conduit_mcp::ResourceHandler for ReadmeResource {
    async fn read(
        &self,
        uri: &str,
        _params: &HashMap<String, String>,
        _cx: &RequestContext,
    ) -> McpResult<Vec<ResourceContents>> {
        Ok(vec![ResourceContents::text(
            uri,
            "text/markdown",
            "# Conduit\n\nA Model Context Protocol server core.",
        )])
    }
}

struct NoteResource;

#[async_trait::async_trait]
impl conduit_mcp::ResourceHandler for NoteResource {
    async fn read(
        &self,
        uri: &str,
        params: &HashMap<String, String>,
        _cx: &RequestContext,
    ) -> McpResult<Vec<ResourceContents>> {
        let id = params.get("id").map_or("?", String::as_str);
        Ok(vec![ResourceContents::text(
            uri,
            "text/plain",
            format!("Note {id} is empty."),
        )])
    }
}

struct GreetingPrompt;

#[async_trait::async_trait]
impl conduit_mcp::PromptHandler for GreetingPrompt {
    async fn get(
        &self,
        arguments: HashMap<String, String>,
        _cx: &RequestContext,
    ) -> McpResult<GetPromptResult> {
        let name = arguments.get("name").map_or("friend", String::as_str);
        Ok(GetPromptResult {
            description: Some("A friendly greeting".to_owned()),
            messages: vec![PromptMessage {
                role: "user".to_owned(),
                content: Content::text(format!("Please greet {name} warmly.")),
            }],
        })
    }
}

async fn register_demo(server: &McpServer) {
    server
        .add_tool(Tool::new(
            "hello",
            "Greet someone by name",
            serde_json::json!({
                "type": "object",
                "properties": {
                    "name": { "type": "string", "description": "Who to greet" }
                }
            }),
            Arc::new(HelloTool),
        ))
        .await;

    server
        .add_resource(
            Resource::new("mem://readme", "readme", Arc::new(ReadmeResource))
                .with_description("Project overview")
                .with_mime_type("text/markdown"),
        )
        .await;
    server
        .add_resource(
            Resource::new("mem://notes/{id}", "note", Arc::new(NoteResource))
                .with_description("A note by id")
                .with_mime_type("text/plain"),
        )
        .await;

    server
        .add_prompt(Prompt::new(
            "greeting",
            Some("Generate a greeting message".to_owned()),
            vec![PromptArgument {
                name: "name".to_owned(),
                description: Some("Who to greet".to_owned()),
                required: false,
                default: Some("friend".to_owned()),
            }],
            Arc::new(GreetingPrompt),
        ))
        .await;
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenv::dotenv().ok();
    let cli = Cli::parse();

    init_tracing(&cli.log_level, cli.json_logs);

    tracing::info!(
        version = env!("CARGO_PKG_VERSION"),
        transport = ?cli.transport,
        "Starting Conduit MCP server"
    );

    let mut config = Config::new(cli.auth_token.clone());
    config.port = cli.port;
    config.sse_path = cli.sse_path.clone();
    config.messages_path = cli.messages_path.clone();
    config.strict_auth = cli.strict_auth;

    let mut builder = McpServer::builder(env!("CARGO_PKG_NAME"), env!("CARGO_PKG_VERSION"))
        .rate_limit(RateLimitConfig::new(
            config.rate_limit_max_requests,
            config.rate_limit_window,
        ));
    if let Some(token) = &config.auth_token {
        builder = builder.validator(Arc::new(StaticTokenValidator::single(token.clone())));
    }
    let server = builder.config(config.clone()).build();

    register_demo(&server).await;

    match cli.transport {
        Transport::Stdio => {
            let pump = server.connect(Arc::new(StdioTransport::new())).await?;
            pump.await?;
            server.shutdown().await?;
        }
        Transport::Http => {
            let gate = conduit_mcp::auth::AuthGate {
                validator: config
                    .auth_token
                    .as_ref()
                    .map(|t| {
                        Arc::new(StaticTokenValidator::single(t.clone()))
                            as Arc<dyn conduit_mcp::auth::TokenValidator>
                    }),
                strict: config.strict_auth,
                public_paths: config.public_paths.clone(),
                timeout: config.auth_timeout,
            };
            let transport = Arc::new(SseTransport::new((&config).into(), gate));
            server.connect(transport).await?;

            tracing::info!(port = config.port, "Serving HTTP, press Ctrl+C to stop");
            tokio::signal::ctrl_c().await?;
            server.shutdown().await?;
        }
    }

    Ok(())
}
