//! Real-socket tests for the HTTP/SSE transport: endpoint announcement,
//! POST-then-stream round trip, unknown sessions, port fallback, and the
//! bearer middleware in strict mode.
//!
//! These bind TCP listeners; run them with `--features integration`.

#![cfg(feature = "integration")]

use std::sync::Arc;
use std::time::Duration;

use serde_json::{json, Value};

use conduit_mcp::auth::{AuthGate, StaticTokenValidator};
use conduit_mcp::config::Config;
use conduit_mcp::server::McpServer;
use conduit_mcp::transport::sse::{SseConfig, SseTransport};
use conduit_mcp::transport::Transport;

fn test_sse_config() -> SseConfig {
    SseConfig::from(&Config::for_testing())
}

async fn serve(gate: AuthGate) -> (McpServer, Arc<SseTransport>) {
    let server = McpServer::builder("srv", "1.0.0").config(Config::for_testing()).build();
    let transport = Arc::new(SseTransport::new(test_sse_config(), gate));
    server.connect(Arc::clone(&transport) as Arc<dyn Transport>).await.unwrap();
    (server, transport)
}

/// Reads one SSE frame (terminated by a blank line) from a streaming
/// response, skipping keepalive comments.
async fn next_event(response: &mut reqwest::Response, buffer: &mut String) -> (String, String) {
    loop {
        if let Some(end) = buffer.find("\n\n") {
            let raw: String = buffer.drain(..end + 2).collect();
            let mut event = String::new();
            let mut data = String::new();
            for line in raw.lines() {
                if let Some(rest) = line.strip_prefix("event:") {
                    event = rest.trim().to_owned();
                } else if let Some(rest) = line.strip_prefix("data:") {
                    data.push_str(rest.trim());
                }
            }
            if event.is_empty() && data.is_empty() {
                continue; // comment frame (keepalive)
            }
            return (event, data);
        }
        let chunk = tokio::time::timeout(Duration::from_secs(5), response.chunk())
            .await
            .expect("timed out waiting for SSE frame")
            .expect("stream error")
            .expect("stream ended");
        buffer.push_str(&String::from_utf8_lossy(&chunk));
    }
}

#[tokio::test]
async fn test_sse_round_trip() {
    let (_server, transport) = serve(AuthGate::disabled()).await;
    let addr = transport.local_addr().unwrap();
    let base = format!("http://{addr}");
    let client = reqwest::Client::new();

    let mut stream = client.get(format!("{base}/sse")).send().await.unwrap();
    assert_eq!(stream.status(), 200);
    assert!(stream
        .headers()
        .get("content-type")
        .unwrap()
        .to_str()
        .unwrap()
        .starts_with("text/event-stream"));

    let mut buffer = String::new();
    let (event, endpoint) = next_event(&mut stream, &mut buffer).await;
    assert_eq!(event, "endpoint");
    assert!(endpoint.starts_with("/messages?sessionId="));

    // POST initialize to the announced endpoint; the response rides the
    // stream.
    let post = client
        .post(format!("{base}{endpoint}"))
        .body(
            json!({
                "jsonrpc": "2.0", "id": 1, "method": "initialize",
                "params": {
                    "protocolVersion": "2024-11-05",
                    "capabilities": {},
                    "clientInfo": { "name": "c", "version": "0" }
                }
            })
            .to_string(),
        )
        .send()
        .await
        .unwrap();
    assert_eq!(post.status(), 202);

    let (event, data) = next_event(&mut stream, &mut buffer).await;
    assert_eq!(event, "message");
    let response: Value = serde_json::from_str(&data).unwrap();
    assert_eq!(response["id"], 1);
    assert_eq!(response["result"]["protocolVersion"], "2024-11-05");
}

#[tokio::test]
async fn test_post_unknown_session_is_404() {
    let (_server, transport) = serve(AuthGate::disabled()).await;
    let addr = transport.local_addr().unwrap();

    let response = reqwest::Client::new()
        .post(format!("http://{addr}/messages?sessionId=not-a-session"))
        .body(r#"{"jsonrpc":"2.0","id":1,"method":"ping"}"#)
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), 404);
}

#[tokio::test]
async fn test_post_without_session_is_400() {
    let (_server, transport) = serve(AuthGate::disabled()).await;
    let addr = transport.local_addr().unwrap();

    let response = reqwest::Client::new()
        .post(format!("http://{addr}/messages"))
        .body(r#"{"jsonrpc":"2.0","id":1,"method":"ping"}"#)
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), 400);
}

#[tokio::test]
async fn test_health_endpoint() {
    let (_server, transport) = serve(AuthGate::disabled()).await;
    let addr = transport.local_addr().unwrap();

    let body: Value = reqwest::get(format!("http://{addr}/health"))
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(body["status"], "ok");
}

#[tokio::test]
async fn test_port_fallback_on_addr_in_use() {
    // Occupy a port, then ask the transport for it with an ephemeral
    // fallback.
    let blocker = tokio::net::TcpListener::bind("0.0.0.0:0").await.unwrap();
    let taken = blocker.local_addr().unwrap().port();

    let config = SseConfig { port: taken, fallback_ports: vec![0], ..test_sse_config() };
    let transport = Arc::new(SseTransport::new(config, AuthGate::disabled()));
    let server = McpServer::builder("srv", "1.0.0").build();
    server.connect(Arc::clone(&transport) as Arc<dyn Transport>).await.unwrap();

    let bound = transport.local_addr().unwrap().port();
    assert_ne!(bound, taken);
}

#[tokio::test]
async fn test_bind_failure_when_no_fallbacks() {
    let blocker = tokio::net::TcpListener::bind("0.0.0.0:0").await.unwrap();
    let taken = blocker.local_addr().unwrap().port();

    let config = SseConfig { port: taken, fallback_ports: vec![], ..test_sse_config() };
    let transport = Arc::new(SseTransport::new(config, AuthGate::disabled()));
    let server = McpServer::builder("srv", "1.0.0").build();
    let result = server.connect(transport as Arc<dyn Transport>).await;
    assert!(result.is_err());
}

#[tokio::test]
async fn test_strict_auth_challenges_missing_token() {
    let gate = AuthGate {
        validator: Some(Arc::new(StaticTokenValidator::single("sekrit"))),
        strict: true,
        public_paths: vec!["/health".to_owned()],
        timeout: Duration::from_secs(1),
    };
    let (_server, transport) = serve(gate).await;
    let addr = transport.local_addr().unwrap();
    let client = reqwest::Client::new();

    // No token: 401 with a bearer challenge.
    let response = client.get(format!("http://{addr}/sse")).send().await.unwrap();
    assert_eq!(response.status(), 401);
    let challenge = response.headers().get("www-authenticate").unwrap().to_str().unwrap();
    assert!(challenge.starts_with("Bearer "));

    // Wrong token: also 401.
    let response = client
        .get(format!("http://{addr}/sse"))
        .bearer_auth("wrong")
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), 401);

    // Public path bypasses the gate.
    let response = client.get(format!("http://{addr}/health")).send().await.unwrap();
    assert_eq!(response.status(), 200);

    // Valid token: the stream opens.
    let response = client
        .get(format!("http://{addr}/sse"))
        .bearer_auth("sekrit")
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), 200);
}

#[tokio::test]
async fn test_shutdown_closes_stream() {
    let (server, transport) = serve(AuthGate::disabled()).await;
    let addr = transport.local_addr().unwrap();
    let client = reqwest::Client::new();

    let mut stream = client.get(format!("http://{addr}/sse")).send().await.unwrap();
    let mut buffer = String::new();
    let (event, _) = next_event(&mut stream, &mut buffer).await;
    assert_eq!(event, "endpoint");

    server.shutdown().await.unwrap();

    // The stream ends once the transport is gone.
    let outcome = tokio::time::timeout(Duration::from_secs(5), async {
        loop {
            match stream.chunk().await {
                Ok(Some(_)) => continue,
                Ok(None) | Err(_) => break,
            }
        }
    })
    .await;
    assert!(outcome.is_ok(), "stream did not terminate after shutdown");
}
