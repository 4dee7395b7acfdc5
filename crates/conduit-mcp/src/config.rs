//! Server configuration.

use std::time::Duration;

/// Built-in defaults.
pub mod defaults {
    use std::time::Duration;

    /// Default HTTP port for the SSE transport.
    pub const PORT: u16 = 8000;

    /// Ports tried in order when the primary port is already bound.
    pub const FALLBACK_PORTS: &[u16] = &[8001, 8002, 8003];

    /// Path serving the SSE event stream.
    pub const SSE_PATH: &str = "/sse";

    /// Path accepting client-to-server POSTs.
    pub const MESSAGES_PATH: &str = "/messages";

    /// SSE keepalive comment interval.
    pub const KEEPALIVE_INTERVAL: Duration = Duration::from_secs(15);

    /// Upper bound on a token validator call.
    pub const AUTH_TIMEOUT: Duration = Duration::from_secs(5);

    /// Items per page on the list endpoints.
    pub const PAGE_SIZE: usize = 50;

    /// Sliding-window rate limit: admissions per window.
    pub const RATE_LIMIT_MAX_REQUESTS: usize = 120;

    /// Sliding-window rate limit: window duration.
    pub const RATE_LIMIT_WINDOW: Duration = Duration::from_secs(60);
}

/// Server configuration.
#[derive(Debug, Clone)]
pub struct Config {
    /// HTTP port for the SSE transport.
    pub port: u16,

    /// Ports tried in order on `EADDRINUSE`.
    pub fallback_ports: Vec<u16>,

    /// Path serving the SSE event stream.
    pub sse_path: String,

    /// Path accepting client POSTs.
    pub messages_path: String,

    /// SSE keepalive interval.
    pub keepalive_interval: Duration,

    /// Static bearer token accepted by the built-in validator (optional).
    pub auth_token: Option<String>,

    /// Reject unauthenticated HTTP requests outright instead of deferring
    /// to per-method scope checks.
    pub strict_auth: bool,

    /// Paths exempt from bearer authentication.
    pub public_paths: Vec<String>,

    /// Upper bound on a token validator call.
    pub auth_timeout: Duration,

    /// Items per page on the list endpoints.
    pub page_size: usize,

    /// Admissions per sliding window, when rate limiting is enabled.
    pub rate_limit_max_requests: usize,

    /// Sliding window duration.
    pub rate_limit_window: Duration,
}

impl Config {
    /// Create a configuration with an optional static auth token.
    #[must_use]
    pub fn new(auth_token: Option<String>) -> Self {
        Self {
            port: defaults::PORT,
            fallback_ports: defaults::FALLBACK_PORTS.to_vec(),
            sse_path: defaults::SSE_PATH.to_owned(),
            messages_path: defaults::MESSAGES_PATH.to_owned(),
            keepalive_interval: defaults::KEEPALIVE_INTERVAL,
            auth_token,
            strict_auth: false,
            public_paths: vec!["/health".to_owned()],
            auth_timeout: defaults::AUTH_TIMEOUT,
            page_size: defaults::PAGE_SIZE,
            rate_limit_max_requests: defaults::RATE_LIMIT_MAX_REQUESTS,
            rate_limit_window: defaults::RATE_LIMIT_WINDOW,
        }
    }

    /// Create configuration from environment variables.
    ///
    /// # Errors
    ///
    /// Returns error if `PORT` is set but not a valid port number.
    pub fn from_env() -> anyhow::Result<Self> {
        let auth_token = std::env::var("MCP_AUTH_TOKEN").ok();
        let mut config = Self::new(auth_token);
        if let Ok(port) = std::env::var("PORT") {
            config.port = port.parse()?;
        }
        Ok(config)
    }

    /// Create a test configuration: ephemeral port, tiny pages, no keepalive
    /// wait worth noticing.
    #[must_use]
    pub fn for_testing() -> Self {
        Self {
            port: 0,
            fallback_ports: Vec::new(),
            keepalive_interval: Duration::from_secs(1),
            auth_timeout: Duration::from_millis(500),
            page_size: 2,
            ..Self::new(None)
        }
    }

    /// Check if a static auth token is configured.
    #[must_use]
    pub const fn has_auth_token(&self) -> bool {
        self.auth_token.is_some()
    }
}

impl Default for Config {
    fn default() -> Self {
        Self::new(None)
    }
}
