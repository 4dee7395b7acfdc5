//! Bearer-token authentication and method authorization.
//!
//! Token validation is pluggable through [`TokenValidator`]: a static
//! API-key map for simple deployments, or OAuth 2.1 token introspection
//! (see [`introspection`]). The HTTP middleware extracts the bearer token,
//! validates it within a bounded timeout, and attaches the resulting
//! [`AuthContext`] to the request; the dispatcher then enforces the
//! method-to-scope map.

pub mod introspection;

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use axum::extract::{Request, State};
use axum::http::{header, StatusCode};
use axum::middleware::Next;
use axum::response::{IntoResponse, Response};
use axum_extra::headers::authorization::Bearer;
use axum_extra::headers::{Authorization, HeaderMapExt};
use chrono::{DateTime, Utc};

/// Scopes understood by the core.
pub mod scopes {
    pub const TOOLS_READ: &str = "tools:read";
    pub const TOOLS_EXECUTE: &str = "tools:execute";
    pub const RESOURCES_READ: &str = "resources:read";
    pub const PROMPTS_READ: &str = "prompts:read";
    pub const COMPLETION_CREATE: &str = "completion:create";

    /// Every scope, for locally trusted tokens.
    pub const ALL: &[&str] =
        &[TOOLS_READ, TOOLS_EXECUTE, RESOURCES_READ, PROMPTS_READ, COMPLETION_CREATE];
}

/// The scope a method requires, if any.
#[must_use]
pub fn required_scope(method: &str) -> Option<&'static str> {
    match method {
        "tools/call" => Some(scopes::TOOLS_EXECUTE),
        "tools/list" => Some(scopes::TOOLS_READ),
        "resources/list" | "resources/read" => Some(scopes::RESOURCES_READ),
        "prompts/list" | "prompts/get" => Some(scopes::PROMPTS_READ),
        "completion/complete" => Some(scopes::COMPLETION_CREATE),
        _ => None,
    }
}

/// Validated identity attached to a session.
#[derive(Debug, Clone, PartialEq)]
pub struct AuthContext {
    /// Claims reported by the validator (subject, username, ...).
    pub user_info: serde_json::Value,
    /// Scopes granted to the token.
    pub scopes: Vec<String>,
    /// The raw bearer token.
    pub token: String,
    /// When validation happened.
    pub timestamp: DateTime<Utc>,
}

impl AuthContext {
    /// Check a granted scope.
    #[must_use]
    pub fn has_scope(&self, scope: &str) -> bool {
        self.scopes.iter().any(|s| s == scope)
    }
}

/// Outcome of a validation attempt.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct AuthResult {
    /// Token accepted.
    pub ok: bool,
    /// Claims for the token's principal.
    pub user_info: Option<serde_json::Value>,
    /// Scopes the validator confirmed.
    pub validated_scopes: Option<Vec<String>>,
    /// Why validation failed.
    pub error: Option<String>,
}

impl AuthResult {
    /// A rejection with a reason.
    #[must_use]
    pub fn denied(reason: impl Into<String>) -> Self {
        Self { ok: false, error: Some(reason.into()), ..Self::default() }
    }
}

/// Pluggable token validation.
#[async_trait::async_trait]
pub trait TokenValidator: Send + Sync {
    /// Validate a bearer token, optionally insisting on scopes.
    async fn validate(&self, token: &str, required_scopes: Option<&[String]>) -> AuthResult;
}

/// Static API-key validator: a fixed token-to-scopes map.
#[derive(Debug, Default)]
pub struct StaticTokenValidator {
    tokens: HashMap<String, StaticEntry>,
}

#[derive(Debug, Clone)]
struct StaticEntry {
    user_info: serde_json::Value,
    scopes: Vec<String>,
}

impl StaticTokenValidator {
    /// Empty validator; rejects everything until tokens are added.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Accept `token` for `user` with the given scopes.
    #[must_use]
    pub fn with_token(
        mut self,
        token: impl Into<String>,
        user: impl Into<String>,
        scopes: &[&str],
    ) -> Self {
        self.tokens.insert(
            token.into(),
            StaticEntry {
                user_info: serde_json::json!({ "sub": user.into() }),
                scopes: scopes.iter().map(|s| (*s).to_owned()).collect(),
            },
        );
        self
    }

    /// Single fully-scoped token, as read from `MCP_AUTH_TOKEN`.
    #[must_use]
    pub fn single(token: impl Into<String>) -> Self {
        Self::new().with_token(token, "local", scopes::ALL)
    }

    /// Build from the `MCP_AUTH_TOKEN` environment variable, if set.
    #[must_use]
    pub fn from_env() -> Option<Self> {
        std::env::var("MCP_AUTH_TOKEN").ok().map(Self::single)
    }
}

#[async_trait::async_trait]
impl TokenValidator for StaticTokenValidator {
    async fn validate(&self, token: &str, required_scopes: Option<&[String]>) -> AuthResult {
        let Some(entry) = self.tokens.get(token) else {
            return AuthResult::denied("unknown token");
        };
        if let Some(required) = required_scopes {
            if let Some(missing) = required.iter().find(|s| !entry.scopes.contains(s)) {
                return AuthResult::denied(format!("missing scope: {missing}"));
            }
        }
        AuthResult {
            ok: true,
            user_info: Some(entry.user_info.clone()),
            validated_scopes: Some(entry.scopes.clone()),
            error: None,
        }
    }
}

/// Shared state for the HTTP bearer middleware.
pub struct AuthGate {
    /// Validator; `None` disables HTTP-level authentication entirely.
    pub validator: Option<Arc<dyn TokenValidator>>,
    /// Reject unauthenticated requests instead of passing them through
    /// anonymously to dispatcher-level scope checks.
    pub strict: bool,
    /// Paths served without authentication.
    pub public_paths: Vec<String>,
    /// Upper bound on one validator call.
    pub timeout: Duration,
}

impl AuthGate {
    /// Gate with no validator: every request passes anonymously.
    #[must_use]
    pub fn disabled() -> Self {
        Self {
            validator: None,
            strict: false,
            public_paths: Vec::new(),
            timeout: crate::config::defaults::AUTH_TIMEOUT,
        }
    }
}

impl std::fmt::Debug for AuthGate {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AuthGate")
            .field("enabled", &self.validator.is_some())
            .field("strict", &self.strict)
            .field("public_paths", &self.public_paths)
            .finish()
    }
}

/// Axum middleware: bearer extraction + validation.
///
/// On success the [`AuthContext`] lands in the request extensions, from
/// where the transport forwards it to the session.
pub async fn bearer_middleware(
    State(gate): State<Arc<AuthGate>>,
    mut request: Request,
    next: Next,
) -> Response {
    let Some(validator) = gate.validator.clone() else {
        return next.run(request).await;
    };

    let path = request.uri().path().to_owned();
    if gate.public_paths.iter().any(|p| p == &path) {
        return next.run(request).await;
    }

    let bearer = request.headers().typed_get::<Authorization<Bearer>>();
    let Some(bearer) = bearer else {
        if gate.strict {
            return unauthorized_response("invalid_request", "missing bearer token");
        }
        // Anonymous; the dispatcher rejects scoped methods later.
        return next.run(request).await;
    };

    let token = bearer.token().to_owned();
    let verdict = tokio::time::timeout(gate.timeout, validator.validate(&token, None)).await;
    let result = match verdict {
        Ok(result) => result,
        Err(_) => {
            tracing::warn!(path = %path, "Token validation timed out");
            return unauthorized_response("server_error", "token validation timed out");
        }
    };

    if !result.ok {
        let reason = result.error.unwrap_or_else(|| "invalid token".to_owned());
        tracing::debug!(path = %path, reason = %reason, "Rejected bearer token");
        return unauthorized_response("invalid_token", &reason);
    }

    request.extensions_mut().insert(AuthContext {
        user_info: result.user_info.unwrap_or(serde_json::Value::Null),
        scopes: result.validated_scopes.unwrap_or_default(),
        token,
        timestamp: Utc::now(),
    });
    next.run(request).await
}

fn unauthorized_response(error: &str, description: &str) -> Response {
    let challenge =
        format!(r#"Bearer error="{error}", error_description="{description}""#);
    (
        StatusCode::UNAUTHORIZED,
        [(header::WWW_AUTHENTICATE, challenge)],
        axum::Json(serde_json::json!({ "error": error, "error_description": description })),
    )
        .into_response()
}
