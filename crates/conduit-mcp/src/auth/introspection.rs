//! OAuth 2.1 token introspection (RFC 7662).
//!
//! Posts `token=<t>` to the introspection endpoint with Basic client
//! credentials. A token is active iff the response carries `active: true`;
//! granted scopes come from the space-separated `scope` field.

use std::time::Duration;

use serde::Deserialize;

use super::{AuthResult, TokenValidator};

/// Introspection endpoint client.
pub struct IntrospectionValidator {
    endpoint: String,
    client_id: String,
    client_secret: String,
    http: reqwest::Client,
}

#[derive(Debug, Deserialize)]
struct IntrospectionResponse {
    #[serde(default)]
    active: bool,
    #[serde(default)]
    scope: Option<String>,
    #[serde(default)]
    sub: Option<String>,
    #[serde(default)]
    username: Option<String>,
    #[serde(default)]
    client_id: Option<String>,
    #[serde(default)]
    exp: Option<i64>,
}

impl IntrospectionValidator {
    /// Create a validator for the given endpoint and client credentials.
    ///
    /// # Errors
    ///
    /// Returns error if the HTTP client cannot be constructed.
    pub fn new(
        endpoint: impl Into<String>,
        client_id: impl Into<String>,
        client_secret: impl Into<String>,
    ) -> Result<Self, reqwest::Error> {
        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(5))
            .build()?;
        Ok(Self {
            endpoint: endpoint.into(),
            client_id: client_id.into(),
            client_secret: client_secret.into(),
            http,
        })
    }
}

impl std::fmt::Debug for IntrospectionValidator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("IntrospectionValidator")
            .field("endpoint", &self.endpoint)
            .field("client_id", &self.client_id)
            .finish()
    }
}

#[async_trait::async_trait]
impl TokenValidator for IntrospectionValidator {
    async fn validate(&self, token: &str, required_scopes: Option<&[String]>) -> AuthResult {
        let response = self
            .http
            .post(&self.endpoint)
            .basic_auth(&self.client_id, Some(&self.client_secret))
            .form(&[("token", token)])
            .send()
            .await;

        let response = match response {
            Ok(r) => r,
            Err(err) => {
                tracing::warn!(error = %err, "Introspection request failed");
                return AuthResult::denied(format!("introspection unreachable: {err}"));
            }
        };

        if !response.status().is_success() {
            return AuthResult::denied(format!(
                "introspection returned {}",
                response.status()
            ));
        }

        let body: IntrospectionResponse = match response.json().await {
            Ok(b) => b,
            Err(err) => return AuthResult::denied(format!("invalid introspection body: {err}")),
        };

        if !body.active {
            return AuthResult::denied("token inactive");
        }

        let granted: Vec<String> = body
            .scope
            .as_deref()
            .unwrap_or_default()
            .split_whitespace()
            .map(str::to_owned)
            .collect();

        if let Some(required) = required_scopes {
            if let Some(missing) = required.iter().find(|s| !granted.contains(s)) {
                return AuthResult::denied(format!("missing scope: {missing}"));
            }
        }

        let mut user_info = serde_json::Map::new();
        if let Some(sub) = body.sub {
            user_info.insert("sub".into(), serde_json::Value::String(sub));
        }
        if let Some(username) = body.username {
            user_info.insert("username".into(), serde_json::Value::String(username));
        }
        if let Some(client_id) = body.client_id {
            user_info.insert("client_id".into(), serde_json::Value::String(client_id));
        }
        if let Some(exp) = body.exp {
            user_info.insert("exp".into(), serde_json::Value::from(exp));
        }

        AuthResult {
            ok: true,
            user_info: Some(serde_json::Value::Object(user_info)),
            validated_scopes: Some(granted),
            error: None,
        }
    }
}
