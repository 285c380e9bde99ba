//! Web API client.
//!
//! Thin wrapper over the platform's REST surface: bearer-auth JSON calls
//! against `https://slack.com/api/<method>` with `{ok: bool, ...}`
//! envelope checking and opaque-cursor pagination. Outbound posts are
//! fire-and-forget at the call sites; results are logged, never retried.

use std::collections::HashMap;

use serde_json::Value;
use tracing::warn;

use crate::common::error::{ApiError, ApiResult};
use crate::config::WorkspaceCredential;

/// Web API base URL.
const API_BASE: &str = "https://slack.com/api";

/// Web API client holding one credential per connected workspace.
#[derive(Debug, Clone)]
pub struct ApiClient {
    http: reqwest::Client,
    /// Workspace domain -> bearer credential.
    tokens: HashMap<String, String>,
    /// First configured credential, used when a workspace is unknown.
    fallback: Option<String>,
}

impl ApiClient {
    /// Create a client from the configured workspace credentials.
    pub fn new(credentials: &[WorkspaceCredential]) -> Self {
        Self {
            http: reqwest::Client::new(),
            tokens: credentials
                .iter()
                .map(|c| (c.workspace.clone(), c.token.clone()))
                .collect(),
            fallback: credentials.first().map(|c| c.token.clone()),
        }
    }

    /// Resolve the credential for a workspace domain.
    fn token_for(&self, workspace: &str) -> ApiResult<&str> {
        self.tokens
            .get(workspace)
            .or(self.fallback.as_ref())
            .map(String::as_str)
            .ok_or_else(|| ApiError::NoCredential {
                workspace: workspace.to_string(),
            })
    }

    /// GET-style lookup with query parameters, authenticated for a workspace.
    pub async fn get(
        &self,
        method: &str,
        params: &[(&str, &str)],
        workspace: &str,
    ) -> ApiResult<Value> {
        let token = self.token_for(workspace)?.to_string();
        self.get_with_token(method, params, &token).await
    }

    /// GET-style lookup with an explicit credential (used at bootstrap,
    /// before the workspace domain is known).
    pub async fn get_with_token(
        &self,
        method: &str,
        params: &[(&str, &str)],
        token: &str,
    ) -> ApiResult<Value> {
        let response = self
            .http
            .get(format!("{}/{}", API_BASE, method))
            .query(params)
            .bearer_auth(token)
            .send()
            .await?;
        check_envelope(method, response.json().await?)
    }

    /// POST a JSON body, authenticated for a workspace.
    pub async fn post(&self, method: &str, body: Value, workspace: &str) -> ApiResult<Value> {
        let token = self.token_for(workspace)?;
        let response = self
            .http
            .post(format!("{}/{}", API_BASE, method))
            .bearer_auth(token)
            .json(&body)
            .send()
            .await?;
        check_envelope(method, response.json().await?)
    }

    /// Repeatedly call a paginated method, concatenating the named array
    /// until the response carries no further cursor.
    pub async fn paged(
        &self,
        method: &str,
        params: &[(&str, &str)],
        array: &str,
        workspace: &str,
    ) -> ApiResult<Vec<Value>> {
        let token = self.token_for(workspace)?.to_string();
        self.paged_with_token(method, params, array, &token).await
    }

    /// Paginated call with an explicit credential.
    pub async fn paged_with_token(
        &self,
        method: &str,
        params: &[(&str, &str)],
        array: &str,
        token: &str,
    ) -> ApiResult<Vec<Value>> {
        let mut collected = Vec::new();
        let mut cursor = String::new();

        loop {
            let mut page_params: Vec<(&str, &str)> = params.to_vec();
            if !cursor.is_empty() {
                page_params.push(("cursor", &cursor));
            }

            let body = self.get_with_token(method, &page_params, token).await?;
            match body.get(array).and_then(|a| a.as_array()) {
                Some(items) => collected.extend(items.iter().cloned()),
                None => {
                    return Err(ApiError::MalformedResponse {
                        method: method.to_string(),
                        message: format!("missing '{}' array", array),
                    })
                }
            }

            cursor = body
                .get("response_metadata")
                .and_then(|m| m.get("next_cursor"))
                .and_then(|c| c.as_str())
                .unwrap_or_default()
                .to_string();
            if cursor.is_empty() {
                return Ok(collected);
            }
        }
    }

    /// Post an ephemeral notice visible only to one user.
    ///
    /// Degradations are surfaced this way throughout; failures to warn
    /// are themselves only logged.
    pub async fn ephemeral(&self, workspace: &str, channel: &str, user: &str, text: &str) {
        let body = serde_json::json!({
            "channel": channel,
            "user": user,
            "text": text,
        });
        if let Err(e) = self.post("chat.postEphemeral", body, workspace).await {
            warn!("Failed to post ephemeral notice: {}", e);
        }
    }

    /// Add a reaction to a message.
    pub async fn react(&self, workspace: &str, channel: &str, ts: &str, name: &str) {
        let body = serde_json::json!({
            "channel": channel,
            "timestamp": ts,
            "name": name,
        });
        if let Err(e) = self.post("reactions.add", body, workspace).await {
            warn!("Failed to add reaction: {}", e);
        }
    }
}

/// Check the `{ok: bool}` response envelope.
fn check_envelope(method: &str, body: Value) -> ApiResult<Value> {
    match body.get("ok").and_then(|ok| ok.as_bool()) {
        Some(true) => Ok(body),
        Some(false) => Err(ApiError::Platform {
            method: method.to_string(),
            error: body
                .get("error")
                .and_then(|e| e.as_str())
                .unwrap_or("unknown")
                .to_string(),
        }),
        None => Err(ApiError::MalformedResponse {
            method: method.to_string(),
            message: "missing 'ok' field".to_string(),
        }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn make_client() -> ApiClient {
        ApiClient::new(&[
            WorkspaceCredential {
                workspace: "acme".to_string(),
                token: "xoxb-acme".to_string(),
            },
            WorkspaceCredential {
                workspace: "partner".to_string(),
                token: "xoxb-partner".to_string(),
            },
        ])
    }

    #[test]
    fn test_token_resolution() {
        let client = make_client();
        assert_eq!(client.token_for("acme").unwrap(), "xoxb-acme");
        assert_eq!(client.token_for("partner").unwrap(), "xoxb-partner");
        // Unknown workspaces fall back to the first credential.
        assert_eq!(client.token_for("stranger").unwrap(), "xoxb-acme");
    }

    #[test]
    fn test_token_resolution_unconfigured() {
        let client = ApiClient::new(&[]);
        assert!(client.token_for("anything").is_err());
    }

    #[test]
    fn test_check_envelope() {
        assert!(check_envelope("x", serde_json::json!({"ok": true})).is_ok());

        let err = check_envelope("x", serde_json::json!({"ok": false, "error": "missing_scope"}))
            .unwrap_err();
        assert!(err.to_string().contains("missing_scope"));

        assert!(check_envelope("x", serde_json::json!({"unrelated": 1})).is_err());
    }
}
