//! REST client for the terminal API.
//!
//! Every endpoint answers with the same envelope:
//!
//! ```text
//! { "code": 200, "message": "ok", "data": <payload>, "error": null }
//! ```
//!
//! Any `code` other than 200 is surfaced as [`GateError::Service`].

use std::time::Duration;

use async_trait::async_trait;
use reqwest::{Client, Method, RequestBuilder};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use tracing::debug;

use super::{
    ApprovalService, ApprovalSettings, Checkpoint, CheckpointDraft, CheckpointService,
    RemoteApproval, SessionState, SessionStateService,
};
use crate::config::ServicesConfig;
use crate::error::{GateError, Result};

const SUCCESS_CODE: i64 = 200;

/// Response envelope shared by all terminal endpoints.
#[derive(Debug, Deserialize, Serialize)]
pub struct ApiResponse<T> {
    pub code: i64,
    #[serde(default)]
    pub message: Option<String>,
    pub data: Option<T>,
    #[serde(default)]
    pub error: Option<String>,
}

impl<T> ApiResponse<T> {
    /// Unwrap the payload, turning a failure envelope into an error.
    pub fn into_result(self, what: &str) -> Result<Option<T>> {
        if self.code != SUCCESS_CODE {
            let detail = self
                .error
                .or(self.message)
                .unwrap_or_else(|| "no detail".to_string());
            return Err(GateError::Service(format!(
                "{} failed with code {}: {}",
                what, self.code, detail
            )));
        }
        Ok(self.data)
    }
}

/// Client for checkpoints, approvals and session state.
#[derive(Clone)]
pub struct TerminalClient {
    base_url: String,
    token: Option<String>,
    client: Client,
}

impl TerminalClient {
    pub fn from_config(config: &ServicesConfig) -> Result<Self> {
        let client = Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()?;
        Ok(Self::with_client(config, client))
    }

    /// Build a client around a pre-configured `reqwest::Client`.
    pub fn with_client(config: &ServicesConfig, client: Client) -> Self {
        Self {
            base_url: config.base_url.trim_end_matches('/').to_string(),
            token: config.token.clone().filter(|t| !t.is_empty()),
            client,
        }
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    fn url(&self, path: &str) -> String {
        format!("{}/{}", self.base_url, path.trim_start_matches('/'))
    }

    fn request(&self, method: Method, path: &str) -> RequestBuilder {
        let url = self.url(path);
        debug!(method = %method, url = %url, "Terminal API request");
        let builder = self.client.request(method, url);
        match &self.token {
            Some(token) => builder.bearer_auth(token),
            None => builder,
        }
    }

    async fn send<T: DeserializeOwned>(
        &self,
        builder: RequestBuilder,
        what: &str,
    ) -> Result<Option<T>> {
        let response = builder.send().await?;
        let status = response.status();
        let body = response.text().await?;
        match serde_json::from_str::<ApiResponse<T>>(&body) {
            Ok(envelope) => envelope.into_result(what),
            Err(_) if !status.is_success() => Err(GateError::Service(format!(
                "{} failed with HTTP {}: {}",
                what,
                status.as_u16(),
                crate::utils::preview(&body, 200)
            ))),
            Err(e) => Err(e.into()),
        }
    }

    async fn fetch<T: DeserializeOwned>(&self, builder: RequestBuilder, what: &str) -> Result<T> {
        self.send(builder, what)
            .await?
            .ok_or_else(|| GateError::Service(format!("{} returned no data", what)))
    }
}

#[async_trait]
impl CheckpointService for TerminalClient {
    async fn create(&self, draft: CheckpointDraft) -> Result<Checkpoint> {
        let builder = self.request(Method::POST, "checkpoints").json(&draft);
        let checkpoint_id: String = self.fetch(builder, "create checkpoint").await?;
        Ok(Checkpoint {
            checkpoint_id,
            session_id: draft.session_id,
            checkpoint_type: draft.checkpoint_type,
            message_order: draft.message_order,
            description: Some(draft.description),
            created_at: Some(chrono::Utc::now()),
        })
    }

    async fn list(&self, session_id: &str) -> Result<Vec<Checkpoint>> {
        let builder = self.request(Method::GET, &format!("checkpoints/{}", session_id));
        Ok(self.send(builder, "list checkpoints").await?.unwrap_or_default())
    }

    async fn jump(&self, checkpoint_id: &str) -> Result<Vec<String>> {
        let builder = self.request(Method::POST, &format!("checkpoints/{}/jump", checkpoint_id));
        Ok(self.send(builder, "jump to checkpoint").await?.unwrap_or_default())
    }

    async fn delete(&self, checkpoint_id: &str) -> Result<()> {
        let builder = self.request(Method::DELETE, &format!("checkpoints/{}", checkpoint_id));
        self.send::<Value>(builder, "delete checkpoint").await?;
        Ok(())
    }

    async fn export(&self, checkpoint_id: &str) -> Result<String> {
        let builder = self.request(Method::GET, &format!("checkpoints/{}/export", checkpoint_id));
        let data: Value = self.fetch(builder, "export checkpoint").await?;
        Ok(match data {
            Value::String(s) => s,
            other => other.to_string(),
        })
    }
}

#[async_trait]
impl ApprovalService for TerminalClient {
    async fn pending(&self, session_id: &str) -> Result<Vec<RemoteApproval>> {
        let builder = self.request(Method::GET, &format!("approvals/pending/{}", session_id));
        Ok(self.send(builder, "list pending approvals").await?.unwrap_or_default())
    }

    async fn approve(&self, decision_id: &str, reason: Option<&str>) -> Result<bool> {
        let body = match reason {
            Some(reason) => json!({ "reason": reason }),
            None => json!({}),
        };
        let builder = self
            .request(Method::POST, &format!("approvals/{}/approve", decision_id))
            .json(&body);
        Ok(self.send(builder, "approve").await?.unwrap_or(false))
    }

    async fn reject(&self, decision_id: &str, reason: &str) -> Result<bool> {
        let builder = self
            .request(Method::POST, &format!("approvals/{}/reject", decision_id))
            .json(&json!({ "reason": reason }));
        Ok(self.send(builder, "reject").await?.unwrap_or(false))
    }

    async fn settings(&self) -> Result<ApprovalSettings> {
        let builder = self.request(Method::GET, "approvals/settings");
        Ok(self.send(builder, "get approval settings").await?.unwrap_or_default())
    }

    async fn update_settings(&self, settings: &ApprovalSettings) -> Result<()> {
        let builder = self.request(Method::PUT, "approvals/settings").json(settings);
        self.send::<Value>(builder, "update approval settings").await?;
        Ok(())
    }

    async fn approve_all(&self, session_id: &str) -> Result<usize> {
        let builder = self.request(Method::POST, &format!("approvals/approve-all/{}", session_id));
        Ok(self.send(builder, "approve all").await?.unwrap_or(0))
    }
}

#[async_trait]
impl SessionStateService for TerminalClient {
    async fn get(&self, session_id: &str) -> Result<SessionState> {
        let builder = self.request(Method::GET, &format!("state/{}", session_id));
        let mut state: SessionState = self.fetch(builder, "get session state").await?;
        if state.session_id.is_empty() {
            state.session_id = session_id.to_string();
        }
        Ok(state)
    }

    async fn interrupt(&self, session_id: &str) -> Result<bool> {
        let builder = self.request(Method::POST, &format!("state/{}/interrupt", session_id));
        Ok(self.send(builder, "interrupt session").await?.unwrap_or(false))
    }

    async fn clear_interrupt(&self, session_id: &str) -> Result<()> {
        let builder = self.request(Method::POST, &format!("state/{}/clear-interrupt", session_id));
        self.send::<Value>(builder, "clear interrupt").await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn client(base: &str) -> TerminalClient {
        let config = ServicesConfig {
            base_url: base.to_string(),
            ..Default::default()
        };
        TerminalClient::from_config(&config).unwrap()
    }

    #[test]
    fn test_url_joining_strips_slashes() {
        let c = client("http://localhost:8080/api/terminal/");
        assert_eq!(c.base_url(), "http://localhost:8080/api/terminal");
        assert_eq!(
            c.url("/checkpoints/cp-1/jump"),
            "http://localhost:8080/api/terminal/checkpoints/cp-1/jump"
        );
    }

    #[test]
    fn test_empty_token_is_ignored() {
        let config = ServicesConfig {
            token: Some(String::new()),
            ..Default::default()
        };
        let c = TerminalClient::from_config(&config).unwrap();
        assert!(c.token.is_none());
    }

    #[test]
    fn test_success_envelope_yields_data() {
        let raw = r#"{"code": 200, "message": "ok", "data": "cp-9"}"#;
        let env: ApiResponse<String> = serde_json::from_str(raw).unwrap();
        assert_eq!(env.into_result("create").unwrap().as_deref(), Some("cp-9"));
    }

    #[test]
    fn test_success_envelope_without_data() {
        let raw = r#"{"code": 200, "message": "deleted"}"#;
        let env: ApiResponse<Value> = serde_json::from_str(raw).unwrap();
        assert!(env.into_result("delete").unwrap().is_none());
    }

    #[test]
    fn test_failure_envelope_is_service_error() {
        let raw = r#"{"code": 404, "message": "not found", "error": "checkpoint cp-1 missing"}"#;
        let env: ApiResponse<Value> = serde_json::from_str(raw).unwrap();
        let err = env.into_result("jump to checkpoint").unwrap_err();
        assert!(err.is_service_failure());
        let text = err.to_string();
        assert!(text.contains("code 404"));
        assert!(text.contains("checkpoint cp-1 missing"));
    }

    #[test]
    fn test_failure_envelope_falls_back_to_message() {
        let raw = r#"{"code": 500, "message": "boom"}"#;
        let env: ApiResponse<bool> = serde_json::from_str(raw).unwrap();
        assert!(env.into_result("approve").unwrap_err().to_string().contains("boom"));
    }

    #[test]
    fn test_pending_approvals_payload() {
        let raw = r#"{"code": 200, "data": [{"decisionId": "d1", "toolName": "run_command"}]}"#;
        let env: ApiResponse<Vec<RemoteApproval>> = serde_json::from_str(raw).unwrap();
        let list = env.into_result("pending").unwrap().unwrap();
        assert_eq!(list.len(), 1);
        assert_eq!(list[0].approval_status, "PENDING");
    }
}
