// SPDX-License-Identifier: MIT
//! reqwest implementation of [`TriageApi`].
//!
//! One shared `reqwest::Client` per instance; every endpoint is a single
//! JSON request with no retry. Non-2xx statuses become
//! [`ClientError::Transport`] so the coordination layer treats an HTTP 500
//! exactly like an unreachable network.

use async_trait::async_trait;
use serde::de::DeserializeOwned;
use serde_json::json;
use tracing::debug;

use super::{CheckInValue, QueueEntry, StartTriageResponse, TriageApi, TriageOutcome};
use crate::error::{ClientError, Result};

/// HTTP client for the triage service.
pub struct HttpTriageApi {
    base_url: String,
    client: reqwest::Client,
}

impl HttpTriageApi {
    /// Create a client targeting `base_url` (no trailing slash needed).
    pub fn new(base_url: impl Into<String>) -> Self {
        let base_url = base_url.into().trim_end_matches('/').to_string();
        Self {
            base_url,
            client: reqwest::Client::new(),
        }
    }

    async fn post_json<T: DeserializeOwned>(
        &self,
        path: &str,
        body: &serde_json::Value,
    ) -> Result<T> {
        let url = format!("{}{path}", self.base_url);
        debug!(%url, "POST");
        let resp = self.client.post(&url).json(body).send().await?;
        let status = resp.status();
        if !status.is_success() {
            return Err(ClientError::Transport(format!(
                "{path} returned {status}"
            )));
        }
        resp.json::<T>()
            .await
            .map_err(|e| ClientError::Protocol(e.to_string()))
    }
}

#[async_trait]
impl TriageApi for HttpTriageApi {
    async fn start_triage(
        &self,
        name: Option<&str>,
        phone: Option<&str>,
    ) -> Result<StartTriageResponse> {
        self.post_json("/api/start-triage", &json!({ "name": name, "phone": phone }))
            .await
    }

    async fn send_message(&self, session_id: &str, content: &str) -> Result<String> {
        #[derive(serde::Deserialize)]
        struct MessageResponse {
            response: String,
        }
        let body: MessageResponse = self
            .post_json(
                "/api/message",
                &json!({ "session_id": session_id, "content": content }),
            )
            .await?;
        Ok(body.response)
    }

    async fn complete_triage(&self, session_id: &str) -> Result<TriageOutcome> {
        self.post_json("/api/complete-triage", &json!({ "session_id": session_id }))
            .await
    }

    async fn get_queue(&self) -> Result<Vec<QueueEntry>> {
        #[derive(serde::Deserialize)]
        struct QueueResponse {
            #[serde(default)]
            queue: Vec<QueueEntry>,
        }
        let url = format!("{}/api/queue", self.base_url);
        debug!(%url, "GET");
        let resp = self.client.get(&url).send().await?;
        let status = resp.status();
        if !status.is_success() {
            return Err(ClientError::Transport(format!(
                "/api/queue returned {status}"
            )));
        }
        let body: QueueResponse = resp
            .json()
            .await
            .map_err(|e| ClientError::Protocol(e.to_string()))?;
        Ok(body.queue)
    }

    async fn lower_position(&self, session_id: &str) -> Result<()> {
        let _: serde_json::Value = self
            .post_json("/api/lower-position", &json!({ "session_id": session_id }))
            .await?;
        Ok(())
    }

    async fn submit_check_in(
        &self,
        session_id: &str,
        queue_entry_id: &str,
        response: CheckInValue,
    ) -> Result<()> {
        let _: serde_json::Value = self
            .post_json(
                "/api/check-in-response",
                &json!({
                    "session_id": session_id,
                    "queue_entry_id": queue_entry_id,
                    "response": response.as_str(),
                }),
            )
            .await?;
        Ok(())
    }
}
