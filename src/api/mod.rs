// SPDX-License-Identifier: MIT
//! Triage service API surface.
//!
//! Wire types for the six HTTP endpoints plus the [`TriageApi`] trait the
//! rest of the runtime is written against. The production implementation
//! lives in [`http`]; tests substitute in-memory fakes.
//!
//! Field names here are the wire contract — snake_case JSON, matching the
//! service exactly.

pub mod http;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::error::Result;

// ─── Wire types ───────────────────────────────────────────────────────────────

/// `POST /api/start-triage` response.
#[derive(Debug, Clone, Deserialize)]
pub struct StartTriageResponse {
    pub session_id: String,
    pub user_id: String,
    /// Assistant greeting used to seed the chat log. Optional on the wire.
    #[serde(default)]
    pub message: Option<String>,
}

/// One entry in the shared queue snapshot.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QueueEntry {
    pub queue_entry_id: String,
    pub user_id: String,
    /// 1-based position; unique and dense within one snapshot.
    pub position: u32,
    /// Severity on the 0–10 scale assigned by the assessment service.
    pub severity_score: f64,
    /// Severity label precomputed by the service ("Critical" … "Low").
    #[serde(default)]
    pub priority_level: Option<String>,
    pub wait_time_minutes: f64,
    #[serde(default)]
    pub created_at: Option<String>,
}

/// Structured assessment inside the completion response.
#[derive(Debug, Clone, Deserialize)]
pub struct TriageAnalysis {
    pub severity_score: f64,
    pub severity_reasoning: String,
    pub home_guidance: String,
    #[serde(default)]
    pub symptoms_summary: Option<String>,
}

/// `POST /api/complete-triage` response. Immutable after receipt.
#[derive(Debug, Clone, Deserialize)]
pub struct TriageOutcome {
    pub triage_result: TriageAnalysis,
    pub queue_position: u32,
    pub emergency: bool,
    pub care_recommendation: String,
    #[serde(default)]
    pub misuse_warning: Option<String>,
}

/// The three possible check-in replies.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum CheckInValue {
    Better,
    Same,
    Worse,
}

impl CheckInValue {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Better => "better",
            Self::Same => "same",
            Self::Worse => "worse",
        }
    }

    /// Parse a user-typed reply. Case-insensitive; `None` for anything else.
    pub fn parse(input: &str) -> Option<Self> {
        match input.trim().to_ascii_lowercase().as_str() {
            "better" => Some(Self::Better),
            "same" => Some(Self::Same),
            "worse" => Some(Self::Worse),
            _ => None,
        }
    }
}

impl std::fmt::Display for CheckInValue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

// ─── Service trait ────────────────────────────────────────────────────────────

/// Request/response client for the triage service.
///
/// Every call is a single attempt: no retries live behind this trait, so
/// callers keep control over idempotency (`lower_position` in particular must
/// not be auto-retried).
#[async_trait]
pub trait TriageApi: Send + Sync {
    /// Begin a triage session. `name`/`phone` are optional patient contact
    /// details; `None` and empty strings are equivalent.
    async fn start_triage(
        &self,
        name: Option<&str>,
        phone: Option<&str>,
    ) -> Result<StartTriageResponse>;

    /// Send one user message; returns the assistant reply text.
    async fn send_message(&self, session_id: &str, content: &str) -> Result<String>;

    /// Finalize the assessment and enter the queue.
    async fn complete_triage(&self, session_id: &str) -> Result<TriageOutcome>;

    /// Fetch the full queue snapshot.
    async fn get_queue(&self) -> Result<Vec<QueueEntry>>;

    /// Voluntarily lower the caller's queue position. Single attempt, not
    /// idempotent across retries.
    async fn lower_position(&self, session_id: &str) -> Result<()>;

    /// Submit the reply to an open check-in.
    async fn submit_check_in(
        &self,
        session_id: &str,
        queue_entry_id: &str,
        response: CheckInValue,
    ) -> Result<()>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn check_in_value_round_trips_through_text() {
        for (value, text) in [
            (CheckInValue::Better, "better"),
            (CheckInValue::Same, "same"),
            (CheckInValue::Worse, "worse"),
        ] {
            assert_eq!(value.as_str(), text);
            assert_eq!(CheckInValue::parse(text), Some(value));
        }
        assert_eq!(CheckInValue::parse("  WORSE "), Some(CheckInValue::Worse));
        assert_eq!(CheckInValue::parse("fine"), None);
    }

    #[test]
    fn check_in_value_serializes_lowercase() {
        assert_eq!(
            serde_json::to_string(&CheckInValue::Worse).unwrap(),
            "\"worse\""
        );
    }

    #[test]
    fn queue_entry_tolerates_missing_optional_fields() {
        let entry: QueueEntry = serde_json::from_str(
            r#"{"queue_entry_id":"q1","user_id":"u1","position":1,
                "severity_score":4.5,"wait_time_minutes":0.0}"#,
        )
        .unwrap();
        assert_eq!(entry.priority_level, None);
        assert_eq!(entry.created_at, None);
    }
}
