// SPDX-License-Identifier: MIT
//! Client configuration.
//!
//! Priority: CLI / env var  >  `config.toml`  >  built-in default.
//! All timing knobs are part of the protocol contract (poll cadence,
//! check-in deadline, dismissal delay) and default to the service's
//! documented values; the file exists mostly to repoint URLs at a
//! non-default deployment.

use serde::Deserialize;
use std::path::Path;
use std::time::Duration;
use tracing::error;

const DEFAULT_API_URL: &str = "http://localhost:8000";
const DEFAULT_POLL_INTERVAL_SECS: u64 = 5;
const DEFAULT_CHECK_IN_DEADLINE_SECS: u64 = 5 * 60;
const DEFAULT_CHECK_IN_DISMISS_MILLIS: u64 = 1000;

/// Resolved runtime configuration.
#[derive(Debug, Clone)]
pub struct ClientConfig {
    /// Base URL of the triage service HTTP API.
    pub api_url: String,
    /// Explicit WebSocket endpoint override. When `None`, the push URL is
    /// derived from `api_url` (`http → ws`) as `{base}/ws/{session_id}`.
    pub ws_url: Option<String>,
    /// Queue poll cadence. Default: 5 s.
    pub poll_interval: Duration,
    /// Check-in response window. Default: 5 min.
    pub check_in_deadline: Duration,
    /// Delay between a recorded check-in and prompt dismissal. Default: 1 s.
    pub check_in_dismiss: Duration,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            api_url: DEFAULT_API_URL.to_string(),
            ws_url: None,
            poll_interval: Duration::from_secs(DEFAULT_POLL_INTERVAL_SECS),
            check_in_deadline: Duration::from_secs(DEFAULT_CHECK_IN_DEADLINE_SECS),
            check_in_dismiss: Duration::from_millis(DEFAULT_CHECK_IN_DISMISS_MILLIS),
        }
    }
}

impl ClientConfig {
    /// Load configuration, merging an optional `config.toml` over defaults.
    ///
    /// A missing file is not an error; a malformed file is logged and
    /// ignored, leaving the defaults in place.
    pub fn load(path: Option<&Path>) -> Self {
        let mut config = Self::default();
        if let Some(file) = path.and_then(load_toml) {
            config.apply(file);
        }
        config
    }

    fn apply(&mut self, file: TomlConfig) {
        if let Some(url) = file.api_url {
            self.api_url = url;
        }
        if file.ws_url.is_some() {
            self.ws_url = file.ws_url;
        }
        if let Some(secs) = file.poll_interval_secs {
            self.poll_interval = Duration::from_secs(secs.max(1));
        }
        if let Some(secs) = file.check_in_deadline_secs {
            self.check_in_deadline = Duration::from_secs(secs.max(1));
        }
        if let Some(ms) = file.check_in_dismiss_millis {
            self.check_in_dismiss = Duration::from_millis(ms);
        }
    }

    /// Push subscription endpoint for a session.
    pub fn ws_endpoint(&self, session_id: &str) -> String {
        match &self.ws_url {
            Some(url) => format!("{}/{session_id}", url.trim_end_matches('/')),
            None => {
                let base = self
                    .api_url
                    .replacen("https://", "wss://", 1)
                    .replacen("http://", "ws://", 1);
                format!("{}/ws/{session_id}", base.trim_end_matches('/'))
            }
        }
    }
}

/// `config.toml` — all fields are optional overrides.
#[derive(Debug, Deserialize, Default)]
struct TomlConfig {
    /// Base URL of the triage service (default: http://localhost:8000).
    api_url: Option<String>,
    /// Explicit WebSocket endpoint; the session id is appended.
    ws_url: Option<String>,
    /// Queue poll cadence in seconds (default: 5).
    poll_interval_secs: Option<u64>,
    /// Check-in response window in seconds (default: 300).
    check_in_deadline_secs: Option<u64>,
    /// Check-in dismissal delay in milliseconds (default: 1000).
    check_in_dismiss_millis: Option<u64>,
}

fn load_toml(path: &Path) -> Option<TomlConfig> {
    let contents = std::fs::read_to_string(path).ok()?;
    match toml::from_str::<TomlConfig>(&contents) {
        Ok(cfg) => Some(cfg),
        Err(e) => {
            error!(path = %path.display(), err = %e, "failed to parse config.toml — using defaults");
            None
        }
    }
}
