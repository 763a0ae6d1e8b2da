// SPDX-License-Identifier: MIT
//! Assessment conversation channel.
//!
//! Exchanges ordered user/assistant message pairs with the remote service.
//! Stateless beyond the append-only log: messages are appended in send
//! order, never reordered, batched, or mutated. One send at a time — a
//! second send while one is outstanding is refused so the caller can keep
//! input disabled while waiting.
//!
//! On transport failure nothing is retried: the channel appends a
//! locally-synthesized apologetic reply and surfaces the failure; the user
//! must resend.

use std::sync::Arc;

use tokio::sync::{Mutex, RwLock};
use tracing::warn;

use crate::api::TriageApi;
use crate::error::{ClientError, Result};

/// Fallback assistant reply appended when a send fails in transit.
pub const FALLBACK_REPLY: &str =
    "I apologize, I'm having trouble processing that. Please try again.";

/// Greeting used when the service does not provide one at session start.
pub const DEFAULT_GREETING: &str =
    "Welcome to MediQueue. I'm here to help assess your condition. How can I help you today?";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Role {
    User,
    Assistant,
}

/// One message in the conversation log.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChatMessage {
    pub role: Role,
    pub text: String,
}

/// Conversation channel for one session.
pub struct ChatChannel {
    api: Arc<dyn TriageApi>,
    session_id: String,
    log: RwLock<Vec<ChatMessage>>,
    /// Held for the duration of a send; `try_lock` failure means one is
    /// already outstanding.
    sending: Mutex<()>,
}

impl ChatChannel {
    /// Create the channel, seeding the log with the assistant greeting.
    pub fn new(
        api: Arc<dyn TriageApi>,
        session_id: impl Into<String>,
        greeting: Option<String>,
    ) -> Self {
        let greeting = greeting
            .filter(|g| !g.trim().is_empty())
            .unwrap_or_else(|| DEFAULT_GREETING.to_string());
        Self {
            api,
            session_id: session_id.into(),
            log: RwLock::new(vec![ChatMessage {
                role: Role::Assistant,
                text: greeting,
            }]),
            sending: Mutex::new(()),
        }
    }

    /// Send one user message and return the assistant reply.
    ///
    /// Blank input is refused before any network call. While a send is
    /// outstanding a second call returns a benign [`ClientError::State`].
    pub async fn send(&self, text: &str) -> Result<String> {
        let text = text.trim();
        if text.is_empty() {
            return Err(ClientError::Validation("message must not be empty".into()));
        }
        let _guard = self
            .sending
            .try_lock()
            .map_err(|_| ClientError::State("a message send is already outstanding".into()))?;

        self.append(Role::User, text).await;
        match self.api.send_message(&self.session_id, text).await {
            Ok(reply) => {
                self.append(Role::Assistant, &reply).await;
                Ok(reply)
            }
            Err(e) => {
                warn!(err = %e, "chat: send failed");
                self.append(Role::Assistant, FALLBACK_REPLY).await;
                Err(e)
            }
        }
    }

    /// The conversation so far, in send order.
    pub async fn log(&self) -> Vec<ChatMessage> {
        self.log.read().await.clone()
    }

    async fn append(&self, role: Role, text: &str) {
        self.log.write().await.push(ChatMessage {
            role,
            text: text.to_string(),
        });
    }
}
