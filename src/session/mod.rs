// SPDX-License-Identifier: MIT
//! Session lifecycle and component sequencing.
//!
//! [`SessionController`] owns the one state machine of the runtime:
//!
//! ```text
//! Created → Chatting → AwaitingCompletion → Queued → Closed
//! ```
//!
//! and the activation order of everything else: starting a session opens the
//! push channel and wires its listeners; completing the assessment activates
//! the queue monitor; closing tears all of it down (poll timer, push
//! subscription, pending check-in deadline). Duplicate transitions are
//! benign races and resolve to no-ops.

pub mod notice;

use std::sync::Arc;
use std::time::Instant;

use tokio::sync::RwLock;
use tracing::{debug, info};

use crate::api::{CheckInValue, TriageApi, TriageOutcome};
use crate::chat::{ChatChannel, ChatMessage};
use crate::checkin::CheckInCoordinator;
use crate::config::ClientConfig;
use crate::error::{ClientError, Result};
use crate::queue::{QueueMonitor, QueueSnapshot};
use crate::realtime::RealtimeChannel;
use notice::{Notice, NoticeHub};

/// Lifecycle state of one session.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Created,
    Chatting,
    AwaitingCompletion,
    Queued,
    Closed,
}

impl std::fmt::Display for SessionState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(match self {
            Self::Created => "created",
            Self::Chatting => "chatting",
            Self::AwaitingCompletion => "awaiting_completion",
            Self::Queued => "queued",
            Self::Closed => "closed",
        })
    }
}

/// Server-issued session identity. Immutable after creation.
#[derive(Debug, Clone)]
pub struct Session {
    pub id: String,
    pub user_id: String,
}

struct Inner {
    state: SessionState,
    session: Option<Session>,
    chat: Option<Arc<ChatChannel>>,
    monitor: Option<Arc<QueueMonitor>>,
    checkin: Option<Arc<CheckInCoordinator>>,
    outcome: Option<TriageOutcome>,
}

/// Owns the session record, its state transitions, and the other four
/// components' activation.
pub struct SessionController {
    api: Arc<dyn TriageApi>,
    realtime: RealtimeChannel,
    config: Arc<ClientConfig>,
    notices: NoticeHub,
    inner: RwLock<Inner>,
}

impl SessionController {
    /// `realtime` is injected (not a shared global) and owned by this
    /// controller for its whole lifecycle.
    pub fn new(
        api: Arc<dyn TriageApi>,
        realtime: RealtimeChannel,
        config: Arc<ClientConfig>,
    ) -> Self {
        Self {
            api,
            realtime,
            config,
            notices: NoticeHub::new(),
            inner: RwLock::new(Inner {
                state: SessionState::Created,
                session: None,
                chat: None,
                monitor: None,
                checkin: None,
                outcome: None,
            }),
        }
    }

    /// Subscribe to presentation-facing notices.
    pub fn notices(&self) -> &NoticeHub {
        &self.notices
    }

    // ─── Lifecycle ───────────────────────────────────────────────────────────

    /// Create the session and enter the chat phase.
    ///
    /// `name`/`phone` are optional; empty strings count as absent. On
    /// transport failure the controller stays in `Created` and `start` may
    /// be retried. A second start is a benign state violation.
    pub async fn start(&self, name: Option<&str>, phone: Option<&str>) -> Result<Session> {
        let mut inner = self.inner.write().await;
        if inner.state != SessionState::Created {
            debug!(state = %inner.state, "session: start ignored");
            return Err(ClientError::State("session already started".into()));
        }

        let name = name.map(str::trim).filter(|s| !s.is_empty());
        let phone = phone.map(str::trim).filter(|s| !s.is_empty());
        let resp = match self.api.start_triage(name, phone).await {
            Ok(resp) => resp,
            Err(e) => {
                // Still `Created`; the caller may retry.
                self.notices.send(Notice::TransportFailure {
                    action: "start",
                    detail: e.to_string(),
                });
                return Err(e);
            }
        };

        let session = Session {
            id: resp.session_id,
            user_id: resp.user_id,
        };
        info!(session_id = %session.id, user_id = %session.user_id, "session started");

        inner.chat = Some(Arc::new(ChatChannel::new(
            Arc::clone(&self.api),
            session.id.clone(),
            resp.message,
        )));
        let monitor = Arc::new(QueueMonitor::new(
            Arc::clone(&self.api),
            session.id.clone(),
            session.user_id.clone(),
            self.config.poll_interval,
            self.notices.clone(),
        ));
        let checkin = Arc::new(CheckInCoordinator::new(
            Arc::clone(&self.api),
            session.id.clone(),
            self.config.check_in_deadline,
            self.config.check_in_dismiss,
            self.notices.clone(),
        ));
        inner.monitor = Some(Arc::clone(&monitor));
        inner.checkin = Some(Arc::clone(&checkin));
        inner.session = Some(session.clone());
        self.set_state(&mut inner, SessionState::Chatting);
        drop(inner);

        self.wire_push_listeners(monitor, checkin);
        self.realtime.connect(&session.id);
        Ok(session)
    }

    /// Send one chat message; requires the chat phase.
    pub async fn send_message(&self, text: &str) -> Result<String> {
        let chat = {
            let inner = self.inner.read().await;
            if inner.state != SessionState::Chatting {
                return Err(ClientError::State(format!(
                    "cannot chat while {}",
                    inner.state
                )));
            }
            inner
                .chat
                .as_ref()
                .map(Arc::clone)
                .ok_or_else(|| ClientError::State("no chat channel".into()))?
        };
        chat.send(text).await
    }

    /// Finalize the assessment and enter the queue.
    ///
    /// Callable by the user or by an automatic sufficiency trigger — either
    /// way only the first call is meaningful; later ones are no-ops. On
    /// failure the session returns to `Chatting` and may be completed again.
    pub async fn complete(&self) -> Result<()> {
        let session_id = {
            let mut inner = self.inner.write().await;
            if inner.state != SessionState::Chatting {
                debug!(state = %inner.state, "session: complete ignored");
                return Ok(());
            }
            let id = match &inner.session {
                Some(s) => s.id.clone(),
                None => return Ok(()),
            };
            self.set_state(&mut inner, SessionState::AwaitingCompletion);
            id
        };

        match self.api.complete_triage(&session_id).await {
            Err(e) => {
                let mut inner = self.inner.write().await;
                if inner.state == SessionState::AwaitingCompletion {
                    self.set_state(&mut inner, SessionState::Chatting);
                }
                self.notices.send(Notice::TransportFailure {
                    action: "complete",
                    detail: e.to_string(),
                });
                Err(e)
            }
            Ok(outcome) => {
                let mut inner = self.inner.write().await;
                if inner.state != SessionState::AwaitingCompletion {
                    // Closed while the result was on the wire.
                    debug!("session: completion result after close — dropped");
                    return Ok(());
                }
                info!(
                    queue_position = outcome.queue_position,
                    emergency = outcome.emergency,
                    "triage complete"
                );
                inner.outcome = Some(outcome.clone());
                self.set_state(&mut inner, SessionState::Queued);
                if let Some(monitor) = &inner.monitor {
                    monitor.activate();
                }
                drop(inner);

                if outcome.emergency {
                    self.notices.send(Notice::EmergencyAlert {
                        care_recommendation: outcome.care_recommendation.clone(),
                    });
                }
                if let Some(warning) = &outcome.misuse_warning {
                    self.notices.send(Notice::MisuseWarning(warning.clone()));
                }
                Ok(())
            }
        }
    }

    /// End the session: stop polling, cancel any pending check-in deadline,
    /// and close the push subscription. Idempotent.
    pub async fn close(&self) {
        let mut inner = self.inner.write().await;
        if inner.state == SessionState::Closed {
            return;
        }
        self.set_state(&mut inner, SessionState::Closed);
        if let Some(monitor) = &inner.monitor {
            monitor.deactivate();
        }
        if let Some(checkin) = &inner.checkin {
            checkin.cancel();
        }
        self.realtime.disconnect();
        info!("session closed");
    }

    // ─── Queue & check-in delegation ─────────────────────────────────────────

    /// Reply to the open check-in prompt. Silent no-op when none is open.
    pub async fn respond_check_in(&self, value: CheckInValue) {
        if let Some(checkin) = &self.inner.read().await.checkin {
            checkin.respond(value);
        }
    }

    /// The currently open check-in prompt, if any.
    pub async fn open_check_in(&self) -> Option<crate::checkin::CheckInRequest> {
        match &self.inner.read().await.checkin {
            Some(checkin) => checkin.open_request(),
            None => None,
        }
    }

    /// Lower this patient's queue position. The caller must have obtained
    /// explicit user confirmation and must not auto-retry a failure.
    pub async fn lower_position(&self) -> Result<()> {
        let monitor = {
            let inner = self.inner.read().await;
            if inner.state != SessionState::Queued {
                return Err(ClientError::State(format!(
                    "cannot lower position while {}",
                    inner.state
                )));
            }
            inner
                .monitor
                .as_ref()
                .map(Arc::clone)
                .ok_or_else(|| ClientError::State("no queue monitor".into()))?
        };
        monitor.lower_position().await
    }

    // ─── Accessors ───────────────────────────────────────────────────────────

    pub async fn state(&self) -> SessionState {
        self.inner.read().await.state
    }

    pub async fn session(&self) -> Option<Session> {
        self.inner.read().await.session.clone()
    }

    pub async fn outcome(&self) -> Option<TriageOutcome> {
        self.inner.read().await.outcome.clone()
    }

    pub async fn chat_log(&self) -> Vec<ChatMessage> {
        match &self.inner.read().await.chat {
            Some(chat) => chat.log().await,
            None => Vec::new(),
        }
    }

    pub async fn queue_snapshot(&self) -> Option<QueueSnapshot> {
        match &self.inner.read().await.monitor {
            Some(monitor) => Some(monitor.snapshot().await),
            None => None,
        }
    }

    pub async fn my_queue_entry(&self) -> Option<crate::api::QueueEntry> {
        match &self.inner.read().await.monitor {
            Some(monitor) => monitor.my_entry().await,
            None => None,
        }
    }

    // ─── Internals ───────────────────────────────────────────────────────────

    fn set_state(&self, inner: &mut Inner, state: SessionState) {
        inner.state = state;
        info!(state = %state, "session state");
        self.notices.send(Notice::StateChanged(state));
    }

    /// Route push events into their consumers. Queue snapshots are stamped
    /// with their receipt time here, before crossing into async, so the
    /// reconciler sees true arrival order.
    fn wire_push_listeners(&self, monitor: Arc<QueueMonitor>, checkin: Arc<CheckInCoordinator>) {
        let notices = self.notices.clone();
        self.realtime
            .on_connection(move |state| notices.send(Notice::Realtime(state)));

        self.realtime.on_queue_update(move |entries| {
            let taken_at = Instant::now();
            let entries = entries.to_vec();
            let monitor = Arc::clone(&monitor);
            tokio::spawn(async move {
                monitor.commit_push(entries, taken_at).await;
            });
        });

        self.realtime.on_check_in(move |event| {
            checkin.deliver(event.queue_entry_id, event.message);
        });
    }
}
