// SPDX-License-Identifier: MIT
//! Check-in escalation protocol.
//!
//! A push-delivered check-in opens a bounded decision window:
//! `Open → (user reply OR deadline) → Submitting → (ack) → Closed`, with
//! `Submitting → (failure) → Open` re-arming a fresh deadline.
//!
//! One task owns each request. It races the 5-minute deadline against the
//! user-reply channel in a single `select!`, so exactly one resolution wins
//! and the loser is discarded — there is no flag-based best-effort guard to
//! get wrong. Replies that arrive while a submission is in flight are
//! drained and dropped; at most one outbound submission call exists per
//! request, and none after it closes.
//!
//! At most one request is open per session; a new one arriving while the
//! current one is unresolved is ignored.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use chrono::{DateTime, Utc};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::api::{CheckInValue, TriageApi};
use crate::session::notice::{Notice, NoticeHub};

/// An open check-in prompt.
#[derive(Debug, Clone)]
pub struct CheckInRequest {
    pub queue_entry_id: String,
    pub message: String,
    pub delivered_at: DateTime<Utc>,
}

struct ActiveCheckIn {
    request: CheckInRequest,
    replies: mpsc::UnboundedSender<CheckInValue>,
    task: JoinHandle<()>,
}

/// Coordinates at most one in-flight check-in request/reply pair.
pub struct CheckInCoordinator {
    api: Arc<dyn TriageApi>,
    session_id: String,
    notices: NoticeHub,
    deadline: Duration,
    dismiss_delay: Duration,
    active: Arc<Mutex<Option<ActiveCheckIn>>>,
    closed: AtomicBool,
}

impl CheckInCoordinator {
    pub fn new(
        api: Arc<dyn TriageApi>,
        session_id: impl Into<String>,
        deadline: Duration,
        dismiss_delay: Duration,
        notices: NoticeHub,
    ) -> Self {
        Self {
            api,
            session_id: session_id.into(),
            notices,
            deadline,
            dismiss_delay,
            active: Arc::new(Mutex::new(None)),
            closed: AtomicBool::new(false),
        }
    }

    /// Accept a push-delivered check-in. Returns `false` (and does nothing)
    /// when one is already unresolved or the coordinator is shut down.
    pub fn deliver(&self, queue_entry_id: impl Into<String>, message: impl Into<String>) -> bool {
        if self.closed.load(Ordering::SeqCst) {
            debug!("check-in: coordinator closed — ignoring request");
            return false;
        }
        let mut active = self.active.lock().unwrap();
        if active.is_some() {
            debug!("check-in: request ignored — one already open");
            return false;
        }

        let request = CheckInRequest {
            queue_entry_id: queue_entry_id.into(),
            message: message.into(),
            delivered_at: Utc::now(),
        };
        info!(queue_entry_id = %request.queue_entry_id, "check-in: opened");

        let (replies_tx, replies_rx) = mpsc::unbounded_channel();
        let task = tokio::spawn(run_request(
            Arc::clone(&self.api),
            self.session_id.clone(),
            request.clone(),
            replies_rx,
            self.notices.clone(),
            self.deadline,
            self.dismiss_delay,
            Arc::clone(&self.active),
        ));

        let message = request.message.clone();
        *active = Some(ActiveCheckIn {
            request,
            replies: replies_tx,
            task,
        });
        drop(active);
        self.notices.send(Notice::CheckInOpened { message });
        true
    }

    /// Record the user's reply. Against no open request (or one that already
    /// resolved) this is a silent no-op.
    pub fn respond(&self, value: CheckInValue) {
        match &*self.active.lock().unwrap() {
            Some(open) => {
                let _ = open.replies.send(value);
            }
            None => debug!(value = %value, "check-in: reply ignored — nothing open"),
        }
    }

    /// The currently open request, if any.
    pub fn open_request(&self) -> Option<CheckInRequest> {
        self.active.lock().unwrap().as_ref().map(|a| a.request.clone())
    }

    /// Shut down: abort any pending deadline and refuse future requests.
    /// Idempotent.
    pub fn cancel(&self) {
        self.closed.store(true, Ordering::SeqCst);
        if let Some(open) = self.active.lock().unwrap().take() {
            open.task.abort();
            debug!("check-in: pending request cancelled");
        }
    }
}

impl Drop for CheckInCoordinator {
    fn drop(&mut self) {
        self.cancel();
    }
}

/// Owns one request from open to close.
#[allow(clippy::too_many_arguments)]
async fn run_request(
    api: Arc<dyn TriageApi>,
    session_id: String,
    request: CheckInRequest,
    mut replies: mpsc::UnboundedReceiver<CheckInValue>,
    notices: NoticeHub,
    deadline: Duration,
    dismiss_delay: Duration,
    active: Arc<Mutex<Option<ActiveCheckIn>>>,
) {
    loop {
        // Open: a fresh deadline races the user's reply. First wins.
        let value = tokio::select! {
            reply = replies.recv() => match reply {
                Some(v) => v,
                None => return, // coordinator dropped
            },
            _ = tokio::time::sleep(deadline) => {
                info!(queue_entry_id = %request.queue_entry_id,
                      "check-in: deadline elapsed — submitting default reply");
                CheckInValue::Same
            }
        };

        // Submitting: replies arriving now are not read, so no second
        // submission can start while this one is in flight.
        match api
            .submit_check_in(&session_id, &request.queue_entry_id, value)
            .await
        {
            Ok(()) => {
                info!(value = %value, "check-in: reply recorded");
                notices.send(Notice::CheckInRecorded { value });
                tokio::time::sleep(dismiss_delay).await;
                notices.send(Notice::CheckInClosed);
                break;
            }
            Err(e) => {
                warn!(err = %e, "check-in: submission failed — reopening");
                notices.send(Notice::TransportFailure {
                    action: "check-in",
                    detail: e.to_string(),
                });
                // Drop replies raced against the failed submission; the user
                // re-decides with full interactivity and a fresh deadline.
                while replies.try_recv().is_ok() {}
                notices.send(Notice::CheckInReopened);
            }
        }
    }
    active.lock().unwrap().take();
}
