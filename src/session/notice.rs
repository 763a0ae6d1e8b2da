// SPDX-License-Identifier: MIT
//! Typed presentation-facing events.
//!
//! Components publish [`Notice`]s through a shared [`NoticeHub`]; the
//! terminal shell (or any other front end) subscribes and renders them.
//! Publishing never blocks and never fails — with no subscribers the
//! notice is simply dropped.

use tokio::sync::broadcast;

use crate::api::CheckInValue;
use crate::realtime::ConnectionState;

use super::SessionState;

const NOTICE_BUFFER: usize = 256;

/// Something the user should (or may) see. Notices carry presentation
/// intent only — none of them feed back into the state machine.
#[derive(Debug, Clone)]
pub enum Notice {
    /// The session moved to a new lifecycle state.
    StateChanged(SessionState),
    /// A remote call failed; the triggering action may be retried.
    TransportFailure {
        action: &'static str,
        detail: String,
    },
    /// The completed assessment was flagged as an emergency. Urgent and
    /// blocking in presentation, carrying the exact recommendation text.
    EmergencyAlert { care_recommendation: String },
    /// The service attached a misuse warning to the assessment.
    MisuseWarning(String),
    /// A check-in prompt opened; a reply is expected within the deadline.
    CheckInOpened { message: String },
    /// A check-in reply was recorded by the service.
    CheckInRecorded { value: CheckInValue },
    /// A failed submission re-opened the prompt for another attempt.
    CheckInReopened,
    /// The check-in prompt dismissed after its confirmation delay.
    CheckInClosed,
    /// The reconciled queue view advanced to a new version.
    QueueUpdated { version: u64 },
    /// Push subscription connectivity transition (observability only).
    Realtime(ConnectionState),
}

/// Broadcast hub for [`Notice`]s.
#[derive(Clone)]
pub struct NoticeHub {
    tx: broadcast::Sender<Notice>,
}

impl Default for NoticeHub {
    fn default() -> Self {
        Self::new()
    }
}

impl NoticeHub {
    pub fn new() -> Self {
        let (tx, _) = broadcast::channel(NOTICE_BUFFER);
        Self { tx }
    }

    /// Publish a notice to all subscribers. No subscribers is fine.
    pub fn send(&self, notice: Notice) {
        let _ = self.tx.send(notice);
    }

    /// Subscribe to all notices from this point on.
    pub fn subscribe(&self) -> broadcast::Receiver<Notice> {
        self.tx.subscribe()
    }
}
