// SPDX-License-Identifier: MIT
//! Typed push-notification channel.
//!
//! One subscription per active session. Inbound frames are JSON with a
//! `type` discriminator; the closed set of frame kinds is the [`PushFrame`]
//! enum, so handlers are exhaustively checked instead of being keyed by
//! open-ended strings. Malformed frames are dropped with a warning and never
//! terminate the subscription.
//!
//! Reconnection belongs to the [`transport`] primitive underneath; this
//! channel only surfaces connect/disconnect transitions for observability.

pub mod transport;

use std::sync::{Arc, Mutex, RwLock};

use serde::Deserialize;
use tokio::task::JoinHandle;
use tracing::{debug, warn};

use crate::api::QueueEntry;
use transport::{PushTransport, SubscriptionGuard, TransportEvent};

// ─── Event types ─────────────────────────────────────────────────────────────

/// Inbound push frame. The `type` field on the wire selects the variant.
#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum PushFrame {
    /// Informational queue snapshot; consumers may commit it directly or
    /// trigger an out-of-band poll.
    QueueUpdate {
        #[serde(default)]
        queue: Vec<QueueEntry>,
    },
    /// Server-initiated check-in prompt.
    CheckIn {
        queue_entry_id: String,
        message: String,
    },
}

/// Payload handed to check-in listeners.
#[derive(Debug, Clone)]
pub struct CheckInEvent {
    pub queue_entry_id: String,
    pub message: String,
}

/// Connection transition, surfaced for observability only.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Connected,
    Disconnected,
}

type QueueUpdateFn = Box<dyn Fn(&[QueueEntry]) + Send + Sync>;
type CheckInFn = Box<dyn Fn(CheckInEvent) + Send + Sync>;
type ConnectionFn = Box<dyn Fn(ConnectionState) + Send + Sync>;

#[derive(Default)]
struct Listeners {
    queue_update: RwLock<Vec<QueueUpdateFn>>,
    check_in: RwLock<Vec<CheckInFn>>,
    connection: RwLock<Vec<ConnectionFn>>,
}

impl Listeners {
    fn dispatch(&self, event: TransportEvent) {
        match event {
            TransportEvent::Connected => self.notify_connection(ConnectionState::Connected),
            TransportEvent::Disconnected => self.notify_connection(ConnectionState::Disconnected),
            TransportEvent::Frame(text) => match serde_json::from_str::<PushFrame>(&text) {
                Ok(PushFrame::QueueUpdate { queue }) => {
                    for listener in self.queue_update.read().unwrap().iter() {
                        listener(&queue);
                    }
                }
                Ok(PushFrame::CheckIn {
                    queue_entry_id,
                    message,
                }) => {
                    for listener in self.check_in.read().unwrap().iter() {
                        listener(CheckInEvent {
                            queue_entry_id: queue_entry_id.clone(),
                            message: message.clone(),
                        });
                    }
                }
                Err(e) => warn!(err = %e, "push: dropping malformed frame"),
            },
        }
    }

    fn notify_connection(&self, state: ConnectionState) {
        for listener in self.connection.read().unwrap().iter() {
            listener(state);
        }
    }
}

// ─── Channel ─────────────────────────────────────────────────────────────────

struct ActiveSubscription {
    guard: SubscriptionGuard,
    reader: JoinHandle<()>,
}

/// Push channel for one session: explicit open/close lifecycle, typed
/// listeners invoked in registration order.
pub struct RealtimeChannel {
    transport: Arc<dyn PushTransport>,
    listeners: Arc<Listeners>,
    active: Mutex<Option<ActiveSubscription>>,
}

impl RealtimeChannel {
    pub fn new(transport: Arc<dyn PushTransport>) -> Self {
        Self {
            transport,
            listeners: Arc::new(Listeners::default()),
            active: Mutex::new(None),
        }
    }

    /// Register a listener for `queue_update` frames.
    pub fn on_queue_update(&self, listener: impl Fn(&[QueueEntry]) + Send + Sync + 'static) {
        self.listeners
            .queue_update
            .write()
            .unwrap()
            .push(Box::new(listener));
    }

    /// Register a listener for `check_in` frames.
    pub fn on_check_in(&self, listener: impl Fn(CheckInEvent) + Send + Sync + 'static) {
        self.listeners
            .check_in
            .write()
            .unwrap()
            .push(Box::new(listener));
    }

    /// Register a listener for connect/disconnect transitions.
    pub fn on_connection(&self, listener: impl Fn(ConnectionState) + Send + Sync + 'static) {
        self.listeners
            .connection
            .write()
            .unwrap()
            .push(Box::new(listener));
    }

    /// Open the subscription for `session_id`. A second call while one is
    /// open is a no-op.
    pub fn connect(&self, session_id: &str) {
        let mut active = self.active.lock().unwrap();
        if active.is_some() {
            debug!("push: already connected — ignoring connect");
            return;
        }
        let subscription = self.transport.subscribe(session_id);
        let (mut events, guard) = subscription.split();
        let listeners = Arc::clone(&self.listeners);
        let reader = tokio::spawn(async move {
            while let Some(event) = events.recv().await {
                listeners.dispatch(event);
            }
        });
        *active = Some(ActiveSubscription { guard, reader });
    }

    /// Close the subscription. Idempotent; safe with none open.
    pub fn disconnect(&self) {
        if let Some(sub) = self.active.lock().unwrap().take() {
            sub.guard.close();
            sub.reader.abort();
            debug!("push: subscription closed");
        }
    }

    pub fn is_connected(&self) -> bool {
        self.active.lock().unwrap().is_some()
    }
}

impl Drop for RealtimeChannel {
    fn drop(&mut self) {
        self.disconnect();
    }
}

#[cfg(test)]
mod tests {
    use super::transport::Subscription;
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use tokio::sync::mpsc;

    /// Transport that hands its producer halves back to the test.
    struct FeedTransport {
        producers: mpsc::UnboundedSender<transport::SubscriptionProducer>,
    }

    impl FeedTransport {
        fn new() -> (Arc<Self>, mpsc::UnboundedReceiver<transport::SubscriptionProducer>) {
            let (tx, rx) = mpsc::unbounded_channel();
            (Arc::new(Self { producers: tx }), rx)
        }
    }

    impl PushTransport for FeedTransport {
        fn subscribe(&self, _session_id: &str) -> Subscription {
            let (subscription, producer) = Subscription::new();
            self.producers.send(producer).unwrap();
            subscription
        }
    }

    #[tokio::test]
    async fn frames_dispatch_to_listeners_in_registration_order() {
        let (transport, mut producers) = FeedTransport::new();
        let channel = RealtimeChannel::new(transport);

        let order = Arc::new(Mutex::new(Vec::new()));
        for tag in ["first", "second"] {
            let order = Arc::clone(&order);
            channel.on_queue_update(move |entries| {
                order.lock().unwrap().push((tag, entries.len()));
            });
        }

        channel.connect("s1");
        let producer = producers.recv().await.unwrap();
        producer
            .events
            .send(TransportEvent::Frame(
                r#"{"type":"queue_update","queue":[]}"#.into(),
            ))
            .await
            .unwrap();

        tokio::task::yield_now().await;
        assert_eq!(
            order.lock().unwrap().clone(),
            vec![("first", 0), ("second", 0)]
        );
    }

    #[tokio::test]
    async fn malformed_frames_are_dropped_without_killing_the_subscription() {
        let (transport, mut producers) = FeedTransport::new();
        let channel = RealtimeChannel::new(transport);

        let seen = Arc::new(AtomicUsize::new(0));
        let seen2 = Arc::clone(&seen);
        channel.on_check_in(move |_| {
            seen2.fetch_add(1, Ordering::SeqCst);
        });

        channel.connect("s1");
        let producer = producers.recv().await.unwrap();
        for frame in [
            "not json at all",
            r#"{"type":"unknown_kind"}"#,
            r#"{"type":"check_in","queue_entry_id":"q1","message":"How are you feeling?"}"#,
        ] {
            producer
                .events
                .send(TransportEvent::Frame(frame.into()))
                .await
                .unwrap();
        }

        tokio::task::yield_now().await;
        assert_eq!(seen.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn connect_is_single_and_disconnect_idempotent() {
        let (transport, mut producers) = FeedTransport::new();
        let channel = RealtimeChannel::new(transport);

        channel.connect("s1");
        channel.connect("s1"); // no second subscription
        assert!(producers.recv().await.is_some());
        assert!(producers.try_recv().is_err());

        assert!(channel.is_connected());
        channel.disconnect();
        assert!(!channel.is_connected());
        channel.disconnect(); // safe with none open
    }
}
