// SPDX-License-Identifier: MIT
//! Reconnecting push-subscription primitive.
//!
//! [`WsPushTransport`] owns the WebSocket lifecycle for one subscription:
//! connect, read frames, and on any disconnect retry with exponential
//! backoff (2s doubling to a 60s cap, reset after a successful connect).
//! Consumers see a flat stream of [`TransportEvent`]s and never deal with
//! sockets or retries themselves.
//!
//! The [`PushTransport`] trait exists so the coordination layer can be
//! driven by an in-memory feed in tests.

use std::sync::Arc;
use std::time::Duration;

use futures_util::StreamExt;
use tokio::sync::{mpsc, watch};
use tokio_tungstenite::{connect_async, tungstenite::Message};
use tracing::{debug, info, warn};

use crate::config::ClientConfig;

const INITIAL_BACKOFF_SECS: u64 = 2;
const MAX_BACKOFF_SECS: u64 = 60;
const EVENT_BUFFER: usize = 64;

/// Events surfaced by a push subscription.
#[derive(Debug, Clone)]
pub enum TransportEvent {
    /// The underlying connection is up (fires again after each reconnect).
    Connected,
    /// The underlying connection dropped; the transport is retrying.
    Disconnected,
    /// One raw inbound frame, as text.
    Frame(String),
}

/// Capability to open one push subscription per session.
pub trait PushTransport: Send + Sync {
    /// Open a subscription for `session_id`. Events arrive on the returned
    /// [`Subscription`] until it is closed.
    fn subscribe(&self, session_id: &str) -> Subscription;
}

// ─── Subscription handle ─────────────────────────────────────────────────────

/// Consumer half of a subscription: an event stream plus a stop signal.
pub struct Subscription {
    events: mpsc::Receiver<TransportEvent>,
    stop: watch::Sender<bool>,
}

/// Producer half, held by the transport feeding the subscription.
pub struct SubscriptionProducer {
    pub events: mpsc::Sender<TransportEvent>,
    pub stopped: watch::Receiver<bool>,
}

/// Detached stop handle; closing is idempotent.
pub struct SubscriptionGuard {
    stop: watch::Sender<bool>,
}

impl Subscription {
    /// Create a subscription and the producer half that feeds it.
    pub fn new() -> (Self, SubscriptionProducer) {
        let (events_tx, events_rx) = mpsc::channel(EVENT_BUFFER);
        let (stop_tx, stop_rx) = watch::channel(false);
        (
            Self {
                events: events_rx,
                stop: stop_tx,
            },
            SubscriptionProducer {
                events: events_tx,
                stopped: stop_rx,
            },
        )
    }

    /// Split into the raw event receiver and a detached stop handle.
    pub fn split(self) -> (mpsc::Receiver<TransportEvent>, SubscriptionGuard) {
        (self.events, SubscriptionGuard { stop: self.stop })
    }

    /// Next event, or `None` once the producer is gone.
    pub async fn next_event(&mut self) -> Option<TransportEvent> {
        self.events.recv().await
    }
}

impl SubscriptionGuard {
    /// Signal the transport to stop. Safe to call repeatedly.
    pub fn close(&self) {
        let _ = self.stop.send(true);
    }
}

// ─── WebSocket transport ─────────────────────────────────────────────────────

/// Production transport: one reconnecting WebSocket per subscription.
pub struct WsPushTransport {
    config: Arc<ClientConfig>,
}

impl WsPushTransport {
    pub fn new(config: Arc<ClientConfig>) -> Self {
        Self { config }
    }
}

impl PushTransport for WsPushTransport {
    fn subscribe(&self, session_id: &str) -> Subscription {
        let url = self.config.ws_endpoint(session_id);
        let (subscription, producer) = Subscription::new();
        tokio::spawn(run_subscription(url, producer));
        subscription
    }
}

/// Connect-read-reconnect loop. Ends when the subscription is closed or the
/// consumer drops its receiver.
async fn run_subscription(url: String, mut producer: SubscriptionProducer) {
    let mut backoff_secs = INITIAL_BACKOFF_SECS;

    loop {
        if *producer.stopped.borrow() {
            break;
        }
        info!(url = %url, "push: connecting");

        tokio::select! {
            _ = producer.stopped.changed() => break,
            conn = connect_async(&url) => match conn {
                Ok((ws, _)) => {
                    info!("push: connected");
                    backoff_secs = INITIAL_BACKOFF_SECS;
                    if producer.events.send(TransportEvent::Connected).await.is_err() {
                        break;
                    }
                    let (_sink, mut stream) = ws.split();
                    let open = read_frames(&mut stream, &mut producer).await;
                    if !open
                        || producer
                            .events
                            .send(TransportEvent::Disconnected)
                            .await
                            .is_err()
                    {
                        break;
                    }
                    warn!("push: connection lost");
                }
                Err(e) => {
                    warn!("push: connection failed: {e:#}");
                }
            }
        }

        debug!(delay_secs = backoff_secs, "push: reconnecting after backoff");
        tokio::select! {
            _ = producer.stopped.changed() => break,
            _ = tokio::time::sleep(Duration::from_secs(backoff_secs)) => {}
        }
        backoff_secs = (backoff_secs * 2).min(MAX_BACKOFF_SECS);
    }
}

/// Forward text frames until the socket ends. Returns `false` when the
/// subscription itself should stop (closed, or consumer gone).
async fn read_frames(
    stream: &mut (impl StreamExt<Item = Result<Message, tokio_tungstenite::tungstenite::Error>>
             + Unpin),
    producer: &mut SubscriptionProducer,
) -> bool {
    loop {
        tokio::select! {
            _ = producer.stopped.changed() => return false,
            msg = stream.next() => match msg {
                Some(Ok(Message::Text(text))) => {
                    if producer.events.send(TransportEvent::Frame(text)).await.is_err() {
                        return false;
                    }
                }
                Some(Ok(Message::Close(_))) | None => return true,
                Some(Ok(_)) => {} // ping/pong/binary — nothing to forward
                Some(Err(e)) => {
                    warn!("push: stream error: {e:#}");
                    return true;
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn closed_subscription_stops_producing() {
        let (subscription, producer) = Subscription::new();
        let (mut events, guard) = subscription.split();

        producer
            .events
            .send(TransportEvent::Frame("{}".into()))
            .await
            .unwrap();
        assert!(matches!(
            events.recv().await,
            Some(TransportEvent::Frame(_))
        ));

        guard.close();
        guard.close(); // idempotent
        assert!(*producer.stopped.borrow());
    }
}
