// SPDX-License-Identifier: MIT
//! Queue monitoring and snapshot reconciliation.
//!
//! Two independent producers feed one per-user view: the fixed-cadence poll
//! loop owned by [`QueueMonitor`], and push-delivered `queue_update`
//! snapshots. Both write through the same [`Reconciler`] gate, which stamps
//! every accepted snapshot with a monotonic version and rejects anything
//! older than what it already holds — neither source can overwrite fresher
//! data with stale data. Poll and push are eventually-consistent views with
//! no causal ordering between them.
//!
//! Snapshots are replaced wholesale, never patched. A failed poll keeps the
//! prior snapshot (stale-but-available) until the next success.

use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use tokio::sync::{watch, RwLock};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::api::{QueueEntry, TriageApi};
use crate::error::Result;
use crate::session::notice::{Notice, NoticeHub};

// ─── Severity mapping ────────────────────────────────────────────────────────

/// Fixed-threshold severity bands. The thresholds are part of the observable
/// contract: `≥9 → Critical`, `≥7 → High`, `≥4 → Medium`, else `Low`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SeverityLevel {
    Critical,
    High,
    Medium,
    Low,
}

impl SeverityLevel {
    pub fn from_score(score: f64) -> Self {
        if score >= 9.0 {
            Self::Critical
        } else if score >= 7.0 {
            Self::High
        } else if score >= 4.0 {
            Self::Medium
        } else {
            Self::Low
        }
    }

    /// Display color, hex RGB.
    pub fn color(self) -> &'static str {
        match self {
            Self::Critical => "#dc3545",
            Self::High => "#fd7e14",
            Self::Medium => "#ffc107",
            Self::Low => "#28a745",
        }
    }
}

impl std::fmt::Display for SeverityLevel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(match self {
            Self::Critical => "Critical",
            Self::High => "High",
            Self::Medium => "Medium",
            Self::Low => "Low",
        })
    }
}

// ─── Snapshot & reconciler ───────────────────────────────────────────────────

/// The reconciled queue view. `version` only ever moves forward.
#[derive(Debug, Clone, Default)]
pub struct QueueSnapshot {
    pub entries: Vec<QueueEntry>,
    pub version: u64,
    /// Receipt time of the committed snapshot; `None` until the first commit.
    pub taken_at: Option<Instant>,
}

/// `true` when positions are unique and form a dense `1..=N` ordering.
pub fn positions_are_dense(entries: &[QueueEntry]) -> bool {
    let mut positions: Vec<u32> = entries.iter().map(|e| e.position).collect();
    positions.sort_unstable();
    positions
        .iter()
        .enumerate()
        .all(|(i, &p)| p == (i as u32) + 1)
}

/// Single commit gate both snapshot producers write through.
struct Reconciler {
    view: RwLock<QueueSnapshot>,
    notices: NoticeHub,
}

impl Reconciler {
    fn new(notices: NoticeHub) -> Self {
        Self {
            view: RwLock::new(QueueSnapshot::default()),
            notices,
        }
    }

    /// Replace the view with `entries` stamped at `taken_at`. Rejects
    /// snapshots older than the committed one and returns `false`.
    async fn commit(&self, entries: Vec<QueueEntry>, taken_at: Instant) -> bool {
        let mut view = self.view.write().await;
        if let Some(current) = view.taken_at {
            if taken_at < current {
                debug!(version = view.version, "queue: stale snapshot rejected");
                return false;
            }
        }
        if !positions_are_dense(&entries) {
            // Rendered as-received; the client never repairs server data.
            warn!(count = entries.len(), "queue: snapshot positions are not dense");
        }
        view.entries = entries;
        view.version += 1;
        view.taken_at = Some(taken_at);
        let version = view.version;
        drop(view);
        self.notices.send(Notice::QueueUpdated { version });
        true
    }
}

// ─── Monitor ─────────────────────────────────────────────────────────────────

struct PollTask {
    stop: watch::Sender<bool>,
    handle: JoinHandle<()>,
}

/// Polls the shared queue on a fixed cadence and reconciles both poll and
/// push snapshots into one per-user view.
pub struct QueueMonitor {
    api: Arc<dyn TriageApi>,
    session_id: String,
    user_id: String,
    poll_interval: Duration,
    reconciler: Arc<Reconciler>,
    poll: Mutex<Option<PollTask>>,
}

impl QueueMonitor {
    pub fn new(
        api: Arc<dyn TriageApi>,
        session_id: impl Into<String>,
        user_id: impl Into<String>,
        poll_interval: Duration,
        notices: NoticeHub,
    ) -> Self {
        Self {
            api,
            session_id: session_id.into(),
            user_id: user_id.into(),
            poll_interval,
            reconciler: Arc::new(Reconciler::new(notices)),
            poll: Mutex::new(None),
        }
    }

    /// Start polling: one immediate poll, then the fixed cadence until
    /// [`deactivate`](Self::deactivate). A second activation is a no-op.
    pub fn activate(&self) {
        let mut poll = self.poll.lock().unwrap();
        if poll.is_some() {
            debug!("queue: monitor already active");
            return;
        }
        info!(interval_secs = self.poll_interval.as_secs(), "queue: monitor activated");
        let (stop, mut stopped) = watch::channel(false);
        let api = Arc::clone(&self.api);
        let reconciler = Arc::clone(&self.reconciler);
        let interval = self.poll_interval;
        let handle = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            loop {
                tokio::select! {
                    _ = stopped.changed() => break,
                    _ = ticker.tick() => poll_once(api.as_ref(), &reconciler).await,
                }
            }
        });
        *poll = Some(PollTask { stop, handle });
    }

    /// Stop polling and cancel the pending poll timer. Idempotent.
    pub fn deactivate(&self) {
        if let Some(task) = self.poll.lock().unwrap().take() {
            let _ = task.stop.send(true);
            task.handle.abort();
            info!("queue: monitor deactivated");
        }
    }

    pub fn is_active(&self) -> bool {
        self.poll.lock().unwrap().is_some()
    }

    /// Out-of-band poll, independent of the cadence.
    pub async fn refresh_now(&self) {
        poll_once(self.api.as_ref(), &self.reconciler).await;
    }

    /// Commit a push-delivered snapshot, stamped with its receipt time.
    pub async fn commit_push(&self, entries: Vec<QueueEntry>, taken_at: Instant) {
        self.reconciler.commit(entries, taken_at).await;
    }

    /// Voluntarily move down the queue. The caller must have confirmed the
    /// action with the user; a failure must not be auto-retried (the request
    /// carries no idempotency guarantee). Success triggers an immediate
    /// re-poll so the view reflects the new position.
    pub async fn lower_position(&self) -> Result<()> {
        self.api.lower_position(&self.session_id).await?;
        info!("queue: position lowered");
        self.refresh_now().await;
        Ok(())
    }

    /// Current reconciled snapshot (cloned).
    pub async fn snapshot(&self) -> QueueSnapshot {
        self.reconciler.view.read().await.clone()
    }

    /// This user's entry in the current snapshot, if queued.
    pub async fn my_entry(&self) -> Option<QueueEntry> {
        self.reconciler
            .view
            .read()
            .await
            .entries
            .iter()
            .find(|e| e.user_id == self.user_id)
            .cloned()
    }
}

impl Drop for QueueMonitor {
    fn drop(&mut self) {
        self.deactivate();
    }
}

async fn poll_once(api: &dyn TriageApi, reconciler: &Reconciler) {
    match api.get_queue().await {
        Ok(entries) => {
            reconciler.commit(entries, Instant::now()).await;
        }
        // Prior snapshot stays in place until the next success.
        Err(e) => warn!(err = %e, "queue: poll failed — keeping previous snapshot"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::api::{CheckInValue, StartTriageResponse, TriageOutcome};
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn entry(user: &str, position: u32, severity: f64) -> QueueEntry {
        QueueEntry {
            queue_entry_id: format!("q-{user}"),
            user_id: user.to_string(),
            position,
            severity_score: severity,
            priority_level: None,
            wait_time_minutes: 0.0,
            created_at: None,
        }
    }

    #[test]
    fn severity_thresholds_are_exact_at_boundaries() {
        assert_eq!(SeverityLevel::from_score(9.0), SeverityLevel::Critical);
        assert_eq!(SeverityLevel::from_score(10.0), SeverityLevel::Critical);
        assert_eq!(SeverityLevel::from_score(8.9), SeverityLevel::High);
        assert_eq!(SeverityLevel::from_score(7.0), SeverityLevel::High);
        assert_eq!(SeverityLevel::from_score(6.9), SeverityLevel::Medium);
        assert_eq!(SeverityLevel::from_score(4.0), SeverityLevel::Medium);
        assert_eq!(SeverityLevel::from_score(3.9), SeverityLevel::Low);
        assert_eq!(SeverityLevel::from_score(0.0), SeverityLevel::Low);
    }

    #[test]
    fn severity_labels_and_colors() {
        assert_eq!(SeverityLevel::Critical.to_string(), "Critical");
        assert_eq!(SeverityLevel::Critical.color(), "#dc3545");
        assert_eq!(SeverityLevel::Low.color(), "#28a745");
    }

    #[test]
    fn dense_positions_detected() {
        assert!(positions_are_dense(&[]));
        assert!(positions_are_dense(&[
            entry("a", 2, 5.0),
            entry("b", 1, 6.0),
            entry("c", 3, 1.0),
        ]));
        // Gap.
        assert!(!positions_are_dense(&[entry("a", 1, 5.0), entry("b", 3, 6.0)]));
        // Duplicate.
        assert!(!positions_are_dense(&[entry("a", 1, 5.0), entry("b", 1, 6.0)]));
        // Not starting at 1.
        assert!(!positions_are_dense(&[entry("a", 2, 5.0)]));
    }

    #[tokio::test]
    async fn reconciler_rejects_stale_snapshots() {
        let reconciler = Reconciler::new(NoticeHub::new());
        let earlier = Instant::now();
        let later = earlier + Duration::from_millis(50);

        assert!(reconciler.commit(vec![entry("a", 1, 5.0)], later).await);
        let v1 = reconciler.view.read().await.version;

        // A snapshot captured before the committed one must not win.
        assert!(!reconciler.commit(vec![], earlier).await);
        let view = reconciler.view.read().await;
        assert_eq!(view.version, v1);
        assert_eq!(view.entries.len(), 1);
    }

    #[tokio::test]
    async fn reconciler_versions_are_monotonic_and_announced() {
        let notices = NoticeHub::new();
        let mut rx = notices.subscribe();
        let reconciler = Reconciler::new(notices);

        let t0 = Instant::now();
        assert!(reconciler.commit(vec![], t0).await);
        assert!(reconciler.commit(vec![entry("a", 1, 2.0)], t0 + Duration::from_millis(1)).await);

        assert!(matches!(rx.recv().await, Ok(Notice::QueueUpdated { version: 1 })));
        assert!(matches!(rx.recv().await, Ok(Notice::QueueUpdated { version: 2 })));
    }

    // ── Poll loop ────────────────────────────────────────────────────────────

    /// Queue-only fake: scripted `get_queue` results, counted calls.
    struct ScriptedQueueApi {
        calls: AtomicUsize,
        script: Vec<Result<Vec<QueueEntry>>>,
    }

    impl ScriptedQueueApi {
        fn new(script: Vec<Result<Vec<QueueEntry>>>) -> Arc<Self> {
            Arc::new(Self {
                calls: AtomicUsize::new(0),
                script,
            })
        }
    }

    #[async_trait]
    impl TriageApi for ScriptedQueueApi {
        async fn start_triage(
            &self,
            _name: Option<&str>,
            _phone: Option<&str>,
        ) -> Result<StartTriageResponse> {
            unimplemented!("not used by queue tests")
        }

        async fn send_message(&self, _session_id: &str, _content: &str) -> Result<String> {
            unimplemented!("not used by queue tests")
        }

        async fn complete_triage(&self, _session_id: &str) -> Result<TriageOutcome> {
            unimplemented!("not used by queue tests")
        }

        async fn get_queue(&self) -> Result<Vec<QueueEntry>> {
            let n = self.calls.fetch_add(1, Ordering::SeqCst);
            match self.script.get(n.min(self.script.len() - 1)).unwrap() {
                Ok(entries) => Ok(entries.clone()),
                Err(_) => Err(crate::error::ClientError::Transport("poll failed".into())),
            }
        }

        async fn lower_position(&self, _session_id: &str) -> Result<()> {
            Ok(())
        }

        async fn submit_check_in(
            &self,
            _session_id: &str,
            _queue_entry_id: &str,
            _response: CheckInValue,
        ) -> Result<()> {
            unimplemented!("not used by queue tests")
        }
    }

    fn monitor_over(api: Arc<ScriptedQueueApi>) -> QueueMonitor {
        QueueMonitor::new(
            api,
            "s1",
            "u1",
            Duration::from_secs(5),
            NoticeHub::new(),
        )
    }

    #[tokio::test(start_paused = true)]
    async fn activation_polls_immediately_then_on_cadence() {
        let api = ScriptedQueueApi::new(vec![Ok(vec![entry("u1", 3, 4.5)])]);
        let monitor = monitor_over(Arc::clone(&api));

        monitor.activate();
        tokio::time::sleep(Duration::from_millis(10)).await;
        assert_eq!(api.calls.load(Ordering::SeqCst), 1);
        assert_eq!(monitor.my_entry().await.unwrap().position, 3);

        tokio::time::sleep(Duration::from_secs(5)).await;
        assert_eq!(api.calls.load(Ordering::SeqCst), 2);

        monitor.deactivate();
        tokio::time::sleep(Duration::from_secs(30)).await;
        assert_eq!(api.calls.load(Ordering::SeqCst), 2);
        assert!(!monitor.is_active());
    }

    #[tokio::test(start_paused = true)]
    async fn failed_poll_keeps_previous_snapshot() {
        let api = ScriptedQueueApi::new(vec![
            Ok(vec![entry("u1", 2, 6.0)]),
            Err(crate::error::ClientError::Transport("down".into())),
        ]);
        let monitor = monitor_over(Arc::clone(&api));

        monitor.activate();
        tokio::time::sleep(Duration::from_millis(10)).await;
        let first = monitor.snapshot().await;
        assert_eq!(first.version, 1);

        tokio::time::sleep(Duration::from_secs(5)).await;
        assert_eq!(api.calls.load(Ordering::SeqCst), 2);
        let second = monitor.snapshot().await;
        assert_eq!(second.version, 1, "failed poll must not bump the view");
        assert_eq!(second.entries, first.entries);

        monitor.deactivate();
    }

    mod properties {
        use super::*;
        use proptest::prelude::*;

        fn rank(level: SeverityLevel) -> u8 {
            match level {
                SeverityLevel::Low => 0,
                SeverityLevel::Medium => 1,
                SeverityLevel::High => 2,
                SeverityLevel::Critical => 3,
            }
        }

        proptest! {
            #[test]
            fn severity_mapping_is_monotonic(a in 0.0f64..=10.0, b in 0.0f64..=10.0) {
                if a >= b {
                    prop_assert!(
                        rank(SeverityLevel::from_score(a)) >= rank(SeverityLevel::from_score(b))
                    );
                }
            }

            #[test]
            fn any_permutation_of_a_dense_queue_is_dense(
                positions in (1usize..20).prop_flat_map(|n| {
                    Just((1..=n as u32).collect::<Vec<_>>()).prop_shuffle()
                })
            ) {
                let entries: Vec<QueueEntry> = positions
                    .iter()
                    .enumerate()
                    .map(|(i, &p)| entry(&format!("u{i}"), p, 5.0))
                    .collect();
                prop_assert!(positions_are_dense(&entries));

                // Bumping any one position off its slot breaks density.
                let mut broken = entries;
                broken[0].position += positions.len() as u32;
                prop_assert!(!positions_are_dense(&broken));
            }
        }
    }

    #[tokio::test]
    async fn lower_position_triggers_immediate_repoll() {
        let api = ScriptedQueueApi::new(vec![Ok(vec![entry("u1", 5, 3.0)])]);
        let monitor = monitor_over(Arc::clone(&api));

        monitor.lower_position().await.unwrap();
        assert_eq!(api.calls.load(Ordering::SeqCst), 1, "re-poll after success");
        assert_eq!(monitor.snapshot().await.version, 1);
    }
}
