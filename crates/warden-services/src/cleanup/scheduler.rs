use chrono::Utc;
use serde::Serialize;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::mpsc;
use tokio::time::interval;
use uuid::Uuid;
use warden_core::models::{ArtifactRef, CleanupPayload, CleanupPhase, CleanupState, CleanupSubject};
use warden_core::{CleanupSettings, EventSink, LogLevel, SecurityEvent};
use warden_db::{CleanupStateStore, StoreResult};

use super::collaborators::{CleanupDispatcher, DispatchReport, RenditionProbe};

const LOCK_POLL: Duration = Duration::from_millis(20);
const LOCK_LEASE: Duration = Duration::from_secs(30);

/// What a scheduling call did.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum CleanupAction {
    /// Renditions complete; no state kept.
    Cleared,
    /// Waiting for renditions.
    Flagged,
    /// A deletion was dispatched.
    Dispatched,
    /// Deletion stored until renditions finish.
    Deferred,
    /// Renditions still missing; nothing changed.
    Pending,
    /// No state for the artifact.
    NoOp,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct SweepReport {
    pub purged: usize,
    pub dispatched: usize,
}

/// Defers deletion of superseded artifacts until their renditions exist.
///
/// All mutations of one artifact's state run under a lease lock in the state store so
/// that calls racing across processes are linearised.
pub struct CleanupScheduler {
    states: Arc<dyn CleanupStateStore>,
    probe: Arc<dyn RenditionProbe>,
    dispatcher: Arc<dyn CleanupDispatcher>,
    events: Arc<dyn EventSink>,
    lock_timeout: Duration,
    owner: String,
}

impl CleanupScheduler {
    pub fn new(
        states: Arc<dyn CleanupStateStore>,
        probe: Arc<dyn RenditionProbe>,
        dispatcher: Arc<dyn CleanupDispatcher>,
        events: Arc<dyn EventSink>,
        lock_timeout: Duration,
    ) -> Self {
        Self {
            states,
            probe,
            dispatcher,
            events,
            lock_timeout,
            owner: format!("warden-{}", Uuid::new_v4()),
        }
    }

    pub fn from_settings(
        states: Arc<dyn CleanupStateStore>,
        probe: Arc<dyn RenditionProbe>,
        dispatcher: Arc<dyn CleanupDispatcher>,
        events: Arc<dyn EventSink>,
        settings: &CleanupSettings,
    ) -> Self {
        Self::new(states, probe, dispatcher, events, settings.lock_timeout)
    }

    /// Current state-machine phase of an artifact.
    pub async fn phase(&self, artifact_id: Uuid) -> StoreResult<CleanupPhase> {
        Ok(CleanupPhase::of(self.states.load(artifact_id).await?.as_ref()))
    }

    /// Record that `expected` renditions are being produced for a new artifact.
    #[tracing::instrument(skip(self, subject, expected), fields(artifact_id = %subject.artifact.id))]
    pub async fn flag(
        &self,
        subject: &CleanupSubject,
        expected: &[String],
    ) -> StoreResult<CleanupAction> {
        let id = subject.artifact.id;
        let lock = self.acquire(id).await;
        let result = self.flag_locked(subject, expected).await;
        self.release(id, lock).await;
        result
    }

    async fn flag_locked(
        &self,
        subject: &CleanupSubject,
        expected: &[String],
    ) -> StoreResult<CleanupAction> {
        let id = subject.artifact.id;
        let mut state = self
            .states
            .load(id)
            .await?
            .unwrap_or_else(|| CleanupState::for_subject(subject));

        let missing = self
            .probe
            .missing(&subject.artifact.disk, &subject.artifact.path, expected)
            .await;
        if missing.is_empty() {
            state.flagged_at = None;
            state.expected_renditions.clear();
            let dispatched = self.dispatch_stored(&mut state).await;
            self.persist(&state).await?;
            tracing::debug!("Renditions already present, nothing to track");
            return Ok(if dispatched {
                CleanupAction::Dispatched
            } else {
                CleanupAction::Cleared
            });
        }

        state.expected_renditions = expected.to_vec();
        state.flagged_at = Some(Utc::now());
        self.states.save(&state).await?;
        tracing::debug!(missing = ?missing, "Artifact flagged for renditions");
        Ok(CleanupAction::Flagged)
    }

    /// Delete `to_delete` once `subject`'s renditions exist, or now if nothing is pending.
    #[tracing::instrument(skip_all, fields(artifact_id = %subject.artifact.id))]
    pub async fn schedule_cleanup(
        &self,
        subject: &CleanupSubject,
        to_delete: Vec<ArtifactRef>,
        to_preserve: Vec<Uuid>,
        expected: &[String],
    ) -> StoreResult<CleanupAction> {
        let id = subject.artifact.id;
        let lock = self.acquire(id).await;
        let result = self
            .schedule_locked(subject, to_delete, to_preserve, expected)
            .await;
        self.release(id, lock).await;
        result
    }

    async fn schedule_locked(
        &self,
        subject: &CleanupSubject,
        to_delete: Vec<ArtifactRef>,
        to_preserve: Vec<Uuid>,
        expected: &[String],
    ) -> StoreResult<CleanupAction> {
        let id = subject.artifact.id;
        let existing = self.states.load(id).await?;
        let pending_flag = existing.as_ref().is_some_and(|s| s.flagged_at.is_some());
        let missing = self
            .probe
            .missing(&subject.artifact.disk, &subject.artifact.path, expected)
            .await;

        if !pending_flag && missing.is_empty() {
            let mut payload = CleanupPayload::new(Utc::now());
            let mut drained = None;
            if let Some(mut state) = existing {
                if let Some(stored) = state.payload.take() {
                    payload = stored;
                    state.payload_queued_at = None;
                    drained = Some(state);
                }
            }
            payload.merge(to_delete, to_preserve, &[id]);

            let report = self.dispatcher.dispatch(&payload).await;
            self.emit_dispatch(id, &report);
            if let Some(state) = drained {
                self.persist(&state).await?;
            }
            return Ok(CleanupAction::Dispatched);
        }

        let now = Utc::now();
        let mut state = existing.unwrap_or_else(|| CleanupState::for_subject(subject));
        if state.expected_renditions.is_empty() {
            state.expected_renditions = expected.to_vec();
        }
        state
            .payload
            .get_or_insert_with(|| CleanupPayload::new(now))
            .merge(to_delete, to_preserve, &[id]);
        state.payload_queued_at.get_or_insert(now);
        self.states.save(&state).await?;

        tracing::info!(
            pending_flag,
            missing = missing.len(),
            "Cleanup deferred until renditions finish"
        );
        Ok(CleanupAction::Deferred)
    }

    /// Called by the rendition pipeline when a rendition completes or fails for good.
    #[tracing::instrument(skip(self))]
    pub async fn on_rendition_event(&self, artifact_id: Uuid) -> StoreResult<CleanupAction> {
        let lock = self.acquire(artifact_id).await;
        let result = self.rendition_event_locked(artifact_id).await;
        self.release(artifact_id, lock).await;
        result
    }

    async fn rendition_event_locked(&self, artifact_id: Uuid) -> StoreResult<CleanupAction> {
        let Some(mut state) = self.states.load(artifact_id).await? else {
            return Ok(CleanupAction::NoOp);
        };

        let missing = self
            .probe
            .missing(&state.disk, &state.path, &state.expected_renditions)
            .await;
        if !missing.is_empty() {
            tracing::debug!(missing = ?missing, "Renditions still pending");
            return Ok(CleanupAction::Pending);
        }

        state.flagged_at = None;
        state.expected_renditions.clear();
        let dispatched = self.dispatch_stored(&mut state).await;
        self.persist(&state).await?;
        Ok(if dispatched {
            CleanupAction::Dispatched
        } else {
            CleanupAction::Cleared
        })
    }

    /// Purge states older than `max_age`, force-dispatching their payloads.
    pub async fn sweep(&self, max_age: chrono::Duration) -> StoreResult<SweepReport> {
        let cutoff = Utc::now() - max_age;
        let stale = self.states.list_older_than(cutoff).await?;
        let mut report = SweepReport::default();

        for candidate in stale {
            let id = candidate.artifact_id;
            let lock = self.acquire(id).await;
            let result = self.purge_locked(id).await;
            self.release(id, lock).await;

            match result {
                Ok(dispatched) => {
                    report.purged += 1;
                    if dispatched {
                        report.dispatched += 1;
                    }
                }
                Err(e) => {
                    tracing::error!(artifact_id = %id, error = %e, "Failed to purge cleanup state");
                }
            }
        }

        if report.purged > 0 {
            tracing::info!(
                purged = report.purged,
                dispatched = report.dispatched,
                "Cleanup sweep finished"
            );
        }
        Ok(report)
    }

    async fn purge_locked(&self, artifact_id: Uuid) -> StoreResult<bool> {
        let Some(mut state) = self.states.load(artifact_id).await? else {
            return Ok(false);
        };
        let dispatched = self.dispatch_stored(&mut state).await;
        self.states.delete(artifact_id).await?;
        tracing::warn!(artifact_id = %artifact_id, dispatched, "Stale cleanup state purged");
        Ok(dispatched)
    }

    /// Run [`CleanupScheduler::sweep`] every `every` until shut down.
    pub fn start(self: Arc<Self>, every: Duration, max_age: chrono::Duration) -> CleanupWorker {
        let (shutdown_tx, shutdown_rx) = mpsc::channel(1);
        tokio::spawn(async move {
            self.worker_loop(every, max_age, shutdown_rx).await;
        });
        CleanupWorker { shutdown_tx }
    }

    async fn worker_loop(
        &self,
        every: Duration,
        max_age: chrono::Duration,
        mut shutdown_rx: mpsc::Receiver<()>,
    ) {
        let mut ticker = interval(every);
        tracing::info!(
            interval_secs = every.as_secs(),
            max_age_hours = max_age.num_hours(),
            "Cleanup sweep worker started"
        );

        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    if let Err(e) = self.sweep(max_age).await {
                        tracing::error!(error = %e, "Cleanup sweep failed");
                    }
                }
                _ = shutdown_rx.recv() => {
                    tracing::info!("Cleanup sweep worker shutting down");
                    break;
                }
            }
        }
    }

    /// Dispatch and drop a stored payload. Returns whether anything was dispatched.
    async fn dispatch_stored(&self, state: &mut CleanupState) -> bool {
        let Some(payload) = state.payload.take() else {
            return false;
        };
        state.payload_queued_at = None;
        let report = self.dispatcher.dispatch(&payload).await;
        self.emit_dispatch(state.artifact_id, &report);
        true
    }

    /// Save, or delete once nothing is pending.
    async fn persist(&self, state: &CleanupState) -> StoreResult<()> {
        if state.is_empty() {
            self.states.delete(state.artifact_id).await
        } else {
            self.states.save(state).await
        }
    }

    fn emit_dispatch(&self, artifact_id: Uuid, report: &DispatchReport) {
        let level = if report.failed > 0 {
            LogLevel::Error
        } else {
            LogLevel::Info
        };
        self.events.emit(
            SecurityEvent::new("cleanup.dispatched", level, artifact_id.to_string())
                .with("deleted", report.deleted)
                .with("failed", report.failed),
        );
    }

    /// Poll for the artifact lock until the timeout. `None` means the caller proceeds unlocked.
    async fn acquire(&self, artifact_id: Uuid) -> Option<String> {
        let token = format!("{}:{}", self.owner, Uuid::new_v4());
        let deadline = Instant::now() + self.lock_timeout;
        loop {
            match self.states.try_lock(artifact_id, &token, LOCK_LEASE).await {
                Ok(true) => return Some(token),
                Ok(false) => {}
                Err(e) => {
                    tracing::warn!(artifact_id = %artifact_id, error = %e, "Cleanup lock unavailable");
                    break;
                }
            }
            if Instant::now() >= deadline {
                break;
            }
            tokio::time::sleep(LOCK_POLL).await;
        }

        tracing::warn!(
            artifact_id = %artifact_id,
            timeout_ms = self.lock_timeout.as_millis() as u64,
            "Cleanup lock timed out, proceeding without it"
        );
        self.events.emit(
            SecurityEvent::new("cleanup.lock_timeout", LogLevel::Warn, artifact_id.to_string())
                .with("timeout_ms", self.lock_timeout.as_millis() as u64),
        );
        None
    }

    async fn release(&self, artifact_id: Uuid, lock: Option<String>) {
        if let Some(token) = lock {
            if let Err(e) = self.states.unlock(artifact_id, &token).await {
                tracing::warn!(artifact_id = %artifact_id, error = %e, "Failed to release cleanup lock");
            }
        }
    }
}

/// Handle to the background sweep loop.
pub struct CleanupWorker {
    shutdown_tx: mpsc::Sender<()>,
}

impl CleanupWorker {
    pub async fn shutdown(&self) {
        if let Err(e) = self.shutdown_tx.send(()).await {
            tracing::warn!(error = %e, "Failed to send shutdown signal to cleanup worker");
        }
    }
}
