//! Progress Store: an in-memory, concurrently-accessed snapshot of each
//! running job/export's status, polled by the SSE layer and written to by
//! the orchestrator and export runner.
//!
//! Grounded on the teacher's `DagSummary`/`PhaseResult` shape (phase-keyed
//! progress with a completion percentage) and on `prune_stale_containers`'s
//! age-based sweep for the TTL cleanup task.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use serde::Serialize;
use tokio::sync::Mutex;

use crate::domain::PhaseName;
use crate::errors::StoreError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum SnapshotState {
    #[default]
    Pending,
    Processing,
    Completed,
    Failed,
}

impl SnapshotState {
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Completed | Self::Failed)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PhaseProgress {
    pub status: SnapshotState,
    pub progress: u8,
    pub message: Option<String>,
}

impl PhaseProgress {
    fn pending() -> Self {
        Self {
            status: SnapshotState::Pending,
            progress: 0,
            message: None,
        }
    }
}

/// A point-in-time view of a job or export's progress, the JSON shape
/// served by `/jobs/{id}/progress` and the SSE endpoint.
#[derive(Debug, Clone, Serialize)]
pub struct Snapshot {
    pub job_id: String,
    pub status: SnapshotState,
    pub overall: f64,
    pub phases: BTreeMap<String, PhaseProgress>,
    pub estimated_remaining_seconds: Option<f64>,
    pub error: Option<String>,
    #[serde(skip)]
    started_at: DateTime<Utc>,
    #[serde(skip)]
    updated_at: DateTime<Utc>,
}

/// Structural equality over the publicly-visible fields only: `started_at`
/// and `updated_at` are bookkeeping, not part of the emitted shape, and
/// `updated_at` changes on every write even when nothing visible did.
impl PartialEq for Snapshot {
    fn eq(&self, other: &Self) -> bool {
        self.job_id == other.job_id
            && self.status == other.status
            && self.overall == other.overall
            && self.phases == other.phases
            && self.estimated_remaining_seconds == other.estimated_remaining_seconds
            && self.error == other.error
    }
}

impl Snapshot {
    fn new(key: String, phase_names: &[PhaseName]) -> Self {
        let now = Utc::now();
        Self {
            job_id: key,
            status: SnapshotState::Pending,
            overall: 0.0,
            phases: phase_names
                .iter()
                .map(|p| (p.as_str().to_string(), PhaseProgress::pending()))
                .collect(),
            estimated_remaining_seconds: None,
            error: None,
            started_at: now,
            updated_at: now,
        }
    }

    /// An all-pending snapshot for a job/export that exists but has no
    /// recorded progress (not yet started, or evicted past its TTL).
    pub fn synthetic_pending(key: &str) -> Self {
        Self::new(key.to_string(), &PhaseName::ALL)
    }

    /// `overall` is the equal-weight mean of phase progress, rounded to
    /// two decimals per the fixed-point invariant; `status` is derived
    /// from phase statuses (any failed ⇒ failed; all completed ⇒
    /// completed; all pending ⇒ pending; else processing); and
    /// `estimated_remaining_seconds` is `(elapsed/(overall/100)) -
    /// elapsed` once progress has started.
    fn recompute(&mut self) {
        if self.phases.is_empty() {
            return;
        }
        let total: f64 = self.phases.values().map(|p| p.progress as f64).sum();
        let mean = total / self.phases.len() as f64;
        self.overall = (mean * 100.0).round() / 100.0;
        self.status = derive_status(&self.phases);

        let elapsed = Utc::now()
            .signed_duration_since(self.started_at)
            .num_milliseconds() as f64
            / 1000.0;
        self.estimated_remaining_seconds = if self.overall > 0.0 {
            Some((elapsed / (self.overall / 100.0)) - elapsed)
        } else {
            None
        };
    }
}

fn derive_status(phases: &BTreeMap<String, PhaseProgress>) -> SnapshotState {
    if phases.values().any(|p| p.status == SnapshotState::Failed) {
        SnapshotState::Failed
    } else if phases.values().all(|p| p.status == SnapshotState::Completed) {
        SnapshotState::Completed
    } else if phases.values().all(|p| p.status == SnapshotState::Pending) {
        SnapshotState::Pending
    } else {
        SnapshotState::Processing
    }
}

/// Concurrent keyed store of snapshots. Each value is wrapped in its own
/// `Mutex` so updates to one job never block reads of another.
pub struct ProgressStore {
    snapshots: DashMap<String, Arc<Mutex<Snapshot>>>,
    ttl: Duration,
}

impl ProgressStore {
    pub fn new(ttl: Duration) -> Self {
        Self {
            snapshots: DashMap::new(),
            ttl,
        }
    }

    pub fn init(&self, key: &str, phase_names: &[PhaseName]) {
        self.snapshots
            .insert(key.to_string(), Arc::new(Mutex::new(Snapshot::new(key.to_string(), phase_names))));
    }

    async fn with_snapshot<F>(&self, key: &str, f: F) -> Result<(), StoreError>
    where
        F: FnOnce(&mut Snapshot),
    {
        let entry = self
            .snapshots
            .get(key)
            .ok_or_else(|| StoreError::JobNotFound { id: key.to_string() })?
            .clone();
        let mut snapshot = entry.lock().await;
        f(&mut snapshot);
        snapshot.updated_at = Utc::now();
        Ok(())
    }

    pub async fn update_phase(
        &self,
        key: &str,
        phase: PhaseName,
        status: SnapshotState,
        percent: u8,
        message: Option<String>,
    ) -> Result<(), StoreError> {
        self.with_snapshot(key, |snapshot| {
            if let Some(p) = snapshot.phases.get_mut(phase.as_str()) {
                p.status = status;
                p.progress = percent.min(100);
                p.message = message;
            }
            snapshot.recompute();
        })
        .await
    }

    /// Forces every still-in-flight phase to completed and the job itself
    /// to completed. A phase already terminal (e.g. `failed`) is left as
    /// it is: a job can finish `completed` overall with one analyzer phase
    /// recorded `failed`, per the "completes despite partial failure" job
    /// lifecycle rule — `complete` is an explicit override of the
    /// mid-flight any-phase-failed derivation, not a re-application of it.
    pub async fn complete(&self, key: &str) -> Result<(), StoreError> {
        self.with_snapshot(key, |snapshot| {
            for p in snapshot.phases.values_mut() {
                if !p.status.is_terminal() {
                    p.status = SnapshotState::Completed;
                    p.progress = 100;
                }
            }
            snapshot.status = SnapshotState::Completed;
            snapshot.overall = 100.0;
            snapshot.estimated_remaining_seconds = Some(0.0);
        })
        .await
    }

    pub async fn fail(&self, key: &str, error: impl Into<String>) -> Result<(), StoreError> {
        let error = error.into();
        self.with_snapshot(key, |snapshot| {
            snapshot.status = SnapshotState::Failed;
            snapshot.error = Some(error);
        })
        .await
    }

    pub async fn get(&self, key: &str) -> Option<Snapshot> {
        let entry = self.snapshots.get(key)?.clone();
        let snapshot = entry.lock().await;
        Some(snapshot.clone())
    }

    pub fn delete(&self, key: &str) {
        self.snapshots.remove(key);
    }

    /// Removes terminal snapshots older than the configured TTL. Intended
    /// to run on a periodic `tokio::spawn` loop from `main`, the same
    /// shape as the teacher's container-pruning sweep.
    pub async fn sweep_expired(&self) {
        let now = Utc::now();
        let mut stale = Vec::new();
        for entry in self.snapshots.iter() {
            let snapshot = entry.value().lock().await;
            if snapshot.status.is_terminal() {
                let age = now.signed_duration_since(snapshot.updated_at);
                if age.to_std().unwrap_or_default() > self.ttl {
                    stale.push(entry.key().clone());
                }
            }
        }
        for key in stale {
            self.snapshots.remove(&key);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn init_creates_pending_snapshot_with_zero_progress() {
        let store = ProgressStore::new(Duration::from_secs(60));
        store.init("job-1", &PhaseName::ANALYZER_PHASES);
        let snapshot = store.get("job-1").await.unwrap();
        assert_eq!(snapshot.status, SnapshotState::Pending);
        assert_eq!(snapshot.overall, 0.0);
        assert_eq!(snapshot.phases.len(), 3);
    }

    #[tokio::test]
    async fn overall_percent_is_rounded_mean_of_phases() {
        let store = ProgressStore::new(Duration::from_secs(60));
        store.init("job-1", &PhaseName::ANALYZER_PHASES);
        store
            .update_phase("job-1", PhaseName::Audio, SnapshotState::Completed, 100, None)
            .await
            .unwrap();
        store
            .update_phase("job-1", PhaseName::Ocr, SnapshotState::Processing, 50, None)
            .await
            .unwrap();
        let snapshot = store.get("job-1").await.unwrap();
        assert_eq!(snapshot.overall, 50.0);
        assert_eq!(snapshot.status, SnapshotState::Processing);
    }

    #[tokio::test]
    async fn a_failed_phase_is_distinguishable_from_a_completed_one() {
        let store = ProgressStore::new(Duration::from_secs(60));
        store.init("job-1", &PhaseName::ANALYZER_PHASES);
        store
            .update_phase("job-1", PhaseName::Ocr, SnapshotState::Failed, 100, Some("boom".to_string()))
            .await
            .unwrap();
        let snapshot = store.get("job-1").await.unwrap();
        assert_eq!(snapshot.phases["ocr"].status, SnapshotState::Failed);
        assert_eq!(snapshot.phases["ocr"].message.as_deref(), Some("boom"));
        assert_eq!(snapshot.status, SnapshotState::Failed);
    }

    #[tokio::test]
    async fn estimated_remaining_seconds_is_null_until_progress_starts() {
        let store = ProgressStore::new(Duration::from_secs(60));
        store.init("job-1", &PhaseName::ANALYZER_PHASES);
        let snapshot = store.get("job-1").await.unwrap();
        assert_eq!(snapshot.estimated_remaining_seconds, None);

        store
            .update_phase("job-1", PhaseName::Audio, SnapshotState::Completed, 100, None)
            .await
            .unwrap();
        let snapshot = store.get("job-1").await.unwrap();
        assert!(snapshot.estimated_remaining_seconds.is_some());
    }

    #[tokio::test]
    async fn concurrent_updates_to_distinct_phases_do_not_clobber_each_other() {
        let store = Arc::new(ProgressStore::new(Duration::from_secs(60)));
        store.init("job-1", &PhaseName::ANALYZER_PHASES);
        let s1 = store.clone();
        let s2 = store.clone();
        let s3 = store.clone();
        let (a, b, c) = tokio::join!(
            s1.update_phase("job-1", PhaseName::Audio, SnapshotState::Completed, 100, None),
            s2.update_phase("job-1", PhaseName::Ocr, SnapshotState::Completed, 100, None),
            s3.update_phase("job-1", PhaseName::Video, SnapshotState::Completed, 100, None),
        );
        a.unwrap();
        b.unwrap();
        c.unwrap();
        let snapshot = store.get("job-1").await.unwrap();
        assert_eq!(snapshot.overall, 100.0);
        assert_eq!(snapshot.status, SnapshotState::Completed);
    }

    #[tokio::test]
    async fn fail_sets_terminal_state_and_error_without_clobbering_phases() {
        let store = ProgressStore::new(Duration::from_secs(60));
        store.init("job-1", &PhaseName::ANALYZER_PHASES);
        store
            .update_phase("job-1", PhaseName::Audio, SnapshotState::Completed, 100, None)
            .await
            .unwrap();
        store.fail("job-1", "boom").await.unwrap();
        let snapshot = store.get("job-1").await.unwrap();
        assert_eq!(snapshot.status, SnapshotState::Failed);
        assert_eq!(snapshot.error.as_deref(), Some("boom"));
        assert_eq!(snapshot.phases["audio"].status, SnapshotState::Completed);
    }

    #[tokio::test]
    async fn complete_overrides_job_status_but_preserves_a_failed_phase() {
        let store = ProgressStore::new(Duration::from_secs(60));
        store.init("job-1", &PhaseName::ALL);
        store
            .update_phase("job-1", PhaseName::Ocr, SnapshotState::Failed, 0, Some("boom".to_string()))
            .await
            .unwrap();
        store
            .update_phase("job-1", PhaseName::Audio, SnapshotState::Completed, 100, None)
            .await
            .unwrap();
        store
            .update_phase("job-1", PhaseName::Video, SnapshotState::Completed, 100, None)
            .await
            .unwrap();
        store.complete("job-1").await.unwrap();

        let snapshot = store.get("job-1").await.unwrap();
        assert_eq!(snapshot.status, SnapshotState::Completed);
        assert_eq!(snapshot.phases["ocr"].status, SnapshotState::Failed);
        assert_eq!(snapshot.phases["risk"].status, SnapshotState::Completed);
    }

    #[tokio::test]
    async fn unknown_key_returns_not_found() {
        let store = ProgressStore::new(Duration::from_secs(60));
        let err = store.complete("missing").await.unwrap_err();
        assert!(matches!(err, StoreError::JobNotFound { .. }));
    }

    #[tokio::test]
    async fn sweep_removes_only_expired_terminal_snapshots() {
        let store = ProgressStore::new(Duration::from_secs(0));
        store.init("done", &PhaseName::ANALYZER_PHASES);
        store.complete("done").await.unwrap();
        store.init("running", &PhaseName::ANALYZER_PHASES);
        store.sweep_expired().await;
        assert!(store.get("done").await.is_none());
        assert!(store.get("running").await.is_some());
    }

    #[tokio::test]
    async fn synthetic_pending_snapshot_has_all_four_phases_pending() {
        let snapshot = Snapshot::synthetic_pending("job-1");
        assert_eq!(snapshot.status, SnapshotState::Pending);
        assert_eq!(snapshot.phases.len(), 4);
        assert!(snapshot.phases.values().all(|p| p.status == SnapshotState::Pending));
    }

    #[tokio::test]
    async fn structural_equality_ignores_internal_timestamps() {
        let store = ProgressStore::new(Duration::from_secs(60));
        store.init("job-1", &PhaseName::ANALYZER_PHASES);
        let a = store.get("job-1").await.unwrap();
        tokio::time::sleep(Duration::from_millis(5)).await;
        let b = store.get("job-1").await.unwrap();
        assert_eq!(a, b);
    }
}
