//! Analysis Orchestrator: runs the three analyzer phases (audio, OCR,
//! video) concurrently, bounded by a shared worker-pool semaphore, then
//! fuses their findings into a risk assessment and persists it.
//!
//! The semaphore-bounded fan-out plus `mpsc` result collection is the same
//! shape as the pack's DAG executor; the `join_all`-based parallel
//! dispatch (for the three phases of a single job, which always run
//! together) follows the review dispatcher's parallel-specialist path.

use std::path::PathBuf;
use std::sync::Arc;

use tokio::sync::{Semaphore, mpsc};
use tracing::{error, info, warn};

use crate::analysis::{PerceptualAnalyzer, PhaseFindings, RiskReasoner};
use crate::blobstore::BlobStore;
use crate::domain::{JobStatus, PhaseName, RiskItem};
use crate::errors::PipelineError;
use crate::progress::{ProgressStore, SnapshotState};
use crate::store::JobStore;

pub struct AnalysisOrchestrator {
    store: JobStore,
    progress: Arc<ProgressStore>,
    blobs: Arc<dyn BlobStore>,
    analyzers: Vec<Arc<dyn PerceptualAnalyzer>>,
    reasoner: Arc<dyn RiskReasoner>,
    /// Bounds how many analyzer subprocesses run at once across all jobs,
    /// not just within a single job's three-phase fan-out.
    worker_pool: Arc<Semaphore>,
}

impl AnalysisOrchestrator {
    pub fn new(
        store: JobStore,
        progress: Arc<ProgressStore>,
        blobs: Arc<dyn BlobStore>,
        analyzers: Vec<Arc<dyn PerceptualAnalyzer>>,
        reasoner: Arc<dyn RiskReasoner>,
        max_parallel: usize,
    ) -> Self {
        Self {
            store,
            progress,
            blobs,
            analyzers,
            reasoner,
            worker_pool: Arc::new(Semaphore::new(max_parallel)),
        }
    }

    /// Drives one analysis job from `pending` to a terminal status. Called
    /// by the task queue's worker loop; never panics on phase failure, only
    /// on a store error that leaves no way to record the outcome.
    pub async fn run_job(&self, job_id: &str) {
        if let Err(e) = self.try_run_job(job_id).await {
            error!(job_id, error = %e, "analysis job failed");
            let _ = self
                .store
                .finalize_job(
                    job_id.to_string(),
                    JobStatus::Failed,
                    None,
                    None,
                    Some(e.to_string()),
                )
                .await;
            let _ = self.progress.fail(job_id, e.to_string()).await;
        }
    }

    async fn try_run_job(&self, job_id: &str) -> Result<(), PipelineError> {
        let job = self
            .store
            .get_job(job_id.to_string())
            .await
            .map_err(PipelineError::Other)?
            .ok_or_else(|| PipelineError::AnalyzerFailed {
                phase: "lookup".to_string(),
                message: format!("job {job_id} not found"),
            })?;

        let video = self
            .store
            .get_video(job.video_id.clone())
            .await
            .map_err(PipelineError::Other)?
            .ok_or_else(|| PipelineError::AnalyzerFailed {
                phase: "lookup".to_string(),
                message: format!("video {} not found", job.video_id),
            })?;

        self.store
            .mark_job_processing(job_id.to_string())
            .await
            .map_err(PipelineError::Other)?;
        self.progress.init(job_id, &PhaseName::ALL);

        let video_path = PathBuf::from(&video.blob_path);
        let findings = self.run_analyzer_phases(job_id, &video_path).await?;

        if findings.is_empty() {
            return Err(PipelineError::AllPhasesFailed {
                job_id: job_id.to_string(),
            });
        }

        let assessment = self.reasoner.evaluate(&findings).await;
        self.progress
            .update_phase(job_id, PhaseName::Risk, SnapshotState::Completed, 100, None)
            .await
            .ok();

        let risk_items: Vec<RiskItem> = assessment
            .findings
            .iter()
            .map(|f| RiskItem {
                id: uuid::Uuid::new_v4().to_string(),
                job_id: job_id.to_string(),
                start_sec: f.start_sec,
                end_sec: f.end_sec,
                category: f.category,
                subcategory: f.subcategory.clone(),
                score: f.score,
                level: f.level,
                rationale: f.rationale.clone(),
                source: f.source,
                evidence: f.evidence.clone(),
            })
            .collect();

        // Delete-then-insert keeps retried deliveries of the same job
        // idempotent: a second run replaces rather than duplicates.
        self.store
            .replace_risk_items(job_id.to_string(), risk_items)
            .await
            .map_err(PipelineError::Other)?;

        self.store
            .finalize_job(
                job_id.to_string(),
                JobStatus::Completed,
                Some(assessment.overall_score),
                Some(assessment.overall_level),
                None,
            )
            .await
            .map_err(PipelineError::Other)?;

        self.progress.complete(job_id).await.ok();
        info!(job_id, score = assessment.overall_score, "analysis job completed");
        Ok(())
    }

    /// Fans the three analyzer phases out concurrently, bounded by the
    /// shared worker pool. A phase that errors is logged and dropped
    /// rather than failing the whole job, so long as at least one phase
    /// produced findings.
    async fn run_analyzer_phases(&self, job_id: &str, video_path: &PathBuf) -> Result<Vec<PhaseFindings>, PipelineError> {
        let (tx, mut rx) = mpsc::channel(self.analyzers.len().max(1));

        for analyzer in &self.analyzers {
            let permit = self.worker_pool.clone().acquire_owned().await.map_err(|_| {
                PipelineError::AnalyzerFailed {
                    phase: "scheduling".to_string(),
                    message: "worker pool closed".to_string(),
                }
            })?;
            let analyzer = analyzer.clone();
            let tx = tx.clone();
            let video_path = video_path.clone();
            let progress = self.progress.clone();
            let job_id = job_id.to_string();
            tokio::spawn(async move {
                let _permit = permit;
                let phase = analyzer.phase();
                progress
                    .update_phase(&job_id, phase, SnapshotState::Processing, 10, None)
                    .await
                    .ok();
                let result = analyzer.analyze(&video_path).await;
                match &result {
                    Ok(_) => {
                        progress
                            .update_phase(&job_id, phase, SnapshotState::Completed, 100, None)
                            .await
                            .ok();
                    }
                    Err(e) => {
                        warn!(job_id, phase = phase.as_str(), error = %e, "analyzer phase failed");
                        progress
                            .update_phase(&job_id, phase, SnapshotState::Failed, 100, Some(e.to_string()))
                            .await
                            .ok();
                    }
                }
                let _ = tx.send(result).await;
            });
        }
        drop(tx);

        let mut findings = Vec::new();
        while let Some(result) = rx.recv().await {
            if let Ok(phase_findings) = result {
                findings.push(phase_findings);
            }
        }
        Ok(findings)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::analysis::{NullAnalyzer, NullReasoner, RiskAssessment, RiskFinding};
    use crate::blobstore::FilesystemBlobStore;
    use crate::domain::{JobMetadata, RiskCategory, RiskLevel, RiskSource};
    use crate::store::db::Db;
    use async_trait::async_trait;
    use std::time::Duration;

    struct AlwaysFailAnalyzer(PhaseName);

    #[async_trait]
    impl PerceptualAnalyzer for AlwaysFailAnalyzer {
        fn phase(&self) -> PhaseName {
            self.0
        }
        async fn analyze(&self, _video_path: &std::path::Path) -> Result<PhaseFindings, PipelineError> {
            Err(PipelineError::AnalyzerFailed {
                phase: self.0.as_str().to_string(),
                message: "boom".to_string(),
            })
        }
    }

    struct FixedReasoner;

    #[async_trait]
    impl RiskReasoner for FixedReasoner {
        async fn evaluate(&self, _findings: &[PhaseFindings]) -> RiskAssessment {
            RiskAssessment {
                findings: vec![RiskFinding {
                    start_sec: 0.0,
                    end_sec: 1.0,
                    category: RiskCategory::Misleading,
                    subcategory: "claim".into(),
                    score: 80.0,
                    level: RiskLevel::High,
                    rationale: "test".into(),
                    source: RiskSource::Audio,
                    evidence: "e".into(),
                }],
                overall_score: 80.0,
                overall_level: RiskLevel::High,
            }
        }
    }

    async fn setup() -> (AnalysisOrchestrator, JobStore, String) {
        let store = JobStore::new(Db::new_in_memory().unwrap());
        let video = store.create_video("v.mp4".into(), "v.mp4".into(), 10).await.unwrap();
        let job = store
            .create_analysis_job(
                video.id,
                JobMetadata {
                    purpose: "ad".into(),
                    platform: "tiktok".into(),
                    target_audience: "teens".into(),
                },
            )
            .await
            .unwrap();
        let progress = Arc::new(ProgressStore::new(Duration::from_secs(3600)));
        let dir = tempfile::tempdir().unwrap();
        let blobs: Arc<dyn BlobStore> = Arc::new(FilesystemBlobStore::new(dir.path().to_path_buf()));
        let analyzers: Vec<Arc<dyn PerceptualAnalyzer>> = vec![
            Arc::new(NullAnalyzer::new(PhaseName::Audio)),
            Arc::new(NullAnalyzer::new(PhaseName::Ocr)),
            Arc::new(NullAnalyzer::new(PhaseName::Video)),
        ];
        let orchestrator = AnalysisOrchestrator::new(
            store.clone(),
            progress,
            blobs,
            analyzers,
            Arc::new(FixedReasoner),
            3,
        );
        (orchestrator, store, job.id)
    }

    #[tokio::test]
    async fn successful_job_persists_risk_items_and_completes() {
        let (orchestrator, store, job_id) = setup().await;
        orchestrator.run_job(&job_id).await;
        let job = store.get_job(job_id.clone()).await.unwrap().unwrap();
        assert_eq!(job.status, JobStatus::Completed);
        assert_eq!(job.risk_level, Some(RiskLevel::High));
        let items = store.list_risk_items(job_id).await.unwrap();
        assert_eq!(items.len(), 1);
    }

    #[tokio::test]
    async fn all_phases_failing_marks_job_failed() {
        let store = JobStore::new(Db::new_in_memory().unwrap());
        let video = store.create_video("v.mp4".into(), "v.mp4".into(), 10).await.unwrap();
        let job = store
            .create_analysis_job(
                video.id,
                JobMetadata {
                    purpose: "ad".into(),
                    platform: "tiktok".into(),
                    target_audience: "teens".into(),
                },
            )
            .await
            .unwrap();
        let progress = Arc::new(ProgressStore::new(Duration::from_secs(3600)));
        let dir = tempfile::tempdir().unwrap();
        let blobs: Arc<dyn BlobStore> = Arc::new(FilesystemBlobStore::new(dir.path().to_path_buf()));
        let analyzers: Vec<Arc<dyn PerceptualAnalyzer>> = vec![
            Arc::new(AlwaysFailAnalyzer(PhaseName::Audio)),
            Arc::new(AlwaysFailAnalyzer(PhaseName::Ocr)),
            Arc::new(AlwaysFailAnalyzer(PhaseName::Video)),
        ];
        let orchestrator = AnalysisOrchestrator::new(store.clone(), progress, blobs, analyzers, Arc::new(NullReasoner), 3);
        orchestrator.run_job(&job.id).await;
        let job = store.get_job(job.id).await.unwrap().unwrap();
        assert_eq!(job.status, JobStatus::Failed);
        assert!(job.error.is_some());
    }

    #[tokio::test]
    async fn retried_run_replaces_risk_items_instead_of_duplicating() {
        let (orchestrator, store, job_id) = setup().await;
        orchestrator.run_job(&job_id).await;
        orchestrator.run_job(&job_id).await;
        let items = store.list_risk_items(job_id).await.unwrap();
        assert_eq!(items.len(), 1);
    }
}
