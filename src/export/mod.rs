//! Export Runner: compiles an edit session's actions into a filter graph,
//! invokes the configured media processor (ffmpeg) as a subprocess,
//! streams its progress output, and uploads the rendered file.
//!
//! The subprocess plumbing — piped stdout/stderr, a `BufReader::lines()`
//! loop, and a background ticker updating shared state while the process
//! runs — mirrors the pack's Claude subprocess runner.

use std::path::PathBuf;
use std::process::Stdio;
use std::sync::Arc;

use bytes::Bytes;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::process::Command;
use tracing::{error, info, warn};

use crate::blobstore::BlobStore;
use crate::compiler;
use crate::domain::{EditSessionStatus, ExportStatus, PhaseName};
use crate::errors::PipelineError;
use crate::progress::{ProgressStore, SnapshotState};
use crate::store::JobStore;

pub struct ExportRunner {
    store: JobStore,
    progress: Arc<ProgressStore>,
    blobs: Arc<dyn BlobStore>,
    media_processor_path: String,
    scratch_root: PathBuf,
}

impl ExportRunner {
    pub fn new(
        store: JobStore,
        progress: Arc<ProgressStore>,
        blobs: Arc<dyn BlobStore>,
        media_processor_path: String,
        scratch_root: PathBuf,
    ) -> Self {
        Self {
            store,
            progress,
            blobs,
            media_processor_path,
            scratch_root,
        }
    }

    pub async fn run_export(&self, export_id: &str) {
        if let Err(e) = self.try_run_export(export_id).await {
            error!(export_id, error = %e, "export failed");
            let _ = self
                .store
                .update_export_job(export_id.to_string(), ExportStatus::Failed, None, Some(e.to_string()))
                .await;
            let _ = self.progress.fail(export_id, e.to_string()).await;
        }
    }

    async fn try_run_export(&self, export_id: &str) -> Result<(), PipelineError> {
        let export = self
            .store
            .get_export_job(export_id.to_string())
            .await
            .map_err(PipelineError::Other)?
            .ok_or_else(|| PipelineError::AnalyzerFailed {
                phase: "export".to_string(),
                message: format!("export {export_id} not found"),
            })?;

        self.store
            .update_export_job(export_id.to_string(), ExportStatus::Processing, None, None)
            .await
            .map_err(PipelineError::Other)?;
        self.progress.init(export_id, &[PhaseName::Video]);
        self.progress
            .update_phase(export_id, PhaseName::Video, SnapshotState::Processing, 0, Some("preparing scratch workspace".to_string()))
            .await
            .ok();

        let actions = self
            .store
            .list_edit_actions(export.session_id.clone())
            .await
            .map_err(PipelineError::Other)?;

        let scratch_dir = self.scratch_root.join(export_id);
        tokio::fs::create_dir_all(&scratch_dir)
            .await
            .map_err(|e| PipelineError::BlobIo(e.to_string()))?;

        self.progress
            .update_phase(export_id, PhaseName::Video, SnapshotState::Processing, 5, Some("downloading source video".to_string()))
            .await
            .ok();
        let source_key = self.session_video_key(&export.session_id).await?;
        let source_bytes = self.blobs.get(&source_key).await?;
        let duration_sec = estimate_duration_sec(&source_bytes);
        let input_path = scratch_dir.join("input.mp4");
        tokio::fs::write(&input_path, &source_bytes)
            .await
            .map_err(|e| PipelineError::BlobIo(e.to_string()))?;

        self.progress
            .update_phase(export_id, PhaseName::Video, SnapshotState::Processing, 15, Some("compiling filter graph".to_string()))
            .await
            .ok();
        let graph = compiler::compile(&actions);

        let output_path = scratch_dir.join("output.mp4");
        self.progress
            .update_phase(export_id, PhaseName::Video, SnapshotState::Processing, 20, Some("rendering".to_string()))
            .await
            .ok();
        self.invoke_media_processor(export_id, &input_path, &output_path, &graph, duration_sec)
            .await?;

        self.progress
            .update_phase(export_id, PhaseName::Video, SnapshotState::Processing, 95, Some("uploading rendered video".to_string()))
            .await
            .ok();
        let output_bytes = tokio::fs::read(&output_path)
            .await
            .map_err(|e| PipelineError::BlobIo(e.to_string()))?;
        let output_key = format!("exports/{export_id}.mp4");
        self.blobs.put(&output_key, Bytes::from(output_bytes)).await?;

        self.store
            .update_export_job(export_id.to_string(), ExportStatus::Completed, Some(output_key), None)
            .await
            .map_err(PipelineError::Other)?;
        self.store
            .set_session_status(export.session_id, EditSessionStatus::Completed)
            .await
            .map_err(PipelineError::Other)?;
        self.progress.complete(export_id).await.ok();

        let _ = tokio::fs::remove_dir_all(&scratch_dir).await;
        info!(export_id, "export completed");
        Ok(())
    }

    async fn session_video_key(&self, session_id: &str) -> Result<String, PipelineError> {
        let session = self
            .store
            .get_session(session_id.to_string())
            .await
            .map_err(PipelineError::Other)?
            .ok_or_else(|| PipelineError::AnalyzerFailed {
                phase: "export".to_string(),
                message: "edit session not found".to_string(),
            })?;
        let job = self
            .store
            .get_job(session.job_id)
            .await
            .map_err(PipelineError::Other)?
            .ok_or_else(|| PipelineError::AnalyzerFailed {
                phase: "export".to_string(),
                message: "source job not found for session".to_string(),
            })?;
        let video = self
            .store
            .get_video(job.video_id)
            .await
            .map_err(PipelineError::Other)?
            .ok_or_else(|| PipelineError::AnalyzerFailed {
                phase: "export".to_string(),
                message: "source video not found for job".to_string(),
            })?;
        Ok(video.blob_path)
    }

    async fn invoke_media_processor(
        &self,
        export_id: &str,
        input_path: &PathBuf,
        output_path: &PathBuf,
        graph: &compiler::CompiledFilterGraph,
        duration_sec: f64,
    ) -> Result<(), PipelineError> {
        let mut child = Command::new(&self.media_processor_path)
            .arg("-y")
            .arg("-i")
            .arg(input_path)
            .arg("-filter_complex")
            .arg(&graph.filter_complex)
            .arg("-map")
            .arg(format!("[{}]", graph.video_out_label))
            .arg("-map")
            .arg(format!("[{}]", graph.audio_out_label))
            .arg("-progress")
            .arg("pipe:2")
            .arg(output_path)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .spawn()
            .map_err(PipelineError::SpawnFailed)?;

        let stderr = child.stderr.take().expect("stderr was piped");
        let progress = self.progress.clone();
        let export_id_owned = export_id.to_string();
        let progress_task = tokio::spawn(async move {
            let mut lines = BufReader::new(stderr).lines();
            while let Ok(Some(line)) = lines.next_line().await {
                if let Some(percent) = parse_progress_percent(&line, duration_sec) {
                    progress
                        .update_phase(&export_id_owned, PhaseName::Video, SnapshotState::Processing, percent, None)
                        .await
                        .ok();
                }
            }
        });

        let status = child
            .wait()
            .await
            .map_err(PipelineError::SpawnFailed)?;
        let _ = progress_task.await;

        if !status.success() {
            let code = status.code().unwrap_or(-1);
            warn!(export_id, code, "media processor exited non-zero");
            return Err(PipelineError::SubprocessNonZeroExit { code });
        }
        Ok(())
    }
}

/// Parses ffmpeg's `-progress` key=value stream for `out_time_ms=`,
/// converting it to a percentage of the target duration.
fn parse_progress_percent(line: &str, duration_sec: f64) -> Option<u8> {
    let (key, value) = line.split_once('=')?;
    if key.trim() != "out_time_ms" || duration_sec <= 0.0 {
        return None;
    }
    let out_time_ms: f64 = value.trim().parse().ok()?;
    let percent = (out_time_ms / 1000.0 / duration_sec * 100.0).clamp(0.0, 100.0);
    Some(percent as u8)
}

/// Placeholder duration probe until a real media-inspection backend is
/// wired in; callers needing an accurate duration should populate
/// `Video::duration_sec` at upload time instead of relying on this.
fn estimate_duration_sec(bytes: &Bytes) -> f64 {
    (bytes.len() as f64 / (1024.0 * 1024.0)).max(1.0)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_out_time_ms_into_percent() {
        let percent = parse_progress_percent("out_time_ms=5000000", 10.0);
        assert_eq!(percent, Some(50));
    }

    #[test]
    fn ignores_unrelated_progress_keys() {
        assert_eq!(parse_progress_percent("frame=120", 10.0), None);
    }

    #[test]
    fn clamps_overshoot_to_100() {
        let percent = parse_progress_percent("out_time_ms=99999999", 10.0);
        assert_eq!(percent, Some(100));
    }
}
