use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use riskpipe::analysis::{NullAnalyzer, NullReasoner};
use riskpipe::api::{self, AppState};
use riskpipe::blobstore::{BlobStore, FilesystemBlobStore};
use riskpipe::config::AppConfig;
use riskpipe::domain::PhaseName;
use riskpipe::export::ExportRunner;
use riskpipe::orchestrator::AnalysisOrchestrator;
use riskpipe::progress::ProgressStore;
use riskpipe::queue::{InProcessQueue, QueueTask, TaskQueue};
use riskpipe::store::db::Db;
use riskpipe::store::JobStore;

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .json()
        .init();

    let config = Arc::new(AppConfig::from_env().context("failed to load configuration")?);
    config.ensure_directories().context("failed to prepare data directories")?;

    let db = Db::new(std::path::Path::new(&config.database_url)).context("failed to open database")?;
    let store = JobStore::new(db);
    let progress = Arc::new(ProgressStore::new(Duration::from_secs(config.progress_ttl_secs.max(0) as u64)));
    let blobs: Arc<dyn BlobStore> = Arc::new(FilesystemBlobStore::new(config.blob_root.clone()));

    let analyzers: Vec<Arc<dyn riskpipe::analysis::PerceptualAnalyzer>> = PhaseName::ANALYZER_PHASES
        .iter()
        .map(|phase| Arc::new(NullAnalyzer::new(*phase)) as Arc<dyn riskpipe::analysis::PerceptualAnalyzer>)
        .collect();
    let reasoner = Arc::new(NullReasoner);

    let orchestrator = Arc::new(AnalysisOrchestrator::new(
        store.clone(),
        progress.clone(),
        blobs.clone(),
        analyzers,
        reasoner,
        3,
    ));
    let export_runner = Arc::new(ExportRunner::new(
        store.clone(),
        progress.clone(),
        blobs.clone(),
        config.media_processor_path.clone(),
        config.blob_root.join("scratch"),
    ));

    let queue: Arc<dyn TaskQueue> = Arc::new(InProcessQueue::new(
        config.queue_capacity,
        Arc::new(move |task: QueueTask| {
            let orchestrator = orchestrator.clone();
            let export_runner = export_runner.clone();
            Box::pin(async move {
                match task {
                    QueueTask::RunAnalysis { job_id } => orchestrator.run_job(&job_id).await,
                    QueueTask::RunExport { export_id } => export_runner.run_export(&export_id).await,
                }
            })
        }),
    ));

    let sweep_store = progress.clone();
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(Duration::from_secs(3600));
        loop {
            ticker.tick().await;
            sweep_store.sweep_expired().await;
        }
    });

    let state = Arc::new(AppState { store, progress, blobs, queue, config: config.clone() });
    let app = api::api_router(state).layer(tower_http::trace::TraceLayer::new_for_http());

    let listener = tokio::net::TcpListener::bind(&config.bind_addr)
        .await
        .with_context(|| format!("failed to bind {}", config.bind_addr))?;
    tracing::info!(addr = %config.bind_addr, "riskpipe listening");

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("server error")?;

    Ok(())
}

async fn shutdown_signal() {
    let _ = tokio::signal::ctrl_c().await;
    tracing::info!("shutdown signal received");
}
