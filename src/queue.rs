//! Task queue boundary: decouples HTTP handlers (which must return
//! quickly) from the orchestrator and export runner (which run for
//! minutes). The in-process implementation below is an `mpsc` channel plus
//! a worker loop, the shape the teacher uses for its pipeline runner.

use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::mpsc;
use tracing::warn;

use crate::errors::PipelineError;

#[derive(Debug, Clone)]
pub enum QueueTask {
    RunAnalysis { job_id: String },
    RunExport { export_id: String },
}

#[async_trait]
pub trait TaskQueue: Send + Sync {
    async fn enqueue(&self, task: QueueTask) -> Result<(), PipelineError>;
}

type Handler = Arc<dyn Fn(QueueTask) -> Pin<Box<dyn Future<Output = ()> + Send>> + Send + Sync>;

/// Bounded in-process queue. Enqueue fails fast (rather than blocking the
/// HTTP handler) once the channel is full.
pub struct InProcessQueue {
    sender: mpsc::Sender<QueueTask>,
}

impl InProcessQueue {
    /// Spawns the worker loop immediately; `handler` is invoked once per
    /// dequeued task and is expected to drive the task to completion
    /// (updating the job/export record and progress store itself).
    pub fn new(capacity: usize, handler: Handler) -> Self {
        let (sender, mut receiver) = mpsc::channel(capacity);
        tokio::spawn(async move {
            while let Some(task) = receiver.recv().await {
                handler(task).await;
            }
        });
        Self { sender }
    }
}

#[async_trait]
impl TaskQueue for InProcessQueue {
    async fn enqueue(&self, task: QueueTask) -> Result<(), PipelineError> {
        self.sender.try_send(task).map_err(|e| match e {
            mpsc::error::TrySendError::Full(_) => {
                warn!("task queue at capacity, rejecting enqueue");
                PipelineError::QueueUnavailable("queue at capacity".to_string())
            }
            mpsc::error::TrySendError::Closed(_) => {
                PipelineError::QueueUnavailable("queue worker has shut down".to_string())
            }
        })
    }
}
